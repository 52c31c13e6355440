//! Wire format of the 402 challenge and of the signed payment envelope.
//!
//! A server that wants payment answers with status 402 and a
//! `payment-required` header holding base64(JSON) of:
//!
//! ```json
//! {
//!   "accepts": [{ "amount": "1000", "asset": "0x...", "payTo": "0x...", "extra": { "name": "USD Coin", "version": "2" } }],
//!   "resource": { "description": "gen" }
//! }
//! ```
//!
//! The client answers by replaying the request with a `Payment-Signature`
//! header holding base64(JSON) of a [`PaymentPayload`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::util::{Base64Bytes, Base64JsonError};

/// Response header carrying the base64 payment challenge.
pub const PAYMENT_REQUIRED_HEADER: &str = "payment-required";
/// Request header carrying the base64 signed payment on retry (`Payment-Signature`).
pub const PAYMENT_SIGNATURE_HEADER: &str = "payment-signature";
/// Request header marking a no-charge rescue consultation.
pub const RESCUE_HEADER: &str = "x-halo-rescue";

/// Version marker for the signed payment envelope, serialized as the integer `2`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version2;

impl X402Version2 {
    pub const VALUE: u8 = 2;
}

impl Serialize for X402Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version2)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Verbatim JSON of a requirement, echoed back untouched in [`PaymentPayload::accepted`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OriginalJson(pub Box<RawValue>);

impl OriginalJson {
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Parses the verbatim JSON into a structured value.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(self.0.get())
    }
}

impl PartialEq for OriginalJson {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

/// Human-readable description of what is being paid for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// The decoded body of the `payment-required` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub accepts: Vec<OriginalJson>,
    pub resource: ResourceInfo,
}

/// Reads a JSON string or number as its decimal text; `null` reads as absent.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

/// EIP-712 domain overrides a server may attach to a requirement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRequirementExtra {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: Option<String>,
}

/// The fields of one offered payment that signing reads.
///
/// Everything else the server sends (`scheme`, `network`, timeouts, ...) is
/// left alone and travels back verbatim in [`PaymentChallenge::accepted`].
/// Amounts are kept as decimal text whether sent as a string or a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Amount in the token's smallest unit.
    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: Option<String>,
    /// Legacy name of [`PaymentRequirement::amount`].
    #[serde(default, deserialize_with = "string_or_number")]
    pub max_amount_required: Option<String>,
    /// Token contract the payment is denominated in.
    pub asset: String,
    pub pay_to: String,
    #[serde(default)]
    pub extra: Option<PaymentRequirementExtra>,
}

impl PaymentRequirement {
    /// The amount to pay, preferring `amount` over the legacy `maxAmountRequired`.
    pub fn amount(&self) -> Option<&str> {
        self.amount
            .as_deref()
            .or(self.max_amount_required.as_deref())
    }

    pub fn extra_name(&self) -> Option<&str> {
        self.extra.as_ref().and_then(|e| e.name.as_deref())
    }

    pub fn extra_version(&self) -> Option<&str> {
        self.extra.as_ref().and_then(|e| e.version.as_deref())
    }
}

impl TryFrom<&OriginalJson> for PaymentRequirement {
    type Error = serde_json::Error;

    fn try_from(value: &OriginalJson) -> Result<Self, Self::Error> {
        serde_json::from_str(value.as_str())
    }
}

/// Why a `payment-required` header could not be turned into a [`PaymentChallenge`].
#[derive(Debug, thiserror::Error)]
pub enum PaymentRequiredError {
    #[error("Missing payment-required header")]
    MissingHeader,
    #[error("Undecodable payment-required header: {0}")]
    Undecodable(#[from] Base64JsonError),
    #[error("No acceptable payment requirements offered")]
    NoAcceptedRequirements,
    #[error("Invalid payment requirement: {0}")]
    InvalidRequirement(#[source] serde_json::Error),
}

/// A parsed 402 challenge, narrowed to the first acceptable requirement.
///
/// Only `accepts[0]` is ever considered; further offers are ignored.
#[derive(Debug, Clone)]
pub struct PaymentChallenge {
    /// Structured view of `accepts[0]`.
    pub requirement: PaymentRequirement,
    /// `accepts[0]` exactly as the server sent it.
    pub accepted: OriginalJson,
    pub resource: ResourceInfo,
}

impl PaymentChallenge {
    /// Decodes a raw `payment-required` header value.
    pub fn from_header(value: &[u8]) -> Result<Self, PaymentRequiredError> {
        let payment_required: PaymentRequired = Base64Bytes::from(value).decode_json()?;
        Self::try_from(payment_required)
    }
}

impl TryFrom<PaymentRequired> for PaymentChallenge {
    type Error = PaymentRequiredError;

    fn try_from(value: PaymentRequired) -> Result<Self, Self::Error> {
        let accepted = value
            .accepts
            .into_iter()
            .next()
            .ok_or(PaymentRequiredError::NoAcceptedRequirements)?;
        let requirement = PaymentRequirement::try_from(&accepted)
            .map_err(PaymentRequiredError::InvalidRequirement)?;
        Ok(Self {
            requirement,
            accepted,
            resource: value.resource,
        })
    }
}

/// The signed payment envelope sent back in the `Payment-Signature` header.
///
/// `TPayload` is the chain-specific signature and authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload<TPayload> {
    /// Protocol version (always 2).
    pub x402_version: X402Version2,
    /// The requirement being paid, verbatim.
    pub accepted: OriginalJson,
    pub payload: TPayload,
}
