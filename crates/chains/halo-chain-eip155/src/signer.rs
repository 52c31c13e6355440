//! Signing of ERC-3009 payment authorizations.
//!
//! [`Eip3009Signer`] is the only place a private key is used. Signing is a
//! pure function of the key, the requirement, the current time and a fresh
//! random nonce, so one signer can serve any number of concurrent calls.

use alloy_primitives::{Address, B256, FixedBytes, Signature, U256};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolStruct, eip712_domain};
use async_trait::async_trait;
use halo_types::proto::{PaymentChallenge, PaymentPayload, PaymentRequirement, X402Version2};
use halo_types::timestamp::UnixTimestamp;
use halo_types::util::Base64Bytes;
use rand::{Rng, rng};
use std::sync::Arc;
use std::time::SystemTimeError;

use crate::networks::USDC_BASE;
use crate::types::{
    Authorization, ChecksummedAddress, ExactEvmPayload, SignedPaymentPayload,
    TransferWithAuthorization,
};

/// How far `validAfter` is backdated to tolerate clock skew.
pub const VALID_AFTER_GRACE_SECS: u64 = 60;
/// How long after signing the authorization stays valid.
pub const VALID_FOR_SECS: u64 = 3600;

/// Errors that can occur while producing a signed payment.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// No signing key is held, so nothing can be authorized.
    #[error("No private key for signing")]
    MissingSigningKey,
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("Payment requirement has no amount")]
    MissingAmount,
    #[error("Invalid payment amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },
    #[error("Invalid {field} address {value}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        #[source]
        source: alloy_primitives::hex::FromHexError,
    },
    #[error("Failed to read system clock")]
    Clock(#[source] SystemTimeError),
    #[error("Failed to sign payment authorization: {0}")]
    Signer(#[source] alloy_signer::Error),
    #[error("Failed to encode payment payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Abstracts signing so that both owned and `Arc`-shared signers can be used.
///
/// Alloy's `Signer` is not implemented for `Arc<T>`, and `PrivateKeySigner`
/// is shared across wrapped clients, hence this indirection.
#[async_trait]
pub trait SignerLike {
    /// Returns the address of the signer.
    fn address(&self) -> Address;

    /// Signs the given hash.
    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error>;
}

#[async_trait]
impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

#[async_trait]
impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

/// Parses a hex private key, with or without `0x`.
pub fn parse_private_key(key: &str) -> Result<PrivateKeySigner, SigningError> {
    key.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| SigningError::InvalidPrivateKey(e.to_string()))
}

/// Everything that goes into one EIP-712 signature besides the key.
#[derive(Debug, Clone)]
pub struct TransferSigningParams {
    pub chain_id: u64,
    /// The token contract, used as the EIP-712 verifying contract.
    pub asset: Address,
    pub pay_to: Address,
    pub amount: U256,
    pub domain_name: String,
    pub domain_version: String,
}

impl TransferSigningParams {
    /// Interprets a requirement for signing on `chain_id`.
    ///
    /// Domain name and version default to those of USDC.
    pub fn from_requirement(
        requirement: &PaymentRequirement,
        chain_id: u64,
    ) -> Result<Self, SigningError> {
        let amount = requirement.amount().ok_or(SigningError::MissingAmount)?;
        let amount =
            U256::from_str_radix(amount.trim(), 10).map_err(|e| SigningError::InvalidAmount {
                amount: amount.to_string(),
                reason: e.to_string(),
            })?;
        let asset = parse_address("asset", &requirement.asset)?;
        let pay_to = parse_address("payTo", &requirement.pay_to)?;
        Ok(Self {
            chain_id,
            asset,
            pay_to,
            amount,
            domain_name: requirement
                .extra_name()
                .unwrap_or(USDC_BASE.name)
                .to_string(),
            domain_version: requirement
                .extra_version()
                .unwrap_or(USDC_BASE.version)
                .to_string(),
        })
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, SigningError> {
    value
        .trim()
        .parse::<ChecksummedAddress>()
        .map(Address::from)
        .map_err(|source| SigningError::InvalidAddress {
            field,
            value: value.to_string(),
            source,
        })
}

/// Signs a `TransferWithAuthorization` valid from `now - 60s` to `now + 3600s`.
pub async fn sign_transfer_authorization<S: SignerLike + Sync>(
    signer: &S,
    params: &TransferSigningParams,
    now: UnixTimestamp,
) -> Result<ExactEvmPayload, SigningError> {
    let domain = eip712_domain! {
        name: params.domain_name.clone(),
        version: params.domain_version.clone(),
        chain_id: params.chain_id,
        verifying_contract: params.asset,
    };

    let nonce: [u8; 32] = rng().random();
    let authorization = Authorization {
        from: signer.address().into(),
        to: params.pay_to.into(),
        value: params.amount,
        valid_after: now.saturating_sub(VALID_AFTER_GRACE_SECS),
        valid_before: now + VALID_FOR_SECS,
        nonce: B256::from(nonce),
    };

    // The verifier rebuilds this struct from `authorization`, so both must agree field by field.
    let transfer_with_authorization = TransferWithAuthorization::from(&authorization);
    let eip712_hash = transfer_with_authorization.eip712_signing_hash(&domain);
    let signature = signer
        .sign_hash(&eip712_hash)
        .await
        .map_err(SigningError::Signer)?;

    #[cfg(feature = "telemetry")]
    tracing::debug!(?authorization, "Signed transfer authorization");

    Ok(ExactEvmPayload {
        signature: signature.as_bytes().into(),
        authorization,
    })
}

/// A signed payment, both structured and encoded for the header.
#[derive(Debug, Clone)]
pub struct SignedPayment {
    pub payload: SignedPaymentPayload,
    /// Base64 JSON of `payload`, ready for `Payment-Signature`.
    pub header: String,
}

/// Produces `Payment-Signature` values for 402 challenges.
///
/// # Example
///
/// ```ignore
/// use halo_chain_eip155::Eip3009Signer;
/// use alloy_signer_local::PrivateKeySigner;
///
/// let signer = Eip3009Signer::new(PrivateKeySigner::random());
/// assert_eq!(signer.chain_id(), 8453);
/// ```
#[derive(Debug, Clone)]
pub struct Eip3009Signer<S> {
    signer: S,
    chain_id: u64,
}

impl<S> Eip3009Signer<S> {
    /// Creates a signer for Base mainnet.
    pub fn new(signer: S) -> Self {
        Self {
            signer,
            chain_id: USDC_BASE.chain_id,
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

impl Eip3009Signer<Arc<PrivateKeySigner>> {
    /// Creates a Base mainnet signer from a hex private key.
    pub fn from_private_key(key: &str) -> Result<Self, SigningError> {
        let signer = parse_private_key(key)?;
        Ok(Self::new(Arc::new(signer)))
    }
}

impl<S> Eip3009Signer<S>
where
    S: SignerLike + Sync,
{
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Signs the first requirement of `challenge` at the current time.
    pub async fn sign_payment(
        &self,
        challenge: &PaymentChallenge,
    ) -> Result<SignedPayment, SigningError> {
        let now = UnixTimestamp::try_now().map_err(SigningError::Clock)?;
        self.sign_payment_at(challenge, now).await
    }

    /// Signs the first requirement of `challenge` as of `now`.
    pub async fn sign_payment_at(
        &self,
        challenge: &PaymentChallenge,
        now: UnixTimestamp,
    ) -> Result<SignedPayment, SigningError> {
        let params = TransferSigningParams::from_requirement(&challenge.requirement, self.chain_id)?;
        let evm_payload = sign_transfer_authorization(&self.signer, &params, now).await?;
        let payload = PaymentPayload {
            x402_version: X402Version2,
            accepted: challenge.accepted.clone(),
            payload: evm_payload,
        };
        let header = Base64Bytes::encode_json(&payload)?.to_string();
        Ok(SignedPayment { payload, header })
    }
}
