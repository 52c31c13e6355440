//! Recovery from a payment-required failure.
//!
//! A recovery runs `Extracting → Deciding → Signing → Retrying` exactly once
//! per intercepted 402:
//!
//! 1. The `payment-required` header is decoded into a [`PaymentChallenge`].
//!    A missing or malformed header hands the original error back untouched.
//! 2. [`CredentialMode::AutoApprove`] goes straight to signing;
//!    [`CredentialMode::OracleGated`] first asks a [`PaymentOracle`].
//! 3. The first requirement is signed as an ERC-3009 authorization.
//! 4. The original request is replayed with the `Payment-Signature` header.
//!    A second 402 on the replay is final.

use alloy_signer_local::PrivateKeySigner;
use halo_chain_eip155::{Eip3009Signer, SignedPayment, SignerLike, SigningError};
use halo_types::config::HaloConfig;
use halo_types::proto::{PAYMENT_REQUIRED_HEADER, PAYMENT_SIGNATURE_HEADER, PaymentChallenge};
use http::{HeaderMap, StatusCode};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::content::{
    ContentEndpoint, GenerateContentRequest, GeneratedContent, MissingTextError, ReplayTarget,
    error_body, redacted,
};
use crate::events::{RecoveryEvent, RecoveryObserver, TracingObserver};
use crate::oracle::{OracleError, PaymentOracle, RescueOracle};
use crate::wrapper::{HaloError, PaymentRequiredSignal};

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Signer used when credentials come from configuration.
pub type DefaultSigner = Arc<PrivateKeySigner>;

/// Amount reported to the oracle when the requirement names none.
const UNSPECIFIED_AMOUNT: &str = "unspecified";

/// Why a recovery failed after the challenge was understood.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The oracle answered, and the answer was not YES.
    #[error("Payment denied by rescue oracle: {decision}")]
    Denied { decision: String },
    #[error("Rescue consultation failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("Failed to sign payment: {0}")]
    Signing(#[from] SigningError),
    #[error("Invalid retry URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Invalid Payment-Signature header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("Paid retry failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("Paid retry rejected with status {status}: {body}")]
    RetryFailed { status: StatusCode, body: String },
    #[error("Paid retry returned invalid JSON: {0}")]
    Decode(#[source] reqwest::Error),
    #[error(transparent)]
    ResponseShape(#[from] MissingTextError),
    /// The request body is a stream, so it cannot be replayed.
    #[error("Request cannot be cloned for a paid retry")]
    RequestNotCloneable,
}

/// How a payment gets approved, fixed when the wrapper is built.
pub enum CredentialMode<S = DefaultSigner> {
    /// A signing key is held; every payment is signed without asking.
    AutoApprove(Eip3009Signer<S>),
    /// Every payment is put to the oracle first.
    ///
    /// Without a signer an approval still fails, with
    /// [`SigningError::MissingSigningKey`].
    OracleGated {
        oracle: Arc<dyn PaymentOracle>,
        signer: Option<Eip3009Signer<S>>,
    },
}

impl<S> Debug for CredentialMode<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialMode::AutoApprove(_) => f.write_str("AutoApprove"),
            CredentialMode::OracleGated { signer, .. } => f
                .debug_struct("OracleGated")
                .field("has_signer", &signer.is_some())
                .finish(),
        }
    }
}

impl<S> CredentialMode<S> {
    pub fn auto_approve(signer: S) -> Self {
        CredentialMode::AutoApprove(Eip3009Signer::new(signer))
    }

    pub fn oracle_gated<O: PaymentOracle + 'static>(oracle: O) -> Self {
        CredentialMode::OracleGated {
            oracle: Arc::new(oracle),
            signer: None,
        }
    }

    pub fn is_auto_approve(&self) -> bool {
        matches!(self, CredentialMode::AutoApprove(_))
    }
}

impl CredentialMode<DefaultSigner> {
    /// Auto-approve when `config` holds a private key, oracle-gated otherwise.
    ///
    /// The oracle consults the configured content endpoint.
    pub fn from_config(config: &HaloConfig) -> Result<Self, SigningError> {
        match &config.private_key {
            Some(key) => Ok(CredentialMode::AutoApprove(Eip3009Signer::from_private_key(
                key,
            )?)),
            None => Ok(CredentialMode::oracle_gated(RescueOracle::new(
                ContentEndpoint::from_config(config),
            ))),
        }
    }
}

/// Reads the challenge out of a 402 response's headers.
///
/// Returns `None` when the header is missing or cannot be decoded.
pub fn extract_challenge(headers: &HeaderMap) -> Option<PaymentChallenge> {
    let header = headers.get(PAYMENT_REQUIRED_HEADER)?;
    match PaymentChallenge::from_header(header.as_bytes()) {
        Ok(challenge) => Some(challenge),
        Err(error) => {
            tracing::warn!(%error, "Ignoring malformed payment-required header");
            None
        }
    }
}

/// Decides on and signs payments for decoded challenges.
///
/// This is the transport-independent half of a recovery, shared by
/// [`Recovery`] and [`PaymentMiddleware`](crate::PaymentMiddleware).
pub struct PaymentAuthorizer<S = DefaultSigner> {
    mode: CredentialMode<S>,
    observer: Arc<dyn RecoveryObserver>,
}

impl<S> Debug for PaymentAuthorizer<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentAuthorizer")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<S> PaymentAuthorizer<S> {
    pub fn new(mode: CredentialMode<S>) -> Self {
        Self {
            mode,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer<O: RecoveryObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn mode(&self) -> &CredentialMode<S> {
        &self.mode
    }

    pub(crate) fn emit(&self, event: RecoveryEvent) {
        self.observer.on_event(&event);
    }
}

impl<S> PaymentAuthorizer<S>
where
    S: SignerLike + Send + Sync,
{
    /// Runs the deciding and signing steps for `challenge`.
    pub async fn authorize(
        &self,
        challenge: &PaymentChallenge,
    ) -> Result<SignedPayment, RecoveryError> {
        let resource = challenge.resource.description.as_str();
        self.emit(RecoveryEvent::PaymentRequired {
            resource: resource.to_string(),
            amount: challenge.requirement.amount().map(str::to_string),
        });

        let signer = match &self.mode {
            CredentialMode::AutoApprove(signer) => Some(signer),
            CredentialMode::OracleGated { oracle, signer } => {
                let amount = challenge.requirement.amount().unwrap_or(UNSPECIFIED_AMOUNT);
                self.emit(RecoveryEvent::RescueRequested {
                    resource: resource.to_string(),
                    amount: amount.to_string(),
                });
                let decision = oracle.consult(resource, amount).await?;
                let approved = decision.is_approved();
                self.emit(RecoveryEvent::RescueDecided {
                    decision: decision.as_str().to_string(),
                    approved,
                });
                if !approved {
                    return Err(RecoveryError::Denied {
                        decision: decision.as_str().to_string(),
                    });
                }
                signer.as_ref()
            }
        };

        let signer = signer.ok_or(SigningError::MissingSigningKey)?;
        let signed = signer.sign_payment(challenge).await?;
        let authorization = &signed.payload.payload.authorization;
        self.emit(RecoveryEvent::PaymentSigned {
            from: authorization.from.to_string(),
            to: authorization.to.to_string(),
            value: authorization.value.to_string(),
            nonce: authorization.nonce.to_string(),
        });
        Ok(signed)
    }
}

/// Pays for and replays a content call that failed with 402.
///
/// The replay reuses the client, endpoint and parsing of the call that
/// failed, as reported by its [`ReplayTarget`].
pub struct Recovery<S = DefaultSigner> {
    authorizer: PaymentAuthorizer<S>,
}

impl<S> Debug for Recovery<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovery")
            .field("authorizer", &self.authorizer)
            .finish()
    }
}

impl<S> Recovery<S> {
    pub fn new(mode: CredentialMode<S>) -> Self {
        Self {
            authorizer: PaymentAuthorizer::new(mode),
        }
    }

    pub fn with_observer<O: RecoveryObserver + 'static>(mut self, observer: O) -> Self {
        self.authorizer = self.authorizer.with_observer(observer);
        self
    }

    pub fn authorizer(&self) -> &PaymentAuthorizer<S> {
        &self.authorizer
    }
}

impl<S> Recovery<S>
where
    S: SignerLike + Send + Sync,
{
    /// Recovers from `error`, a failure that signalled 402.
    ///
    /// If the challenge cannot be read, `error` comes back as
    /// [`HaloError::Call`] so the caller sees exactly what the call raised.
    #[cfg_attr(feature = "telemetry", instrument(name = "halo.recover", skip_all, err))]
    pub async fn recover<E>(
        &self,
        error: E,
        request: &GenerateContentRequest,
        target: ReplayTarget<'_>,
    ) -> Result<GeneratedContent, HaloError<E>>
    where
        E: PaymentRequiredSignal + std::error::Error + Send,
    {
        let Some(challenge) = error.response_headers().and_then(extract_challenge) else {
            return Err(HaloError::Call(error));
        };
        drop(error);
        let signed = self.authorizer.authorize(&challenge).await?;
        let content = self.retry(request, &signed, target).await?;
        Ok(content)
    }

    async fn retry(
        &self,
        request: &GenerateContentRequest,
        signed: &SignedPayment,
        target: ReplayTarget<'_>,
    ) -> Result<GeneratedContent, RecoveryError> {
        let url = target.endpoint.url()?;
        self.authorizer.emit(RecoveryEvent::RetryAttempted {
            url: redacted(&url),
        });
        let response = target
            .client
            .post(url)
            .header(PAYMENT_SIGNATURE_HEADER, signed.header.as_str())
            .json(&request.to_body())
            .send()
            .await
            .map_err(RecoveryError::Http)?;

        let status = response.status();
        self.authorizer.emit(RecoveryEvent::RetryCompleted {
            status: status.as_u16(),
        });
        if status != StatusCode::OK {
            let body = error_body(response).await;
            return Err(RecoveryError::RetryFailed { status, body });
        }

        let raw = response
            .json::<serde_json::Value>()
            .await
            .map_err(RecoveryError::Decode)?;
        Ok(GeneratedContent::from_response(raw, target.parsing)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentError, GenerativeModel, ResponseParsing};
    use crate::events::RecordingObserver;
    use crate::oracle::RescueDecision;
    use crate::wrapper::Invoke;
    use async_trait::async_trait;
    use halo_types::util::Base64Bytes;
    use reqwest::Client;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ASSET: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

    struct FixedOracle {
        answer: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PaymentOracle for FixedOracle {
        async fn consult(&self, _: &str, _: &str) -> Result<RescueDecision, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RescueDecision::new(self.answer))
        }
    }

    fn gated(answer: &'static str, signer: Option<PrivateKeySigner>) -> (CredentialMode<PrivateKeySigner>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mode = CredentialMode::OracleGated {
            oracle: Arc::new(FixedOracle {
                answer,
                calls: calls.clone(),
            }),
            signer: signer.map(Eip3009Signer::new),
        };
        (mode, calls)
    }

    fn payment_required_headers() -> HeaderMap {
        let header = Base64Bytes::encode_json(&json!({
            "accepts": [{"amount": "1000", "asset": ASSET, "payTo": PAY_TO}],
            "resource": {"description": "gen"}
        }))
        .unwrap()
        .to_string();
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_REQUIRED_HEADER, header.parse().unwrap());
        headers
    }

    fn payment_required_error(headers: HeaderMap) -> ContentError {
        ContentError::Status {
            status: StatusCode::PAYMENT_REQUIRED,
            headers,
            body: "payment required".to_string(),
        }
    }

    fn challenge() -> PaymentChallenge {
        extract_challenge(&payment_required_headers()).unwrap()
    }

    #[test]
    fn test_extract_challenge_fails_closed() {
        assert!(extract_challenge(&HeaderMap::new()).is_none());

        let mut garbage = HeaderMap::new();
        garbage.insert(PAYMENT_REQUIRED_HEADER, "%%%".parse().unwrap());
        assert!(extract_challenge(&garbage).is_none());

        let challenge = challenge();
        assert_eq!(challenge.requirement.amount(), Some("1000"));
        assert_eq!(challenge.resource.description, "gen");
    }

    #[tokio::test]
    async fn test_auto_approve_signs_without_asking() {
        let observer = Arc::new(RecordingObserver::new());
        let authorizer = PaymentAuthorizer::new(CredentialMode::auto_approve(
            PrivateKeySigner::random(),
        ))
        .with_observer(observer.clone());

        let signed = authorizer.authorize(&challenge()).await.unwrap();
        assert_eq!(signed.payload.accepted, challenge().accepted);
        assert_eq!(observer.names(), vec!["PaymentRequired", "PaymentSigned"]);
    }

    #[tokio::test]
    async fn test_oracle_denial_stops_before_signing() {
        let observer = Arc::new(RecordingObserver::new());
        let (mode, calls) = gated("NO, too expensive", Some(PrivateKeySigner::random()));
        let authorizer = PaymentAuthorizer::new(mode).with_observer(observer.clone());

        let err = authorizer.authorize(&challenge()).await.unwrap_err();
        assert!(matches!(err, RecoveryError::Denied { ref decision } if decision == "NO, TOO EXPENSIVE"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.names(),
            vec!["PaymentRequired", "RescueRequested", "RescueDecided"]
        );
    }

    #[tokio::test]
    async fn test_oracle_approval_uses_external_signer() {
        let key = PrivateKeySigner::random();
        let expected = key.address();
        let (mode, calls) = gated("yes", Some(key));
        let authorizer = PaymentAuthorizer::new(mode);

        let signed = authorizer.authorize(&challenge()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            alloy_primitives::Address::from(signed.payload.payload.authorization.from),
            expected
        );
    }

    #[tokio::test]
    async fn test_oracle_approval_without_signer_is_signing_error() {
        let (mode, _) = gated("YES", None);
        let err = PaymentAuthorizer::new(mode)
            .authorize(&challenge())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Signing(SigningError::MissingSigningKey)
        ));
    }

    fn recovery() -> Recovery<PrivateKeySigner> {
        Recovery::new(CredentialMode::auto_approve(PrivateKeySigner::random()))
    }

    fn model(server: &MockServer) -> GenerativeModel {
        GenerativeModel::new(ContentEndpoint::new(server.uri().parse().unwrap(), "m"))
    }

    #[tokio::test]
    async fn test_recover_reraises_when_header_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let model = model(&server);
        let err = recovery()
            .recover(
                payment_required_error(HeaderMap::new()),
                &"hi".into(),
                model.replay_target(),
            )
            .await
            .unwrap_err();
        let original = err.into_call().unwrap();
        assert!(matches!(original, ContentError::Status { ref body, .. } if body == "payment required"));
    }

    #[tokio::test]
    async fn test_second_402_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists(PAYMENT_SIGNATURE_HEADER))
            .respond_with(
                ResponseTemplate::new(402).set_body_string("insufficient funds"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let model = model(&server);
        let err = recovery()
            .recover(
                payment_required_error(payment_required_headers()),
                &"hi".into(),
                model.replay_target(),
            )
            .await
            .unwrap_err();
        assert!(!err.is_payment_required());
        match err {
            HaloError::Recovery(RecoveryError::RetryFailed { status, body }) => {
                assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
                assert_eq!(body, "insufficient funds");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_shape_follows_the_model_parsing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists(PAYMENT_SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let lenient_model = model(&server);
        let lenient = recovery()
            .recover(
                payment_required_error(payment_required_headers()),
                &"hi".into(),
                lenient_model.replay_target(),
            )
            .await
            .unwrap();
        assert_eq!(lenient.text(), "");

        let strict_model = model(&server).with_parsing(ResponseParsing::Strict);
        let strict = recovery()
            .recover(
                payment_required_error(payment_required_headers()),
                &"hi".into(),
                strict_model.replay_target(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            strict,
            HaloError::Recovery(RecoveryError::ResponseShape(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_uses_the_target_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/m:generateContent"))
            .and(header("x-tenant", "acme"))
            .and(header_exists(PAYMENT_SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"candidates": [{"content": {"parts": [{"text": "paid"}]}}]}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-tenant", "acme".parse().unwrap());
        let client = Client::builder().default_headers(headers).build().unwrap();
        let model = model(&server).with_client(client);
        let content = recovery()
            .recover(
                payment_required_error(payment_required_headers()),
                &"hi".into(),
                model.replay_target(),
            )
            .await
            .unwrap();
        assert_eq!(content.text(), "paid");
    }

    #[test]
    fn test_mode_from_config() {
        let key = PrivateKeySigner::random();
        let config = HaloConfig {
            private_key: Some(format!("0x{}", alloy_primitives::hex::encode(key.to_bytes()))),
            api_key: None,
            base_url: "https://api.agihalo.com".parse().unwrap(),
            model: "m".to_string(),
            rpc_url: "https://mainnet.base.org".parse().unwrap(),
        };
        let mode = CredentialMode::from_config(&config).unwrap();
        assert!(mode.is_auto_approve());

        let keyless = HaloConfig {
            private_key: None,
            ..config
        };
        let mode = CredentialMode::from_config(&keyless).unwrap();
        assert!(!mode.is_auto_approve());
        assert_eq!(format!("{mode:?}"), "OracleGated { has_signer: false }");
    }
}
