//! Pay-and-retry as a `reqwest-middleware` layer.
//!
//! Applies the same decide-and-sign steps as [`Recovery`](crate::Recovery)
//! to arbitrary requests, for endpoints other than the content API.

use halo_chain_eip155::{SignerLike, SigningError};
use halo_types::config::HaloConfig;
use halo_types::proto::PAYMENT_SIGNATURE_HEADER;
use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Client, Request, Response};
use reqwest_middleware as rqm;
use std::sync::Arc;

use crate::content::redacted;
use crate::events::RecoveryEvent;
use crate::recovery::{
    CredentialMode, DefaultSigner, PaymentAuthorizer, RecoveryError, extract_challenge,
};

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Middleware that answers a 402 with a signed payment and replays the request once.
///
/// A 402 without a readable `payment-required` header is returned as is, and
/// so is a 402 on the replay.
///
/// ```rust,no_run
/// use halo_reqwest::{CredentialMode, PaymentMiddleware, WithPayments};
/// use alloy_signer_local::PrivateKeySigner;
/// use std::sync::Arc;
///
/// let signer = Arc::new("PRIVATE_KEY".parse::<PrivateKeySigner>().unwrap());
/// let client = reqwest::Client::new()
///     .with_payments(PaymentMiddleware::new(CredentialMode::auto_approve(signer)));
/// ```
pub struct PaymentMiddleware<S = DefaultSigner> {
    authorizer: Arc<PaymentAuthorizer<S>>,
}

impl<S> Clone for PaymentMiddleware<S> {
    fn clone(&self) -> Self {
        Self {
            authorizer: self.authorizer.clone(),
        }
    }
}

impl<S> PaymentMiddleware<S> {
    pub fn new(mode: CredentialMode<S>) -> Self {
        Self::from_authorizer(PaymentAuthorizer::new(mode))
    }

    pub fn from_authorizer(authorizer: PaymentAuthorizer<S>) -> Self {
        Self {
            authorizer: Arc::new(authorizer),
        }
    }
}

impl PaymentMiddleware<DefaultSigner> {
    /// Middleware with the credential mode `config` selects.
    pub fn from_config(config: &HaloConfig) -> Result<Self, SigningError> {
        Ok(Self::new(CredentialMode::from_config(config)?))
    }
}

/// Turns a plain `reqwest` client into one that pays for 402 responses.
pub trait WithPayments {
    fn with_payments<S>(self, middleware: PaymentMiddleware<S>) -> rqm::ClientWithMiddleware
    where
        S: SignerLike + Send + Sync + 'static;
}

impl WithPayments for Client {
    fn with_payments<S>(self, middleware: PaymentMiddleware<S>) -> rqm::ClientWithMiddleware
    where
        S: SignerLike + Send + Sync + 'static,
    {
        rqm::ClientBuilder::new(self).with(middleware).build()
    }
}

fn middleware_error(error: RecoveryError) -> rqm::Error {
    rqm::Error::Middleware(error.into())
}

#[async_trait::async_trait]
impl<S> rqm::Middleware for PaymentMiddleware<S>
where
    S: SignerLike + Send + Sync + 'static,
{
    #[cfg_attr(feature = "telemetry", instrument(name = "halo.middleware.handle", skip_all, err))]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let retry_req = req.try_clone();
        let res = next.clone().run(req, extensions).await?;

        if res.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(res);
        }
        let Some(challenge) = extract_challenge(res.headers()) else {
            return Ok(res);
        };

        let signed = self
            .authorizer
            .authorize(&challenge)
            .await
            .map_err(middleware_error)?;
        let header = HeaderValue::from_str(&signed.header)
            .map_err(|e| middleware_error(RecoveryError::HeaderValue(e)))?;

        let mut retry =
            retry_req.ok_or_else(|| middleware_error(RecoveryError::RequestNotCloneable))?;
        retry.headers_mut().insert(PAYMENT_SIGNATURE_HEADER, header);

        self.authorizer.emit(RecoveryEvent::RetryAttempted {
            url: redacted(retry.url()),
        });
        let res = next.run(retry, extensions).await?;
        self.authorizer.emit(RecoveryEvent::RetryCompleted {
            status: res.status().as_u16(),
        });
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use alloy_signer_local::PrivateKeySigner;
    use halo_types::proto::PAYMENT_REQUIRED_HEADER;
    use halo_types::util::Base64Bytes;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn challenge_header() -> String {
        Base64Bytes::encode_json(&json!({
            "accepts": [{
                "amount": "1000",
                "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C"
            }],
            "resource": {"description": "weather"}
        }))
        .unwrap()
        .to_string()
    }

    #[tokio::test]
    async fn test_pays_and_replays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(header_exists(PAYMENT_SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_string("sunny"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(
                ResponseTemplate::new(402).insert_header(PAYMENT_REQUIRED_HEADER, challenge_header()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let observer = Arc::new(RecordingObserver::new());
        let authorizer = PaymentAuthorizer::new(CredentialMode::auto_approve(Arc::new(
            PrivateKeySigner::random(),
        )))
        .with_observer(observer.clone());
        let middleware = PaymentMiddleware::from_authorizer(authorizer);
        let client = Client::new().with_payments(middleware);

        let res = client
            .get(format!("{}/weather", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "sunny");
        assert_eq!(
            observer.names(),
            vec![
                "PaymentRequired",
                "PaymentSigned",
                "RetryAttempted",
                "RetryCompleted"
            ]
        );
    }

    #[tokio::test]
    async fn test_unreadable_challenge_returns_original_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(402).set_body_string("pay"))
            .expect(1)
            .mount(&server)
            .await;

        let middleware = PaymentMiddleware::new(CredentialMode::auto_approve(Arc::new(
            PrivateKeySigner::random(),
        )));
        let client = Client::new().with_payments(middleware);
        let res = client.get(server.uri()).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(res.text().await.unwrap(), "pay");
    }

    #[tokio::test]
    async fn test_non_402_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let middleware = PaymentMiddleware::new(CredentialMode::auto_approve(Arc::new(
            PrivateKeySigner::random(),
        )));
        let client = Client::new().with_payments(middleware);
        let res = client.get(server.uri()).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_from_config_signs_with_configured_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists(PAYMENT_SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(402).insert_header(PAYMENT_REQUIRED_HEADER, challenge_header()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let key = PrivateKeySigner::random();
        let config = HaloConfig {
            private_key: Some(format!("0x{}", alloy_primitives::hex::encode(key.to_bytes()))),
            api_key: None,
            base_url: server.uri().parse().unwrap(),
            model: "m".to_string(),
            rpc_url: "https://mainnet.base.org".parse().unwrap(),
        };
        let middleware = PaymentMiddleware::from_config(&config).unwrap();
        assert!(middleware.authorizer.mode().is_auto_approve());

        let res = Client::new()
            .with_payments(middleware)
            .get(server.uri())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
