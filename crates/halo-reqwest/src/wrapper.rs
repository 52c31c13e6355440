//! Transparent wrapping of payment-gated calls.
//!
//! Any client that can be expressed as [`Invoke`] can be wrapped in [`Halo`].
//! The wrapper forwards each call, and only when the call fails with a
//! payment-required error does it hand over to [`Recovery`]. The recovered
//! result is returned through the same `Output` type, so a paid call looks
//! exactly like a call that succeeded on the first try.

use async_trait::async_trait;
use halo_chain_eip155::SignerLike;
use halo_types::config::HaloConfig;
use http::{HeaderMap, StatusCode};
use std::ops::Deref;
use std::sync::Arc;

use crate::content::{GenerateContentRequest, GeneratedContent, ReplayTarget};
use crate::recovery::{CredentialMode, DefaultSigner, Recovery, RecoveryError};

/// Exposes whether an error is an HTTP 402 and, if so, the response headers.
///
/// The status may come from an explicit field or from an attached response;
/// implementors map whichever they have.
pub trait PaymentRequiredSignal {
    /// HTTP status of the failed call, when known.
    fn status(&self) -> Option<StatusCode>;

    /// Headers of the failed call's response, when one is attached.
    fn response_headers(&self) -> Option<&HeaderMap>;

    fn is_payment_required(&self) -> bool {
        self.status() == Some(StatusCode::PAYMENT_REQUIRED)
    }
}

/// A single content call: takes a request, returns a result or fails.
///
/// This is the narrow capability [`Halo`] intercepts. Implement it once per
/// underlying client type.
#[async_trait]
pub trait Invoke: Send + Sync {
    type Output: Send;
    type Error: std::error::Error + PaymentRequiredSignal + Send + Sync + 'static;

    async fn invoke(&self, request: &GenerateContentRequest)
    -> Result<Self::Output, Self::Error>;

    /// Client, endpoint and parsing a paid replay of this call must reuse.
    fn replay_target(&self) -> ReplayTarget<'_>;
}

/// Failure of a wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum HaloError<E> {
    /// The underlying call failed and no recovery applied. This is the
    /// original error, untouched.
    #[error(transparent)]
    Call(E),
    /// The call needed payment and recovery failed.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

impl<E> HaloError<E> {
    /// Returns the original error if recovery never took over.
    pub fn into_call(self) -> Option<E> {
        match self {
            HaloError::Call(e) => Some(e),
            HaloError::Recovery(_) => None,
        }
    }
}

impl<E: PaymentRequiredSignal> PaymentRequiredSignal for HaloError<E> {
    fn status(&self) -> Option<StatusCode> {
        match self {
            HaloError::Call(e) => e.status(),
            // A failed retry is final; it must not look like a fresh 402 to an outer wrapper.
            HaloError::Recovery(_) => None,
        }
    }

    fn response_headers(&self) -> Option<&HeaderMap> {
        match self {
            HaloError::Call(e) => e.response_headers(),
            HaloError::Recovery(_) => None,
        }
    }
}

/// Wraps a client so that 402 failures are paid for and retried.
///
/// Everything besides [`Invoke::invoke`] is reachable through `Deref`.
///
/// ```rust,no_run
/// use halo_reqwest::{ContentEndpoint, GenerativeModel, Halo, Invoke};
/// use halo_types::config::{HaloConfig, HaloSettings};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = HaloConfig::resolve(HaloSettings::default())?;
/// let model = Halo::from_config(GenerativeModel::new(ContentEndpoint::from_config(&config)), &config)?;
/// let content = model.invoke(&"Summarize the news".into()).await?;
/// println!("{}", content.text);
/// # Ok(())
/// # }
/// ```
pub struct Halo<T, S = DefaultSigner> {
    inner: T,
    recovery: Arc<Recovery<S>>,
}

impl<T, S> Halo<T, S> {
    pub fn new(inner: T, recovery: Recovery<S>) -> Self {
        Self {
            inner,
            recovery: Arc::new(recovery),
        }
    }

    /// Wraps with a recovery shared by other wrappers.
    pub fn with_shared(inner: T, recovery: Arc<Recovery<S>>) -> Self {
        Self { inner, recovery }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn recovery(&self) -> &Arc<Recovery<S>> {
        &self.recovery
    }
}

impl<T> Halo<T, DefaultSigner> {
    /// Wraps `inner` using credentials from `config`.
    ///
    /// A configured private key selects auto-approve; otherwise every
    /// payment is put to the rescue oracle first.
    pub fn from_config(
        inner: T,
        config: &HaloConfig,
    ) -> Result<Self, halo_chain_eip155::SigningError> {
        let mode = CredentialMode::from_config(config)?;
        Ok(Self::new(inner, Recovery::new(mode)))
    }
}

impl<T, S> Deref for Halo<T, S> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[async_trait]
impl<T, S> Invoke for Halo<T, S>
where
    T: Invoke,
    T::Output: From<GeneratedContent>,
    S: SignerLike + Send + Sync + 'static,
{
    type Output = T::Output;
    type Error = HaloError<T::Error>;

    fn replay_target(&self) -> ReplayTarget<'_> {
        self.inner.replay_target()
    }

    async fn invoke(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<Self::Output, Self::Error> {
        match self.inner.invoke(request).await {
            Ok(output) => Ok(output),
            Err(error) if error.is_payment_required() => {
                let content = self
                    .recovery
                    .recover(error, request, self.inner.replay_target())
                    .await?;
                Ok(content.into())
            }
            Err(error) => Err(HaloError::Call(error)),
        }
    }
}
