#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Transparent pay-and-retry for metered APIs that answer `402 Payment Required`.
//!
//! Wrap any [`Invoke`] adapter in [`Halo`]. Calls are forwarded unchanged; when
//! one fails with a 402 that carries a `payment-required` challenge, the
//! wrapper signs an ERC-3009 authorization for the first offered requirement
//! and replays the request with a `Payment-Signature` header. The caller gets
//! the replayed result as if the first attempt had succeeded.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use halo_reqwest::{ContentEndpoint, GenerativeModel, Halo, Invoke};
//! use halo_types::config::{HaloConfig, HaloSettings};
//!
//! let config = HaloConfig::resolve(HaloSettings::default())?;
//! let model = Halo::from_config(GenerativeModel::new(ContentEndpoint::from_config(&config)), &config)?;
//! let content = model.invoke(&"Write a haiku about invoices".into()).await?;
//! println!("{}", content.text);
//! ```
//!
//! ## Approval modes
//!
//! - [`CredentialMode::AutoApprove`]: a private key is configured and every
//!   payment is signed right away.
//! - [`CredentialMode::OracleGated`]: no key is configured; a rescue request
//!   (`x-halo-rescue: true`) asks the API whether to pay, and only a `YES`
//!   proceeds.
//!
//! ## Other entry points
//!
//! - [`PaymentMiddleware`] brings the same recovery to any `reqwest` request
//!   through [`WithPayments`].
//! - [`PaymentTools`] exposes the oracle and the signer for manual handling.
//! - [`RecoveryObserver`] receives every [`RecoveryEvent`] of a recovery.

pub mod content;
pub mod events;
mod middleware;
pub mod oracle;
pub mod recovery;
mod tools;
mod wrapper;

pub use content::{
    ContentEndpoint, ContentError, GenerateContentRequest, GeneratedContent, GenerativeModel,
    ReplayTarget, ResponseParsing,
};
pub use events::{RecordingObserver, RecoveryEvent, RecoveryObserver, TracingObserver};
pub use middleware::{PaymentMiddleware, WithPayments};
pub use oracle::{OracleError, PaymentOracle, RescueDecision, RescueOracle};
pub use recovery::{
    CredentialMode, DefaultSigner, PaymentAuthorizer, Recovery, RecoveryError, extract_challenge,
};
pub use tools::PaymentTools;
pub use wrapper::{Halo, HaloError, Invoke, PaymentRequiredSignal};
