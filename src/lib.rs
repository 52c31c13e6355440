#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Automatic pay-and-retry for metered APIs that answer `402 Payment Required`.
//!
//! This crate bundles the Halo workspace:
//!
//! - [`types`]: the 402 wire format, timestamps and configuration.
//! - [`eip155`]: EIP-712 `TransferWithAuthorization` signing for USDC on Base.
//! - [`reqwest`]: the [`Halo`] wrapper, the recovery state machine, the
//!   rescue oracle and a `reqwest-middleware` layer.
//!
//! ```rust,ignore
//! use halo_rs::{ContentEndpoint, GenerativeModel, Halo, Invoke};
//! use halo_rs::types::config::{HaloConfig, HaloSettings};
//!
//! let config = HaloConfig::resolve(HaloSettings::default())?;
//! let model = Halo::from_config(GenerativeModel::new(ContentEndpoint::from_config(&config)), &config)?;
//! let answer = model.invoke(&"What is HTTP 402?".into()).await?;
//! println!("{}", answer.text);
//! ```

pub use halo_chain_eip155 as eip155;
pub use halo_reqwest as reqwest;
pub use halo_types as types;

pub use halo_reqwest::{
    ContentEndpoint, CredentialMode, GenerateContentRequest, GeneratedContent, GenerativeModel,
    Halo, HaloError, Invoke, PaymentMiddleware, PaymentTools, RecoveryError, RecoveryEvent,
    RecoveryObserver,
};
