#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for Halo pay-and-retry.
//!
//! A metered API answers an unpaid call with `402 Payment Required` and a
//! base64-encoded `payment-required` header. This crate holds the types that
//! travel over that boundary, independent of how a payment gets signed or how
//! the retry is sent.
//!
//! # Modules
//!
//! - [`config`] - Credential and endpoint resolution (explicit value, environment, default)
//! - [`proto`] - Wire format of the 402 challenge and of the signed payment envelope
//! - [`timestamp`] - Unix timestamps for authorization validity windows
//! - [`util`] - Base64 helpers
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing of configuration resolution

pub mod config;
pub mod proto;
pub mod timestamp;
pub mod util;
