#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-155 signing for Halo pay-and-retry.
//!
//! Turns a [`PaymentChallenge`](halo_types::proto::PaymentChallenge) into a
//! base64 `Payment-Signature` value: an ERC-3009 `TransferWithAuthorization`
//! signed as EIP-712 typed data, wrapped together with the requirement it pays.
//!
//! # Modules
//!
//! - [`networks`] - Default EIP-712 domain for USDC on Base
//! - [`signer`] - Signer abstraction and the signing routine
//! - [`types`] - Wire format of the authorization and signature
//!
//! # Example
//!
//! ```ignore
//! use halo_chain_eip155::Eip3009Signer;
//! use alloy_signer_local::PrivateKeySigner;
//!
//! let signer = Eip3009Signer::new(PrivateKeySigner::random());
//! let signed = signer.sign_payment(&challenge).await?;
//! request.header("Payment-Signature", signed.header);
//! ```

pub mod networks;
pub mod signer;
pub mod types;

pub use signer::*;
pub use types::*;
