//! Known token deployments used as signing defaults.
//!
//! A requirement may carry its own EIP-712 domain `name` and `version` in
//! `extra`. When it does not, the domain of USDC on Base is assumed.

use alloy_primitives::{Address, address};

/// Identity of an ERC-3009 token contract as seen by EIP-712.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDomain {
    pub name: &'static str,
    pub version: &'static str,
    pub chain_id: u64,
    pub address: Address,
}

/// USDC on Base mainnet (eip155:8453).
pub const USDC_BASE: TokenDomain = TokenDomain {
    name: "USD Coin",
    version: "2",
    chain_id: 8453,
    address: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
};
