//! Halo command-line entrypoint.
//!
//! Sends a prompt to the content endpoint and pays for it when the endpoint
//! answers 402. Also exposes the rescue oracle and the signer directly.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HALO_WALLET_PRIVATE_KEY`, `HALO_API_KEY` (or `GOOGLE_API_KEY`),
//!   `HALO_PROXY_URL`, `HALO_MODEL`, `HALO_RPC_URL`
//! - `RUST_LOG` controls log verbosity (default `info`)

mod config;
mod run;
mod telemetry;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
