//! Manual access to the two payment tools.
//!
//! For callers that handle 402 responses themselves instead of wrapping a
//! client: consult the rescue oracle, then sign the challenge.

use halo_chain_eip155::{Eip3009Signer, SignedPayment, SigningError};
use halo_types::config::HaloConfig;
use halo_types::proto::PaymentChallenge;

use crate::content::ContentEndpoint;
use crate::oracle::{OracleError, PaymentOracle, RescueDecision, RescueOracle};
use crate::recovery::DefaultSigner;

#[derive(Debug, Clone)]
pub struct PaymentTools {
    signer: Option<Eip3009Signer<DefaultSigner>>,
    oracle: RescueOracle,
}

impl PaymentTools {
    pub fn new(signer: Option<Eip3009Signer<DefaultSigner>>, oracle: RescueOracle) -> Self {
        Self { signer, oracle }
    }

    pub fn from_config(config: &HaloConfig) -> Result<Self, SigningError> {
        let signer = config
            .private_key
            .as_deref()
            .map(Eip3009Signer::from_private_key)
            .transpose()?;
        let oracle = RescueOracle::new(ContentEndpoint::from_config(config));
        Ok(Self::new(signer, oracle))
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    /// Asks the oracle whether `amount` should be paid for `resource`.
    pub async fn consult_oracle(
        &self,
        resource: &str,
        amount: &str,
    ) -> Result<RescueDecision, OracleError> {
        self.oracle.consult(resource, amount).await
    }

    /// Signs the first requirement of `challenge`.
    pub async fn sign_payment(
        &self,
        challenge: &PaymentChallenge,
    ) -> Result<SignedPayment, SigningError> {
        let signer = self.signer.as_ref().ok_or(SigningError::MissingSigningKey)?;
        signer.sign_payment(challenge).await
    }
}
