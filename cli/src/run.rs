use clap::Parser;
use dotenvy::dotenv;
use halo_reqwest::{
    ContentEndpoint, CredentialMode, GenerativeModel, Halo, Invoke, PaymentTools, Recovery,
    ResponseParsing,
};
use halo_types::proto::PaymentChallenge;

use crate::config::{CliArgs, Command};
use crate::telemetry;

/// Runs one `halo` command.
///
/// - Loads `.env` variables.
/// - Installs the log subscriber.
/// - Resolves configuration from flags, environment, the optional settings
///   file and defaults.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let args = CliArgs::parse();
    telemetry::init();

    let config = args.resolve()?;
    tracing::debug!(?config, "Configuration resolved");
    let parsing = if args.strict {
        ResponseParsing::Strict
    } else {
        ResponseParsing::Lenient
    };

    match &args.command {
        Command::Generate { prompt } => {
            let model =
                GenerativeModel::new(ContentEndpoint::from_config(&config)).with_parsing(parsing);
            let mode = CredentialMode::from_config(&config)?;
            tracing::info!(
                auto_approve = mode.is_auto_approve(),
                model = model.model(),
                "Sending prompt"
            );
            let model = Halo::new(model, Recovery::new(mode));
            let content = model.invoke(&prompt.as_str().into()).await?;
            println!("{}", content.text());
        }
        Command::Consult { resource, amount } => {
            let tools = PaymentTools::from_config(&config)?;
            let decision = tools.consult_oracle(resource, amount).await?;
            println!("{}", decision.as_str());
        }
        Command::Sign { header } => {
            let tools = PaymentTools::from_config(&config)?;
            let challenge = PaymentChallenge::from_header(header.as_bytes())?;
            let signed = tools.sign_payment(&challenge).await?;
            tracing::info!(
                payload = %serde_json::to_string(&signed.payload)?,
                "Signed payment"
            );
            println!("{}", signed.header);
        }
    }

    Ok(())
}
