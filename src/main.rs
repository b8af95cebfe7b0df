use std::path::PathBuf;
use std::sync::Arc;

use basicauth_operator::{config::OperatorConfig, controller, Error};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the operator configuration file
    #[arg(long, env = "OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Serve the validating admission webhook
    #[arg(long, env = "ENABLE_WEBHOOK")]
    enable_webhook: bool,

    /// Address the webhook server listens on
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: String,

    /// TLS certificate for the webhook server
    #[arg(long, env = "WEBHOOK_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// TLS private key for the webhook server
    #[arg(long, env = "WEBHOOK_TLS_KEY")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Basicauth Operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    info!(
        "Starting Basicauth Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match &args.config {
        Some(path) => OperatorConfig::load(path)?,
        None => OperatorConfig::default(),
    };

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    #[cfg(feature = "admission-webhook")]
    if args.enable_webhook {
        let addr: std::net::SocketAddr = args
            .webhook_addr
            .parse()
            .map_err(|e| Error::ConfigError(format!("invalid webhook address: {e}")))?;

        let mut server =
            basicauth_operator::webhook::WebhookServer::new(client.clone(), config.clone());
        if let (Some(cert), Some(key)) = (&args.tls_cert, &args.tls_key) {
            server = server.with_tls(
                cert.display().to_string(),
                key.display().to_string(),
            );
        }

        tokio::spawn(async move {
            if let Err(e) = server.start(addr).await {
                tracing::error!("Webhook server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    let state = Arc::new(controller::ControllerState {
        client,
        config,
    });
    controller::run_controller(state).await
}
