use std::time::Duration;

use adk_pipe::config::PipeConfig;
use adk_pipe::{run_server, ServerConfig};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "adk-pipe", bin_name = "adk-pipe")]
#[command(about = "OpenAI-compatible streaming pipe for ADK agents on Cloud Run", version)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 9400)]
    port: u16,

    /// Base URL of the deployed ADK service.
    #[arg(long = "app-url")]
    app_url: String,

    /// ADK app name as registered on the remote service.
    #[arg(long = "app-name")]
    app_name: String,

    /// Model id advertised to the chat host.
    #[arg(long = "model-name", default_value = "adk-agent")]
    model_name: String,

    #[arg(long = "preferred-language", default_value = "English")]
    preferred_language: String,

    /// Artificial gap between text deltas, in milliseconds. 0 disables it.
    #[arg(long = "stream-delay-ms")]
    stream_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(err) = run().await {
        tracing::error!(error = %err, "adk-pipe failed");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    run_server(ServerConfig {
        host: cli.host,
        port: cli.port,
        pipe: PipeConfig {
            app_url: cli.app_url,
            app_name: cli.app_name,
            model_name: cli.model_name,
            preferred_language: cli.preferred_language,
            stream_delay: cli
                .stream_delay_ms
                .filter(|millis| *millis > 0)
                .map(Duration::from_millis),
        },
    })
    .await
}
