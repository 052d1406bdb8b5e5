use clap::Parser;
use infergov::cli::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("infergov={0},model_server={0}", cli.log_level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli.execute().await?;
    Ok(())
}
