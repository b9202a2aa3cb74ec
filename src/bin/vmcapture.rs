use clap::Parser;
use tracing_subscriber::EnvFilter;
use vmcapture::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::execute_run(args).await?,
        Commands::Destroy(args) => commands::execute_destroy(args).await?,
    }

    Ok(())
}
