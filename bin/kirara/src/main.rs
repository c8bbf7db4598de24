use clap::Parser;
use clap_handler::Handler;
use tracing_subscriber::filter::LevelFilter;

mod commands;

#[derive(Parser, clap_handler::Handler, Clone)]
#[clap(name = "kirara", version, about)]
struct KiraraArgs {
    #[clap(subcommand)]
    command: commands::KiraraCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = KiraraArgs::parse();
    args.run().await
}
