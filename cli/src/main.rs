use clap::Parser;
use edc_cli::Cli;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let code = cli.run().await;
    std::process::exit(code);
}
