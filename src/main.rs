#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::style)]

use clap::Parser;
use sub_filter::cli::Args;
use sub_filter::config::FilterConfig;
use sub_filter::generator::Generator;
use sub_filter::get_version;
use tracing::Level;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let is_verbose = args.verbose;
    tracing_subscriber::fmt()
        .with_max_level(if is_verbose {
            Level::TRACE
        } else {
            Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        tracing::error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    tracing::debug!("sub-filter {}", get_version());

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading filter config from: {}", path);
            FilterConfig::load(path).await?
        }
        None => FilterConfig::default(),
    };
    args.apply_to(&mut config);

    let generator = Generator::load(config).await?;

    generator.run().await?;

    tracing::info!("Filtering complete!");
    Ok(())
}
