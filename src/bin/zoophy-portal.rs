//! zoophy-portal binary entry point

use clap::Parser;
use zoophy_portal::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Cli::parse().run().await
}
