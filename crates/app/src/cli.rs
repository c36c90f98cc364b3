use anyhow::Result;
use clap::Parser;
use vision::client::{self, ClientCliArgs, ClientConfig};

/// Stream webcam frames to an object-detection server and preview the
/// annotated results in a browser.
#[derive(Debug, Parser)]
#[command(name = "webcam-detect", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub client: ClientCliArgs,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = ClientConfig::try_from(cli.client)?;
    client::run(config)
}
