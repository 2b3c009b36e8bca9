mod action;
mod agent;
mod cli;
mod cmd;
mod config;
mod error;
mod git;
mod http;
mod layout;
mod logger;
mod manager;
mod merge;
mod multiplexer;
mod pane;
mod state;
mod tui;
mod worker;

use anyhow::Result;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "dmux start");

    match cli::run().await {
        Ok(()) => {
            info!("dmux finished successfully");
            Ok(())
        }
        Err(err) => {
            error!(error = ?err, "dmux failed");
            Err(err)
        }
    }
}
