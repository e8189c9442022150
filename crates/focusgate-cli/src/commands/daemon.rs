use focusgate_core::storage::data_dir;
use focusgate_core::{Config, Daemon, StateStore};
use std::sync::Arc;
use tracing::{info, warn};

use super::CliResult;
use crate::host::{FileForegroundSource, TerminalOverlay};

pub fn run(config: &Config) -> CliResult {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        let store = Arc::new(StateStore::open()?);
        let foreground = Arc::new(FileForegroundSource::new(data_dir()?));
        let daemon = Daemon::new(store, config, foreground, TerminalOverlay)?;
        info!("focusgate daemon starting");
        daemon
            .run(async {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    warn!(%error, "cannot listen for ctrl-c, stopping");
                }
            })
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
