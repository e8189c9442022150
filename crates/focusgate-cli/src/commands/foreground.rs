use clap::Args;
use focusgate_core::storage::data_dir;

use crate::host::{foreground_path, home_path};

use super::CliResult;

#[derive(Args)]
pub struct ForegroundArgs {
    /// App id now in the foreground
    app: String,
    /// Record the app as the launcher instead
    #[arg(long)]
    home: bool,
}

pub fn run(args: ForegroundArgs) -> CliResult {
    let dir = data_dir()?;
    let path = if args.home {
        home_path(&dir)
    } else {
        foreground_path(&dir)
    };
    std::fs::write(&path, format!("{}\n", args.app.trim()))?;
    println!("ok");
    Ok(())
}
