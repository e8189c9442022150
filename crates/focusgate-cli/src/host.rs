//! Terminal stand-ins for the host collaborators the daemon needs.

use focusgate_core::enforcement::OverlayError;
use focusgate_core::{AppId, ForegroundSource, OverlaySurface};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FOREGROUND_FILE: &str = "foreground";
const HOME_FILE: &str = "home";

pub fn foreground_path(dir: &Path) -> PathBuf {
    dir.join(FOREGROUND_FILE)
}

pub fn home_path(dir: &Path) -> PathBuf {
    dir.join(HOME_FILE)
}

/// Foreground source fed by `focusgate foreground <app>`.
///
/// The file always names the current app, so `lookback` does not apply.
pub struct FileForegroundSource {
    dir: PathBuf,
}

impl FileForegroundSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn read(path: &Path) -> Option<AppId> {
        let content = std::fs::read_to_string(path).ok()?;
        let app = content.trim();
        (!app.is_empty()).then(|| AppId::from(app))
    }
}

impl ForegroundSource for FileForegroundSource {
    fn foreground_app(&self, _lookback: Duration) -> Option<AppId> {
        Self::read(&foreground_path(&self.dir))
    }

    fn home_app(&self) -> Option<AppId> {
        Self::read(&home_path(&self.dir))
    }
}

/// Overlay surface that draws a banner on stdout.
pub struct TerminalOverlay;

impl OverlaySurface for TerminalOverlay {
    fn add(&mut self) -> Result<(), OverlayError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "[focusgate] ===== BLOCKED: this app is not allowed right now =====")
            .and_then(|()| out.flush())
            .map_err(|e| OverlayError::Rejected(e.to_string()))
    }

    fn remove(&mut self) -> Result<(), OverlayError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "[focusgate] overlay cleared")
            .and_then(|()| out.flush())
            .map_err(|e| OverlayError::Rejected(e.to_string()))
    }
}
