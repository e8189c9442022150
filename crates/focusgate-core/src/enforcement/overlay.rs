//! Blocking overlay and the thread that owns its surface.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Host collaborator: a full-screen, always-on-top view.
///
/// Only ever called from the [`DisplayContext`] thread.
pub trait OverlaySurface: Send + 'static {
    fn add(&mut self) -> Result<(), OverlayError>;
    fn remove(&mut self) -> Result<(), OverlayError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    #[error("Overlay surface rejected the request: {0}")]
    Rejected(String),

    #[error("Display context is gone")]
    DisplayGone,
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add,
    Remove,
}

struct Command {
    op: Op,
    reply: oneshot::Sender<Result<(), OverlayError>>,
}

/// Dedicated thread owning the overlay surface.
///
/// Dropping every clone of the context stops the thread.
#[derive(Clone)]
pub struct DisplayContext {
    commands: mpsc::Sender<Command>,
}

impl DisplayContext {
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<S: OverlaySurface>(surface: S) -> std::io::Result<Self> {
        let (commands, rx) = mpsc::channel::<Command>();
        thread::Builder::new()
            .name("focusgate-display".into())
            .spawn(move || serve(surface, rx))?;
        Ok(Self { commands })
    }

    async fn run(&self, op: Op) -> Result<(), OverlayError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command { op, reply })
            .map_err(|_| OverlayError::DisplayGone)?;
        rx.await.map_err(|_| OverlayError::DisplayGone)?
    }
}

fn serve<S: OverlaySurface>(mut surface: S, commands: mpsc::Receiver<Command>) {
    while let Ok(Command { op, reply }) = commands.recv() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| match op {
            Op::Add => surface.add(),
            Op::Remove => surface.remove(),
        }))
        .unwrap_or_else(|_| Err(OverlayError::Rejected(format!("surface panicked during {op:?}"))));
        if reply.send(result).is_err() {
            debug!(?op, "overlay requester went away");
        }
    }
    debug!("display context stopped");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayVisibility {
    Hidden,
    Showing,
}

#[derive(Debug, Default)]
struct OverlayFlags {
    showing: bool,
    animating: bool,
}

/// Clears `animating` however the transition ends.
struct Animating<'a>(&'a mut OverlayFlags);

impl Drop for Animating<'_> {
    fn drop(&mut self) {
        self.0.animating = false;
    }
}

/// Guarded show/hide state machine in front of a [`DisplayContext`].
pub struct OverlayController {
    display: DisplayContext,
    flags: Mutex<OverlayFlags>,
}

impl OverlayController {
    pub fn new(display: DisplayContext) -> Self {
        Self {
            display,
            flags: Mutex::new(OverlayFlags::default()),
        }
    }

    /// Show the overlay. Returns whether the surface was actually added.
    pub async fn show(&self) -> bool {
        self.transition(true).await
    }

    /// Hide the overlay. Returns whether the surface was actually removed.
    pub async fn hide(&self) -> bool {
        self.transition(false).await
    }

    pub async fn visibility(&self) -> OverlayVisibility {
        if self.flags.lock().await.showing {
            OverlayVisibility::Showing
        } else {
            OverlayVisibility::Hidden
        }
    }

    async fn transition(&self, show: bool) -> bool {
        let mut flags = self.flags.lock().await;
        if flags.animating || flags.showing == show {
            return false;
        }
        flags.animating = true;
        let animating = Animating(&mut *flags);

        let op = if show { Op::Add } else { Op::Remove };
        match self.display.run(op).await {
            Ok(()) => {
                animating.0.showing = show;
                true
            }
            Err(error) => {
                warn!(%error, ?op, "overlay transition failed, resetting to hidden");
                animating.0.showing = false;
                false
            }
        }
    }
}
