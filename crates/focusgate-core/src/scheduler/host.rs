//! Wall-clock alarm hosts.
//!
//! The scheduler only ever talks to [`AlarmHost`]. [`TokioAlarmHost`] is the
//! in-process implementation used by the daemon; [`RecordingAlarmHost`] keeps
//! armed triggers in memory for tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Trigger, TriggerId};
use crate::now_ms;

/// Longest single sleep; the deadline is re-checked against the wall clock
/// after each one so suspend or clock changes cannot delay a trigger long.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Host collaborator that fires a payload at a wall-clock instant.
pub trait AlarmHost: Send + Sync {
    /// Arm (or re-arm) `id` to fire `payload` at `at_ms` epoch milliseconds.
    fn arm(&self, id: TriggerId, at_ms: i64, payload: Trigger);
    /// Cancel `id`; unknown ids are ignored.
    fn cancel(&self, id: &TriggerId);
}

/// Alarm host backed by tokio tasks; fired payloads arrive on a channel.
pub struct TokioAlarmHost {
    runtime: Handle,
    fired: mpsc::UnboundedSender<Trigger>,
    tasks: Mutex<HashMap<TriggerId, JoinHandle<()>>>,
}

impl TokioAlarmHost {
    pub fn new(runtime: Handle) -> (Self, mpsc::UnboundedReceiver<Trigger>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let host = Self {
            runtime,
            fired,
            tasks: Mutex::new(HashMap::new()),
        };
        (host, rx)
    }
}

impl AlarmHost for TokioAlarmHost {
    fn arm(&self, id: TriggerId, at_ms: i64, payload: Trigger) {
        let tx = self.fired.clone();
        let task = self.runtime.spawn(async move {
            loop {
                let remaining = at_ms - now_ms();
                if remaining <= 0 {
                    break;
                }
                let step = Duration::from_millis(remaining.unsigned_abs()).min(MAX_SLEEP);
                tokio::time::sleep(step).await;
            }
            if tx.send(payload).is_err() {
                debug!("trigger receiver dropped");
            }
        });

        let Ok(mut tasks) = self.tasks.lock() else {
            warn!(trigger = %id, "alarm table poisoned, trigger not tracked");
            return;
        };
        tasks.retain(|_, t| !t.is_finished());
        if let Some(previous) = tasks.insert(id, task) {
            previous.abort();
        }
    }

    fn cancel(&self, id: &TriggerId) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(task) = tasks.remove(id) {
                task.abort();
            }
        }
    }
}

/// In-memory alarm host that only records what is armed.
#[derive(Default)]
pub struct RecordingAlarmHost {
    armed: Mutex<BTreeMap<TriggerId, (i64, Trigger)>>,
}

impl RecordingAlarmHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of armed ids and their firing instants.
    pub fn armed(&self) -> BTreeMap<TriggerId, i64> {
        self.armed
            .lock()
            .map(|armed| armed.iter().map(|(id, (at, _))| (id.clone(), *at)).collect())
            .unwrap_or_default()
    }

    pub fn fire_time(&self, id: &TriggerId) -> Option<i64> {
        self.armed.lock().ok()?.get(id).map(|(at, _)| *at)
    }

    pub fn armed_trigger(&self, id: &TriggerId) -> Option<Trigger> {
        self.armed.lock().ok()?.get(id).map(|(_, trigger)| trigger.clone())
    }

    /// Remove and return every trigger due at `now_ms`, earliest first.
    pub fn take_due(&self, now_ms: i64) -> Vec<(i64, Trigger)> {
        let Ok(mut armed) = self.armed.lock() else {
            return Vec::new();
        };
        let due: Vec<TriggerId> = armed
            .iter()
            .filter(|(_, (at, _))| *at <= now_ms)
            .map(|(id, _)| id.clone())
            .collect();
        let mut fired: Vec<(i64, Trigger)> = due.iter().filter_map(|id| armed.remove(id)).collect();
        fired.sort_by_key(|(at, _)| *at);
        fired
    }
}

impl AlarmHost for RecordingAlarmHost {
    fn arm(&self, id: TriggerId, at_ms: i64, payload: Trigger) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.insert(id, (at_ms, payload));
        }
    }

    fn cancel(&self, id: &TriggerId) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokio_host_fires_due_trigger() {
        let (host, mut rx) = TokioAlarmHost::new(Handle::current());
        host.arm(Trigger::Watchdog.id(), now_ms() + 20, Trigger::Watchdog);
        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(fired, Some(Trigger::Watchdog));
    }

    #[tokio::test]
    async fn tokio_host_cancel_prevents_firing() {
        let (host, mut rx) = TokioAlarmHost::new(Handle::current());
        let id = Trigger::Watchdog.id();
        host.arm(id.clone(), now_ms() + 50, Trigger::Watchdog);
        host.cancel(&id);
        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn recording_host_returns_due_in_order() {
        let host = RecordingAlarmHost::new();
        let timer = Trigger::TimerExpiry {
            mode_id: "m".into(),
            deadline_ms: 30,
        };
        host.arm(timer.id(), 30, timer.clone());
        host.arm(Trigger::Watchdog.id(), 10, Trigger::Watchdog);

        let due = host.take_due(40);
        assert_eq!(due, vec![(10, Trigger::Watchdog), (30, timer)]);
        assert!(host.armed().is_empty());
    }
}
