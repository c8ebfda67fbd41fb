//! Cooperative frame holds.
//!
//! A consumer that needs more time within the current frame (say, an asset
//! still loading) registers a named hold; the pipeline listener waits for
//! all holds as a bounded join with an explicit deadline. Holds never
//! extend a frame past its budget: on deadline they are logged and
//! abandoned, and the frame completes anyway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A named, resumable deferral of the current frame.
pub(crate) struct FrameHold {
    pub name: String,
    pub released: oneshot::Receiver<()>,
}

/// Resumes a frame hold, either explicitly or on drop.
pub struct FrameGuard {
    name: String,
    release: Option<oneshot::Sender<()>>,
}

impl FrameGuard {
    /// Name given when the hold was registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the hold, letting the current frame complete.
    pub fn resume(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// Holds registered by consumers since the last frame completed.
#[derive(Clone, Default)]
pub(crate) struct HoldRegistry {
    pending: Arc<Mutex<Vec<FrameHold>>>,
}

impl HoldRegistry {
    pub fn register(&self, name: impl Into<String>) -> FrameGuard {
        let name = name.into();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(FrameHold { name: name.clone(), released: rx });
        FrameGuard { name, release: Some(tx) }
    }

    /// Take all currently registered holds.
    pub fn drain(&self) -> Vec<FrameHold> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

/// Wait for every hold to release, up to `deadline`.
///
/// Returns once all holds resolve or the deadline passes, whichever comes
/// first. Unresolved holds are named in the log so stuck consumers can be
/// identified.
pub(crate) async fn wait_for_holds(holds: Vec<FrameHold>, deadline: Duration) {
    if holds.is_empty() {
        return;
    }
    let names: Vec<String> = holds.iter().map(|hold| hold.name.clone()).collect();
    debug!(holds = ?names, "waiting for frame holds");

    let join = join_all(holds.into_iter().map(|hold| hold.released));
    if tokio::time::timeout(deadline, join).await.is_err() {
        warn!(holds = ?names, "frame holds did not resolve within the frame budget");
    }
}
