//! Coalescing broadcast of state snapshots to every WebSocket client.
//!
//! Publishing never blocks on the network. Each publish overwrites a single
//! pending slot; if no pass is running one is spawned. A running pass keeps
//! draining the slot until it stays empty, so a burst of publishes during a
//! slow pass collapses into one follow-up pass carrying only the newest
//! payload. At most one pass runs at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::client::ClientRegistry;
use crate::frame::Opcode;

/// Counters describing broadcast activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Passes started since the broadcaster was created.
    pub passes: u64,
    /// Highest number of passes observed running at once.
    pub peak_concurrent_passes: usize,
}

/// Runtime a broadcaster spawns its passes on while the server runs.
struct Attachment {
    lifetime: CancellationToken,
    runtime: Handle,
}

pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    pending: Mutex<Option<Arc<str>>>,
    in_flight: AtomicBool,
    attachment: Mutex<Option<Attachment>>,
    passes: AtomicU64,
    active_passes: AtomicUsize,
    peak_passes: AtomicUsize,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            pending: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            attachment: Mutex::new(None),
            passes: AtomicU64::new(0),
            active_passes: AtomicUsize::new(0),
            peak_passes: AtomicUsize::new(0),
        }
    }

    /// Enables broadcasting on the current runtime until `lifetime` is
    /// cancelled or [`detach`](Self::detach) is called.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, lifetime: CancellationToken) {
        *lock(&self.attachment) = Some(Attachment {
            lifetime,
            runtime: Handle::current(),
        });
    }

    /// Disables broadcasting and drops any payload not yet sent.
    pub fn detach(&self) {
        lock(&self.attachment).take();
        lock(&self.pending).take();
    }

    /// Queues `json` for every connected client, replacing any value not
    /// yet sent.
    ///
    /// Returns immediately. While detached the value is stored but no pass
    /// starts.
    pub fn publish(self: &Arc<Self>, json: Arc<str>) {
        *lock(&self.pending) = Some(json);

        let Some(runtime) = self.live_runtime() else {
            tracing::trace!("broadcaster detached, not starting a pass");
            return;
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = Arc::clone(self);
            runtime.spawn(async move { this.run_passes().await });
        }
    }

    /// Returns `true` while a pass owns the in-flight flag.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            passes: self.passes.load(Ordering::Relaxed),
            peak_concurrent_passes: self.peak_passes.load(Ordering::Relaxed),
        }
    }

    /// Drains the pending slot until it stays empty or the broadcaster is
    /// detached. The caller must own the in-flight flag.
    ///
    /// The attachment is re-read before every take, so a pass that outlives
    /// a stop keeps serving publishes made after the next attach.
    async fn run_passes(&self) {
        loop {
            while self.live_runtime().is_some() {
                let Some(json) = self.take_pending() else {
                    break;
                };
                self.broadcast_once(&json).await;
            }
            if !self.release_and_reacquire() {
                break;
            }
        }
    }

    /// Clears the in-flight flag, then reclaims it if a publish landed in the
    /// slot meanwhile and the broadcaster is still attached. Returns `true`
    /// if the caller owns the flag again.
    fn release_and_reacquire(&self) -> bool {
        self.in_flight.store(false, Ordering::Release);
        if lock(&self.pending).is_none() || self.live_runtime().is_none() {
            return false;
        }
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Runtime of the current attachment, unless detached or cancelled.
    fn live_runtime(&self) -> Option<Handle> {
        lock(&self.attachment)
            .as_ref()
            .filter(|a| !a.lifetime.is_cancelled())
            .map(|a| a.runtime.clone())
    }

    fn take_pending(&self) -> Option<Arc<str>> {
        lock(&self.pending).take()
    }

    async fn broadcast_once(&self, json: &str) {
        let running = self.active_passes.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_passes.fetch_max(running, Ordering::AcqRel);
        self.passes.fetch_add(1, Ordering::Relaxed);

        let clients = self.registry.snapshot().await;
        let sends = clients.iter().map(|client| async move {
            let result = self
                .registry
                .send_to(client, Opcode::Text, json.as_bytes())
                .await;
            (client, result)
        });

        let mut failed = 0usize;
        for (client, result) in join_all(sends).await {
            if let Err(e) = result {
                failed += 1;
                tracing::debug!(client_id = %client.id(), peer = %client.peer(), "broadcast send failed: {e}");
            }
        }
        tracing::trace!(clients = clients.len(), failed, "broadcast pass finished");

        self.active_passes.fetch_sub(1, Ordering::AcqRel);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
