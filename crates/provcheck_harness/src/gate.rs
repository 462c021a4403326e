//! Exclusive-resource gates.
//!
//! Some resource kinds allow a single live instance per account (a
//! GuardDuty detector, for example). Runs of modules that create such a
//! resource must not overlap between apply and destroy, whatever attribute
//! they were given.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Held for the whole apply-through-destroy window of one run.
///
/// Dropping the permit releases the gate, on every exit path.
#[derive(Debug)]
pub struct GatePermit {
    kind: String,
    _guard: OwnedMutexGuard<()>,
}

impl GatePermit {
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        debug!("Released exclusive gate '{}'", self.kind);
    }
}

/// Named mutual-exclusion gates, one per resource kind.
///
/// Waiters are served in FIFO order, so no run waits forever while others
/// keep re-acquiring the same gate.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveGates {
    gates: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ExclusiveGates {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, kind: &str) -> Arc<AsyncMutex<()>> {
        self.gates
            .lock()
            .entry(kind.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `kind`.
    pub async fn acquire(&self, kind: &str) -> GatePermit {
        let gate = self.gate(kind);
        let guard = match gate.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Waiting for exclusive gate '{}'", kind);
                gate.lock_owned().await
            }
        };
        debug!("Acquired exclusive gate '{}'", kind);
        GatePermit {
            kind: kind.to_string(),
            _guard: guard,
        }
    }

    /// Whether some run currently holds `kind`.
    pub fn is_held(&self, kind: &str) -> bool {
        self.gates
            .lock()
            .get(kind)
            .is_some_and(|gate| gate.try_lock().is_err())
    }
}
