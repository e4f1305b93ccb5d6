//! Registry of in-flight relay dial attempts.
//!
//! Each dial registers a [`CancellationToken`] before it starts and
//! deregisters it once the handshake resolves. Teardown cancels every
//! registered token and closes the registry, so an attempt can never slip
//! in after [`CancellationRegistry::cancel_all`] has run.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Handle identifying one registered dial attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    attempts: HashMap<AttemptId, CancellationToken>,
    closed: bool,
}

/// Cancellation scopes for the dial attempts of one session.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    state: Mutex<RegistryState>,
}

impl CancellationRegistry {
    /// Creates an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new dial attempt and returns its cancellation scope.
    ///
    /// Returns `None` once the registry has been closed by teardown; the
    /// caller must not dial in that case.
    pub async fn register(&self) -> Option<(AttemptId, CancellationToken)> {
        let mut state = self.state.lock().await;
        if state.closed {
            return None;
        }
        let id = AttemptId(state.next_id);
        state.next_id = state.next_id.wrapping_add(1);
        let token = CancellationToken::new();
        state.attempts.insert(id, token.clone());
        Some((id, token))
    }

    /// Forgets an attempt whose dial has resolved.
    pub async fn deregister(&self, id: AttemptId) {
        self.state.lock().await.attempts.remove(&id);
    }

    /// Cancels every pending attempt and refuses future registrations.
    ///
    /// Returns the number of attempts that were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut state = self.state.lock().await;
        state.closed = true;
        let cancelled = state.attempts.len();
        for (_, token) in state.attempts.drain() {
            token.cancel();
        }
        cancelled
    }

    /// Number of attempts currently in flight.
    #[cfg(test)]
    pub(crate) async fn pending(&self) -> usize {
        self.state.lock().await.attempts.len()
    }
}
