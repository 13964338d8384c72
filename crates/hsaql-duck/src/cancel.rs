//! Cross-thread cancellation of a running statement

use duckdb::InterruptHandle;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ExecutionError;

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    interrupt: Option<Arc<InterruptHandle>>,
}

/// Shared flag that stops the statement an executor is running
///
/// Clones share state. The caller keeps one clone and hands another to the
/// engine; `cancel` interrupts whatever session is attached at that moment,
/// and a session attached after cancellation refuses to start.
#[derive(Clone, Default)]
pub struct QueryCancel {
    state: Arc<Mutex<CancelState>>,
}

impl QueryCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        if let Some(interrupt) = &state.interrupt {
            interrupt.interrupt();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub(crate) fn attach(&self, interrupt: Arc<InterruptHandle>) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        if state.cancelled {
            return Err(ExecutionError::Cancelled);
        }
        state.interrupt = Some(interrupt);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CancelState> {
        // The state is two plain fields, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::Connection;

    #[test]
    fn test_clones_share_state() {
        let cancel = QueryCancel::new();
        let worker = cancel.clone();

        assert!(!worker.is_cancelled());
        cancel.cancel();
        assert!(worker.is_cancelled());
    }

    #[test]
    fn test_attach_after_cancel_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        let cancel = QueryCancel::new();

        assert!(cancel.attach(conn.interrupt_handle()).is_ok());
        cancel.cancel();

        assert!(matches!(
            cancel.attach(conn.interrupt_handle()),
            Err(ExecutionError::Cancelled)
        ));
    }
}
