use semindex_protocol::{DocumentStatus, StatusResponse};
use semindex_vector_store::current_unix_ms;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Indexing state of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentState {
    pub status: DocumentStatus,
    pub indexed_count: usize,
    pub expected_count: usize,
    pub error: Option<String>,
    pub updated_at_unix_ms: u64,
}

impl DocumentState {
    #[must_use]
    pub fn pending(expected_count: usize) -> Self {
        Self {
            status: DocumentStatus::Pending,
            indexed_count: 0,
            expected_count,
            error: None,
            updated_at_unix_ms: current_unix_ms(),
        }
    }

    /// State of a document found in a loaded index with no run history.
    #[must_use]
    pub fn restored(indexed_count: usize, expected_count: usize) -> Self {
        Self {
            status: DocumentStatus::Complete,
            indexed_count,
            expected_count,
            error: None,
            updated_at_unix_ms: 0,
        }
    }

    /// Legal edges: `PENDING -> INDEXING -> COMPLETE | FAILED`, and
    /// `PENDING -> FAILED` for runs rejected before embedding starts.
    #[must_use]
    pub const fn can_advance_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self.status, next),
            (DocumentStatus::Pending, DocumentStatus::Indexing | DocumentStatus::Failed)
                | (
                    DocumentStatus::Indexing,
                    DocumentStatus::Complete | DocumentStatus::Failed
                )
        )
    }

    pub fn to_response(&self, document_id: &str) -> StatusResponse {
        StatusResponse {
            document_id: document_id.to_string(),
            status: self.status,
            indexed_count: self.indexed_count,
            expected_count: self.expected_count,
            error: self.error.clone(),
            updated_at_unix_ms: (self.updated_at_unix_ms > 0).then_some(self.updated_at_unix_ms),
        }
    }
}

/// Per-document bookkeeping: state records, run serialization locks and
/// cancellation flags of in-flight runs.
#[derive(Default)]
pub(crate) struct DocumentRegistry {
    states: RwLock<HashMap<String, DocumentState>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancels: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl DocumentRegistry {
    pub(crate) fn get(&self, document_id: &str) -> Option<DocumentState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Start a new run; any previous state is replaced.
    pub(crate) fn begin(&self, document_id: &str, expected_count: usize) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.to_string(), DocumentState::pending(expected_count));
    }

    /// Move a document along the state machine. Illegal edges are logged
    /// and ignored.
    pub(crate) fn advance(
        &self,
        document_id: &str,
        next: DocumentStatus,
        indexed_count: usize,
        error: Option<String>,
    ) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = states.get_mut(document_id) else {
            log::warn!("No state for {document_id}; ignoring transition to {}", next.as_str());
            return;
        };
        if !state.can_advance_to(next) {
            log::warn!(
                "Ignoring illegal transition {} -> {} for {document_id}",
                state.status.as_str(),
                next.as_str()
            );
            return;
        }
        state.status = next;
        state.indexed_count = indexed_count;
        state.error = error;
        state.updated_at_unix_ms = current_unix_ms();
    }

    pub(crate) fn restore(&self, document_id: &str, state: DocumentState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.to_string(), state);
    }

    pub(crate) fn remove(&self, document_id: &str) -> bool {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)
            .is_some()
    }

    pub(crate) fn clear(&self) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Lock serializing runs for one document.
    pub(crate) fn document_lock(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(document_id.to_string())
                .or_default(),
        )
    }

    /// Forget the lock of a document once no run holds or awaits it.
    /// Clones are handed out under the same mutex, so a count of one means
    /// the map owns the only reference.
    pub(crate) fn release_lock(&self, document_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(document_id);
        }
    }

    /// Register the cancellation flag of a run. The flag is unregistered
    /// when the returned guard drops.
    pub(crate) fn register_run(&self, document_id: &str) -> RunGuard<'_> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.to_string(), Arc::clone(&flag));
        RunGuard {
            registry: self,
            document_id: document_id.to_string(),
            flag,
        }
    }

    /// Signal the in-flight run of a document, if any, to stop.
    pub(crate) fn cancel(&self, document_id: &str) -> bool {
        let cancels = self.cancels.lock().unwrap_or_else(PoisonError::into_inner);
        match cancels.get(document_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) {
        for flag in self
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

pub(crate) struct RunGuard<'a> {
    registry: &'a DocumentRegistry,
    document_id: String,
    flag: Arc<AtomicBool>,
}

impl RunGuard<'_> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut cancels = self
            .registry
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cancels
            .get(&self.document_id)
            .is_some_and(|flag| Arc::ptr_eq(flag, &self.flag))
        {
            cancels.remove(&self.document_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_follows_state_machine() {
        let registry = DocumentRegistry::default();
        registry.begin("doc", 3);
        assert_eq!(registry.get("doc").unwrap().status, DocumentStatus::Pending);

        // Skipping INDEXING is not allowed.
        registry.advance("doc", DocumentStatus::Complete, 3, None);
        assert_eq!(registry.get("doc").unwrap().status, DocumentStatus::Pending);

        registry.advance("doc", DocumentStatus::Indexing, 0, None);
        registry.advance("doc", DocumentStatus::Complete, 3, None);
        let state = registry.get("doc").unwrap();
        assert_eq!(state.status, DocumentStatus::Complete);
        assert_eq!(state.indexed_count, 3);
        assert!(state.updated_at_unix_ms > 0);

        // Terminal states only move again through a new run.
        registry.advance("doc", DocumentStatus::Failed, 0, Some("late".into()));
        assert_eq!(registry.get("doc").unwrap().status, DocumentStatus::Complete);
        registry.begin("doc", 4);
        assert_eq!(registry.get("doc").unwrap().expected_count, 4);
    }

    #[test]
    fn cancel_reaches_only_the_registered_run() {
        let registry = DocumentRegistry::default();
        assert!(!registry.cancel("doc"));

        let first = registry.register_run("doc");
        let second = registry.register_run("doc");
        assert!(registry.cancel("doc"));
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());

        // Dropping a superseded guard keeps the newer flag registered.
        drop(first);
        assert!(registry.cancel("doc"));
        drop(second);
        assert!(!registry.cancel("doc"));
    }

    #[test]
    fn awaited_lock_survives_release() {
        let registry = DocumentRegistry::default();
        let waiting = registry.document_lock("doc");
        registry.remove("doc");
        registry.release_lock("doc");
        assert!(Arc::ptr_eq(&waiting, &registry.document_lock("doc")));

        drop(waiting);
        registry.release_lock("doc");
        assert!(registry
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty());
    }

    #[test]
    fn status_response_hides_unknown_timestamps() {
        let response = DocumentState::restored(2, 2).to_response("doc");
        assert_eq!(response.status, DocumentStatus::Complete);
        assert_eq!(response.updated_at_unix_ms, None);
    }
}
