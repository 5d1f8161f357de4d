//! Partial-transcript merge store
//!
//! Process-wide table of in-progress merged transcripts, keyed by owner
//! id. Each owner gets an async mutex; the transcribe handler holds
//! that per-owner lock across the whole correct -> merge -> persist ->
//! clear section, so two requests for the same identity can never
//! interleave in the merge state (e.g. a duplicate tab, or a retried
//! partial racing the final).
//!
//! Each slot remembers which recording session its text belongs to.
//! Binding a different session id discards whatever the previous
//! session left behind, even when that session's first surviving
//! request is not segment 0 (a failed segment-0 dispatch is retried as
//! part of a later, larger unit).
//!
//! Nothing here is durable. A process restart loses in-flight partial
//! text, which is acceptable because nothing is promised to the user
//! until the final save.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Merge slot for one owner: the running merged text and the id of the
/// recording session it belongs to.
#[derive(Debug, Default)]
pub struct MergeState {
    session: Option<String>,
    text: Option<String>,
}

impl MergeState {
    /// Merged text for the in-progress session, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Per-identity merge table.
#[derive(Default)]
pub struct MergeStore {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<MergeState>>>>,
}

impl MergeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the per-owner lock, creating the slot on first use.
    ///
    /// The returned guard serializes every merge-state access for this
    /// owner; hold it until persistence (if any) has completed.
    pub async fn lock_owner(&self, owner: &str) -> OwnedMutexGuard<MergeState> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .entry(owner.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(MergeState::default())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Bind the slot to the recording session a request belongs to,
    /// discarding text left behind by any other session.
    ///
    /// Requests without a session id (older clients) fall back to
    /// treating segment 0 as the start of a new session.
    pub fn bind_session(state: &mut MergeState, session: Option<&str>, seq: Option<usize>) {
        let new_session = match (state.session.as_deref(), session) {
            (current, Some(incoming)) => current != Some(incoming),
            (_, None) => seq == Some(0),
        };
        if new_session {
            state.text = None;
            state.session = session.map(str::to_string);
        }
    }

    /// Merge a corrected partial chunk into the running transcript and
    /// return the updated merged text.
    ///
    /// First chunk is stored as-is; later chunks append with a single
    /// space. Chunks are trimmed before joining so upstream whitespace
    /// cannot produce interior runs of spaces.
    pub fn append(state: &mut MergeState, chunk: &str) -> String {
        let chunk = chunk.trim();
        let merged = match state.text.take() {
            Some(prev) if !prev.is_empty() => {
                if chunk.is_empty() {
                    prev
                } else {
                    format!("{prev} {chunk}")
                }
            }
            _ => chunk.to_string(),
        };
        state.text = Some(merged.clone());
        merged
    }

    /// Finalize the session: the final unit covers the whole recording,
    /// so its corrected transcription replaces the accumulated partial
    /// merges. Clears the slot and returns the consolidated text.
    pub fn take_final(state: &mut MergeState, full_text: &str) -> String {
        state.text = None;
        state.session = None;
        full_text.trim().to_string()
    }

    /// Put merged text back after a failed final save (retain policy).
    pub fn retain(state: &mut MergeState, text: String) {
        state.text = Some(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_append_stores_chunk_as_is() {
        let store = MergeStore::new();
        let mut guard = store.lock_owner("user-1").await;
        let merged = MergeStore::append(&mut guard, "hello world");
        assert_eq!(merged, "hello world");
        assert_eq!(guard.text(), Some("hello world"));
    }

    #[tokio::test]
    async fn later_appends_join_with_space_and_trim() {
        let store = MergeStore::new();
        let mut guard = store.lock_owner("user-1").await;
        MergeStore::append(&mut guard, "hello");
        let merged = MergeStore::append(&mut guard, "  world  ");
        assert_eq!(merged, "hello world");
        // A whitespace-only chunk changes nothing.
        assert_eq!(MergeStore::append(&mut guard, "   "), "hello world");
    }

    #[tokio::test]
    async fn owners_do_not_share_state() {
        let store = MergeStore::new();
        {
            let mut a = store.lock_owner("user-a").await;
            MergeStore::append(&mut a, "alpha");
        }
        {
            let mut b = store.lock_owner("user-b").await;
            assert!(b.text().is_none());
            MergeStore::append(&mut b, "beta");
        }
        let a = store.lock_owner("user-a").await;
        assert_eq!(a.text(), Some("alpha"));
    }

    #[tokio::test]
    async fn take_final_replaces_and_clears() {
        let store = MergeStore::new();
        let mut guard = store.lock_owner("user-1").await;
        MergeStore::append(&mut guard, "partial one");
        MergeStore::append(&mut guard, "partial two");
        let text = MergeStore::take_final(&mut guard, "the whole recording");
        assert_eq!(text, "the whole recording");
        assert!(guard.text().is_none(), "finalize must clear the entry");
    }

    #[tokio::test]
    async fn binding_a_different_session_discards_stale_text() {
        let store = MergeStore::new();
        let mut guard = store.lock_owner("user-1").await;
        MergeStore::bind_session(&mut guard, Some("session-a"), Some(0));
        MergeStore::append(&mut guard, "left over from a crash");

        // The next session's first surviving request may carry seq > 0
        // when its segment-0 dispatch failed and was retried as part of
        // a later unit; the session id still forces the reset.
        MergeStore::bind_session(&mut guard, Some("session-b"), Some(1));
        assert!(guard.text().is_none());
        assert_eq!(MergeStore::append(&mut guard, "fresh"), "fresh");

        // Same session binds again without losing anything.
        MergeStore::bind_session(&mut guard, Some("session-b"), Some(2));
        assert_eq!(guard.text(), Some("fresh"));
    }

    #[tokio::test]
    async fn without_session_id_segment_zero_resets() {
        let store = MergeStore::new();
        let mut guard = store.lock_owner("user-1").await;
        MergeStore::append(&mut guard, "stale");

        MergeStore::bind_session(&mut guard, None, Some(1));
        assert_eq!(guard.text(), Some("stale"), "mid-session request keeps state");

        MergeStore::bind_session(&mut guard, None, Some(0));
        assert!(guard.text().is_none());
    }

    #[tokio::test]
    async fn per_owner_lock_serializes_access() {
        use std::time::Duration;

        let store = Arc::new(MergeStore::new());
        let guard = store.lock_owner("user-1").await;

        let store2 = store.clone();
        let contender = tokio::spawn(async move {
            let mut g = store2.lock_owner("user-1").await;
            MergeStore::append(&mut g, "second");
        });

        // The contender cannot make progress while we hold the lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();

        let g = store.lock_owner("user-1").await;
        assert_eq!(g.text(), Some("second"));
    }
}
