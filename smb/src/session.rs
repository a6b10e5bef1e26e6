//! Session state (spec.md §4.5 / §3 `Session`): one record per completed
//! SESSION_SETUP, keyed by a 64-bit SessionID, tracking the signing
//! posture and tree-connect set a connection's commands are dispatched
//! against. Grounded in `smb/src/server/session.rs`'s `SMBSession` field
//! shape (signing state, builder-style construction), but backed by a
//! `dashmap` registry instead of the teacher's mutex-guarded `HashMap`
//! (spec.md §9 REDESIGN FLAGS: partition mutex-protected shared maps).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;

use smb_core::error::SMBError;
use smb_core::SMBResult;

/// A TREE_CONNECT this session has open, keyed by TreeID (spec.md §3
/// `Dispatch entry` / §4.6's `NeedsTree` precondition).
#[derive(Debug, Clone)]
pub struct Tree {
    pub tree_id: u32,
    pub share_name: String,
}

/// One authenticated session (spec.md §3 `Session`). Created only on a
/// successful AUTHENTICATE round (never for the intermediate Type-2),
/// destroyed on LOGOFF or owning-connection teardown.
pub struct Session {
    pub session_id: u64,
    pub username: Option<String>,
    pub is_guest: bool,
    pub signing_required: bool,
    signing_key: Option<[u8; 16]>,
    trees: DashMap<u32, Tree>,
    pub creation_time: Instant,
    idle_time: Mutex<Instant>,
}

impl Session {
    fn new(session_id: u64, username: Option<String>, is_guest: bool, signing_required: bool, signing_key: Option<[u8; 16]>) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            username,
            is_guest,
            signing_required,
            signing_key,
            trees: DashMap::new(),
            creation_time: now,
            idle_time: Mutex::new(now),
        }
    }

    pub fn touch(&self) {
        *self.idle_time.lock().expect("session idle_time mutex poisoned") = Instant::now();
    }

    pub fn idle_since(&self) -> Instant {
        *self.idle_time.lock().expect("session idle_time mutex poisoned")
    }

    /// MS-SMB2 3.3.5.2.4: once a session has a signing key, every
    /// response on it is signed regardless of whether signing was
    /// mandatory (guest sessions have no key and so never sign).
    pub fn should_sign(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Mirrors `should_sign`: verification only makes sense when the
    /// session actually holds a key to verify against.
    pub fn should_verify(&self) -> bool {
        self.signing_key.is_some()
    }

    pub fn signing_key(&self) -> SMBResult<&[u8; 16]> {
        self.signing_key
            .as_ref()
            .ok_or_else(|| SMBError::precondition_failed("session has no signing key"))
    }

    pub fn add_tree(&self, tree_id: u32, share_name: impl Into<String>) {
        self.trees.insert(tree_id, Tree { tree_id, share_name: share_name.into() });
    }

    pub fn remove_tree(&self, tree_id: u32) -> Option<Tree> {
        self.trees.remove(&tree_id).map(|(_, tree)| tree)
    }

    pub fn get_tree(&self, tree_id: u32) -> Option<Tree> {
        self.trees.get(&tree_id).map(|entry| entry.clone())
    }
}

/// Process-wide session registry (spec.md §4.5 "Sessions live inside the
/// dispatcher's registry"). SessionIDs are generated here, monotonically,
/// on every successful creation.
pub struct SessionManager {
    sessions: DashMap<u64, std::sync::Arc<Session>>,
    next_id: AtomicU64,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates and registers a new session, returning its shared handle.
    /// Called by the dispatcher only once an AUTHENTICATE round reaches
    /// `STATUS_SUCCESS` (spec.md §3 `Session` lifecycle).
    pub fn create(&self, username: Option<String>, is_guest: bool, signing_required: bool, signing_key: Option<[u8; 16]>) -> std::sync::Arc<Session> {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = std::sync::Arc::new(Session::new(session_id, username, is_guest, signing_required, signing_key));
        self.sessions.insert(session_id, session.clone());
        session
    }

    pub fn get(&self, session_id: u64) -> Option<std::sync::Arc<Session>> {
        self.sessions.get(&session_id).map(|entry| entry.clone())
    }

    /// `UntrackSession`'s backing removal (spec.md §4.5): called on a
    /// successful LOGOFF or during connection teardown.
    pub fn remove(&self, session_id: u64) -> Option<std::sync::Arc<Session>> {
        self.sessions.remove(&session_id).map(|(_, session)| session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_monotonic_ids() {
        let manager = SessionManager::new();
        let a = manager.create(Some("alice".into()), false, true, Some([0x11; 16]));
        let b = manager.create(Some("bob".into()), false, true, Some([0x22; 16]));
        assert_eq!(a.session_id, 1);
        assert_eq!(b.session_id, 2);
    }

    #[test]
    fn guest_session_has_no_signing_key_and_does_not_verify() {
        let manager = SessionManager::new();
        let guest = manager.create(None, true, false, None);
        assert!(!guest.should_verify());
        assert!(guest.signing_key().is_err());
    }

    #[test]
    fn tree_lookup_round_trips() {
        let manager = SessionManager::new();
        let session = manager.create(Some("alice".into()), false, true, Some([0x01; 16]));
        session.add_tree(7, "share");
        assert_eq!(session.get_tree(7).unwrap().share_name, "share");
        assert!(session.remove_tree(7).is_some());
        assert!(session.get_tree(7).is_none());
    }

    #[test]
    fn remove_drops_session_from_registry() {
        let manager = SessionManager::new();
        let session = manager.create(None, true, false, None);
        assert!(manager.remove(session.session_id).is_some());
        assert!(manager.get(session.session_id).is_none());
    }
}
