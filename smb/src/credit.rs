//! Credit accounting (spec.md §4.5): per-request tracking that brackets
//! every handler invocation, plus the adaptive grant policy SPEC_FULL.md
//! §4.5 spells out since the teacher tree has no credit accounting of
//! its own to ground this on.

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use dashmap::DashMap;

/// Floor on any credit grant (spec.md: "a minimum floor of 1 ensures
/// liveness").
const MIN_GRANT: u16 = 1;

/// Per-session outstanding-credit ceiling the adaptive policy grows
/// toward. No resource-pressure signal exists yet to shrink it
/// (SPEC_FULL.md §4.5 documents this as a simplification, not a silent
/// gap), so it is a fixed upper bound rather than a live one.
const CEILING: u16 = 8192;

struct SessionCredits {
    outstanding: AtomicUsize,
    granted_so_far: AtomicU16,
}

impl Default for SessionCredits {
    fn default() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            granted_so_far: AtomicU16::new(1),
        }
    }
}

/// Tracks in-flight requests per session (the shutdown barrier spec.md
/// §4.5/§4.8 describes) and grants credits per response.
pub struct CreditManager {
    sessions: DashMap<u64, SessionCredits>,
}

impl Default for CreditManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CreditManager {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Brackets the start of a handler invocation (spec.md §4.5
    /// `RequestStarted`).
    pub fn request_started(&self, session_id: u64) {
        let entry = self.sessions.entry(session_id).or_default();
        entry.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Brackets the end of a handler invocation (spec.md §4.5
    /// `RequestCompleted`).
    pub fn request_completed(&self, session_id: u64) {
        if let Some(entry) = self.sessions.get(&session_id) {
            entry.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Returns the current in-flight request count for a session, used
    /// as part of the teardown barrier.
    pub fn outstanding(&self, session_id: u64) -> usize {
        self.sessions.get(&session_id).map(|e| e.outstanding.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Grants credits for a response: `max(1, min(requested_charge * 2,
    /// ceiling))`, matching SPEC_FULL.md §4.5's adaptive policy. Always
    /// non-zero unless `tearing_down` is set, per spec.md's "Responses
    /// must always carry a non-zero grant unless the session is being
    /// torn down."
    pub fn grant(&self, session_id: u64, credit_charge: u16, credits_requested: u16, tearing_down: bool) -> u16 {
        if tearing_down {
            return 0;
        }
        let requested = credit_charge.max(credits_requested).max(1);
        let grant = requested.saturating_mul(2).min(CEILING).max(MIN_GRANT);
        if let Some(entry) = self.sessions.get(&session_id) {
            entry.granted_so_far.store(grant, Ordering::SeqCst);
        }
        grant
    }

    pub fn remove_session(&self, session_id: u64) {
        self.sessions.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_never_zero_unless_tearing_down() {
        let manager = CreditManager::new();
        assert!(manager.grant(1, 0, 0, false) >= 1);
        assert_eq!(manager.grant(1, 0, 0, true), 0);
    }

    #[test]
    fn grant_is_bounded_by_ceiling() {
        let manager = CreditManager::new();
        assert_eq!(manager.grant(1, u16::MAX, u16::MAX, false), CEILING);
    }

    #[test]
    fn request_tracking_brackets_outstanding_count() {
        let manager = CreditManager::new();
        manager.request_started(1);
        manager.request_started(1);
        assert_eq!(manager.outstanding(1), 2);
        manager.request_completed(1);
        assert_eq!(manager.outstanding(1), 1);
    }
}
