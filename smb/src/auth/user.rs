//! The persistent user store is an external collaborator (spec.md §1),
//! but the shape of a looked-up record and the trait the authenticator
//! calls through both live here: they are part of the engine's contract
//! with that collaborator, not the store's own implementation.

/// A user record as returned by the external user store (spec.md §6.2:
/// `User{username, enabled, nt_hash?, …}`). `password` is kept in
/// cleartext here, optionally (matching the teacher's own `User::new`,
/// which stores a cleartext password rather than a pre-computed NT
/// hash) so the NTLMv2 math in `crypto::ntlm_v2` can recompute
/// `NTOWFv2`/`LMOWFv2` from it directly. `None` models an account with
/// no password/NT hash configured at all (spec.md §8 Scenario 2): such
/// a user authenticates without the NTLMv2 response ever being checked.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub password: Option<String>,
    pub enabled: bool,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            enabled: true,
        }
    }

    /// A known, enabled user with no password/NT hash configured. The
    /// authenticator skips NTLMv2 validation entirely for this account
    /// and succeeds unconditionally (spec.md §8 Scenario 2).
    pub fn without_password(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            enabled: true,
        }
    }

    pub fn disabled(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            enabled: false,
        }
    }
}

/// The external user-store contract (spec.md §6.2): `get_user` by name,
/// with absence forcing a guest outcome. A plain in-memory implementation
/// is provided for the engine to run standalone; a real deployment
/// supplies its own.
pub trait UserStore: Send + Sync {
    fn get_user(&self, username: &str) -> Option<User>;
}

/// An in-memory `UserStore`, handed to `Authenticator` when no external
/// store is wired up. Mirrors the teacher's own `NTLMAuthProvider::new`
/// taking a `Vec<User>` directly.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: Vec<User>,
}

impl InMemoryUserStore {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

impl UserStore for InMemoryUserStore {
    fn get_user(&self, username: &str) -> Option<User> {
        self.users.iter().find(|u| u.username == username).cloned()
    }
}
