//! Authentication: SPNEGO negotiation wrapping an NTLM exchange, driven
//! by the state machine in `state_machine` against a pluggable
//! `UserStore`.

pub mod ntlm;
pub mod spnego;
pub mod state_machine;
pub mod user;

pub use state_machine::{AuthResult, Authenticator, PendingAuthId};
pub use user::{InMemoryUserStore, User, UserStore};
