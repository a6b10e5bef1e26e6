//! The command dispatcher (spec.md §4.6): the eight-step pipeline every
//! non-compound request (and every compound sub-request, via
//! `compound.rs`) goes through between being read off the wire and
//! going back out signed. Grounded on `smb/src/server/message_handler.rs`'s
//! command-code match, generalized from a recursive handler chain into
//! linear precondition checks plus a single registry lookup.

use std::sync::Arc;

use smb_core::nt_status::NTStatus;

use crate::auth::Authenticator;
use crate::connection::{AsyncNotifier, ConnectionState};
use crate::credit::CreditManager;
use crate::crypto::signing;
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::protocol::body::error_body::minimal_error_body;
use crate::protocol::body::Dialect;
use crate::protocol::command::Command;
use crate::protocol::flags::HeaderFlags;
use crate::protocol::header::Smb2Header;
use crate::protocol::message::Smb2Message;
use crate::session::SessionManager;

/// Whether a command requires an established session and/or tree
/// connect before it reaches its handler (spec.md §4.6 step 3). NEGOTIATE,
/// SESSION_SETUP, ECHO, and the SMB1-upgrade sentinel need neither.
fn preconditions(command: Command) -> (bool, bool) {
    match command {
        Command::Negotiate | Command::LegacyNegotiate | Command::SessionSetup | Command::Echo => (false, false),
        Command::LogOff | Command::TreeConnect | Command::Cancel => (true, false),
        _ => (true, true),
    }
}

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    credits: Arc<CreditManager>,
    authenticator: Arc<Authenticator>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, sessions: Arc<SessionManager>, credits: Arc<CreditManager>, authenticator: Arc<Authenticator>) -> Self {
        Self { registry, sessions, credits, authenticator }
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    pub fn credits(&self) -> Arc<CreditManager> {
        self.credits.clone()
    }

    pub fn authenticator(&self) -> Arc<Authenticator> {
        self.authenticator.clone()
    }

    /// Runs the full pipeline for one message and returns its signed,
    /// ready-to-encode response. Never fails: anything that goes wrong
    /// becomes an error-status response instead, since the connection
    /// must always send something back (or the caller must move on to
    /// the next sub-command in a compound chain).
    pub async fn dispatch(&self, conn: &Arc<ConnectionState>, header: Smb2Header, body: Vec<u8>, raw_request: &[u8], notify: Option<AsyncNotifier>, tearing_down: bool) -> Smb2Message {
        let command = header.command;

        // Step 1: pre-auth integrity before-hook, unconditional for every
        // real NEGOTIATE request (spec.md §4.4). Folds in the bytes exactly
        // as they arrived on the wire, not a re-encoding of the parsed
        // header, so a non-canonical reserved field in the inbound message
        // doesn't desync the hash chain from a real peer's.
        if command == Command::Negotiate {
            conn.preauth.update(raw_request);
        }

        let (needs_session, needs_tree) = preconditions(command);

        let session = if needs_session && header.session_id != 0 {
            match self.sessions.get(header.session_id) {
                Some(session) => Some(session),
                None => return self.error_response(&header, NTStatus::UserSessionDeleted, tearing_down),
            }
        } else {
            self.sessions.get(header.session_id)
        };

        let dialect = conn.dialect().unwrap_or(Dialect::V2_1_0);
        if let Err(status) = verify_request_signature(command, &header, &body, session.as_deref(), dialect) {
            return self.error_response(&header, status, tearing_down);
        }

        let mut share_name = None;
        if needs_tree && header.tree_id != 0 {
            let Some(session) = &session else {
                return self.error_response(&header, NTStatus::StatusNetworkNameDeleted, tearing_down);
            };
            match session.get_tree(header.tree_id) {
                Some(tree) => share_name = Some(tree.share_name),
                None => return self.error_response(&header, NTStatus::StatusNetworkNameDeleted, tearing_down),
            }
        }

        let ctx = HandlerContext {
            conn: conn.clone(),
            is_guest: session.as_ref().map(|s| s.is_guest).unwrap_or(false),
            username: session.as_ref().and_then(|s| s.username.clone()),
            session,
            session_id: header.session_id,
            tree_id: header.tree_id,
            message_id: header.message_id,
            share_name,
            notify: (command == Command::ChangeNotify).then(|| notify).flatten(),
        };

        self.credits.request_started(header.session_id);
        let outcome = self.registry.get(command).handle(&ctx, &body).await;
        self.credits.request_completed(header.session_id);

        if let Some(session) = &ctx.session {
            session.touch();
        }

        let grant = outcome.credits_override.unwrap_or_else(|| self.credits.grant(header.session_id, header.credit_charge, header.credits, tearing_down));
        let mut response_header = header.new_response_header_with_credits(outcome.status, Some(grant));
        if let Some(command) = outcome.command_override {
            response_header.command = command;
        }
        if let Some(session_id) = outcome.session_id_override {
            response_header.session_id = session_id;
        }
        if let Some(tree_id) = outcome.tree_id_override {
            response_header.tree_id = tree_id;
        }
        let response_body = outcome.body;

        // Step 7: pre-auth integrity after-hook, only once 3.1.1 is the
        // negotiated dialect and only for NEGOTIATE/SESSION_SETUP
        // responses (spec.md §4.4).
        if matches!(response_header.command, Command::Negotiate | Command::SessionSetup) && conn.dialect() == Some(Dialect::V3_1_1) {
            let mut raw = response_header.encode().to_vec();
            raw.extend_from_slice(&response_body);
            conn.preauth.update(&raw);
        }

        if let Some(session) = &ctx.session {
            if session.should_sign() {
                if let Ok(key) = session.signing_key() {
                    if let Ok(signature) = signing::calculate_signature(key, dialect, &response_header, &response_body) {
                        response_header.signature = signature;
                        response_header.flags |= HeaderFlags::SIGNED;
                    }
                }
            }
        }

        Smb2Message::response(response_header, response_body)
    }

    fn error_response(&self, header: &Smb2Header, status: NTStatus, tearing_down: bool) -> Smb2Message {
        let grant = self.credits.grant(header.session_id, header.credit_charge, header.credits, tearing_down);
        let response_header = header.new_response_header_with_credits(status.as_u32(), Some(grant));
        Smb2Message::response(response_header, minimal_error_body())
    }
}

/// Signature-verification precondition (spec.md §4.6): skipped entirely
/// when `SessionID` is zero or the command is NEGOTIATE/SESSION_SETUP
/// (no signing key can exist yet), otherwise enforced if the session
/// requires signing or the request claims to be signed.
fn verify_request_signature(command: Command, header: &Smb2Header, body: &[u8], session: Option<&crate::session::Session>, dialect: Dialect) -> Result<(), NTStatus> {
    if header.session_id == 0 || matches!(command, Command::Negotiate | Command::SessionSetup | Command::LegacyNegotiate) {
        return Ok(());
    }
    let Some(session) = session else {
        return Ok(());
    };
    if session.signing_required && !header.flags.contains(HeaderFlags::SIGNED) {
        return Err(NTStatus::AccessDenied);
    }
    if header.flags.contains(HeaderFlags::SIGNED) && session.should_verify() {
        let key = session.signing_key().map_err(|_| NTStatus::AccessDenied)?;
        match signing::verify_signature(key, dialect, header, body) {
            Ok(true) => {}
            _ => return Err(NTStatus::AccessDenied),
        }
    }
    Ok(())
}
