//! End-to-end exercise of the dispatcher pipeline: NEGOTIATE, the two
//! SESSION_SETUP rounds (anonymous/guest, to avoid recomputing a real
//! NTLMv2 response), TREE_CONNECT, ECHO, and LOGOFF, all driven through
//! `Dispatcher::dispatch` directly with no socket involved.

use std::net::SocketAddr;
use std::sync::Arc;

use smb_engine::auth::{Authenticator, InMemoryUserStore};
use smb_engine::config::ServerConfig;
use smb_engine::connection::ConnectionState;
use smb_engine::credit::CreditManager;
use smb_engine::dispatch::Dispatcher;
use smb_engine::handlers::HandlerRegistry;
use smb_engine::protocol::command::Command;
use smb_engine::protocol::header::Smb2Header;
use smb_engine::session::SessionManager;

fn u16le(n: u16) -> [u8; 2] {
    n.to_le_bytes()
}

fn u32le(n: u32) -> [u8; 4] {
    n.to_le_bytes()
}

fn u64le(n: u64) -> [u8; 8] {
    n.to_le_bytes()
}

/// A NEGOTIATE request body offering a single dialect (MS-SMB2 2.2.3).
fn negotiate_request_body(dialect: u16) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&u16le(36)); // StructureSize
    body.extend_from_slice(&u16le(1)); // DialectCount
    body.extend_from_slice(&u16le(1)); // SecurityMode
    body.extend_from_slice(&u16le(0)); // Reserved
    body.extend_from_slice(&u32le(0)); // Capabilities
    body.extend_from_slice(&[0u8; 16]); // ClientGuid
    body.extend_from_slice(&[0u8; 8]); // NegotiateContextOffset/Count/Reserved2
    body.extend_from_slice(&u16le(dialect));
    body
}

/// A raw (unwrapped) NTLM Type 1 NEGOTIATE message with empty
/// domain/workstation buffers, matching `ntlm::NtlmNegotiateMessage::parse`.
fn ntlm_negotiate_message() -> Vec<u8> {
    [
        smb_engine::auth::ntlm::NTLM_SIGNATURE.as_slice(),
        &u32le(1), // message type
        &u32le(0), // negotiate flags
        &u16le(0), &u16le(0), &u32le(0), // domain buffer field
        &u16le(0), &u16le(0), &u32le(0), // workstation buffer field
    ]
    .concat()
}

/// A raw NTLM Type 3 AUTHENTICATE message with every buffer field empty,
/// which `NtlmAuthenticateMessage::is_anonymous` treats as an anonymous
/// logon (empty username and empty NT response).
fn ntlm_anonymous_authenticate_message() -> Vec<u8> {
    let empty_field = || [u16le(0).to_vec(), u16le(0).to_vec(), u32le(64).to_vec()].concat();
    [
        smb_engine::auth::ntlm::NTLM_SIGNATURE.to_vec(),
        u32le(3).to_vec(), // message type
        empty_field(), // lm
        empty_field(), // nt
        empty_field(), // domain
        empty_field(), // user
        empty_field(), // workstation
        empty_field(), // session key
        u32le(0).to_vec(), // negotiate flags
    ]
    .concat()
}

fn session_setup_request_body(security_buffer: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&u16le(25)); // StructureSize
    body.push(0); // SecurityMode
    body.push(0); // Reserved
    body.extend_from_slice(&u32le(0)); // Capabilities
    body.extend_from_slice(&u32le(0)); // Channel
    body.extend_from_slice(&u16le(88)); // SecurityBufferOffset (64 header + 24 fixed body)
    body.extend_from_slice(&u16le(security_buffer.len() as u16));
    body.extend_from_slice(&u64le(0)); // PreviousSessionId
    body.extend_from_slice(security_buffer);
    body
}

fn tree_connect_request_body(path: &str) -> Vec<u8> {
    let path_bytes: Vec<u8> = path.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    let mut body = Vec::new();
    body.extend_from_slice(&u16le(9)); // StructureSize
    body.extend_from_slice(&u16le(0)); // Flags
    body.extend_from_slice(&u16le(72)); // PathOffset (64 header + 8 fixed body)
    body.extend_from_slice(&u16le(path_bytes.len() as u16));
    body.extend_from_slice(&path_bytes);
    body
}

fn test_dispatcher() -> Dispatcher {
    let config = Arc::new(ServerConfig::default());
    let sessions = Arc::new(SessionManager::new());
    let credits = Arc::new(CreditManager::new());
    let authenticator = Arc::new(Authenticator::new(Arc::new(InMemoryUserStore::default()), "TESTSRV"));
    let registry = Arc::new(HandlerRegistry::new(authenticator.clone(), sessions.clone(), config, uuid::Uuid::nil()));
    Dispatcher::new(registry, sessions, credits, authenticator)
}

fn connection_state() -> Arc<ConnectionState> {
    let peer_addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
    Arc::new(ConnectionState::new(peer_addr))
}

#[tokio::test]
async fn full_guest_session_life_cycle() {
    let dispatcher = test_dispatcher();
    let conn = connection_state();

    let negotiate_header = Smb2Header::new(Command::Negotiate, 1, 0, 0);
    let negotiate_body = negotiate_request_body(0x0210);
    let negotiate_raw = [negotiate_header.encode().to_vec(), negotiate_body.clone()].concat();
    let negotiate = dispatcher.dispatch(&conn, negotiate_header, negotiate_body, &negotiate_raw, None, false).await;
    assert_eq!(negotiate.header.status, 0);
    assert_eq!(conn.dialect(), Some(smb_engine::protocol::body::Dialect::V2_1_0));

    let round1 = dispatcher
        .dispatch(
            &conn,
            Smb2Header::new(Command::SessionSetup, 2, 0, 0),
            session_setup_request_body(&ntlm_negotiate_message()),
            &[],
            None,
            false,
        )
        .await;
    assert_eq!(round1.header.status, smb_core::nt_status::NTStatus::StatusMoreProcessingRequired.as_u32());

    let round2 = dispatcher
        .dispatch(
            &conn,
            Smb2Header::new(Command::SessionSetup, 3, 0, 0),
            session_setup_request_body(&ntlm_anonymous_authenticate_message()),
            &[],
            None,
            false,
        )
        .await;
    assert_eq!(round2.header.status, 0);
    let session_id = round2.header.session_id;
    assert_ne!(session_id, 0);

    let tree_connect = dispatcher
        .dispatch(
            &conn,
            Smb2Header::new(Command::TreeConnect, 4, 0, session_id),
            tree_connect_request_body("\\\\testsrv\\share"),
            &[],
            None,
            false,
        )
        .await;
    assert_eq!(tree_connect.header.status, 0);
    let tree_id = tree_connect.header.tree_id;
    assert_ne!(tree_id, 0);

    let echo = dispatcher
        .dispatch(&conn, Smb2Header::new(Command::Echo, 5, tree_id, session_id), vec![4, 0, 0, 0], &[], None, false)
        .await;
    assert_eq!(echo.header.status, 0);
    assert!(echo.header.credits >= 1);

    let logoff = dispatcher
        .dispatch(&conn, Smb2Header::new(Command::LogOff, 6, tree_id, session_id), vec![4, 0, 0, 0], &[], None, false)
        .await;
    assert_eq!(logoff.header.status, 0);

    // the session is gone: a further request that requires one is rejected.
    let after_logoff = dispatcher
        .dispatch(
            &conn,
            Smb2Header::new(Command::TreeConnect, 7, 0, session_id),
            tree_connect_request_body("\\\\testsrv\\share"),
            &[],
            None,
            false,
        )
        .await;
    assert_eq!(after_logoff.header.status, smb_core::nt_status::NTStatus::UserSessionDeleted.as_u32());
}

#[tokio::test]
async fn legacy_negotiate_upgrade_forces_negotiate_command_and_one_credit() {
    let dispatcher = test_dispatcher();
    let conn = connection_state();

    let response = dispatcher
        .dispatch(&conn, Smb2Header::new(Command::LegacyNegotiate, 0, 0, 0), Vec::new(), &[], None, false)
        .await;

    assert_eq!(response.header.command, Command::Negotiate);
    assert_eq!(response.header.credits, 1);
    assert_eq!(response.header.status, 0);
}

#[tokio::test]
async fn tree_connect_without_a_session_is_rejected() {
    let dispatcher = test_dispatcher();
    let conn = connection_state();

    let response = dispatcher
        .dispatch(
            &conn,
            Smb2Header::new(Command::TreeConnect, 1, 0, 0),
            tree_connect_request_body("\\\\testsrv\\share"),
            &[],
            None,
            false,
        )
        .await;

    assert_eq!(response.header.status, smb_core::nt_status::NTStatus::UserSessionDeleted.as_u32());
}
