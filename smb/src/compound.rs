//! Compound/related request processing (spec.md §4.7): each sub-command
//! in a chained request is dispatched independently, but a
//! `RELATED_OPERATIONS` sub-command inherits its predecessor's SessionID
//! and TreeID and, for the handful of commands that carry one, has its
//! FileID filled in from the chain's most recent CREATE response. No
//! teacher equivalent exists (the teacher never chains requests); this
//! is built directly against the wire behavior MS-SMB2 3.3.5.2.10
//! describes.

use std::sync::Arc;

use smb_core::SMBResult;

use crate::connection::{AsyncNotifier, ConnectionState};
use crate::dispatch::Dispatcher;
use crate::protocol::command::Command;
use crate::protocol::flags::HeaderFlags;
use crate::protocol::message::Smb2Message;

/// Offset of the 16-byte FileID within each command's body, for the
/// commands that carry one at a fixed position (spec.md §4.7's table).
/// Bodies shorter than `offset + 16` are left untouched.
fn file_id_offset(command: Command) -> Option<usize> {
    match command {
        Command::Close | Command::QueryDirectory => Some(8),
        Command::Read | Command::Write | Command::SetInfo => Some(16),
        Command::QueryInfo => Some(24),
        _ => None,
    }
}

fn inject_file_id(command: Command, body: &mut [u8], file_id: [u8; 16]) {
    if let Some(offset) = file_id_offset(command) {
        if body.len() >= offset + 16 {
            body[offset..offset + 16].copy_from_slice(&file_id);
        }
    }
}

/// The offset of a CREATE response's own FileID (MS-SMB2 2.2.14), read
/// back out so later related sub-commands in the same chain can use it.
const CREATE_RESPONSE_FILE_ID_OFFSET: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_and_query_directory_inject_at_offset_eight() {
        let fid = [0x42; 16];
        let mut body = vec![0u8; 32];
        inject_file_id(Command::Close, &mut body, fid);
        assert_eq!(&body[8..24], &fid);

        let mut body = vec![0u8; 32];
        inject_file_id(Command::QueryDirectory, &mut body, fid);
        assert_eq!(&body[8..24], &fid);
    }

    #[test]
    fn read_write_set_info_inject_at_offset_sixteen() {
        let fid = [0x7a; 16];
        for command in [Command::Read, Command::Write, Command::SetInfo] {
            let mut body = vec![0u8; 48];
            inject_file_id(command, &mut body, fid);
            assert_eq!(&body[16..32], &fid);
        }
    }

    #[test]
    fn query_info_injects_at_offset_twenty_four() {
        let fid = [0x11; 16];
        let mut body = vec![0u8; 48];
        inject_file_id(Command::QueryInfo, &mut body, fid);
        assert_eq!(&body[24..40], &fid);
    }

    #[test]
    fn unrecognized_command_is_left_untouched() {
        let fid = [0xff; 16];
        let mut body = vec![1, 2, 3, 4];
        let before = body.clone();
        inject_file_id(Command::Create, &mut body, fid);
        assert_eq!(body, before);
    }

    #[test]
    fn short_body_is_left_untouched() {
        let fid = [0xff; 16];
        let mut body = vec![0u8; 4];
        let before = body.clone();
        inject_file_id(Command::Read, &mut body, fid);
        assert_eq!(body, before);
    }
}

/// Dispatches every sub-command in `messages` in order, sending each
/// response as its own frame as soon as it is ready (spec.md §4.7 step
/// d) rather than batching them into one combined frame. Stops the
/// chain (without erroring the connection) the first time a
/// sub-response's status is non-success.
pub async fn process_compound(dispatcher: &Dispatcher, conn: &Arc<ConnectionState>, writer: &crate::connection::ConnectionWriter, messages: Vec<Smb2Message>, notifier: AsyncNotifier) -> SMBResult<()> {
    let mut session_id = 0u64;
    let mut tree_id = 0u32;
    let mut file_id: Option<[u8; 16]> = None;

    for message in messages {
        let raw = message.raw;
        let mut header = message.header;
        let mut body = message.body;

        if header.flags.contains(HeaderFlags::RELATED_OPERATIONS) {
            if header.session_id == 0 {
                header.session_id = session_id;
            }
            if header.tree_id == 0 {
                header.tree_id = tree_id;
            }
            if let Some(fid) = file_id {
                inject_file_id(header.command, &mut body, fid);
            }
        }

        let command = header.command;
        let notify = (command == Command::ChangeNotify).then(|| notifier.clone());
        let response = dispatcher.dispatch(conn, header, body, &raw, notify, false).await;

        session_id = response.header.session_id;
        tree_id = response.header.tree_id;
        if response.header.command == Command::Create && response.header.status == 0 && response.body.len() >= CREATE_RESPONSE_FILE_ID_OFFSET + 16 {
            let mut fid = [0u8; 16];
            fid.copy_from_slice(&response.body[CREATE_RESPONSE_FILE_ID_OFFSET..CREATE_RESPONSE_FILE_ID_OFFSET + 16]);
            file_id = Some(fid);
        }

        let stop_chain = response.header.status != 0;
        writer.write_frame(&response.encode()).await?;
        if stop_chain {
            break;
        }
    }
    Ok(())
}
