use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// MS-SMB2 2.2.1 Flags field of the SMB2 packet header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
    pub struct HeaderFlags: u32 {
        const RESPONSE = 0x0000_0001;
        const ASYNC_COMMAND = 0x0000_0002;
        const RELATED_OPERATIONS = 0x0000_0004;
        const SIGNED = 0x0000_0008;
        const PRIORITY_MASK = 0x0000_0070;
        const DFS_OPERATIONS = 0x1000_0000;
        const REPLAY_OPERATION = 0x2000_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MS-SMB2 2.2.1: SMB2_FLAGS_SERVER_TO_REDIR = 0x00000001
    #[test]
    fn response_value() {
        assert_eq!(HeaderFlags::RESPONSE.bits(), 0x0000_0001);
    }

    /// MS-SMB2 2.2.1: SMB2_FLAGS_ASYNC_COMMAND = 0x00000002
    #[test]
    fn async_command_value() {
        assert_eq!(HeaderFlags::ASYNC_COMMAND.bits(), 0x0000_0002);
    }

    /// MS-SMB2 2.2.1: SMB2_FLAGS_RELATED_OPERATIONS = 0x00000004
    #[test]
    fn related_operations_value() {
        assert_eq!(HeaderFlags::RELATED_OPERATIONS.bits(), 0x0000_0004);
    }

    /// MS-SMB2 2.2.1: SMB2_FLAGS_SIGNED = 0x00000008
    #[test]
    fn signed_value() {
        assert_eq!(HeaderFlags::SIGNED.bits(), 0x0000_0008);
    }

    /// MS-SMB2 2.2.1: SMB2_FLAGS_DFS_OPERATIONS = 0x10000000
    #[test]
    fn dfs_operations_value() {
        assert_eq!(HeaderFlags::DFS_OPERATIONS.bits(), 0x1000_0000);
    }

    /// MS-SMB2 2.2.1: SMB2_FLAGS_REPLAY_OPERATION = 0x20000000
    #[test]
    fn replay_operation_value() {
        assert_eq!(HeaderFlags::REPLAY_OPERATION.bits(), 0x2000_0000);
    }
}
