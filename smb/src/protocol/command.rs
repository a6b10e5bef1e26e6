use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// The 19 real SMB2 command codes plus a sentinel used internally by the
/// framing layer to route a detected SMB1 NEGOTIATE through the same
/// dispatch table as everything else, rather than special-casing it in
/// the connection loop.
#[repr(u16)]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Copy, Hash)]
pub enum Command {
    Negotiate = 0x0,
    SessionSetup,
    LogOff,
    TreeConnect,
    TreeDisconnect,
    Create,
    Close,
    Flush,
    Read,
    Write,
    Lock,
    IOCTL,
    Cancel,
    Echo,
    QueryDirectory,
    ChangeNotify,
    QueryInfo,
    SetInfo,
    OplockBreak,
    LegacyNegotiate,
}
