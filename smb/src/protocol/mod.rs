pub mod body;
pub mod command;
pub mod flags;
pub mod header;
pub mod message;

pub use command::Command;
pub use flags::HeaderFlags;
pub use header::Smb2Header;
pub use message::Smb2Message;
