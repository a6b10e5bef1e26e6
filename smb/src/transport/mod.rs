pub mod framing;

pub use framing::{FrameError, MAX_FRAME_LEN, MIN_FRAME_LEN};
