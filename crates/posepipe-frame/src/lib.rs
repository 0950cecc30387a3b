//! Length-prefixed framing and the device-pose wire codec.
//!
//! Every unit on the wire is a 4-byte little-endian payload length followed
//! by exactly that many payload bytes. The payload's first byte selects the
//! [`Message`] kind.
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{DecodeError, FrameError, Result};
pub use message::{
    decode, encode, DeviceKind, DeviceRecord, Message, TAG_COMMAND, TAG_DEVICE_UPDATE,
};
pub use reader::FrameReader;
pub use writer::FrameWriter;
