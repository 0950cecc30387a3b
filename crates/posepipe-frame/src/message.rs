//! Typed messages carried inside frame payloads.
//!
//! Payload byte 0 is the message tag. Everything after it is fixed-width and
//! native-endian: both processes run on the same machine, so no byte-order
//! normalisation happens here.
//!
//! ```text
//! DeviceUpdate  [1][count u32] count × record
//!   record      [serial_len u32][serial][kind u8][pos 3×f32][rot 4×f32][connected u8]
//! Command       [2][name_len u32][name][params_len u32][params]
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{DecodeError, FrameError};

/// Tag byte for [`Message::DeviceUpdate`].
pub const TAG_DEVICE_UPDATE: u8 = 1;

/// Tag byte for [`Message::Command`].
pub const TAG_COMMAND: u8 = 2;

/// Smallest possible encoded record (empty serial).
const MIN_RECORD_SIZE: usize = 4 + 1 + 3 * 4 + 4 * 4 + 1;

/// Kind of tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceKind {
    #[default]
    Unknown,
    Hmd,
    Controller,
    Tracker,
    TrackingReference,
}

impl DeviceKind {
    /// Wire byte for this kind.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Hmd => 1,
            Self::Controller => 2,
            Self::Tracker => 3,
            Self::TrackingReference => 4,
        }
    }

    /// Kind for a wire byte. Unassigned values map to `Unknown`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Hmd,
            2 => Self::Controller,
            3 => Self::Tracker,
            4 => Self::TrackingReference,
            _ => Self::Unknown,
        }
    }

    /// Short lowercase name for logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Hmd => "hmd",
            Self::Controller => "controller",
            Self::Tracker => "tracker",
            Self::TrackingReference => "tracking_reference",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pose and status of one tracked device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceRecord {
    /// Device serial. Records with an empty serial are never sent or delivered.
    pub serial: String,
    pub kind: DeviceKind,
    /// Position in metres.
    pub position: [f32; 3],
    /// Rotation quaternion `(x, y, z, w)`; not required to be normalised.
    pub rotation: [f32; 4],
    pub connected: bool,
}

impl DeviceRecord {
    /// Create a connected record at `position` with identity rotation.
    pub fn new(serial: impl Into<String>, kind: DeviceKind, position: [f32; 3]) -> Self {
        Self {
            serial: serial.into(),
            kind,
            position,
            rotation: [0.0, 0.0, 0.0, 1.0],
            connected: true,
        }
    }

    /// Whether this record may be put on the wire.
    pub fn is_valid(&self) -> bool {
        !self.serial.is_empty()
    }
}

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Host → client: current poses of all tracked devices.
    DeviceUpdate { devices: Vec<DeviceRecord> },
    /// Client → host: a named text command with an opaque parameter string.
    Command { name: String, params: String },
}

impl Message {
    /// Build a command message.
    pub fn command(name: impl Into<String>, params: impl Into<String>) -> Self {
        Self::Command {
            name: name.into(),
            params: params.into(),
        }
    }
}

/// Encode a message into a frame payload (without the length prefix).
///
/// Invalid device records are left out, and the record count reflects only
/// what was written. Counts and string lengths travel as `u32`; anything
/// longer fails with [`FrameError::FieldTooLong`] instead of being cut short.
pub fn encode(message: &Message) -> Result<Bytes, FrameError> {
    match message {
        Message::DeviceUpdate { devices } => {
            let valid = devices.iter().filter(|d| d.is_valid());
            let count = valid.clone().count();
            let mut buf = BytesMut::with_capacity(
                1 + 4
                    + valid
                        .clone()
                        .map(|d| MIN_RECORD_SIZE + d.serial.len())
                        .sum::<usize>(),
            );
            buf.put_u8(TAG_DEVICE_UPDATE);
            buf.put_u32_ne(wire_len("device_update.count", count)?);
            for device in valid {
                put_str(&mut buf, "device.serial", &device.serial)?;
                buf.put_u8(device.kind.as_byte());
                for v in device.position {
                    buf.put_f32_ne(v);
                }
                for v in device.rotation {
                    buf.put_f32_ne(v);
                }
                buf.put_u8(u8::from(device.connected));
            }
            Ok(buf.freeze())
        }
        Message::Command { name, params } => {
            let mut buf = BytesMut::with_capacity(1 + 8 + name.len() + params.len());
            buf.put_u8(TAG_COMMAND);
            put_str(&mut buf, "command.name", name)?;
            put_str(&mut buf, "command.params", params)?;
            Ok(buf.freeze())
        }
    }
}

/// Decode a complete frame payload.
///
/// Every length is checked against the remaining bytes before anything is
/// read; malformed input produces an error, never a panic.
pub fn decode(payload: &[u8]) -> Result<Message, DecodeError> {
    let (&tag, body) = payload.split_first().ok_or(DecodeError::TooShort)?;
    let mut cursor = Cursor::new(body);
    let message = match tag {
        TAG_DEVICE_UPDATE => decode_device_update(&mut cursor)?,
        TAG_COMMAND => {
            let name = cursor.string("command.name")?;
            let params = cursor.string("command.params")?;
            Message::Command { name, params }
        }
        other => return Err(DecodeError::UnknownTag(other)),
    };
    if cursor.remaining() > 0 {
        trace!(tag, trailing = cursor.remaining(), "ignoring trailing payload bytes");
    }
    Ok(message)
}

fn decode_device_update(cursor: &mut Cursor<'_>) -> Result<Message, DecodeError> {
    let count = cursor.u32("device_update.count")? as usize;
    // Never trust the count for allocation; cap it by what could possibly fit.
    let mut devices = Vec::with_capacity(count.min(cursor.remaining() / MIN_RECORD_SIZE));

    for _ in 0..count {
        let serial = cursor.string("device.serial")?;
        let kind = DeviceKind::from_byte(cursor.u8("device.kind")?);
        let mut position = [0f32; 3];
        for v in &mut position {
            *v = cursor.f32("device.position")?;
        }
        let mut rotation = [0f32; 4];
        for v in &mut rotation {
            *v = cursor.f32("device.rotation")?;
        }
        let connected = cursor.u8("device.connected")? != 0;

        let record = DeviceRecord {
            serial,
            kind,
            position,
            rotation,
            connected,
        };
        if record.is_valid() {
            devices.push(record);
        } else {
            debug!(kind = %record.kind, "skipping device record with empty serial");
        }
    }

    Ok(Message::DeviceUpdate { devices })
}

fn wire_len(field: &'static str, len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::FieldTooLong { field, len })
}

fn put_str(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), FrameError> {
    buf.put_u32_ne(wire_len(field, value.len())?);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Bounds-checked reader over a payload slice.
struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.data.len() {
            return Err(DecodeError::TruncatedField {
                field,
                needed: len,
                available: self.data.len(),
            });
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.array::<1>(field)?[0])
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_ne_bytes(self.array(field)?))
    }

    fn f32(&mut self, field: &'static str) -> Result<f32, DecodeError> {
        Ok(f32::from_ne_bytes(self.array(field)?))
    }

    fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.u32(field)? as usize;
        let bytes = self.take(field, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> Message {
        Message::DeviceUpdate {
            devices: vec![
                DeviceRecord::new("LHR-HMD01", DeviceKind::Hmd, [0.0, 1.7, 0.0]),
                DeviceRecord {
                    serial: "LHR-CTRL-L".to_string(),
                    kind: DeviceKind::Controller,
                    position: [-0.2, 1.1, -0.3],
                    rotation: [0.1, 0.2, 0.3, 0.9],
                    connected: false,
                },
                DeviceRecord::new("LHB-BASE1", DeviceKind::TrackingReference, [2.0, 2.5, 2.0]),
            ],
        }
    }

    #[test]
    fn device_update_roundtrip() {
        let msg = sample_update();
        assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn command_roundtrip() {
        let msg = Message::command("lock_device", "ABC123:true");
        let payload = encode(&msg).unwrap();
        assert_eq!(payload[0], TAG_COMMAND);
        assert_eq!(decode(&payload).unwrap(), msg);
    }

    #[test]
    fn empty_update_and_empty_strings_roundtrip() {
        let empty = Message::DeviceUpdate {
            devices: Vec::new(),
        };
        assert_eq!(decode(&encode(&empty).unwrap()).unwrap(), empty);

        let bare = Message::command("", "");
        assert_eq!(decode(&encode(&bare).unwrap()).unwrap(), bare);
    }

    #[test]
    fn unnormalised_rotation_survives() {
        let mut record = DeviceRecord::new("T1", DeviceKind::Tracker, [1.0, 2.0, 3.0]);
        record.rotation = [4.0, -5.0, 6.5, 0.0];
        let msg = Message::DeviceUpdate {
            devices: vec![record],
        };
        assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn every_strict_prefix_is_an_error() {
        for msg in [sample_update(), Message::command("lock_device", "ABC123:true")] {
            let payload = encode(&msg).unwrap();
            for len in 0..payload.len() {
                assert!(
                    decode(&payload[..len]).is_err(),
                    "prefix of length {len} decoded successfully"
                );
            }
        }
    }

    #[test]
    fn empty_payload_is_too_short() {
        assert_eq!(decode(&[]), Err(DecodeError::TooShort));
    }

    #[test]
    fn unknown_tag_is_reported() {
        assert_eq!(decode(&[9, 0, 0]), Err(DecodeError::UnknownTag(9)));
    }

    #[test]
    fn oversized_string_length_is_truncated_field() {
        let mut payload = vec![TAG_COMMAND];
        payload.extend_from_slice(&u32::MAX.to_ne_bytes());
        payload.extend_from_slice(b"abc");

        let err = decode(&payload).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedField {
                field: "command.name",
                needed: u32::MAX as usize,
                available: 3,
            }
        );
    }

    #[test]
    fn huge_record_count_does_not_preallocate() {
        let mut payload = vec![TAG_DEVICE_UPDATE];
        payload.extend_from_slice(&u32::MAX.to_ne_bytes());

        assert!(matches!(
            decode(&payload),
            Err(DecodeError::TruncatedField {
                field: "device.serial",
                ..
            })
        ));
    }

    #[test]
    fn invalid_records_are_skipped_on_decode() {
        let msg = sample_update();
        let mut payload = BytesMut::from(encode(&msg).unwrap().as_ref());

        // Append a record with an empty serial and bump the count.
        payload.put_u32_ne(0);
        payload.put_u8(DeviceKind::Tracker.as_byte());
        for _ in 0..7 {
            payload.put_f32_ne(0.0);
        }
        payload.put_u8(1);
        let count = (3u32 + 1).to_ne_bytes();
        payload[1..5].copy_from_slice(&count);

        assert_eq!(decode(&payload).unwrap(), msg);
    }

    #[test]
    fn invalid_records_are_skipped_on_encode() {
        let msg = Message::DeviceUpdate {
            devices: vec![
                DeviceRecord::new("", DeviceKind::Tracker, [0.0; 3]),
                DeviceRecord::new("A", DeviceKind::Tracker, [0.0; 3]),
            ],
        };
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        let Message::DeviceUpdate { devices } = decoded else {
            panic!("expected device update");
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "A");
    }

    #[test]
    fn invalid_utf8_serial_is_rejected() {
        let mut payload = BytesMut::new();
        payload.put_u8(TAG_DEVICE_UPDATE);
        payload.put_u32_ne(1);
        payload.put_u32_ne(2);
        payload.put_slice(&[0xFF, 0xFE]);

        assert_eq!(
            decode(&payload),
            Err(DecodeError::InvalidUtf8 {
                field: "device.serial"
            })
        );
    }

    #[test]
    fn lengths_beyond_u32_are_refused() {
        assert_eq!(wire_len("command.name", 7).unwrap(), 7);
        assert_eq!(
            wire_len("command.name", u32::MAX as usize).unwrap(),
            u32::MAX
        );

        #[cfg(target_pointer_width = "64")]
        {
            let err = wire_len("device.serial", u32::MAX as usize + 1).unwrap_err();
            assert!(matches!(
                err,
                FrameError::FieldTooLong {
                    field: "device.serial",
                    ..
                }
            ));
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn unassigned_kind_byte_decodes_as_unknown() {
        assert_eq!(DeviceKind::from_byte(200), DeviceKind::Unknown);
        for kind in [
            DeviceKind::Unknown,
            DeviceKind::Hmd,
            DeviceKind::Controller,
            DeviceKind::Tracker,
            DeviceKind::TrackingReference,
        ] {
            assert_eq!(DeviceKind::from_byte(kind.as_byte()), kind);
        }
    }
}
