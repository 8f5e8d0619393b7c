//! Random-write log command and its binary frame
//!
//! Frame layout, all integers big-endian, no trailer:
//!
//! ```text
//! +---------+--------+-----------+--------+------+----------+------+
//! | version | opcode | extent_id | offset | size | checksum | data |
//! +---------+--------+-----------+--------+------+----------+------+
//! |    4    |   1    |     8     |   8    |  8   |    4     | size |
//! +---------+--------+-----------+--------+------+----------+------+
//! ```

use extentraft_core::{CommandError, ExtentId};
use extentraft_store::WriteMode;
use serde::{Deserialize, Serialize};

/// The only frame version this node reads and writes
pub const MAGIC_VERSION: u32 = 0xFF;

/// Bytes preceding the data span
pub const HEADER_LEN: usize = 4 + 1 + 8 + 8 + 8 + 4;

/// Opcodes that travel through the replicated log
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WriteOpcode {
    RandomWrite = 0x0F,
    SyncRandomWrite = 0x12,
}

impl WriteOpcode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for WriteOpcode {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0F => Ok(Self::RandomWrite),
            0x12 => Ok(Self::SyncRandomWrite),
            other => Err(CommandError::UnknownOpcode(other)),
        }
    }
}

impl From<WriteOpcode> for WriteMode {
    fn from(opcode: WriteOpcode) -> Self {
        match opcode {
            WriteOpcode::SyncRandomWrite => WriteMode::Sync,
            WriteOpcode::RandomWrite => WriteMode::Buffered,
        }
    }
}

/// A decoded random write, the unit of replication
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteCommand {
    pub opcode: WriteOpcode,
    pub extent_id: ExtentId,
    pub offset: i64,
    pub data: Vec<u8>,
    pub checksum: u32,
}

impl WriteCommand {
    /// Build a command from a parsed client write, checking its invariants
    pub fn from_parts(
        opcode: u8,
        extent_id: u64,
        offset: i64,
        size: i64,
        data: Vec<u8>,
        checksum: u32,
    ) -> Result<Self, CommandError> {
        let opcode = WriteOpcode::try_from(opcode)?;
        if size < 0 || size as u64 != data.len() as u64 {
            return Err(CommandError::SizeMismatch {
                declared: size,
                actual: data.len(),
            });
        }
        if offset < 0 {
            return Err(CommandError::NegativeOffset(offset));
        }
        let extent_id = ExtentId::new(extent_id);
        if !extent_id.is_valid() {
            return Err(CommandError::InvalidExtent(extent_id.0));
        }
        Ok(Self {
            opcode,
            extent_id,
            offset,
            data,
            checksum,
        })
    }

    pub fn size(&self) -> i64 {
        self.data.len() as i64
    }

    pub fn write_mode(&self) -> WriteMode {
        self.opcode.into()
    }

    /// Marshal into a frame of exactly `HEADER_LEN + size` bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len());
        buf.extend_from_slice(&MAGIC_VERSION.to_be_bytes());
        buf.push(self.opcode.as_u8());
        buf.extend_from_slice(&self.extent_id.0.to_be_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(&self.size().to_be_bytes());
        buf.extend_from_slice(&self.checksum.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Unmarshal a frame; bytes after the data span are ignored
    pub fn decode(frame: &[u8]) -> Result<Self, CommandError> {
        let mut reader = FrameReader::new(frame);

        let version = u32::from_be_bytes(reader.take_array("version")?);
        if version != MAGIC_VERSION {
            return Err(CommandError::BadVersion {
                expected: MAGIC_VERSION,
                actual: version,
            });
        }
        let [opcode] = reader.take_array::<1>("opcode")?;
        let opcode = WriteOpcode::try_from(opcode)?;
        let extent_id = ExtentId::new(u64::from_be_bytes(reader.take_array("extent_id")?));
        let offset = i64::from_be_bytes(reader.take_array("offset")?);
        let size = i64::from_be_bytes(reader.take_array("size")?);
        let checksum = u32::from_be_bytes(reader.take_array("checksum")?);

        let size = usize::try_from(size).map_err(|_| CommandError::InvalidSize(size))?;
        let data = reader.take("data", size)?.to_vec();

        Ok(Self {
            opcode,
            extent_id,
            offset,
            data,
            checksum,
        })
    }
}

/// Bounds-checked cursor over a frame
struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], CommandError> {
        if self.buf.len() < needed {
            return Err(CommandError::Truncated {
                field,
                needed,
                remaining: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(needed);
        self.buf = rest;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CommandError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WriteCommand {
        WriteCommand::from_parts(0x0F, 7, 100, 4, vec![1, 2, 3, 4], 0xABCD).unwrap()
    }

    #[test]
    fn test_frame_layout() {
        let frame = sample().encode();
        let mut expected = vec![0, 0, 0, 0xFF, 0x0F];
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 7]);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 100]);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 4]);
        expected.extend_from_slice(&[0, 0, 0xAB, 0xCD]);
        expected.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(frame, expected);
        assert_eq!(frame.len(), HEADER_LEN + 4);
    }

    #[test]
    fn test_round_trip() {
        let commands = [
            sample(),
            WriteCommand::from_parts(0x12, u64::MAX, i64::MAX, 0, vec![], u32::MAX).unwrap(),
            WriteCommand::from_parts(0x0F, 1, 0, 3, vec![0xFF; 3], 0).unwrap(),
        ];
        for command in commands {
            assert_eq!(WriteCommand::decode(&command.encode()).unwrap(), command);
        }
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut frame = sample().encode();
        frame[3] = 0xFE;
        assert_eq!(
            WriteCommand::decode(&frame),
            Err(CommandError::BadVersion {
                expected: MAGIC_VERSION,
                actual: 0xFE
            })
        );

        frame[..4].copy_from_slice(&0x0100_00FFu32.to_be_bytes());
        assert!(matches!(
            WriteCommand::decode(&frame),
            Err(CommandError::BadVersion { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let frame = sample().encode();
        assert_eq!(
            WriteCommand::decode(&frame[..2]),
            Err(CommandError::Truncated {
                field: "version",
                needed: 4,
                remaining: 2
            })
        );
        assert!(matches!(
            WriteCommand::decode(&frame[..HEADER_LEN - 1]),
            Err(CommandError::Truncated { field: "checksum", .. })
        ));
        assert!(matches!(
            WriteCommand::decode(&[]),
            Err(CommandError::Truncated { field: "version", .. })
        ));
    }

    #[test]
    fn test_declared_size_beyond_frame() {
        let mut frame = sample().encode();
        // claim an enormous payload with only 4 bytes behind the header
        frame[21..29].copy_from_slice(&(i64::MAX).to_be_bytes());
        assert!(matches!(
            WriteCommand::decode(&frame),
            Err(CommandError::Truncated {
                field: "data",
                remaining: 4,
                ..
            })
        ));

        let frame = sample().encode();
        assert!(matches!(
            WriteCommand::decode(&frame[..frame.len() - 1]),
            Err(CommandError::Truncated {
                field: "data",
                needed: 4,
                remaining: 3
            })
        ));
    }

    #[test]
    fn test_negative_size() {
        let mut frame = sample().encode();
        frame[21..29].copy_from_slice(&(-1i64).to_be_bytes());
        assert_eq!(WriteCommand::decode(&frame), Err(CommandError::InvalidSize(-1)));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut frame = sample().encode();
        frame[4] = 0x01;
        assert_eq!(WriteCommand::decode(&frame), Err(CommandError::UnknownOpcode(0x01)));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut frame = sample().encode();
        frame.extend_from_slice(&[0xDE, 0xAD]);
        assert_eq!(WriteCommand::decode(&frame).unwrap(), sample());
    }

    #[test]
    fn test_from_parts_validation() {
        assert_eq!(
            WriteCommand::from_parts(0x0F, 7, 0, 5, vec![1], 0),
            Err(CommandError::SizeMismatch {
                declared: 5,
                actual: 1
            })
        );
        assert_eq!(
            WriteCommand::from_parts(0x0F, 7, -3, 1, vec![1], 0),
            Err(CommandError::NegativeOffset(-3))
        );
        assert_eq!(
            WriteCommand::from_parts(0x0F, 0, 0, 1, vec![1], 0),
            Err(CommandError::InvalidExtent(0))
        );
        assert_eq!(
            WriteCommand::from_parts(0x03, 7, 0, 1, vec![1], 0),
            Err(CommandError::UnknownOpcode(0x03))
        );
    }

    #[test]
    fn test_write_mode_follows_opcode() {
        assert_eq!(sample().write_mode(), WriteMode::Buffered);
        let sync = WriteCommand::from_parts(0x12, 7, 0, 0, vec![], 0).unwrap();
        assert_eq!(sync.write_mode(), WriteMode::Sync);
    }
}
