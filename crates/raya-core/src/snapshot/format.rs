//! Snapshot binary format definitions

use crate::gc::GcRef;
use crate::module::LinkError;
use crate::scheduler::TaskId;
use crate::value::Value;
use raya_bytecode::{ModuleError, VerifyError};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Magic number for Raya snapshots: "RAYA\0\0\0\0"
pub const SNAPSHOT_MAGIC: u64 = 0x0000005941594152;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Endianness marker written by little-endian encoders
pub const ENDIANNESS_MARKER: u32 = 0x01020304;

/// Snapshot header (36 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Magic number (must be SNAPSHOT_MAGIC)
    pub magic: u64,

    /// Snapshot format version
    pub version: u32,

    /// Flags (reserved, always 0)
    pub flags: u32,

    /// Endianness marker (0x01020304)
    pub endianness: u32,

    /// Timestamp when snapshot was created (Unix epoch millis)
    pub timestamp: u64,

    /// Number of segments that follow
    pub segment_count: u32,

    /// Reserved for future use
    pub reserved: u32,
}

impl SnapshotHeader {
    /// Create a new snapshot header stamped with the current time
    pub fn new(segment_count: u32) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            flags: 0,
            endianness: ENDIANNESS_MARKER,
            timestamp: now_millis(),
            segment_count,
            reserved: 0,
        }
    }

    /// Validate snapshot header
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }

        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::IncompatibleVersion {
                expected: SNAPSHOT_VERSION,
                actual: self.version,
            });
        }

        if self.endianness != ENDIANNESS_MARKER {
            return Err(SnapshotError::EndiannessMismatch);
        }

        Ok(())
    }

    /// Encode header to writer in little-endian format
    pub fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        write_u64(writer, self.magic)?;
        write_u32(writer, self.version)?;
        write_u32(writer, self.flags)?;
        write_u32(writer, self.endianness)?;
        write_u64(writer, self.timestamp)?;
        write_u32(writer, self.segment_count)?;
        write_u32(writer, self.reserved)?;
        Ok(())
    }

    /// Decode header from reader
    pub fn decode(reader: &mut impl Read) -> std::io::Result<Self> {
        Ok(Self {
            magic: read_u64(reader)?,
            version: read_u32(reader)?,
            flags: read_u32(reader)?,
            endianness: read_u32(reader)?,
            timestamp: read_u64(reader)?,
            segment_count: read_u32(reader)?,
            reserved: read_u32(reader)?,
        })
    }
}

/// Segment type identifier
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SegmentType {
    /// Loaded modules and the native modules they need
    Metadata = 1,
    /// Heap slot image
    Heap = 2,
    /// Global bindings per module
    Globals = 3,
    /// Task states
    Task = 4,
    /// Scheduler counters
    Scheduler = 5,
}

impl SegmentType {
    /// Convert a byte to a segment type
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Metadata),
            2 => Some(Self::Heap),
            3 => Some(Self::Globals),
            4 => Some(Self::Task),
            5 => Some(Self::Scheduler),
            _ => None,
        }
    }
}

/// Segment header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Segment type identifier
    pub segment_type: u8,
    /// Segment flags
    pub flags: u8,
    /// Reserved for future use
    pub reserved: u16,
    /// Length of segment data in bytes
    pub length: u64,
}

impl SegmentHeader {
    /// Create a new segment header
    pub fn new(segment_type: SegmentType, length: u64) -> Self {
        Self {
            segment_type: segment_type as u8,
            flags: 0,
            reserved: 0,
            length,
        }
    }

    /// Encode segment header to writer
    pub fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_all(&[self.segment_type, self.flags])?;
        writer.write_all(&self.reserved.to_le_bytes())?;
        write_u64(writer, self.length)
    }

    /// Decode segment header from reader
    pub fn decode(reader: &mut impl Read) -> std::io::Result<Self> {
        let segment_type = read_u8(reader)?;
        let flags = read_u8(reader)?;
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf)?;
        Ok(Self {
            segment_type,
            flags,
            reserved: u16::from_le_bytes(buf),
            length: read_u64(reader)?,
        })
    }
}

/// Checksum for snapshot integrity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChecksum {
    hash: [u8; 32], // SHA-256
}

impl SnapshotChecksum {
    /// Compute SHA-256 checksum of data
    pub fn compute(data: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&Sha256::digest(data));
        Self { hash }
    }

    /// Verify that checksum matches the given data
    pub fn verify(&self, data: &[u8]) -> bool {
        *self == Self::compute(data)
    }

    /// Hex form, for diagnostics
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Encode checksum to writer
    pub fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_all(&self.hash)
    }

    /// Decode checksum from reader
    pub fn decode(reader: &mut impl Read) -> std::io::Result<Self> {
        let mut hash = [0u8; 32];
        reader.read_exact(&mut hash)?;
        Ok(Self { hash })
    }
}

/// Snapshot error types
#[derive(Debug)]
pub enum SnapshotError {
    /// Invalid magic number in snapshot header
    InvalidMagic,
    /// Incompatible snapshot version
    IncompatibleVersion {
        /// Expected version
        expected: u32,
        /// Actual version found
        actual: u32,
    },
    /// Endianness mismatch between snapshot and current system
    EndiannessMismatch,
    /// Checksum verification failed
    ChecksumMismatch {
        /// Checksum stored in the snapshot
        expected: String,
        /// Checksum of the data read
        actual: String,
    },
    /// A required segment is absent
    MissingSegment(SegmentType),
    /// Corrupted snapshot data
    CorruptedData(String),
    /// An embedded module failed to decode
    Module(ModuleError),
    /// An embedded module failed verification
    Verify(VerifyError),
    /// The target VM lacks a native module the snapshot needs
    Link(LinkError),
    /// I/O error during snapshot read/write
    IoError(std::io::Error),
}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        SnapshotError::IoError(e)
    }
}

impl From<ModuleError> for SnapshotError {
    fn from(e: ModuleError) -> Self {
        SnapshotError::Module(e)
    }
}

impl From<VerifyError> for SnapshotError {
    fn from(e: VerifyError) -> Self {
        SnapshotError::Verify(e)
    }
}

impl From<LinkError> for SnapshotError {
    fn from(e: LinkError) -> Self {
        SnapshotError::Link(e)
    }
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::InvalidMagic => write!(f, "Invalid snapshot magic number"),
            SnapshotError::IncompatibleVersion { expected, actual } => {
                write!(
                    f,
                    "Incompatible snapshot version (expected {}, got {})",
                    expected, actual
                )
            }
            SnapshotError::EndiannessMismatch => write!(f, "Endianness mismatch"),
            SnapshotError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum verification failed (expected {}, got {})",
                expected, actual
            ),
            SnapshotError::MissingSegment(kind) => write!(f, "Missing {:?} segment", kind),
            SnapshotError::CorruptedData(what) => write!(f, "Corrupted snapshot data: {}", what),
            SnapshotError::Module(e) => write!(f, "Invalid module in snapshot: {}", e),
            SnapshotError::Verify(e) => write!(f, "Module in snapshot failed verification: {}", e),
            SnapshotError::Link(e) => write!(f, "Cannot restore snapshot: {}", e),
            SnapshotError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Current time as Unix epoch millis
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Primitive encoding
// ============================================================================

pub(crate) fn write_u8(w: &mut impl Write, v: u8) -> std::io::Result<()> {
    w.write_all(&[v])
}

pub(crate) fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    write_u64(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

pub(crate) fn write_str(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub(crate) fn read_u8(r: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Length-prefixed bytes; grows with the data actually present, so a
/// corrupted length cannot force a huge allocation
pub(crate) fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>, SnapshotError> {
    let len = read_u64(r)?;
    let mut buf = Vec::new();
    (&mut *r).take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(SnapshotError::CorruptedData(format!(
            "expected {} bytes, found {}",
            len,
            buf.len()
        )));
    }
    Ok(buf)
}

pub(crate) fn read_string(r: &mut impl Read) -> Result<String, SnapshotError> {
    String::from_utf8(read_bytes(r)?)
        .map_err(|_| SnapshotError::CorruptedData("invalid UTF-8 string".to_string()))
}

/// Element count, bounded by what could possibly follow
pub(crate) fn read_count(r: &mut impl Read, limit: usize) -> Result<usize, SnapshotError> {
    let count = read_u64(r)?;
    if count > limit as u64 {
        return Err(SnapshotError::CorruptedData(format!(
            "count {} exceeds remaining data",
            count
        )));
    }
    Ok(count as usize)
}

const VALUE_NULL: u8 = 0;
const VALUE_BOOL: u8 = 1;
const VALUE_I32: u8 = 2;
const VALUE_REF: u8 = 3;
const VALUE_TASK: u8 = 4;

/// Encode a VM value
pub(crate) fn write_value(w: &mut impl Write, value: Value) -> std::io::Result<()> {
    match value {
        Value::Null => write_u8(w, VALUE_NULL),
        Value::Bool(b) => {
            write_u8(w, VALUE_BOOL)?;
            write_u8(w, b as u8)
        }
        Value::I32(i) => {
            write_u8(w, VALUE_I32)?;
            w.write_all(&i.to_le_bytes())
        }
        Value::Ref(r) => {
            write_u8(w, VALUE_REF)?;
            write_u32(w, r.index())
        }
        Value::Task(id) => {
            write_u8(w, VALUE_TASK)?;
            write_u64(w, id.as_u64())
        }
    }
}

/// Decode a VM value
pub(crate) fn read_value(r: &mut impl Read) -> Result<Value, SnapshotError> {
    match read_u8(r)? {
        VALUE_NULL => Ok(Value::Null),
        VALUE_BOOL => Ok(Value::Bool(read_u8(r)? != 0)),
        VALUE_I32 => Ok(Value::I32(read_u32(r)? as i32)),
        VALUE_REF => Ok(Value::Ref(GcRef::from_index(read_u32(r)?))),
        VALUE_TASK => Ok(Value::Task(TaskId::from_u64(read_u64(r)?))),
        tag => Err(SnapshotError::CorruptedData(format!("unknown value tag {}", tag))),
    }
}

pub(crate) fn write_values(w: &mut impl Write, values: &[Value]) -> std::io::Result<()> {
    write_u64(w, values.len() as u64)?;
    values.iter().try_for_each(|v| write_value(w, *v))
}

pub(crate) fn read_values(r: &mut impl Read, limit: usize) -> Result<Vec<Value>, SnapshotError> {
    let count = read_count(r, limit)?;
    (0..count).map(|_| read_value(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = SnapshotHeader::new(5);
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 36);

        let decoded = SnapshotHeader::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.validate().is_ok());
    }

    #[test]
    fn test_header_validation() {
        let header = SnapshotHeader::new(0);

        let mut invalid = header.clone();
        invalid.magic = 0;
        assert!(matches!(invalid.validate(), Err(SnapshotError::InvalidMagic)));

        let mut invalid = header.clone();
        invalid.version = 99;
        assert!(matches!(
            invalid.validate(),
            Err(SnapshotError::IncompatibleVersion { actual: 99, .. })
        ));

        let mut invalid = header;
        invalid.endianness = 0x04030201;
        assert!(matches!(invalid.validate(), Err(SnapshotError::EndiannessMismatch)));
    }

    #[test]
    fn test_checksum_compute_verify() {
        let data = b"test data for checksum";
        let checksum = SnapshotChecksum::compute(data);
        assert!(checksum.verify(data));
        assert!(!checksum.verify(b"different data"));
        assert_eq!(checksum.to_hex().len(), 64);
    }

    #[test]
    fn test_corrupted_length_is_rejected() {
        let mut buf = Vec::new();
        write_u64(&mut buf, u64::MAX).unwrap();
        buf.extend_from_slice(b"abc");
        assert!(matches!(
            read_bytes(&mut &buf[..]),
            Err(SnapshotError::CorruptedData(_))
        ));
    }

    #[test]
    fn test_unknown_value_tag() {
        let buf = [9u8];
        assert!(matches!(
            read_value(&mut &buf[..]),
            Err(SnapshotError::CorruptedData(_))
        ));
    }
}
