//! Snapshot reader - parses and verifies a serialized VM state

use super::format::{
    read_bytes, read_count, read_string, read_u64, read_values, SegmentHeader, SegmentType,
    SnapshotChecksum, SnapshotError, SnapshotHeader,
};
use super::heap::HeapSnapshot;
use super::task::SerializedTask;
use super::VmSnapshot;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Snapshot reader
pub struct SnapshotReader;

impl SnapshotReader {
    /// Load snapshot from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<VmSnapshot, SnapshotError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::from_reader(&mut reader)
    }

    /// Load snapshot from reader
    pub fn from_reader(reader: &mut impl Read) -> Result<VmSnapshot, SnapshotError> {
        let header = SnapshotHeader::decode(reader)?;
        header.validate()?;

        // Segment headers are part of the checksummed bytes
        let mut checksummed = Vec::new();
        let mut segments = Vec::with_capacity(header.segment_count.min(16) as usize);

        for _ in 0..header.segment_count {
            let seg_header = SegmentHeader::decode(reader)?;
            let segment_type = SegmentType::from_u8(seg_header.segment_type).ok_or_else(|| {
                SnapshotError::CorruptedData(format!(
                    "unknown segment type {}",
                    seg_header.segment_type
                ))
            })?;
            seg_header.encode(&mut checksummed)?;

            let mut data = Vec::new();
            (&mut *reader).take(seg_header.length).read_to_end(&mut data)?;
            if data.len() as u64 != seg_header.length {
                return Err(SnapshotError::CorruptedData(format!(
                    "truncated {:?} segment",
                    segment_type
                )));
            }
            checksummed.extend_from_slice(&data);
            segments.push((segment_type, data));
        }

        let checksum = SnapshotChecksum::decode(reader)?;
        if !checksum.verify(&checksummed) {
            return Err(SnapshotError::ChecksumMismatch {
                expected: checksum.to_hex(),
                actual: SnapshotChecksum::compute(&checksummed).to_hex(),
            });
        }

        let find = |kind: SegmentType| {
            segments
                .iter()
                .find(|(t, _)| *t == kind)
                .map(|(_, data)| data.as_slice())
                .ok_or(SnapshotError::MissingSegment(kind))
        };

        let (modules, native_modules) = Self::parse_metadata(find(SegmentType::Metadata)?)?;
        let heap_data = find(SegmentType::Heap)?;
        let heap = HeapSnapshot::decode(&mut &heap_data[..], heap_data.len())?;
        let globals = Self::parse_globals(find(SegmentType::Globals)?)?;
        let tasks = Self::parse_tasks(find(SegmentType::Task)?)?;
        let next_task_id = read_u64(&mut &find(SegmentType::Scheduler)?[..])?;

        Ok(VmSnapshot {
            timestamp: header.timestamp,
            modules,
            native_modules,
            heap,
            globals,
            tasks,
            next_task_id,
        })
    }

    fn parse_metadata(data: &[u8]) -> Result<(Vec<Vec<u8>>, Vec<String>), SnapshotError> {
        let mut reader = data;
        let module_count = read_count(&mut reader, data.len())?;
        let mut modules = Vec::with_capacity(module_count);
        for _ in 0..module_count {
            modules.push(read_bytes(&mut reader)?);
        }

        let native_count = read_count(&mut reader, data.len())?;
        let mut natives = Vec::with_capacity(native_count);
        for _ in 0..native_count {
            natives.push(read_string(&mut reader)?);
        }
        Ok((modules, natives))
    }

    fn parse_globals(data: &[u8]) -> Result<Vec<Vec<crate::value::Value>>, SnapshotError> {
        let mut reader = data;
        let count = read_count(&mut reader, data.len())?;
        (0..count)
            .map(|_| read_values(&mut reader, data.len()))
            .collect()
    }

    fn parse_tasks(data: &[u8]) -> Result<Vec<SerializedTask>, SnapshotError> {
        let mut reader = data;
        let count = read_count(&mut reader, data.len())?;
        (0..count)
            .map(|_| SerializedTask::decode(&mut reader, data.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::writer::SnapshotWriter;
    use crate::value::Value;

    fn sample() -> VmSnapshot {
        VmSnapshot {
            timestamp: 1234,
            modules: vec![vec![1, 2, 3]],
            native_modules: vec!["crypto".to_string()],
            heap: HeapSnapshot::empty(),
            globals: vec![vec![Value::i32(9), Value::bool(false)]],
            tasks: Vec::new(),
            next_task_id: 7,
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = sample();
        let mut buf = Vec::new();
        SnapshotWriter::new(&snapshot).write_snapshot(&mut buf).unwrap();

        let decoded = SnapshotReader::from_reader(&mut &buf[..]).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = vec![0u8; 100];
        buf[0..8].copy_from_slice(&0u64.to_le_bytes());

        let result = SnapshotReader::from_reader(&mut &buf[..]);
        assert!(matches!(result, Err(SnapshotError::InvalidMagic)));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut buf = Vec::new();
        SnapshotWriter::new(&sample()).write_snapshot(&mut buf).unwrap();

        let len = buf.len();
        buf[len - 1] ^= 0xFF;

        let result = SnapshotReader::from_reader(&mut &buf[..]);
        assert!(matches!(result, Err(SnapshotError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_snapshot() {
        let mut buf = Vec::new();
        SnapshotWriter::new(&sample()).write_snapshot(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);

        assert!(SnapshotReader::from_reader(&mut &buf[..]).is_err());
    }
}
