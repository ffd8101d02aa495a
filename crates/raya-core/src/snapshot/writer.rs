//! Snapshot writer - serializes a captured VM state

use super::format::{
    write_bytes, write_str, write_u64, write_values, SegmentHeader, SegmentType, SnapshotChecksum,
    SnapshotError, SnapshotHeader,
};
use super::VmSnapshot;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Number of segments every snapshot carries
pub const SEGMENT_COUNT: u32 = 5;

/// Snapshot writer
pub struct SnapshotWriter<'a> {
    snapshot: &'a VmSnapshot,
}

impl<'a> SnapshotWriter<'a> {
    /// Create a writer for a captured snapshot
    pub fn new(snapshot: &'a VmSnapshot) -> Self {
        Self { snapshot }
    }

    /// Write snapshot to file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_snapshot(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write snapshot to writer
    pub fn write_snapshot(&self, writer: &mut impl Write) -> Result<(), SnapshotError> {
        let mut header = SnapshotHeader::new(SEGMENT_COUNT);
        header.timestamp = self.snapshot.timestamp;
        header.encode(writer)?;

        let mut segment_data = Vec::new();
        self.write_metadata_segment(&mut segment_data)?;
        self.write_heap_segment(&mut segment_data)?;
        self.write_globals_segment(&mut segment_data)?;
        self.write_task_segment(&mut segment_data)?;
        self.write_scheduler_segment(&mut segment_data)?;

        writer.write_all(&segment_data)?;
        SnapshotChecksum::compute(&segment_data).encode(writer)?;
        Ok(())
    }

    fn write_segment(
        out: &mut Vec<u8>,
        segment_type: SegmentType,
        data: &[u8],
    ) -> Result<(), SnapshotError> {
        SegmentHeader::new(segment_type, data.len() as u64).encode(out)?;
        out.write_all(data)?;
        Ok(())
    }

    fn write_metadata_segment(&self, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        let mut data = Vec::new();
        write_u64(&mut data, self.snapshot.modules.len() as u64)?;
        for module in &self.snapshot.modules {
            write_bytes(&mut data, module)?;
        }
        write_u64(&mut data, self.snapshot.native_modules.len() as u64)?;
        for name in &self.snapshot.native_modules {
            write_str(&mut data, name)?;
        }
        Self::write_segment(out, SegmentType::Metadata, &data)
    }

    fn write_heap_segment(&self, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        let mut data = Vec::new();
        self.snapshot.heap.encode(&mut data)?;
        Self::write_segment(out, SegmentType::Heap, &data)
    }

    fn write_globals_segment(&self, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        let mut data = Vec::new();
        write_u64(&mut data, self.snapshot.globals.len() as u64)?;
        for globals in &self.snapshot.globals {
            write_values(&mut data, globals)?;
        }
        Self::write_segment(out, SegmentType::Globals, &data)
    }

    fn write_task_segment(&self, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        let mut data = Vec::new();
        write_u64(&mut data, self.snapshot.tasks.len() as u64)?;
        for task in &self.snapshot.tasks {
            task.encode(&mut data)?;
        }
        Self::write_segment(out, SegmentType::Task, &data)
    }

    fn write_scheduler_segment(&self, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        let mut data = Vec::new();
        write_u64(&mut data, self.snapshot.next_task_id)?;
        Self::write_segment(out, SegmentType::Scheduler, &data)
    }
}
