//! Requests and the frame buffers attached to them.

use std::fmt;

use memmap2::MmapMut;

use crate::controls::{ControlList, ControlValue, Metadata};
use crate::error::{DriverError, Result};

/// Identifier the driver assigns to a request. Opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Created or reset, ready to be queued.
    Pending,
    /// Filled with image data.
    Complete,
    /// Returned without data, e.g. because the session stopped.
    Cancelled,
}

/// One frame buffer backed by an anonymous memory map, standing in for a dma-buf.
pub struct FrameBuffer {
    map: MmapMut,
    bytes_used: usize,
}

impl FrameBuffer {
    pub fn allocate(len: usize) -> Result<Self> {
        let map = MmapMut::map_anon(len.max(1)).map_err(|e| DriverError::Allocation(e.to_string()))?;
        Ok(Self { map, bytes_used: 0 })
    }

    /// Mapped length in bytes.
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Bytes written by the last capture.
    pub fn data(&self) -> &[u8] {
        &self.map[..self.bytes_used]
    }

    /// The whole mapping, for the driver to fill.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    pub fn set_bytes_used(&mut self, bytes_used: usize) {
        self.bytes_used = bytes_used.min(self.map.len());
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.capacity())
            .field("bytes_used", &self.bytes_used)
            .finish()
    }
}

/// A unit of capture work: one buffer per configured stream plus the controls to apply and the
/// metadata reported back.
///
/// Requests move by value between the driver and its user; whoever holds one owns its buffers.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    status: RequestStatus,
    sequence: u64,
    controls: ControlList,
    metadata: Metadata,
    buffers: Vec<FrameBuffer>,
}

impl Request {
    pub fn new(id: RequestId, buffers: Vec<FrameBuffer>) -> Self {
        Self {
            id,
            status: RequestStatus::Pending,
            sequence: 0,
            controls: ControlList::new(),
            metadata: Metadata::new(),
            buffers,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Sensor frame sequence number, valid once complete.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn controls(&self) -> &ControlList {
        &self.controls
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn buffers(&self) -> &[FrameBuffer] {
        &self.buffers
    }

    pub fn buffer(&self, stream: usize) -> Option<&FrameBuffer> {
        self.buffers.get(stream)
    }

    pub fn buffer_mut(&mut self, stream: usize) -> Option<&mut FrameBuffer> {
        self.buffers.get_mut(stream)
    }

    pub fn set_control(&mut self, id: &str, value: ControlValue) {
        self.controls.set(id, value);
    }

    /// Reset for another trip through the driver: status back to pending, controls and metadata
    /// cleared. Buffers are kept.
    pub fn reuse(&mut self) {
        self.status = RequestStatus::Pending;
        self.sequence = 0;
        self.controls.clear();
        self.metadata.clear();
    }

    /// Driver side: mark the request as filled.
    pub fn complete(&mut self, sequence: u64, metadata: Metadata) {
        self.status = RequestStatus::Complete;
        self.sequence = sequence;
        self.metadata = metadata;
    }

    /// Driver side: return the request without data.
    pub fn cancel(&mut self) {
        self.status = RequestStatus::Cancelled;
        for buffer in &mut self.buffers {
            buffer.set_bytes_used(0);
        }
    }
}
