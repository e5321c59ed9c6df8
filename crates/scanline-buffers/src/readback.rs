//! Backbuffer capture to host memory.
//!
//! - `capture_sync` blocks on the copy (one-shot screenshots).
//! - `capture_async_begin` queues a copy into the next ring slot without blocking.
//! - `capture_async_try_consume` returns the oldest completed capture, or `NotReady`.
//!
//! When every slot holds an unconsumed capture the oldest one is dropped. Backends without
//! async transfers fall back to a blocking read into the slot, so consumers see the same
//! ring behaviour everywhere.

use scanline_core::{BufferHandle, EngineError, Size, VideoBackend, Viewport};

pub const DEFAULT_READBACK_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub size: Size,
    pub frame: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Ready(CaptureInfo),
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    /// GPU transfer queued into `buffer`.
    Pending,
    /// Data already in `cpu` (blocking fallback).
    Ready,
}

#[derive(Debug)]
struct Slot {
    buffer: Option<BufferHandle>,
    buffer_len: usize,
    cpu: Vec<u8>,
    state: SlotState,
    info: CaptureInfo,
}

impl Slot {
    fn empty() -> Self {
        Self {
            buffer: None,
            buffer_len: 0,
            cpu: Vec::new(),
            state: SlotState::Empty,
            info: CaptureInfo {
                size: Size::default(),
                frame: 0,
            },
        }
    }
}

#[derive(Debug)]
pub struct ReadbackPipeline {
    slots: Vec<Slot>,
    write_index: usize,
    queued: usize,
    dropped: u64,
}

impl ReadbackPipeline {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: (0..slots.max(1)).map(|_| Slot::empty()).collect(),
            write_index: 0,
            queued: 0,
            dropped: 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Captures overwritten before anyone consumed them.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn pending(&self) -> usize {
        self.queued
    }

    /// Blocking copy of `viewport` into `dst` (resized to RGBA8, tightly packed).
    pub fn capture_sync(
        &mut self,
        backend: &mut dyn VideoBackend,
        viewport: Viewport,
        dst: &mut Vec<u8>,
    ) -> Result<Size, EngineError> {
        let size = viewport.size();
        dst.resize(rgba_len(size), 0);
        backend.read_backbuffer(viewport, dst)?;
        Ok(size)
    }

    pub fn capture_async_begin(
        &mut self,
        backend: &mut dyn VideoBackend,
        viewport: Viewport,
        frame: u64,
    ) -> Result<(), EngineError> {
        let size = viewport.size();
        let len = rgba_len(size);
        if len == 0 {
            return Ok(());
        }

        let n = self.slots.len();
        if self.queued == n {
            self.queued -= 1;
            self.dropped += 1;
            tracing::debug!(frame, "readback ring full; dropping oldest capture");
        }

        let async_ok = backend.caps().async_readback;
        let slot = &mut self.slots[self.write_index];
        slot.state = SlotState::Empty;
        slot.info = CaptureInfo { size, frame };

        if async_ok {
            if slot.buffer_len != len {
                if let Some(b) = slot.buffer.take() {
                    backend.destroy_buffer(b);
                }
                slot.buffer = Some(backend.create_buffer(len)?);
                slot.buffer_len = len;
            }
            if let Some(b) = slot.buffer {
                backend.begin_backbuffer_transfer(b, viewport)?;
            }
            slot.state = SlotState::Pending;
        } else {
            slot.cpu.resize(len, 0);
            backend.read_backbuffer(viewport, &mut slot.cpu)?;
            slot.state = SlotState::Ready;
        }

        self.write_index = (self.write_index + 1) % n;
        self.queued += 1;
        Ok(())
    }

    /// Copy the oldest completed capture into `dst`. Never blocks.
    pub fn capture_async_try_consume(
        &mut self,
        backend: &mut dyn VideoBackend,
        dst: &mut Vec<u8>,
    ) -> Result<CaptureStatus, EngineError> {
        if self.queued == 0 {
            return Ok(CaptureStatus::NotReady);
        }
        let n = self.slots.len();
        let read_index = (self.write_index + n - self.queued) % n;
        let slot = &mut self.slots[read_index];

        match slot.state {
            SlotState::Empty => return Ok(CaptureStatus::NotReady),
            SlotState::Pending => {
                let Some(b) = slot.buffer else {
                    return Ok(CaptureStatus::NotReady);
                };
                if !backend.transfer_ready(b) {
                    return Ok(CaptureStatus::NotReady);
                }
                dst.resize(slot.buffer_len, 0);
                backend.read_transfer(b, dst)?;
            }
            SlotState::Ready => {
                dst.clear();
                dst.extend_from_slice(&slot.cpu);
            }
        }

        slot.state = SlotState::Empty;
        self.queued -= 1;
        Ok(CaptureStatus::Ready(slot.info))
    }

    pub fn release(&mut self, backend: &mut dyn VideoBackend) {
        for slot in &mut self.slots {
            if let Some(b) = slot.buffer.take() {
                backend.destroy_buffer(b);
            }
            *slot = Slot::empty();
        }
        self.write_index = 0;
        self.queued = 0;
    }
}

fn rgba_len(size: Size) -> usize {
    size.width as usize * size.height as usize * 4
}
