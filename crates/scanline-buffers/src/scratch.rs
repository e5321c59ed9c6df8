use scanline_core::{BufferHandle, EngineError, VideoBackend};

pub const DEFAULT_SCRATCH_CAPACITY: usize = 256;

/// A transient buffer handed out by [`ScratchBufferRing::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchHandle {
    pub buffer: BufferHandle,
    pub len: usize,
    generation: u64,
}

/// Fixed ring of transient vertex buffers reused round-robin.
///
/// A handle stays valid until `capacity` further `acquire` calls; after that its buffer
/// may be overwritten. Buffers are created lazily on first use of each slot.
#[derive(Debug)]
pub struct ScratchBufferRing {
    buffers: Vec<Option<BufferHandle>>,
    issued: u64,
}

impl ScratchBufferRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: vec![None; capacity.max(1)],
            issued: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn acquire(
        &mut self,
        backend: &mut dyn VideoBackend,
        data: &[u8],
    ) -> Result<ScratchHandle, EngineError> {
        let slot = (self.issued % self.buffers.len() as u64) as usize;
        let buffer = match self.buffers[slot] {
            Some(b) => b,
            None => {
                let b = backend.create_buffer(data.len())?;
                self.buffers[slot] = Some(b);
                b
            }
        };
        backend.write_buffer(buffer, data)?;

        let generation = self.issued;
        self.issued += 1;
        Ok(ScratchHandle {
            buffer,
            len: data.len(),
            generation,
        })
    }

    /// `true` while fewer than `capacity` acquisitions have followed `handle`'s.
    pub fn is_live(&self, handle: &ScratchHandle) -> bool {
        self.issued - handle.generation <= self.buffers.len() as u64
    }

    pub fn release(&mut self, backend: &mut dyn VideoBackend) {
        for b in self.buffers.iter_mut().filter_map(Option::take) {
            backend.destroy_buffer(b);
        }
    }
}
