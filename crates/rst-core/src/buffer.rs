//! Zeroed request buffers honoring the device's DMA alignment.

use std::ops::{Deref, DerefMut};

use crate::error::RstError;

/// Owned, zero-filled byte buffer whose first byte sits on a requested alignment.
///
/// Backed by an over-allocated `Vec<u8>`; the aligned window starts at `offset`.
/// The heap block never moves after construction, so the window stays aligned.
pub struct AlignedBuffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to `alignment` (0 is treated as 1).
    pub fn zeroed(len: usize, alignment: usize) -> Result<Self, RstError> {
        let alignment = alignment.max(1);
        if !alignment.is_power_of_two() {
            return Err(RstError::MemoryFailure { size: len });
        }
        let total = len
            .checked_add(alignment - 1)
            .ok_or(RstError::MemoryFailure { size: len })?;

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(total)
            .map_err(|_| RstError::MemoryFailure { size: len })?;
        storage.resize(total, 0);

        let offset = storage.as_ptr().align_offset(alignment);
        if offset >= alignment {
            return Err(RstError::MemoryFailure { size: len });
        }

        Ok(Self {
            storage,
            offset,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_aligned_to(&self, alignment: usize) -> bool {
        (self.as_ptr() as usize) % alignment.max(1) == 0
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("offset", &self.offset)
            .finish()
    }
}
