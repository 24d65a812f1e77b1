//! Flash layout of the TL866's PIC18F87J50 as seen by the bootloader.
//!
//! ```text
//! 0x00000 +-------------------+
//!         |    bootloader     |  never written in safe mode
//! 0x01800 +-------------------+  <- default base of an update
//!         |    application    |
//! 0x1FC00 +-------------------+
//!         | configuration blk |  never written in safe mode
//! 0x20000 +-------------------+
//! ```
//!
//! Update payloads are encrypted: every 80 bytes sent decrypt to 64 bytes
//! of flash, so the device address advances by 64 per 80-byte chunk.

/// Memory map and chunking rules for bootloader writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    /// Total flash size; no write may start at or beyond it.
    pub flash_size: u32,
    /// End of the bootloader region.
    pub bootloader_end: u32,
    /// End of the region safe mode allows writes into.
    pub writable_end: u32,
    /// Encrypted bytes sent per write.
    pub chunk_size: usize,
    /// Flash bytes covered by one chunk.
    pub stride: u32,
    /// Address of the first chunk of an update.
    pub base_address: u32,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            flash_size: 0x20000,
            bootloader_end: 0x1800,
            writable_end: 0x1FC00,
            chunk_size: 80,
            stride: 64,
            base_address: 0x1800,
        }
    }
}

impl FlashLayout {
    /// Set the first write address.
    #[must_use]
    pub fn with_base_address(mut self, base_address: u32) -> Self {
        self.base_address = base_address;
        self
    }

    /// Whether `[address, address + len·stride/chunk)` ends past the
    /// writable region.
    ///
    /// Compared as `address·chunk + len·stride > end·chunk` so that partial
    /// chunks are projected exactly.
    pub fn exceeds_ceiling(&self, address: u32, len: usize) -> bool {
        let chunk = self.chunk_size as u64;
        u64::from(address) * chunk + len as u64 * u64::from(self.stride)
            > u64::from(self.writable_end) * chunk
    }

    /// Number of writes needed for a payload.
    pub fn chunk_count(&self, payload_len: usize) -> usize {
        payload_len.div_ceil(self.chunk_size)
    }

    /// Largest payload that fits between the base address and the ceiling.
    pub fn capacity(&self) -> usize {
        let span = self
            .writable_end
            .saturating_sub(self.base_address);
        (span / self.stride) as usize * self.chunk_size
    }

    /// Device address of chunk `index`.
    pub fn chunk_address(&self, index: usize) -> u32 {
        self.base_address + index as u32 * self.stride
    }
}
