use super::error::RuntimeError;

/// First valid data address. Everything below is reserved.
pub const MEMORY_BASE: u32 = 1024;

/// Flat little-endian data memory mapped at [`MEMORY_BASE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    // heap allocated, sizes go up to a gigabyte
    bytes: Vec<u8>,
}

impl Memory {
    /// `size` is expected to be validated by the caller (power of two, non-zero).
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// One past the last data address; instructions start here.
    pub fn limit(&self) -> u32 {
        MEMORY_BASE + self.size()
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    fn in_range(&self, address: u32, size: u32) -> bool {
        address >= MEMORY_BASE && u64::from(address) + u64::from(size) <= u64::from(self.limit())
    }

    fn offset(address: u32) -> usize {
        (address - MEMORY_BASE) as usize
    }

    pub fn read(&self, address: u32, size: u32) -> Result<u32, RuntimeError> {
        if !self.in_range(address, size) {
            tracing::trace!("read of {} bytes at {:08X} out of range", size, address);
            return Err(RuntimeError::InvalidReadAddress(address));
        }
        if !matches!(size, 1 | 2 | 4) {
            return Err(RuntimeError::InvalidReadSize(size));
        }
        Ok(self.load(address, size))
    }

    pub fn write(&mut self, address: u32, value: u32, size: u32) -> Result<(), RuntimeError> {
        if !self.in_range(address, size) {
            tracing::trace!("write of {} bytes at {:08X} out of range", size, address);
            return Err(RuntimeError::InvalidWriteAddress(address));
        }
        if !matches!(size, 1 | 2 | 4) {
            return Err(RuntimeError::InvalidWriteSize(size));
        }
        self.store(address, value, size);
        Ok(())
    }

    fn load(&self, address: u32, size: u32) -> u32 {
        let start = Self::offset(address);
        let mut raw = [0u8; 4];
        raw[..size as usize].copy_from_slice(&self.bytes[start..start + size as usize]);
        u32::from_le_bytes(raw)
    }

    fn store(&mut self, address: u32, value: u32, size: u32) {
        let start = Self::offset(address);
        self.bytes[start..start + size as usize]
            .copy_from_slice(&value.to_le_bytes()[..size as usize]);
    }

    /// Copies raw bytes into memory. Used to lay out variable contents, which
    /// are always allocated inside the data area.
    pub fn fill(&mut self, address: u32, data: &[u8]) -> bool {
        if !self.in_range(address, data.len() as u32) {
            return false;
        }
        let start = Self::offset(address);
        self.bytes[start..start + data.len()].copy_from_slice(data);
        true
    }

    pub fn slice(&self, address: u32, len: u32) -> Option<&[u8]> {
        if !self.in_range(address, len) {
            return None;
        }
        let start = Self::offset(address);
        Some(&self.bytes[start..start + len as usize])
    }

    // debug accessors: never raise, out of range is just None/false

    pub fn debug_read_byte(&self, address: u32) -> Option<u32> {
        self.in_range(address, 1).then(|| self.load(address, 1))
    }

    pub fn debug_read_word(&self, address: u32) -> Option<u32> {
        self.in_range(address, 2).then(|| self.load(address, 2))
    }

    pub fn debug_read_dword(&self, address: u32) -> Option<u32> {
        self.in_range(address, 4).then(|| self.load(address, 4))
    }

    pub fn debug_write_byte(&mut self, address: u32, value: u32) -> bool {
        self.debug_write(address, value, 1)
    }

    pub fn debug_write_word(&mut self, address: u32, value: u32) -> bool {
        self.debug_write(address, value, 2)
    }

    pub fn debug_write_dword(&mut self, address: u32, value: u32) -> bool {
        self.debug_write(address, value, 4)
    }

    fn debug_write(&mut self, address: u32, value: u32, size: u32) -> bool {
        if !self.in_range(address, size) {
            return false;
        }
        self.store(address, value, size);
        true
    }
}
