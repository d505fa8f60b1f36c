//! Byte-level access to emulated memory.

/// Read access to a 16-bit address space.
pub trait MemoryRead {
    fn read_u8(&self, addr: u16) -> u8;

    /// Read `len` consecutive bytes starting at `addr`, wrapping at 0xFFFF.
    fn read_bytes(&self, addr: u16, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.read_u8(addr.wrapping_add(i as u16)))
            .collect()
    }

    fn read_u16_le(&self, addr: u16) -> u16 {
        u16::from(self.read_u8(addr)) | (u16::from(self.read_u8(addr.wrapping_add(1))) << 8)
    }
}

/// Write access to a 16-bit address space.
pub trait MemoryWrite {
    fn write_u8(&mut self, addr: u16, value: u8);
}

// Plain byte buffers are indexed from address 0; reads past the end are 0.
impl MemoryRead for [u8] {
    fn read_u8(&self, addr: u16) -> u8 {
        self.get(addr as usize).copied().unwrap_or(0)
    }
}

impl MemoryRead for Vec<u8> {
    fn read_u8(&self, addr: u16) -> u8 {
        self.as_slice().read_u8(addr)
    }
}

impl MemoryWrite for Vec<u8> {
    fn write_u8(&mut self, addr: u16, value: u8) {
        if let Some(byte) = self.get_mut(addr as usize) {
            *byte = value;
        }
    }
}
