// src/bitmap.rs
use crate::bcache::Bcache;
use crate::error::Result;
use crate::format::{BLOCK_BITS, BLOCK_SIZE};

/// Bitmap de `len` bits, 1 = usado, 0 = libre (mismo orden de bits que en disco:
/// el bit `i` vive en el byte `i / 8`, posición `i % 8`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBitmap {
    bits: Vec<u8>,
    len: u32,
}

impl RawBitmap {
    pub fn new(len: u32) -> Self {
        Self {
            bits: vec![0u8; len.div_ceil(8) as usize],
            len,
        }
    }

    /// Construye el bitmap a partir de bytes leídos de disco; los bits más
    /// allá de `len` se ignoran.
    pub fn from_bytes(mut bytes: Vec<u8>, len: u32) -> Self {
        let needed = len.div_ceil(8) as usize;
        bytes.resize(needed, 0);
        let tail = len % 8;
        if tail != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }
        Self { bits: bytes, len }
    }

    pub fn get(&self, idx: u32) -> bool {
        if idx >= self.len {
            return false;
        }
        self.bits[(idx / 8) as usize] & (1 << (idx % 8)) != 0
    }

    pub fn set(&mut self, idx: u32) {
        if idx < self.len {
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    pub fn clear(&mut self, idx: u32) {
        if idx < self.len {
            self.bits[(idx / 8) as usize] &= !(1 << (idx % 8));
        }
    }

    /// Población: cantidad de bits en 1.
    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Lee `len` bits a partir del bloque `start_block`.
    pub fn load(bcache: &Bcache, start_block: u32, len: u32) -> Result<Self> {
        let blocks = len.div_ceil(BLOCK_BITS);
        let mut bytes = Vec::with_capacity(blocks as usize * BLOCK_SIZE);
        for n in 0..blocks {
            bytes.extend_from_slice(&bcache.read_block(start_block as u64 + n as u64)?);
        }
        Ok(Self::from_bytes(bytes, len))
    }

    /// Escribe el bitmap a partir de `start_block`, rellenando el último bloque.
    pub fn store(&self, bcache: &mut Bcache, start_block: u32) -> Result<()> {
        for (n, chunk) in self.bits.chunks(BLOCK_SIZE).enumerate() {
            bcache.write_block(start_block as u64 + n as u64, chunk)?;
        }
        Ok(())
    }
}

/// Vista de sólo lectura de un bitmap de asignación en disco (inodos o bloques).
#[derive(Clone, Debug)]
pub struct Allocator {
    map: RawBitmap,
}

impl Allocator {
    pub fn load(bcache: &Bcache, start_block: u32, units: u32) -> Result<Self> {
        Ok(Self {
            map: RawBitmap::load(bcache, start_block, units)?,
        })
    }

    pub fn is_allocated(&self, idx: u32) -> bool {
        self.map.get(idx)
    }

    pub fn allocated_count(&self) -> u32 {
        self.map.count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcache::MemDevice;

    #[test]
    fn get_set_clear() {
        let mut map = RawBitmap::new(20);
        map.set(0);
        map.set(9);
        map.set(19);
        map.set(25); // fuera de rango: se ignora
        assert!(map.get(9));
        assert!(!map.get(25));
        assert_eq!(map.count_ones(), 3);

        map.clear(9);
        assert!(!map.get(9));
        assert_eq!(map.count_ones(), 2);
    }

    #[test]
    fn bits_past_len_are_masked() {
        let map = RawBitmap::from_bytes(vec![0xff, 0xff], 12);
        assert_eq!(map.count_ones(), 12);
        assert!(!map.get(12));
    }

    #[test]
    fn load_spans_blocks() {
        let mut bc = Bcache::new(MemDevice::new(16));
        let len = BLOCK_BITS + 5;
        let mut map = RawBitmap::new(len);
        map.set(1);
        map.set(BLOCK_BITS + 4);
        map.store(&mut bc, 3).unwrap();

        let alloc = Allocator::load(&bc, 3, len).unwrap();
        assert!(alloc.is_allocated(1));
        assert!(alloc.is_allocated(BLOCK_BITS + 4));
        assert!(!alloc.is_allocated(2));
        assert_eq!(alloc.allocated_count(), 2);
    }
}
