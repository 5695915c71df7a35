// src/minfs.rs
//! Instancia de minfs montada sólo para lectura: superblock validado,
//! bitmaps de asignación y acceso a inodos y bloques.

use tracing::debug;

use crate::bcache::Bcache;
use crate::bitmap::Allocator;
use crate::error::{FsckError, Result};
use crate::format::{Inode, Superblock, INODE_SIZE};
use crate::fsck::fsck_backend::FsckBackend;
use crate::fsck::resolver::DataBlockReader;
use crate::superblock::load_superblock;

pub struct Minfs {
    bcache: Bcache,
    info: Superblock,
    inode_allocator: Allocator,
    block_allocator: Allocator,
}

impl Minfs {
    /// Valida el superblock primario y carga los bitmaps.
    pub fn open(bcache: Bcache) -> Result<Self> {
        let info = load_superblock(&bcache)?;
        let (inode_allocator, block_allocator) = Self::load_allocators(&bcache, &info)?;
        Ok(Self::from_parts(bcache, info, inode_allocator, block_allocator))
    }

    /// Bitmaps de inodos y de bloques, en ese orden.
    pub fn load_allocators(bcache: &Bcache, info: &Superblock) -> Result<(Allocator, Allocator)> {
        let inodes = Allocator::load(bcache, info.ibm_block, info.inode_count)?;
        let blocks = Allocator::load(bcache, info.abm_block, info.block_count)?;
        debug!(
            inodes = inodes.allocated_count(),
            blocks = blocks.allocated_count(),
            "minfs: bitmaps cargados"
        );
        Ok((inodes, blocks))
    }

    pub fn from_parts(
        bcache: Bcache,
        info: Superblock,
        inode_allocator: Allocator,
        block_allocator: Allocator,
    ) -> Self {
        Self {
            bcache,
            info,
            inode_allocator,
            block_allocator,
        }
    }

    pub fn info(&self) -> &Superblock {
        &self.info
    }

    pub fn load_inode(&self, ino: u32) -> Result<Inode> {
        if ino >= self.info.inode_count {
            return Err(FsckError::OutOfRange(format!(
                "ino#{} (hay {} inodos)",
                ino, self.info.inode_count
            )));
        }
        let (block, offset) = self.info.inode_location(ino);
        let data = self.bcache.read_block(block)?;
        Ok(Inode::from_bytes(&data[offset..offset + INODE_SIZE]))
    }

    /// Lee el bloque de datos relativo `bno`.
    pub fn read_dat(&self, bno: u32) -> Result<Vec<u8>> {
        if bno >= self.info.block_count {
            return Err(FsckError::OutOfRange(format!(
                "bloque de datos {} (hay {})",
                bno, self.info.block_count
            )));
        }
        self.bcache.read_block(self.info.data_block(bno))
    }

    pub fn read_block(&self, bno: u64) -> Result<Vec<u8>> {
        self.bcache.read_block(bno)
    }

    pub fn max_blocks(&self) -> u64 {
        self.bcache.max_blocks()
    }

    /// Devuelve el dispositivo.
    pub fn into_bcache(self) -> Bcache {
        self.bcache
    }
}

impl DataBlockReader for Minfs {
    fn read_dat(&self, bno: u32) -> Result<Vec<u8>> {
        Minfs::read_dat(self, bno)
    }
}

impl FsckBackend for Minfs {
    fn info(&self) -> &Superblock {
        &self.info
    }

    fn max_blocks(&self) -> u64 {
        Minfs::max_blocks(self)
    }

    fn load_inode(&self, ino: u32) -> Result<Inode> {
        Minfs::load_inode(self, ino)
    }

    fn read_block(&self, bno: u64) -> Result<Vec<u8>> {
        Minfs::read_block(self, bno)
    }

    fn inode_allocated(&self, ino: u32) -> bool {
        self.inode_allocator.is_allocated(ino)
    }

    fn block_allocated(&self, bno: u32) -> bool {
        self.block_allocator.is_allocated(bno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ROOT_INO;
    use crate::fsck::resolver::AddressResolver;
    use crate::mkfs::{ImageBuilder, MkfsOptions};

    #[test]
    fn reads_root_directory_through_file_path() {
        let bc = ImageBuilder::new(&MkfsOptions::default()).unwrap().finish().unwrap();
        let fs = Minfs::open(bc).unwrap();
        let root = fs.load_inode(ROOT_INO).unwrap();

        let mut resolver = AddressResolver::new();
        let mut buf = [0u8; 11];
        let got = fs.read_internal(&mut resolver, &root, &mut buf, 0).unwrap();
        assert_eq!(got, 11);
        assert_eq!(&buf[0..4], &ROOT_INO.to_le_bytes());
        assert_eq!(buf[10], b'.');

        // más allá del tamaño no hay nada
        let got = fs.read_internal(&mut resolver, &root, &mut buf, root.size).unwrap();
        assert_eq!(got, 0);
    }

    #[test]
    fn out_of_range_inode() {
        let bc = ImageBuilder::new(&MkfsOptions::default()).unwrap().finish().unwrap();
        let fs = Minfs::open(bc).unwrap();
        let count = fs.info().inode_count;
        assert!(matches!(fs.load_inode(count), Err(FsckError::OutOfRange(_))));
        assert!(matches!(fs.read_dat(fs.info().block_count), Err(FsckError::OutOfRange(_))));
    }
}
