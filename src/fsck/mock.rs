/*Backend en memoria para las pruebas del checker.
Los inodos y bloques se cargan a mano, sin pasar por un dispositivo ni por
mkfs, para poder armar situaciones que mkfs nunca produce. */

use std::collections::BTreeMap;

use crate::error::{FsckError, Result};
use crate::format::{
    dirent_size, Dirent, Inode, Superblock, BLOCK_SIZE, DIRENT_TYPE_DIR, DIRENT_TYPE_FILE,
    RECLEN_LAST,
};

use super::fsck_backend::FsckBackend;
use super::resolver::DataBlockReader;

pub struct MockBackend {
    pub info: Superblock,
    pub inodes: BTreeMap<u32, Inode>,
    pub blocks: BTreeMap<u32, Vec<u8>>,
    pub inode_bitmap: Vec<bool>,
    pub block_bitmap: Vec<bool>,
}

impl MockBackend {
    /// Sistema vacío con inodo 0 y bloque 0 reservados.
    pub fn new(inode_count: u32, block_count: u32) -> Self {
        let info = Superblock {
            inode_count,
            block_count,
            ..Superblock::default()
        };
        let mut mock = Self {
            info,
            inodes: BTreeMap::new(),
            blocks: BTreeMap::new(),
            inode_bitmap: vec![false; inode_count as usize],
            block_bitmap: vec![false; block_count as usize],
        };
        mock.inode_bitmap[0] = true;
        mock.block_bitmap[0] = true;
        mock
    }

    pub fn put_inode(&mut self, ino: u32, inode: Inode) {
        self.inode_bitmap[ino as usize] = true;
        self.inodes.insert(ino, inode);
    }

    pub fn put_block(&mut self, bno: u32, data: Vec<u8>) {
        self.block_bitmap[bno as usize] = true;
        self.blocks.insert(bno, data);
    }

    /// Directorio de un bloque (`bno`) con los registros dados, en orden.
    /// `link_count` queda en 1; el llamador lo ajusta si hace falta.
    pub fn put_dir(&mut self, ino: u32, bno: u32, entries: &[(u32, &str)]) {
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut off = 0usize;
        for (k, (target, name)) in entries.iter().enumerate() {
            let size = dirent_size(name.len() as u8);
            let reclen = if k + 1 == entries.len() {
                RECLEN_LAST | size
            } else {
                size
            };
            let kind = if self.inodes.get(target).is_some_and(|i| !i.is_directory()) {
                DIRENT_TYPE_FILE
            } else {
                DIRENT_TYPE_DIR
            };
            Dirent::new(*target, kind, name, reclen).write_to(&mut block, off);
            off += size as usize;
        }
        self.put_block(bno, block);

        let mut dir = Inode::new_directory();
        dir.link_count = 1;
        dir.size = BLOCK_SIZE as u64;
        dir.block_count = 1;
        dir.dirent_count = entries.iter().filter(|(target, _)| *target != 0).count() as u32;
        dir.dnum[0] = bno;
        self.put_inode(ino, dir);
    }

    /// Archivo de un bloque por cada número en `blocks`.
    pub fn put_file(&mut self, ino: u32, blocks: &[u32]) {
        let mut file = Inode::new_file();
        file.link_count = 1;
        file.size = blocks.len() as u64 * BLOCK_SIZE as u64;
        file.block_count = blocks.len() as u32;
        for (slot, bno) in blocks.iter().enumerate() {
            file.dnum[slot] = *bno;
            self.put_block(*bno, vec![0u8; BLOCK_SIZE]);
        }
        self.put_inode(ino, file);
    }
}

impl DataBlockReader for MockBackend {
    fn read_dat(&self, bno: u32) -> Result<Vec<u8>> {
        if bno >= self.info.block_count {
            return Err(FsckError::OutOfRange(format!("bloque {bno}")));
        }
        Ok(self
            .blocks
            .get(&bno)
            .cloned()
            .unwrap_or_else(|| vec![0u8; BLOCK_SIZE]))
    }
}

impl FsckBackend for MockBackend {
    fn info(&self) -> &Superblock {
        &self.info
    }

    fn max_blocks(&self) -> u64 {
        self.info.block_count as u64
    }

    fn load_inode(&self, ino: u32) -> Result<Inode> {
        if ino >= self.info.inode_count {
            return Err(FsckError::OutOfRange(format!("ino#{ino}")));
        }
        Ok(self.inodes.get(&ino).copied().unwrap_or_default())
    }

    fn read_block(&self, _bno: u64) -> Result<Vec<u8>> {
        Ok(vec![0u8; BLOCK_SIZE])
    }

    fn inode_allocated(&self, ino: u32) -> bool {
        self.inode_bitmap.get(ino as usize).copied().unwrap_or(false)
    }

    fn block_allocated(&self, bno: u32) -> bool {
        self.block_bitmap.get(bno as usize).copied().unwrap_or(false)
    }
}
