// src/format.rs
//! Formato en disco de minfs: constantes, superblock, inodos, dirents y el
//! bloque de información del journal.
//!
//! Todos los enteros se guardan en little-endian. Los números de bloque que
//! aparecen dentro de los inodos son relativos al inicio de la región de datos
//! (`dat_block`); el bloque de datos 0 y el inodo 0 están reservados.

// -----------------------------------------------------------------------------
// Constantes de geometría
// -----------------------------------------------------------------------------

pub const BLOCK_SIZE: usize = 8192;
pub const BLOCK_BITS: u32 = (BLOCK_SIZE * 8) as u32;
pub const INODE_SIZE: usize = 256;
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;

pub const DIRECT: usize = 16;
pub const INDIRECT: usize = 31;
pub const DOUBLY_INDIRECT: usize = 1;
pub const DIRECT_PER_INDIRECT: u32 = (BLOCK_SIZE / 4) as u32;

/// Primer índice lógico fuera del alcance de los tres niveles de punteros.
pub const MAX_FILE_BLOCK: u32 = DIRECT as u32
    + INDIRECT as u32 * DIRECT_PER_INDIRECT
    + DOUBLY_INDIRECT as u32 * DIRECT_PER_INDIRECT * DIRECT_PER_INDIRECT;

pub const MINFS_MAGIC0: u64 = 0x0021_5346_6e69_4d21;
pub const MINFS_MAGIC1: u64 = 0x3850_00d3_d3d3_d304;
pub const MINFS_FORMAT_VERSION: u32 = 9;

pub const MAGIC_FILE: u32 = 0x4d69_6e46; // "MinF"
pub const MAGIC_DIR: u32 = 0x4d69_6e44; // "MinD"
pub const MAGIC_PURGED: u32 = 0xdead_dead;

pub const ROOT_INO: u32 = 1;

pub const FLAG_CLEAN: u32 = 1;
pub const FLAG_FVM: u32 = 2;

// -----------------------------------------------------------------------------
// Ubicaciones fijas
// -----------------------------------------------------------------------------

pub const SUPERBLOCK_START: u64 = 0;
pub const NON_FVM_SUPERBLOCK_BACKUP: u64 = 7;
pub const FVM_SUPERBLOCK_BACKUP: u64 = 0x40000;
pub const BACKUP_SUPERBLOCK_BLOCKS: u32 = 1;

pub const FVM_BLOCK_INODE_BM_START: u32 = 0x10000;
pub const FVM_BLOCK_DATA_BM_START: u32 = 0x20000;
pub const FVM_BLOCK_INODE_START: u32 = 0x30000;
pub const FVM_BLOCK_DATA_START: u32 = 0x50000;

/// Bloques del journal (incluye el bloque de información) que crea mkfs.
pub const DEFAULT_JOURNAL_BLOCKS: u32 = 16;
/// Mínimo aceptable: bloque de información + una entrada.
pub const MIN_JOURNAL_BLOCKS: u32 = 2;

// -----------------------------------------------------------------------------
// Dirents
// -----------------------------------------------------------------------------

pub const DIRENT_HEADER_SIZE: u32 = 10;
pub const DIRENT_ALIGNMENT: u32 = 4;
pub const MAX_NAME_LEN: u8 = 255;
pub const MAX_DIRENT_SIZE: u32 = dirent_size(MAX_NAME_LEN);
pub const RECLEN_LAST: u32 = 0x8000_0000;
pub const RECLEN_MASK: u32 = 0x0FFF_FFFF;

pub const DIRENT_TYPE_DIR: u8 = 4;
pub const DIRENT_TYPE_FILE: u8 = 8;

/// Tamaño (alineado) que ocupa un dirent con un nombre de `namelen` bytes.
pub const fn dirent_size(namelen: u8) -> u32 {
    (DIRENT_HEADER_SIZE + namelen as u32 + (DIRENT_ALIGNMENT - 1)) & !(DIRENT_ALIGNMENT - 1)
}

pub const JOURNAL_MAGIC: u64 = 0x626c_6f62_6a72_6e6c;

pub const SUPERBLOCK_SIZE: usize = 88;
pub const JOURNAL_INFO_SIZE: usize = 28;

// -----------------------------------------------------------------------------
// Lectura/escritura little-endian
// -----------------------------------------------------------------------------

pub(crate) fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(raw)
}

pub(crate) fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

fn div_round_up(value: u32, unit: u32) -> u32 {
    value.div_ceil(unit)
}

// -----------------------------------------------------------------------------
// Superblock
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Superblock {
    pub magic0: u64,
    pub magic1: u64,
    pub format_version: u32,
    pub flags: u32,
    pub block_size: u32,
    pub inode_size: u32,

    /// Bloques de datos (el bitmap de bloques tiene un bit por cada uno).
    pub block_count: u32,
    pub inode_count: u32,
    pub alloc_block_count: u32,
    pub alloc_inode_count: u32,

    pub ibm_block: u32,
    pub abm_block: u32,
    pub ino_block: u32,
    pub integrity_start_block: u32,
    pub dat_block: u32,
    pub slice_size: u32,

    pub unlinked_head: u32,
    pub unlinked_tail: u32,
    pub generation_count: u32,
    pub checksum: u32,
}

impl Superblock {
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            magic0: get_u64(buf, 0),
            magic1: get_u64(buf, 8),
            format_version: get_u32(buf, 16),
            flags: get_u32(buf, 20),
            block_size: get_u32(buf, 24),
            inode_size: get_u32(buf, 28),
            block_count: get_u32(buf, 32),
            inode_count: get_u32(buf, 36),
            alloc_block_count: get_u32(buf, 40),
            alloc_inode_count: get_u32(buf, 44),
            ibm_block: get_u32(buf, 48),
            abm_block: get_u32(buf, 52),
            ino_block: get_u32(buf, 56),
            integrity_start_block: get_u32(buf, 60),
            dat_block: get_u32(buf, 64),
            slice_size: get_u32(buf, 68),
            unlinked_head: get_u32(buf, 72),
            unlinked_tail: get_u32(buf, 76),
            generation_count: get_u32(buf, 80),
            checksum: get_u32(buf, 84),
        }
    }

    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        put_u64(&mut buf, 0, self.magic0);
        put_u64(&mut buf, 8, self.magic1);
        put_u32(&mut buf, 16, self.format_version);
        put_u32(&mut buf, 20, self.flags);
        put_u32(&mut buf, 24, self.block_size);
        put_u32(&mut buf, 28, self.inode_size);
        put_u32(&mut buf, 32, self.block_count);
        put_u32(&mut buf, 36, self.inode_count);
        put_u32(&mut buf, 40, self.alloc_block_count);
        put_u32(&mut buf, 44, self.alloc_inode_count);
        put_u32(&mut buf, 48, self.ibm_block);
        put_u32(&mut buf, 52, self.abm_block);
        put_u32(&mut buf, 56, self.ino_block);
        put_u32(&mut buf, 60, self.integrity_start_block);
        put_u32(&mut buf, 64, self.dat_block);
        put_u32(&mut buf, 68, self.slice_size);
        put_u32(&mut buf, 72, self.unlinked_head);
        put_u32(&mut buf, 76, self.unlinked_tail);
        put_u32(&mut buf, 80, self.generation_count);
        put_u32(&mut buf, 84, self.checksum);
        buf
    }

    /// Bloque completo listo para escribir en disco.
    pub fn to_block(&self) -> Vec<u8> {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[..SUPERBLOCK_SIZE].copy_from_slice(&self.to_bytes());
        block
    }

    /// CRC32C (Castagnoli) del superblock serializado, con el campo `checksum`
    /// en cero.
    pub fn compute_checksum(&self) -> u32 {
        let mut copy = *self;
        copy.checksum = 0;
        crc32c::crc32c(&copy.to_bytes())
    }

    pub fn update_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    pub fn is_fvm(&self) -> bool {
        self.flags & FLAG_FVM != 0
    }

    /// Ubicación de la copia de respaldo según el layout.
    pub fn backup_location(&self) -> u64 {
        if self.is_fvm() {
            FVM_SUPERBLOCK_BACKUP
        } else {
            NON_FVM_SUPERBLOCK_BACKUP
        }
    }

    pub fn journal_start_block(&self) -> u64 {
        self.integrity_start_block as u64 + BACKUP_SUPERBLOCK_BLOCKS as u64
    }

    pub fn inode_bitmap_blocks(&self) -> u32 {
        div_round_up(self.inode_count, BLOCK_BITS)
    }

    pub fn block_bitmap_blocks(&self) -> u32 {
        div_round_up(self.block_count, BLOCK_BITS)
    }

    pub fn inode_table_blocks(&self) -> u32 {
        div_round_up(self.inode_count, INODES_PER_BLOCK)
    }

    /// Bloque físico y desplazamiento dentro del bloque del inodo `ino`.
    pub fn inode_location(&self, ino: u32) -> (u64, usize) {
        let block = self.ino_block as u64 + (ino / INODES_PER_BLOCK) as u64;
        let offset = (ino % INODES_PER_BLOCK) as usize * INODE_SIZE;
        (block, offset)
    }

    /// Bloque físico de un bloque de datos relativo.
    pub fn data_block(&self, bno: u32) -> u64 {
        self.dat_block as u64 + bno as u64
    }
}

// -----------------------------------------------------------------------------
// Inodos
// -----------------------------------------------------------------------------

/// Tipo de un inodo alcanzable: sólo archivos y directorios son válidos.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inode {
    pub magic: u32,
    pub link_count: u32,
    pub size: u64,
    pub block_count: u32,
    pub generation_count: u32,
    pub create_time: u64,
    pub modify_time: u64,
    /// Anterior/siguiente en la lista de inodos desvinculados.
    pub last_inode: u32,
    pub next_inode: u32,
    pub seq_num: u32,
    pub dirent_count: u32,
    pub dnum: [u32; DIRECT],
    pub inum: [u32; INDIRECT],
    pub dinum: [u32; DOUBLY_INDIRECT],
}

impl Inode {
    pub fn new_file() -> Self {
        Self {
            magic: MAGIC_FILE,
            ..Self::default()
        }
    }

    pub fn new_directory() -> Self {
        Self {
            magic: MAGIC_DIR,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> Option<InodeKind> {
        match self.magic {
            MAGIC_FILE => Some(InodeKind::File),
            MAGIC_DIR => Some(InodeKind::Directory),
            _ => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.magic == MAGIC_DIR
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut inode = Self {
            magic: get_u32(buf, 0),
            link_count: get_u32(buf, 4),
            size: get_u64(buf, 8),
            block_count: get_u32(buf, 16),
            generation_count: get_u32(buf, 20),
            create_time: get_u64(buf, 24),
            modify_time: get_u64(buf, 32),
            last_inode: get_u32(buf, 40),
            next_inode: get_u32(buf, 44),
            seq_num: get_u32(buf, 48),
            dirent_count: get_u32(buf, 52),
            ..Self::default()
        };
        for (i, slot) in inode.dnum.iter_mut().enumerate() {
            *slot = get_u32(buf, 64 + i * 4);
        }
        for (i, slot) in inode.inum.iter_mut().enumerate() {
            *slot = get_u32(buf, 128 + i * 4);
        }
        for (i, slot) in inode.dinum.iter_mut().enumerate() {
            *slot = get_u32(buf, 252 + i * 4);
        }
        inode
    }

    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        put_u32(&mut buf, 0, self.magic);
        put_u32(&mut buf, 4, self.link_count);
        put_u64(&mut buf, 8, self.size);
        put_u32(&mut buf, 16, self.block_count);
        put_u32(&mut buf, 20, self.generation_count);
        put_u64(&mut buf, 24, self.create_time);
        put_u64(&mut buf, 32, self.modify_time);
        put_u32(&mut buf, 40, self.last_inode);
        put_u32(&mut buf, 44, self.next_inode);
        put_u32(&mut buf, 48, self.seq_num);
        put_u32(&mut buf, 52, self.dirent_count);
        for (i, bno) in self.dnum.iter().enumerate() {
            put_u32(&mut buf, 64 + i * 4, *bno);
        }
        for (i, bno) in self.inum.iter().enumerate() {
            put_u32(&mut buf, 128 + i * 4, *bno);
        }
        for (i, bno) in self.dinum.iter().enumerate() {
            put_u32(&mut buf, 252 + i * 4, *bno);
        }
        buf
    }
}

// -----------------------------------------------------------------------------
// Dirents
// -----------------------------------------------------------------------------

/// Cabecera fija de un dirent (sin el nombre).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirentHeader {
    pub ino: u32,
    pub reclen: u32,
    pub namelen: u8,
    pub kind: u8,
}

impl DirentHeader {
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            ino: get_u32(buf, 0),
            reclen: get_u32(buf, 4),
            namelen: buf[8],
            kind: buf[9],
        }
    }

    pub fn is_last(&self) -> bool {
        self.reclen & RECLEN_LAST != 0
    }

    /// Espacio reservado para el registro que empieza en `offset`. El último
    /// registro se extiende hasta el final de su bloque.
    pub fn reserved_size(&self, offset: u64) -> u32 {
        if self.is_last() {
            (BLOCK_SIZE as u64 - offset % BLOCK_SIZE as u64) as u32
        } else {
            self.reclen & RECLEN_MASK
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u32,
    pub reclen: u32,
    pub kind: u8,
    pub name: Vec<u8>,
}

impl Dirent {
    pub fn new(ino: u32, kind: u8, name: &str, reclen: u32) -> Self {
        Self {
            ino,
            reclen,
            kind,
            name: name.as_bytes().to_vec(),
        }
    }

    /// Decodifica un registro completo (cabecera + nombre).
    pub fn from_bytes(buf: &[u8]) -> Self {
        let header = DirentHeader::from_bytes(buf);
        let start = DIRENT_HEADER_SIZE as usize;
        let end = (start + header.namelen as usize).min(buf.len());
        Self {
            ino: header.ino,
            reclen: header.reclen,
            kind: header.kind,
            name: buf[start..end].to_vec(),
        }
    }

    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Serializa el registro en `out` a partir de `offset`. El espacio
    /// sobrante del registro queda en ceros.
    pub fn write_to(&self, out: &mut [u8], offset: usize) {
        put_u32(out, offset, self.ino);
        put_u32(out, offset + 4, self.reclen);
        out[offset + 8] = self.name.len() as u8;
        out[offset + 9] = self.kind;
        let start = offset + DIRENT_HEADER_SIZE as usize;
        out[start..start + self.name.len()].copy_from_slice(&self.name);
    }
}

// -----------------------------------------------------------------------------
// Journal
// -----------------------------------------------------------------------------

/// Bloque de información del journal. El checker sólo valida su presencia y
/// su checksum; el contenido del journal no se reproduce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JournalInfo {
    pub magic: u64,
    pub start_block: u64,
    pub timestamp: u64,
    pub checksum: u32,
}

impl JournalInfo {
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            magic: get_u64(buf, 0),
            start_block: get_u64(buf, 8),
            timestamp: get_u64(buf, 16),
            checksum: get_u32(buf, 24),
        }
    }

    pub fn to_bytes(&self) -> [u8; JOURNAL_INFO_SIZE] {
        let mut buf = [0u8; JOURNAL_INFO_SIZE];
        put_u64(&mut buf, 0, self.magic);
        put_u64(&mut buf, 8, self.start_block);
        put_u64(&mut buf, 16, self.timestamp);
        put_u32(&mut buf, 24, self.checksum);
        buf
    }

    /// CRC32C (Castagnoli) de los 28 bytes serializados, checksum en cero.
    pub fn compute_checksum(&self) -> u32 {
        let mut copy = *self;
        copy.checksum = 0;
        crc32c::crc32c(&copy.to_bytes())
    }

    pub fn update_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirent_sizes_are_aligned() {
        assert_eq!(dirent_size(1), 12);
        assert_eq!(dirent_size(2), 12);
        assert_eq!(dirent_size(3), 16);
        assert_eq!(MAX_DIRENT_SIZE, 268);
        assert_eq!(MAX_DIRENT_SIZE % DIRENT_ALIGNMENT, 0);
    }

    #[test]
    fn addressable_range() {
        assert_eq!(MAX_FILE_BLOCK, 16 + 31 * 2048 + 2048 * 2048);
    }

    #[test]
    fn inode_layout_fills_record() {
        let mut inode = Inode::new_directory();
        inode.dinum[0] = 0xabcd;
        inode.inum[30] = 77;
        let raw = inode.to_bytes();
        assert_eq!(get_u32(&raw, 252), 0xabcd);
        assert_eq!(Inode::from_bytes(&raw), inode);
    }

    #[test]
    fn superblock_checksum_ignores_its_own_field() {
        let mut sb = Superblock {
            magic0: MINFS_MAGIC0,
            block_count: 10,
            ..Superblock::default()
        };
        sb.update_checksum();
        assert!(sb.checksum_ok());

        sb.alloc_block_count = 3;
        assert!(!sb.checksum_ok());
    }

    #[test]
    fn last_dirent_reserves_rest_of_block() {
        let header = DirentHeader {
            ino: 1,
            reclen: RECLEN_LAST | 12,
            namelen: 2,
            kind: DIRENT_TYPE_DIR,
        };
        assert_eq!(header.reserved_size(12), BLOCK_SIZE as u32 - 12);
        assert_eq!(header.reserved_size(BLOCK_SIZE as u64 + 24), BLOCK_SIZE as u32 - 24);
    }
}
