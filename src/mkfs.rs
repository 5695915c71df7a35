// src/mkfs.rs
//! Creación de imágenes minfs: `format` escribe un sistema de archivos vacío
//! (sólo el directorio raíz) y `ImageBuilder` lo puebla con archivos,
//! directorios e inodos desvinculados.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bcache::{Bcache, MemDevice};
use crate::bitmap::RawBitmap;
use crate::error::{FsckError, Result};
use crate::format::{
    dirent_size, get_u32, put_u32, Dirent, Inode, InodeKind, JournalInfo, Superblock,
    BACKUP_SUPERBLOCK_BLOCKS, BLOCK_SIZE, DEFAULT_JOURNAL_BLOCKS, DIRECT, DIRECT_PER_INDIRECT,
    DIRENT_TYPE_DIR, DIRENT_TYPE_FILE, DOUBLY_INDIRECT, FLAG_CLEAN, FLAG_FVM,
    FVM_BLOCK_DATA_BM_START, FVM_BLOCK_DATA_START, FVM_BLOCK_INODE_BM_START,
    FVM_BLOCK_INODE_START, FVM_SUPERBLOCK_BACKUP, INDIRECT, INODE_SIZE, JOURNAL_MAGIC,
    MINFS_FORMAT_VERSION, MINFS_MAGIC0, MINFS_MAGIC1, NON_FVM_SUPERBLOCK_BACKUP, RECLEN_LAST,
    ROOT_INO,
};
use crate::superblock::write_superblock;

/// Tamaño de slice que se anota en imágenes con layout FVM.
pub const FVM_SLICE_SIZE: u32 = 8 * BLOCK_SIZE as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MkfsOptions {
    /// Bloques de la región de datos (incluye el bloque reservado 0).
    pub data_blocks: u32,
    /// Inodos totales (incluye el inodo reservado 0).
    pub inodes: u32,
    pub fvm: bool,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        Self {
            data_blocks: 256,
            inodes: 256,
            fvm: false,
        }
    }
}

impl MkfsOptions {
    /// Superblock con el layout calculado y los contadores en cero.
    pub fn geometry(&self) -> Superblock {
        let mut info = Superblock {
            magic0: MINFS_MAGIC0,
            magic1: MINFS_MAGIC1,
            format_version: MINFS_FORMAT_VERSION,
            flags: FLAG_CLEAN,
            block_size: BLOCK_SIZE as u32,
            inode_size: INODE_SIZE as u32,
            block_count: self.data_blocks,
            inode_count: self.inodes,
            ..Superblock::default()
        };

        if self.fvm {
            info.flags |= FLAG_FVM;
            info.slice_size = FVM_SLICE_SIZE;
            info.ibm_block = FVM_BLOCK_INODE_BM_START;
            info.abm_block = FVM_BLOCK_DATA_BM_START;
            info.ino_block = FVM_BLOCK_INODE_START;
            info.integrity_start_block = FVM_SUPERBLOCK_BACKUP as u32;
            info.dat_block = FVM_BLOCK_DATA_START;
        } else {
            info.integrity_start_block = NON_FVM_SUPERBLOCK_BACKUP as u32;
            info.ibm_block =
                info.integrity_start_block + BACKUP_SUPERBLOCK_BLOCKS + DEFAULT_JOURNAL_BLOCKS;
            info.abm_block = info.ibm_block + info.inode_bitmap_blocks();
            info.ino_block = info.abm_block + info.block_bitmap_blocks();
            info.dat_block = info.ino_block + info.inode_table_blocks();
        }
        info
    }

    /// Bloques que necesita el dispositivo para esta geometría.
    pub fn device_blocks(&self) -> u64 {
        let info = self.geometry();
        info.dat_block as u64 + info.block_count as u64
    }

    fn validate(&self) -> Result<()> {
        if self.data_blocks < 2 || self.inodes < 2 {
            return Err(FsckError::InvalidArgs(format!(
                "se requieren al menos 2 bloques de datos y 2 inodos ({} / {})",
                self.data_blocks, self.inodes
            )));
        }
        if self.fvm {
            let info = self.geometry();
            let window = FVM_BLOCK_DATA_BM_START - FVM_BLOCK_INODE_BM_START;
            if info.inode_bitmap_blocks() > window
                || info.block_bitmap_blocks() > window
                || info.inode_table_blocks() > window
            {
                return Err(FsckError::InvalidArgs(
                    "la geometría no cabe en los slices FVM".into(),
                ));
            }
        }
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn dot_entries(ino: u32, parent: u32) -> Vec<Dirent> {
    vec![
        Dirent::new(ino, DIRENT_TYPE_DIR, ".", 0),
        Dirent::new(parent, DIRENT_TYPE_DIR, "..", 0),
    ]
}

/// Escribe un minfs vacío en `bcache`: bitmaps, tabla de inodos, directorio
/// raíz, bloque de información del journal y superblock (primario y respaldo).
pub fn format(bcache: &mut Bcache, opts: &MkfsOptions) -> Result<Superblock> {
    opts.validate()?;
    let mut info = opts.geometry();
    if opts.device_blocks() > bcache.max_blocks() {
        return Err(FsckError::InvalidArgs(format!(
            "el dispositivo tiene {} bloques, se necesitan {}",
            bcache.max_blocks(),
            opts.device_blocks()
        )));
    }
    let now = now_secs();

    // 1. Bitmaps: inodo 0 y bloque 0 reservados, inodo raíz y su bloque.
    let mut inode_map = RawBitmap::new(info.inode_count);
    inode_map.set(0);
    inode_map.set(ROOT_INO);
    inode_map.store(bcache, info.ibm_block)?;

    let mut block_map = RawBitmap::new(info.block_count);
    block_map.set(0);
    block_map.set(1);
    block_map.store(bcache, info.abm_block)?;

    // 2. Tabla de inodos limpia + raíz.
    let zero = vec![0u8; BLOCK_SIZE];
    for n in 0..info.inode_table_blocks() {
        bcache.write_block(info.ino_block as u64 + n as u64, &zero)?;
    }
    let mut dir_block = vec![0u8; BLOCK_SIZE];
    let dot = Dirent::new(ROOT_INO, DIRENT_TYPE_DIR, ".", dirent_size(1));
    let dotdot = Dirent::new(ROOT_INO, DIRENT_TYPE_DIR, "..", RECLEN_LAST | dirent_size(2));
    dot.write_to(&mut dir_block, 0);
    dotdot.write_to(&mut dir_block, dirent_size(1) as usize);
    bcache.write_block(info.data_block(1), &dir_block)?;

    let mut root = Inode::new_directory();
    root.size = BLOCK_SIZE as u64;
    root.block_count = 1;
    root.link_count = 1;
    root.dirent_count = 2;
    root.dnum[0] = 1;
    root.create_time = now;
    root.modify_time = now;
    let (block, offset) = info.inode_location(ROOT_INO);
    let mut table = bcache.read_block(block)?;
    table[offset..offset + INODE_SIZE].copy_from_slice(&root.to_bytes());
    bcache.write_block(block, &table)?;

    // 3. Journal: sólo el bloque de información.
    let mut journal = JournalInfo {
        magic: JOURNAL_MAGIC,
        start_block: info.journal_start_block() + 1,
        timestamp: now,
        checksum: 0,
    };
    journal.update_checksum();
    bcache.write_block(info.journal_start_block(), &journal.to_bytes())?;

    // 4. Superblock.
    info.alloc_block_count = 2;
    info.alloc_inode_count = 2;
    info.update_checksum();
    write_superblock(bcache, &info)?;

    Ok(info)
}

// -----------------------------------------------------------------------------
// ImageBuilder
// -----------------------------------------------------------------------------

/// Puebla una imagen recién formateada. Todo se mantiene en memoria hasta
/// `finish`, que escribe directorios, tabla de inodos, bitmaps y superblock.
///
/// Además de las operaciones normales expone accesos crudos (`inode_mut`,
/// `mark_block`, `map_block`, ...) para fabricar imágenes corruptas.
pub struct ImageBuilder {
    bcache: Bcache,
    info: Superblock,
    inode_map: RawBitmap,
    block_map: RawBitmap,
    inodes: Vec<Inode>,
    entries: BTreeMap<u32, Vec<Dirent>>,
}

impl ImageBuilder {
    /// Formatea sobre un dispositivo en memoria del tamaño justo.
    pub fn new(opts: &MkfsOptions) -> Result<Self> {
        Self::on(Bcache::new(MemDevice::new(opts.device_blocks())), opts)
    }

    pub fn on(mut bcache: Bcache, opts: &MkfsOptions) -> Result<Self> {
        let info = format(&mut bcache, opts)?;
        let inode_map = RawBitmap::load(&bcache, info.ibm_block, info.inode_count)?;
        let block_map = RawBitmap::load(&bcache, info.abm_block, info.block_count)?;

        let mut inodes = Vec::with_capacity(info.inode_count as usize);
        let mut table_block = (u64::MAX, Vec::new());
        for ino in 0..info.inode_count {
            let (block, offset) = info.inode_location(ino);
            if table_block.0 != block {
                table_block = (block, bcache.read_block(block)?);
            }
            inodes.push(Inode::from_bytes(&table_block.1[offset..offset + INODE_SIZE]));
        }

        let mut entries = BTreeMap::new();
        entries.insert(ROOT_INO, dot_entries(ROOT_INO, ROOT_INO));

        Ok(Self {
            bcache,
            info,
            inode_map,
            block_map,
            inodes,
            entries,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.info
    }

    pub fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.info
    }

    pub fn inode(&self, ino: u32) -> &Inode {
        &self.inodes[ino as usize]
    }

    pub fn inode_mut(&mut self, ino: u32) -> &mut Inode {
        &mut self.inodes[ino as usize]
    }

    /// Reserva el primer inodo libre y actualiza el contador del superblock.
    pub fn alloc_inode(&mut self) -> Result<u32> {
        let ino = (1..self.info.inode_count)
            .find(|ino| !self.inode_map.get(*ino))
            .ok_or_else(|| FsckError::InvalidArgs("no quedan inodos libres".into()))?;
        self.inode_map.set(ino);
        self.info.alloc_inode_count += 1;
        Ok(ino)
    }

    /// Reserva el primer bloque de datos libre y actualiza el contador.
    pub fn alloc_block(&mut self) -> Result<u32> {
        let bno = (1..self.info.block_count)
            .find(|bno| !self.block_map.get(*bno))
            .ok_or_else(|| FsckError::InvalidArgs("no quedan bloques libres".into()))?;
        self.block_map.set(bno);
        self.info.alloc_block_count += 1;
        Ok(bno)
    }

    /// Marca o desmarca un bloque en el bitmap sin tocar contadores.
    pub fn mark_block(&mut self, bno: u32, allocated: bool) {
        if allocated {
            self.block_map.set(bno);
        } else {
            self.block_map.clear(bno);
        }
    }

    /// Marca o desmarca un inodo en el bitmap sin tocar contadores.
    pub fn mark_inode(&mut self, ino: u32, allocated: bool) {
        if allocated {
            self.inode_map.set(ino);
        } else {
            self.inode_map.clear(ino);
        }
    }

    /// Archivo regular de `blocks` bloques de datos contiguos en el espacio
    /// lógico, enlazado en `parent`.
    pub fn add_file(&mut self, parent: u32, name: &str, blocks: u32) -> Result<u32> {
        let ino = self.alloc_inode()?;
        let mut inode = Inode::new_file();
        inode.link_count = 1;
        inode.size = blocks as u64 * BLOCK_SIZE as u64;
        self.inodes[ino as usize] = inode;
        for n in 0..blocks {
            let bno = self.alloc_block()?;
            self.map_block(ino, n, bno)?;
        }
        self.add_entry(parent, ino, DIRENT_TYPE_FILE, name)?;
        Ok(ino)
    }

    pub fn add_dir(&mut self, parent: u32, name: &str) -> Result<u32> {
        let ino = self.alloc_inode()?;
        let mut inode = Inode::new_directory();
        inode.link_count = 1;
        inode.dirent_count = 2;
        self.inodes[ino as usize] = inode;
        self.entries.insert(ino, dot_entries(ino, parent));
        self.add_entry(parent, ino, DIRENT_TYPE_DIR, name)?;
        self.inodes[parent as usize].link_count += 1;
        Ok(ino)
    }

    /// Enlace duro adicional a un inodo existente. Sólo los archivos ganan un
    /// enlace; para directorios se deja el conteo intacto.
    pub fn link(&mut self, parent: u32, name: &str, ino: u32) -> Result<()> {
        let target = self.inodes[ino as usize];
        let kind = if target.is_directory() {
            DIRENT_TYPE_DIR
        } else {
            DIRENT_TYPE_FILE
        };
        self.add_entry(parent, ino, kind, name)?;
        if !target.is_directory() {
            self.inodes[ino as usize].link_count += 1;
        }
        Ok(())
    }

    /// Agrega un dirent crudo al final del directorio `parent`.
    pub fn add_entry(&mut self, parent: u32, ino: u32, kind: u8, name: &str) -> Result<()> {
        let entries = self
            .entries
            .get_mut(&parent)
            .ok_or_else(|| FsckError::InvalidArgs(format!("ino#{parent} no es un directorio")))?;
        entries.push(Dirent::new(ino, kind, name, 0));
        self.inodes[parent as usize].dirent_count += 1;
        Ok(())
    }

    /// Inodo sin enlaces, encadenado al final de la lista de desvinculados.
    pub fn add_unlinked(&mut self, kind: InodeKind, blocks: u32) -> Result<u32> {
        let ino = self.alloc_inode()?;
        let mut inode = match kind {
            InodeKind::File => Inode::new_file(),
            InodeKind::Directory => Inode::new_directory(),
        };
        inode.last_inode = self.info.unlinked_tail;
        self.inodes[ino as usize] = inode;
        if kind == InodeKind::File {
            self.inodes[ino as usize].size = blocks as u64 * BLOCK_SIZE as u64;
            for n in 0..blocks {
                let bno = self.alloc_block()?;
                self.map_block(ino, n, bno)?;
            }
        }

        if self.info.unlinked_tail == 0 {
            self.info.unlinked_head = ino;
        } else {
            self.inodes[self.info.unlinked_tail as usize].next_inode = ino;
        }
        self.info.unlinked_tail = ino;
        Ok(ino)
    }

    /// Apunta el bloque lógico `n` del inodo `ino` al bloque de datos `bno`,
    /// reservando los bloques indirectos que falten.
    pub fn map_block(&mut self, ino: u32, n: u32, bno: u32) -> Result<()> {
        let dpi = DIRECT_PER_INDIRECT;
        if n < DIRECT as u32 {
            let inode = &mut self.inodes[ino as usize];
            if inode.dnum[n as usize] == 0 && bno != 0 {
                inode.block_count += 1;
            }
            inode.dnum[n as usize] = bno;
            return Ok(());
        }

        let rel = n - DIRECT as u32;
        if rel < INDIRECT as u32 * dpi {
            let i = (rel / dpi) as usize;
            let ibno = match self.inodes[ino as usize].inum[i] {
                0 => {
                    let fresh = self.alloc_zeroed(ino)?;
                    self.inodes[ino as usize].inum[i] = fresh;
                    fresh
                }
                existing => existing,
            };
            return self.map_in(ino, ibno, rel % dpi, bno);
        }

        let rel = rel - INDIRECT as u32 * dpi;
        let i = (rel / (dpi * dpi)) as usize;
        if i >= DOUBLY_INDIRECT {
            return Err(FsckError::OutOfRange(format!("bloque lógico {n}")));
        }
        let rem = rel % (dpi * dpi);
        let dibno = match self.inodes[ino as usize].dinum[i] {
            0 => {
                let fresh = self.alloc_zeroed(ino)?;
                self.inodes[ino as usize].dinum[i] = fresh;
                fresh
            }
            existing => existing,
        };
        let ibno = match self.pointer(dibno, rem / dpi)? {
            0 => {
                let fresh = self.alloc_zeroed(ino)?;
                self.set_pointer(dibno, rem / dpi, fresh)?;
                fresh
            }
            existing => existing,
        };
        self.map_in(ino, ibno, rem % dpi, bno)
    }

    /// Escribe un puntero a dato dentro de un bloque indirecto.
    fn map_in(&mut self, ino: u32, container: u32, slot: u32, bno: u32) -> Result<()> {
        let old = self.set_pointer(container, slot, bno)?;
        if old == 0 && bno != 0 {
            self.inodes[ino as usize].block_count += 1;
        }
        Ok(())
    }

    fn alloc_zeroed(&mut self, ino: u32) -> Result<u32> {
        let bno = self.alloc_block()?;
        self.bcache.write_block(self.info.data_block(bno), &[])?;
        self.inodes[ino as usize].block_count += 1;
        Ok(bno)
    }

    fn pointer(&self, container: u32, slot: u32) -> Result<u32> {
        let block = self.bcache.read_block(self.info.data_block(container))?;
        Ok(get_u32(&block, slot as usize * 4))
    }

    /// Devuelve el valor anterior del puntero.
    fn set_pointer(&mut self, container: u32, slot: u32, bno: u32) -> Result<u32> {
        let physical = self.info.data_block(container);
        let mut block = self.bcache.read_block(physical)?;
        let old = get_u32(&block, slot as usize * 4);
        put_u32(&mut block, slot as usize * 4, bno);
        self.bcache.write_block(physical, &block)?;
        Ok(old)
    }

    /// Escribe el contenido de un directorio: los registros se empaquetan por
    /// bloque, el último de cada bloque se estira hasta el final y el último
    /// del directorio lleva `RECLEN_LAST`.
    fn write_directory(&mut self, dir: u32) -> Result<()> {
        let entries = self.entries.get(&dir).cloned().unwrap_or_default();

        let mut placed: Vec<(usize, usize, u32)> = Vec::with_capacity(entries.len());
        let mut blocks = 1usize;
        let mut off = 0usize;
        for de in &entries {
            let size = dirent_size(de.name.len() as u8) as usize;
            if off + size > BLOCK_SIZE {
                blocks += 1;
                off = 0;
            }
            placed.push((blocks - 1, off, size as u32));
            off += size;
        }
        if blocks > DIRECT {
            return Err(FsckError::InvalidArgs(format!(
                "ino#{dir}: el directorio no cabe en {DIRECT} bloques"
            )));
        }

        let mut data = vec![vec![0u8; BLOCK_SIZE]; blocks];
        for (k, de) in entries.iter().enumerate() {
            let (block, offset, size) = placed[k];
            let reclen = match placed.get(k + 1) {
                None => RECLEN_LAST | size,
                Some((next_block, _, _)) if *next_block != block => (BLOCK_SIZE - offset) as u32,
                Some(_) => size,
            };
            let mut record = de.clone();
            record.reclen = reclen;
            record.write_to(&mut data[block], offset);
        }

        for (n, block) in data.iter().enumerate() {
            let bno = match self.inodes[dir as usize].dnum[n] {
                0 => {
                    let fresh = self.alloc_block()?;
                    self.map_block(dir, n as u32, fresh)?;
                    fresh
                }
                existing => existing,
            };
            self.bcache.write_block(self.info.data_block(bno), block)?;
        }
        self.inodes[dir as usize].size = (blocks * BLOCK_SIZE) as u64;
        Ok(())
    }

    fn write_inode_table(&mut self) -> Result<()> {
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut current = None;
        for ino in 0..self.info.inode_count {
            let (physical, offset) = self.info.inode_location(ino);
            if current != Some(physical) {
                if let Some(prev) = current {
                    self.bcache.write_block(prev, &block)?;
                }
                block.fill(0);
                current = Some(physical);
            }
            block[offset..offset + INODE_SIZE].copy_from_slice(&self.inodes[ino as usize].to_bytes());
        }
        if let Some(prev) = current {
            self.bcache.write_block(prev, &block)?;
        }
        Ok(())
    }

    /// Vuelca todo a disco y devuelve el dispositivo.
    pub fn finish(mut self) -> Result<Bcache> {
        let dirs: Vec<u32> = self.entries.keys().copied().collect();
        for dir in dirs {
            self.write_directory(dir)?;
        }
        self.write_inode_table()?;
        self.inode_map.store(&mut self.bcache, self.info.ibm_block)?;
        self.block_map.store(&mut self.bcache, self.info.abm_block)?;
        self.info.update_checksum();
        write_superblock(&mut self.bcache, &self.info)?;
        Ok(self.bcache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minfs::Minfs;
    use crate::superblock::load_superblock;

    #[test]
    fn fresh_root_directory() {
        let bc = ImageBuilder::new(&MkfsOptions::default()).unwrap().finish().unwrap();
        let fs = Minfs::open(bc).unwrap();
        let root = fs.load_inode(ROOT_INO).unwrap();
        assert!(root.is_directory());
        assert_eq!(root.dnum[0], 1);
        assert_eq!(root.dirent_count, 2);
        assert_eq!(root.link_count, 1);
        assert_eq!(fs.info().alloc_block_count, 2);
    }

    #[test]
    fn files_past_direct_range_get_indirect_blocks() {
        let mut b = ImageBuilder::new(&MkfsOptions::default()).unwrap();
        let ino = b.add_file(ROOT_INO, "big", DIRECT as u32 + 3).unwrap();
        let inode = *b.inode(ino);
        assert_ne!(inode.inum[0], 0);
        // datos + el bloque indirecto
        assert_eq!(inode.block_count, DIRECT as u32 + 3 + 1);
    }

    #[test]
    fn doubly_indirect_mapping_counts_every_level() {
        let mut b = ImageBuilder::new(&MkfsOptions::default()).unwrap();
        let ino = b.add_file(ROOT_INO, "sparse", 0).unwrap();
        let n = DIRECT as u32 + INDIRECT as u32 * DIRECT_PER_INDIRECT + 5;
        let bno = b.alloc_block().unwrap();
        b.map_block(ino, n, bno).unwrap();
        let inode = *b.inode(ino);
        assert_ne!(inode.dinum[0], 0);
        // doble indirecto + indirecto + dato
        assert_eq!(inode.block_count, 3);
    }

    #[test]
    fn fvm_layout_is_valid() {
        let opts = MkfsOptions {
            data_blocks: 32,
            inodes: 64,
            fvm: true,
        };
        let bc = ImageBuilder::new(&opts).unwrap().finish().unwrap();
        let info = load_superblock(&bc).unwrap();
        assert!(info.is_fvm());
        assert_eq!(info.dat_block, FVM_BLOCK_DATA_START);
    }

    #[test]
    fn rejects_tiny_geometry() {
        let opts = MkfsOptions {
            data_blocks: 1,
            inodes: 8,
            fvm: false,
        };
        assert!(matches!(
            ImageBuilder::new(&opts),
            Err(FsckError::InvalidArgs(_))
        ));
    }
}
