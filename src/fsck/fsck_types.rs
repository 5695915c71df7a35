/*Tipos compartidos por el fsck de minfs:
BlockInfo / BlockKind (quién reclama cada bloque)
FsckOptions (cómo se corre)
FsckReport + FsckStats (qué se encontró) */

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Direct,
    Indirect,
    DoublyIndirect,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Direct => "directo",
            BlockKind::Indirect => "indirecto",
            BlockKind::DoublyIndirect => "doble indirecto",
        };
        f.write_str(name)
    }
}

/// Un reclamo sobre un bloque de datos: dueño, índice lógico y nivel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub owner: u32,
    pub offset: u32,
    pub kind: BlockKind,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ino#{} off {} ({})", self.owner, self.offset, self.kind)
    }
}

/// Por defecto no se repara nada: la reparación hay que pedirla.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsckOptions {
    /// No escribir nunca en el dispositivo.
    pub read_only: bool,
    /// Reparar el superblock desde el respaldo si el primario es inválido.
    pub repair: bool,
    /// Sin mensajes informativos.
    pub quiet: bool,
}

impl FsckOptions {
    pub fn may_repair(&self) -> bool {
        self.repair && !self.read_only
    }
}

/// Totales del recorrido (informativos, no se comparan con el superblock
/// salvo `alloc_inodes` / `alloc_blocks`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsckStats {
    pub alloc_inodes: u32,
    pub alloc_blocks: u32,
    pub directory_blocks: u32,
    pub indirect_blocks: u32,
    pub unlinked_inodes: u32,
    pub double_allocated: u32,
}

#[derive(Debug, Default)]
pub struct FsckReport {
    pub blocks_ok: bool,
    pub inodes_ok: bool,
    pub errors: Vec<String>,
    pub stats: FsckStats,
    pub superblock_repaired: bool,
}

impl FsckReport {
    pub fn new() -> Self {
        Self {
            blocks_ok: true,
            inodes_ok: true,
            ..Self::default()
        }
    }

    /// Sin inconsistencias registradas.
    pub fn is_conforming(&self) -> bool {
        self.blocks_ok && self.inodes_ok && self.errors.is_empty()
    }

    /// Registra un problema de bloques. Devuelve `false` si el mismo mensaje
    /// ya estaba registrado.
    pub fn flag_block(&mut self, msg: String) -> bool {
        self.blocks_ok = false;
        self.push(msg)
    }

    pub fn flag_inode(&mut self, msg: String) -> bool {
        self.inodes_ok = false;
        self.push(msg)
    }

    /// Error que abortó el recorrido.
    pub fn record_fatal(&mut self, msg: String) {
        self.push(format!("fatal: {msg}"));
    }

    fn push(&mut self, msg: String) -> bool {
        if self.errors.contains(&msg) {
            return false;
        }
        self.errors.push(msg);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_messages_are_kept_once() {
        let mut rep = FsckReport::new();
        assert!(rep.is_conforming());
        assert!(rep.flag_inode("ino#3: dirent_count".into()));
        assert!(!rep.flag_inode("ino#3: dirent_count".into()));
        assert_eq!(rep.errors.len(), 1);
        assert!(!rep.inodes_ok);
        assert!(rep.blocks_ok);
    }

    #[test]
    fn repair_needs_write_access() {
        assert!(!FsckOptions::default().may_repair());
        let opts = FsckOptions {
            repair: true,
            ..FsckOptions::default()
        };
        assert!(opts.may_repair());
        let opts = FsckOptions {
            read_only: true,
            ..opts
        };
        assert!(!opts.may_repair());
    }

    #[test]
    fn block_info_display() {
        let info = BlockInfo {
            owner: 4,
            offset: 16,
            kind: BlockKind::Indirect,
        };
        assert_eq!(info.to_string(), "ino#4 off 16 (indirecto)");
    }
}
