/*EL CHECKER PRINCIPAL DEL FSCK. Recorre el árbol desde el inodo raíz:
valida cada inodo, reclama sus bloques en el ledger, recorre los directorios
y lleva el balance de enlaces. Las pasadas globales posteriores al recorrido
viven en invariants.rs */

use tracing::{debug, error, info, warn};

use crate::bitmap::RawBitmap;
use crate::error::{FsckError, Result};
use crate::format::{
    dirent_size, get_u32, Dirent, DirentHeader, Inode, InodeKind, BLOCK_SIZE, DIRECT,
    DIRECT_PER_INDIRECT, DIRENT_ALIGNMENT, DIRENT_HEADER_SIZE, INDIRECT, MAX_DIRENT_SIZE, ROOT_INO,
};

use super::fsck_backend::FsckBackend;
use super::fsck_types::{BlockInfo, BlockKind, FsckOptions, FsckReport};
use super::ledger::BlockLedger;
use super::resolver::AddressResolver;

/// Qué hace una pasada sobre un directorio: `dump` registra cada entrada,
/// `recurse` baja a los inodos que nombran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryPass {
    pub dump: bool,
    pub recurse: bool,
}

impl DirectoryPass {
    pub const DUMP: Self = Self {
        dump: true,
        recurse: false,
    };
    pub const RECURSE: Self = Self {
        dump: false,
        recurse: true,
    };
}

pub struct Checker<B: FsckBackend> {
    pub(super) backend: B,
    pub(super) options: FsckOptions,
    pub(super) resolver: AddressResolver,
    pub(super) ledger: BlockLedger,
    pub(super) checked_inodes: RawBitmap,
    /// Referencias vistas menos `link_count` declarado; debe terminar en 0.
    pub(super) links: Vec<i64>,
    pub(super) alloc_inodes: u32,
    pub(super) report: FsckReport,
}

impl<B: FsckBackend> Checker<B> {
    pub fn new(backend: B, options: FsckOptions) -> Self {
        let info = *backend.info();
        Self {
            backend,
            options,
            resolver: AddressResolver::bounded(info.block_count),
            ledger: BlockLedger::new(info.block_count),
            checked_inodes: RawBitmap::new(info.inode_count),
            links: vec![0; info.inode_count as usize],
            alloc_inodes: 0,
            report: FsckReport::new(),
        }
    }

    pub fn report(&self) -> &FsckReport {
        &self.report
    }

    pub fn ledger(&self) -> &BlockLedger {
        &self.ledger
    }

    pub fn link_balance(&self, ino: u32) -> i64 {
        self.links.get(ino as usize).copied().unwrap_or(0)
    }

    pub fn is_checked(&self, ino: u32) -> bool {
        self.checked_inodes.get(ino)
    }

    /// Inodos visitados (incluye el reservado).
    pub fn alloc_inodes(&self) -> u32 {
        self.alloc_inodes
    }

    /// Devuelve el backend y el reporte con las estadísticas completas.
    pub fn into_parts(mut self) -> (B, FsckReport) {
        let stats = &mut self.report.stats;
        stats.alloc_inodes = self.alloc_inodes;
        stats.alloc_blocks = self.ledger.claimed_count();
        stats.indirect_blocks = self.ledger.indirect_count();
        stats.double_allocated = self.ledger.double_allocated().count() as u32;
        (self.backend, self.report)
    }

    pub(super) fn flag_block(&mut self, msg: String) {
        if self.report.flag_block(msg.clone()) {
            warn!("check: {msg}");
        }
    }

    pub(super) fn flag_inode(&mut self, msg: String) {
        if self.report.flag_inode(msg.clone()) {
            warn!("check: {msg}");
        }
    }

    // -------------------------------------------------------------------------
    // Recorrido completo
    // -------------------------------------------------------------------------

    /// Corre todas las verificaciones. Un error fatal corta el recorrido; las
    /// pasadas globales se corren todas aunque alguna falle.
    pub fn run(&mut self) -> Result<()> {
        self.check_reserved();

        let walk = self
            .check_inode(ROOT_INO, ROOT_INO, false)
            .and_then(|()| self.check_unlinked_inodes());
        if let Err(e) = walk {
            error!("check: recorrido abortado: {e}");
            self.report.record_fatal(e.to_string());
            return Err(e);
        }

        let passes = [
            self.check_for_unused_blocks(),
            self.check_for_unused_inodes(),
            self.check_links(),
            self.check_allocated_counts(),
            self.check_superblock_integrity(),
        ];
        self.report_double_allocations();

        if !self.options.quiet {
            info!(
                inodes = self.alloc_inodes,
                blocks = self.ledger.claimed_count(),
                indirect = self.ledger.indirect_count(),
                directory_blocks = self.report.stats.directory_blocks,
                "check: recorrido terminado"
            );
        }

        for pass in passes {
            pass?;
        }
        if !self.report.is_conforming() {
            return Err(FsckError::BadState(format!(
                "sistema de archivos no conforme ({} problemas)",
                self.report.errors.len()
            )));
        }
        Ok(())
    }

    /// Inodo 0 y bloque de datos 0 son reservados: deben estar marcados en
    /// uso y cuentan en los totales.
    pub fn check_reserved(&mut self) {
        if !self.backend.inode_allocated(0) {
            self.flag_inode("inodo reservado 0 no está marcado en uso".into());
        }
        if !self.backend.block_allocated(0) {
            self.flag_block("bloque reservado 0 no está marcado en uso".into());
        }
        self.checked_inodes.set(0);
        self.alloc_inodes += 1;
        self.ledger.claim_reserved();
    }

    /// Carga un inodo alcanzable: debe existir y ser archivo o directorio.
    pub fn get_inode(&self, ino: u32) -> Result<Inode> {
        if ino >= self.backend.info().inode_count {
            error!("check: ino#{ino} fuera de rango");
            return Err(FsckError::DataIntegrity(format!("ino#{ino} fuera de rango")));
        }
        let inode = self.backend.load_inode(ino)?;
        if inode.kind().is_none() {
            error!("check: ino#{ino}: magic inválido {:#010x}", inode.magic);
            return Err(FsckError::DataIntegrity(format!(
                "ino#{ino}: magic {:#010x}",
                inode.magic
            )));
        }
        Ok(inode)
    }

    pub fn check_inode(&mut self, ino: u32, parent: u32, dot_or_dotdot: bool) -> Result<()> {
        let inode = self.get_inode(ino)?;
        let kind = inode.kind();

        if ino == ROOT_INO && kind != Some(InodeKind::Directory) {
            error!("check: el inodo raíz no es un directorio");
            return Err(FsckError::DataIntegrity("el inodo raíz no es un directorio".into()));
        }

        if self.checked_inodes.get(ino) {
            if inode.is_directory() && !dot_or_dotdot {
                error!("check: ino#{ino}: directorio con más de un enlace duro");
                return Err(FsckError::BadState(format!(
                    "ino#{ino}: directorio con más de un enlace duro"
                )));
            }
            self.links[ino as usize] += 1;
            return Ok(());
        }

        self.checked_inodes.set(ino);
        self.alloc_inodes += 1;
        self.links[ino as usize] += 1 - inode.link_count as i64;

        if !self.backend.inode_allocated(ino) {
            self.flag_inode(format!("ino#{ino}: no está marcado en uso"));
        }

        match kind {
            Some(InodeKind::Directory) => {
                self.check_file(&inode, ino)?;
                self.check_directory(&inode, ino, parent, DirectoryPass::DUMP)?;
                self.check_directory(&inode, ino, parent, DirectoryPass::RECURSE)?;
            }
            _ => self.check_file(&inode, ino)?,
        }
        Ok(())
    }

    fn claim(&mut self, bno: u32, info: BlockInfo) {
        let backend = &self.backend;
        let verdict = self
            .ledger
            .claim_block(bno, info, |b| backend.block_allocated(b));
        if let Some(msg) = verdict {
            self.flag_block(format!(
                "ino#{}: bloque {} (@{}, {}): {}",
                info.owner, bno, info.offset, info.kind, msg
            ));
        }
    }

    /// Reclama todos los bloques del inodo (punteros y datos) y compara con
    /// `block_count` y `size`.
    pub fn check_file(&mut self, inode: &Inode, ino: u32) -> Result<()> {
        self.resolver.invalidate();
        let dpi = DIRECT_PER_INDIRECT;
        let mut blocks_allocated = 0u32;

        for (i, &ibno) in inode.inum.iter().enumerate() {
            if ibno != 0 {
                blocks_allocated += 1;
                let info = BlockInfo {
                    owner: ino,
                    offset: DIRECT as u32 + i as u32 * dpi,
                    kind: BlockKind::Indirect,
                };
                self.claim(ibno, info);
            }
        }

        let base = DIRECT as u32 + INDIRECT as u32 * dpi;
        for (i, &dibno) in inode.dinum.iter().enumerate() {
            if dibno == 0 {
                continue;
            }
            blocks_allocated += 1;
            let first = base + i as u32 * dpi * dpi;
            let info = BlockInfo {
                owner: ino,
                offset: first,
                kind: BlockKind::DoublyIndirect,
            };
            self.claim(dibno, info);
            if !self.resolver.follows(dibno) {
                // ya quedó reportado por el ledger
                continue;
            }

            let entries = self.backend.read_dat(dibno)?;
            for j in 0..dpi {
                let ibno = get_u32(&entries, j as usize * 4);
                if ibno != 0 {
                    blocks_allocated += 1;
                    let info = BlockInfo {
                        owner: ino,
                        offset: first + j * dpi,
                        kind: BlockKind::Indirect,
                    };
                    self.claim(ibno, info);
                }
            }
        }

        let mut n = 0u32;
        let mut next_blk = 0u32;
        let mut data_blocks = 0u32;
        while let Some(res) = self.resolver.resolve(&self.backend, inode, n)? {
            if res.bno != 0 {
                blocks_allocated += 1;
                data_blocks += 1;
                next_blk = n + 1;
                let info = BlockInfo {
                    owner: ino,
                    offset: n,
                    kind: BlockKind::Direct,
                };
                self.claim(res.bno, info);
            }
            n = res.next;
        }

        if next_blk as u64 > inode.size.div_ceil(BLOCK_SIZE as u64) {
            self.flag_inode(format!(
                "ino#{ino}: tiene bloques más allá de su tamaño ({} bloques, {} bytes)",
                next_blk, inode.size
            ));
        }
        if blocks_allocated != inode.block_count {
            self.flag_block(format!(
                "ino#{ino}: block_count {} pero se encontraron {} bloques",
                inode.block_count, blocks_allocated
            ));
        }
        if inode.is_directory() {
            self.report.stats.directory_blocks += data_blocks;
        }
        Ok(())
    }

    /// Recorre los dirents del directorio leyendo su contenido como el de un
    /// archivo cualquiera.
    pub fn check_directory(
        &mut self,
        inode: &Inode,
        ino: u32,
        parent: u32,
        pass: DirectoryPass,
    ) -> Result<()> {
        let mut off: u64 = 0;
        let mut eno: u32 = 0;
        let mut dirent_count: u32 = 0;
        let mut dot = false;
        let mut dotdot = false;

        loop {
            let mut raw = [0u8; DIRENT_HEADER_SIZE as usize];
            let got = self
                .backend
                .read_internal(&mut self.resolver, inode, &mut raw, off)?;

            if got == 0 && off == 0 && inode.link_count == 0 && parent == 0 {
                // Directorio desvinculado y vacío.
                return Ok(());
            }
            if got != raw.len() {
                error!("check: ino#{ino}: no se pudo leer de[{eno}] en {off}");
                if inode.link_count == 0 && inode.dirent_count != 0 {
                    self.flag_inode(format!(
                        "ino#{ino}: desvinculado pero con {} dirents",
                        inode.dirent_count
                    ));
                }
                return Err(FsckError::DataIntegrity(format!(
                    "ino#{ino}: de[{eno}] ilegible en {off}"
                )));
            }

            let header = DirentHeader::from_bytes(&raw);
            let rlen = header.reserved_size(off);
            let dlen = dirent_size(header.namelen);
            if rlen < DIRENT_HEADER_SIZE
                || dlen > rlen
                || dlen > MAX_DIRENT_SIZE
                || rlen % DIRENT_ALIGNMENT != 0
            {
                error!(
                    "check: ino#{ino}: de[{eno}]: reclen {:#x} inválido (namelen {})",
                    header.reclen, header.namelen
                );
                return Err(FsckError::DataIntegrity(format!(
                    "ino#{ino}: de[{eno}]: reclen {:#x} inválido",
                    header.reclen
                )));
            }

            if header.ino != 0 {
                let mut record = vec![0u8; dlen as usize];
                let got = self
                    .backend
                    .read_internal(&mut self.resolver, inode, &mut record, off)?;
                if got != record.len() {
                    error!("check: ino#{ino}: no se pudo leer el nombre de de[{eno}]");
                    return Err(FsckError::DataIntegrity(format!(
                        "ino#{ino}: de[{eno}] truncado en {off}"
                    )));
                }
                let de = Dirent::from_bytes(&record);

                if pass.dump {
                    debug!(
                        "ino#{ino}: de[{eno}]: ino={} type={} '{}'{}",
                        de.ino,
                        de.kind,
                        de.name_lossy(),
                        if header.is_last() { " [last]" } else { "" }
                    );
                }

                let is_dot = de.is_dot();
                let is_dotdot = de.is_dotdot();
                if is_dot {
                    if dot {
                        self.flag_inode(format!("ino#{ino}: más de un '.'"));
                    }
                    dot = true;
                    if de.ino != ino {
                        self.flag_inode(format!(
                            "ino#{ino}: '.' apunta a ino#{} en vez de a sí mismo",
                            de.ino
                        ));
                    }
                }
                if is_dotdot {
                    if dotdot {
                        self.flag_inode(format!("ino#{ino}: más de un '..'"));
                    }
                    dotdot = true;
                    if de.ino != parent {
                        self.flag_inode(format!(
                            "ino#{ino}: '..' apunta a ino#{} en vez de a ino#{parent}",
                            de.ino
                        ));
                    }
                }

                if pass.recurse && de.ino != ino {
                    self.check_inode(de.ino, ino, is_dot || is_dotdot)?;
                }
                dirent_count += 1;
            }

            if header.is_last() {
                break;
            }
            off += rlen as u64;
            eno += 1;
        }

        if dirent_count != inode.dirent_count {
            self.flag_inode(format!(
                "ino#{ino}: dirent_count {} pero hay {} entradas",
                inode.dirent_count, dirent_count
            ));
        }
        if inode.link_count == 0 && inode.dirent_count != 0 {
            self.flag_inode(format!(
                "ino#{ino}: desvinculado pero con {} dirents",
                inode.dirent_count
            ));
        }
        if inode.link_count > 0 && (!dot || !dotdot) {
            self.flag_inode(format!("ino#{ino}: le falta '.' o '..'"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{put_u32, MAGIC_PURGED};
    use crate::fsck::mock::MockBackend;

    fn checker(mock: MockBackend) -> Checker<MockBackend> {
        let mut chk = Checker::new(mock, FsckOptions::default());
        chk.check_reserved();
        chk
    }

    #[test]
    fn single_file_balances_links() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_file(2, &[5]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "a.txt")]);

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert_eq!(chk.link_balance(2), 0);
        assert_eq!(chk.link_balance(ROOT_INO), 0);
        assert_eq!(chk.alloc_inodes(), 3);
        assert!(chk.report().is_conforming(), "{:?}", chk.report().errors);
        assert_eq!(chk.ledger().claimed_count(), 3);
    }

    #[test]
    fn directory_hard_link_is_fatal() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(4, 4, &[(4, "."), (2, "..")]);
        mock.put_dir(2, 2, &[(2, "."), (1, ".."), (4, "x")]);
        mock.put_dir(3, 3, &[(3, "."), (1, ".."), (4, "y")]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "d"), (3, "e")]);
        mock.inodes.get_mut(&4).unwrap().link_count = 2;

        let mut chk = checker(mock);
        let err = chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap_err();
        assert!(matches!(err, FsckError::BadState(_)));
    }

    #[test]
    fn nested_directories_balance_through_dotdot() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(3, 3, &[(3, "."), (2, "..")]);
        mock.put_dir(2, 2, &[(2, "."), (1, ".."), (3, "inner")]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "outer")]);
        mock.inodes.get_mut(&1).unwrap().link_count = 2;
        mock.inodes.get_mut(&2).unwrap().link_count = 2;

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        for ino in 1..=3 {
            assert_eq!(chk.link_balance(ino), 0, "ino#{ino}");
        }
        assert!(chk.report().is_conforming(), "{:?}", chk.report().errors);
    }

    #[test]
    fn wrong_block_count_is_flagged_not_fatal() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_file(2, &[5]);
        mock.inodes.get_mut(&2).unwrap().block_count = 2;
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "a")]);

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert!(!chk.report().blocks_ok);
        assert!(chk.report().errors[0].contains("block_count 2"));
    }

    #[test]
    fn blocks_past_size_are_flagged() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_file(2, &[5, 6]);
        mock.inodes.get_mut(&2).unwrap().size = 10;
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "a")]);

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert!(!chk.report().inodes_ok);
    }

    #[test]
    fn shared_block_is_double_allocated() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_file(2, &[5]);
        mock.put_file(3, &[5]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "a"), (3, "b")]);

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert_eq!(chk.ledger().claims(5).len(), 2);
        assert!(chk
            .report()
            .errors
            .iter()
            .any(|e| e.contains("double-allocated")));
    }

    #[test]
    fn corrupt_reclen_is_fatal() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(1, 1, &[(1, "."), (1, "..")]);
        // reclen del primer registro desalineado
        put_u32(mock.blocks.get_mut(&1).unwrap(), 4, 13);

        let mut chk = checker(mock);
        let err = chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap_err();
        assert!(matches!(err, FsckError::DataIntegrity(_)));
    }

    #[test]
    fn duplicate_dot_and_bad_dotdot_are_lenient() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(2, 2, &[(2, "."), (2, "."), (3, "..")]);
        mock.put_dir(3, 3, &[(3, "."), (1, "..")]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "d")]);

        let mut chk = checker(mock);
        let err = chk.check_inode(ROOT_INO, ROOT_INO, false);
        // '..' de ino#2 lleva a ino#3 como si fuera su padre: se reporta, no aborta
        assert!(err.is_ok());
        let errors = &chk.report().errors;
        assert!(errors.iter().any(|e| e.contains("más de un '.'")));
        assert!(errors.iter().any(|e| e.contains("'..' apunta a ino#3")));
    }

    #[test]
    fn pointer_blocks_out_of_range_are_flagged_and_skipped() {
        let mut mock = MockBackend::new(16, 64);
        let mut pointers = vec![0u8; BLOCK_SIZE];
        put_u32(&mut pointers, 0, 300);
        mock.put_block(7, pointers);

        let mut broken = Inode::new_file();
        broken.link_count = 1;
        broken.inum[0] = 100;
        broken.dinum[0] = 7;
        broken.block_count = 3;
        mock.put_inode(2, broken);
        mock.put_file(3, &[5]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "roto"), (3, "sano")]);

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert!(chk.is_checked(3));
        assert!(chk.ledger().is_claimed(5));
        assert!(chk.ledger().is_claimed(7));
        let errors = &chk.report().errors;
        assert!(errors
            .iter()
            .any(|e| e.contains("bloque 100 (@16, indirecto): out of range")));
        assert!(errors.iter().any(|e| e.contains("bloque 300") && e.contains("out of range")));
        assert_eq!(errors.len(), 2, "{errors:?}");
    }

    #[test]
    fn dirent_count_mismatch_is_flagged() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_file(2, &[5]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "a")]);
        mock.inodes.get_mut(&1).unwrap().dirent_count = 5;

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert!(chk.is_checked(2));
        assert!(chk
            .report()
            .errors
            .iter()
            .any(|e| e.contains("ino#1: dirent_count 5 pero hay 3 entradas")));
    }

    #[test]
    fn linked_directory_without_dotdot_is_flagged() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(2, 2, &[(2, ".")]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "d")]);
        mock.inodes.get_mut(&1).unwrap().link_count = 2;

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert!(!chk.report().inodes_ok);
        assert!(chk
            .report()
            .errors
            .iter()
            .any(|e| e.contains("ino#2: le falta '.' o '..'")));
    }

    #[test]
    fn unlinked_directory_with_entries_is_flagged() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(3, 3, &[(3, ".")]);
        mock.inodes.get_mut(&3).unwrap().link_count = 0;

        let mut chk = checker(mock);
        let inode = chk.get_inode(3).unwrap();
        chk.check_directory(&inode, 3, 0, DirectoryPass::DUMP).unwrap();
        let errors = &chk.report().errors;
        assert!(errors
            .iter()
            .any(|e| e.contains("ino#3: desvinculado pero con 1 dirents")));
        // sin enlaces no se exige '..'
        assert!(!errors.iter().any(|e| e.contains("le falta")));
    }

    #[test]
    fn reachable_inode_missing_from_bitmap_is_flagged() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_file(2, &[5]);
        mock.put_file(3, &[6]);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "a"), (3, "b")]);
        mock.inode_bitmap[2] = false;

        let mut chk = checker(mock);
        chk.check_inode(ROOT_INO, ROOT_INO, false).unwrap();
        assert!(chk.is_checked(3));
        assert_eq!(chk.alloc_inodes(), 4);
        assert!(chk
            .report()
            .errors
            .iter()
            .any(|e| e.contains("ino#2: no está marcado en uso")));
    }

    #[test]
    fn root_must_be_directory() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_file(1, &[1]);
        let mut chk = checker(mock);
        assert!(matches!(
            chk.check_inode(ROOT_INO, ROOT_INO, false),
            Err(FsckError::DataIntegrity(_))
        ));
    }

    #[test]
    fn purged_inode_reached_from_tree_is_fatal() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (2, "gone")]);
        let mut purged = Inode::new_file();
        purged.magic = MAGIC_PURGED;
        mock.put_inode(2, purged);

        let mut chk = checker(mock);
        assert!(matches!(
            chk.check_inode(ROOT_INO, ROOT_INO, false),
            Err(FsckError::DataIntegrity(_))
        ));
    }

    #[test]
    fn out_of_range_dirent_target_is_fatal() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_dir(1, 1, &[(1, "."), (1, ".."), (99, "lejos")]);
        let mut chk = checker(mock);
        assert!(matches!(
            chk.check_inode(ROOT_INO, ROOT_INO, false),
            Err(FsckError::DataIntegrity(_))
        ));
    }

    #[test]
    fn empty_unlinked_directory_is_valid() {
        let mut mock = MockBackend::new(16, 64);
        mock.put_inode(2, Inode::new_directory());
        let mut chk = checker(mock);
        let inode = chk.get_inode(2).unwrap();
        chk.check_directory(&inode, 2, 0, DirectoryPass::RECURSE).unwrap();
        assert!(chk.report().is_conforming());
    }

    #[test]
    fn leading_hole_in_directory_is_fatal() {
        let mut mock = MockBackend::new(16, 64);
        let mut entries = vec![0u8; BLOCK_SIZE];
        Dirent::new(1, 4, ".", 12).write_to(&mut entries, 0);
        Dirent::new(1, 4, "..", crate::format::RECLEN_LAST | 12).write_to(&mut entries, 12);
        mock.put_block(9, entries);
        let mut pointers = vec![0u8; BLOCK_SIZE];
        put_u32(&mut pointers, 0, 9);
        mock.put_block(8, pointers);

        // los bloques lógicos 0..16 son huecos y el contenido vive en el 16
        let mut root = Inode::new_directory();
        root.link_count = 1;
        root.dirent_count = 2;
        root.size = (DIRECT as u64 + 1) * BLOCK_SIZE as u64;
        root.inum[0] = 8;
        root.block_count = 2;
        mock.put_inode(1, root);

        // el primer registro leído es todo ceros: reclen 0
        let mut chk = checker(mock);
        assert!(matches!(
            chk.check_inode(ROOT_INO, ROOT_INO, false),
            Err(FsckError::DataIntegrity(_))
        ));
        // los bloques sí quedaron reclamados antes del recorrido de dirents
        assert!(chk.ledger().is_claimed(8));
        assert!(chk.ledger().is_claimed(9));
    }
}
