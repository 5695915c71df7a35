/*Pasadas posteriores al recorrido del árbol:
lista de inodos desvinculados, bloques e inodos marcados en uso sin dueño,
balance de enlaces, contadores del superblock e integridad del respaldo
y del journal. */

use tracing::{error, warn};

use crate::error::{FsckError, Result};
use crate::format::{JournalInfo, Superblock, JOURNAL_MAGIC};
use crate::superblock::check_superblock;

use super::checker::Checker;
use super::fsck_backend::FsckBackend;

impl<B: FsckBackend> Checker<B> {
    /// Recorre la lista de desvinculados desde `unlinked_head`. Cada inodo debe
    /// tener `link_count == 0` y apuntar hacia atrás al anterior; la cola debe
    /// coincidir con `unlinked_tail`.
    pub fn check_unlinked_inodes(&mut self) -> Result<()> {
        let info = *self.backend.info();
        let mut last = 0u32;
        let mut next = info.unlinked_head;
        let mut count = 0u32;

        while next != 0 {
            let inode = self.get_inode(next)?;
            if inode.link_count != 0 {
                error!(
                    "check: ino#{next} está en la lista de desvinculados con link_count {}",
                    inode.link_count
                );
                return Err(FsckError::BadState(format!(
                    "ino#{next}: desvinculado con link_count {}",
                    inode.link_count
                )));
            }
            if inode.last_inode != last {
                error!(
                    "check: ino#{next}: last_inode {} pero el anterior es {last}",
                    inode.last_inode
                );
                return Err(FsckError::BadState(format!(
                    "ino#{next}: last_inode {} (esperado {last})",
                    inode.last_inode
                )));
            }

            // Ningún directorio lo nombra: se compensa la visita.
            self.links[next as usize] = -1;
            self.check_inode(next, 0, false)?;

            count += 1;
            last = next;
            next = inode.next_inode;
        }

        if info.unlinked_tail != last {
            error!(
                "check: unlinked_tail {} pero la lista termina en {last}",
                info.unlinked_tail
            );
            return Err(FsckError::BadState(format!(
                "unlinked_tail {} (esperado {last})",
                info.unlinked_tail
            )));
        }

        self.report.stats.unlinked_inodes = count;
        if count > 0 && !self.options.quiet {
            warn!("check: {count} inodos desvinculados pendientes de liberar");
        }
        Ok(())
    }

    /// Bloques marcados en el bitmap que nadie reclamó.
    fn unused_blocks(&self) -> Vec<u32> {
        (0..self.backend.info().block_count)
            .filter(|bno| self.backend.block_allocated(*bno) && !self.ledger.is_claimed(*bno))
            .collect()
    }

    /// Inodos marcados en el bitmap que el recorrido nunca alcanzó.
    fn unused_inodes(&self) -> Vec<u32> {
        (0..self.backend.info().inode_count)
            .filter(|ino| self.backend.inode_allocated(*ino) && !self.checked_inodes.get(*ino))
            .collect()
    }

    fn unused_verdict(missing: usize, what: &str) -> Result<()> {
        if missing == 0 {
            return Ok(());
        }
        error!("check: {missing} {what} marcados en uso sin dueño");
        Err(FsckError::BadState(format!(
            "{missing} {what} marcados en uso sin dueño"
        )))
    }

    pub fn check_for_unused_blocks(&mut self) -> Result<()> {
        let missing = self.unused_blocks();
        for bno in &missing {
            self.flag_block(format!("bloque {bno} marcado en uso pero sin dueño"));
        }
        Self::unused_verdict(missing.len(), "bloques")
    }

    pub fn check_for_unused_inodes(&mut self) -> Result<()> {
        let missing = self.unused_inodes();
        for ino in &missing {
            self.flag_inode(format!("ino#{ino} marcado en uso pero inalcanzable"));
        }
        Self::unused_verdict(missing.len(), "inodos")
    }

    pub fn check_links(&mut self) -> Result<()> {
        let off: Vec<(u32, i64)> = self
            .links
            .iter()
            .enumerate()
            .filter(|(_, balance)| **balance != 0)
            .map(|(ino, balance)| (ino as u32, *balance))
            .collect();
        for (ino, balance) in &off {
            self.flag_inode(format!("ino#{ino}: link_count incorrecto ({balance:+})"));
        }
        if off.is_empty() {
            return Ok(());
        }
        Err(FsckError::BadState(format!(
            "{} inodos con link_count incorrecto",
            off.len()
        )))
    }

    /// Los totales del recorrido deben coincidir con los del superblock.
    pub fn check_allocated_counts(&mut self) -> Result<()> {
        let info = *self.backend.info();
        let blocks = self.ledger.claimed_count();
        let mut ok = true;

        if info.alloc_block_count != blocks {
            self.flag_block(format!(
                "alloc_block_count del superblock es {} pero hay {} bloques en uso",
                info.alloc_block_count, blocks
            ));
            ok = false;
        }
        if info.alloc_inode_count != self.alloc_inodes {
            self.flag_inode(format!(
                "alloc_inode_count del superblock es {} pero hay {} inodos en uso",
                info.alloc_inode_count, self.alloc_inodes
            ));
            ok = false;
        }

        if ok {
            Ok(())
        } else {
            Err(FsckError::BadState("contadores de asignación incorrectos".into()))
        }
    }

    /// Journal (magic y checksum) y superblock de respaldo.
    pub fn check_superblock_integrity(&mut self) -> Result<()> {
        let info = *self.backend.info();

        let journal = JournalInfo::from_bytes(&self.backend.read_block(info.journal_start_block())?);
        if journal.magic != JOURNAL_MAGIC {
            self.flag_block(format!("journal: magic incorrecto {:#x}", journal.magic));
            return Err(FsckError::DataIntegrity("magic del journal".into()));
        }
        if journal.checksum != journal.compute_checksum() {
            self.flag_block(format!(
                "journal: checksum {:#x}, calculado {:#x}",
                journal.checksum,
                journal.compute_checksum()
            ));
            return Err(FsckError::DataIntegrity("checksum del journal".into()));
        }

        let backup = Superblock::from_bytes(&self.backend.read_block(info.backup_location())?);
        if backup.is_fvm() != info.is_fvm() {
            self.flag_block("superblock de respaldo: layout FVM no coincide".into());
            return Err(FsckError::BadState("layout del respaldo".into()));
        }
        if let Err(e) = check_superblock(&backup, self.backend.max_blocks()) {
            self.flag_block(format!("superblock de respaldo inválido: {e}"));
            return Err(e);
        }
        Ok(())
    }

    /// Lista cada bloque reclamado más de una vez con todos sus dueños.
    pub fn report_double_allocations(&mut self) {
        let doubles: Vec<String> = self
            .ledger
            .double_allocated()
            .map(|(bno, claims)| {
                let owners: Vec<String> = claims.iter().map(ToString::to_string).collect();
                format!(
                    "bloque {bno} asignado {} veces: {}",
                    claims.len(),
                    owners.join(", ")
                )
            })
            .collect();
        self.report.stats.double_allocated = doubles.len() as u32;
        for msg in doubles {
            self.flag_block(msg);
        }
    }
}
