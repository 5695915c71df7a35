// src/fsck/mod.rs
//! Verificación de consistencia de minfs.
//!
//! `run_fsck` toma el dispositivo, valida (o repara) el superblock, recorre el
//! árbol desde la raíz y corre las pasadas globales. Devuelve siempre el
//! dispositivo junto con el reporte; `fsck` es la variante que sólo devuelve
//! el dispositivo si todo está en orden.

pub mod checker;
pub mod fsck_backend;
pub mod fsck_types;
pub mod invariants;
pub mod ledger;
pub mod resolver;

#[cfg(test)]
pub mod mock;

use tracing::{error, info, warn};

use crate::bcache::Bcache;
use crate::error::{FsckError, Result};
use crate::minfs::Minfs;
use crate::superblock::{load_superblock, repair_superblock};

use self::checker::Checker;
use self::fsck_types::{FsckOptions, FsckReport};

/// Resultado completo de una corrida.
pub struct FsckOutcome {
    pub bcache: Bcache,
    pub report: FsckReport,
    pub result: Result<()>,
}

impl FsckOutcome {
    fn failed(bcache: Bcache, mut report: FsckReport, err: FsckError) -> Self {
        report.record_fatal(err.to_string());
        Self {
            bcache,
            report,
            result: Err(err),
        }
    }
}

pub fn run_fsck(mut bcache: Bcache, options: &FsckOptions) -> FsckOutcome {
    let mut report = FsckReport::new();

    let info = match load_superblock(&bcache) {
        Ok(info) => info,
        Err(e) if options.may_repair() => {
            warn!("fsck: superblock primario inválido ({e}), reparando desde el respaldo");
            let max_blocks = bcache.max_blocks();
            match repair_superblock(&mut bcache, max_blocks) {
                Ok(info) => {
                    report.superblock_repaired = true;
                    info
                }
                Err(e) => {
                    error!("fsck: no se pudo reparar el superblock: {e}");
                    return FsckOutcome::failed(bcache, report, e);
                }
            }
        }
        Err(e) => {
            error!("fsck: superblock primario inválido: {e}");
            return FsckOutcome::failed(bcache, report, e);
        }
    };

    let (inode_allocator, block_allocator) = match Minfs::load_allocators(&bcache, &info) {
        Ok(parts) => parts,
        Err(e) => return FsckOutcome::failed(bcache, report, e),
    };
    let minfs = Minfs::from_parts(bcache, info, inode_allocator, block_allocator);

    let mut checker = Checker::new(minfs, *options);
    let result = checker.run();
    let (minfs, mut walked) = checker.into_parts();
    walked.superblock_repaired = report.superblock_repaired;

    match &result {
        Ok(()) if !options.quiet => info!("fsck: sistema de archivos consistente"),
        Ok(()) => {}
        Err(e) => error!("fsck: falló: {e}"),
    }

    FsckOutcome {
        bcache: minfs.into_bcache(),
        report: walked,
        result,
    }
}

/// Verifica el dispositivo y lo devuelve si no hay inconsistencias.
pub fn fsck(bcache: Bcache, options: &FsckOptions) -> Result<Bcache> {
    let outcome = run_fsck(bcache, options);
    outcome.result.map(|()| outcome.bcache)
}
