// src/superblock.rs
//! Validación, carga y reparación del superblock.

use tracing::{debug, error, info, warn};

use crate::bcache::Bcache;
use crate::bitmap::RawBitmap;
use crate::error::{FsckError, Result};
use crate::format::{
    Superblock, BACKUP_SUPERBLOCK_BLOCKS, BLOCK_SIZE, FVM_SUPERBLOCK_BACKUP, INODE_SIZE,
    MINFS_FORMAT_VERSION, MINFS_MAGIC0, MINFS_MAGIC1, MIN_JOURNAL_BLOCKS,
    NON_FVM_SUPERBLOCK_BACKUP, SUPERBLOCK_START,
};

pub fn dump_superblock(info: &Superblock) {
    debug!(
        magic0 = format_args!("{:#018x}", info.magic0),
        magic1 = format_args!("{:#018x}", info.magic1),
        version = info.format_version,
        flags = format_args!("{:#x}", info.flags),
        block_size = info.block_size,
        inode_size = info.inode_size,
        "minfs: superblock"
    );
    debug!(
        data_blocks = info.block_count,
        inodes = info.inode_count,
        allocated_blocks = info.alloc_block_count,
        allocated_inodes = info.alloc_inode_count,
        "minfs: contadores"
    );
    debug!(
        ibm_block = info.ibm_block,
        abm_block = info.abm_block,
        ino_block = info.ino_block,
        integrity_start_block = info.integrity_start_block,
        dat_block = info.dat_block,
        slice_size = info.slice_size,
        unlinked_head = info.unlinked_head,
        unlinked_tail = info.unlinked_tail,
        checksum = format_args!("{:#010x}", info.checksum),
        "minfs: layout"
    );
}

/// Verifica que `info` describa un minfs válido para un dispositivo de
/// `max_blocks` bloques.
pub fn check_superblock(info: &Superblock, max_blocks: u64) -> Result<()> {
    dump_superblock(info);

    if info.magic0 != MINFS_MAGIC0 || info.magic1 != MINFS_MAGIC1 {
        error!("minfs: magic incorrecto: {:#x}, {:#x}", info.magic0, info.magic1);
        return Err(FsckError::WrongType(format!(
            "magic {:#x}/{:#x}",
            info.magic0, info.magic1
        )));
    }

    if info.format_version != MINFS_FORMAT_VERSION {
        error!(
            "minfs: versión de formato {} (el driver soporta {})",
            info.format_version, MINFS_FORMAT_VERSION
        );
        return Err(FsckError::NotSupported(format!(
            "versión de formato {}",
            info.format_version
        )));
    }

    if info.block_size as usize != BLOCK_SIZE || info.inode_size as usize != INODE_SIZE {
        error!(
            "minfs: bsz/isz {}/{} no soportados",
            info.block_size, info.inode_size
        );
        return Err(FsckError::DataIntegrity(format!(
            "bsz/isz {}/{} no soportados",
            info.block_size, info.inode_size
        )));
    }

    if !info.checksum_ok() {
        error!(
            "minfs: checksum incorrecto (guardado {:#x}, calculado {:#x})",
            info.checksum,
            info.compute_checksum()
        );
        return Err(FsckError::DataIntegrity("checksum del superblock".into()));
    }

    if info.block_count == 0 || info.inode_count == 0 {
        return Err(FsckError::DataIntegrity(format!(
            "geometría vacía: {} bloques, {} inodos",
            info.block_count, info.inode_count
        )));
    }

    if info.alloc_block_count > info.block_count || info.alloc_inode_count > info.inode_count {
        return Err(FsckError::DataIntegrity(format!(
            "contadores de asignación imposibles: {}/{} bloques, {}/{} inodos",
            info.alloc_block_count, info.block_count, info.alloc_inode_count, info.inode_count
        )));
    }

    check_layout(info, max_blocks)
}

fn check_layout(info: &Superblock, max_blocks: u64) -> Result<()> {
    let overlap = |what: &str| {
        error!("minfs: la región de {} invade la siguiente", what);
        FsckError::BadState(format!("región de {} superpuesta", what))
    };

    if info.ibm_block as u64 + info.inode_bitmap_blocks() as u64 > info.abm_block as u64 {
        return Err(overlap("bitmap de inodos"));
    }
    if info.abm_block as u64 + info.block_bitmap_blocks() as u64 > info.ino_block as u64 {
        return Err(overlap("bitmap de bloques"));
    }
    let ino_end = info.ino_block as u64 + info.inode_table_blocks() as u64;
    let journal_end =
        info.integrity_start_block as u64 + (BACKUP_SUPERBLOCK_BLOCKS + MIN_JOURNAL_BLOCKS) as u64;

    if info.is_fvm() {
        if info.slice_size == 0 || info.slice_size as usize % BLOCK_SIZE != 0 {
            error!("minfs: slice_size {} inválido", info.slice_size);
            return Err(FsckError::DataIntegrity(format!(
                "slice_size {}",
                info.slice_size
            )));
        }
        if info.integrity_start_block as u64 != FVM_SUPERBLOCK_BACKUP {
            return Err(FsckError::BadState(format!(
                "región de integridad en {} (esperado {})",
                info.integrity_start_block, FVM_SUPERBLOCK_BACKUP
            )));
        }
        if ino_end > info.integrity_start_block as u64 {
            return Err(overlap("tabla de inodos"));
        }
        if journal_end > info.dat_block as u64 {
            error!("minfs: journal demasiado pequeño");
            return Err(FsckError::BadState("journal demasiado pequeño".into()));
        }
    } else {
        if info.integrity_start_block as u64 != NON_FVM_SUPERBLOCK_BACKUP {
            return Err(FsckError::BadState(format!(
                "región de integridad en {} (esperado {})",
                info.integrity_start_block, NON_FVM_SUPERBLOCK_BACKUP
            )));
        }
        if journal_end > info.ibm_block as u64 {
            error!("minfs: journal demasiado pequeño");
            return Err(FsckError::BadState("journal demasiado pequeño".into()));
        }
        if ino_end > info.dat_block as u64 {
            return Err(overlap("tabla de inodos"));
        }
        if info.dat_block as u64 + info.block_count as u64 > max_blocks {
            error!(
                "minfs: demasiado grande para el dispositivo ({} + {} > {})",
                info.dat_block, info.block_count, max_blocks
            );
            return Err(FsckError::InvalidArgs(format!(
                "{} bloques de datos no caben en {} bloques",
                info.block_count, max_blocks
            )));
        }
    }
    Ok(())
}

/// Lee y valida el superblock primario.
pub fn load_superblock(bcache: &Bcache) -> Result<Superblock> {
    let block = bcache.read_block(SUPERBLOCK_START).map_err(|e| {
        error!("minfs: no se pudo leer el bloque de superblock: {e}");
        e
    })?;
    let info = Superblock::from_bytes(&block);
    if let Err(e) = check_superblock(&info, bcache.max_blocks()) {
        error!("minfs: superblock primario inválido: {e}");
        return Err(e);
    }
    Ok(info)
}

/// Escribe `info` en la ubicación primaria y en la de respaldo.
pub fn write_superblock(bcache: &mut Bcache, info: &Superblock) -> Result<()> {
    let block = info.to_block();
    bcache.write_block(SUPERBLOCK_START, &block)?;
    bcache.write_block(info.backup_location(), &block)?;
    Ok(())
}

/// Recalcula `alloc_block_count`/`alloc_inode_count` contando los bits de los
/// bitmaps en disco, sin confiar en los contadores guardados.
pub fn reconstruct_alloc_counts(bcache: &Bcache, info: &mut Superblock) -> Result<()> {
    let blocks = RawBitmap::load(bcache, info.abm_block, info.block_count)?;
    let inodes = RawBitmap::load(bcache, info.ibm_block, info.inode_count)?;

    let alloc_blocks = blocks.count_ones();
    let alloc_inodes = inodes.count_ones();
    if alloc_blocks != info.alloc_block_count || alloc_inodes != info.alloc_inode_count {
        warn!(
            "minfs: contadores reconstruidos: bloques {} -> {}, inodos {} -> {}",
            info.alloc_block_count, alloc_blocks, info.alloc_inode_count, alloc_inodes
        );
    }
    info.alloc_block_count = alloc_blocks;
    info.alloc_inode_count = alloc_inodes;
    Ok(())
}

fn read_backup(bcache: &Bcache, location: u64, expect_fvm: bool, max_blocks: u64) -> Option<Superblock> {
    let block = match bcache.read_block(location) {
        Ok(b) => b,
        Err(e) => {
            debug!("minfs: no se pudo leer el respaldo en {location}: {e}");
            return None;
        }
    };
    let backup = Superblock::from_bytes(&block);
    if backup.is_fvm() != expect_fvm {
        debug!("minfs: el respaldo en {location} no corresponde a su layout");
        return None;
    }
    match check_superblock(&backup, max_blocks) {
        Ok(()) => Some(backup),
        Err(e) => {
            debug!("minfs: respaldo en {location} inválido: {e}");
            None
        }
    }
}

/// Reconstruye el superblock primario a partir de la copia de respaldo.
///
/// Prueba primero la ubicación FVM y luego la no-FVM. Los contadores de
/// asignación se recalculan desde los bitmaps y el resultado se escribe en
/// ambas ubicaciones.
pub fn repair_superblock(bcache: &mut Bcache, max_blocks: u64) -> Result<Superblock> {
    let mut backup = read_backup(bcache, FVM_SUPERBLOCK_BACKUP, true, max_blocks)
        .or_else(|| read_backup(bcache, NON_FVM_SUPERBLOCK_BACKUP, false, max_blocks))
        .ok_or_else(|| {
            error!("minfs: no hay superblock de respaldo válido");
            FsckError::BadState("no hay superblock de respaldo válido".into())
        })?;

    reconstruct_alloc_counts(bcache, &mut backup)?;
    backup.update_checksum();
    write_superblock(bcache, &backup)?;

    info!(
        "minfs: superblock reparado desde el respaldo en {}",
        backup.backup_location()
    );
    Ok(backup)
}

/// Bytes de datos en uso según el superblock.
pub fn used_data_size(bcache: &Bcache) -> Result<u64> {
    let info = load_superblock(bcache)?;
    Ok(info.alloc_block_count as u64 * info.block_size as u64)
}

pub fn used_inodes(bcache: &Bcache) -> Result<u64> {
    let info = load_superblock(bcache)?;
    Ok(info.alloc_inode_count as u64)
}

/// Datos en uso más el espacio de los inodos asignados.
pub fn used_size(bcache: &Bcache) -> Result<u64> {
    let info = load_superblock(bcache)?;
    Ok(info.alloc_block_count as u64 * info.block_size as u64
        + info.alloc_inode_count as u64 * info.inode_size as u64)
}
