// src/bcache.rs
//! Acceso a bloques crudos del dispositivo.
//!
//! `Bcache` es lo único que el checker necesita del dispositivo: leer y
//! escribir bloques completos de `BLOCK_SIZE` bytes por número de bloque.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{FsckError, Result};
use crate::format::BLOCK_SIZE;

pub trait BlockDevice {
    /// Lee el bloque `bno` completo en `buf` (`buf.len() == BLOCK_SIZE`).
    fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()>;

    /// Escribe el bloque `bno` completo desde `buf`.
    fn write_block(&mut self, bno: u64, buf: &[u8]) -> Result<()>;

    /// Cantidad de bloques direccionables.
    fn block_count(&self) -> u64;
}

fn check_range(bno: u64, block_count: u64) -> Result<()> {
    if bno >= block_count {
        return Err(FsckError::OutOfRange(format!(
            "bloque {} fuera del dispositivo ({} bloques)",
            bno, block_count
        )));
    }
    Ok(())
}

// -------------------- Dispositivo en memoria --------------------

/// Dispositivo disperso en memoria: los bloques nunca escritos se leen como
/// ceros, así que el layout FVM (regiones muy separadas) no cuesta memoria.
#[derive(Clone, Debug, Default)]
pub struct MemDevice {
    blocks: BTreeMap<u64, Vec<u8>>,
    block_count: u64,
}

impl MemDevice {
    pub fn new(block_count: u64) -> Self {
        Self {
            blocks: BTreeMap::new(),
            block_count,
        }
    }
}

impl BlockDevice for MemDevice {
    fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()> {
        check_range(bno, self.block_count)?;
        match self.blocks.get(&bno) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&mut self, bno: u64, buf: &[u8]) -> Result<()> {
        check_range(bno, self.block_count)?;
        self.blocks.insert(bno, buf.to_vec());
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

// -------------------- Dispositivo sobre archivo --------------------

/// Imagen de disco en un archivo regular (pread/pwrite).
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    block_count: u64,
}

impl FileDevice {
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let block_count = file.metadata()?.len() / BLOCK_SIZE as u64;
        Ok(Self { file, block_count })
    }

    /// Crea (o trunca) una imagen de `block_count` bloques. El archivo queda
    /// disperso, por lo que imágenes FVM grandes no ocupan espacio real.
    pub fn create(path: &Path, block_count: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_count * BLOCK_SIZE as u64)?;
        Ok(Self { file, block_count })
    }
}

impl BlockDevice for FileDevice {
    fn read_block(&self, bno: u64, buf: &mut [u8]) -> Result<()> {
        check_range(bno, self.block_count)?;
        self.file.read_exact_at(buf, bno * BLOCK_SIZE as u64)?;
        Ok(())
    }

    fn write_block(&mut self, bno: u64, buf: &[u8]) -> Result<()> {
        check_range(bno, self.block_count)?;
        self.file.write_all_at(buf, bno * BLOCK_SIZE as u64)?;
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

// -------------------- Bcache --------------------

/// Caché de bloques: dueño del dispositivo durante toda la corrida de fsck.
pub struct Bcache {
    device: Box<dyn BlockDevice>,
}

impl Bcache {
    pub fn new<D: BlockDevice + 'static>(device: D) -> Self {
        Self {
            device: Box::new(device),
        }
    }

    /// Lee un bloque completo y lo devuelve en un buffer nuevo.
    pub fn read_block(&self, bno: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.device.read_block(bno, &mut buf)?;
        Ok(buf)
    }

    /// Escribe `data` en el bloque `bno`, rellenando con ceros si es más corto.
    pub fn write_block(&mut self, bno: u64, data: &[u8]) -> Result<()> {
        if data.len() == BLOCK_SIZE {
            return self.device.write_block(bno, data);
        }
        if data.len() > BLOCK_SIZE {
            return Err(FsckError::InvalidArgs(format!(
                "escritura de {} bytes no cabe en un bloque",
                data.len()
            )));
        }
        let mut buf = vec![0u8; BLOCK_SIZE];
        buf[..data.len()].copy_from_slice(data);
        self.device.write_block(bno, &buf)
    }

    pub fn max_blocks(&self) -> u64 {
        self.device.block_count()
    }
}
