// src/fsck/resolver.rs
//! Traducción de bloque lógico a bloque de datos a través de los punteros
//! directos, indirectos y doble-indirectos del inodo.

use crate::error::Result;
use crate::format::{get_u32, Inode, DIRECT, DIRECT_PER_INDIRECT, DOUBLY_INDIRECT, INDIRECT};

/// Lectura de bloques de la región de datos (números relativos a `dat_block`).
pub trait DataBlockReader {
    fn read_dat(&self, bno: u32) -> Result<Vec<u8>>;
}

/// Resultado de resolver el bloque lógico `n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Bloque de datos (0 = sin asignar).
    pub bno: u32,
    /// Siguiente índice lógico que vale la pena consultar. Cuando falta un
    /// bloque indirecto salta todo el rango que ese bloque cubriría.
    pub next: u32,
}

/// Último bloque de punteros leído, identificado por su número.
#[derive(Clone, Debug, Default)]
struct PointerBlock {
    slot: Option<(u32, Vec<u8>)>,
}

impl PointerBlock {
    fn entry<R: DataBlockReader + ?Sized>(
        &mut self,
        reader: &R,
        bno: u32,
        index: u32,
    ) -> Result<u32> {
        let hit = matches!(&self.slot, Some((cached, _)) if *cached == bno);
        if !hit {
            self.slot = Some((bno, reader.read_dat(bno)?));
        }
        match &self.slot {
            Some((_, data)) => Ok(get_u32(data, index as usize * 4)),
            None => Ok(0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AddressResolver {
    doubly: PointerBlock,
    indirect: PointerBlock,
    /// Primer número de bloque fuera de la región de datos. Un puntero a un
    /// bloque de punteros `>= limit` se trata como ausente.
    limit: u32,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::bounded(u32::MAX)
    }
}

impl AddressResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver que no sigue bloques de punteros fuera de `0..block_count`.
    pub fn bounded(block_count: u32) -> Self {
        Self {
            doubly: PointerBlock::default(),
            indirect: PointerBlock::default(),
            limit: block_count,
        }
    }

    /// El bloque de punteros `bno` se puede leer.
    pub fn follows(&self, bno: u32) -> bool {
        bno != 0 && bno < self.limit
    }

    /// Descarta los bloques de punteros en caché.
    pub fn invalidate(&mut self) {
        self.doubly.slot = None;
        self.indirect.slot = None;
    }

    /// Resuelve el bloque lógico `n` de `inode`. Devuelve `None` cuando `n`
    /// queda fuera del rango direccionable por los tres niveles.
    pub fn resolve<R: DataBlockReader + ?Sized>(
        &mut self,
        reader: &R,
        inode: &Inode,
        n: u32,
    ) -> Result<Option<Resolution>> {
        let dpi = DIRECT_PER_INDIRECT;

        if n < DIRECT as u32 {
            return Ok(Some(Resolution {
                bno: inode.dnum[n as usize],
                next: n + 1,
            }));
        }

        // Indirectos simples.
        let rel = n - DIRECT as u32;
        if rel < INDIRECT as u32 * dpi {
            let i = rel / dpi;
            let ibno = inode.inum[i as usize];
            if !self.follows(ibno) {
                return Ok(Some(Resolution {
                    bno: 0,
                    next: DIRECT as u32 + (i + 1) * dpi,
                }));
            }
            let bno = self.indirect.entry(reader, ibno, rel % dpi)?;
            return Ok(Some(Resolution { bno, next: n + 1 }));
        }

        // Doble indirectos.
        let base = DIRECT as u32 + INDIRECT as u32 * dpi;
        let rel = rel - INDIRECT as u32 * dpi;
        let span = dpi * dpi;
        if rel >= DOUBLY_INDIRECT as u32 * span {
            return Ok(None);
        }
        let i = rel / span;
        let dibno = inode.dinum[i as usize];
        if !self.follows(dibno) {
            return Ok(Some(Resolution {
                bno: 0,
                next: base + (i + 1) * span,
            }));
        }
        let rem = rel % span;
        let ibno = self.doubly.entry(reader, dibno, rem / dpi)?;
        if !self.follows(ibno) {
            return Ok(Some(Resolution {
                bno: 0,
                next: base + i * span + (rem / dpi + 1) * dpi,
            }));
        }
        let bno = self.indirect.entry(reader, ibno, rem % dpi)?;
        Ok(Some(Resolution { bno, next: n + 1 }))
    }
}
