/*Interfaz que el fsck necesita del sistema de archivos:
superblock, inodos, bloques crudos y los dos bitmaps de asignación.
La implementa `Minfs` sobre un dispositivo real y `MockBackend` en las pruebas.
*/

use crate::error::Result;
use crate::format::{Inode, Superblock, BLOCK_SIZE};

use super::resolver::{AddressResolver, DataBlockReader};

pub trait FsckBackend: DataBlockReader {
    fn info(&self) -> &Superblock;

    /// Bloques del dispositivo.
    fn max_blocks(&self) -> u64;

    fn load_inode(&self, ino: u32) -> Result<Inode>;

    /// Bloque físico (superblock de respaldo, journal).
    fn read_block(&self, bno: u64) -> Result<Vec<u8>>;

    fn inode_allocated(&self, ino: u32) -> bool;

    fn block_allocated(&self, bno: u32) -> bool;

    /// Lee `buf.len()` bytes del contenido de `inode` a partir de `offset`,
    /// siguiendo el mapa lógico del archivo. Los huecos se leen como ceros y
    /// la lectura se corta en `inode.size`.
    fn read_internal(
        &self,
        resolver: &mut AddressResolver,
        inode: &Inode,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        if offset >= inode.size {
            return Ok(0);
        }
        let len = (inode.size - offset).min(buf.len() as u64) as usize;

        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let Ok(n) = u32::try_from(pos / BLOCK_SIZE as u64) else {
                break;
            };
            let within = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - within).min(len - done);

            match resolver.resolve(self, inode, n)? {
                Some(res) if res.bno != 0 => {
                    let block = self.read_dat(res.bno)?;
                    buf[done..done + chunk].copy_from_slice(&block[within..within + chunk]);
                }
                Some(_) => buf[done..done + chunk].fill(0),
                None => break,
            }
            done += chunk;
        }
        Ok(done)
    }
}
