// src/error.rs
use libc::{EBADF, EINVAL, EIO, ENOTSUP, ERANGE, EUCLEAN};
use thiserror::Error;

/// Errores fatales del chequeo: abortan la corrida completa de fsck.
///
/// Las inconsistencias "no conformes" (bloques doblemente asignados, contadores
/// que no cuadran, etc.) no pasan por aquí: se acumulan en el reporte.
#[derive(Debug, Error)]
pub enum FsckError {
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
    #[error("integridad de datos comprometida: {0}")]
    DataIntegrity(String),
    #[error("estado inconsistente: {0}")]
    BadState(String),
    #[error("fuera de rango: {0}")]
    OutOfRange(String),
    #[error("no es un sistema de archivos minfs: {0}")]
    WrongType(String),
    #[error("versión no soportada: {0}")]
    NotSupported(String),
    #[error("argumentos inválidos: {0}")]
    InvalidArgs(String),
}

impl FsckError {
    pub fn as_errno(&self) -> i32 {
        match self {
            FsckError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            FsckError::DataIntegrity(_) => EUCLEAN,
            FsckError::BadState(_) => EBADF,
            FsckError::OutOfRange(_) => ERANGE,
            FsckError::WrongType(_) => EINVAL,
            FsckError::NotSupported(_) => ENOTSUP,
            FsckError::InvalidArgs(_) => EINVAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsckError>;
