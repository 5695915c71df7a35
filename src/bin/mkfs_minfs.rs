use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use minfs::{format, Bcache, FileDevice, MkfsOptions};

const USAGE: &str = "Uso: mkfs.minfs <imagen> <bloques-de-datos> <inodos> [--fvm]";

fn parse_count(arg: Option<String>, what: &str) -> Result<u32> {
    let raw = arg.with_context(|| format!("falta {what}\n{USAGE}"))?;
    raw.parse::<u32>()
        .with_context(|| format!("{what} inválido: {raw:?}"))
}

fn main() -> Result<()> {
    // 1. Leer argumentos
    let mut args = env::args().skip(1);
    let image = args.next().map(PathBuf::from).context(USAGE)?;
    let data_blocks = parse_count(args.next(), "bloques de datos")?;
    let inodes = parse_count(args.next(), "inodos")?;

    let mut opts = MkfsOptions {
        data_blocks,
        inodes,
        fvm: false,
    };
    for extra in args {
        match extra.as_str() {
            "--fvm" => opts.fvm = true,
            other => return Err(anyhow!("argumento desconocido {other}\n{USAGE}")),
        }
    }

    // 2. Crear la imagen con el tamaño justo (dispersa en disco)
    let device = FileDevice::create(&image, opts.device_blocks())
        .with_context(|| format!("No se pudo crear la imagen {:?}", image))?;
    let mut bcache = Bcache::new(device);

    // 3. Formatear
    let info = format(&mut bcache, &opts)
        .with_context(|| format!("No se pudo formatear {:?}", image))?;

    println!(
        "mkfs.minfs: minfs creado con {} bloques de datos, {} inodos{} (datos desde el bloque {}).",
        info.block_count,
        info.inode_count,
        if info.is_fvm() { ", layout FVM" } else { "" },
        info.dat_block
    );

    Ok(())
}
