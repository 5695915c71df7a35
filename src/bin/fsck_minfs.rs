use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Context, Result};
use colored::*;
use tracing_subscriber::EnvFilter;

use minfs::{run_fsck, Bcache, FileDevice, FsckOptions, FsckReport};

const USAGE: &str = "Uso: fsck.minfs <imagen> [--read-only] [--repair] [--quiet]";

fn default_env_filter(quiet: bool) -> EnvFilter {
    let fallback = if quiet { "error" } else { "warn" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn init_logging(quiet: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(default_env_filter(quiet))
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init()
        .map_err(|err| anyhow!("no se pudo inicializar el logger: {err}"))
}

fn parse_args() -> Result<(PathBuf, FsckOptions)> {
    let mut image = None;
    let mut options = FsckOptions::default();

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--read-only" => options.read_only = true,
            "--repair" => options.repair = true,
            "--quiet" | "-q" => options.quiet = true,
            flag if flag.starts_with('-') => {
                return Err(anyhow!("opción desconocida {flag}\n{USAGE}"));
            }
            path if image.is_none() => image = Some(PathBuf::from(path)),
            _ => return Err(anyhow!("demasiados argumentos\n{USAGE}")),
        }
    }

    let image = image.context(USAGE)?;
    Ok((image, options))
}

fn print_report(rep: &FsckReport, quiet: bool) {
    println!("\n{}", " MINFS FILESYSTEM CHECK ".on_blue().bold());
    println!("{}", "──────────────────────────────────────────".blue());

    if rep.superblock_repaired {
        println!(
            "  {} Superblock primario reparado desde el respaldo",
            "!".yellow().bold()
        );
    }

    // ------------------------------------------
    //       RESULTADOS DE BLOQUES
    // ------------------------------------------
    println!("\n{}", "Bloques".bold().underline());
    if rep.blocks_ok {
        println!("  {} Bloques OK", "✓".green());
    } else {
        println!("  {} Errores en bloques", "✗".red());
    }
    if !quiet {
        println!(
            "    en uso: {}  directorio: {}  indirectos: {}  doblemente asignados: {}",
            rep.stats.alloc_blocks,
            rep.stats.directory_blocks,
            rep.stats.indirect_blocks,
            rep.stats.double_allocated
        );
    }

    // ------------------------------------------
    //       RESULTADOS DE INODOS
    // ------------------------------------------
    println!("\n{}", "Inodos".bold().underline());
    if rep.inodes_ok {
        println!("  {} Inodos OK", "✓".green());
    } else {
        println!("  {} Errores en inodos", "✗".red());
    }
    if !quiet {
        println!(
            "    en uso: {}  desvinculados: {}",
            rep.stats.alloc_inodes, rep.stats.unlinked_inodes
        );
    }

    // ------------------------------------------
    //       ERRORES DETALLADOS
    // ------------------------------------------
    println!("\n{}", "Errores detectados".bold().underline());
    if rep.errors.is_empty() {
        println!("  {} No se encontraron errores", "✓".green());
    } else {
        for err in &rep.errors {
            println!("  {} {}", "•".red(), err.red());
        }
    }
}

fn main() -> Result<()> {
    let (image, options) = parse_args()?;
    init_logging(options.quiet)?;

    let writable = options.may_repair();
    let device = FileDevice::open(&image, writable)
        .with_context(|| format!("No se pudo abrir la imagen {:?}", image))?;

    let outcome = run_fsck(Bcache::new(device), &options);
    print_report(&outcome.report, options.quiet);

    // ------------------------------------------
    //       RESUMEN FINAL
    // ------------------------------------------
    println!("\n{}", "Resumen".bold().underline());
    match outcome.result {
        Ok(()) => {
            println!("{} Sistema de archivos limpio.\n", "✓ OK".green().bold());
            Ok(())
        }
        Err(err) => {
            println!(
                "{} {} ({} problemas registrados).\n",
                "✗ FSCK completado con errores:".red().bold(),
                err.to_string().yellow(),
                outcome.report.errors.len()
            );
            process::exit(err.as_errno());
        }
    }
}
