//! setupforge - command line entry point
//!
//! Exit codes: 0 on success, 1 when the manifest violates a compile rule,
//! 2 for usage, configuration and I/O failures.

use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use setupforge::cli::{BuildArgs, Cli, Commands};
use setupforge::compiler::{compile_file, ResolvedPackage};
use setupforge::error::SetupForgeError;
use setupforge::wxs;

/// Initialize logging to stderr so stdout stays clean for resolved JSON.
///
/// `RUST_LOG` overrides the default level.
fn init_logger(quiet: bool) {
    let default_level = if quiet { "error" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.quiet);
    debug!("CLI arguments parsed");

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            if is_compile_error(&e) {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}

fn is_compile_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<SetupForgeError>()
            .is_some_and(|e| e.as_compile().is_some())
    })
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Compile {
            build,
            baseline,
            out,
            wxs,
        } => {
            let package = resolve(&build, baseline.as_deref())?;
            let json = package.to_json()?;
            let fingerprint = package.fingerprint()?;
            let wxs_source = match &wxs {
                Some(_) => Some(wxs::render(&package)?),
                None => None,
            };

            // Both files are fully written beside their targets before either
            // is moved into place
            let staged_json = out
                .as_deref()
                .map(|path| stage_output(path, &json))
                .transpose()?;
            let staged_wxs = match (&wxs, &wxs_source) {
                (Some(path), Some(source)) => Some(stage_output(path, source)?),
                _ => None,
            };
            match (&out, staged_json) {
                (Some(path), Some(staged)) => persist_output(staged, path)?,
                _ => print!("{}", json),
            }
            if let (Some(path), Some(staged)) = (&wxs, staged_wxs) {
                persist_output(staged, path)?;
            }

            match &out {
                Some(path) => {
                    println!("{}", path.display());
                    println!("sha256:{}", fingerprint);
                }
                None => info!("sha256:{}", fingerprint),
            }
            if let Some(path) = &wxs {
                info!("WiX source written to {:?}", path);
            }
            Ok(())
        }
        Commands::Validate { build, baseline } => {
            let package = resolve(&build, baseline.as_deref())?;
            println!(
                "✓ Manifest is valid: {} {} ({})",
                package.product.name,
                package.product.version,
                package.product.platform
            );
            println!("sha256:{}", package.fingerprint()?);
            Ok(())
        }
    }
}

/// Compile the manifest and apply the baseline rules when a baseline is given
fn resolve(build: &BuildArgs, baseline: Option<&Path>) -> anyhow::Result<ResolvedPackage> {
    info!("Compiling manifest: {:?}", build.manifest);
    let config = build.to_config();
    let package = compile_file(&build.manifest, &config)?;

    if let Some(path) = baseline {
        info!("Checking against baseline: {:?}", path);
        let previous = ResolvedPackage::load_baseline(path)?;
        package
            .check_baseline(&previous)
            .map_err(SetupForgeError::from)
            .with_context(|| format!("Baseline check against {:?} failed", path))?;
    }

    Ok(package)
}

/// Write `content` to a temporary file in the directory of `path`
fn stage_output(path: &Path, content: &str) -> anyhow::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temporary file for {:?}", path))?;
    staged
        .write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(staged)
}

fn persist_output(staged: NamedTempFile, path: &Path) -> anyhow::Result<()> {
    staged
        .persist(path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
