//! The `lyra` command-line driver

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::ProjectConfig;
use lyra_backend_x86::{backend_x86, BackendFlags};
use lyra_common::LyraError;
use lyra_frontend::{compile, CompileFlags, CompileOptions, PredeclaredVar};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "lyra", version, about = "Compiler for the Lyra language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source file to an executable image
    Build {
        /// Preprocessed source file
        input: PathBuf,
        /// Output path; defaults to the input with a .bin extension
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Attach source attribution to the binary
        #[arg(long)]
        debug: bool,
        /// Narrate register traffic with comment instructions
        #[arg(long)]
        comments: bool,
        /// Refuse imports of undefined functions
        #[arg(long)]
        no_import: bool,
        /// Ignore export keywords
        #[arg(long)]
        no_export: bool,
        /// Every function owns its stackframe
        #[arg(long)]
        no_frame_sharing: bool,
        /// Treat every variable as volatile
        #[arg(long)]
        all_volatile: bool,
        /// Page-align the data sections
        #[arg(long)]
        page_align: bool,
    },
    /// Parse and type-check without producing output
    Check {
        /// Preprocessed source file
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Build {
            input,
            output,
            debug,
            comments,
            no_import,
            no_export,
            no_frame_sharing,
            all_volatile,
            page_align,
        } => build(
            &input,
            output,
            BuildToggles {
                debug,
                comments,
                no_import,
                no_export,
                no_frame_sharing,
                all_volatile,
                page_align,
            },
        ),
        Command::Check { input } => check(&input),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

/// The single human-readable error line: source file, line number, byte
/// offset, and the text produced at the throw site.
fn report(err: &anyhow::Error) {
    if let Some(e) = err.downcast_ref::<PositionedError>() {
        if let Some(pos) = e.inner.pos() {
            eprintln!("{}:{}:{}: {}", e.path.display(), pos.line, pos.offset, e.inner);
            return;
        }
        eprintln!("{}: {}", e.path.display(), e.inner);
        return;
    }
    eprintln!("lyra: {err:#}");
}

/// A compiler error paired with the file it came from.
#[derive(Debug)]
struct PositionedError {
    path: PathBuf,
    inner: LyraError,
}

impl std::fmt::Display for PositionedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for PositionedError {}

struct BuildToggles {
    debug: bool,
    comments: bool,
    no_import: bool,
    no_export: bool,
    no_frame_sharing: bool,
    all_volatile: bool,
    page_align: bool,
}

fn options_for(input: &Path, toggles: &BuildToggles) -> Result<CompileOptions> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let project = ProjectConfig::load_near(input)?;

    let mut flags = CompileFlags::empty();
    if toggles.debug || project.build.debug_info {
        flags |= CompileFlags::GENERATE_DEBUG_INFO;
    }
    if toggles.comments || project.build.comments {
        flags |= CompileFlags::COMMENT;
    }
    if toggles.no_import || project.build.no_import {
        flags |= CompileFlags::NO_FUNCTION_IMPORT;
    }
    if toggles.no_export || project.build.no_export {
        flags |= CompileFlags::NO_FUNCTION_EXPORT;
    }
    if toggles.no_frame_sharing || project.build.no_frame_sharing {
        flags |= CompileFlags::NO_STACKFRAME_SHARING;
    }
    if toggles.all_volatile || project.build.all_volatile {
        flags |= CompileFlags::ALL_VAR_VOLATILE;
    }

    Ok(CompileOptions {
        source,
        path: input.display().to_string(),
        jumpcase_clog2sz: project.build.jumpcase_stride_log2,
        stackpage_alloc_provision: project.build.stackpage_provision,
        min_unused_regs: Default::default(),
        predeclared_vars: predeclared(),
        flags,
    })
}

/// Variables every program sees without declaring them; `arg` and `env`
/// are installed by the frontend itself, these are the driver's extras.
fn predeclared() -> Vec<PredeclaredVar> {
    Vec::new()
}

fn build(input: &Path, output: Option<PathBuf>, toggles: BuildToggles) -> Result<()> {
    let opts = options_for(input, &toggles)?;
    let path = input.to_path_buf();

    let compiled = compile(&opts).map_err(|e| PositionedError { path: path.clone(), inner: e })?;
    log::info!(
        "{}: {} functions, {} bytes of strings, {} bytes of globals",
        input.display(),
        compiled.module.funcs.len(),
        compiled.string_region.len(),
        compiled.global_region_size
    );

    let backend_flags = if toggles.page_align {
        BackendFlags::PAGEALIGNDATA
    } else {
        BackendFlags::ALIGN32
    };
    let binary =
        backend_x86(&compiled, backend_flags).map_err(|e| PositionedError { path, inner: e })?;

    let out_path = output.unwrap_or_else(|| input.with_extension("bin"));
    std::fs::write(&out_path, &binary.execbin)
        .with_context(|| format!("writing {}", out_path.display()))?;

    if !binary.export_info.is_empty() {
        std::fs::write(out_path.with_extension("exports"), &binary.export_info)?;
    }
    if !binary.import_info.is_empty() {
        std::fs::write(out_path.with_extension("imports"), &binary.import_info)?;
    }
    if !binary.debug_info.is_empty() {
        std::fs::write(out_path.with_extension("dbg"), &binary.debug_info)?;
    }

    log::info!(
        "{}: {} instruction bytes, {} string bytes, {} global bytes",
        out_path.display(),
        binary.executable_instrs_size,
        binary.constant_strings_size,
        binary.global_region_size
    );
    Ok(())
}

fn check(input: &Path) -> Result<()> {
    let toggles = BuildToggles {
        debug: false,
        comments: false,
        no_import: false,
        no_export: false,
        no_frame_sharing: false,
        all_volatile: false,
        page_align: false,
    };
    let opts = options_for(input, &toggles)?;
    let path = input.to_path_buf();
    compile(&opts).map_err(|e| PositionedError { path, inner: e })?;
    Ok(())
}
