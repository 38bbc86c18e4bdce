// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

/// Packs firmware images and metadata into an FPK container, optionally
/// encrypting and signing it as described by a JSON spec.
///
/// The spec may name key files; a key file that does not exist yet is
/// generated with a fresh random key and readable only by its owner.
#[derive(Parser, Debug)]
#[clap(name = "mkfpk", max_term_width = 80)]
struct Args {
    /// JSON spec describing the container
    spec: Option<PathBuf>,

    /// Path of the FPK file to write
    fpk: Option<PathBuf>,

    /// Directory that relative image and key-file paths are resolved against
    #[clap(env = "MKFPK_ROOT_DIR", default_value = ".")]
    root_dir: PathBuf,

    /// Build timestamp (seconds since the epoch) to record instead of the
    /// current time
    #[clap(long, env = "SOURCE_DATE_EPOCH")]
    timestamp: Option<u64>,

    /// Log each build step
    #[clap(long, short)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(
    spec: &Path,
    fpk: &Path,
    root_dir: &Path,
    timestamp: Option<u64>,
) -> Result<()> {
    fpktools::pack(spec, fpk, root_dir, timestamp)
        .with_context(|| format!("failed to build {}", fpk.display()))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let (Some(spec), Some(fpk)) = (&args.spec, &args.fpk) else {
        let _ = Args::command().print_help();
        return ExitCode::SUCCESS;
    };

    match run(spec, fpk, &args.root_dir, args.timestamp) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
