//! launchpack
//!
//! Packs compiled script bytecode into a copy of a prebuilt launcher stub,
//! producing a single native executable, and supervises that program when
//! the executable starts.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use launchpack::engine::CompiledProgram;
//! use launchpack::util::config::PackConfig;
//! use launchpack::util::diagnostic::Diagnostics;
//!
//! fn main() -> launchpack::Result<()> {
//!     let program = CompiledProgram::new(std::fs::read("game.bc")?);
//!     let mut diagnostics = Diagnostics::new();
//!     let report = launchpack::pack(
//!         &program,
//!         Path::new("game.nvgt"),
//!         &PackConfig::default(),
//!         &mut diagnostics,
//!     )?;
//!     println!("{}", report.success_message());
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod artifact;
pub mod codec;
pub mod engine;
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

use std::path::Path;

use tracing::{debug, error};

use crate::artifact::{ArtifactReader, ArtifactWriter, BuildReport, BuildResult};
use crate::engine::{EnginePropertyTable, ProgramSource, ScriptEngine};
use crate::runtime::{RunScheduler, FAILURE_EXIT_CODE};
use crate::util::config::PackConfig;
use crate::util::diagnostic::Diagnostics;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NAME: &str = "launchpack";

/// Pack `program` for `script` using `config`.
///
/// The engine property table is derived from `config.scripting` and the
/// debug flag.
pub fn pack<P: ProgramSource + ?Sized>(
    program: &P,
    script: &Path,
    config: &PackConfig,
    diagnostics: &mut Diagnostics,
) -> BuildResult<BuildReport> {
    debug!("packing {}", script.display());
    let properties = EnginePropertyTable::from_options(&config.scripting, config.build.debug);
    ArtifactWriter::new(config.build.clone())
        .properties(properties)
        .write(program, script, diagnostics)
}

/// Load the artifact behind `reader` into `engine` and run it. Returns the
/// process exit code.
///
/// Load errors are fatal and give the failure code; there is no partial
/// run.
pub fn launch<E: ScriptEngine>(
    reader: &ArtifactReader,
    engine: &mut E,
    diagnostics: &mut Diagnostics,
) -> i32 {
    if let Err(e) = reader.load(engine) {
        error!("{}", e);
        return e.exit_code();
    }

    let section = reader.path().display().to_string();
    match RunScheduler::new(engine).run(diagnostics, &section) {
        Ok(outcome) => outcome.exit_code,
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

/// [`launch`] against the running executable.
pub fn launch_current_exe<E: ScriptEngine>(
    engine: &mut E,
    diagnostics: &mut Diagnostics,
) -> i32 {
    match ArtifactReader::for_current_exe() {
        Ok(reader) => launch(&reader, engine, diagnostics),
        Err(e) => {
            error!("{}", e);
            FAILURE_EXIT_CODE
        }
    }
}
