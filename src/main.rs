//! launchpack - CLI

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use walkdir::WalkDir;

use launchpack::artifact::{ArtifactReader, ArtifactWriter, Platform};
use launchpack::engine::{CompiledProgram, EngineProperty, EnginePropertyTable, PROPERTY_COUNT};
use launchpack::util::config::{load_config, load_project_config, PackConfig};
use launchpack::util::diagnostic::Diagnostics;
use launchpack::util::logger;
use launchpack::{NAME, VERSION};

/// Packs compiled script bytecode into self-contained executables
#[derive(Parser, Debug)]
#[command(name = "launchpack")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./launchpack.toml, then the user config)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack a compiled bytecode file into an executable
    Pack {
        /// Compiled bytecode
        #[arg(value_name = "BYTECODE")]
        bytecode: PathBuf,

        /// Script path used for output naming and messages (defaults to BYTECODE)
        #[arg(short, long, value_name = "FILE")]
        script: Option<PathBuf>,

        /// Build directive, e.g. "platform windows" or "console"; repeatable
        #[arg(short = 'D', long = "directive", value_name = "TEXT")]
        directives: Vec<String>,

        /// Output basename
        #[arg(short, long, value_name = "NAME")]
        output: Option<String>,

        /// Target platform (windows, linux, mac or auto)
        #[arg(short, long)]
        platform: Option<String>,

        /// Compression level 0-9
        #[arg(short, long)]
        level: Option<u32>,

        /// Strip debug information
        #[arg(long)]
        release: bool,

        /// Use the console subsystem on Windows
        #[arg(long)]
        console: bool,

        /// Directory holding the launcher stubs
        #[arg(long, value_name = "DIR")]
        stub_dir: Option<PathBuf>,

        /// Resource file to embed; repeatable
        #[arg(short, long = "resource", value_name = "FILE")]
        resources: Vec<PathBuf>,

        /// Embed every file under this directory
        #[arg(long, value_name = "DIR")]
        resource_dir: Option<PathBuf>,

        /// Suppress the success message
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the data section of a packed executable
    Inspect {
        /// Packed executable
        #[arg(value_name = "FILE")]
        artifact: PathBuf,

        /// Platform the executable was built for (defaults to the host)
        #[arg(short, long)]
        platform: Option<String>,

        /// Number of engine properties stored in the artifact
        #[arg(long, default_value_t = PROPERTY_COUNT)]
        properties: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,

    /// Print version information
    Version,
}

#[derive(Debug, Serialize)]
struct Summary {
    path: PathBuf,
    platform: Platform,
    section_offset: u64,
    block_len: u64,
    bytecode_len: usize,
    resource_sizes: Vec<usize>,
    plugins: Vec<String>,
    properties: Vec<u64>,
}

fn main() {
    let args = Args::parse();

    if args.verbose {
        logger::init_debug();
    } else {
        logger::init_cli();
    }

    if let Err(e) = run(args) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Pack {
            bytecode,
            script,
            directives,
            output,
            platform,
            level,
            release,
            console,
            stub_dir,
            resources,
            resource_dir,
            quiet,
        } => {
            let mut config = effective_config(args.config.as_deref())?;
            let build = &mut config.build;
            build
                .apply_directives(directives.iter().map(String::as_str))
                .context("Invalid build directive")?;
            if let Some(name) = output {
                build.apply_directive(&format!("compiled_basename {}", name))?;
            }
            if let Some(name) = platform {
                build.apply_directive(&format!("platform {}", name))?;
            }
            if let Some(level) = level {
                build.apply_directive(&format!("bytecode_compression {}", level))?;
            }
            if console {
                build.console = true;
            }
            if release {
                build.debug = false;
            }
            if quiet {
                build.quiet = true;
            }
            if stub_dir.is_some() {
                build.stub_dir = stub_dir;
            }

            let program = CompiledProgram::new(
                fs::read(&bytecode)
                    .with_context(|| format!("Failed to read bytecode: {}", bytecode.display()))?,
            );
            let script = script.unwrap_or_else(|| bytecode.clone());

            let mut writer = ArtifactWriter::new(config.build.clone()).properties(
                EnginePropertyTable::from_options(&config.scripting, config.build.debug),
            );
            for path in collect_resources(&resources, resource_dir.as_deref())? {
                let data = fs::read(&path)
                    .with_context(|| format!("Failed to read resource: {}", path.display()))?;
                writer = writer.resource(data);
            }

            let mut diagnostics = Diagnostics::new();
            // the writer logs the success message itself
            if let Err(e) = writer.write(&program, &script, &mut diagnostics) {
                if let Some(report) = diagnostics.report(true) {
                    eprintln!("{}", report.title.red().bold());
                    eprint!("{}", report.body);
                }
                return Err(e).context("Build failed");
            }
        }
        Commands::Inspect {
            artifact,
            platform,
            properties,
            json,
        } => {
            let platform = match platform {
                Some(name) => name.parse::<Platform>().map_err(anyhow::Error::msg)?,
                None => match Platform::detect() {
                    Some(platform) => platform,
                    None => bail!("Unsupported host platform; pass --platform"),
                },
            };
            let decoded = ArtifactReader::open(&artifact, platform)
                .decode(properties)
                .with_context(|| format!("Failed to read {}", artifact.display()))?;

            let summary = Summary {
                path: artifact,
                platform,
                section_offset: decoded.section_offset,
                block_len: decoded.block_len,
                bytecode_len: decoded.bytecode.len(),
                resource_sizes: decoded.resources.iter().map(Vec::len).collect(),
                plugins: decoded
                    .plugins
                    .iter()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .collect(),
                properties: decoded.properties.values().to_vec(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Config => {
            let config = effective_config(args.config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

fn effective_config(path: Option<&Path>) -> Result<PackConfig> {
    let config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            load_project_config(&cwd).context("Failed to load config")?
        }
    };
    Ok(config)
}

/// Explicit files first, then the directory walk in file-name order.
fn collect_resources(
    files: &[PathBuf],
    dir: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let mut paths = files.to_vec();
    if let Some(dir) = dir {
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
    }
    Ok(paths)
}

fn print_summary(summary: &Summary) {
    println!("{} ({})", summary.path.display().bold(), summary.platform);
    println!("  section offset  {:#x}", summary.section_offset);
    println!("  block           {} bytes", summary.block_len);
    println!("  bytecode        {} bytes", summary.bytecode_len);
    println!("  resources       {}", summary.resource_sizes.len());
    for (i, size) in summary.resource_sizes.iter().enumerate() {
        println!("    [{}] {} bytes", i, size);
    }
    println!("  plugins         {}", summary.plugins.len());
    for plugin in &summary.plugins {
        println!("    {}", plugin.cyan());
    }
    let changed: Vec<String> = EngineProperty::ALL
        .iter()
        .filter(|prop| summary.properties.get(prop.index()) != Some(&prop.default_value()))
        .map(|prop| {
            format!(
                "{:?}={}",
                prop,
                summary.properties.get(prop.index()).copied().unwrap_or_default()
            )
        })
        .collect();
    println!("  properties      {} ({} non-default)", summary.properties.len(), changed.len());
    for entry in changed {
        println!("    {}", entry.yellow());
    }
}
