//! launchpack configuration system
//!
//! Build and engine settings, loaded from `launchpack.toml` with defaults for
//! anything missing.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Directives applied before compilation (`BuildConfig::apply_directive`)
//! 3. Project-level (launchpack.toml)
//! 4. User-level (~/.config/launchpack/config.toml)
//! 5. Default values
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use launchpack::util::config::load_project_config;
//!
//! let config = load_project_config(std::path::Path::new(".")).unwrap();
//! println!("compression level {}", config.build.compression_level);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::artifact::Platform;
use crate::codec::MAX_COMPRESSION_LEVEL;
use crate::engine::{EngineProperty, EnginePropertyTable};

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "launchpack.toml";

/// Complete configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PackConfig {
    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,
    /// Engine settings stored in the artifact's property table
    #[serde(default)]
    pub scripting: EngineOptions,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// Target platform, host when absent
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Stub variant suffix
    #[serde(default)]
    pub stub_variant: Option<String>,
    /// Output path without extension
    #[serde(default)]
    pub compiled_basename: Option<String>,
    /// Bytecode compression level, 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// Patch Windows stubs to the console subsystem
    #[serde(default)]
    pub console: bool,
    /// Keep debug information in the bytecode
    #[serde(default = "default_debug")]
    pub debug: bool,
    /// Extra include directories, searched first to last
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    /// Plugins recorded in the artifact
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Suppress the success message
    #[serde(default)]
    pub quiet: bool,
    /// Directory holding launcher stubs
    #[serde(default)]
    pub stub_dir: Option<PathBuf>,
}

fn default_compression_level() -> u32 {
    9
}

fn default_debug() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platform: None,
            stub_variant: None,
            compiled_basename: None,
            compression_level: 9,
            console: false,
            debug: true,
            include_dirs: Vec::new(),
            plugins: Vec::new(),
            quiet: false,
            stub_dir: None,
        }
    }
}

/// A directive accepted by [`BuildConfig::apply_directive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Include(PathBuf),
    Stub(String),
    Plugin(String),
    /// `None` when the basename was cleared with `*`
    CompiledBasename(Option<String>),
    Platform(Option<Platform>),
    BytecodeCompression(u32),
    Console,
}

impl BuildConfig {
    /// Platform to build for; the host's when none was chosen.
    pub fn target_platform(&self) -> Option<Platform> {
        self.platform.or_else(Platform::detect)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(ConfigError::InvalidCompression(
                self.compression_level.to_string(),
            ));
        }
        Ok(())
    }

    /// Apply one build directive such as `platform linux` or `console`.
    ///
    /// Tokens are separated by whitespace; anything after the directive name
    /// is its argument.
    pub fn apply_directive(
        &mut self,
        text: &str,
    ) -> Result<Directive, ConfigError> {
        let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let (name, arg) = match clean.split_once(' ') {
            Some((name, arg)) => (name, Some(arg)),
            None => (clean.as_str(), None),
        };

        let directive = match (name, arg) {
            ("include", Some(dir)) => {
                let dir = PathBuf::from(dir);
                self.include_dirs.insert(0, dir.clone());
                Directive::Include(dir)
            }
            ("stub", Some(variant)) => {
                self.stub_variant = Some(variant.to_string());
                Directive::Stub(variant.to_string())
            }
            ("plugin", Some(plugin)) => {
                self.plugins.push(plugin.to_string());
                Directive::Plugin(plugin.to_string())
            }
            ("compiled_basename", Some(basename)) => {
                self.compiled_basename = if basename == "*" {
                    None
                } else {
                    Some(basename.to_string())
                };
                Directive::CompiledBasename(self.compiled_basename.clone())
            }
            ("platform", Some(platform)) => {
                self.platform = if platform == "auto" {
                    None
                } else {
                    Some(
                        platform
                            .parse()
                            .map_err(|_| ConfigError::UnknownPlatform(platform.to_string()))?,
                    )
                };
                Directive::Platform(self.platform)
            }
            ("bytecode_compression", Some(level)) => {
                let parsed = level
                    .parse::<u32>()
                    .ok()
                    .filter(|l| *l <= MAX_COMPRESSION_LEVEL)
                    .ok_or_else(|| ConfigError::InvalidCompression(level.to_string()))?;
                self.compression_level = parsed;
                Directive::BytecodeCompression(parsed)
            }
            ("console", None) => {
                self.console = true;
                Directive::Console
            }
            _ => return Err(ConfigError::InvalidDirective(text.trim().to_string())),
        };
        Ok(directive)
    }

    /// Apply directives in order, stopping at the first rejected one.
    pub fn apply_directives<'a, I>(
        &mut self,
        directives: I,
    ) -> Result<Vec<Directive>, ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        directives
            .into_iter()
            .map(|d| self.apply_directive(d))
            .collect()
    }
}

/// `scripting.*` options, translated into engine properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineOptions {
    #[serde(default)]
    pub allow_multiline_strings: bool,
    #[serde(default)]
    pub allow_unicode_identifiers: bool,
    #[serde(default)]
    pub allow_implicit_handle_types: bool,
    #[serde(default)]
    pub disallow_empty_list_elements: bool,
    #[serde(default)]
    pub disallow_global_vars: bool,
    #[serde(default)]
    pub disallow_value_assign_for_ref_type: bool,
    #[serde(default)]
    pub disable_integer_division: bool,
    #[serde(default)]
    pub use_character_literals: bool,
    #[serde(default)]
    pub ignore_duplicate_shared_interface: bool,
    #[serde(default)]
    pub private_prop_as_protected: bool,
    #[serde(default)]
    pub always_impl_default_construct: bool,
    #[serde(default)]
    pub expand_default_array_to_template: bool,
    #[serde(default)]
    pub require_enum_scope: bool,
    #[serde(default)]
    pub do_not_optimize_bytecode: bool,
    #[serde(default = "default_max_nested_calls")]
    pub max_nested_calls: u64,
    #[serde(default)]
    pub max_stack_size: u64,
    #[serde(default)]
    pub max_call_stack_size: u64,
    #[serde(default = "default_init_stack_size")]
    pub init_stack_size: u64,
    #[serde(default = "default_init_call_stack_size")]
    pub init_call_stack_size: u64,
    #[serde(default = "default_property_accessor_mode")]
    pub property_accessor_mode: u64,
    /// 0 off, 1 warnings, 2 warnings shown alongside errors
    #[serde(default)]
    pub compiler_warnings: u64,
    #[serde(default = "default_heredoc_trim_mode")]
    pub heredoc_trim_mode: u64,
    #[serde(default = "default_alter_syntax_named_args")]
    pub alter_syntax_named_args: u64,
}

fn default_max_nested_calls() -> u64 {
    10000
}

fn default_init_stack_size() -> u64 {
    4096
}

fn default_init_call_stack_size() -> u64 {
    10
}

fn default_property_accessor_mode() -> u64 {
    3
}

fn default_heredoc_trim_mode() -> u64 {
    1
}

fn default_alter_syntax_named_args() -> u64 {
    2
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            allow_multiline_strings: false,
            allow_unicode_identifiers: false,
            allow_implicit_handle_types: false,
            disallow_empty_list_elements: false,
            disallow_global_vars: false,
            disallow_value_assign_for_ref_type: false,
            disable_integer_division: false,
            use_character_literals: false,
            ignore_duplicate_shared_interface: false,
            private_prop_as_protected: false,
            always_impl_default_construct: false,
            expand_default_array_to_template: false,
            require_enum_scope: false,
            do_not_optimize_bytecode: false,
            max_nested_calls: 10000,
            max_stack_size: 0,
            max_call_stack_size: 0,
            init_stack_size: 4096,
            init_call_stack_size: 10,
            property_accessor_mode: 3,
            compiler_warnings: 0,
            heredoc_trim_mode: 1,
            alter_syntax_named_args: 2,
        }
    }
}

impl EngineOptions {
    /// Write these options onto a property table.
    ///
    /// Flags only ever switch their property on; numeric options always
    /// overwrite.
    pub fn apply_to(
        &self,
        table: &mut EnginePropertyTable,
    ) {
        let flags = [
            (self.allow_multiline_strings, EngineProperty::AllowMultilineStrings),
            (self.allow_unicode_identifiers, EngineProperty::AllowUnicodeIdentifiers),
            (self.allow_implicit_handle_types, EngineProperty::AllowImplicitHandleTypes),
            (self.disallow_empty_list_elements, EngineProperty::DisallowEmptyListElements),
            (self.disallow_global_vars, EngineProperty::DisallowGlobalVars),
            (
                self.disallow_value_assign_for_ref_type,
                EngineProperty::DisallowValueAssignForRefType,
            ),
            (self.disable_integer_division, EngineProperty::DisableIntegerDivision),
            (self.use_character_literals, EngineProperty::UseCharacterLiterals),
            (
                self.ignore_duplicate_shared_interface,
                EngineProperty::IgnoreDuplicateSharedInterface,
            ),
            (self.private_prop_as_protected, EngineProperty::PrivatePropAsProtected),
            (self.always_impl_default_construct, EngineProperty::AlwaysImplDefaultConstruct),
            (
                self.expand_default_array_to_template,
                EngineProperty::ExpandDefaultArrayToTemplate,
            ),
            (self.require_enum_scope, EngineProperty::RequireEnumScope),
        ];
        for (enabled, prop) in flags {
            if enabled {
                table.set(prop, 1);
            }
        }
        if self.do_not_optimize_bytecode {
            table.set(EngineProperty::OptimizeBytecode, 0);
        }

        table.set(EngineProperty::MaxNestedCalls, self.max_nested_calls);
        table.set(EngineProperty::MaxStackSize, self.max_stack_size);
        table.set(EngineProperty::MaxCallStackSize, self.max_call_stack_size);
        table.set(EngineProperty::InitStackSize, self.init_stack_size);
        table.set(EngineProperty::InitCallStackSize, self.init_call_stack_size);
        table.set(EngineProperty::PropertyAccessorMode, self.property_accessor_mode);
        table.set(EngineProperty::CompilerWarnings, self.compiler_warnings);
        table.set(EngineProperty::HeredocTrimMode, self.heredoc_trim_mode);
        table.set(EngineProperty::AlterSyntaxNamedArgs, self.alter_syntax_named_args);
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    // Try XDG config directory on Unix
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("launchpack"));
    }

    // Fallback to ~/.config/launchpack
    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("launchpack"));
    }

    // On Windows, try %APPDATA%
    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("launchpack"));
    }

    None
}

/// Load a configuration file
/// Returns default config if file doesn't exist
pub fn load_config(path: &Path) -> Result<PackConfig, ConfigError> {
    if !path.exists() {
        return Ok(PackConfig::default());
    }

    let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
    let config: PackConfig = toml::from_str(&content).map_err(ConfigError::ParseError)?;
    config.build.validate()?;
    Ok(config)
}

/// Load `launchpack.toml` from a project directory, falling back to the
/// user-level file and then to defaults
pub fn load_project_config(dir: &Path) -> Result<PackConfig, ConfigError> {
    let project = dir.join(PROJECT_CONFIG_FILE);
    if project.exists() {
        return load_config(&project);
    }

    match get_config_dir() {
        Some(user_dir) => load_config(&user_dir.join("config.toml")),
        None => Ok(PackConfig::default()),
    }
}

/// Save configuration, creating parent directories as needed
pub fn save_config(
    config: &PackConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(ConfigError::IoError)?;
        }
    }

    let content = toml::to_string_pretty(config).map_err(ConfigError::SerializeError)?;
    fs::write(path, content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid directive '{0}'")]
    InvalidDirective(String),

    #[error("Invalid bytecode compression level '{0}', expected 0-9")]
    InvalidCompression(String),

    #[error("Unknown platform '{0}'")]
    UnknownPlatform(String),
}
