//! Target platforms, stub lookup and output naming

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// File name prefix of every launcher stub.
pub const STUB_PREFIX: &str = "launchpack";

/// Platforms a stub exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Mac,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Linux, Platform::Mac];

    /// The platform this binary was built for, if it is one we support.
    pub fn detect() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Platform::Mac)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
        }
    }

    /// Whether the section start is derived from the image's own section
    /// table instead of a trailer.
    pub fn uses_section_table(self) -> bool {
        self == Platform::Windows
    }

    /// `launchpack_<platform>[_<variant>].bin`
    pub fn stub_file_name(
        self,
        variant: Option<&str>,
    ) -> String {
        match variant.filter(|v| !v.is_empty()) {
            Some(variant) => format!("{}_{}_{}.bin", STUB_PREFIX, self.name(), variant),
            None => format!("{}_{}.bin", STUB_PREFIX, self.name()),
        }
    }

    /// Where the artifact for `script` is written.
    ///
    /// The basename wins over the script path; either way Windows outputs
    /// get their extension replaced with `.exe`.
    pub fn output_path(
        self,
        basename: Option<&str>,
        script: &Path,
    ) -> PathBuf {
        let mut out = match basename.filter(|b| !b.is_empty()) {
            Some(basename) => PathBuf::from(basename),
            None => script.with_extension(""),
        };
        if self == Platform::Windows {
            out.set_extension("exe");
        }
        out
    }
}

impl fmt::Display for Platform {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "mac" | "macos" => Ok(Platform::Mac),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// Stub directory next to an executable living in `exe_dir`.
///
/// Inside a macOS app bundle the stubs ship under `Contents/Resources/stub`
/// rather than next to the binary in `Contents/MacOS`.
pub fn stub_dir_for(exe_dir: &Path) -> PathBuf {
    let beside = exe_dir.join("stub");
    if beside.exists() {
        return beside;
    }

    let mut parts = exe_dir.components().rev();
    let in_bundle = matches!(
        (parts.next(), parts.next()),
        (Some(macos), Some(contents))
            if macos.as_os_str() == "MacOS" && contents.as_os_str() == "Contents"
    );
    match exe_dir.parent() {
        Some(contents) if in_bundle => contents.join("Resources").join("stub"),
        _ => beside,
    }
}

/// Stub directory of the running executable.
pub fn default_stub_dir() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(stub_dir_for(dir))
}
