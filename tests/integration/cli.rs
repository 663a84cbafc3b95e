//! Drive the `launchpack` binary end to end.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn launchpack(
    dir: &Path,
    args: &[&str],
) -> Output {
    Command::new(env!("CARGO_BIN_EXE_launchpack"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to spawn launchpack")
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("stub")).unwrap();
    fs::write(dir.path().join("stub/launchpack_linux.bin"), vec![0x7f; 1024]).unwrap();
    fs::write(dir.path().join("game.bc"), b"compiled program bytes").unwrap();
    fs::create_dir_all(dir.path().join("assets/sounds")).unwrap();
    fs::write(dir.path().join("assets/a.txt"), b"aaaa").unwrap();
    fs::write(dir.path().join("assets/sounds/b.ogg"), b"bb").unwrap();
    dir
}

#[test]
fn test_pack_then_inspect_json() {
    let dir = workspace();
    let packed = launchpack(
        dir.path(),
        &[
            "--config",
            "missing.toml",
            "pack",
            "game.bc",
            "--script",
            "game.nvgt",
            "--platform",
            "linux",
            "--stub-dir",
            "stub",
            "--resource-dir",
            "assets",
            "-D",
            "plugin systemd_notify",
            "--level",
            "3",
        ],
    );
    assert!(
        packed.status.success(),
        "pack failed: {}",
        String::from_utf8_lossy(&packed.stderr)
    );
    assert!(String::from_utf8_lossy(&packed.stderr).contains("Debug build succeeded"));
    assert!(dir.path().join("game").is_file());

    let inspected = launchpack(
        dir.path(),
        &["inspect", "game", "--platform", "linux", "--json"],
    );
    assert!(inspected.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&inspected.stdout).unwrap();
    assert_eq!(summary["section_offset"], 1024);
    assert_eq!(summary["platform"], "linux");
    assert_eq!(summary["bytecode_len"], 22);
    assert_eq!(summary["resource_sizes"], serde_json::json!([4, 2]));
    assert_eq!(summary["plugins"], serde_json::json!(["systemd_notify"]));
}

#[test]
fn test_pack_rejects_bad_directive() {
    let dir = workspace();
    let out = launchpack(
        dir.path(),
        &["--config", "missing.toml", "pack", "game.bc", "-D", "bytecode_compression 12"],
    );
    assert!(!out.status.success());
    assert!(!dir.path().join("game").exists());
}

#[test]
fn test_pack_missing_stub() {
    let dir = workspace();
    let out = launchpack(
        dir.path(),
        &[
            "--config",
            "missing.toml",
            "pack",
            "game.bc",
            "--platform",
            "windows",
            "--stub-dir",
            "stub",
        ],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("launchpack_windows.bin"));
    assert!(!dir.path().join("game.exe").exists());
}

#[test]
fn test_config_prints_defaults() {
    let dir = workspace();
    let out = launchpack(dir.path(), &["--config", "missing.toml", "config"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("compression_level = 9"));
    assert!(text.contains("max_nested_calls = 10000"));
}
