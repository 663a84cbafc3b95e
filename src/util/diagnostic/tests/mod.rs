//! Diagnostics 单元测试

use crate::util::diagnostic::{Diagnostics, ExceptionSlot, MessageKind, ScriptMessage};

fn msg(
    row: i32,
    kind: MessageKind,
    text: &str,
) -> ScriptMessage {
    ScriptMessage::new("main.script", row, 3, kind, text)
}

#[test]
fn test_message_format() {
    let text = msg(12, MessageKind::Error, "Expected ';'").to_string();
    assert_eq!(text, "file: main.script\r\nline: 12 (3)\r\nERROR: Expected ';'\r\n\r\n");

    let negative = ScriptMessage::new("a", -1, -1, MessageKind::Warning, "w").to_string();
    assert!(negative.starts_with("file: a\r\nline: 0 (0)\r\nWARNING: w"));
}

#[test]
fn test_info_prefixes_following_messages() {
    let mut diag = Diagnostics::new();
    diag.push(&msg(1, MessageKind::Information, "Compiling void main()"));
    diag.push(&msg(4, MessageKind::Warning, "unused"));
    diag.push(&msg(5, MessageKind::Error, "bad"));

    assert!(diag.warnings().starts_with("file: main.script\r\nline: 1 (3)\r\nINFO: Compiling"));
    assert!(diag.warnings().contains("WARNING: unused"));
    assert!(diag.errors().starts_with("file: main.script\r\nline: 1 (3)\r\nINFO: Compiling"));
    assert!(diag.errors().contains("ERROR: bad"));
    assert_eq!(diag.error_count(), 1);
}

#[test]
fn test_line0_errors_only_reported_without_positioned_errors() {
    let mut diag = Diagnostics::new();
    diag.error("main.script", "Script failed to build");
    assert_eq!(diag.error_count(), 1);
    assert!(diag.errors().is_empty());

    let report = diag.report(false).unwrap();
    assert_eq!(report.title, "Compilation error");
    assert!(report.failed);
    assert!(report.body.contains("Script failed to build"));

    diag.error("main.script", "hidden");
    diag.push(&msg(9, MessageKind::Error, "shown"));
    let report = diag.report(false).unwrap();
    assert!(report.body.contains("shown"));
    assert!(!report.body.contains("hidden"));
}

#[test]
fn test_report_with_and_without_warnings() {
    let mut diag = Diagnostics::new();
    diag.push(&msg(2, MessageKind::Warning, "careful"));
    diag.push(&msg(3, MessageKind::Error, "broken"));
    let quiet = diag.clone().report(false).unwrap();
    assert!(!quiet.body.contains("careful"));
    let loud = diag.report(true).unwrap();
    assert!(loud.body.contains("careful"));
    assert!(loud.body.find("careful") < loud.body.find("broken"));
}

#[test]
fn test_warnings_only_report_then_empty() {
    let mut diag = Diagnostics::new();
    assert!(diag.report(true).is_none());
    diag.push(&msg(2, MessageKind::Warning, "careful"));
    let report = diag.report(false).unwrap();
    assert_eq!(report.title, "Compilation warnings");
    assert!(!report.failed);
    assert!(diag.report(false).is_none());
}

#[test]
fn test_report_starts_a_fresh_batch() {
    let mut diag = Diagnostics::new();
    diag.push(&msg(3, MessageKind::Error, "broken"));
    assert!(diag.report(false).unwrap().failed);
    assert!(!diag.has_errors());

    diag.push(&msg(5, MessageKind::Warning, "careful"));
    let report = diag.report(false).unwrap();
    assert_eq!(report.title, "Compilation warnings");
    assert!(!report.failed);
    assert!(report.body.contains("WARNING: careful"));
    assert!(!report.body.contains("broken"));
}

#[test]
fn test_promote_info() {
    let mut diag = Diagnostics::new();
    diag.push(&msg(7, MessageKind::Information, "null pointer in global init"));
    diag.promote_info_to_errors();
    assert!(diag.errors().contains("INFO: null pointer in global init"));

    diag.push(&msg(8, MessageKind::Information, "dropped"));
    diag.clear_info();
    diag.push(&msg(9, MessageKind::Warning, "w"));
    assert!(!diag.warnings().contains("dropped"));
}

#[test]
fn test_exception_slot_shared() {
    let slot = ExceptionSlot::new();
    let clone = slot.clone();
    assert!(slot.is_empty());
    clone.record("void main() (line 3)");
    assert_eq!(slot.get(), "void main() (line 3)");
    assert_eq!(slot.take(), "void main() (line 3)");
    assert!(clone.is_empty());
}
