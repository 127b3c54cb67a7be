use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    if let Some(path) = env::var_os("CARGO_BIN_EXE_emmm-cli") {
        return PathBuf::from(path);
    }
    if let Some(path) = env::var_os("CARGO_BIN_EXE_emmm_cli") {
        return PathBuf::from(path);
    }
    let exe = env::current_exe().expect("current exe");
    let mut debug_dir = exe.as_path();
    while let Some(parent) = debug_dir.parent() {
        if parent.file_name().and_then(|name| name.to_str()) == Some("debug") {
            let candidate = parent.join("emmm-cli");
            if candidate.exists() {
                return candidate;
            }
        }
        debug_dir = parent;
    }
    panic!("binary path missing");
}

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("time");
    let file_name = format!(
        "emmm_cli_{}_{}_{}.emmm",
        name,
        now.as_secs(),
        now.subsec_nanos()
    );
    path.push(file_name);
    fs::write(&path, contents).expect("write temp file");
    path
}

#[test]
fn renders_html_and_exits_cleanly() {
    let input = temp_file("ok", "hello [/emph]world[;]\n");
    let output = Command::new(bin_path())
        .arg(input.to_str().expect("path"))
        .output()
        .expect("run");

    assert!(output.status.success(), "expected success exit code");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<p>hello <em>world</em></p>"));
}

#[test]
fn messages_pretty_reports_error_and_exit_code() {
    let input = temp_file("unknown", "[.mystery] text\n");
    let output = Command::new(bin_path())
        .args(["--messages", "pretty", input.to_str().expect("path")])
        .output()
        .expect("run");

    assert!(!output.status.success(), "expected error exit code");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("E_UNKNOWN_MODIFIER"),
        "expected E_UNKNOWN_MODIFIER in stderr, got: {stderr}"
    );
}

#[test]
fn messages_json_is_structured() {
    let input = temp_file("unclosed", "[/emph]never closed\n");
    let output = Command::new(bin_path())
        .args(["--messages", "json", input.to_str().expect("path")])
        .output()
        .expect("run");

    assert!(!output.status.success(), "expected error exit code");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"code\": \"E_UNCLOSED_INLINE_MODIFIER\""));
    assert!(stderr.contains("\"range\""));
}

#[test]
fn embed_produces_a_full_page() {
    let input = temp_file("embed", "hello\n");
    let output = Command::new(bin_path())
        .args(["--embed", "--theme", "light", input.to_str().expect("path")])
        .output()
        .expect("run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<!DOCTYPE html>"));
    assert!(stdout.contains("--emmm-bg"));
}
