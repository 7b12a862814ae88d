#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dk") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dk.exe" } else { "dk" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dk binary path for integration test"),
    }
}

fn base_command(args: &[&str]) -> Command {
    let mut command = Command::new(resolve_bin_path());
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("DK_OUTPUT_FORMAT")
        .env_remove("DK_RETENTION_ROOT")
        .env_remove("DK_RETENTION_MAX_SIZE_MB")
        .env_remove("DK_RETENTION_MAX_COUNT")
        .env_remove("DK_LOGGING_ENABLED")
        .env_remove("DK_LOGGING_JSONL_PATH");
    command
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("dk-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));

    let mut command = base_command(args);
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute dk command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", resolve_bin_path().display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Start `dk` without waiting for it; stdout is piped.
pub fn spawn_cli(args: &[&str]) -> Child {
    base_command(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn dk command")
}

/// Write a config file confining the root and the activity log to `dir`.
pub fn write_config(dir: &Path, root: &Path, max_size_mb: u64, max_count: usize) -> PathBuf {
    let config_path = dir.join("dk.toml");
    let contents = format!(
        "[retention]\nroot = {root:?}\nsuffix = \".dmp\"\nmax_size_mb = {max_size_mb}\nmax_count = {max_count}\n\n\
         [logging]\njsonl_path = {log:?}\n",
        root = root.to_string_lossy(),
        log = dir.join("activity.jsonl").to_string_lossy(),
    );
    fs::write(&config_path, contents).expect("write config");
    config_path
}

/// Create `path` with `len` bytes and a fixed modification time.
pub fn write_artifact(path: &Path, len: usize, unix_secs: i64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create artifact parent");
    }
    fs::write(path, vec![0u8; len]).expect("write artifact");
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(unix_secs, 0))
        .expect("set mtime");
}

pub fn parse_json_line(stdout: &str) -> serde_json::Value {
    let line = stdout
        .lines()
        .find(|l| !l.trim().is_empty())
        .expect("stdout has a JSON line");
    serde_json::from_str(line).expect("valid JSON output")
}
