//! End-to-end tests for the `dk` binary: retention passes, listing, pruning,
//! configuration handling and cross-process lock contention.

mod common;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use common::{parse_json_line, run_cli_case, write_artifact, write_config};

const MB: usize = 1024 * 1024;

fn config_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn help_prints_usage() {
    let result = run_cli_case("help_prints_usage", &["--help"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("Usage"));
    for command in ["run", "list", "prune", "lock", "config", "completions"] {
        assert!(result.stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn run_size_cap_keeps_newest_two() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    for i in 1..=6 {
        write_artifact(&root.join(format!("f{i}.dmp")), 2 * MB, 1_000 + i);
    }
    let config = write_config(dir.path(), &root, 5, 10);

    let result = run_cli_case(
        "run_size_cap_keeps_newest_two",
        &["--config", &config_arg(&config), "--json", "run"],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json_line(&result.stdout);
    assert_eq!(payload["command"], "run");
    assert_eq!(payload["evicted_count"], 4);
    assert_eq!(payload["remaining_count"], 2);
    assert_eq!(payload["bytes_evicted"], 8 * MB as u64);
    assert!(root.join("f5.dmp").exists());
    assert!(root.join("f6.dmp").exists());
    assert!(!root.join("f1.dmp").exists());
}

#[test]
fn run_count_cap_and_prune() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    for i in 1..=5 {
        write_artifact(&root.join(format!("crash-{i}/f{i}.dmp")), 100 * 1024, 1_000 + i);
    }
    let config = write_config(dir.path(), &root, 10, 3);

    let result = run_cli_case(
        "run_count_cap_and_prune",
        &["--config", &config_arg(&config), "--json", "run"],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json_line(&result.stdout);
    assert_eq!(payload["evicted_count"], 2);
    assert_eq!(payload["pruned_dirs"], 2);
    assert!(!root.join("crash-1").exists());
    assert!(!root.join("crash-2").exists());
    assert!(root.join("crash-3/f3.dmp").exists());
}

#[test]
fn run_keeps_single_oversized_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    write_artifact(&root.join("huge.dmp"), 6 * MB, 1_000);
    let config = write_config(dir.path(), &root, 5, 5);

    let result = run_cli_case(
        "run_keeps_single_oversized_artifact",
        &["--config", &config_arg(&config), "--json", "run"],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert_eq!(parse_json_line(&result.stdout)["evicted_count"], 0);
    assert!(root.join("huge.dmp").exists());
}

#[test]
fn run_dry_run_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    for i in 1..=4 {
        write_artifact(&root.join(format!("f{i}.dmp")), 10, 1_000 + i);
    }
    let config = write_config(dir.path(), &root, 5, 1);

    let result = run_cli_case(
        "run_dry_run_deletes_nothing",
        &["--config", &config_arg(&config), "--json", "run", "--dry-run"],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json_line(&result.stdout);
    assert_eq!(payload["dry_run"], true);
    assert_eq!(payload["evicted_count"], 3);
    for i in 1..=4 {
        assert!(root.join(format!("f{i}.dmp")).exists());
    }
}

#[test]
fn run_root_flag_overrides_config_and_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let configured = dir.path().join("configured");
    let other = dir.path().join("other/nested");
    let config = write_config(dir.path(), &configured, 5, 5);

    let result = run_cli_case(
        "run_root_flag_overrides_config",
        &[
            "--config",
            &config_arg(&config),
            "--json",
            "run",
            "--root",
            &other.to_string_lossy(),
        ],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(other.is_dir());
    assert!(!configured.exists());
}

#[test]
fn run_writes_activity_log() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    for i in 1..=3 {
        write_artifact(&root.join(format!("f{i}.dmp")), 10, 1_000 + i);
    }
    let config = write_config(dir.path(), &root, 5, 2);

    let result = run_cli_case(
        "run_writes_activity_log",
        &["--config", &config_arg(&config), "--json", "run"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let raw = fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
    let events: Vec<serde_json::Value> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let kinds: Vec<&str> = events.iter().filter_map(|e| e["event"].as_str()).collect();
    assert!(kinds.contains(&"scan_complete"));
    assert!(kinds.contains(&"artifact_evict"));
    assert!(kinds.contains(&"pass_complete"));
    assert!(kinds.contains(&"lock_change"));
}

#[test]
fn list_reports_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    write_artifact(&root.join("b.dmp"), 20, 2_000);
    write_artifact(&root.join("sub/a.dmp"), 10, 1_000);
    write_artifact(&root.join("notes.txt"), 5, 500);
    let config = write_config(dir.path(), &root, 5, 5);

    let result = run_cli_case(
        "list_reports_oldest_first",
        &["--config", &config_arg(&config), "--json", "list"],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json_line(&result.stdout);
    assert_eq!(payload["count"], 2);
    assert_eq!(payload["total_bytes"], 30);
    let first = payload["artifacts"][0]["path"].as_str().unwrap();
    assert!(first.ends_with("a.dmp"), "first listed: {first}");
}

#[test]
fn list_does_not_create_a_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &dir.path().join("dumps"), 5, 5);
    let typo = dir.path().join("no/such/root");

    let result = run_cli_case(
        "list_does_not_create_a_missing_root",
        &["--config", &config_arg(&config), "list", "--root", &config_arg(&typo)],
    );

    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("DK-2201"));
    assert!(!dir.path().join("no").exists());
}

#[test]
fn pass_lock_file_survives_a_matching_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    write_artifact(&root.join("crash1.lock"), 10, 1_000);
    write_artifact(&root.join("crash2.lock"), 10, 2_000);
    let config = write_config(dir.path(), &root, 5, 2);
    let contents = fs::read_to_string(&config)
        .unwrap()
        .replace("suffix = \".dmp\"", "suffix = \".lock\"");
    fs::write(&config, contents).unwrap();

    for pass in 0..2 {
        let result = run_cli_case(
            "pass_lock_file_survives_a_matching_suffix",
            &["--config", &config_arg(&config), "--json", "run"],
        );

        assert!(result.status.success(), "log: {}", result.log_path.display());
        let payload = parse_json_line(&result.stdout);
        assert_eq!(payload["scanned_count"], 2, "pass {pass}");
        assert_eq!(payload["evicted_count"], 0, "pass {pass}");
        assert!(root.join(".dk-retention.lock").exists());
        assert!(root.join("crash1.lock").exists());
        assert!(root.join("crash2.lock").exists());
    }
}

#[test]
fn prune_removes_only_empty_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    fs::create_dir_all(root.join("a/b/c")).unwrap();
    write_artifact(&root.join("keep/x.dmp"), 1, 1_000);
    let config = write_config(dir.path(), &root, 5, 5);

    let result = run_cli_case(
        "prune_removes_only_empty_directories",
        &["--config", &config_arg(&config), "--json", "prune"],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert_eq!(parse_json_line(&result.stdout)["removed_count"], 3);
    assert!(!root.join("a").exists());
    assert!(root.join("keep/x.dmp").exists());
    assert!(root.is_dir());
}

#[test]
fn missing_explicit_config_is_a_user_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");

    let result = run_cli_case(
        "missing_explicit_config_is_a_user_error",
        &["--config", &config_arg(&missing), "run"],
    );

    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("DK-1002"));
}

#[test]
fn config_validate_rejects_empty_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("dk.toml");
    fs::write(&config, "[retention]\nsuffix = \"\"\n").unwrap();

    let result = run_cli_case(
        "config_validate_rejects_empty_suffix",
        &["--config", &config_arg(&config), "--json", "config", "validate"],
    );

    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    let payload = parse_json_line(&result.stdout);
    assert_eq!(payload["valid"], false);
    assert_eq!(payload["error_code"], "DK-1001");
}

#[test]
fn config_validate_accepts_written_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &dir.path().join("dumps"), 5, 5);

    let result = run_cli_case(
        "config_validate_accepts_written_config",
        &["--config", &config_arg(&config), "--json", "config", "validate"],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json_line(&result.stdout);
    assert_eq!(payload["valid"], true);
    assert_eq!(payload["hash"].as_str().unwrap().len(), 16);
}

#[test]
fn env_override_changes_count_cap() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dumps");
    for i in 1..=4 {
        write_artifact(&root.join(format!("f{i}.dmp")), 10, 1_000 + i);
    }
    let config = write_config(dir.path(), &root, 5, 10);

    let result = common::run_cli_case_with_env(
        "env_override_changes_count_cap",
        &["--config", &config_arg(&config), "--json", "run"],
        &[("DK_RETENTION_MAX_COUNT", "1")],
    );

    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert_eq!(parse_json_line(&result.stdout)["evicted_count"], 3);
}

#[test]
fn completions_generate_script() {
    let result = run_cli_case("completions_generate_script", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("dk"));
}

#[cfg(unix)]
mod contention {
    use super::*;

    /// Start `dk lock` holding `file` and wait until it reports acquisition.
    fn hold_lock(file: &Path, config: &Path, mode: &str) -> std::process::Child {
        let mut child = common::spawn_cli(&[
            "--config",
            &config_arg(config),
            "--json",
            "lock",
            &file.to_string_lossy(),
            "--mode",
            mode,
            "--hold-secs",
            "5",
        ]);
        let stdout = child.stdout.take().expect("piped stdout");
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(payload["acquired"], true);
        child
    }

    #[test]
    fn nonblocking_lock_fails_while_another_process_holds_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), &dir.path().join("dumps"), 5, 5);
        let file = dir.path().join("shared.lock");
        let mut holder = hold_lock(&file, &config, "write");

        let result = run_cli_case(
            "nonblocking_lock_fails_while_held",
            &[
                "--config",
                &config_arg(&config),
                "--json",
                "lock",
                &file.to_string_lossy(),
                "--mode",
                "read",
                "--nonblocking",
            ],
        );

        holder.kill().ok();
        holder.wait().ok();
        assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
        assert!(result.stderr.contains("held by another process"));
    }

    #[test]
    fn shared_locks_do_not_contend_across_processes() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), &dir.path().join("dumps"), 5, 5);
        let file = dir.path().join("shared.lock");
        let mut holder = hold_lock(&file, &config, "read");

        let result = run_cli_case(
            "shared_locks_do_not_contend",
            &[
                "--config",
                &config_arg(&config),
                "--json",
                "lock",
                &file.to_string_lossy(),
                "--mode",
                "read",
                "--nonblocking",
            ],
        );

        holder.kill().ok();
        holder.wait().ok();
        assert!(result.status.success(), "log: {}", result.log_path.display());
    }

    #[test]
    fn concurrent_pass_is_refused_without_wait() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dumps");
        fs::create_dir_all(&root).unwrap();
        let config = write_config(dir.path(), &root, 5, 5);
        let mut holder = hold_lock(&root.join(".dk-retention.lock"), &config, "write");

        let result = run_cli_case(
            "concurrent_pass_is_refused_without_wait",
            &["--config", &config_arg(&config), "--json", "run"],
        );

        holder.kill().ok();
        holder.wait().ok();
        assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
        assert!(result.stderr.contains("another retention pass"));
    }
}
