use std::path::Path;
use std::process::{Command, Output};

fn stackvisor(args: &[&str], config: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stackvisor"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_config_error_exits_78_and_flushes_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("stackvisor.toml");
    std::fs::write(
        &config,
        r#"
[[services]]
name = "a"
command = ["true"]
port = 19841

[[services]]
name = "b"
command = ["true"]
port = 19841
"#,
    )
    .unwrap();
    let log = dir.path().join("stackvisor.log");

    let output = stackvisor(&["--log-file", log.to_str().unwrap()], &config);

    assert_eq!(output.status.code(), Some(78));
    assert!(String::from_utf8_lossy(&output.stderr).contains("port 19841"));
    let logged = std::fs::read_to_string(&log).unwrap();
    assert!(logged.contains("port 19841"), "log file missing error: {:?}", logged);
}

#[test]
fn test_dry_run_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("stackvisor.toml");
    std::fs::write(
        &config,
        r#"
[[services]]
name = "web"
command = ["sh", "-c", "touch started"]
port = 19851
"#,
    )
    .unwrap();

    let output = stackvisor(&["--dry-run"], &config);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("web -> http://localhost:19851"));
    assert!(!dir.path().join("started").exists());
}
