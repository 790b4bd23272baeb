//! CLI end-to-end tests

mod common;

use assert_cmd::Command;
use serde_json::Value;

use common::START_FEN;
use evalpool::config::ENGINE_PATH_ENV;

fn evalpool() -> Command {
    let mut cmd = Command::cargo_bin("evalpool").unwrap();
    cmd.env_remove(ENGINE_PATH_ENV).env("RUST_LOG", "warn");
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn missing_engine_yields_unanalyzed_results() {
    let output = evalpool()
        .args(["--engine", "/nonexistent/evalpool-test-engine", "--no-cloud", START_FEN])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["position"], START_FEN);
    assert_eq!(lines[0]["depth"], 0);
    assert_eq!(lines[0]["score"]["kind"], "unanalyzed");
    assert_eq!(lines[0]["source"], "local");

    // 統計は stderr の最終行
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stats: Value = serde_json::from_str(stderr.lines().last().unwrap()).unwrap();
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["errors"], 0);
}

#[test]
fn no_positions_is_an_error() {
    evalpool().arg("--no-cloud").assert().failure();
}

#[test]
fn bad_fen_is_rejected() {
    evalpool()
        .args(["--no-cloud", "rnbqkbnr/8/8\n/8 w - - 0 1"])
        .assert()
        .failure();
}

#[cfg(unix)]
#[test]
fn config_file_and_input_file() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("evalpool.toml");
    let mut config = std::fs::File::create(&config_path).unwrap();
    write!(
        config,
        "[engine]\npath = \"/bin/sh\"\nargs = [\"-c\", '''{}''']\n\n[pool]\nsize = 2\n\n[cloud]\nenabled = false\n",
        common::SHELL_ENGINE
    )
    .unwrap();

    let input_path = dir.path().join("positions.txt");
    std::fs::write(
        &input_path,
        format!("# opening positions\n{START_FEN}\n\n{}\n", common::ITALIAN_FEN),
    )
    .unwrap();

    let output = evalpool()
        .arg("--config")
        .arg(&config_path)
        .arg("--input")
        .arg(&input_path)
        .arg("--depth")
        .arg("4")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["position"], START_FEN);
    assert_eq!(lines[1]["position"], common::ITALIAN_FEN);
    for line in &lines {
        assert_eq!(line["depth"], 5);
        assert_eq!(line["score"]["kind"], "centipawns");
        assert_eq!(line["score"]["value"], 27);
        assert_eq!(line["best_move"], "e2e4");
    }
}
