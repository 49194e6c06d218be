use std::io::Write;
use std::process::{Command, Output};

fn classad_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_classad"))
}

fn write_temp_ad(content: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new()
        .suffix(".ad")
        .tempfile()
        .expect("create temp file");
    f.write_all(content.as_bytes()).expect("write temp file");
    f
}

fn run(args: &[&str]) -> Output {
    classad_binary().args(args).output().expect("run classad")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_cli_eval_literal_expression() {
    let output = run(&["eval", "1 + 2 * 3"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "7");
}

#[test]
fn test_cli_eval_in_record() {
    let f = write_temp_ad("[mem = 8; cpus = 2; name = \"node1\"]");
    let path = f.path().to_str().unwrap();

    let output = run(&["eval", "mem * cpus", "--ad", path]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "16");

    let output = run(&["eval", "toUpper(name)", "--ad", path]);
    assert_eq!(stdout(&output).trim(), "\"NODE1\"");

    let output = run(&["eval", "missing", "--ad", path]);
    assert_eq!(stdout(&output).trim(), "undefined");
}

#[test]
fn test_cli_eval_json() {
    let output = run(&["--json", "eval", "{ 1, \"a\", undefined }"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(value, serde_json::json!([1, "a", null]));

    let output = run(&["eval", "1 / 0", "--json"]);
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(value, serde_json::json!({ "error": true }));
}

#[test]
fn test_cli_eval_witness() {
    let f = write_temp_ad("[mem = 2; cpus = 8]");
    let output = run(&[
        "eval",
        "cpus > 4 && mem >= 4",
        "--ad",
        f.path().to_str().unwrap(),
        "--witness",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("false"), "stdout: {}", text);
    assert!(text.contains("witness: mem >= 4"), "stdout: {}", text);
}

#[test]
fn test_cli_flatten_residual() {
    let f = write_temp_ad("[mem = 8; disk = 100]");
    let path = f.path().to_str().unwrap();

    let output = run(&["flatten", "other.mem >= mem / 2", "--ad", path]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "other.mem >= 4");

    let output = run(&["flatten", "disk > 50", "--ad", path, "--json"]);
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(value, serde_json::json!({ "value": true }));
}

#[test]
fn test_cli_match() {
    let job = write_temp_ad("[requirements = other.mem >= 4; rank = other.mem]");
    let machine = write_temp_ad("[mem = 8; requirements = true]");
    let output = run(&[
        "match",
        job.path().to_str().unwrap(),
        machine.path().to_str().unwrap(),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("symmetric: true"), "stdout: {}", text);
    assert!(text.contains("left rank: 8"), "stdout: {}", text);
    assert!(text.contains("right rank: undefined"), "stdout: {}", text);
}

#[test]
fn test_cli_match_json() {
    let job = write_temp_ad("[requirements = other.mem >= 4]");
    let machine = write_temp_ad("[mem = 2]");
    let output = run(&[
        "--json",
        "match",
        job.path().to_str().unwrap(),
        machine.path().to_str().unwrap(),
    ]);
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(value["symmetric"], serde_json::json!(false));
    assert_eq!(value["right_matches_left"], serde_json::json!(false));
    assert_eq!(value["left_rank"], serde_json::Value::Null);
}

#[test]
fn test_cli_refs() {
    let f = write_temp_ad("[mem = 8; want = mem / 2]");
    let output = run(&[
        "refs",
        "other.mem >= want && other.arch == arch",
        "--ad",
        f.path().to_str().unwrap(),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("external: arch, other.arch, other.mem"), "stdout: {}", text);
    assert!(text.contains("internal: mem, want"), "stdout: {}", text);
}

#[test]
fn test_cli_parse_error_formatted() {
    let output = run(&["eval", "1 + )"]);
    let text = stderr(&output);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(text.contains("E0101"), "expected error code in stderr: {}", text);
    assert!(
        !text.contains("UnexpectedToken {"),
        "stderr contains raw Debug output: {}",
        text
    );
}

#[test]
fn test_cli_bad_record_file() {
    let f = write_temp_ad("[a = 1; b = ");
    let output = run(&["eval", "a", "--ad", f.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("E01"));
}

#[test]
fn test_cli_missing_file_exit_code() {
    let output = run(&["eval", "1", "--ad", "/nonexistent/path/job.ad"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("E0901"));
}

#[test]
fn test_cli_depth_limit_exit_code() {
    let chain: Vec<String> = (0..10).map(|i| format!("a{} = a{}", i, i + 1)).collect();
    let f = write_temp_ad(&format!("[{}; a10 = 1]", chain.join("; ")));
    let path = f.path().to_str().unwrap();

    let output = run(&["--max-depth", "4", "eval", "a0", "--ad", path]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("E0301"));

    let output = run(&["eval", "a0", "--ad", path]);
    assert_eq!(stdout(&output).trim(), "1");
}
