//! End-to-end scenarios through the public API and the `sift` binary.

use std::process::Command;
use std::sync::Arc;

use sift::host::FolderHost;
use sift::script::{parse_script, Interpreter, ProcessResult, Stream};

async fn run(src: &str, input: impl Into<Stream>) -> ProcessResult {
    let program = parse_script(src).expect("script should lex");
    Interpreter::new()
        .process(input.into(), &program)
        .await
        .expect("single run is never superseded")
}

async fn output(src: &str, input: impl Into<Stream>) -> Stream {
    let r = run(src, input).await;
    assert!(r.is_complete, "run failed: {:?}", r.error);
    r.output
}

fn nums(values: &[i64]) -> Stream {
    Stream::from(values.to_vec())
}

// ── Language scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn split_csv_line() {
    assert_eq!(
        output("split(\",\")", "a,b,c").await,
        Stream::from(vec!["a", "b", "c"])
    );
}

#[tokio::test]
async fn filter_even_numbers() {
    assert_eq!(output("filter\n  modulo(2) = 0", nums(&[1, 2, 3, 4])).await, nums(&[2, 4]));
}

#[tokio::test]
async fn scoped_store_leaves_ambient_stream() {
    let src = "X << map\n  stream + 1\n[X, stream]";
    assert_eq!(
        output(src, nums(&[1, 2, 3])).await,
        Stream::Array(vec![nums(&[2, 3, 4]), nums(&[1, 2, 3])])
    );
}

#[tokio::test]
async fn operator_precedence() {
    assert_eq!(output("2 + 3 * 4", "").await, Stream::Num(14.0));
    assert_eq!(output("(2 + 3) * 4", "").await, Stream::Num(20.0));
    assert_eq!(output("1 = 1 & 2 = 3", "").await, Stream::Bool(false));
}

#[tokio::test]
async fn exit_only_script_is_identity() {
    let r = run("exit", nums(&[7, 8])).await;
    assert!(r.is_complete);
    assert_eq!(r.output, nums(&[7, 8]));
}

#[tokio::test]
async fn word_frequency_report() {
    let src = "\
# count words case-insensitively, in first-seen order
counts << split(\" \") :: pivot
  toLower()
counts:keys() :: map :: join(\",\")
  stream + \"=\" + counts.(stream):length()
";
    assert_eq!(
        output(src, "the cat the dog The end").await,
        Stream::from("the=3,cat=1,dog=1,end=1")
    );
}

#[tokio::test]
async fn csv_rows_to_objects() {
    let src = "\
rows << split(\"\\n\") :: filter
  trim() != \"\"
header << rows:at(0):split(\",\")
rows:slice(1) :: map
  cells << split(\",\")
  header :: map :: join(\";\")
    stream + \"=\" + cells:at(index)
";
    assert_eq!(
        output(src, "name,age\nann,31\nbob,27\n").await,
        Stream::from(vec!["name=ann;age=31", "name=bob;age=27"])
    );
}

#[tokio::test]
async fn reports_first_failing_line() {
    let r = run("split(\",\")\nmap\n  stream * 2\njoin()", "1,x").await;
    assert!(!r.is_complete);
    assert_eq!(r.last_line, 3);
    assert_eq!(r.output, Stream::from(vec!["1", "x"]));
    assert!(r.error.unwrap().starts_with("line 3:"));
}

#[tokio::test]
async fn folder_host_serves_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("one.txt"), "1").unwrap();
    std::fs::write(dir.path().join("two.txt"), "2").unwrap();

    let program = parse_script("getFiles() :: sumBy\n  loadFile(stream):tryParseNum()").unwrap();
    let interp = Interpreter::with_host(Arc::new(FolderHost::new(dir.path())));
    let r = interp.process(Stream::from(""), &program).await.unwrap();
    assert_eq!(r.output, Stream::Num(3.0), "{:?}", r.error);
}

// ── Binary ────────────────────────────────────────────────────────────────────

fn sift() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sift"));
    cmd.arg("--no-config");
    cmd
}

#[test]
fn binary_prints_text_output() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("upper.sift");
    let input = dir.path().join("in.txt");
    std::fs::write(&script, "split(\",\") :: map :: join(\"|\")\n  toUpper()").unwrap();
    std::fs::write(&input, "a,b").unwrap();

    let out = sift().arg(&script).arg(&input).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim_end(), "A|B");
}

#[test]
fn binary_binds_file_name_and_globals() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("name.sift");
    let input = dir.path().join("data.csv");
    std::fs::write(&script, "fileName + \":\" + limit").unwrap();
    std::fs::write(&input, "").unwrap();

    let out = sift()
        .args(["--set", "limit=3"])
        .arg(&script)
        .arg(&input)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim_end(), "data.csv:3");
}

#[test]
fn binary_json_output_and_failure_status() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("bad.sift");
    let input = dir.path().join("in.txt");
    std::fs::write(&script, "stream\nnope").unwrap();
    std::fs::write(&input, "x").unwrap();

    let out = sift().arg("--json").arg(&script).arg(&input).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["isComplete"], false);
    assert_eq!(json["lastLine"], 2);
    assert_eq!(json["output"], "x");
}

#[test]
fn binary_check_reports_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.sift");
    let bad = dir.path().join("bad.sift");
    std::fs::write(&good, "map\n  stream").unwrap();
    std::fs::write(&bad, "stream\n  stream").unwrap();

    assert!(sift().arg("--check").arg(&good).status().unwrap().success());
    let out = sift().arg("--check").arg(&bad).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("line 2"));
}

#[test]
fn binary_lists_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("fns.sift");
    std::fs::write(&script, "function twice(x)\n  x * 2").unwrap();

    let out = sift().arg("--symbols").arg(&script).output().unwrap();
    assert!(out.status.success());
    let symbols: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert!(symbols
        .iter()
        .any(|s| s["name"] == "twice" && s["kind"] == "function"));
}
