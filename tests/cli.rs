use std::io::Write;
use std::process::{Command, Output, Stdio};

use pretty_assertions::assert_eq;

const WARNING: &str = "warning: please enter a question before submitting\n";

const AWS_VARS: [&str; 6] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "DOCQA_CREDENTIALS_EXPIRE_AT",
    "OPENSEARCH_HOST",
    "DOCQA_LOG",
];

fn command(bin: &str) -> Command {
    let mut cmd = Command::new(bin);
    for var in AWS_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// Fake but well-formed settings; nothing listens on the discard port.
fn with_offline_backends(cmd: &mut Command) -> &mut Command {
    cmd.env("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE")
        .env("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
        .env("OPENSEARCH_HOST", "http://127.0.0.1:9")
        .env("DOCQA_SEARCH_AUTH", "none")
        .env("DOCQA_BEDROCK_ENDPOINT", "http://127.0.0.1:9")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn ask_warns_on_blank_query_without_configuration() {
    let output = command(env!("CARGO_BIN_EXE_docqa-ask"))
        .args(["--query", "   "])
        .output()
        .expect("run CLI");

    assert_success(&output);
    assert_eq!(String::from_utf8_lossy(&output.stdout), WARNING);
}

#[test]
fn ask_loop_warns_on_blank_lines_and_exits() {
    let mut child = with_offline_backends(&mut command(env!("CARGO_BIN_EXE_docqa-ask")))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");

    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(b"\n   \nexit\n")
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert_success(&output);
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        format!("{WARNING}{WARNING}")
    );
}

#[test]
fn ask_loop_requires_credentials() {
    let output = command(env!("CARGO_BIN_EXE_docqa-ask"))
        .stdin(Stdio::null())
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing AWS access key id"), "stderr: {stderr}");
}

#[test]
fn index_rejects_a_file_that_is_not_a_pdf() {
    let mut file = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .expect("temp file");
    file.write_all(b"plain text, not a PDF").expect("write temp file");

    let output = with_offline_backends(&mut command(env!("CARGO_BIN_EXE_docqa-index")))
        .arg("--document")
        .arg(file.path())
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load"), "stderr: {stderr}");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "");
}
