//! Sandboxed python execution.
//!
//! Code runs in an ephemeral temporary directory that is discarded after
//! execution. Filesystem isolation is the extent of the sandbox; there is
//! no OS-level confinement beyond that. A hard kill is applied after the
//! timeout.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Outcome of one sandboxed execution. Failures (non-zero exit, timeout,
/// spawn errors) are all folded in here; this type is data, never thrown.
#[derive(Debug, Clone, Serialize)]
pub struct PythonResult {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `code` in a fresh sandbox directory with a hard timeout.
pub async fn run_python_sandboxed(code: &str, timeout_ms: Option<u64>) -> PythonResult {
    run_with_interpreter("python3", code, timeout_ms).await
}

async fn run_with_interpreter(interpreter: &str, code: &str, timeout_ms: Option<u64>) -> PythonResult {
    match run_inner(interpreter, code, timeout_ms).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("python sandbox error: {e}");
            PythonResult {
                ok: false,
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("sandbox error: {e}"),
            }
        }
    }
}

async fn run_inner(
    interpreter: &str,
    code: &str,
    timeout_ms: Option<u64>,
) -> std::io::Result<PythonResult> {
    let sandbox = tempfile::Builder::new().prefix("quorum-sandbox-").tempdir()?;
    let script = sandbox.path().join("main.py");
    tokio::fs::write(&script, code).await?;

    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
    let child = Command::new(interpreter)
        .arg(&script)
        .current_dir(sandbox.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping the output future on timeout kills the child via kill_on_drop;
    // the sandbox directory is removed when `sandbox` goes out of scope.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(1);
            Ok(PythonResult {
                ok: exit_code == 0,
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(PythonResult {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("killed after {}ms timeout", timeout.as_millis()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_failure_is_folded_into_the_result() {
        let result =
            run_with_interpreter("definitely-not-an-interpreter", "print('hi')", Some(1000)).await;
        assert!(!result.ok);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("sandbox error"));
    }

    #[tokio::test]
    async fn simple_script_runs_in_sandbox() {
        let result = run_python_sandboxed("print(2 + 2)", Some(10_000)).await;
        if result.stderr.contains("sandbox error") {
            // No python interpreter on this machine; the fold still held.
            assert!(!result.ok);
            return;
        }
        assert!(result.ok, "stderr: {}", result.stderr);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains('4'));
    }

    #[tokio::test]
    async fn nonzero_exit_is_data_not_error() {
        let result = run_python_sandboxed("import sys; sys.exit(3)", Some(10_000)).await;
        if result.stderr.contains("sandbox error") {
            return;
        }
        assert!(!result.ok);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let result =
            run_python_sandboxed("import time\ntime.sleep(30)\nprint('late')", Some(300)).await;
        if result.stderr.contains("sandbox error") {
            return;
        }
        assert!(!result.ok);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timeout"));
        assert!(!result.stdout.contains("late"));
    }
}
