//! Shell-command helper for device control.
//!
//! The device wrappers drive `adb`, `emulator` and `xcrun` by inspecting
//! command output text, so failures to run a tool are logged and surface as
//! empty output rather than hard errors.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

/// Run a command to completion and return its stdout as a string.
/// Spawn failures and non-UTF-8 output are logged and yield `""`.
pub async fn exec(program: &str, args: &[&str]) -> String {
    debug!(program, ?args, "exec");

    let output = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(err) => {
            error!(program, error = %err, "failed to execute command");
            return String::new();
        }
    };

    if !output.stderr.is_empty() {
        debug!(program, stderr = %String::from_utf8_lossy(&output.stderr), "command stderr");
    }

    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Whether a command is available on the PATH
pub async fn is_command(cmd: &str) -> bool {
    !exec("which", &[cmd]).await.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_captures_stdout() {
        let out = exec("echo", &["hello"]).await;
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn exec_tolerates_missing_binary() {
        let out = exec("definitely-not-a-real-binary-xyz", &[]).await;
        assert_eq!(out, "");
    }
}
