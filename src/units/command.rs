//! `command` unit kind
//!
//! Runs an external process, captures its output into the unit log
//! directory and compares the exit code.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{Unit, UnitContext};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Runs `command` with `args`
#[derive(Debug, Default)]
pub struct CommandUnit {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    expect_exit_code: i32,
    timeout_secs: u64,
}

impl Unit for CommandUnit {
    fn name(&self) -> Option<String> {
        (!self.program.is_empty()).then(|| self.program.clone())
    }

    fn required_inputs(&self) -> &[&str] {
        &["command"]
    }

    fn setup(&mut self, ctx: &mut UnitContext) -> Result<()> {
        self.program = ctx.require_str("command")?.to_string();
        self.args = ctx.input_list("args");
        self.cwd = ctx.input_str("cwd").map(PathBuf::from);
        self.expect_exit_code = match ctx.input("expectExitCode") {
            Some(value) => value
                .as_i64()
                .and_then(|code| i32::try_from(code).ok())
                .context("input 'expectExitCode' must be an integer")?,
            None => 0,
        };
        self.timeout_secs = ctx.input_u64("timeoutSecs").unwrap_or(DEFAULT_TIMEOUT_SECS);

        if let Some(cwd) = &self.cwd {
            anyhow::ensure!(cwd.is_dir(), "working directory not found: {}", cwd.display());
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut UnitContext) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        debug!("Running {} {:?}", self.program, self.args);
        let timeout = Duration::from_secs(self.timeout_secs);
        let output = ctx
            .block_on(async { tokio::time::timeout(timeout, command.output()).await })?
            .map_err(|_| anyhow::anyhow!("command timed out after {}s", self.timeout_secs))?
            .with_context(|| format!("Failed to start command: {}", self.program))?;

        if let Some(dir) = ctx.ensure_log_dir()?.map(|d| d.to_path_buf()) {
            for (file, bytes) in [("stdout.log", &output.stdout), ("stderr.log", &output.stderr)] {
                if bytes.is_empty() {
                    continue;
                }
                let path = dir.join(file);
                fs::write(&path, bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                ctx.attach(path);
            }
        }

        let code = output.status.code();
        if code != Some(self.expect_exit_code) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim();
            match code {
                Some(code) if detail.is_empty() => anyhow::bail!(
                    "exit code {code}, expected {}",
                    self.expect_exit_code
                ),
                Some(code) => anyhow::bail!(
                    "exit code {code}, expected {}: {detail}",
                    self.expect_exit_code
                ),
                None => anyhow::bail!("command terminated by signal"),
            }
        }

        ctx.set_message(format!("exit code {}", self.expect_exit_code));
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::units::Inputs;
    use serde_json::json;

    fn context(inputs: serde_json::Value, runtime: &tokio::runtime::Runtime) -> UnitContext {
        let inputs: Inputs = serde_json::from_value(inputs).unwrap();
        UnitContext::new("G", "cmd", inputs).with_runtime(Some(runtime.handle().clone()))
    }

    #[test]
    fn test_command_success_captures_output() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(json!({ "command": "echo", "args": ["hello"] }), &runtime)
            .with_log_dir(dir.path());

        let mut unit = CommandUnit::default();
        unit.setup(&mut ctx).unwrap();
        unit.run(&mut ctx).unwrap();

        assert_eq!(ctx.attachments().len(), 1);
        let stdout = fs::read_to_string(&ctx.attachments()[0]).unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[test]
    fn test_command_unexpected_exit_code_fails() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut ctx = context(json!({ "command": "sh", "args": ["-c", "exit 3"] }), &runtime);

        let mut unit = CommandUnit::default();
        unit.setup(&mut ctx).unwrap();
        let err = unit.run(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "exit code 3, expected 0");
    }

    #[test]
    fn test_command_expected_exit_code() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut ctx = context(
            json!({ "command": "sh", "args": ["-c", "exit 2"], "expectExitCode": 2 }),
            &runtime,
        );

        let mut unit = CommandUnit::default();
        unit.setup(&mut ctx).unwrap();
        unit.run(&mut ctx).unwrap();
        assert_eq!(ctx.message(), Some("exit code 2"));
    }

    #[test]
    fn test_command_timeout() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut ctx = context(
            json!({ "command": "sleep", "args": ["5"], "timeoutSecs": 0 }),
            &runtime,
        );

        let mut unit = CommandUnit::default();
        unit.setup(&mut ctx).unwrap();
        let err = unit.run(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
