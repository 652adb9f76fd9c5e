//! 外部命令执行（带超时）
//!
//! 所有后端命令都经由 [`CommandRunner`] 发出，便于在测试中替换为脚本化实现。

use crate::error::CommandError;
use crate::util::clean_terminal_output;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// 轮询子进程状态的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 命令输出结果
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 退出码；被信号终止时为 None
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// 失败信息：优先 stderr，为空时回退到 stdout
    pub fn message(&self) -> String {
        let stderr = clean_terminal_output(&self.stderr);
        if !stderr.trim().is_empty() {
            return stderr.trim().to_string();
        }
        clean_terminal_output(&self.stdout).trim().to_string()
    }
}

/// 各类操作的超时上限
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub query_secs: u64,
    pub file_op_secs: u64,
    pub removal_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            query_secs: 10,
            file_op_secs: 30,
            removal_secs: 300,
        }
    }
}

impl Timeouts {
    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn file_op(&self) -> Duration {
        Duration::from_secs(self.file_op_secs)
    }

    pub fn removal(&self) -> Duration {
        Duration::from_secs(self.removal_secs)
    }
}

/// 执行外部命令的抽象
pub trait CommandRunner: Send + Sync {
    /// 运行 `program args...`，捕获 stdout/stderr，超时视为失败
    fn run(&self, program: &str, args: &[&str], timeout: Duration)
        -> Result<CommandOutput, CommandError>;
}

/// 基于 duct 的真实命令执行器
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        log::debug!("run: {} {}", program, args.join(" "));

        let handle = duct::cmd(program, args.iter().copied())
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            let finished = handle.try_wait().map_err(|source| CommandError::Wait {
                program: program.to_string(),
                source,
            })?;
            if let Some(output) = finished {
                return Ok(CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                });
            }
            if Instant::now() >= deadline {
                if let Err(e) = handle.kill() {
                    log::warn!("终止超时进程 {} 失败: {}", program, e);
                }
                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// 检查某个命令是否存在（`which <tool>`）
pub fn program_exists(runner: &dyn CommandRunner, program: &str, timeout: Duration) -> bool {
    runner
        .run("which", &[program], timeout)
        .map(|o| o.success())
        .unwrap_or(false)
}

/// 运行查询命令，只在成功时返回 stdout；失败记录日志后返回 None
pub fn query_stdout(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Option<String> {
    match runner.run(program, args, timeout) {
        Ok(output) if output.success() => Some(output.stdout),
        Ok(output) => {
            log::warn!(
                "{} {} 执行失败（exit={:?}）: {}",
                program,
                args.join(" "),
                output.code,
                output.message()
            );
            None
        }
        Err(e) => {
            if e.is_not_found() {
                log::debug!("{}", e);
            } else {
                log::warn!("{}", e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_stderr() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "something on stdout".into(),
            stderr: "E: Unable to locate package foo\n".into(),
        };
        assert_eq!(out.message(), "E: Unable to locate package foo");
    }

    #[test]
    fn message_falls_back_to_stdout() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "error: snap \"foo\" is not installed\n".into(),
            stderr: "   \n".into(),
        };
        assert_eq!(out.message(), "error: snap \"foo\" is not installed");
    }

    #[test]
    fn system_runner_captures_output() {
        let out = SystemRunner
            .run("sh", &["-c", "echo hello; echo oops >&2; exit 3"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn system_runner_times_out() {
        let err = SystemRunner
            .run("sleep", &["5"], Duration::from_millis(100))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = SystemRunner
            .run("definitely-not-a-real-tool-xyz", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
