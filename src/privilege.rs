//! 提权执行与权限检查
//!
//! 核心逻辑只依赖 [`Elevator::run_elevated`]：以更高权限运行一条命令，
//! 阻塞直到完成或超时，返回确定的退出码。具体是 root 直接执行、pkexec
//! 图形授权还是 sudo 缓存凭证，由 [`SystemElevator`] 决定。

use crate::command::{program_exists, CommandOutput, CommandRunner};
use crate::error::CommandError;
use serde::Deserialize;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 提权执行接口
pub trait Elevator: Send + Sync {
    fn run_elevated(&self, argv: &[&str], timeout: Duration)
        -> Result<CommandOutput, CommandError>;
}

/// 配置中可选的提权方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationPreference {
    #[default]
    Auto,
    Pkexec,
    Sudo,
    None,
}

/// 实际采用的提权方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationMethod {
    /// 已经是 root，直接执行
    Direct,
    Pkexec,
    /// `sudo -n`：非交互，凭证过期时静默失败，不读 stdin
    Sudo,
    Unavailable,
}

impl ElevationMethod {
    /// 按偏好和当前环境选择提权方式
    pub fn detect(
        runner: &dyn CommandRunner,
        preference: ElevationPreference,
        timeout: Duration,
    ) -> Self {
        if is_root() {
            return ElevationMethod::Direct;
        }
        match preference {
            ElevationPreference::None => ElevationMethod::Unavailable,
            ElevationPreference::Pkexec => ElevationMethod::Pkexec,
            ElevationPreference::Sudo => ElevationMethod::Sudo,
            ElevationPreference::Auto => {
                if program_exists(runner, "pkexec", timeout) {
                    ElevationMethod::Pkexec
                } else if program_exists(runner, "sudo", timeout) {
                    ElevationMethod::Sudo
                } else {
                    ElevationMethod::Unavailable
                }
            }
        }
    }
}

/// 基于 root / pkexec / sudo 的提权实现
#[derive(Clone)]
pub struct SystemElevator {
    runner: Arc<dyn CommandRunner>,
    method: ElevationMethod,
}

impl SystemElevator {
    pub fn new(runner: Arc<dyn CommandRunner>, method: ElevationMethod) -> Self {
        Self { runner, method }
    }
}

impl Elevator for SystemElevator {
    fn run_elevated(
        &self,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(CommandOutput::default());
        };
        log::info!("提权执行 ({:?}): {}", self.method, argv.join(" "));

        match self.method {
            ElevationMethod::Direct => self.runner.run(program, args, timeout),
            ElevationMethod::Pkexec => self.runner.run("pkexec", argv, timeout),
            ElevationMethod::Sudo => {
                let mut full = vec!["-n"];
                full.extend_from_slice(argv);
                self.runner.run("sudo", &full, timeout)
            }
            ElevationMethod::Unavailable => Err(CommandError::NoElevation),
        }
    }
}

/// 当前进程是否以 root 运行
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn access(path: &Path, mode: libc::c_int) -> bool {
    match CString::new(path.as_os_str().as_bytes()) {
        Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), mode) == 0 },
        Err(_) => false,
    }
}

/// 当前用户能否直接删除该路径
///
/// 删除需要父目录可写；删除目录树还需要目录本身可写可进入。
pub fn can_delete(path: &Path) -> bool {
    let parent_ok = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            access(parent, libc::W_OK | libc::X_OK)
        }
        _ => false,
    };
    if !parent_ok {
        return false;
    }

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => access(path, libc::W_OK | libc::X_OK),
        Ok(_) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn sudo_is_non_interactive() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("sudo -n rm -f -- /etc/foo.conf", 0, "", "");
        let elevator = SystemElevator::new(runner.clone(), ElevationMethod::Sudo);

        let out = elevator
            .run_elevated(&["rm", "-f", "--", "/etc/foo.conf"], Duration::from_secs(1))
            .unwrap();
        assert!(out.success());
        assert_eq!(runner.calls(), vec!["sudo -n rm -f -- /etc/foo.conf"]);
    }

    #[test]
    fn pkexec_prefixes_argv() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("pkexec snap remove foo", 0, "foo removed", "");
        let elevator = SystemElevator::new(runner.clone(), ElevationMethod::Pkexec);

        let out = elevator
            .run_elevated(&["snap", "remove", "foo"], Duration::from_secs(1))
            .unwrap();
        assert_eq!(out.stdout, "foo removed");
    }

    #[test]
    fn unavailable_elevation_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        let elevator = SystemElevator::new(runner.clone(), ElevationMethod::Unavailable);

        let err = elevator
            .run_elevated(&["true"], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, CommandError::NoElevation));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn can_delete_inside_own_tempdir() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(can_delete(&file));
        assert!(!can_delete(&tmp.path().join("missing")));
    }
}
