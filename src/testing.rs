//! 测试替身：脚本化命令执行器、记录型提权器与内存后端

use crate::backend::{Backend, InfoRecord, Outcome, Package, PackageSource, RemoveOptions};
use crate::command::{CommandOutput, CommandRunner, SystemRunner};
use crate::error::CommandError;
use crate::privilege::Elevator;
use crate::progress::Reporter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

enum Scripted {
    Output(CommandOutput),
    Timeout,
}

/// 按完整命令行返回预设输出；未登记的命令视为程序不存在
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, cmdline: &str, code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().insert(
            cmdline.to_string(),
            Scripted::Output(CommandOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
        );
    }

    pub fn time_out(&self, cmdline: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(cmdline.to_string(), Scripted::Timeout);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmdline = program.to_string();
        for arg in args {
            cmdline.push(' ');
            cmdline.push_str(arg);
        }
        self.calls.lock().unwrap().push(cmdline.clone());

        match self.responses.lock().unwrap().get(&cmdline) {
            Some(Scripted::Output(output)) => Ok(output.clone()),
            Some(Scripted::Timeout) => Err(CommandError::Timeout {
                program: program.to_string(),
                timeout,
            }),
            None => Err(CommandError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
            }),
        }
    }
}

enum Mode {
    Exit(i32),
    Passthrough,
}

/// 记录所有提权调用
pub struct RecordingElevator {
    mode: Mode,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingElevator {
    /// 所有调用都返回给定退出码
    pub fn exiting(code: i32) -> Self {
        Self {
            mode: Mode::Exit(code),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 以当前用户身份真实执行命令（模拟已是 root 的场景）
    pub fn passthrough() -> Self {
        Self {
            mode: Mode::Passthrough,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Elevator for RecordingElevator {
    fn run_elevated(
        &self,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());

        match self.mode {
            Mode::Exit(code) => Ok(CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: if code == 0 {
                    String::new()
                } else {
                    "Request dismissed".to_string()
                },
            }),
            Mode::Passthrough => match argv.split_first() {
                Some((program, args)) => SystemRunner.run(program, args, timeout),
                None => Ok(CommandOutput::default()),
            },
        }
    }
}

/// 可配置的内存后端
pub struct FakeBackend {
    pub source: PackageSource,
    pub packages: Vec<Package>,
    pub owned: Vec<PathBuf>,
    pub system: Vec<String>,
    pub force_supported: bool,
    pub remove_outcome: Outcome,
    pub residual: Vec<PathBuf>,
    /// `list_installed` 返回前的等待时间
    pub list_delay: Duration,
    removed: Mutex<Vec<(String, bool)>>,
    deregistered: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(source: PackageSource) -> Self {
        Self {
            source,
            packages: Vec::new(),
            owned: Vec::new(),
            system: Vec::new(),
            force_supported: false,
            remove_outcome: Outcome::ok("removed"),
            residual: Vec::new(),
            list_delay: Duration::ZERO,
            removed: Mutex::new(Vec::new()),
            deregistered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_packages(mut self, names: &[&str]) -> Self {
        self.packages = names
            .iter()
            .map(|name| Package::new(*name, self.source))
            .collect();
        self
    }

    /// (标识符, purge) 形式的卸载调用记录
    pub fn removed(&self) -> Vec<(String, bool)> {
        self.removed.lock().unwrap().clone()
    }

    pub fn deregistered(&self) -> Vec<String> {
        self.deregistered.lock().unwrap().clone()
    }
}

impl Backend for FakeBackend {
    fn source(&self) -> PackageSource {
        self.source
    }

    fn is_available(&self) -> bool {
        true
    }

    fn list_installed(&self) -> Vec<Package> {
        std::thread::sleep(self.list_delay);
        self.packages.clone()
    }

    fn get_info(&self, id: &str) -> InfoRecord {
        InfoRecord::unknown(id)
    }

    fn remove(&self, package: &Package, options: &RemoveOptions, reporter: &Reporter) -> Outcome {
        reporter.progress(format!("removing {}", package.name), 50);
        self.removed
            .lock()
            .unwrap()
            .push((package.name.clone(), options.purge));
        self.remove_outcome.clone()
    }

    fn residual_paths(&self, _package: &Package) -> Vec<PathBuf> {
        self.residual.clone()
    }

    fn owned_files(&self, _id: &str) -> Vec<PathBuf> {
        self.owned.clone()
    }

    fn is_system_package(&self, id: &str) -> bool {
        self.system.iter().any(|s| s == id)
    }

    fn supports_force_removal(&self) -> bool {
        self.force_supported
    }

    fn force_deregister(&self, id: &str) -> Outcome {
        self.deregistered.lock().unwrap().push(id.to_string());
        Outcome::ok(format!("{} deregistered", id))
    }
}
