//! APT / dpkg 驱动

use super::parser::{
    parse_apt_depends, parse_apt_rdepends, parse_conffiles, parse_dpkg_files, parse_dpkg_log,
    parse_dpkg_query_list, parse_dpkg_status,
};
use super::{existing, outcome_from, Backend, Tools};
use super::{InfoRecord, Outcome, Package, PackageSource, RemoveOptions};
use crate::command::{program_exists, query_stdout, CommandRunner, Timeouts};
use crate::privilege::Elevator;
use crate::progress::Reporter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const LIST_FORMAT: &str =
    "${Package}|${Version}|${Installed-Size}|${Status}|${binary:Summary}\n";

/// 系统关键包：默认不出现在列表中
pub const SYSTEM_PACKAGES: &[&str] = &[
    "apt",
    "dpkg",
    "systemd",
    "udev",
    "dbus",
    "polkit",
    "login",
    "passwd",
    "adduser",
    "base-files",
    "base-passwd",
    "xorg",
    "xserver",
    "wayland",
    "mesa",
    "libgl",
    "networkd",
    "networkmanager",
    "wpa-supplicant",
    "gdm",
    "gdm3",
    "lightdm",
    "sddm",
    "gnome-core",
    "gnome-shell",
    "kde-plasma-desktop",
    "python3",
    "python3-minimal",
    "libpython3",
    "bash",
    "coreutils",
    "findutils",
    "grep",
    "gzip",
    "sed",
    "tar",
    "util-linux",
    "lsb",
    "linux-firmware",
    "amd64-microcode",
    "intel-microcode",
    "grub",
    "shim",
    "libc6",
    "libstdc++",
    "libstdc++6",
    "libgcc",
    "openssl",
    "ca-certificates",
    "ubuntu-desktop",
    "ubuntu-minimal",
    "ubuntu-standard",
    "ubuntu-desktop-minimal",
    "ubuntu-desktop-recommended",
];

pub struct AptBackend {
    tools: Tools,
    rdepends_threshold: usize,
    dpkg_logs: Vec<PathBuf>,
}

impl AptBackend {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        elevator: Arc<dyn Elevator>,
        timeouts: Timeouts,
        rdepends_threshold: usize,
    ) -> Self {
        Self {
            tools: Tools {
                runner,
                elevator,
                timeouts,
            },
            rdepends_threshold,
            dpkg_logs: vec![
                PathBuf::from("/var/log/dpkg.log"),
                PathBuf::from("/var/log/dpkg.log.1"),
            ],
        }
    }

    /// 替换读取安装日期用的 dpkg 日志
    pub fn with_dpkg_logs(mut self, logs: Vec<PathBuf>) -> Self {
        self.dpkg_logs = logs;
        self
    }

    fn query(&self, program: &str, args: &[&str]) -> Option<String> {
        query_stdout(
            self.tools.runner.as_ref(),
            program,
            args,
            self.tools.timeouts.query(),
        )
    }

    /// 从 dpkg 日志读取 包名 -> 首次安装日期
    fn install_dates(&self) -> HashMap<String, String> {
        let mut dates = HashMap::new();
        // dpkg.log.1 更早，先读
        for log_path in self.dpkg_logs.iter().rev() {
            match std::fs::read_to_string(log_path) {
                Ok(content) => parse_dpkg_log(&content, &mut dates),
                Err(e) => log::debug!("读取 {} 失败: {}", log_path.display(), e),
            }
        }
        dates
    }

    // ===== 查询 =====

    /// 依赖列表 (apt-cache depends)
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.query("apt-cache", &["depends", id])
            .map(|out| parse_apt_depends(&out))
            .unwrap_or_default()
    }

    /// 已安装的反向依赖 (apt-cache rdepends --installed)
    pub fn reverse_dependents(&self, id: &str) -> Vec<String> {
        self.query("apt-cache", &["rdepends", "--installed", id])
            .map(|out| parse_apt_rdepends(&out))
            .unwrap_or_default()
    }

    /// 系统关键包：静态名单，或反向依赖数超过阈值
    pub fn is_system_critical(&self, id: &str) -> bool {
        if self.is_system_package(id) {
            return true;
        }
        let dependents = self.reverse_dependents(id).len();
        if dependents > self.rdepends_threshold {
            log::info!("{} 有 {} 个反向依赖，视为系统关键包", id, dependents);
            return true;
        }
        false
    }

    // ===== 卸载 =====

    /// 清理不再需要的依赖 (apt-get autoremove)
    pub fn autoremove(&self) -> Outcome {
        outcome_from(
            self.tools.elevator.run_elevated(
                &["apt-get", "autoremove", "-y"],
                self.tools.timeouts.removal(),
            ),
            "依赖清理完成",
        )
    }

    /// 尝试停止同名服务，失败忽略
    fn stop_service(&self, id: &str) {
        let result = self
            .tools
            .elevator
            .run_elevated(&["systemctl", "stop", id], self.tools.timeouts.query());
        match result {
            Ok(out) if out.success() => log::info!("已停止服务 {}", id),
            Ok(out) => log::debug!("停止服务 {} 未成功: {}", id, out.message()),
            Err(e) => log::debug!("停止服务 {} 未成功: {}", id, e),
        }
    }
}

impl Backend for AptBackend {
    fn source(&self) -> PackageSource {
        PackageSource::Apt
    }

    fn is_available(&self) -> bool {
        program_exists(
            self.tools.runner.as_ref(),
            "dpkg-query",
            self.tools.timeouts.query(),
        )
    }

    fn list_installed(&self) -> Vec<Package> {
        let Some(output) = self.query("dpkg-query", &["-W", "-f", LIST_FORMAT]) else {
            return Vec::new();
        };
        parse_dpkg_query_list(&output, &self.install_dates())
    }

    fn get_info(&self, id: &str) -> InfoRecord {
        let mut info = match self.query("dpkg", &["-s", id]) {
            Some(out) => parse_dpkg_status(&out, id),
            None => InfoRecord::unknown(id),
        };
        if let Some(date) = self.install_dates().remove(id) {
            info.install_date = date;
        }
        info
    }

    fn remove(&self, package: &Package, options: &RemoveOptions, reporter: &Reporter) -> Outcome {
        let id = package.name.as_str();

        reporter.progress(format!("正在停止 {} 相关服务...", id), 10);
        self.stop_service(id);

        reporter.progress(format!("正在卸载 {}...", id), 30);
        let mut argv = vec!["apt-get", "remove"];
        if options.purge {
            argv.push("--purge");
        }
        argv.extend(["-y", id]);
        let outcome = outcome_from(
            self.tools
                .elevator
                .run_elevated(&argv, self.tools.timeouts.removal()),
            format!("{} 已成功卸载", id),
        );

        // 无论卸载是否成功都清理依赖
        reporter.progress("正在清理依赖...", 80);
        let cleanup = self.autoremove();
        if !cleanup.success {
            reporter.error(format!("依赖清理失败: {}", cleanup.message));
        }

        reporter.progress("卸载完成", 100);
        if outcome.success {
            outcome
        } else {
            Outcome::failed(format!("卸载失败: {}", outcome.message))
        }
    }

    fn residual_paths(&self, package: &Package) -> Vec<PathBuf> {
        let output = self.query("dpkg-query", &["-W", "-f", "${Conffiles}\n", &package.name]);
        existing(output.map(|o| parse_conffiles(&o)).unwrap_or_default())
    }

    fn owned_files(&self, id: &str) -> Vec<PathBuf> {
        query_stdout(
            self.tools.runner.as_ref(),
            "dpkg",
            &["-L", id],
            self.tools.timeouts.file_op(),
        )
        .map(|out| parse_dpkg_files(&out))
        .unwrap_or_default()
    }

    fn is_system_package(&self, id: &str) -> bool {
        SYSTEM_PACKAGES.contains(&id)
    }

    fn is_critical(&self, id: &str) -> bool {
        self.is_system_critical(id)
    }

    fn supports_force_removal(&self) -> bool {
        true
    }

    fn force_deregister(&self, id: &str) -> Outcome {
        outcome_from(
            self.tools.elevator.run_elevated(
                &["dpkg", "--remove", "--force-remove-reinstreq", id],
                self.tools.timeouts.file_op(),
            ),
            format!("{} 已从 dpkg 数据库移除", id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{drain, WorkerEvent};
    use crate::testing::{RecordingElevator, ScriptedRunner};

    fn backend(runner: Arc<ScriptedRunner>, elevator: Arc<RecordingElevator>) -> AptBackend {
        AptBackend::new(runner, elevator, Timeouts::default(), 50).with_dpkg_logs(Vec::new())
    }

    fn list_cmd() -> String {
        format!("dpkg-query -W -f {}", LIST_FORMAT)
    }

    #[test]
    fn list_installed_uses_dpkg_log_dates() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("dpkg.log");
        let old_log = tmp.path().join("dpkg.log.1");
        std::fs::write(&log, "2024-05-01 08:00:00 install htop:amd64 <none> 3.3.0-4\n").unwrap();
        std::fs::write(
            &old_log,
            "2023-11-20 08:00:00 install htop:amd64 <none> 3.2.2-2\n",
        )
        .unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            &list_cmd(),
            0,
            "htop|3.3.0-4|400|install ok installed|interactive processes viewer\n",
            "",
        );
        let apt = backend(runner, Arc::new(RecordingElevator::exiting(0)))
            .with_dpkg_logs(vec![log, old_log]);

        let packages = apt.list_installed();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].install_date, "2023-11-20");
    }

    #[test]
    fn list_installed_is_empty_when_tool_missing() {
        let apt = backend(
            Arc::new(ScriptedRunner::new()),
            Arc::new(RecordingElevator::exiting(0)),
        );
        assert!(apt.list_installed().is_empty());
        assert!(!apt.is_available());
    }

    #[test]
    fn get_info_never_fails() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("dpkg -s ghost", 1, "", "dpkg-query: package 'ghost' is not installed");
        let apt = backend(runner, Arc::new(RecordingElevator::exiting(0)));
        assert_eq!(apt.get_info("ghost"), InfoRecord::unknown("ghost"));
    }

    #[test]
    fn remove_stops_service_then_purges_then_autoremoves() {
        let elevator = Arc::new(RecordingElevator::exiting(0));
        let apt = backend(Arc::new(ScriptedRunner::new()), elevator.clone());
        let (reporter, mut rx) = Reporter::channel();

        let outcome = apt.remove(
            &Package::new("nginx", PackageSource::Apt),
            &RemoveOptions { purge: true },
            &reporter,
        );
        assert!(outcome.success);
        assert_eq!(
            elevator.calls(),
            vec![
                vec!["systemctl", "stop", "nginx"],
                vec!["apt-get", "remove", "--purge", "-y", "nginx"],
                vec!["apt-get", "autoremove", "-y"],
            ]
        );

        let percents: Vec<u8> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress { percent, .. } => Some(percent),
                WorkerEvent::Error(_) => None,
            })
            .collect();
        assert_eq!(percents, vec![10, 30, 80, 100]);
    }

    #[test]
    fn autoremove_runs_even_when_removal_fails() {
        let elevator = Arc::new(RecordingElevator::exiting(1));
        let apt = backend(Arc::new(ScriptedRunner::new()), elevator.clone());

        let outcome = apt.remove(
            &Package::new("nginx", PackageSource::Apt),
            &RemoveOptions::default(),
            &Reporter::silent(),
        );
        assert!(!outcome.success);
        assert!(outcome.message.contains("Request dismissed"));
        let calls = elevator.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], vec!["apt-get", "remove", "-y", "nginx"]);
        assert_eq!(calls[2], vec!["apt-get", "autoremove", "-y"]);
    }

    #[test]
    fn system_critical_by_list_or_rdepends() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut rdepends = String::from("libfoo1\nReverse Depends:\n");
        for i in 0..51 {
            rdepends.push_str(&format!("  dependent{i}\n"));
        }
        runner.respond("apt-cache rdepends --installed libfoo1", 0, &rdepends, "");
        runner.respond(
            "apt-cache rdepends --installed htop",
            0,
            "htop\nReverse Depends:\n",
            "",
        );
        let apt = backend(runner.clone(), Arc::new(RecordingElevator::exiting(0)));

        assert!(apt.is_system_critical("base-files"));
        assert!(apt.is_system_critical("libfoo1"));
        assert!(!apt.is_system_critical("htop"));
        // 静态名单命中时不查询 rdepends
        assert!(!runner.calls().iter().any(|c| c.ends_with("base-files")));
    }

    #[test]
    fn residual_paths_are_existing_conffiles() {
        let tmp = tempfile::tempdir().unwrap();
        let kept = tmp.path().join("nginx.conf");
        std::fs::write(&kept, "worker_processes 1;").unwrap();
        let gone = tmp.path().join("gone.conf");

        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "dpkg-query -W -f ${Conffiles}\n nginx",
            0,
            &format!(" {} abc\n {} def\n", kept.display(), gone.display()),
            "",
        );
        let apt = backend(runner, Arc::new(RecordingElevator::exiting(0)));

        let paths = apt.residual_paths(&Package::new("nginx", PackageSource::Apt));
        assert_eq!(paths, vec![kept]);
    }

    #[test]
    fn dependencies_and_force_deregister() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("apt-cache depends htop", 0, "htop\n  Depends: libc6\n  Depends: libncursesw6\n", "");
        let elevator = Arc::new(RecordingElevator::exiting(0));
        let apt = backend(runner, elevator.clone());

        assert_eq!(apt.dependencies("htop"), vec!["libc6", "libncursesw6"]);
        assert!(apt.force_deregister("htop").success);
        assert_eq!(
            elevator.calls(),
            vec![vec!["dpkg", "--remove", "--force-remove-reinstreq", "htop"]]
        );
    }
}
