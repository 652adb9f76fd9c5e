//! Flatpak 驱动

use super::parser::{parse_flatpak_info, parse_flatpak_list};
use super::{existing, outcome_from, under_home, Backend, Tools};
use super::{InfoRecord, Outcome, Package, PackageSource, RemoveOptions};
use crate::command::{program_exists, query_stdout, CommandRunner, Timeouts};
use crate::privilege::Elevator;
use crate::progress::Reporter;
use crate::util::home_dir;
use std::path::PathBuf;
use std::sync::Arc;

pub struct FlatpakBackend {
    tools: Tools,
    home: Option<PathBuf>,
}

impl FlatpakBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, elevator: Arc<dyn Elevator>, timeouts: Timeouts) -> Self {
        Self {
            tools: Tools {
                runner,
                elevator,
                timeouts,
            },
            home: home_dir(),
        }
    }

    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = Some(home);
        self
    }

    fn query(&self, args: &[&str]) -> Option<String> {
        query_stdout(
            self.tools.runner.as_ref(),
            "flatpak",
            args,
            self.tools.timeouts.file_op(),
        )
    }
}

impl Backend for FlatpakBackend {
    fn source(&self) -> PackageSource {
        PackageSource::Flatpak
    }

    fn is_available(&self) -> bool {
        program_exists(
            self.tools.runner.as_ref(),
            "flatpak",
            self.tools.timeouts.query(),
        )
    }

    fn list_installed(&self) -> Vec<Package> {
        self.query(&["list", "--app", "--columns=application,version"])
            .map(|out| parse_flatpak_list(&out))
            .unwrap_or_default()
    }

    fn get_info(&self, id: &str) -> InfoRecord {
        match self.query(&["info", id]) {
            Some(out) => parse_flatpak_info(&out, id),
            None => InfoRecord::unknown(id),
        }
    }

    /// 先以当前用户卸载（用户安装），失败再提权（系统安装）
    fn remove(&self, package: &Package, _options: &RemoveOptions, reporter: &Reporter) -> Outcome {
        let id = package.name.as_str();
        let argv = ["flatpak", "uninstall", "-y", id];
        reporter.progress(format!("正在卸载 {}...", id), 30);

        let direct = outcome_from(
            self.tools
                .runner
                .run("flatpak", &argv[1..], self.tools.timeouts.removal()),
            format!("{} 已成功卸载", id),
        );
        let outcome = if direct.success {
            direct
        } else {
            log::info!("以当前用户卸载 {} 失败，尝试提权: {}", id, direct.message);
            outcome_from(
                self.tools
                    .elevator
                    .run_elevated(&argv, self.tools.timeouts.removal()),
                format!("{} 已成功卸载", id),
            )
        };

        reporter.progress("卸载完成", 100);
        if outcome.success {
            outcome
        } else {
            Outcome::failed(format!("卸载失败: {}", outcome.message))
        }
    }

    fn residual_paths(&self, package: &Package) -> Vec<PathBuf> {
        let id = package.name.as_str();
        let mut paths: Vec<PathBuf> = under_home(self.home.as_deref(), ".var/app")
            .map(|p| p.join(id))
            .into_iter()
            .collect();
        paths.push(PathBuf::from("/var/lib/flatpak/app").join(id));
        existing(paths)
    }
}
