//! Snap 驱动

use super::parser::{parse_snap_info, parse_snap_list};
use super::{existing, outcome_from, under_home, Backend, Tools};
use super::{InfoRecord, Outcome, Package, PackageSource, RemoveOptions};
use crate::command::{program_exists, query_stdout, CommandRunner, Timeouts};
use crate::privilege::Elevator;
use crate::progress::Reporter;
use crate::util::home_dir;
use std::path::PathBuf;
use std::sync::Arc;

pub struct SnapBackend {
    tools: Tools,
    home: Option<PathBuf>,
}

impl SnapBackend {
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
            "snap",
            args,
            self.tools.timeouts.file_op(),
        )
    }
}

impl Backend for SnapBackend {
    fn source(&self) -> PackageSource {
        PackageSource::Snap
    }

    fn is_available(&self) -> bool {
        program_exists(self.tools.runner.as_ref(), "snap", self.tools.timeouts.query())
    }

    fn list_installed(&self) -> Vec<Package> {
        self.query(&["list"])
            .map(|out| parse_snap_list(&out))
            .unwrap_or_default()
    }

    fn get_info(&self, id: &str) -> InfoRecord {
        match self.query(&["info", "--abs-time", id]) {
            Some(out) => parse_snap_info(&out, id),
            None => InfoRecord::unknown(id),
        }
    }

    fn remove(&self, package: &Package, _options: &RemoveOptions, reporter: &Reporter) -> Outcome {
        let id = package.name.as_str();
        reporter.progress(format!("正在卸载 {}...", id), 30);
        let outcome = outcome_from(
            self.tools
                .elevator
                .run_elevated(&["snap", "remove", id], self.tools.timeouts.removal()),
            format!("{} 已成功卸载", id),
        );
        reporter.progress("卸载完成", 100);
        if outcome.success {
            outcome
        } else {
            Outcome::failed(format!("卸载失败: {}", outcome.message))
        }
    }

    fn residual_paths(&self, package: &Package) -> Vec<PathBuf> {
        let id = package.name.as_str();
        let mut paths = vec![
            PathBuf::from("/var/snap").join(id),
            PathBuf::from("/root/snap").join(id),
        ];
        paths.extend(under_home(self.home.as_deref(), "snap").map(|p| p.join(id)));
        existing(paths)
    }
}
