//! 软件卸载：按来源分派到对应驱动；APT 另有绕过包管理器的强制移除

use crate::backend::{BackendRegistry, Outcome, Package, RemoveOptions};
use crate::command::Timeouts;
use crate::privilege::Elevator;
use crate::progress::{percent_of, Reporter};
use serde::Serialize;
use std::fs;
use std::sync::Arc;

/// 强制移除的结果；成功不代表系统已干净
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForceRemoval {
    pub success: bool,
    pub message: String,
    pub deleted: usize,
}

pub struct Uninstaller {
    registry: BackendRegistry,
    elevator: Arc<dyn Elevator>,
    timeouts: Timeouts,
}

impl Uninstaller {
    pub fn new(registry: BackendRegistry, elevator: Arc<dyn Elevator>, timeouts: Timeouts) -> Self {
        Self {
            registry,
            elevator,
            timeouts,
        }
    }

    /// 标准卸载；`force` 对 APT 意味着 purge，其它来源忽略
    pub fn uninstall(&self, package: &Package, force: bool, reporter: &Reporter) -> Outcome {
        let Some(backend) = self.registry.get(package.source) else {
            let message = format!("不支持的软件来源: {}", package.source);
            reporter.error(message.clone());
            return Outcome::failed(message);
        };

        log::info!("卸载 {} ({})", package.name, package.source);
        let outcome = backend.remove(package, &RemoveOptions { purge: force }, reporter);
        if !outcome.success {
            reporter.error(outcome.message.clone());
        }
        outcome
    }

    /// 逐个删除包登记的文件，再从包数据库中注销
    ///
    /// 普通文件提权 `rm -f`；目录只在为空时 `rmdir`；非空目录保留。
    pub fn force_remove_package(&self, package: &Package, reporter: &Reporter) -> ForceRemoval {
        let backend = match self.registry.get(package.source) {
            Some(backend) if backend.supports_force_removal() => backend,
            _ => {
                return ForceRemoval {
                    success: false,
                    message: format!("{} 不支持强制卸载", package.source),
                    deleted: 0,
                }
            }
        };

        reporter.progress(format!("正在强制移除 {}...", package.name), 20);
        let files = backend.owned_files(&package.name);
        reporter.progress(format!("发现 {} 个文件", files.len()), 40);

        let mut deleted = 0;
        let total = files.len();
        for (i, path) in files.iter().enumerate() {
            let Ok(meta) = fs::symlink_metadata(path) else {
                continue;
            };
            let path_str = path.to_string_lossy();
            let argv: Vec<&str> = if meta.is_dir() {
                let is_empty = fs::read_dir(path)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                if !is_empty {
                    continue;
                }
                vec!["rmdir", "--", path_str.as_ref()]
            } else {
                vec!["rm", "-f", "--", path_str.as_ref()]
            };

            match self.elevator.run_elevated(&argv, self.timeouts.file_op()) {
                Ok(out) if out.success() => deleted += 1,
                Ok(out) => reporter.error(format!("删除 {} 失败: {}", path.display(), out.message())),
                Err(e) => reporter.error(format!("删除 {} 失败: {}", path.display(), e)),
            }
            if i % 50 == 0 {
                reporter.progress(
                    format!("已删除 {} 个文件", deleted),
                    40 + percent_of(i, total) / 10 * 3,
                );
            }
        }
        reporter.progress(format!("已删除 {} 个文件", deleted), 70);

        let deregister = backend.force_deregister(&package.name);
        if !deregister.success {
            reporter.error(format!("注销 {} 失败: {}", package.name, deregister.message));
        }
        reporter.progress("强制卸载完成", 100);

        ForceRemoval {
            success: deregister.success,
            message: if deregister.success {
                format!("{} 已强制移除（删除 {} 个文件）", package.name, deleted)
            } else {
                format!("强制卸载未完成: {}", deregister.message)
            },
            deleted,
        }
    }
}
