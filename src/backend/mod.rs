//! 后端驱动：对 APT / Snap / Flatpak / AppImage 命令行工具的统一封装

pub mod appimage;
pub mod apt;
pub mod flatpak;
pub mod parser;
pub mod snap;
pub mod types;

pub use types::{InfoRecord, Outcome, Package, PackageSource, RemoveOptions};

use crate::command::{CommandOutput, CommandRunner, Timeouts};
use crate::config::Config;
use crate::error::CommandError;
use crate::privilege::Elevator;
use crate::progress::Reporter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 单个软件生态的能力接口
pub trait Backend: Send + Sync {
    fn source(&self) -> PackageSource;

    /// 该生态的工具是否存在
    fn is_available(&self) -> bool;

    /// 列出已安装软件；工具出错或超时返回空列表
    fn list_installed(&self) -> Vec<Package>;

    /// 查询详情；解析失败的字段取 "unknown"
    fn get_info(&self, id: &str) -> InfoRecord;

    fn remove(&self, package: &Package, options: &RemoveOptions, reporter: &Reporter) -> Outcome;

    /// 该生态约定的数据目录中、仍然存在的路径
    fn residual_paths(&self, package: &Package) -> Vec<PathBuf>;

    /// 包管理器登记的文件列表
    fn owned_files(&self, _id: &str) -> Vec<PathBuf> {
        Vec::new()
    }

    /// 是否在静态系统包名单中（用于列表过滤）
    fn is_system_package(&self, _id: &str) -> bool {
        false
    }

    /// 是否属于不应随意卸载的关键包（默认同静态名单）
    fn is_critical(&self, id: &str) -> bool {
        self.is_system_package(id)
    }

    /// 是否支持绕过依赖图的强制删除
    fn supports_force_removal(&self) -> bool {
        false
    }

    /// 从包数据库中强制注销
    fn force_deregister(&self, id: &str) -> Outcome {
        Outcome::failed(format!("{} 不支持强制注销 {}", self.source(), id))
    }
}

/// `PackageSource` -> 驱动 的查找表
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<PackageSource, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部四个标准驱动
    pub fn standard(
        runner: Arc<dyn CommandRunner>,
        elevator: Arc<dyn Elevator>,
        config: &Config,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(apt::AptBackend::new(
            runner.clone(),
            elevator.clone(),
            config.timeouts,
            config.policy.critical_rdepends_threshold,
        )));
        registry.register(Arc::new(snap::SnapBackend::new(
            runner.clone(),
            elevator.clone(),
            config.timeouts,
        )));
        registry.register(Arc::new(flatpak::FlatpakBackend::new(
            runner,
            elevator.clone(),
            config.timeouts,
        )));
        registry.register(Arc::new(appimage::AppImageBackend::new(
            elevator,
            config.timeouts,
        )));
        registry
    }

    /// 注册驱动；同一来源后注册的覆盖先注册的
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.source(), backend);
    }

    pub fn get(&self, source: PackageSource) -> Option<Arc<dyn Backend>> {
        self.backends.get(&source).cloned()
    }

    /// 已注册的来源（有序）
    pub fn sources(&self) -> Vec<PackageSource> {
        let mut sources: Vec<_> = self.backends.keys().copied().collect();
        sources.sort();
        sources
    }
}

/// 将一次命令执行转换为 `Outcome`
pub(crate) fn outcome_from(
    result: Result<CommandOutput, CommandError>,
    success_message: impl Into<String>,
) -> Outcome {
    match result {
        Ok(output) if output.success() => Outcome::ok(success_message),
        Ok(output) => {
            let message = output.message();
            if message.is_empty() {
                Outcome::failed(format!("命令失败（exit={:?}）", output.code))
            } else {
                Outcome::failed(message)
            }
        }
        Err(e) if e.is_timeout() => Outcome::failed(format!("操作超时: {}", e)),
        Err(e) => Outcome::failed(e.to_string()),
    }
}

/// 只保留磁盘上存在的路径（包括悬空符号链接）
pub(crate) fn existing(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    paths
        .into_iter()
        .filter(|p| p.symlink_metadata().is_ok())
        .collect()
}

/// 在 home 下拼接路径；无 home 时返回 None
pub(crate) fn under_home(home: Option<&Path>, rel: &str) -> Option<PathBuf> {
    home.map(|h| h.join(rel))
}

/// 各驱动共用的依赖
#[derive(Clone)]
pub(crate) struct Tools {
    pub runner: Arc<dyn CommandRunner>,
    pub elevator: Arc<dyn Elevator>,
    pub timeouts: Timeouts,
}
