//! AppImage 驱动：没有包管理器，直接扫描常见目录中的 `*.AppImage` 文件

use super::parser::parse_appimage_name;
use super::{existing, outcome_from, Backend};
use super::{InfoRecord, Outcome, Package, PackageSource, RemoveOptions};
use crate::command::Timeouts;
use crate::privilege::Elevator;
use crate::progress::Reporter;
use crate::util::{format_size, home_dir, system_time_to_date};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct AppImageBackend {
    elevator: Arc<dyn Elevator>,
    timeouts: Timeouts,
    search_dirs: Vec<PathBuf>,
    home: Option<PathBuf>,
}

impl AppImageBackend {
    pub fn new(elevator: Arc<dyn Elevator>, timeouts: Timeouts) -> Self {
        let home = home_dir();
        let mut search_dirs = Vec::new();
        if let Some(home) = &home {
            search_dirs.push(home.join("Applications"));
            search_dirs.push(home.join(".local/bin"));
            search_dirs.push(home.join("bin"));
        }
        search_dirs.push(PathBuf::from("/opt"));
        search_dirs.push(PathBuf::from("/usr/local/bin"));

        Self {
            elevator,
            timeouts,
            search_dirs,
            home,
        }
    }

    /// 替换搜索目录与 home（测试用）
    pub fn with_dirs(mut self, search_dirs: Vec<PathBuf>, home: PathBuf) -> Self {
        self.search_dirs = search_dirs;
        self.home = Some(home);
        self
    }

    fn find_appimages(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for dir in &self.search_dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    if e.kind() != ErrorKind::NotFound {
                        log::debug!("扫描 {} 失败: {}", dir.display(), e);
                    }
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_appimage = entry
                    .file_name()
                    .to_string_lossy()
                    .to_lowercase()
                    .ends_with(".appimage");
                if is_appimage && path.is_file() {
                    found.push(path);
                }
            }
        }
        found
    }

    fn locate(&self, package: &Package) -> Option<PathBuf> {
        package.location.clone().or_else(|| {
            self.find_appimages()
                .into_iter()
                .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == package.name))
        })
    }
}

fn package_from_path(path: &Path) -> Option<Package> {
    let filename = path.file_name()?.to_string_lossy().to_string();
    let mut pkg = Package::new(filename.as_str(), PackageSource::AppImage);
    pkg.display_name = parse_appimage_name(&filename);
    pkg.description = format!("AppImage: {}", path.display());
    if let Ok(meta) = fs::metadata(path) {
        pkg.size = format_size(meta.len());
        if let Ok(modified) = meta.modified() {
            pkg.install_date = system_time_to_date(modified);
        }
    }
    pkg.location = Some(path.to_path_buf());
    Some(pkg)
}

impl Backend for AppImageBackend {
    fn source(&self) -> PackageSource {
        PackageSource::AppImage
    }

    fn is_available(&self) -> bool {
        true
    }

    fn list_installed(&self) -> Vec<Package> {
        self.find_appimages()
            .iter()
            .filter_map(|path| package_from_path(path))
            .collect()
    }

    fn get_info(&self, id: &str) -> InfoRecord {
        let pkg = self
            .find_appimages()
            .into_iter()
            .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == id))
            .and_then(|p| package_from_path(&p));

        let mut info = InfoRecord::unknown(id);
        if let Some(pkg) = pkg {
            info.size = pkg.size;
            info.install_date = pkg.install_date;
            info.description = pkg.description;
            if let Some(dir) = pkg.location.as_deref().and_then(Path::parent) {
                info.origin = dir.display().to_string();
            }
        }
        info
    }

    fn remove(&self, package: &Package, _options: &RemoveOptions, reporter: &Reporter) -> Outcome {
        reporter.progress(format!("正在删除 {}...", package.name), 30);

        let Some(path) = self.locate(package).filter(|p| p.symlink_metadata().is_ok()) else {
            return Outcome::failed(format!("文件不存在: {}", package.name));
        };

        let outcome = match fs::remove_file(&path) {
            Ok(()) => Outcome::ok(format!("{} 已成功删除", package.name)),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                log::info!("直接删除 {} 被拒绝，提权重试", path.display());
                let path_str = path.to_string_lossy();
                let result = outcome_from(
                    self.elevator.run_elevated(
                        &["rm", "-f", "--", path_str.as_ref()],
                        self.timeouts.file_op(),
                    ),
                    format!("{} 已成功删除", package.name),
                );
                if result.success {
                    result
                } else {
                    Outcome::failed(format!("删除失败: {}", result.message))
                }
            }
            Err(e) => Outcome::failed(format!("删除失败: {}", e)),
        };

        reporter.progress("卸载完成", 100);
        outcome
    }

    fn residual_paths(&self, package: &Package) -> Vec<PathBuf> {
        let app_name = parse_appimage_name(&package.name).to_lowercase();
        if app_name.trim().is_empty() {
            return Vec::new();
        }
        let matches = |name: &str| name.to_lowercase().contains(&app_name);

        let mut paths = Vec::new();
        if let Some(home) = &self.home {
            let desktop_dir = home.join(".local/share/applications");
            for entry in fs::read_dir(&desktop_dir).into_iter().flatten().flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(".desktop") && matches(&name) {
                    paths.push(entry.path());
                }
            }
            for dir in [".local/share", ".config", ".cache"] {
                for entry in fs::read_dir(home.join(dir)).into_iter().flatten().flatten() {
                    if matches(&entry.file_name().to_string_lossy()) {
                        paths.push(entry.path());
                    }
                }
            }
        }
        paths.push(PathBuf::from(format!("/tmp/.mount_{}", package.name)));

        paths.sort();
        paths.dedup();
        existing(paths)
    }
}
