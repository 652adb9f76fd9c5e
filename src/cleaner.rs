//! 残留清理与备份
//!
//! 能直接删就直接删；没有写权限、或直接删除中途遇到权限错误时，提权重试一次。

use crate::command::Timeouts;
use crate::error::DeleteError;
use crate::privilege::{can_delete, Elevator};
use crate::progress::{percent_of, Reporter};
use crate::residue::ResidueFile;
use serde::Serialize;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// 以当前用户身份删除路径的接口
pub trait Remover: Send + Sync {
    fn is_writable(&self, path: &Path) -> bool;
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// 本地文件系统删除：文件 / 符号链接 unlink，目录递归删除
#[derive(Debug, Default)]
pub struct LocalRemover;

impl Remover for LocalRemover {
    fn is_writable(&self, path: &Path) -> bool {
        can_delete(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}

/// 一次清理的汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    /// 所有选中项都已删除
    pub success: bool,
    pub deleted_count: usize,
    pub deleted_bytes: u64,
    /// 通道已满、只写进日志的错误数
    pub unreported_errors: usize,
}

pub struct Cleaner {
    elevator: Arc<dyn Elevator>,
    remover: Arc<dyn Remover>,
    timeouts: Timeouts,
    backup_root: PathBuf,
}

impl Cleaner {
    pub fn new(elevator: Arc<dyn Elevator>, timeouts: Timeouts, backup_root: PathBuf) -> Self {
        Self {
            elevator,
            remover: Arc::new(LocalRemover),
            timeouts,
            backup_root,
        }
    }

    pub fn with_remover(mut self, remover: Arc<dyn Remover>) -> Self {
        self.remover = remover;
        self
    }

    /// 删除所有选中的残留；单项失败只上报，不中断批次
    pub fn clean(&self, files: &[ResidueFile], reporter: &Reporter) -> CleanReport {
        let selected: Vec<&ResidueFile> = files.iter().filter(|f| f.is_selected).collect();
        let total = selected.len();
        if total == 0 {
            return CleanReport {
                success: true,
                deleted_count: 0,
                deleted_bytes: 0,
                unreported_errors: 0,
            };
        }

        reporter.progress(format!("准备清理 {} 项...", total), 0);

        let mut deleted_count = 0;
        let mut deleted_bytes = 0;
        let mut failures = 0;
        for (i, file) in selected.iter().enumerate() {
            reporter.progress(
                format!("正在删除: {}", file.path.display()),
                percent_of(i, total),
            );
            match self.delete_path(&file.path) {
                Ok(()) => {
                    deleted_count += 1;
                    deleted_bytes += file.size;
                }
                Err(e) => {
                    failures += 1;
                    reporter.error(e.to_string());
                }
            }
        }

        let unreported_errors = reporter.dropped_errors();
        match unreported_errors {
            0 => reporter.progress("清理完成", 100),
            n => reporter.progress(format!("清理完成（另有 {} 条错误未显示，见日志）", n), 100),
        }
        CleanReport {
            success: failures == 0,
            deleted_count,
            deleted_bytes,
            unreported_errors,
        }
    }

    /// 删除单个路径；路径已不存在视为成功
    pub fn delete_path(&self, path: &Path) -> Result<(), DeleteError> {
        let is_dir = match fs::symlink_metadata(path) {
            Ok(meta) => meta.is_dir(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            // 类型未知（如父目录不可搜索），按目录处理
            Err(_) => true,
        };

        if self.remover.is_writable(path) {
            match self.remover.remove(path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    log::info!("直接删除 {} 被拒绝，提权重试", path.display());
                }
                Err(source) => {
                    return Err(DeleteError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        self.remove_elevated(path, is_dir)
    }

    fn remove_elevated(&self, path: &Path, is_dir: bool) -> Result<(), DeleteError> {
        let path_str = path.to_string_lossy();
        let flag = if is_dir { "-rf" } else { "-f" };
        let result = self
            .elevator
            .run_elevated(&["rm", flag, "--", path_str.as_ref()], self.timeouts.file_op());

        match result {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(DeleteError::Elevated {
                path: path.to_path_buf(),
                message: output.message(),
            }),
            Err(e) => Err(DeleteError::Elevated {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    // ===== 备份 =====

    /// 复制到 `<备份目录>/<文件名>.<时间戳>`；失败返回 None
    pub fn backup_file(&self, path: &Path, dest_dir: Option<&Path>) -> Option<PathBuf> {
        let root = dest_dir.unwrap_or(&self.backup_root);
        match backup_into(path, root) {
            Ok(target) => {
                log::info!("已备份 {} -> {}", path.display(), target.display());
                Some(target)
            }
            Err(e) => {
                log::warn!("备份 {} 失败: {}", path.display(), e);
                None
            }
        }
    }

    /// 备份所有选中项；失败只上报，不影响后续删除。返回成功备份的数量
    pub fn backup_selected(
        &self,
        files: &[ResidueFile],
        dest_dir: Option<&Path>,
        reporter: &Reporter,
    ) -> usize {
        let selected: Vec<&ResidueFile> = files.iter().filter(|f| f.is_selected).collect();
        let mut backed_up = 0;
        for (i, file) in selected.iter().enumerate() {
            match self.backup_file(&file.path, dest_dir) {
                Some(target) => {
                    reporter.progress(
                        format!("已备份 {} -> {}", file.path.display(), target.display()),
                        percent_of(i + 1, selected.len()),
                    );
                    backed_up += 1;
                }
                None => reporter.error(format!("备份 {} 失败，仍将删除", file.path.display())),
            }
        }
        backed_up
    }
}

fn backup_into(path: &Path, root: &Path) -> io::Result<PathBuf> {
    let meta = fs::symlink_metadata(path)?;
    let basename = path
        .file_name()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "路径没有文件名"))?
        .to_string_lossy()
        .to_string();
    fs::create_dir_all(root)?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut target = root.join(format!("{}.{}", basename, timestamp));
    let mut n = 1;
    while target.symlink_metadata().is_ok() {
        target = root.join(format!("{}.{}.{}", basename, timestamp, n));
        n += 1;
    }

    if meta.is_dir() {
        copy_dir(path, &target)?;
    } else if meta.file_type().is_symlink() {
        std::os::unix::fs::symlink(fs::read_link(path)?, &target)?;
    } else {
        copy_file(path, &target)?;
    }
    Ok(target)
}

/// 复制文件内容与权限，并保留修改时间
fn copy_file(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest)?;
    let modified = fs::metadata(src)?.modified()?;
    fs::File::options().write(true).open(dest)?.set_modified(modified)
}

/// 递归复制目录；符号链接原样重建，不跟随
fn copy_dir(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(ErrorKind::Other, e))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}
