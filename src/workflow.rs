//! 卸载 + 清理流程的状态机，以及后台工作任务
//!
//! 工作任务跑在 `spawn_blocking` 上，只通过 [`WorkerEvent`] 通道回报进度，
//! 结果在任务结束时一次性交还给协调者。

use crate::backend::{Backend, Outcome, Package, PackageSource};
use crate::cleaner::{CleanReport, Cleaner};
use crate::error::TransitionError;
use crate::inventory::{Inventory, InventoryEngine};
use crate::progress::{Reporter, WorkerEvent};
use crate::residue::{ResidueFile, ResidueScanner};
use crate::uninstaller::{ForceRemoval, Uninstaller};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

/// 流程阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Scanning,
    Ready,
    Removing,
    Removed,
    RemoveFailed,
    ResidueScanning,
    ResidueReady,
    Cleaning,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Scanning => "Scanning",
            Stage::Ready => "Ready",
            Stage::Removing => "Removing",
            Stage::Removed => "Removed",
            Stage::RemoveFailed => "RemoveFailed",
            Stage::ResidueScanning => "ResidueScanning",
            Stage::ResidueReady => "ResidueReady",
            Stage::Cleaning => "Cleaning",
            Stage::Done => "Done",
        }
    }
}

/// 单个软件的 卸载 -> 残留扫描 -> 清理 流程
#[derive(Debug)]
pub struct Session {
    stage: Stage,
    inventory: Inventory,
    target: Option<Package>,
    removal: Option<Outcome>,
    residue: Vec<ResidueFile>,
    clean_report: Option<CleanReport>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            stage: Stage::Idle,
            inventory: Inventory::default(),
            target: None,
            removal: None,
            residue: Vec::new(),
            clean_report: None,
        }
    }

    /// 软件已在别处卸载：直接从 Removed 开始，只做残留扫描和清理
    pub fn for_residue(package: Package) -> Self {
        Self {
            stage: Stage::Removed,
            target: Some(package),
            ..Self::new()
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn target(&self) -> Option<&Package> {
        self.target.as_ref()
    }

    pub fn removal(&self) -> Option<&Outcome> {
        self.removal.as_ref()
    }

    pub fn residue(&self) -> &[ResidueFile] {
        &self.residue
    }

    pub fn clean_report(&self) -> Option<&CleanReport> {
        self.clean_report.as_ref()
    }

    fn advance(&mut self, from: &[Stage], to: Stage) -> Result<(), TransitionError> {
        if from.contains(&self.stage) {
            log::debug!("{} -> {}", self.stage.name(), to.name());
            self.stage = to;
            Ok(())
        } else {
            Err(TransitionError {
                from: self.stage.name(),
                to: to.name(),
            })
        }
    }

    // ===== 清单 =====

    pub fn begin_scan(&mut self) -> Result<(), TransitionError> {
        self.advance(&[Stage::Idle], Stage::Scanning)
    }

    pub fn finish_scan(&mut self, inventory: Inventory) -> Result<(), TransitionError> {
        self.advance(&[Stage::Scanning], Stage::Ready)?;
        self.inventory = inventory;
        Ok(())
    }

    // ===== 卸载 =====

    /// 选中软件并开始卸载，返回要交给工作任务的副本
    pub fn begin_remove(
        &mut self,
        source: PackageSource,
        name: &str,
    ) -> Result<Option<Package>, TransitionError> {
        if self.stage != Stage::Ready {
            return Err(TransitionError {
                from: self.stage.name(),
                to: Stage::Removing.name(),
            });
        }
        let Some(package) = self.inventory.find(source, name).cloned() else {
            return Ok(None);
        };
        self.advance(&[Stage::Ready], Stage::Removing)?;
        self.target = Some(package.clone());
        Ok(Some(package))
    }

    pub fn finish_remove(&mut self, outcome: Outcome) -> Result<(), TransitionError> {
        let to = if outcome.success {
            Stage::Removed
        } else {
            Stage::RemoveFailed
        };
        self.advance(&[Stage::Removing], to)?;
        self.removal = Some(outcome);
        Ok(())
    }

    // ===== 残留 =====

    /// 卸载失败后同样允许扫描残留
    pub fn begin_residue_scan(&mut self) -> Result<(), TransitionError> {
        self.advance(&[Stage::Removed, Stage::RemoveFailed], Stage::ResidueScanning)
    }

    pub fn finish_residue_scan(&mut self, files: Vec<ResidueFile>) -> Result<(), TransitionError> {
        self.advance(&[Stage::ResidueScanning], Stage::ResidueReady)?;
        self.residue = files;
        Ok(())
    }

    /// 设置某条残留的勾选状态；返回是否找到该路径
    fn set_selected(&mut self, path: &Path, selected: bool) -> Result<bool, TransitionError> {
        if self.stage != Stage::ResidueReady {
            return Err(TransitionError {
                from: self.stage.name(),
                to: Stage::ResidueReady.name(),
            });
        }
        match self.residue.iter_mut().find(|f| f.path == path) {
            Some(file) => {
                file.is_selected = selected;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn select(&mut self, path: &Path) -> Result<bool, TransitionError> {
        self.set_selected(path, true)
    }

    pub fn deselect(&mut self, path: &Path) -> Result<bool, TransitionError> {
        self.set_selected(path, false)
    }

    // ===== 清理 =====

    /// 用户确认删除集合；返回交给清理任务的快照
    pub fn confirm_clean(&mut self) -> Result<Vec<ResidueFile>, TransitionError> {
        self.advance(&[Stage::ResidueReady], Stage::Cleaning)?;
        Ok(self.residue.clone())
    }

    pub fn finish_clean(&mut self, report: CleanReport) -> Result<(), TransitionError> {
        self.advance(&[Stage::Cleaning], Stage::Done)?;
        // 是否真的删掉需要重新扫描确认
        self.residue.clear();
        self.clean_report = Some(report);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), TransitionError> {
        self.advance(&[Stage::Done], Stage::Idle)?;
        *self = Self::new();
        Ok(())
    }
}

// ===== 工作任务 =====

/// 后台任务：事件接收端 + 结果句柄
pub struct Worker<T> {
    pub events: mpsc::Receiver<WorkerEvent>,
    pub handle: JoinHandle<T>,
}

impl<T> Worker<T> {
    /// 转发事件直到任务结束，然后取回结果
    pub async fn finish(mut self, mut on_event: impl FnMut(WorkerEvent)) -> Result<T, JoinError> {
        while let Some(event) = self.events.recv().await {
            on_event(event);
        }
        self.handle.await
    }
}

fn spawn_worker<T, F>(job: F) -> Worker<T>
where
    T: Send + 'static,
    F: FnOnce(&Reporter) -> T + Send + 'static,
{
    let (reporter, events) = Reporter::channel();
    let handle = tokio::task::spawn_blocking(move || job(&reporter));
    Worker { events, handle }
}

pub fn spawn_scan(
    engine: Arc<InventoryEngine>,
    sources: Vec<PackageSource>,
    skip_system: bool,
) -> Worker<Inventory> {
    spawn_worker(move |reporter| engine.scan_all(&sources, skip_system, reporter))
}

pub fn spawn_uninstall(uninstaller: Arc<Uninstaller>, package: Package, force: bool) -> Worker<Outcome> {
    spawn_worker(move |reporter| uninstaller.uninstall(&package, force, reporter))
}

pub fn spawn_force_remove(uninstaller: Arc<Uninstaller>, package: Package) -> Worker<ForceRemoval> {
    spawn_worker(move |reporter| uninstaller.force_remove_package(&package, reporter))
}

pub fn spawn_residue_scan(
    scanner: Arc<ResidueScanner>,
    package: Package,
    backend: Option<Arc<dyn Backend>>,
) -> Worker<Vec<ResidueFile>> {
    spawn_worker(move |reporter| scanner.scan_package(&package, backend.as_deref(), reporter))
}

/// `files` 是协调者持有的快照，之后的重新扫描不会影响进行中的清理
pub fn spawn_clean(cleaner: Arc<Cleaner>, files: Vec<ResidueFile>) -> Worker<CleanReport> {
    spawn_worker(move |reporter| cleaner.clean(&files, reporter))
}

/// 清理前备份选中项；返回成功备份的数量
pub fn spawn_backup(cleaner: Arc<Cleaner>, files: Vec<ResidueFile>) -> Worker<usize> {
    spawn_worker(move |reporter| cleaner.backup_selected(&files, None, reporter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRegistry;
    use crate::command::Timeouts;
    use crate::residue::RootCategory;
    use crate::testing::{FakeBackend, RecordingElevator};
    use std::fs;

    fn ready_session() -> Session {
        let mut session = Session::new();
        session.begin_scan().unwrap();
        session
            .finish_scan(Inventory::new(vec![Package::new("demo", PackageSource::Apt)]))
            .unwrap();
        session
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut session = ready_session();
        let err = session.confirm_clean().unwrap_err();
        assert_eq!((err.from, err.to), ("Ready", "Cleaning"));
        assert!(session.begin_residue_scan().is_err());
        assert!(session.reset().is_err());
        assert!(session.select(Path::new("/x")).is_err());
        assert_eq!(session.stage(), Stage::Ready);

        let mut idle = Session::new();
        assert!(idle.finish_scan(Inventory::default()).is_err());
        assert!(idle.begin_remove(PackageSource::Apt, "demo").is_err());
    }

    #[test]
    fn failed_removal_still_allows_residue_scan() {
        let mut session = ready_session();
        assert!(session.begin_remove(PackageSource::Apt, "missing").unwrap().is_none());
        assert_eq!(session.stage(), Stage::Ready);

        let pkg = session.begin_remove(PackageSource::Apt, "demo").unwrap().unwrap();
        assert_eq!(pkg.name, "demo");
        session.finish_remove(Outcome::failed("E: lock")).unwrap();
        assert_eq!(session.stage(), Stage::RemoveFailed);
        session.begin_residue_scan().unwrap();
        assert_eq!(session.stage(), Stage::ResidueScanning);
    }

    #[test]
    fn full_flow_requires_confirmation_and_clears_residue() {
        let mut session = ready_session();
        session.begin_remove(PackageSource::Apt, "demo").unwrap();
        session.finish_remove(Outcome::ok("ok")).unwrap();
        session.begin_residue_scan().unwrap();

        let files = vec![
            ResidueFile {
                path: "/tmp/demo-a".into(),
                size: 1,
                kind: crate::residue::ResidueKind::Cache,
                safety: crate::residue::Safety::Safe,
                is_selected: true,
            },
            ResidueFile {
                path: "/tmp/demo-b".into(),
                size: 2,
                kind: crate::residue::ResidueKind::Cache,
                safety: crate::residue::Safety::Safe,
                is_selected: true,
            },
        ];
        session.finish_residue_scan(files).unwrap();
        assert!(session.deselect(Path::new("/tmp/demo-b")).unwrap());
        assert!(!session.deselect(Path::new("/tmp/unknown")).unwrap());

        let snapshot = session.confirm_clean().unwrap();
        assert!(!snapshot[1].is_selected);
        assert_eq!(session.stage(), Stage::Cleaning);

        session
            .finish_clean(CleanReport {
                success: true,
                deleted_count: 1,
                deleted_bytes: 1,
                unreported_errors: 0,
            })
            .unwrap();
        assert_eq!(session.stage(), Stage::Done);
        assert!(session.residue().is_empty());
        assert_eq!(session.clean_report().unwrap().deleted_count, 1);

        session.reset().unwrap();
        assert_eq!(session.stage(), Stage::Idle);
        assert!(session.target().is_none());
    }

    #[test]
    fn residue_only_session_skips_removal() {
        let mut session = Session::for_residue(Package::new("demo", PackageSource::Snap));
        assert_eq!(session.stage(), Stage::Removed);
        assert!(session.removal().is_none());
        assert!(session.begin_scan().is_err());
        session.begin_residue_scan().unwrap();
        session.finish_residue_scan(Vec::new()).unwrap();
        assert_eq!(session.target().unwrap().name, "demo");
    }

    #[tokio::test]
    async fn workers_stream_events_then_return() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path();
        fs::create_dir_all(home.join(".cache/demo")).unwrap();
        fs::write(home.join(".cache/demo/blob"), vec![0u8; 9]).unwrap();

        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(
            FakeBackend::new(PackageSource::Apt).with_packages(&["demo"]),
        ));
        let elevator = Arc::new(RecordingElevator::exiting(0));
        let engine = Arc::new(InventoryEngine::new(registry.clone(), None));
        let uninstaller = Arc::new(Uninstaller::new(
            registry.clone(),
            elevator.clone(),
            Timeouts::default(),
        ));
        let scanner = Arc::new(ResidueScanner::with_roots(
            vec![(RootCategory::UserCache, home.join(".cache"))],
            Some(home.to_path_buf()),
            2,
        ));
        let cleaner = Arc::new(Cleaner::new(elevator, Timeouts::default(), home.join("backup")));

        let mut session = Session::new();
        let mut seen = Vec::new();

        session.begin_scan().unwrap();
        let inventory = spawn_scan(engine, vec![], true)
            .finish(|e| seen.push(e))
            .await
            .unwrap();
        session.finish_scan(inventory).unwrap();

        let pkg = session.begin_remove(PackageSource::Apt, "demo").unwrap().unwrap();
        let outcome = spawn_uninstall(uninstaller, pkg.clone(), false)
            .finish(|e| seen.push(e))
            .await
            .unwrap();
        session.finish_remove(outcome).unwrap();

        session.begin_residue_scan().unwrap();
        let residue = spawn_residue_scan(scanner, pkg, registry.get(PackageSource::Apt))
            .finish(|e| seen.push(e))
            .await
            .unwrap();
        assert_eq!(residue.len(), 1);
        session.finish_residue_scan(residue).unwrap();

        let snapshot = session.confirm_clean().unwrap();
        let report = spawn_clean(cleaner, snapshot)
            .finish(|e| seen.push(e))
            .await
            .unwrap();
        assert_eq!(report.deleted_bytes, 9);
        session.finish_clean(report).unwrap();

        assert!(!home.join(".cache/demo").exists());
        assert!(seen
            .iter()
            .any(|e| matches!(e, WorkerEvent::Progress { percent: 100, .. })));
    }
}
