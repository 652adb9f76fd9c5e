//! 软件清单：汇总所有驱动的已安装列表

use crate::backend::{Backend, BackendRegistry, InfoRecord, Package, PackageSource};
use crate::desktop::NameResolver;
use crate::progress::{percent_of, Reporter};
use std::sync::{Arc, Mutex};

/// 一次扫描得到的快照
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    packages: Vec<Package>,
}

impl Inventory {
    pub fn new(packages: Vec<Package>) -> Self {
        Self { packages }
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// 按标识符或显示名称搜索（不区分大小写）
    pub fn search(&self, keyword: &str) -> Vec<&Package> {
        let keyword = keyword.to_lowercase();
        self.packages
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&keyword)
                    || p.display_name.to_lowercase().contains(&keyword)
            })
            .collect()
    }

    pub fn filter_by_source(&self, source: PackageSource) -> Vec<&Package> {
        self.packages.iter().filter(|p| p.source == source).collect()
    }

    pub fn find(&self, source: PackageSource, name: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|p| p.source == source && p.name == name)
    }
}

pub struct InventoryEngine {
    registry: BackendRegistry,
    resolver: Option<Mutex<NameResolver>>,
}

impl InventoryEngine {
    /// `resolver` 为 None 时不解析显示名称
    pub fn new(registry: BackendRegistry, resolver: Option<NameResolver>) -> Self {
        Self {
            registry,
            resolver: resolver.map(Mutex::new),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// 扫描给定来源（为空时扫描全部已注册来源），每个来源一个线程
    pub fn scan_all(
        &self,
        sources: &[PackageSource],
        skip_system: bool,
        reporter: &Reporter,
    ) -> Inventory {
        let sources = if sources.is_empty() {
            self.registry.sources()
        } else {
            sources.to_vec()
        };
        let backends: Vec<(PackageSource, Option<Arc<dyn Backend>>)> = sources
            .iter()
            .map(|s| (*s, self.registry.get(*s)))
            .collect();
        let total = backends.len();

        reporter.progress("正在扫描已安装软件...", 0);
        // 按完成顺序计数；计数与上报在同一把锁内，百分比单调不减
        let completed = Mutex::new(0usize);
        let finish_one = |message: String| {
            let mut done = completed.lock().unwrap_or_else(|e| e.into_inner());
            *done += 1;
            reporter.progress(message, percent_of(*done, total));
        };

        let results: Vec<(Arc<dyn Backend>, Vec<Package>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = backends
                .iter()
                .map(|(source, backend)| {
                    let finish_one = &finish_one;
                    scope.spawn(move || {
                        let Some(backend) = backend.clone() else {
                            reporter.error(format!("未注册的软件来源: {}", source));
                            finish_one(format!("{}: 跳过", source));
                            return None;
                        };
                        if !backend.is_available() {
                            log::info!("{} 不可用，跳过", source);
                            finish_one(format!("{}: 不可用", source));
                            return Some((backend, Vec::new()));
                        }
                        let packages = backend.list_installed();
                        finish_one(format!("{}: 发现 {} 个软件", source, packages.len()));
                        Some((backend, packages))
                    })
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(result) => result,
                    Err(_) => {
                        reporter.error("扫描线程异常退出");
                        None
                    }
                })
                .collect()
        });

        let mut packages = Vec::new();
        for (backend, list) in results {
            let before = list.len();
            let mut kept: Vec<Package> = list
                .into_iter()
                .filter(|p| !(skip_system && backend.is_system_package(&p.name)))
                .collect();
            if kept.len() != before {
                log::debug!("{}: 过滤 {} 个系统包", backend.source(), before - kept.len());
            }
            self.resolve_names(backend.as_ref(), &mut kept);
            packages.extend(kept);
        }

        packages.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then(a.source.cmp(&b.source))
                .then_with(|| a.name.cmp(&b.name))
        });
        reporter.progress(format!("扫描完成，共 {} 个软件", packages.len()), 100);
        Inventory::new(packages)
    }

    fn resolve_names(&self, backend: &dyn Backend, packages: &mut [Package]) {
        let Some(resolver) = &self.resolver else {
            return;
        };
        let mut resolver = resolver.lock().unwrap_or_else(|e| e.into_inner());
        for pkg in packages.iter_mut() {
            if let Some(name) = resolver.lookup(&pkg.name, Some(backend)) {
                pkg.display_name = name;
            }
        }
    }

    pub fn get_info(&self, source: PackageSource, id: &str) -> InfoRecord {
        match self.registry.get(source) {
            Some(backend) => backend.get_info(id),
            None => InfoRecord::unknown(id),
        }
    }

    /// 重建名称缓存
    pub fn refresh_names(&self) -> usize {
        match &self.resolver {
            Some(resolver) => {
                let mut resolver = resolver.lock().unwrap_or_else(|e| e.into_inner());
                resolver.refresh();
                resolver.entry_count()
            }
            None => 0,
        }
    }
}
