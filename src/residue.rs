//! 残留扫描：按关键词遍历常见的系统 / 用户目录，找出卸载后遗留的配置、缓存、日志与数据
//!
//! 匹配是宽松的子串匹配：宁可多报，由用户在清理前取消勾选。
//! 遍历从不跟随符号链接；无权限的子树直接跳过。

use crate::backend::{Backend, Package};
use crate::progress::{percent_of, Reporter};
use crate::util::{entry_size, format_size, home_dir};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// 提示谨慎删除的路径前缀
const CAUTION_PREFIXES: [&str; 4] = ["/etc/systemd", "/etc/init.d", "/etc/rc", "/usr/local/bin"];

/// 残留类型（排序顺序即展示顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidueKind {
    Configuration,
    Log,
    Cache,
    Data,
    Other,
}

impl ResidueKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResidueKind::Configuration => "配置文件",
            ResidueKind::Log => "日志文件",
            ResidueKind::Cache => "缓存文件",
            ResidueKind::Data => "数据文件",
            ResidueKind::Other => "其他",
        }
    }
}

/// 建议性的安全等级，不阻止删除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Safety {
    Safe,
    Caution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResidueFile {
    pub path: PathBuf,
    /// 字节数；目录为其下普通文件之和
    pub size: u64,
    pub kind: ResidueKind,
    pub safety: Safety,
    pub is_selected: bool,
}

impl ResidueFile {
    pub fn size_str(&self) -> String {
        format_size(self.size)
    }
}

/// 扫描根目录的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootCategory {
    SystemConfig,
    SystemLog,
    SystemData,
    UserConfig,
    UserCache,
    UserData,
    UsrLocal,
}

impl RootCategory {
    fn is_config(self) -> bool {
        matches!(self, RootCategory::SystemConfig | RootCategory::UserConfig)
    }

    fn is_log(self) -> bool {
        self == RootCategory::SystemLog
    }

    fn is_cache(self) -> bool {
        self == RootCategory::UserCache
    }

    fn is_data(self) -> bool {
        matches!(self, RootCategory::SystemData | RootCategory::UserData)
    }
}

/// 默认的扫描根目录表
pub fn default_roots(home: Option<&Path>) -> Vec<(RootCategory, PathBuf)> {
    let mut roots = vec![
        (RootCategory::SystemConfig, PathBuf::from("/etc")),
        (RootCategory::SystemLog, PathBuf::from("/var/log")),
        (RootCategory::SystemData, PathBuf::from("/var/lib")),
        (RootCategory::SystemData, PathBuf::from("/opt")),
    ];
    if let Some(home) = home {
        roots.push((RootCategory::UserConfig, home.join(".config")));
        roots.push((RootCategory::UserCache, home.join(".cache")));
        roots.push((RootCategory::UserData, home.join(".local/share")));
        roots.push((RootCategory::UserData, home.join(".local/state")));
    }
    roots.push((RootCategory::UsrLocal, PathBuf::from("/usr/local")));
    roots
}

/// 由标识符生成关键词：原样、去 `-`、去 `_`、分隔符换成空格，各自再加大小写变体
pub fn generate_keywords(id: &str, min_len: usize) -> Vec<String> {
    if id.trim().is_empty() {
        return Vec::new();
    }

    let display = id.replace(['-', '_'], " ");
    let variants = [
        id.to_string(),
        id.replace('-', ""),
        id.replace('_', ""),
        display,
    ];

    let mut keywords = BTreeSet::new();
    for variant in variants {
        keywords.insert(variant.to_lowercase());
        keywords.insert(variant.to_uppercase());
        keywords.insert(variant);
    }

    keywords
        .into_iter()
        .filter(|k| k.trim().chars().count() >= min_len)
        .collect()
}

/// 按触发类别与路径特征判断残留类型
pub fn classify(category: RootCategory, path: &Path) -> ResidueKind {
    let path_str = path.to_string_lossy();
    let lower = path_str.to_lowercase();

    if category.is_config() || path_str.contains("/etc/") || path_str.contains(".config") {
        ResidueKind::Configuration
    } else if category.is_log() || path_str.contains("/log/") || lower.ends_with(".log") {
        ResidueKind::Log
    } else if category.is_cache() || path_str.contains("/cache/") {
        ResidueKind::Cache
    } else if category.is_data() {
        ResidueKind::Data
    } else {
        ResidueKind::Other
    }
}

pub fn safety_of(path: &Path) -> Safety {
    let path_str = path.to_string_lossy();
    if CAUTION_PREFIXES.iter().any(|p| path_str.starts_with(p)) {
        Safety::Caution
    } else {
        Safety::Safe
    }
}

fn residue_entry(category: RootCategory, path: PathBuf) -> ResidueFile {
    ResidueFile {
        size: entry_size(&path),
        kind: classify(category, &path),
        safety: safety_of(&path),
        is_selected: true,
        path,
    }
}

fn sort_residue(files: &mut [ResidueFile]) {
    files.sort_by(|a, b| (a.kind, &a.path).cmp(&(b.kind, &b.path)));
}

/// 单个根目录默认的遍历时限
const DEFAULT_WALK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ResidueScanner {
    roots: Vec<(RootCategory, PathBuf)>,
    home: Option<PathBuf>,
    min_keyword_len: usize,
    /// 每个根目录的遍历时限，超时后保留已找到的部分
    walk_timeout: Duration,
}

impl ResidueScanner {
    pub fn new(min_keyword_len: usize) -> Self {
        let home = home_dir();
        Self {
            roots: default_roots(home.as_deref()),
            home,
            min_keyword_len,
            walk_timeout: DEFAULT_WALK_TIMEOUT,
        }
    }

    /// 使用自定义根目录表
    pub fn with_roots(roots: Vec<(RootCategory, PathBuf)>, home: Option<PathBuf>, min_keyword_len: usize) -> Self {
        Self {
            roots,
            home,
            min_keyword_len,
            walk_timeout: DEFAULT_WALK_TIMEOUT,
        }
    }

    pub fn with_walk_timeout(mut self, timeout: Duration) -> Self {
        self.walk_timeout = timeout;
        self
    }

    /// 扫描与标识符相关的残留，结果按 (类型, 路径) 排序且全部选中
    pub fn scan(&self, id: &str, reporter: &Reporter) -> Vec<ResidueFile> {
        let keywords: Vec<String> = generate_keywords(id, self.min_keyword_len)
            .into_iter()
            .map(|k| k.to_lowercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if keywords.is_empty() {
            reporter.progress("没有可用的关键词", 100);
            return Vec::new();
        }

        let mut found: Vec<ResidueFile> = Vec::new();
        let total = self.roots.len();
        for (i, (category, root)) in self.roots.iter().enumerate() {
            reporter.progress(format!("正在扫描 {}", root.display()), percent_of(i, total));
            if !root.exists() {
                continue;
            }
            if !self.scan_root(*category, root, &keywords, &mut found) {
                reporter.error(format!("{} 扫描超时，结果可能不完整", root.display()));
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        found.dedup_by(|a, b| a.path == b.path);
        sort_residue(&mut found);
        reporter.progress(format!("发现 {} 项残留", found.len()), 100);
        found
    }

    fn scan_root(
        &self,
        category: RootCategory,
        root: &Path,
        keywords: &[String],
        found: &mut Vec<ResidueFile>,
    ) -> bool {
        let deadline = Instant::now() + self.walk_timeout;
        let mut walker = WalkDir::new(root).follow_links(false).min_depth(1).into_iter();

        while let Some(next) = walker.next() {
            if Instant::now() >= deadline {
                log::warn!("遍历 {} 超过 {:?}，提前结束", root.display(), self.walk_timeout);
                return false;
            }
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("跳过: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if !keywords.iter().any(|k| name.contains(k.as_str())) {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            found.push(residue_entry(category, entry.into_path()));
            // 匹配的目录整体计入，不再深入
            if is_dir {
                walker.skip_current_dir();
            }
        }
        true
    }

    /// 关键词扫描，加上驱动给出的生态专属残留路径
    pub fn scan_package(
        &self,
        package: &Package,
        backend: Option<&dyn Backend>,
        reporter: &Reporter,
    ) -> Vec<ResidueFile> {
        let mut found = self.scan(&package.name, reporter);
        let Some(backend) = backend else {
            return found;
        };

        for path in backend.residual_paths(package) {
            if path.symlink_metadata().is_err() {
                continue;
            }
            if found.iter().any(|f| path.starts_with(&f.path)) {
                continue;
            }
            let category = self.category_for(&path);
            found.push(residue_entry(category, path));
        }

        sort_residue(&mut found);
        found
    }

    fn category_for(&self, path: &Path) -> RootCategory {
        if let Some((category, _)) = self.roots.iter().find(|(_, root)| path.starts_with(root)) {
            return *category;
        }
        match &self.home {
            Some(home) if path.starts_with(home) => RootCategory::UserData,
            _ => RootCategory::SystemData,
        }
    }
}

pub fn total_size(files: &[ResidueFile]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

pub fn selected_count(files: &[ResidueFile]) -> usize {
    files.iter().filter(|f| f.is_selected).count()
}

pub fn selected_size(files: &[ResidueFile]) -> u64 {
    files.iter().filter(|f| f.is_selected).map(|f| f.size).sum()
}
