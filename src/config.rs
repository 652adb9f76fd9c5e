use crate::command::Timeouts;
use crate::privilege::ElevationPreference;
use crate::util::home_dir;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// 名称匹配与系统包判定的策略参数
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// 反向依赖超过该数目的 APT 包视为系统关键包
    pub critical_rdepends_threshold: usize,
    /// 残留扫描关键词的最短长度
    pub residue_min_keyword_len: usize,
    /// 名称解析第 3 步（去分隔符后完全相等）的最短长度
    pub name_exact_min_len: usize,
    /// 名称解析第 4 步（子串匹配）的最短长度
    pub name_substring_min_len: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            critical_rdepends_threshold: 50,
            residue_min_keyword_len: 2,
            name_exact_min_len: 4,
            name_substring_min_len: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub skip_system_packages: bool,
    pub resolve_display_names: bool,
    pub backup_dir: PathBuf,
    /// 覆盖 LC_ALL / LC_MESSAGES / LANG
    pub locale: Option<String>,
    pub elevation: ElevationPreference,
    pub timeouts: Timeouts,
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            skip_system_packages: true,
            resolve_display_names: true,
            backup_dir: home.join(".pkgsweep/backup"),
            locale: None,
            elevation: ElevationPreference::default(),
            timeouts: Timeouts::default(),
            policy: Policy::default(),
        }
    }
}

impl Config {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config/pkgsweep/config.toml")
    }

    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// 文件不存在时使用默认配置；存在但格式错误时报错
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("读取配置文件失败: {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("解析配置文件失败: {}", config_path.display()))?;
            log::debug!("已加载配置: {}", config_path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
