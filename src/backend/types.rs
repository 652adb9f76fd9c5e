//! 后端相关数据类型定义

use crate::util::UNKNOWN;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 软件来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PackageSource {
    Apt,
    Snap,
    Flatpak,
    AppImage,
}

impl PackageSource {
    pub const ALL: [PackageSource; 4] = [
        PackageSource::Apt,
        PackageSource::Snap,
        PackageSource::Flatpak,
        PackageSource::AppImage,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PackageSource::Apt => "APT",
            PackageSource::Snap => "Snap",
            PackageSource::Flatpak => "Flatpak",
            PackageSource::AppImage => "AppImage",
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PackageSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "apt" | "dpkg" | "deb" => Ok(PackageSource::Apt),
            "snap" => Ok(PackageSource::Snap),
            "flatpak" => Ok(PackageSource::Flatpak),
            "appimage" => Ok(PackageSource::AppImage),
            other => Err(format!("未知的软件来源: {}", other)),
        }
    }
}

/// 已安装的软件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// 后端使用的标识符
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub size: String,
    pub source: PackageSource,
    pub install_date: String,
    pub description: String,
    /// 文件型软件（AppImage）在磁盘上的位置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    #[serde(default)]
    pub is_selected: bool,
}

impl Package {
    /// 以哨兵值填充其余字段
    pub fn new(name: impl Into<String>, source: PackageSource) -> Self {
        let name = name.into();
        Self {
            display_name: crate::util::title_case(&name),
            name,
            version: UNKNOWN.to_string(),
            size: UNKNOWN.to_string(),
            source,
            install_date: UNKNOWN.to_string(),
            description: String::new(),
            location: None,
            is_selected: false,
        }
    }
}

/// 单个软件的详细信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoRecord {
    pub name: String,
    pub version: String,
    pub size: String,
    pub origin: String,
    pub description: String,
    pub install_date: String,
}

impl InfoRecord {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: UNKNOWN.to_string(),
            size: UNKNOWN.to_string(),
            origin: UNKNOWN.to_string(),
            description: String::new(),
            install_date: UNKNOWN.to_string(),
        }
    }
}

/// 操作结果：(成功标志, 消息)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 卸载选项
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// 同时删除包管理器默认保留的配置（APT purge）
    pub purge: bool,
}
