//! 内部错误类型
//!
//! 对外的操作边界统一返回 `Outcome` / `CleanReport` 等结构化结果，
//! 这里的错误只在模块之间流转。

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 外部命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("无法启动 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} 执行超时（{}s）", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("等待 {program} 结束失败: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("没有可用的提权方式")]
    NoElevation,
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }

    /// 程序不存在（tool-unavailable）
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CommandError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// 卸载流程状态机的非法跳转
#[derive(Debug, Error)]
#[error("非法状态跳转: {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

/// 单个路径删除失败
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("删除 {} 失败: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("提权删除 {} 失败: {message}", .path.display())]
    Elevated { path: PathBuf, message: String },
}
