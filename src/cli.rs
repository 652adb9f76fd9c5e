use clap::{Parser, Subcommand};
use pkgsweep::backend::PackageSource;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pkgsweep",
    about = "Linux 软件清单与卸载残留清理（APT / Snap / Flatpak / AppImage）",
    version
)]
pub struct Cli {
    /// 配置文件路径（默认 ~/.config/pkgsweep/config.toml）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// 列出已安装软件
    List {
        /// 只扫描指定来源，可重复
        #[arg(long = "source")]
        sources: Vec<PackageSource>,

        /// 包含系统关键包
        #[arg(long)]
        include_system: bool,

        #[arg(long)]
        json: bool,
    },

    /// 按标识符或显示名称搜索
    Search {
        keyword: String,

        #[arg(long = "source")]
        sources: Vec<PackageSource>,

        #[arg(long)]
        include_system: bool,

        #[arg(long)]
        json: bool,
    },

    /// 查看单个软件的详细信息
    Info {
        source: PackageSource,
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// 只扫描残留，不删除
    Residue {
        source: PackageSource,
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// 卸载软件，可选清理残留
    Remove {
        source: PackageSource,
        id: String,

        /// 同时删除配置（APT purge）
        #[arg(long)]
        purge: bool,

        /// 绕过包管理器逐个删除登记文件（仅 APT）
        #[arg(long, conflicts_with = "purge")]
        force_remove: bool,

        /// 允许卸载系统关键包
        #[arg(long)]
        allow_critical: bool,

        /// 卸载后扫描并清理残留
        #[arg(long)]
        clean: bool,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// 清理已卸载软件的残留
    Clean {
        source: PackageSource,
        id: String,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// 重新读取 .desktop 文件并重建名称缓存
    RefreshNames,
}

/// 残留清理的选项
#[derive(clap::Args, Clone, Copy)]
pub struct SweepArgs {
    /// 不询问，直接删除选中项
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// 删除前备份到备份目录
    #[arg(long)]
    pub backup: bool,

    /// 同时勾选需谨慎的条目
    #[arg(long)]
    pub include_caution: bool,
}
