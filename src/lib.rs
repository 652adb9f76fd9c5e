//! pkgsweep：Linux 软件清单与卸载残留清理
//!
//! 汇总 APT / Snap / Flatpak / AppImage 四种来源的已安装软件，卸载选中的软件，
//! 再扫描并清理卸载后留在家目录和系统目录中的残留文件。

pub mod backend;
pub mod cleaner;
pub mod command;
pub mod config;
pub mod desktop;
pub mod error;
pub mod inventory;
pub mod privilege;
pub mod progress;
pub mod residue;
pub mod uninstaller;
pub mod util;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
