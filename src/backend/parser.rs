//! 输出解析函数
//!
//! 所有解析都是按行、按字段的宽松解析：缺失或无法识别的字段取哨兵值
//! `"unknown"`，不会让整条记录失败。

use super::types::{InfoRecord, Package, PackageSource};
use crate::util::{clean_terminal_output, format_size, UNKNOWN};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

const ARCH_TOKENS: [&str; 6] = ["x86_64", "amd64", "arm64", "aarch64", "i386", "i686"];

/// 解析 `key: value` 形式的详情输出（dpkg -s / snap info）
///
/// 以空白开头的行视为上一个字段的续行，用换行拼接。
pub fn parse_fields(output: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();

    for line in output.lines() {
        if !line.starts_with(' ') && !line.starts_with('\t') {
            if let Some(colon_pos) = line.find(':') {
                let key = line[..colon_pos].trim();
                if !key.is_empty() {
                    let value = line[colon_pos + 1..].trim();
                    fields.push((key.to_string(), value.to_string()));
                    continue;
                }
            }
        }
        if let Some(last) = fields.last_mut() {
            if !line.trim().is_empty() {
                last.1.push('\n');
                last.1.push_str(line.trim());
            }
        }
    }

    fields
}

fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.trim().is_empty())
}

fn first_line(value: &str) -> String {
    value.lines().next().unwrap_or("").trim().to_string()
}

/// KiB 数字串转为可读大小
fn kib_to_size(raw: &str) -> String {
    match raw.trim().parse::<u64>() {
        Ok(kib) => format_size(kib * 1024),
        Err(_) => {
            log::debug!("无法解析大小: {:?}", raw);
            UNKNOWN.to_string()
        }
    }
}

// ========== APT / dpkg ==========

/// 解析 `dpkg-query -W -f '${Package}|${Version}|${Installed-Size}|${Status}|${binary:Summary}\n'`
///
/// 只保留状态为 `install ok installed` 的包；安装日期取自 `install_dates`。
pub fn parse_dpkg_query_list(output: &str, install_dates: &HashMap<String, String>) -> Vec<Package> {
    let mut packages = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(5, '|').collect();
        if parts.len() < 4 {
            log::debug!("跳过无法解析的 dpkg-query 行: {:?}", line);
            continue;
        }
        let name = parts[0].trim();
        if name.is_empty() || !parts[3].contains("install ok installed") {
            continue;
        }

        let mut pkg = Package::new(name, PackageSource::Apt);
        if !parts[1].trim().is_empty() {
            pkg.version = parts[1].trim().to_string();
        }
        pkg.size = kib_to_size(parts[2]);
        if let Some(summary) = parts.get(4) {
            pkg.description = summary.trim().to_string();
        }
        if let Some(date) = install_dates.get(name) {
            pkg.install_date = date.clone();
        }
        packages.push(pkg);
    }

    packages
}

/// 解析 dpkg.log，返回 包名 -> 首次安装日期
///
/// 行格式：`2024-01-15 10:30:00 install package-name:amd64 <none> 1.0-1`
pub fn parse_dpkg_log(content: &str, dates: &mut HashMap<String, String>) {
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[2] != "install" {
            continue;
        }
        let name = parts[3].split(':').next().unwrap_or(parts[3]);
        dates
            .entry(name.to_string())
            .or_insert_with(|| parts[0].to_string());
    }
}

/// 解析 `dpkg -s <pkg>`
pub fn parse_dpkg_status(output: &str, name: &str) -> InfoRecord {
    let fields = parse_fields(output);
    let mut info = InfoRecord::unknown(name);

    if let Some(v) = field(&fields, "Version") {
        info.version = v.to_string();
    }
    if let Some(v) = field(&fields, "Installed-Size") {
        info.size = kib_to_size(v);
    }
    if let Some(v) = field(&fields, "Origin").or_else(|| field(&fields, "Maintainer")) {
        info.origin = first_line(v);
    }
    if let Some(v) = field(&fields, "Description") {
        info.description = first_line(v);
    }

    info
}

/// 解析 `apt-cache depends <pkg>`，只取 Depends / PreDepends
pub fn parse_apt_depends(output: &str) -> Vec<String> {
    let mut deps = BTreeSet::new();

    for line in output.lines() {
        let line = line.trim().trim_start_matches('|');
        let value = line
            .strip_prefix("Depends:")
            .or_else(|| line.strip_prefix("PreDepends:"));
        if let Some(value) = value {
            let dep = value.trim().trim_start_matches('<').trim_end_matches('>');
            if !dep.is_empty() {
                deps.insert(dep.to_string());
            }
        }
    }

    deps.into_iter().collect()
}

/// 解析 `apt-cache rdepends --installed <pkg>`，返回去重后的反向依赖
pub fn parse_apt_rdepends(output: &str) -> Vec<String> {
    let mut dependents = BTreeSet::new();
    let mut in_list = false;

    for line in output.lines() {
        if line.trim() == "Reverse Depends:" {
            in_list = true;
            continue;
        }
        if in_list {
            let name = line.trim().trim_start_matches('|').trim();
            if !name.is_empty() {
                dependents.insert(name.to_string());
            }
        }
    }

    dependents.into_iter().collect()
}

/// 解析 `dpkg -L <pkg>`
pub fn parse_dpkg_files(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/') && *line != "/.")
        .map(PathBuf::from)
        .collect()
}

/// 解析 `dpkg-query -W -f '${Conffiles}\n' <pkg>`：` /etc/foo.conf <md5> [obsolete]`
pub fn parse_conffiles(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| token.starts_with('/'))
        .map(PathBuf::from)
        .collect()
}

// ========== Snap ==========

/// 解析 `snap list`（首行为表头）
pub fn parse_snap_list(output: &str) -> Vec<Package> {
    let cleaned = clean_terminal_output(output);
    let mut packages = Vec::new();

    for line in cleaned.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let mut pkg = Package::new(parts[0], PackageSource::Snap);
        pkg.version = parts[1].to_string();
        packages.push(pkg);
    }

    packages
}

/// 解析 `snap info --abs-time <snap>`
pub fn parse_snap_info(output: &str, name: &str) -> InfoRecord {
    let fields = parse_fields(&clean_terminal_output(output));
    let mut info = InfoRecord::unknown(name);

    if let Some(v) = field(&fields, "summary") {
        info.description = first_line(v);
    }
    if let Some(v) = field(&fields, "publisher") {
        info.origin = first_line(v)
            .trim_end_matches(['✓', '✪', '*'])
            .trim()
            .to_string();
    }
    if let Some(v) = field(&fields, "version") {
        info.version = first_line(v);
    }
    // installed:   2.61.3   (21184) 40MB snapd
    if let Some(v) = field(&fields, "installed") {
        let line = first_line(v);
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if let Some(version) = tokens.first() {
            if info.version == UNKNOWN {
                info.version = version.to_string();
            }
        }
        if let Some(rev_pos) = tokens.iter().position(|t| t.starts_with('(')) {
            if let Some(size) = tokens.get(rev_pos + 1) {
                info.size = size.to_string();
            }
        }
    }
    // refresh-date: 2024-01-15T10:30:45+08:00
    if let Some(v) = field(&fields, "refresh-date") {
        let date = first_line(v);
        info.install_date = date.split('T').next().unwrap_or(&date).to_string();
    }

    info
}

// ========== Flatpak ==========

/// 解析 `flatpak list --app --columns=application,version`（制表符分隔）
pub fn parse_flatpak_list(output: &str) -> Vec<Package> {
    let mut packages = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        let name = parts[0].trim();
        if name.is_empty() {
            continue;
        }
        let mut pkg = Package::new(name, PackageSource::Flatpak);
        if let Some(version) = parts.get(1).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            pkg.version = version.to_string();
        }
        packages.push(pkg);
    }

    packages
}

/// 解析 `flatpak info <app>`
///
/// 键是右对齐的（行首带空格），首个非空行是 `名称 - 简介` 标题。
pub fn parse_flatpak_info(output: &str, name: &str) -> InfoRecord {
    let mut info = InfoRecord::unknown(name);
    let mut title_seen = false;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !title_seen {
            title_seen = true;
            if !line.starts_with("ID:") {
                if let Some((_, summary)) = line.split_once(" - ") {
                    info.description = summary.trim().to_string();
                }
                continue;
            }
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "Version" => info.version = value.to_string(),
            "Origin" => info.origin = value.to_string(),
            "Installed" => info.size = value.to_string(),
            "Date" => {
                info.install_date = value.split_whitespace().next().unwrap_or(value).to_string()
            }
            _ => {}
        }
    }

    info
}

// ========== AppImage ==========

/// 从 AppImage 文件名解析应用名称：去掉后缀、版本号与架构
pub fn parse_appimage_name(filename: &str) -> String {
    let stem = if filename.to_lowercase().ends_with(".appimage") {
        &filename[..filename.len() - ".appimage".len()]
    } else {
        filename
    };

    // 先保护架构 token 中的下划线
    let mut spaced = stem.to_string();
    for arch in ARCH_TOKENS {
        spaced = spaced.replace(arch, &arch.replace('_', "\u{0}"));
    }
    let spaced = spaced.replace(['-', '_'], " ").replace('\u{0}', "_");

    let kept: Vec<&str> = spaced
        .split_whitespace()
        .filter(|part| {
            let digits = part.trim_start_matches(['v', 'V']).replace('.', "");
            let is_version = !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
            !is_version && !ARCH_TOKENS.contains(part)
        })
        .collect();

    if kept.is_empty() {
        spaced.trim().to_string()
    } else {
        kept.join(" ")
    }
}
