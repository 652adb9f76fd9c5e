//! 应用名称解析：从 .desktop 文件获取友好的显示名称

use crate::backend::{Backend, PackageSource};
use crate::config::Policy;
use crate::util::{home_dir, strip_separators, title_case};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

const DESKTOP_SUFFIX: &str = ".desktop";

/// 解析后的 desktop entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DesktopEntry {
    pub name: String,
    pub localized_name: Option<String>,
    pub generic_name: Option<String>,
    pub exec: Option<String>,
    pub icon: Option<String>,
}

impl DesktopEntry {
    /// 本地化名称优先
    pub fn display_name(&self) -> &str {
        self.localized_name.as_deref().unwrap_or(&self.name)
    }
}

/// 解析 desktop entry 文本，只读第一个 `[Desktop Entry]` 段；没有 `Name` 时返回 None
pub fn parse_desktop_entry(content: &str, locale: Option<&str>) -> Option<DesktopEntry> {
    let mut entry = DesktopEntry::default();
    let mut localized: HashMap<String, String> = HashMap::new();
    let mut in_section = false;

    for line in content.lines() {
        let line = line.trim();
        if line == "[Desktop Entry]" && !in_section {
            in_section = true;
            continue;
        }
        if line.starts_with('[') && in_section {
            break;
        }
        if !in_section || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match key {
            "Name" => entry.name = value.to_string(),
            "GenericName" => entry.generic_name = Some(value.to_string()),
            "Icon" => entry.icon = Some(value.to_string()),
            "Exec" => {
                entry.exec = value.split_whitespace().next().map(|cmd| {
                    if cmd.starts_with('/') {
                        cmd.to_string()
                    } else {
                        cmd.rsplit('/').next().unwrap_or(cmd).to_string()
                    }
                });
            }
            _ => {
                if let Some(lang) = key
                    .strip_prefix("Name[")
                    .and_then(|rest| rest.strip_suffix(']'))
                {
                    localized.insert(lang.to_string(), value.to_string());
                }
            }
        }
    }

    if entry.name.is_empty() {
        return None;
    }

    // Name[ll_CC] 优先于 Name[ll]
    if let Some(locale) = locale {
        let lang = locale.split('_').next().unwrap_or(locale);
        entry.localized_name = localized
            .get(locale)
            .or_else(|| localized.get(lang))
            .filter(|v| !v.is_empty())
            .cloned();
    }

    Some(entry)
}

pub fn parse_desktop_file(path: &Path, locale: Option<&str>) -> Option<DesktopEntry> {
    match fs::read(path) {
        Ok(bytes) => parse_desktop_entry(&String::from_utf8_lossy(&bytes), locale),
        Err(e) => {
            log::debug!("读取 {} 失败: {}", path.display(), e);
            None
        }
    }
}

/// 去掉编码与修饰部分：`zh_CN.UTF-8@pinyin` -> `zh_CN`；`C` / `POSIX` 视为无语言
pub fn normalize_locale(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next().unwrap_or("").trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        None
    } else {
        Some(base.to_string())
    }
}

/// 依次读取 LC_ALL / LC_MESSAGES / LANG
pub fn system_locale() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .and_then(|v| normalize_locale(&v))
}

/// desktop 文件目录，后面的覆盖前面的同名条目
pub fn default_desktop_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/share/applications"),
        PathBuf::from("/usr/local/share/applications"),
        PathBuf::from("/var/lib/snapd/desktop/applications"),
        PathBuf::from("/var/lib/flatpak/exports/share/applications"),
    ];
    if let Some(home) = home_dir() {
        dirs.push(home.join(".local/share/flatpak/exports/share/applications"));
        dirs.push(home.join(".local/share/applications"));
    }
    dirs
}

/// 包标识符 -> 显示名称
pub struct NameResolver {
    dirs: Vec<PathBuf>,
    locale: Option<String>,
    exact_min_len: usize,
    substring_min_len: usize,
    entries: BTreeMap<String, DesktopEntry>,
    names: HashMap<(PackageSource, String), Option<String>>,
}

impl NameResolver {
    /// 立即读取所有目录建立缓存
    pub fn new(dirs: Vec<PathBuf>, locale: Option<String>, policy: &Policy) -> Self {
        let mut resolver = Self {
            dirs,
            locale,
            exact_min_len: policy.name_exact_min_len,
            substring_min_len: policy.name_substring_min_len,
            entries: BTreeMap::new(),
            names: HashMap::new(),
        };
        resolver.build();
        resolver
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let locale = config
            .locale
            .as_deref()
            .and_then(normalize_locale)
            .or_else(system_locale);
        Self::new(default_desktop_dirs(), locale, &config.policy)
    }

    fn build(&mut self) {
        for dir in &self.dirs {
            let Ok(read_dir) = fs::read_dir(dir) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let filename = entry.file_name().to_string_lossy().to_string();
                let Some(stem) = filename.strip_suffix(DESKTOP_SUFFIX) else {
                    continue;
                };
                if let Some(parsed) = parse_desktop_file(&entry.path(), self.locale.as_deref()) {
                    self.entries.insert(stem.to_lowercase(), parsed);
                }
            }
        }
        log::debug!("已缓存 {} 个 desktop 条目", self.entries.len());
    }

    /// 清空并重建缓存
    pub fn refresh(&mut self) {
        self.entries.clear();
        self.names.clear();
        self.build();
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// 在 desktop 条目中查找显示名称；找不到返回 None。结果按 (来源, 标识符) 记忆
    pub fn lookup(&mut self, id: &str, backend: Option<&dyn Backend>) -> Option<String> {
        let key = (
            backend.map(|b| b.source()).unwrap_or(PackageSource::Apt),
            id.to_string(),
        );
        if let Some(cached) = self.names.get(&key) {
            return cached.clone();
        }
        let found = self.find(id, backend);
        self.names.insert(key, found.clone());
        found
    }

    /// 显示名称；找不到 desktop 条目时使用格式化后的标识符
    pub fn resolve(&mut self, id: &str, backend: Option<&dyn Backend>) -> String {
        self.lookup(id, backend).unwrap_or_else(|| title_case(id))
    }

    fn find(&self, id: &str, backend: Option<&dyn Backend>) -> Option<String> {
        let stripped = strip_separators(id);
        if stripped.is_empty() {
            return None;
        }

        // 1. 缓存键精确匹配
        if let Some(entry) = self.entries.get(&stripped) {
            return Some(entry.display_name().to_string());
        }

        // 2. 包管理器登记的 .desktop 文件
        if let Some(backend) = backend {
            let from_files = backend
                .owned_files(id)
                .iter()
                .filter(|p| p.to_string_lossy().ends_with(DESKTOP_SUFFIX))
                .find_map(|p| parse_desktop_file(p, self.locale.as_deref()));
            if let Some(entry) = from_files {
                return Some(entry.display_name().to_string());
            }
        }

        let len = stripped.chars().count();

        // 3. 去分隔符后完全相等
        if len >= self.exact_min_len {
            let hit = self
                .entries
                .iter()
                .find(|(key, _)| strip_separators(key) == stripped);
            if let Some((_, entry)) = hit {
                return Some(entry.display_name().to_string());
            }
        }

        // 4. 双向子串
        if len >= self.substring_min_len {
            let hit = self.entries.iter().find(|(key, _)| {
                let key = strip_separators(key);
                key.contains(&stripped) || stripped.contains(&key)
            });
            if let Some((_, entry)) = hit {
                return Some(entry.display_name().to_string());
            }
        }

        // Name 与格式化后的标识符相同
        let formatted = title_case(id).to_lowercase().replace(' ', "");
        self.entries
            .values()
            .find(|entry| entry.name.to_lowercase().replace([' ', '-', '_'], "") == formatted)
            .map(|entry| entry.display_name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    const FIREFOX: &str = "\
[Desktop Entry]
Version=1.0
Name=Firefox Web Browser
Name[zh]=火狐
Name[zh_CN]=Firefox 网络浏览器
GenericName=Web Browser
Exec=firefox %u
Icon=firefox

[Desktop Action new-window]
Name=Open a New Window
Exec=/usr/bin/firefox --new-window
";

    fn write_entry(dir: &Path, file: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    fn resolver(dirs: Vec<PathBuf>) -> NameResolver {
        NameResolver::new(dirs, None, &Policy::default())
    }

    #[test]
    fn parse_stops_at_second_section() {
        let entry = parse_desktop_entry(FIREFOX, None).unwrap();
        assert_eq!(entry.name, "Firefox Web Browser");
        assert_eq!(entry.generic_name.as_deref(), Some("Web Browser"));
        assert_eq!(entry.exec.as_deref(), Some("firefox"));
        assert_eq!(entry.icon.as_deref(), Some("firefox"));
        assert_eq!(entry.display_name(), "Firefox Web Browser");
    }

    #[test]
    fn localized_name_prefers_full_locale() {
        let entry = parse_desktop_entry(FIREFOX, Some("zh_CN")).unwrap();
        assert_eq!(entry.display_name(), "Firefox 网络浏览器");
        let entry = parse_desktop_entry(FIREFOX, Some("zh_TW")).unwrap();
        assert_eq!(entry.display_name(), "火狐");
        let entry = parse_desktop_entry(FIREFOX, Some("de_DE")).unwrap();
        assert_eq!(entry.display_name(), "Firefox Web Browser");
    }

    #[test]
    fn exec_path_handling() {
        let relative = "[Desktop Entry]\nName=Tool\nExec=bin/tool --flag\n";
        assert_eq!(
            parse_desktop_entry(relative, None).unwrap().exec.as_deref(),
            Some("tool")
        );
        let absolute = "[Desktop Entry]\nName=Tool\nExec=/opt/tool/run %F\n";
        assert_eq!(
            parse_desktop_entry(absolute, None).unwrap().exec.as_deref(),
            Some("/opt/tool/run")
        );
        assert!(parse_desktop_entry("[Desktop Entry]\nExec=x\n", None).is_none());
        assert!(parse_desktop_entry("Name=Outside\n", None).is_none());
    }

    #[test]
    fn locale_normalization() {
        assert_eq!(normalize_locale("zh_CN.UTF-8").as_deref(), Some("zh_CN"));
        assert_eq!(normalize_locale("sr_RS@latin").as_deref(), Some("sr_RS"));
        assert_eq!(normalize_locale("C.UTF-8"), None);
        assert_eq!(normalize_locale(""), None);
    }

    #[test]
    fn later_directories_override_earlier() {
        let tmp = tempfile::tempdir().unwrap();
        let system = tmp.path().join("system");
        let user = tmp.path().join("user");
        write_entry(&system, "gedit.desktop", "[Desktop Entry]\nName=Text Editor\n");
        write_entry(&user, "gedit.desktop", "[Desktop Entry]\nName=My Editor\n");

        let mut r = resolver(vec![system, user]);
        assert_eq!(r.resolve("gedit", None), "My Editor");
    }

    #[test]
    fn stages_fire_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let apps = tmp.path().join("apps");
        write_entry(&apps, "vlc.desktop", "[Desktop Entry]\nName=VLC media player\n");
        write_entry(
            &apps,
            "org.gnome.Calculator.desktop",
            "[Desktop Entry]\nName=Calculator\n",
        );
        write_entry(&apps, "libre-office.desktop", "[Desktop Entry]\nName=LibreOffice\n");
        write_entry(
            &apps,
            "code-oss-editor.desktop",
            "[Desktop Entry]\nName=Code - OSS\n",
        );

        // 包管理器登记的 desktop 文件（不在缓存目录中）
        let owned_dir = tmp.path().join("pkg");
        write_entry(&owned_dir, "hidden.desktop", "[Desktop Entry]\nName=Hidden App\n");
        let mut backend = FakeBackend::new(PackageSource::Apt);
        backend.owned = vec![owned_dir.join("hidden.desktop"), owned_dir.join("README")];

        let mut r = resolver(vec![apps]);
        // 1. 精确键
        assert_eq!(r.resolve("vlc", Some(&backend)), "VLC media player");
        assert_eq!(
            r.resolve("org.gnome.Calculator", None),
            "Calculator"
        );
        // 2. 文件列表
        assert_eq!(r.resolve("hidden-pkg", Some(&backend)), "Hidden App");
        // 3. 去分隔符相等
        assert_eq!(r.resolve("libreoffice", None), "LibreOffice");
        assert_eq!(r.resolve("libre_office", None), "LibreOffice");
        // 4. 子串
        assert_eq!(r.resolve("codeoss", None), "Code - OSS");
        // 5. 格式化标识符
        assert_eq!(r.resolve("my-cli_tool", None), "My Cli Tool");
        // 过短的标识符不做模糊匹配
        assert_eq!(r.resolve("co", None), "Co");
    }

    #[test]
    fn memoized_until_refresh() {
        let tmp = tempfile::tempdir().unwrap();
        let apps = tmp.path().join("apps");
        fs::create_dir_all(&apps).unwrap();

        let mut r = resolver(vec![apps.clone()]);
        assert_eq!(r.resolve("zettlr", None), "Zettlr");

        write_entry(&apps, "zettlr.desktop", "[Desktop Entry]\nName=Zettlr Notes\n");
        assert_eq!(r.resolve("zettlr", None), "Zettlr");

        r.refresh();
        assert_eq!(r.entry_count(), 1);
        assert_eq!(r.resolve("zettlr", None), "Zettlr Notes");
    }
}
