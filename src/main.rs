mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Command, SweepArgs};
use pkgsweep::backend::{BackendRegistry, Outcome, Package, PackageSource};
use pkgsweep::cleaner::Cleaner;
use pkgsweep::command::SystemRunner;
use pkgsweep::config::Config;
use pkgsweep::desktop::NameResolver;
use pkgsweep::inventory::{Inventory, InventoryEngine};
use pkgsweep::privilege::{ElevationMethod, SystemElevator};
use pkgsweep::progress::WorkerEvent;
use pkgsweep::residue::{self, ResidueFile, ResidueScanner, Safety};
use pkgsweep::uninstaller::Uninstaller;
use pkgsweep::util::format_size;
use pkgsweep::workflow::{self, Session};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// 各组件的共享句柄
struct App {
    config: Config,
    registry: BackendRegistry,
    engine: Arc<InventoryEngine>,
    uninstaller: Arc<Uninstaller>,
    scanner: Arc<ResidueScanner>,
    cleaner: Arc<Cleaner>,
}

impl App {
    fn new(config: Config) -> Self {
        let runner = Arc::new(SystemRunner);
        let method =
            ElevationMethod::detect(runner.as_ref(), config.elevation, config.timeouts.query());
        log::info!("提权方式: {:?}", method);
        let elevator = Arc::new(SystemElevator::new(runner.clone(), method));

        let registry = BackendRegistry::standard(runner, elevator.clone(), &config);
        let resolver = config
            .resolve_display_names
            .then(|| NameResolver::from_config(&config));

        Self {
            engine: Arc::new(InventoryEngine::new(registry.clone(), resolver)),
            uninstaller: Arc::new(Uninstaller::new(
                registry.clone(),
                elevator.clone(),
                config.timeouts,
            )),
            scanner: Arc::new(
                ResidueScanner::new(config.policy.residue_min_keyword_len)
                    .with_walk_timeout(config.timeouts.file_op()),
            ),
            cleaner: Arc::new(Cleaner::new(
                elevator,
                config.timeouts,
                config.backup_dir.clone(),
            )),
            registry,
            config,
        }
    }

    async fn scan(&self, sources: Vec<PackageSource>, skip_system: bool) -> Result<Inventory> {
        workflow::spawn_scan(self.engine.clone(), sources, skip_system)
            .finish(print_event)
            .await
            .context("扫描任务异常退出")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // 加载配置
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default()?,
    };
    let app = App::new(config);

    match cli.command {
        Command::List {
            sources,
            include_system,
            json,
        } => {
            let skip_system = app.config.skip_system_packages && !include_system;
            let inventory = app.scan(sources, skip_system).await?;
            let packages: Vec<&Package> = inventory.packages().iter().collect();
            print_packages(&packages, json)?;
        }
        Command::Search {
            keyword,
            sources,
            include_system,
            json,
        } => {
            let skip_system = app.config.skip_system_packages && !include_system;
            let inventory = app.scan(sources, skip_system).await?;
            print_packages(&inventory.search(&keyword), json)?;
        }
        Command::Info { source, id, json } => {
            let engine = app.engine.clone();
            let info = tokio::task::spawn_blocking(move || engine.get_info(source, &id)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("名称:     {}", info.name);
                println!("版本:     {}", info.version);
                println!("大小:     {}", info.size);
                println!("来源:     {}", info.origin);
                println!("安装日期: {}", info.install_date);
                if !info.description.is_empty() {
                    println!("描述:     {}", info.description);
                }
            }
        }
        Command::Residue { source, id, json } => {
            let package = Package::new(id, source);
            let files = workflow::spawn_residue_scan(
                app.scanner.clone(),
                package,
                app.registry.get(source),
            )
            .finish(print_event)
            .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                print_residue(&files);
            }
        }
        Command::Remove {
            source,
            id,
            purge,
            force_remove,
            allow_critical,
            clean,
            sweep,
        } => {
            let mut session = Session::new();
            session.begin_scan()?;
            // 关键包也要能找到，才能给出明确的拒绝理由
            let inventory = app.scan(vec![source], false).await?;
            session.finish_scan(inventory)?;

            if !allow_critical {
                if let Some(backend) = app.registry.get(source) {
                    let critical_id = id.clone();
                    let critical =
                        tokio::task::spawn_blocking(move || backend.is_critical(&critical_id))
                            .await?;
                    if critical {
                        bail!("{} 是系统关键包，如确需卸载请加 --allow-critical", id);
                    }
                }
            }

            let Some(package) = session.begin_remove(source, &id)? else {
                bail!("未找到已安装的 {} 软件: {}", source, id);
            };

            let outcome = if force_remove {
                let result = workflow::spawn_force_remove(app.uninstaller.clone(), package.clone())
                    .finish(print_event)
                    .await?;
                Outcome {
                    success: result.success,
                    message: result.message,
                }
            } else {
                workflow::spawn_uninstall(app.uninstaller.clone(), package.clone(), purge)
                    .finish(print_event)
                    .await?
            };
            println!("{}", outcome.message);
            let removed = outcome.success;
            session.finish_remove(outcome)?;

            if clean {
                sweep_residue(&app, &mut session, package, sweep).await?;
            }
            if !removed {
                bail!("卸载 {} 失败", id);
            }
        }
        Command::Clean { source, id, sweep } => {
            let package = Package::new(id, source);
            let mut session = Session::for_residue(package.clone());
            sweep_residue(&app, &mut session, package, sweep).await?;
        }
        Command::RefreshNames => {
            let engine = app.engine.clone();
            let count = tokio::task::spawn_blocking(move || engine.refresh_names()).await?;
            println!("已重建名称缓存，共 {} 个 .desktop 条目", count);
        }
    }

    Ok(())
}

// ===== 残留清理 =====

/// 扫描残留，让用户确认后删除选中项
async fn sweep_residue(
    app: &App,
    session: &mut Session,
    package: Package,
    args: SweepArgs,
) -> Result<()> {
    session.begin_residue_scan()?;
    let backend = app.registry.get(package.source);
    let files = workflow::spawn_residue_scan(app.scanner.clone(), package.clone(), backend)
        .finish(print_event)
        .await?;
    session.finish_residue_scan(files)?;

    if session.residue().is_empty() {
        println!("未发现 {} 的残留文件", package.name);
        return Ok(());
    }

    if !args.include_caution {
        let caution: Vec<PathBuf> = session
            .residue()
            .iter()
            .filter(|f| f.safety == Safety::Caution)
            .map(|f| f.path.clone())
            .collect();
        for path in &caution {
            session.deselect(path)?;
        }
    }
    print_residue(session.residue());

    let count = residue::selected_count(session.residue());
    if count == 0 {
        println!("没有选中的条目");
        return Ok(());
    }
    let size = format_size(residue::selected_size(session.residue()));
    if !args.yes && !confirm(&format!("删除选中的 {} 项（{}）?", count, size))? {
        println!("已取消");
        return Ok(());
    }

    if args.backup {
        let backed_up = workflow::spawn_backup(app.cleaner.clone(), session.residue().to_vec())
            .finish(print_event)
            .await?;
        println!("已备份 {} 项到 {}", backed_up, app.config.backup_dir.display());
    }

    let snapshot = session.confirm_clean()?;
    let report = workflow::spawn_clean(app.cleaner.clone(), snapshot)
        .finish(print_event)
        .await?;
    session.finish_clean(report)?;

    println!(
        "已删除 {} 项，释放 {}",
        report.deleted_count,
        format_size(report.deleted_bytes)
    );
    if report.unreported_errors > 0 {
        eprintln!("另有 {} 条错误未显示，详见日志", report.unreported_errors);
    }
    if !report.success {
        bail!("部分条目未能删除");
    }
    Ok(())
}

// ===== 输出 =====

fn print_event(event: WorkerEvent) {
    match event {
        WorkerEvent::Progress { message, percent } => eprintln!("[{:>3}%] {}", percent, message),
        WorkerEvent::Error(message) => eprintln!("错误: {}", message),
    }
}

fn print_packages(packages: &[&Package], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(packages)?);
        return Ok(());
    }
    if packages.is_empty() {
        println!("没有找到软件");
        return Ok(());
    }
    println!(
        "{:<32} {:<9} {:<24} {:>10}  {}",
        "名称", "来源", "版本", "大小", "标识符"
    );
    for p in packages {
        println!(
            "{:<32} {:<9} {:<24} {:>10}  {}",
            p.display_name, p.source, p.version, p.size, p.name
        );
    }
    println!("共 {} 个软件", packages.len());
    Ok(())
}

fn print_residue(files: &[ResidueFile]) {
    if files.is_empty() {
        println!("未发现残留文件");
        return;
    }
    for f in files {
        let mark = if f.is_selected { "[x]" } else { "[ ]" };
        let caution = match f.safety {
            Safety::Safe => "",
            Safety::Caution => " (需谨慎)",
        };
        println!(
            "{} {:<6} {:>10}  {}{}",
            mark,
            f.kind.label(),
            f.size_str(),
            f.path.display(),
            caution
        );
    }
    println!(
        "共 {} 项，{}",
        files.len(),
        format_size(residue::total_size(files))
    );
}

/// 读取一行 y/N 回答，默认否
fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
