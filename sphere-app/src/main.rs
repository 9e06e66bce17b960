use std::fs;
use std::path::{Path, PathBuf};

use sphere_config::{AppConfig, ConfigError, OnError};
use sphere_engine::command::ReplayPolicy;
use sphere_engine::scene::Scene;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

enum RunMode {
    Demo,
    Replay(PathBuf),
}

fn main() {
    let mut args = std::env::args().skip(1);
    let mut override_mode: Option<RunMode> = None;
    let mut config_override: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--demo" => override_mode = Some(RunMode::Demo),
            "--script" => {
                let Some(path) = args.next() else {
                    eprintln!("`--script` 需要提供脚本路径");
                    std::process::exit(1);
                };
                override_mode = Some(RunMode::Replay(PathBuf::from(path)));
            }
            "--output" => {
                let Some(path) = args.next() else {
                    eprintln!("`--output` 需要提供输出路径");
                    std::process::exit(1);
                };
                output = Some(PathBuf::from(path));
            }
            "--config" => {
                let Some(path) = args.next() else {
                    eprintln!("`--config` 需要提供配置文件路径");
                    std::process::exit(1);
                };
                config_override = Some(PathBuf::from(path));
            }
            other => {
                eprintln!("未知参数：{other}");
                std::process::exit(1);
            }
        }
    }

    let config = load_configuration(config_override);
    init_logging(&config);
    info!("启动球面几何引擎");

    let mode = override_mode.unwrap_or_else(|| match &config.replay.script {
        Some(path) => RunMode::Replay(path.clone()),
        None => RunMode::Demo,
    });

    let mut scene = Scene::with_settings(config.geometry, config.labels);
    let result: Result<(), Box<dyn std::error::Error>> = match mode {
        RunMode::Demo => {
            info!("构建演示场景");
            scene.populate_demo().map(|_| ()).map_err(Into::into)
        }
        RunMode::Replay(path) => replay_file(&mut scene, &path, config.replay.on_error),
    };
    if let Err(err) = result {
        error!(error = %err, "运行失败");
        std::process::exit(1);
    }

    let summary = scene.summary();
    println!(
        "点 {}，直线 {}，线段 {}，圆 {}，标签 {}，度量 {}，依赖边 {}",
        summary.points,
        summary.lines,
        summary.segments,
        summary.circles,
        summary.labels,
        summary.measurements,
        summary.edges
    );

    let script = match scene.to_script() {
        Ok(script) => script,
        Err(err) => {
            error!(error = %err, "序列化命令日志失败");
            std::process::exit(1);
        }
    };
    match output {
        Some(path) => {
            if let Err(err) = fs::write(&path, format!("{script}\n")) {
                error!(path = %path.display(), error = %err, "写出脚本失败");
                std::process::exit(1);
            }
            info!(path = %path.display(), "脚本已写出");
        }
        None => println!("{script}"),
    }
}

fn replay_file(
    scene: &mut Scene,
    path: &Path,
    on_error: OnError,
) -> Result<(), Box<dyn std::error::Error>> {
    let script = fs::read_to_string(path)?;
    let policy = match on_error {
        OnError::Abort => ReplayPolicy::Abort,
        OnError::Skip => ReplayPolicy::Skip,
    };
    let report = scene.replay(&script, policy)?;
    for skipped in &report.skipped {
        warn!(line = skipped.line, reason = %skipped.reason, "已跳过");
    }
    info!(path = %path.display(), applied = report.applied, "回放完成");
    Ok(())
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
