use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sphere_core::settings::{GeometrySettings, LabelSettings};
use thiserror::Error;

/// 应用配置的根结构，每一节都可以省略。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub geometry: GeometrySettings,
    #[serde(default)]
    pub labels: LabelSettings,
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `SPHERE_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("SPHERE_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 脚本回放遇到错误行时的处理方式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub on_error: OnError,
    /// 启动时默认回放的脚本；命令行 `--script` 优先。
    #[serde(default)]
    pub script: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_core_settings() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.geometry, GeometrySettings::default());
        assert_eq!(cfg.labels, LabelSettings::default());
        assert_eq!(cfg.replay.on_error, OnError::Abort);
        assert!(cfg.replay.script.is_none());
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [geometry]
            boundary_radius = 400.0
            nearly_antipodal_pixel = 5.0

            [labels]
            lines = true

            [replay]
            on_error = "skip"
            script = "scripts/demo.txt"
            "#
        )
        .expect("write config");

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.geometry.boundary_radius, 400.0);
        assert_eq!(cfg.geometry.nearly_antipodal_pixel, 5.0);
        // 未写出的字段保持默认
        assert_eq!(cfg.geometry.pixel_close_enough, 8.0);
        assert!(cfg.labels.lines);
        assert!(cfg.labels.free_points);
        assert_eq!(cfg.replay.on_error, OnError::Skip);
        assert_eq!(
            cfg.replay.script.as_deref(),
            Some(Path::new("scripts/demo.txt"))
        );
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = tempfile::NamedTempFile::new().expect("create temp file");
        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.geometry, GeometrySettings::default());
        assert_eq!(cfg.replay.on_error, OnError::Abort);
    }

    #[test]
    fn invalid_values_are_reported_with_path() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[replay]\non_error = \"retry\"").expect("write config");
        match AppConfig::from_file(file.path()) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            AppConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
