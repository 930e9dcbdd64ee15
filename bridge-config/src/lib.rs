use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub mod rules;

pub use rules::{ColorRule, LayerRule, RuleTables};

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub graph: GraphConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。`[rules] path` 为相对路径时相对配置文件所在目录解析。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let (Some(rules_path), Some(dir)) = (config.rules.path.as_mut(), path.parent()) {
            if rules_path.is_relative() {
                *rules_path = dir.join(&*rules_path);
            }
        }
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `BRIDGE_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("BRIDGE_CONFIG") {
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

    /// 解析本次运行使用的规则表：外部文件优先，其次内联表，最后是内建表。
    pub fn rule_tables(&self) -> Result<RuleTables, ConfigError> {
        let tables = match (&self.rules.path, &self.rules.tables) {
            (Some(path), _) => RuleTables::from_file(path)?,
            (None, Some(tables)) => tables.clone(),
            (None, None) => RuleTables::bridge_default(),
        };
        tables.validate()?;
        Ok(tables)
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

/// 规则表来源。`path` 与内联 `tables` 同时存在时以 `path` 为准。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub tables: Option<RuleTables>,
}

/// 图纸分析参数，数值单位与图纸声明单位一致。
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// 构件邻接判定的距离容差。
    #[serde(default = "AnalysisConfig::default_adjacency_tolerance")]
    pub adjacency_tolerance: f64,
    /// 构件汇总中每类保留的样例数。
    #[serde(default = "AnalysisConfig::default_sample_limit")]
    pub sample_limit: usize,
    /// 宽高比达到该值时视为狭长的立面视图。
    #[serde(default = "AnalysisConfig::default_elongation_ratio")]
    pub elongation_ratio: f64,
}

impl AnalysisConfig {
    fn default_adjacency_tolerance() -> f64 {
        50.0
    }

    fn default_sample_limit() -> usize {
        3
    }

    fn default_elongation_ratio() -> f64 {
        4.0
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            adjacency_tolerance: Self::default_adjacency_tolerance(),
            sample_limit: Self::default_sample_limit(),
            elongation_ratio: Self::default_elongation_ratio(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphConfig {
    /// 为 true 时几何实体挂在所属图层节点下，否则直接挂在文档节点下。
    #[serde(default)]
    pub link_entities_to_layer: bool,
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
    #[error("规则表无效: {0}")]
    InvalidRule(String),
}
