use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use bridge_config::{AppConfig, ConfigError};
use bridge_engine::Extractor;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod report;

/// 从桥梁 DXF 图纸中提取构件、分析摘要与知识图。
#[derive(Debug, Parser)]
#[command(name = "bridge-extract", version)]
struct Cli {
    /// 配置文件路径；缺省时读取 `BRIDGE_CONFIG` 或 `./config/default.toml`
    #[arg(long)]
    config: Option<PathBuf>,
    /// 规则表 TOML，覆盖配置中的 `[rules]`
    #[arg(long)]
    rules: Option<PathBuf>,
    /// 以 JSON 输出（每个文件一个对象）
    #[arg(long)]
    json: bool,
    /// 几何实体节点挂在所属图层节点下
    #[arg(long)]
    link_layers: bool,
    /// 待处理的 DXF 文件
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mut config, fallback) = load_configuration(cli.config.clone());
    init_logging(&config);
    if let Some(err) = &fallback {
        warn_config_fallback(err);
    }
    if let Some(rules) = &cli.rules {
        config.rules.path = Some(rules.clone());
    }
    if cli.link_layers {
        config.graph.link_entities_to_layer = true;
    }

    match run(&cli, &config) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            warn!(failed, "部分文件未能打开");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %err, "提取失败");
            eprintln!("错误：{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// 顺序处理每个文件，单个文件失败不影响其余文件。返回失败文件数。
fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<usize> {
    let extractor = Extractor::from_config(config).context("无法加载分类规则表")?;
    info!(rules = extractor.rules().version(), files = cli.files.len(), "开始批量提取");

    let mut failed = 0;
    for path in &cli.files {
        let extraction = extractor.extract_path(path);
        if extraction.is_failed() {
            failed += 1;
        }

        if cli.json {
            let output = json!({
                "file": path.display().to_string(),
                "metadata": &extraction.parse.metadata,
                "errors": extraction.error_messages(),
                "components": &extraction.components.components,
                "analysis": &extraction.analysis,
                "graph": &extraction.graph,
            });
            let text = serde_json::to_string_pretty(&output)
                .with_context(|| format!("无法序列化 {} 的提取结果", path.display()))?;
            println!("{text}");
        } else {
            report::print_extraction(path, &extraction);
        }
    }
    Ok(failed)
}

/// 加载失败时退回内建默认值，并把错误交给调用方在日志初始化后报告。
fn load_configuration(override_path: Option<PathBuf>) -> (AppConfig, Option<ConfigError>) {
    let loaded = match override_path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    };
    match loaded {
        Ok(cfg) => (cfg, None),
        Err(err) => (AppConfig::default(), Some(err)),
    }
}

fn warn_config_fallback(err: &ConfigError) {
    match err {
        ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
            warn!(path = %path.display(), error = %err, "加载配置失败，使用内建默认值与内建规则表");
        }
        ConfigError::Context { .. } | ConfigError::InvalidRule(_) => {
            warn!(error = %err, "加载配置失败，使用内建默认值与内建规则表");
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_and_files_are_parsed() {
        let cli = Cli::try_parse_from([
            "bridge-extract",
            "--rules",
            "rules.toml",
            "--json",
            "a.dxf",
            "b.dxf",
        ])
        .expect("parse args");
        assert!(cli.json);
        assert!(!cli.link_layers);
        assert_eq!(cli.rules, Some(PathBuf::from("rules.toml")));
        assert_eq!(cli.files.len(), 2);
    }

    #[test]
    fn files_are_required() {
        assert!(Cli::try_parse_from(["bridge-extract"]).is_err());
    }

    #[test]
    fn missing_override_falls_back_and_reports_error() {
        let (config, fallback) =
            load_configuration(Some(PathBuf::from("/nonexistent/bridge.toml")));
        assert_eq!(config.logging.level, "info");
        assert!(config.rules.path.is_none());
        assert!(matches!(fallback, Some(ConfigError::Io { .. })));
    }
}
