use std::path::Path;

use bridge_config::{AnalysisConfig, AppConfig};
use bridge_core::document::ParseResult;
use bridge_io::{DocumentLoader, DxfFacade};
use tracing::{debug, info};

use crate::analysis::{AnalysisSummary, analyze};
use crate::classify::{ComponentList, RuleEngine};
use crate::errors::EngineError;
use crate::graph::{GraphOptions, KnowledgeGraph, build_graph};

/// 一次提取的完整结果，各阶段输出按顺序保留。
#[derive(Debug, Clone)]
pub struct Extraction {
    pub parse: ParseResult,
    pub components: ComponentList,
    /// 文档无法打开时为 `None`。
    pub analysis: Option<AnalysisSummary>,
    pub graph: KnowledgeGraph,
}

impl Extraction {
    pub fn is_failed(&self) -> bool {
        self.parse.has_document_error()
    }

    /// 解析与分类阶段记录的全部问题。
    pub fn error_messages(&self) -> Vec<String> {
        self.parse
            .errors
            .iter()
            .map(ToString::to_string)
            .chain(self.components.errors.iter().map(|issue| {
                format!(
                    "{} 无法生成构件 {}：{}",
                    issue.entity_type, issue.component_id, issue.message
                )
            }))
            .collect()
    }
}

/// 解析 → 分类 → 分析 → 建图。规则表在构造时编译，提取过程中只读。
#[derive(Debug, Clone)]
pub struct Extractor<L = DxfFacade> {
    loader: L,
    rules: RuleEngine,
    analysis: AnalysisConfig,
    graph: GraphOptions,
}

impl Extractor<DxfFacade> {
    pub fn new(rules: RuleEngine) -> Self {
        Self::with_loader(DxfFacade::new(), rules)
    }

    /// 从应用配置解析规则表与分析参数。
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        let tables = config.rule_tables()?;
        let rules = RuleEngine::new(&tables)?;
        Ok(Self::new(rules)
            .with_analysis(config.analysis.clone())
            .with_graph_options(GraphOptions::from(&config.graph)))
    }
}

impl<L: DocumentLoader> Extractor<L> {
    pub fn with_loader(loader: L, rules: RuleEngine) -> Self {
        Self {
            loader,
            rules,
            analysis: AnalysisConfig::default(),
            graph: GraphOptions::default(),
        }
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_graph_options(mut self, graph: GraphOptions) -> Self {
        self.graph = graph;
        self
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn extract_path(&self, path: &Path) -> Extraction {
        debug!(path = %path.display(), "开始提取");
        self.extract_parsed(self.loader.parse_path(path))
    }

    pub fn extract_bytes(&self, file_id: &str, bytes: &[u8]) -> Extraction {
        debug!(file_id, bytes = bytes.len(), "开始提取");
        self.extract_parsed(self.loader.parse_bytes(file_id, bytes))
    }

    /// 对已解析的结果执行后续阶段。
    pub fn extract_parsed(&self, parse: ParseResult) -> Extraction {
        if parse.has_document_error() {
            info!(file_id = %parse.metadata.file_id, "文档无法打开，跳过后续阶段");
            return Extraction {
                parse,
                components: ComponentList::default(),
                analysis: None,
                graph: KnowledgeGraph::default(),
            };
        }

        let components = self.rules.classify(&parse.entities, &parse.layers);
        let analysis = analyze(&parse, &components, &self.analysis);
        let graph = build_graph(&parse, &analysis, self.graph);
        info!(
            file_id = %parse.metadata.file_id,
            entities = parse.entities.len(),
            components = components.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "提取完成"
        );
        Extraction {
            parse,
            components,
            analysis: Some(analysis),
            graph,
        }
    }
}
