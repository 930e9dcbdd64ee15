pub mod analysis;
pub mod classify;
pub mod graph;
pub mod pipeline;

pub use analysis::{AnalysisSummary, DrawingType, analyze};
pub use classify::{ClassificationIssue, ComponentList, RuleEngine, classify};
pub use graph::{GraphOptions, IdScope, KnowledgeEdge, KnowledgeGraph, KnowledgeNode, NodeId, build_graph};
pub use pipeline::{Extraction, Extractor};

pub mod errors {
    use bridge_config::ConfigError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("invalid layer pattern {pattern:?}: {source}")]
        InvalidPattern {
            pattern: String,
            #[source]
            source: regex::Error,
        },
        #[error("failed to resolve rule tables: {0}")]
        Config(#[from] ConfigError),
        #[error("edge {source_id} -> {target_id} references a missing node")]
        DanglingEdge {
            source_id: String,
            target_id: String,
        },
        #[error("duplicate node id {0}")]
        DuplicateNode(String),
        #[error("failed to serialize graph: {0}")]
        Serialize(#[from] serde_json::Error),
    }
}
