use std::collections::{BTreeMap, HashSet};
use std::fmt;

use bridge_config::GraphConfig;
use bridge_core::document::{EntityGeometry, LayerRecord, ParseResult, RawEntityRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::analysis::AnalysisSummary;
use crate::errors::EngineError;

pub const HAS_LAYER: &str = "has_layer";
pub const CONTAINS_GEOMETRIC_ENTITY: &str = "contains_geometric_entity";
pub const CONTAINS_TEXT_ANNOTATION: &str = "contains_text_annotation";
pub const HAS_SUMMARY: &str = "has_summary";

/// 节点 id 的作用域。`RunScoped` 的 id 仅在本次构建内唯一，不能跨图合并。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScope {
    Stable,
    RunScoped,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub value: String,
    pub scope: IdScope,
}

impl NodeId {
    pub fn stable(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            scope: IdScope::Stable,
        }
    }

    pub fn run_scoped(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            scope: IdScope::RunScoped,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// 可在多次运行之间复现，可用于跨图去重。
    #[inline]
    pub fn is_portable(&self) -> bool {
        self.scope == IdScope::Stable
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Document,
    Layer,
    GeometricEntity,
    TextAnnotation,
    ComponentSummary,
    DimensionSpecs,
    MaterialMentions,
    StructuralRelationships,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub label: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub source: String,
    pub target: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Value>>,
}

impl KnowledgeEdge {
    fn new(source: &NodeId, target: &NodeId, label: &str) -> Self {
        Self {
            source: source.value.clone(),
            target: target.value.clone(),
            label: label.to_string(),
            properties: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<KnowledgeNode>,
    pub edges: Vec<KnowledgeEdge>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&KnowledgeNode> {
        self.nodes.iter().find(|node| node.id.value == id)
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &KnowledgeNode> {
        self.nodes
            .iter()
            .filter(move |node| node.node_type == node_type)
    }

    pub fn edges_labeled<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a KnowledgeEdge> {
        self.edges.iter().filter(move |edge| edge.label == label)
    }

    /// 仅在本次运行内有效的节点 id。
    pub fn non_portable_ids(&self) -> Vec<&NodeId> {
        self.nodes
            .iter()
            .map(|node| &node.id)
            .filter(|id| !id.is_portable())
            .collect()
    }

    /// 检查节点 id 唯一、所有边的两端都指向图中已有节点。
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut ids = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !ids.insert(node.id.value.as_str()) {
                return Err(EngineError::DuplicateNode(node.id.value.clone()));
            }
        }
        for edge in &self.edges {
            if !ids.contains(edge.source.as_str()) || !ids.contains(edge.target.as_str()) {
                return Err(EngineError::DanglingEdge {
                    source_id: edge.source.clone(),
                    target_id: edge.target.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// 图构建选项。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphOptions {
    /// 几何实体节点挂在图层节点下而不是文档节点下。
    pub link_entities_to_layer: bool,
}

impl From<&GraphConfig> for GraphOptions {
    fn from(config: &GraphConfig) -> Self {
        Self {
            link_entities_to_layer: config.link_entities_to_layer,
        }
    }
}

/// 为无句柄实体分配本次运行的 id，uuid 在首次需要时生成。
struct RunScopedIds {
    run: Option<Uuid>,
    next: usize,
}

impl RunScopedIds {
    fn new() -> Self {
        Self { run: None, next: 0 }
    }

    fn allocate(&mut self) -> NodeId {
        let run = *self.run.get_or_insert_with(Uuid::new_v4);
        let id = NodeId::run_scoped(format!("run:{run}:{}", self.next));
        self.next += 1;
        id
    }
}

fn insert_opt<T: Serialize>(attributes: &mut BTreeMap<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value.and_then(|value| serde_json::to_value(value).ok()) {
        attributes.insert(key.to_string(), value);
    }
}

fn document_node(parse: &ParseResult, analysis: &AnalysisSummary) -> KnowledgeNode {
    let metadata = &parse.metadata;
    let mut attributes = BTreeMap::new();
    attributes.insert("file_id".to_string(), json!(metadata.file_id));
    attributes.insert("units".to_string(), json!(metadata.units));
    attributes.insert("drawing_type".to_string(), json!(analysis.drawing_type));
    attributes.insert("entity_count".to_string(), json!(parse.entities.len()));
    attributes.insert("layer_count".to_string(), json!(parse.layers.len()));
    insert_opt(&mut attributes, "version", metadata.version.as_ref());
    insert_opt(&mut attributes, "content_digest", metadata.content_digest.as_ref());
    insert_opt(
        &mut attributes,
        "unit_abbreviation",
        metadata.units.abbreviation(),
    );

    KnowledgeNode {
        id: NodeId::stable(format!("doc:{}", metadata.file_id)),
        node_type: NodeType::Document,
        label: metadata.file_id.clone(),
        attributes,
    }
}

fn layer_node(document: &NodeId, layer: &LayerRecord) -> KnowledgeNode {
    let mut attributes = BTreeMap::new();
    attributes.insert("name".to_string(), json!(layer.name));
    attributes.insert("color".to_string(), json!(layer.color));
    attributes.insert("is_off".to_string(), json!(layer.is_off));
    attributes.insert("is_frozen".to_string(), json!(layer.is_frozen()));
    attributes.insert("flags".to_string(), json!(layer.flags));
    attributes.insert("declared".to_string(), json!(layer.declared));
    insert_opt(&mut attributes, "linetype", layer.linetype.as_ref());

    KnowledgeNode {
        id: NodeId::stable(format!("{document}:layer:{}", layer.name)),
        node_type: NodeType::Layer,
        label: layer.name.clone(),
        attributes,
    }
}

fn entity_attributes(entity: &RawEntityRecord, layers: &[LayerRecord]) -> BTreeMap<String, Value> {
    let mut attributes = BTreeMap::new();
    attributes.insert("entity_type".to_string(), json!(entity.kind.type_tag()));
    attributes.insert("dxf_type".to_string(), json!(entity.dxf_type));
    attributes.insert("layer".to_string(), json!(entity.layer));
    insert_opt(&mut attributes, "handle", entity.handle.as_ref());
    insert_opt(&mut attributes, "color", entity.effective_color(layers));
    attributes
}

fn entity_label(entity: &RawEntityRecord) -> String {
    match &entity.handle {
        Some(handle) => format!("{} {}", entity.kind, handle),
        None => entity.kind.to_string(),
    }
}

fn geometric_node(id: NodeId, entity: &RawEntityRecord, layers: &[LayerRecord]) -> KnowledgeNode {
    let mut attributes = entity_attributes(entity, layers);
    match &entity.geometry {
        EntityGeometry::Malformed { reason } => {
            attributes.insert("malformed".to_string(), json!(reason));
        }
        EntityGeometry::Insert {
            block,
            insert,
            attributes: block_attributes,
        } => {
            attributes.insert("block".to_string(), json!(block));
            attributes.insert("insert".to_string(), json!([insert.x(), insert.y()]));
            if !block_attributes.is_empty() {
                let values: BTreeMap<&str, &str> = block_attributes
                    .iter()
                    .map(|(tag, value)| (tag.as_str(), value.as_str()))
                    .collect();
                attributes.insert("block_attributes".to_string(), json!(values));
            }
        }
        geometry => insert_opt(&mut attributes, "geometry", Some(geometry)),
    }

    KnowledgeNode {
        id,
        node_type: NodeType::GeometricEntity,
        label: entity_label(entity),
        attributes,
    }
}

fn annotation_node(id: NodeId, entity: &RawEntityRecord, layers: &[LayerRecord]) -> KnowledgeNode {
    let mut attributes = entity_attributes(entity, layers);
    insert_opt(&mut attributes, "text", entity.text_content());
    match &entity.geometry {
        EntityGeometry::Text { insert, height, .. } => {
            attributes.insert("insert".to_string(), json!([insert.x(), insert.y()]));
            insert_opt(&mut attributes, "height", *height);
        }
        EntityGeometry::Dimension {
            definition_point,
            measurement,
            ..
        } => {
            insert_opt(
                &mut attributes,
                "definition_point",
                definition_point.map(|point| [point.x(), point.y()]),
            );
            insert_opt(&mut attributes, "measurement", *measurement);
        }
        EntityGeometry::Malformed { reason } => {
            attributes.insert("malformed".to_string(), json!(reason));
        }
        _ => {}
    }

    KnowledgeNode {
        id,
        node_type: NodeType::TextAnnotation,
        label: entity_label(entity),
        attributes,
    }
}

fn summary_node<T: Serialize>(
    document: &NodeId,
    node_type: NodeType,
    key: &str,
    label: &str,
    payload: &T,
) -> KnowledgeNode {
    let mut attributes = BTreeMap::new();
    // 汇总内容展开为顶层属性；非对象载荷放在 `value` 下。
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => attributes.extend(map),
        Ok(other) => {
            attributes.insert("value".to_string(), other);
        }
        Err(_) => {}
    }
    KnowledgeNode {
        id: NodeId::stable(format!("{document}:summary:{key}")),
        node_type,
        label: label.to_string(),
        attributes,
    }
}

/// 构建知识图。文档级解析失败时返回空图。
pub fn build_graph(
    parse: &ParseResult,
    analysis: &AnalysisSummary,
    options: GraphOptions,
) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::default();
    if parse.has_document_error() {
        debug!(file_id = %parse.metadata.file_id, "文档无法打开，输出空图");
        return graph;
    }

    let document = document_node(parse, analysis);
    let document_id = document.id.clone();
    graph.nodes.push(document);

    let mut layer_ids: BTreeMap<&str, NodeId> = BTreeMap::new();
    for layer in &parse.layers {
        let node = layer_node(&document_id, layer);
        graph
            .edges
            .push(KnowledgeEdge::new(&document_id, &node.id, HAS_LAYER));
        layer_ids.insert(layer.name.as_str(), node.id.clone());
        graph.nodes.push(node);
    }

    let mut run_ids = RunScopedIds::new();
    for entity in &parse.entities {
        let id = match &entity.handle {
            Some(handle) => NodeId::stable(format!("{document_id}:entity:{handle}")),
            None => run_ids.allocate(),
        };

        if entity.kind.is_annotation() {
            let node = annotation_node(id, entity, &parse.layers);
            graph.edges.push(KnowledgeEdge::new(
                &document_id,
                &node.id,
                CONTAINS_TEXT_ANNOTATION,
            ));
            graph.nodes.push(node);
        } else {
            let node = geometric_node(id, entity, &parse.layers);
            let parent = if options.link_entities_to_layer {
                layer_ids
                    .get(entity.layer.as_str())
                    .unwrap_or(&document_id)
            } else {
                &document_id
            };
            graph.edges.push(KnowledgeEdge::new(
                parent,
                &node.id,
                CONTAINS_GEOMETRIC_ENTITY,
            ));
            graph.nodes.push(node);
        }
    }

    let summaries = [
        summary_node(
            &document_id,
            NodeType::ComponentSummary,
            "component_summary",
            "构件汇总",
            &analysis.components,
        ),
        summary_node(
            &document_id,
            NodeType::DimensionSpecs,
            "dimension_specs",
            "尺寸与规格",
            &analysis.dimensions,
        ),
        summary_node(
            &document_id,
            NodeType::MaterialMentions,
            "material_mentions",
            "材料提及",
            &analysis.materials,
        ),
        summary_node(
            &document_id,
            NodeType::StructuralRelationships,
            "structural_relationships",
            "结构关系",
            &analysis.relationships,
        ),
    ];
    for node in summaries {
        graph
            .edges
            .push(KnowledgeEdge::new(&document_id, &node.id, HAS_SUMMARY));
        graph.nodes.push(node);
    }

    debug!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        run_scoped = run_ids.next,
        "知识图构建完成"
    );
    graph
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bridge_core::document::{ColorValue, DrawingMetadata, EntityKind};
    use bridge_core::geometry::Point2;

    use super::*;
    use crate::analysis::{
        AnalysisSummary, ComponentSummary, DimensionSpecs, DrawingType, MaterialMentions,
        StructuralRelationship,
    };

    fn analysis() -> AnalysisSummary {
        AnalysisSummary {
            drawing_type: DrawingType::Unknown,
            components: ComponentSummary::default(),
            dimensions: DimensionSpecs::default(),
            materials: MaterialMentions::default(),
            relationships: vec![StructuralRelationship::placeholder(50.0)],
        }
    }

    fn line(handle: Option<&str>, layer: &str) -> RawEntityRecord {
        RawEntityRecord {
            kind: EntityKind::Line,
            dxf_type: "LINE".to_string(),
            handle: handle.map(str::to_string),
            layer: layer.to_string(),
            color: ColorValue::ByLayer,
            geometry: EntityGeometry::Line {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(1.0, 0.0),
            },
            attributes: BTreeMap::new(),
        }
    }

    fn parse() -> ParseResult {
        ParseResult {
            metadata: DrawingMetadata::new("deck.dxf"),
            layers: vec![LayerRecord::implicit("BEAM")],
            entities: vec![line(Some("2A"), "BEAM"), line(None, "BEAM"), line(None, "BEAM")],
            ..ParseResult::default()
        }
    }

    #[test]
    fn handle_ids_are_stable_and_handleless_ids_are_flagged() {
        let graph = build_graph(&parse(), &analysis(), GraphOptions::default());
        graph.validate().expect("graph should be consistent");

        let entity = graph.node("doc:deck.dxf:entity:2A").expect("stable entity id");
        assert!(entity.id.is_portable());

        let run_scoped = graph.non_portable_ids();
        assert_eq!(run_scoped.len(), 2);
        assert!(run_scoped.iter().all(|id| id.as_str().starts_with("run:")));
        assert_ne!(run_scoped[0], run_scoped[1]);
    }

    #[test]
    fn entities_can_hang_under_their_layer() {
        let options = GraphOptions {
            link_entities_to_layer: true,
        };
        let graph = build_graph(&parse(), &analysis(), options);
        graph.validate().expect("graph should be consistent");

        let contained: Vec<&KnowledgeEdge> = graph.edges_labeled(CONTAINS_GEOMETRIC_ENTITY).collect();
        assert_eq!(contained.len(), 3);
        assert!(contained.iter().all(|edge| edge.source == "doc:deck.dxf:layer:BEAM"));
    }

    #[test]
    fn missing_optional_attributes_are_omitted() {
        let graph = build_graph(&parse(), &analysis(), GraphOptions::default());
        let document = graph.node("doc:deck.dxf").expect("document node");
        assert!(!document.attributes.contains_key("version"));
        assert!(!document.attributes.contains_key("content_digest"));
        assert_eq!(document.attributes["drawing_type"], "unknown");

        let entity = graph.node("doc:deck.dxf:entity:2A").expect("entity node");
        assert_eq!(entity.attributes["color"], 7);
        assert_eq!(entity.attributes["geometry"]["shape"], "line");
    }

    #[test]
    fn document_error_produces_empty_graph() {
        let failed = ParseResult::failed(DrawingMetadata::new("gone.dxf"), "not found");
        let graph = build_graph(&failed, &analysis(), GraphOptions::default());
        assert!(graph.is_empty());
    }

    #[test]
    fn dangling_edges_are_detected() {
        let mut graph = build_graph(&parse(), &analysis(), GraphOptions::default());
        graph.edges.push(KnowledgeEdge {
            source: "doc:deck.dxf".to_string(),
            target: "doc:deck.dxf:entity:FF".to_string(),
            label: CONTAINS_GEOMETRIC_ENTITY.to_string(),
            properties: None,
        });
        assert!(matches!(
            graph.validate(),
            Err(EngineError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn summaries_are_linked_from_document() {
        let graph = build_graph(&parse(), &analysis(), GraphOptions::default());
        let summaries: Vec<&str> = graph
            .edges_labeled(HAS_SUMMARY)
            .map(|edge| edge.target.as_str())
            .collect();
        assert_eq!(
            summaries,
            vec![
                "doc:deck.dxf:summary:component_summary",
                "doc:deck.dxf:summary:dimension_specs",
                "doc:deck.dxf:summary:material_mentions",
                "doc:deck.dxf:summary:structural_relationships",
            ]
        );
        let relationships = graph
            .node("doc:deck.dxf:summary:structural_relationships")
            .expect("relationships node");
        assert_eq!(relationships.attributes["value"][0]["placeholder"], true);
    }
}
