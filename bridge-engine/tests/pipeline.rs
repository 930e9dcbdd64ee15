use std::collections::BTreeSet;
use std::path::PathBuf;

use bridge_config::{AppConfig, RuleTables, RulesConfig};
use bridge_core::component::{ComponentType, GeometryDescriptor};
use bridge_core::geometry::Point2;
use bridge_engine::analysis::{MEASURED_DIMENSION, RelationshipKind, SPAN_LENGTH};
use bridge_engine::graph::{
    CONTAINS_GEOMETRIC_ENTITY, CONTAINS_TEXT_ANNOTATION, HAS_LAYER, HAS_SUMMARY, NodeType,
};
use bridge_engine::{DrawingType, Extraction, Extractor, RuleEngine};

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

fn extractor() -> Extractor {
    let tables = RuleTables::from_file(fixture("rules.toml")).expect("读取规则表失败");
    Extractor::new(RuleEngine::new(&tables).expect("编译规则表失败"))
}

fn extract() -> Extraction {
    let extraction = extractor().extract_path(&fixture("girder_properties.dxf"));
    assert!(
        !extraction.is_failed(),
        "unexpected errors: {:?}",
        extraction.error_messages()
    );
    extraction
}

#[test]
fn classification_is_idempotent() {
    let first = extract();
    let second = extract();

    assert_eq!(first.components, second.components);
    assert_eq!(first.components.ids(), second.components.ids());

    let stable = |extraction: &Extraction| -> BTreeSet<String> {
        extraction
            .graph
            .nodes
            .iter()
            .filter(|node| node.id.is_portable())
            .map(|node| node.id.value.clone())
            .collect()
    };
    assert_eq!(stable(&first), stable(&second));
    assert_eq!(
        first.graph.non_portable_ids().len(),
        second.graph.non_portable_ids().len()
    );
}

#[test]
fn beam_line_takes_layer_material_and_length() {
    let extraction = extract();
    let beam = extraction.components.get("BEAM-100").expect("缺少 BEAM-100");
    assert_eq!(beam.component_type, ComponentType::Beam);
    assert_eq!(beam.material.name, "Concrete");
    assert_eq!(beam.material.grade.as_deref(), Some("C30"));
    assert!((beam.length().expect("length") - 5000.0).abs() < 1e-6);
    assert_eq!(beam.source_handle.as_deref(), Some("100"));
}

#[test]
fn bylayer_circle_resolves_column_material() {
    let extraction = extract();
    let column = extraction.components.get("COLUMN-101").expect("缺少 COLUMN-101");
    assert_eq!(column.material.to_string(), "Steel/Q345");
    assert!((column.radius().expect("radius") - 300.0).abs() < 1e-6);
    assert_eq!(column.center(), Some(Point2::new(2500.0, -200.0)));
}

#[test]
fn color_only_circle_is_not_a_component_but_has_material() {
    let extraction = extract();
    let circle = extraction
        .parse
        .entities
        .iter()
        .find(|entity| entity.handle.as_deref() == Some("102"))
        .expect("缺少实体 102");

    assert!(
        extraction
            .components
            .components
            .iter()
            .all(|component| component.source_handle.as_deref() != Some("102"))
    );
    let material = extractor()
        .rules()
        .infer_material(circle, &extraction.parse.layers)
        .expect("颜色规则应当命中");
    assert_eq!(material.to_string(), "Steel/Q235");
}

#[test]
fn closed_polyline_keeps_vertex_order() {
    let extraction = extract();
    let slab = extraction.components.get("SLAB-103").expect("缺少 SLAB-103");
    assert_eq!(slab.material.to_string(), "Concrete");
    assert_eq!(
        slab.geometry,
        vec![GeometryDescriptor::Coordinates {
            points: vec![
                Point2::new(0.0, 10.0),
                Point2::new(5000.0, 10.0),
                Point2::new(5000.0, 1010.0),
                Point2::new(0.0, 1010.0),
            ],
            closed: true,
        }]
    );
}

#[test]
fn only_layer_matches_become_components() {
    let extraction = extract();
    assert_eq!(extraction.parse.entities.len(), 8);

    let ids: Vec<&str> = extraction.components.ids().into_iter().collect();
    assert_eq!(ids, vec!["BEAM-100", "BEAM-seq6", "COLUMN-101", "SLAB-103"]);
    assert!(extraction.components.errors.is_empty());

    // 实体 100 显式颜色 1 对应 Steel/Q235，但图层规则优先。
    let rules = extractor();
    let line = &extraction.parse.entities[0];
    assert_eq!(
        rules
            .rules()
            .infer_material(line, &extraction.parse.layers)
            .map(|m| m.to_string()),
        Some("Concrete/C30".to_string())
    );
}

#[test]
fn missing_file_yields_empty_graph() {
    let extraction = extractor().extract_path(&fixture("no_such_drawing.dxf"));
    assert!(extraction.is_failed());
    assert!(extraction.graph.is_empty());
    assert!(extraction.components.is_empty());
    assert!(extraction.analysis.is_none());
    assert!(!extraction.error_messages().is_empty());
}

#[test]
fn analysis_summarises_the_drawing() {
    let extraction = extract();
    let analysis = extraction.analysis.as_ref().expect("缺少分析结果");

    assert_eq!(analysis.drawing_type, DrawingType::Elevation);
    assert_eq!(analysis.components.total, 4);
    assert_eq!(analysis.components.count(ComponentType::Beam), 2);

    let measured = analysis.dimensions.first(MEASURED_DIMENSION).expect("缺少标注");
    assert_eq!(measured.value, 5000.0);
    assert_eq!(measured.unit.as_deref(), Some("mm"));
    let span = analysis.dimensions.first(SPAN_LENGTH).expect("缺少跨径");
    assert_eq!(span.value, 30.0);
    assert_eq!(span.unit.as_deref(), Some("m"));

    assert!(analysis.materials.contains("C50"));

    let relationships: Vec<(&str, &str)> = analysis
        .confident_relationships()
        .map(|r| {
            (
                r.source.as_deref().unwrap_or_default(),
                r.target.as_deref().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(
        relationships,
        vec![("COLUMN-101", "BEAM-100"), ("BEAM-100", "SLAB-103")]
    );
    assert!(
        analysis
            .relationships
            .iter()
            .all(|r| r.kind == RelationshipKind::Supports)
    );
}

#[test]
fn graph_links_document_layers_entities_and_summaries() {
    let extraction = extract();
    let graph = &extraction.graph;
    graph.validate().expect("图结构应当一致");

    assert_eq!(graph.nodes_of_type(NodeType::Document).count(), 1);
    assert_eq!(graph.nodes_of_type(NodeType::Layer).count(), 6);
    assert_eq!(graph.nodes_of_type(NodeType::GeometricEntity).count(), 6);
    assert_eq!(graph.nodes_of_type(NodeType::TextAnnotation).count(), 2);
    assert_eq!(graph.edges_labeled(HAS_LAYER).count(), 6);
    assert_eq!(graph.edges_labeled(CONTAINS_GEOMETRIC_ENTITY).count(), 6);
    assert_eq!(graph.edges_labeled(CONTAINS_TEXT_ANNOTATION).count(), 2);
    assert_eq!(graph.edges_labeled(HAS_SUMMARY).count(), 4);
    assert_eq!(graph.non_portable_ids().len(), 2);

    let document = graph
        .node("doc:girder_properties.dxf")
        .expect("缺少文档节点");
    assert_eq!(document.attributes["version"], "AC1018");
    assert_eq!(document.attributes["drawing_type"], "elevation");

    let text = graph
        .node("doc:girder_properties.dxf:entity:104")
        .expect("缺少文字节点");
    assert_eq!(text.node_type, NodeType::TextAnnotation);

    let json = graph.to_json().expect("序列化失败");
    let value: serde_json::Value = serde_json::from_str(&json).expect("反序列化失败");
    assert_eq!(value["nodes"].as_array().map(Vec::len), Some(19));
    assert_eq!(value["edges"].as_array().map(Vec::len), Some(18));
}

#[test]
fn extractor_from_config_reads_rule_file() {
    let config = AppConfig {
        rules: RulesConfig {
            path: Some(fixture("rules.toml")),
            tables: None,
        },
        ..AppConfig::default()
    };
    let extractor = Extractor::from_config(&config).expect("构造提取器失败");
    assert_eq!(extractor.rules().version(), "girder-test-1");
    let extraction = extractor.extract_path(&fixture("girder_properties.dxf"));
    assert_eq!(extraction.components.len(), 4);
}

#[test]
fn built_in_rules_apply_without_configuration() {
    let extractor = Extractor::from_config(&AppConfig::default()).expect("内建规则表应当可用");
    let extraction = extractor.extract_path(&fixture("girder_properties.dxf"));
    let beam = extraction.components.get("BEAM-100").expect("缺少 BEAM-100");
    assert_eq!(beam.material.to_string(), "Concrete/C50");
    let steel = extraction.components.get("OTHER-101").expect("缺少 OTHER-101");
    assert_eq!(steel.component_type, ComponentType::Other);
}

#[test]
fn extraction_from_bytes_matches_path() {
    let bytes = std::fs::read(fixture("girder_properties.dxf")).expect("读取夹具失败");
    let from_bytes = extractor().extract_bytes("girder_properties.dxf", &bytes);
    let from_path = extract();
    assert_eq!(from_bytes.components, from_path.components);
    assert_eq!(from_bytes.parse.metadata, from_path.parse.metadata);
}
