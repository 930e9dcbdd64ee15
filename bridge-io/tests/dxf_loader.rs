use std::io::Write;
use std::path::PathBuf;

use bridge_core::{
    document::{ColorValue, DrawingUnits, EntityGeometry, EntityKind, ParseIssue, ParseResult},
    geometry::Point2,
};
use bridge_io::{DocumentLoader, DxfFacade, IoError};

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

fn load_basic() -> ParseResult {
    DxfFacade::new()
        .load(&fixture("bridge_basic.dxf"))
        .expect("读取 bridge_basic.dxf 失败")
}

#[test]
fn header_metadata_is_extracted() {
    let result = load_basic();
    assert_eq!(result.metadata.file_id, "bridge_basic.dxf");
    assert_eq!(result.metadata.version.as_deref(), Some("AC1015"));
    assert_eq!(result.metadata.units, DrawingUnits::Millimeters);
    let digest = result.metadata.content_digest.as_deref().expect("缺少内容摘要");
    assert_eq!(digest.len(), 64);
    assert!(result.errors.is_empty(), "unexpected issues: {:?}", result.errors);
}

#[test]
fn layers_are_declared_once_and_implicit_layers_appended() {
    let result = load_basic();
    let names: Vec<&str> = result.layers.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["0", "BEAM-主梁", "COLUMN", "SLAB", "TEXT", "DIM", "BEARING"]
    );

    let beam = result.layer("BEAM-主梁").expect("缺少 BEAM 图层");
    assert_eq!(beam.color, 1);
    assert!(beam.declared);
    assert_eq!(beam.linetype.as_deref(), Some("CONTINUOUS"));

    let text = result.layer("TEXT").expect("缺少 TEXT 图层");
    assert_eq!(text.color, 7);
    assert!(text.is_off);

    let dim = result.layer("DIM").expect("缺少隐式图层 DIM");
    assert!(!dim.declared);
}

#[test]
fn primitives_carry_type_specific_geometry() {
    let result = load_basic();
    let kinds: Vec<&str> = result.entities.iter().map(|e| e.kind.type_tag()).collect();
    assert_eq!(
        kinds,
        vec![
            "LINE",
            "CIRCLE",
            "POLYLINE",
            "POLYLINE",
            "TEXT",
            "MTEXT",
            "DIMENSION",
            "INSERT",
            "ARC"
        ]
    );

    let line = &result.entities[0];
    assert_eq!(line.handle.as_deref(), Some("2A"));
    assert_eq!(line.color, ColorValue::ByLayer);
    assert_eq!(
        line.geometry,
        EntityGeometry::Line {
            start: Point2::new(0.0, 0.0),
            end: Point2::new(5000.0, 0.0),
        }
    );
    assert_eq!(line.attribute(100), Some("AcDbEntity"));
    assert_eq!(line.attributes.get(&100).map(Vec::len), Some(2));

    match &result.entities[1].geometry {
        EntityGeometry::Circle { center, radius } => {
            assert_eq!(*center, Point2::new(0.0, -20.0));
            assert!((radius - 300.0).abs() < 1e-9);
        }
        other => panic!("expected circle, got {other:?}"),
    }

    match &result.entities[2].geometry {
        EntityGeometry::Polyline { vertices, closed } => {
            assert!(*closed);
            assert_eq!(vertices.len(), 4);
            assert_eq!(vertices[2], Point2::new(5000.0, 1000.0));
        }
        other => panic!("expected lwpolyline, got {other:?}"),
    }

    let heavy = &result.entities[3];
    assert_eq!(heavy.dxf_type, "POLYLINE");
    match &heavy.geometry {
        EntityGeometry::Polyline { vertices, closed } => {
            assert!(!*closed);
            assert_eq!(
                vertices,
                &vec![
                    Point2::new(0.0, 2000.0),
                    Point2::new(100.0, 2000.0),
                    Point2::new(100.0, 2100.0)
                ]
            );
        }
        other => panic!("expected polyline, got {other:?}"),
    }
}

#[test]
fn annotations_are_decoded() {
    let result = load_basic();

    assert_eq!(
        result.entities[4].text_content().as_deref(),
        Some("桥梁立面图 Φ20")
    );
    assert_eq!(
        result.entities[5].text_content().as_deref(),
        Some("主梁采用C50混凝土，\n跨径 L=30m")
    );

    match &result.entities[6].geometry {
        EntityGeometry::Dimension {
            measurement, text, ..
        } => {
            assert_eq!(*measurement, Some(5000.0));
            assert_eq!(text.as_deref(), Some("5000"));
        }
        other => panic!("expected dimension, got {other:?}"),
    }
}

#[test]
fn insert_references_block_with_attributes() {
    let result = load_basic();
    assert_eq!(result.blocks.len(), 1, "匿名块不应输出");
    let block = result.block("BEARING").expect("缺少 BEARING 块");
    assert_eq!(block.base_point, Point2::new(10.0, 10.0));
    assert_eq!(block.entities.len(), 2);

    let insert = &result.entities[7];
    match &insert.geometry {
        EntityGeometry::Insert {
            block,
            insert,
            attributes,
        } => {
            assert_eq!(block, "BEARING");
            assert_eq!(*insert, Point2::new(2500.0, 0.0));
            assert_eq!(
                attributes,
                &vec![("TYPE".to_string(), "GPZ(II)3.5".to_string())]
            );
        }
        other => panic!("expected insert, got {other:?}"),
    }

    let points = result.insert_points(insert);
    assert!(points.contains(&Point2::new(2490.0, 0.0)));
    assert!(points.contains(&Point2::new(2510.0, 0.0)));
}

#[test]
fn unsupported_primitive_keeps_raw_points() {
    let result = load_basic();
    let arc = &result.entities[8];
    assert_eq!(arc.kind, EntityKind::Other("ARC".to_string()));
    assert!(!arc.kind.is_geometry_aware());
    assert_eq!(
        arc.geometry,
        EntityGeometry::Other {
            points: vec![Point2::new(0.0, 0.0)]
        }
    );
}

#[test]
fn malformed_entities_are_reported_per_entity() {
    let result = DxfFacade::new().parse_path(&fixture("malformed_entities.dxf"));
    assert!(!result.has_document_error());
    assert_eq!(result.entities.len(), 3);
    assert_eq!(result.errors.len(), 2);

    let handles: Vec<Option<&str>> = result
        .errors
        .iter()
        .map(|issue| match issue {
            ParseIssue::Geometry { handle, .. } => handle.as_deref(),
            ParseIssue::DocumentOpen { .. } => panic!("unexpected document error"),
        })
        .collect();
    assert_eq!(handles, vec![Some("40"), Some("41")]);
    assert!(!result.entities[2].is_malformed());
}

#[test]
fn truncated_document_yields_empty_result() {
    let result = DxfFacade::new().parse_path(&fixture("truncated.dxf"));
    assert!(result.has_document_error());
    assert!(result.entities.is_empty());
    assert!(result.layers.is_empty());
    assert_eq!(result.errors.len(), 1);

    let err = DxfFacade::new()
        .load(&fixture("truncated.dxf"))
        .expect_err("截断文件应当报错");
    assert!(matches!(err, IoError::InvalidDocument(_)));
}

#[test]
fn missing_file_never_panics() {
    let result = DxfFacade::new().parse_path(&fixture("does_not_exist.dxf"));
    assert!(result.has_document_error());
    assert_eq!(result.metadata.file_id, "does_not_exist.dxf");
    assert!(result.entities.is_empty());
}

#[test]
fn unknown_version_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    write!(
        file,
        "0\nSECTION\n2\nHEADER\n9\n$ACADVER\n1\nR99\n0\nENDSEC\n0\nEOF\n"
    )
    .expect("write temp file");

    let err = DxfFacade::new()
        .load(file.path())
        .expect_err("未知版本应当报错");
    assert!(matches!(err, IoError::UnsupportedFormat(_)));
}

#[test]
fn parse_result_serializes_to_json() {
    let result = load_basic();
    let value = serde_json::to_value(&result).expect("序列化失败");
    assert_eq!(value["metadata"]["units"], "millimeters");
    assert_eq!(value["entities"][0]["kind"], "LINE");
    assert_eq!(value["entities"][0]["geometry"]["shape"], "line");
}
