use std::collections::BTreeMap;
use std::fmt;

use bridge_config::AnalysisConfig;
use bridge_core::component::{BridgeComponent, ComponentType, Material};
use bridge_core::document::{EntityGeometry, ParseResult, RawEntityRecord};
use bridge_core::geometry::Point2;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::ComponentList;

pub const MEASURED_DIMENSION: &str = "measured_dimension";
pub const SPAN_LENGTH: &str = "span_length";
pub const THICKNESS: &str = "thickness";
pub const CLEARANCE: &str = "clearance";

const LAYER_KEYWORD_WEIGHT: u32 = 1;
const TEXT_KEYWORD_WEIGHT: u32 = 2;
const SHAPE_WEIGHT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawingType {
    Plan,
    Elevation,
    Section,
    GeneralLayout,
    Unknown,
}

impl DrawingType {
    /// 得分相同时按此顺序取前者。
    const PRIORITY: [DrawingType; 4] = [
        DrawingType::Section,
        DrawingType::Elevation,
        DrawingType::Plan,
        DrawingType::GeneralLayout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DrawingType::Plan => "plan",
            DrawingType::Elevation => "elevation",
            DrawingType::Section => "section",
            DrawingType::GeneralLayout => "general_layout",
            DrawingType::Unknown => "unknown",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            DrawingType::Plan => &["PLAN", "平面"],
            DrawingType::Elevation => &["ELEVATION", "ELEV", "立面"],
            DrawingType::Section => &["SECTION", "SECT", "断面", "剖面", "截面"],
            DrawingType::GeneralLayout => &["GENERAL", "LAYOUT", "总体", "布置", "总图"],
            DrawingType::Unknown => &[],
        }
    }

    fn mentioned_in(self, text: &str) -> bool {
        let upper = text.to_uppercase();
        self.keywords().iter().any(|keyword| upper.contains(keyword))
    }
}

impl fmt::Display for DrawingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型空间中所有带文字的实体内容（TEXT/MTEXT/DIMENSION/块属性）。
pub fn collect_texts(parse: &ParseResult) -> Vec<String> {
    parse
        .entities
        .iter()
        .filter_map(RawEntityRecord::text_content)
        .filter(|text| !text.trim().is_empty())
        .collect()
}

/// 各候选图纸类型的累计得分，按 `DrawingType::PRIORITY` 顺序排列。
pub fn drawing_type_scores(
    parse: &ParseResult,
    texts: &[String],
    elongation_ratio: f64,
) -> Vec<(DrawingType, u32)> {
    let (elongated, tall) = match parse.bounds() {
        Some(bounds) => (
            bounds
                .aspect_ratio()
                .is_some_and(|ratio| ratio >= elongation_ratio),
            bounds.height() > bounds.width(),
        ),
        None => (false, false),
    };

    DrawingType::PRIORITY
        .iter()
        .map(|&candidate| {
            let layer_hits = parse
                .layers
                .iter()
                .filter(|layer| candidate.mentioned_in(&layer.name))
                .count() as u32;
            let text_hits = texts
                .iter()
                .filter(|text| candidate.mentioned_in(text))
                .count() as u32;
            let mut score = layer_hits * LAYER_KEYWORD_WEIGHT + text_hits * TEXT_KEYWORD_WEIGHT;
            match candidate {
                DrawingType::Elevation if elongated => score += SHAPE_WEIGHT,
                DrawingType::Section if tall => score += SHAPE_WEIGHT,
                _ => {}
            }
            (candidate, score)
        })
        .collect()
}

pub fn identify_drawing_type(
    parse: &ParseResult,
    texts: &[String],
    elongation_ratio: f64,
) -> DrawingType {
    let scores = drawing_type_scores(parse, texts, elongation_ratio);
    let best = scores.iter().map(|(_, score)| *score).max().unwrap_or(0);
    if best == 0 {
        return DrawingType::Unknown;
    }
    scores
        .into_iter()
        .find(|(_, score)| *score == best)
        .map(|(candidate, _)| candidate)
        .unwrap_or(DrawingType::Unknown)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSample {
    pub component_id: String,
    pub layer: String,
    pub material: Material,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

impl From<&BridgeComponent> for ComponentSample {
    fn from(component: &BridgeComponent) -> Self {
        Self {
            component_id: component.component_id.clone(),
            layer: component.layer.clone(),
            material: component.material.clone(),
            length: component.length(),
            radius: component.radius(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub count: usize,
    /// 材料（`名称/等级`）出现次数。
    pub materials: BTreeMap<String, usize>,
    pub samples: Vec<ComponentSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub total: usize,
    pub by_type: BTreeMap<ComponentType, TypeSummary>,
}

impl ComponentSummary {
    pub fn count(&self, component_type: ComponentType) -> usize {
        self.by_type
            .get(&component_type)
            .map(|summary| summary.count)
            .unwrap_or(0)
    }
}

pub fn summarize_components(components: &[BridgeComponent], sample_limit: usize) -> ComponentSummary {
    let mut summary = ComponentSummary {
        total: components.len(),
        by_type: BTreeMap::new(),
    };
    for component in components {
        let entry = summary.by_type.entry(component.component_type).or_default();
        entry.count += 1;
        *entry
            .materials
            .entry(component.material.to_string())
            .or_insert(0) += 1;
        if entry.samples.len() < sample_limit {
            entry.samples.push(ComponentSample::from(component));
        }
    }
    summary
}

/// 一条规格数值。单位优先取文字中的显式单位，否则取图纸声明单位。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecMeasurement {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpecs {
    pub specs: BTreeMap<String, Vec<SpecMeasurement>>,
}

impl DimensionSpecs {
    pub fn first(&self, label: &str) -> Option<&SpecMeasurement> {
        self.specs.get(label).and_then(|values| values.first())
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn push(&mut self, label: &str, measurement: SpecMeasurement) {
        self.specs
            .entry(label.to_string())
            .or_default()
            .push(measurement);
    }
}

const NUMBER_WITH_UNIT: &str = r"\s*[=:：]?\s*(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>mm|cm|km|m)?";

static SPEC_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (SPAN_LENGTH, r"(?i)(?:跨径|跨度|span(?:\s+length)?)\s*(?:L\s*)?"),
        (THICKNESS, r"(?i)(?:板厚|厚度|厚|thickness|thk)"),
        (CLEARANCE, r"(?i)(?:净空|净高|净宽|clearance)"),
    ]
    .into_iter()
    .map(|(label, prefix)| {
        let pattern = format!("{prefix}{NUMBER_WITH_UNIT}");
        (label, Regex::new(&pattern).expect("内置规格正则无效"))
    })
    .collect()
});

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^[^0-9]*?{NUMBER_WITH_UNIT}")).expect("内置数值正则无效"));

/// 标注、单行/多行文字与块属性都参与规格标签检索；标注另记一条测量值。
pub fn extract_dimensions_and_specs(parse: &ParseResult) -> DimensionSpecs {
    let default_unit = parse.metadata.units.abbreviation().map(str::to_string);
    let mut specs = DimensionSpecs::default();

    for entity in &parse.entities {
        let content = entity.text_content();
        if let EntityGeometry::Dimension { measurement, .. } = &entity.geometry {
            let rendered = content.clone().unwrap_or_default();
            let leading = LEADING_NUMBER.captures(&rendered);
            let shown = leading
                .as_ref()
                .and_then(|captures| captures.name("value"))
                .and_then(|raw| raw.as_str().parse::<f64>().ok());
            if let Some(value) = measurement.or(shown) {
                // 文字中的显式单位只修饰其所显示的数值
                let unit = leading
                    .as_ref()
                    .filter(|_| shown.is_some_and(|shown| (shown - value).abs() < 1e-9))
                    .and_then(|captures| captures.name("unit"))
                    .map(|unit| unit.as_str().to_string())
                    .or_else(|| default_unit.clone());
                specs.push(
                    MEASURED_DIMENSION,
                    SpecMeasurement {
                        value,
                        unit,
                        source_handle: entity.handle.clone(),
                        text: rendered,
                    },
                );
            }
        }

        if let Some(content) = content {
            scan_spec_labels(&mut specs, &content, entity.handle.as_ref(), &default_unit);
        }
    }
    specs
}

fn scan_spec_labels(
    specs: &mut DimensionSpecs,
    content: &str,
    handle: Option<&String>,
    default_unit: &Option<String>,
) {
    for (label, pattern) in SPEC_PATTERNS.iter() {
        for captures in pattern.captures_iter(content) {
            let Some(value) = captures
                .name("value")
                .and_then(|raw| raw.as_str().parse::<f64>().ok())
            else {
                continue;
            };
            let unit = captures
                .name("unit")
                .map(|unit| unit.as_str().to_string())
                .or_else(|| default_unit.clone());
            specs.push(
                label,
                SpecMeasurement {
                    value,
                    unit,
                    source_handle: handle.cloned(),
                    text: captures[0].trim().to_string(),
                },
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialCategory {
    Concrete,
    StructuralSteel,
    Rebar,
    PrestressingStrand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialMention {
    pub category: MaterialCategory,
    pub token: String,
    pub layer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialMentions {
    pub mentions: Vec<MaterialMention>,
    pub counts: BTreeMap<String, usize>,
}

impl MaterialMentions {
    pub fn contains(&self, token: &str) -> bool {
        self.counts.contains_key(token)
    }

    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }
}

/// 牌号正则只匹配牌号本身，前后字符另行检查，相邻牌号可共用一个分隔符。
struct MaterialPattern {
    category: MaterialCategory,
    regex: Regex,
    /// 牌号之前不允许紧邻的字符。
    rejects_prev: fn(char) -> bool,
    /// 牌号之后不允许紧跟的字符。
    rejects_next: fn(char) -> bool,
}

impl MaterialPattern {
    fn tokens<'t>(&'t self, content: &'t str) -> impl Iterator<Item = &'t str> + 't {
        self.regex.find_iter(content).filter_map(move |found| {
            let before = content[..found.start()].chars().next_back();
            let after = content[found.end()..].chars().next();
            let isolated =
                !before.is_some_and(self.rejects_prev) && !after.is_some_and(self.rejects_next);
            isolated.then_some(found.as_str())
        })
    }
}

static MATERIAL_PATTERNS: Lazy<Vec<MaterialPattern>> = Lazy::new(|| {
    let digit: fn(char) -> bool = |c| c.is_ascii_digit();
    let alphanumeric: fn(char) -> bool = |c| c.is_ascii_alphanumeric();
    let never: fn(char) -> bool = |_| false;
    [
        (
            MaterialCategory::Concrete,
            r"C(?:15|20|25|30|35|40|45|50|55|60|65|70|75|80)",
            alphanumeric,
            digit,
        ),
        (
            MaterialCategory::StructuralSteel,
            r"Q(?:235|345|390|420)[A-E]?",
            alphanumeric,
            alphanumeric,
        ),
        (
            MaterialCategory::Rebar,
            r"(?:HRBF|HRB|HPB|CRB)\d{3}E?",
            alphanumeric,
            digit,
        ),
        (
            MaterialCategory::PrestressingStrand,
            r"钢绞线|(?i:strand)|[Φφ][sS]\s*\d+(?:\.\d+)?",
            never,
            never,
        ),
    ]
    .into_iter()
    .map(|(category, pattern, rejects_prev, rejects_next)| MaterialPattern {
        category,
        regex: Regex::new(pattern).expect("内置材料正则无效"),
        rejects_prev,
        rejects_next,
    })
    .collect()
});

/// 在文字内容中检索材料牌号，与图层/颜色分类结果无关。
pub fn extract_material_mentions(parse: &ParseResult) -> MaterialMentions {
    let mut mentions = MaterialMentions::default();
    for entity in &parse.entities {
        let Some(content) = entity.text_content() else {
            continue;
        };
        for pattern in MATERIAL_PATTERNS.iter() {
            for token in pattern.tokens(&content) {
                *mentions.counts.entry(token.to_string()).or_insert(0) += 1;
                mentions.mentions.push(MaterialMention {
                    category: pattern.category,
                    token: token.to_string(),
                    layer: entity.layer.clone(),
                    source_handle: entity.handle.clone(),
                });
            }
        }
    }
    mentions
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Supports,
    Unresolved,
}

/// 空间邻接推断出的构件关系。`placeholder` 为 true 的记录不具权威性。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralRelationship {
    pub kind: RelationshipKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// 构件轮廓之间的间隙。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
    pub tolerance: f64,
    pub placeholder: bool,
}

impl StructuralRelationship {
    fn supports(source: &BridgeComponent, target: &BridgeComponent, gap: f64, tolerance: f64) -> Self {
        Self {
            kind: RelationshipKind::Supports,
            source: Some(source.component_id.clone()),
            target: Some(target.component_id.clone()),
            gap: Some(gap),
            tolerance,
            placeholder: false,
        }
    }

    pub fn placeholder(tolerance: f64) -> Self {
        Self {
            kind: RelationshipKind::Unresolved,
            source: None,
            target: None,
            gap: None,
            tolerance,
            placeholder: true,
        }
    }
}

fn distance_to_outline(point: Point2, outline: &[(Point2, Point2)]) -> Option<f64> {
    outline
        .iter()
        .map(|(start, end)| point.distance_to_segment(*start, *end))
        .min_by(|a, b| a.total_cmp(b))
}

/// 支承构件到梁轮廓的间隙。圆形截面按圆心距离扣除半径。
fn support_gap(support: &BridgeComponent, beam_outline: &[(Point2, Point2)]) -> Option<f64> {
    if let (Some(center), Some(radius)) = (support.center(), support.radius()) {
        return distance_to_outline(center, beam_outline).map(|d| (d - radius).max(0.0));
    }
    support
        .anchor_points()
        .into_iter()
        .filter_map(|point| distance_to_outline(point, beam_outline))
        .min_by(|a, b| a.total_cmp(b))
}

/// 柱/墩/台 → 梁、梁 → 板的支承关系。没有可靠信号时返回单条占位记录。
pub fn infer_structural_relationships(
    components: &[BridgeComponent],
    tolerance: f64,
) -> Vec<StructuralRelationship> {
    let beams: Vec<(&BridgeComponent, Vec<(Point2, Point2)>)> = components
        .iter()
        .filter(|component| component.component_type == ComponentType::Beam)
        .map(|beam| (beam, beam.segments()))
        .filter(|(_, outline)| !outline.is_empty())
        .collect();
    let slabs: Vec<(&BridgeComponent, Vec<(Point2, Point2)>)> = components
        .iter()
        .filter(|component| component.component_type == ComponentType::Slab)
        .map(|slab| (slab, slab.segments()))
        .filter(|(_, outline)| !outline.is_empty())
        .collect();

    let mut relationships = Vec::new();
    for support in components
        .iter()
        .filter(|component| component.component_type.is_support())
    {
        for (beam, outline) in &beams {
            if let Some(gap) = support_gap(support, outline) {
                if gap <= tolerance {
                    relationships.push(StructuralRelationship::supports(support, beam, gap, tolerance));
                }
            }
        }
    }
    for (beam, _) in &beams {
        for (slab, outline) in &slabs {
            let gap = beam
                .anchor_points()
                .into_iter()
                .filter_map(|point| distance_to_outline(point, outline))
                .min_by(|a, b| a.total_cmp(b));
            if let Some(gap) = gap {
                if gap <= tolerance {
                    relationships.push(StructuralRelationship::supports(beam, slab, gap, tolerance));
                }
            }
        }
    }

    if relationships.is_empty() {
        relationships.push(StructuralRelationship::placeholder(tolerance));
    }
    relationships
}

/// 分析阶段的汇总输出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub drawing_type: DrawingType,
    pub components: ComponentSummary,
    pub dimensions: DimensionSpecs,
    pub materials: MaterialMentions,
    pub relationships: Vec<StructuralRelationship>,
}

impl AnalysisSummary {
    /// 非占位的关系记录。
    pub fn confident_relationships(&self) -> impl Iterator<Item = &StructuralRelationship> {
        self.relationships
            .iter()
            .filter(|relationship| !relationship.placeholder)
    }
}

pub fn analyze(
    parse: &ParseResult,
    components: &ComponentList,
    config: &AnalysisConfig,
) -> AnalysisSummary {
    let texts = collect_texts(parse);
    let summary = AnalysisSummary {
        drawing_type: identify_drawing_type(parse, &texts, config.elongation_ratio),
        components: summarize_components(&components.components, config.sample_limit),
        dimensions: extract_dimensions_and_specs(parse),
        materials: extract_material_mentions(parse),
        relationships: infer_structural_relationships(
            &components.components,
            config.adjacency_tolerance,
        ),
    };
    debug!(
        drawing_type = %summary.drawing_type,
        specs = summary.dimensions.specs.len(),
        mentions = summary.materials.mentions.len(),
        relationships = summary.relationships.len(),
        "分析完成"
    );
    summary
}
