pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示，所有数值均沿用图纸声明的单位。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance_to(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        /// 点到线段 `start`-`end` 的最短距离；退化线段按点距离处理。
        pub fn distance_to_segment(self, start: Point2, end: Point2) -> f64 {
            let segment = end.0 - start.0;
            let length_squared = segment.length_squared();
            if length_squared <= f64::EPSILON {
                return self.distance_to(start);
            }
            let t = ((self.0 - start.0).dot(segment) / length_squared).clamp(0.0, 1.0);
            let projection = start.0 + segment * t;
            self.0.distance(projection)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于估算图纸范围与长宽比。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn width(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.x() - self.min.x()
            }
        }

        #[inline]
        pub fn height(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.y() - self.min.y()
            }
        }

        /// 宽高比；高度为 0 时无法给出有意义的比值。
        pub fn aspect_ratio(&self) -> Option<f64> {
            let height = self.height();
            if self.is_empty() || height <= f64::EPSILON {
                None
            } else {
                Some(self.width() / height)
            }
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let center = (self.min.as_vec2() + self.max.as_vec2()) * 0.5;
            Point2::from_vec(center)
        }
    }

}

pub mod document {
    use std::collections::BTreeMap;
    use std::fmt;

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds2D, Point2, Vector2};

    /// ACI 颜色 7（白/黑），未声明颜色的图层使用该值。
    pub const DEFAULT_LAYER_COLOR: i16 = 7;

    /// `$INSUNITS` 声明的图纸单位。下游不做单位换算。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DrawingUnits {
        #[default]
        Unitless,
        Inches,
        Feet,
        Millimeters,
        Centimeters,
        Meters,
        Kilometers,
        Other(i16),
    }

    impl DrawingUnits {
        pub fn from_insunits(code: i16) -> Self {
            match code {
                0 => DrawingUnits::Unitless,
                1 => DrawingUnits::Inches,
                2 => DrawingUnits::Feet,
                4 => DrawingUnits::Millimeters,
                5 => DrawingUnits::Centimeters,
                6 => DrawingUnits::Meters,
                7 => DrawingUnits::Kilometers,
                other => DrawingUnits::Other(other),
            }
        }

        /// 单位缩写，用于标注数值的推断单位。
        pub fn abbreviation(self) -> Option<&'static str> {
            match self {
                DrawingUnits::Inches => Some("in"),
                DrawingUnits::Feet => Some("ft"),
                DrawingUnits::Millimeters => Some("mm"),
                DrawingUnits::Centimeters => Some("cm"),
                DrawingUnits::Meters => Some("m"),
                DrawingUnits::Kilometers => Some("km"),
                DrawingUnits::Unitless | DrawingUnits::Other(_) => None,
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct DrawingMetadata {
        pub file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub content_digest: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub version: Option<String>,
        pub units: DrawingUnits,
    }

    impl DrawingMetadata {
        pub fn new(file_id: impl Into<String>) -> Self {
            Self {
                file_id: file_id.into(),
                ..Self::default()
            }
        }
    }

    /// 实体颜色（组码 62）。0 为 BYBLOCK，256 或缺省为 BYLAYER。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ColorValue {
        ByBlock,
        #[default]
        ByLayer,
        Index(i16),
    }

    impl ColorValue {
        pub fn from_code(code: i16) -> Self {
            match code {
                0 => ColorValue::ByBlock,
                256 => ColorValue::ByLayer,
                other => ColorValue::Index(other.abs()),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LayerRecord {
        pub name: String,
        pub color: i16,
        pub is_off: bool,
        pub flags: i16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub linetype: Option<String>,
        /// 为 false 时表示图层只被实体引用，未在 LAYER 表中声明。
        pub declared: bool,
    }

    impl LayerRecord {
        /// 由实体引用而补建的图层，颜色取默认值。
        pub fn implicit(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                color: DEFAULT_LAYER_COLOR,
                is_off: false,
                flags: 0,
                linetype: None,
                declared: false,
            }
        }

        #[inline]
        pub fn is_frozen(&self) -> bool {
            self.flags & 0x01 != 0
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum EntityKind {
        Line,
        Circle,
        Polyline,
        Text,
        #[serde(rename = "MTEXT")]
        MText,
        Dimension,
        Insert,
        Other(String),
    }

    impl EntityKind {
        pub fn from_dxf_type(name: &str) -> Self {
            match name {
                "LINE" => EntityKind::Line,
                "CIRCLE" => EntityKind::Circle,
                "LWPOLYLINE" | "POLYLINE" => EntityKind::Polyline,
                "TEXT" => EntityKind::Text,
                "MTEXT" => EntityKind::MText,
                "DIMENSION" => EntityKind::Dimension,
                "INSERT" => EntityKind::Insert,
                other => EntityKind::Other(other.to_string()),
            }
        }

        pub fn type_tag(&self) -> &str {
            match self {
                EntityKind::Line => "LINE",
                EntityKind::Circle => "CIRCLE",
                EntityKind::Polyline => "POLYLINE",
                EntityKind::Text => "TEXT",
                EntityKind::MText => "MTEXT",
                EntityKind::Dimension => "DIMENSION",
                EntityKind::Insert => "INSERT",
                EntityKind::Other(name) => name,
            }
        }

        /// 文字类实体（TEXT/MTEXT/DIMENSION），在图谱中作为注释节点。
        #[inline]
        pub fn is_annotation(&self) -> bool {
            matches!(
                self,
                EntityKind::Text | EntityKind::MText | EntityKind::Dimension
            )
        }

        /// 参与几何计算（范围、邻接推断）的实体类型。
        #[inline]
        pub fn is_geometry_aware(&self) -> bool {
            !matches!(self, EntityKind::Other(_))
        }
    }

    impl fmt::Display for EntityKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.type_tag())
        }
    }

    /// 按实体类型整理后的几何载荷。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "shape", rename_all = "snake_case")]
    pub enum EntityGeometry {
        Line {
            start: Point2,
            end: Point2,
        },
        Circle {
            center: Point2,
            radius: f64,
        },
        Polyline {
            vertices: Vec<Point2>,
            closed: bool,
        },
        Text {
            insert: Point2,
            content: String,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            height: Option<f64>,
        },
        Dimension {
            #[serde(default, skip_serializing_if = "Option::is_none")]
            definition_point: Option<Point2>,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            measurement: Option<f64>,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            text: Option<String>,
        },
        Insert {
            block: String,
            insert: Point2,
            #[serde(default, skip_serializing_if = "Vec::is_empty")]
            attributes: Vec<(String, String)>,
        },
        /// 暂不支持的实体类型，仅保留原始坐标对（组码 10/20）。
        Other {
            points: Vec<Point2>,
        },
        /// 几何字段缺失或无法解析，保留实体但不参与几何处理。
        Malformed {
            reason: String,
        },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct RawEntityRecord {
        pub kind: EntityKind,
        pub dxf_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub handle: Option<String>,
        pub layer: String,
        pub color: ColorValue,
        pub geometry: EntityGeometry,
        /// 原始组码到取值的映射，同一组码可能出现多次。
        #[serde(default)]
        pub attributes: BTreeMap<i32, Vec<String>>,
    }

    impl RawEntityRecord {
        /// 解析实体的有效颜色：显式颜色直接使用，BYLAYER/BYBLOCK 取所属图层颜色。
        pub fn effective_color(&self, layers: &[LayerRecord]) -> Option<i16> {
            match self.color {
                ColorValue::Index(index) => Some(index),
                ColorValue::ByLayer | ColorValue::ByBlock => layers
                    .iter()
                    .find(|layer| layer.name == self.layer)
                    .map(|layer| layer.color),
            }
        }

        #[inline]
        pub fn is_malformed(&self) -> bool {
            matches!(self.geometry, EntityGeometry::Malformed { .. })
        }

        /// 实体携带的文字内容，插入块时拼接其属性值。
        pub fn text_content(&self) -> Option<String> {
            match &self.geometry {
                EntityGeometry::Text { content, .. } => Some(content.clone()),
                EntityGeometry::Dimension { text, .. } => text.clone(),
                EntityGeometry::Insert { attributes, .. } if !attributes.is_empty() => Some(
                    attributes
                        .iter()
                        .map(|(_, value)| value.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                _ => None,
            }
        }

        /// 实体的特征点，用于范围估算。
        pub fn anchor_points(&self) -> Vec<Point2> {
            match &self.geometry {
                EntityGeometry::Line { start, end } => vec![*start, *end],
                EntityGeometry::Circle { center, radius } => {
                    let r = radius.abs();
                    vec![
                        Point2::new(center.x() - r, center.y() - r),
                        Point2::new(center.x() + r, center.y() + r),
                    ]
                }
                EntityGeometry::Polyline { vertices, .. } => vertices.clone(),
                EntityGeometry::Text { insert, .. } => vec![*insert],
                EntityGeometry::Dimension {
                    definition_point, ..
                } => definition_point.iter().copied().collect(),
                EntityGeometry::Insert { insert, .. } => vec![*insert],
                EntityGeometry::Other { .. } | EntityGeometry::Malformed { .. } => Vec::new(),
            }
        }

        /// 原始属性中第一个取值，便于按组码查询。
        pub fn attribute(&self, code: i32) -> Option<&str> {
            self.attributes
                .get(&code)
                .and_then(|values| values.first())
                .map(|value| value.as_str())
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BlockRecord {
        pub name: String,
        pub base_point: Point2,
        pub entities: Vec<RawEntityRecord>,
    }

    /// 解析过程中记录的问题。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum ParseIssue {
        /// 文件无法打开或结构无效，整份文档不可用。
        DocumentOpen { message: String },
        /// 单个实体的几何数据有误，其余实体照常解析。
        Geometry {
            #[serde(default, skip_serializing_if = "Option::is_none")]
            handle: Option<String>,
            entity_type: String,
            message: String,
        },
    }

    impl fmt::Display for ParseIssue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ParseIssue::DocumentOpen { message } => write!(f, "无法打开文档：{message}"),
                ParseIssue::Geometry {
                    handle,
                    entity_type,
                    message,
                } => match handle {
                    Some(handle) => write!(f, "{entity_type} #{handle} 几何无效：{message}"),
                    None => write!(f, "{entity_type} 几何无效：{message}"),
                },
            }
        }
    }

    /// 解析阶段的完整输出，创建后不再修改。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct ParseResult {
        pub metadata: DrawingMetadata,
        pub layers: Vec<LayerRecord>,
        pub blocks: Vec<BlockRecord>,
        pub entities: Vec<RawEntityRecord>,
        pub errors: Vec<ParseIssue>,
    }

    impl ParseResult {
        /// 文档级失败：集合为空，错误列表非空。
        pub fn failed(metadata: DrawingMetadata, message: impl Into<String>) -> Self {
            Self {
                metadata,
                errors: vec![ParseIssue::DocumentOpen {
                    message: message.into(),
                }],
                ..Self::default()
            }
        }

        pub fn has_document_error(&self) -> bool {
            self.errors
                .iter()
                .any(|issue| matches!(issue, ParseIssue::DocumentOpen { .. }))
        }

        pub fn layer(&self, name: &str) -> Option<&LayerRecord> {
            self.layers.iter().find(|layer| layer.name == name)
        }

        pub fn block(&self, name: &str) -> Option<&BlockRecord> {
            self.blocks.iter().find(|block| block.name == name)
        }

        /// INSERT 引用块内实体的特征点，只做平移（插入点 - 块基点）。
        pub fn insert_points(&self, entity: &RawEntityRecord) -> Vec<Point2> {
            let EntityGeometry::Insert { block, insert, .. } = &entity.geometry else {
                return Vec::new();
            };
            let Some(block) = self.block(block) else {
                return vec![*insert];
            };
            let offset = Vector2::from_points(block.base_point, *insert);
            block
                .entities
                .iter()
                .flat_map(|inner| inner.anchor_points())
                .map(|point| point.translate(offset))
                .collect()
        }

        /// 模型空间实体（含块参照展开后）的整体范围。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            for entity in &self.entities {
                if !entity.kind.is_geometry_aware() {
                    continue;
                }
                for point in entity.anchor_points() {
                    bounds.include_point(point);
                }
                for point in self.insert_points(entity) {
                    bounds.include_point(point);
                }
            }
            if bounds.is_empty() {
                None
            } else {
                Some(bounds)
            }
        }
    }

}

pub mod component {
    use std::collections::BTreeMap;
    use std::fmt;

    use serde::{Deserialize, Serialize};

    use crate::geometry::Point2;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct Material {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub grade: Option<String>,
    }

    impl Material {
        pub fn new(name: impl Into<String>, grade: Option<String>) -> Self {
            Self {
                name: name.into(),
                grade,
            }
        }

        pub fn graded(name: impl Into<String>, grade: impl Into<String>) -> Self {
            Self::new(name, Some(grade.into()))
        }
    }

    impl fmt::Display for Material {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match &self.grade {
                Some(grade) => write!(f, "{}/{}", self.name, grade),
                None => f.write_str(&self.name),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum ComponentType {
        Beam,
        Column,
        Slab,
        Pier,
        Abutment,
        Other,
    }

    impl ComponentType {
        pub fn as_str(self) -> &'static str {
            match self {
                ComponentType::Beam => "BEAM",
                ComponentType::Column => "COLUMN",
                ComponentType::Slab => "SLAB",
                ComponentType::Pier => "PIER",
                ComponentType::Abutment => "ABUTMENT",
                ComponentType::Other => "OTHER",
            }
        }

        /// 能够支承梁的竖向构件。
        #[inline]
        pub fn is_support(self) -> bool {
            matches!(
                self,
                ComponentType::Column | ComponentType::Pier | ComponentType::Abutment
            )
        }
    }

    impl fmt::Display for ComponentType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// 构件的几何描述。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum GeometryDescriptor {
        Length { value: f64 },
        Endpoint { index: usize, point: Point2 },
        Radius { value: f64 },
        Center { point: Point2 },
        Coordinates { points: Vec<Point2>, closed: bool },
        /// 其它实体类型的原始坐标，原样透传。
        Raw { points: Vec<Point2> },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BridgeComponent {
        pub component_id: String,
        pub component_type: ComponentType,
        pub layer: String,
        pub material: Material,
        pub geometry: Vec<GeometryDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub source_handle: Option<String>,
        #[serde(default)]
        pub attributes: BTreeMap<i32, Vec<String>>,
    }

    impl BridgeComponent {
        pub fn length(&self) -> Option<f64> {
            self.geometry.iter().find_map(|descriptor| match descriptor {
                GeometryDescriptor::Length { value } => Some(*value),
                _ => None,
            })
        }

        pub fn radius(&self) -> Option<f64> {
            self.geometry.iter().find_map(|descriptor| match descriptor {
                GeometryDescriptor::Radius { value } => Some(*value),
                _ => None,
            })
        }

        pub fn center(&self) -> Option<Point2> {
            self.geometry.iter().find_map(|descriptor| match descriptor {
                GeometryDescriptor::Center { point } => Some(*point),
                _ => None,
            })
        }

        /// 构件轮廓的线段集合：直线为一段，多段线按顶点顺序连接（闭合时首尾相连）。
        pub fn segments(&self) -> Vec<(Point2, Point2)> {
            let mut endpoints: Vec<(usize, Point2)> = Vec::new();
            let mut segments = Vec::new();
            for descriptor in &self.geometry {
                match descriptor {
                    GeometryDescriptor::Endpoint { index, point } => {
                        endpoints.push((*index, *point));
                    }
                    GeometryDescriptor::Coordinates { points, closed } => {
                        segments.extend(points.windows(2).map(|pair| (pair[0], pair[1])));
                        if *closed && points.len() > 2 {
                            segments.push((points[points.len() - 1], points[0]));
                        }
                    }
                    _ => {}
                }
            }
            endpoints.sort_by_key(|(index, _)| *index);
            segments.extend(endpoints.windows(2).map(|pair| (pair[0].1, pair[1].1)));
            segments
        }

        /// 用于邻接判断的特征点：端点、圆心或多段线顶点。
        pub fn anchor_points(&self) -> Vec<Point2> {
            let mut points = Vec::new();
            for descriptor in &self.geometry {
                match descriptor {
                    GeometryDescriptor::Endpoint { point, .. }
                    | GeometryDescriptor::Center { point } => points.push(*point),
                    GeometryDescriptor::Coordinates { points: coords, .. } => {
                        points.extend(coords.iter().copied())
                    }
                    _ => {}
                }
            }
            points
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn closed_polyline_segments_wrap_around() {
            let component = BridgeComponent {
                component_id: "slab-1".to_string(),
                component_type: ComponentType::Slab,
                layer: "SLAB".to_string(),
                material: Material::new("Concrete", None),
                geometry: vec![GeometryDescriptor::Coordinates {
                    points: vec![
                        Point2::new(0.0, 0.0),
                        Point2::new(10.0, 0.0),
                        Point2::new(10.0, 5.0),
                        Point2::new(0.0, 5.0),
                    ],
                    closed: true,
                }],
                source_handle: Some("1".to_string()),
                attributes: BTreeMap::new(),
            };
            let segments = component.segments();
            assert_eq!(segments.len(), 4);
            assert_eq!(segments[3], (Point2::new(0.0, 5.0), Point2::new(0.0, 0.0)));
        }

        #[test]
        fn material_display_includes_grade() {
            assert_eq!(Material::graded("Concrete", "C30").to_string(), "Concrete/C30");
            assert_eq!(Material::new("Steel", None).to_string(), "Steel");
        }
    }
}
