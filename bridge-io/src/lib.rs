use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use bridge_core::{
    document::{
        BlockRecord, ColorValue, DrawingMetadata, DrawingUnits, EntityGeometry, EntityKind,
        LayerRecord, ParseIssue, ParseResult, RawEntityRecord,
    },
    geometry::Point2,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

const BINARY_DXF_SENTINEL: &[u8] = b"AutoCAD Binary DXF";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

/// 图纸加载入口。`load*` 在文档级错误时返回 `Err`，`parse_*` 永不失败。
pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<ParseResult, IoError>;

    fn load_bytes(&self, file_id: &str, bytes: &[u8]) -> Result<ParseResult, IoError>;

    /// 解析文件；无法打开时返回空集合并在 `errors` 中记录原因。
    fn parse_path(&self, path: &Path) -> ParseResult {
        match self.load(path) {
            Ok(result) => result,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "无法打开图纸，返回空解析结果");
                ParseResult::failed(DrawingMetadata::new(file_id_for(path)), err.to_string())
            }
        }
    }

    fn parse_bytes(&self, file_id: &str, bytes: &[u8]) -> ParseResult {
        match self.load_bytes(file_id, bytes) {
            Ok(result) => result,
            Err(err) => {
                warn!(file_id, error = %err, "无法解析图纸数据，返回空解析结果");
                let mut metadata = DrawingMetadata::new(file_id);
                metadata.content_digest = Some(content_digest(bytes));
                ParseResult::failed(metadata, err.to_string())
            }
        }
    }
}

/// 文件标识：优先使用文件名，保证同一文件在不同目录下得到相同标识。
pub fn file_id_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn content_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<ParseResult, IoError> {
        let bytes = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_bytes(&file_id_for(path), &bytes)
    }

    fn load_bytes(&self, file_id: &str, bytes: &[u8]) -> Result<ParseResult, IoError> {
        if bytes.starts_with(BINARY_DXF_SENTINEL) {
            return Err(IoError::UnsupportedFormat(
                "二进制 DXF 暂不支持，请导出为 ASCII DXF".to_string(),
            ));
        }
        let source = decode_source(bytes);
        let mut metadata = DrawingMetadata::new(file_id);
        metadata.content_digest = Some(content_digest(bytes));

        let drawing = DxfParser::new(&source).parse().map_err(|err| match err {
            DxfError::Unsupported { feature } => IoError::UnsupportedFormat(feature),
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
        })?;
        Ok(drawing.finish(metadata))
    }
}

fn decode_source(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            // 旧版本 DXF 常以本地代码页保存，非 UTF-8 字节按替换字符处理
            debug!("DXF 内容不是合法 UTF-8，按有损方式解码");
            String::from_utf8_lossy(bytes)
        }
    }
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// 解析中间状态，`finish` 后转换为不可变的 `ParseResult`。
#[derive(Debug, Default)]
struct ParsedDrawing {
    version: Option<String>,
    units: DrawingUnits,
    layers: Vec<LayerRecord>,
    blocks: Vec<BlockRecord>,
    entities: Vec<RawEntityRecord>,
    issues: Vec<ParseIssue>,
    seen_handles: HashSet<String>,
}

impl ParsedDrawing {
    /// 登记实体：记录几何问题，并保证句柄在文档内唯一。
    fn admit(&mut self, mut entity: RawEntityRecord) -> RawEntityRecord {
        if let Some(handle) = entity.handle.as_ref() {
            if !self.seen_handles.insert(handle.clone()) {
                warn!(handle = %handle, entity_type = %entity.dxf_type, "句柄重复，后出现的实体按无句柄处理");
                entity.handle = None;
            }
        }
        if let EntityGeometry::Malformed { reason } = &entity.geometry {
            warn!(handle = ?entity.handle, entity_type = %entity.dxf_type, reason = %reason, "实体几何无效");
            self.issues.push(ParseIssue::Geometry {
                handle: entity.handle.clone(),
                entity_type: entity.dxf_type.clone(),
                message: reason.clone(),
            });
        }
        entity
    }

    fn finish(mut self, mut metadata: DrawingMetadata) -> ParseResult {
        metadata.version = self.version.take();
        metadata.units = self.units;

        let mut known: HashSet<String> = self.layers.iter().map(|l| l.name.clone()).collect();
        let referenced = self
            .entities
            .iter()
            .chain(self.blocks.iter().flat_map(|block| block.entities.iter()))
            .map(|entity| entity.layer.clone())
            .collect::<Vec<_>>();
        for name in referenced {
            if known.insert(name.clone()) {
                self.layers.push(LayerRecord::implicit(name));
            }
        }

        debug!(
            file_id = %metadata.file_id,
            layers = self.layers.len(),
            blocks = self.blocks.len(),
            entities = self.entities.len(),
            issues = self.issues.len(),
            "DXF 解析完成"
        );

        ParseResult {
            metadata,
            layers: self.layers,
            blocks: self.blocks,
            entities: self.entities,
            errors: self.issues,
        }
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
    drawing: ParsedDrawing,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
            drawing: ParsedDrawing::default(),
        }
    }

    fn parse(mut self) -> Result<ParsedDrawing, DxfError> {
        let mut saw_structure = false;
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.as_str() {
                "SECTION" => {
                    saw_structure = true;
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "HEADER" => self.parse_header()?,
                        "TABLES" => self.parse_tables()?,
                        "BLOCKS" => self.parse_blocks()?,
                        "ENTITIES" => self.parse_entities()?,
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => {
                    saw_structure = true;
                    break;
                }
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        if !saw_structure {
            return Err(DxfError::invalid("文件中未找到任何 SECTION 或 EOF"));
        }
        Ok(self.drawing)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_header(&mut self) -> Result<(), DxfError> {
        let mut variable: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some((9, name)) => variable = Some(name.trim().to_string()),
                Some((code, value)) => match (variable.as_deref(), code) {
                    (Some("$ACADVER"), 1) => {
                        self.drawing.version = Some(value.trim().to_string());
                    }
                    (Some("$INSUNITS"), 70) => {
                        let code = parse_i16(&value, "$INSUNITS（组码 70）")?;
                        self.drawing.units = DrawingUnits::from_insunits(code);
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("HEADER 段未找到 ENDSEC 终止标记")),
            }
        }

        if let Some(version) = self.drawing.version.as_deref() {
            if !version.starts_with("AC") {
                return Err(DxfError::unsupported(format!(
                    "无法识别的 DXF 版本 {version}"
                )));
            }
        }
        Ok(())
    }

    fn parse_tables(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("TABLES 段提前结束"))?;
            if code != 0 {
                // TABLE 头部字段（表名、条目数、句柄等）
                continue;
            }
            match value.as_str() {
                "ENDSEC" => break,
                "LAYER" => {
                    let body = self.read_body()?;
                    if let Some(layer) = build_layer(&body)? {
                        if self.drawing.layers.iter().any(|l| l.name == layer.name) {
                            warn!(layer = %layer.name, "LAYER 表中存在重复图层，保留首次定义");
                        } else {
                            self.drawing.layers.push(layer);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_blocks(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("BLOCKS 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "BLOCKS 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.as_str() {
                "ENDSEC" => break,
                "BLOCK" => {
                    if let Some(block) = self.parse_block_definition()? {
                        self.drawing.blocks.push(block);
                    }
                }
                _ => {
                    // 未预期的条目（例如嵌套记录），直接跳过
                    self.read_body()?;
                }
            }
        }
        Ok(())
    }

    fn parse_block_definition(&mut self) -> Result<Option<BlockRecord>, DxfError> {
        let header = self.read_body()?;
        let mut name: Option<String> = None;
        let mut base_x = 0.0;
        let mut base_y = 0.0;
        for (code, value) in &header {
            match code {
                2 => name = Some(value.trim().to_string()),
                10 => base_x = parse_f64(value, "BLOCK 基点 X")?,
                20 => base_y = parse_f64(value, "BLOCK 基点 Y")?,
                _ => {}
            }
        }
        let name = name.ok_or_else(|| DxfError::invalid("BLOCK 缺少名称（组码 2）"))?;
        // 匿名块（*Model_Space、标注块等）不作为块定义输出
        let collect_entities = !name.starts_with('*');

        let mut entities = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.as_str() {
                    "ENDBLK" => {
                        self.read_body()?;
                        break;
                    }
                    kind => {
                        let entity = self.read_entity(kind)?;
                        if collect_entities {
                            entities.push(self.drawing.admit(entity));
                        }
                    }
                },
                Some((code, _)) => {
                    return Err(DxfError::invalid(format!(
                        "BLOCK {name} 内遇到组码 {code}（期望 0 表示实体起始）"
                    )));
                }
                None => {
                    return Err(DxfError::invalid("BLOCK 定义未找到 ENDBLK 终止标记"));
                }
            }
        }

        if !collect_entities {
            return Ok(None);
        }
        Ok(Some(BlockRecord {
            name,
            base_point: Point2::new(base_x, base_y),
            entities,
        }))
    }

    fn parse_entities(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.as_str() {
                "ENDSEC" => break,
                "SEQEND" | "VERTEX" | "ATTRIB" => {
                    // 游离的序列记录，不属于任何实体
                    self.read_body()?;
                }
                kind => {
                    let entity = self.read_entity(kind)?;
                    let entity = self.drawing.admit(entity);
                    self.drawing.entities.push(entity);
                }
            }
        }
        Ok(())
    }

    /// 读取一个实体。结构性错误返回 `Err`，几何错误记录为 `Malformed`。
    fn read_entity(&mut self, dxf_type: &str) -> Result<RawEntityRecord, DxfError> {
        let body = EntityBody::new(dxf_type, self.read_body()?);
        let geometry = match dxf_type {
            "LINE" => body.line(),
            "CIRCLE" => body.circle(),
            "LWPOLYLINE" => body.lwpolyline(),
            "POLYLINE" => {
                let vertices = self.read_vertex_sequence()?;
                body.polyline(&vertices)
            }
            "TEXT" => body.text(),
            "MTEXT" => body.mtext(),
            "DIMENSION" => body.dimension(),
            "INSERT" => {
                let attributes = self.read_attribute_sequence()?;
                body.insert(attributes)
            }
            _ => Ok(body.raw_points()),
        };
        let geometry = geometry.unwrap_or_else(|reason| EntityGeometry::Malformed { reason });

        let mut kind = EntityKind::from_dxf_type(dxf_type);
        if kind.is_geometry_aware() && matches!(geometry, EntityGeometry::Other { .. }) {
            // 网格类 POLYLINE 等变体不参与几何处理
            kind = EntityKind::Other(dxf_type.to_string());
        }
        Ok(body.into_record(kind, geometry))
    }

    fn read_vertex_sequence(&mut self) -> Result<Vec<Vec<(i32, String)>>, DxfError> {
        let mut vertices = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.as_str() {
                    "VERTEX" => vertices.push(self.read_body()?),
                    "SEQEND" => {
                        self.read_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => {
                    return Err(DxfError::invalid(
                        "POLYLINE 遇到无效的记录，期望 VERTEX/SEQEND",
                    ));
                }
                None => {
                    return Err(DxfError::invalid(
                        "POLYLINE 缺少 SEQEND（组码 0, 值为 SEQEND）",
                    ));
                }
            }
        }
        Ok(vertices)
    }

    fn read_attribute_sequence(&mut self) -> Result<Vec<(String, String)>, DxfError> {
        let mut attributes = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.as_str() {
                    "ATTRIB" => {
                        let body = self.read_body()?;
                        let tag = body
                            .iter()
                            .find(|(code, _)| *code == 2)
                            .map(|(_, value)| value.trim().to_string());
                        let text = body
                            .iter()
                            .find(|(code, _)| *code == 1)
                            .map(|(_, value)| decode_inline_text(value));
                        if let (Some(tag), Some(text)) = (tag, text) {
                            attributes.push((tag, text));
                        }
                    }
                    "SEQEND" => {
                        self.read_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some((code, value)) => {
                    return Err(DxfError::invalid(format!(
                        "INSERT 属性段出现意外组码 {code} 值 {value}"
                    )));
                }
                None => break,
            }
        }
        Ok(attributes)
    }

    /// 读取当前记录的全部组码，遇到下一个组码 0 时回退并停止。
    fn read_body(&mut self) -> Result<Vec<(i32, String)>, DxfError> {
        let mut pairs = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(pair) => pairs.push(pair),
                None => break,
            }
        }
        Ok(pairs)
    }
}

fn build_layer(body: &[(i32, String)]) -> Result<Option<LayerRecord>, DxfError> {
    let mut name: Option<String> = None;
    let mut color: i16 = bridge_core::document::DEFAULT_LAYER_COLOR;
    let mut flags: i16 = 0;
    let mut linetype: Option<String> = None;
    for (code, value) in body {
        match code {
            2 => name = Some(value.trim().to_string()),
            62 => color = parse_i16(value, "LAYER 颜色（组码 62）")?,
            70 => flags = parse_i16(value, "LAYER 标志（组码 70）")?,
            6 => linetype = Some(value.trim().to_string()),
            _ => {}
        }
    }
    let Some(name) = name.filter(|name| !name.is_empty()) else {
        warn!("LAYER 表项缺少名称（组码 2），已忽略");
        return Ok(None);
    };
    Ok(Some(LayerRecord {
        name,
        color: color.abs(),
        // 负颜色号表示图层关闭
        is_off: color < 0,
        flags,
        linetype,
        declared: true,
    }))
}

/// 单个实体的组码集合，负责按类型提取几何载荷。
struct EntityBody<'t> {
    dxf_type: &'t str,
    pairs: Vec<(i32, String)>,
}

impl<'t> EntityBody<'t> {
    fn new(dxf_type: &'t str, pairs: Vec<(i32, String)>) -> Self {
        Self { dxf_type, pairs }
    }

    fn values(&self, code: i32) -> impl Iterator<Item = &str> + '_ {
        self.pairs
            .iter()
            .filter(move |(c, _)| *c == code)
            .map(|(_, value)| value.as_str())
    }

    fn first(&self, code: i32) -> Option<&str> {
        self.values(code).next()
    }

    fn number(&self, raw: &str, label: &str) -> Result<f64, String> {
        raw.trim()
            .parse::<f64>()
            .map_err(|_| format!("{} {label} 解析失败（值：\"{raw}\"）", self.dxf_type))
    }

    fn optional_f64(&self, code: i32, label: &str) -> Result<Option<f64>, String> {
        self.first(code)
            .map(|raw| self.number(raw, label))
            .transpose()
    }

    /// 必填且只能出现一次的数值字段。
    fn single_f64(&self, code: i32, label: &str) -> Result<f64, String> {
        let mut values = self.values(code);
        let raw = values
            .next()
            .ok_or_else(|| format!("{} 缺少{label}（组码 {code}）", self.dxf_type))?;
        if values.next().is_some() {
            return Err(format!("{} 遇到重复的{label}（组码 {code}）", self.dxf_type));
        }
        self.number(raw, label)
    }

    fn point(&self, x_code: i32, label: &str) -> Result<Point2, String> {
        let x = self.single_f64(x_code, &format!("{label} X"))?;
        let y = self.single_f64(x_code + 10, &format!("{label} Y"))?;
        Ok(Point2::new(x, y))
    }

    fn optional_point(&self, x_code: i32, label: &str) -> Result<Option<Point2>, String> {
        let x = self.optional_f64(x_code, &format!("{label} X"))?;
        let y = self.optional_f64(x_code + 10, &format!("{label} Y"))?;
        Ok(match (x, y) {
            (Some(x), Some(y)) => Some(Point2::new(x, y)),
            _ => None,
        })
    }

    fn flags(&self) -> Result<i32, String> {
        match self.first(70) {
            Some(raw) => raw
                .trim()
                .parse::<i32>()
                .map_err(|_| format!("{} 标志解析失败（值：\"{raw}\"）", self.dxf_type)),
            None => Ok(0),
        }
    }

    fn line(&self) -> Result<EntityGeometry, String> {
        Ok(EntityGeometry::Line {
            start: self.point(10, "起点")?,
            end: self.point(11, "终点")?,
        })
    }

    fn circle(&self) -> Result<EntityGeometry, String> {
        let center = self.point(10, "圆心")?;
        let radius = self.single_f64(40, "半径")?;
        if radius <= 0.0 {
            return Err(format!("CIRCLE 半径必须为正数，实际为 {radius}"));
        }
        Ok(EntityGeometry::Circle { center, radius })
    }

    fn lwpolyline(&self) -> Result<EntityGeometry, String> {
        let closed = self.flags()? & 0x01 == 0x01;
        let mut vertices = Vec::new();
        let mut pending_x: Option<f64> = None;
        let mut pending_y: Option<f64> = None;
        for (code, value) in &self.pairs {
            match code {
                10 => {
                    let x = self.number(value, "顶点 X")?;
                    if let Some(y) = pending_y.take() {
                        vertices.push(Point2::new(x, y));
                    } else if pending_x.replace(x).is_some() {
                        return Err("LWPOLYLINE 顶点缺少对应的 Y（组码 20）".to_string());
                    }
                }
                20 => {
                    let y = self.number(value, "顶点 Y")?;
                    if let Some(x) = pending_x.take() {
                        vertices.push(Point2::new(x, y));
                    } else if pending_y.replace(y).is_some() {
                        return Err("LWPOLYLINE 顶点缺少对应的 X（组码 10）".to_string());
                    }
                }
                _ => {}
            }
        }
        if pending_x.is_some() || pending_y.is_some() {
            return Err(
                "LWPOLYLINE 顶点坐标成对出现（组码 10/20），检测到不完整的顶点".to_string(),
            );
        }
        if vertices.is_empty() {
            return Err("LWPOLYLINE 未解析到任何顶点".to_string());
        }
        Ok(EntityGeometry::Polyline { vertices, closed })
    }

    fn polyline(&self, vertex_bodies: &[Vec<(i32, String)>]) -> Result<EntityGeometry, String> {
        let flags = self.flags()?;
        let mut vertices = Vec::with_capacity(vertex_bodies.len());
        for body in vertex_bodies {
            let vertex = EntityBody::new("VERTEX", body.clone());
            vertices.push(vertex.point(10, "顶点")?);
        }
        // 0x10 多边形网格、0x40 多面网格
        if flags & (0x10 | 0x40) != 0 {
            return Ok(EntityGeometry::Other { points: vertices });
        }
        if vertices.is_empty() {
            return Err("POLYLINE 未解析到任何顶点".to_string());
        }
        Ok(EntityGeometry::Polyline {
            vertices,
            closed: flags & 0x01 == 0x01,
        })
    }

    fn text(&self) -> Result<EntityGeometry, String> {
        let insert = self.point(10, "插入点")?;
        let content = self
            .first(1)
            .map(decode_inline_text)
            .ok_or_else(|| "TEXT 缺少文本内容（组码 1）".to_string())?;
        Ok(EntityGeometry::Text {
            insert,
            content,
            height: self.optional_f64(40, "高度")?,
        })
    }

    fn mtext(&self) -> Result<EntityGeometry, String> {
        let insert = self.point(10, "插入点")?;
        // 组码 3 为前置分段，组码 1 为末段，按出现顺序拼接
        let fragments: Vec<&str> = self
            .pairs
            .iter()
            .filter(|(code, _)| *code == 1 || *code == 3)
            .map(|(_, value)| value.as_str())
            .collect();
        if fragments.is_empty() {
            return Err("MTEXT 缺少内容（组码 1/3）".to_string());
        }
        Ok(EntityGeometry::Text {
            insert,
            content: decode_mtext_content(&fragments.concat()),
            height: self.optional_f64(40, "高度")?,
        })
    }

    fn dimension(&self) -> Result<EntityGeometry, String> {
        let definition_point = self.optional_point(10, "定义点")?;
        let measurement = self.optional_f64(42, "测量值")?;
        // 组码 1 缺省或为空串时显示测量值
        let raw = self.first(1).filter(|raw| !raw.is_empty()).unwrap_or("<>");
        let text = Some(render_dimension_text(raw, measurement)).filter(|text| !text.is_empty());
        Ok(EntityGeometry::Dimension {
            definition_point,
            measurement,
            text,
        })
    }

    fn insert(&self, attributes: Vec<(String, String)>) -> Result<EntityGeometry, String> {
        let block = self
            .first(2)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| "INSERT 缺少块名（组码 2）".to_string())?;
        Ok(EntityGeometry::Insert {
            block,
            insert: self.point(10, "插入点")?,
            attributes,
        })
    }

    /// 不支持的实体类型：按顺序收集组码 10/20 坐标对。
    fn raw_points(&self) -> EntityGeometry {
        let mut points = Vec::new();
        let mut pending_x: Option<f64> = None;
        for (code, value) in &self.pairs {
            match code {
                10 => pending_x = value.trim().parse::<f64>().ok(),
                20 => {
                    if let (Some(x), Ok(y)) = (pending_x.take(), value.trim().parse::<f64>()) {
                        points.push(Point2::new(x, y));
                    }
                }
                _ => {}
            }
        }
        EntityGeometry::Other { points }
    }

    fn into_record(self, kind: EntityKind, geometry: EntityGeometry) -> RawEntityRecord {
        let handle = self
            .first(5)
            .map(|handle| handle.trim().to_string())
            .filter(|handle| !handle.is_empty());
        let layer = self
            .first(8)
            .map(|layer| layer.trim().to_string())
            .filter(|layer| !layer.is_empty())
            .unwrap_or_else(|| "0".to_string());
        let color = match self.first(62) {
            Some(raw) => match raw.trim().parse::<i16>() {
                Ok(code) => ColorValue::from_code(code),
                Err(_) => {
                    warn!(entity_type = self.dxf_type, value = raw, "颜色值无法解析，按 BYLAYER 处理");
                    ColorValue::ByLayer
                }
            },
            None => ColorValue::ByLayer,
        };

        let mut attributes: BTreeMap<i32, Vec<String>> = BTreeMap::new();
        for (code, value) in self.pairs {
            attributes.entry(code).or_default().push(value);
        }

        RawEntityRecord {
            kind,
            dxf_type: self.dxf_type.to_string(),
            handle,
            layer,
            color,
            geometry,
            attributes,
        }
    }
}

/// 标注文字中 `<>` 表示测量值。
fn render_dimension_text(raw: &str, measurement: Option<f64>) -> String {
    let decoded = decode_mtext_content(raw.trim());
    let replacement = measurement.map(format_measurement).unwrap_or_default();
    decoded.replace("<>", &replacement).trim().to_string()
}

fn format_measurement(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("{value:.0}")
    } else {
        let text = format!("{value:.4}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        loop {
            let code_line = match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    line
                }
                None => return Ok(None),
            };
            if code_line.trim().is_empty() && self.lines.clone().all(|line| line.trim().is_empty())
            {
                // 文件末尾的空行
                return Ok(None);
            }

            let value_line = match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    line
                }
                None => {
                    return Err(DxfError::invalid(format!(
                        "文件在第 {} 行结束，缺少与组码对应的值行",
                        self.line_number
                    )));
                }
            };

            let code = code_line.trim().parse::<i32>().map_err(|_| {
                DxfError::invalid(format!(
                    "第 {} 行的组码 \"{}\" 无法解析为整数",
                    self.line_number - 1,
                    code_line.trim()
                ))
            })?;
            if code == 999 {
                // 注释
                continue;
            }
            let value = value_line.trim_end_matches('\r').to_string();
            return Ok(Some((code, value)));
        }
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF pair 只能回退一次");
        self.buffer = Some(pair);
    }
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = raw
        .trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}

/// 去除 MTEXT 内联格式码，保留可读文字。
fn decode_mtext_content(raw: &str) -> String {
    let mut result = String::new();
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '{' | '}' => {}
            '\\' => match chars.next() {
                Some('P') | Some('p') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('{') => result.push('{'),
                Some('}') => result.push('}'),
                Some('S') | Some('s') => {
                    // 堆叠分数 \S1^2; 输出为 1/2
                    for next in chars.by_ref() {
                        match next {
                            ';' => break,
                            '^' | '#' => result.push('/'),
                            other => result.push(other),
                        }
                    }
                }
                Some('A' | 'C' | 'c' | 'F' | 'f' | 'H' | 'h' | 'Q' | 'q' | 'T' | 't' | 'W' | 'w') => {
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                    }
                }
                Some('L' | 'l' | 'O' | 'o' | 'K' | 'k') => {}
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            },
            other => result.push(other),
        }
    }
    decode_special_codes(&result)
}

fn decode_inline_text(raw: &str) -> String {
    let mut result = String::new();
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('P') | Some('p') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(ch);
        }
    }
    decode_special_codes(&result)
}

/// `%%c` 直径、`%%d` 度、`%%p` 正负号。
fn decode_special_codes(text: &str) -> String {
    if !text.contains("%%") {
        return text.to_string();
    }
    text.replace("%%c", "Φ")
        .replace("%%C", "Φ")
        .replace("%%d", "°")
        .replace("%%D", "°")
        .replace("%%p", "±")
        .replace("%%P", "±")
        .replace("%%%", "%")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dxf(lines: &[&str]) -> String {
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    #[test]
    fn reader_skips_comments_and_trailing_blank_lines() {
        let source = dxf(&["999", "generated", "0", "EOF", ""]);
        let mut reader = DxfReader::new(&source);
        let pair = reader.next_pair().expect("读取组码").expect("存在组码");
        assert_eq!(pair, (0, "EOF".to_string()));
        assert!(reader.next_pair().expect("读取结束").is_none());
    }

    #[test]
    fn reader_rejects_non_numeric_group_code() {
        let source = dxf(&["X", "SECTION"]);
        let mut reader = DxfReader::new(&source);
        assert!(matches!(reader.next_pair(), Err(DxfError::Invalid { .. })));
    }

    #[test]
    fn mtext_formatting_codes_are_stripped() {
        assert_eq!(
            decode_mtext_content("{\\fSimSun|b0;\\H2.5;主梁}\\P采用C50混凝土"),
            "主梁\n采用C50混凝土"
        );
        assert_eq!(decode_mtext_content("\\S1^2;"), "1/2");
        assert_eq!(decode_inline_text("%%c20 钢筋"), "Φ20 钢筋");
    }

    #[test]
    fn dimension_text_substitutes_measurement() {
        assert_eq!(render_dimension_text("<>", Some(5000.0)), "5000");
        assert_eq!(render_dimension_text("跨径 <>", Some(12.5)), "跨径 12.5");
        assert_eq!(render_dimension_text("<>", None), "");
    }

    #[test]
    fn dimension_without_text_shows_measurement() {
        let source = dxf(&[
            "0", "SECTION", "2", "ENTITIES", "0", "DIMENSION", "5", "2A", "8", "DIM", "42",
            "30000.0", "0", "DIMENSION", "5", "2B", "8", "DIM", "1", "", "42", "12.5", "0",
            "ENDSEC", "0", "EOF",
        ]);
        let result = DxfFacade::new().parse_bytes("dims.dxf", source.as_bytes());
        let texts: Vec<Option<String>> = result
            .entities
            .iter()
            .map(RawEntityRecord::text_content)
            .collect();
        assert_eq!(
            texts,
            vec![Some("30000".to_string()), Some("12.5".to_string())]
        );
    }

    #[test]
    fn circle_without_radius_is_malformed_but_kept() {
        let source = dxf(&[
            "0", "SECTION", "2", "ENTITIES", "0", "CIRCLE", "5", "1A", "8", "COLUMN", "10",
            "0.0", "20", "0.0", "0", "LINE", "5", "1B", "8", "BEAM", "10", "0", "20", "0", "11",
            "10", "21", "0", "0", "ENDSEC", "0", "EOF",
        ]);
        let result = DxfFacade::new().parse_bytes("inline.dxf", source.as_bytes());
        assert!(!result.has_document_error());
        assert_eq!(result.entities.len(), 2);
        assert!(result.entities[0].is_malformed());
        assert_eq!(result.errors.len(), 1);
        match &result.errors[0] {
            ParseIssue::Geometry {
                handle, message, ..
            } => {
                assert_eq!(handle.as_deref(), Some("1A"));
                assert!(message.contains("半径"), "unexpected message: {message}");
            }
            other => panic!("unexpected issue: {other:?}"),
        }
    }

    #[test]
    fn duplicate_handles_are_dropped() {
        let source = dxf(&[
            "0", "SECTION", "2", "ENTITIES", "0", "TEXT", "5", "A", "10", "0", "20", "0", "1",
            "one", "0", "TEXT", "5", "A", "10", "1", "20", "1", "1", "two", "0", "ENDSEC", "0",
            "EOF",
        ]);
        let result = DxfFacade::new().parse_bytes("dup.dxf", source.as_bytes());
        assert_eq!(result.entities[0].handle.as_deref(), Some("A"));
        assert_eq!(result.entities[1].handle, None);
    }

    #[test]
    fn binary_dxf_is_reported_as_unsupported() {
        let mut bytes = BINARY_DXF_SENTINEL.to_vec();
        bytes.extend_from_slice(b"\r\n\x1a\x00");
        let result = DxfFacade::new().parse_bytes("binary.dxf", &bytes);
        assert!(result.has_document_error());
        assert!(result.entities.is_empty());
        assert!(result.metadata.content_digest.is_some());
    }

    #[test]
    fn empty_input_is_a_document_error() {
        let result = DxfFacade::new().parse_bytes("empty.dxf", b"");
        assert!(result.has_document_error());
    }
}
