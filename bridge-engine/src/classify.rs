use std::collections::BTreeSet;

use bridge_config::{ColorRule, LayerRule, RuleTables};
use bridge_core::component::{BridgeComponent, ComponentType, GeometryDescriptor, Material};
use bridge_core::document::{EntityGeometry, LayerRecord, RawEntityRecord};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;

#[derive(Debug, Clone)]
struct CompiledLayerRule {
    pattern: Regex,
    component_type: ComponentType,
    material: Material,
}

/// 编译后的规则表。构造后只读，可通过 `Arc` 在多个提取任务间共享。
#[derive(Debug, Clone)]
pub struct RuleEngine {
    version: String,
    layer_rules: Vec<CompiledLayerRule>,
    color_rules: Vec<(i16, Material)>,
}

impl RuleEngine {
    /// 编译图层规则（不区分大小写）。任一正则非法时整体失败。
    pub fn new(tables: &RuleTables) -> Result<Self, EngineError> {
        let layer_rules = tables
            .layer_rules
            .iter()
            .map(compile_layer_rule)
            .collect::<Result<Vec<_>, _>>()?;
        let color_rules = tables
            .color_rules
            .iter()
            .map(|rule| (rule.color, rule.material()))
            .collect();

        debug!(
            version = %tables.version,
            layer_rules = tables.layer_rules.len(),
            color_rules = tables.color_rules.len(),
            "规则表已编译"
        );

        Ok(Self {
            version: tables.version.clone(),
            layer_rules,
            color_rules,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 第一条命中的图层规则。
    pub fn match_layer(&self, layer: &str) -> Option<(ComponentType, &Material)> {
        self.layer_rules
            .iter()
            .find(|rule| rule.pattern.is_match(layer))
            .map(|rule| (rule.component_type, &rule.material))
    }

    pub fn match_color(&self, color: i16) -> Option<&Material> {
        self.color_rules
            .iter()
            .find(|(index, _)| *index == color)
            .map(|(_, material)| material)
    }

    /// 推断实体材料：图层规则优先，未命中时按有效颜色查颜色规则。
    pub fn infer_material(
        &self,
        entity: &RawEntityRecord,
        layers: &[LayerRecord],
    ) -> Option<Material> {
        if let Some((_, material)) = self.match_layer(&entity.layer) {
            return Some(material.clone());
        }
        entity
            .effective_color(layers)
            .and_then(|color| self.match_color(color))
            .cloned()
    }

    /// 单次遍历实体列表。只有命中图层规则的实体才会成为构件。
    pub fn classify(&self, entities: &[RawEntityRecord], layers: &[LayerRecord]) -> ComponentList {
        let mut list = ComponentList::default();
        let mut color_only = 0usize;

        for (ordinal, entity) in entities.iter().enumerate() {
            let Some((component_type, material)) = self.match_layer(&entity.layer) else {
                if self.infer_material(entity, layers).is_some() {
                    color_only += 1;
                }
                continue;
            };

            let component_id = component_id(component_type, entity.handle.as_deref(), ordinal);
            match geometry_descriptors(&entity.geometry) {
                Ok(geometry) => list.components.push(BridgeComponent {
                    component_id,
                    component_type,
                    layer: entity.layer.clone(),
                    material: material.clone(),
                    geometry,
                    source_handle: entity.handle.clone(),
                    attributes: entity.attributes.clone(),
                }),
                Err(reason) => {
                    warn!(%component_id, %reason, "构件几何无效，已跳过");
                    list.errors.push(ClassificationIssue {
                        component_id,
                        handle: entity.handle.clone(),
                        entity_type: entity.dxf_type.clone(),
                        layer: entity.layer.clone(),
                        message: reason,
                    });
                }
            }
        }

        debug!(
            entities = entities.len(),
            components = list.components.len(),
            issues = list.errors.len(),
            color_only,
            "分类完成"
        );
        list
    }
}

fn compile_layer_rule(rule: &LayerRule) -> Result<CompiledLayerRule, EngineError> {
    let pattern = RegexBuilder::new(&rule.pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| EngineError::InvalidPattern {
            pattern: rule.pattern.clone(),
            source,
        })?;
    Ok(CompiledLayerRule {
        pattern,
        component_type: rule.component_type,
        material: rule.material(),
    })
}

/// 以显式规则切片调用分类，便于不经配置层直接使用。
pub fn classify(
    entities: &[RawEntityRecord],
    layers: &[LayerRecord],
    layer_rules: &[LayerRule],
    color_rules: &[ColorRule],
) -> Result<ComponentList, EngineError> {
    let tables = RuleTables {
        version: "inline".to_string(),
        layer_rules: layer_rules.to_vec(),
        color_rules: color_rules.to_vec(),
    };
    Ok(RuleEngine::new(&tables)?.classify(entities, layers))
}

/// `{类型}-{句柄}`；无句柄的实体以其在文档中的序号代替。
pub fn component_id(component_type: ComponentType, handle: Option<&str>, ordinal: usize) -> String {
    match handle {
        Some(handle) => format!("{}-{}", component_type.as_str(), handle),
        None => format!("{}-seq{}", component_type.as_str(), ordinal),
    }
}

fn geometry_descriptors(geometry: &EntityGeometry) -> Result<Vec<GeometryDescriptor>, String> {
    let descriptors = match geometry {
        EntityGeometry::Line { start, end } => vec![
            GeometryDescriptor::Length {
                value: start.distance_to(*end),
            },
            GeometryDescriptor::Endpoint {
                index: 0,
                point: *start,
            },
            GeometryDescriptor::Endpoint {
                index: 1,
                point: *end,
            },
        ],
        EntityGeometry::Circle { center, radius } => vec![
            GeometryDescriptor::Radius { value: *radius },
            GeometryDescriptor::Center { point: *center },
        ],
        EntityGeometry::Polyline { vertices, closed } => vec![GeometryDescriptor::Coordinates {
            points: vertices.clone(),
            closed: *closed,
        }],
        EntityGeometry::Text { insert, .. } | EntityGeometry::Insert { insert, .. } => {
            vec![GeometryDescriptor::Raw {
                points: vec![*insert],
            }]
        }
        EntityGeometry::Dimension {
            definition_point, ..
        } => vec![GeometryDescriptor::Raw {
            points: definition_point.iter().copied().collect(),
        }],
        EntityGeometry::Other { points } => vec![GeometryDescriptor::Raw {
            points: points.clone(),
        }],
        EntityGeometry::Malformed { reason } => return Err(reason.clone()),
    };
    Ok(descriptors)
}

/// 命中图层规则但几何无法提取的实体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationIssue {
    pub component_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub entity_type: String,
    pub layer: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentList {
    pub components: Vec<BridgeComponent>,
    pub errors: Vec<ClassificationIssue>,
}

impl ComponentList {
    #[inline]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn ids(&self) -> BTreeSet<&str> {
        self.components
            .iter()
            .map(|component| component.component_id.as_str())
            .collect()
    }

    pub fn get(&self, component_id: &str) -> Option<&BridgeComponent> {
        self.components
            .iter()
            .find(|component| component.component_id == component_id)
    }

    pub fn of_type(&self, component_type: ComponentType) -> impl Iterator<Item = &BridgeComponent> {
        self.components
            .iter()
            .filter(move |component| component.component_type == component_type)
    }
}
