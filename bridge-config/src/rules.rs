use std::fs;
use std::path::Path;

use bridge_core::component::{ComponentType, Material};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// 图层名匹配规则。`pattern` 为不区分大小写的正则表达式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRule {
    pub pattern: String,
    pub component_type: ComponentType,
    pub material: String,
    #[serde(default)]
    pub grade: Option<String>,
}

impl LayerRule {
    pub fn material(&self) -> Material {
        Material::new(self.material.clone(), self.grade.clone())
    }
}

/// 颜色号到材料的映射，仅在图层规则未命中时使用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRule {
    pub color: i16,
    pub material: String,
    #[serde(default)]
    pub grade: Option<String>,
}

impl ColorRule {
    pub fn material(&self) -> Material {
        Material::new(self.material.clone(), self.grade.clone())
    }
}

/// 有序规则表。同一次提取中只读，按顺序匹配，先命中者生效。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTables {
    #[serde(default = "RuleTables::unversioned")]
    pub version: String,
    #[serde(default)]
    pub layer_rules: Vec<LayerRule>,
    #[serde(default)]
    pub color_rules: Vec<ColorRule>,
}

impl RuleTables {
    fn unversioned() -> String {
        "unversioned".to_string()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 内建桥梁图层规范：中英文图层名混用的常见命名。
    pub fn bridge_default() -> Self {
        let layer = |pattern: &str, component_type, material: &str, grade: &str| LayerRule {
            pattern: pattern.to_string(),
            component_type,
            material: material.to_string(),
            grade: Some(grade.to_string()),
        };
        let color = |color, material: &str, grade: &str| ColorRule {
            color,
            material: material.to_string(),
            grade: Some(grade.to_string()),
        };
        Self {
            version: "bridge-default-1".to_string(),
            layer_rules: vec![
                layer("BEAM|GIRDER|主梁|梁", ComponentType::Beam, "Concrete", "C50"),
                layer("PIER|桥墩|墩", ComponentType::Pier, "Concrete", "C40"),
                layer("COLUMN|立柱|柱", ComponentType::Column, "Concrete", "C40"),
                layer("SLAB|DECK|桥面|板", ComponentType::Slab, "Concrete", "C40"),
                layer("ABUT|桥台", ComponentType::Abutment, "Concrete", "C30"),
                layer("STEEL|钢结构", ComponentType::Other, "Steel", "Q345"),
            ],
            color_rules: vec![
                color(1, "Steel", "Q235"),
                color(3, "Concrete", "C40"),
                color(5, "Concrete", "C30"),
                color(6, "Rebar", "HRB400"),
            ],
        }
    }

    /// 结构性检查；正则语法由规则引擎在编译时校验。
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, rule) in self.layer_rules.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                return Err(ConfigError::InvalidRule(format!(
                    "第 {} 条图层规则的 pattern 为空",
                    index + 1
                )));
            }
            if rule.material.trim().is_empty() {
                return Err(ConfigError::InvalidRule(format!(
                    "图层规则 {} 缺少材料名称",
                    rule.pattern
                )));
            }
        }
        for rule in &self.color_rules {
            if !(1..=255).contains(&rule.color) {
                return Err(ConfigError::InvalidRule(format!(
                    "颜色号 {} 超出 ACI 范围 1..=255",
                    rule.color
                )));
            }
            if rule.material.trim().is_empty() {
                return Err(ConfigError::InvalidRule(format!(
                    "颜色规则 {} 缺少材料名称",
                    rule.color
                )));
            }
        }
        Ok(())
    }
}
