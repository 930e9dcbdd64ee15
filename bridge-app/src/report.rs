use std::path::Path;

use bridge_core::component::{BridgeComponent, GeometryDescriptor};
use bridge_core::geometry::Point2;
use bridge_engine::Extraction;
use bridge_engine::analysis::AnalysisSummary;
use tracing::info;

fn format_point(point: Point2) -> String {
    format!("({:.2}, {:.2})", point.x(), point.y())
}

fn describe_geometry(component: &BridgeComponent) -> String {
    let parts: Vec<String> = component
        .geometry
        .iter()
        .map(|descriptor| match descriptor {
            GeometryDescriptor::Length { value } => format!("长度={value:.2}"),
            GeometryDescriptor::Endpoint { index, point } => {
                format!("端点{index}={}", format_point(*point))
            }
            GeometryDescriptor::Radius { value } => format!("半径={value:.2}"),
            GeometryDescriptor::Center { point } => format!("圆心={}", format_point(*point)),
            GeometryDescriptor::Coordinates { points, closed } => format!(
                "顶点数={}, 闭合={}",
                points.len(),
                if *closed { "是" } else { "否" }
            ),
            GeometryDescriptor::Raw { points } => format!("原始坐标数={}", points.len()),
        })
        .collect();
    parts.join(", ")
}

fn print_analysis(analysis: &AnalysisSummary) {
    println!("图纸类型：{}", analysis.drawing_type);

    println!("构件汇总（共 {} 个）：", analysis.components.total);
    for (component_type, summary) in &analysis.components.by_type {
        let materials: Vec<String> = summary
            .materials
            .iter()
            .map(|(material, count)| format!("{material}×{count}"))
            .collect();
        println!(
            "  - {}: {} 个, 材料 {}",
            component_type,
            summary.count,
            materials.join(", ")
        );
    }

    if !analysis.dimensions.is_empty() {
        println!("尺寸与规格：");
        for (label, values) in &analysis.dimensions.specs {
            let rendered: Vec<String> = values
                .iter()
                .map(|spec| match &spec.unit {
                    Some(unit) => format!("{}{}", spec.value, unit),
                    None => spec.value.to_string(),
                })
                .collect();
            println!("  - {label}: {}", rendered.join(", "));
        }
    }

    if !analysis.materials.is_empty() {
        let tokens: Vec<String> = analysis
            .materials
            .counts
            .iter()
            .map(|(token, count)| format!("{token}×{count}"))
            .collect();
        println!("文字中的材料：{}", tokens.join(", "));
    }

    println!("结构关系：");
    for relationship in &analysis.relationships {
        if relationship.placeholder {
            println!(
                "  - 未能可靠推断（容差 {:.1}，仅供参考）",
                relationship.tolerance
            );
            continue;
        }
        println!(
            "  - {} 支承 {}（间隙 {:.2}）",
            relationship.source.as_deref().unwrap_or("?"),
            relationship.target.as_deref().unwrap_or("?"),
            relationship.gap.unwrap_or_default()
        );
    }
}

/// 打印单个文件的提取概览。
pub fn print_extraction(path: &Path, extraction: &Extraction) {
    let parse = &extraction.parse;
    println!("== {} ==", path.display());

    if extraction.is_failed() {
        for message in extraction.error_messages() {
            println!("  错误：{message}");
        }
        return;
    }

    info!(
        layer_count = parse.layers.len(),
        entity_count = parse.entities.len(),
        block_count = parse.blocks.len(),
        "文档统计"
    );
    println!(
        "版本={}, 单位={:?}, 图层={}, 实体={}, 块={}",
        parse.metadata.version.as_deref().unwrap_or("未知"),
        parse.metadata.units,
        parse.layers.len(),
        parse.entities.len(),
        parse.blocks.len()
    );

    println!("图层：");
    for layer in &parse.layers {
        println!(
            "  - {} (颜色: {}, 关闭: {}, 已声明: {})",
            layer.name,
            layer.color,
            if layer.is_off { "是" } else { "否" },
            if layer.declared { "是" } else { "否" }
        );
    }

    println!("构件：");
    for component in &extraction.components.components {
        println!(
            "  - {}, Layer={}, 材料={}, {}",
            component.component_id,
            component.layer,
            component.material,
            describe_geometry(component)
        );
    }

    if let Some(analysis) = &extraction.analysis {
        print_analysis(analysis);
    }

    println!(
        "知识图：节点 {} 个，边 {} 个，非持久 id {} 个",
        extraction.graph.nodes.len(),
        extraction.graph.edges.len(),
        extraction.graph.non_portable_ids().len()
    );

    let messages = extraction.error_messages();
    if !messages.is_empty() {
        println!("问题：");
        for message in messages {
            println!("  - {message}");
        }
    }
}
