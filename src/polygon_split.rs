//! 多边形拆分器
//!
//! 将 MultiPolygon 要素拆成若干独立的 Polygon 要素。
//!
//! ## 为什么拆
//!
//! 拾取与逐要素样式都以“单个面”为单位：
//! 1. 射线法只需要检查一个外环
//! 2. 每个部分都有自己的样式快照和高亮状态
//! 3. 通过 `PartRef` 仍可按原始要素重新归组

use crate::geometry::{Feature, Geometry, PartRef};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;

/// 拆分单个要素
///
/// 非 MultiPolygon 原样返回；N 个部分的 MultiPolygon 返回 N 个 Polygon，
/// 每个都复制原属性并带上 `original_id` / `part_index`。
pub fn split_feature(original_id: Value, feature: Feature) -> Vec<Feature> {
    let Feature {
        geometry,
        properties,
        part,
    } = feature;

    match geometry {
        Geometry::MultiPolygon(polygons) => {
            let part_count = polygons.len();
            polygons
                .into_iter()
                .enumerate()
                .map(|(part_index, rings)| Feature {
                    geometry: Geometry::Polygon(rings),
                    properties: properties.clone(),
                    part: Some(PartRef {
                        original_id: original_id.clone(),
                        part_index,
                        part_count,
                    }),
                })
                .collect()
        }
        geometry => vec![Feature {
            geometry,
            properties,
            part,
        }],
    }
}

/// 批量拆分 (输入为 `(原始标识, 要素)`)，保持原有顺序
pub fn split_multipolygons<I>(features: I) -> Vec<Feature>
where
    I: IntoIterator<Item = (Value, Feature)>,
{
    let mut out = Vec::new();
    for (original_id, feature) in features {
        out.extend(split_feature(original_id, feature));
    }
    out
}

/// 按回指信息重新归组
///
/// 返回 `原始标识 → 各部分在切片中的下标`，未拆分的要素不参与归组。
pub fn group_parts(features: &[Feature]) -> IndexMap<String, Vec<usize>> {
    let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (idx, feature) in features.iter().enumerate() {
        if let Some(part) = &feature.part {
            groups
                .entry(part.original_id.to_string())
                .or_default()
                .push(idx);
        }
    }
    groups
}

/// 统计源数据中的要素个数 (拆分出的部分只计一次)
pub fn source_feature_count<'a, I>(features: I) -> usize
where
    I: IntoIterator<Item = &'a Feature>,
{
    let mut singles = 0;
    let mut originals = HashSet::new();
    for feature in features {
        match &feature.part {
            Some(part) => {
                originals.insert(part.original_id.to_string());
            }
            None => singles += 1,
        }
    }
    singles + originals.len()
}
