//! 要素加载器
//!
//! 流水线：
//! 1. 从数据源取回 GeoJSON 文本 (异步，可能挂起)
//! 2. 解析 FeatureCollection，跳过没有几何的要素
//! 3. 坐标转换 (英国国家格网 → WGS84，已是经纬度的原样保留)
//! 4. MultiPolygon 拆成单个 Polygon，带原始标识回指
//! 5. 指定分类的字段重命名与替换字符清理
//!
//! 重型图层使用 `ChunkedLoad` 分批交付，由宿主在事件循环的两轮之间逐批驱动入库。

use crate::category::Category;
use crate::coord_transform::transform_features;
use crate::geometry::{Feature, Geometry, Properties};
use crate::polygon_split::split_multipolygons;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// 数据源 (按资源名取回 GeoJSON 文本)
#[async_trait]
pub trait DatasetSource: Debug + Send + Sync {
    async fn fetch(&self, resource: &str) -> Result<String>;
}

#[async_trait]
impl DatasetSource for Box<dyn DatasetSource> {
    async fn fetch(&self, resource: &str) -> Result<String> {
        (**self).fetch(resource).await
    }
}

/// 本地目录数据源
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DatasetSource for DirectorySource {
    async fn fetch(&self, resource: &str) -> Result<String> {
        let path = self.root.join(resource);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("无法读取数据文件: {:?}", path))
    }
}

/// 内存数据源
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    files: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource: &str, text: impl Into<String>) -> Self {
        self.files.insert(resource.to_string(), text.into());
        self
    }
}

#[async_trait]
impl DatasetSource for StaticSource {
    async fn fetch(&self, resource: &str) -> Result<String> {
        match self.files.get(resource) {
            Some(text) => Ok(text.clone()),
            None => bail!("资源不存在: {}", resource),
        }
    }
}

// ============================================================================
// 解析与预处理
// ============================================================================

#[derive(Deserialize)]
struct RawCollection {
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<Value>,
    #[serde(default)]
    properties: Option<Properties>,
}

/// 解析 FeatureCollection 文本，返回 `(原始标识, 要素)`
///
/// 没有几何的要素被跳过；几何无法解析或坐标非法时整个文件报错。
fn parse_collection(text: &str, resource: &str) -> Result<Vec<(Value, Feature)>> {
    let raw: RawCollection =
        serde_json::from_str(text).with_context(|| format!("解析 {} 失败", resource))?;

    let mut out = Vec::with_capacity(raw.features.len());
    for (idx, f) in raw.features.into_iter().enumerate() {
        let Some(geometry) = f.geometry.filter(|g| !g.is_null()) else {
            debug!("{} 第 {} 个要素没有几何，跳过", resource, idx);
            continue;
        };
        let geometry: Geometry = serde_json::from_value(geometry)
            .with_context(|| format!("{} 第 {} 个要素的几何无法解析", resource, idx))?;
        geometry
            .validate()
            .with_context(|| format!("{} 第 {} 个要素", resource, idx))?;

        let id = f.id.filter(|v| !v.is_null()).unwrap_or_else(|| Value::from(idx));
        out.push((id, Feature::new(geometry, f.properties.unwrap_or_default())));
    }
    Ok(out)
}

/// 字段重命名并清理字符串中的 U+FFFD
fn relabel(properties: Properties, renames: &[(&str, &str)]) -> Properties {
    properties
        .into_iter()
        .map(|(key, value)| {
            let key = renames
                .iter()
                .find(|(from, _)| *from == key)
                .map_or(key, |(_, to)| to.to_string());
            let value = match value {
                Value::String(s) if s.contains('\u{FFFD}') => Value::String(s.replace('\u{FFFD}', "")),
                other => other,
            };
            (key, value)
        })
        .collect()
}

/// 单个数据文件的完整预处理
pub fn prepare_features(category: Category, resource: &str, text: &str) -> Result<Vec<Feature>> {
    let parsed = parse_collection(text, resource)?;
    let (ids, features): (Vec<Value>, Vec<Feature>) = parsed.into_iter().unzip();

    let features =
        transform_features(features).with_context(|| format!("{} 坐标转换失败", resource))?;
    let mut features = split_multipolygons(ids.into_iter().zip(features));

    let renames = category.attribute_renames();
    if !renames.is_empty() {
        for feature in &mut features {
            let properties = std::mem::take(&mut feature.properties);
            feature.properties = relabel(properties, renames);
        }
    }
    Ok(features)
}

// ============================================================================
// 加载器
// ============================================================================

/// 加载进度
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProgress {
    pub layer: String,
    pub features_loaded: usize,
    pub batches: usize,
    /// 尚未入库的要素数，0 表示加载完成
    pub remaining: usize,
    pub failed_sources: Vec<String>,
}

/// 分批交付的加载结果
///
/// 本身不持有任何状态引用，调用方每轮取一批入库，两批之间可以处理其他意图。
#[derive(Debug)]
pub struct ChunkedLoad {
    pub category: Category,
    pending: std::vec::IntoIter<Feature>,
    batch_size: usize,
    emitted: usize,
    delivered: usize,
    pub failed_sources: Vec<String>,
}

impl ChunkedLoad {
    /// 剩余要素数
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.pending.as_slice().is_empty()
    }

    /// 取下一批，全部交付后返回 None
    pub fn next_batch(&mut self) -> Option<Vec<Feature>> {
        if self.is_done() {
            return None;
        }
        let batch: Vec<Feature> = self.pending.by_ref().take(self.batch_size).collect();
        self.emitted += 1;
        self.delivered += batch.len();
        debug!(
            "{} 第 {} 批: {} 个要素，剩余 {}",
            self.category.layer_name(),
            self.emitted,
            batch.len(),
            self.pending.len()
        );
        Some(batch)
    }

    pub fn progress(&self) -> LoadProgress {
        LoadProgress {
            layer: self.category.layer_name().to_string(),
            features_loaded: self.delivered,
            batches: self.emitted,
            remaining: self.remaining(),
            failed_sources: self.failed_sources.clone(),
        }
    }
}

/// 要素加载器
#[derive(Debug)]
pub struct FeatureLoader<S: DatasetSource> {
    source: S,
    batch_size: usize,
}

impl<S: DatasetSource> FeatureLoader<S> {
    pub fn new(source: S, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
        }
    }

    /// 取回并预处理分类的全部数据文件
    ///
    /// 多文件分类 (规划方案) 中单个文件失败只记警告，全部失败才报错。
    async fn fetch_all(&self, category: Category) -> Result<(Vec<Feature>, Vec<String>)> {
        let mut features = Vec::new();
        let mut failed = Vec::new();
        let mut last_error = None;

        for &resource in category.sources() {
            let result = async {
                let text = self.source.fetch(resource).await?;
                prepare_features(category, resource, &text)
            }
            .await;

            match result {
                Ok(mut batch) => features.append(&mut batch),
                Err(e) => {
                    warn!("加载 {} 失败: {:#}", resource, e);
                    failed.push(resource.to_string());
                    last_error = Some(e);
                }
            }
        }

        if failed.len() == category.sources().len() {
            if let Some(e) = last_error {
                return Err(e.context(format!("图层 {} 没有可用数据", category.layer_name())));
            }
        }
        Ok((features, failed))
    }

    /// 一次性加载分类
    pub async fn load_category(&self, category: Category) -> Result<Vec<Feature>> {
        let (features, _) = self.fetch_all(category).await?;
        info!("图层 {} 加载完成: {} 个要素", category.layer_name(), features.len());
        Ok(features)
    }

    /// 分批加载分类
    pub async fn load_chunked(&self, category: Category) -> Result<ChunkedLoad> {
        let (features, failed_sources) = self.fetch_all(category).await?;
        Ok(ChunkedLoad {
            category,
            pending: features.into_iter(),
            batch_size: self.batch_size,
            emitted: 0,
            delivered: 0,
            failed_sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coord, GeometryKind};
    use serde_json::json;

    fn collection(features: Value) -> String {
        json!({"type": "FeatureCollection", "features": features}).to_string()
    }

    fn point(x: f64, y: f64, props: Value) -> Value {
        json!({"type": "Feature", "geometry": {"type": "Point", "coordinates": [x, y]}, "properties": props})
    }

    #[test]
    fn test_prepare_transforms_and_splits() {
        let text = collection(json!([
            point(358000.0, 173000.0, json!({"Name": "grid"})),
            {"type": "Feature", "id": "gz", "properties": {"Name": "multi"}, "geometry": {
                "type": "MultiPolygon",
                "coordinates": [
                    [[[-2.6, 51.4], [-2.5, 51.4], [-2.5, 51.5], [-2.6, 51.4]]],
                    [[[-2.4, 51.4], [-2.3, 51.4], [-2.3, 51.5], [-2.4, 51.4]]]
                ]
            }},
            {"type": "Feature", "properties": {}, "geometry": null}
        ]));

        let features = prepare_features(Category::GrowthZones, "gz.geojson", &text).unwrap();
        assert_eq!(features.len(), 3);

        let Geometry::Point(c) = features[0].geometry else {
            panic!("expected point");
        };
        assert!((c.lon() - -2.605849).abs() < 1e-4);
        assert!((c.lat() - 51.454413).abs() < 1e-4);

        assert_eq!(features[1].kind(), GeometryKind::Polygon);
        let part = features[2].part.as_ref().unwrap();
        assert_eq!(part.original_id, json!("gz"));
        assert_eq!(part.part_index, 1);
    }

    #[test]
    fn test_scheme_relabel() {
        let text = collection(json!([point(
            -2.6,
            51.45,
            json!({"Scheme_Nam": "Bus Lane\u{FFFD}", "Scheme_Typ": "Bus", "Other": 1})
        )]));
        let features = prepare_features(Category::Schemes, "schemes_pt.geojson", &text).unwrap();
        let keys: Vec<&str> = features[0].properties.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["scheme", "type", "Other"]);
        assert_eq!(features[0].property_text("scheme").as_deref(), Some("Bus Lane"));
    }

    #[test]
    fn test_malformed_coordinates_error() {
        let text = collection(json!([{"type": "Feature", "properties": {},
            "geometry": {"type": "LineString", "coordinates": [[1.0], [2.0, 3.0]]}}]));
        assert!(prepare_features(Category::BusLines, "bus-lines.geojson", &text).is_err());
        assert!(prepare_features(Category::BusLines, "x", "not json").is_err());
    }

    #[tokio::test]
    async fn test_chunked_batches() {
        let features: Vec<Value> = (0..7)
            .map(|i| point(-2.6 + i as f64 * 0.01, 51.45, json!({"PTAL": "2"})))
            .collect();
        let source = StaticSource::new().with("ptal.geojson", collection(Value::Array(features)));
        let loader = FeatureLoader::new(source, 3);

        let mut chunked = loader.load_chunked(Category::Ptal).await.unwrap();
        assert_eq!(chunked.next_batch().map(|b| b.len()), Some(3));
        let progress = chunked.progress();
        assert_eq!((progress.features_loaded, progress.batches, progress.remaining), (3, 1, 4));

        let mut sizes = Vec::new();
        while let Some(batch) = chunked.next_batch() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![3, 1]);
        assert!(chunked.is_done());
        assert_eq!(chunked.progress().features_loaded, 7);
        assert_eq!(chunked.next_batch(), None);
    }

    #[tokio::test]
    async fn test_partial_scheme_sources() {
        let source = StaticSource::new().with(
            "schemes_ln.geojson",
            collection(json!([{"type": "Feature", "properties": {"Length_m": 120},
                "geometry": {"type": "LineString", "coordinates": [[-2.6, 51.4], [-2.5, 51.4]]}}])),
        );
        let loader = FeatureLoader::new(source, 50);

        let chunked = loader.load_chunked(Category::Schemes).await.unwrap();
        assert_eq!(chunked.remaining(), 1);
        assert_eq!(chunked.failed_sources, vec!["schemes_pt.geojson", "schemes_pg.geojson"]);

        assert!(loader.load_category(Category::Housing).await.is_err());
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rail_stations.geojson"),
            collection(json!([point(-2.5813, 51.4491, json!({"name": "Bristol Temple Meads"}))])),
        )
        .unwrap();

        let loader = FeatureLoader::new(DirectorySource::new(dir.path()), 50);
        let features = loader.load_category(Category::RailStations).await.unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].geometry, Geometry::Point(Coord::new(-2.5813, 51.4491)));

        assert!(loader.load_category(Category::BusStops).await.is_err());
    }
}
