//! 图层注册表
//!
//! 架构设计：
//! - 要素存放在一个扁平的 arena (`Vec<RenderedFeature>`)，用 `FeatureId` 下标寻址
//! - 图层只记录自己的批次 (每批是一组 `FeatureId`)，分批加载的重型图层会有多个批次
//! - 图层按插入顺序保存在 IndexMap 中，该顺序即拾取与图例的遍历顺序
//!
//! 所有“遍历图层下全部要素”的需求 (过滤、样式、属性发现、拾取) 都走 `walk`，
//! 不再为每个用途各写一套递归。

use crate::category::{calculate_z_order, Category};
use crate::geometry::{Feature, GeometryKind};
use crate::style::PathStyle;
use anyhow::{bail, Result};
use indexmap::{IndexMap, IndexSet};
use log::info;
use rstar::{Envelope, AABB};
use serde::Serialize;

/// 要素在 arena 中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FeatureId(pub usize);

/// 已入库的要素及其当前呈现状态
#[derive(Debug, Clone)]
pub struct RenderedFeature {
    pub id: FeatureId,
    pub layer: String,
    pub feature: Feature,
    /// 当前渲染样式
    pub style: PathStyle,
    /// 加载时的样式快照 (重置样式时恢复到它)
    pub original_style: Option<PathStyle>,
    /// 被过滤隐藏前的样式
    prefilter_style: Option<PathStyle>,
    filtered_out: bool,
}

impl RenderedFeature {
    #[inline]
    pub fn kind(&self) -> GeometryKind {
        self.feature.kind()
    }

    #[inline]
    pub fn is_filtered_out(&self) -> bool {
        self.filtered_out
    }

    /// 修改“可见时”的样式
    ///
    /// 被过滤隐藏的要素改的是过滤前快照，隐藏状态保持不变，
    /// 过滤解除后才显示新样式。
    pub fn restyle(&mut self, f: impl FnOnce(&mut PathStyle)) {
        match self.prefilter_style.as_mut() {
            Some(snapshot) if self.filtered_out => f(snapshot),
            _ => f(&mut self.style),
        }
    }

    /// 过滤隐藏：保存快照，切换为透明且不可交互
    pub fn exclude(&mut self) {
        if self.filtered_out {
            return;
        }
        self.prefilter_style = Some(self.style.clone());
        self.style = self.style.hidden();
        self.filtered_out = true;
    }

    /// 解除过滤：恢复快照
    pub fn include(&mut self) {
        if !self.filtered_out {
            return;
        }
        if let Some(snapshot) = self.prefilter_style.take() {
            self.style = snapshot;
        }
        self.filtered_out = false;
    }

    /// 是否参与拾取 (未被过滤，且当前样式不是全透明/不可交互)
    pub fn is_hit_testable(&self) -> bool {
        !self.filtered_out && !self.style.is_invisible(self.kind())
    }
}

/// 图层加载状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
    Failed(String),
}

/// 图层几何类型 (决定样式弹窗使用哪套通道)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerGeometry {
    Point,
    Line,
    Polygon,
    Mixed,
    Empty,
}

impl From<GeometryKind> for LayerGeometry {
    fn from(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Point => LayerGeometry::Point,
            GeometryKind::Line => LayerGeometry::Line,
            GeometryKind::Polygon => LayerGeometry::Polygon,
        }
    }
}

/// 专题图层
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub category: Category,
    pub visible: bool,
    pub z_order: i32,
    pub load_state: LoadState,
    batches: Vec<Vec<FeatureId>>,
}

impl Layer {
    pub fn feature_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub fn has_features(&self) -> bool {
        self.batches.iter().any(|b| !b.is_empty())
    }
}

/// 可见性切换的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityChange {
    Unchanged,
    Shown,
    Hidden,
    /// 重型图层第一次启用，需要调用方触发加载
    NeedsLoad,
}

/// 图例用的图层摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    pub name: String,
    pub display_name: String,
    pub visible: bool,
    pub feature_count: usize,
    pub z_order: i32,
    pub geometry: LayerGeometry,
    pub load_state: LoadState,
}

/// 图层注册表
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: IndexMap<String, Layer>,
    features: Vec<RenderedFeature>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为全部分类注册空图层 (默认隐藏)
    pub fn with_categories(categories: &[Category]) -> Self {
        let mut registry = Self::new();
        for &category in categories {
            registry.register(category);
        }
        registry
    }

    /// 注册分类图层，已存在时不做任何事
    pub fn register(&mut self, category: Category) {
        let name = category.layer_name();
        if self.layers.contains_key(name) {
            return;
        }
        self.layers.insert(
            name.to_string(),
            Layer {
                name: name.to_string(),
                category,
                visible: false,
                z_order: calculate_z_order(category, 0),
                load_state: LoadState::NotLoaded,
                batches: Vec::new(),
            },
        );
    }

    #[inline]
    pub fn contains(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    /// 按注册表顺序遍历图层
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    // ========================================================================
    // 要素遍历
    // ========================================================================

    /// 遍历图层下全部要素 (跨批次展开，保持入库顺序)
    pub fn walk<'a>(&'a self, layer: &str) -> impl Iterator<Item = &'a RenderedFeature> + 'a {
        let ids: &'a [Vec<FeatureId>] = self
            .layers
            .get(layer)
            .map_or(&[][..], |l| l.batches.as_slice());
        ids.iter()
            .flatten()
            .filter_map(move |id| self.features.get(id.0))
    }

    pub fn feature_ids(&self, layer: &str) -> Vec<FeatureId> {
        self.walk(layer).map(|f| f.id).collect()
    }

    /// 图层下的要素 (跨批次展开)
    pub fn features(&self, layer: &str) -> Vec<&Feature> {
        self.walk(layer).map(|f| &f.feature).collect()
    }

    #[inline]
    pub fn feature(&self, id: FeatureId) -> Option<&RenderedFeature> {
        self.features.get(id.0)
    }

    #[inline]
    pub fn feature_mut(&mut self, id: FeatureId) -> Option<&mut RenderedFeature> {
        self.features.get_mut(id.0)
    }

    /// 入库一批要素
    ///
    /// 每个要素按分类取默认样式，同时记为“原始样式”快照。
    /// 返回这一批的 `FeatureId`，调用方可据此对新批次套用当前样式/过滤。
    pub fn add_batch(&mut self, layer: &str, features: Vec<Feature>) -> Result<Vec<FeatureId>> {
        let Some(entry) = self.layers.get_mut(layer) else {
            bail!("未注册的图层: {}", layer);
        };

        let mut ids = Vec::with_capacity(features.len());
        for feature in features {
            let id = FeatureId(self.features.len());
            let style = entry.category.default_style(&feature);
            self.features.push(RenderedFeature {
                id,
                layer: entry.name.clone(),
                feature,
                original_style: Some(style.clone()),
                style,
                prefilter_style: None,
                filtered_out: false,
            });
            ids.push(id);
        }

        entry.batches.push(ids.clone());
        Ok(ids)
    }

    // ========================================================================
    // 可见性与加载状态
    // ========================================================================

    /// 切换可见性
    ///
    /// 关闭不会丢弃已加载的要素。重型图层第一次启用 (或上次加载失败) 时返回
    /// `NeedsLoad`，此时图层已经标记为可见，加载完成后直接显示。
    pub fn set_visible(&mut self, layer: &str, visible: bool) -> Result<VisibilityChange> {
        let Some(entry) = self.layers.get_mut(layer) else {
            bail!("未注册的图层: {}", layer);
        };

        if entry.visible == visible {
            return Ok(VisibilityChange::Unchanged);
        }
        entry.visible = visible;
        info!("图层 {} {}", layer, if visible { "显示" } else { "隐藏" });

        if !visible {
            return Ok(VisibilityChange::Hidden);
        }

        let needs_load = entry.category.is_heavy()
            && matches!(entry.load_state, LoadState::NotLoaded | LoadState::Failed(_))
            && !entry.has_features();
        Ok(if needs_load {
            VisibilityChange::NeedsLoad
        } else {
            VisibilityChange::Shown
        })
    }

    pub fn is_visible(&self, layer: &str) -> bool {
        self.layers.get(layer).is_some_and(|l| l.visible)
    }

    /// 标记开始加载
    ///
    /// 已在加载、已加载或已经有要素时返回 false，防止重复加载。
    pub fn begin_load(&mut self, layer: &str) -> bool {
        match self.layers.get_mut(layer) {
            Some(entry)
                if !entry.has_features()
                    && matches!(entry.load_state, LoadState::NotLoaded | LoadState::Failed(_)) =>
            {
                entry.load_state = LoadState::Loading;
                true
            }
            _ => false,
        }
    }

    /// 标记加载结束 (失败时图层保持为空)
    pub fn finish_load(&mut self, layer: &str, outcome: std::result::Result<(), String>) {
        if let Some(entry) = self.layers.get_mut(layer) {
            entry.load_state = match outcome {
                Ok(()) => LoadState::Loaded,
                Err(message) => LoadState::Failed(message),
            };
        }
    }

    // ========================================================================
    // 排序
    // ========================================================================

    /// 设置图层在窗格内的 rank
    pub fn set_z_order(&mut self, layer: &str, rank: i32) -> Result<i32> {
        let Some(entry) = self.layers.get_mut(layer) else {
            bail!("未注册的图层: {}", layer);
        };
        entry.z_order = calculate_z_order(entry.category, rank);
        Ok(entry.z_order)
    }

    /// 按图例顺序重排 (列表靠前的在上面)
    ///
    /// 只改 z-order，注册表遍历顺序 (拾取与弹窗顺序) 保持不变。
    /// 未出现在列表中的图层保留原 z-order，重复出现的以第一次为准。
    pub fn reorder(&mut self, order: &[String]) -> Result<()> {
        for name in order {
            if !self.layers.contains_key(name) {
                bail!("未注册的图层: {}", name);
            }
        }

        let mut ranked: IndexSet<&str> = IndexSet::new();
        ranked.extend(order.iter().map(String::as_str));
        let total = ranked.len();
        for (position, name) in ranked.into_iter().enumerate() {
            if let Some(layer) = self.layers.get_mut(name) {
                let rank = (total - position) as i32;
                layer.z_order = calculate_z_order(layer.category, rank);
            }
        }
        Ok(())
    }

    // ========================================================================
    // 图层级查询
    // ========================================================================

    /// 图层范围 (经纬度包围盒)，没有要素时返回 None
    pub fn extent(&self, layer: &str) -> Option<AABB<[f64; 2]>> {
        self.walk(layer)
            .filter_map(|f| f.feature.geometry.envelope())
            .reduce(|acc, env| acc.merged(&env))
    }

    /// 属性名并集 (按首次出现顺序)，供样式/过滤弹窗的下拉框使用
    pub fn attribute_names(&self, layer: &str) -> Vec<String> {
        let mut names: IndexSet<&str> = IndexSet::new();
        for rendered in self.walk(layer) {
            names.extend(rendered.feature.properties.keys().map(String::as_str));
        }
        names.into_iter().map(str::to_string).collect()
    }

    /// 图层几何类型
    pub fn geometry(&self, layer: &str) -> LayerGeometry {
        let mut kinds = self.walk(layer).map(RenderedFeature::kind);
        let Some(first) = kinds.next() else {
            return LayerGeometry::Empty;
        };
        if kinds.all(|k| k == first) {
            first.into()
        } else {
            LayerGeometry::Mixed
        }
    }

    /// 第一个要素的当前样式 (样式弹窗的初始值)
    pub fn sample_style(&self, layer: &str) -> Option<&PathStyle> {
        self.walk(layer).next().map(|f| &f.style)
    }

    pub fn summaries(&self) -> Vec<LayerSummary> {
        self.layers
            .values()
            .map(|l| LayerSummary {
                name: l.name.clone(),
                display_name: l.category.display_name().to_string(),
                visible: l.visible,
                feature_count: l.feature_count(),
                z_order: l.z_order,
                geometry: self.geometry(&l.name),
                load_state: l.load_state.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coord, Geometry};
    use serde_json::{json, Value};

    fn make_feature(geometry: Geometry, props: Value) -> Feature {
        Feature::new(geometry, props.as_object().cloned().unwrap_or_default())
    }

    fn square(x: f64, props: Value) -> Feature {
        make_feature(
            Geometry::Polygon(vec![vec![
                Coord::new(x, 0.0),
                Coord::new(x + 1.0, 0.0),
                Coord::new(x + 1.0, 1.0),
                Coord::new(x, 0.0),
            ]]),
            props,
        )
    }

    fn stop(x: f64) -> Feature {
        make_feature(Geometry::Point(Coord::new(x, 51.0)), json!({"CommonName": "s"}))
    }

    #[test]
    fn test_batches_flatten_in_order() {
        let mut reg = LayerRegistry::with_categories(&Category::ALL);
        reg.add_batch("bus_stops", vec![stop(0.0), stop(1.0)]).unwrap();
        reg.add_batch("bus_stops", vec![stop(2.0)]).unwrap();

        let layer = reg.layer("bus_stops").unwrap();
        assert_eq!(layer.batch_count(), 2);
        assert_eq!(layer.feature_count(), 3);

        let xs: Vec<f64> = reg
            .features("bus_stops")
            .iter()
            .map(|f| match f.geometry {
                Geometry::Point(c) => c.x,
                _ => f64::NAN,
            })
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_add_batch_unknown_layer() {
        let mut reg = LayerRegistry::new();
        assert!(reg.add_batch("housing", vec![]).is_err());
    }

    #[test]
    fn test_original_style_snapshot() {
        let mut reg = LayerRegistry::with_categories(&[Category::Ptal]);
        let ids = reg
            .add_batch("ptal", vec![square(0.0, json!({"PTAL": "2"}))])
            .unwrap();
        let f = reg.feature(ids[0]).unwrap();
        assert_eq!(f.original_style.as_ref(), Some(&f.style));
        assert_eq!(f.style.fill_opacity, 0.7);
    }

    #[test]
    fn test_toggle_keeps_features() {
        let mut reg = LayerRegistry::with_categories(&[Category::Housing]);
        reg.add_batch("housing", vec![square(0.0, json!({}))]).unwrap();

        assert_eq!(reg.set_visible("housing", true).unwrap(), VisibilityChange::Shown);
        assert_eq!(reg.set_visible("housing", false).unwrap(), VisibilityChange::Hidden);
        assert_eq!(reg.set_visible("housing", false).unwrap(), VisibilityChange::Unchanged);
        assert_eq!(reg.set_visible("housing", true).unwrap(), VisibilityChange::Shown);
        assert_eq!(reg.features("housing").len(), 1);
    }

    #[test]
    fn test_heavy_layer_loads_once() {
        let mut reg = LayerRegistry::with_categories(&[Category::Ptal]);
        assert_eq!(reg.set_visible("ptal", true).unwrap(), VisibilityChange::NeedsLoad);
        assert!(reg.begin_load("ptal"));
        // 加载中再次启用不重复加载
        assert!(!reg.begin_load("ptal"));

        reg.add_batch("ptal", vec![square(0.0, json!({"PTAL": "1a"}))]).unwrap();
        reg.finish_load("ptal", Ok(()));

        reg.set_visible("ptal", false).unwrap();
        assert_eq!(reg.set_visible("ptal", true).unwrap(), VisibilityChange::Shown);
        assert!(!reg.begin_load("ptal"));
    }

    #[test]
    fn test_extent_and_attributes() {
        let mut reg = LayerRegistry::with_categories(&[Category::Housing]);
        reg.add_batch(
            "housing",
            vec![
                square(0.0, json!({"Fid": 1, "Id": "A"})),
                square(4.0, json!({"Id": "B", "Layer": "L2"})),
            ],
        )
        .unwrap();

        let env = reg.extent("housing").unwrap();
        assert_eq!(env.lower(), [0.0, 0.0]);
        assert_eq!(env.upper(), [5.0, 1.0]);
        assert_eq!(reg.attribute_names("housing"), vec!["Fid", "Id", "Layer"]);
        assert_eq!(reg.extent("nope"), None);
    }

    #[test]
    fn test_geometry_detection() {
        let mut reg = LayerRegistry::with_categories(&[Category::Schemes, Category::Housing]);
        assert_eq!(reg.geometry("schemes"), LayerGeometry::Empty);

        reg.add_batch("housing", vec![square(0.0, json!({}))]).unwrap();
        assert_eq!(reg.geometry("housing"), LayerGeometry::Polygon);

        reg.add_batch("schemes", vec![stop(0.0), square(0.0, json!({}))]).unwrap();
        assert_eq!(reg.geometry("schemes"), LayerGeometry::Mixed);
    }

    #[test]
    fn test_reorder_only_changes_z() {
        let mut reg =
            LayerRegistry::with_categories(&[Category::Housing, Category::Ptal, Category::Schemes]);
        let schemes_before = reg.layer("schemes").unwrap().z_order;
        reg.reorder(&["ptal".to_string(), "housing".to_string(), "ptal".to_string()])
            .unwrap();

        // 遍历顺序即拾取顺序，不受排序影响
        assert_eq!(reg.layer_names(), vec!["housing", "ptal", "schemes"]);
        let ptal = reg.layer("ptal").unwrap().z_order;
        let housing = reg.layer("housing").unwrap().z_order;
        assert_eq!(ptal, 400 + 2);
        assert_eq!(housing, 400 + 1);
        // 未列出的图层不变，窗格仍然优先
        assert_eq!(reg.layer("schemes").unwrap().z_order, schemes_before);
        assert!(schemes_before > ptal);

        assert!(reg.reorder(&["nope".to_string()]).is_err());
        assert_eq!(reg.layer("ptal").unwrap().z_order, ptal);
    }

    #[test]
    fn test_set_z_order_clamped_to_pane() {
        let mut reg = LayerRegistry::with_categories(&[Category::Housing, Category::BusLines]);
        assert_eq!(reg.set_z_order("housing", 250).unwrap(), 499);
        assert_eq!(reg.set_z_order("housing", -5).unwrap(), 400);
        assert!(499 < reg.layer("bus_lines").unwrap().z_order);
        assert!(reg.set_z_order("nope", 1).is_err());
    }

    #[test]
    fn test_restyle_while_filtered() {
        let mut reg = LayerRegistry::with_categories(&[Category::Housing]);
        let ids = reg.add_batch("housing", vec![square(0.0, json!({}))]).unwrap();
        let f = reg.feature_mut(ids[0]).unwrap();

        f.exclude();
        assert!(!f.is_hit_testable());
        f.restyle(|s| s.weight = 9.0);
        assert_eq!(f.style.opacity, 0.0);

        f.include();
        assert_eq!(f.style.weight, 9.0);
        assert!(f.is_hit_testable());
    }
}
