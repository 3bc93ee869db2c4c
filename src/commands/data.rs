//! 数据加载与图层管理命令
//!
//! 处理启动加载、图层开关 (重型图层首次启用时加载)、缩放到图层、图层排序

use crate::category::Category;
use crate::feature_loader::LoadProgress;
use crate::geometry::Feature;
use crate::layer_registry::VisibilityChange;
use crate::style::StyleSpec;
use crate::types::{LayerDetails, Outcome};
use crate::AppState;
use anyhow::{anyhow, ensure, Result};
use log::{debug, info, warn};

/// 启动加载：预加载分类逐个加载并显示，单个分类失败不影响其他分类
pub async fn load_initial(state: &mut AppState) -> Outcome {
    for category in state.config.preload.clone() {
        let layer = category.layer_name();
        if populate_layer(state, category).await.is_ok() {
            let _ = state.registry.set_visible(layer, true);
        }
    }
    list_layers(state)
}

pub fn list_layers(state: &AppState) -> Outcome {
    Outcome::Layers {
        layers: state.registry.summaries(),
    }
}

/// 切换图层可见性
///
/// 重型图层第一次启用时取回数据并入库首批，其余批次留给 `load_next_batch`。
/// 取回失败时撤销这次启用，下次启用会重新加载。
pub async fn set_layer_visible(state: &mut AppState, layer: &str, visible: bool) -> Result<Outcome> {
    let change = state.registry.set_visible(layer, visible)?;

    let loaded = if change == VisibilityChange::NeedsLoad {
        let category = state
            .registry
            .layer(layer)
            .map(|l| l.category)
            .ok_or_else(|| anyhow!("未注册的图层: {}", layer))?;
        match populate_layer(state, category).await {
            Ok(progress) => Some(progress),
            Err(e) => {
                state.registry.set_visible(layer, false)?;
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(Outcome::Visibility {
        layer: layer.to_string(),
        change,
        loaded,
    })
}

/// 推进一个进行中的分批加载 (入库一批)
///
/// 多个图层同时加载时轮流推进；没有进行中的加载时返回 `Ack`。
pub fn load_next_batch(state: &mut AppState) -> Result<Outcome> {
    let Some(mut chunked) = state.loads.pop_front() else {
        return Ok(Outcome::Ack);
    };
    let layer = chunked.category.layer_name();

    if let Some(batch) = chunked.next_batch() {
        if let Err(e) = ingest(state, chunked.category, batch) {
            warn!("图层 {} 入库失败: {:#}", layer, e);
            state.registry.finish_load(layer, Err(format!("{:#}", e)));
            return Err(e);
        }
    }

    let progress = chunked.progress();
    if chunked.is_done() {
        finish(state, &progress);
    } else {
        state.loads.push_back(chunked);
    }
    Ok(Outcome::Loading { progress })
}

/// 加载分类数据并入库
///
/// 已在加载或已加载的图层直接返回空进度，不会重复加载。
/// 普通图层一次入库完；重型图层只入库首批，剩余部分排入 `state.loads`。
/// 取回失败时图层保持为空并记录失败原因。
async fn populate_layer(state: &mut AppState, category: Category) -> Result<LoadProgress> {
    let layer = category.layer_name();
    if !state.registry.begin_load(layer) {
        return Ok(LoadProgress {
            layer: layer.to_string(),
            ..Default::default()
        });
    }

    let result = if category.is_heavy() {
        start_chunked(state, category).await
    } else {
        load_at_once(state, category).await
    };

    match &result {
        Ok(progress) if progress.remaining == 0 => finish(state, progress),
        Ok(progress) => debug!(
            "图层 {} 首批入库 {} 个要素，剩余 {}",
            layer, progress.features_loaded, progress.remaining
        ),
        Err(e) => {
            warn!("图层 {} 加载失败: {:#}", layer, e);
            state.registry.finish_load(layer, Err(format!("{:#}", e)));
        }
    }
    result
}

async fn load_at_once(state: &mut AppState, category: Category) -> Result<LoadProgress> {
    let features = state.loader.load_category(category).await?;
    let count = features.len();
    ingest(state, category, features)?;
    Ok(LoadProgress {
        layer: category.layer_name().to_string(),
        features_loaded: count,
        batches: 1,
        ..Default::default()
    })
}

async fn start_chunked(state: &mut AppState, category: Category) -> Result<LoadProgress> {
    let mut chunked = state.loader.load_chunked(category).await?;
    if let Some(batch) = chunked.next_batch() {
        ingest(state, category, batch)?;
    }
    let progress = chunked.progress();
    if !chunked.is_done() {
        state.loads.push_back(chunked);
    }
    Ok(progress)
}

fn finish(state: &mut AppState, progress: &LoadProgress) {
    info!(
        "图层 {} 入库 {} 个要素 ({} 批)",
        progress.layer, progress.features_loaded, progress.batches
    );
    state.registry.finish_load(&progress.layer, Ok(()));
}

/// 入库一批，并对新图元补上当前生效的样式与过滤
fn ingest(state: &mut AppState, category: Category, batch: Vec<Feature>) -> Result<()> {
    let layer = category.layer_name();
    let ids = state.registry.add_batch(layer, batch)?;
    state.styles.apply_to_batch(layer, &ids, &mut state.registry);
    state.filters.apply_to_batch(layer, &ids, &mut state.registry);
    Ok(())
}

/// 缩放到图层范围
pub fn zoom_to_layer(state: &mut AppState, layer: &str) -> Result<Outcome> {
    ensure!(state.registry.contains(layer), "未注册的图层: {}", layer);
    let extent = state
        .registry
        .extent(layer)
        .ok_or_else(|| anyhow!("图层 {} 没有要素", layer))?;

    state.view.fit_bounds(&extent, state.config.fit_padding_px);
    Ok(Outcome::View { view: state.view })
}

/// 按图例顺序重排图层
pub fn reorder_layers(state: &mut AppState, order: &[String]) -> Result<Outcome> {
    state.registry.reorder(order)?;
    Ok(list_layers(state))
}

/// 样式/过滤弹窗需要的图层信息
pub fn describe_layer(state: &AppState, layer: &str) -> Result<Outcome> {
    ensure!(state.registry.contains(layer), "未注册的图层: {}", layer);

    let geometry = state.registry.geometry(layer);
    let (style, style_active) = match state.styles.style_of(layer) {
        Some(spec) => (spec.clone(), true),
        None => (
            StyleSpec::from_current(state.registry.sample_style(layer), geometry),
            false,
        ),
    };

    Ok(Outcome::LayerDetails(LayerDetails {
        name: layer.to_string(),
        geometry,
        attributes: state.registry.attribute_names(layer),
        legend_breaks: style.legend_breaks(),
        style,
        style_active,
        filter: state.filters.filter_of(layer).cloned(),
    }))
}
