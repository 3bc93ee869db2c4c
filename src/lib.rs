//! TAFMAP - 交通与增长专题地图仪表盘核心
//!
//! 与界面无关的地图核心：界面层只通过 `Intent` 发出意图，通过 `Outcome` 取回结果。
//!
//! # 模块结构
//!
//! - `geometry`: 要素与 GeoJSON 几何类型
//! - `coord_transform`: 英国国家格网 ↔ WGS84 坐标转换
//! - `polygon_split`: MultiPolygon 拆分与归组
//! - `feature_loader`: 数据取回、预处理与分批交付
//! - `category`: 专题分类 (数据文件、默认样式、弹窗内容、Z-Order)
//! - `layer_registry`: 图层注册表 (要素 arena + 批次)
//! - `filter`: 属性过滤引擎
//! - `style`: 样式规格与样式引擎
//! - `hit_test`: 空间拾取
//! - `popup`: 弹窗导航与高亮
//! - `projection`: Web 墨卡托投影与地图视图
//! - `config`: 仪表盘配置
//! - `types`: 公共类型定义
//! - `commands`: 意图处理器

pub mod category;
mod commands;
pub mod config;
pub mod coord_transform;
pub mod feature_loader;
pub mod filter;
pub mod geometry;
pub mod layer_registry;
pub mod polygon_split;
pub mod popup;
pub mod projection;
pub mod style;
pub mod types;

use category::Category;
use config::DashboardConfig;
use feature_loader::{ChunkedLoad, DatasetSource, DirectorySource, FeatureLoader};
use filter::FilterEngine;
use layer_registry::LayerRegistry;
use popup::PopupNavigator;
use projection::MapView;
use std::collections::VecDeque;
use style::StyleEngine;
use types::{Intent, Outcome};

/// 全局应用状态
///
/// 所有可变状态都在这里，单线程独占访问，组件之间通过参数注入。
#[derive(Debug)]
pub struct AppState {
    pub config: DashboardConfig,
    pub registry: LayerRegistry,
    pub filters: FilterEngine,
    pub styles: StyleEngine,
    pub popup: PopupNavigator,
    pub view: MapView,
    loader: FeatureLoader<Box<dyn DatasetSource>>,
    /// 进行中的分批加载，每个 `LoadNextBatch` 轮流推进一批
    loads: VecDeque<ChunkedLoad>,
}

impl AppState {
    /// 使用配置中的数据目录
    pub fn new(config: DashboardConfig) -> Self {
        let source = DirectorySource::new(&config.data_dir);
        Self::with_source(config, source)
    }

    pub fn with_source(config: DashboardConfig, source: impl DatasetSource + 'static) -> Self {
        let source: Box<dyn DatasetSource> = Box::new(source);
        Self {
            registry: LayerRegistry::with_categories(&Category::ALL),
            filters: FilterEngine::new(),
            styles: StyleEngine::new(),
            popup: PopupNavigator::new(),
            view: config.initial_view.to_map_view(),
            loader: FeatureLoader::new(source, config.batch_size),
            loads: VecDeque::new(),
            config,
        }
    }

    /// 是否还有未入库完的分批加载
    ///
    /// 宿主在每轮事件循环后检查，为真时发送 `Intent::LoadNextBatch`。
    pub fn has_pending_loads(&self) -> bool {
        !self.loads.is_empty()
    }

    /// 处理一个意图
    ///
    /// 不会失败：数据错误和输入校验错误都转换为 `Outcome::Rejected`。
    pub async fn dispatch(&mut self, intent: Intent) -> Outcome {
        let result = match intent {
            // 数据命令
            Intent::LoadInitial => Ok(commands::load_initial(self).await),
            Intent::ListLayers => Ok(commands::list_layers(self)),
            Intent::SetLayerVisible { layer, visible } => {
                commands::set_layer_visible(self, &layer, visible).await
            }
            Intent::LoadNextBatch => commands::load_next_batch(self),
            Intent::ZoomToLayer { layer } => commands::zoom_to_layer(self, &layer),
            Intent::ReorderLayers { order } => commands::reorder_layers(self, &order),
            Intent::DescribeLayer { layer } => commands::describe_layer(self, &layer),
            // 查询命令
            Intent::ClickAt { lon, lat, x, y } => Ok(commands::click_at(self, lon, lat, x, y)),
            Intent::PopupNext => Ok(commands::popup_next(self)),
            Intent::PopupPrevious => Ok(commands::popup_previous(self)),
            Intent::ClosePopup => Ok(commands::close_popup(self)),
            Intent::PopupClosed => Ok(commands::popup_closed(self)),
            Intent::PopupOpened => Ok(commands::popup_opened(self)),
            Intent::ViewChanged { view } => Ok(commands::view_changed(self, view)),
            // 编辑命令
            Intent::SetStyle { layer, spec } => commands::set_style(self, &layer, spec),
            Intent::ResetStyle { layer } => commands::reset_style(self, &layer),
            Intent::AddFilter { layer, clause } => commands::add_filter(self, &layer, clause),
            Intent::RemoveFilter { layer, id } => commands::remove_filter(self, &layer, id),
            Intent::SetFilter {
                layer,
                logic,
                filters,
            } => commands::set_filter(self, &layer, logic, filters),
            Intent::SetFilterLogic { layer, logic } => {
                commands::set_filter_logic(self, &layer, logic)
            }
            Intent::ClearFilter { layer } => commands::clear_filter(self, &layer),
            Intent::ClearAllFilters => Ok(commands::clear_all_filters(self)),
        };

        result.unwrap_or_else(|e| {
            log::warn!("意图处理失败: {:#}", e);
            Outcome::Rejected {
                message: format!("{:#}", e),
            }
        })
    }
}
