//! 公共类型定义
//!
//! 集中管理界面层与核心之间的消息 (Intent / Outcome) 及数据传输对象 (DTO)

use crate::feature_loader::LoadProgress;
use crate::filter::{ClauseId, FilterClause, FilterLogic, FilterStats, LayerFilter};
use crate::layer_registry::{LayerGeometry, LayerSummary, VisibilityChange};
use crate::popup::PopupEffect;
use crate::projection::MapView;
use crate::style::StyleSpec;
use serde::{Deserialize, Serialize};

/// 界面层发来的意图
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    // 数据
    LoadInitial,
    ListLayers,
    SetLayerVisible { layer: String, visible: bool },
    /// 为进行中的分批加载入库下一批
    LoadNextBatch,
    ZoomToLayer { layer: String },
    ReorderLayers { order: Vec<String> },
    DescribeLayer { layer: String },

    // 查询
    ClickAt { lon: f64, lat: f64, x: f64, y: f64 },
    PopupNext,
    PopupPrevious,
    ClosePopup,
    PopupClosed,
    PopupOpened,
    ViewChanged { view: MapView },

    // 编辑
    SetStyle { layer: String, spec: StyleSpec },
    ResetStyle { layer: String },
    AddFilter { layer: String, clause: FilterClause },
    RemoveFilter { layer: String, id: ClauseId },
    SetFilter {
        layer: String,
        #[serde(default)]
        logic: FilterLogic,
        filters: Vec<FilterClause>,
    },
    SetFilterLogic { layer: String, logic: FilterLogic },
    ClearFilter { layer: String },
    ClearAllFilters,
}

/// 核心返回给界面层的结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Layers { layers: Vec<LayerSummary> },
    /// 触发加载时 `loaded` 为首批入库后的进度，`remaining > 0` 时需继续发送 `LoadNextBatch`
    Visibility {
        layer: String,
        change: VisibilityChange,
        #[serde(skip_serializing_if = "Option::is_none")]
        loaded: Option<LoadProgress>,
    },
    Loading { progress: LoadProgress },
    View { view: MapView },
    LayerDetails(LayerDetails),
    Popup { effects: Vec<PopupEffect> },
    /// 编辑前会关闭弹窗，`popup` 为需要外部执行的关闭动作
    Styled {
        layer: String,
        restyled: usize,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        popup: Vec<PopupEffect>,
    },
    Filtered {
        layer: String,
        stats: FilterStats,
        /// 图层当前生效的条件
        clause_ids: Vec<ClauseId>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        popup: Vec<PopupEffect>,
    },
    Ack,
    /// 输入校验失败或数据错误，消息可直接展示给用户
    Rejected { message: String },
}

/// 样式/过滤弹窗需要的图层信息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDetails {
    pub name: String,
    pub geometry: LayerGeometry,
    pub attributes: Vec<String>,
    /// 当前生效的规格，没有时由图层当前样式生成
    pub style: StyleSpec,
    pub style_active: bool,
    /// 分级样式的图例断点
    pub legend_breaks: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<LayerFilter>,
}
