//! 弹窗导航器
//!
//! 状态机：
//! - Closed (初始/终止)
//! - Open(命中列表, 下标)：点击得到至少一个命中时进入，上一个/下一个在列表内移动
//!
//! 进入 Open 时：
//! 1. 移除上一个高亮，恢复其高亮前样式
//! 2. 记录新要素的当前样式作为快照
//! 3. 按几何类型套用高亮样式
//! 4. 要素不在视口内时做最小平移
//! 5. 生成弹窗内容 (含 “第 i 个 / 共 n 个” 与上一个/下一个按钮)
//!
//! 翻页时外部会先关闭再打开弹窗，期间 `navigating` 标志屏蔽关闭通知触发的清理，
//! 否则高亮会被清掉且不再恢复。

use crate::category::Category;
use crate::geometry::{Coord, Feature, Geometry, GeometryKind};
use crate::hit_test::Hit;
use crate::layer_registry::{FeatureId, LayerRegistry};
use crate::projection::MapView;
use crate::style::{Color, PathStyle};
use log::debug;
use serde::Serialize;
use std::fmt::Write as _;

const HIGHLIGHT: Color = Color::Rgb(0xff, 0xff, 0x00);

/// 弹窗内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupView {
    /// 弹窗锚点 (点击位置)
    pub anchor: Coord,
    pub feature: FeatureId,
    pub layer: String,
    pub title: String,
    pub html: String,
    /// 从 1 开始
    pub index: usize,
    pub total: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

/// 需要外部执行的动作 (按顺序执行)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PopupEffect {
    Close,
    PanTo(Coord),
    Open(PopupView),
}

#[derive(Debug, Clone, Default, PartialEq)]
enum PopupState {
    #[default]
    Closed,
    Open {
        hits: Vec<Hit>,
        index: usize,
        anchor: Coord,
    },
}

#[derive(Debug, Clone)]
struct Highlight {
    feature: FeatureId,
    snapshot: PathStyle,
}

/// 弹窗导航器
#[derive(Debug, Default)]
pub struct PopupNavigator {
    state: PopupState,
    navigating: bool,
    highlight: Option<Highlight>,
}

impl PopupNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PopupState::Open { .. })
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating
    }

    /// 当前下标 (从 0 开始) 与命中项
    pub fn current(&self) -> Option<(usize, &Hit)> {
        match &self.state {
            PopupState::Open { hits, index, .. } => hits.get(*index).map(|h| (*index, h)),
            PopupState::Closed => None,
        }
    }

    pub fn highlighted(&self) -> Option<FeatureId> {
        self.highlight.as_ref().map(|h| h.feature)
    }

    /// 处理一次点击的命中结果
    ///
    /// 新点击总是先关闭当前弹窗 (完整清理)，有命中时从第一个开始展示。
    pub fn open(
        &mut self,
        hits: Vec<Hit>,
        click: Coord,
        registry: &mut LayerRegistry,
        view: &mut MapView,
    ) -> Vec<PopupEffect> {
        let mut effects = self.close(registry);
        if hits.is_empty() {
            return effects;
        }

        debug!("弹窗打开，共 {} 个命中", hits.len());
        self.state = PopupState::Open {
            hits,
            index: 0,
            anchor: click,
        };
        effects.extend(self.enter(registry, view));
        effects
    }

    pub fn next(&mut self, registry: &mut LayerRegistry, view: &mut MapView) -> Vec<PopupEffect> {
        self.step(1, registry, view)
    }

    pub fn previous(&mut self, registry: &mut LayerRegistry, view: &mut MapView) -> Vec<PopupEffect> {
        self.step(-1, registry, view)
    }

    /// 在列表内移动，越界时不做任何事
    fn step(&mut self, delta: isize, registry: &mut LayerRegistry, view: &mut MapView) -> Vec<PopupEffect> {
        let PopupState::Open { hits, index, .. } = &mut self.state else {
            return Vec::new();
        };
        let Some(target) = index.checked_add_signed(delta).filter(|&t| t < hits.len()) else {
            return Vec::new();
        };
        *index = target;

        // 先关后开：关闭通知在 on_popup_opened 之前到达，需要被忽略
        self.navigating = true;
        let mut effects = vec![PopupEffect::Close];
        effects.extend(self.enter(registry, view));
        effects
    }

    /// 显式关闭 (完整清理)
    pub fn close(&mut self, registry: &mut LayerRegistry) -> Vec<PopupEffect> {
        let was_open = self.is_open();
        self.cleanup(registry);
        if was_open {
            vec![PopupEffect::Close]
        } else {
            Vec::new()
        }
    }

    /// 外部弹窗已关闭的通知
    ///
    /// 翻页过程中忽略，返回是否执行了清理。
    pub fn on_popup_closed(&mut self, registry: &mut LayerRegistry) -> bool {
        if self.navigating {
            return false;
        }
        self.cleanup(registry);
        true
    }

    /// 外部弹窗已打开的通知，翻页过程到此结束
    pub fn on_popup_opened(&mut self) {
        self.navigating = false;
    }

    fn cleanup(&mut self, registry: &mut LayerRegistry) {
        self.clear_highlight(registry);
        self.state = PopupState::Closed;
        self.navigating = false;
    }

    fn clear_highlight(&mut self, registry: &mut LayerRegistry) {
        if let Some(Highlight { feature, snapshot }) = self.highlight.take() {
            if let Some(rendered) = registry.feature_mut(feature) {
                rendered.style = snapshot;
            }
        }
    }

    /// 展示当前下标对应的要素
    fn enter(&mut self, registry: &mut LayerRegistry, view: &mut MapView) -> Vec<PopupEffect> {
        self.clear_highlight(registry);

        let PopupState::Open { hits, index, anchor } = &self.state else {
            return Vec::new();
        };
        let (index, anchor, total) = (*index, *anchor, hits.len());
        let Some(hit) = hits.get(index).cloned() else {
            return Vec::new();
        };
        let Some(category) = registry.layer(&hit.layer).map(|l| l.category) else {
            return Vec::new();
        };
        let Some(rendered) = registry.feature_mut(hit.feature) else {
            return Vec::new();
        };

        let snapshot = rendered.style.clone();
        rendered.style = highlight_style(&snapshot, rendered.kind());
        self.highlight = Some(Highlight {
            feature: hit.feature,
            snapshot,
        });

        let mut effects = Vec::new();
        let focus = representative_point(&rendered.feature.geometry);
        if let Some(center) = focus.and_then(|c| view.pan_inside(c)) {
            effects.push(PopupEffect::PanTo(center));
        }

        let title = category.popup_title(&rendered.feature);
        let html = render_html(category, &rendered.feature, &title, index, total);
        effects.push(PopupEffect::Open(PopupView {
            anchor,
            feature: hit.feature,
            layer: hit.layer,
            title,
            html,
            index: index + 1,
            total,
            has_prev: index > 0,
            has_next: index + 1 < total,
        }));
        effects
    }
}

/// 高亮样式：黄色，更粗
fn highlight_style(base: &PathStyle, kind: GeometryKind) -> PathStyle {
    match kind {
        GeometryKind::Point => PathStyle {
            color: HIGHLIGHT,
            fill_color: HIGHLIGHT,
            fill_opacity: 1.0,
            opacity: 1.0,
            weight: base.weight + 2.0,
            radius: base.radius + 3.0,
            ..base.clone()
        },
        GeometryKind::Line => PathStyle {
            color: HIGHLIGHT,
            opacity: 1.0,
            weight: base.weight + 4.0,
            ..base.clone()
        },
        GeometryKind::Polygon => PathStyle {
            color: HIGHLIGHT,
            opacity: 1.0,
            weight: base.weight.max(1.0) + 3.0,
            fill_color: HIGHLIGHT,
            fill_opacity: base.fill_opacity.max(0.3),
            ..base.clone()
        },
    }
}

/// 要素的代表点 (点取自身，其他取包围盒中心)
fn representative_point(geometry: &Geometry) -> Option<Coord> {
    match geometry {
        Geometry::Point(c) => Some(*c),
        other => other.envelope().map(|env| {
            let [x0, y0] = env.lower();
            let [x1, y1] = env.upper();
            Coord::new((x0 + x1) / 2.0, (y0 + y1) / 2.0)
        }),
    }
}

fn render_html(category: Category, feature: &Feature, title: &str, index: usize, total: usize) -> String {
    let mut html = String::from("<div class=\"taf-popup\">");

    if total > 1 {
        let _ = write!(
            html,
            "<div class=\"popup-nav\"><button class=\"popup-prev\"{}>&lsaquo;</button>\
             <span class=\"popup-count\">{} of {}</span>\
             <button class=\"popup-next\"{}>&rsaquo;</button></div>",
            if index == 0 { " disabled" } else { "" },
            index + 1,
            total,
            if index + 1 >= total { " disabled" } else { "" },
        );
    }

    let _ = write!(
        html,
        "<div class=\"popup-header\">{}</div><table class=\"popup-table\">",
        escape_html(title)
    );
    for (label, value) in category.popup_rows(feature) {
        let _ = write!(
            html,
            "<tr><td><strong>{}:</strong></td><td>{}</td></tr>",
            escape_html(&label),
            escape_html(&value)
        );
    }
    html.push_str("</table></div>");
    html
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
