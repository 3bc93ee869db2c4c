//! 样式引擎
//!
//! 每个图层可以挂一份 `StyleSpec`，每个视觉通道独立选择三种方法之一：
//! - Simple: 常量
//! - Categorized: 按属性值精确查表，未命中取 default
//! - Graduated: 属性值在 [min, max] 上归一化 (两端截断)，再对颜色/数值线性插值
//!
//! 通道与几何的对应关系：
//! - 面: fill.color / fill.opacity / outline.color / outline.opacity / outline.weight
//! - 点、线: general.color / general.opacity / general.size (点 → radius，线 → weight)
//! - 混合图层里的点、线没有 general 时使用 outline 通道

use crate::geometry::{Feature, GeometryKind};
use crate::layer_registry::{FeatureId, LayerGeometry, LayerRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 分级数量的允许范围 (与样式面板一致)
pub const MIN_CLASSES: u32 = 2;
pub const MAX_CLASSES: u32 = 10;
const DEFAULT_CLASSES: u32 = 5;

// ============================================================================
// 颜色
// ============================================================================

/// 颜色 (`#rrggbb` 或 `transparent`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Color {
    Rgb(u8, u8, u8),
    Transparent,
}

impl Color {
    pub const BLACK: Color = Color::Rgb(0, 0, 0);

    /// 逐通道线性插值；任一端透明时按 t 取较近的一端
    pub fn lerp(start: Color, end: Color, t: f64) -> Color {
        match (start, end) {
            (Color::Rgb(r1, g1, b1), Color::Rgb(r2, g2, b2)) => {
                let mix = |a: u8, b: u8| {
                    let v = a as f64 + (b as f64 - a as f64) * t;
                    v.round().clamp(0.0, 255.0) as u8
                };
                Color::Rgb(mix(r1, r2), mix(g1, g2), mix(b1, b2))
            }
            _ if t < 0.5 => start,
            _ => end,
        }
    }

    pub fn is_transparent(&self) -> bool {
        matches!(self, Color::Transparent)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Rgb(r, g, b) => write!(f, "#{:02x}{:02x}{:02x}", r, g, b),
            Color::Transparent => f.write_str("transparent"),
        }
    }
}

impl FromStr for Color {
    type Err = StyleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let lower = raw.to_ascii_lowercase();
        let invalid = || StyleError::InvalidColor(raw.to_string());

        if lower == "transparent" || lower == "none" {
            return Ok(Color::Transparent);
        }

        if let Some(inner) = lower
            .strip_prefix("rgb(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let parts: Vec<u8> = inner
                .split(',')
                .map(|p| p.trim().parse::<u8>())
                .collect::<Result<_, _>>()
                .map_err(|_| invalid())?;
            return match parts.as_slice() {
                [r, g, b] => Ok(Color::Rgb(*r, *g, *b)),
                _ => Err(invalid()),
            };
        }

        let hex = lower.strip_prefix('#').unwrap_or(&lower);
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Color::Rgb(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => {
                // #abc → #aabbcc
                let expand = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
                Ok(Color::Rgb(expand(0)?, expand(1)?, expand(2)?))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = StyleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

// ============================================================================
// 渲染样式
// ============================================================================

/// 单个渲染图元的完整样式 (字段与前端路径选项一一对应)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStyle {
    pub color: Color,
    pub weight: f64,
    pub opacity: f64,
    pub fill_color: Color,
    pub fill_opacity: f64,
    pub radius: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash_array: Option<String>,
    pub interactive: bool,
}

impl Default for PathStyle {
    fn default() -> Self {
        Self {
            color: Color::Rgb(0x33, 0x88, 0xff),
            weight: 3.0,
            opacity: 1.0,
            fill_color: Color::Rgb(0x33, 0x88, 0xff),
            fill_opacity: 0.2,
            radius: 10.0,
            dash_array: None,
            interactive: true,
        }
    }
}

impl PathStyle {
    /// 合并局部样式 (未给出的字段保持不变)
    pub fn apply(&mut self, patch: &StylePatch) {
        if let Some(c) = patch.color {
            self.color = c;
        }
        if let Some(c) = patch.fill_color {
            self.fill_color = c;
        }
        if let Some(v) = patch.opacity {
            self.opacity = v;
        }
        if let Some(v) = patch.fill_opacity {
            self.fill_opacity = v;
        }
        if let Some(v) = patch.weight {
            self.weight = v;
        }
        if let Some(v) = patch.radius {
            self.radius = v;
        }
    }

    /// 过滤隐藏样式：完全透明且不可交互
    pub fn hidden(&self) -> PathStyle {
        PathStyle {
            opacity: 0.0,
            fill_opacity: 0.0,
            interactive: false,
            ..self.clone()
        }
    }

    /// 当前样式下该图元是否完全不可见或不可交互
    ///
    /// 线没有填充，只看描边。
    pub fn is_invisible(&self, kind: GeometryKind) -> bool {
        if !self.interactive {
            return true;
        }
        let stroke_hidden = self.opacity <= 0.0 || self.weight <= 0.0 || self.color.is_transparent();
        let fill_hidden = self.fill_opacity <= 0.0 || self.fill_color.is_transparent();
        match kind {
            GeometryKind::Line => stroke_hidden,
            GeometryKind::Point | GeometryKind::Polygon => stroke_hidden && fill_hidden,
        }
    }
}

/// 局部样式 (`compute_style` 的输出)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

// ============================================================================
// 样式规格
// ============================================================================

/// 可插值的通道值
pub trait Interpolate: Clone {
    fn interpolate(start: &Self, end: &Self, t: f64) -> Self;
}

impl Interpolate for f64 {
    #[inline]
    fn interpolate(start: &f64, end: &f64, t: f64) -> f64 {
        // 端点处精确等于 start / end
        start * (1.0 - t) + end * t
    }
}

impl Interpolate for Color {
    #[inline]
    fn interpolate(start: &Color, end: &Color, t: f64) -> Color {
        Color::lerp(*start, *end, t)
    }
}

/// 分类表项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEntry<T> {
    pub value: String,
    pub style: T,
}

/// 单个视觉通道的规格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    rename_all = "lowercase",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub enum ChannelSpec<T> {
    Simple {
        value: T,
    },
    Categorized {
        attribute: String,
        #[serde(default)]
        categories: Vec<CategoryEntry<T>>,
        default: T,
    },
    Graduated {
        attribute: String,
        min: f64,
        max: f64,
        start: T,
        end: T,
        #[serde(default = "default_classes")]
        classes: u32,
        #[serde(default)]
        default: Option<T>,
    },
}

fn default_classes() -> u32 {
    DEFAULT_CLASSES
}

impl<T: Interpolate> ChannelSpec<T> {
    pub fn simple(value: T) -> Self {
        ChannelSpec::Simple { value }
    }

    /// 计算要素在该通道上的取值
    ///
    /// 属性缺失或无法解析时走 default；Graduated 没有 default 时返回 None (通道保持原值)。
    pub fn resolve(&self, feature: &Feature) -> Option<T> {
        match self {
            ChannelSpec::Simple { value } => Some(value.clone()),
            ChannelSpec::Categorized {
                attribute,
                categories,
                default,
            } => {
                let key = feature.property_text(attribute);
                let hit = key
                    .as_deref()
                    .and_then(|k| categories.iter().find(|c| c.value == k));
                Some(hit.map_or_else(|| default.clone(), |c| c.style.clone()))
            }
            ChannelSpec::Graduated {
                attribute,
                min,
                max,
                start,
                end,
                default,
                ..
            } => match feature.property_number(attribute).filter(|v| v.is_finite()) {
                Some(v) => Some(T::interpolate(start, end, normalize(v, *min, *max))),
                None => default.clone(),
            },
        }
    }
}

impl<T> ChannelSpec<T> {
    pub fn validate(&self, channel: &'static str) -> Result<(), StyleError> {
        match self {
            ChannelSpec::Simple { .. } => Ok(()),
            ChannelSpec::Categorized { attribute, .. } => require_attribute(channel, attribute),
            ChannelSpec::Graduated {
                attribute,
                min,
                max,
                classes,
                ..
            } => {
                require_attribute(channel, attribute)?;
                if !(min.is_finite() && max.is_finite() && min < max) {
                    return Err(StyleError::InvalidRange {
                        channel,
                        min: *min,
                        max: *max,
                    });
                }
                if !(MIN_CLASSES..=MAX_CLASSES).contains(classes) {
                    return Err(StyleError::InvalidClasses {
                        channel,
                        classes: *classes,
                    });
                }
                Ok(())
            }
        }
    }

    /// 分级断点 (图例用)，非 Graduated 返回空
    pub fn class_breaks(&self) -> Vec<f64> {
        match self {
            ChannelSpec::Graduated {
                min, max, classes, ..
            } => {
                let step = (max - min) / *classes as f64;
                (0..=*classes)
                    .map(|i| if i == *classes { *max } else { min + step * i as f64 })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

fn require_attribute(channel: &'static str, attribute: &str) -> Result<(), StyleError> {
    if attribute.trim().is_empty() {
        Err(StyleError::MissingAttribute { channel })
    } else {
        Ok(())
    }
}

/// 归一化到 [0, 1]，两端截断
#[inline]
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// 面填充通道
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillSpec {
    #[serde(default)]
    pub color: Option<ChannelSpec<Color>>,
    #[serde(default)]
    pub opacity: Option<ChannelSpec<f64>>,
}

/// 面轮廓通道 (混合图层里的点、线也用它)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineSpec {
    #[serde(default)]
    pub color: Option<ChannelSpec<Color>>,
    #[serde(default)]
    pub opacity: Option<ChannelSpec<f64>>,
    #[serde(default)]
    pub weight: Option<ChannelSpec<f64>>,
}

/// 点、线的统一通道
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralSpec {
    #[serde(default)]
    pub color: Option<ChannelSpec<Color>>,
    #[serde(default)]
    pub opacity: Option<ChannelSpec<f64>>,
    #[serde(default)]
    pub size: Option<ChannelSpec<f64>>,
}

/// 图层样式规格
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleSpec {
    #[serde(default)]
    pub fill: Option<FillSpec>,
    #[serde(default)]
    pub outline: Option<OutlineSpec>,
    #[serde(default)]
    pub general: Option<GeneralSpec>,
}

impl StyleSpec {
    /// 只设置填充色的规格
    pub fn fill_color(spec: ChannelSpec<Color>) -> Self {
        StyleSpec {
            fill: Some(FillSpec {
                color: Some(spec),
                opacity: None,
            }),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), StyleError> {
        fn check<T>(spec: &Option<ChannelSpec<T>>, name: &'static str) -> Result<(), StyleError> {
            spec.as_ref().map_or(Ok(()), |s| s.validate(name))
        }

        if let Some(fill) = &self.fill {
            check(&fill.color, "fill.color")?;
            check(&fill.opacity, "fill.opacity")?;
        }
        if let Some(outline) = &self.outline {
            check(&outline.color, "outline.color")?;
            check(&outline.opacity, "outline.opacity")?;
            check(&outline.weight, "outline.weight")?;
        }
        if let Some(general) = &self.general {
            check(&general.color, "general.color")?;
            check(&general.opacity, "general.opacity")?;
            check(&general.size, "general.size")?;
        }
        Ok(())
    }

    /// 图例断点：取第一个分级的颜色通道
    pub fn legend_breaks(&self) -> Vec<f64> {
        let channels = [
            self.fill.as_ref().and_then(|f| f.color.as_ref()),
            self.general.as_ref().and_then(|g| g.color.as_ref()),
            self.outline.as_ref().and_then(|o| o.color.as_ref()),
        ];
        channels
            .into_iter()
            .flatten()
            .map(ChannelSpec::class_breaks)
            .find(|breaks| !breaks.is_empty())
            .unwrap_or_default()
    }

    /// 由图层当前样式生成初始规格 (全部为 Simple)
    ///
    /// 图层为空时使用样式面板的默认值。
    pub fn from_current(style: Option<&PathStyle>, geometry: LayerGeometry) -> Self {
        let simple_color = |c: Color| Some(ChannelSpec::simple(c));
        let simple = |v: f64| Some(ChannelSpec::simple(v));

        match geometry {
            LayerGeometry::Polygon | LayerGeometry::Mixed => {
                let (fill_color, fill_opacity, color, opacity, weight) = match style {
                    Some(s) => (s.fill_color, s.fill_opacity, s.color, s.opacity, s.weight),
                    None => (Color::Rgb(0x33, 0x88, 0xff), 0.7, Color::BLACK, 1.0, 2.0),
                };
                StyleSpec {
                    fill: Some(FillSpec {
                        color: simple_color(fill_color),
                        opacity: simple(fill_opacity),
                    }),
                    outline: Some(OutlineSpec {
                        color: simple_color(color),
                        opacity: simple(opacity),
                        weight: simple(weight),
                    }),
                    general: None,
                }
            }
            LayerGeometry::Point | LayerGeometry::Line | LayerGeometry::Empty => {
                let (color, opacity, size) = match style {
                    Some(s) if geometry == LayerGeometry::Point => (s.color, s.opacity, s.radius),
                    Some(s) => (s.color, s.opacity, s.weight),
                    None => (Color::Rgb(0x33, 0x88, 0xff), 1.0, 8.0),
                };
                StyleSpec {
                    general: Some(GeneralSpec {
                        color: simple_color(color),
                        opacity: simple(opacity),
                        size: simple(size),
                    }),
                    ..Default::default()
                }
            }
        }
    }
}

/// 计算单个要素的样式
pub fn compute_style(feature: &Feature, spec: &StyleSpec) -> StylePatch {
    let mut patch = StylePatch::default();

    let resolve_color =
        |c: &Option<ChannelSpec<Color>>| c.as_ref().and_then(|c| c.resolve(feature));
    let resolve_number = |c: &Option<ChannelSpec<f64>>| c.as_ref().and_then(|c| c.resolve(feature));

    match feature.kind() {
        GeometryKind::Polygon => {
            if let Some(fill) = &spec.fill {
                patch.fill_color = resolve_color(&fill.color);
                patch.fill_opacity = resolve_number(&fill.opacity);
            }
            if let Some(outline) = &spec.outline {
                patch.color = resolve_color(&outline.color);
                patch.opacity = resolve_number(&outline.opacity);
                patch.weight = resolve_number(&outline.weight);
            }
        }
        kind => {
            if let Some(general) = &spec.general {
                patch.color = resolve_color(&general.color);
                patch.opacity = resolve_number(&general.opacity);
                let size = resolve_number(&general.size);
                if kind == GeometryKind::Point {
                    patch.radius = size;
                } else {
                    patch.weight = size;
                }
            } else if let Some(outline) = &spec.outline {
                patch.color = resolve_color(&outline.color);
                patch.opacity = resolve_number(&outline.opacity);
                patch.weight = resolve_number(&outline.weight);
            }
        }
    }

    patch
}

// ============================================================================
// 错误
// ============================================================================

/// 样式输入错误 (在修改任何状态之前返回)
#[derive(Debug, Clone, PartialEq)]
pub enum StyleError {
    UnknownLayer(String),
    MissingAttribute { channel: &'static str },
    InvalidRange { channel: &'static str, min: f64, max: f64 },
    InvalidClasses { channel: &'static str, classes: u32 },
    InvalidColor(String),
}

impl fmt::Display for StyleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StyleError::UnknownLayer(name) => write!(f, "Layer '{}' does not exist", name),
            StyleError::MissingAttribute { channel } => {
                write!(f, "Please select an attribute for {}", channel)
            }
            StyleError::InvalidRange { channel, min, max } => write!(
                f,
                "Minimum must be less than maximum for {} (got {} .. {})",
                channel, min, max
            ),
            StyleError::InvalidClasses { channel, classes } => write!(
                f,
                "Number of classes for {} must be between {} and {} (got {})",
                channel, MIN_CLASSES, MAX_CLASSES, classes
            ),
            StyleError::InvalidColor(raw) => write!(f, "'{}' is not a valid colour", raw),
        }
    }
}

impl std::error::Error for StyleError {}

// ============================================================================
// 样式引擎
// ============================================================================

/// 每个图层当前生效的样式规格
#[derive(Debug, Default)]
pub struct StyleEngine {
    specs: HashMap<String, StyleSpec>,
}

impl StyleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn style_of(&self, layer: &str) -> Option<&StyleSpec> {
        self.specs.get(layer)
    }

    /// 应用样式规格，返回被重新着色的图元数
    ///
    /// 被过滤隐藏的图元只更新其过滤前快照，仍保持隐藏。
    pub fn set_style(
        &mut self,
        layer: &str,
        spec: StyleSpec,
        registry: &mut LayerRegistry,
    ) -> Result<usize, StyleError> {
        spec.validate()?;
        if !registry.contains(layer) {
            return Err(StyleError::UnknownLayer(layer.to_string()));
        }

        let ids = registry.feature_ids(layer);
        let count = restyle_with(&spec, &ids, registry);
        log::info!("图层 {} 应用样式，{} 个图元", layer, count);

        self.specs.insert(layer.to_string(), spec);
        Ok(count)
    }

    /// 新批次加入已设置样式的图层时，对新图元补算样式
    pub fn apply_to_batch(&self, layer: &str, ids: &[FeatureId], registry: &mut LayerRegistry) {
        if let Some(spec) = self.specs.get(layer) {
            restyle_with(spec, ids, registry);
        }
    }

    /// 恢复到加载时的样式快照，没有快照时使用默认路径样式
    pub fn reset_style(
        &mut self,
        layer: &str,
        registry: &mut LayerRegistry,
    ) -> Result<usize, StyleError> {
        if !registry.contains(layer) {
            return Err(StyleError::UnknownLayer(layer.to_string()));
        }
        self.specs.remove(layer);

        let ids = registry.feature_ids(layer);
        for &id in &ids {
            if let Some(rendered) = registry.feature_mut(id) {
                let original = rendered.original_style.clone().unwrap_or_default();
                rendered.restyle(|style| *style = original);
            }
        }
        log::info!("图层 {} 恢复原始样式", layer);
        Ok(ids.len())
    }
}

fn restyle_with(
    spec: &StyleSpec,
    ids: &[FeatureId],
    registry: &mut LayerRegistry,
) -> usize {
    let mut count = 0;
    for &id in ids {
        if let Some(rendered) = registry.feature_mut(id) {
            let patch = compute_style(&rendered.feature, spec);
            rendered.restyle(|style| style.apply(&patch));
            count += 1;
        }
    }
    count
}
