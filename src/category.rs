//! 专题图层分类
//!
//! 每个分类对应一个图层，集中定义：
//! - 数据文件 (一个分类可以由多个文件组成，例如规划方案的点/线/面)
//! - 是否为重型图层 (首次启用时才加载，分批入库)
//! - 渲染窗格与 Z-Order
//! - 加载时的默认样式 (即“原始样式”快照)
//! - 弹窗标题与属性子集/重命名表

use crate::geometry::{value_text, Feature, GeometryKind};
use crate::style::{Color, PathStyle};
use serde::{Deserialize, Serialize};

/// 专题分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    GrowthZones,
    Housing,
    Ptal,
    BusLines,
    BusStops,
    RailStations,
    Schemes,
}

/// 渲染窗格 (值为 z-index，先画的在下面)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pane {
    Boundary = 300,
    Data = 400,
    Transport = 500,
    Point = 600,
}

/// 缺失属性在弹窗中的占位
pub const MISSING_VALUE: &str = "N/A";

/// 规划方案字段重命名表 (shapefile 截断字段名 → 展示字段名)
const SCHEME_RENAMES: &[(&str, &str)] = &[
    ("Scheme_Nam", "scheme"),
    ("Scheme_Typ", "type"),
    ("Scheme_Sta", "status"),
    ("Name", "name"),
    ("Length_m", "length"),
    ("Area_ha", "area"),
];

/// PTAL 等级配色
const PTAL_COLORS: &[(&str, Color)] = &[
    ("0", Color::Rgb(0x08, 0x30, 0x6b)),
    ("1a", Color::Rgb(0x08, 0x30, 0x6b)),
    ("1b", Color::Rgb(0x21, 0x71, 0xb5)),
    ("2", Color::Rgb(0x6b, 0xae, 0xd6)),
    ("3", Color::Rgb(0x31, 0xa3, 0x54)),
    ("4", Color::Rgb(0xfe, 0xd9, 0x76)),
    ("5", Color::Rgb(0xfd, 0x8d, 0x3c)),
    ("6a", Color::Rgb(0xe3, 0x1a, 0x1c)),
    ("6b", Color::Rgb(0x99, 0x00, 0x0d)),
];

/// 未知 PTAL 等级的填充色
const PTAL_UNKNOWN: Color = Color::Rgb(0xcc, 0xcc, 0xcc);

const BUS_GREEN: Color = Color::Rgb(0x00, 0x80, 0x00);
const RAIL_BROWN: Color = Color::Rgb(0x8b, 0x45, 0x13);
const SCHEME_MAGENTA: Color = Color::Rgb(0xff, 0x00, 0xff);
const SCHEME_DASH: &str = "2, 2";

impl Category {
    pub const ALL: [Category; 7] = [
        Category::GrowthZones,
        Category::Housing,
        Category::Ptal,
        Category::BusLines,
        Category::BusStops,
        Category::RailStations,
        Category::Schemes,
    ];

    /// 图层注册表中的键
    pub fn layer_name(&self) -> &'static str {
        match self {
            Category::GrowthZones => "growth_zones",
            Category::Housing => "housing",
            Category::Ptal => "ptal",
            Category::BusLines => "bus_lines",
            Category::BusStops => "bus_stops",
            Category::RailStations => "rail_stations",
            Category::Schemes => "schemes",
        }
    }

    pub fn from_layer_name(name: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.layer_name() == name)
    }

    /// 图例中的显示名
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::GrowthZones => "Growth Zones",
            Category::Housing => "Housing",
            Category::Ptal => "PTAL",
            Category::BusLines => "Bus Lines",
            Category::BusStops => "Bus Stops",
            Category::RailStations => "Rail Stations",
            Category::Schemes => "TCR Schemes",
        }
    }

    /// 数据文件 (相对数据目录)
    pub fn sources(&self) -> &'static [&'static str] {
        match self {
            Category::GrowthZones => &["growth-zones.geojson"],
            Category::Housing => &["housing.geojson"],
            Category::Ptal => &["ptal.geojson"],
            Category::BusLines => &["bus-lines.geojson"],
            Category::BusStops => &["bus-stops.geojson"],
            Category::RailStations => &["rail_stations.geojson"],
            Category::Schemes => &[
                "schemes_pt.geojson",
                "schemes_ln.geojson",
                "schemes_pg.geojson",
            ],
        }
    }

    /// 重型图层：首次启用时才加载，并分批入库
    pub fn is_heavy(&self) -> bool {
        matches!(self, Category::Ptal | Category::BusLines | Category::BusStops)
    }

    pub fn pane(&self) -> Pane {
        match self {
            Category::GrowthZones => Pane::Boundary,
            Category::Housing | Category::Ptal => Pane::Data,
            Category::BusLines | Category::Schemes => Pane::Transport,
            Category::BusStops | Category::RailStations => Pane::Point,
        }
    }

    /// 加载时需要重命名的字段
    pub fn attribute_renames(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Category::Schemes => SCHEME_RENAMES,
            _ => &[],
        }
    }

    /// 加载时的默认样式
    pub fn default_style(&self, feature: &Feature) -> PathStyle {
        let base = PathStyle::default();
        match self {
            Category::GrowthZones | Category::Housing => PathStyle {
                color: Color::BLACK,
                weight: if *self == Category::GrowthZones { 2.0 } else { 1.0 },
                opacity: 1.0,
                fill_color: Color::Transparent,
                fill_opacity: 0.0,
                ..base
            },
            Category::Ptal => {
                let fill = ptal_class(feature)
                    .and_then(|class| {
                        PTAL_COLORS
                            .iter()
                            .find(|(k, _)| *k == class)
                            .map(|(_, c)| *c)
                    })
                    .unwrap_or(PTAL_UNKNOWN);
                PathStyle {
                    color: Color::Transparent,
                    weight: 0.0,
                    opacity: 0.0,
                    fill_color: fill,
                    fill_opacity: 0.7,
                    ..base
                }
            }
            Category::BusLines => PathStyle {
                color: BUS_GREEN,
                weight: 2.0,
                opacity: 1.0,
                ..base
            },
            Category::BusStops => circle_marker(BUS_GREEN, 4.0, 1.0),
            Category::RailStations => circle_marker(RAIL_BROWN, 5.0, 2.0),
            Category::Schemes => match feature.kind() {
                GeometryKind::Point => circle_marker(SCHEME_MAGENTA, 3.0, 0.5),
                GeometryKind::Line => PathStyle {
                    color: SCHEME_MAGENTA,
                    weight: 0.5,
                    opacity: 1.0,
                    dash_array: Some(SCHEME_DASH.to_string()),
                    ..base
                },
                GeometryKind::Polygon => PathStyle {
                    color: SCHEME_MAGENTA,
                    weight: 0.5,
                    fill_color: Color::Transparent,
                    fill_opacity: 0.0,
                    dash_array: Some(SCHEME_DASH.to_string()),
                    ..base
                },
            },
        }
    }

    /// 弹窗标题
    pub fn popup_title(&self, feature: &Feature) -> String {
        let titled = |key: &str, fallback: &str| {
            feature
                .property_text(key)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        match self {
            Category::GrowthZones => "Growth Zone".to_string(),
            Category::Housing => "Housing".to_string(),
            Category::Ptal => "PTAL (Public Transport Accessibility Level)".to_string(),
            Category::BusLines => "Bus Route".to_string(),
            Category::BusStops => titled("CommonName", "Bus Stop"),
            Category::RailStations => titled("name", "Rail Station"),
            Category::Schemes => match feature.kind() {
                GeometryKind::Point => titled("name", "TCR Point Scheme"),
                GeometryKind::Line => titled("name", "TCR Line Scheme"),
                GeometryKind::Polygon => titled("name", "TCR Polygon Scheme"),
            },
        }
    }

    /// 弹窗属性行 (标签, 值)
    ///
    /// 住房与 PTAL 展示全部非空属性，其他分类只展示固定子集。
    pub fn popup_rows(&self, feature: &Feature) -> Vec<(String, String)> {
        let pick = |rows: &[(&str, &str)]| -> Vec<(String, String)> {
            rows.iter()
                .map(|(label, key)| {
                    let value = feature
                        .property_text(key)
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| MISSING_VALUE.to_string());
                    (label.to_string(), value)
                })
                .collect()
        };

        match self {
            Category::Housing | Category::Ptal => feature
                .properties
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), value_text(v).unwrap_or_else(|| v.to_string())))
                .collect(),
            Category::GrowthZones => pick(&[("Name", "Name"), ("Growth Type", "GrowthType")]),
            Category::BusLines => pick(&[
                ("Route", "route"),
                ("Operator", "operator"),
                ("Mon AM", "MONAM"),
                ("Mon PM", "MONPM"),
            ]),
            Category::BusStops => pick(&[
                ("Stop Code", "ATCOCode"),
                ("Bearing", "Bearing"),
                ("Mon AM", "MONAM"),
                ("Mon PM", "MONPM"),
            ]),
            Category::RailStations => {
                let mut rows = vec![(
                    "Type".to_string(),
                    feature
                        .property_text("type")
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| "Rail Station".to_string()),
                )];
                rows.extend(pick(&[("Operator", "operator")]));
                rows
            }
            Category::Schemes => {
                let last = match feature.kind() {
                    GeometryKind::Point => ("Status", "status"),
                    GeometryKind::Line => ("Length", "length"),
                    GeometryKind::Polygon => ("Area", "area"),
                };
                pick(&[("Scheme", "scheme"), ("Type", "type"), last])
            }
        }
    }
}

/// 圆点标记样式 (实心填充)
fn circle_marker(color: Color, radius: f64, weight: f64) -> PathStyle {
    PathStyle {
        color,
        fill_color: color,
        fill_opacity: 1.0,
        radius,
        weight,
        ..PathStyle::default()
    }
}

/// PTAL 等级 (先取 `PTAL` 再取 `ptal`，统一小写)
pub fn ptal_class(feature: &Feature) -> Option<String> {
    feature
        .property_text("PTAL")
        .or_else(|| feature.property_text("ptal"))
        .map(|s| s.trim().to_lowercase())
}

// ============================================================================
// Z-Order 计算
// ============================================================================

/// 计算 Z-Order 值
///
/// 窗格决定大层次，rank 只在同一窗格内调整先后 (rank 越大越靠上)。
/// rank 限制在 0..100，保证不会越过相邻窗格。
pub fn calculate_z_order(category: Category, rank: i32) -> i32 {
    category.pane() as i32 + rank.clamp(0, 99)
}
