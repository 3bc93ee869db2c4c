//! 要素与几何类型
//!
//! - `Coord`: 坐标对，入库后一律为 (经度, 纬度) 顺序
//! - `Geometry`: GeoJSON 几何 (含 Multi- 变体)，serde 直接对应 `{type, coordinates}`
//! - `Feature`: 几何 + 有序属性表，MultiPolygon 拆分后带 `PartRef` 回指

use anyhow::{bail, Result};
use rstar::AABB;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 有序属性表 (serde_json 开启 preserve_order，保持源文件中的键顺序)
pub type Properties = Map<String, Value>;

/// 坐标对
///
/// 转换前可能是英国国家格网 (东距, 北距)，转换后固定为 (经度, 纬度)。
/// GeoJSON 中多余的高程分量在解析时丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 2]")]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn lon(&self) -> f64 {
        self.x
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.y
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl TryFrom<Vec<f64>> for Coord {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        match values.as_slice() {
            [x, y, ..] => Ok(Coord::new(*x, *y)),
            _ => Err(format!("坐标至少需要两个分量，实际为 {}", values.len())),
        }
    }
}

impl From<Coord> for [f64; 2] {
    fn from(c: Coord) -> Self {
        [c.x, c.y]
    }
}

/// 几何大类 (样式通道、拾取算法、高亮样式都按它分派)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

/// GeoJSON 几何
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    LineString(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    Polygon(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => GeometryKind::Point,
            Geometry::LineString(_) | Geometry::MultiLineString(_) => GeometryKind::Line,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => GeometryKind::Polygon,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// 坐标数组的嵌套层数 (Point = 0, MultiPolygon = 3)
    pub fn nesting_depth(&self) -> usize {
        match self {
            Geometry::Point(_) => 0,
            Geometry::MultiPoint(_) | Geometry::LineString(_) => 1,
            Geometry::MultiLineString(_) | Geometry::Polygon(_) => 2,
            Geometry::MultiPolygon(_) => 3,
        }
    }

    /// 按原有嵌套结构逐坐标变换
    pub fn try_map_coords<F>(self, mut f: F) -> Result<Geometry>
    where
        F: FnMut(Coord) -> Result<Coord>,
    {
        fn path<F: FnMut(Coord) -> Result<Coord>>(coords: Vec<Coord>, f: &mut F) -> Result<Vec<Coord>> {
            coords.into_iter().map(|c| f(c)).collect()
        }

        fn rings<F: FnMut(Coord) -> Result<Coord>>(
            rings: Vec<Vec<Coord>>,
            f: &mut F,
        ) -> Result<Vec<Vec<Coord>>> {
            rings.into_iter().map(|r| path(r, f)).collect()
        }

        Ok(match self {
            Geometry::Point(c) => Geometry::Point(f(c)?),
            Geometry::MultiPoint(cs) => Geometry::MultiPoint(path(cs, &mut f)?),
            Geometry::LineString(cs) => Geometry::LineString(path(cs, &mut f)?),
            Geometry::MultiLineString(ls) => Geometry::MultiLineString(rings(ls, &mut f)?),
            Geometry::Polygon(rs) => Geometry::Polygon(rings(rs, &mut f)?),
            Geometry::MultiPolygon(ps) => Geometry::MultiPolygon(
                ps.into_iter()
                    .map(|p| rings(p, &mut f))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// 遍历全部坐标 (不关心嵌套)
    pub fn for_each_coord(&self, mut f: impl FnMut(Coord)) {
        match self {
            Geometry::Point(c) => f(*c),
            Geometry::MultiPoint(cs) | Geometry::LineString(cs) => cs.iter().copied().for_each(f),
            Geometry::MultiLineString(ls) | Geometry::Polygon(ls) => {
                ls.iter().flatten().copied().for_each(f)
            }
            Geometry::MultiPolygon(ps) => ps.iter().flatten().flatten().copied().for_each(f),
        }
    }

    /// 计算包围盒，空几何返回 None
    pub fn envelope(&self) -> Option<AABB<[f64; 2]>> {
        let mut min = [f64::MAX, f64::MAX];
        let mut max = [f64::MIN, f64::MIN];
        let mut found = false;

        self.for_each_coord(|c| {
            min[0] = min[0].min(c.x);
            min[1] = min[1].min(c.y);
            max[0] = max[0].max(c.x);
            max[1] = max[1].max(c.y);
            found = true;
        });

        found.then(|| AABB::from_corners(min, max))
    }

    /// 检查坐标是否全部为有限值，并且线/面满足最少顶点数
    pub fn validate(&self) -> Result<()> {
        let mut bad = None;
        self.for_each_coord(|c| {
            if bad.is_none() && !c.is_finite() {
                bad = Some(c);
            }
        });
        if let Some(c) = bad {
            bail!("{} 包含非法坐标 ({}, {})", self.type_name(), c.x, c.y);
        }

        match self {
            Geometry::LineString(cs) if cs.len() < 2 => bail!("LineString 至少需要 2 个顶点"),
            Geometry::Polygon(rs) if rs.first().map_or(true, |r| r.len() < 3) => {
                bail!("Polygon 外环至少需要 3 个顶点")
            }
            _ => Ok(()),
        }
    }
}

/// MultiPolygon 拆分后的回指信息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRef {
    /// 原始要素标识 (源数据 id，缺失时为要素在集合中的序号)
    pub original_id: Value,
    pub part_index: usize,
    pub part_count: usize,
}

/// 地图要素
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<PartRef>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Properties) -> Self {
        Self {
            geometry,
            properties,
            part: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> GeometryKind {
        self.geometry.kind()
    }

    /// 读取属性，null 视为缺失
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    /// 属性的文本形式 (数字按 JSON 原样输出，例如 `1`、`2.5`)
    pub fn property_text(&self, key: &str) -> Option<String> {
        self.property(key).and_then(value_text)
    }

    /// 属性的数值形式：数字直接取值，字符串尝试解析
    pub fn property_number(&self, key: &str) -> Option<f64> {
        self.property(key).and_then(value_number)
    }
}

/// JSON 值的文本形式，数组/对象不参与比较
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        // 整数值的浮点数按整数输出 (1.0 -> "1")
        Value::Number(n) if n.is_f64() => n.as_f64().map(|f| f.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// JSON 值的数值形式，无法解析时返回 None (NaN 也按解析结果返回，由调用方比较)
pub fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
