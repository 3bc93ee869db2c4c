//! Web 墨卡托投影 (EPSG:3857) 与地图视图
//!
//! 职责：
//! - 经纬度 ↔ 墨卡托米制坐标
//! - 地图视图 (中心 + 缩放 + 像素尺寸) 下的经纬度 ↔ 屏幕像素
//! - 视口范围、最小平移入视口、按范围缩放

use crate::geometry::Coord;
use rstar::AABB;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// 地球赤道半周长（米）
/// 计算方式：地球半径 6378137m × π
const EARTH_HALF_CIRCUMFERENCE: f64 = 20037508.342789244;

/// 瓦片边长 (像素)
pub const TILE_SIZE: f64 = 256.0;

/// 最大缩放级别
pub const MAX_ZOOM: f64 = 18.0;

/// 将 WGS84 经纬度转换为 Web 墨卡托坐标
///
/// # 公式
/// - x = lon × (半周长 / 180)
/// - y = ln(tan((90 + lat) × π / 360)) × (半周长 / π)
#[inline]
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * EARTH_HALF_CIRCUMFERENCE / 180.0;

    // 限制纬度范围，避免 tan 函数在极点附近产生无穷大
    let lat_clamped = lat.clamp(-85.051129, 85.051129);
    let lat_rad = (90.0 + lat_clamped) * PI / 360.0;
    let y = lat_rad.tan().ln() * EARTH_HALF_CIRCUMFERENCE / PI;

    (x, y)
}

/// 将 Web 墨卡托坐标转换回 WGS84 经纬度
#[inline]
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 180.0 / EARTH_HALF_CIRCUMFERENCE;
    let lat = (2.0 * (y * PI / EARTH_HALF_CIRCUMFERENCE).exp().atan() - PI / 2.0) * 180.0 / PI;
    (lon, lat)
}

/// 屏幕像素坐标 (左上角为原点，y 向下)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance_sq(&self, other: &ScreenPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// 经纬度到屏幕像素的投影 (拾取只依赖这一项能力)
pub trait ScreenProjection {
    fn project(&self, coord: Coord) -> ScreenPoint;
}

/// 视口定义 (WGS84 坐标系)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Viewport {
    pub fn contains(&self, c: Coord) -> bool {
        c.lon() >= self.min_lon
            && c.lon() <= self.max_lon
            && c.lat() >= self.min_lat
            && c.lat() <= self.max_lat
    }
}

/// 地图视图
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub center: Coord,
    pub zoom: f64,
    /// 画布宽度 (像素)
    pub width: f64,
    /// 画布高度 (像素)
    pub height: f64,
}

impl MapView {
    pub fn new(center: Coord, zoom: f64, width: f64, height: f64) -> Self {
        Self {
            center,
            zoom: zoom.clamp(0.0, MAX_ZOOM),
            width,
            height,
        }
    }

    /// 当前缩放级别下整个世界的像素边长
    #[inline]
    fn world_size(&self) -> f64 {
        TILE_SIZE * self.zoom.exp2()
    }

    /// 经纬度 → 世界像素坐标
    fn to_world(&self, c: Coord) -> (f64, f64) {
        let (mx, my) = lonlat_to_mercator(c.lon(), c.lat());
        let scale = self.world_size() / (2.0 * EARTH_HALF_CIRCUMFERENCE);
        (
            (mx + EARTH_HALF_CIRCUMFERENCE) * scale,
            (EARTH_HALF_CIRCUMFERENCE - my) * scale,
        )
    }

    fn from_world(&self, wx: f64, wy: f64) -> Coord {
        let scale = (2.0 * EARTH_HALF_CIRCUMFERENCE) / self.world_size();
        let (lon, lat) = mercator_to_lonlat(
            wx * scale - EARTH_HALF_CIRCUMFERENCE,
            EARTH_HALF_CIRCUMFERENCE - wy * scale,
        );
        Coord::new(lon, lat)
    }

    /// 屏幕像素 → 经纬度
    pub fn unproject(&self, p: ScreenPoint) -> Coord {
        let (cx, cy) = self.to_world(self.center);
        self.from_world(cx + p.x - self.width / 2.0, cy + p.y - self.height / 2.0)
    }

    /// 当前视口范围
    pub fn bounds(&self) -> Viewport {
        let nw = self.unproject(ScreenPoint::new(0.0, 0.0));
        let se = self.unproject(ScreenPoint::new(self.width, self.height));
        Viewport {
            min_lon: nw.lon(),
            min_lat: se.lat(),
            max_lon: se.lon(),
            max_lat: nw.lat(),
        }
    }

    /// 把坐标以最小平移量拉进视口
    ///
    /// 已在视口内时不动并返回 None，否则返回新的中心点。
    pub fn pan_inside(&mut self, c: Coord) -> Option<Coord> {
        let p = self.project(c);
        let offset = |v: f64, size: f64| {
            if v < 0.0 {
                v
            } else if v > size {
                v - size
            } else {
                0.0
            }
        };
        let dx = offset(p.x, self.width);
        let dy = offset(p.y, self.height);
        if dx == 0.0 && dy == 0.0 {
            return None;
        }

        let center = self.unproject(ScreenPoint::new(
            self.width / 2.0 + dx,
            self.height / 2.0 + dy,
        ));
        self.center = center;
        Some(center)
    }

    /// 缩放到范围 (四周留 padding 像素)
    ///
    /// 取能完整容纳范围的最大整数缩放级别；单点范围直接用最大级别。
    pub fn fit_bounds(&mut self, extent: &AABB<[f64; 2]>, padding: f64) {
        let [min_lon, min_lat] = extent.lower();
        let [max_lon, max_lat] = extent.upper();

        let (x0, y0) = lonlat_to_mercator(min_lon, min_lat);
        let (x1, y1) = lonlat_to_mercator(max_lon, max_lat);
        let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
        let (lon, lat) = mercator_to_lonlat(cx, cy);
        self.center = Coord::new(lon, lat);

        // zoom 0 下范围的像素尺寸
        let px_per_meter = TILE_SIZE / (2.0 * EARTH_HALF_CIRCUMFERENCE);
        let span_w = (x1 - x0).abs() * px_per_meter;
        let span_h = (y1 - y0).abs() * px_per_meter;
        let avail_w = (self.width - 2.0 * padding).max(1.0);
        let avail_h = (self.height - 2.0 * padding).max(1.0);

        let ratio = match (span_w > 0.0, span_h > 0.0) {
            (false, false) => f64::INFINITY,
            (true, false) => avail_w / span_w,
            (false, true) => avail_h / span_h,
            (true, true) => (avail_w / span_w).min(avail_h / span_h),
        };
        self.zoom = ratio.log2().floor().clamp(0.0, MAX_ZOOM);
    }
}

impl ScreenProjection for MapView {
    fn project(&self, c: Coord) -> ScreenPoint {
        let (cx, cy) = self.to_world(self.center);
        let (wx, wy) = self.to_world(c);
        ScreenPoint::new(
            wx - cx + self.width / 2.0,
            wy - cy + self.height / 2.0,
        )
    }
}
