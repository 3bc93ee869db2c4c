//! 坐标转换：英国国家格网 (EPSG:27700) ↔ WGS84 (EPSG:4326)
//!
//! 数据源的坐标可能是两种坐标系之一，入库前统一转换为 (经度, 纬度)。
//!
//! 转换链路 (与 proj4 的 `+proj=tmerc ... +towgs84=...` 定义等价)：
//! 1. 横轴墨卡托反算 (Airy 1830 椭球) → OSGB36 经纬度
//! 2. 经纬度 → 地心直角坐标 (ECEF)
//! 3. 七参数 Helmert 变换 (位置矢量法) → WGS84 地心坐标
//! 4. 地心坐标 → WGS84 经纬度 (迭代)

use crate::geometry::{Coord, Feature};
use anyhow::{bail, Result};

/// Airy 1830 椭球
const AIRY_A: f64 = 6_377_563.396;
const AIRY_B: f64 = 6_356_256.909;

/// WGS84 椭球
const WGS84_A: f64 = 6_378_137.0;
const WGS84_B: f64 = 6_356_752.314_245;

/// 国家格网投影参数
const SCALE_F0: f64 = 0.999_601_271_7;
const ORIGIN_LAT_DEG: f64 = 49.0;
const ORIGIN_LON_DEG: f64 = -2.0;
const FALSE_EASTING: f64 = 400_000.0;
const FALSE_NORTHING: f64 = -100_000.0;

/// OSGB36 → WGS84 Helmert 参数 (平移: 米, 旋转: 角秒, 尺度: ppm)
const HELMERT_TO_WGS84: Helmert = Helmert {
    tx: 446.448,
    ty: -125.157,
    tz: 542.06,
    rx: 0.15,
    ry: 0.247,
    rz: 0.842,
    s: -20.489,
};

/// 子午线弧长迭代收敛阈值 (米)
const MERIDIAN_EPSILON: f64 = 1e-5;
/// 地心坐标反算纬度收敛阈值 (弧度)
const LATITUDE_EPSILON: f64 = 1e-12;
const MAX_ITERATIONS: usize = 100;

// ============================================================================
// 坐标系判断
// ============================================================================

/// 粗略判断坐标是否已经是经纬度
///
/// 仅做范围检查：两个分量都落在 [-180,180]×[-90,90] 内即视为经纬度。
/// 国家格网的东距/北距通常是 5-6 位数，不会落入该范围。
#[inline]
pub fn is_geographic(c: Coord) -> bool {
    (-180.0..=180.0).contains(&c.x) && (-90.0..=90.0).contains(&c.y)
}

/// 转换为 (经度, 纬度)
///
/// 已经是经纬度的坐标原样返回，避免重复转换。
pub fn to_geographic(c: Coord) -> Result<Coord> {
    if !c.is_finite() {
        bail!("坐标不是有限值: ({}, {})", c.x, c.y);
    }
    if is_geographic(c) {
        return Ok(c);
    }

    let (lat, lon) = grid_to_osgb36(c.x, c.y)?;
    let ecef = geodetic_to_ecef(lat, lon, AIRY_A, AIRY_B);
    let wgs = HELMERT_TO_WGS84.apply(ecef);
    let (lat, lon) = ecef_to_geodetic(wgs, WGS84_A, WGS84_B)?;

    Ok(Coord::new(lon.to_degrees(), lat.to_degrees()))
}

/// WGS84 (经度, 纬度) → 国家格网 (东距, 北距)
pub fn to_british_grid(c: Coord) -> Result<Coord> {
    if !c.is_finite() || !is_geographic(c) {
        bail!("不是合法的经纬度: ({}, {})", c.x, c.y);
    }

    let ecef = geodetic_to_ecef(c.y.to_radians(), c.x.to_radians(), WGS84_A, WGS84_B);
    let osgb = HELMERT_TO_WGS84.inverse().apply(ecef);
    let (lat, lon) = ecef_to_geodetic(osgb, AIRY_A, AIRY_B)?;
    let (e, n) = osgb36_to_grid(lat, lon);

    Ok(Coord::new(e, n))
}

/// 转换整个要素集合，保持要素数量、几何类型与嵌套结构
pub fn transform_features(features: Vec<Feature>) -> Result<Vec<Feature>> {
    features
        .into_iter()
        .enumerate()
        .map(|(index, mut feature)| {
            feature.geometry = feature
                .geometry
                .try_map_coords(to_geographic)
                .map_err(|e| e.context(format!("第 {} 个要素坐标转换失败", index)))?;
            Ok(feature)
        })
        .collect()
}

// ============================================================================
// 横轴墨卡托 (Airy 1830)
// ============================================================================

fn eccentricity_sq(a: f64, b: f64) -> f64 {
    1.0 - (b * b) / (a * a)
}

/// 子午线弧长
fn meridional_arc(lat: f64) -> f64 {
    let n = (AIRY_A - AIRY_B) / (AIRY_A + AIRY_B);
    let (n2, n3) = (n * n, n * n * n);
    let lat0 = ORIGIN_LAT_DEG.to_radians();
    let d = lat - lat0;
    let s = lat + lat0;

    AIRY_B
        * SCALE_F0
        * ((1.0 + n + 1.25 * n2 + 1.25 * n3) * d
            - (3.0 * n + 3.0 * n2 + 21.0 / 8.0 * n3) * d.sin() * s.cos()
            + (15.0 / 8.0 * n2 + 15.0 / 8.0 * n3) * (2.0 * d).sin() * (2.0 * s).cos()
            - 35.0 / 24.0 * n3 * (3.0 * d).sin() * (3.0 * s).cos())
}

/// 卯酉圈曲率半径 ν、子午圈曲率半径 ρ 以及 η²
fn radii(lat: f64) -> (f64, f64, f64) {
    let e2 = eccentricity_sq(AIRY_A, AIRY_B);
    let sin2 = lat.sin().powi(2);
    let nu = AIRY_A * SCALE_F0 / (1.0 - e2 * sin2).sqrt();
    let rho = AIRY_A * SCALE_F0 * (1.0 - e2) / (1.0 - e2 * sin2).powf(1.5);
    (nu, rho, nu / rho - 1.0)
}

/// 东距/北距 → OSGB36 (纬度, 经度)，弧度
fn grid_to_osgb36(easting: f64, northing: f64) -> Result<(f64, f64)> {
    let lat0 = ORIGIN_LAT_DEG.to_radians();
    let lon0 = ORIGIN_LON_DEG.to_radians();

    let mut lat = (northing - FALSE_NORTHING) / (AIRY_A * SCALE_F0) + lat0;
    let mut m = meridional_arc(lat);
    let mut iterations = 0;
    while (northing - FALSE_NORTHING - m).abs() >= MERIDIAN_EPSILON {
        lat += (northing - FALSE_NORTHING - m) / (AIRY_A * SCALE_F0);
        m = meridional_arc(lat);
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            bail!("北距 {} 的纬度迭代未收敛", northing);
        }
    }

    let (nu, rho, eta2) = radii(lat);
    let t = lat.tan();
    let (t2, t4, t6) = (t * t, t.powi(4), t.powi(6));
    let sec = 1.0 / lat.cos();

    let vii = t / (2.0 * rho * nu);
    let viii = t / (24.0 * rho * nu.powi(3)) * (5.0 + 3.0 * t2 + eta2 - 9.0 * t2 * eta2);
    let ix = t / (720.0 * rho * nu.powi(5)) * (61.0 + 90.0 * t2 + 45.0 * t4);
    let x = sec / nu;
    let xi = sec / (6.0 * nu.powi(3)) * (nu / rho + 2.0 * t2);
    let xii = sec / (120.0 * nu.powi(5)) * (5.0 + 28.0 * t2 + 24.0 * t4);
    let xiia = sec / (5040.0 * nu.powi(7)) * (61.0 + 662.0 * t2 + 1320.0 * t4 + 720.0 * t6);

    let de = easting - FALSE_EASTING;
    let lat = lat - vii * de.powi(2) + viii * de.powi(4) - ix * de.powi(6);
    let lon = lon0 + x * de - xi * de.powi(3) + xii * de.powi(5) - xiia * de.powi(7);

    Ok((lat, lon))
}

/// OSGB36 (纬度, 经度) 弧度 → 东距/北距
fn osgb36_to_grid(lat: f64, lon: f64) -> (f64, f64) {
    let lon0 = ORIGIN_LON_DEG.to_radians();
    let (nu, rho, eta2) = radii(lat);
    let m = meridional_arc(lat);

    let (sin, cos) = lat.sin_cos();
    let t2 = lat.tan().powi(2);
    let t4 = t2 * t2;

    let i = m + FALSE_NORTHING;
    let ii = nu / 2.0 * sin * cos;
    let iii = nu / 24.0 * sin * cos.powi(3) * (5.0 - t2 + 9.0 * eta2);
    let iiia = nu / 720.0 * sin * cos.powi(5) * (61.0 - 58.0 * t2 + t4);
    let iv = nu * cos;
    let v = nu / 6.0 * cos.powi(3) * (nu / rho - t2);
    let vi = nu / 120.0 * cos.powi(5) * (5.0 - 18.0 * t2 + t4 + 14.0 * eta2 - 58.0 * t2 * eta2);

    let dl = lon - lon0;
    let northing = i + ii * dl.powi(2) + iii * dl.powi(4) + iiia * dl.powi(6);
    let easting = FALSE_EASTING + iv * dl + v * dl.powi(3) + vi * dl.powi(5);

    (easting, northing)
}

// ============================================================================
// 大地坐标 ↔ 地心直角坐标，Helmert 变换
// ============================================================================

fn geodetic_to_ecef(lat: f64, lon: f64, a: f64, b: f64) -> [f64; 3] {
    let e2 = eccentricity_sq(a, b);
    let (sin_lat, cos_lat) = lat.sin_cos();
    let nu = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        nu * cos_lat * lon.cos(),
        nu * cos_lat * lon.sin(),
        (1.0 - e2) * nu * sin_lat,
    ]
}

fn ecef_to_geodetic(p: [f64; 3], a: f64, b: f64) -> Result<(f64, f64)> {
    let [x, y, z] = p;
    let e2 = eccentricity_sq(a, b);
    let horizontal = x.hypot(y);

    let mut lat = z.atan2(horizontal * (1.0 - e2));
    for _ in 0..MAX_ITERATIONS {
        let nu = a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let next = (z + e2 * nu * lat.sin()).atan2(horizontal);
        if (next - lat).abs() < LATITUDE_EPSILON {
            return Ok((next, y.atan2(x)));
        }
        lat = next;
    }
    bail!("地心坐标 ({x}, {y}, {z}) 纬度迭代未收敛")
}

/// 七参数 (位置矢量法)
#[derive(Debug, Clone, Copy)]
struct Helmert {
    tx: f64,
    ty: f64,
    tz: f64,
    rx: f64,
    ry: f64,
    rz: f64,
    s: f64,
}

impl Helmert {
    fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let [x, y, z] = p;
        let arcsec = |v: f64| (v / 3600.0).to_radians();
        let (rx, ry, rz) = (arcsec(self.rx), arcsec(self.ry), arcsec(self.rz));
        let m = 1.0 + self.s * 1e-6;
        [
            self.tx + m * x - rz * y + ry * z,
            self.ty + rz * x + m * y - rx * z,
            self.tz - ry * x + rx * y + m * z,
        ]
    }

    /// 近似逆变换 (参数取反，小角度下误差在毫米级)
    fn inverse(&self) -> Helmert {
        Helmert {
            tx: -self.tx,
            ty: -self.ty,
            tz: -self.tz,
            rx: -self.rx,
            ry: -self.ry,
            rz: -self.rz,
            s: -self.s,
        }
    }
}
