//! 仪表盘配置
//!
//! 全部字段都有默认值，配置文件只需写要覆盖的部分。

use crate::category::Category;
use crate::geometry::Coord;
use crate::hit_test::HitTolerance;
use crate::projection::{MapView, MAX_ZOOM};
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 初始视图
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitialView {
    pub lat: f64,
    pub lon: f64,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for InitialView {
    fn default() -> Self {
        // 布里斯托市中心
        Self {
            lat: 51.4545,
            lon: -2.5879,
            zoom: 11.0,
            width: 1024.0,
            height: 768.0,
        }
    }
}

impl InitialView {
    pub fn to_map_view(&self) -> MapView {
        MapView::new(Coord::new(self.lon, self.lat), self.zoom, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    /// GeoJSON 数据目录
    pub data_dir: PathBuf,
    /// 重型图层每批入库的要素数
    pub batch_size: usize,
    pub point_tolerance_px: f64,
    pub line_tolerance_px: f64,
    /// “缩放到图层” 时四周留白 (像素)
    pub fit_padding_px: f64,
    pub initial_view: InitialView,
    /// 启动时加载的分类
    pub preload: Vec<Category>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            batch_size: 50,
            point_tolerance_px: 15.0,
            line_tolerance_px: 20.0,
            fit_padding_px: 20.0,
            initial_view: InitialView::default(),
            preload: Category::ALL.into_iter().filter(|c| !c.is_heavy()).collect(),
        }
    }
}

impl DashboardConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("配置解析失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {:?}", path))?;
        Self::from_json(&text).with_context(|| format!("配置文件 {:?} 无效", path))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size 必须大于 0");
        ensure!(
            self.point_tolerance_px > 0.0 && self.line_tolerance_px > 0.0,
            "拾取容差必须大于 0"
        );
        ensure!(self.fit_padding_px >= 0.0, "fit_padding_px 不能为负");

        let view = &self.initial_view;
        ensure!(
            (0.0..=MAX_ZOOM).contains(&view.zoom),
            "初始缩放级别 {} 超出范围 0..={}",
            view.zoom,
            MAX_ZOOM
        );
        ensure!(view.width > 0.0 && view.height > 0.0, "视口尺寸必须大于 0");
        ensure!(
            (-90.0..=90.0).contains(&view.lat) && (-180.0..=180.0).contains(&view.lon),
            "初始中心点 ({}, {}) 不是合法经纬度",
            view.lon,
            view.lat
        );
        Ok(())
    }

    pub fn tolerance(&self) -> HitTolerance {
        HitTolerance {
            point_px: self.point_tolerance_px,
            line_px: self.line_tolerance_px,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DashboardConfig::from_json("{}").unwrap();
        assert_eq!(config, DashboardConfig::default());
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.tolerance(), HitTolerance::default());
        assert!(!config.preload.contains(&Category::Ptal));
        assert!(config.preload.contains(&Category::Housing));
    }

    #[test]
    fn test_partial_override() {
        let config = DashboardConfig::from_json(
            r#"{"batch_size": 20, "initial_view": {"zoom": 13}, "preload": ["housing"]}"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.initial_view.zoom, 13.0);
        assert_eq!(config.initial_view.lat, 51.4545);
        assert_eq!(config.preload, vec![Category::Housing]);
    }

    #[test]
    fn test_invalid() {
        assert!(DashboardConfig::from_json(r#"{"batch_size": 0}"#).is_err());
        assert!(DashboardConfig::from_json(r#"{"initial_view": {"zoom": 30}}"#).is_err());
        assert!(DashboardConfig::from_json(r#"{"unknown": 1}"#).is_err());
        assert!(DashboardConfig::from_json(r#"{"preload": ["nope"]}"#).is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.json");
        std::fs::write(&path, r#"{"data_dir": "/srv/geojson"}"#).unwrap();

        let config = DashboardConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/geojson"));
        assert!(DashboardConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
