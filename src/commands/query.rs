//! 拾取与弹窗命令
//!
//! 点击拾取后交给弹窗导航器，翻页与关闭通知也在这里转发

use crate::geometry::Coord;
use crate::hit_test::hit_test;
use crate::projection::{MapView, ScreenPoint};
use crate::types::Outcome;
use crate::AppState;
use log::debug;

/// 处理地图点击
///
/// `lon`/`lat` 为点击处经纬度，`x`/`y` 为对应屏幕像素。
pub fn click_at(state: &mut AppState, lon: f64, lat: f64, x: f64, y: f64) -> Outcome {
    let click = Coord::new(lon, lat);
    let hits = hit_test(
        &state.registry,
        click,
        ScreenPoint::new(x, y),
        &state.view,
        &state.config.tolerance(),
    );
    debug!("点击 ({:.5}, {:.5}) 命中 {} 个要素", lon, lat, hits.len());

    let effects = state
        .popup
        .open(hits, click, &mut state.registry, &mut state.view);
    Outcome::Popup { effects }
}

pub fn popup_next(state: &mut AppState) -> Outcome {
    let effects = state.popup.next(&mut state.registry, &mut state.view);
    Outcome::Popup { effects }
}

pub fn popup_previous(state: &mut AppState) -> Outcome {
    let effects = state.popup.previous(&mut state.registry, &mut state.view);
    Outcome::Popup { effects }
}

/// 用户点击关闭按钮
pub fn close_popup(state: &mut AppState) -> Outcome {
    let effects = state.popup.close(&mut state.registry);
    Outcome::Popup { effects }
}

/// 外部弹窗关闭通知 (翻页中的关闭会被忽略)
pub fn popup_closed(state: &mut AppState) -> Outcome {
    state.popup.on_popup_closed(&mut state.registry);
    Outcome::Ack
}

pub fn popup_opened(state: &mut AppState) -> Outcome {
    state.popup.on_popup_opened();
    Outcome::Ack
}

/// 界面层平移/缩放后同步视图
pub fn view_changed(state: &mut AppState, view: MapView) -> Outcome {
    state.view = view;
    Outcome::Ack
}
