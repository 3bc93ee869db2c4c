//! 样式与过滤编辑命令
//!
//! 编辑前先校验输入，校验通过后关闭弹窗再修改图层。
//! 校验失败时不修改任何状态，错误信息原样返回给用户。

use crate::filter::{ClauseId, FilterClause, FilterLogic, FilterStats};
use crate::popup::PopupEffect;
use crate::style::StyleSpec;
use crate::types::Outcome;
use crate::AppState;
use anyhow::{ensure, Result};

// ============================================================================
// 样式
// ============================================================================

pub fn set_style(state: &mut AppState, layer: &str, spec: StyleSpec) -> Result<Outcome> {
    spec.validate()?;
    ensure_layer(state, layer)?;

    let popup = state.popup.close(&mut state.registry);
    let restyled = state.styles.set_style(layer, spec, &mut state.registry)?;
    Ok(Outcome::Styled {
        layer: layer.to_string(),
        restyled,
        popup,
    })
}

pub fn reset_style(state: &mut AppState, layer: &str) -> Result<Outcome> {
    ensure_layer(state, layer)?;

    let popup = state.popup.close(&mut state.registry);
    let restyled = state.styles.reset_style(layer, &mut state.registry)?;
    Ok(Outcome::Styled {
        layer: layer.to_string(),
        restyled,
        popup,
    })
}

// ============================================================================
// 过滤
// ============================================================================

pub fn add_filter(state: &mut AppState, layer: &str, clause: FilterClause) -> Result<Outcome> {
    clause.validate()?;
    ensure_layer(state, layer)?;

    let popup = state.popup.close(&mut state.registry);
    state.filters.add_clause(layer, clause, &mut state.registry)?;
    Ok(filtered(state, layer, popup))
}

pub fn remove_filter(state: &mut AppState, layer: &str, id: ClauseId) -> Result<Outcome> {
    ensure_layer(state, layer)?;
    let exists = state
        .filters
        .filter_of(layer)
        .is_some_and(|f| f.filters.iter().any(|c| c.id == id));
    ensure!(exists, "Filter #{} does not exist", id.0);

    let popup = state.popup.close(&mut state.registry);
    state.filters.remove_clause(layer, id, &mut state.registry)?;
    Ok(filtered(state, layer, popup))
}

/// 整体替换过滤规格，空列表等同于清空
pub fn set_filter(
    state: &mut AppState,
    layer: &str,
    logic: FilterLogic,
    filters: Vec<FilterClause>,
) -> Result<Outcome> {
    for clause in &filters {
        clause.validate()?;
    }
    ensure_layer(state, layer)?;

    let popup = state.popup.close(&mut state.registry);
    state
        .filters
        .set_filter(layer, logic, filters, &mut state.registry)?;
    Ok(filtered(state, layer, popup))
}

pub fn set_filter_logic(state: &mut AppState, layer: &str, logic: FilterLogic) -> Result<Outcome> {
    ensure_layer(state, layer)?;

    let popup = state.popup.close(&mut state.registry);
    state.filters.set_logic(layer, logic, &mut state.registry)?;
    Ok(filtered(state, layer, popup))
}

pub fn clear_filter(state: &mut AppState, layer: &str) -> Result<Outcome> {
    ensure_layer(state, layer)?;

    let popup = state.popup.close(&mut state.registry);
    state.filters.clear_layer(layer, &mut state.registry);
    Ok(filtered(state, layer, popup))
}

pub fn clear_all_filters(state: &mut AppState) -> Outcome {
    let effects = state.popup.close(&mut state.registry);
    state.filters.clear_all(&mut state.registry);
    Outcome::Popup { effects }
}

// ============================================================================
// 辅助函数
// ============================================================================

fn ensure_layer(state: &AppState, layer: &str) -> Result<()> {
    ensure!(
        state.registry.contains(layer),
        "Layer '{}' does not exist",
        layer
    );
    Ok(())
}

/// 汇总图层当前的过滤结果
fn filtered(state: &AppState, layer: &str, popup: Vec<PopupEffect>) -> Outcome {
    let mut stats = FilterStats::default();
    for rendered in state.registry.walk(layer) {
        if rendered.is_filtered_out() {
            stats.excluded += 1;
        } else {
            stats.matched += 1;
        }
    }

    let clause_ids = state
        .filters
        .filter_of(layer)
        .map(|f| f.filters.iter().map(|c| c.id).collect())
        .unwrap_or_default();

    Outcome::Filtered {
        layer: layer.to_string(),
        stats,
        clause_ids,
        popup,
    }
}
