//! 属性过滤引擎
//!
//! 每个图层维护一组有序的过滤条件 (属性, 运算符, 值)，按 AND / OR 组合。
//!
//! 应用过滤是一个原子操作，对图层内每个要素：
//! 1. 通过：恢复到过滤前的样式
//! 2. 不通过：保存当前样式，切换为透明且不可交互的样式
//! 3. 不通过的要素同时从拾取中排除
//!
//! 删除图层的最后一个条件等同于清空过滤，样式与可拾取状态完全恢复。

use crate::geometry::{value_number, value_text, Feature};
use crate::layer_registry::{FeatureId, LayerRegistry};
use log::{info, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// 文本相等 (忽略大小写)
    Equals,
    /// 文本包含 (忽略大小写)
    Contains,
    Greater,
    Less,
    /// 数值区间 (两端都包含)
    Between,
}

/// 条件组合方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

/// 单个过滤条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterClause {
    pub attribute: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<String>,
}

impl FilterClause {
    /// 创建并校验条件
    pub fn new(
        attribute: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<String>,
        value2: Option<String>,
    ) -> Result<Self, FilterError> {
        let clause = Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
            value2,
        };
        clause.validate()?;
        Ok(clause)
    }

    /// 检查条件是否完整
    ///
    /// `between` 需要两个值，其他运算符只需要第一个值。
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.attribute.trim().is_empty() {
            return Err(FilterError::MissingAttribute);
        }
        if self.value.trim().is_empty() {
            return Err(FilterError::MissingValue);
        }
        if self.operator == FilterOperator::Between
            && self.value2.as_deref().map_or(true, |v| v.trim().is_empty())
        {
            return Err(FilterError::MissingSecondValue);
        }
        Ok(())
    }

    /// 判断要素是否满足条件
    ///
    /// 属性缺失、无法解析为数字等情况一律视为不满足，不会报错。
    pub fn matches(&self, feature: &Feature) -> bool {
        let Some(raw) = feature.property(&self.attribute) else {
            return false;
        };

        match self.operator {
            FilterOperator::Equals => value_text(raw)
                .is_some_and(|text| text.to_lowercase() == self.value.to_lowercase()),
            FilterOperator::Contains => value_text(raw)
                .is_some_and(|text| text.to_lowercase().contains(&self.value.to_lowercase())),
            FilterOperator::Greater => compare(raw, &self.value, |v, x| v > x),
            FilterOperator::Less => compare(raw, &self.value, |v, x| v < x),
            FilterOperator::Between => {
                let Some(v) = value_number(raw) else {
                    return false;
                };
                let lo = parse_number(&self.value);
                let hi = self.value2.as_deref().map_or(f64::NAN, parse_number);
                // NaN 参与的比较都是 false
                lo <= v && v <= hi
            }
        }
    }
}

fn parse_number(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn compare(raw: &serde_json::Value, operand: &str, op: impl Fn(f64, f64) -> bool) -> bool {
    let v = value_number(raw).unwrap_or(f64::NAN);
    op(v, parse_number(operand))
}

/// 条件标识 (在引擎内唯一)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClauseId(pub u64);

/// 已保存的条件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredClause {
    pub id: ClauseId,
    #[serde(flatten)]
    pub clause: FilterClause,
}

/// 图层过滤规格 `{logic, filters}`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerFilter {
    pub logic: FilterLogic,
    pub filters: Vec<StoredClause>,
}

impl LayerFilter {
    /// 空条件列表视为全部通过
    pub fn evaluate(&self, feature: &Feature) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let mut results = self.filters.iter().map(|c| {
            let hit = c.clause.matches(feature);
            trace!("条件 {:?} {:?} {} -> {}", c.id, c.clause.operator, c.clause.attribute, hit);
            hit
        });
        match self.logic {
            FilterLogic::And => results.all(|hit| hit),
            FilterLogic::Or => results.any(|hit| hit),
        }
    }
}

/// 一次应用的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub matched: usize,
    pub excluded: usize,
}

/// 过滤输入错误 (在修改任何状态之前返回)
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    MissingAttribute,
    MissingValue,
    MissingSecondValue,
    UnknownLayer(String),
    UnknownClause(ClauseId),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::MissingAttribute => write!(f, "Please select an attribute"),
            FilterError::MissingValue => write!(f, "Please enter a value"),
            FilterError::MissingSecondValue => {
                write!(f, "Please enter both values for a 'between' filter")
            }
            FilterError::UnknownLayer(name) => write!(f, "Layer '{}' does not exist", name),
            FilterError::UnknownClause(id) => write!(f, "Filter #{} does not exist", id.0),
        }
    }
}

impl std::error::Error for FilterError {}

/// 过滤引擎
#[derive(Debug, Default)]
pub struct FilterEngine {
    filters: HashMap<String, LayerFilter>,
    next_id: u64,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_of(&self, layer: &str) -> Option<&LayerFilter> {
        self.filters.get(layer)
    }

    fn allocate_id(&mut self) -> ClauseId {
        self.next_id += 1;
        ClauseId(self.next_id)
    }

    /// 追加条件并立即应用
    pub fn add_clause(
        &mut self,
        layer: &str,
        clause: FilterClause,
        registry: &mut LayerRegistry,
    ) -> Result<ClauseId, FilterError> {
        clause.validate()?;
        if !registry.contains(layer) {
            return Err(FilterError::UnknownLayer(layer.to_string()));
        }

        let id = self.allocate_id();
        self.filters
            .entry(layer.to_string())
            .or_default()
            .filters
            .push(StoredClause { id, clause });
        self.apply(layer, registry);
        Ok(id)
    }

    /// 删除条件，删除最后一个时等同于清空该图层的过滤
    pub fn remove_clause(
        &mut self,
        layer: &str,
        id: ClauseId,
        registry: &mut LayerRegistry,
    ) -> Result<(), FilterError> {
        let filter = self
            .filters
            .get_mut(layer)
            .ok_or(FilterError::UnknownClause(id))?;
        let before = filter.filters.len();
        filter.filters.retain(|c| c.id != id);
        if filter.filters.len() == before {
            return Err(FilterError::UnknownClause(id));
        }
        if filter.filters.is_empty() {
            self.filters.remove(layer);
        }
        self.apply(layer, registry);
        Ok(())
    }

    /// 修改组合方式
    pub fn set_logic(
        &mut self,
        layer: &str,
        logic: FilterLogic,
        registry: &mut LayerRegistry,
    ) -> Result<(), FilterError> {
        if !registry.contains(layer) {
            return Err(FilterError::UnknownLayer(layer.to_string()));
        }
        if let Some(filter) = self.filters.get_mut(layer) {
            filter.logic = logic;
            self.apply(layer, registry);
        }
        Ok(())
    }

    /// 整体替换图层的过滤规格
    ///
    /// 先校验全部条件，任何一个不完整都不会修改状态。
    pub fn set_filter(
        &mut self,
        layer: &str,
        logic: FilterLogic,
        clauses: Vec<FilterClause>,
        registry: &mut LayerRegistry,
    ) -> Result<Vec<ClauseId>, FilterError> {
        if !registry.contains(layer) {
            return Err(FilterError::UnknownLayer(layer.to_string()));
        }
        for clause in &clauses {
            clause.validate()?;
        }

        let stored: Vec<StoredClause> = clauses
            .into_iter()
            .map(|clause| StoredClause {
                id: self.allocate_id(),
                clause,
            })
            .collect();
        let ids = stored.iter().map(|c| c.id).collect();

        if stored.is_empty() {
            self.filters.remove(layer);
        } else {
            self.filters.insert(
                layer.to_string(),
                LayerFilter {
                    logic,
                    filters: stored,
                },
            );
        }
        self.apply(layer, registry);
        Ok(ids)
    }

    /// 清空单个图层的过滤
    pub fn clear_layer(&mut self, layer: &str, registry: &mut LayerRegistry) {
        if self.filters.remove(layer).is_some() {
            self.apply(layer, registry);
        }
    }

    /// 清空全部过滤
    pub fn clear_all(&mut self, registry: &mut LayerRegistry) {
        let layers: Vec<String> = self.filters.drain().map(|(name, _)| name).collect();
        for layer in &layers {
            self.apply(layer, registry);
        }
    }

    /// 判断要素在指定图层的过滤下是否通过 (没有过滤时总是通过)
    pub fn evaluate(&self, feature: &Feature, layer: &str) -> bool {
        self.filters
            .get(layer)
            .map_or(true, |filter| filter.evaluate(feature))
    }

    /// 把当前过滤状态落到图层的全部要素上
    pub fn apply(&self, layer: &str, registry: &mut LayerRegistry) -> FilterStats {
        let ids = registry.feature_ids(layer);
        let stats = self.apply_to_batch(layer, &ids, registry);
        info!(
            "图层 {} 应用过滤: 通过 {}, 排除 {}",
            layer, stats.matched, stats.excluded
        );
        stats
    }

    /// 只对指定要素应用 (分批加载的新批次)
    pub fn apply_to_batch(
        &self,
        layer: &str,
        ids: &[FeatureId],
        registry: &mut LayerRegistry,
    ) -> FilterStats {
        let mut stats = FilterStats::default();
        for &id in ids {
            let Some(rendered) = registry.feature_mut(id) else {
                continue;
            };
            if self.evaluate(&rendered.feature, layer) {
                rendered.include();
                stats.matched += 1;
            } else {
                rendered.exclude();
                stats.excluded += 1;
            }
        }
        stats
    }
}
