//! 意图处理器
//!
//! 按功能分组，由 `AppState::dispatch` 调用

mod data;
mod editing;
mod query;

pub use data::*;
pub use editing::*;
pub use query::*;

#[cfg(test)]
mod tests {
    use crate::category::Category;
    use crate::config::DashboardConfig;
    use crate::feature_loader::StaticSource;
    use crate::filter::{FilterClause, FilterLogic, FilterOperator};
    use crate::layer_registry::{LoadState, VisibilityChange};
    use crate::popup::PopupEffect;
    use crate::style::{ChannelSpec, Color, StyleSpec};
    use crate::types::{Intent, Outcome};
    use crate::AppState;
    use serde_json::{json, Value};

    fn collection(features: Value) -> String {
        json!({"type": "FeatureCollection", "features": features}).to_string()
    }

    fn square(lon: f64, lat: f64, half: f64) -> Value {
        json!({"type": "Polygon", "coordinates": [[
            [lon - half, lat - half], [lon + half, lat - half],
            [lon + half, lat + half], [lon - half, lat + half],
            [lon - half, lat - half]
        ]]})
    }

    fn housing() -> String {
        collection(json!([
            {"type": "Feature", "properties": {"Layer": "L1", "Units": 120},
             "geometry": square(-2.60, 51.45, 0.005)},
            {"type": "Feature", "properties": {"Layer": "L2", "Units": 40},
             "geometry": square(-2.58, 51.45, 0.005)},
            {"type": "Feature", "properties": {"Layer": "L1", "Units": 15},
             "geometry": square(-2.56, 51.45, 0.005)}
        ]))
    }

    fn ptal(count: usize) -> String {
        const CLASSES: [&str; 4] = ["1a", "2", "4", "6b"];
        let features: Vec<Value> = (0..count)
            .map(|i| {
                json!({"type": "Feature", "properties": {"PTAL": CLASSES[i % CLASSES.len()]},
                       "geometry": square(-2.7 + i as f64 * 0.01, 51.5, 0.004)})
            })
            .collect();
        collection(Value::Array(features))
    }

    fn state(source: StaticSource) -> AppState {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = DashboardConfig {
            batch_size: 2,
            preload: vec![Category::Housing],
            ..Default::default()
        };
        AppState::with_source(config, source)
    }

    /// 点击点在地图视图中的像素坐标
    fn pixel_of(state: &AppState, lon: f64, lat: f64) -> (f64, f64) {
        use crate::projection::ScreenProjection;
        let p = state.view.project(crate::geometry::Coord::new(lon, lat));
        (p.x, p.y)
    }

    #[tokio::test]
    async fn test_load_initial_isolates_failures() {
        // 只有住房数据，其他预加载分类缺文件
        let source = StaticSource::new().with("housing.geojson", housing());
        let config = DashboardConfig::default();
        let mut app = AppState::with_source(config, source);

        let outcome = app.dispatch(Intent::LoadInitial).await;
        assert!(matches!(outcome, Outcome::Layers { .. }));
        assert_eq!(app.registry.features("housing").len(), 3);
        assert!(app.registry.is_visible("housing"));
        assert!(!app.registry.is_visible("growth_zones"));
    }

    fn enable(layer: &str) -> Intent {
        Intent::SetLayerVisible {
            layer: layer.into(),
            visible: true,
        }
    }

    fn disable(layer: &str) -> Intent {
        Intent::SetLayerVisible {
            layer: layer.into(),
            visible: false,
        }
    }

    fn load_state(app: &AppState, layer: &str) -> LoadState {
        app.registry.layer(layer).unwrap().load_state.clone()
    }

    async fn drain_loads(app: &mut AppState) {
        while app.has_pending_loads() {
            app.dispatch(Intent::LoadNextBatch).await;
        }
    }

    #[tokio::test]
    async fn test_heavy_layer_loads_on_enable() {
        let source = StaticSource::new()
            .with("housing.geojson", housing())
            .with("ptal.geojson", ptal(5));
        let mut app = state(source);
        app.dispatch(Intent::LoadInitial).await;
        assert!(app.registry.features("ptal").is_empty());
        assert!(!app.has_pending_loads());

        match app.dispatch(enable("ptal")).await {
            Outcome::Visibility { change, loaded, .. } => {
                assert_eq!(change, VisibilityChange::NeedsLoad);
                let loaded = loaded.unwrap();
                assert_eq!(loaded.features_loaded, 2);
                assert_eq!(loaded.remaining, 3);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let mut seen = Vec::new();
        while app.has_pending_loads() {
            match app.dispatch(Intent::LoadNextBatch).await {
                Outcome::Loading { progress } => seen.push((progress.batches, progress.remaining)),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(seen, vec![(2, 1), (3, 0)]);
        assert_eq!(load_state(&app, "ptal"), LoadState::Loaded);
        assert!(matches!(app.dispatch(Intent::LoadNextBatch).await, Outcome::Ack));

        // 再次开关不会重复加载
        app.dispatch(disable("ptal")).await;
        match app.dispatch(enable("ptal")).await {
            Outcome::Visibility { change, loaded, .. } => {
                assert_eq!(change, VisibilityChange::Shown);
                assert!(loaded.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(app.registry.features("ptal").len(), 5);
    }

    #[tokio::test]
    async fn test_intents_between_batches() {
        let mut app = state(StaticSource::new().with("ptal.geojson", ptal(5)));
        app.dispatch(enable("ptal")).await;
        assert!(app.has_pending_loads());
        assert_eq!(load_state(&app, "ptal"), LoadState::Loading);

        // 首批已可拾取
        let (x, y) = pixel_of(&app, -2.7, 51.5);
        match app
            .dispatch(Intent::ClickAt {
                lon: -2.7,
                lat: 51.5,
                x,
                y,
            })
            .await
        {
            Outcome::Popup { effects } => match effects.last() {
                Some(PopupEffect::Open(view)) => assert_eq!(view.layer, "ptal"),
                other => panic!("unexpected effect {:?}", other),
            },
            other => panic!("unexpected outcome {:?}", other),
        }

        // 加载中设置的过滤同样作用于后续批次
        match app
            .dispatch(Intent::SetFilter {
                layer: "ptal".into(),
                logic: FilterLogic::And,
                filters: vec![FilterClause::new("PTAL", FilterOperator::Equals, "2", None).unwrap()],
            })
            .await
        {
            Outcome::Filtered { stats, popup, .. } => {
                assert_eq!((stats.matched, stats.excluded), (1, 1));
                assert_eq!(popup, vec![PopupEffect::Close]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // 加载中再次启用不会重复加载
        assert!(matches!(
            app.dispatch(disable("ptal")).await,
            Outcome::Visibility {
                change: VisibilityChange::Hidden,
                ..
            }
        ));
        match app.dispatch(enable("ptal")).await {
            Outcome::Visibility { change, loaded, .. } => {
                assert_eq!(change, VisibilityChange::Shown);
                assert!(loaded.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(app.registry.features("ptal").len(), 2);

        drain_loads(&mut app).await;
        assert_eq!(load_state(&app, "ptal"), LoadState::Loaded);
        assert_eq!(app.registry.features("ptal").len(), 5);
        let excluded = app
            .registry
            .walk("ptal")
            .filter(|f| f.is_filtered_out())
            .count();
        assert_eq!(excluded, 4);
    }

    #[tokio::test]
    async fn test_failed_heavy_load_is_rejected() {
        let mut app = state(StaticSource::new().with("housing.geojson", housing()));
        let outcome = app.dispatch(enable("ptal")).await;
        assert!(matches!(outcome, Outcome::Rejected { .. }));
        assert!(app.registry.features("ptal").is_empty());
        assert!(!app.registry.is_visible("ptal"));
        assert!(matches!(load_state(&app, "ptal"), LoadState::Failed(_)));
    }

    #[tokio::test]
    async fn test_failed_heavy_load_retries_on_enable() {
        let dir = tempfile::tempdir().unwrap();
        let config = DashboardConfig {
            data_dir: dir.path().to_path_buf(),
            batch_size: 2,
            preload: Vec::new(),
            ..Default::default()
        };
        let mut app = AppState::new(config);

        assert!(matches!(app.dispatch(enable("ptal")).await, Outcome::Rejected { .. }));
        assert!(!app.registry.is_visible("ptal"));

        std::fs::write(dir.path().join("ptal.geojson"), ptal(3)).unwrap();
        match app.dispatch(enable("ptal")).await {
            Outcome::Visibility { change, loaded, .. } => {
                assert_eq!(change, VisibilityChange::NeedsLoad);
                assert_eq!(loaded.unwrap().features_loaded, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        drain_loads(&mut app).await;
        assert!(app.registry.is_visible("ptal"));
        assert_eq!(app.registry.features("ptal").len(), 3);
        assert_eq!(load_state(&app, "ptal"), LoadState::Loaded);
    }

    #[tokio::test]
    async fn test_reset_restores_ptal_classes() {
        let mut app = state(StaticSource::new().with("ptal.geojson", ptal(4)));
        app.dispatch(enable("ptal")).await;
        drain_loads(&mut app).await;

        let red = Color::Rgb(0xff, 0, 0);
        let outcome = app
            .dispatch(Intent::SetStyle {
                layer: "ptal".into(),
                spec: StyleSpec::fill_color(ChannelSpec::simple(red)),
            })
            .await;
        assert!(matches!(outcome, Outcome::Styled { restyled: 4, .. }));
        assert!(app.registry.walk("ptal").all(|f| f.style.fill_color == red));

        app.dispatch(Intent::ResetStyle {
            layer: "ptal".into(),
        })
        .await;
        for rendered in app.registry.walk("ptal") {
            assert_eq!(rendered.style, Category::Ptal.default_style(&rendered.feature));
        }
        let fills: Vec<String> = app
            .registry
            .walk("ptal")
            .map(|f| f.style.fill_color.to_string())
            .collect();
        assert_eq!(fills, vec!["#08306b", "#6baed6", "#fed976", "#99000d"]);
    }

    #[tokio::test]
    async fn test_filter_then_click() {
        let mut app = state(StaticSource::new().with("housing.geojson", housing()));
        app.dispatch(Intent::LoadInitial).await;

        let outcome = app
            .dispatch(Intent::SetFilter {
                layer: "housing".into(),
                logic: FilterLogic::And,
                filters: vec![FilterClause::new("Layer", FilterOperator::Equals, "l1", None).unwrap()],
            })
            .await;
        match outcome {
            Outcome::Filtered {
                stats, clause_ids, ..
            } => {
                assert_eq!(stats.matched, 2);
                assert_eq!(stats.excluded, 1);
                assert_eq!(clause_ids.len(), 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // 被过滤掉的 L2 不可拾取
        let (x, y) = pixel_of(&app, -2.58, 51.45);
        let outcome = app
            .dispatch(Intent::ClickAt {
                lon: -2.58,
                lat: 51.45,
                x,
                y,
            })
            .await;
        match outcome {
            Outcome::Popup { effects } => assert!(effects.is_empty()),
            other => panic!("unexpected outcome {:?}", other),
        }

        let (x, y) = pixel_of(&app, -2.60, 51.45);
        let outcome = app
            .dispatch(Intent::ClickAt {
                lon: -2.60,
                lat: 51.45,
                x,
                y,
            })
            .await;
        match outcome {
            Outcome::Popup { effects } => {
                assert!(matches!(effects.last(), Some(PopupEffect::Open(_))));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(app.popup.is_open());

        // 编辑会先关闭弹窗
        let outcome = app
            .dispatch(Intent::ClearFilter {
                layer: "housing".into(),
            })
            .await;
        match outcome {
            Outcome::Filtered { stats, popup, .. } => {
                assert_eq!(stats.matched, 3);
                assert_eq!(popup, vec![PopupEffect::Close]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!app.popup.is_open());
    }

    #[tokio::test]
    async fn test_invalid_filter_keeps_state() {
        let mut app = state(StaticSource::new().with("housing.geojson", housing()));
        app.dispatch(Intent::LoadInitial).await;

        let outcome = app
            .dispatch(Intent::AddFilter {
                layer: "housing".into(),
                clause: FilterClause {
                    attribute: "Units".into(),
                    operator: FilterOperator::Between,
                    value: "10".into(),
                    value2: None,
                },
            })
            .await;
        match outcome {
            Outcome::Rejected { message } => assert!(message.contains("both values")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(app.filters.filter_of("housing").is_none());
    }

    #[tokio::test]
    async fn test_style_and_describe() {
        let mut app = state(StaticSource::new().with("housing.geojson", housing()));
        app.dispatch(Intent::LoadInitial).await;

        let spec = StyleSpec::fill_color(ChannelSpec::simple(Color::Rgb(0x33, 0x66, 0x99)));
        let outcome = app
            .dispatch(Intent::SetStyle {
                layer: "housing".into(),
                spec,
            })
            .await;
        assert!(matches!(outcome, Outcome::Styled { restyled: 3, .. }));

        match app
            .dispatch(Intent::DescribeLayer {
                layer: "housing".into(),
            })
            .await
        {
            Outcome::LayerDetails(details) => {
                assert!(details.style_active);
                assert!(details.attributes.contains(&"Units".to_string()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let outcome = app
            .dispatch(Intent::ResetStyle {
                layer: "housing".into(),
            })
            .await;
        assert!(matches!(outcome, Outcome::Styled { restyled: 3, .. }));
        assert!(app.styles.style_of("housing").is_none());
    }

    #[tokio::test]
    async fn test_zoom_to_layer() {
        let mut app = state(StaticSource::new().with("housing.geojson", housing()));
        app.dispatch(Intent::LoadInitial).await;

        match app
            .dispatch(Intent::ZoomToLayer {
                layer: "housing".into(),
            })
            .await
        {
            Outcome::View { view } => {
                assert!((view.center.lon() - -2.58).abs() < 1e-6);
                assert!(view.zoom > 11.0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let outcome = app
            .dispatch(Intent::ZoomToLayer {
                layer: "ptal".into(),
            })
            .await;
        assert!(matches!(outcome, Outcome::Rejected { .. }));
    }
}
