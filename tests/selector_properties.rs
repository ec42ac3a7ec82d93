mod common;

use carbon_query::analyzer::QueryAnalyzer;
use carbon_query::carbon::reading::Forecast;
use carbon_query::compiler::{ExecutionStrategy, VariantCompiler, VariantSet};
use carbon_query::error::{CarbonQueryError, Result};
use carbon_query::profiler::EnergyProfiler;
use carbon_query::selector::{CarbonAwareSelector, Urgency};
use chrono::Duration;
use common::{reading, FakeCarbon};
use carbon_query::CarbonIntensitySource;

fn variants() -> VariantSet {
    VariantCompiler::with_parallelism(8).compile("SELECT region, SUM(amount) FROM sales GROUP BY region")
}

async fn no_forecast(_: Duration) -> Result<Forecast> {
    Err(CarbonQueryError::Carbon("forecast should not be requested".to_string()))
}

#[tokio::test]
async fn critical_always_runs_fast() {
    let selector = CarbonAwareSelector::default();
    for carbon in [0.0, 150.0, 400.0, 450.0, 900.0] {
        let decision = selector
            .select(Urgency::Critical, &reading(carbon), no_forecast, &variants())
            .await;
        assert_eq!(decision.strategy(), ExecutionStrategy::Fast);
        assert!(!decision.should_defer);
        assert_eq!(decision.defer_minutes, 0);
    }
}

#[tokio::test]
async fn low_urgency_clean_grid_runs_balanced() {
    let decision = CarbonAwareSelector::default()
        .select(Urgency::Low, &reading(200.0), no_forecast, &variants())
        .await;
    assert_eq!(decision.strategy(), ExecutionStrategy::Balanced);
    assert!(!decision.should_defer);
}

#[tokio::test]
async fn low_urgency_dirty_grid_defers() {
    let source = FakeCarbon::new(Some(450.0), Some(vec![(1, 440.0, 10.0), (3, 420.0, 15.0)]));
    let decision = CarbonAwareSelector::default()
        .select(Urgency::Low, &reading(450.0), |h| source.get_forecast(h), &variants())
        .await;
    assert!(decision.should_defer);
    assert_eq!(decision.strategy(), ExecutionStrategy::Balanced);
    assert!(decision.defer_minutes > 0);
    assert_eq!(decision.defer_minutes, 180);
    assert_eq!(source.forecast_calls(), 1);
}

#[tokio::test]
async fn high_urgency_dirty_grid_runs_balanced() {
    let decision = CarbonAwareSelector::default()
        .select(Urgency::High, &reading(450.0), no_forecast, &variants())
        .await;
    assert_eq!(decision.strategy(), ExecutionStrategy::Balanced);
    assert!(!decision.should_defer);
}

#[tokio::test]
async fn forecast_failure_defers_sixty_minutes() {
    let source = FakeCarbon::new(Some(450.0), None);
    let decision = CarbonAwareSelector::default()
        .select(Urgency::Batch, &reading(450.0), |h| source.get_forecast(h), &variants())
        .await;
    assert!(decision.should_defer);
    assert_eq!(decision.defer_minutes, 60);
}

#[tokio::test]
async fn deferral_never_shorter_than_fifteen_minutes() {
    for hours in [0, 1, 2, 5] {
        let source = FakeCarbon::new(Some(480.0), Some(vec![(hours, 460.0, 0.0)]));
        let decision = CarbonAwareSelector::default()
            .select(Urgency::Low, &reading(480.0), |h| source.get_forecast(h), &variants())
            .await;
        assert!(decision.should_defer);
        assert!(decision.defer_minutes >= 15);
    }
}

#[tokio::test]
async fn uncertain_forecast_below_threshold_runs_now() {
    let source = FakeCarbon::new(Some(450.0), Some(vec![(2, 410.0, 25.0)]));
    let decision = CarbonAwareSelector::default()
        .select(Urgency::Low, &reading(450.0), |h| source.get_forecast(h), &variants())
        .await;
    assert!(!decision.should_defer);
    assert_eq!(decision.strategy(), ExecutionStrategy::Balanced);
}

#[test]
fn compiled_variants_are_ordered() {
    let compiler = VariantCompiler::with_parallelism(8);
    for sql in [
        "SELECT 1",
        "SELECT * FROM t WHERE a > 1",
        "SELECT c.segment, COUNT(*) FROM orders o JOIN customers c ON o.cid = c.id GROUP BY c.segment ORDER BY 2",
    ] {
        let variants = compiler.compile(sql);
        let fast = &variants[ExecutionStrategy::Fast];
        let balanced = &variants[ExecutionStrategy::Balanced];
        let efficient = &variants[ExecutionStrategy::Efficient];

        let strategies: Vec<_> = variants.iter().map(|(s, v)| (s, v.strategy)).collect();
        assert!(strategies.iter().all(|(slot, strategy)| slot == strategy));

        assert!(fast.estimated_latency_ms < balanced.estimated_latency_ms);
        assert!(balanced.estimated_latency_ms < efficient.estimated_latency_ms);
        assert!(efficient.estimated_energy_j < balanced.estimated_energy_j);
        assert!(balanced.estimated_energy_j < fast.estimated_energy_j);
    }
}

#[test]
fn reference_query_features() {
    let sql = "SELECT COUNT(*) FROM orders o JOIN customers c ON o.cid=c.id WHERE o.amount>100 GROUP BY c.segment ORDER BY c.segment";
    let analyzer = QueryAnalyzer::new();
    let features = analyzer.analyze(sql);

    assert!(features.has_join);
    assert!(features.has_aggregation);
    assert!(features.has_sort);
    assert!(features.tables.contains(&"orders".to_string()));
    assert!(features.tables.contains(&"customers".to_string()));
    assert!((0.05..=0.95).contains(&features.selectivity));
    assert!(features.complexity_score >= 1.0);

    assert_eq!(features, analyzer.analyze(sql));
}

#[tokio::test]
async fn single_trial_has_zero_std_dev() {
    let profiler = EnergyProfiler::without_counter();
    let (_, aggregate) = profiler.profile_with_uncertainty(|| async { Ok(7) }, 1).await.unwrap();
    assert_eq!(aggregate.energy_std_dev_joules, 0.0);
    assert_eq!(aggregate.iterations, 1);
}
