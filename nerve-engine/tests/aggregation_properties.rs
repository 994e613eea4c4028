//! Aggregation Engine Behavior Tests
//!
//! Window containment, percentiles, backpressure, correlation, fusion,
//! hierarchy and retention, driven through the actor handle on a mock clock.

use nerve_core::{Clock, MockTimeProvider, ScriptedRandom, StdRandom};
use nerve_engine::{
    AggregateQuery, Aggregation, Aggregator, AggregatorConfig, AggregatorHandle, AggregatorState,
    FusionType, IngestOutcome,
};
use nerve_event::{Event, Metadata};
use serde_json::json;

// Multiple of the 60s bucket so `now - window` lands on a bucket boundary
const NOW: u64 = 1_700_000_040;

fn spawn(config: AggregatorConfig) -> (Aggregator, AggregatorHandle, MockTimeProvider) {
    let mock = MockTimeProvider::at_secs(NOW);
    let aggregator = Aggregator::spawn_with(
        config,
        Clock::with_mock(mock.clone()),
        Box::new(ScriptedRandom::new(vec![])),
    )
    .unwrap();
    let handle = aggregator.handle();
    (aggregator, handle, mock)
}

fn now() -> i64 {
    NOW as i64
}

// -----------------------------------------------------------------------------
// Window aggregates
// -----------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_window_containment() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());

    for offset in [-180, -121, -61, -60, -59, -30, 0] {
        handle
            .add_event(Event::new("temp", now() + offset).with_value(offset as f64))
            .await?;
    }

    let aggregates = handle
        .window_aggregates(
            AggregateQuery::new()
                .event_type("temp")
                .window_size_secs(60)
                .aggregations(&[Aggregation::Count, Aggregation::Min, Aggregation::Max]),
        )
        .await?;

    // Every candidate has a timestamp within [now - 60, now]
    assert_eq!(aggregates.count(), Some(4));
    assert_eq!(aggregates.min(), Some(-60.0));
    assert_eq!(aggregates.max(), Some(0.0));

    let wider = handle
        .window_aggregates(AggregateQuery::new().window_size_secs(120))
        .await?;
    assert_eq!(wider.count(), Some(5));

    aggregator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_percentiles_over_window() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());

    for v in [4.0, 2.0, 5.0, 1.0, 3.0] {
        handle
            .add_event(Event::new("latency", now()).with_value(v))
            .await?;
    }
    handle
        .add_event(Event::new("latency", now()).with_metadata("note", "no value"))
        .await?;

    let aggregates = handle
        .window_aggregates(
            AggregateQuery::new()
                .event_type("latency")
                .aggregations(&[Aggregation::Count, Aggregation::Avg, Aggregation::Percentiles]),
        )
        .await?;

    assert_eq!(aggregates.count(), Some(6));
    assert_eq!(aggregates.avg(), Some(3.0));
    let p = aggregates.percentiles().unwrap();
    assert_eq!(p.p50, 3.0);
    assert_eq!(p.p99, 5.0);

    aggregator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_empty_window_defaults() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());

    let aggregates = handle
        .window_aggregates(AggregateQuery::new().event_type("missing"))
        .await?;
    assert_eq!(aggregates.count(), Some(0));
    assert_eq!(aggregates.avg(), Some(0.0));

    aggregator.shutdown().await;
    Ok(())
}

// -----------------------------------------------------------------------------
// Backpressure
// -----------------------------------------------------------------------------

#[test]
fn test_backpressure_sheds_about_half() {
    let mock = MockTimeProvider::at_secs(NOW);
    let mut state = AggregatorState::with_sources(
        AggregatorConfig::default(),
        Clock::with_mock(mock),
        Box::new(StdRandom::seeded(7)),
    )
    .unwrap();

    // All within the same millisecond
    for _ in 0..10_001 {
        assert!(state.add_event(Event::new("flood", now())).is_accepted());
    }
    let stats = state.stream_stats();
    assert!(stats.backpressure_active);
    assert_eq!(stats.current_load, 10_001);

    let accepted = (0..1000)
        .filter(|_| {
            matches!(
                state.add_event(Event::new("flood", now())),
                IngestOutcome::Accepted(_)
            )
        })
        .count();
    assert!((400..=600).contains(&accepted), "accepted {accepted}");

    let stats = state.stream_stats();
    assert_eq!(stats.dropped_events, (1000 - accepted) as u64);
    assert_eq!(stats.total_events, 10_001 + accepted as u64);
}

#[tokio::test]
async fn test_backpressure_releases_when_rate_falls() -> anyhow::Result<()> {
    let config = AggregatorConfig {
        backpressure_threshold: 5,
        ..Default::default()
    };
    let (aggregator, handle, mock) = spawn(config);

    for _ in 0..6 {
        handle.add_event(Event::new("burst", now())).await?;
    }
    assert!(handle.stream_stats().await?.backpressure_active);

    // The scripted source yields 0.0 forever: everything is dropped while engaged
    handle.add_event(Event::new("burst", now())).await?;
    assert_eq!(handle.stream_stats().await?.dropped_events, 1);

    // Recomputed on the next accepted ingestion, here a fused event
    mock.set_secs(NOW + 2);
    handle
        .fuse_events(vec![Event::new("burst", now())], FusionType::Temporal)
        .await?;
    let stats = handle.stream_stats().await?;
    assert!(!stats.backpressure_active);
    assert_eq!(stats.current_load, 1);

    aggregator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_try_add_event_reports_full_inbox() -> anyhow::Result<()> {
    let config = AggregatorConfig {
        inbox_capacity: 1,
        ..Default::default()
    };
    let (aggregator, handle, _) = spawn(config);

    // Current-thread runtime: the actor cannot drain until we yield
    handle.try_add_event(Event::new("a", now()))?;
    assert!(matches!(
        handle.try_add_event(Event::new("a", now())),
        Err(nerve_engine::AggregatorError::Full)
    ));

    assert_eq!(handle.stream_stats().await?.total_events, 1);
    aggregator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_extreme_timestamps_keep_the_actor_alive() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());

    handle.add_event(Event::new("edge", i64::MIN)).await?;
    handle.add_event(Event::new("edge", i64::MAX)).await?;
    let fused = handle
        .fuse_events(
            vec![Event::new("edge", i64::MIN), Event::new("edge", i64::MAX)],
            FusionType::Temporal,
        )
        .await?;
    assert_eq!(fused.metadata["timeSpan"], json!(i64::MAX));

    let stats = handle.stream_stats().await?;
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.events_by_type.get("edge"), Some(&2));

    aggregator.shutdown().await;
    Ok(())
}

// -----------------------------------------------------------------------------
// Correlation
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_correlation_strengths() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());

    for t in [now() - 40, now() - 20, now()] {
        handle.add_event(Event::new("cpu_spike", t)).await?;
        handle.add_event(Event::new("latency_spike", t - 2)).await?;
    }
    handle.add_event(Event::new("deploy", now() - 50)).await?;

    let report = handle
        .correlated_events(
            vec![
                "latency_spike".into(),
                "cpu_spike".into(),
                "deploy".into(),
                "cpu_spike".into(),
            ],
            60,
        )
        .await?;

    assert_eq!(report.strength("cpu_spike", "latency_spike"), Some(1.0));
    assert_eq!(report.strength("deploy", "cpu_spike"), Some(0.0));
    assert_eq!(report.correlations.len(), 3);
    assert_eq!(report.event_counts.get("cpu_spike"), Some(&3));
    assert_eq!(report.event_counts.get("deploy"), Some(&1));
    assert_eq!(report.time_window_secs, 60);

    aggregator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_correlation_with_absent_type() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());
    handle.add_event(Event::new("a", now())).await?;

    let report = handle
        .correlated_events(vec!["a".into(), "ghost".into()], 60)
        .await?;
    assert_eq!(report.strength("a", "ghost"), Some(0.0));
    assert_eq!(report.event_counts.get("ghost"), Some(&0));

    aggregator.shutdown().await;
    Ok(())
}

// -----------------------------------------------------------------------------
// Composite events
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_statistical_fusion() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());

    let sources: Vec<Event> = [10.0, 20.0, 30.0]
        .iter()
        .map(|v| Event::new("reading", now() - 5).with_value(*v))
        .collect();
    let fused = handle
        .fuse_events(sources, FusionType::Statistical)
        .await?;

    assert_eq!(fused.event_type, "fused_statistical");
    assert_eq!(fused.timestamp, now());
    assert_eq!(fused.value, Some(20.0));
    assert_eq!(fused.metadata["avg"], json!(20.0));
    assert_eq!(fused.metadata["min"], json!(10.0));
    assert_eq!(fused.metadata["max"], json!(30.0));
    assert_eq!(fused.metadata["count"], json!(3));

    let stats = handle.stream_stats().await?;
    assert_eq!(stats.events_by_type.get("fused_statistical"), Some(&1));

    aggregator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_hierarchy_roundtrip() -> anyhow::Result<()> {
    let (aggregator, handle, _) = spawn(AggregatorConfig::default());

    let children = vec![
        Event::new("auth_failure", now() - 3),
        Event::new("port_scan", now() - 2),
        Event::new("auth_failure", now() - 1),
    ];
    let mut metadata = Metadata::new();
    metadata.insert("severity".into(), json!("high"));

    let parent = handle
        .create_hierarchical_event("intrusion_attempt", children, metadata)
        .await?;
    assert!(parent.hierarchical);
    assert_eq!(parent.metadata["childCount"], json!(3));
    assert_eq!(
        parent.metadata["childTypes"],
        json!(["auth_failure", "port_scan"])
    );

    let stored = handle.hierarchy(parent.id.clone()).await?.unwrap();
    assert_eq!(stored.parent.id, parent.id);
    assert_eq!(stored.children[1].event_type, "port_scan");
    assert!(handle.hierarchy("nope").await?.is_none());

    let stats = handle.stream_stats().await?;
    assert_eq!(stats.hierarchical_count, 1);
    assert_eq!(stats.total_events, 1);

    aggregator.shutdown().await;
    Ok(())
}

// -----------------------------------------------------------------------------
// Retention
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_cleanup_after_retention() -> anyhow::Result<()> {
    let (aggregator, handle, mock) = spawn(AggregatorConfig::default());

    handle.add_event(Event::new("a", now() - 120)).await?;
    handle.add_event(Event::new("b", now())).await?;
    handle
        .create_hierarchical_event("group", vec![Event::new("a", now())], Metadata::new())
        .await?;
    assert_eq!(handle.stream_stats().await?.window_count, 3);

    // Nothing is older than an hour yet
    assert_eq!(handle.run_cleanup().await?.total(), 0);

    mock.set_secs(NOW + 3_600 - 60);
    let report = handle.run_cleanup().await?;
    assert_eq!(report.windows_removed, 1);
    assert_eq!(report.hierarchies_removed, 0);

    mock.set_secs(NOW + 3_601);
    let report = handle.run_cleanup().await?;
    assert_eq!(report.windows_removed, 2);
    assert_eq!(report.hierarchies_removed, 1);

    let stats = handle.stream_stats().await?;
    assert_eq!(stats.window_count, 0);
    assert_eq!(stats.hierarchical_count, 0);
    // Counters are cumulative and survive cleanup
    assert_eq!(stats.total_events, 3);

    aggregator.shutdown().await;
    Ok(())
}
