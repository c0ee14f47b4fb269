use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CounterDefinition, HitRatio, Metric, RatioMetric, TimeEvent, DEFAULT_PMU};
use crate::count::{CounterConfig, CounterResult};
use crate::ffi::bindings as b;

fn result(values: &[(&str, f64)]) -> CounterResult {
    values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn test_builtin_events() {
    let registry = CounterDefinition::new();

    let (pmu, name, config) = registry.counter("instructions").unwrap();
    assert_eq!((pmu, name), (DEFAULT_PMU, "instructions"));
    assert_eq!(config.ty, b::PERF_TYPE_HARDWARE);
    assert_eq!(config.config, b::PERF_COUNT_HW_INSTRUCTIONS as u64);

    let (_, _, config) = registry.counter("L1-dcache-load-misses").unwrap();
    assert_eq!(config.ty, b::PERF_TYPE_HW_CACHE);
    let expected = b::PERF_COUNT_HW_CACHE_L1D as u64
        | (b::PERF_COUNT_HW_CACHE_OP_READ as u64) << 8
        | (b::PERF_COUNT_HW_CACHE_RESULT_MISS as u64) << 16;
    assert_eq!(config.config, expected);

    let (_, _, config) = registry.counter("task-clock").unwrap();
    assert_eq!(config.ty, b::PERF_TYPE_SOFTWARE);

    assert!(registry.counter("no-such-event").is_none());
}

#[test]
fn test_builtin_metrics_and_time_events() {
    let registry = CounterDefinition::new();
    for name in [
        "instructions-per-cycle",
        "cycles-per-instruction",
        "cache-hit-ratio",
        "cache-miss-ratio",
        "dTLB-miss-ratio",
        "iTLB-miss-ratio",
        "L1-data-miss-ratio",
        "branch-miss-ratio",
        "gigahertz",
    ] {
        assert!(registry.is_metric(name), "{name}");
        // Every dependency is known to the registry.
        for dependency in registry.metric(name).unwrap().required_counter_names() {
            assert!(
                registry.counter(&dependency).is_some() || registry.is_time_event(&dependency),
                "{dependency}"
            );
        }
    }
    for name in ["seconds", "milliseconds", "microseconds", "nanoseconds"] {
        assert!(registry.is_time_event(name));
        assert!(!registry.is_metric(name));
    }
}

#[test]
fn test_parent_fallback() {
    let mut base = CounterDefinition::empty();
    base.add("cycles", CounterConfig::new(b::PERF_TYPE_HARDWARE, 0));
    base.add_time_event("seconds", TimeEvent::Seconds);
    let base = Arc::new(base);

    let mut registry = CounterDefinition::with_parent(Arc::clone(&base));
    registry.add("cycles", CounterConfig::new(b::PERF_TYPE_RAW, 0x3c));
    registry.add_in("uncore", "bandwidth", CounterConfig::new(42, 1));

    // The child shadows its parent.
    let (_, _, config) = registry.counter("cycles").unwrap();
    assert_eq!(config.ty, b::PERF_TYPE_RAW);
    assert_eq!(base.counter("cycles").unwrap().2.ty, b::PERF_TYPE_HARDWARE);

    assert!(registry.is_time_event("seconds"));
    let (pmu, _, _) = registry.counter("bandwidth").unwrap();
    assert_eq!(pmu, "uncore");
    assert!(registry.counter_in(DEFAULT_PMU, "bandwidth").is_none());
    assert_eq!(registry.pmu_names(), vec!["cpu".to_owned(), "uncore".to_owned()]);
}

#[test]
fn test_ratio_metric() {
    let ipc = RatioMetric::new("ipc", "instructions", "cycles");
    assert_eq!(ipc.required_counter_names(), vec!["instructions", "cycles"]);
    assert_eq!(ipc.calculate(&result(&[("instructions", 30.0), ("cycles", 10.0)])), Some(3.0));
    assert_eq!(ipc.calculate(&result(&[("instructions", 30.0), ("cycles", 0.0)])), None);
    assert_eq!(ipc.calculate(&result(&[("instructions", 30.0)])), None);

    let ghz = RatioMetric::new("gigahertz", "cycles", "seconds").scaled(1e-9);
    let value = ghz.calculate(&result(&[("cycles", 3e9), ("seconds", 1.0)])).unwrap();
    assert!((value - 3.0).abs() < 1e-9);
}

#[test]
fn test_hit_ratio() {
    let ratio = HitRatio::new("cache-hit-ratio", "cache-references", "cache-misses");
    let value = ratio.calculate(&result(&[("cache-references", 100.0), ("cache-misses", 25.0)]));
    assert_eq!(value, Some(0.75));
    let value = ratio.calculate(&result(&[("cache-references", 0.0), ("cache-misses", 0.0)]));
    assert_eq!(value, None);
}

#[test]
fn test_time_event_units() {
    let start = Instant::now();
    let end = start + Duration::from_millis(1500);
    assert_eq!(TimeEvent::Seconds.calculate(start, end), 1.5);
    assert_eq!(TimeEvent::Milliseconds.calculate(start, end), 1500.0);
    assert_eq!(TimeEvent::Microseconds.calculate(start, end), 1_500_000.0);
    assert_eq!(TimeEvent::Nanoseconds.calculate(start, end), 1_500_000_000.0);
    // End before start is an empty interval.
    assert_eq!(TimeEvent::Seconds.calculate(end, start), 0.0);
}
