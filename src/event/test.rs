use super::{EventKind, RequestedEvent, RequestedEventSet};
use crate::count::{CounterConfig, CounterResult};
use crate::ffi::bindings as b;
use crate::registry::{CounterDefinition, RatioMetric, TimeEvent};
use crate::Error;

fn registry() -> CounterDefinition {
    let mut registry = CounterDefinition::empty();
    registry.add("cycles", CounterConfig::new(b::PERF_TYPE_HARDWARE, 0));
    registry.add("instructions", CounterConfig::new(b::PERF_TYPE_HARDWARE, 1));
    registry.add_metric(RatioMetric::new("instructions-per-cycle", "instructions", "cycles"));
    registry.add_metric(RatioMetric::new("ipc-per-second", "instructions-per-cycle", "seconds"));
    registry.add_time_event("seconds", TimeEvent::Seconds);
    registry
}

fn values(values: &[(&str, f64)]) -> CounterResult {
    values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn names(result: &CounterResult) -> Vec<&str> {
    result.iter().map(|(name, _)| name).collect()
}

#[test]
fn test_add_adjusts_visibility() {
    let mut set = RequestedEventSet::new();
    assert!(set.add(RequestedEvent::hardware("cpu", "cycles", false)));
    assert!(!set.add(RequestedEvent::hardware("cpu", "cycles", true)));
    // A hidden request never hides a visible event.
    assert!(!set.add(RequestedEvent::hardware("cpu", "cycles", false)));
    assert_eq!(set.len(), 1);
    assert!(set.iter().next().unwrap().is_visible());

    // Same name in another PMU is another event.
    assert!(set.add(RequestedEvent::hardware("cpu_core", "cycles", true)));
    assert!(set.contains(Some("cpu_core"), "cycles"));
    assert!(!set.contains(None, "cycles"));
}

#[test]
fn test_result_normalizes_and_evaluates() {
    let registry = registry();
    let mut set = RequestedEventSet::new();
    set.add(RequestedEvent::metric("instructions-per-cycle", true));
    set.add(RequestedEvent::hardware("cpu", "instructions", false).scheduled_at(0, 0));
    set.add(RequestedEvent::hardware("cpu", "cycles", true).scheduled_at(0, 1));
    set.add(RequestedEvent::time("seconds", true));

    let raw = values(&[("instructions", 400.0), ("cycles", 200.0), ("seconds", 2.0)]);
    let result = set.result(&registry, raw, 2).unwrap();

    assert_eq!(names(&result), vec!["instructions-per-cycle", "cycles", "seconds"]);
    assert_eq!(result.get("cycles"), Some(100.0));
    assert_eq!(result.get("instructions-per-cycle"), Some(2.0));
    // Time events are not normalized.
    assert_eq!(result.get("seconds"), Some(2.0));
}

#[test]
fn test_result_zero_normalization() {
    let registry = registry();
    let mut set = RequestedEventSet::new();
    set.add(RequestedEvent::hardware("cpu", "cycles", true));
    let result = set.result(&registry, values(&[("cycles", 7.0)]), 0).unwrap();
    assert_eq!(result.get("cycles"), Some(7.0));
}

#[test]
fn test_nested_metrics_evaluate_in_order() {
    let registry = registry();
    let mut set = RequestedEventSet::new();
    set.add(RequestedEvent::metric("ipc-per-second", true));
    set.add(RequestedEvent::metric("instructions-per-cycle", false));
    set.add(RequestedEvent::hardware("cpu", "instructions", false));
    set.add(RequestedEvent::hardware("cpu", "cycles", false));
    set.add(RequestedEvent::time("seconds", false));

    let raw = values(&[("instructions", 300.0), ("cycles", 100.0), ("seconds", 3.0)]);
    let result = set.result(&registry, raw, 1).unwrap();
    assert_eq!(names(&result), vec!["ipc-per-second"]);
    assert_eq!(result.get("ipc-per-second"), Some(1.0));
}

#[test]
fn test_undefined_metric_is_left_out() {
    let registry = registry();
    let mut set = RequestedEventSet::new();
    set.add(RequestedEvent::metric("instructions-per-cycle", true));
    set.add(RequestedEvent::hardware("cpu", "instructions", true));
    set.add(RequestedEvent::hardware("cpu", "cycles", false));

    let raw = values(&[("instructions", 5.0), ("cycles", 0.0)]);
    let result = set.result(&registry, raw, 1).unwrap();
    assert_eq!(names(&result), vec!["instructions"]);
}

#[test]
fn test_missing_dependency() {
    let registry = registry();
    let mut set = RequestedEventSet::new();
    set.add(RequestedEvent::metric("instructions-per-cycle", true));

    let e = set.result(&registry, values(&[("cycles", 1.0)]), 1).unwrap_err();
    assert!(matches!(
        e,
        Error::UnknownEventForMetric { event, metric }
            if event == "instructions" && metric == "instructions-per-cycle"
    ));
}

#[test]
fn test_cyclic_metrics() {
    let mut registry = registry();
    registry.add_metric(RatioMetric::new("ping", "pong", "cycles"));
    registry.add_metric(RatioMetric::new("pong", "ping", "cycles"));

    let mut set = RequestedEventSet::new();
    set.add(RequestedEvent::metric("ping", true));
    set.add(RequestedEvent::metric("pong", false));
    let e = set.result(&registry, values(&[("cycles", 1.0)]), 1).unwrap_err();
    assert!(matches!(e, Error::CyclicMetrics));
}

#[test]
fn test_event_kinds() {
    assert_eq!(RequestedEvent::metric("m", true).kind(), EventKind::Metric);
    assert_eq!(RequestedEvent::time("t", true).kind(), EventKind::Time);
    let event = RequestedEvent::hardware("cpu", "cycles", true).scheduled_at(3, 1);
    assert_eq!(event.kind(), EventKind::Hardware);
    assert_eq!(event.pmu(), Some("cpu"));
    let scheduled = event.scheduled().unwrap();
    assert_eq!((scheduled.id, scheduled.position), (3, 1));
}
