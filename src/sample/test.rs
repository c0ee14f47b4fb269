use super::*;
use crate::count::CounterConfig;
use crate::ffi::bindings as b;
use crate::registry::{RatioMetric, TimeEvent};

fn registry() -> CounterDefinition {
    let mut registry = CounterDefinition::empty();
    let hw = |config: u32| CounterConfig::new(b::PERF_TYPE_HARDWARE, config as _);
    registry.add("cycles", hw(b::PERF_COUNT_HW_CPU_CYCLES));
    registry.add("instructions", hw(b::PERF_COUNT_HW_INSTRUCTIONS));
    registry.add_metric(RatioMetric::new("instructions-per-cycle", "instructions", "cycles"));
    registry.add_time_event("seconds", TimeEvent::Seconds);
    registry
}

fn sample(id: u64, timestamp: Option<u64>) -> Sample {
    Sample {
        metadata: Metadata {
            sample_id: Some(id),
            timestamp,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_sort_by_timestamp() {
    let mut samples = vec![
        sample(0, Some(30)),
        sample(1, None),
        sample(2, Some(10)),
        sample(3, None),
        sample(4, Some(20)),
    ];
    sort_by_timestamp(&mut samples);

    let order: Vec<_> = samples
        .iter()
        .map(|it| (it.metadata.sample_id, it.metadata.timestamp))
        .collect();
    assert_eq!(
        order,
        vec![
            (Some(2), Some(10)),
            (Some(4), Some(20)),
            (Some(0), Some(30)),
            (Some(1), None),
            (Some(3), None),
        ]
    );
}

fn sample_record(fields: &[u64]) -> Vec<u8> {
    let size = (8 + fields.len() * 8) as u16;
    let mut buf = vec![];
    buf.extend(b::PERF_RECORD_SAMPLE.to_ne_bytes());
    buf.extend((b::PERF_RECORD_MISC_USER as u16).to_ne_bytes());
    buf.extend(size.to_ne_bytes());
    buf.extend(fields.iter().flat_map(|it| it.to_ne_bytes()));
    buf
}

#[test]
fn test_decoded_chunks_sort_by_timestamp() {
    let registry = registry();
    let timed = Values {
        instruction_pointer: true,
        timestamp: true,
        ..Default::default()
    };
    let untimed = Values {
        instruction_pointer: true,
        ..Default::default()
    };
    // ip, time
    let chunks = [
        sample_record(&[0x30, 30]),
        sample_record(&[0x10, 10]),
        sample_record(&[0x20, 20]),
    ];
    // A second trigger group without timestamps.
    let other = [sample_record(&[0x40]), sample_record(&[0x50])];

    let decode = || {
        let decoder = Decoder::new(&registry, &timed, VendorDecoder::Generic);
        let mut samples: Vec<_> = chunks.iter().flat_map(|it| decoder.decode(it)).collect();
        let decoder = Decoder::new(&registry, &untimed, VendorDecoder::Generic);
        samples.extend(other.iter().flat_map(|it| decoder.decode(it)));
        samples
    };
    let ips = |samples: &[Sample]| -> Vec<_> {
        samples
            .iter()
            .map(|it| it.instruction_execution.logical_instruction_pointer)
            .collect()
    };

    let arrival = decode();
    assert_eq!(
        ips(&arrival),
        vec![Some(0x30), Some(0x10), Some(0x20), Some(0x40), Some(0x50)]
    );

    let mut sorted = arrival;
    sort_by_timestamp(&mut sorted);
    assert_eq!(
        ips(&sorted),
        vec![Some(0x10), Some(0x20), Some(0x30), Some(0x40), Some(0x50)]
    );
    let times: Vec<_> = sorted.iter().map(|it| it.metadata.timestamp).collect();
    assert_eq!(times, vec![Some(10), Some(20), Some(30), None, None]);
}

#[test]
fn test_sort_keeps_equal_timestamps_in_order() {
    let mut samples = vec![sample(0, Some(5)), sample(1, Some(5)), sample(2, Some(1))];
    sort_by_timestamp(&mut samples);

    let ids: Vec<_> = samples.iter().map(|it| it.metadata.sample_id).collect();
    assert_eq!(ids, vec![Some(2), Some(0), Some(1)]);
}

#[test]
fn test_start_without_triggers() {
    let registry = registry();
    let mut sampler = Sampler::new(&registry);
    assert!(matches!(sampler.start(), Err(Error::EmptySampler)));
    assert!(!sampler.is_open());
    assert!(sampler.counters().is_empty());

    // Still configurable.
    sampler.trigger("cycles").unwrap();
    assert_eq!(sampler.triggers().len(), 1);
}

#[test]
fn test_reject_metric_and_time_triggers() {
    let registry = registry();
    let mut sampler = Sampler::new(&registry);
    assert!(matches!(
        sampler.trigger("instructions-per-cycle"),
        Err(Error::MetricAsTrigger(name)) if name == "instructions-per-cycle"
    ));
    assert!(matches!(
        sampler.trigger("seconds"),
        Err(Error::TimeEventAsTrigger(name)) if name == "seconds"
    ));
    assert!(matches!(
        sampler.trigger("no-such-event"),
        Err(Error::UnknownEventOrMetric(_))
    ));
    assert!(sampler.triggers().is_empty());
}

#[test]
fn test_rejected_group_adds_nothing() {
    let registry = registry();
    let mut sampler = Sampler::new(&registry);
    let added = sampler.trigger_group(["cycles", "seconds"]);
    assert!(matches!(added, Err(Error::TimeEventAsTrigger(_))));
    assert!(sampler.triggers().is_empty());
}

#[test]
fn test_trigger_groups() {
    let registry = registry();
    let mut sampler = Sampler::new(&registry);
    sampler
        .trigger_group([
            Trigger::new("cycles").with_precision(Precision::RequestZeroSkid),
            Trigger::new("instructions").with_period_or_frequency(PeriodOrFrequency::Frequency(1000)),
        ])
        .unwrap();
    sampler.triggers_each(["cycles", "instructions"]).unwrap();
    sampler.trigger_group(Vec::<Trigger>::new()).unwrap();

    let shape: Vec<_> = sampler.triggers().iter().map(Vec::len).collect();
    assert_eq!(shape, vec![2, 1, 1]);
    let first = &sampler.triggers()[0];
    assert_eq!(first[0].precision, Some(Precision::RequestZeroSkid));
    assert_eq!(first[0].period_or_frequency, None);
    assert_eq!(first[1].period_or_frequency, Some(PeriodOrFrequency::Frequency(1000)));
}

#[test]
fn test_unopened_sampler_has_no_data() {
    let registry = registry();
    let mut sampler = Sampler::new(&registry);
    sampler.trigger("cycles").unwrap();
    assert!(sampler.consume_sample_data().is_empty());
    assert!(sampler.result(true).is_empty());
    assert!(sampler.stop().is_ok());

    sampler.close();
    sampler.close();
    assert!(!sampler.is_open());
    assert!(matches!(sampler.start(), Err(Error::GroupNotOpened)));
}

#[test]
#[ignore = "needs a hardware PMU"]
fn test_sample_cycles() {
    let registry = CounterDefinition::new();
    let mut sampler = Sampler::new(&registry);
    sampler
        .trigger(Trigger::new("cycles").with_period_or_frequency(PeriodOrFrequency::Period(10_000)))
        .unwrap();
    *sampler.values_mut() = Values {
        instruction_pointer: true,
        timestamp: true,
        thread_id: true,
        counter: vec!["instructions".into()],
        ..Default::default()
    };

    sampler.start().unwrap();
    assert!(matches!(sampler.start(), Err(Error::SamplerAlreadyStarted)));
    assert!(matches!(sampler.trigger("instructions"), Err(Error::TriggersFrozen)));
    let sum = (0..10_000_000u64).fold(0u64, |acc, it| acc.wrapping_add(it * it));
    sampler.stop().unwrap();
    assert_ne!(sum, 1);

    let samples: Vec<_> = sampler
        .result(true)
        .into_iter()
        .filter(Sample::is_sample)
        .collect();
    assert!(!samples.is_empty());
    assert!(samples
        .windows(2)
        .all(|it| it[0].metadata.timestamp <= it[1].metadata.timestamp));
    for sample in &samples {
        assert!(sample.instruction_execution.logical_instruction_pointer.is_some());
        assert!(sample.metadata.thread_id.is_some());
        let counter = sample.counter.as_ref().unwrap();
        assert!(counter.get("instructions").is_some());
    }

    assert!(sampler.result(false).is_empty());
    sampler.close();
    sampler.close();
}
