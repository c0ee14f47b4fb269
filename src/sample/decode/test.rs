use super::{CounterSlot, Decoder, IbsFetchControl, IbsOpData1, IbsOpData2, IbsOpData3, VendorDecoder};
use crate::count::CounterConfig;
use crate::event::{RequestedEvent, RequestedEventSet};
use crate::ffi::bindings as b;
use crate::registry::{CounterDefinition, RatioMetric};
use crate::sample::{AccessType, DataAccess, InstructionType, Mode, Values};

const USER: u16 = b::PERF_RECORD_MISC_USER as u16;

fn record(ty: u32, misc: u16, body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u16;
    let mut buf = vec![];
    buf.extend(ty.to_ne_bytes());
    buf.extend(misc.to_ne_bytes());
    buf.extend(size.to_ne_bytes());
    buf.extend(body);
    buf
}

fn words(words: &[u64]) -> Vec<u8> {
    words.iter().flat_map(|it| it.to_ne_bytes()).collect()
}

fn pair(lo: u32, hi: u32) -> u64 {
    let mut raw = [0; 8];
    raw[..4].copy_from_slice(&lo.to_ne_bytes());
    raw[4..].copy_from_slice(&hi.to_ne_bytes());
    u64::from_ne_bytes(raw)
}

/// A sample carrying only a raw payload of `regs`, prefixed like IBS payloads.
fn raw_sample(regs: &[u64]) -> Vec<u8> {
    let mut raw = vec![0; 4];
    raw.extend(words(regs));
    let mut body = vec![];
    body.extend((raw.len() as u32).to_ne_bytes());
    body.extend(&raw);
    assert_eq!(body.len() % 8, 0);
    record(b::PERF_RECORD_SAMPLE, USER, &body)
}

#[test]
fn test_decode_ip_time_and_counter_values() {
    let mut registry = CounterDefinition::empty();
    registry.add("cycles", CounterConfig::new(b::PERF_TYPE_HARDWARE, 0));
    registry.add("instructions", CounterConfig::new(b::PERF_TYPE_HARDWARE, 1));

    let mut events = RequestedEventSet::new();
    events.add(RequestedEvent::hardware("cpu", "cycles", true).scheduled_at(0, 0));
    events.add(RequestedEvent::hardware("cpu", "instructions", true).scheduled_at(0, 1));
    let slots = vec![
        CounterSlot {
            id: 10,
            name: "cycles".into(),
            scale: 1.0,
        },
        CounterSlot {
            id: 11,
            name: "instructions".into(),
            scale: 1.0,
        },
    ];

    let values = Values {
        instruction_pointer: true,
        timestamp: true,
        counter: vec!["cycles".into(), "instructions".into()],
        ..Default::default()
    };
    // ip, time, read_format { nr, enabled, running, { value, id }[nr] }
    // The kernel does not promise any order of the group values.
    let body = words(&[0x1000, 30, 2, 100, 100, 9, 11, 7, 10]);
    let data = record(b::PERF_RECORD_SAMPLE, USER, &body);

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic).with_counters(&events, slots);
    let samples = decoder.decode(&data);
    assert_eq!(samples.len(), 1);

    let sample = &samples[0];
    assert!(sample.is_sample());
    assert_eq!(sample.metadata.mode, Mode::User);
    assert_eq!(sample.metadata.timestamp, Some(30));
    assert_eq!(sample.instruction_execution.logical_instruction_pointer, Some(0x1000));
    let counter = sample.counter.as_ref().unwrap();
    assert_eq!(counter.len(), 2);
    assert_eq!(counter.get("cycles"), Some(7.0));
    assert_eq!(counter.get("instructions"), Some(9.0));

    // Nothing else is present.
    assert_eq!(sample.metadata.sample_id, None);
    assert_eq!(sample.metadata.period, None);
    assert_eq!(sample.metadata.cpu_id, None);
    assert_eq!(sample.metadata.thread_id, None);
    assert_eq!(sample.instruction_execution.callchain, None);
    assert_eq!(sample.data_access, DataAccess::default());
    assert_eq!(sample.branch_stack, None);
    assert_eq!(sample.raw, None);
    assert_eq!(sample.user_registers, None);
}

#[test]
fn test_counter_values_evaluate_metrics() {
    let mut registry = CounterDefinition::empty();
    registry.add("cycles", CounterConfig::new(b::PERF_TYPE_HARDWARE, 0));
    registry.add("instructions", CounterConfig::new(b::PERF_TYPE_HARDWARE, 1));
    registry.add_metric(RatioMetric::new("ipc", "instructions", "cycles"));

    let mut events = RequestedEventSet::new();
    events.add(RequestedEvent::metric("ipc", true));
    events.add(RequestedEvent::hardware("cpu", "instructions", false).scheduled_at(0, 0));
    events.add(RequestedEvent::hardware("cpu", "cycles", false).scheduled_at(0, 1));
    let slots = vec![
        CounterSlot {
            id: 1,
            name: "instructions".into(),
            scale: 1.0,
        },
        CounterSlot {
            id: 2,
            name: "cycles".into(),
            scale: 2.0,
        },
    ];
    let values = Values {
        counter: vec!["ipc".into()],
        ..Default::default()
    };
    let data = record(b::PERF_RECORD_SAMPLE, USER, &words(&[2, 0, 0, 60, 1, 10, 2]));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic).with_counters(&events, slots);
    let counter = decoder.decode(&data).remove(0).counter.unwrap();
    assert_eq!(counter.iter().collect::<Vec<_>>(), vec![("ipc", 3.0)]);
}

#[test]
fn test_malformed_record_is_skipped() {
    let registry = CounterDefinition::empty();
    let values = Values {
        instruction_pointer: true,
        timestamp: true,
        ..Default::default()
    };
    let mut data = record(b::PERF_RECORD_SAMPLE, USER, &words(&[0x1000]));
    data.extend(record(b::PERF_RECORD_SAMPLE, USER, &words(&[0x2000, 5])));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    let samples = decoder.decode(&data);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].instruction_execution.logical_instruction_pointer, Some(0x2000));
}

#[test]
fn test_untrusted_size_stops_decoding() {
    let registry = CounterDefinition::empty();
    let values = Values {
        instruction_pointer: true,
        ..Default::default()
    };
    // Declares 64 bytes but only has 16.
    let mut data = record(b::PERF_RECORD_SAMPLE, USER, &words(&[0x1000]));
    data[6..8].copy_from_slice(&64u16.to_ne_bytes());

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    assert!(decoder.decode(&data).is_empty());
    assert!(decoder.decode(&data[..5]).is_empty());
}

#[test]
fn test_unrequested_records_are_dropped() {
    let registry = CounterDefinition::empty();
    let values = Values::default();
    let mut data = record(b::PERF_RECORD_THROTTLE, 0, &words(&[1, 2, 3]));
    data.extend(record(b::PERF_RECORD_MMAP, 0, &[0; 16]));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    assert!(decoder.decode(&data).is_empty());
}

#[test]
fn test_decode_lost_samples() {
    let registry = CounterDefinition::empty();
    let values = Values {
        timestamp: true,
        cpu_id: true,
        ..Default::default()
    };
    // lost, then sample_id { time, cpu }
    let data = record(b::PERF_RECORD_LOST_SAMPLES, 0, &words(&[5, 77, pair(3, 0)]));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    let samples = decoder.decode(&data);
    assert_eq!(samples.len(), 1);
    assert!(!samples[0].is_sample());
    assert_eq!(samples[0].count_loss, Some(5));
    assert_eq!(samples[0].metadata.timestamp, Some(77));
    assert_eq!(samples[0].metadata.cpu_id, Some(3));
}

#[test]
fn test_decode_lost_records() {
    let registry = CounterDefinition::empty();
    let values = Values {
        timestamp: true,
        ..Default::default()
    };
    // id, lost, then sample_id { time }
    let data = record(b::PERF_RECORD_LOST, 0, &words(&[42, 9, 120]));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    let samples = decoder.decode(&data);
    assert_eq!(samples.len(), 1);
    assert!(!samples[0].is_sample());
    assert_eq!(samples[0].count_loss, Some(9));
    assert_eq!(samples[0].metadata.sample_id, Some(42));
    assert_eq!(samples[0].metadata.timestamp, Some(120));
}

#[test]
fn test_decode_context_switch() {
    let registry = CounterDefinition::empty();
    let values = Values {
        thread_id: true,
        context_switch: true,
        ..Default::default()
    };
    let out = (b::PERF_RECORD_MISC_SWITCH_OUT | b::PERF_RECORD_MISC_SWITCH_OUT_PREEMPT) as u16;
    // next_prev_pid, next_prev_tid, then sample_id { pid, tid }
    let mut data = record(b::PERF_RECORD_SWITCH_CPU_WIDE, out, &words(&[pair(10, 11), pair(1, 2)]));
    data.extend(record(b::PERF_RECORD_SWITCH, 0, &words(&[pair(1, 2)])));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    let samples = decoder.decode(&data);
    assert_eq!(samples.len(), 2);

    let switch = samples[0].context_switch.unwrap();
    assert!(switch.is_out);
    assert!(switch.is_preempt);
    assert_eq!((switch.process_id, switch.thread_id), (Some(10), Some(11)));
    assert_eq!(samples[0].metadata.process_id, Some(1));
    assert_eq!(samples[0].metadata.thread_id, Some(2));

    let switch = samples[1].context_switch.unwrap();
    assert!(!switch.is_out);
    assert!(!switch.is_preempt);
    assert_eq!(switch.process_id, None);
}

#[test]
fn test_decode_throttle_and_cgroup() {
    let registry = CounterDefinition::empty();
    let values = Values {
        throttle: true,
        cgroup: true,
        ..Default::default()
    };
    let mut data = record(b::PERF_RECORD_UNTHROTTLE, 0, &words(&[40, 1, 2]));
    let mut body = words(&[9]);
    body.extend(b"/user.slice\0\0\0\0\0");
    data.extend(record(b::PERF_RECORD_CGROUP, 0, &body));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    let samples = decoder.decode(&data);
    assert_eq!(samples.len(), 2);

    assert!(!samples[0].throttle.unwrap().is_throttle);
    assert_eq!(samples[0].metadata.timestamp, Some(40));
    let cgroup = samples[1].cgroup.as_ref().unwrap();
    assert_eq!(cgroup.id, 9);
    assert_eq!(cgroup.path, "/user.slice");
}

#[test]
fn test_intel_aux_samples_are_dropped() {
    let registry = CounterDefinition::empty();
    let values = Values {
        identifier: true,
        instruction_pointer: true,
        ..Default::default()
    };
    let mut data = record(b::PERF_RECORD_SAMPLE, USER, &words(&[7, 0x1000]));
    data.extend(record(b::PERF_RECORD_SAMPLE, USER, &words(&[8, 0x2000])));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::IntelAux { aux_id: 7 });
    let samples = decoder.decode(&data);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].metadata.sample_id, Some(8));
}

#[test]
fn test_decode_data_source() {
    let registry = CounterDefinition::empty();
    let values = Values {
        data_source: true,
        ..Default::default()
    };
    // load, L1 hit, locked, L1 dTLB hit
    let bits = 0x02 | (0x02 | 0x08) << 5 | 0x02 << 24 | (0x02 | 0x08) << 26;
    let data = record(b::PERF_RECORD_SAMPLE, USER, &words(&[bits]));

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    let sample = decoder.decode(&data).remove(0);
    assert_eq!(sample.data_access.ty, Some(AccessType::Load));
    let source = sample.data_access.source.unwrap();
    assert!(source.is_l1_hit);
    assert!(!source.is_l2_hit && !source.is_memory_hit);
    assert!(sample.data_access.tlb.unwrap().is_l1_hit);
    assert!(sample.instruction_execution.is_locked);
    assert_eq!(sample.data_access.snoop, None);
}

#[test]
fn test_ibs_op_bitfields() {
    let data1 = IbsOpData1(20 | 40 << 16 | 1 << 35 | 1 << 37);
    assert_eq!(data1.completion_to_retire(), 20);
    assert_eq!(data1.tag_to_retire(), 40);
    assert!(data1.is_branch_taken() && data1.is_branch_retired());
    assert!(!data1.is_branch_mispredicted() && !data1.is_return());

    let data2 = IbsOpData2(0b11 << 6 | 0b010 | 1 << 4);
    assert_eq!(data2.data_source(), 0b11010);
    assert!(data2.is_remote_node());

    let data3 = IbsOpData3(1 | 1 << 7 | 5 << 22 | 33 << 26 | 0xabcd << 32 | 0x1234 << 48);
    assert!(data3.is_load() && data3.is_dcache_miss());
    assert!(!data3.is_store());
    assert_eq!(data3.memory_width(), 5);
    assert_eq!(data3.open_memory_requests(), 33);
    assert_eq!(data3.dcache_miss_latency(), 0xabcd);
    assert_eq!(data3.tlb_refill_latency(), 0x1234);

    let ctl = IbsFetchControl(0xffff | 0x10 << 16 | 3 << 53 | 1 << 61);
    assert_eq!(ctl.max_count(), 0xffff);
    assert_eq!(ctl.count(), 0x10);
    assert_eq!(ctl.l1_tlb_page_size(), 3);
    assert!(ctl.l3_miss() && !ctl.l3_miss_only());
}

#[test]
fn test_decode_ibs_op() {
    let registry = CounterDefinition::empty();
    let values = Values {
        raw: true,
        ..Default::default()
    };
    let data1 = 20 | 40 << 16;
    let data2 = 0x3; // DRAM
    let data3 = 1 | 1 << 7 | 1 << 17 | 1 << 20 | 3 << 22 | 150 << 32;
    let data = raw_sample(&[0, 0x4000, data1, data2, data3, 0xdead0, 0xbeef0]);

    let decoder = Decoder::new(&registry, &values, VendorDecoder::AmdIbsOp);
    let sample = decoder.decode(&data).remove(0);

    let execution = &sample.instruction_execution;
    assert_eq!(execution.ty, Some(InstructionType::Load));
    assert_eq!(execution.logical_instruction_pointer, Some(0x4000));
    assert_eq!(execution.latency.uop_tag_to_retirement, Some(40));
    assert_eq!(execution.latency.uop_completion_to_retirement, Some(20));
    assert_eq!(execution.branch, None);

    let access = &sample.data_access;
    assert_eq!(access.ty, Some(AccessType::Load));
    assert_eq!(access.logical_memory_address, Some(0xdead0));
    assert_eq!(access.physical_memory_address, None);
    assert_eq!(access.latency.cache_miss, Some(150));
    assert_eq!(access.access_width, Some(4));
    let source = access.source.unwrap();
    assert!(source.is_memory_hit);
    assert!(!source.is_l1_hit && !source.is_l2_hit);
    let tlb = access.tlb.unwrap();
    assert!(tlb.is_l1_hit);
    assert_eq!(tlb.l1_page_size, Some(4096));
}

#[test]
fn test_decode_ibs_fetch() {
    let registry = CounterDefinition::empty();
    let values = Values {
        raw: true,
        ..Default::default()
    };
    let ctl = 1 << 49 | 1 << 50 | 1 << 51 | 1 << 52 | 1 << 53 | 77 << 32;
    let data = raw_sample(&[ctl, 0x4000, 0x9000]);

    let decoder = Decoder::new(&registry, &values, VendorDecoder::AmdIbsFetch);
    let sample = decoder.decode(&data).remove(0);

    let execution = &sample.instruction_execution;
    let fetch = execution.fetch.unwrap();
    assert!(fetch.is_valid && fetch.is_complete);
    assert_eq!(execution.latency.fetch, Some(77));
    assert_eq!(execution.logical_instruction_pointer, Some(0x4000));
    assert_eq!(execution.physical_instruction_pointer, Some(0x9000));
    assert!(execution.cache.unwrap().is_l1_miss);
    assert_eq!(execution.tlb.unwrap().l1_page_size, Some(2 << 20));
}

#[test]
fn test_generic_decoder_keeps_raw_opaque() {
    let registry = CounterDefinition::empty();
    let values = Values {
        raw: true,
        ..Default::default()
    };
    let data = raw_sample(&[1, 2, 3]);

    let decoder = Decoder::new(&registry, &values, VendorDecoder::Generic);
    let sample = decoder.decode(&data).remove(0);
    assert_eq!(sample.raw.as_ref().map(Vec::len), Some(28));
    assert_eq!(sample.instruction_execution.fetch, None);
}
