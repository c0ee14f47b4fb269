use super::{Config, PeriodOrFrequency, Precision};
use crate::count::CounterConfig;
use crate::ffi::{bindings as b, Attr};
use crate::sample::Values;

// Every group is read as a whole, see `count::stat`.
pub(crate) const READ_FORMAT: u64 = b::PERF_FORMAT_GROUP as u64
    | b::PERF_FORMAT_ID as u64
    | b::PERF_FORMAT_TOTAL_TIME_ENABLED as u64
    | b::PERF_FORMAT_TOTAL_TIME_RUNNING as u64;

pub(crate) fn from(event: &CounterConfig, config: &Config) -> Attr {
    let mut attr = Attr::default();
    attr.size = size_of::<Attr>() as _;

    // event config:

    attr.type_ = event.ty;
    attr.config = event.config;
    attr.__bindgen_anon_3.config1 = event.config1;
    attr.__bindgen_anon_4.config2 = event.config2;

    // count config:

    macro_rules! then {
        ($then:tt) => {
            attr.$then(1)
        };
    }
    macro_rules! unless {
        ($bool:ident, $then:tt) => {
            if !config.$bool {
                then!($then);
            }
        };
    }
    unless!(include_kernel, set_exclude_kernel);
    unless!(include_user, set_exclude_user);
    unless!(include_hypervisor, set_exclude_hv);
    unless!(include_idle, set_exclude_idle);
    unless!(include_guest, set_exclude_guest);

    if config.include_child_threads {
        then!(set_inherit);
    }

    attr.read_format = READ_FORMAT;
    // Groups are enabled through their leader.
    then!(set_disabled);

    attr
}

/// Sampling options of one group member.
#[derive(Clone, Copy)]
pub(crate) struct Sampling<'a> {
    pub values: &'a Values,
    /// `None` for members that only count.
    pub on: Option<PeriodOrFrequency>,
    pub precision: Precision,
    /// Wake the overflow worker once this many bytes are in the buffer.
    pub wakeup_bytes: u32,
}

pub(crate) fn sampling(event: &CounterConfig, config: &Config, opts: &Sampling<'_>) -> Attr {
    let mut attr = from(event, config);
    let values = opts.values;

    macro_rules! then {
        ($then:tt) => {
            attr.$then(1)
        };
    }

    match opts.on {
        Some(PeriodOrFrequency::Frequency(val)) => {
            then!(set_freq);
            attr.__bindgen_anon_1.sample_freq = val;
        }
        Some(PeriodOrFrequency::Period(val)) => {
            attr.__bindgen_anon_1.sample_period = val;
        }
        // Counting members report their values through the leader's `PERF_SAMPLE_READ`.
        None => attr.__bindgen_anon_1.sample_period = 0,
    }
    if opts.on.is_some() {
        attr.set_precise_ip(opts.precision.as_precise_ip());
    }

    attr.sample_type = values.sample_type();
    attr.branch_sample_type = values.branch_sample_type();
    if let Some(regs) = values.user_registers {
        attr.sample_regs_user = regs.0;
    }
    if let Some(regs) = values.kernel_registers {
        attr.sample_regs_intr = regs.0;
    }
    if let Some(size) = values.user_stack {
        attr.sample_stack_user = size;
    }
    if let Some(max) = values.callchain {
        attr.sample_max_stack = max;
    }

    // Non-sample records carry the same id fields as samples.
    then!(set_sample_id_all);
    if values.context_switch {
        then!(set_context_switch);
    }
    if values.cgroup {
        then!(set_cgroup);
    }

    then!(set_watermark);
    attr.__bindgen_anon_2.wakeup_watermark = opts.wakeup_bytes;

    attr
}

#[cfg(test)]
mod test {
    use super::{from, sampling, Sampling, READ_FORMAT};
    use crate::config::{Config, PeriodOrFrequency, Precision};
    use crate::count::CounterConfig;
    use crate::ffi::bindings as b;
    use crate::sample::Values;

    #[test]
    fn test_counting_attr() {
        let event = CounterConfig::new(b::PERF_TYPE_HARDWARE, b::PERF_COUNT_HW_INSTRUCTIONS as _);
        let config = Config {
            include_kernel: false,
            include_child_threads: true,
            ..Config::new(4, 4)
        };
        let attr = from(&event, &config);

        assert_eq!(attr.type_, b::PERF_TYPE_HARDWARE);
        assert_eq!(attr.config, b::PERF_COUNT_HW_INSTRUCTIONS as u64);
        assert_eq!(attr.read_format, READ_FORMAT);
        assert_eq!(attr.exclude_kernel(), 1);
        assert_eq!(attr.exclude_user(), 0);
        assert_eq!(attr.inherit(), 1);
        assert_eq!(attr.disabled(), 1);
    }

    #[test]
    fn test_sampling_attr() {
        let event = CounterConfig::new(b::PERF_TYPE_HARDWARE, b::PERF_COUNT_HW_CPU_CYCLES as _);
        let values = Values {
            instruction_pointer: true,
            timestamp: true,
            ..Default::default()
        };
        let opts = Sampling {
            values: &values,
            on: Some(PeriodOrFrequency::Frequency(1000)),
            precision: Precision::RequestZeroSkid,
            wakeup_bytes: 4096,
        };
        let attr = sampling(&event, &Config::new(4, 4), &opts);

        assert_eq!(attr.freq(), 1);
        assert_eq!(unsafe { attr.__bindgen_anon_1.sample_freq }, 1000);
        assert_eq!(attr.precise_ip(), 2);
        assert_eq!(
            attr.sample_type,
            b::PERF_SAMPLE_IP as u64 | b::PERF_SAMPLE_TIME as u64
        );
        assert_eq!(attr.sample_id_all(), 1);
        assert_eq!(attr.watermark(), 1);
    }
}
