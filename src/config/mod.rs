use crate::hw;
use crate::Result;

pub(crate) mod attr;
mod target;

pub use target::*;

/// Options shared by every counter an [`EventCounter`][crate::count::EventCounter]
/// or [`Sampler`][crate::sample::Sampler] opens.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// New child threads of the monitored task inherit the counters.
    pub include_child_threads: bool,
    pub include_kernel: bool,
    pub include_user: bool,
    pub include_hypervisor: bool,
    pub include_idle: bool,
    pub include_guest: bool,

    pub process: Process,
    pub cpu: Cpu,

    /// Number of hardware counters per logical core.
    ///
    /// Every physical counter can host [`num_events_per_physical_counter`][Self::num_events_per_physical_counter]
    /// multiplexed groups, so the scheduler opens at most the product of both values.
    pub num_physical_counters: usize,
    /// Maximum number of events packed into one group.
    pub num_events_per_physical_counter: usize,
}

impl Config {
    pub fn new(num_physical_counters: usize, num_events_per_physical_counter: usize) -> Self {
        Self {
            num_physical_counters,
            num_events_per_physical_counter,
            ..Default::default()
        }
    }

    pub fn target(&self) -> Result<Target> {
        Target::new(self.process, self.cpu)
    }

    /// The maximum number of groups a scheduler may open.
    pub fn max_groups(&self) -> usize {
        self.num_physical_counters * self.num_events_per_physical_counter
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include_child_threads: false,
            include_kernel: true,
            include_user: true,
            include_hypervisor: true,
            include_idle: true,
            include_guest: true,
            process: Process::Calling,
            cpu: Cpu::Any,
            num_physical_counters: hw::physical_counters_per_core(),
            num_events_per_physical_counter: 4,
        }
    }
}

/// Options for sampling.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleConfig {
    pub config: Config,
    /// Number of data pages of each ring buffer, rounded up to a power of two.
    pub buffer_pages: usize,
    /// Default trigger rate, overridable per [`Trigger`][crate::sample::Trigger].
    pub period_or_frequency: PeriodOrFrequency,
    /// Default skid, overridable per [`Trigger`][crate::sample::Trigger].
    pub precision: Precision,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            config: Config::default(),
            buffer_pages: 4096,
            period_or_frequency: PeriodOrFrequency::Period(4000),
            precision: Precision::MustHaveConstantSkid,
        }
    }
}

/// When the kernel emits a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PeriodOrFrequency {
    /// Sample every N events.
    Period(u64),
    /// Sample N times per second, the kernel adjusts the period dynamically.
    Frequency(u64),
}

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L402
/// How exactly the sampled instruction pointer matches the triggering instruction.
///
/// Variants are ordered from the most widely supported to the most precise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Precision {
    AllowArbitrarySkid = 0,
    MustHaveConstantSkid = 1,
    RequestZeroSkid = 2,
    MustHaveZeroSkid = 3,
}

impl Precision {
    pub(crate) fn as_precise_ip(self) -> u64 {
        self as u64
    }

    /// The next less strict level, `None` at the bottom.
    pub fn lower(self) -> Option<Self> {
        match self {
            Self::AllowArbitrarySkid => None,
            Self::MustHaveConstantSkid => Some(Self::AllowArbitrarySkid),
            Self::RequestZeroSkid => Some(Self::MustHaveConstantSkid),
            Self::MustHaveZeroSkid => Some(Self::RequestZeroSkid),
        }
    }
}
