use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by counting and sampling.
///
/// Each cause has its own variant so callers can branch on it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot monitor any process on any CPU core")]
    AnyProcessOnAnyCpu,

    #[error("cannot add more events: reached maximum number of groups ({limit})")]
    MaxGroupsReached { limit: usize },
    #[error("cannot add more than {limit} events to a single physical counter")]
    MaxEventsPerGroupReached { limit: usize },
    #[error("cannot add more than {limit} counters to a group")]
    MaxMembersReached { limit: usize },

    #[error("counter is already opened, construct a new one to open again")]
    CounterAlreadyOpened,
    #[error("cannot open perf counter (errno {}): {}", errno(.0), cause(.0))]
    Open(#[source] io::Error),
    #[error("cannot enable counter (errno {})", errno(.0))]
    Enable(#[source] io::Error),
    #[error("cannot disable counter (errno {})", errno(.0))]
    Disable(#[source] io::Error),
    #[error("cannot reset counter (errno {})", errno(.0))]
    Reset(#[source] io::Error),
    #[error("cannot read counter id (errno {})", errno(.0))]
    Id(#[source] io::Error),
    #[error("cannot redirect counter output (errno {})", errno(.0))]
    SetOutput(#[source] io::Error),
    #[error("cannot read from counter: {0}")]
    Read(#[source] io::Error),
    #[error("unexpected read format: {0}")]
    ReadFormat(&'static str),

    #[error("creating buffer via mmap failed (errno {})", errno(.0))]
    Mmap(#[source] io::Error),
    #[error("buffer created via mmap is null")]
    MmapNull,
    #[error("cannot set up overflow worker: {0}")]
    Worker(#[source] io::Error),

    #[error("cannot start an empty group, add at least one counter")]
    EmptyGroup,
    #[error("group is already started")]
    GroupAlreadyStarted,
    #[error("group is not opened")]
    GroupNotOpened,
    #[error("cannot start sampling without any trigger event")]
    EmptySampler,
    #[error("sampler is already started")]
    SamplerAlreadyStarted,
    #[error("sampler was already opened, triggers cannot be changed")]
    TriggersFrozen,
    #[error("the event '{0}' is a metric, metrics are not supported as sampling triggers")]
    MetricAsTrigger(String),
    #[error("the event '{0}' is a time event, time events are not supported for sampling")]
    TimeEventAsTrigger(String),
    #[error("the event '{0}' is a metric, metrics are not supported as live events")]
    MetricAsLiveEvent(String),
    #[error("the event '{0}' is a time event, time events are not supported as live events")]
    TimeEventAsLiveEvent(String),

    #[error("cannot find an event with name '{name}'{}", in_pmu(.pmu))]
    UnknownEvent { pmu: Option<String>, name: String },
    #[error("cannot find an event or metric with name '{0}'")]
    UnknownEventOrMetric(String),
    #[error("cannot find an event with name '{event}' for metric '{metric}'")]
    UnknownEventForMetric { event: String, metric: String },
    #[error("cannot evaluate metrics because they are cyclically dependent")]
    CyclicMetrics,
    #[error("the hardware requires an auxiliary counter for sampling memory loads but it cannot be found")]
    AuxEventNotFound,
}

fn errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(0)
}

fn in_pmu(pmu: &Option<String>) -> String {
    match pmu {
        Some(pmu) => format!(" for PMU '{pmu}'"),
        None => String::new(),
    }
}

// https://man7.org/linux/man-pages/man2/perf_event_open.2.html#ERRORS
fn cause(e: &io::Error) -> &'static str {
    match e.raw_os_error() {
        Some(libc::E2BIG) => "perf_event_attr size is not valid for this kernel",
        Some(libc::EACCES | libc::EPERM) => {
            "not enough permission, check /proc/sys/kernel/perf_event_paranoid"
        }
        Some(libc::EBUSY) => "another event already has exclusive access to the PMU",
        Some(libc::EINVAL) => "the event configuration is invalid",
        Some(libc::EMFILE) => "too many open file descriptors",
        Some(libc::ENODEV) => "the event is not supported on this CPU",
        Some(libc::ENOENT) => "the event type is not supported",
        Some(libc::ENOSPC) => "no hardware counter available, try fewer events per group",
        Some(libc::EOPNOTSUPP) => "the hardware does not support the requested feature",
        Some(libc::EOVERFLOW) => "requested callchain depth exceeds the kernel limit",
        Some(libc::ESRCH) => "the process to monitor does not exist",
        _ => "unknown error",
    }
}
