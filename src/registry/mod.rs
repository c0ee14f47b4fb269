//! Names of events, metrics and time events.

#[cfg(test)]
mod test;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use itertools::Itertools;

use crate::count::CounterConfig;
use crate::ffi::bindings as b;
use crate::hw;

mod metric;
mod sysfs;
mod time;

pub use metric::*;
pub use sysfs::event as sysfs_event;
pub use time::*;

/// The PMU events are added to when none is given.
pub const DEFAULT_PMU: &str = "cpu";

/// Registry resolving names to counter configs, metrics and time events.
///
/// A registry may have a parent, lookups fall back to it for names
/// the registry itself does not know. This lets callers add their own
/// events on top of a shared base without modifying it.
pub struct CounterDefinition {
    parent: Option<Arc<CounterDefinition>>,
    events: BTreeMap<String, HashMap<String, CounterConfig>>,
    metrics: HashMap<String, Box<dyn Metric>>,
    time_events: HashMap<String, TimeEvent>,
}

impl CounterDefinition {
    /// A registry with the generic kernel events, the vendor sampling
    /// events of the host CPU, the built-in metrics and time events.
    pub fn new() -> Self {
        let mut this = Self::empty();
        this.add_generic_events();
        this.add_vendor_events();
        for metric in metric::builtin() {
            this.metrics.insert(metric.name().to_owned(), metric);
        }
        for (name, event) in time::builtin() {
            this.add_time_event(name, event);
        }
        this
    }

    pub fn empty() -> Self {
        Self {
            parent: None,
            events: BTreeMap::new(),
            metrics: HashMap::new(),
            time_events: HashMap::new(),
        }
    }

    /// An empty registry falling back to `parent`.
    pub fn with_parent(parent: Arc<CounterDefinition>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::empty()
        }
    }

    pub fn add(&mut self, name: impl Into<String>, config: CounterConfig) {
        self.add_in(DEFAULT_PMU, name, config);
    }

    pub fn add_in(&mut self, pmu: impl Into<String>, name: impl Into<String>, config: CounterConfig) {
        self.events
            .entry(pmu.into())
            .or_default()
            .insert(name.into(), config);
    }

    pub fn add_metric(&mut self, metric: impl Metric + 'static) {
        self.metrics.insert(metric.name().to_owned(), Box::new(metric));
    }

    pub fn add_time_event(&mut self, name: impl Into<String>, event: TimeEvent) {
        self.time_events.insert(name.into(), event);
    }

    /// Looks `name` up in every PMU, the default PMU first.
    pub fn counter(&self, name: &str) -> Option<(&str, &str, CounterConfig)> {
        self.counter_in(DEFAULT_PMU, name)
            .or_else(|| {
                self.events.iter().find_map(|(pmu, events)| {
                    let (name, config) = events.get_key_value(name)?;
                    Some((pmu.as_str(), name.as_str(), *config))
                })
            })
            .or_else(|| self.parent.as_deref()?.counter(name))
    }

    pub fn counter_in(&self, pmu: &str, name: &str) -> Option<(&str, &str, CounterConfig)> {
        self.events
            .get_key_value(pmu)
            .and_then(|(pmu, events)| {
                let (name, config) = events.get_key_value(name)?;
                Some((pmu.as_str(), name.as_str(), *config))
            })
            .or_else(|| self.parent.as_deref()?.counter_in(pmu, name))
    }

    pub fn is_metric(&self, name: &str) -> bool {
        self.metric(name).is_some()
    }

    pub fn metric(&self, name: &str) -> Option<&dyn Metric> {
        match self.metrics.get(name) {
            Some(metric) => Some(metric.as_ref()),
            None => self.parent.as_deref()?.metric(name),
        }
    }

    pub fn is_time_event(&self, name: &str) -> bool {
        self.time_event(name).is_some()
    }

    pub fn time_event(&self, name: &str) -> Option<TimeEvent> {
        match self.time_events.get(name) {
            Some(event) => Some(*event),
            None => self.parent.as_deref()?.time_event(name),
        }
    }

    /// Names of every PMU with at least one event, including the parent's.
    pub fn pmu_names(&self) -> Vec<String> {
        let inherited = self.parent.iter().flat_map(|it| it.pmu_names());
        self.events
            .keys()
            .cloned()
            .chain(inherited)
            .sorted()
            .dedup()
            .collect()
    }

    fn add_generic_events(&mut self) {
        macro_rules! events {
            ($ty:ident, $($name:literal => $config:ident),+ $(,)?) => {
                $(self.add($name, CounterConfig::new(b::$ty, b::$config as _));)+
            };
        }

        events!(PERF_TYPE_HARDWARE,
            "cycles" => PERF_COUNT_HW_CPU_CYCLES,
            "cpu-cycles" => PERF_COUNT_HW_CPU_CYCLES,
            "instructions" => PERF_COUNT_HW_INSTRUCTIONS,
            "cache-references" => PERF_COUNT_HW_CACHE_REFERENCES,
            "cache-misses" => PERF_COUNT_HW_CACHE_MISSES,
            "branches" => PERF_COUNT_HW_BRANCH_INSTRUCTIONS,
            "branch-instructions" => PERF_COUNT_HW_BRANCH_INSTRUCTIONS,
            "branch-misses" => PERF_COUNT_HW_BRANCH_MISSES,
            "bus-cycles" => PERF_COUNT_HW_BUS_CYCLES,
            "stalled-cycles-frontend" => PERF_COUNT_HW_STALLED_CYCLES_FRONTEND,
            "stalled-cycles-backend" => PERF_COUNT_HW_STALLED_CYCLES_BACKEND,
            "ref-cycles" => PERF_COUNT_HW_REF_CPU_CYCLES,
        );
        events!(PERF_TYPE_SOFTWARE,
            "cpu-clock" => PERF_COUNT_SW_CPU_CLOCK,
            "task-clock" => PERF_COUNT_SW_TASK_CLOCK,
            "page-faults" => PERF_COUNT_SW_PAGE_FAULTS,
            "faults" => PERF_COUNT_SW_PAGE_FAULTS,
            "major-faults" => PERF_COUNT_SW_PAGE_FAULTS_MAJ,
            "minor-faults" => PERF_COUNT_SW_PAGE_FAULTS_MIN,
            "alignment-faults" => PERF_COUNT_SW_ALIGNMENT_FAULTS,
            "emulation-faults" => PERF_COUNT_SW_EMULATION_FAULTS,
            "context-switches" => PERF_COUNT_SW_CONTEXT_SWITCHES,
            "cs" => PERF_COUNT_SW_CONTEXT_SWITCHES,
            "cpu-migrations" => PERF_COUNT_SW_CPU_MIGRATIONS,
            "migrations" => PERF_COUNT_SW_CPU_MIGRATIONS,
        );

        // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L73
        // config = id | (op << 8) | (result << 16)
        let caches = [
            ("L1-dcache", b::PERF_COUNT_HW_CACHE_L1D),
            ("L1-icache", b::PERF_COUNT_HW_CACHE_L1I),
            ("LLC", b::PERF_COUNT_HW_CACHE_LL),
            ("dTLB", b::PERF_COUNT_HW_CACHE_DTLB),
            ("iTLB", b::PERF_COUNT_HW_CACHE_ITLB),
            ("branch", b::PERF_COUNT_HW_CACHE_BPU),
            ("node", b::PERF_COUNT_HW_CACHE_NODE),
        ];
        let ops = [
            ("loads", "load", b::PERF_COUNT_HW_CACHE_OP_READ),
            ("stores", "store", b::PERF_COUNT_HW_CACHE_OP_WRITE),
            ("prefetches", "prefetch", b::PERF_COUNT_HW_CACHE_OP_PREFETCH),
        ];
        for (cache, id) in caches {
            for (plural, singular, op) in ops {
                let access = id as u64
                    | (op as u64) << 8
                    | (b::PERF_COUNT_HW_CACHE_RESULT_ACCESS as u64) << 16;
                let miss = id as u64
                    | (op as u64) << 8
                    | (b::PERF_COUNT_HW_CACHE_RESULT_MISS as u64) << 16;
                self.add(
                    format!("{cache}-{plural}"),
                    CounterConfig::new(b::PERF_TYPE_HW_CACHE, access),
                );
                self.add(
                    format!("{cache}-{singular}-misses"),
                    CounterConfig::new(b::PERF_TYPE_HW_CACHE, miss),
                );
            }
        }
    }

    fn add_vendor_events(&mut self) {
        if hw::is_intel() {
            self.add_intel_events();
        } else if hw::is_amd_ibs_supported() {
            self.add_ibs_events();
        }
    }

    fn add_intel_events(&mut self) {
        // Hybrid CPUs expose the big cores as `cpu_core`.
        let pmu = ["cpu", "cpu_core"]
            .into_iter()
            .find(|it| hw::pmu_type(it).is_ok())
            .unwrap_or(DEFAULT_PMU);

        // MEM_INST_RETIRED.ALL_LOADS with a load latency threshold of 3 cycles,
        // MEM_INST_RETIRED.ALL_STORES.
        let fallback = [
            ("mem-loads", Some(CounterConfig::with_configs(b::PERF_TYPE_RAW, 0x1cd, 3, 0))),
            ("mem-stores", Some(CounterConfig::new(b::PERF_TYPE_RAW, 0x82d0))),
            ("mem-loads-aux", None),
        ];
        for (name, fallback) in fallback {
            match sysfs::event(pmu, name) {
                Ok(config) => self.add(name, config),
                Err(_) => {
                    if let Some(config) = fallback {
                        self.add(name, config);
                    }
                }
            }
        }
    }

    fn add_ibs_events(&mut self) {
        // https://github.com/torvalds/linux/blob/v6.13/arch/x86/events/amd/ibs.c#L560
        const IBS_OP_CNT_CTL: u64 = 1 << 19;
        const IBS_OP_L3_MISS_ONLY: u64 = 1 << 16;
        const IBS_FETCH_L3_MISS_ONLY: u64 = 1 << 59;

        let l3_filter = hw::is_ibs_l3_filter_supported();
        if let Ok(ty) = hw::pmu_type("ibs_op") {
            self.add_in("ibs_op", "ibs_op", CounterConfig::new(ty, 0));
            self.add_in("ibs_op", "ibs_op_uops", CounterConfig::new(ty, IBS_OP_CNT_CTL));
            if l3_filter {
                let config = CounterConfig::new(ty, IBS_OP_L3_MISS_ONLY);
                self.add_in("ibs_op", "ibs_op_l3missonly", config);
            }
        }
        if let Ok(ty) = hw::pmu_type("ibs_fetch") {
            self.add_in("ibs_fetch", "ibs_fetch", CounterConfig::new(ty, 0));
            if l3_filter {
                let config = CounterConfig::new(ty, IBS_FETCH_L3_MISS_ONLY);
                self.add_in("ibs_fetch", "ibs_fetch_l3missonly", config);
            }
        }
    }
}

impl Default for CounterDefinition {
    fn default() -> Self {
        Self::new()
    }
}
