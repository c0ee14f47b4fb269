use super::{CounterResult, EventCounter, Schedule};
use crate::config::{Config, Cpu, Process};
use crate::registry::CounterDefinition;
use crate::Result;

/// Sums hardware values of every counter, time events take the longest interval.
pub(crate) fn merge(
    registry: &CounterDefinition,
    results: impl IntoIterator<Item = CounterResult>,
) -> CounterResult {
    let mut merged: Vec<(String, f64)> = vec![];
    for result in results {
        for (name, value) in result {
            match merged.iter_mut().find(|(it, _)| *it == name) {
                Some((_, acc)) if registry.is_time_event(&name) => *acc = acc.max(value),
                Some((_, acc)) => *acc += value,
                None => merged.push((name, value)),
            }
        }
    }
    CounterResult::new(merged)
}

macro_rules! multi_counter {
    ($ty:ident) => {
        impl<'d> $ty<'d> {
            /// Adds the events to every target, see [`EventCounter::add`].
            pub fn add(&mut self, name: &str) -> Result<()> {
                self.add_with([name], Schedule::Append)
            }

            /// Adds the events to every target, see [`EventCounter::add_with`].
            pub fn add_with<I, S>(&mut self, names: I, schedule: Schedule) -> Result<()>
            where
                I: IntoIterator<Item = S>,
                S: AsRef<str>,
            {
                let names: Vec<String> =
                    names.into_iter().map(|it| it.as_ref().to_owned()).collect();
                for counter in &mut self.counters {
                    counter.add_with(&names, schedule)?;
                }
                Ok(())
            }

            pub fn counters(&self) -> &[EventCounter<'d>] {
                &self.counters
            }

            pub fn close(&mut self) {
                for counter in &mut self.counters {
                    counter.close();
                }
            }

            /// Merged result of every target.
            pub fn result(&self, normalization: u64) -> Result<CounterResult> {
                let Some(first) = self.counters.first() else {
                    return Ok(CounterResult::default());
                };
                let registry = first.registry();
                let values = merge(registry, self.counters.iter().map(EventCounter::raw_result));
                first
                    .requested_events()
                    .result(registry, values, normalization)
            }
        }
    };
}

/// One [`EventCounter`] per thread, each started and stopped by its own thread.
///
/// ```rust,no_run
/// use perf_monitor::count::MultiThreadEventCounter;
/// use perf_monitor::registry::CounterDefinition;
///
/// let registry = CounterDefinition::new();
/// let mut counter = MultiThreadEventCounter::new(&registry, 4);
/// counter.add("instructions").unwrap();
///
/// std::thread::scope(|s| {
///     for thread in counter.counters_mut() {
///         s.spawn(move || {
///             thread.start().unwrap();
///             let _ = (0..1000).sum::<u64>();
///             thread.stop().unwrap();
///         });
///     }
/// });
/// println!("{}", counter.result(1).unwrap());
/// ```
pub struct MultiThreadEventCounter<'d> {
    counters: Vec<EventCounter<'d>>,
}

impl<'d> MultiThreadEventCounter<'d> {
    pub fn new(registry: &'d CounterDefinition, num_threads: usize) -> Self {
        Self::with_config(registry, Config::default(), num_threads)
    }

    pub fn with_config(registry: &'d CounterDefinition, config: Config, num_threads: usize) -> Self {
        let config = Config {
            process: Process::Calling,
            ..config
        };
        let counters = (0..num_threads)
            .map(|_| EventCounter::with_config(registry, config.clone()))
            .collect();
        Self { counters }
    }

    pub fn counter_mut(&mut self, thread: usize) -> Option<&mut EventCounter<'d>> {
        self.counters.get_mut(thread)
    }

    /// Counters to be moved into their threads.
    pub fn counters_mut(&mut self) -> &mut [EventCounter<'d>] {
        &mut self.counters
    }
}

multi_counter!(MultiThreadEventCounter);

/// One [`EventCounter`] per process, all started and stopped together.
pub struct MultiProcessEventCounter<'d> {
    counters: Vec<EventCounter<'d>>,
}

impl<'d> MultiProcessEventCounter<'d> {
    pub fn new(registry: &'d CounterDefinition, pids: &[i32]) -> Self {
        Self::with_config(registry, Config::default(), pids)
    }

    pub fn with_config(registry: &'d CounterDefinition, config: Config, pids: &[i32]) -> Self {
        let counters = pids
            .iter()
            .map(|pid| {
                let config = Config {
                    process: Process::Pid(*pid),
                    ..config.clone()
                };
                EventCounter::with_config(registry, config)
            })
            .collect();
        Self { counters }
    }

    pub fn start(&mut self) -> Result<()> {
        start_all(&mut self.counters)
    }

    pub fn stop(&mut self) -> Result<()> {
        stop_all(&mut self.counters)
    }
}

multi_counter!(MultiProcessEventCounter);

/// One [`EventCounter`] per CPU core, counting every process on it.
pub struct MultiCoreEventCounter<'d> {
    counters: Vec<EventCounter<'d>>,
}

impl<'d> MultiCoreEventCounter<'d> {
    pub fn new(registry: &'d CounterDefinition, cores: &[u16]) -> Self {
        Self::with_config(registry, Config::default(), cores)
    }

    pub fn with_config(registry: &'d CounterDefinition, config: Config, cores: &[u16]) -> Self {
        let counters = cores
            .iter()
            .map(|core| {
                let config = Config {
                    process: Process::Any,
                    cpu: Cpu::Core(*core),
                    ..config.clone()
                };
                EventCounter::with_config(registry, config)
            })
            .collect();
        Self { counters }
    }

    pub fn start(&mut self) -> Result<()> {
        start_all(&mut self.counters)
    }

    pub fn stop(&mut self) -> Result<()> {
        stop_all(&mut self.counters)
    }
}

multi_counter!(MultiCoreEventCounter);

fn start_all(counters: &mut [EventCounter<'_>]) -> Result<()> {
    for i in 0..counters.len() {
        if let Err(e) = counters[i].start() {
            for counter in &mut counters[..i] {
                let _ = counter.stop();
            }
            return Err(e);
        }
    }
    Ok(())
}

fn stop_all(counters: &mut [EventCounter<'_>]) -> Result<()> {
    for counter in counters {
        counter.stop()?;
    }
    Ok(())
}
