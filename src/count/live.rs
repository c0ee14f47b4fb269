use super::{CounterResult, EventCounter, Schedule};
use crate::config::Config;
use crate::event::{EventKind, ScheduledGroup};
use crate::registry::CounterDefinition;
use crate::{Error, Result};

/// Reads hardware events while they are counting, without stopping them.
///
/// Values are taken in user space through `rdpmc`, so only the calling
/// thread can be measured and only hardware events are supported.
pub struct LiveEventCounter<'d> {
    counter: EventCounter<'d>,
    start: Vec<Vec<u64>>,
}

impl<'d> LiveEventCounter<'d> {
    pub fn new(registry: &'d CounterDefinition) -> Self {
        Self::with_config(registry, Config::default())
    }

    pub fn with_config(registry: &'d CounterDefinition, config: Config) -> Self {
        Self {
            counter: EventCounter::with_config(registry, config),
            start: vec![],
        }
    }

    pub fn add(&mut self, name: &str) -> Result<()> {
        self.add_with([name], Schedule::Append)
    }

    pub fn add_with<I, S>(&mut self, names: I, schedule: Schedule) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = self.counter.registry();
        let names: Vec<S> = names.into_iter().collect();
        for name in &names {
            let name = name.as_ref();
            if registry.is_metric(name) {
                return Err(Error::MetricAsLiveEvent(name.to_owned()));
            }
            if registry.is_time_event(name) {
                return Err(Error::TimeEventAsLiveEvent(name.to_owned()));
            }
        }
        self.counter.add_with(names, schedule)
    }

    /// Opens the counters, maps their metadata pages and records the start values.
    pub fn start(&mut self) -> Result<()> {
        self.counter.open()?;
        for group in self.counter.groups_mut() {
            for counter in group.members_mut() {
                if counter.ring_buffer().is_none() {
                    counter.map_buffer(0)?;
                }
            }
        }
        self.counter.start()?;
        self.start = self.read_all();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.counter.stop()
    }

    fn read_all(&self) -> Vec<Vec<u64>> {
        self.counter
            .groups()
            .iter()
            .map(|group| {
                group
                    .members()
                    .iter()
                    .map(|it| it.read_live().unwrap_or(0))
                    .collect()
            })
            .collect()
    }

    /// Scaled value of `name` counted since [`start`][Self::start].
    ///
    /// `None` for unknown events or if the CPU does not allow reading
    /// the counter from user space at the moment.
    pub fn get(&self, name: &str) -> Option<f64> {
        let event = self
            .counter
            .requested_events()
            .iter()
            .find(|it| it.kind() == EventKind::Hardware && it.name() == name)?;
        let ScheduledGroup { id, position } = event.scheduled()?;
        let counter = self.counter.groups().get(id)?.members().get(position)?;
        let now = counter.read_live()?;
        let start = self.start.get(id)?.get(position).copied().unwrap_or(0);
        Some(now.saturating_sub(start) as f64 * counter.config().scale)
    }

    /// Current values of all requested events.
    pub fn result(&self) -> CounterResult {
        self.counter
            .requested_events()
            .iter()
            .filter(|it| it.is_visible())
            .filter_map(|it| Some((it.name().to_owned(), self.get(it.name())?)))
            .collect()
    }

    pub fn close(&mut self) {
        self.counter.close();
    }
}
