use std::time::Instant;

use super::{CounterConfig, CounterResult, Group, MAX_MEMBERS};
use crate::config::Config;
use crate::event::{EventKind, RequestedEvent, RequestedEventSet, ScheduledGroup};
use crate::registry::CounterDefinition;
use crate::{Error, Result};

/// How a batch of events is placed onto groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    /// Fill up any group with free slots.
    #[default]
    Append,
    /// One new group per event.
    Separate,
    /// All events of the batch share one new group.
    Group,
}

/// Counts named events, metrics and time events.
///
/// Events are packed onto groups so that no group holds more events than a
/// physical counter can multiplex, and no more groups are opened than
/// [`Config::max_groups`] allows.
///
/// # Examples
///
/// ```rust,no_run
/// use perf_monitor::count::EventCounter;
/// use perf_monitor::registry::CounterDefinition;
///
/// let registry = CounterDefinition::new();
/// let mut counter = EventCounter::new(&registry);
/// counter.add("instructions").unwrap();
/// counter.add("cycles-per-instruction").unwrap();
///
/// counter.start().unwrap();
/// let sum: u64 = (0..1_000_000).sum();
/// counter.stop().unwrap();
///
/// let result = counter.result(1).unwrap();
/// println!("{sum}\n{result}");
/// ```
pub struct EventCounter<'d> {
    registry: &'d CounterDefinition,
    config: Config,
    groups: Vec<Group>,
    sealed: Vec<bool>,
    events: RequestedEventSet,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

/// A requested event with its config, if it has to be counted.
pub(crate) struct Expanded {
    pub event: RequestedEvent,
    pub config: Option<CounterConfig>,
}

/// The shape of a group as seen by the planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Layout {
    pub len: usize,
    pub sealed: bool,
}

impl<'d> EventCounter<'d> {
    pub fn new(registry: &'d CounterDefinition) -> Self {
        Self::with_config(registry, Config::default())
    }

    pub fn with_config(registry: &'d CounterDefinition, config: Config) -> Self {
        Self {
            registry,
            config,
            groups: vec![],
            sealed: vec![],
            events: RequestedEventSet::new(),
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn registry(&self) -> &'d CounterDefinition {
        self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub(crate) fn groups_mut(&mut self) -> &mut [Group] {
        &mut self.groups
    }

    pub fn requested_events(&self) -> &RequestedEventSet {
        &self.events
    }

    /// Adds one event or metric to any group with a free slot.
    pub fn add(&mut self, name: &str) -> Result<()> {
        self.add_with([name], Schedule::Append)
    }

    /// Adds a batch of events and metrics.
    ///
    /// Either the whole batch is scheduled or, on error, nothing changes.
    pub fn add_with<I, S>(&mut self, names: I, schedule: Schedule) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut expanded = vec![];
        for name in names {
            expand(self.registry, None, name.as_ref(), true, &mut expanded, &mut vec![])?;
        }
        self.schedule(expanded, schedule)
    }

    /// Adds an event of a specific PMU.
    pub fn add_in(&mut self, pmu: &str, name: &str, schedule: Schedule) -> Result<()> {
        let mut expanded = vec![];
        expand(self.registry, Some(pmu), name, true, &mut expanded, &mut vec![])?;
        self.schedule(expanded, schedule)
    }

    fn schedule(&mut self, expanded: Vec<Expanded>, schedule: Schedule) -> Result<()> {
        // Events already requested, or repeated in the batch, only change their visibility.
        let mut fresh: Vec<Expanded> = vec![];
        let mut shown = vec![];
        for it in expanded {
            let (pmu, name) = (it.event.pmu(), it.event.name());
            if self.events.contains(pmu, name) {
                if it.event.is_visible() {
                    shown.push(it.event);
                }
                continue;
            }
            let seen = fresh
                .iter()
                .any(|f| f.event.pmu() == pmu && f.event.name() == name);
            if !seen {
                fresh.push(it);
            } else if it.event.is_visible() {
                shown.push(it.event);
            }
        }

        let mut layout: Vec<_> = self
            .groups
            .iter()
            .zip(&self.sealed)
            .map(|(group, sealed)| Layout {
                len: group.len(),
                sealed: *sealed,
            })
            .collect();
        let hardware = fresh.iter().filter(|it| it.config.is_some()).count();
        let placements = plan(
            &mut layout,
            schedule,
            hardware,
            self.config.num_events_per_physical_counter,
            self.config.max_groups(),
        )?;

        // Nothing below can fail on capacity, the plan has been checked.
        let mut placements = placements.into_iter();
        for Expanded { event, config } in fresh {
            let placement = config.and_then(|_| placements.next());
            let event = match (config, placement) {
                (Some(config), Some((id, position))) => {
                    if id == self.groups.len() {
                        self.groups.push(Group::new());
                        self.sealed.push(false);
                    }
                    self.groups[id].add(config)?;
                    event.scheduled_at(id, position)
                }
                _ => event,
            };
            self.events.add(event);
        }
        for (sealed, layout) in self.sealed.iter_mut().zip(&layout) {
            *sealed = layout.sealed;
        }
        for event in shown {
            let _ = self
                .events
                .adjust_visibility_if_present(event.pmu(), event.name(), true);
        }
        Ok(())
    }

    /// Opens every group not opened yet, groups can not take more events afterwards.
    pub fn open(&mut self) -> Result<()> {
        for i in 0..self.groups.len() {
            self.sealed[i] = true;
            if self.groups[i].is_open() {
                continue;
            }
            if let Err(e) = self.groups[i].open(&self.config) {
                self.close();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Opens (if needed) and starts all groups.
    pub fn start(&mut self) -> Result<()> {
        self.open()?;
        for i in 0..self.groups.len() {
            if let Err(e) = self.groups[i].start() {
                for group in &mut self.groups[..i] {
                    let _ = group.stop();
                }
                return Err(e);
            }
        }
        self.started_at = Some(Instant::now());
        self.stopped_at = None;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.stopped_at = Some(Instant::now());
        for group in &mut self.groups {
            group.stop()?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        for group in &mut self.groups {
            group.close();
        }
    }

    /// Visible events, metrics and time events with hardware values
    /// divided by `normalization`.
    pub fn result(&self, normalization: u64) -> Result<CounterResult> {
        self.events
            .result(self.registry, self.raw_result(), normalization)
    }

    /// Corrected and scaled values of every hardware and time event.
    pub(crate) fn raw_result(&self) -> CounterResult {
        let mut values = CounterResult::default();
        for event in self.events.iter() {
            match event.kind() {
                EventKind::Hardware => {
                    let Some(ScheduledGroup { id, position }) = event.scheduled() else {
                        continue;
                    };
                    let Some(group) = self.groups.get(id) else {
                        continue;
                    };
                    let Some(raw) = group.get(position) else {
                        continue;
                    };
                    let scale = group.members()[position].config().scale;
                    values.push(event.name(), raw as f64 * group.correction() * scale);
                }
                EventKind::Time => {
                    let time = self.registry.time_event(event.name());
                    if let (Some(time), Some(start), Some(end)) =
                        (time, self.started_at, self.stopped_at)
                    {
                        values.push(event.name(), time.calculate(start, end));
                    }
                }
                EventKind::Metric => (),
            }
        }
        values
    }
}

/// Resolves `name` into itself and, for metrics, all hidden dependencies.
pub(crate) fn expand(
    registry: &CounterDefinition,
    pmu: Option<&str>,
    name: &str,
    visible: bool,
    out: &mut Vec<Expanded>,
    path: &mut Vec<String>,
) -> Result<()> {
    if pmu.is_none() {
        if registry.is_time_event(name) {
            out.push(Expanded {
                event: RequestedEvent::time(name, visible),
                config: None,
            });
            return Ok(());
        }
        if let Some(metric) = registry.metric(name) {
            if path.iter().any(|it| it == name) {
                return Err(Error::CyclicMetrics);
            }
            out.push(Expanded {
                event: RequestedEvent::metric(name, visible),
                config: None,
            });
            path.push(name.to_owned());
            for dependency in metric.required_counter_names() {
                match expand(registry, None, &dependency, false, out, path) {
                    Err(Error::UnknownEventOrMetric(event)) => {
                        return Err(Error::UnknownEventForMetric {
                            event,
                            metric: name.to_owned(),
                        })
                    }
                    other => other?,
                }
            }
            path.pop();
            return Ok(());
        }
    }

    let found = match pmu {
        Some(pmu) => registry.counter_in(pmu, name),
        None => registry.counter(name),
    };
    let Some((pmu, name, config)) = found else {
        return Err(match pmu {
            Some(pmu) => Error::UnknownEvent {
                pmu: Some(pmu.to_owned()),
                name: name.to_owned(),
            },
            None => Error::UnknownEventOrMetric(name.to_owned()),
        });
    };
    out.push(Expanded {
        event: RequestedEvent::hardware(pmu, name, visible),
        config: Some(config),
    });
    Ok(())
}

/// Places `count` new events onto `layout`, returning `(group, position)`
/// for each of them. `layout` is only meaningful if this succeeds.
pub(crate) fn plan(
    layout: &mut Vec<Layout>,
    schedule: Schedule,
    count: usize,
    events_per_group: usize,
    max_groups: usize,
) -> Result<Vec<(usize, usize)>> {
    if count == 0 {
        return Ok(vec![]);
    }
    if events_per_group == 0 {
        return Err(Error::MaxEventsPerGroupReached { limit: 0 });
    }
    let capacity = events_per_group.min(MAX_MEMBERS);
    let open_group = |layout: &mut Vec<Layout>, len, sealed| {
        if layout.len() >= max_groups {
            return Err(Error::MaxGroupsReached { limit: max_groups });
        }
        layout.push(Layout { len, sealed });
        Ok(layout.len() - 1)
    };

    let mut placements = Vec::with_capacity(count);
    match schedule {
        Schedule::Append => {
            for _ in 0..count {
                let id = match layout.iter().position(|it| !it.sealed && it.len < capacity) {
                    Some(id) => id,
                    None => open_group(layout, 0, false)?,
                };
                let group = &mut layout[id];
                placements.push((id, group.len));
                group.len += 1;
                if group.len >= capacity {
                    group.sealed = true;
                }
            }
        }
        Schedule::Separate => {
            for _ in 0..count {
                let id = open_group(layout, 1, true)?;
                placements.push((id, 0));
            }
        }
        Schedule::Group => {
            if count > events_per_group {
                return Err(Error::MaxEventsPerGroupReached {
                    limit: events_per_group,
                });
            }
            if count > MAX_MEMBERS {
                return Err(Error::MaxMembersReached { limit: MAX_MEMBERS });
            }
            let id = open_group(layout, count, true)?;
            placements.extend((0..count).map(|position| (id, position)));
        }
    }
    Ok(placements)
}
