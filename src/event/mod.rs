//! Events requested by users, as seen by the scheduler.

#[cfg(test)]
mod test;

mod graph;

pub(crate) use graph::DirectedGraph;

use crate::count::CounterResult;
use crate::registry::CounterDefinition;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Counted by a kernel counter.
    Hardware,
    /// Derived from other events after counting.
    Metric,
    /// Wall time between start and stop.
    Time,
}

/// Where a hardware event was placed by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledGroup {
    pub id: usize,
    pub position: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestedEvent {
    pmu: Option<String>,
    name: String,
    visible: bool,
    kind: EventKind,
    scheduled: Option<ScheduledGroup>,
}

impl RequestedEvent {
    pub fn hardware(pmu: impl Into<String>, name: impl Into<String>, visible: bool) -> Self {
        Self {
            pmu: Some(pmu.into()),
            name: name.into(),
            visible,
            kind: EventKind::Hardware,
            scheduled: None,
        }
    }

    pub fn metric(name: impl Into<String>, visible: bool) -> Self {
        Self {
            pmu: None,
            name: name.into(),
            visible,
            kind: EventKind::Metric,
            scheduled: None,
        }
    }

    pub fn time(name: impl Into<String>, visible: bool) -> Self {
        Self {
            pmu: None,
            name: name.into(),
            visible,
            kind: EventKind::Time,
            scheduled: None,
        }
    }

    pub fn scheduled_at(self, id: usize, position: usize) -> Self {
        Self {
            scheduled: Some(ScheduledGroup { id, position }),
            ..self
        }
    }

    pub fn pmu(&self) -> Option<&str> {
        self.pmu.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the event shows up in results, dependencies of metrics are hidden.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn scheduled(&self) -> Option<ScheduledGroup> {
        self.scheduled
    }

    fn is(&self, pmu: Option<&str>, name: &str) -> bool {
        self.pmu.as_deref() == pmu && self.name == name
    }
}

/// Insertion ordered set of requested events, unique by PMU and name.
#[derive(Clone, Debug, Default)]
pub struct RequestedEventSet {
    events: Vec<RequestedEvent>,
}

impl RequestedEventSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `event`, returns `false` if it was already present.
    ///
    /// A present event becomes visible if `event` is visible.
    pub fn add(&mut self, event: RequestedEvent) -> bool {
        if self.adjust_visibility_if_present(event.pmu(), event.name(), event.visible) {
            return false;
        }
        self.events.push(event);
        true
    }

    /// Makes a present event visible if `visible` is set.
    ///
    /// Returns whether the event is present, hidden events never hide
    /// an event the user asked for.
    pub fn adjust_visibility_if_present(&mut self, pmu: Option<&str>, name: &str, visible: bool) -> bool {
        match self.events.iter_mut().find(|it| it.is(pmu, name)) {
            Some(event) => {
                event.visible |= visible;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, pmu: Option<&str>, name: &str) -> bool {
        self.events.iter().any(|it| it.is(pmu, name))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestedEvent> {
        self.events.iter()
    }

    /// Graph over the metrics in this set, with an edge from every
    /// metric to the metrics requiring it.
    fn metric_graph(&self, registry: &CounterDefinition) -> Result<DirectedGraph<String>> {
        let mut graph = DirectedGraph::new();
        for event in self.iter().filter(|it| it.kind == EventKind::Metric) {
            let metric = registry
                .metric(&event.name)
                .ok_or_else(|| Error::UnknownEventOrMetric(event.name.clone()))?;
            graph.insert(event.name.clone());
            for dependency in metric.required_counter_names() {
                if registry.is_metric(&dependency) {
                    graph.connect(dependency, event.name.clone());
                }
            }
        }
        Ok(graph)
    }

    /// Builds the final result from the corrected values of hardware and time events.
    ///
    /// Hardware values are divided by `normalization`, metrics are evaluated
    /// in dependency order, and only visible events are returned, in the
    /// order they were requested.
    pub fn result(
        &self,
        registry: &CounterDefinition,
        values: CounterResult,
        normalization: u64,
    ) -> Result<CounterResult> {
        let normalization = normalization.max(1) as f64;
        let mut all = CounterResult::default();
        for (name, value) in values.iter() {
            let is_hardware = self
                .iter()
                .any(|it| it.kind == EventKind::Hardware && it.name == name);
            let value = if is_hardware { value / normalization } else { value };
            all.push(name, value);
        }

        let graph = self.metric_graph(registry)?;
        if graph.is_cyclic() {
            return Err(Error::CyclicMetrics);
        }
        let order = graph.into_topological_order().ok_or(Error::CyclicMetrics)?;
        for name in order {
            let Some(metric) = registry.metric(&name) else {
                continue;
            };
            for dependency in metric.required_counter_names() {
                if !registry.is_metric(&dependency) && all.get(&dependency).is_none() {
                    return Err(Error::UnknownEventForMetric {
                        event: dependency,
                        metric: name,
                    });
                }
            }
            if let Some(value) = metric.calculate(&all) {
                all.push(&name, value);
            }
        }

        let mut result = CounterResult::default();
        for event in self.iter().filter(|it| it.visible) {
            if let Some(value) = all.get(&event.name) {
                result.push(&event.name, value);
            }
        }
        Ok(result)
    }
}
