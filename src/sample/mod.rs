//! Event sampling, similar to `perf record`.
//!
//! A [`Sampler`] opens one [`SampleCounter`] per trigger group. The kernel
//! writes a record into the group's ring buffer every time a trigger
//! overflows, a worker thread copies the records out before the kernel
//! overwrites them, and [`Sampler::result`] decodes them into [`Sample`]s.

use std::mem;

use crate::config::{PeriodOrFrequency, Precision, SampleConfig};
use crate::registry::CounterDefinition;
use crate::{Error, Result};

#[cfg(test)]
mod test;

mod arena;
mod counter;
pub mod decode;
mod multi;
mod rb;
mod record;
mod values;
mod worker;

pub use counter::SampleCounter;
pub use decode::{Decoder, VendorDecoder};
pub use multi::*;
pub use rb::RingBuffer;
pub use record::*;
pub use values::*;

/// An event whose overflows make the kernel write samples.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trigger {
    pub name: String,
    /// Overrides the precision of the event and the [`SampleConfig`].
    pub precision: Option<Precision>,
    /// Overrides the rate of the event and the [`SampleConfig`].
    pub period_or_frequency: Option<PeriodOrFrequency>,
}

impl Trigger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            precision: None,
            period_or_frequency: None,
        }
    }

    pub fn with_precision(self, precision: Precision) -> Self {
        Self {
            precision: Some(precision),
            ..self
        }
    }

    pub fn with_period_or_frequency(self, period_or_frequency: PeriodOrFrequency) -> Self {
        Self {
            period_or_frequency: Some(period_or_frequency),
            ..self
        }
    }
}

impl From<&str> for Trigger {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Trigger {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Configured,
    Opened,
    Started,
    Stopped,
    Closed,
}

/// Event sampler.
///
/// ```rust,no_run
/// use perf_monitor::registry::CounterDefinition;
/// use perf_monitor::sample::Sampler;
///
/// let registry = CounterDefinition::new();
/// let mut sampler = Sampler::new(&registry);
/// sampler.trigger("cycles").unwrap();
/// sampler.values_mut().instruction_pointer = true;
/// sampler.values_mut().timestamp = true;
///
/// sampler.start().unwrap();
/// let sum = (0..100_000u64).sum::<u64>();
/// sampler.stop().unwrap();
///
/// for sample in sampler.result(true) {
///     println!("{:?}", sample.instruction_execution.logical_instruction_pointer);
/// }
/// # let _ = sum;
/// ```
pub struct Sampler<'d> {
    registry: &'d CounterDefinition,
    config: SampleConfig,
    values: Values,
    triggers: Vec<Vec<Trigger>>,
    counters: Vec<SampleCounter>,
    /// Chunks already drained from each counter, in counter order.
    data: Vec<Vec<Vec<u8>>>,
    state: State,
}

impl<'d> Sampler<'d> {
    pub fn new(registry: &'d CounterDefinition) -> Self {
        Self::with_config(registry, SampleConfig::default())
    }

    pub fn with_config(registry: &'d CounterDefinition, config: SampleConfig) -> Self {
        Self {
            registry,
            config,
            values: Values::default(),
            triggers: vec![],
            counters: vec![],
            data: vec![],
            state: State::Configured,
        }
    }

    pub fn registry(&self) -> &'d CounterDefinition {
        self.registry
    }

    pub fn config(&self) -> &SampleConfig {
        &self.config
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Values take effect on the next [`open`][Self::open].
    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    pub fn triggers(&self) -> &[Vec<Trigger>] {
        &self.triggers
    }

    /// Counters opened for each trigger group, empty before [`open`][Self::open].
    pub fn counters(&self) -> &[SampleCounter] {
        &self.counters
    }

    /// Adds a trigger group with a single trigger.
    pub fn trigger(&mut self, trigger: impl Into<Trigger>) -> Result<()> {
        self.trigger_group([trigger])
    }

    /// Adds one trigger group per trigger.
    pub fn triggers_each<I, T>(&mut self, triggers: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<Trigger>,
    {
        let triggers = self.checked(triggers)?;
        self.triggers.extend(triggers.into_iter().map(|it| vec![it]));
        Ok(())
    }

    /// Adds triggers sampled together into one ring buffer.
    ///
    /// Memory load triggers on CPUs that need an auxiliary counter get it
    /// added to their group when opened.
    pub fn trigger_group<I, T>(&mut self, triggers: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<Trigger>,
    {
        let group = self.checked(triggers)?;
        if !group.is_empty() {
            self.triggers.push(group);
        }
        Ok(())
    }

    fn checked<I, T>(&self, triggers: I) -> Result<Vec<Trigger>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Trigger>,
    {
        if self.state != State::Configured {
            return Err(Error::TriggersFrozen);
        }
        let triggers: Vec<Trigger> = triggers.into_iter().map(Into::into).collect();
        for trigger in &triggers {
            if self.registry.is_metric(&trigger.name) {
                return Err(Error::MetricAsTrigger(trigger.name.clone()));
            }
            if self.registry.is_time_event(&trigger.name) {
                return Err(Error::TimeEventAsTrigger(trigger.name.clone()));
            }
            if self.registry.counter(&trigger.name).is_none() {
                return Err(Error::UnknownEventOrMetric(trigger.name.clone()));
            }
        }
        Ok(triggers)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Opened | State::Started | State::Stopped)
    }

    pub fn is_started(&self) -> bool {
        self.state == State::Started
    }

    /// Opens one counter per trigger group, mapping its ring buffer and
    /// starting its worker. Triggers are frozen from here on.
    ///
    /// A sampler without triggers stays unopened, any other failure closes it.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            State::Configured => {}
            State::Closed => return Err(Error::GroupNotOpened),
            _ => return Ok(()),
        }
        if self.triggers.is_empty() {
            return Err(Error::EmptySampler);
        }
        for i in 0..self.triggers.len() {
            let triggers = &self.triggers[i];
            match SampleCounter::open(self.registry, &self.config, &self.values, triggers) {
                Ok(counter) => self.counters.push(counter),
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
        self.data = self.counters.iter().map(|_| vec![]).collect();
        self.state = State::Opened;
        log::debug!("opened sampler with {} trigger groups", self.counters.len());
        Ok(())
    }

    /// Opens the sampler if needed and enables every trigger group.
    pub fn start(&mut self) -> Result<()> {
        if self.state == State::Started {
            return Err(Error::SamplerAlreadyStarted);
        }
        self.open()?;
        for counter in &mut self.counters {
            if let Err(e) = counter.start() {
                self.close();
                return Err(e);
            }
        }
        self.state = State::Started;
        Ok(())
    }

    /// Disables every trigger group, the samples stay available until consumed.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != State::Started {
            return Ok(());
        }
        let stopped = self.counters.iter_mut().try_for_each(SampleCounter::stop);
        self.drain();
        self.state = State::Stopped;
        stopped
    }

    /// Releases every counter and ring buffer after draining them.
    ///
    /// Samples drained before closing can still be taken with
    /// [`result`][Self::result]. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        if self.state == State::Started {
            for counter in &mut self.counters {
                if let Err(e) = counter.stop() {
                    log::warn!("cannot stop sample counter: {e}");
                }
            }
        }
        self.drain();
        for counter in &mut self.counters {
            counter.close();
        }
        self.state = State::Closed;
    }

    fn drain(&mut self) {
        if self.data.len() < self.counters.len() {
            self.data.resize_with(self.counters.len(), Vec::new);
        }
        for (counter, data) in self.counters.iter().zip(&mut self.data) {
            data.extend(counter.consume());
        }
    }

    /// Takes the bytes copied out of every ring buffer so far, one list of
    /// chunks per trigger group.
    ///
    /// A second call without new samples in between returns empty lists.
    pub fn consume_sample_data(&mut self) -> Vec<Vec<Vec<u8>>> {
        self.drain();
        self.data.iter_mut().map(mem::take).collect()
    }

    /// Decodes every sample taken so far.
    ///
    /// Samples of one trigger group keep the order they were written in,
    /// `sort_by_time` orders all of them by timestamp.
    pub fn result(&mut self, sort_by_time: bool) -> Vec<Sample> {
        let data = self.consume_sample_data();
        let mut samples = vec![];
        for (counter, chunks) in self.counters.iter().zip(&data) {
            let decoder = counter.decoder(self.registry);
            for chunk in chunks {
                samples.extend(decoder.decode(chunk));
            }
        }
        if sort_by_time {
            sort_by_timestamp(&mut samples);
        }
        samples
    }
}

impl Drop for Sampler<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stable sort by timestamp, samples without one go last.
pub(crate) fn sort_by_timestamp(samples: &mut [Sample]) {
    samples.sort_by_key(|it| (it.metadata.timestamp.is_none(), it.metadata.timestamp));
}
