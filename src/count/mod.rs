
use std::fs::File;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use crate::config::attr::{self, Sampling};
use crate::config::{Config, PeriodOrFrequency, Precision};
use crate::ffi::bindings as b;
use crate::ffi::syscall::{id, perf_event_open};
use crate::sample::RingBuffer;
use crate::{Error, Result};

mod group;
mod live;
mod multi;
mod result;
mod scheduler;
mod stat;

pub use group::*;
pub use live::*;
pub use multi::*;
pub use result::*;
pub use scheduler::*;
pub use stat::*;

pub(crate) use scheduler::{expand, Expanded};

/// Maximum number of counters in one group.
pub const MAX_MEMBERS: usize = 12;

/// Kernel description of one event.
///
/// Two configs are equal if they select the same event,
/// the fields only used for scaling and sampling are ignored.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterConfig {
    /// `perf_event_attr.type`, a `PERF_TYPE_*` value or a dynamic PMU type.
    pub ty: u32,
    pub config: u64,
    pub config1: u64,
    pub config2: u64,
    /// Factor applied to the corrected value in results.
    pub scale: f64,
    /// Overrides the sampler's default precision when this event triggers samples.
    pub precision: Option<Precision>,
    /// Overrides the sampler's default period or frequency.
    pub period_or_frequency: Option<PeriodOrFrequency>,
}

impl CounterConfig {
    pub fn new(ty: u32, config: u64) -> Self {
        Self::with_configs(ty, config, 0, 0)
    }

    pub fn with_configs(ty: u32, config: u64, config1: u64, config2: u64) -> Self {
        Self {
            ty,
            config,
            config1,
            config2,
            scale: 1.0,
            precision: None,
            period_or_frequency: None,
        }
    }

    pub fn with_scale(self, scale: f64) -> Self {
        Self { scale, ..self }
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

    /// Whether this selects a CPU PMU the kernel can read through `rdpmc`.
    pub fn is_hardware(&self) -> bool {
        matches!(
            self.ty,
            b::PERF_TYPE_HARDWARE | b::PERF_TYPE_HW_CACHE | b::PERF_TYPE_RAW
        )
    }
}

impl PartialEq for CounterConfig {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.config == other.config
    }
}

/// How a counter is opened.
#[derive(Clone, Copy)]
pub(crate) enum OpenMode<'a> {
    Counting,
    Sampling(Sampling<'a>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Configured,
    Opened,
    Closed,
}

/// One kernel counter.
///
/// A counter is opened at most once. After [`close`][Self::close],
/// a fresh counter has to be constructed to count again.
pub struct Counter {
    config: CounterConfig,
    id: Option<u64>,
    perf: Option<Arc<File>>,
    rb: Option<RingBuffer>,
    precision: Option<Precision>,
    state: State,
}

impl Counter {
    pub fn new(config: CounterConfig) -> Self {
        Self {
            config,
            id: None,
            perf: None,
            rb: None,
            precision: None,
            state: State::Configured,
        }
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Kernel assigned id, `None` until opened.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn file(&self) -> Option<&Arc<File>> {
        self.perf.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Opened
    }

    /// Precision the kernel accepted, `None` unless opened for sampling.
    pub fn precision(&self) -> Option<Precision> {
        self.precision
    }

    /// Opens the counter, as a member of `leader`'s group if present.
    ///
    /// A sampling trigger rejected by the kernel is retried with lower
    /// precision, the error of the first attempt is returned if every
    /// level fails.
    pub(crate) fn open(
        &mut self,
        config: &Config,
        leader: Option<&File>,
        mode: &OpenMode<'_>,
    ) -> Result<()> {
        if self.state != State::Configured {
            return Err(Error::CounterAlreadyOpened);
        }
        let target = config.target()?;
        let group_fd = leader.map_or(-1, |it| it.as_raw_fd());
        let flags = b::PERF_FLAG_FD_CLOEXEC as u64;

        let perf = match mode {
            OpenMode::Counting => {
                let mut attr = attr::from(&self.config, config);
                perf_event_open(&mut attr, target.pid, target.cpu, group_fd, flags)
                    .map_err(Error::Open)?
            }
            OpenMode::Sampling(opts) => {
                let mut opts = *opts;
                let mut first = None;
                loop {
                    let mut attr = attr::sampling(&self.config, config, &opts);
                    match perf_event_open(&mut attr, target.pid, target.cpu, group_fd, flags) {
                        Ok(perf) => {
                            if first.is_some() {
                                log::debug!("sampling precision lowered to {:?}", opts.precision);
                            }
                            self.precision = Some(opts.precision);
                            break perf;
                        }
                        Err(e) => {
                            let e = first.take().unwrap_or(e);
                            match opts.precision.lower().filter(|_| opts.on.is_some()) {
                                Some(lower) => {
                                    opts.precision = lower;
                                    first = Some(e);
                                }
                                None => return Err(Error::Open(e)),
                            }
                        }
                    }
                }
            }
        };

        self.id = Some(id(&perf).map_err(Error::Id)?);
        self.perf = Some(Arc::new(perf));
        self.state = State::Opened;
        Ok(())
    }

    /// Maps a ring buffer of `data_pages` onto the opened counter.
    pub(crate) fn map_buffer(&mut self, data_pages: usize) -> Result<&mut RingBuffer> {
        let perf = self.perf.as_ref().ok_or(Error::GroupNotOpened)?;
        let rb = RingBuffer::new(perf, data_pages)?;
        Ok(self.rb.insert(rb))
    }

    pub fn ring_buffer(&self) -> Option<&RingBuffer> {
        self.rb.as_ref()
    }

    pub(crate) fn ring_buffer_mut(&mut self) -> Option<&mut RingBuffer> {
        self.rb.as_mut()
    }

    /// Reads the value through `rdpmc`.
    ///
    /// Returns `None` if the counter has no mapped metadata page or the
    /// CPU does not support user space reads.
    pub fn read_live(&self) -> Option<u64> {
        self.rb.as_ref()?.read_performance_monitoring_counter()
    }

    /// Releases the ring buffer and the kernel counter.
    ///
    /// Calling this more than once, or never, is fine.
    pub fn close(&mut self) {
        if self.state != State::Opened {
            return;
        }
        // The worker must be joined before the mapping goes away.
        if let Some(mut rb) = self.rb.take() {
            rb.cancel_worker();
        }
        self.perf = None;
        self.state = State::Closed;
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.close();
    }
}
