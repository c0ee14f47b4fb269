use std::sync::Arc;

use super::decode::{CounterSlot, Decoder, VendorDecoder};
use super::{Trigger, Values};
use crate::config::attr::Sampling;
use crate::config::{PeriodOrFrequency, Precision, SampleConfig};
use crate::count::{expand, Counter, Expanded, Group, OpenMode};
use crate::event::{EventKind, RequestedEventSet};
use crate::ffi::syscall::set_output;
use crate::ffi::PAGE_SIZE;
use crate::hw;
use crate::registry::CounterDefinition;
use crate::{Error, Result};

const INTEL_AUX_EVENT: &str = "mem-loads-aux";
const IBS_OP_PMU: &str = "ibs_op";
const IBS_FETCH_PMU: &str = "ibs_fetch";

/// The opened group of one trigger group.
///
/// Members are, in order: the auxiliary leader if the CPU needs one, the
/// triggers, then the counters read into samples that are not triggers
/// themselves. Every sampling member writes into the ring buffer of the
/// first trigger.
pub struct SampleCounter {
    group: Group,
    events: RequestedEventSet,
    values: Values,
    vendor: VendorDecoder,
    has_intel_aux: bool,
    has_amd_ibs_fetch: bool,
    has_amd_ibs_op: bool,
    owner: usize,
}

impl SampleCounter {
    pub(crate) fn open(
        registry: &CounterDefinition,
        config: &SampleConfig,
        values: &Values,
        triggers: &[Trigger],
    ) -> Result<Self> {
        let mut values = values.clone();
        let mut group = Group::new();
        // Sampling rate and precision per member, `None` for members that only count.
        let mut rates: Vec<Option<(PeriodOrFrequency, Precision)>> = vec![];

        let has_intel_aux = triggers.iter().any(|it| it.name == INTEL_AUX_EVENT)
            || (hw::is_intel_aux_counter_required()
                && triggers.iter().any(|it| it.name.starts_with("mem-loads")));
        if has_intel_aux {
            let (_, _, aux) = registry
                .counter(INTEL_AUX_EVENT)
                .ok_or(Error::AuxEventNotFound)?;
            group.add(aux)?;
            rates.push(None);
            // Tells the samples of the auxiliary leader apart.
            values.identifier = true;
        }

        let mut has_amd_ibs_op = false;
        let mut has_amd_ibs_fetch = false;
        let mut positions = vec![];
        for trigger in triggers.iter().filter(|it| it.name != INTEL_AUX_EVENT) {
            let (pmu, name, event) = registry
                .counter(&trigger.name)
                .ok_or_else(|| Error::UnknownEventOrMetric(trigger.name.clone()))?;
            has_amd_ibs_op |= pmu == IBS_OP_PMU;
            has_amd_ibs_fetch |= pmu == IBS_FETCH_PMU;

            let on = trigger
                .period_or_frequency
                .or(event.period_or_frequency)
                .unwrap_or(config.period_or_frequency);
            let precision = trigger
                .precision
                .or(event.precision)
                .unwrap_or(config.precision);
            positions.push((pmu.to_owned(), name.to_owned(), group.len()));
            group.add(event)?;
            rates.push(Some((on, precision)));
        }
        if positions.is_empty() {
            return Err(Error::EmptySampler);
        }
        if has_amd_ibs_op || has_amd_ibs_fetch {
            values.raw = true;
        }

        let mut events = RequestedEventSet::new();
        let mut expanded = vec![];
        for name in &values.counter {
            expand(registry, None, name, true, &mut expanded, &mut vec![])?;
        }
        for Expanded { event, config: counter } in expanded {
            match (event.kind(), counter) {
                (EventKind::Hardware, Some(counter)) => {
                    if events.contains(event.pmu(), event.name()) {
                        events.add(event);
                        continue;
                    }
                    let trigger = positions
                        .iter()
                        .find(|(pmu, name, _)| {
                            Some(pmu.as_str()) == event.pmu() && name == event.name()
                        });
                    let position = match trigger {
                        Some((_, _, position)) => *position,
                        None => {
                            group.add(counter)?;
                            rates.push(None);
                            group.len() - 1
                        }
                    };
                    events.add(event.scheduled_at(0, position));
                }
                (EventKind::Time, _) => {
                    log::warn!("time event '{}' cannot be read into samples", event.name());
                }
                _ => {
                    events.add(event);
                }
            }
        }

        let owner = positions[0].2;
        let wakeup_bytes = config
            .buffer_pages
            .checked_next_power_of_two()
            .and_then(|pages| pages.checked_mul(*PAGE_SIZE))
            .map_or(u32::MAX, |size| (size / 2).min(u32::MAX as usize) as u32);
        group.open_with(&config.config, |i, _| {
            let rate = rates.get(i).copied().flatten();
            OpenMode::Sampling(Sampling {
                values: &values,
                on: rate.map(|(on, _)| on),
                precision: rate.map_or(config.precision, |(_, precision)| precision),
                wakeup_bytes,
            })
        })?;

        let mut counter = Self {
            vendor: VendorDecoder::Generic,
            group,
            events,
            values,
            has_intel_aux,
            has_amd_ibs_fetch,
            has_amd_ibs_op,
            owner,
        };
        if let Err(e) = counter.attach_buffer(config.buffer_pages, &rates) {
            counter.close();
            return Err(e);
        }
        counter.vendor = counter.select_vendor();
        log::debug!(
            "opened sample counter of {} members, decoding with {:?}",
            counter.group.len(),
            counter.vendor
        );
        Ok(counter)
    }

    /// Maps the buffer of the first trigger and redirects every other sampling member into it.
    fn attach_buffer(
        &mut self,
        buffer_pages: usize,
        rates: &[Option<(PeriodOrFrequency, Precision)>],
    ) -> Result<()> {
        let owner = self.owner;
        let members = self.group.members_mut();
        let perf = members
            .get(owner)
            .and_then(Counter::file)
            .cloned()
            .ok_or(Error::GroupNotOpened)?;
        members[owner].map_buffer(buffer_pages)?;

        for (i, member) in members.iter().enumerate() {
            let sampling = rates.get(i).is_some_and(Option::is_some);
            if i == owner || !sampling {
                continue;
            }
            let file = member.file().ok_or(Error::GroupNotOpened)?;
            set_output(file, &perf).map_err(Error::SetOutput)?;
        }

        let rb = members[owner]
            .ring_buffer_mut()
            .ok_or(Error::GroupNotOpened)?;
        rb.start_worker(Arc::clone(&perf))
    }

    fn select_vendor(&self) -> VendorDecoder {
        let aux_id = self.group.leader().and_then(Counter::id);
        match aux_id {
            Some(aux_id) if self.has_intel_aux => VendorDecoder::IntelAux { aux_id },
            _ if self.has_amd_ibs_op => VendorDecoder::AmdIbsOp,
            _ if self.has_amd_ibs_fetch => VendorDecoder::AmdIbsFetch,
            _ => VendorDecoder::Generic,
        }
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Events read into every sample.
    pub fn requested_events(&self) -> &RequestedEventSet {
        &self.events
    }

    /// The values as opened, including those the vendor decoding requires.
    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn vendor(&self) -> VendorDecoder {
        self.vendor
    }

    pub fn has_intel_aux_event(&self) -> bool {
        self.has_intel_aux
    }

    pub fn has_amd_ibs_fetch(&self) -> bool {
        self.has_amd_ibs_fetch
    }

    pub fn has_amd_ibs_op(&self) -> bool {
        self.has_amd_ibs_op
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        self.group.start()
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        self.group.stop()
    }

    /// Drains the ring buffer and takes everything copied out of it so far.
    pub(crate) fn consume(&self) -> Vec<Vec<u8>> {
        match self.group.members().get(self.owner).and_then(Counter::ring_buffer) {
            Some(rb) => {
                rb.handle_overflow();
                rb.consume_data()
            }
            None => vec![],
        }
    }

    pub(crate) fn decoder<'a>(&'a self, registry: &'a CounterDefinition) -> Decoder<'a> {
        let members = self.group.members();
        let slots = self
            .events
            .iter()
            .filter(|it| it.kind() == EventKind::Hardware)
            .filter_map(|event| {
                let member = members.get(event.scheduled()?.position)?;
                Some(CounterSlot {
                    id: member.id()?,
                    name: event.name().to_owned(),
                    scale: member.config().scale,
                })
            })
            .collect();
        Decoder::new(registry, &self.values, self.vendor).with_counters(&self.events, slots)
    }

    pub(crate) fn close(&mut self) {
        self.group.close();
    }
}
