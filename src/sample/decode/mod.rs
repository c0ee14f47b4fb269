//! Turns the bytes copied out of ring buffers into [`Sample`]s.

#[cfg(test)]
mod test;

mod data_src;
mod ibs;
mod vendor;

pub use ibs::*;
pub use vendor::*;

use super::{
    Abi, Branch, CGroup, ContextSwitch, Metadata, Mode, Registers, Sample, Throttle, TransactionAbort,
    Values,
};
use crate::count::{CounterResult, GroupStat};
use crate::cursor::{Cursor, Malformed};
use crate::event::RequestedEventSet;
use crate::ffi::bindings as b;
use crate::registry::CounterDefinition;

const HEADER_SIZE: usize = 8;

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L836
// struct perf_event_header {
//     u32 type;
//     u16 misc;
//     u16 size;
// };
#[derive(Clone, Copy, Debug)]
struct Header {
    ty: u32,
    misc: u16,
    size: u16,
}

impl Header {
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, Malformed> {
        Ok(Self {
            ty: cursor.u32()?,
            misc: cursor.u16()?,
            size: cursor.u16()?,
        })
    }
}

/// A counter whose value is read into samples.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterSlot {
    /// Kernel assigned counter id.
    pub id: u64,
    pub name: String,
    pub scale: f64,
}

/// Decoder of the records of one trigger group.
pub struct Decoder<'a> {
    registry: &'a CounterDefinition,
    values: &'a Values,
    vendor: VendorDecoder,
    counters: Option<(&'a RequestedEventSet, Vec<CounterSlot>)>,
}

impl<'a> Decoder<'a> {
    pub fn new(registry: &'a CounterDefinition, values: &'a Values, vendor: VendorDecoder) -> Self {
        Self {
            registry,
            values,
            vendor,
            counters: None,
        }
    }

    /// Resolves the group values of every sample into the events of `events`.
    ///
    /// Metrics in `events` are evaluated on the values of every sample.
    pub fn with_counters(self, events: &'a RequestedEventSet, slots: Vec<CounterSlot>) -> Self {
        Self {
            counters: Some((events, slots)),
            ..self
        }
    }

    /// Decodes every record of `data`.
    ///
    /// Records that do not match the requested values are skipped by their
    /// declared size, decoding stops if a size itself cannot be trusted.
    pub fn decode(&self, data: &[u8]) -> Vec<Sample> {
        let mut samples = vec![];
        let mut cursor = Cursor::new(data);
        while !cursor.is_empty() {
            let header = match Header::parse(&mut cursor) {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("dropping {} trailing bytes: {e}", cursor.remaining());
                    break;
                }
            };
            let Some(len) = (header.size as usize).checked_sub(HEADER_SIZE) else {
                log::warn!("record size {} is smaller than its header", header.size);
                break;
            };
            let body = match cursor.bytes(len) {
                Ok(body) => body,
                Err(e) => {
                    log::warn!("dropping truncated record of type {}: {e}", header.ty);
                    break;
                }
            };
            match self.record(header, Cursor::new(body)) {
                Ok(Some(sample)) => samples.push(sample),
                Ok(None) => {}
                Err(e) => log::warn!("skipping malformed record of type {}: {e}", header.ty),
            }
        }
        samples
    }

    fn record(&self, header: Header, mut body: Cursor<'_>) -> Result<Option<Sample>, Malformed> {
        let mut sample = Sample {
            metadata: Metadata {
                mode: mode(header.misc),
                ..Default::default()
            },
            ..Default::default()
        };
        if header.ty == b::PERF_RECORD_SAMPLE {
            self.sample(header.misc, &mut body, &mut sample)?;
            if !self.vendor.keep(&sample) {
                return Ok(None);
            }
            self.vendor.apply(&mut sample);
            return Ok(Some(sample));
        }

        let wanted = match header.ty {
            b::PERF_RECORD_LOST | b::PERF_RECORD_LOST_SAMPLES => true,
            b::PERF_RECORD_SWITCH | b::PERF_RECORD_SWITCH_CPU_WIDE => self.values.context_switch,
            b::PERF_RECORD_CGROUP => self.values.cgroup,
            b::PERF_RECORD_THROTTLE | b::PERF_RECORD_UNTHROTTLE => self.values.throttle,
            _ => false,
        };
        if !wanted {
            return Ok(None);
        }

        // Every other record ends with the `sample_id_all` fields.
        let mut id = body.split_tail(sample_id_len(self.sample_type()))?;
        match header.ty {
            // id, lost
            b::PERF_RECORD_LOST => {
                sample.metadata.sample_id = Some(body.u64()?);
                let lost = body.u64()?;
                log::warn!("the ring buffer overflowed, {lost} records were lost");
                sample.count_loss = Some(lost);
            }
            b::PERF_RECORD_LOST_SAMPLES => {
                let lost = body.u64()?;
                log::warn!("the kernel lost {lost} samples");
                sample.count_loss = Some(lost);
            }
            b::PERF_RECORD_SWITCH | b::PERF_RECORD_SWITCH_CPU_WIDE => {
                let (process_id, thread_id) = if header.ty == b::PERF_RECORD_SWITCH_CPU_WIDE {
                    (Some(body.u32()?), Some(body.u32()?))
                } else {
                    (None, None)
                };
                let is_out = header.misc & b::PERF_RECORD_MISC_SWITCH_OUT as u16 > 0;
                sample.context_switch = Some(ContextSwitch {
                    is_out,
                    is_preempt: is_out && header.misc & b::PERF_RECORD_MISC_SWITCH_OUT_PREEMPT as u16 > 0,
                    process_id,
                    thread_id,
                });
            }
            b::PERF_RECORD_CGROUP => {
                let cgroup_id = body.u64()?;
                let path = body.bytes(body.remaining())?;
                let path = path.split(|it| *it == 0).next().unwrap_or_default();
                sample.cgroup = Some(CGroup {
                    id: cgroup_id,
                    path: String::from_utf8_lossy(path).into_owned(),
                });
            }
            b::PERF_RECORD_THROTTLE | b::PERF_RECORD_UNTHROTTLE => {
                // time, id, stream_id
                sample.metadata.timestamp = Some(body.u64()?);
                sample.metadata.sample_id = Some(body.u64()?);
                sample.metadata.stream_id = Some(body.u64()?);
                sample.throttle = Some(Throttle {
                    is_throttle: header.ty == b::PERF_RECORD_THROTTLE,
                });
            }
            _ => return Ok(None),
        }
        self.sample_id(&mut id, &mut sample.metadata)?;
        Ok(Some(sample))
    }

    fn sample_type(&self) -> u64 {
        self.values.sample_type()
    }

    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L859
    // struct sample_id {
    //     { u32 pid, tid;  } && PERF_SAMPLE_TID
    //     { u64 time;      } && PERF_SAMPLE_TIME
    //     { u64 id;        } && PERF_SAMPLE_ID
    //     { u64 stream_id; } && PERF_SAMPLE_STREAM_ID
    //     { u32 cpu, res;  } && PERF_SAMPLE_CPU
    //     { u64 id;        } && PERF_SAMPLE_IDENTIFIER
    // } && perf_event_attr::sample_id_all
    fn sample_id(&self, cursor: &mut Cursor<'_>, metadata: &mut Metadata) -> Result<(), Malformed> {
        let sample_type = self.sample_type();
        let when = |flag: u32| sample_type & flag as u64 > 0;

        if when(b::PERF_SAMPLE_TID) {
            metadata.process_id = Some(cursor.u32()?);
            metadata.thread_id = Some(cursor.u32()?);
        }
        if when(b::PERF_SAMPLE_TIME) {
            let time = cursor.u64()?;
            metadata.timestamp = metadata.timestamp.or(Some(time));
        }
        if when(b::PERF_SAMPLE_ID) {
            metadata.sample_id = Some(cursor.u64()?);
        }
        if when(b::PERF_SAMPLE_STREAM_ID) {
            metadata.stream_id = Some(cursor.u64()?);
        }
        if when(b::PERF_SAMPLE_CPU) {
            metadata.cpu_id = Some(cursor.u32()?);
            cursor.skip(size_of::<u32>())?;
        }
        if when(b::PERF_SAMPLE_IDENTIFIER) {
            metadata.sample_id = Some(cursor.u64()?);
        }
        Ok(())
    }

    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L957
    // The fields follow the order of `struct perf_record_sample`, see
    // `sample_type` of `perf_event_attr` for which of them are present.
    fn sample(&self, misc: u16, body: &mut Cursor<'_>, sample: &mut Sample) -> Result<(), Malformed> {
        let values = self.values;
        let sample_type = self.sample_type();
        let when = |flag: u32| sample_type & flag as u64 > 0;

        if when(b::PERF_SAMPLE_IDENTIFIER) {
            sample.metadata.sample_id = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_IP) {
            let execution = &mut sample.instruction_execution;
            execution.logical_instruction_pointer = Some(body.u64()?);
            execution.is_instruction_pointer_exact = misc & b::PERF_RECORD_MISC_EXACT_IP as u16 > 0;
        }
        if when(b::PERF_SAMPLE_TID) {
            sample.metadata.process_id = Some(body.u32()?);
            sample.metadata.thread_id = Some(body.u32()?);
        }
        if when(b::PERF_SAMPLE_TIME) {
            sample.metadata.timestamp = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_ADDR) {
            sample.data_access.logical_memory_address = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_ID) {
            sample.metadata.sample_id = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_STREAM_ID) {
            sample.metadata.stream_id = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_CPU) {
            sample.metadata.cpu_id = Some(body.u32()?);
            body.skip(size_of::<u32>())?;
        }
        if when(b::PERF_SAMPLE_PERIOD) {
            sample.metadata.period = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_READ) {
            let stat = GroupStat::parse(body)?;
            sample.counter = self.counter_values(&stat);
        }
        if when(b::PERF_SAMPLE_CALLCHAIN) {
            let nr = body.u64()?;
            sample.instruction_execution.callchain = Some(body.u64s(nr)?);
        }
        if when(b::PERF_SAMPLE_RAW) {
            let len = body.u32()? as usize;
            sample.raw = Some(body.bytes(len)?.to_vec());
            // https://github.com/torvalds/linux/blob/v6.13/include/linux/perf_event.h#L1303
            let padding = (8 - body.position() % 8) % 8;
            body.skip(padding.min(body.remaining()))?;
        }
        if when(b::PERF_SAMPLE_BRANCH_STACK) {
            sample.branch_stack = Some(self.branch_stack(body)?);
        }
        if when(b::PERF_SAMPLE_REGS_USER) {
            sample.user_registers = registers(body, values.user_registers.map_or(0, |it| it.count()))?;
        }
        if when(b::PERF_SAMPLE_STACK_USER) {
            let size = body.u64()?;
            let size = usize::try_from(size).map_err(|_| Malformed::Count(size))?;
            let stack = body.bytes(size)?;
            let dyn_size = if size > 0 { body.u64()? as usize } else { 0 };
            sample.user_stack = Some(stack[..dyn_size.min(size)].to_vec());
        }
        if when(b::PERF_SAMPLE_WEIGHT) {
            let weight = body.u64()?;
            sample.data_access.latency.cache_access = Some(weight as u32);
        }
        if when(b::PERF_SAMPLE_WEIGHT_STRUCT) {
            // union perf_sample_weight, little-endian bitfield order
            let var1 = body.u32()?;
            let var2 = body.u16()?;
            let _var3 = body.u16()?;
            sample.data_access.latency.cache_access = Some(var1);
            sample.instruction_execution.latency.instruction_retirement = Some(var2 as u32);
        }
        if when(b::PERF_SAMPLE_DATA_SRC) {
            data_src::decode(body.u64()?, sample);
        }
        if when(b::PERF_SAMPLE_TRANSACTION) {
            let bits = body.u64()?;
            sample.instruction_execution.hardware_transaction_abort = Some(TransactionAbort::from_bits(bits));
        }
        if when(b::PERF_SAMPLE_REGS_INTR) {
            sample.kernel_registers = registers(body, values.kernel_registers.map_or(0, |it| it.count()))?;
        }
        if when(b::PERF_SAMPLE_PHYS_ADDR) {
            sample.data_access.physical_memory_address = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_CGROUP) {
            sample.cgroup_id = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_DATA_PAGE_SIZE) {
            sample.data_access.page_size = Some(body.u64()?);
        }
        if when(b::PERF_SAMPLE_CODE_PAGE_SIZE) {
            sample.instruction_execution.page_size = Some(body.u64()?);
        }
        Ok(())
    }

    // {
    //     u64 nr;
    //     { u64 from, to, flags } lbr[nr];
    // } && PERF_SAMPLE_BRANCH_STACK
    //
    // `hw_idx` and branch counters are never requested.
    fn branch_stack(&self, body: &mut Cursor<'_>) -> Result<Vec<Branch>, Malformed> {
        let nr = body.u64()?;
        let words = body.u64s(nr.checked_mul(3).ok_or(Malformed::Count(nr))?)?;
        let branches = words
            .chunks_exact(3)
            .map(|it| Branch::from_raw(it[0], it[1], it[2]))
            .collect();
        Ok(branches)
    }

    fn counter_values(&self, stat: &GroupStat) -> Option<CounterResult> {
        let (events, slots) = self.counters.as_ref()?;
        let raw = slots
            .iter()
            .filter_map(|slot| Some((slot.name.clone(), stat.value(slot.id)? as f64 * slot.scale)))
            .collect();
        match events.result(self.registry, raw, 1) {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!("cannot evaluate counter values of sample: {e}");
                None
            }
        }
    }
}

fn mode(misc: u16) -> Mode {
    match misc as u32 & b::PERF_RECORD_MISC_CPUMODE_MASK {
        b::PERF_RECORD_MISC_KERNEL => Mode::Kernel,
        b::PERF_RECORD_MISC_USER => Mode::User,
        b::PERF_RECORD_MISC_HYPERVISOR => Mode::Hypervisor,
        b::PERF_RECORD_MISC_GUEST_KERNEL => Mode::GuestKernel,
        b::PERF_RECORD_MISC_GUEST_USER => Mode::GuestUser,
        _ => Mode::Unknown,
    }
}

fn sample_id_len(sample_type: u64) -> usize {
    [
        b::PERF_SAMPLE_TID,
        b::PERF_SAMPLE_TIME,
        b::PERF_SAMPLE_ID,
        b::PERF_SAMPLE_STREAM_ID,
        b::PERF_SAMPLE_CPU,
        b::PERF_SAMPLE_IDENTIFIER,
    ]
    .into_iter()
    .filter(|it| sample_type & *it as u64 > 0)
    .count()
        * size_of::<u64>()
}

// {
//     u64 abi; # enum perf_sample_regs_abi
//     u64 regs[weight(mask)]; # if abi != 0
// }
fn registers(body: &mut Cursor<'_>, count: usize) -> Result<Option<Registers>, Malformed> {
    let abi = match body.u64()? as u32 {
        b::PERF_SAMPLE_REGS_ABI_NONE => return Ok(None),
        b::PERF_SAMPLE_REGS_ABI_32 => Abi::Abi32,
        b::PERF_SAMPLE_REGS_ABI_64 => Abi::Abi64,
        abi => return Err(Malformed::Count(abi as u64)),
    };
    let values = body.u64s(count as u64)?;
    Ok(Some(Registers { abi, values }))
}
