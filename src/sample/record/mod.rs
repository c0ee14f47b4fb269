//! Decoded samples and the records the kernel interleaves with them.

mod access;
mod branch;
mod execution;

pub use access::*;
pub use branch::*;
pub use execution::*;

use crate::count::CounterResult;

/// One decoded record.
///
/// Values not requested through [`Values`][super::Values] are `None`.
/// Records other than samples carry their payload in
/// [`count_loss`][Self::count_loss], [`context_switch`][Self::context_switch],
/// [`cgroup`][Self::cgroup] or [`throttle`][Self::throttle], plus whatever
/// metadata the kernel appends to them.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub metadata: Metadata,
    pub instruction_execution: InstructionExecution,
    pub data_access: DataAccess,

    /// Values of [`Values::counter`][super::Values::counter] at sample time.
    pub counter: Option<CounterResult>,
    /// Recent branches, newest first.
    pub branch_stack: Option<Vec<Branch>>,
    pub user_registers: Option<Registers>,
    pub kernel_registers: Option<Registers>,
    pub user_stack: Option<Vec<u8>>,
    /// Cgroup of the sampled task, see [`CGroup::id`].
    pub cgroup_id: Option<u64>,
    /// Opaque PMU payload.
    pub raw: Option<Vec<u8>>,

    /// Number of samples the kernel dropped.
    pub count_loss: Option<u64>,
    pub context_switch: Option<ContextSwitch>,
    pub cgroup: Option<CGroup>,
    pub throttle: Option<Throttle>,
}

impl Sample {
    /// Whether this is a sample as opposed to one of the other records.
    pub fn is_sample(&self) -> bool {
        self.count_loss.is_none()
            && self.context_switch.is_none()
            && self.cgroup.is_none()
            && self.throttle.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metadata {
    pub mode: Mode,
    /// Id of the counter that emitted the record.
    pub sample_id: Option<u64>,
    /// Id of the group leader if inherited, the counter id otherwise.
    pub stream_id: Option<u64>,
    pub timestamp: Option<u64>,
    pub period: Option<u64>,
    pub cpu_id: Option<u32>,
    pub process_id: Option<u32>,
    pub thread_id: Option<u32>,
}

/// CPU mode at the time of the record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    #[default]
    Unknown,
    Kernel,
    User,
    Hypervisor,
    GuestKernel,
    GuestUser,
}

/// Register values, in the order of the bits set in the requested mask.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Registers {
    pub abi: Abi,
    pub values: Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Abi {
    Abi32,
    Abi64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContextSwitch {
    /// Switched out of, rather than into, the monitored task.
    pub is_out: bool,
    /// Switched out while still runnable.
    pub is_preempt: bool,
    /// The task switched to or from, only known for CPU-wide monitoring.
    pub process_id: Option<u32>,
    pub thread_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CGroup {
    pub id: u64,
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Throttle {
    /// `false` if the kernel lifted the throttling.
    pub is_throttle: bool,
}
