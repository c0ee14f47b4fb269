use crate::ffi::bindings as b;

/// What the kernel writes into every sample.
///
/// Each field enables one `PERF_SAMPLE_*` bit, fields left at their
/// default are not recorded and stay `None` in decoded [`Sample`][super::Sample]s.
///
/// ```rust
/// use perf_monitor::sample::Values;
///
/// let values = Values {
///     instruction_pointer: true,
///     timestamp: true,
///     counter: vec!["cycles".into(), "instructions-per-cycle".into()],
///     ..Default::default()
/// };
/// assert!(values.is_counter_requested());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Values {
    pub instruction_pointer: bool,
    /// Process and thread id.
    pub thread_id: bool,
    pub timestamp: bool,
    pub logical_memory_address: bool,
    pub stream_id: bool,
    /// Opaque PMU payload, required for decoding AMD IBS samples.
    pub raw: bool,
    /// Events and metrics whose values are read into every sample.
    pub counter: Vec<String>,
    /// Maximum depth of the sampled call chain.
    pub callchain: Option<u16>,
    pub cpu_id: bool,
    pub period: bool,
    /// Branch kinds recorded in the branch stack, empty for none.
    pub branch_stack: Vec<BranchSampleType>,
    pub user_registers: Option<RegsMask>,
    /// A hardware provided cost of the sampled event, usually a latency.
    pub weight: bool,
    pub data_source: bool,
    pub hardware_transaction_abort: bool,
    /// Id of the counter that emitted the sample.
    pub identifier: bool,
    pub kernel_registers: Option<RegsMask>,
    /// Bytes of the user stack copied into every sample.
    pub user_stack: Option<u32>,
    pub physical_memory_address: bool,
    /// Cgroup id of every sample plus a record for every new cgroup.
    pub cgroup: bool,
    pub data_page_size: bool,
    pub code_page_size: bool,
    /// Like [`weight`][Self::weight], split into the parts some CPUs report.
    pub weight_struct: bool,
    /// Records for every context switch of the monitored task.
    pub context_switch: bool,
    /// Keep the records of the kernel throttling the sample rate.
    pub throttle: bool,
}

impl Values {
    pub fn is_counter_requested(&self) -> bool {
        !self.counter.is_empty()
    }

    pub fn is_branch_stack_requested(&self) -> bool {
        !self.branch_stack.is_empty()
    }

    /// The `perf_event_attr.sample_type` enabling every requested value.
    pub fn sample_type(&self) -> u64 {
        let mut sample_type = 0;
        macro_rules! when {
            ($cond:expr, $flag:ident) => {
                if $cond {
                    sample_type |= b::$flag as u64;
                }
            };
        }

        when!(self.identifier, PERF_SAMPLE_IDENTIFIER);
        when!(self.instruction_pointer, PERF_SAMPLE_IP);
        when!(self.thread_id, PERF_SAMPLE_TID);
        when!(self.timestamp, PERF_SAMPLE_TIME);
        when!(self.logical_memory_address, PERF_SAMPLE_ADDR);
        when!(self.stream_id, PERF_SAMPLE_STREAM_ID);
        when!(self.cpu_id, PERF_SAMPLE_CPU);
        when!(self.period, PERF_SAMPLE_PERIOD);
        when!(self.is_counter_requested(), PERF_SAMPLE_READ);
        when!(self.callchain.is_some(), PERF_SAMPLE_CALLCHAIN);
        when!(self.raw, PERF_SAMPLE_RAW);
        when!(self.is_branch_stack_requested(), PERF_SAMPLE_BRANCH_STACK);
        when!(self.user_registers.is_some(), PERF_SAMPLE_REGS_USER);
        when!(self.user_stack.is_some(), PERF_SAMPLE_STACK_USER);
        // The kernel rejects both weight formats at once.
        when!(self.weight && !self.weight_struct, PERF_SAMPLE_WEIGHT);
        when!(self.weight_struct, PERF_SAMPLE_WEIGHT_STRUCT);
        when!(self.data_source, PERF_SAMPLE_DATA_SRC);
        when!(self.hardware_transaction_abort, PERF_SAMPLE_TRANSACTION);
        when!(self.kernel_registers.is_some(), PERF_SAMPLE_REGS_INTR);
        when!(self.physical_memory_address, PERF_SAMPLE_PHYS_ADDR);
        when!(self.cgroup, PERF_SAMPLE_CGROUP);
        when!(self.data_page_size, PERF_SAMPLE_DATA_PAGE_SIZE);
        when!(self.code_page_size, PERF_SAMPLE_CODE_PAGE_SIZE);

        sample_type
    }

    /// The `perf_event_attr.branch_sample_type`, 0 if no branches are recorded.
    pub fn branch_sample_type(&self) -> u64 {
        self.branch_stack
            .iter()
            .fold(0, |acc, it| acc | it.as_branch_sample_type())
    }
}

/// Bit mask of sampled registers, bit `n` selects register `n` of `perf_regs.h`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegsMask(pub u64);

impl RegsMask {
    /// Number of registers the kernel writes for this mask.
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }
}

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L186
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchSampleType {
    /// Branches in user space.
    User,
    /// Branches in kernel space.
    Kernel,
    /// Branches in the hypervisor.
    Hypervisor,
    Any,
    AnyCall,
    AnyReturn,
    IndirectCall,
    Conditional,
    Call,
    IndirectJump,
    /// Do not record the cycle count of branches.
    NoCycles,
    /// Record the branch type in every entry.
    BranchType,
}

impl BranchSampleType {
    fn as_branch_sample_type(self) -> u64 {
        let flag = match self {
            Self::User => b::PERF_SAMPLE_BRANCH_USER,
            Self::Kernel => b::PERF_SAMPLE_BRANCH_KERNEL,
            Self::Hypervisor => b::PERF_SAMPLE_BRANCH_HV,
            Self::Any => b::PERF_SAMPLE_BRANCH_ANY,
            Self::AnyCall => b::PERF_SAMPLE_BRANCH_ANY_CALL,
            Self::AnyReturn => b::PERF_SAMPLE_BRANCH_ANY_RETURN,
            Self::IndirectCall => b::PERF_SAMPLE_BRANCH_IND_CALL,
            Self::Conditional => b::PERF_SAMPLE_BRANCH_COND,
            Self::Call => b::PERF_SAMPLE_BRANCH_CALL,
            Self::IndirectJump => b::PERF_SAMPLE_BRANCH_IND_JUMP,
            Self::NoCycles => b::PERF_SAMPLE_BRANCH_NO_CYCLES,
            Self::BranchType => b::PERF_SAMPLE_BRANCH_TYPE_SAVE,
        };
        flag as u64
    }
}
