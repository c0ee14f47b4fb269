/// What is known about the sampled instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionExecution {
    pub ty: Option<InstructionType>,
    pub logical_instruction_pointer: Option<u64>,
    pub physical_instruction_pointer: Option<u64>,
    /// The instruction pointer is the instruction that caused the event.
    pub is_instruction_pointer_exact: bool,
    pub is_locked: bool,
    pub latency: InstructionLatency,
    pub cache: Option<InstructionCache>,
    pub tlb: Option<InstructionTlb>,
    pub fetch: Option<Fetch>,
    pub branch: Option<BranchOutcome>,
    pub hardware_transaction_abort: Option<TransactionAbort>,
    /// Return addresses, innermost frame first.
    pub callchain: Option<Vec<u64>>,
    pub page_size: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstructionType {
    Load,
    Store,
    Branch,
    Return,
    /// Microcoded instruction.
    Microcode,
    Other,
}

/// Cycle counts reported by the hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionLatency {
    pub uop_tag_to_retirement: Option<u32>,
    pub uop_completion_to_retirement: Option<u32>,
    pub instruction_retirement: Option<u32>,
    pub fetch: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionCache {
    pub is_l1_miss: bool,
    pub is_l2_miss: bool,
    pub is_l3_miss: bool,
    pub is_op_cache_miss: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionTlb {
    pub is_l1_miss: bool,
    pub is_l2_miss: bool,
    /// Page size of the L1 translation in bytes.
    pub l1_page_size: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fetch {
    pub is_complete: bool,
    pub is_valid: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BranchOutcome {
    pub is_taken: bool,
    pub is_mispredicted: bool,
    /// Fused with the preceding instruction.
    pub is_fused: bool,
    pub target: Option<u64>,
}

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L282
/// Why a hardware transaction was aborted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionAbort {
    pub is_elision: bool,
    pub is_transaction: bool,
    pub is_synchronous: bool,
    pub is_asynchronous: bool,
    pub is_retry: bool,
    pub is_conflict: bool,
    pub is_capacity_write: bool,
    pub is_capacity_read: bool,
    /// User provided abort code.
    pub code: u32,
}

impl TransactionAbort {
    pub(crate) fn from_bits(bits: u64) -> Self {
        let when = |n: u32| bits & (1 << n) > 0;
        Self {
            is_elision: when(0),
            is_transaction: when(1),
            is_synchronous: when(2),
            is_asynchronous: when(3),
            is_retry: when(4),
            is_conflict: when(5),
            is_capacity_write: when(6),
            is_capacity_read: when(7),
            code: (bits >> 32) as u32,
        }
    }
}
