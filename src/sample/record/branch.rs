/// One entry of the branch stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Branch {
    pub from: u64,
    pub to: u64,
    pub is_mispredicted: bool,
    pub is_predicted: bool,
    pub is_in_transaction: bool,
    pub is_transaction_abort: bool,
    /// Cycles since the previous branch, 0 if not supported.
    pub cycles: u16,
    pub ty: BranchType,
}

impl Branch {
    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L1439
    // mispred     0  1 bit
    // predicted   1  1 bit
    // in_tx       2  1 bit
    // abort       3  1 bit
    // cycles   4-19 16 bits
    // type    20-23  4 bits
    pub(crate) fn from_raw(from: u64, to: u64, flags: u64) -> Self {
        Self {
            from,
            to,
            is_mispredicted: flags & 0b1 > 0,
            is_predicted: flags & 0b10 > 0,
            is_in_transaction: flags & 0b100 > 0,
            is_transaction_abort: flags & 0b1000 > 0,
            cycles: (flags >> 4) as u16,
            ty: BranchType::from_raw((flags >> 20) & 0b1111),
        }
    }
}

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L251
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchType {
    #[default]
    Unknown,
    Conditional,
    Unconditional,
    Indirect,
    Call,
    IndirectCall,
    Return,
    Syscall,
    SyscallReturn,
    ConditionalCall,
    ConditionalReturn,
    ExceptionReturn,
    Interrupt,
    SystemError,
    NoTransaction,
}

impl BranchType {
    fn from_raw(ty: u64) -> Self {
        match ty {
            1 => Self::Conditional,
            2 => Self::Unconditional,
            3 => Self::Indirect,
            4 => Self::Call,
            5 => Self::IndirectCall,
            6 => Self::Return,
            7 => Self::Syscall,
            8 => Self::SyscallReturn,
            9 => Self::ConditionalCall,
            10 => Self::ConditionalReturn,
            11 => Self::ExceptionReturn,
            12 => Self::Interrupt,
            13 => Self::SystemError,
            14 => Self::NoTransaction,
            // 15 extends the type into `new_type`, not decoded.
            _ => Self::Unknown,
        }
    }
}
