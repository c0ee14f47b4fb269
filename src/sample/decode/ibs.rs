//! AMD Instruction Based Sampling payloads.
//!
//! The kernel writes the raw IBS registers into `PERF_SAMPLE_RAW`, prefixed
//! by a `u32` with the capabilities of the PMU.
//!
//! Register layouts follow the AMD Processor Programming Reference for
//! family 19h. Earlier families leave some of the bits reserved and later
//! ones may reassign them, so decoded values are only as good as the match
//! between this layout and the CPU that produced them.

use crate::cursor::{Cursor, Malformed};
use crate::sample::{
    AccessType, BranchOutcome, DataSource, DataTlb, Fetch, InstructionCache, InstructionTlb,
    InstructionType, Sample,
};

const RAW_OFFSET: usize = size_of::<u32>();

const PAGE_4K: u64 = 4 << 10;
const PAGE_2M: u64 = 2 << 20;
const PAGE_1G: u64 = 1 << 30;

macro_rules! bits {
    ($ty:ident { $($name:ident: $lo:literal $(..= $hi:literal)?,)* }) => {
        impl $ty {
            $(bits!(@field $name, $lo $(, $hi)?);)*
        }
    };
    (@field $name:ident, $bit:literal) => {
        pub fn $name(&self) -> bool {
            (self.0 >> $bit) & 1 == 1
        }
    };
    (@field $name:ident, $lo:literal, $hi:literal) => {
        pub fn $name(&self) -> u64 {
            (self.0 >> $lo) & ((1 << ($hi - $lo + 1)) - 1)
        }
    };
}

/// `IBS_FETCH_CTL`, MSR C001_1030.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IbsFetchControl(pub u64);

bits!(IbsFetchControl {
    max_count: 0..=15,
    count: 16..=31,
    latency: 32..=47,
    enable: 48,
    valid: 49,
    complete: 50,
    icache_miss: 51,
    physical_address_valid: 52,
    l1_tlb_page_size: 53..=54,
    l1_tlb_miss: 55,
    l2_tlb_miss: 56,
    random: 57,
    l2_miss: 58,
    l3_miss_only: 59,
    op_cache_miss: 60,
    l3_miss: 61,
});

/// `IBS_OP_DATA`, MSR C001_1035.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IbsOpData1(pub u64);

bits!(IbsOpData1 {
    completion_to_retire: 0..=15,
    tag_to_retire: 16..=31,
    is_return: 34,
    is_branch_taken: 35,
    is_branch_mispredicted: 36,
    is_branch_retired: 37,
    is_rip_invalid: 38,
    is_branch_fused: 39,
    is_microcode: 40,
});

/// `IBS_OP_DATA2`, MSR C001_1036.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IbsOpData2(pub u64);

bits!(IbsOpData2 {
    data_source_low: 0..=2,
    is_remote_node: 4,
    is_cache_hit_state: 5,
    data_source_high: 6..=7,
});

impl IbsOpData2 {
    pub fn data_source(&self) -> u64 {
        self.data_source_high() << 3 | self.data_source_low()
    }
}

/// `IBS_OP_DATA3`, MSR C001_1037.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IbsOpData3(pub u64);

bits!(IbsOpData3 {
    is_load: 0,
    is_store: 1,
    is_l1_tlb_miss: 2,
    is_l2_tlb_miss: 3,
    is_l1_tlb_hit_2m: 4,
    is_l1_tlb_hit_1g: 5,
    is_l2_tlb_hit_2m: 6,
    is_dcache_miss: 7,
    is_misaligned: 8,
    is_write_combine: 13,
    is_uncachable: 14,
    is_locked: 15,
    is_miss_without_mab: 16,
    is_linear_address_valid: 17,
    is_physical_address_valid: 18,
    is_l2_tlb_hit_1g: 19,
    is_l2_miss: 20,
    is_software_prefetch: 21,
    memory_width: 22..=25,
    open_memory_requests: 26..=31,
    dcache_miss_latency: 32..=47,
    tlb_refill_latency: 48..=63,
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IbsFetch {
    pub control: IbsFetchControl,
    pub linear_address: u64,
    pub physical_address: u64,
}

impl IbsFetch {
    pub(crate) fn parse(raw: &[u8]) -> Result<Self, Malformed> {
        let mut cursor = Cursor::new(raw);
        cursor.skip(RAW_OFFSET)?;
        Ok(Self {
            control: IbsFetchControl(cursor.u64()?),
            linear_address: cursor.u64()?,
            physical_address: cursor.u64()?,
        })
    }

    pub(crate) fn apply(&self, sample: &mut Sample) {
        let ctl = self.control;
        let execution = &mut sample.instruction_execution;

        execution.fetch = Some(Fetch {
            is_complete: ctl.complete(),
            is_valid: ctl.valid(),
        });
        execution.latency.fetch = Some(ctl.latency() as u32);
        execution.logical_instruction_pointer =
            execution.logical_instruction_pointer.or(Some(self.linear_address));
        if ctl.physical_address_valid() {
            execution.physical_instruction_pointer = Some(self.physical_address);
        }
        execution.cache = Some(InstructionCache {
            is_l1_miss: ctl.icache_miss(),
            is_l2_miss: ctl.l2_miss(),
            is_l3_miss: ctl.l3_miss(),
            is_op_cache_miss: ctl.op_cache_miss(),
        });
        execution.tlb = Some(InstructionTlb {
            is_l1_miss: ctl.l1_tlb_miss(),
            is_l2_miss: ctl.l2_tlb_miss(),
            l1_page_size: match (ctl.l1_tlb_miss(), ctl.l1_tlb_page_size()) {
                (false, 0) => Some(PAGE_4K),
                (false, 1) => Some(PAGE_2M),
                (false, 2) => Some(PAGE_1G),
                _ => None,
            },
        });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IbsOp {
    pub control: u64,
    pub linear_instruction_pointer: u64,
    pub data1: IbsOpData1,
    pub data2: IbsOpData2,
    pub data3: IbsOpData3,
    pub linear_memory_address: u64,
    pub physical_memory_address: u64,
    /// Only written by CPUs with the branch target capability.
    pub branch_target: Option<u64>,
}

impl IbsOp {
    pub(crate) fn parse(raw: &[u8]) -> Result<Self, Malformed> {
        let mut cursor = Cursor::new(raw);
        cursor.skip(RAW_OFFSET)?;
        let control = cursor.u64()?;
        let linear_instruction_pointer = cursor.u64()?;
        let data1 = IbsOpData1(cursor.u64()?);
        let data2 = IbsOpData2(cursor.u64()?);
        let data3 = IbsOpData3(cursor.u64()?);
        let linear_memory_address = cursor.u64()?;
        let physical_memory_address = cursor.u64()?;
        let branch_target = cursor.u64().ok();
        Ok(Self {
            control,
            linear_instruction_pointer,
            data1,
            data2,
            data3,
            linear_memory_address,
            physical_memory_address,
            branch_target,
        })
    }

    pub(crate) fn apply(&self, sample: &mut Sample) {
        let (data1, data2, data3) = (self.data1, self.data2, self.data3);
        let is_memory = data3.is_load() || data3.is_store();

        let execution = &mut sample.instruction_execution;
        execution.ty = Some(if data1.is_return() {
            InstructionType::Return
        } else if data1.is_branch_retired() {
            InstructionType::Branch
        } else if data3.is_load() {
            InstructionType::Load
        } else if data3.is_store() {
            InstructionType::Store
        } else if data1.is_microcode() {
            InstructionType::Microcode
        } else {
            InstructionType::Other
        });
        if !data1.is_rip_invalid() {
            execution.logical_instruction_pointer = execution
                .logical_instruction_pointer
                .or(Some(self.linear_instruction_pointer));
        }
        execution.latency.uop_tag_to_retirement = Some(data1.tag_to_retire() as u32);
        execution.latency.uop_completion_to_retirement = Some(data1.completion_to_retire() as u32);
        execution.is_locked |= data3.is_locked();
        if data1.is_branch_retired() {
            execution.branch = Some(BranchOutcome {
                is_taken: data1.is_branch_taken(),
                is_mispredicted: data1.is_branch_mispredicted(),
                is_fused: data1.is_branch_fused(),
                target: self.branch_target.filter(|_| data1.is_branch_taken()),
            });
        }

        if !is_memory {
            return;
        }
        let access = &mut sample.data_access;
        access.ty = Some(if data3.is_software_prefetch() {
            AccessType::SoftwarePrefetch
        } else if data3.is_load() {
            AccessType::Load
        } else {
            AccessType::Store
        });
        if data3.is_linear_address_valid() {
            access.logical_memory_address = Some(self.linear_memory_address);
        }
        if data3.is_physical_address_valid() {
            access.physical_memory_address = Some(self.physical_memory_address);
        }

        let l1_miss = data3.is_l1_tlb_miss();
        let l2_miss = data3.is_l2_tlb_miss();
        access.tlb = Some(DataTlb {
            is_l1_hit: !l1_miss,
            is_l2_hit: l1_miss && !l2_miss,
            is_walk: l2_miss,
            l1_page_size: (!l1_miss)
                .then(|| page_size(data3.is_l1_tlb_hit_1g(), data3.is_l1_tlb_hit_2m())),
            l2_page_size: (l1_miss && !l2_miss)
                .then(|| page_size(data3.is_l2_tlb_hit_1g(), data3.is_l2_tlb_hit_2m())),
        });

        if data3.is_dcache_miss() {
            access.latency.cache_miss = Some(data3.dcache_miss_latency() as u32);
        }
        if l1_miss {
            access.latency.dtlb_refill = Some(data3.tlb_refill_latency() as u32);
        }
        access.is_misaligned = Some(data3.is_misaligned());
        access.access_width = match data3.memory_width() {
            0 => None,
            width @ 1..=7 => Some(1 << (width - 1)),
            _ => None,
        };

        // The data source is only reported for loads.
        if data3.is_load() {
            access.source = Some(source(data2, data3));
        }
    }
}

fn page_size(is_1g: bool, is_2m: bool) -> u64 {
    if is_1g {
        PAGE_1G
    } else if is_2m {
        PAGE_2M
    } else {
        PAGE_4K
    }
}

// https://github.com/torvalds/linux/blob/v6.13/arch/x86/events/amd/ibs.c#L791
fn source(data2: IbsOpData2, data3: IbsOpData3) -> DataSource {
    const LOCAL_CACHE: u64 = 0x1;
    const NEAR_CCX_CACHE: u64 = 0x2;
    const DRAM: u64 = 0x3;
    const FAR_CCX_CACHE: u64 = 0x5;
    const EXT_MEM: u64 = 0x8;

    let miss = data3.is_dcache_miss();
    let mut source = DataSource {
        is_l1_hit: !miss,
        is_mhb_hit: miss && data3.is_miss_without_mab(),
        is_l2_hit: miss && !data3.is_l2_miss(),
        is_remote: data2.is_remote_node(),
        is_uncachable: data3.is_uncachable(),
        is_write_combine: data3.is_write_combine(),
        ..Default::default()
    };
    if miss && data3.is_l2_miss() {
        match data2.data_source() {
            LOCAL_CACHE => source.is_l3_hit = true,
            NEAR_CCX_CACHE => {
                source.is_l3_hit = true;
                source.is_remote = true;
            }
            FAR_CCX_CACHE => {
                source.is_l3_hit = true;
                source.is_remote = true;
                source.hops = 1;
            }
            DRAM | EXT_MEM => source.is_memory_hit = true,
            _ => {}
        }
    }
    source
}
