use crate::sample::{AccessType, DataSource, DataTlb, Sample, Snoop};

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L1300
// u64 (little-endian):
// mem_op        0-4  5 bits, type of opcode
// mem_lvl      5-18 14 bits, memory hierarchy level
// mem_snoop   19-23  5 bits, snoop mode
// mem_lock    24-25  2 bits, lock instr
// mem_dtlb    26-32  7 bits, tlb access
// mem_lvl_num 33-36  4 bits, memory hierarchy level number
// mem_remote     37  1 bit,  remote
// mem_snoopx  38-39  2 bits, snoop mode, ext
// mem_blk     40-42  3 bits, access blocked
// mem_hops    43-45  3 bits, hop level

const OP_LOAD: u64 = 0x02;
const OP_STORE: u64 = 0x04;
const OP_PFETCH: u64 = 0x08;
const OP_EXEC: u64 = 0x10;

const LVL_NA: u64 = 0x01;
const LVL_HIT: u64 = 0x02;
const LVL_L1: u64 = 0x08;
const LVL_LFB: u64 = 0x10;
const LVL_L2: u64 = 0x20;
const LVL_L3: u64 = 0x40;
const LVL_LOC_RAM: u64 = 0x80;
const LVL_REM_RAM1: u64 = 0x100;
const LVL_REM_RAM2: u64 = 0x200;
const LVL_REM_CCE1: u64 = 0x400;
const LVL_REM_CCE2: u64 = 0x800;
const LVL_UNC: u64 = 0x2000;

const LVLNUM_L1: u64 = 0x01;
const LVLNUM_L2: u64 = 0x02;
const LVLNUM_L3: u64 = 0x03;
const LVLNUM_L4: u64 = 0x04;
const LVLNUM_L2_MHB: u64 = 0x05;
const LVLNUM_UNC: u64 = 0x08;
const LVLNUM_CXL: u64 = 0x09;
const LVLNUM_LFB: u64 = 0x0c;
const LVLNUM_RAM: u64 = 0x0d;
const LVLNUM_PMEM: u64 = 0x0e;
const LVLNUM_NA: u64 = 0x0f;

const SNOOP_NA: u64 = 0x01;
const SNOOP_HIT: u64 = 0x04;
const SNOOP_HITM: u64 = 0x10;
const SNOOPX_FWD: u64 = 0x01;
const SNOOPX_PEER: u64 = 0x02;

const LOCK_LOCKED: u64 = 0x02;

const TLB_NA: u64 = 0x01;
const TLB_HIT: u64 = 0x02;
const TLB_L1: u64 = 0x08;
const TLB_L2: u64 = 0x10;
const TLB_WK: u64 = 0x20;

fn field(bits: u64, shift: u32, width: u32) -> u64 {
    (bits >> shift) & ((1 << width) - 1)
}

/// Fills the data access of `sample` from a `perf_mem_data_src` word.
pub(super) fn decode(bits: u64, sample: &mut Sample) {
    let op = field(bits, 0, 5);
    let lvl = field(bits, 5, 14);
    let snoop = field(bits, 19, 5);
    let lock = field(bits, 24, 2);
    let tlb = field(bits, 26, 7);
    let lvl_num = field(bits, 33, 4);
    let remote = field(bits, 37, 1) > 0;
    let snoopx = field(bits, 38, 2);
    let hops = field(bits, 43, 3);

    let access = &mut sample.data_access;
    let ty = [
        (OP_LOAD, AccessType::Load),
        (OP_STORE, AccessType::Store),
        (OP_PFETCH, AccessType::SoftwarePrefetch),
        (OP_EXEC, AccessType::Execute),
    ]
    .into_iter()
    .find_map(|(flag, ty)| (op & flag > 0).then_some(ty));
    access.ty = access.ty.or(ty);

    if lvl & LVL_NA == 0 || lvl_num != LVLNUM_NA {
        let hit = lvl & LVL_HIT > 0;
        let any = |mask: u64, nums: &[u64]| hit && (lvl & mask > 0 || nums.contains(&lvl_num));
        access.source = Some(DataSource {
            is_l1_hit: any(LVL_L1, &[LVLNUM_L1]),
            is_mhb_hit: any(LVL_LFB, &[LVLNUM_LFB, LVLNUM_L2_MHB]),
            is_l2_hit: any(LVL_L2, &[LVLNUM_L2]),
            is_l3_hit: any(LVL_L3, &[LVLNUM_L3]),
            is_l4_hit: any(0, &[LVLNUM_L4]),
            is_memory_hit: any(
                LVL_LOC_RAM | LVL_REM_RAM1 | LVL_REM_RAM2,
                &[LVLNUM_RAM, LVLNUM_PMEM, LVLNUM_CXL],
            ),
            is_remote: remote || lvl & (LVL_REM_RAM1 | LVL_REM_RAM2 | LVL_REM_CCE1 | LVL_REM_CCE2) > 0,
            hops: hops as u8,
            is_uncachable: lvl & LVL_UNC > 0 || lvl_num == LVLNUM_UNC,
            is_write_combine: false,
        });
    }

    if tlb != 0 && tlb & TLB_NA == 0 {
        let hit = tlb & TLB_HIT > 0;
        access.tlb = Some(DataTlb {
            is_l1_hit: hit && tlb & TLB_L1 > 0,
            is_l2_hit: hit && tlb & TLB_L2 > 0,
            is_walk: tlb & TLB_WK > 0,
            l1_page_size: None,
            l2_page_size: None,
        });
    }

    if (snoop != 0 && snoop & SNOOP_NA == 0) || snoopx != 0 {
        access.snoop = Some(Snoop {
            is_hit: snoop & SNOOP_HIT > 0,
            is_hit_modified: snoop & SNOOP_HITM > 0,
            is_forward: snoopx & SNOOPX_FWD > 0,
            is_peer: snoopx & SNOOPX_PEER > 0,
        });
    }

    if lock & LOCK_LOCKED > 0 {
        sample.instruction_execution.is_locked = true;
    }
}
