//! Facts about the host CPU and its perf PMUs.

use std::fs::read_to_string;
use std::io::{Error, Result};
use std::path::Path;
use std::sync::LazyLock;

use crate::ffi::PAGE_SIZE;

pub(crate) const SYSFS_PMU_ROOT: &str = "/sys/bus/event_source/devices";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vendor {
    Intel,
    Amd,
    Other,
}

static VENDOR: LazyLock<Vendor> = LazyLock::new(detect_vendor);

#[cfg(target_arch = "x86_64")]
fn cpuid(leaf: u32) -> core::arch::x86_64::CpuidResult {
    #[allow(unused_unsafe)]
    unsafe {
        core::arch::x86_64::__cpuid(leaf)
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_vendor() -> Vendor {
    let result = cpuid(0);
    let mut id = [0; 12];
    id[..4].copy_from_slice(&result.ebx.to_le_bytes());
    id[4..8].copy_from_slice(&result.edx.to_le_bytes());
    id[8..].copy_from_slice(&result.ecx.to_le_bytes());
    match &id {
        b"GenuineIntel" => Vendor::Intel,
        b"AuthenticAMD" => Vendor::Amd,
        _ => Vendor::Other,
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_vendor() -> Vendor {
    Vendor::Other
}

pub fn vendor() -> Vendor {
    *VENDOR
}

pub fn is_intel() -> bool {
    vendor() == Vendor::Intel
}

pub fn is_amd() -> bool {
    vendor() == Vendor::Amd
}

/// Number of general purpose hardware counters of one logical core.
///
/// Falls back to 4 when the CPU does not report it.
pub fn physical_counters_per_core() -> usize {
    static COUNTERS: LazyLock<usize> = LazyLock::new(detect_physical_counters);
    *COUNTERS
}

#[cfg(target_arch = "x86_64")]
fn detect_physical_counters() -> usize {
    const FALLBACK: usize = 4;
    match vendor() {
        Vendor::Intel => {
            // Architectural performance monitoring leaf, EAX[15:8].
            if cpuid(0).eax < 0xa {
                return FALLBACK;
            }
            match (cpuid(0xa).eax >> 8) & 0xff {
                0 => FALLBACK,
                n => n as usize,
            }
        }
        Vendor::Amd => {
            let max_ext = cpuid(0x8000_0000).eax;
            if max_ext >= 0x8000_0022 {
                // PerfMonV2 reports the core counters in EBX[3:0].
                let n = cpuid(0x8000_0022).ebx & 0xf;
                if n > 0 {
                    return n as usize;
                }
            }
            // PerfCtrExtCore
            if max_ext >= 0x8000_0001 && (cpuid(0x8000_0001).ecx >> 23) & 1 == 1 {
                6
            } else {
                FALLBACK
            }
        }
        Vendor::Other => FALLBACK,
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_physical_counters() -> usize {
    4
}

/// Intel cores since Sapphire Rapids only sample memory loads together
/// with the `mem-loads-aux` event as group leader.
pub fn is_intel_aux_counter_required() -> bool {
    static REQUIRED: LazyLock<bool> = LazyLock::new(|| {
        is_intel()
            && ["cpu", "cpu_core"].iter().any(|pmu| {
                Path::new(SYSFS_PMU_ROOT)
                    .join(pmu)
                    .join("events/mem-loads-aux")
                    .exists()
            })
    });
    *REQUIRED
}

/// Whether the AMD instruction based sampling PMUs are available.
pub fn is_amd_ibs_supported() -> bool {
    is_amd() && Path::new(SYSFS_PMU_ROOT).join("ibs_op").exists()
}

/// Whether IBS can restrict sampling to operations missing the L3 cache.
pub fn is_ibs_l3_filter_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        if !is_amd_ibs_supported() || cpuid(0x8000_0000).eax < 0x8000_001b {
            return false;
        }
        // IbsFetchCtlExtd.L3MissOnly / IbsOpCtl.L3MissOnly, 0x8000_001B EAX[11].
        (cpuid(0x8000_001b).eax >> 11) & 1 == 1
    }
    #[cfg(not(target_arch = "x86_64"))]
    false
}

pub fn memory_page_size() -> usize {
    *PAGE_SIZE
}

/// Type id of a dynamic PMU, as found in `/sys/bus/event_source/devices/<pmu>/type`.
pub fn pmu_type(pmu: &str) -> Result<u32> {
    let path = Path::new(SYSFS_PMU_ROOT).join(pmu).join("type");
    let ty = read_to_string(path)?;
    ty.trim().parse::<u32>().map_err(Error::other)
}
