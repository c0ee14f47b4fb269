/// What is known about the memory access of the sampled instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataAccess {
    pub ty: Option<AccessType>,
    pub logical_memory_address: Option<u64>,
    pub physical_memory_address: Option<u64>,
    pub source: Option<DataSource>,
    pub tlb: Option<DataTlb>,
    pub latency: DataLatency,
    pub snoop: Option<Snoop>,
    pub is_misaligned: Option<bool>,
    /// Width of the access in bytes.
    pub access_width: Option<u8>,
    pub page_size: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessType {
    Load,
    Store,
    SoftwarePrefetch,
    /// Code execution.
    Execute,
}

/// Where the accessed data was found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataSource {
    pub is_l1_hit: bool,
    /// Hit in a miss handling buffer (line fill buffer on Intel).
    pub is_mhb_hit: bool,
    pub is_l2_hit: bool,
    pub is_l3_hit: bool,
    pub is_l4_hit: bool,
    pub is_memory_hit: bool,
    /// Served by another core, socket or node.
    pub is_remote: bool,
    /// Interconnect hops to the serving cache or memory, 0 if unknown.
    pub hops: u8,
    pub is_uncachable: bool,
    pub is_write_combine: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataTlb {
    pub is_l1_hit: bool,
    pub is_l2_hit: bool,
    pub is_walk: bool,
    /// Size of the page the translation hit, in bytes.
    pub l1_page_size: Option<u64>,
    pub l2_page_size: Option<u64>,
}

/// Cycle counts reported by the hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataLatency {
    pub cache_access: Option<u32>,
    pub cache_miss: Option<u32>,
    pub dtlb_refill: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snoop {
    pub is_hit: bool,
    /// Hit a modified line.
    pub is_hit_modified: bool,
    pub is_forward: bool,
    /// Served by a peer cache.
    pub is_peer: bool,
}
