use super::ibs::{IbsFetch, IbsOp};
use crate::sample::Sample;

/// Decoding of vendor specific sample contents, picked once per trigger group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VendorDecoder {
    #[default]
    Generic,
    /// The group is led by the auxiliary counter some Intel CPUs need
    /// for sampling memory loads; its own samples are dropped.
    IntelAux { aux_id: u64 },
    /// Raw payloads are AMD IBS op registers.
    AmdIbsOp,
    /// Raw payloads are AMD IBS fetch registers.
    AmdIbsFetch,
}

impl VendorDecoder {
    /// Whether `sample` belongs in the results.
    pub(crate) fn keep(&self, sample: &Sample) -> bool {
        match self {
            Self::IntelAux { aux_id } => sample.metadata.sample_id != Some(*aux_id),
            _ => true,
        }
    }

    /// Fills the fields of `sample` only found in its raw payload.
    pub(crate) fn apply(&self, sample: &mut Sample) {
        let Some(raw) = sample.raw.as_deref() else {
            return;
        };
        let decoded = match self {
            Self::AmdIbsOp => IbsOp::parse(raw).map(|op| op.apply(sample)),
            Self::AmdIbsFetch => IbsFetch::parse(raw).map(|fetch| fetch.apply(sample)),
            Self::Generic | Self::IntelAux { .. } => Ok(()),
        };
        if let Err(e) = decoded {
            log::warn!("cannot decode IBS payload: {e}");
        }
    }
}
