use arrayvec::ArrayVec;

use super::MAX_MEMBERS;
use crate::cursor::{Cursor, Malformed};

/// Values of a whole group, as returned by one read of its leader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupStat {
    pub time_enabled: u64,
    pub time_running: u64,
    pub members: ArrayVec<MemberStat, MAX_MEMBERS>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemberStat {
    pub value: u64,
    pub id: u64,
}

impl GroupStat {
    // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L344
    // struct read_format {
    //     u64 nr;
    //     u64 time_enabled;
    //     u64 time_running;
    //     {
    //         u64 value;
    //         u64 id;
    //     } cntr[nr];
    // };
    //
    // This is the layout for `config::attr::READ_FORMAT`, used by every group
    // we open. `PERF_SAMPLE_READ` embeds the same structure in samples.
    pub(crate) fn parse(cursor: &mut Cursor<'_>) -> Result<Self, Malformed> {
        let nr = cursor.u64()?;
        if nr > MAX_MEMBERS as u64 {
            return Err(Malformed::Count(nr));
        }
        let time_enabled = cursor.u64()?;
        let time_running = cursor.u64()?;

        let mut members = ArrayVec::new();
        for _ in 0..nr {
            let value = cursor.u64()?;
            let id = cursor.u64()?;
            // Bounded by the check on `nr` above.
            let _ = members.try_push(MemberStat { value, id });
        }

        Ok(Self {
            time_enabled,
            time_running,
            members,
        })
    }

    pub(crate) fn read_buf_len(members: usize) -> usize {
        (3 + 2 * members) * size_of::<u64>()
    }

    /// Value of the member with the kernel assigned `id`.
    pub fn value(&self, id: u64) -> Option<u64> {
        self.members.iter().find(|it| it.id == id).map(|it| it.value)
    }
}

#[cfg(test)]
mod test {
    use super::GroupStat;
    use crate::cursor::{Cursor, Malformed};

    fn words(words: &[u64]) -> Vec<u8> {
        words.iter().flat_map(|it| it.to_ne_bytes()).collect()
    }

    #[test]
    fn test_parse_group() {
        let buf = words(&[2, 100, 50, 7, 11, 9, 10]);
        let stat = GroupStat::parse(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(stat.time_enabled, 100);
        assert_eq!(stat.time_running, 50);
        assert_eq!(stat.value(10), Some(9));
        assert_eq!(stat.value(11), Some(7));
        assert_eq!(stat.value(12), None);
        assert_eq!(buf.len(), GroupStat::read_buf_len(2));
    }

    #[test]
    fn test_parse_rejects_oversized_group() {
        let buf = words(&[13, 0, 0]);
        assert_eq!(
            GroupStat::parse(&mut Cursor::new(&buf)),
            Err(Malformed::Count(13))
        );
    }
}
