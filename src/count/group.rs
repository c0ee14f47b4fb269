use std::fs::File;

use super::{Counter, CounterConfig, GroupStat, OpenMode, MAX_MEMBERS};
use crate::config::Config;
use crate::cursor::Cursor;
use crate::ffi::syscall::{disable, enable, read, reset};
use crate::{Error, Result};

/// Counter group.
///
/// An event group is scheduled onto the CPU as a unit: it will be put onto
/// the CPU only if all of the events in the group can be put onto the CPU.
///
/// The first member is the leader, every other member is opened against it
/// and the kernel enables, disables and reads all of them through the leader.
#[derive(Default)]
pub struct Group {
    members: Vec<Counter>,
    start: Option<GroupStat>,
    end: Option<GroupStat>,
    started: bool,
}

impl Group {
    pub const MAX_MEMBERS: usize = MAX_MEMBERS;

    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a counter, it is opened with the rest of the group.
    pub fn add(&mut self, config: CounterConfig) -> Result<()> {
        if self.members.len() >= MAX_MEMBERS {
            return Err(Error::MaxMembersReached { limit: MAX_MEMBERS });
        }
        self.members.push(Counter::new(config));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Counter] {
        &self.members
    }

    pub(crate) fn members_mut(&mut self) -> &mut [Counter] {
        &mut self.members
    }

    pub fn leader(&self) -> Option<&Counter> {
        self.members.first()
    }

    pub fn is_open(&self) -> bool {
        self.leader().is_some_and(Counter::is_open)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Opens every member for counting.
    pub fn open(&mut self, config: &Config) -> Result<()> {
        self.open_with(config, |_, _| OpenMode::Counting)
    }

    /// Opens every member in order, with the mode picked by `mode` for
    /// the member at a given index.
    ///
    /// The first failure closes the members opened so far.
    pub(crate) fn open_with<'a, F>(&mut self, config: &Config, mode: F) -> Result<()>
    where
        F: Fn(usize, &CounterConfig) -> OpenMode<'a>,
    {
        if self.members.is_empty() {
            return Err(Error::EmptyGroup);
        }
        if let Err(e) = self.try_open(config, &mode) {
            self.close();
            return Err(e);
        }
        log::debug!("opened group of {} counters", self.members.len());
        Ok(())
    }

    fn try_open<'a, F>(&mut self, config: &Config, mode: &F) -> Result<()>
    where
        F: Fn(usize, &CounterConfig) -> OpenMode<'a>,
    {
        let (leader, siblings) = self.members.split_at_mut(1);
        let leader = &mut leader[0];
        let leader_mode = mode(0, leader.config());
        leader.open(config, None, &leader_mode)?;

        let leader: &File = leader.file().ok_or(Error::GroupNotOpened)?;
        for (i, counter) in siblings.iter_mut().enumerate() {
            let mode = mode(i + 1, counter.config());
            counter.open(config, Some(leader), &mode)?;
        }
        Ok(())
    }

    /// Resets and enables the whole group, then takes the start snapshot.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::GroupAlreadyStarted);
        }
        let leader = self.leader().ok_or(Error::EmptyGroup)?;
        let perf = leader.file().ok_or(Error::GroupNotOpened)?;

        reset(perf, true).map_err(Error::Reset)?;
        enable(perf, true).map_err(Error::Enable)?;
        self.start = Some(self.read()?);
        self.end = None;
        self.started = true;
        Ok(())
    }

    /// Takes the end snapshot and disables the whole group.
    ///
    /// Stopping a group that is not started does nothing.
    pub fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        let end = self.read()?;
        let perf = self
            .leader()
            .and_then(Counter::file)
            .ok_or(Error::GroupNotOpened)?;
        disable(perf, true).map_err(Error::Disable)?;
        self.end = Some(end);
        self.started = false;
        Ok(())
    }

    /// Reads all members with one syscall on the leader.
    pub fn read(&self) -> Result<GroupStat> {
        let leader = self.leader().ok_or(Error::EmptyGroup)?;
        let perf = leader.file().ok_or(Error::GroupNotOpened)?;

        let mut buf = vec![0; GroupStat::read_buf_len(self.members.len())];
        let len = read(perf, &mut buf).map_err(Error::Read)?;
        GroupStat::parse(&mut Cursor::new(&buf[..len]))
            .map_err(|_| Error::ReadFormat("truncated group read"))
    }

    /// Value counted by the member at `index` between start and stop.
    ///
    /// The kernel does not guarantee the order of the read entries,
    /// so members are matched by id.
    pub fn get(&self, index: usize) -> Option<u64> {
        let id = self.members.get(index)?.id()?;
        let end = self.end.as_ref()?.value(id)?;
        let start = self.start.as_ref().and_then(|it| it.value(id)).unwrap_or(0);
        Some(end.saturating_sub(start))
    }

    /// Multiplexing correction of the last start/stop interval.
    pub fn correction(&self) -> f64 {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => multiplexing_correction(
                end.time_enabled.saturating_sub(start.time_enabled),
                end.time_running.saturating_sub(start.time_running),
            ),
            _ => 1.0,
        }
    }

    /// Closes every member, the group can not be opened again.
    pub fn close(&mut self) {
        self.started = false;
        for counter in self.members.iter_mut().rev() {
            counter.close();
        }
    }
}

/// Factor that scales a multiplexed count up to the full enabled time.
///
/// Never below 1.0, and exactly 1.0 if the events did not run at all.
pub fn multiplexing_correction(enabled: u64, running: u64) -> f64 {
    if running == 0 {
        return 1.0;
    }
    (enabled as f64 / running as f64).max(1.0)
}
