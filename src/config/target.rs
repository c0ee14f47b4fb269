use crate::{Error, Result};

/// Process to monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Process {
    /// The calling process (or thread).
    #[default]
    Calling,
    /// Any process, requires a concrete CPU core.
    Any,
    /// A specific process (or thread) id.
    Pid(i32),
}

/// CPU core to monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cpu {
    /// Any core the monitored process runs on.
    #[default]
    Any,
    Core(u16),
}

/// The `pid`/`cpu` pair passed to `perf_event_open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub(crate) pid: i32,
    pub(crate) cpu: i32,
}

impl Target {
    pub fn new(process: Process, cpu: Cpu) -> Result<Self> {
        let pid = match process {
            Process::Calling => 0,
            Process::Any => -1,
            Process::Pid(pid) => pid,
        };
        let cpu = match cpu {
            Cpu::Any => -1,
            Cpu::Core(id) => id as _,
        };
        // https://man7.org/linux/man-pages/man2/perf_event_open.2.html
        // pid == -1 and cpu == -1 is invalid and returns EINVAL.
        if pid == -1 && cpu == -1 {
            return Err(Error::AnyProcessOnAnyCpu);
        }
        Ok(Self { pid, cpu })
    }

    /// Whether this target covers every task on a CPU.
    pub fn is_cpu_wide(&self) -> bool {
        self.pid == -1
    }
}
