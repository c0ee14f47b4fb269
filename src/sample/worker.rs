use std::fs::File;
use std::io::{ErrorKind, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::rb::Shared;
use crate::ffi::syscall::{epoll_create1, epoll_ctl, epoll_wait, eventfd, write_u64};

const DATA: u64 = 0;
const CANCEL: u64 = 1;

/// Background thread draining one ring buffer.
///
/// The thread blocks on an epoll set holding the counter file and a
/// cancellation eventfd, and copies data out on every wakeup of the former.
pub(crate) struct OverflowWorker {
    cancel: File,
    handle: Option<JoinHandle<()>>,
}

impl OverflowWorker {
    pub fn spawn(perf: Arc<File>, shared: Arc<Shared>) -> Result<Self> {
        let epoll = epoll_create1(libc::O_CLOEXEC)?;
        let cancel = eventfd(0, libc::EFD_CLOEXEC)?;

        let mut event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLHUP) as _,
            u64: DATA,
        };
        epoll_ctl(&epoll, libc::EPOLL_CTL_ADD, &perf, &mut event)?;
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as _,
            u64: CANCEL,
        };
        epoll_ctl(&epoll, libc::EPOLL_CTL_ADD, &cancel, &mut event)?;

        let handle = thread::Builder::new()
            .name("perf-overflow".into())
            .spawn(move || run(epoll, perf, shared))?;
        log::debug!("overflow worker spawned");

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Whether the thread has neither been cancelled nor exited on its own.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|it| !it.is_finished())
    }

    /// Signals the thread to exit and joins it.
    ///
    /// Calling this more than once is a no-op.
    pub fn cancel(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = write_u64(&self.cancel, 1) {
            // Without the signal the join below would never return.
            log::error!("cannot signal overflow worker: {e}");
            return;
        }
        if handle.join().is_err() {
            log::error!("overflow worker panicked");
        }
        log::debug!("overflow worker joined");
    }
}

impl Drop for OverflowWorker {
    fn drop(&mut self) {
        self.cancel();
    }
}

// `perf` is kept alive until the thread exits so the epoll set never
// watches a closed descriptor.
fn run(epoll: File, perf: Arc<File>, shared: Arc<Shared>) {
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; 2];
    loop {
        let ready = match epoll_wait(&epoll, &mut events, -1) {
            Ok(ready) => ready,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("overflow worker stopped: {e}");
                break;
            }
        };

        let mut exit = false;
        for event in ready {
            let (token, flags) = (event.u64, event.events);
            if token == CANCEL {
                exit = true;
                continue;
            }
            shared.handle_overflow();
            // The monitored task exited, nothing will be written anymore.
            if flags & libc::EPOLLHUP as u32 != 0 {
                exit = true;
            }
        }
        if exit {
            break;
        }
    }
    drop(perf);
}
