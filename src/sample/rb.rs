use std::fs::File;
use std::io;
use std::ptr::{addr_of, addr_of_mut};
use std::sync::atomic::{compiler_fence, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::arena::Arena;
use super::worker::OverflowWorker;
use crate::ffi::{Metadata, PAGE_SIZE};
use crate::{Error, Result};

/// Memory-mapped transport of one perf counter.
///
/// The first page is the kernel-owned [`Metadata`], the remaining
/// `2^n` pages hold the records written by the kernel.
pub struct RingBuffer {
    shared: Arc<Shared>,
    worker: Option<OverflowWorker>,
}

/// The part of a ring buffer reachable from its overflow worker.
pub(super) struct Shared {
    arena: Arena,
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl RingBuffer {
    /// Maps `data_pages` (rounded up to a power of two) plus one metadata page of `perf`.
    pub(crate) fn new(perf: &File, data_pages: usize) -> Result<Self> {
        // Zero maps the metadata page only, enough for `rdpmc`.
        let data_pages = match data_pages {
            0 => Some(0),
            n => n.checked_next_power_of_two(),
        };
        let Some(len) = data_pages
            .and_then(|n| n.checked_add(1))
            .and_then(|n| n.checked_mul(*PAGE_SIZE))
        else {
            return Err(Error::Mmap(io::Error::other("allocation size overflow")));
        };
        let arena = Arena::new(perf, len).map_err(Error::Mmap)?;
        let arena = arena.ok_or(Error::MmapNull)?;

        Ok(Self {
            shared: Arc::new(Shared {
                arena,
                chunks: Mutex::new(vec![]),
            }),
            worker: None,
        })
    }

    /// Size of the data section in bytes.
    pub fn data_size(&self) -> usize {
        self.shared.data_size()
    }

    /// Copies every unread byte into a new chunk and advances the tail.
    ///
    /// Returns the number of bytes copied.
    pub fn handle_overflow(&self) -> usize {
        self.shared.handle_overflow()
    }

    /// Takes all chunks copied so far.
    pub fn consume_data(&self) -> Vec<Vec<u8>> {
        self.shared.consume_data()
    }

    /// Reads the counter value in user space through `rdpmc`.
    ///
    /// Returns `None` if the counter is not currently scheduled on a
    /// hardware counter or the CPU does not allow user space reads.
    pub fn read_performance_monitoring_counter(&self) -> Option<u64> {
        let metadata = self.shared.metadata();
        loop {
            let seq = unsafe { addr_of!((*metadata).lock).read_volatile() };
            compiler_fence(Ordering::Acquire);

            let index = unsafe { addr_of!((*metadata).index).read_volatile() };
            let offset = unsafe { addr_of!((*metadata).offset).read_volatile() };
            let width = unsafe { addr_of!((*metadata).pmc_width).read_volatile() };
            let capabilities =
                unsafe { addr_of!((*metadata).__bindgen_anon_1.capabilities).read_volatile() };

            // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L620
            let cap_user_rdpmc = (capabilities >> 2) & 1 == 1;
            if !cap_user_rdpmc || index == 0 {
                return None;
            }
            let value = rdpmc(index - 1)?;

            compiler_fence(Ordering::Acquire);
            if unsafe { addr_of!((*metadata).lock).read_volatile() } != seq {
                continue;
            }

            let count = sign_extend(value, width).wrapping_add(offset);
            return Some(count as u64);
        }
    }

    /// Counter's enabled time, read from the metadata page.
    pub fn time_enabled(&self) -> u64 {
        let metadata = self.shared.metadata();
        let time_enabled = unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).time_enabled)) };
        time_enabled.load(Ordering::Relaxed)
    }

    /// Counter's running time, read from the metadata page.
    pub fn time_running(&self) -> u64 {
        let metadata = self.shared.metadata();
        let time_running = unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).time_running)) };
        time_running.load(Ordering::Relaxed)
    }

    /// Spawns the worker draining this buffer whenever `perf` signals new data.
    pub(crate) fn start_worker(&mut self, perf: Arc<File>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let worker = OverflowWorker::spawn(perf, Arc::clone(&self.shared)).map_err(Error::Worker)?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stops the worker and waits for it to exit.
    pub fn cancel_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.cancel();
        }
    }

    /// Whether a worker is still draining this buffer.
    ///
    /// A worker exits on its own once the counter hangs up.
    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(OverflowWorker::is_running)
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        self.cancel_worker();
    }
}

impl Shared {
    fn metadata(&self) -> *mut Metadata {
        self.arena.as_ptr() as *mut Metadata
    }

    fn data_size(&self) -> usize {
        self.arena.len().saturating_sub(*PAGE_SIZE)
    }

    pub fn handle_overflow(&self) -> usize {
        let mut chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);

        let metadata = self.metadata();
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/ring_buffer.c#L99
        let head = unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).data_head)) };
        let tail = unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).data_tail)) };
        let head = head.load(Ordering::Acquire);
        let from = tail.load(Ordering::Relaxed);

        let size = self.data_size();
        if head == from || size == 0 {
            return 0;
        }

        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L6212
        let data = unsafe {
            std::slice::from_raw_parts(self.arena.as_ptr().add(*PAGE_SIZE) as *const u8, size)
        };
        let chunk = copy_range(data, from, head);
        let len = chunk.len();
        chunks.push(chunk);

        tail.store(head, Ordering::Release);
        log::trace!("drained {len} bytes from ring buffer");
        len
    }

    fn consume_data(&self) -> Vec<Vec<u8>> {
        let mut chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *chunks)
    }
}

/// Copies the bytes between the monotonic cursors `tail` and `head` out
/// of the circular `data` section.
pub(super) fn copy_range(data: &[u8], tail: u64, head: u64) -> Vec<u8> {
    let size = data.len();
    let unread = (head.wrapping_sub(tail) as usize).min(size);
    let start = (tail % size as u64) as usize;

    let mut chunk = Vec::with_capacity(unread);
    if start + unread <= size {
        chunk.extend_from_slice(&data[start..start + unread]);
    } else {
        chunk.extend_from_slice(&data[start..]);
        chunk.extend_from_slice(&data[..start + unread - size]);
    }
    chunk
}

fn sign_extend(value: u64, width: u16) -> i64 {
    match width {
        1..64 => {
            let shift = 64 - width as u32;
            ((value << shift) as i64) >> shift
        }
        _ => value as i64,
    }
}

#[cfg(target_arch = "x86_64")]
fn rdpmc(counter: u32) -> Option<u64> {
    let (lo, hi): (u32, u32);
    unsafe {
        std::arch::asm!(
            "rdpmc",
            in("ecx") counter,
            lateout("eax") lo,
            lateout("edx") hi,
            options(nostack, att_syntax),
        );
    }
    Some(((hi as u64) << 32) | lo as u64)
}

#[cfg(not(target_arch = "x86_64"))]
fn rdpmc(_: u32) -> Option<u64> {
    None
}

#[cfg(test)]
mod test {
    use std::fs::File;
    use std::os::fd::FromRawFd;
    use std::ptr::addr_of_mut;
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    use super::{copy_range, sign_extend, RingBuffer};
    use crate::ffi::syscall::{eventfd, write_u64};
    use crate::ffi::PAGE_SIZE;

    #[test]
    fn test_copy_range_wraps() {
        let data: Vec<u8> = (0..8).collect();
        assert_eq!(copy_range(&data, 2, 5), vec![2, 3, 4]);
        assert_eq!(copy_range(&data, 6, 10), vec![6, 7, 0, 1]);
        // Cursors keep growing past the buffer size.
        assert_eq!(copy_range(&data, 17, 19), vec![1, 2]);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xffff_ffff_ffff, 48), -1);
        assert_eq!(sign_extend(0x7fff_ffff_ffff, 48), 0x7fff_ffff_ffff);
        assert_eq!(sign_extend(5, 0), 5);
    }

    // A regular file mapped shared behaves like the perf mapping,
    // with the test playing the kernel's role.
    fn mapped_file(pages: usize) -> File {
        let file = tempfile::tempfile().unwrap();
        file.set_len(((pages + 1) * *PAGE_SIZE) as u64).unwrap();
        file
    }

    fn write_records(rb: &RingBuffer, len: usize) {
        let base = rb.shared.arena.as_ptr();
        unsafe {
            for i in 0..len {
                *base.add(*PAGE_SIZE + i) = i as u8;
            }
            let metadata = rb.shared.metadata();
            *addr_of_mut!((*metadata).data_head) = len as u64;
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn test_consume_data_is_idempotent() {
        let file = mapped_file(1);
        let rb = RingBuffer::new(&file, 1).unwrap();
        assert_eq!(rb.data_size(), *PAGE_SIZE);

        write_records(&rb, 16);

        assert_eq!(rb.handle_overflow(), 16);
        // No new data since the last drain.
        assert_eq!(rb.handle_overflow(), 0);

        let chunks = rb.consume_data();
        assert_eq!(chunks, vec![(0..16).collect::<Vec<u8>>()]);
        assert!(rb.consume_data().is_empty());
    }

    #[test]
    fn test_worker_drains_on_wakeup() {
        let file = mapped_file(1);
        let mut rb = RingBuffer::new(&file, 1).unwrap();
        write_records(&rb, 8);

        // A readable eventfd stands in for a counter with pending data.
        let signal = eventfd(0, libc::EFD_CLOEXEC).unwrap();
        write_u64(&signal, 1).unwrap();
        rb.start_worker(Arc::new(signal)).unwrap();
        assert!(rb.has_worker());

        let mut chunks = vec![];
        assert!(wait_for(|| {
            chunks.extend(rb.consume_data());
            !chunks.is_empty()
        }));
        assert_eq!(chunks, vec![(0..8).collect::<Vec<u8>>()]);

        let started = Instant::now();
        rb.cancel_worker();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!rb.has_worker());
        // Cancelling again is a no-op.
        rb.cancel_worker();
        assert!(rb.consume_data().is_empty());
    }

    #[test]
    fn test_worker_exits_on_hang_up() {
        let file = mapped_file(1);
        let mut rb = RingBuffer::new(&file, 1).unwrap();
        write_records(&rb, 4);

        // The read end of a pipe without writers reports EPOLLHUP.
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
        let reader = unsafe { File::from_raw_fd(fds[0]) };
        drop(unsafe { File::from_raw_fd(fds[1]) });

        rb.start_worker(Arc::new(reader)).unwrap();
        assert!(wait_for(|| !rb.has_worker()));
        assert_eq!(rb.consume_data(), vec![(0..4).collect::<Vec<u8>>()]);
        rb.cancel_worker();
    }
}
