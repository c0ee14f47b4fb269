use std::fs::File;
use std::io::Result;
use std::ptr::{null_mut, NonNull};

use crate::ffi::syscall::{mmap, munmap};

/// A shared mapping of a perf event file.
pub(super) struct Arena {
    ptr: NonNull<u8>,
    len: usize,
}

// The kernel is the only other writer, and all cross-thread access goes
// through the atomic head/tail cursors or the owning ring buffer's mutex.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Maps `len` bytes of `file`, `None` if the kernel returned a null region.
    pub fn new(file: &File, len: usize) -> Result<Option<Self>> {
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L6582
        let flags = libc::MAP_SHARED;
        let ptr = unsafe { mmap::<u8>(null_mut(), len, prot, flags, file, 0) }?;
        Ok(NonNull::new(ptr).map(|ptr| Self { ptr, len }))
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr(), self.len) } {
            log::error!("failed to unmap ring buffer: {e}");
        }
    }
}

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L580
// struct perf_event_mmap_page {
//     u32 version;        /* version number of this structure */
//     u32 compat_version; /* lowest version this is compat with */
//
//     u32 lock;         /* seqlock for synchronization */
//     u32 index;        /* hardware event identifier */
//     s64 offset;       /* add to hardware event value */
//     u64 time_enabled; /* time event active */
//     u64 time_running; /* time event on CPU */
//     union {
//         u64 capabilities;
//         struct {
//             u64 cap_bit0              : 1,
//                 cap_bit0_is_deprecated: 1,
//                 cap_user_rdpmc        : 1, /* The RDPMC instruction can be used to read counts */
//                 cap_user_time         : 1,
//                 cap_user_time_zero    : 1,
//                 cap_user_time_short   : 1,
//                 cap_____res           : 58;
//         };
//     };
//
//     u16 pmc_width;
//     ...
//     u64 data_head;   /* head in the data section */
//     u64 data_tail;   /* user-space written tail */
//     u64 data_offset; /* where the buffer starts */
//     u64 data_size;   /* data buffer size */
//     ...
// };
