use std::fs::File;
use std::io::{Error, Result};
use std::os::fd::{AsRawFd, FromRawFd};

use libc::epoll_event;
use perf_event_open_sys as sys;

use super::bindings as b;
use super::Attr;

pub fn perf_event_open(attr: &mut Attr, pid: i32, cpu: i32, group_fd: i32, flags: u64) -> Result<File> {
    let fd = unsafe { sys::perf_event_open(attr, pid, cpu, group_fd, flags as _) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

macro_rules! ioctl {
    ($result:expr) => {{
        let result = unsafe { $result };
        if result != -1 {
            Ok(result)
        } else {
            Err(Error::last_os_error())
        }
    }};
}

pub fn enable(file: &File, group: bool) -> Result<()> {
    ioctl!(sys::ioctls::ENABLE(file.as_raw_fd(), group_flag(group)))?;
    Ok(())
}

pub fn disable(file: &File, group: bool) -> Result<()> {
    ioctl!(sys::ioctls::DISABLE(file.as_raw_fd(), group_flag(group)))?;
    Ok(())
}

pub fn reset(file: &File, group: bool) -> Result<()> {
    ioctl!(sys::ioctls::RESET(file.as_raw_fd(), group_flag(group)))?;
    Ok(())
}

pub fn id(file: &File) -> Result<u64> {
    let mut id: u64 = 0;
    ioctl!(sys::ioctls::ID(file.as_raw_fd(), &mut id))?;
    Ok(id)
}

// Redirects the records of `file` into the ring buffer mapped on `target`.
pub fn set_output(file: &File, target: &File) -> Result<()> {
    ioctl!(sys::ioctls::SET_OUTPUT(file.as_raw_fd(), target.as_raw_fd()))?;
    Ok(())
}

fn group_flag(group: bool) -> u32 {
    if group {
        b::PERF_IOC_FLAG_GROUP as _
    } else {
        0
    }
}

pub fn read(file: &File, buf: &mut [u8]) -> Result<usize> {
    let fd = file.as_raw_fd();
    let count = buf.len();
    let buf = buf.as_mut_ptr() as _;
    let bytes = unsafe { libc::read(fd, buf, count) };
    if bytes != -1 {
        Ok(bytes as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn write_u64(file: &File, val: u64) -> Result<()> {
    let buf = val.to_ne_bytes();
    let bytes = unsafe { libc::write(file.as_raw_fd(), buf.as_ptr() as _, buf.len()) };
    if bytes != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn mmap<T>(
    ptr: *mut (),
    len: usize,
    prot: i32,
    flags: i32,
    file: &File,
    offset: i64,
) -> Result<*mut T> {
    let ptr = libc::mmap(ptr as _, len, prot, flags, file.as_raw_fd(), offset);
    if ptr != libc::MAP_FAILED {
        Ok(ptr as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn munmap<T>(ptr: *mut T, len: usize) -> Result<()> {
    let result = libc::munmap(ptr as _, len);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn eventfd(init: u32, flags: i32) -> Result<File> {
    let fd = unsafe { libc::eventfd(init, flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_create1(flags: i32) -> Result<File> {
    let fd = unsafe { libc::epoll_create1(flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd as _) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_ctl(epoll: &File, op: i32, file: &File, event: &mut epoll_event) -> Result<()> {
    let result = unsafe { libc::epoll_ctl(epoll.as_raw_fd(), op, file.as_raw_fd(), event as _) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_wait<'a>(
    epoll: &File,
    events: &'a mut [epoll_event],
    timeout: i32,
) -> Result<&'a [epoll_event]> {
    let len = unsafe {
        libc::epoll_wait(
            epoll.as_raw_fd(),
            events.as_mut_ptr(),
            events.len() as _,
            timeout,
        )
    };
    if len != -1 {
        Ok(&events[..len as _])
    } else {
        Err(Error::last_os_error())
    }
}
