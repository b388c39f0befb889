//! Typed syscall veneer.
//!
//! Every descriptor and process primitive the stream engine touches goes
//! through this module. Each wrapper issues exactly one libc call and maps the
//! `-1`/`errno` convention onto `Result<T, i32>`, where the error is the raw
//! errno value. Retrying on `EINTR` or short transfers is the caller's job.
//!
//! This is the only module in the crate allowed to use `unsafe`; everything
//! above it works with slices and owned values.

use std::ffi::CStr;

use libc::c_int;

pub const SEEK_SET: i32 = libc::SEEK_SET;
pub const SEEK_CUR: i32 = libc::SEEK_CUR;
pub const SEEK_END: i32 = libc::SEEK_END;

pub const STDIN_FILENO: i32 = libc::STDIN_FILENO;
pub const STDOUT_FILENO: i32 = libc::STDOUT_FILENO;

/// Exit status used by a forked child whose `execv` failed.
pub const EXEC_FAILED_STATUS: i32 = 127;

/// Fetch the calling thread's errno, falling back to `EIO` if the platform
/// reports nothing.
#[inline]
pub fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

#[inline]
fn check(ret: isize) -> Result<usize, i32> {
    if ret < 0 {
        Err(last_errno())
    } else {
        Ok(ret as usize)
    }
}

/// `open(pathname, flags, mode)`.
#[inline]
#[allow(unsafe_code)]
pub fn sys_open(pathname: &CStr, flags: i32, mode: u32) -> Result<i32, i32> {
    // SAFETY: pathname is a valid NUL-terminated string for the call's duration.
    let ret = unsafe { libc::open(pathname.as_ptr(), flags, mode as libc::c_uint) };
    check(ret as isize).map(|fd| fd as i32)
}

/// `read(fd, buf, buf.len())`.
#[inline]
#[allow(unsafe_code)]
pub fn sys_read(fd: i32, buf: &mut [u8]) -> Result<usize, i32> {
    // SAFETY: buf is a valid writable region of buf.len() bytes.
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    check(ret)
}

/// `write(fd, buf, buf.len())`.
#[inline]
#[allow(unsafe_code)]
pub fn sys_write(fd: i32, buf: &[u8]) -> Result<usize, i32> {
    // SAFETY: buf is a valid readable region of buf.len() bytes.
    let ret = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    check(ret)
}

/// `lseek(fd, offset, whence)`.
#[inline]
#[allow(unsafe_code)]
pub fn sys_lseek(fd: i32, offset: i64, whence: i32) -> Result<i64, i32> {
    // SAFETY: lseek is safe on any fd value (bad fd returns EBADF).
    let ret = unsafe { libc::lseek(fd, offset as libc::off_t, whence) };
    if ret < 0 {
        Err(last_errno())
    } else {
        Ok(ret as i64)
    }
}

/// `close(fd)`.
#[inline]
#[allow(unsafe_code)]
pub fn sys_close(fd: i32) -> Result<(), i32> {
    // SAFETY: close is safe on any fd value (bad fd returns EBADF).
    let ret = unsafe { libc::close(fd) };
    check(ret as isize).map(|_| ())
}

/// `pipe2(pipefd, O_CLOEXEC)`. Returns `[read_end, write_end]`.
///
/// Both ends are close-on-exec so they never leak into unrelated children;
/// `dup2` onto a standard descriptor clears the flag on the copy.
#[inline]
#[allow(unsafe_code)]
pub fn sys_pipe_cloexec() -> Result<[i32; 2], i32> {
    let mut fds = [-1 as c_int; 2];
    // SAFETY: fds is a valid writable [c_int; 2].
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    check(ret as isize).map(|_| fds)
}

/// `waitpid(pid, &status, 0)`. Returns the raw wait status.
#[inline]
#[allow(unsafe_code)]
pub fn sys_waitpid(pid: i32) -> Result<i32, i32> {
    let mut status: c_int = 0;
    // SAFETY: status is a valid writable c_int.
    let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
    check(ret as isize).map(|_| status)
}

/// Which side of the child's standard streams is wired to the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    /// Pipe end handed to the child.
    pub child_end: i32,
    /// Pipe end kept by the parent; closed in the child.
    pub parent_end: i32,
    /// Standard descriptor in the child replaced by `child_end`.
    pub target: i32,
}

/// Fork a child that runs `argv[0]` with `argv` after redirecting one
/// standard descriptor onto a pipe end. Returns the child's pid.
///
/// `argv` must already be NUL-terminated strings built before the fork; the
/// child path performs only async-signal-safe calls (`dup2`, `close`,
/// `execv`, `_exit`).
#[allow(unsafe_code)]
pub fn fork_exec_redirected(argv: &[&CStr], redirect: Redirect) -> Result<i32, i32> {
    let mut ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    ptrs.push(std::ptr::null());

    // SAFETY: fork has no memory-safety preconditions; the child below only
    // touches pre-built pointers and async-signal-safe calls.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(last_errno());
    }
    if pid == 0 {
        // SAFETY: all descriptors are plain integers and ptrs is a
        // NULL-terminated argv array of valid C strings kept alive by the
        // parent frame that was duplicated into this process.
        unsafe {
            if redirect.child_end == redirect.target {
                // pipe2 landed on the standard slot itself (it was closed in
                // the parent); only the close-on-exec flag has to go.
                if libc::fcntl(redirect.target, libc::F_SETFD, 0) < 0 {
                    libc::_exit(EXEC_FAILED_STATUS);
                }
            } else {
                if libc::dup2(redirect.child_end, redirect.target) < 0 {
                    libc::_exit(EXEC_FAILED_STATUS);
                }
                libc::close(redirect.child_end);
            }
            // When the parent's end took the standard slot, dup2 above has
            // already replaced it.
            if redirect.parent_end != redirect.target {
                libc::close(redirect.parent_end);
            }
            libc::execv(ptrs[0], ptrs.as_ptr());
            libc::_exit(EXEC_FAILED_STATUS);
        }
    }
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_bad_fd_returns_ebadf() {
        assert_eq!(sys_close(-1), Err(libc::EBADF));
    }

    #[test]
    fn lseek_bad_fd() {
        assert_eq!(sys_lseek(-1, 0, SEEK_SET), Err(libc::EBADF));
    }

    #[test]
    fn open_missing_path_reports_enoent() {
        let path = c"/nonexistent/sostdio/path";
        assert_eq!(sys_open(path, libc::O_RDONLY, 0), Err(libc::ENOENT));
    }

    #[test]
    fn pipe_read_write_roundtrip() {
        let [rd, wr] = sys_pipe_cloexec().expect("pipe2 should succeed");
        let msg = b"hello veneer";
        assert_eq!(sys_write(wr, msg), Ok(msg.len()));

        let mut buf = [0u8; 32];
        assert_eq!(sys_read(rd, &mut buf), Ok(msg.len()));
        assert_eq!(&buf[..msg.len()], msg);

        assert!(sys_close(rd).is_ok());
        assert!(sys_close(wr).is_ok());
    }

    #[test]
    fn lseek_on_pipe_is_espipe() {
        let [rd, wr] = sys_pipe_cloexec().unwrap();
        assert_eq!(sys_lseek(rd, 0, SEEK_CUR), Err(libc::ESPIPE));
        sys_close(rd).unwrap();
        sys_close(wr).unwrap();
    }

    #[test]
    fn fork_exec_reports_child_exit_code() {
        let [rd, wr] = sys_pipe_cloexec().unwrap();
        let argv = [c"/bin/sh", c"-c", c"exit 3"];
        let pid = fork_exec_redirected(
            &argv,
            Redirect {
                child_end: wr,
                parent_end: rd,
                target: STDOUT_FILENO,
            },
        )
        .expect("fork should succeed");
        sys_close(wr).unwrap();
        sys_close(rd).unwrap();

        let status = sys_waitpid(pid).expect("waitpid should succeed");
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 3);
    }
}
