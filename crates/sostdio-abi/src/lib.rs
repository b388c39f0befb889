// Every export takes raw pointers from C callers and checks them for null
// before use, so per-function safety docs would repeat the same sentence.
#![allow(clippy::missing_safety_doc)]
//! # sostdio-abi
//!
//! `extern "C"` boundary for the `so_stdio` API. Builds a `cdylib`
//! (`libsostdio.so`) whose functions delegate to [`sostdio_core::Stream`].
//!
//! ```text
//! C caller -> so_* entry (this crate) -> Stream -> syscall veneer
//! ```
//!
//! Streams cross the boundary as opaque heap pointers. `so_fopen`/`so_popen`
//! hand ownership to the caller and `so_fclose`/`so_pclose` take it back. On
//! failure the functions return `SO_EOF` (or null, or zero elements) and store
//! the errno in the calling thread's `errno`.

use std::ffi::{CStr, c_char, c_int, c_long, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use sostdio_core::{StdioError, Stream};

/// Returned by the int-valued functions on failure or end-of-stream.
pub const SO_EOF: c_int = -1;

/// Opaque stream handle as seen from C.
pub type SoFile = Stream;

#[inline]
unsafe fn set_abi_errno(val: c_int) {
    // SAFETY: __errno_location always returns the calling thread's errno slot.
    unsafe { *libc::__errno_location() = val };
}

#[inline]
fn fail(err: &StdioError) -> c_int {
    // SAFETY: see `set_abi_errno`.
    unsafe { set_abi_errno(err.errno()) };
    SO_EOF
}

/// Borrow the stream behind a caller pointer, or `None` for null.
#[inline]
unsafe fn stream_mut<'a>(stream: *mut SoFile) -> Option<&'a mut Stream> {
    // SAFETY: caller guarantees a non-null pointer came from so_fopen/so_popen
    // and has not been closed.
    unsafe { stream.as_mut() }
}

#[inline]
unsafe fn c_str_arg<'a>(p: *const c_char) -> Option<&'a CStr> {
    if p.is_null() {
        return None;
    }
    // SAFETY: non-null arguments are NUL-terminated C strings per ABI contract.
    Some(unsafe { CStr::from_ptr(p) })
}

fn into_handle(result: Result<Stream, StdioError>) -> *mut SoFile {
    match result {
        Ok(stream) => Box::into_raw(Box::new(stream)),
        Err(err) => {
            log::debug!("so_stdio: {err}");
            fail(&err);
            ptr::null_mut()
        }
    }
}

// ---------------------------------------------------------------------------
// Open / close
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fopen(pathname: *const c_char, mode: *const c_char) -> *mut SoFile {
    let (Some(path), Some(mode)) = (unsafe { c_str_arg(pathname) }, unsafe { c_str_arg(mode) })
    else {
        unsafe { set_abi_errno(libc::EINVAL) };
        return ptr::null_mut();
    };
    let Ok(mode) = mode.to_str() else {
        unsafe { set_abi_errno(libc::EINVAL) };
        return ptr::null_mut();
    };
    let path = Path::new(std::ffi::OsStr::from_bytes(path.to_bytes()));
    into_handle(Stream::open(path, mode))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fclose(stream: *mut SoFile) -> c_int {
    if stream.is_null() {
        unsafe { set_abi_errno(libc::EBADF) };
        return SO_EOF;
    }
    // SAFETY: ownership returns to us; the pointer came from Box::into_raw.
    let stream = unsafe { Box::from_raw(stream) };
    match stream.close() {
        Ok(()) => 0,
        Err(err) => fail(&err),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_popen(command: *const c_char, type_: *const c_char) -> *mut SoFile {
    let (Some(command), Some(type_)) = (unsafe { c_str_arg(command) }, unsafe { c_str_arg(type_) })
    else {
        unsafe { set_abi_errno(libc::EINVAL) };
        return ptr::null_mut();
    };
    let (Ok(command), Ok(type_)) = (command.to_str(), type_.to_str()) else {
        unsafe { set_abi_errno(libc::EINVAL) };
        return ptr::null_mut();
    };
    into_handle(Stream::spawn(command, type_))
}

/// Close a pipe stream. Returns the raw wait status of the child.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_pclose(stream: *mut SoFile) -> c_int {
    if stream.is_null() {
        unsafe { set_abi_errno(libc::EBADF) };
        return SO_EOF;
    }
    // SAFETY: as in so_fclose.
    let stream = unsafe { Box::from_raw(stream) };
    match stream.pclose() {
        Ok(status) => status.raw(),
        Err(err) => fail(&err),
    }
}

// ---------------------------------------------------------------------------
// Descriptor, flush, positioning
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fileno(stream: *mut SoFile) -> c_int {
    match unsafe { stream_mut(stream) } {
        Some(s) => s.fd(),
        None => {
            unsafe { set_abi_errno(libc::EBADF) };
            SO_EOF
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fflush(stream: *mut SoFile) -> c_int {
    let Some(s) = (unsafe { stream_mut(stream) }) else {
        unsafe { set_abi_errno(libc::EBADF) };
        return SO_EOF;
    };
    match s.flush() {
        Ok(()) => 0,
        Err(err) => fail(&err),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fseek(stream: *mut SoFile, offset: c_long, whence: c_int) -> c_int {
    let Some(s) = (unsafe { stream_mut(stream) }) else {
        unsafe { set_abi_errno(libc::EBADF) };
        return SO_EOF;
    };
    match s.seek_whence(offset as i64, whence) {
        Ok(_) => 0,
        Err(err) => fail(&err),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_ftell(stream: *mut SoFile) -> c_long {
    match unsafe { stream_mut(stream) } {
        Some(s) => s.position() as c_long,
        None => {
            unsafe { set_abi_errno(libc::EBADF) };
            SO_EOF as c_long
        }
    }
}

// ---------------------------------------------------------------------------
// Element and byte transfer
// ---------------------------------------------------------------------------

/// Byte length of `nmemb` elements of `size`, or `None` on overflow.
fn block_len(size: usize, nmemb: usize) -> Option<usize> {
    size.checked_mul(nmemb)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fread(
    ptr: *mut c_void,
    size: usize,
    nmemb: usize,
    stream: *mut SoFile,
) -> usize {
    let Some(s) = (unsafe { stream_mut(stream) }) else {
        unsafe { set_abi_errno(libc::EBADF) };
        return 0;
    };
    let Some(len) = block_len(size, nmemb) else {
        unsafe { set_abi_errno(libc::EOVERFLOW) };
        return 0;
    };
    if len == 0 || ptr.is_null() {
        return 0;
    }
    // SAFETY: caller provides at least size * nmemb writable bytes at ptr.
    let dest = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len) };
    s.read_block(dest, size, nmemb)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fwrite(
    ptr: *const c_void,
    size: usize,
    nmemb: usize,
    stream: *mut SoFile,
) -> usize {
    let Some(s) = (unsafe { stream_mut(stream) }) else {
        unsafe { set_abi_errno(libc::EBADF) };
        return 0;
    };
    let Some(len) = block_len(size, nmemb) else {
        unsafe { set_abi_errno(libc::EOVERFLOW) };
        return 0;
    };
    if len == 0 || ptr.is_null() {
        return 0;
    }
    // SAFETY: caller provides at least size * nmemb readable bytes at ptr.
    let src = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    s.write_block(src, size, nmemb)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fgetc(stream: *mut SoFile) -> c_int {
    let Some(s) = (unsafe { stream_mut(stream) }) else {
        unsafe { set_abi_errno(libc::EBADF) };
        return SO_EOF;
    };
    match s.read_byte() {
        Some(b) => b as c_int,
        None => SO_EOF,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_fputc(c: c_int, stream: *mut SoFile) -> c_int {
    let Some(s) = (unsafe { stream_mut(stream) }) else {
        unsafe { set_abi_errno(libc::EBADF) };
        return SO_EOF;
    };
    match s.write_byte(c as u8) {
        Some(b) => b as c_int,
        None => SO_EOF,
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_feof(stream: *mut SoFile) -> c_int {
    match unsafe { stream_mut(stream) } {
        Some(s) => s.at_end() as c_int,
        None => 0,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn so_ferror(stream: *mut SoFile) -> c_int {
    match unsafe { stream_mut(stream) } {
        Some(s) => s.has_error() as c_int,
        None => 0,
    }
}
