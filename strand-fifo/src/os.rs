//! Thin OS error access for embedding runtimes.

/// Returns the calling thread's last OS error code.
///
/// Provided for host runtimes that cannot consult `errno` (or the platform
/// equivalent) across their own boundary; the blocking primitives in this
/// crate are the only operations here that touch the OS. Returns 0 when the
/// platform reports no error number.
///
/// ```
/// let _code = strand_fifo::os::last_os_error();
/// ```
pub fn last_os_error() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
