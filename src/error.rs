//! Kernel error taxonomy.
//!
//! Every public kernel entry point returns a `Result<T, KernelError>`. The
//! syscall-dispatch layer is the single place that flattens a `KernelError`
//! into the negative-sentinel ABI return value; nothing below that layer
//! should ever need to know about the ABI encoding.

use thiserror::Error;

/// Negative sentinel returned to user space for any failed syscall.
pub const ERROR: i64 = -1;

/// Exit status reported to `wait` when the kernel kills a process outright
/// (fatal trap, or an `exec` that fails after its address space is gone).
pub const EXIT_STATUS_KILLED: i32 = -9999;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no free physical frames")]
    OutOfFrames,
    #[error("frame {0} is out of range")]
    OutOfRange(usize),
}

#[derive(Debug, Error)]
pub enum PageTableError {
    #[error("page {0} is out of range for this table")]
    OutOfRange(usize),
    #[error("user range [{addr:#x}, {addr:#x}+{len:#x}) is not mapped with the required protection")]
    PermissionDenied { addr: usize, len: usize },
}

/// A trap that terminates the offending process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    IllegalInstruction,
    MemoryFault,
    MathFault,
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error(transparent)]
    OutOfFrames(#[from] FrameErrorWrap),
    #[error("no free identifiers of the requested kind")]
    OutOfIds,
    #[error(transparent)]
    PageTable(#[from] PageTableError),
    #[error("permission denied")]
    PermissionDenied,
    #[error("caller does not own this resource")]
    NotOwner,
    #[error("no such resource")]
    NoSuchResource,
    #[error("process has no children")]
    NoChildren,
    #[error("fatal user fault: {0:?}")]
    Fatal(FaultKind),
}

/// Thin wrapper so `FrameError` can participate in `#[from]` without the
/// enum depending directly on a type that also derives `Error`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct FrameErrorWrap(#[from] pub FrameError);

pub type KResult<T> = Result<T, KernelError>;

/// Distinguishes a blocking syscall that ran to completion from one that
/// parked the caller on a wait queue and dispatched away. The caller must
/// re-deliver the same kernel trap once the process is running again, and
/// the handler re-checks its precondition from scratch. `handle_syscall`
/// must not write a return value for the `Blocked` case: by the time the
/// syscall returns, `uctx` holds the newly dispatched process's saved
/// context, not the blocked caller's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking<T> {
    Done(T),
    Blocked,
}

impl<T> Blocking<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Blocking<U> {
        match self {
            Blocking::Done(v) => Blocking::Done(f(v)),
            Blocking::Blocked => Blocking::Blocked,
        }
    }
}

/// Normalize any `KernelError` into the syscall ABI's `i64` return value.
pub fn to_abi<T: Into<i64>>(result: KResult<T>) -> i64 {
    match result {
        Ok(v) => v.into(),
        Err(e) => {
            log::debug!("syscall failed: {e}");
            ERROR
        }
    }
}

/// Like `to_abi`, but for a syscall that may have blocked instead of
/// completing. `None` means the blocked case fired and no return value
/// should be written.
pub fn to_abi_blocking<T: Into<i64>>(result: KResult<Blocking<T>>) -> Option<i64> {
    match result {
        Ok(Blocking::Done(v)) => Some(v.into()),
        Ok(Blocking::Blocked) => None,
        Err(e) => {
            log::debug!("syscall failed: {e}");
            Some(ERROR)
        }
    }
}
