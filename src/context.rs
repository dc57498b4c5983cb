//! Saved user/kernel execution contexts.
//!
//! `KernelContext` is an owned handle, created on first use, never
//! introspected. The real stack-cloning (`kc_copy` duplicating kernel-stack
//! bytes through a scratch page window) is the platform's job; this crate's
//! core only needs to know *that* a context exists, not what is in it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Saved user register file, program counter, stack pointer, and the
/// trap code/address/argument registers a syscall or fault trap carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserContext {
    /// `regs[0]` doubles as the syscall return value on the way out and
    /// the first syscall argument on the way in.
    pub regs: [i64; 4],
    pub pc: usize,
    pub sp: usize,
    /// Syscall number (kernel trap) or `tty_id` (tty traps); meaning
    /// depends on the trap kind that produced this context.
    pub code: i64,
    pub trap_addr: usize,
}

impl UserContext {
    pub fn arg(&self, n: usize) -> i64 {
        self.regs[n]
    }

    pub fn set_return(&mut self, value: i64) {
        self.regs[0] = value;
    }
}

static NEXT_CTX_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque platform-owned kernel context handle. Never compared to anything
/// but `None`/`Some` by kernel logic; the id only exists so logs can tell
/// distinct contexts apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelContext {
    id: u64,
}

impl KernelContext {
    /// Allocate a fresh handle, as `kc_copy` does for a newly forked
    /// process that has never been switched to before.
    pub fn fresh() -> Self {
        KernelContext {
            id: NEXT_CTX_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}
