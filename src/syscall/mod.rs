//! Syscall numbers and the kernel-trap dispatch table: a flat table of
//! numeric codes matched to handler functions, arguments fetched from the
//! trap frame, and the result written back to `regs[0]`.

pub mod ipc;
pub mod process;
pub mod sync;
pub mod tty;

use crate::context::UserContext;
use crate::error::{to_abi, to_abi_blocking, ERROR};
use crate::loader::Loader;
use crate::platform::Platform;

pub const FORK: i64 = 1;
pub const EXEC: i64 = 2;
pub const EXIT: i64 = 3;
pub const WAIT: i64 = 4;
pub const GETPID: i64 = 5;
pub const BRK: i64 = 6;
pub const DELAY: i64 = 7;
pub const TTY_READ: i64 = 8;
pub const TTY_WRITE: i64 = 9;
pub const PIPE_INIT: i64 = 10;
pub const PIPE_READ: i64 = 11;
pub const PIPE_WRITE: i64 = 12;
pub const LOCK_INIT: i64 = 13;
pub const LOCK_ACQUIRE: i64 = 14;
pub const LOCK_RELEASE: i64 = 15;
pub const CVAR_INIT: i64 = 16;
pub const CVAR_SIGNAL: i64 = 17;
pub const CVAR_BROADCAST: i64 = 18;
pub const CVAR_WAIT: i64 = 19;
pub const RECLAIM: i64 = 20;
pub const SEM_INIT: i64 = 21;
pub const SEM_UP: i64 = 22;
pub const SEM_DOWN: i64 = 23;

impl<P: Platform, L: Loader> crate::kernel::Kernel<P, L> {
    /// Decode `uctx.code` as a syscall number, run it, and write the
    /// result back into `uctx.regs[0]`.
    pub fn handle_syscall(&mut self, uctx: &mut UserContext) {
        let num = uctx.code;
        let result: i64 = match num {
            FORK => to_abi(self.sys_fork(uctx).map(|pid| pid as i64)),
            EXEC => {
                let result = to_abi(self.sys_exec(uctx, uctx.arg(0) as usize, uctx.arg(1) as usize).map(|()| 0i64));
                // A successful exec already overwrote `uctx` with the new
                // entry point, and a post-teardown failure dispatched away
                // to another process entirely; only a pre-teardown
                // validation failure should write the sentinel back.
                if result == ERROR {
                    uctx.set_return(result);
                }
                return;
            }
            EXIT => {
                self.sys_exit(uctx, uctx.arg(0) as i32);
                return; // exit never returns to the exiting process
            }
            WAIT => {
                // `Blocked` means `uctx` now belongs to whatever dispatch
                // switched to; only a completed wait writes a return value
                // for the caller that issued it (see `Blocking`'s doc).
                match to_abi_blocking(self.sys_wait(uctx, uctx.arg(0) as usize).map(|b| b.map(|pid| pid as i64))) {
                    Some(v) => v,
                    None => return,
                }
            }
            GETPID => self.sys_getpid() as i64,
            BRK => to_abi(self.sys_brk(uctx.arg(0) as usize).map(|()| 0i64)),
            DELAY => match to_abi_blocking(self.sys_delay(uctx, uctx.arg(0)).map(|b| b.map(|()| 0i64))) {
                Some(v) => v,
                None => return,
            },
            TTY_READ => match to_abi_blocking(self.sys_tty_read(uctx, uctx.arg(0) as u32, uctx.arg(1) as usize, uctx.arg(2) as usize)) {
                Some(v) => v,
                None => return,
            },
            TTY_WRITE => match to_abi_blocking(self.sys_tty_write(uctx, uctx.arg(0) as u32, uctx.arg(1) as usize, uctx.arg(2) as usize)) {
                Some(v) => v,
                None => return,
            },
            PIPE_INIT => to_abi(self.sys_pipe_init(uctx.arg(0) as usize).map(|()| 0i64)),
            PIPE_READ => match to_abi_blocking(self.sys_pipe_read(uctx, uctx.arg(0) as u32, uctx.arg(1) as usize, uctx.arg(2) as usize)) {
                Some(v) => v,
                None => return,
            },
            PIPE_WRITE => match to_abi_blocking(self.sys_pipe_write(uctx, uctx.arg(0) as u32, uctx.arg(1) as usize, uctx.arg(2) as usize)) {
                Some(v) => v,
                None => return,
            },
            LOCK_INIT => to_abi(self.sys_lock_init(uctx.arg(0) as usize).map(|()| 0i64)),
            LOCK_ACQUIRE => match to_abi_blocking(self.sys_lock_acquire(uctx, uctx.arg(0) as u32).map(|b| b.map(|()| 0i64))) {
                Some(v) => v,
                None => return,
            },
            LOCK_RELEASE => to_abi(self.sys_lock_release(uctx.arg(0) as u32).map(|()| 0i64)),
            CVAR_INIT => to_abi(self.sys_cvar_init(uctx.arg(0) as usize).map(|()| 0i64)),
            CVAR_SIGNAL => to_abi(self.sys_cvar_signal(uctx.arg(0) as u32).map(|()| 0i64)),
            CVAR_BROADCAST => to_abi(self.sys_cvar_broadcast(uctx.arg(0) as u32).map(|()| 0i64)),
            CVAR_WAIT => match to_abi_blocking(self.sys_cvar_wait(uctx, uctx.arg(0) as u32, uctx.arg(1) as u32).map(|b| b.map(|()| 0i64))) {
                Some(v) => v,
                None => return,
            },
            RECLAIM => to_abi(self.sys_reclaim(uctx.arg(0) as u32).map(|()| 0i64)),
            SEM_INIT => to_abi(self.sys_sem_init(uctx.arg(0) as usize, uctx.arg(1)).map(|()| 0i64)),
            SEM_UP => match to_abi_blocking(self.sys_sem_up(uctx, uctx.arg(0) as u32).map(|b| b.map(|()| 0i64))) {
                Some(v) => v,
                None => return,
            },
            SEM_DOWN => match to_abi_blocking(self.sys_sem_down(uctx, uctx.arg(0) as u32).map(|b| b.map(|()| 0i64))) {
                Some(v) => v,
                None => return,
            },
            other => {
                log::warn!("unknown syscall number {other}");
                ERROR
            }
        };
        uctx.set_return(result);
    }
}
