//! Trap dispatch: the handler slots a hardware trap can land on, plumbed
//! into the syscall table, the scheduler, and the terminal subsystem.

use crate::context::UserContext;
use crate::error::{EXIT_STATUS_KILLED, FaultKind};
use crate::kernel::Kernel;
use crate::loader::Loader;
use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Kernel,
    Clock,
    Fault(FaultKind),
    TtyReceive,
    TtyTransmit,
    Disk,
}

impl<P: Platform, L: Loader> Kernel<P, L> {
    /// Route one trap to its handler. `uctx.code` carries the syscall
    /// number (kernel trap) or the `tty_id` (tty traps); unused otherwise.
    pub fn handle_trap(&mut self, kind: TrapKind, uctx: &mut UserContext) {
        match kind {
            TrapKind::Kernel => self.handle_syscall(uctx),
            TrapKind::Clock => self.handle_clock_trap(uctx),
            TrapKind::Fault(fault) => self.handle_fault_trap(fault, uctx),
            TrapKind::TtyReceive => self.update_read_buffer(uctx.code as u32),
            TrapKind::TtyTransmit => self.update_writer(uctx.code as u32),
            TrapKind::Disk => {}
        }
    }

    fn handle_clock_trap(&mut self, uctx: &mut UserContext) {
        self.scheduler.update_delay(&mut self.pcbs);
        if let Some(pid) = self.scheduler.running {
            self.pcbs.get_mut(&pid).unwrap().user_ctx = *uctx;
            self.scheduler.add_ready(pid);
        }
        self.dispatch(uctx);
    }

    /// Illegal-instruction, memory, and math traps all terminate the
    /// running process with the killed sentinel. Growing the stack on a
    /// near-miss memory trap is not implemented here.
    fn handle_fault_trap(&mut self, fault: FaultKind, uctx: &mut UserContext) {
        log::warn!("fatal trap {fault:?}; killing running process");
        self.kill_current(uctx, EXIT_STATUS_KILLED);
    }
}
