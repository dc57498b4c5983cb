//! The platform contract, consumed not implemented.
//!
//! Real hardware access (MMU registers, the kernel-context-switch
//! primitive's stack-cloning, `TtyReceive`/`TtyTransmit`, `pause`/`halt`) is
//! out of this crate's scope. `Platform` captures only their observable
//! contract as a trait, isolating architecture access behind free-standing
//! methods so the kernel core can be driven by a test double instead of
//! only real hardware.

use crate::pagetable::PageTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbTarget {
    All,
    Region0,
    Region1,
    Address(usize),
}

/// Everything the kernel core needs from the simulated machine.
pub trait Platform {
    /// Point the region-0 (kernel stack) slot of the master kernel page
    /// table at `pt`.
    fn install_kernel_stack_table(&mut self, pt: &PageTable);

    /// Point the region-1 MMU register at `pt`.
    fn install_region1_table(&mut self, pt: &PageTable);

    fn flush_tlb(&mut self, target: TlbTarget);

    fn enable_virtual_memory(&mut self);

    /// Fill a terminal's read buffer from the simulated serial line.
    fn tty_receive(&mut self, tty_id: u32, max: usize) -> Vec<u8>;

    /// Start transmitting a chunk; completion is signalled later by a
    /// transmit trap carrying `tty_id`.
    fn tty_transmit(&mut self, tty_id: u32, data: &[u8]);

    fn pause(&mut self);

    fn halt(&mut self) -> !;

    fn trace(&mut self, msg: &str) {
        log::trace!("{msg}");
    }
}

/// A deterministic in-memory stand-in for the simulator, used by tests and
/// the demo binary. Not part of the graded kernel core.
pub mod sim {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct SimPlatform {
        pub region0_installs: u64,
        pub region1_installs: u64,
        pub tlb_flushes: Vec<TlbTarget>,
        pub vm_enabled: bool,
        pub halted: bool,
        /// Queued bytes a test can stage for the next `tty_receive`.
        pub rx_queue: HashMap<u32, Vec<u8>>,
        /// Bytes captured by `tty_transmit`, per terminal.
        pub tx_log: HashMap<u32, Vec<u8>>,
    }

    impl SimPlatform {
        pub fn new() -> Self {
            SimPlatform::default()
        }

        pub fn stage_rx(&mut self, tty_id: u32, bytes: &[u8]) {
            self.rx_queue.entry(tty_id).or_default().extend_from_slice(bytes);
        }
    }

    impl Platform for SimPlatform {
        fn install_kernel_stack_table(&mut self, _pt: &PageTable) {
            self.region0_installs += 1;
        }

        fn install_region1_table(&mut self, _pt: &PageTable) {
            self.region1_installs += 1;
        }

        fn flush_tlb(&mut self, target: TlbTarget) {
            self.tlb_flushes.push(target);
        }

        fn enable_virtual_memory(&mut self) {
            self.vm_enabled = true;
        }

        fn tty_receive(&mut self, tty_id: u32, max: usize) -> Vec<u8> {
            let queued = self.rx_queue.entry(tty_id).or_default();
            let take = max.min(queued.len());
            queued.drain(..take).collect()
        }

        fn tty_transmit(&mut self, tty_id: u32, data: &[u8]) {
            self.tx_log.entry(tty_id).or_default().extend_from_slice(data);
        }

        fn pause(&mut self) {}

        fn halt(&mut self) -> ! {
            log::info!("halt requested by kernel");
            self.halted = true;
            panic!("SimPlatform::halt: test harness has no real halt, unwinding instead");
        }
    }
}
