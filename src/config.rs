//! Platform sizing constants.
//!
//! A passable struct rather than a wall of `pub const`s tied to one
//! simulated board, so tests can stand up independent kernels with
//! different sizes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Bytes per physical/virtual page.
    pub page_size: usize,
    /// log2(page_size).
    pub page_shift: u32,
    /// Number of physical frames backing the simulated machine.
    pub num_frames: usize,
    /// Region-0 (kernel stack) page-table length, K.
    pub kernel_stack_pages: usize,
    /// Region-1 (user) page-table length, M.
    pub region1_pages: usize,
    /// Bytes in one terminal I/O chunk.
    pub terminal_max_line: usize,
    /// Number of serial terminals.
    pub num_terminals: usize,
    /// Pipe ring-buffer capacity in bytes.
    pub pipe_capacity: usize,
    /// Clock ticks a process may run before involuntary preemption.
    pub quantum_ticks: u32,
    /// Unmapped pages reserved between `brk` and the user stack top.
    pub red_zone_pages: usize,
    /// Upper bound on live processes (sizes the PCB slab).
    pub max_processes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            page_size: 4096,
            page_shift: 12,
            num_frames: 4096,
            kernel_stack_pages: 2,
            region1_pages: 256,
            terminal_max_line: 128,
            num_terminals: 4,
            pipe_capacity: 512,
            quantum_ticks: 1,
            red_zone_pages: 1,
            max_processes: 128,
        }
    }
}

impl KernelConfig {
    pub fn page_round_up(&self, addr: usize) -> usize {
        (addr + self.page_size - 1) & !(self.page_size - 1)
    }

    pub fn page_of(&self, addr: usize) -> usize {
        addr >> self.page_shift
    }
}
