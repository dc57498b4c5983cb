//! Process control blocks.

use crate::context::{KernelContext, UserContext};
use crate::pagetable::PageTable;

pub type Pid = u32;

/// What a blocked process is waiting for. Each alternative carries exactly
/// the fields the matching scheduler wakeup updater needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingOn {
    None,
    Lock(u32),
    Cvar(u32),
    Pipe { id: u32, writing: bool },
    Tty { id: u32, writing: bool },
    WaitChild,
}

pub struct Pcb {
    pub pid: Pid,
    pub user_ctx: UserContext,
    pub kernel_ctx: Option<KernelContext>,
    pub kernel_stack_pt: PageTable,
    pub region1_pt: PageTable,

    pub brk: usize,
    pub data_end: usize,
    pub text_end: usize,

    pub parent: Option<Pid>,
    pub first_child: Option<Pid>,
    pub next_sibling: Option<Pid>,

    pub exited: bool,
    pub exit_status: i32,

    pub clock_ticks_remaining: u32,
    pub waiting_on: WaitingOn,

    /// IDs of pipes/locks/cvars/semaphores this process created, reclaimed
    /// at exit (see `process_delete`).
    pub resource_list: Vec<u32>,

    /// Backing bytes for this process's region-1 address space. The loader
    /// and MMU are modeled as opaque devices, but pipe round-trips and
    /// `brk` page contents need somewhere for validated user pointers to
    /// actually read and write; this stands in for the memory a real MMU
    /// would translate through.
    pub user_memory: Vec<u8>,

    pub name: String,
}

impl Pcb {
    pub fn new(pid: Pid, kernel_stack_pages: usize, region1_pages: usize, name: impl Into<String>) -> Self {
        Pcb {
            pid,
            user_ctx: UserContext::default(),
            kernel_ctx: None,
            kernel_stack_pt: PageTable::new(kernel_stack_pages),
            region1_pt: PageTable::new(region1_pages),
            brk: 0,
            data_end: 0,
            text_end: 0,
            parent: None,
            first_child: None,
            next_sibling: None,
            exited: false,
            exit_status: 0,
            clock_ticks_remaining: 0,
            waiting_on: WaitingOn::None,
            resource_list: Vec::new(),
            user_memory: Vec::new(),
            name: name.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        !matches!(self.waiting_on, WaitingOn::None)
    }
}
