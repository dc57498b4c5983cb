//! The kernel context: the single struct threaded through every handler.
//!
//! One owned struct, passed by `&mut self` into every syscall/trap/
//! scheduler method, in place of module-scoped global mutable state, with
//! an explicit construction order in [`crate::boot`].

use std::collections::HashMap;

use crate::config::KernelConfig;
use crate::context::KernelContext;
use crate::error::{KernelError, KResult};
use crate::frame::FrameAllocator;
use crate::idalloc::IdAllocator;
use crate::loader::Loader;
use crate::pagetable::PageTable;
use crate::pcb::{Pcb, Pid, WaitingOn};
use crate::platform::{Platform, TlbTarget};
use crate::resources::ResourceTables;
use crate::scheduler::{QueueName, Scheduler};
use crate::terminal::TerminalTable;

pub struct Kernel<P: Platform, L: Loader> {
    pub config: KernelConfig,
    pub frames: FrameAllocator,
    pub ids: IdAllocator,
    pub scheduler: Scheduler,
    pub pcbs: HashMap<Pid, Pcb>,
    pub resources: ResourceTables,
    pub terminals: TerminalTable,
    pub kernel_stack_master: PageTable,
    pub platform: P,
    pub loader: L,
    pub halted: bool,
    next_pid: Pid,
}

impl<P: Platform, L: Loader> Kernel<P, L> {
    pub fn new(config: KernelConfig, platform: P, loader: L) -> Self {
        let frames = FrameAllocator::new(config.num_frames);
        let ids = IdAllocator::new(config.max_processes.max(64));
        let terminals = TerminalTable::new(config.num_terminals);
        let kernel_stack_master = PageTable::new(config.kernel_stack_pages);
        Kernel {
            config,
            frames,
            ids,
            scheduler: Scheduler::new(0),
            pcbs: HashMap::new(),
            resources: ResourceTables::default(),
            terminals,
            kernel_stack_master,
            platform,
            loader,
            halted: false,
            next_pid: 1,
        }
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn running_pid(&self) -> Option<Pid> {
        self.scheduler.running
    }

    pub fn pcb(&self, pid: Pid) -> Option<&Pcb> {
        self.pcbs.get(&pid)
    }

    pub fn pcb_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.pcbs.get_mut(&pid)
    }

    // -- process lifecycle ---------------------------------------------------

    /// Allocate a PCB and reserve its kernel-stack frames.
    pub fn process_create(&mut self, name: impl Into<String>) -> KResult<Pid> {
        let pid = self.alloc_pid();
        let mut pcb = Pcb::new(
            pid,
            self.config.kernel_stack_pages,
            self.config.region1_pages,
            name,
        );
        for page in 0..self.config.kernel_stack_pages {
            let frame = self
                .frames
                .find_and_set()
                .map_err(crate::error::FrameErrorWrap)?;
            pcb.kernel_stack_pt
                .set(page, crate::pagetable::Prot::R | crate::pagetable::Prot::W, frame)
                .expect("page index within freshly-sized table");
        }
        self.pcbs.insert(pid, pcb);
        Ok(pid)
    }

    /// Pid reserved for idle. `exit`'s "pid <= 1 halts the system" rule
    /// only makes sense if idle and init are the two lowest
    /// pids, so idle gets this fixed value instead of coming out of the
    /// ordinary counter; `process_create`'s first caller (bootstrap,
    /// creating init) gets pid 1 from that counter.
    pub const IDLE_PID: Pid = 0;

    /// Like `process_create` but omits the kernel-stack frame reservation
    /// and the ordinary pid counter; used only by bootstrap to create idle
    /// before frame accounting exists for it.
    pub fn process_create_idle(&mut self, name: impl Into<String>) -> Pid {
        let pid = Self::IDLE_PID;
        let pcb = Pcb::new(
            pid,
            self.config.kernel_stack_pages,
            self.config.region1_pages,
            name,
        );
        self.pcbs.insert(pid, pcb);
        pid
    }

    /// Free every frame referenced by either page table; the PCB itself
    /// survives until `process_delete`.
    pub fn process_terminate(&mut self, pid: Pid) {
        let Some(pcb) = self.pcbs.get_mut(&pid) else {
            log::error!("process_terminate: no such pcb {pid}");
            return;
        };
        let mut frames_to_clear = Vec::new();
        for (_, pte) in pcb.kernel_stack_pt.iter_valid() {
            frames_to_clear.push(pte.pfn);
        }
        for (_, pte) in pcb.region1_pt.iter_valid() {
            frames_to_clear.push(pte.pfn);
        }
        for page in 0..pcb.kernel_stack_pt.len() {
            let _ = pcb.kernel_stack_pt.clear(page);
        }
        for page in 0..pcb.region1_pt.len() {
            let _ = pcb.region1_pt.clear(page);
        }
        for frame in frames_to_clear {
            self.frames.clear(frame);
        }
    }

    /// Terminate, detach from the family tree, orphan children, reclaim
    /// owned resources, and drop the PCB.
    pub fn process_delete(&mut self, pid: Pid) {
        self.process_terminate(pid);

        let (parent, first_child, resource_list) = match self.pcbs.get(&pid) {
            Some(pcb) => (pcb.parent, pcb.first_child, pcb.resource_list.clone()),
            None => {
                log::error!("process_delete: no such pcb {pid}");
                return;
            }
        };

        if let Some(parent_pid) = parent {
            self.remove_child(parent_pid, pid);
        }

        let mut child = first_child;
        while let Some(child_pid) = child {
            let next = self.pcbs.get(&child_pid).and_then(|c| c.next_sibling);
            if let Some(c) = self.pcbs.get_mut(&child_pid) {
                c.parent = None;
            }
            child = next;
        }

        for id in resource_list {
            self.reclaim_resource(pid, id);
        }

        self.pcbs.remove(&pid);
    }

    pub fn add_child(&mut self, parent: Pid, child: Pid) {
        let old_first = self.pcbs.get(&parent).and_then(|p| p.first_child);
        if let Some(child_pcb) = self.pcbs.get_mut(&child) {
            child_pcb.parent = Some(parent);
            child_pcb.next_sibling = old_first;
        }
        if let Some(parent_pcb) = self.pcbs.get_mut(&parent) {
            parent_pcb.first_child = Some(child);
        }
    }

    pub fn remove_child(&mut self, parent: Pid, child: Pid) {
        let Some(parent_pcb) = self.pcbs.get(&parent) else {
            return;
        };
        if parent_pcb.first_child == Some(child) {
            let next = self.pcbs.get(&child).and_then(|c| c.next_sibling);
            self.pcbs.get_mut(&parent).unwrap().first_child = next;
            return;
        }
        let mut cursor = parent_pcb.first_child;
        while let Some(cur) = cursor {
            let next = self.pcbs.get(&cur).and_then(|c| c.next_sibling);
            if next == Some(child) {
                let after = self.pcbs.get(&child).and_then(|c| c.next_sibling);
                self.pcbs.get_mut(&cur).unwrap().next_sibling = after;
                return;
            }
            cursor = next;
        }
    }

    pub fn children_of(&self, parent: Pid) -> Vec<Pid> {
        let mut out = Vec::new();
        let mut cursor = self.pcbs.get(&parent).and_then(|p| p.first_child);
        while let Some(pid) = cursor {
            out.push(pid);
            cursor = self.pcbs.get(&pid).and_then(|c| c.next_sibling);
        }
        out
    }

    pub(crate) fn reclaim_resource(&mut self, owner: Pid, id: u32) {
        match crate::idalloc::ResourceKind::of(id) {
            Some(crate::idalloc::ResourceKind::Pipe) => {
                self.resources.pipes.remove(&id);
            }
            Some(crate::idalloc::ResourceKind::Lock) => {
                self.resources.locks.remove(&id);
            }
            Some(crate::idalloc::ResourceKind::Cvar) => {
                self.resources.cvars.remove(&id);
            }
            Some(crate::idalloc::ResourceKind::Semaphore) => {
                self.resources.semaphores.remove(&id);
            }
            None => log::warn!("process {owner} exit: unrecognized resource id {id:#x}"),
        }
        self.ids.retire_any(id);
    }

    // -- context-switch core --------------------------------------------

    /// Initialize `new_pid`'s kernel context, standing in for the platform
    /// cloning the caller's live kernel-stack bytes through a scratch
    /// window (`kc_copy`). The clone/invalidate/flush scope is modeled
    /// here as the single TLB flush below; actual stack bytes are the
    /// platform's concern, not this crate's.
    pub fn kc_copy(&mut self, new_pid: Pid) {
        self.platform.flush_tlb(TlbTarget::Region0);
        if let Some(pcb) = self.pcbs.get_mut(&new_pid) {
            pcb.kernel_ctx = Some(KernelContext::fresh());
        }
    }

    /// Retarget the MMU to `new_pid` and ensure it has a kernel context,
    /// cloning one via `kc_copy` on first use.
    pub fn kc_switch(&mut self, new_pid: Pid) {
        let needs_copy = self
            .pcbs
            .get(&new_pid)
            .map(|p| p.kernel_ctx.is_none())
            .unwrap_or(false);
        if needs_copy {
            self.kc_copy(new_pid);
        }
        let Some(new_pcb) = self.pcbs.get(&new_pid) else {
            log::error!("kc_switch: target pcb {new_pid} does not exist");
            return;
        };
        self.platform.install_kernel_stack_table(&new_pcb.kernel_stack_pt);
        self.platform.install_region1_table(&new_pcb.region1_pt);
        self.platform.flush_tlb(TlbTarget::All);
    }

    /// Pick the next PCB to run and switch to it, writing its saved user
    /// context into `uctx` so the trap epilogue resumes it.
    pub fn dispatch(&mut self, uctx: &mut crate::context::UserContext) {
        let old_pid = self.scheduler.running;
        let new_pid = self.scheduler.take_next();
        if Some(new_pid) == old_pid {
            return;
        }
        self.scheduler.running = Some(new_pid);
        self.kc_switch(new_pid);
        if let Some(new_pcb) = self.pcbs.get(&new_pid) {
            *uctx = new_pcb.user_ctx;
        }
    }

    /// Park the running process on a queue with the given blocking reason,
    /// saving its user context, then dispatch away from it.
    pub fn block_and_dispatch(
        &mut self,
        queue: QueueName,
        reason: WaitingOn,
        uctx: &mut crate::context::UserContext,
    ) {
        let Some(pid) = self.scheduler.running else {
            log::error!("block_and_dispatch called with no running process");
            return;
        };
        if let Some(pcb) = self.pcbs.get_mut(&pid) {
            pcb.user_ctx = *uctx;
            pcb.waiting_on = reason;
        }
        self.scheduler.add(queue, pid);
        self.dispatch(uctx);
    }

    /// For each of `parent`'s children sitting on the terminated queue,
    /// remove it and delete its PCB. Called from `exit` for the exiting
    /// process's own terminated children.
    pub fn update_terminated(&mut self, parent: Pid) {
        for child in self.children_of(parent) {
            if self.scheduler.remove(QueueName::Terminated, child) {
                self.process_delete(child);
            }
        }
    }

    /// Re-deliver the kernel trap a process last blocked inside, using its
    /// saved trapframe. A real per-process kernel stack would resume
    /// mid-syscall on wakeup; `kc_copy`/`kc_switch` don't clone one, so
    /// instead every blocking syscall in this crate is written as a
    /// restartable precondition check, and resuming one means replaying
    /// its last trap. The driving trap loop calls this once a
    /// previously-blocked pid becomes the scheduler's running process again.
    pub fn redeliver(&mut self, pid: Pid) -> KResult<()> {
        if self.scheduler.running != Some(pid) {
            return Err(KernelError::NoSuchResource);
        }
        let mut uctx = self.require_pcb(pid)?.user_ctx;
        self.handle_syscall(&mut uctx);
        if let Some(pcb) = self.pcbs.get_mut(&pid) {
            pcb.user_ctx = uctx;
        }
        Ok(())
    }

    pub fn halt(&mut self) -> ! {
        self.halted = true;
        self.platform.halt();
    }

    pub fn require_pcb(&self, pid: Pid) -> KResult<&Pcb> {
        self.pcbs.get(&pid).ok_or(KernelError::NoSuchResource)
    }

    pub fn require_pcb_mut(&mut self, pid: Pid) -> KResult<&mut Pcb> {
        self.pcbs.get_mut(&pid).ok_or(KernelError::NoSuchResource)
    }

    // -- validated user-memory access ---------------------------------------
    //
    // A real MMU is out of scope; this is the minimal addressable backing
    // store the validated-pointer contract needs in order to be exercised
    // end to end by tests.

    /// Validate `[addr, addr+len)` against `pid`'s region-1 table and copy
    /// it into kernel memory: the validate-then-copy rule.
    pub fn copy_in_user(&self, pid: Pid, addr: usize, len: usize) -> KResult<Vec<u8>> {
        let pcb = self.require_pcb(pid)?;
        crate::pagetable::check_user_range(
            &pcb.region1_pt,
            self.config.page_size,
            self.config.page_shift,
            addr,
            len,
            crate::pagetable::Prot::R,
        )?;
        let mut out = vec![0u8; len];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = pcb.user_memory.get(addr + i).copied().unwrap_or(0);
        }
        Ok(out)
    }

    /// Validate `[addr, addr+len)` for write and copy `bytes` into it.
    pub fn copy_out_user(&mut self, pid: Pid, addr: usize, bytes: &[u8]) -> KResult<()> {
        let pcb = self.require_pcb(pid)?;
        crate::pagetable::check_user_range(
            &pcb.region1_pt,
            self.config.page_size,
            self.config.page_shift,
            addr,
            bytes.len(),
            crate::pagetable::Prot::W,
        )?;
        let pcb = self.pcbs.get_mut(&pid).expect("checked above");
        if pcb.user_memory.len() < addr + bytes.len() {
            pcb.user_memory.resize(addr + bytes.len(), 0);
        }
        pcb.user_memory[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
