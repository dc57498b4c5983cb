//! Process lifecycle syscalls: `fork`, `exec`, `exit`, `wait`, `getpid`,
//! `brk`, `delay`.

use crate::context::UserContext;
use crate::error::{Blocking, KResult, KernelError};
use crate::loader::Loader;
use crate::pagetable::Prot;
use crate::pcb::{Pid, WaitingOn};
use crate::platform::{Platform, TlbTarget};
use crate::scheduler::QueueName;

impl<P: Platform, L: Loader> crate::kernel::Kernel<P, L> {
    /// Read a NUL-terminated string out of user memory, one validated byte
    /// at a time so a short string never requires a whole-page mapping.
    fn read_cstring(&self, pid: Pid, addr: usize, max: usize) -> KResult<String> {
        let mut bytes = Vec::new();
        for i in 0..max {
            let byte = self.copy_in_user(pid, addr + i, 1)?[0];
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a NUL-terminated, zero-terminated array of string pointers
    /// (`argv`), each pointer stored as 8 little-endian bytes.
    fn read_argv(&self, pid: Pid, addr: usize, max_args: usize) -> KResult<Vec<String>> {
        let mut argv = Vec::new();
        for i in 0..max_args {
            let slot = self.copy_in_user(pid, addr + i * 8, 8)?;
            let ptr = usize::from_le_bytes(slot.try_into().expect("8 bytes"));
            if ptr == 0 {
                break;
            }
            argv.push(self.read_cstring(pid, ptr, self.config.terminal_max_line)?);
        }
        Ok(argv)
    }

    /// `fork(uctx) -> child_pid for parent, 0 for child`.
    pub fn sys_fork(&mut self, _uctx: &mut UserContext) -> KResult<Pid> {
        let parent_pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let child_pid = self.process_create("fork")?;

        let parent_ctx = self.require_pcb(parent_pid)?.user_ctx;
        self.pcbs.get_mut(&child_pid).unwrap().user_ctx = parent_ctx;

        let page_size = self.config.page_size;
        let parent_pages: Vec<_> = self.require_pcb(parent_pid)?.region1_pt.iter_valid().collect();
        for (page, pte) in parent_pages {
            let frame = self
                .frames
                .find_and_set()
                .map_err(crate::error::FrameErrorWrap)?;
            let start = page * page_size;
            let bytes = self.copy_in_user(parent_pid, start, page_size)?;
            self.platform.flush_tlb(TlbTarget::Region0);

            let child = self.pcbs.get_mut(&child_pid).unwrap();
            child
                .region1_pt
                .set(page, pte.prot, frame)
                .expect("page index within freshly-sized table");
            if child.user_memory.len() < start + page_size {
                child.user_memory.resize(start + page_size, 0);
            }
            child.user_memory[start..start + page_size].copy_from_slice(&bytes);
        }

        let (brk, data_end, text_end) = {
            let parent = self.require_pcb(parent_pid)?;
            (parent.brk, parent.data_end, parent.text_end)
        };
        {
            let child = self.pcbs.get_mut(&child_pid).unwrap();
            child.brk = brk;
            child.data_end = data_end;
            child.text_end = text_end;
        }

        self.add_child(parent_pid, child_pid);
        self.kc_copy(child_pid);
        // The child resumes this same syscall later through `dispatch`,
        // never through this return path, so its own return value is
        // baked into its saved context now.
        self.pcbs.get_mut(&child_pid).unwrap().user_ctx.set_return(0);
        self.scheduler.add_ready(child_pid);

        Ok(child_pid)
    }

    /// `exec(uctx, filename, argv)`. `filename_addr`/`argv_addr`
    /// are user pointers: a NUL-terminated path and a NULL-terminated array
    /// of pointers to NUL-terminated strings.
    pub fn sys_exec(&mut self, uctx: &mut UserContext, filename_addr: usize, argv_addr: usize) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let filename = self.read_cstring(pid, filename_addr, self.config.terminal_max_line)?;
        let argv = self.read_argv(pid, argv_addr, 32)?;

        self.process_terminate(pid);
        let region1_pages = self.config.region1_pages;
        let page_size = self.config.page_size;
        let image = self
            .loader
            .load(&filename, &argv, &mut self.frames, region1_pages, page_size);

        let image = match image {
            Ok(image) => image,
            Err(_) => {
                // Region-1 is already torn down; there is no recoverable
                // address space to return to.
                log::warn!("process {pid} exec({filename}) failed after teardown; killing");
                self.kill_current(uctx, crate::error::EXIT_STATUS_KILLED);
                return Ok(());
            }
        };

        let pcb = self.require_pcb_mut(pid)?;
        pcb.region1_pt = image.region1;
        pcb.user_memory.clear();
        pcb.text_end = image.text_end;
        pcb.data_end = image.data_end;
        pcb.brk = image.brk;
        pcb.user_ctx.pc = image.entry_pc;
        pcb.user_ctx.sp = image.initial_sp;
        pcb.user_ctx.regs = [0; 4];
        *uctx = pcb.user_ctx;
        self.platform.flush_tlb(TlbTarget::Region1);
        Ok(())
    }

    /// Terminate the running process outright (fatal trap or post-teardown
    /// `exec` failure) by running the same machinery as `exit`.
    pub(crate) fn kill_current(&mut self, uctx: &mut UserContext, status: i32) {
        if let Some(pid) = self.running_pid() {
            self.do_exit(uctx, pid, status);
        }
    }

    /// `exit(uctx, status)`.
    pub fn sys_exit(&mut self, uctx: &mut UserContext, status: i32) {
        let Some(pid) = self.running_pid() else {
            return;
        };
        self.do_exit(uctx, pid, status);
    }

    fn do_exit(&mut self, uctx: &mut UserContext, pid: Pid, status: i32) {
        if pid <= 1 {
            log::info!("pid {pid} (idle/init) exited with status {status}; halting");
            self.halt();
        }

        // Reap this process's own children already sitting on the
        // terminated queue.
        self.update_terminated(pid);

        let parent = self.require_pcb(pid).ok().and_then(|p| p.parent);
        if parent.is_none() {
            self.process_delete(pid);
            self.scheduler.running = None;
            self.dispatch(uctx);
            return;
        }

        self.process_terminate(pid);
        {
            let pcb = self.pcbs.get_mut(&pid).unwrap();
            pcb.exited = true;
            pcb.exit_status = status;
            pcb.waiting_on = WaitingOn::None;
        }
        self.scheduler.add(QueueName::Terminated, pid);
        if let Some(parent_pid) = parent {
            self.scheduler.update_wait(parent_pid, &mut self.pcbs);
        }
        self.scheduler.running = None;
        self.dispatch(uctx);
    }

    /// `wait(uctx, status_ptr) -> child_pid`. A single check of
    /// the terminated-children list; `update_wait` wakes this pid once a
    /// child exits, and the redelivered trap finds it waiting there.
    pub fn sys_wait(&mut self, uctx: &mut UserContext, status_ptr: usize) -> KResult<Blocking<Pid>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        {
            let pcb = self.require_pcb(pid)?;
            crate::pagetable::check_user_range(
                &pcb.region1_pt,
                self.config.page_size,
                self.config.page_shift,
                status_ptr,
                4,
                Prot::R | Prot::W,
            )?;
        }
        let children = self.children_of(pid);
        if children.is_empty() {
            return Err(KernelError::NoChildren);
        }
        if let Some(child) = children
            .iter()
            .copied()
            .find(|c| self.scheduler.contains(QueueName::Terminated, *c))
        {
            self.scheduler.remove(QueueName::Terminated, child);
            let exit_status = self.require_pcb(child)?.exit_status;
            self.copy_out_user(pid, status_ptr, &exit_status.to_le_bytes())?;
            self.process_delete(child);
            return Ok(Blocking::Done(child));
        }
        self.block_and_dispatch(QueueName::WaitForChild, WaitingOn::WaitChild, uctx);
        Ok(Blocking::Blocked)
    }

    /// `getpid()`.
    pub fn sys_getpid(&self) -> Pid {
        self.running_pid().unwrap_or(0)
    }

    /// `brk(addr)`.
    pub fn sys_brk(&mut self, addr: usize) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let page_size = self.config.page_size;

        let (old_brk, data_end, sp) = {
            let pcb = self.require_pcb(pid)?;
            (pcb.brk, pcb.data_end, pcb.user_ctx.sp)
        };
        if addr == 0 || addr <= data_end {
            return Err(KernelError::InvalidArgument);
        }

        let new_brk = self.config.page_round_up(addr);
        let old_pages = self.config.page_of(self.config.page_round_up(old_brk.max(data_end)));
        let new_pages = self.config.page_of(new_brk);
        let stack_page = self.config.page_of(sp);
        if new_pages + self.config.red_zone_pages > stack_page {
            return Err(KernelError::InvalidArgument);
        }

        if new_pages > old_pages {
            for page in old_pages..new_pages {
                let frame = self
                    .frames
                    .find_and_set()
                    .map_err(crate::error::FrameErrorWrap)?;
                self.pcbs
                    .get_mut(&pid)
                    .unwrap()
                    .region1_pt
                    .set(page, Prot::R | Prot::W, frame)?;
            }
        } else if new_pages < old_pages {
            for page in new_pages..old_pages {
                let freed = self.pcbs[&pid].region1_pt.get(page).filter(|pte| pte.valid);
                if let Some(pte) = freed {
                    self.frames.clear(pte.pfn);
                    self.pcbs.get_mut(&pid).unwrap().region1_pt.clear(page)?;
                }
            }
        }

        self.platform.flush_tlb(TlbTarget::Region1);
        self.pcbs.get_mut(&pid).unwrap().brk = new_brk;
        Ok(())
    }

    /// `delay(uctx, ticks)`. Unlike the other blocking
    /// syscalls, a delayed process never redelivers this trap: `update_delay`
    /// bakes the `0` return value directly into its saved context when the
    /// counter reaches zero (scheduler.rs), so it simply resumes normally
    /// once `dispatch` picks it back up.
    pub fn sys_delay(&mut self, uctx: &mut UserContext, ticks: i64) -> KResult<Blocking<()>> {
        if ticks < 0 {
            return Err(KernelError::InvalidArgument);
        }
        if ticks == 0 {
            return Ok(Blocking::Done(()));
        }
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        self.pcbs.get_mut(&pid).unwrap().clock_ticks_remaining = ticks as u32;
        self.block_and_dispatch(QueueName::Delay, WaitingOn::None, uctx);
        Ok(Blocking::Blocked)
    }
}
