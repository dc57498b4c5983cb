//! Pipe syscalls: a fixed-capacity byte ring with one current
//! reader and one current writer at a time.

use crate::context::UserContext;
use crate::error::{Blocking, KResult, KernelError};
use crate::loader::Loader;
use crate::pagetable::Prot;
use crate::pcb::{Pid, WaitingOn};
use crate::platform::Platform;
use crate::resources::{Pipe, PendingWrite};
use crate::scheduler::QueueName;

impl<P: Platform, L: Loader> crate::kernel::Kernel<P, L> {
    /// `pipe_init(out id)`.
    pub fn sys_pipe_init(&mut self, out_ptr: usize) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        {
            let pcb = self.require_pcb(pid)?;
            crate::pagetable::check_user_range(
                &pcb.region1_pt,
                self.config.page_size,
                self.config.page_shift,
                out_ptr,
                4,
                Prot::W,
            )?;
        }
        let id = self.ids.pipes.find_and_set().ok_or(KernelError::OutOfIds)?;
        self.resources.pipes.insert(id, Pipe::new(self.config.pipe_capacity, pid));
        self.pcbs.get_mut(&pid).unwrap().resource_list.push(id);
        self.copy_out_user(pid, out_ptr, &id.to_le_bytes())?;
        Ok(())
    }

    /// `pipe_read(uctx, id, buf, len) -> bytes_read`. A single
    /// read never blocks mid-copy: it only blocks while waiting for the
    /// reader slot or for data to arrive, both single precondition checks
    /// the redelivered trap re-runs from scratch.
    pub fn sys_pipe_read(&mut self, uctx: &mut UserContext, id: u32, buf: usize, len: usize) -> KResult<Blocking<i64>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        {
            let pcb = self.require_pcb(pid)?;
            crate::pagetable::check_user_range(
                &pcb.region1_pt,
                self.config.page_size,
                self.config.page_shift,
                buf,
                len,
                Prot::W,
            )?;
        }

        if len == 0 {
            return Ok(Blocking::Done(0));
        }

        let current_reader = self.resources.pipes.get(&id).ok_or(KernelError::NoSuchResource)?.reader_pid;
        if let Some(reader) = current_reader {
            if reader != pid {
                self.block_and_dispatch(QueueName::PipeReadWait, WaitingOn::Pipe { id, writing: false }, uctx);
                return Ok(Blocking::Blocked);
            }
        } else {
            self.resources.pipes.get_mut(&id).unwrap().reader_pid = Some(pid);
        }

        if self.resources.pipes[&id].len() == 0 {
            self.block_and_dispatch(QueueName::PipeReadWait, WaitingOn::Pipe { id, writing: false }, uctx);
            return Ok(Blocking::Blocked);
        }

        let pipe = self.resources.pipes.get_mut(&id).unwrap();
        let to_copy = len.min(pipe.len());
        let bytes: Vec<u8> = pipe.data.drain(..to_copy).collect();
        self.copy_out_user(pid, buf, &bytes)?;

        let pipe = self.resources.pipes.get_mut(&id).unwrap();
        pipe.reader_pid = None;
        let has_space = pipe.free_space() > 0;

        self.scheduler.update_pipe_read(id, Some(pid), &mut self.pcbs);
        if has_space {
            self.scheduler.update_pipe_write(id, None, &mut self.pcbs);
        }
        Ok(Blocking::Done(to_copy as i64))
    }

    /// `pipe_write(uctx, id, buf, len) -> bytes_written`. May
    /// drain across several redelivered traps if the ring fills up
    /// mid-write; the unwritten remainder lives in the pipe's
    /// `pending_write`, not a local.
    pub fn sys_pipe_write(&mut self, uctx: &mut UserContext, id: u32, buf: usize, len: usize) -> KResult<Blocking<i64>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let writer_pid = self.resources.pipes.get(&id).ok_or(KernelError::NoSuchResource)?.writer_pid;
        if let Some(writer) = writer_pid {
            if writer != pid {
                self.block_and_dispatch(QueueName::PipeWriteWait, WaitingOn::Pipe { id, writing: true }, uctx);
                return Ok(Blocking::Blocked);
            }
        } else {
            self.resources.pipes.get_mut(&id).unwrap().writer_pid = Some(pid);
        }

        if self.resources.pipes[&id].pending_write.is_none() {
            // Copy into a kernel staging buffer up front so the bytes being
            // written cannot change underneath a later block/dispatch.
            let bytes = self.copy_in_user(pid, buf, len)?;
            self.resources.pipes.get_mut(&id).unwrap().pending_write = Some(PendingWrite {
                remaining: bytes.into(),
                total: len,
            });
        }

        let chunk: Vec<u8> = {
            let pipe = self.resources.pipes.get_mut(&id).unwrap();
            let room = pipe.free_space();
            let pending = pipe.pending_write.as_mut().unwrap();
            let chunk = room.min(pending.remaining.len());
            pending.remaining.drain(..chunk).collect()
        };
        if !chunk.is_empty() {
            self.resources.pipes.get_mut(&id).unwrap().data.extend(chunk);
            self.scheduler.update_pipe_read(id, None, &mut self.pcbs);
        }

        if !self.resources.pipes[&id].pending_write.as_ref().unwrap().remaining.is_empty() {
            self.block_and_dispatch(QueueName::PipeWriteWait, WaitingOn::Pipe { id, writing: true }, uctx);
            return Ok(Blocking::Blocked);
        }

        let total = self.resources.pipes[&id].pending_write.as_ref().unwrap().total;
        let pipe = self.resources.pipes.get_mut(&id).unwrap();
        pipe.pending_write = None;
        pipe.writer_pid = None;
        self.scheduler.update_pipe_write(id, Some(pid), &mut self.pcbs);

        Ok(Blocking::Done(total as i64))
    }
}
