//! Terminal syscalls and trap-driven buffer updates.

use crate::context::UserContext;
use crate::error::{Blocking, KResult, KernelError};
use crate::loader::Loader;
use crate::pagetable::Prot;
use crate::pcb::WaitingOn;
use crate::platform::Platform;
use crate::scheduler::QueueName;

impl<P: Platform, L: Loader> crate::kernel::Kernel<P, L> {
    /// `tty_read(uctx, tty_id, buf, len) -> bytes_read`. Like
    /// `pipe_read`, a single copy never blocks mid-transfer; only the
    /// reader-slot and empty-buffer waits do, each a single precondition
    /// check redone from scratch on redelivery.
    pub fn sys_tty_read(&mut self, uctx: &mut UserContext, tty_id: u32, buf: usize, len: usize) -> KResult<Blocking<i64>> {
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

        let current_reader = self
            .terminals
            .get(tty_id)
            .ok_or(KernelError::NoSuchResource)?
            .reader_pid;
        if let Some(reader) = current_reader {
            if reader != pid {
                self.block_and_dispatch(QueueName::TtyReadWait, WaitingOn::Tty { id: tty_id, writing: false }, uctx);
                return Ok(Blocking::Blocked);
            }
        } else {
            self.terminals.get_mut(tty_id).unwrap().reader_pid = Some(pid);
        }

        if self.terminals.get(tty_id).unwrap().read_buf.is_empty() {
            self.block_and_dispatch(QueueName::TtyReadWait, WaitingOn::Tty { id: tty_id, writing: false }, uctx);
            return Ok(Blocking::Blocked);
        }

        let terminal = self.terminals.get_mut(tty_id).unwrap();
        let to_copy = len.min(terminal.read_buf.len());
        let bytes: Vec<u8> = terminal.read_buf.drain(..to_copy).collect();
        self.copy_out_user(pid, buf, &bytes)?;
        self.terminals.get_mut(tty_id).unwrap().reader_pid = None;
        Ok(Blocking::Done(to_copy as i64))
    }

    /// `tty_write(uctx, tty_id, buf, len) -> bytes_written`.
    /// Sends one `terminal_max_line`-sized chunk per call and blocks for
    /// its transmit-completion trap (`update_writer`); the remaining
    /// staged bytes live on the `Terminal` itself across those blocks.
    pub fn sys_tty_write(&mut self, uctx: &mut UserContext, tty_id: u32, buf: usize, len: usize) -> KResult<Blocking<i64>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let writer_pid = self.terminals.get(tty_id).ok_or(KernelError::NoSuchResource)?.writer_pid;
        if let Some(writer) = writer_pid {
            if writer != pid {
                self.block_and_dispatch(QueueName::TtyWriteWait, WaitingOn::Tty { id: tty_id, writing: true }, uctx);
                return Ok(Blocking::Blocked);
            }
        } else {
            self.terminals.get_mut(tty_id).unwrap().writer_pid = Some(pid);
        }

        if self.terminals.get(tty_id).unwrap().write_pending_total.is_none() {
            let bytes = self.copy_in_user(pid, buf, len)?;
            if bytes.is_empty() {
                self.terminals.get_mut(tty_id).unwrap().writer_pid = None;
                return Ok(Blocking::Done(0));
            }
            let terminal = self.terminals.get_mut(tty_id).unwrap();
            terminal.write_buf = bytes.into();
            terminal.write_pending_total = Some(len);
        } else if self.terminals.get(tty_id).unwrap().write_buf.is_empty() {
            // The previous chunk's transmit-completion trap already fired.
            let total = self.terminals.get(tty_id).unwrap().write_pending_total.unwrap();
            let terminal = self.terminals.get_mut(tty_id).unwrap();
            terminal.write_pending_total = None;
            terminal.writer_pid = None;
            return Ok(Blocking::Done(total as i64));
        }

        let chunk_size = self.config.terminal_max_line;
        let chunk: Vec<u8> = {
            let terminal = self.terminals.get_mut(tty_id).unwrap();
            let take = chunk_size.min(terminal.write_buf.len());
            terminal.write_buf.drain(..take).collect()
        };
        self.platform.tty_transmit(tty_id, &chunk);
        self.block_and_dispatch(QueueName::TtyWriteWait, WaitingOn::Tty { id: tty_id, writing: true }, uctx);
        Ok(Blocking::Blocked)
    }

    /// `update_read_buffer(tty_id)`, invoked by the tty-receive
    /// trap handler.
    pub fn update_read_buffer(&mut self, tty_id: u32) {
        let max = self.config.terminal_max_line;
        let received = self.platform.tty_receive(tty_id, max);
        let Some(terminal) = self.terminals.get_mut(tty_id) else {
            log::error!("tty receive trap for unknown terminal {tty_id}");
            return;
        };
        terminal.read_buf.extend(received);
        self.scheduler.update_tty_read(tty_id, &mut self.pcbs);
    }

    /// `update_writer(tty_id)`, invoked by the tty-transmit
    /// completion trap.
    pub fn update_writer(&mut self, tty_id: u32) {
        self.scheduler.update_tty_write(tty_id, &mut self.pcbs);
    }
}
