//! Terminal resource objects.
//!
//! Operational logic (`tty_read`/`tty_write`/`update_read_buffer`/
//! `update_writer`) lives in [`crate::syscall::tty`] since it needs the
//! scheduler and page tables too; this module only owns the per-terminal
//! buffers.

use std::collections::VecDeque;

use crate::pcb::Pid;

pub struct Terminal {
    pub read_buf: VecDeque<u8>,
    /// Bytes staged by `tty_write` still waiting for transmit-completion
    /// traps; `write_pending_total` tracks the call's original length since
    /// there is no stack frame to hold it across the blocks in between
    /// (mirrors `Pipe::pending_write`).
    pub write_buf: VecDeque<u8>,
    pub write_pending_total: Option<usize>,
    pub reader_pid: Option<Pid>,
    pub writer_pid: Option<Pid>,
}

impl Terminal {
    pub fn new() -> Self {
        Terminal {
            read_buf: VecDeque::new(),
            write_buf: VecDeque::new(),
            write_pending_total: None,
            reader_pid: None,
            writer_pid: None,
        }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TerminalTable {
    pub terminals: Vec<Terminal>,
}

impl TerminalTable {
    pub fn new(count: usize) -> Self {
        TerminalTable {
            terminals: (0..count).map(|_| Terminal::new()).collect(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&Terminal> {
        self.terminals.get(id as usize)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Terminal> {
        self.terminals.get_mut(id as usize)
    }
}
