//! Pipe, lock, cvar, and semaphore resource objects.

use std::collections::HashMap;

use crate::pcb::Pid;

/// A writer's staged bytes still waiting for ring-buffer room, persisted on
/// the pipe itself rather than the caller's stack frame across the chunks
/// `pipe_write` blocks on.
pub struct PendingWrite {
    pub remaining: std::collections::VecDeque<u8>,
    pub total: usize,
}

pub struct Pipe {
    pub capacity: usize,
    pub data: std::collections::VecDeque<u8>,
    pub reader_pid: Option<Pid>,
    pub writer_pid: Option<Pid>,
    pub pending_write: Option<PendingWrite>,
    pub owner: Pid,
}

impl Pipe {
    pub fn new(capacity: usize, owner: Pid) -> Self {
        Pipe {
            capacity,
            data: std::collections::VecDeque::with_capacity(capacity),
            reader_pid: None,
            writer_pid: None,
            pending_write: None,
            owner,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn free_space(&self) -> usize {
        self.capacity - self.data.len()
    }
}

pub struct Lock {
    pub owner: Option<Pid>,
    pub creator: Pid,
}

pub struct Cvar {
    pub creator: Pid,
}

pub struct Semaphore {
    pub value: i64,
    pub lock_id: u32,
    pub cvar_id: u32,
    pub creator: Pid,
}

#[derive(Default)]
pub struct ResourceTables {
    pub pipes: HashMap<u32, Pipe>,
    pub locks: HashMap<u32, Lock>,
    pub cvars: HashMap<u32, Cvar>,
    pub semaphores: HashMap<u32, Semaphore>,
}
