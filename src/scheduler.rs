//! The scheduler's named queues and wakeup updaters.
//!
//! One queue per distinct blocking reason plus the two singletons (see
//! DESIGN.md for how this count was settled), which is the set every
//! wakeup updater here is defined against.

use std::collections::{HashMap, VecDeque};

use crate::pcb::{Pcb, Pid, WaitingOn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Ready,
    Delay,
    LockWait,
    CvarWait,
    PipeReadWait,
    PipeWriteWait,
    TtyReadWait,
    TtyWriteWait,
    WaitForChild,
    Terminated,
}

const ALL_QUEUES: [QueueName; 10] = [
    QueueName::Ready,
    QueueName::Delay,
    QueueName::LockWait,
    QueueName::CvarWait,
    QueueName::PipeReadWait,
    QueueName::PipeWriteWait,
    QueueName::TtyReadWait,
    QueueName::TtyWriteWait,
    QueueName::WaitForChild,
    QueueName::Terminated,
];

pub struct Scheduler {
    queues: HashMap<QueueName, VecDeque<Pid>>,
    pub running: Option<Pid>,
    pub idle: Pid,
}

impl Scheduler {
    pub fn new(idle: Pid) -> Self {
        let mut queues = HashMap::new();
        for name in ALL_QUEUES {
            queues.insert(name, VecDeque::new());
        }
        Scheduler {
            queues,
            running: None,
            idle,
        }
    }

    fn queue(&self, name: QueueName) -> &VecDeque<Pid> {
        self.queues.get(&name).expect("all queue names pre-populated")
    }

    fn queue_mut(&mut self, name: QueueName) -> &mut VecDeque<Pid> {
        self.queues.get_mut(&name).expect("all queue names pre-populated")
    }

    pub fn add(&mut self, name: QueueName, pid: Pid) {
        if name == QueueName::Ready && pid == self.idle {
            // idle is scheduled only by take_next() exhaustion.
            return;
        }
        self.queue_mut(name).push_back(pid);
    }

    pub fn add_ready(&mut self, pid: Pid) {
        self.add(QueueName::Ready, pid);
    }

    pub fn remove(&mut self, name: QueueName, pid: Pid) -> bool {
        let q = self.queue_mut(name);
        if let Some(pos) = q.iter().position(|p| *p == pid) {
            q.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: QueueName, pid: Pid) -> bool {
        self.queue(name).contains(&pid)
    }

    pub fn len(&self, name: QueueName) -> usize {
        self.queue(name).len()
    }

    pub fn print(&self, name: QueueName) -> String {
        self.queue(name)
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Pop the next PCB to run, falling back to idle when ready is empty.
    pub fn take_next(&mut self) -> Pid {
        self.queue_mut(QueueName::Ready)
            .pop_front()
            .unwrap_or(self.idle)
    }

    // -- wakeup updaters ---------------------------------------------------

    /// Decrement every delayed process's counter; move to ready on reaching
    /// zero.
    pub fn update_delay(&mut self, pcbs: &mut HashMap<Pid, Pcb>) {
        let delayed: Vec<Pid> = self.queue(QueueName::Delay).iter().copied().collect();
        for pid in delayed {
            let done = {
                let pcb = pcbs.get_mut(&pid).expect("delay queue references live pcb");
                pcb.clock_ticks_remaining = pcb.clock_ticks_remaining.saturating_sub(1);
                pcb.clock_ticks_remaining == 0
            };
            if done {
                self.remove(QueueName::Delay, pid);
                let pcb = pcbs.get_mut(&pid).unwrap();
                pcb.waiting_on = WaitingOn::None;
                // `kc_copy`/`kc_switch` never clone a real kernel stack, so
                // there is no paused call frame left inside `sys_delay` to
                // return 0 from; bake the return value into the saved
                // trapframe now, the same trick `fork` uses for the
                // child's return value.
                pcb.user_ctx.set_return(0);
                self.add_ready(pid);
            }
        }
    }

    fn wake_first_matching(
        &mut self,
        queue: QueueName,
        pcbs: &mut HashMap<Pid, Pcb>,
        matches: impl Fn(&WaitingOn) -> bool,
    ) -> Option<Pid> {
        let candidates: Vec<Pid> = self.queue(queue).iter().copied().collect();
        let pid = candidates
            .into_iter()
            .find(|pid| matches(&pcbs[pid].waiting_on))?;
        self.remove(queue, pid);
        pcbs.get_mut(&pid).unwrap().waiting_on = WaitingOn::None;
        self.add_ready(pid);
        Some(pid)
    }

    pub fn update_lock(&mut self, lock_id: u32, pcbs: &mut HashMap<Pid, Pcb>) -> Option<Pid> {
        self.wake_first_matching(QueueName::LockWait, pcbs, |w| *w == WaitingOn::Lock(lock_id))
    }

    /// Wake the first cvar waiter; returns `None` once no waiters remain,
    /// which `broadcast` uses to know when to stop.
    pub fn update_cvar(&mut self, cvar_id: u32, pcbs: &mut HashMap<Pid, Pcb>) -> Option<Pid> {
        self.wake_first_matching(QueueName::CvarWait, pcbs, |w| *w == WaitingOn::Cvar(cvar_id))
    }

    pub fn update_pipe_read(
        &mut self,
        pipe_id: u32,
        current_reader: Option<Pid>,
        pcbs: &mut HashMap<Pid, Pcb>,
    ) -> Option<Pid> {
        self.wake_first_matching(QueueName::PipeReadWait, pcbs, |w| {
            matches!(w, WaitingOn::Pipe { id, writing: false } if *id == pipe_id)
        })
        .filter(|pid| Some(*pid) != current_reader)
    }

    pub fn update_pipe_write(
        &mut self,
        pipe_id: u32,
        current_writer: Option<Pid>,
        pcbs: &mut HashMap<Pid, Pcb>,
    ) -> Option<Pid> {
        self.wake_first_matching(QueueName::PipeWriteWait, pcbs, |w| {
            matches!(w, WaitingOn::Pipe { id, writing: true } if *id == pipe_id)
        })
        .filter(|pid| Some(*pid) != current_writer)
    }

    pub fn update_tty_read(&mut self, tty_id: u32, pcbs: &mut HashMap<Pid, Pcb>) -> Option<Pid> {
        self.wake_first_matching(QueueName::TtyReadWait, pcbs, |w| {
            matches!(w, WaitingOn::Tty { id, writing: false } if *id == tty_id)
        })
    }

    pub fn update_tty_write(&mut self, tty_id: u32, pcbs: &mut HashMap<Pid, Pcb>) -> Option<Pid> {
        self.wake_first_matching(QueueName::TtyWriteWait, pcbs, |w| {
            matches!(w, WaitingOn::Tty { id, writing: true } if *id == tty_id)
        })
    }

    /// Wake `parent_pid` if it is blocked in wait-for-child (the queue is
    /// keyed by the waiting parent's own pid, per `wait`).
    pub fn update_wait(&mut self, parent_pid: Pid, pcbs: &mut HashMap<Pid, Pcb>) -> bool {
        if !self.contains(QueueName::WaitForChild, parent_pid) {
            return false;
        }
        self.remove(QueueName::WaitForChild, parent_pid);
        pcbs.get_mut(&parent_pid).unwrap().waiting_on = WaitingOn::None;
        self.add_ready(parent_pid);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcb(pid: Pid) -> Pcb {
        Pcb::new(pid, 2, 4, format!("p{pid}"))
    }

    #[test]
    fn ready_is_fifo_and_idle_is_fallback() {
        let mut sched = Scheduler::new(0);
        sched.add_ready(1);
        sched.add_ready(2);
        assert_eq!(sched.take_next(), 1);
        assert_eq!(sched.take_next(), 2);
        assert_eq!(sched.take_next(), 0);
    }

    #[test]
    fn add_ready_is_noop_for_idle() {
        let mut sched = Scheduler::new(7);
        sched.add_ready(7);
        assert_eq!(sched.len(QueueName::Ready), 0);
    }

    #[test]
    fn update_delay_wakes_on_zero() {
        let mut sched = Scheduler::new(0);
        let mut pcbs = HashMap::new();
        let mut p1 = pcb(1);
        p1.clock_ticks_remaining = 2;
        p1.waiting_on = WaitingOn::None;
        pcbs.insert(1, p1);
        sched.add(QueueName::Delay, 1);

        sched.update_delay(&mut pcbs);
        assert_eq!(sched.len(QueueName::Ready), 0);
        sched.update_delay(&mut pcbs);
        assert_eq!(sched.take_next(), 1);
    }

    #[test]
    fn update_lock_wakes_only_matching_waiter() {
        let mut sched = Scheduler::new(0);
        let mut pcbs = HashMap::new();
        let mut p1 = pcb(1);
        p1.waiting_on = WaitingOn::Lock(100);
        pcbs.insert(1, p1);
        let mut p2 = pcb(2);
        p2.waiting_on = WaitingOn::Lock(200);
        pcbs.insert(2, p2);
        sched.add(QueueName::LockWait, 1);
        sched.add(QueueName::LockWait, 2);

        let woken = sched.update_lock(100, &mut pcbs);
        assert_eq!(woken, Some(1));
        assert!(sched.contains(QueueName::LockWait, 2));
        assert!(!sched.contains(QueueName::LockWait, 1));
    }
}
