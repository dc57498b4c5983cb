//! Synchronization syscalls: locks, condition variables,
//! semaphores built on top of them, and generic resource reclaim.

use crate::context::UserContext;
use crate::error::{Blocking, KResult, KernelError};
use crate::loader::Loader;
use crate::pagetable::Prot;
use crate::pcb::{Pid, WaitingOn};
use crate::platform::Platform;
use crate::resources::{Cvar, Lock, Semaphore};
use crate::scheduler::QueueName;

impl<P: Platform, L: Loader> crate::kernel::Kernel<P, L> {
    fn validate_out_ptr(&self, pid: Pid, addr: usize) -> KResult<()> {
        let pcb = self.require_pcb(pid)?;
        crate::pagetable::check_user_range(
            &pcb.region1_pt,
            self.config.page_size,
            self.config.page_shift,
            addr,
            4,
            Prot::W,
        )?;
        Ok(())
    }

    fn record_owned(&mut self, pid: Pid, id: u32) {
        self.pcbs.get_mut(&pid).unwrap().resource_list.push(id);
    }

    // -- lock ---------------------------------------------------------------

    /// `lock_init(out id)`.
    pub fn sys_lock_init(&mut self, out_ptr: usize) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        self.validate_out_ptr(pid, out_ptr)?;
        let id = self.ids.locks.find_and_set().ok_or(KernelError::OutOfIds)?;
        self.resources.locks.insert(
            id,
            Lock {
                owner: None,
                creator: pid,
            },
        );
        self.record_owned(pid, id);
        self.copy_out_user(pid, out_ptr, &id.to_le_bytes())?;
        Ok(())
    }

    /// `acquire(uctx, id)`. A single precondition check: the
    /// caller is woken by `update_lock` with nothing else left to do, and
    /// re-delivers this same trap (`Kernel::redeliver`), which lands back
    /// here and finds the lock free.
    pub fn sys_lock_acquire(&mut self, uctx: &mut UserContext, id: u32) -> KResult<Blocking<()>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let lock = self.resources.locks.get_mut(&id).ok_or(KernelError::NoSuchResource)?;
        if lock.owner.is_none() {
            lock.owner = Some(pid);
            return Ok(Blocking::Done(()));
        }
        self.block_and_dispatch(QueueName::LockWait, WaitingOn::Lock(id), uctx);
        Ok(Blocking::Blocked)
    }

    /// `release(id)`.
    pub fn sys_lock_release(&mut self, id: u32) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let lock = self.resources.locks.get_mut(&id).ok_or(KernelError::NoSuchResource)?;
        if lock.owner != Some(pid) {
            return Err(KernelError::NotOwner);
        }
        lock.owner = None;
        self.scheduler.update_lock(id, &mut self.pcbs);
        Ok(())
    }

    // -- condition variable ---------------------------------------------------

    /// `cvar_init(out id)`.
    pub fn sys_cvar_init(&mut self, out_ptr: usize) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        self.validate_out_ptr(pid, out_ptr)?;
        let id = self.ids.cvars.find_and_set().ok_or(KernelError::OutOfIds)?;
        self.resources.cvars.insert(id, Cvar { creator: pid });
        self.record_owned(pid, id);
        self.copy_out_user(pid, out_ptr, &id.to_le_bytes())?;
        Ok(())
    }

    /// `signal(id)`.
    pub fn sys_cvar_signal(&mut self, id: u32) -> KResult<()> {
        if !self.resources.cvars.contains_key(&id) {
            return Err(KernelError::NoSuchResource);
        }
        self.scheduler.update_cvar(id, &mut self.pcbs);
        Ok(())
    }

    /// `broadcast(id)`: repeat `update_cvar` until no waiters
    /// remain.
    pub fn sys_cvar_broadcast(&mut self, id: u32) -> KResult<()> {
        if !self.resources.cvars.contains_key(&id) {
            return Err(KernelError::NoSuchResource);
        }
        while self.scheduler.update_cvar(id, &mut self.pcbs).is_some() {}
        Ok(())
    }

    /// `wait(uctx, cvar_id, lock_id)`. Mesa semantics: the
    /// caller re-acquires the lock itself on wakeup and is expected to
    /// recheck its predicate. Still holding `lock_id` distinguishes a
    /// fresh call (release it and block on the cvar) from the redelivered
    /// one after `update_cvar` woke this process (reacquire and return).
    pub fn sys_cvar_wait(&mut self, uctx: &mut UserContext, cvar_id: u32, lock_id: u32) -> KResult<Blocking<()>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        if !self.resources.cvars.contains_key(&cvar_id) {
            return Err(KernelError::NoSuchResource);
        }
        let held = self
            .resources
            .locks
            .get(&lock_id)
            .ok_or(KernelError::NoSuchResource)?
            .owner
            == Some(pid);
        if held {
            self.sys_lock_release(lock_id)?;
            self.block_and_dispatch(QueueName::CvarWait, WaitingOn::Cvar(cvar_id), uctx);
            return Ok(Blocking::Blocked);
        }
        self.sys_lock_acquire(uctx, lock_id)
    }

    // -- semaphore (built on lock + cvar) -------------------------------------

    /// `sem_init(&id, val)`.
    pub fn sys_sem_init(&mut self, out_ptr: usize, initial: i64) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        self.validate_out_ptr(pid, out_ptr)?;
        let lock_id = self.ids.locks.find_and_set().ok_or(KernelError::OutOfIds)?;
        let cvar_id = self.ids.cvars.find_and_set().ok_or(KernelError::OutOfIds)?;
        let sem_id = self.ids.semaphores.find_and_set().ok_or(KernelError::OutOfIds)?;
        self.resources.locks.insert(
            lock_id,
            Lock {
                owner: None,
                creator: pid,
            },
        );
        self.resources.cvars.insert(cvar_id, Cvar { creator: pid });
        self.resources.semaphores.insert(
            sem_id,
            Semaphore {
                value: initial,
                lock_id,
                cvar_id,
                creator: pid,
            },
        );
        self.record_owned(pid, lock_id);
        self.record_owned(pid, cvar_id);
        self.record_owned(pid, sem_id);
        self.copy_out_user(pid, out_ptr, &sem_id.to_le_bytes())?;
        Ok(())
    }

    /// `sem_down`: acquire the embedded lock, wait on the
    /// embedded cvar while the value is zero, decrement, release. Whether
    /// this call already holds the lock (fresh attempt, or resumed after
    /// reacquiring via `sys_cvar_wait`) or doesn't (must acquire first)
    /// tells the single pass below which step to take.
    pub fn sys_sem_down(&mut self, uctx: &mut UserContext, id: u32) -> KResult<Blocking<()>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let (lock_id, cvar_id) = {
            let sem = self.resources.semaphores.get(&id).ok_or(KernelError::NoSuchResource)?;
            (sem.lock_id, sem.cvar_id)
        };
        let holds_lock = self
            .resources
            .locks
            .get(&lock_id)
            .map(|l| l.owner == Some(pid))
            .unwrap_or(false);
        if !holds_lock {
            if let Blocking::Blocked = self.sys_lock_acquire(uctx, lock_id)? {
                return Ok(Blocking::Blocked);
            }
        }
        if self.resources.semaphores[&id].value == 0 {
            return self.sys_cvar_wait(uctx, cvar_id, lock_id);
        }
        self.resources.semaphores.get_mut(&id).unwrap().value -= 1;
        self.sys_lock_release(lock_id)?;
        Ok(Blocking::Done(()))
    }

    /// `sem_up`: acquire, increment, signal, release.
    pub fn sys_sem_up(&mut self, uctx: &mut UserContext, id: u32) -> KResult<Blocking<()>> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        let (lock_id, cvar_id) = {
            let sem = self.resources.semaphores.get(&id).ok_or(KernelError::NoSuchResource)?;
            (sem.lock_id, sem.cvar_id)
        };
        let holds_lock = self
            .resources
            .locks
            .get(&lock_id)
            .map(|l| l.owner == Some(pid))
            .unwrap_or(false);
        if !holds_lock {
            if let Blocking::Blocked = self.sys_lock_acquire(uctx, lock_id)? {
                return Ok(Blocking::Blocked);
            }
        }
        self.resources.semaphores.get_mut(&id).unwrap().value += 1;
        self.sys_cvar_signal(cvar_id)?;
        self.sys_lock_release(lock_id)?;
        Ok(Blocking::Done(()))
    }

    // -- generic reclaim ------------------------------------------------------

    /// `reclaim(id)`: a caller-initiated early free of any resource kind it
    /// created, mirroring the automatic sweep `process_delete` runs over
    /// `resource_list` at exit.
    pub fn sys_reclaim(&mut self, id: u32) -> KResult<()> {
        let pid = self.running_pid().ok_or(KernelError::NoSuchResource)?;
        if !self.require_pcb(pid)?.resource_list.contains(&id) {
            return Err(KernelError::NotOwner);
        }
        self.pcbs
            .get_mut(&pid)
            .unwrap()
            .resource_list
            .retain(|owned| *owned != id);
        self.reclaim_resource(pid, id);
        Ok(())
    }
}
