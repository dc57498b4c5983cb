//! Per-kind dense identifier allocator.
//!
//! Four independent bitmaps, one per resource kind, each offset by a
//! disjoint base so a raw ID's high bits tell you what kind of resource it
//! names.

pub const PIPE_BASE: u32 = 0x1000_0000;
pub const LOCK_BASE: u32 = 0x2000_0000;
pub const CVAR_BASE: u32 = 0x3000_0000;
pub const SEM_BASE: u32 = 0x4000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Pipe,
    Lock,
    Cvar,
    Semaphore,
}

impl ResourceKind {
    fn base(self) -> u32 {
        match self {
            ResourceKind::Pipe => PIPE_BASE,
            ResourceKind::Lock => LOCK_BASE,
            ResourceKind::Cvar => CVAR_BASE,
            ResourceKind::Semaphore => SEM_BASE,
        }
    }

    pub fn of(id: u32) -> Option<ResourceKind> {
        let masked = id & 0xF000_0000;
        match masked {
            PIPE_BASE => Some(ResourceKind::Pipe),
            LOCK_BASE => Some(ResourceKind::Lock),
            CVAR_BASE => Some(ResourceKind::Cvar),
            SEM_BASE => Some(ResourceKind::Semaphore),
            _ => None,
        }
    }
}

pub struct IdBitmap {
    kind: ResourceKind,
    used: Vec<bool>,
}

impl IdBitmap {
    pub fn new(kind: ResourceKind, capacity: usize) -> Self {
        IdBitmap {
            kind,
            used: vec![false; capacity],
        }
    }

    pub fn find_and_set(&mut self) -> Option<u32> {
        for (i, used) in self.used.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return Some(self.kind.base() + i as u32);
            }
        }
        None
    }

    pub fn retire(&mut self, id: u32) {
        if let Some(idx) = self.local_index(id) {
            if let Some(slot) = self.used.get_mut(idx) {
                if !*slot {
                    log::warn!("retiring already-free id {id:#x}");
                }
                *slot = false;
                return;
            }
        }
        log::error!("retire() called with id {id:#x} not owned by this allocator");
    }

    pub fn is_valid(&self, id: u32) -> bool {
        self.local_index(id)
            .and_then(|idx| self.used.get(idx))
            .copied()
            .unwrap_or(false)
    }

    fn local_index(&self, id: u32) -> Option<usize> {
        if ResourceKind::of(id)? != self.kind {
            return None;
        }
        Some((id - self.kind.base()) as usize)
    }
}

/// All four per-kind bitmaps bundled as one logical identifier-allocator
/// facility.
pub struct IdAllocator {
    pub pipes: IdBitmap,
    pub locks: IdBitmap,
    pub cvars: IdBitmap,
    pub semaphores: IdBitmap,
}

impl IdAllocator {
    pub fn new(capacity_per_kind: usize) -> Self {
        IdAllocator {
            pipes: IdBitmap::new(ResourceKind::Pipe, capacity_per_kind),
            locks: IdBitmap::new(ResourceKind::Lock, capacity_per_kind),
            cvars: IdBitmap::new(ResourceKind::Cvar, capacity_per_kind),
            semaphores: IdBitmap::new(ResourceKind::Semaphore, capacity_per_kind),
        }
    }

    pub fn retire_any(&mut self, id: u32) {
        match ResourceKind::of(id) {
            Some(ResourceKind::Pipe) => self.pipes.retire(id),
            Some(ResourceKind::Lock) => self.locks.retire(id),
            Some(ResourceKind::Cvar) => self.cvars.retire(id),
            Some(ResourceKind::Semaphore) => self.semaphores.retire(id),
            None => log::error!("retire_any() called with unrecognized id {id:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_encode_their_kind() {
        let mut locks = IdBitmap::new(ResourceKind::Lock, 4);
        let id = locks.find_and_set().unwrap();
        assert_eq!(ResourceKind::of(id), Some(ResourceKind::Lock));
        assert!(locks.is_valid(id));
        locks.retire(id);
        assert!(!locks.is_valid(id));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pipes = IdBitmap::new(ResourceKind::Pipe, 1);
        pipes.find_and_set().unwrap();
        assert!(pipes.find_and_set().is_none());
    }

    #[test]
    fn cross_kind_id_is_invalid() {
        let locks = IdBitmap::new(ResourceKind::Lock, 4);
        assert!(!locks.is_valid(CVAR_BASE));
    }
}
