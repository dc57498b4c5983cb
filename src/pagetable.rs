//! Page-table entries and per-region tables.
//!
//! A plain `Vec<Pte>` indexed by page number instead of a radix-walked
//! multi-level page table, since region-1/region-0 here are fixed-length
//! flat arrays.

use bitflags::bitflags;

use crate::error::PageTableError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u8 {
        const R = 0b001;
        const W = 0b010;
        const X = 0b100;
    }
}

/// A single page-table entry. Normalized form: `valid == false` implies
/// `prot.is_empty()` and `pfn == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub valid: bool,
    pub prot: Prot,
    pub pfn: usize,
}

impl Pte {
    const EMPTY: Pte = Pte {
        valid: false,
        prot: Prot::empty(),
        pfn: 0,
    };
}

impl Default for Pte {
    fn default() -> Self {
        Pte::EMPTY
    }
}

/// A fixed-length, software-loaded page table for one region of one
/// process's address space.
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<Pte>,
}

impl PageTable {
    pub fn new(len: usize) -> Self {
        PageTable {
            entries: vec![Pte::EMPTY; len],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, page: usize) -> Option<Pte> {
        self.entries.get(page).copied()
    }

    /// Install `(valid=1, prot, pfn)` at `page`. Overwriting a valid entry
    /// is allowed but logged.
    pub fn set(&mut self, page: usize, prot: Prot, pfn: usize) -> Result<(), PageTableError> {
        let slot = self
            .entries
            .get_mut(page)
            .ok_or(PageTableError::OutOfRange(page))?;
        if slot.valid {
            log::warn!("overwriting valid page-table entry at page {page}");
        }
        *slot = Pte {
            valid: true,
            prot,
            pfn,
        };
        Ok(())
    }

    /// Normalize `page` back to the empty entry.
    pub fn clear(&mut self, page: usize) -> Result<(), PageTableError> {
        let slot = self
            .entries
            .get_mut(page)
            .ok_or(PageTableError::OutOfRange(page))?;
        *slot = Pte::EMPTY;
        Ok(())
    }

    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, Pte)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, pte)| pte.valid)
            .map(|(page, pte)| (page, *pte))
    }
}

/// Validate that every page spanning `[addr, addr+len)` is mapped with at
/// least `required` protection. Used to check every user pointer passed to a
/// syscall before it is dereferenced: validate-then-copy, to avoid TOCTOU
/// across a blocking dispatch.
pub fn check_user_range(
    pt: &PageTable,
    page_size: usize,
    page_shift: u32,
    addr: usize,
    len: usize,
    required: Prot,
) -> Result<(), PageTableError> {
    if len == 0 {
        return Ok(());
    }
    let first_page = addr >> page_shift;
    let last_byte = addr
        .checked_add(len)
        .and_then(|end| end.checked_sub(1))
        .ok_or(PageTableError::PermissionDenied { addr, len })?;
    let last_page = last_byte >> page_shift;
    let _ = page_size;
    for page in first_page..=last_page {
        match pt.get(page) {
            Some(pte) if pte.valid && pte.prot.contains(required) => {}
            _ => return Err(PageTableError::PermissionDenied { addr, len }),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut pt = PageTable::new(4);
        pt.set(1, Prot::R | Prot::W, 7).unwrap();
        let pte = pt.get(1).unwrap();
        assert!(pte.valid);
        assert_eq!(pte.pfn, 7);
        assert!(pte.prot.contains(Prot::W));
    }

    #[test]
    fn clear_normalizes_entry() {
        let mut pt = PageTable::new(4);
        pt.set(0, Prot::R, 3).unwrap();
        pt.clear(0).unwrap();
        let pte = pt.get(0).unwrap();
        assert_eq!(pte, Pte::default());
    }

    #[test]
    fn check_user_range_rejects_unmapped_page() {
        let mut pt = PageTable::new(4);
        pt.set(0, Prot::R | Prot::W, 1).unwrap();
        assert!(check_user_range(&pt, 4096, 12, 0, 10, Prot::R).is_ok());
        assert!(check_user_range(&pt, 4096, 12, 4096, 10, Prot::R).is_err());
    }

    #[test]
    fn check_user_range_rejects_insufficient_protection() {
        let mut pt = PageTable::new(4);
        pt.set(0, Prot::R, 1).unwrap();
        assert!(check_user_range(&pt, 4096, 12, 0, 10, Prot::W).is_err());
    }

    #[test]
    fn check_user_range_spans_pages() {
        let mut pt = PageTable::new(4);
        pt.set(0, Prot::R, 1).unwrap();
        pt.set(1, Prot::R, 2).unwrap();
        assert!(check_user_range(&pt, 4096, 12, 4090, 20, Prot::R).is_ok());
    }
}
