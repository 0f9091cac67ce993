//! Fresh symbol allocation.
//!
//! Rewrites that introduce new columns (the outputs of a partial aggregate,
//! for instance) draw names from a [`SymbolAllocator`]. Names are unique for
//! the allocator's lifetime; the hint only makes them readable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::plan::LogicalPlan;

#[derive(Debug, Default)]
pub struct SymbolAllocator {
    used: Mutex<HashSet<String>>,
    counter: AtomicU64,
}

impl SymbolAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator that will not hand out any symbol already present in `plan`.
    pub fn from_plan(plan: &LogicalPlan) -> Self {
        let alloc = Self::new();
        for symbol in plan.symbols() {
            alloc.reserve(&symbol);
        }
        alloc
    }

    /// Mark `symbol` as taken.
    pub fn reserve(&self, symbol: &str) {
        self.lock().insert(symbol.to_string());
    }

    /// Return `hint` if it is still free, otherwise `hint_N` for the next free N.
    pub fn new_symbol(&self, hint: &str) -> String {
        let mut used = self.lock();
        if used.insert(hint.to_string()) {
            return hint.to_string();
        }
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            let candidate = format!("{}_{}", hint, n);
            if used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.used.lock().unwrap_or_else(|e| e.into_inner())
    }
}
