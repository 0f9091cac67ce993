//! Plan node identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::plan::LogicalPlan;

/// Identifier of a plan node, unique within one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanNodeId(u32);

impl PlanNodeId {
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out fresh node ids for nodes created by rewrites.
#[derive(Debug)]
pub struct PlanNodeIdAllocator {
    next: AtomicU32,
}

impl PlanNodeIdAllocator {
    pub fn new(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// An allocator whose ids never collide with ids already in `plan`.
    pub fn starting_after(plan: &LogicalPlan) -> Self {
        Self::new(plan.max_id().get().saturating_add(1))
    }

    pub fn next_id(&self) -> PlanNodeId {
        PlanNodeId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
