//! Declarative pattern matching for rules.
//!
//! A rule declares the plan shape it can rewrite; the driver only calls
//! `apply` on nodes that match.
//!
//! - `Pattern::Node { kind, predicate, children }` matches a node of `kind`
//!   whose optional predicate holds and whose children match `children`
//!   (an empty child list does not constrain children).
//! - `Pattern::Any` matches any subtree.
//! - `Pattern::Leaf` matches only nodes without children.

use eagg_core::plan::{LogicalPlan, PlanKind};

pub type NodePredicate = fn(&LogicalPlan) -> bool;

#[derive(Debug, Clone)]
pub enum Pattern {
    Node {
        kind: PlanKind,
        predicate: Option<NodePredicate>,
        children: Vec<Pattern>,
    },
    Any,
    Leaf,
}

impl Pattern {
    fn node(kind: PlanKind, children: Vec<Pattern>) -> Self {
        Pattern::Node {
            kind,
            predicate: None,
            children,
        }
    }

    /// Match an aggregate with one any-child.
    pub fn aggregate() -> Self {
        Self::node(PlanKind::Aggregate, vec![Pattern::Any])
    }

    /// Match a join with two any-children.
    pub fn join() -> Self {
        Self::node(PlanKind::Join, vec![Pattern::Any, Pattern::Any])
    }

    pub fn projection() -> Self {
        Self::node(PlanKind::Projection, vec![Pattern::Any])
    }

    pub fn filter() -> Self {
        Self::node(PlanKind::Filter, vec![Pattern::Any])
    }

    pub fn scan() -> Self {
        Self::node(PlanKind::Scan, vec![])
    }

    /// Restrict the root of this pattern with a predicate.
    pub fn matching(self, predicate: NodePredicate) -> Self {
        match self {
            Pattern::Node { kind, children, .. } => Pattern::Node {
                kind,
                predicate: Some(predicate),
                children,
            },
            other => other,
        }
    }

    /// Replace the child patterns of the root.
    pub fn with_children(self, children: Vec<Pattern>) -> Self {
        match self {
            Pattern::Node {
                kind, predicate, ..
            } => Pattern::Node {
                kind,
                predicate,
                children,
            },
            other => other,
        }
    }
}

/// Check whether `plan` matches `pattern`.
pub fn matches(plan: &LogicalPlan, pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::Leaf => plan.children().is_empty(),
        Pattern::Node {
            kind,
            predicate,
            children,
        } => {
            if plan.kind() != *kind {
                return false;
            }
            if let Some(pred) = predicate {
                if !pred(plan) {
                    return false;
                }
            }
            if children.is_empty() {
                return true;
            }
            let plan_children = plan.children();
            plan_children.len() == children.len()
                && plan_children
                    .iter()
                    .zip(children.iter())
                    .all(|(c, p)| matches(c, p))
        }
    }
}
