//! Algorithm join and fusion planning
//!
//! A parent can consume a child's result while the child is still
//! animating only if the child produces cells in the order the parent
//! reads them. `alg_join` folds that check up the tree; `plan_side`
//! decides per operand whether the child is fused into the parent's ticks
//! or must finish first.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use serde::{Deserialize, Serialize};

use mmviz_core::{Algorithm, Epilog, FuseMode};
use mmviz_core::algorithm::{Flow, Side};

/// Effective algorithm of a subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Join {
    /// Every animated child feeds its parent in a compatible order
    Composed(Algorithm),
    /// Some parent/child pair disagrees on production order
    Mixed,
}

/// How a parent schedules one operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    /// Leaf, or a child with nothing to animate
    Idle,
    /// Child runs to completion before the parent steps
    Sequential,
    /// Child ticks just before the parent within the same tick
    Fused,
}

/// What the planner needs to know about a child node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSummary {
    pub alg: Algorithm,
    pub epilog: Epilog,
    /// Child or any descendant animates
    pub animated: bool,
    pub join: Join,
}

/// Folds a node's algorithm with its children's joins
pub fn alg_join(alg: Algorithm, children: &[(Side, Option<ChildSummary>)]) -> Join {
    for (side, child) in children {
        let Some(child) = child else { continue };
        if child.join == Join::Mixed {
            return Join::Mixed;
        }
        if child.animated && !edge_composes(alg, *side, child) {
            return Join::Mixed;
        }
    }
    Join::Composed(alg)
}

/// Whether the child's production order matches the parent's reads
fn edge_composes(parent: Algorithm, side: Side, child: &ChildSummary) -> bool {
    if child.alg.is_animated() {
        parent.composes_with(side, child.alg)
    } else {
        // results only at the end of the child's subtree
        parent.consumes(side) == Flow::Whole
    }
}

/// Scheduling for one operand of a parent running `parent`
pub fn plan_side(parent: Algorithm, fuse: FuseMode, side: Side, child: Option<&ChildSummary>) -> Plan {
    let Some(child) = child else { return Plan::Idle };
    if !child.animated {
        return Plan::Idle;
    }
    let sequential = fuse == FuseMode::None
        || child.join == Join::Mixed
        || !edge_composes(parent, side, child)
        || child.alg.produces() == Flow::Whole
        || (fuse == FuseMode::Sync && !child.epilog.is_elementwise());
    if sequential {
        Plan::Sequential
    } else {
        Plan::Fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(alg: Algorithm) -> ChildSummary {
        ChildSummary {
            alg,
            epilog: Epilog::None,
            animated: alg.is_animated(),
            join: Join::Composed(alg),
        }
    }

    #[test]
    fn test_join_detects_mismatched_orders() {
        let rows = child(Algorithm::DotprodRowMajor);
        let cols = child(Algorithm::Mvprod);
        assert_eq!(
            alg_join(Algorithm::Vmprod, &[(Side::Left, Some(rows)), (Side::Right, None)]),
            Join::Composed(Algorithm::Vmprod)
        );
        assert_eq!(alg_join(Algorithm::Vmprod, &[(Side::Left, Some(cols))]), Join::Mixed);

        let static_child = child(Algorithm::None);
        assert_eq!(
            alg_join(Algorithm::Mvprod, &[(Side::Left, Some(static_child))]),
            Join::Composed(Algorithm::Mvprod)
        );

        let mixed = ChildSummary { join: Join::Mixed, ..rows };
        assert_eq!(alg_join(Algorithm::Vmprod, &[(Side::Left, Some(mixed))]), Join::Mixed);
    }

    #[test]
    fn test_plan_follows_fuse_mode() {
        let rows = child(Algorithm::DotprodRowMajor);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Sync, Side::Left, Some(&rows)), Plan::Fused);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Async, Side::Left, Some(&rows)), Plan::Fused);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::None, Side::Left, Some(&rows)), Plan::Sequential);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Sync, Side::Right, Some(&rows)), Plan::Sequential);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Sync, Side::Left, None), Plan::Idle);
    }

    #[test]
    fn test_plan_sequences_whole_producers_and_row_epilogs() {
        let outer = child(Algorithm::Vvprod);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Async, Side::Left, Some(&outer)), Plan::Sequential);

        let softmax = ChildSummary { epilog: Epilog::Softmax, ..child(Algorithm::DotprodRowMajor) };
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Sync, Side::Left, Some(&softmax)), Plan::Sequential);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Async, Side::Left, Some(&softmax)), Plan::Fused);

        let mixed = ChildSummary { join: Join::Mixed, ..child(Algorithm::DotprodRowMajor) };
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::Async, Side::Left, Some(&mixed)), Plan::Sequential);

        let quiet = child(Algorithm::None);
        assert_eq!(plan_side(Algorithm::Vmprod, FuseMode::None, Side::Left, Some(&quiet)), Plan::Idle);
    }
}
