//! Which units a paint or erase gesture may touch.
//!
//! Every rule is a named function; [`check`] runs them in order and reports
//! the first one that refuses.

use std::collections::{BTreeSet, HashSet};

use zonemap_shared::UnitId;

use crate::catalog::ChildLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ineligible {
    /// Unit belongs to a locked zone.
    LockedUnit,
    /// Unit is a shattered parent; its area is represented by its children.
    ShatteredParent,
    /// Unit is a child whose parent is not shattered.
    DormantChild,
    /// Unit lies outside the caller's captive set.
    OutsideCaptive,
}

/// Read-only view of the state the rules consult.
pub struct EligibilityContext<'a> {
    pub locked_units: &'a HashSet<UnitId>,
    pub shattered_parents: &'a BTreeSet<UnitId>,
    pub active_children: &'a BTreeSet<UnitId>,
    pub child_layer: Option<&'a ChildLayer>,
    pub captive: Option<&'a HashSet<UnitId>>,
}

pub type Rule = fn(&EligibilityContext<'_>, &str) -> Option<Ineligible>;

pub const RULES: &[(&str, Rule)] = &[
    ("not_shattered_parent", not_shattered_parent),
    ("not_dormant_child", not_dormant_child),
    ("inside_captive", inside_captive),
    ("not_locked", not_locked),
];

pub fn not_locked(ctx: &EligibilityContext<'_>, id: &str) -> Option<Ineligible> {
    ctx.locked_units
        .contains(id)
        .then_some(Ineligible::LockedUnit)
}

pub fn not_shattered_parent(ctx: &EligibilityContext<'_>, id: &str) -> Option<Ineligible> {
    ctx.shattered_parents
        .contains(id)
        .then_some(Ineligible::ShatteredParent)
}

pub fn not_dormant_child(ctx: &EligibilityContext<'_>, id: &str) -> Option<Ineligible> {
    let layer = ctx.child_layer?;
    (layer.is_child(id) && !ctx.active_children.contains(id)).then_some(Ineligible::DormantChild)
}

pub fn inside_captive(ctx: &EligibilityContext<'_>, id: &str) -> Option<Ineligible> {
    let captive = ctx.captive?;
    (!captive.contains(id)).then_some(Ineligible::OutsideCaptive)
}

/// Structural rules only: the unit is part of the active domain, regardless
/// of locks and captive restrictions. Used when replaying history.
pub fn in_active_domain(ctx: &EligibilityContext<'_>, id: &str) -> bool {
    not_shattered_parent(ctx, id).is_none() && not_dormant_child(ctx, id).is_none()
}

pub fn check(ctx: &EligibilityContext<'_>, id: &str) -> Result<(), Ineligible> {
    match RULES.iter().find_map(|(_, rule)| rule(ctx, id)) {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}
