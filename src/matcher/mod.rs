//! Bilateral matching of two records.
//!
//! A [`MatchClassAd`] is an ordinary record built in the arena that holds
//! the two candidates side by side:
//!
//! ```text
//! [ symmetricMatch = leftMatchesRight && rightMatchesLeft;
//!   leftMatchesRight = adcr.ad.requirements;
//!   rightMatchesLeft = adcl.ad.requirements;
//!   leftRankValue = adcl.ad.rank;
//!   rightRankValue = adcr.ad.rank;
//!   adcl = [ other = .adcr.ad; my = ad; target = other; ad = <left> ];
//!   adcr = [ other = .adcl.ad; my = ad; target = other; ad = <right> ] ]
//! ```
//!
//! Each ad is bound inside its own `adcl`/`adcr` wrapper, so when its
//! expressions mention `other` (or `target`) the lookup walks out of the ad
//! and finds the wrapper's binding to the opposite ad.

use tracing::debug;

use crate::ast::{Arena, ExprId, OpKind};
use crate::errors::ClassAdResult;

const LEFT: &str = "adcl";
const RIGHT: &str = "adcr";

/// Match context for a left and a right record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchClassAd {
    ad: ExprId,
    left: ExprId,
    right: ExprId,
}

/// `first.second.third...`
fn path(arena: &mut Arena, absolute: bool, names: &[&str]) -> ExprId {
    let mut expr = if absolute {
        arena.absolute_attr(names[0])
    } else {
        arena.attr(names[0])
    };
    for name in &names[1..] {
        expr = arena.select(expr, *name);
    }
    expr
}

/// `[ other = .<opposite>.ad; my = ad; target = other ]`
fn wrapper(arena: &mut Arena, opposite: &str) -> ClassAdResult<ExprId> {
    let wrapper = arena.classad();
    let other = path(arena, true, &[opposite, "ad"]);
    arena.insert(wrapper, "other", other)?;
    let my = arena.attr("ad");
    arena.insert(wrapper, "my", my)?;
    let target = arena.attr("other");
    arena.insert(wrapper, "target", target)?;
    Ok(wrapper)
}

impl MatchClassAd {
    /// Build the context, taking ownership of whichever ads are given.
    /// The ads must be detached.
    pub fn new(arena: &mut Arena, left: Option<ExprId>, right: Option<ExprId>) -> ClassAdResult<Self> {
        let ad = arena.classad();

        let l = arena.attr("leftMatchesRight");
        let r = arena.attr("rightMatchesLeft");
        let both = arena.binary(OpKind::And, l, r);
        arena.insert(ad, "symmetricMatch", both)?;

        let bindings = [
            ("leftMatchesRight", [RIGHT, "ad", "requirements"]),
            ("rightMatchesLeft", [LEFT, "ad", "requirements"]),
            ("leftRankValue", [LEFT, "ad", "rank"]),
            ("rightRankValue", [RIGHT, "ad", "rank"]),
        ];
        for (name, names) in bindings {
            let expr = path(arena, false, &names);
            arena.insert(ad, name, expr)?;
        }

        let left_wrapper = wrapper(arena, RIGHT)?;
        let right_wrapper = wrapper(arena, LEFT)?;
        arena.insert(ad, LEFT, left_wrapper)?;
        arena.insert(ad, RIGHT, right_wrapper)?;

        let context = Self {
            ad,
            left: left_wrapper,
            right: right_wrapper,
        };
        if let Some(left) = left {
            context.replace_left_ad(arena, left)?;
        }
        if let Some(right) = right {
            context.replace_right_ad(arena, right)?;
        }
        debug!(context = %ad, "built match context");
        Ok(context)
    }

    /// The context record itself, for evaluating other expressions in it
    pub fn ad(&self) -> ExprId {
        self.ad
    }

    /// Install `left`, returning the ad it replaces
    pub fn replace_left_ad(&self, arena: &mut Arena, left: ExprId) -> ClassAdResult<Option<ExprId>> {
        Self::replace(arena, self.left, left)
    }

    /// Install `right`, returning the ad it replaces
    pub fn replace_right_ad(&self, arena: &mut Arena, right: ExprId) -> ClassAdResult<Option<ExprId>> {
        Self::replace(arena, self.right, right)
    }

    fn replace(arena: &mut Arena, wrapper: ExprId, ad: ExprId) -> ClassAdResult<Option<ExprId>> {
        let previous = arena.remove(wrapper, "ad");
        match arena.insert(wrapper, "ad", ad) {
            Ok(()) => Ok(previous),
            Err(err) => {
                // Put the previous ad back so a failed replacement changes
                // nothing
                if let Some(previous) = previous {
                    arena.insert(wrapper, "ad", previous)?;
                }
                Err(err)
            }
        }
    }

    /// Detach the left ad and hand it back
    pub fn remove_left_ad(&self, arena: &mut Arena) -> Option<ExprId> {
        arena.remove(self.left, "ad")
    }

    /// Detach the right ad and hand it back
    pub fn remove_right_ad(&self, arena: &mut Arena) -> Option<ExprId> {
        arena.remove(self.right, "ad")
    }

    pub fn left_ad(&self, arena: &Arena) -> Option<ExprId> {
        arena.lookup(self.left, "ad")
    }

    pub fn right_ad(&self, arena: &Arena) -> Option<ExprId> {
        arena.lookup(self.right, "ad")
    }

    /// The right ad's requirements hold against the left ad
    pub fn left_matches_right(&self, arena: &Arena) -> bool {
        arena.evaluate_attr_bool(self.ad, "leftMatchesRight") == Some(true)
    }

    /// The left ad's requirements hold against the right ad
    pub fn right_matches_left(&self, arena: &Arena) -> bool {
        arena.evaluate_attr_bool(self.ad, "rightMatchesLeft") == Some(true)
    }

    pub fn symmetric_match(&self, arena: &Arena) -> bool {
        arena.evaluate_attr_bool(self.ad, "symmetricMatch") == Some(true)
    }

    /// The left ad's `rank`, evaluated against the right ad
    pub fn left_rank(&self, arena: &Arena) -> Option<f64> {
        arena.evaluate_attr_number(self.ad, "leftRankValue")
    }

    /// The right ad's `rank`, evaluated against the left ad
    pub fn right_rank(&self, arena: &Arena) -> Option<f64> {
        arena.evaluate_attr_number(self.ad, "rightRankValue")
    }

    /// Detach both ads, free the context and return `(left, right)`
    pub fn release(self, arena: &mut Arena) -> (Option<ExprId>, Option<ExprId>) {
        let left = self.remove_left_ad(arena);
        let right = self.remove_right_ad(arena);
        arena.free(self.ad);
        (left, right)
    }
}
