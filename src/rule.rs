//! Declarative generation rules.
//!
//! A [`StructureRule`] describes how many children to spawn on a parent
//! branch, where along it, at which angles, and how long and thick they are.
//! Rules form a tree mirroring the generated hierarchy: the synthetic root
//! rule (id `0`) produces trunks, its children produce first-order branches,
//! and so on down to sprout rules, which produce terminal attachment points.
//!
//! # Sharing groups
//! Sibling rules can share one occurrence slot.  The representative has
//! `sharing_group_id == 0` and a non-zero `sharing_next_id`; every other
//! member carries the representative's id in `sharing_group_id`.  Members are
//! chained through `sharing_next_id` (0 terminates the chain) and compete by
//! `shared_probability`.  The builder resolves the chain into an explicit
//! [`SharingGroup`](crate::builder::SharingGroup) once per pass.

use crate::{
    curve::{AlignmentCurve, lerp},
    random::RandomSource,
};

/// Id reserved for the synthetic root rule.
pub const ROOT_RULE_ID: u32 = 0;

/// Upper bound [`StructureRule::validate`] applies to occurrence counts.
pub const MAX_FREQUENCY: i32 = 1024;

/// How children are grouped into nodes around the parent branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Distribution {
    /// One child per node.
    #[default]
    Alternative,
    /// Two children per node, on opposite sides.
    Opposite,
    /// `children_per_node` children per node.
    Whorled,
}

/// End of the parent branch at which distribution starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DistributionOrigin {
    #[default]
    FromTip,
    FromBase,
}

/// A min/max pair at the parent's base and at its top, blended by a curve
/// evaluated at the child's position.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlignmentRange {
    pub min_at_base: f32,
    pub max_at_base: f32,
    pub min_at_top: f32,
    pub max_at_top: f32,
    pub curve: AlignmentCurve,
}

impl AlignmentRange {
    /// Range without variance: `base` at the parent's base, `top` at its tip.
    pub fn fixed(base: f32, top: f32) -> Self {
        Self {
            min_at_base: base,
            max_at_base: base,
            min_at_top: top,
            max_at_top: top,
            curve: AlignmentCurve::default(),
        }
    }

    /// Draw a base value and a top value, then blend them at `position`.
    ///
    /// Consumes exactly two draws.
    pub fn sample(&self, position: f32, rng: &mut RandomSource) -> f32 {
        let base = rng.range_f32(self.min_at_base, self.max_at_base);
        let top = rng.range_f32(self.min_at_top, self.max_at_top);
        lerp(base, top, self.curve.blend(position))
    }
}

/// Breakage settings for branch rules.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BranchBreak {
    /// Break probability keyed by the branch's position on its parent.
    pub probability: AlignmentCurve,
    /// Lower bound of the break point along the broken branch.
    pub min_break_range: f32,
    /// Upper bound of the break point along the broken branch.
    pub max_break_range: f32,
}

impl Default for BranchBreak {
    fn default() -> Self {
        Self {
            probability: AlignmentCurve::constant(0.0),
            min_break_range: 0.5,
            max_break_range: 1.0,
        }
    }
}

/// Settings only meaningful for rules producing branches.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BranchShape {
    pub min_length_at_base: f32,
    pub max_length_at_base: f32,
    pub min_length_at_top: f32,
    pub max_length_at_top: f32,
    /// Blend from base length to top length along the parent.
    pub length_curve: AlignmentCurve,
    pub min_girth_scale: f32,
    pub max_girth_scale: f32,
    /// Radius of the disk root occurrences are scattered in when no explicit
    /// root positions are configured.  Only read on the root rule.
    pub radius: f32,
    pub branch_break: Option<BranchBreak>,
}

impl Default for BranchShape {
    fn default() -> Self {
        Self {
            min_length_at_base: 4.0,
            max_length_at_base: 4.0,
            min_length_at_top: 4.0,
            max_length_at_top: 4.0,
            length_curve: AlignmentCurve::default(),
            min_girth_scale: 1.0,
            max_girth_scale: 1.0,
            radius: 0.0,
            branch_break: None,
        }
    }
}

impl BranchShape {
    /// Length of a branch spawned at `position` on its parent.
    ///
    /// Root-rule branches ignore the top range and draw from the base range.
    pub fn length_at(&self, position: f32, is_root_rule: bool, rng: &mut RandomSource) -> f32 {
        if is_root_rule {
            return rng.range_f32(self.min_length_at_base, self.max_length_at_base);
        }
        let base = rng.range_f32(self.min_length_at_base, self.max_length_at_base);
        let top = rng.range_f32(self.min_length_at_top, self.max_length_at_top);
        lerp(base, top, self.length_curve.blend(position))
    }
}

/// Settings only meaningful for rules producing terminal sprouts.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SproutShape {
    /// Group assigned to every sprout of this rule; `0` keeps the sprout's own.
    pub sprout_group_id: u32,
    /// Blend `[0, 1]` toward `flip_direction`.
    pub flip_align: f32,
    pub flip_direction: [f32; 3],
}

impl Default for SproutShape {
    fn default() -> Self {
        Self {
            sprout_group_id: 0,
            flip_align: 0.0,
            flip_direction: [1.0, 0.0, 0.0],
        }
    }
}

/// What a rule produces.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RuleKind {
    Branch(BranchShape),
    Sprout(SproutShape),
}

/// A node of the rule tree.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StructureRule {
    pub id: u32,
    pub parent_id: u32,
    pub sharing_group_id: u32,
    pub sharing_next_id: u32,
    /// Share of the group's occurrence slot, used when picking a member.
    pub shared_probability: f32,
    pub enabled: bool,
    /// Occurrences are independent origins rather than attached children.
    pub is_root: bool,
    /// Locked rules keep their previously generated structures.
    pub is_locked: bool,
    pub kind: RuleKind,
    /// Chance this rule fires at all for a given parent.
    pub probability: f32,
    pub min_frequency: i32,
    pub max_frequency: i32,
    /// Ring size for [`Distribution::Whorled`].
    pub children_per_node: i32,
    pub distribution: Distribution,
    pub distribution_origin: DistributionOrigin,
    pub spacing_variance: f32,
    pub angle_variance: f32,
    /// Remaps node positions along the parent.
    pub distribution_curve: AlignmentCurve,
    pub min_twirl: f32,
    pub max_twirl: f32,
    /// Draw the twirl offset from `[-1, 1]` instead of using `twirl_offset`.
    pub random_twirl_offset: bool,
    pub twirl_offset: f32,
    pub parallel_align: AlignmentRange,
    pub gravity_align: AlignmentRange,
    pub horizontal_align: AlignmentRange,
    /// Sprouts attach at the branch axis instead of its surface.
    pub from_branch_center: bool,
    /// Enables `min_range..max_range` and the mask range.
    pub action_range_enabled: bool,
    pub min_range: f32,
    pub max_range: f32,
    pub min_mask_range: f32,
    pub max_mask_range: f32,
    pub children: Vec<StructureRule>,
}

impl Default for StructureRule {
    fn default() -> Self {
        Self {
            id: ROOT_RULE_ID,
            parent_id: 0,
            sharing_group_id: 0,
            sharing_next_id: 0,
            shared_probability: 0.5,
            enabled: true,
            is_root: false,
            is_locked: false,
            kind: RuleKind::Branch(BranchShape::default()),
            probability: 1.0,
            min_frequency: 1,
            max_frequency: 1,
            children_per_node: 1,
            distribution: Distribution::Alternative,
            distribution_origin: DistributionOrigin::FromTip,
            spacing_variance: 0.0,
            angle_variance: 0.0,
            distribution_curve: AlignmentCurve::default(),
            min_twirl: 0.0,
            max_twirl: 0.0,
            random_twirl_offset: true,
            twirl_offset: 0.0,
            parallel_align: AlignmentRange::fixed(0.3, 0.7),
            gravity_align: AlignmentRange::fixed(0.4, 0.4),
            horizontal_align: AlignmentRange::fixed(0.4, 0.4),
            from_branch_center: false,
            action_range_enabled: false,
            min_range: 0.0,
            max_range: 1.0,
            min_mask_range: 0.0,
            max_mask_range: 1.0,
            children: Vec::new(),
        }
    }
}

impl StructureRule {
    /// The synthetic root rule producing a single trunk.
    pub fn root() -> Self {
        Self {
            is_root: true,
            ..Self::default()
        }
    }

    /// A branch rule with default shape.
    pub fn branch(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// A sprout rule with default shape.
    pub fn sprout(id: u32) -> Self {
        Self {
            id,
            kind: RuleKind::Sprout(SproutShape::default()),
            ..Self::default()
        }
    }

    /// Append `child`, fixing up its `parent_id`.
    pub fn with_child(mut self, mut child: StructureRule) -> Self {
        child.parent_id = self.id;
        self.children.push(child);
        self
    }

    pub fn is_sprout(&self) -> bool {
        matches!(self.kind, RuleKind::Sprout(_))
    }

    pub fn branch_shape(&self) -> Option<&BranchShape> {
        match &self.kind {
            RuleKind::Branch(shape) => Some(shape),
            RuleKind::Sprout(_) => None,
        }
    }

    pub fn sprout_shape(&self) -> Option<&SproutShape> {
        match &self.kind {
            RuleKind::Sprout(shape) => Some(shape),
            RuleKind::Branch(_) => None,
        }
    }

    /// True if the rule takes part in a sharing group.
    pub fn is_shared(&self) -> bool {
        self.sharing_group_id != 0 || self.sharing_next_id != 0
    }

    /// True if the rule is a sharing-group member other than the representative.
    pub fn is_shared_not_main(&self) -> bool {
        self.sharing_group_id != 0
    }

    /// Representative id if shared, `0` otherwise.
    pub fn shared_group_or_main_id(&self) -> u32 {
        if self.sharing_group_id != 0 {
            self.sharing_group_id
        } else if self.sharing_next_id != 0 {
            self.id
        } else {
            0
        }
    }

    /// Id identifying the rule's whole sharing group (its own id if unshared).
    pub fn main_id(&self) -> u32 {
        if self.sharing_group_id != 0 {
            self.sharing_group_id
        } else {
            self.id
        }
    }

    /// Children per node implied by the distribution mode.
    pub fn resolved_children_per_node(&self) -> usize {
        match self.distribution {
            Distribution::Alternative => 1,
            Distribution::Opposite => 2,
            Distribution::Whorled if self.children_per_node <= 0 => 2,
            Distribution::Whorled => self.children_per_node as usize,
        }
    }

    /// Generation range, `[0, 1]` unless the action range is enabled.
    pub fn action_range(&self) -> (f32, f32) {
        if self.action_range_enabled {
            (self.min_range, self.max_range)
        } else {
            (0.0, 1.0)
        }
    }

    /// Mask range for children of a parent broken at `break_position`.
    ///
    /// A break caps the upper bound at the break point and pulls the lower
    /// bound down with it if needed.
    pub fn mask_range(&self, break_position: Option<f32>) -> (f32, f32) {
        let (mut min, mut max) = if self.action_range_enabled {
            (self.min_mask_range, self.max_mask_range)
        } else {
            (0.0, 1.0)
        };
        if let Some(at) = break_position {
            max = max.min(at);
            if min > max {
                min = max;
            }
        }
        (min, max)
    }

    /// Clamp every numeric field into its legal range.
    pub fn validate(&mut self) {
        self.min_frequency = self.min_frequency.clamp(0, MAX_FREQUENCY);
        self.max_frequency = self.max_frequency.clamp(self.min_frequency, MAX_FREQUENCY);
        (self.min_range, self.max_range) = unit_range(self.min_range, self.max_range);
        (self.min_mask_range, self.max_mask_range) =
            unit_range(self.min_mask_range, self.max_mask_range);
        self.probability = self.probability.clamp(0.0, 1.0);
        self.shared_probability = self.shared_probability.clamp(0.0, 1.0);
        self.spacing_variance = self.spacing_variance.clamp(0.0, 1.0);
        self.angle_variance = self.angle_variance.clamp(0.0, 1.0);
        match &mut self.kind {
            RuleKind::Branch(shape) => {
                if shape.max_girth_scale < shape.min_girth_scale {
                    shape.max_girth_scale = shape.min_girth_scale;
                }
                if let Some(brk) = shape.branch_break.as_mut() {
                    (brk.min_break_range, brk.max_break_range) =
                        unit_range(brk.min_break_range, brk.max_break_range);
                }
            }
            RuleKind::Sprout(shape) => {
                shape.flip_align = shape.flip_align.clamp(0.0, 1.0);
            }
        }
    }

    /// [`validate`](Self::validate) this rule and every descendant.
    ///
    /// Sprout rules cannot have children; any found are dropped.
    pub fn validate_tree(&mut self) {
        self.validate();
        if self.is_sprout() && !self.children.is_empty() {
            bevy::log::warn!(
                "sprout rule {} had {} child rules; dropping them",
                self.id,
                self.children.len()
            );
            self.children.clear();
        }
        for child in &mut self.children {
            child.validate_tree();
        }
    }

    /// First child rule producing branches.
    pub fn first_branch_child(&self) -> Option<&StructureRule> {
        self.children.iter().find(|c| !c.is_sprout())
    }

    /// The `index`-th child rule producing sprouts.
    pub fn sprout_child(&self, index: usize) -> Option<&StructureRule> {
        self.children.iter().filter(|c| c.is_sprout()).nth(index)
    }

    /// Depth-first search for the rule with `id`.
    pub fn find(&self, id: u32) -> Option<&StructureRule> {
        self.iter().find(|r| r.id == id)
    }

    /// Pre-order iterator over this rule and all descendants.
    pub fn iter(&self) -> impl Iterator<Item = &StructureRule> {
        PreorderRuleIter { stack: vec![self] }
    }
}

struct PreorderRuleIter<'a> {
    stack: Vec<&'a StructureRule>,
}

impl<'a> Iterator for PreorderRuleIter<'a> {
    type Item = &'a StructureRule;

    fn next(&mut self) -> Option<Self::Item> {
        let rule = self.stack.pop()?;
        for child in rule.children.iter().rev() {
            self.stack.push(child);
        }
        Some(rule)
    }
}

/// `(min, max)` with `0 <= min <= max <= 1`; NaN bounds collapse to 0.
fn unit_range(min: f32, max: f32) -> (f32, f32) {
    let min = min.max(0.0).min(1.0);
    (min, max.min(1.0).max(min))
}

// --- tests ------------------------------------------------------------------
