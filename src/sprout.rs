//! Attachment-point spawner.
//!
//! [`SproutSpawner`] turns frequency and distribution settings into an
//! ordered list of [`SproutCandidate`]s along a parent branch.  The builder
//! uses the candidates as seeds for child branches; materialization uses them
//! directly as terminal sprouts.
//!
//! # Layout
//! Candidates are grouped into *nodes*: rings of `children_per_node` points
//! sharing one longitudinal position.  Node `i` (1-based) of `n` sits at
//! `i / n`, remapped through the distribution curve, optionally mirrored when
//! distribution starts at the base, then interpolated into the action range.
//! Points outside the mask range are dropped but still count toward the
//! frequency.
//!
//! # Ordering
//! The result is sorted by descending position (tip first).  The merge step
//! of the builder depends on this order.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use bevy::math::{Mat3, Quat, Vec3};

use crate::{
    curve::{AlignmentCurve, lerp},
    random::RandomSource,
    rule::{AlignmentRange, StructureRule},
};

/// Positions within this distance of `1.0` count as the tip boundary.
const TIP_EPSILON: f32 = 0.00001;

/// World "up"; gravity pulls along `-UP`.
pub const AGAINST_GRAVITY: Vec3 = Vec3::Y;

/// Mask predicate shared by spawning and rules.
///
/// Accepts `position` iff `position <= max` and either `position > min` or
/// the mask starts at exactly `0` (so the base itself is included).
pub fn is_sprout_in_range(position: f32, min: f32, max: f32) -> bool {
    if position > max {
        return false;
    }
    position > min || (min == 0.0 && position >= min)
}

/// A candidate attachment point on a parent branch.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SproutCandidate {
    /// Position along the parent, `0` at base, `1` at tip.
    pub position: f32,
    /// Rotation around the parent axis, radians.
    pub roll_angle: f32,
    /// Angle away from the parent's normal toward its axis, radians.
    pub parallel_angle: f32,
    pub gravity_align: f32,
    pub horizontal_align: f32,
    pub flip_align: f32,
    pub flip_direction: [f32; 3],
    pub from_branch_center: bool,
    /// Rule that produced the candidate.
    pub generator_id: u32,
}

impl SproutCandidate {
    /// World direction of a child spawned from this candidate.
    ///
    /// `as_branch` selects the branch convention (the parallel angle tilts
    /// the child from the parent's normal toward the parent's axis); sprouts
    /// tilt in the ring plane instead and honour the flip settings.
    pub fn direction(&self, parent_direction: Vec3, as_branch: bool) -> Vec3 {
        let parent_direction = parent_direction.normalize_or(AGAINST_GRAVITY);
        let local = if as_branch {
            Quat::from_axis_angle(Vec3::NEG_X, self.parallel_angle) * Vec3::Z
        } else {
            Quat::from_axis_angle(Vec3::Z, self.parallel_angle) * Vec3::X
        };
        let local = Quat::from_axis_angle(AGAINST_GRAVITY, self.roll_angle) * local;

        // Parent frame: +Y along the parent, +Z along its normal.
        let normal = parent_direction.any_orthonormal_vector();
        let frame = Mat3::from_cols(parent_direction.cross(normal), parent_direction, normal);
        let mut direction = (Quat::from_mat3(&frame) * local).normalize_or(parent_direction);

        if self.horizontal_align > 0.0 {
            let horizontal = direction - AGAINST_GRAVITY * direction.dot(AGAINST_GRAVITY);
            direction = direction.lerp(horizontal, self.horizontal_align.min(1.0));
        }
        if !as_branch && self.flip_align > 0.0 {
            let flip = Vec3::from_array(self.flip_direction).normalize_or_zero();
            let flipped = direction - flip * direction.dot(flip);
            direction = direction.lerp(flipped, self.flip_align.min(1.0));
        }
        direction.normalize_or(parent_direction)
    }
}

/// Inputs of one [`SproutSpawner::spawn`] call.
#[derive(Clone, Debug)]
pub struct SpawnParams<'a> {
    pub frequency: i32,
    pub children_per_node: usize,
    pub min_twirl: f32,
    pub max_twirl: f32,
    /// Ring rotation offset in half-turns (multiplied by π).
    pub twirl_offset: f32,
    pub spacing_variance: f32,
    pub angle_variance: f32,
    pub distribution_curve: &'a AlignmentCurve,
    pub parallel_align: &'a AlignmentRange,
    pub gravity_align: &'a AlignmentRange,
    pub horizontal_align: &'a AlignmentRange,
    pub flip_align: f32,
    pub flip_direction: [f32; 3],
    pub min_range: f32,
    pub max_range: f32,
    pub min_mask: f32,
    pub max_mask: f32,
    pub from_branch_center: bool,
    pub begin_at_tip: bool,
    pub generator_id: u32,
}

impl<'a> SpawnParams<'a> {
    /// Parameters taken from `rule`, with the per-call values supplied.
    pub fn from_rule(
        rule: &'a StructureRule,
        frequency: i32,
        twirl_offset: f32,
        mask: (f32, f32),
    ) -> Self {
        let (min_range, max_range) = rule.action_range();
        let (flip_align, flip_direction) = rule
            .sprout_shape()
            .map_or((0.0, [1.0, 0.0, 0.0]), |s| (s.flip_align, s.flip_direction));
        Self {
            frequency,
            children_per_node: rule.resolved_children_per_node(),
            min_twirl: rule.min_twirl,
            max_twirl: rule.max_twirl,
            twirl_offset,
            spacing_variance: rule.spacing_variance,
            angle_variance: rule.angle_variance,
            distribution_curve: &rule.distribution_curve,
            parallel_align: &rule.parallel_align,
            gravity_align: &rule.gravity_align,
            horizontal_align: &rule.horizontal_align,
            flip_align,
            flip_direction,
            min_range,
            max_range,
            min_mask: mask.0,
            max_mask: mask.1,
            from_branch_center: rule.from_branch_center,
            begin_at_tip: rule.distribution_origin == crate::rule::DistributionOrigin::FromTip,
            generator_id: rule.id,
        }
    }
}

/// Produces attachment candidates from [`SpawnParams`].
pub struct SproutSpawner<'a> {
    params: SpawnParams<'a>,
}

impl<'a> SproutSpawner<'a> {
    pub fn new(params: SpawnParams<'a>) -> Self {
        Self { params }
    }

    /// Spawn candidates, tip-most first.
    ///
    /// Per node the stream is advanced once for the twirl; per accepted point
    /// once for spacing (skipped for the first point exactly at the tip),
    /// once for angle variance and twice per alignment range.
    pub fn spawn(&self, rng: &mut RandomSource) -> Vec<SproutCandidate> {
        let p = &self.params;
        if p.frequency <= 0 || p.children_per_node == 0 {
            return Vec::new();
        }
        let frequency = p.frequency as usize;
        let per_node = p.children_per_node;

        let intra_node_angle = TAU / per_node as f32;
        let half_twirl_step = intra_node_angle / 2.0;
        let angle_between_nodes = PI / per_node as f32;
        let sprout_nodes = frequency.div_ceil(per_node);
        let position_per_node = 1.0 / sprout_nodes as f32;
        let half_spacing = position_per_node / 2.0;
        let twirl_offset = p.twirl_offset * PI;

        let mut accum_angle = 0.0;
        let mut produced = 0;
        let mut tip_untouched = true;
        let mut sprouts = Vec::new();

        'nodes: for i in 1..=sprout_nodes {
            let mut node_position = p
                .distribution_curve
                .evaluate(i as f32 * position_per_node)
                .clamp(0.0, 1.0);
            if !p.begin_at_tip {
                node_position = 1.0 - node_position;
            }
            let node_position = lerp(p.min_range, p.max_range, node_position);
            let twirl_to_add = PI * rng.range_f32(p.min_twirl, p.max_twirl);

            for j in 0..per_node {
                if is_sprout_in_range(node_position, p.min_mask, p.max_mask) {
                    let position = if tip_untouched && node_position + TIP_EPSILON >= 1.0 {
                        tip_untouched = false;
                        node_position
                    } else {
                        (node_position
                            + rng.range_f32(-half_spacing, half_spacing) * p.spacing_variance)
                            .clamp(0.0, 1.0)
                    };
                    let roll_angle = accum_angle
                        + intra_node_angle * j as f32
                        + twirl_to_add * i as f32
                        + rng.range_f32(-half_twirl_step, half_twirl_step) * p.angle_variance
                        + twirl_offset;
                    let parallel_angle = FRAC_PI_2 * p.parallel_align.sample(position, rng);
                    let gravity_align = p.gravity_align.sample(position, rng);
                    let horizontal_align = p.horizontal_align.sample(position, rng);
                    sprouts.push(SproutCandidate {
                        position,
                        roll_angle,
                        parallel_angle,
                        gravity_align,
                        horizontal_align,
                        flip_align: p.flip_align,
                        flip_direction: p.flip_direction,
                        from_branch_center: p.from_branch_center,
                        generator_id: p.generator_id,
                    });
                }
                produced += 1;
                if produced >= frequency {
                    break 'nodes;
                }
            }
            accum_angle += angle_between_nodes;
        }

        sprouts.sort_by(|a, b| b.position.total_cmp(&a.position));
        sprouts
    }
}

// --- tests ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Distribution, DistributionOrigin};

    fn rule_with(frequency: i32) -> StructureRule {
        StructureRule {
            min_frequency: frequency,
            max_frequency: frequency,
            random_twirl_offset: false,
            ..StructureRule::branch(1)
        }
    }

    fn spawn(rule: &StructureRule, frequency: i32, seed: u64) -> Vec<SproutCandidate> {
        let params = SpawnParams::from_rule(rule, frequency, 0.0, rule.mask_range(None));
        SproutSpawner::new(params).spawn(&mut RandomSource::new(seed))
    }

    #[test]
    fn three_alternative_from_tip() {
        let rule = rule_with(3);
        let sprouts = spawn(&rule, 3, 1);
        let positions: Vec<f32> = sprouts.iter().map(|s| s.position).collect();
        assert_eq!(positions.len(), 3);
        for (got, want) in positions.iter().zip([1.0, 2.0 / 3.0, 1.0 / 3.0]) {
            assert!((got - want).abs() < 1e-5, "{positions:?}");
        }
    }

    #[test]
    fn zero_frequency_is_empty() {
        let rule = rule_with(0);
        assert!(spawn(&rule, 0, 1).is_empty());
        assert!(spawn(&rule, -2, 1).is_empty());
    }

    #[test]
    fn output_is_descending() {
        let rule = StructureRule {
            spacing_variance: 1.0,
            distribution: Distribution::Whorled,
            children_per_node: 3,
            ..rule_with(11)
        };
        for seed in 0..16 {
            let sprouts = spawn(&rule, 11, seed);
            assert!(
                sprouts.windows(2).all(|w| w[0].position >= w[1].position),
                "seed {seed}: not descending"
            );
        }
    }

    #[test]
    fn mask_drops_but_counts() {
        let rule = StructureRule {
            action_range_enabled: true,
            min_mask_range: 0.0,
            max_mask_range: 0.5,
            ..rule_with(4)
        };
        // Nodes at 0.25, 0.5, 0.75, 1.0: only the lower two survive.
        let sprouts = spawn(&rule, 4, 3);
        assert_eq!(sprouts.len(), 2);
        assert!(sprouts.iter().all(|s| s.position <= 0.5));
    }

    #[test]
    fn accepted_never_exceeds_frequency() {
        let rule = StructureRule {
            distribution: Distribution::Whorled,
            children_per_node: 4,
            ..rule_with(7)
        };
        for frequency in 0..12 {
            let sprouts = spawn(&rule, frequency, 9);
            assert_eq!(sprouts.len(), frequency.max(0) as usize);
        }
    }

    #[test]
    fn mask_predicate() {
        assert!(is_sprout_in_range(0.0, 0.0, 1.0));
        assert!(is_sprout_in_range(1.0, 0.0, 1.0));
        assert!(is_sprout_in_range(0.5, 0.0, 1.0));
        assert!(!is_sprout_in_range(0.2, 0.2, 1.0));
        assert!(is_sprout_in_range(0.21, 0.2, 1.0));
        assert!(!is_sprout_in_range(0.8, 0.0, 0.7));
        assert!(is_sprout_in_range(0.7, 0.0, 0.7));
    }

    #[test]
    fn from_base_mirrors_and_range_remaps() {
        let rule = StructureRule {
            distribution_origin: DistributionOrigin::FromBase,
            action_range_enabled: true,
            min_range: 0.5,
            max_range: 1.0,
            ..rule_with(2)
        };
        // Raw 0.5, 1.0 -> mirrored 0.5, 0.0 -> remapped 0.75, 0.5.
        let sprouts = spawn(&rule, 2, 4);
        assert!((sprouts[0].position - 0.75).abs() < 1e-5);
        assert!((sprouts[1].position - 0.5).abs() < 1e-5);
    }

    #[test]
    fn opposite_pairs_are_half_turn_apart() {
        let rule = StructureRule {
            distribution: Distribution::Opposite,
            ..rule_with(2)
        };
        let sprouts = spawn(&rule, 2, 5);
        assert_eq!(sprouts.len(), 2);
        let delta = (sprouts[0].roll_angle - sprouts[1].roll_angle).abs();
        assert!((delta - PI).abs() < 1e-5, "delta = {delta}");
    }

    #[test]
    fn parallel_angle_scaled_to_radians() {
        let rule = StructureRule {
            parallel_align: AlignmentRange::fixed(1.0, 1.0),
            gravity_align: AlignmentRange::fixed(0.25, 0.75),
            ..rule_with(1)
        };
        let sprouts = spawn(&rule, 1, 6);
        assert!((sprouts[0].parallel_angle - FRAC_PI_2).abs() < 1e-6);
        // Position 1.0 blends fully to the top value.
        assert!((sprouts[0].gravity_align - 0.75).abs() < 1e-6);
    }

    #[test]
    fn fully_parallel_branch_follows_parent() {
        let candidate = SproutCandidate {
            position: 0.5,
            roll_angle: 1.3,
            parallel_angle: FRAC_PI_2,
            gravity_align: 0.0,
            horizontal_align: 0.0,
            flip_align: 0.0,
            flip_direction: [1.0, 0.0, 0.0],
            from_branch_center: false,
            generator_id: 1,
        };
        let parent = Vec3::new(0.3, 0.9, 0.1).normalize();
        let direction = candidate.direction(parent, true);
        assert!(direction.abs_diff_eq(parent, 1e-4), "{direction:?}");
    }

    #[test]
    fn horizontal_align_flattens() {
        let candidate = SproutCandidate {
            position: 0.5,
            roll_angle: 0.4,
            parallel_angle: 0.3,
            gravity_align: 0.0,
            horizontal_align: 1.0,
            flip_align: 0.0,
            flip_direction: [1.0, 0.0, 0.0],
            from_branch_center: false,
            generator_id: 1,
        };
        let direction = candidate.direction(AGAINST_GRAVITY, true);
        assert!(direction.y.abs() < 1e-4, "{direction:?}");
        assert!((direction.length() - 1.0).abs() < 1e-4);
    }
}
