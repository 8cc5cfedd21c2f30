//! Origins for root-level occurrences.
//!
//! Only structures produced by the root rule consult a [`PositionSource`].
//! With explicit positions configured, each root occurrence picks one at
//! random; otherwise it is scattered inside a disk whose radius comes from
//! the root rule.

use std::f32::consts::TAU;

use bevy::math::Vec3;

use crate::random::RandomSource;

/// A configured origin for root occurrences.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RootPosition {
    pub offset: [f32; 3],
    /// Replaces the default against-gravity direction when set.
    pub direction: Option<[f32; 3]>,
    pub enabled: bool,
}

impl RootPosition {
    pub fn new(offset: [f32; 3]) -> Self {
        Self {
            offset,
            direction: None,
            enabled: true,
        }
    }

    pub fn with_direction(mut self, direction: [f32; 3]) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// Where a root occurrence was placed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RootPlacement {
    /// Offset from the structure origin, already divided by the global scale.
    pub offset: Vec3,
    pub direction: Option<Vec3>,
}

/// Ordered list of root origins.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PositionSource {
    pub positions: Vec<RootPosition>,
}

impl PositionSource {
    pub fn new(positions: Vec<RootPosition>) -> Self {
        Self { positions }
    }

    fn enabled(&self) -> impl Iterator<Item = &RootPosition> {
        self.positions.iter().filter(|p| p.enabled)
    }

    /// Number of enabled origins.
    pub fn available_root_positions(&self) -> usize {
        self.enabled().count()
    }

    /// The origin when exactly one is enabled.
    pub fn unique_root_position(&self) -> Option<Vec3> {
        let mut enabled = self.enabled();
        match (enabled.next(), enabled.next()) {
            (Some(only), None) => Some(Vec3::from_array(only.offset)),
            _ => None,
        }
    }

    /// Place one root occurrence.
    ///
    /// `radius` is the scatter disk used when no origin is enabled.
    pub fn place(&self, radius: f32, global_scale: f32, rng: &mut RandomSource) -> RootPlacement {
        let scale = if global_scale.abs() > f32::EPSILON {
            global_scale
        } else {
            1.0
        };
        let enabled: Vec<&RootPosition> = self.enabled().collect();
        if enabled.is_empty() {
            return RootPlacement {
                offset: random_in_disk(radius, rng) / scale,
                direction: None,
            };
        }
        let chosen = enabled[rng.index(enabled.len())];
        RootPlacement {
            offset: Vec3::from_array(chosen.offset) / scale,
            direction: chosen
                .direction
                .map(|d| Vec3::from_array(d).normalize_or(Vec3::Y)),
        }
    }
}

/// Point on the XZ plane inside a disk of `radius`, uniform by area.
///
/// Uses the sum of two uniform draws folded at `1`, which gives the
/// triangular radius density a uniform disk needs.
pub fn random_in_disk(radius: f32, rng: &mut RandomSource) -> Vec3 {
    let theta = TAU * rng.range_f32(0.0, 1.0);
    let u = rng.range_f32(0.0, 1.0) + rng.range_f32(0.0, 1.0);
    let r = if u > 1.0 { 2.0 - u } else { u };
    Vec3::new(radius * r * theta.cos(), 0.0, radius * r * theta.sin())
}

// --- tests ------------------------------------------------------------------
