//! `bevy_symbios_structure`: rule-driven branch and sprout structure
//! generation for Bevy.
//!
//! # Architecture
//! A tree of [`StructureRule`]s describes how each level of a branching
//! structure spawns on its parent.  [`StructureBuilder`] applies the rules to
//! a previously generated [`StructureForest`], keeping structures the user
//! tuned and filling the rest with fresh candidates from the
//! [`SproutSpawner`].  [`StructureBuilder::build_tree`] then materializes the
//! forest into a [`Tree`] of nested branches and sprouts for mesh
//! construction.
//!
//! Every stochastic decision draws from one seeded [`RandomSource`] per pass,
//! so a seed plus a rule tree reproduces the same structure.

pub mod async_gen;
pub mod builder;
pub mod config;
pub mod curve;
pub mod error;
pub mod position;
pub mod random;
pub mod rule;
pub mod sprout;
pub mod structure;

pub use builder::{RuleActivity, SharingGroup, StructureBuilder, StructureOutput, build_structure};
pub use config::BuildConfig;
pub use curve::AlignmentCurve;
pub use error::StructureError;
pub use position::{PositionSource, RootPosition};
pub use random::{RandomSource, RandomState};
pub use rule::{RuleKind, StructureRule};
pub use sprout::{SproutCandidate, SproutSpawner};
pub use structure::{Branch, Sprout, Structure, StructureForest, TerminalStructure, Tree};

use bevy::prelude::*;

/// Bevy plugin: registers the async-generation polling system.
pub struct SymbiosStructurePlugin;

impl Plugin for SymbiosStructurePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, async_gen::poll_structure_tasks);
    }
}
