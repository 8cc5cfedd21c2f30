//! Generated structure: the output of a build pass.
//!
//! A [`StructureForest`] holds root-level [`Structure`]s.  Each structure is
//! one branch occurrence with a stable id, the rule that produced it, and a
//! [`Branch`] payload; below it hang child structures and
//! [`TerminalStructure`]s (sprout occurrences, resolved into [`Sprout`]s at
//! materialization).
//!
//! Parent links are ids rather than back-references; [`StructureForest`]
//! offers lookups that walk the hierarchy when a parent is needed.

use bevy::math::Vec3;

use crate::{error::StructureError, random::RandomState, sprout::SproutCandidate};

/// Geometric payload of a branch occurrence.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Branch {
    /// Same as the owning structure's id.
    pub id: u32,
    /// Position along the parent branch, `0` at base, `1` at tip.
    pub position: f32,
    pub direction: [f32; 3],
    pub roll_angle: f32,
    pub length: f32,
    pub girth_scale: f32,
    pub is_root: bool,
    pub is_broken: bool,
    /// Break point along this branch when `is_broken`.
    pub break_position: f32,
    /// Origin offset for root occurrences.
    pub position_from_root: [f32; 3],
    pub is_tuned: bool,
    /// Rule that produced the branch.
    pub generator_id: u32,
    /// Child branches; only populated on [`Tree`] output.
    pub branches: Vec<Branch>,
    /// Sprouts; only populated on [`Tree`] output.
    pub sprouts: Vec<Sprout>,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            id: 0,
            position: 0.0,
            direction: Vec3::Y.to_array(),
            roll_angle: 0.0,
            length: 0.0,
            girth_scale: 1.0,
            is_root: false,
            is_broken: false,
            break_position: 1.0,
            position_from_root: [0.0; 3],
            is_tuned: false,
            generator_id: 0,
            branches: Vec::new(),
            sprouts: Vec::new(),
        }
    }
}

impl Branch {
    /// Break point if the branch is broken.
    pub fn break_at(&self) -> Option<f32> {
        self.is_broken.then_some(self.break_position)
    }

    /// Copy of the branch without materialized children.
    pub fn plain_clone(&self) -> Self {
        Self {
            branches: Vec::new(),
            sprouts: Vec::new(),
            ..self.clone()
        }
    }

    /// Total number of branches in this subtree, including itself.
    pub fn count(&self) -> usize {
        1 + self.branches.iter().map(Branch::count).sum::<usize>()
    }

    /// Total number of sprouts in this subtree.
    pub fn sprout_count(&self) -> usize {
        self.sprouts.len() + self.branches.iter().map(Branch::sprout_count).sum::<usize>()
    }
}

/// A materialized terminal attachment.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sprout {
    pub position: f32,
    pub roll_angle: f32,
    pub parallel_angle: f32,
    pub gravity_align: f32,
    pub horizontal_align: f32,
    pub flip_align: f32,
    pub flip_direction: [f32; 3],
    pub from_branch_center: bool,
    pub direction: [f32; 3],
    pub group_id: u32,
    pub generator_id: u32,
}

impl Sprout {
    /// Resolve a spawn candidate against its parent branch.
    pub fn from_candidate(candidate: SproutCandidate, parent_direction: Vec3) -> Self {
        let direction = candidate.direction(parent_direction, false).to_array();
        Self {
            position: candidate.position,
            roll_angle: candidate.roll_angle,
            parallel_angle: candidate.parallel_angle,
            gravity_align: candidate.gravity_align,
            horizontal_align: candidate.horizontal_align,
            flip_align: candidate.flip_align,
            flip_direction: candidate.flip_direction,
            from_branch_center: candidate.from_branch_center,
            direction,
            group_id: 0,
            generator_id: candidate.generator_id,
        }
    }
}

/// A branch occurrence and its generated descendants.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Structure {
    pub id: u32,
    /// Concrete rule (sharing-group member) that produced the structure.
    pub generator_id: u32,
    /// Sharing-group id of the producing rule.
    pub main_generator_id: u32,
    pub parent_structure_id: Option<u32>,
    pub is_shared_generator: bool,
    /// Supplied by the caller and preserved across regeneration.
    pub is_tuned: bool,
    /// Stream position when the structure was placed; restored before
    /// regenerating the children of a tuned structure.
    pub random_state: RandomState,
    pub position_offset: [f32; 3],
    pub branch: Branch,
    pub children: Vec<Structure>,
    pub terminals: Vec<TerminalStructure>,
}

impl Structure {
    /// Pre-order iterator over this structure and its descendants.
    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        PreorderStructureIter { stack: vec![self] }
    }

    /// Number of structures in this subtree, including itself.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Structure::count).sum::<usize>()
    }

    fn find_mut(&mut self, id: u32) -> Option<&mut Structure> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    fn set_tuned(&mut self, tuned: bool) {
        self.is_tuned = tuned;
        self.branch.is_tuned = tuned;
    }

    fn unlock_recursive(&mut self) {
        self.set_tuned(false);
        for child in &mut self.children {
            child.unlock_recursive();
        }
    }
}

/// A sprout occurrence; resolved into [`Sprout`]s by materialization.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TerminalStructure {
    pub id: u32,
    pub generator_id: u32,
    pub main_generator_id: u32,
    pub parent_structure_id: Option<u32>,
    pub is_shared_generator: bool,
    pub is_tuned: bool,
    pub random_state: RandomState,
}

struct PreorderStructureIter<'a> {
    stack: Vec<&'a Structure>,
}

impl<'a> Iterator for PreorderStructureIter<'a> {
    type Item = &'a Structure;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// Root-level structures of one build pass.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StructureForest {
    pub roots: Vec<Structure>,
}

impl StructureForest {
    pub fn new(roots: Vec<Structure>) -> Self {
        Self { roots }
    }

    /// Pre-order iterator over every structure.
    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        self.roots.iter().flat_map(Structure::iter)
    }

    /// Number of branch structures.
    pub fn count(&self) -> usize {
        self.roots.iter().map(Structure::count).sum()
    }

    /// Number of terminal structures.
    pub fn terminal_count(&self) -> usize {
        self.iter().map(|s| s.terminals.len()).sum()
    }

    pub fn find(&self, id: u32) -> Option<&Structure> {
        self.iter().find(|s| s.id == id)
    }

    pub fn find_mut(&mut self, id: u32) -> Option<&mut Structure> {
        self.roots.iter_mut().find_map(|r| r.find_mut(id))
    }

    pub fn parent_of(&self, id: u32) -> Option<&Structure> {
        let parent_id = self.find(id)?.parent_structure_id?;
        self.find(parent_id)
    }

    /// Highest id used by any branch or terminal structure.
    pub fn max_id(&self) -> u32 {
        self.iter()
            .flat_map(|s| std::iter::once(s.id).chain(s.terminals.iter().map(|t| t.id)))
            .max()
            .unwrap_or(0)
    }

    /// Ids of every tuned structure.
    pub fn tuned_ids(&self) -> Vec<u32> {
        self.iter().filter(|s| s.is_tuned).map(|s| s.id).collect()
    }

    /// Mark the structure `id` and all of its ancestors as tuned.
    ///
    /// Tuned structures survive regeneration with their ids and payloads.
    pub fn commit(&mut self, id: u32) -> Result<(), StructureError> {
        if self.find(id).is_none() {
            return Err(StructureError::UnknownStructure { id });
        }
        let mut next = Some(id);
        while let Some(current) = next {
            let Some(node) = self.find_mut(current) else {
                break;
            };
            node.set_tuned(true);
            next = node.parent_structure_id;
        }
        Ok(())
    }

    /// Clear the tuned flag on the structure `id` and its whole subtree.
    pub fn unlock(&mut self, id: u32) -> Result<(), StructureError> {
        let node = self
            .find_mut(id)
            .ok_or(StructureError::UnknownStructure { id })?;
        node.unlock_recursive();
        Ok(())
    }
}

/// Materialized branch hierarchy handed to mesh construction.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    pub branches: Vec<Branch>,
}

impl Tree {
    /// Number of branches in the whole tree.
    pub fn branch_count(&self) -> usize {
        self.branches.iter().map(Branch::count).sum()
    }

    /// Number of sprouts in the whole tree.
    pub fn sprout_count(&self) -> usize {
        self.branches.iter().map(Branch::sprout_count).sum()
    }
}

// --- tests ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, parent: Option<u32>, children: Vec<Structure>) -> Structure {
        Structure {
            id,
            generator_id: 1,
            main_generator_id: 1,
            parent_structure_id: parent,
            is_shared_generator: false,
            is_tuned: false,
            random_state: RandomState::default(),
            position_offset: [0.0; 3],
            branch: Branch {
                id,
                ..Branch::default()
            },
            children,
            terminals: Vec::new(),
        }
    }

    fn sample_forest() -> StructureForest {
        StructureForest::new(vec![node(
            1,
            None,
            vec![
                node(2, Some(1), vec![node(4, Some(2), Vec::new())]),
                node(3, Some(1), Vec::new()),
            ],
        )])
    }

    #[test]
    fn preorder_and_lookup() {
        let forest = sample_forest();
        let ids: Vec<u32> = forest.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);
        assert_eq!(forest.count(), 4);
        assert_eq!(forest.max_id(), 4);
        assert_eq!(forest.parent_of(4).map(|s| s.id), Some(2));
        assert!(forest.parent_of(1).is_none());
    }

    #[test]
    fn commit_tunes_ancestors_only() {
        let mut forest = sample_forest();
        assert!(forest.commit(4).is_ok());
        let mut tuned = forest.tuned_ids();
        tuned.sort_unstable();
        assert_eq!(tuned, vec![1, 2, 4]);
        assert!(forest.find(4).is_some_and(|s| s.branch.is_tuned));
        assert!(matches!(
            forest.commit(99),
            Err(StructureError::UnknownStructure { id: 99 })
        ));
    }

    #[test]
    fn unlock_clears_subtree() {
        let mut forest = sample_forest();
        forest.commit(4).unwrap();
        forest.commit(3).unwrap();
        forest.unlock(2).unwrap();
        let mut tuned = forest.tuned_ids();
        tuned.sort_unstable();
        assert_eq!(tuned, vec![1, 3]);
        assert!(forest.unlock(42).is_err());
    }

    #[test]
    fn plain_clone_drops_children() {
        let branch = Branch {
            branches: vec![Branch::default()],
            length: 3.0,
            ..Branch::default()
        };
        let plain = branch.plain_clone();
        assert!(plain.branches.is_empty());
        assert_eq!(plain.length, 3.0);
        assert_eq!(branch.count(), 2);
    }
}
