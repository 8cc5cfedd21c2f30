//! Structure build engine.
//!
//! [`StructureBuilder`] applies a rule tree to a previously generated
//! [`StructureForest`] and produces a new one.  Structures the caller marked
//! as tuned keep their ids and payloads; fresh candidates from the rule tree
//! fill the remaining slots around them.  [`StructureBuilder::build_tree`]
//! then turns the forest into a [`Tree`] with nested branches and sprouts.
//!
//! One builder owns one [`RandomSource`]; passes over the same seed, rule
//! tree and tuned set produce identical output.
//!
//! # Usage
//! ```rust,ignore
//! let rules = StructureRule::root().with_child(StructureRule::branch(1));
//! let output = build_structure(&rules, StructureForest::default(),
//!     &PositionSource::default(), BuildConfig::with_seed(7))?;
//! println!("{} branches", output.tree.branch_count());
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use bevy::{
    log::{debug, warn},
    math::Vec3,
};

use crate::{
    config::BuildConfig,
    error::StructureError,
    position::PositionSource,
    random::{RandomSource, RandomState},
    rule::{BranchShape, ROOT_RULE_ID, StructureRule},
    sprout::{AGAINST_GRAVITY, SpawnParams, SproutCandidate, SproutSpawner},
    structure::{Branch, Sprout, Structure, StructureForest, TerminalStructure, Tree},
};

/// Whether a rule was reached during the last pass and whether it fired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleActivity {
    pub visited: bool,
    pub visited_and_active: bool,
}

/// A resolved sharing ring: the representative first, then every member in
/// chain order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharingGroup {
    pub main_id: u32,
    pub members: Vec<u32>,
}

impl SharingGroup {
    /// Follow `sharing_next_id` links from `main`.
    ///
    /// Walks at most `max_hops` links and stops at missing or repeated ids,
    /// logging a warning either way.
    pub fn resolve(
        main: &StructureRule,
        rules: &HashMap<u32, &StructureRule>,
        max_hops: usize,
    ) -> Self {
        let mut members = vec![main.id];
        let mut current = main;
        let mut hops = 0;
        while current.sharing_next_id != 0 {
            if hops >= max_hops {
                warn!(
                    "sharing group {}: stopped after {max_hops} links, probable endless loop",
                    main.id
                );
                break;
            }
            let next_id = current.sharing_next_id;
            let Some(next) = rules.get(&next_id).copied() else {
                warn!(
                    "sharing group {}: rule {} links to missing rule {next_id}",
                    main.id, current.id
                );
                break;
            };
            if members.contains(&next.id) {
                warn!(
                    "sharing group {}: rule {} links back to rule {next_id}",
                    main.id, current.id
                );
                break;
            }
            members.push(next.id);
            current = next;
            hops += 1;
        }
        Self {
            main_id: main.id,
            members,
        }
    }

    /// Member whose cumulative `shared_probability` first reaches `draw`.
    ///
    /// Falls back to the last member when the shares never reach it.
    pub fn select(&self, draw: f32, rules: &HashMap<u32, &StructureRule>) -> u32 {
        let mut cumulative = 0.0;
        for &id in &self.members {
            cumulative += rules.get(&id).map_or(0.0, |r| r.shared_probability);
            if draw <= cumulative {
                return id;
            }
        }
        warn!(
            "sharing group {}: shares sum to {cumulative}, below draw {draw}",
            self.main_id
        );
        self.members.last().copied().unwrap_or(self.main_id)
    }
}

/// Everything one build pass produces.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StructureOutput {
    pub forest: StructureForest,
    pub tree: Tree,
    pub activity: BTreeMap<u32, RuleActivity>,
}

/// Parent data the recursion needs after the parent's children are taken.
struct ParentView {
    id: u32,
    is_tuned: bool,
    random_state: RandomState,
    break_at: Option<f32>,
    direction: Vec3,
}

impl ParentView {
    fn of(structure: &Structure) -> Self {
        Self {
            id: structure.id,
            is_tuned: structure.is_tuned,
            random_state: structure.random_state.clone(),
            break_at: structure.branch.break_at(),
            direction: Vec3::from_array(structure.branch.direction),
        }
    }
}

/// Per-pass state: rule index, sharing groups, id counter, activity report
/// and the random stream.
pub struct StructureBuilder<'a> {
    root: &'a StructureRule,
    rules: HashMap<u32, &'a StructureRule>,
    groups: HashMap<u32, SharingGroup>,
    positions: &'a PositionSource,
    config: BuildConfig,
    rng: RandomSource,
    last_id: u32,
    reserved: HashSet<u32>,
    activity: BTreeMap<u32, RuleActivity>,
}

impl<'a> StructureBuilder<'a> {
    /// Index `root` and resolve its sharing rings.
    ///
    /// Returns [`StructureError::DuplicateRuleId`] if two rules share an id
    /// and [`StructureError::RootIsSprout`] if `root` produces sprouts.
    pub fn new(
        root: &'a StructureRule,
        positions: &'a PositionSource,
        config: BuildConfig,
    ) -> Result<Self, StructureError> {
        if root.is_sprout() {
            return Err(StructureError::RootIsSprout);
        }
        let mut rules = HashMap::new();
        for rule in root.iter() {
            if rules.insert(rule.id, rule).is_some() {
                return Err(StructureError::DuplicateRuleId { id: rule.id });
            }
        }
        let groups = rules
            .values()
            .filter(|r| r.sharing_group_id == 0 && r.sharing_next_id != 0)
            .map(|r| {
                let group = SharingGroup::resolve(r, &rules, config.max_sharing_hops);
                (r.id, group)
            })
            .collect();
        Ok(Self {
            root,
            rules,
            groups,
            positions,
            rng: RandomSource::new(config.seed),
            config,
            last_id: 0,
            reserved: HashSet::new(),
            activity: BTreeMap::new(),
        })
    }

    /// Regenerate `prior` against the rule tree.
    ///
    /// Restarts the random stream from the configured seed.  Terminal
    /// structures of `prior` are discarded; they are always regenerated.
    pub fn generate(&mut self, prior: StructureForest) -> StructureForest {
        self.rng = RandomSource::new(self.config.seed);
        self.activity.clear();
        self.last_id = prior.max_id();
        self.reserved = prior.tuned_ids().into_iter().collect();

        let root_group = self.root.main_id();
        let (roots, dropped): (Vec<_>, Vec<_>) = prior
            .roots
            .into_iter()
            .partition(|s| s.main_generator_id == root_group);
        if !dropped.is_empty() {
            debug!("dropped {} root structures of unknown rules", dropped.len());
        }

        let forest = StructureForest::new(self.grow_group(roots, self.root, None));
        debug!(
            "structure pass (seed {}): {} branches, {} terminals",
            self.config.seed,
            forest.count(),
            forest.terminal_count()
        );
        forest
    }

    /// Materialize `forest` into nested branches with sprouts.
    ///
    /// Continues the random stream left by [`generate`](Self::generate).
    /// Child girth is clamped to the parent's girth in `forest` as well.
    pub fn build_tree(&mut self, forest: &mut StructureForest) -> Tree {
        let mut branches = Vec::with_capacity(forest.roots.len());
        for root in &mut forest.roots {
            branches.push(self.materialize(root));
        }
        Tree { branches }
    }

    /// Per-rule report of the last pass.
    pub fn activity(&self) -> &BTreeMap<u32, RuleActivity> {
        &self.activity
    }

    /// Current position of the random stream.
    pub fn random_state(&self) -> RandomState {
        self.rng.state()
    }

    fn rule(&self, id: u32) -> Option<&'a StructureRule> {
        self.rules.get(&id).copied()
    }

    fn next_id(&mut self) -> u32 {
        loop {
            self.last_id += 1;
            if !self.reserved.contains(&self.last_id) {
                return self.last_id;
            }
        }
    }

    fn mark(&mut self, id: u32, active: Option<bool>) {
        let entry = self.activity.entry(id).or_default();
        entry.visited = true;
        if let Some(active) = active {
            entry.visited_and_active = active;
        }
    }

    /// Restore a tuned parent's snapshot before generating under it.
    fn enter(&mut self, parent: Option<&ParentView>) {
        if !self.config.use_parent_random_state {
            return;
        }
        if let Some(parent) = parent.filter(|p| p.is_tuned) {
            self.rng.restore(&parent.random_state);
        }
    }

    /// Ring member that fires for `rule`.
    ///
    /// `pinned` (the generator of an existing tuned structure) wins when it
    /// belongs to the ring; otherwise a share is drawn.
    fn select_member(&mut self, rule: &'a StructureRule, pinned: Option<u32>) -> &'a StructureRule {
        if !rule.is_shared() {
            return rule;
        }
        let Some(group) = self.groups.get(&rule.main_id()) else {
            return rule;
        };
        if let Some(id) = pinned.filter(|id| group.members.contains(id)) {
            return self.rule(id).unwrap_or(rule);
        }
        let draw = self.rng.range_f32(0.0, 1.0);
        let id = group.select(draw, &self.rules);
        self.rule(id).unwrap_or(rule)
    }

    /// Regenerate the children and terminals of `node` from `rule`'s children.
    fn grow_children(&mut self, node: &mut Structure, rule: &'a StructureRule) {
        if node.is_tuned && node.children.is_empty() {
            // A tuned leaf stays as committed, without terminals.
            node.terminals.clear();
            return;
        }
        let parent = ParentView::of(node);
        let mut children = std::mem::take(&mut node.children);
        let mut terminals = Vec::new();
        let mut groups = Vec::new();

        for child_rule in rule.children.iter().filter(|r| !r.is_shared_not_main()) {
            let group_id = child_rule.main_id();
            groups.push(group_id);
            if child_rule.is_sprout() {
                terminals.push(self.grow_terminal(child_rule, &parent));
                continue;
            }
            let (group, others): (Vec<_>, Vec<_>) = children
                .into_iter()
                .partition(|c| c.main_generator_id == group_id);
            children = others;
            children.extend(self.grow_group(group, child_rule, Some(&parent)));
        }

        let before = children.len();
        children.retain(|c| groups.contains(&c.main_generator_id));
        if children.len() < before {
            debug!(
                "structure {}: dropped {} children of removed rules",
                node.id,
                before - children.len()
            );
        }
        node.children = children;
        node.terminals = terminals;
    }

    /// Merge tuned structures of `rule`'s group with fresh candidates.
    ///
    /// `existing` holds the parent's current structures of this group.
    fn grow_group(
        &mut self,
        existing: Vec<Structure>,
        rule: &'a StructureRule,
        parent: Option<&ParentView>,
    ) -> Vec<Structure> {
        self.enter(parent);
        self.mark(rule.id, None);
        let parent_id = parent.map(|p| p.id);

        if rule.is_locked && !existing.is_empty() {
            self.mark(rule.id, Some(true));
            let mut kept = existing;
            for node in &mut kept {
                node.parent_structure_id = parent_id;
            }
            self.recurse(&mut kept, rule);
            return kept;
        }

        let mut tuned: Vec<Structure> = existing.into_iter().filter(|s| s.is_tuned).collect();
        tuned.sort_by(|a, b| b.branch.position.total_cmp(&a.branch.position));
        let tuned_count = tuned.len();

        let (member, candidates) = if tuned_count == 0 {
            let member = self.select_member(rule, None);
            (member, self.branch_candidates(member, parent, None))
        } else {
            let member = self.select_member(rule, Some(tuned[0].generator_id));
            let frequency = self
                .rng
                .range_i32(member.min_frequency, member.max_frequency.saturating_add(1));
            let candidates = if frequency > tuned_count as i32 {
                self.branch_candidates(member, parent, Some(frequency))
            } else {
                Vec::new()
            };
            (member, candidates)
        };

        let mut merged = tuned;
        for node in &mut merged {
            node.parent_structure_id = parent_id;
            if !self.config.use_parent_random_state {
                node.random_state = self.rng.state();
            }
        }

        // Candidates and tuned structures are both tip first.  A candidate
        // strictly above the next unplaced tuned structure is inserted;
        // otherwise that tuned structure claims the slot.
        let slots = candidates.len();
        let mut tuned_index = 0;
        for candidate in candidates {
            if merged.len() >= slots {
                break;
            }
            if tuned_index < tuned_count
                && candidate.position <= merged[tuned_index].branch.position
            {
                tuned_index += 1;
                continue;
            }
            let structure = self.place(candidate, member, parent_id);
            merged.push(structure);
        }

        // Stable, so tuned structures stay ahead at equal positions.
        merged.sort_by(|a, b| b.branch.position.total_cmp(&a.branch.position));
        self.recurse(&mut merged, rule);
        merged
    }

    fn recurse(&mut self, nodes: &mut [Structure], fallback: &'a StructureRule) {
        for node in nodes {
            let rule = self.rule(node.generator_id).unwrap_or_else(|| {
                warn!(
                    "structure {} references missing rule {}; using rule {}",
                    node.id, node.generator_id, fallback.id
                );
                fallback
            });
            self.grow_children(node, rule);
        }
    }

    /// Probability, frequency and spawn draws for one firing of `member`.
    fn branch_candidates(
        &mut self,
        member: &'a StructureRule,
        parent: Option<&ParentView>,
        preferred_frequency: Option<i32>,
    ) -> Vec<Branch> {
        let Some(shape) = member.branch_shape() else {
            return Vec::new();
        };
        let draw = self.rng.range_f32(0.0, 1.0);
        if !(member.enabled && member.probability >= draw) {
            self.mark(member.id, Some(false));
            return Vec::new();
        }
        self.mark(member.id, Some(true));

        let frequency = match preferred_frequency {
            Some(frequency) => frequency,
            None => self
                .rng
                .range_i32(member.min_frequency, member.max_frequency.saturating_add(1)),
        };
        if frequency <= 0 {
            return Vec::new();
        }
        let twirl_offset = if member.random_twirl_offset {
            self.rng.range_f32(-1.0, 1.0)
        } else {
            member.twirl_offset
        };
        let mask = member.mask_range(parent.and_then(|p| p.break_at));
        let spawned = SproutSpawner::new(SpawnParams::from_rule(member, frequency, twirl_offset, mask))
            .spawn(&mut self.rng);

        let parent_direction = parent.map_or(AGAINST_GRAVITY, |p| p.direction);
        let mut branches = Vec::with_capacity(spawned.len());
        for candidate in &spawned {
            branches.push(self.candidate_branch(member, shape, candidate, parent_direction));
        }
        branches
    }

    fn candidate_branch(
        &mut self,
        member: &StructureRule,
        shape: &BranchShape,
        candidate: &SproutCandidate,
        parent_direction: Vec3,
    ) -> Branch {
        let mut branch = Branch {
            position: candidate.position,
            generator_id: member.id,
            ..Branch::default()
        };
        if let Some(brk) = &shape.branch_break {
            let chance = brk.probability.evaluate(candidate.position);
            if chance > 0.0 && self.rng.range_f32(0.0, 1.0) <= chance {
                branch.is_broken = true;
                branch.break_position = self
                    .rng
                    .range_f32(brk.min_break_range, brk.max_break_range);
            }
        }
        let is_root_rule = member.id == ROOT_RULE_ID;
        branch.length = shape.length_at(candidate.position, is_root_rule, &mut self.rng);
        branch.girth_scale = self
            .rng
            .range_f32(shape.min_girth_scale, shape.max_girth_scale);
        if is_root_rule {
            branch.direction = AGAINST_GRAVITY.to_array();
        } else {
            branch.direction = candidate.direction(parent_direction, true).to_array();
            branch.roll_angle = candidate.roll_angle;
        }
        branch
    }

    /// Give a fresh candidate its id and, for the root rule, its origin.
    fn place(&mut self, mut branch: Branch, member: &StructureRule, parent_id: Option<u32>) -> Structure {
        let id = self.next_id();
        branch.id = id;
        branch.is_root = member.is_root;
        let mut position_offset = [0.0; 3];
        if member.id == ROOT_RULE_ID {
            let radius = member.branch_shape().map_or(0.0, |s| s.radius);
            let positions = self.positions;
            let placement = positions.place(radius, self.config.global_scale, &mut self.rng);
            position_offset = placement.offset.to_array();
            branch.position_from_root = position_offset;
            if let Some(direction) = placement.direction {
                branch.direction = direction.to_array();
            }
        }
        Structure {
            id,
            generator_id: member.id,
            main_generator_id: member.main_id(),
            parent_structure_id: parent_id,
            is_shared_generator: member.is_shared(),
            is_tuned: false,
            random_state: self.rng.state(),
            position_offset,
            branch,
            children: Vec::new(),
            terminals: Vec::new(),
        }
    }

    fn grow_terminal(&mut self, rule: &'a StructureRule, parent: &ParentView) -> TerminalStructure {
        self.enter(Some(parent));
        self.mark(rule.id, None);
        let member = self.select_member(rule, None);
        TerminalStructure {
            id: self.next_id(),
            generator_id: member.id,
            main_generator_id: rule.main_id(),
            parent_structure_id: Some(parent.id),
            is_shared_generator: member.is_shared(),
            is_tuned: false,
            random_state: self.rng.state(),
        }
    }

    fn materialize(&mut self, structure: &mut Structure) -> Branch {
        let girth = structure.branch.girth_scale;
        let mut branch = structure.branch.plain_clone();
        for child in &mut structure.children {
            if child.branch.girth_scale > girth {
                child.branch.girth_scale = girth;
            }
            branch.branches.push(self.materialize(child));
        }
        for terminal in &structure.terminals {
            let Some(rule) = self.rule(terminal.generator_id) else {
                warn!(
                    "terminal {} references missing rule {}",
                    terminal.id, terminal.generator_id
                );
                continue;
            };
            let sprouts = self.sprout_level(rule, &structure.branch);
            branch.sprouts.extend(sprouts);
        }
        branch
    }

    /// Spawn the sprouts one sprout rule places on `parent`.
    fn sprout_level(&mut self, rule: &StructureRule, parent: &Branch) -> Vec<Sprout> {
        let Some(shape) = rule.sprout_shape() else {
            warn!("rule {} is not a sprout rule", rule.id);
            return Vec::new();
        };
        let draw = self.rng.range_f32(0.0, 1.0);
        if !(rule.enabled && rule.probability >= draw) {
            self.mark(rule.id, Some(false));
            return Vec::new();
        }
        self.mark(rule.id, Some(true));
        let frequency = self
            .rng
            .range_i32(rule.min_frequency, rule.max_frequency.saturating_add(1));
        if frequency <= 0 {
            return Vec::new();
        }
        let twirl_offset = if rule.random_twirl_offset {
            self.rng.range_f32(-1.0, 1.0)
        } else {
            rule.twirl_offset
        };
        let mask = rule.mask_range(parent.break_at());
        let parent_direction = Vec3::from_array(parent.direction);
        SproutSpawner::new(SpawnParams::from_rule(rule, frequency, twirl_offset, mask))
            .spawn(&mut self.rng)
            .into_iter()
            .map(|candidate| {
                let mut sprout = Sprout::from_candidate(candidate, parent_direction);
                if shape.sprout_group_id > 0 {
                    sprout.group_id = shape.sprout_group_id;
                }
                sprout
            })
            .collect()
    }
}

/// Run a full pass: generate against `prior`, then materialize.
pub fn build_structure(
    root: &StructureRule,
    prior: StructureForest,
    positions: &PositionSource,
    config: BuildConfig,
) -> Result<StructureOutput, StructureError> {
    let mut builder = StructureBuilder::new(root, positions, config)?;
    let mut forest = builder.generate(prior);
    let tree = builder.build_tree(&mut forest);
    Ok(StructureOutput {
        forest,
        tree,
        activity: builder.activity,
    })
}

// --- tests ------------------------------------------------------------------
