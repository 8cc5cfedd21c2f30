//! Async structure generation system.
//!
//! Runs full build passes (generate + materialize) on a private, bounded
//! [`rayon`] thread pool so large rule trees do not stall the main thread.
//! The pool is limited to [`MAX_GENERATION_THREADS`] concurrent passes;
//! excess requests queue inside the pool.  When a pass finishes the entity
//! receives the [`StructureReady`] component.
//!
//! # Usage
//! ```rust,ignore
//! commands.spawn(PendingStructure::new(
//!     rules,
//!     StructureForest::default(),
//!     PositionSource::default(),
//!     BuildConfig::with_seed(3),
//! ));
//!
//! // Later, query for StructureReady to consume the forest and tree.
//! ```

use std::sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
    mpsc,
};

use bevy::ecs::{
    component::Component,
    entity::Entity,
    system::{Commands, Query},
};

use crate::{
    builder::{StructureOutput, build_structure},
    config::BuildConfig,
    error::StructureError,
    position::PositionSource,
    rule::StructureRule,
    structure::StructureForest,
};

/// Maximum number of build passes that run concurrently.
const MAX_GENERATION_THREADS: usize = 4;

/// Library-private pool, isolated from the application's global rayon pool.
///
/// `None` if the pool could not be built; tasks then run on the caller.
fn gen_pool() -> Option<&'static rayon::ThreadPool> {
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(MAX_GENERATION_THREADS)
            .thread_name(|i| format!("structure-gen-{i}"))
            .build();
        match built {
            Ok(pool) => Some(pool),
            Err(e) => {
                bevy::log::error!("failed to build structure generation pool: {e}");
                None
            }
        }
    })
    .as_ref()
}

/// Spawned onto an entity to request a background build pass.
///
/// Each pass owns its rule tree, prior forest and random stream, so any
/// number of them can be in flight.  [`poll_structure_tasks`] checks for
/// completion each frame with [`mpsc::Receiver::try_recv`].
///
/// Dropping `PendingStructure` (e.g. when the entity is despawned) sets a
/// cancellation flag; passes that have not started yet exit without work.
#[derive(Component)]
pub struct PendingStructure {
    // Mutex makes the receiver Sync, which Component requires.
    rx: Mutex<mpsc::Receiver<Result<StructureOutput, StructureError>>>,
    cancelled: Arc<AtomicBool>,
}

impl Drop for PendingStructure {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

fn spawn_task<F>(f: F) -> PendingStructure
where
    F: FnOnce() -> Result<StructureOutput, StructureError> + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let (tx, rx) = mpsc::sync_channel(1);
    let task = move || {
        if !flag.load(Ordering::Relaxed) {
            tx.send(f()).ok();
        }
    };
    match gen_pool() {
        Some(pool) => pool.spawn(task),
        None => task(),
    }
    PendingStructure {
        rx: Mutex::new(rx),
        cancelled,
    }
}

impl PendingStructure {
    /// Queue a pass of `rules` against `prior`.
    ///
    /// The rule tree is validated (ranges repaired) before building.
    pub fn new(
        mut rules: StructureRule,
        prior: StructureForest,
        positions: PositionSource,
        config: BuildConfig,
    ) -> Self {
        spawn_task(move || {
            rules.validate_tree();
            build_structure(&rules, prior, &positions, config)
        })
    }
}

/// Added to the entity by [`poll_structure_tasks`] when the pass is complete.
#[derive(Component)]
pub struct StructureReady(pub StructureOutput);

/// Bevy system: moves finished passes into [`StructureReady`].
pub fn poll_structure_tasks(mut commands: Commands, tasks: Query<(Entity, &PendingStructure)>) {
    for (entity, pending) in &tasks {
        let poll = match pending.rx.lock() {
            Ok(rx) => rx.try_recv(),
            Err(_) => Err(mpsc::TryRecvError::Disconnected),
        };
        match poll {
            Ok(Ok(output)) => {
                commands
                    .entity(entity)
                    .remove::<PendingStructure>()
                    .insert(StructureReady(output));
            }
            Ok(Err(e)) => {
                bevy::log::error!("Structure generation failed: {e}");
                commands.entity(entity).remove::<PendingStructure>();
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                bevy::log::error!("Structure generation thread panicked");
                commands.entity(entity).remove::<PendingStructure>();
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }
    }
}

// --- tests ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn wait(pending: &PendingStructure) -> Result<StructureOutput, StructureError> {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            match pending.rx.lock().unwrap().try_recv() {
                Ok(result) => return result,
                Err(mpsc::TryRecvError::Empty) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("no result from structure task: {e:?}"),
            }
        }
    }

    #[test]
    fn background_pass_matches_direct_pass() {
        let rules = StructureRule::root().with_child(StructureRule {
            min_frequency: 2,
            max_frequency: 4,
            ..StructureRule::branch(1)
        });
        let config = BuildConfig::with_seed(17);
        let pending = PendingStructure::new(
            rules.clone(),
            StructureForest::default(),
            PositionSource::default(),
            config.clone(),
        );
        let direct = build_structure(
            &rules,
            StructureForest::default(),
            &PositionSource::default(),
            config,
        )
        .unwrap();
        assert_eq!(wait(&pending).unwrap(), direct);
    }

    #[test]
    fn sprout_root_reports_error() {
        let pending = PendingStructure::new(
            StructureRule::sprout(0),
            StructureForest::default(),
            PositionSource::default(),
            BuildConfig::default(),
        );
        assert_eq!(wait(&pending), Err(StructureError::RootIsSprout));
    }
}
