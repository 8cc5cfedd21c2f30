//! Per-pass build settings.

/// Settings for one generation pass.
///
/// Serializable so editors can persist them next to the rule tree.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Seed for the pass's random stream.
    pub seed: u64,
    /// Restore a tuned parent's stream snapshot before generating under it.
    ///
    /// When `false`, tuned structures are re-stamped with the live stream
    /// state instead, so their descendants reshuffle on every pass.
    pub use_parent_random_state: bool,
    /// Factory scale; configured root offsets are divided by it.
    pub global_scale: f32,
    /// Upper bound on links followed when walking a sharing ring.
    pub max_sharing_hops: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            use_parent_random_state: true,
            global_scale: 1.0,
            max_sharing_hops: 40,
        }
    }
}

impl BuildConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

// --- tests ------------------------------------------------------------------
