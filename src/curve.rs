//! Piecewise-linear 1-D curves.
//!
//! Rules use curves to remap positions along a parent branch (distribution),
//! to blend between "at base" and "at top" values (alignment, length), and to
//! key probabilities by position (breakage).  The domain is nominally
//! `[0, 1]`; the range is unrestricted and callers clamp where they need to.

/// A single key of an [`AlignmentCurve`].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CurveKey {
    pub time: f32,
    pub value: f32,
}

/// Keyframed curve evaluated by linear interpolation between keys.
///
/// Outside the first/last key the curve holds the end value.  An empty curve
/// evaluates to `0.0`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlignmentCurve {
    keys: Vec<CurveKey>,
}

impl Default for AlignmentCurve {
    fn default() -> Self {
        Self::linear(0.0, 0.0, 1.0, 1.0)
    }
}

impl AlignmentCurve {
    /// Build a curve from arbitrary keys; they are sorted by time.
    pub fn new(mut keys: Vec<CurveKey>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    /// Straight line through `(t0, v0)` and `(t1, v1)`.
    pub fn linear(t0: f32, v0: f32, t1: f32, v1: f32) -> Self {
        Self::new(vec![
            CurveKey {
                time: t0,
                value: v0,
            },
            CurveKey {
                time: t1,
                value: v1,
            },
        ])
    }

    /// Flat curve returning `value` everywhere.
    pub fn constant(value: f32) -> Self {
        Self::linear(0.0, value, 1.0, value)
    }

    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 0.0;
        };
        if x <= first.time {
            return first.value;
        }
        if x >= last.time {
            return last.value;
        }
        // First key strictly after x; guaranteed to exist and be > 0 here.
        let hi = self.keys.partition_point(|k| k.time <= x);
        let (a, b) = (self.keys[hi - 1], self.keys[hi]);
        let span = b.time - a.time;
        if span <= f32::EPSILON {
            return b.value;
        }
        a.value + (b.value - a.value) * ((x - a.time) / span)
    }

    /// `evaluate(x)` clamped to `[0, 1]`, the form used as a blend factor.
    #[inline]
    pub fn blend(&self, x: f32) -> f32 {
        self.evaluate(x).clamp(0.0, 1.0)
    }
}

/// Linear interpolation with `t` clamped to `[0, 1]`.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

// --- tests ------------------------------------------------------------------
