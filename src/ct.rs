//! Context-integrating ("CT") deep-layer state.
//!
//! A CT layer holds per-unit context excitation set once per theta cycle by
//! the context-pathway flush. During every cycle the layer folds the gained
//! context into its conductance integration (see `Layer::ge_integrate`).

use serde::{Deserialize, Serialize};

/// CT layer parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CtParams {
    /// Gain on context excitation when folded into conductance.
    pub ge_gain: f32,
    /// Per-cycle proportional decay of context excitation, [0, 1].
    pub decay: f32,
}

impl Default for CtParams {
    fn default() -> Self {
        Self { ge_gain: 0.2, decay: 0.0 }
    }
}

/// Per-layer CT state.
pub struct CtState {
    pub params: CtParams,
    /// Per-unit context excitation, replaced at each theta-cycle boundary.
    pub ctxt_ge: Vec<f32>,
}

impl CtState {
    pub fn new(n: usize) -> Self {
        Self { params: CtParams::default(), ctxt_ge: vec![0.0; n] }
    }

    /// Clear context ahead of the per-cycle flushes, so the incoming
    /// pathways fully determine this cycle's context.
    pub fn begin_ctxt(&mut self) {
        self.ctxt_ge.fill(0.0);
    }

    /// Per-cycle proportional decay, applied after the context has been
    /// folded into conductance integration.
    pub fn decay_step(&mut self) {
        if self.params.decay > 0.0 {
            let keep = 1.0 - self.params.decay;
            for g in self.ctxt_ge.iter_mut() {
                *g *= keep;
            }
        }
    }

    /// Start-of-trial decay, sharing the layer's glong proportion.
    pub fn decay_ctxt(&mut self, glong: f32) {
        for g in self.ctxt_ge.iter_mut() {
            *g -= glong * *g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_ctxt_clears_for_fresh_flush() {
        let mut ct = CtState::new(2);
        ct.ctxt_ge = vec![0.3, 0.7];
        ct.begin_ctxt();
        assert_eq!(ct.ctxt_ge, vec![0.0, 0.0]);
    }

    #[test]
    fn cycle_decay_multiplies_by_keep_fraction() {
        let mut ct = CtState::new(1);
        ct.params.decay = 0.25;
        ct.ctxt_ge[0] = 0.8;
        ct.decay_step();
        assert!((ct.ctxt_ge[0] - 0.6).abs() < 1e-6);
        ct.params.decay = 1.0;
        ct.decay_step();
        assert_eq!(ct.ctxt_ge[0], 0.0, "full decay clears, never negative");
    }

    #[test]
    fn decay_is_proportional() {
        let mut ct = CtState::new(1);
        ct.ctxt_ge[0] = 0.4;
        ct.decay_ctxt(0.5);
        assert!((ct.ctxt_ge[0] - 0.2).abs() < 1e-6);
    }
}
