//! Burst thresholding for superficial-layer ("super") layers.
//!
//! Burst is a thresholded copy of activation, recomputed every cycle of the
//! plus phase and held at its previous value through the minus phase. The
//! threshold floats with the pool's activation distribution so that only
//! the strongest units burst, with an absolute floor to keep a silent layer
//! from bursting on noise.

use serde::{Deserialize, Serialize};

use crate::layer::{Layer, LayerKind, PoolStat};

/// Burst threshold parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BurstParams {
    /// Relative threshold as a fraction of the avg..max activation span.
    pub thr_rel: f32,
    /// Absolute threshold floor.
    pub thr_abs: f32,
}

impl Default for BurstParams {
    fn default() -> Self {
        Self { thr_rel: 0.1, thr_abs: 0.1 }
    }
}

impl BurstParams {
    /// Threshold for a pool: relative point within [avg, max], floored at
    /// the absolute minimum.
    #[inline]
    pub fn thr(&self, ps: &PoolStat) -> f32 {
        (ps.act_avg + self.thr_rel * (ps.act_max - ps.act_avg)).max(self.thr_abs)
    }
}

/// Per-layer burst state.
pub struct SuperState {
    pub params: BurstParams,
    /// Current burst values, live during the plus phase.
    pub burst: Vec<f32>,
    /// Burst as of the end of the previous theta cycle's minus phase.
    pub burst_prv: Vec<f32>,
}

impl SuperState {
    pub fn new(n: usize) -> Self {
        Self {
            params: BurstParams::default(),
            burst: vec![0.0; n],
            burst_prv: vec![0.0; n],
        }
    }

    /// Copy current burst into the previous-cycle slot. Runs once per theta
    /// cycle, before the plus-phase recompute overwrites `burst`.
    pub fn snapshot_burst_prv(&mut self) {
        self.burst_prv.copy_from_slice(&self.burst);
    }

    /// Recompute burst for one pool's unit range from current activations.
    /// `off` units never burst.
    pub fn recompute_pool(&mut self, ps: &PoolStat, range: (usize, usize), act: &[f32], off: &[bool]) {
        let thr = self.params.thr(ps);
        for i in range.0..range.1 {
            self.burst[i] = if !off[i] && act[i] > thr { act[i] } else { 0.0 };
        }
    }
}

impl Layer {
    /// Recompute burst across all pools from current activations. Called
    /// once at the plus-phase boundary and then every plus-phase cycle.
    /// No-op on non-super layers.
    pub(crate) fn burst_update(&mut self) {
        let Layer { kind, pools, shape, units, .. } = self;
        let LayerKind::Super(s) = kind else {
            return;
        };
        if shape.pooled() {
            for p in 0..shape.pools as usize {
                s.recompute_pool(&pools[p + 1], shape.pool_range(p), &units.act, &units.off);
            }
        } else {
            s.recompute_pool(&pools[0], (0, units.len()), &units.act, &units.off);
        }
    }

    /// Snapshot burst into burst_prv at the theta-cycle boundary.
    pub(crate) fn burst_snapshot(&mut self) {
        if let LayerKind::Super(s) = &mut self.kind {
            s.snapshot_burst_prv();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn threshold_floats_with_pool_stats() {
        let p = BurstParams::default();
        let ps = PoolStat { act_avg: 0.3, act_max: 1.0, ..PoolStat::default() };
        assert_relative_eq!(p.thr(&ps), 0.37);
    }

    #[test]
    fn absolute_floor_applies_to_quiet_pools() {
        let p = BurstParams::default();
        let ps = PoolStat { act_avg: 0.01, act_max: 0.05, ..PoolStat::default() };
        assert_relative_eq!(p.thr(&ps), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn only_supra_threshold_units_burst() {
        let mut s = SuperState::new(5);
        let acts = [1.0, 0.4, 0.1, 0.0, 0.0];
        let ps = PoolStat { act_avg: 0.3, act_max: 1.0, ..PoolStat::default() };
        s.recompute_pool(&ps, (0, 5), &acts, &[false; 5]);
        // thr = 0.3 + 0.1*(1.0-0.3) = 0.37
        assert_eq!(s.burst, vec![1.0, 0.4, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn off_units_never_burst() {
        let mut s = SuperState::new(2);
        let ps = PoolStat { act_avg: 0.5, act_max: 0.9, ..PoolStat::default() };
        s.recompute_pool(&ps, (0, 2), &[0.9, 0.9], &[false, true]);
        assert_eq!(s.burst, vec![0.9, 0.0]);
    }

    #[test]
    fn snapshot_preserves_minus_phase_burst() {
        let mut s = SuperState::new(2);
        s.burst = vec![0.7, 0.0];
        s.snapshot_burst_prv();
        s.burst = vec![0.0, 0.5];
        assert_eq!(s.burst_prv, vec![0.7, 0.0]);
    }
}
