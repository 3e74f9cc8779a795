//! Pool-level attention computation and broadcast.
//!
//! An attention layer summarizes each of its pools into a scalar factor and
//! overlays that factor onto the `attn` multiplier of named target layers,
//! pool by pool. The factors compete across pools: every pool's average
//! activation is normalized by the strongest pool's average, so the winning
//! pool passes full attention and weaker pools are attenuated in
//! proportion. When even the strongest pool sits below the threshold the
//! layer is considered quiet and passes full attention everywhere. The
//! factors are recomputed and re-applied every cycle from live pool
//! statistics.

use serde::{Deserialize, Serialize};

use crate::layer::{Layer, PoolStat};

/// Attention parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttnParams {
    /// Pools with peak activation below this pass attention of 1.
    pub thr: f32,
    /// Target layer names, resolved to indices at build.
    pub to_lays: Vec<String>,
}

impl Default for AttnParams {
    fn default() -> Self {
        Self { thr: 0.1, to_lays: Vec::new() }
    }
}

/// Per-layer attention state.
pub struct AttnState {
    pub params: AttnParams,
    /// Resolved target layer indices (valid after build; unresolved names
    /// are dropped there with a one-time log).
    pub targets: Vec<u32>,
    /// One attention factor per pool.
    pub pool_attn: Vec<f32>,
}

impl AttnState {
    pub fn new(npools: usize) -> Self {
        Self {
            params: AttnParams::default(),
            targets: Vec::new(),
            pool_attn: vec![1.0; npools.max(1)],
        }
    }

    /// Recompute per-pool attention from the owning layer's pool stats
    /// (`pools[0]` is the whole layer, `1..` the sub-pools when pooled).
    ///
    /// Normalization is layer-wide: each pool's average activation divides
    /// by the maximum pool average, one scalar for the whole layer. Below
    /// the threshold the layer passes full attention everywhere.
    pub fn compute(&mut self, pools: &[PoolStat], pooled: bool) {
        let amax = if pooled {
            pools[1..].iter().map(|ps| ps.act_avg).fold(0.0f32, f32::max)
        } else {
            pools[0].act_max
        };
        if amax < self.params.thr {
            self.pool_attn.fill(1.0);
            return;
        }
        for (p, attn) in self.pool_attn.iter_mut().enumerate() {
            let avg = pools[if pooled { p + 1 } else { 0 }].act_avg;
            *attn = avg / amax;
        }
    }

    /// Overlay the pool factors onto a target layer's attention
    /// multipliers. Pools and per-pool units clip to the shorter side;
    /// anything beyond the overlap keeps its existing value.
    pub fn apply_to(&self, tgt: &mut Layer) {
        if !tgt.shape.pooled() {
            let a = self.pool_attn[0];
            for t in tgt.units.attn.iter_mut() {
                *t = a;
            }
            return;
        }
        let np = self.pool_attn.len().min(tgt.shape.pools as usize);
        for (p, &a) in self.pool_attn.iter().enumerate().take(np) {
            let (st, end) = tgt.shape.pool_range(p);
            for i in st..end.min(tgt.len()) {
                tgt.units.attn[i] = a;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerKind, LayerShape};
    use approx::assert_relative_eq;

    fn pooled_layer(acts: &[f32], pools: u32, units: u32) -> Layer {
        let mut ly = Layer::new("a", LayerShape::new(pools, units), LayerKind::Hidden);
        ly.units.act.copy_from_slice(acts);
        ly.act_stats();
        ly
    }

    #[test]
    fn weaker_pool_attenuates_against_strongest() {
        let ly = pooled_layer(&[1.0, 1.0, 0.5, 0.0], 2, 2);
        let mut st = AttnState::new(2);
        st.compute(&ly.pools, true);
        assert_relative_eq!(st.pool_attn[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(st.pool_attn[1], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn equal_pool_averages_all_pass_full_attention() {
        // different shapes, same pooled average: no pool wins
        let ly = pooled_layer(&[1.0, 0.0, 0.5, 0.5], 2, 2);
        let mut st = AttnState::new(2);
        st.compute(&ly.pools, true);
        assert_eq!(st.pool_attn, vec![1.0, 1.0]);
    }

    #[test]
    fn quiet_pool_passes_full_attention() {
        let ly = pooled_layer(&[0.05, 0.01, 0.0, 0.0], 2, 2);
        let mut st = AttnState::new(2);
        st.compute(&ly.pools, true);
        assert_eq!(st.pool_attn, vec![1.0, 1.0]);
    }

    #[test]
    fn apply_overlays_pool_factors() {
        let mut tgt = Layer::new("t", LayerShape::new(2, 3), LayerKind::Hidden);
        let mut st = AttnState::new(2);
        st.pool_attn = vec![0.25, 0.75];
        st.apply_to(&mut tgt);
        assert_eq!(tgt.units.attn, vec![0.25, 0.25, 0.25, 0.75, 0.75, 0.75]);
    }

    #[test]
    fn apply_clips_extra_source_pools() {
        let mut tgt = Layer::new("t", LayerShape::new(1, 2), LayerKind::Hidden);
        let mut st = AttnState::new(3);
        st.pool_attn = vec![0.5, 0.2, 0.1];
        st.apply_to(&mut tgt);
        assert_eq!(tgt.units.attn, vec![0.5, 0.5], "only the overlapping pool lands");
    }

    #[test]
    fn flat_target_takes_first_pool_factor() {
        let mut tgt = Layer::new("t", LayerShape::flat(3), LayerKind::Hidden);
        let mut st = AttnState::new(2);
        st.pool_attn = vec![0.4, 0.9];
        st.apply_to(&mut tgt);
        assert_eq!(tgt.units.attn, vec![0.4, 0.4, 0.4]);
    }
}
