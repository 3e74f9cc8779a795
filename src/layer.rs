//! Layers — pooled unit groups with rate-coded dynamics and FFFB inhibition.
//!
//! A layer owns its unit state as structure-of-arrays (`UnitArrays`) plus a
//! `PoolStat` vector: entry 0 always aggregates the whole layer, entries
//! 1..=pools cover the sub-pools when the layer is pooled. Specialized
//! behavior lives in the closed `LayerKind` union — there is no open
//! inheritance surface, so a `match` on kind is exhaustive by construction.

use serde::{Deserialize, Serialize};

use crate::attn::AttnState;
use crate::burst::SuperState;
use crate::ct::CtState;
use crate::relay::RelayState;
use crate::unit::{UnitArrays, UNIT_VARS};

/// Layer geometry: `pools` groups of `units` each, flattened row-major.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerShape {
    pub pools: u32,
    pub units: u32,
}

impl LayerShape {
    pub fn new(pools: u32, units: u32) -> Self {
        Self { pools, units }
    }

    /// Single-pool layer of `n` units.
    pub fn flat(n: u32) -> Self {
        Self { pools: 1, units: n }
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.pools as usize * self.units as usize
    }

    #[inline]
    pub fn pooled(&self) -> bool {
        self.pools > 1
    }

    /// Unit index range `[start, end)` of sub-pool `p`.
    #[inline]
    pub fn pool_range(&self, p: usize) -> (usize, usize) {
        let st = p * self.units as usize;
        (st, st + self.units as usize)
    }
}

/// Aggregate statistics over one pool of units.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStat {
    pub act_avg: f32,
    pub act_max: f32,
    pub ge_avg: f32,
    pub ge_max: f32,
    /// Integrated feedback inhibition.
    pub fbi: f32,
    /// Total inhibitory conductance for units in this pool.
    pub gi: f32,
}

/// Rate-code activation dynamics.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ActParams {
    /// Integration rate for excitatory conductance.
    pub dt_ge: f32,
    /// Integration rate for activation.
    pub dt_act: f32,
    /// Gain on above-threshold net input.
    pub gain: f32,
    /// Firing threshold on net input.
    pub thr: f32,
    /// Integration rate for fast unit calcium.
    pub dt_ca_p: f32,
    /// Integration rate for slow unit calcium.
    pub dt_ca_d: f32,
}

impl Default for ActParams {
    fn default() -> Self {
        Self {
            dt_ge: 0.5,
            dt_act: 0.3,
            gain: 2.0,
            thr: 0.1,
            dt_ca_p: 1.0 / 10.0,
            dt_ca_d: 1.0 / 40.0,
        }
    }
}

impl ActParams {
    /// Saturating drive for net input `e` (post-inhibition): zero below
    /// threshold, `x/(x+1)` in the gained supra-threshold range.
    #[inline]
    pub fn drive(&self, e: f32) -> f32 {
        let x = self.gain * (e - self.thr);
        if x <= 0.0 {
            0.0
        } else {
            x / (x + 1.0)
        }
    }
}

/// Feedforward-feedback inhibition, computed per pool.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct InhibParams {
    /// Overall multiplier on combined inhibition.
    pub gi: f32,
    /// Feedforward gain on average excitation.
    pub ff: f32,
    /// Feedback gain on average activation.
    pub fb: f32,
    /// Time constant (cycles) for feedback integration.
    pub fb_tau: f32,
    /// Feedforward floor: excitation below this drives no inhibition.
    pub ff0: f32,
}

impl Default for InhibParams {
    fn default() -> Self {
        Self { gi: 1.1, ff: 1.0, fb: 1.0, fb_tau: 1.4, ff0: 0.1 }
    }
}

impl InhibParams {
    #[inline]
    fn fb_dt(&self) -> f32 {
        1.0 / self.fb_tau
    }

    /// One inhibition step for a pool; updates `fbi` and `gi` in place.
    pub fn step(&self, ps: &mut PoolStat) {
        let ffi = self.ff * (ps.ge_avg - self.ff0).max(0.0);
        ps.fbi += self.fb_dt() * (self.fb * ps.act_avg - ps.fbi);
        ps.gi = self.gi * (ffi + ps.fbi);
    }
}

/// State decay applied at the start of each trial (`new_state`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DecayParams {
    /// Proportion of activation cleared.
    pub act: f32,
    /// Proportion of slower conductances and context cleared.
    pub glong: f32,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self { act: 0.0, glong: 0.0 }
    }
}

/// Closed set of layer kinds. Specialized per-kind state rides inside the
/// variant; generic code matches and falls through to shared behavior.
pub enum LayerKind {
    /// Externally clamped input.
    Input,
    /// Plain hidden layer.
    Hidden,
    /// Superficial-layer bursting (thresholded top-5% style signal).
    Super(SuperState),
    /// Context-integrating deep layer.
    Ct(CtState),
    /// Driver-gated relay (pulvinar-like).
    Relay(RelayState),
    /// Plain subcortical relay with stronger decay.
    Thal,
    /// Pool-level attention computation and broadcast.
    Attn(AttnState),
}

impl LayerKind {
    /// Capability flag: does this layer produce a burst signal? Resolved
    /// once at build time by anything that reads burst from a sender.
    #[inline]
    pub fn is_super(&self) -> bool {
        matches!(self, LayerKind::Super(_))
    }

    pub fn as_super(&self) -> Option<&SuperState> {
        match self {
            LayerKind::Super(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_super_mut(&mut self) -> Option<&mut SuperState> {
        match self {
            LayerKind::Super(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ct_mut(&mut self) -> Option<&mut CtState> {
        match self {
            LayerKind::Ct(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_relay_mut(&mut self) -> Option<&mut RelayState> {
        match self {
            LayerKind::Relay(r) => Some(r),
            _ => None,
        }
    }

    /// Short tag for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            LayerKind::Input => "input",
            LayerKind::Hidden => "hidden",
            LayerKind::Super(_) => "super",
            LayerKind::Ct(_) => "ct",
            LayerKind::Relay(_) => "relay",
            LayerKind::Thal => "thal",
            LayerKind::Attn(_) => "attn",
        }
    }
}

/// One layer of the network.
pub struct Layer {
    pub name: String,
    pub shape: LayerShape,
    pub units: UnitArrays,
    /// Entry 0 is the whole layer; 1..=pools are sub-pools when pooled.
    pub pools: Vec<PoolStat>,
    pub act: ActParams,
    pub inhib: InhibParams,
    pub decay: DecayParams,
    pub kind: LayerKind,
    /// Externally clamped layers skip the integration dynamics.
    clamped: bool,
}

impl Layer {
    pub(crate) fn new(name: &str, shape: LayerShape, kind: LayerKind) -> Self {
        let n = shape.total();
        let npool = if shape.pooled() { shape.pools as usize + 1 } else { 1 };
        let decay = match kind {
            LayerKind::Relay(_) | LayerKind::Thal => DecayParams { act: 0.5, glong: 1.0 },
            _ => DecayParams::default(),
        };
        let clamped = matches!(kind, LayerKind::Input);
        Self {
            name: name.to_string(),
            shape,
            units: UnitArrays::new(n),
            pools: vec![PoolStat::default(); npool],
            act: ActParams::default(),
            inhib: InhibParams::default(),
            decay,
            kind,
            clamped,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.units.len() == 0
    }

    /// Stats for the pool containing unit `i` (the sub-pool when pooled,
    /// otherwise the whole layer).
    #[inline]
    pub fn pool_of(&self, i: usize) -> &PoolStat {
        if self.shape.pooled() {
            &self.pools[1 + i / self.shape.units as usize]
        } else {
            &self.pools[0]
        }
    }

    /// Clamp external values onto the layer's activations.
    pub fn apply_ext(&mut self, vals: &[f32]) {
        let n = self.len().min(vals.len());
        self.units.act[..n].copy_from_slice(&vals[..n]);
        self.clamped = true;
    }

    /// Reset all dynamic state to startup values. Structural configuration
    /// (weights excepted) and `off` flags survive.
    pub fn init_state(&mut self) {
        self.units.init_acts();
        for ps in self.pools.iter_mut() {
            *ps = PoolStat::default();
        }
        match &mut self.kind {
            LayerKind::Super(s) => {
                s.burst.fill(0.0);
                s.burst_prv.fill(0.0);
            }
            LayerKind::Ct(ct) => ct.begin_ctxt(),
            LayerKind::Relay(r) => r.clear_snapshot(),
            LayerKind::Attn(a) => a.pool_attn.fill(1.0),
            _ => {}
        }
    }

    /// Start-of-trial state handling: snapshot previous activation, then
    /// decay per the layer's `DecayParams`. Kind-specific state that lives
    /// on the glong timescale (context input) decays with `glong`.
    pub fn new_state(&mut self) {
        self.units.snapshot_act_prv();
        let DecayParams { act, glong } = self.decay;
        if act > 0.0 {
            for a in self.units.act.iter_mut() {
                *a -= act * *a;
            }
            if let LayerKind::Super(s) = &mut self.kind {
                for b in s.burst.iter_mut() {
                    *b -= act * *b;
                }
            }
        }
        if glong > 0.0 {
            for g in self.units.ge.iter_mut() {
                *g -= glong * *g;
            }
            if let LayerKind::Ct(ct) = &mut self.kind {
                ct.decay_ctxt(glong);
            }
        }
    }

    /// Integrate raw excitatory conductance into `ge` and consume it.
    /// Attention modulates the raw input; context-integrating layers add
    /// their gained context here and decay it afterwards.
    pub fn ge_integrate(&mut self) {
        let dt = self.act.dt_ge;
        for i in 0..self.len() {
            if self.units.off[i] {
                self.units.ge_raw[i] = 0.0;
                self.units.ge[i] = 0.0;
                continue;
            }
            let mut raw = self.units.ge_raw[i];
            if let LayerKind::Ct(ct) = &self.kind {
                raw += ct.params.ge_gain * ct.ctxt_ge[i];
            }
            self.units.ge[i] += dt * (self.units.attn[i] * raw - self.units.ge[i]);
            self.units.ge_raw[i] = 0.0;
        }
        if let LayerKind::Ct(ct) = &mut self.kind {
            ct.decay_step();
        }
    }

    /// Effective excitation of unit `i`, after driver gating on relay
    /// layers during the plus phase.
    #[inline]
    fn ge_eff(&self, i: usize, plus_phase: bool) -> f32 {
        match &self.kind {
            LayerKind::Relay(r) if plus_phase && r.gating() => {
                (1.0 - r.drv_inhib) * self.units.ge[i] + r.drive_ge[i]
            }
            _ => self.units.ge[i],
        }
    }

    /// Recompute pool excitation stats and run FFFB inhibition.
    pub fn inhib_update(&mut self, plus_phase: bool) {
        for p in 0..self.pools.len() {
            let (st, end) = if p == 0 {
                (0, self.len())
            } else {
                self.shape.pool_range(p - 1)
            };
            let mut sum = 0.0f32;
            let mut max = 0.0f32;
            let mut n = 0usize;
            for i in st..end {
                if self.units.off[i] {
                    continue;
                }
                let g = self.ge_eff(i, plus_phase);
                sum += g;
                max = max.max(g);
                n += 1;
            }
            let ps = &mut self.pools[p];
            ps.ge_avg = sum / n.max(1) as f32;
            ps.ge_max = max;
        }
        // borrow split: inhib params are Copy
        let inhib = self.inhib;
        for ps in self.pools.iter_mut() {
            inhib.step(ps);
        }
    }

    /// Update unit activations from effective excitation and pool
    /// inhibition, then refresh pool activation stats and unit calcium.
    pub fn act_update(&mut self, plus_phase: bool) {
        if !self.clamped {
            let dt = self.act.dt_act;
            for i in 0..self.len() {
                if self.units.off[i] {
                    self.units.act[i] = 0.0;
                    continue;
                }
                let e = (self.ge_eff(i, plus_phase) - self.pool_of(i).gi).max(0.0);
                self.units.act[i] += dt * (self.act.drive(e) - self.units.act[i]);
            }
        }
        self.act_stats();
        self.ca_update();
    }

    /// Refresh pool activation averages and maxima.
    pub fn act_stats(&mut self) {
        for p in 0..self.pools.len() {
            let (st, end) = if p == 0 {
                (0, self.len())
            } else {
                self.shape.pool_range(p - 1)
            };
            let mut sum = 0.0f32;
            let mut max = 0.0f32;
            let mut n = 0usize;
            for i in st..end {
                if self.units.off[i] {
                    continue;
                }
                let a = self.units.act[i];
                sum += a;
                max = max.max(a);
                n += 1;
            }
            self.pools[p].act_avg = sum / n.max(1) as f32;
            self.pools[p].act_max = max;
        }
    }

    fn ca_update(&mut self) {
        let (dp, dd) = (self.act.dt_ca_p, self.act.dt_ca_d);
        for i in 0..self.len() {
            self.units.ca_p[i] += dp * (self.units.act[i] - self.units.ca_p[i]);
            self.units.ca_d[i] += dd * (self.units.ca_p[i] - self.units.ca_d[i]);
        }
    }

    /// Names of all observable per-unit variables: the shared set followed
    /// by any kind-specific extras.
    pub fn unit_var_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = UNIT_VARS.iter().map(|(n, _)| *n).collect();
        names.extend(self.kind_var_names());
        names
    }

    fn kind_var_names(&self) -> &'static [&'static str] {
        match &self.kind {
            LayerKind::Super(_) => &["Burst", "BurstPrv"],
            LayerKind::Ct(_) => &["CtxtGe"],
            LayerKind::Relay(_) => &["DriveGe"],
            _ => &[],
        }
    }

    /// Index of a named per-unit variable, or None if this layer does not
    /// carry it.
    pub fn unit_var_idx(&self, name: &str) -> Option<usize> {
        self.unit_var_names().iter().position(|n| *n == name)
    }

    /// Value of per-unit variable `vi` (from `unit_var_idx`) at unit `i`.
    pub fn unit_value_1d(&self, vi: usize, i: usize) -> Option<f32> {
        if i >= self.len() {
            return None;
        }
        if let Some((_, f)) = UNIT_VARS.get(vi) {
            return Some(f(&self.units, i));
        }
        let ki = vi - UNIT_VARS.len();
        match (&self.kind, ki) {
            (LayerKind::Super(s), 0) => Some(s.burst[i]),
            (LayerKind::Super(s), 1) => Some(s.burst_prv[i]),
            (LayerKind::Ct(c), 0) => Some(c.ctxt_ge[i]),
            (LayerKind::Relay(r), 0) => Some(r.drive_ge[i]),
            _ => None,
        }
    }

    /// Value of named per-unit variable at unit `i`.
    pub fn unit_value(&self, name: &str, i: usize) -> Option<f32> {
        self.unit_value_1d(self.unit_var_idx(name)?, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pool_ranges_partition_units() {
        let sh = LayerShape::new(3, 4);
        assert_eq!(sh.total(), 12);
        assert_eq!(sh.pool_range(0), (0, 4));
        assert_eq!(sh.pool_range(2), (8, 12));
    }

    #[test]
    fn flat_layer_has_single_stat_pool() {
        let ly = Layer::new("h", LayerShape::flat(5), LayerKind::Hidden);
        assert_eq!(ly.pools.len(), 1);
        let ly = Layer::new("p", LayerShape::new(2, 3), LayerKind::Hidden);
        assert_eq!(ly.pools.len(), 3, "whole-layer entry plus one per pool");
    }

    #[test]
    fn drive_is_zero_below_threshold_and_saturating_above() {
        let p = ActParams::default();
        assert_eq!(p.drive(0.05), 0.0);
        let lo = p.drive(0.3);
        let hi = p.drive(3.0);
        assert!(lo > 0.0 && lo < hi);
        assert!(hi < 1.0, "drive saturates below 1");
    }

    #[test]
    fn fffb_inhibition_tracks_excitation() {
        let inhib = InhibParams::default();
        let mut ps = PoolStat { ge_avg: 0.5, act_avg: 0.2, ..PoolStat::default() };
        inhib.step(&mut ps);
        let first = ps.gi;
        assert!(first > 0.0);
        inhib.step(&mut ps);
        assert!(ps.gi > first, "feedback component still integrating up");
    }

    #[test]
    fn fffb_floor_suppresses_weak_input() {
        let inhib = InhibParams::default();
        let mut ps = PoolStat { ge_avg: 0.05, act_avg: 0.0, ..PoolStat::default() };
        inhib.step(&mut ps);
        assert_eq!(ps.gi, 0.0, "below ff0 with no feedback activity");
    }

    #[test]
    fn clamped_layer_keeps_applied_acts() {
        let mut ly = Layer::new("in", LayerShape::flat(3), LayerKind::Input);
        ly.apply_ext(&[0.9, 0.2, 0.0]);
        ly.inhib_update(false);
        ly.act_update(false);
        assert_eq!(ly.units.act, vec![0.9, 0.2, 0.0]);
        assert_relative_eq!(ly.pools[0].act_max, 0.9);
    }

    #[test]
    fn ge_integrate_consumes_raw() {
        let mut ly = Layer::new("h", LayerShape::flat(1), LayerKind::Hidden);
        ly.units.ge_raw[0] = 1.0;
        ly.ge_integrate();
        assert_relative_eq!(ly.units.ge[0], 0.5);
        assert_eq!(ly.units.ge_raw[0], 0.0, "raw conductance consumed");
    }

    #[test]
    fn off_units_stay_silent() {
        let mut ly = Layer::new("h", LayerShape::flat(2), LayerKind::Hidden);
        ly.inhib.gi = 0.0;
        ly.units.off[1] = true;
        ly.units.ge_raw = vec![2.0, 2.0];
        ly.ge_integrate();
        ly.inhib_update(false);
        ly.act_update(false);
        assert!(ly.units.act[0] > 0.0);
        assert_eq!(ly.units.act[1], 0.0, "lesioned unit stays at zero");
    }

    #[test]
    fn off_units_excluded_from_stats_and_context() {
        let mut ct = CtState::new(2);
        ct.ctxt_ge = vec![1.0, 1.0];
        let mut ly = Layer::new("ct", LayerShape::flat(2), LayerKind::Ct(ct));
        ly.units.off[1] = true;
        ly.ge_integrate();
        assert!(ly.units.ge[0] > 0.0, "live unit integrates context");
        assert_eq!(ly.units.ge[1], 0.0, "lesioned unit gets no context drive");
        ly.units.act[0] = 0.6;
        ly.act_stats();
        assert_relative_eq!(ly.pools[0].act_avg, 0.6, epsilon = 1e-6);
        ly.inhib_update(false);
        assert_relative_eq!(ly.pools[0].ge_avg, ly.units.ge[0], epsilon = 1e-6);
    }

    #[test]
    fn new_state_decays_per_params() {
        let mut ly = Layer::new("t", LayerShape::flat(1), LayerKind::Thal);
        ly.units.act[0] = 0.8;
        ly.units.ge[0] = 0.4;
        ly.new_state();
        assert_relative_eq!(ly.units.act_prv[0], 0.8, epsilon = 1e-6);
        assert_relative_eq!(ly.units.act[0], 0.4, epsilon = 1e-6);
        assert_eq!(ly.units.ge[0], 0.0, "glong decay of 1 clears ge");
    }

    #[test]
    fn unit_vars_include_kind_extras() {
        let ly = Layer::new("h", LayerShape::flat(2), LayerKind::Hidden);
        assert_eq!(ly.unit_var_idx("Burst"), None);
        assert!(ly.unit_var_idx("Act").is_some());
        let vi = ly.unit_var_idx("Ge").unwrap();
        assert_eq!(ly.unit_value_1d(vi, 0), Some(0.0));
        assert_eq!(ly.unit_value_1d(vi, 5), None, "out of range");
    }
}
