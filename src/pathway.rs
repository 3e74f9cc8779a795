//! Pathways — CSR-format synaptic connectivity between two layers.
//!
//! All synapses for sending unit `si` live at `scon_st[si] .. scon_st[si] +
//! scon_n[si]` in the flat `syns` array, with the receiving unit index of
//! each synapse in the parallel `scon_idx` array. This gives cache-friendly
//! iteration during conductance sends — all targets of a sender are
//! contiguous in memory.
//!
//! Conductance transport is split into two steps so the network can iterate
//! with disjoint borrows: `accumulate` reads the sending layer into the
//! pathway-local `g_inc` buffer, and `recv_g_inc` folds that buffer into the
//! receiving layer's raw conductance.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ctxt::CtxtState;
use crate::layer::LayerShape;
use crate::learn::LearnParams;

/// A single synapse.
///
/// `wt` is the effective weight and `lwt` the linear weight used for
/// soft bounding; they track each other here (contrast enhancement belongs
/// to the external weight substrate). `ca_p`/`ca_d` are the synapse calcium
/// cascade, valid as of cycle `ca_t` — decode with `SynCaParams::cur_ca`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Synapse {
    /// Effective weight, [0, 1]. Exactly zero marks a structurally failed
    /// connection that conducts nothing and cannot learn.
    pub wt: f32,
    /// Linear (soft-bounding) weight, [0, 1].
    pub lwt: f32,
    /// Accumulated weight change, applied by `wt_fm_dwt`.
    pub dwt: f32,
    /// Eligibility trace for the trace-based learning rule.
    pub tr: f32,
    /// Fast synapse calcium as of `ca_t`.
    pub ca_p: f32,
    /// Slow synapse calcium as of `ca_t`.
    pub ca_d: f32,
    /// Cycle of the last calcium update.
    pub ca_t: u32,
}

/// Names of the per-synapse variables, for observer access via `syn_value`.
pub const SYN_VARS: &[&str] = &["Wt", "LWt", "DWt", "Tr", "CaP", "CaD"];

/// Connectivity pattern between sender and receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    /// Every sender connects to every receiver.
    Full,
    /// Sender `i` connects to receiver `i`, up to the smaller unit count.
    OneToOne,
    /// Sender pool `p` connects one-to-one to receiver pool `p`, up to the
    /// smaller pool count; within a pool, unit `j` maps to unit `j` up to
    /// the smaller per-pool unit count.
    PoolOneToOne,
}

/// Weight initialization: uniform in `mean ± var`, clamped to [0, 1].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WtInitParams {
    pub mean: f32,
    pub var: f32,
}

impl Default for WtInitParams {
    fn default() -> Self {
        Self { mean: 0.5, var: 0.25 }
    }
}

/// Closed set of pathway kinds. Context pathways carry their own
/// per-receiver accumulator and learning-rule selection.
pub enum PathwayKind {
    Forward,
    Back,
    Ctxt(CtxtState),
}

impl PathwayKind {
    #[inline]
    pub fn is_ctxt(&self) -> bool {
        matches!(self, PathwayKind::Ctxt(_))
    }
}

/// A pathway between two layers.
///
/// Sender/receiver are configured by name and resolved to stable indices
/// once at network build time; all per-cycle code uses the indices only.
pub struct Pathway {
    pub send_name: String,
    pub recv_name: String,
    /// Resolved sending-layer index (valid after build).
    pub send: usize,
    /// Resolved receiving-layer index (valid after build).
    pub recv: usize,
    pub pattern: Pattern,
    /// Overall conductance scaling applied to every send.
    pub scale: f32,
    pub wt_init: WtInitParams,
    pub learn: LearnParams,
    pub kind: PathwayKind,
    /// Disable flag — off pathways neither conduct nor learn.
    pub off: bool,

    /// Per-sender connection counts.
    pub scon_n: Vec<u32>,
    /// Per-sender offsets into `syns`/`scon_idx`.
    pub scon_st: Vec<u32>,
    /// Per-synapse receiving unit index.
    pub scon_idx: Vec<u32>,
    /// Flat synapse array, grouped contiguously by sender.
    pub syns: Vec<Synapse>,
    /// Per-receiver conductance accumulator for the standard send path.
    pub g_inc: Vec<f32>,
}

impl Pathway {
    pub(crate) fn new(send: &str, recv: &str, pattern: Pattern, kind: PathwayKind) -> Self {
        Self {
            send_name: send.to_string(),
            recv_name: recv.to_string(),
            send: usize::MAX,
            recv: usize::MAX,
            pattern,
            scale: 1.0,
            wt_init: WtInitParams::default(),
            learn: LearnParams::default(),
            kind,
            off: false,
            scon_n: Vec::new(),
            scon_st: Vec::new(),
            scon_idx: Vec::new(),
            syns: Vec::new(),
            g_inc: Vec::new(),
        }
    }

    /// Construct the CSR tables for the configured pattern and initialize
    /// weights. Called once at network build, after name resolution.
    pub(crate) fn build(&mut self, send: &LayerShape, recv: &LayerShape, rng: &mut StdRng) {
        let ns = send.total();
        let nr = recv.total();
        let mut edges: Vec<Vec<u32>> = vec![Vec::new(); ns];

        match self.pattern {
            Pattern::Full => {
                for row in edges.iter_mut() {
                    row.extend(0..nr as u32);
                }
            }
            Pattern::OneToOne => {
                for (si, row) in edges.iter_mut().enumerate().take(ns.min(nr)) {
                    row.push(si as u32);
                }
            }
            Pattern::PoolOneToOne => {
                let np = send.pools.min(recv.pools) as usize;
                let nu = send.units.min(recv.units) as usize;
                for p in 0..np {
                    for j in 0..nu {
                        let si = p * send.units as usize + j;
                        let ri = (p * recv.units as usize + j) as u32;
                        edges[si].push(ri);
                    }
                }
            }
        }

        self.scon_n = edges.iter().map(|row| row.len() as u32).collect();
        self.scon_st = Vec::with_capacity(ns);
        let mut st = 0u32;
        for n in &self.scon_n {
            self.scon_st.push(st);
            st += n;
        }
        self.scon_idx = edges.into_iter().flatten().collect();
        self.syns = vec![Synapse::default(); self.scon_idx.len()];
        self.g_inc = vec![0.0; nr];
        if let PathwayKind::Ctxt(ctxt) = &mut self.kind {
            ctxt.ctxt_ge_inc = vec![0.0; nr];
        }
        self.init_wts(rng);
    }

    /// Initialize all weights from `wt_init` (uniform mean ± var, clamped).
    pub fn init_wts(&mut self, rng: &mut StdRng) {
        let WtInitParams { mean, var } = self.wt_init;
        for sy in self.syns.iter_mut() {
            let w = if var > 0.0 {
                (mean + rng.gen_range(-var..=var)).clamp(0.0, 1.0)
            } else {
                mean.clamp(0.0, 1.0)
            };
            *sy = Synapse { wt: w, lwt: w, ..Synapse::default() };
        }
    }

    /// Synapses and receiver indices for one sending unit.
    #[inline]
    pub fn sender_syns(&self, si: usize) -> (&[Synapse], &[u32]) {
        let st = self.scon_st[si] as usize;
        let n = self.scon_n[si] as usize;
        (&self.syns[st..st + n], &self.scon_idx[st..st + n])
    }

    /// Total synapse count.
    #[inline]
    pub fn total_syns(&self) -> usize {
        self.syns.len()
    }

    /// Accumulate the standard conductance send into `g_inc` from the
    /// sending layer's activations. Context pathways opt out of this
    /// mechanism entirely — their transport is `send_ctxt`/`flush`.
    pub(crate) fn accumulate(&mut self, send_act: &[f32]) {
        self.g_inc.fill(0.0);
        if self.off || self.kind.is_ctxt() {
            return;
        }
        for (si, &a) in send_act.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            let sa = self.scale * a;
            let st = self.scon_st[si] as usize;
            let n = self.scon_n[si] as usize;
            for ci in 0..n {
                let ri = self.scon_idx[st + ci] as usize;
                self.g_inc[ri] += sa * self.syns[st + ci].wt;
            }
        }
    }

    /// Fold the accumulated conductance into the receiver's raw excitation.
    pub(crate) fn recv_g_inc(&mut self, recv_ge_raw: &mut [f32]) {
        if self.off || self.kind.is_ctxt() {
            return;
        }
        for (ri, g) in self.g_inc.iter_mut().enumerate() {
            recv_ge_raw[ri] += *g;
            *g = 0.0;
        }
    }

    /// Update per-synapse calcium from sender/receiver fast calcium.
    ///
    /// Gated on sender activity: rows whose sender is below the update
    /// threshold are left stale (their timestamps lag), which is what makes
    /// the decode in `cur_ca` time-lagged.
    pub(crate) fn syn_ca_update(&mut self, send_ca_p: &[f32], recv_ca_p: &[f32], now: u32) {
        if self.off || !self.learn.learn {
            return;
        }
        let cp = self.learn.ca;
        for (si, &scap) in send_ca_p.iter().enumerate() {
            if scap < cp.updt_thr {
                continue;
            }
            let st = self.scon_st[si] as usize;
            let n = self.scon_n[si] as usize;
            for ci in 0..n {
                let ri = self.scon_idx[st + ci] as usize;
                let sy = &mut self.syns[st + ci];
                let (mut p, mut d) = cp.cur_ca(now, sy.ca_t, sy.ca_p, sy.ca_d);
                cp.step(scap * recv_ca_p[ri], &mut p, &mut d);
                sy.ca_p = p;
                sy.ca_d = d;
                sy.ca_t = now;
            }
        }
    }

    /// Consolidate accumulated weight changes into the weights.
    pub fn wt_fm_dwt(&mut self) {
        for sy in self.syns.iter_mut() {
            if sy.dwt != 0.0 {
                sy.lwt = (sy.lwt + sy.dwt).clamp(0.0, 1.0);
                sy.wt = sy.lwt;
                sy.dwt = 0.0;
            }
        }
    }

    /// Flat index of the synapse from `si` to `ri`, if connected.
    pub fn syn_idx(&self, si: usize, ri: usize) -> Option<usize> {
        if si >= self.scon_n.len() {
            return None;
        }
        let st = self.scon_st[si] as usize;
        let n = self.scon_n[si] as usize;
        self.scon_idx[st..st + n]
            .iter()
            .position(|&r| r as usize == ri)
            .map(|ci| st + ci)
    }

    /// Value of a named synapse variable on the connection `si -> ri`.
    /// Returns None if the units are not connected or the name is unknown.
    pub fn syn_value(&self, var: &str, si: usize, ri: usize) -> Option<f32> {
        let sy = &self.syns[self.syn_idx(si, ri)?];
        match var {
            "Wt" => Some(sy.wt),
            "LWt" => Some(sy.lwt),
            "DWt" => Some(sy.dwt),
            "Tr" => Some(sy.tr),
            "CaP" => Some(sy.ca_p),
            "CaD" => Some(sy.ca_d),
            _ => None,
        }
    }

    /// Set a named synapse variable on the connection `si -> ri`.
    /// Setting `Wt` also sets `LWt` to keep the pair consistent.
    pub fn set_syn_value(&mut self, var: &str, si: usize, ri: usize, val: f32) -> bool {
        let Some(idx) = self.syn_idx(si, ri) else {
            return false;
        };
        let sy = &mut self.syns[idx];
        match var {
            "Wt" => {
                sy.wt = val;
                sy.lwt = val;
            }
            "LWt" => sy.lwt = val,
            "DWt" => sy.dwt = val,
            "Tr" => sy.tr = val,
            "CaP" => sy.ca_p = val,
            "CaD" => sy.ca_d = val,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn full_pattern_connects_all_pairs() {
        let mut pj = Pathway::new("a", "b", Pattern::Full, PathwayKind::Forward);
        pj.build(&LayerShape::flat(3), &LayerShape::flat(4), &mut rng());
        assert_eq!(pj.total_syns(), 12);
        assert_eq!(pj.scon_n, vec![4, 4, 4]);
        assert_eq!(pj.scon_st, vec![0, 4, 8]);
        let (_, ris) = pj.sender_syns(1);
        assert_eq!(ris, &[0, 1, 2, 3]);
    }

    #[test]
    fn one_to_one_clips_to_smaller_layer() {
        let mut pj = Pathway::new("a", "b", Pattern::OneToOne, PathwayKind::Forward);
        pj.build(&LayerShape::flat(5), &LayerShape::flat(3), &mut rng());
        assert_eq!(pj.total_syns(), 3);
        assert_eq!(pj.syn_idx(2, 2), Some(2));
        assert_eq!(pj.syn_idx(3, 3), None);
    }

    #[test]
    fn pool_one_to_one_maps_matching_pools() {
        let send = LayerShape::new(3, 2);
        let recv = LayerShape::new(2, 2);
        let mut pj = Pathway::new("a", "b", Pattern::PoolOneToOne, PathwayKind::Forward);
        pj.build(&send, &recv, &mut rng());
        // 2 shared pools x 2 shared units each
        assert_eq!(pj.total_syns(), 4);
        assert_eq!(pj.syn_idx(2, 2), Some(2), "pool 1 unit 0 -> pool 1 unit 0");
        assert_eq!(pj.syn_idx(4, 0), None, "sender pool 2 has no receiver pool");
    }

    #[test]
    fn zero_var_init_gives_exact_mean() {
        let mut pj = Pathway::new("a", "b", Pattern::OneToOne, PathwayKind::Forward);
        pj.wt_init = WtInitParams { mean: 0.8, var: 0.0 };
        pj.build(&LayerShape::flat(2), &LayerShape::flat(2), &mut rng());
        for sy in &pj.syns {
            assert_eq!(sy.wt, 0.8);
            assert_eq!(sy.lwt, 0.8);
        }
    }

    #[test]
    fn init_wts_stays_in_unit_range() {
        let mut pj = Pathway::new("a", "b", Pattern::Full, PathwayKind::Forward);
        pj.wt_init = WtInitParams { mean: 0.9, var: 0.25 };
        pj.build(&LayerShape::flat(8), &LayerShape::flat(8), &mut rng());
        for sy in &pj.syns {
            assert!((0.0..=1.0).contains(&sy.wt));
        }
    }

    #[test]
    fn accumulate_then_recv_moves_conductance() {
        let mut pj = Pathway::new("a", "b", Pattern::OneToOne, PathwayKind::Forward);
        pj.wt_init = WtInitParams { mean: 0.5, var: 0.0 };
        pj.build(&LayerShape::flat(2), &LayerShape::flat(2), &mut rng());
        pj.scale = 2.0;
        pj.accumulate(&[0.4, 0.0]);
        let mut ge_raw = vec![0.0; 2];
        pj.recv_g_inc(&mut ge_raw);
        assert_eq!(ge_raw, vec![2.0 * 0.4 * 0.5, 0.0]);
        assert_eq!(pj.g_inc, vec![0.0, 0.0], "buffer drained");
    }

    #[test]
    fn wt_fm_dwt_soft_clamps_and_clears() {
        let mut pj = Pathway::new("a", "b", Pattern::OneToOne, PathwayKind::Forward);
        pj.wt_init = WtInitParams { mean: 0.9, var: 0.0 };
        pj.build(&LayerShape::flat(1), &LayerShape::flat(1), &mut rng());
        pj.syns[0].dwt = 0.5;
        pj.wt_fm_dwt();
        assert_eq!(pj.syns[0].wt, 1.0, "clamped at ceiling");
        assert_eq!(pj.syns[0].dwt, 0.0);
    }

    #[test]
    fn syn_value_roundtrip() {
        let mut pj = Pathway::new("a", "b", Pattern::Full, PathwayKind::Forward);
        pj.build(&LayerShape::flat(2), &LayerShape::flat(2), &mut rng());
        assert!(pj.set_syn_value("Wt", 1, 1, 0.15));
        assert_eq!(pj.syn_value("Wt", 1, 1), Some(0.15));
        assert_eq!(pj.syn_value("LWt", 1, 1), Some(0.15), "Wt write tracks LWt");
        assert_eq!(pj.syn_value("Bogus", 0, 0), None);
    }

    #[test]
    fn syn_ca_skips_inactive_senders() {
        let mut pj = Pathway::new("a", "b", Pattern::OneToOne, PathwayKind::Forward);
        pj.build(&LayerShape::flat(2), &LayerShape::flat(2), &mut rng());
        pj.syn_ca_update(&[0.5, 0.0], &[0.5, 0.5], 10);
        assert_eq!(pj.syns[0].ca_t, 10, "active sender row updated");
        assert_eq!(pj.syns[1].ca_t, 0, "inactive sender row left stale");
        assert!(pj.syns[0].ca_p > 0.0);
        assert_eq!(pj.syns[1].ca_p, 0.0);
    }
}
