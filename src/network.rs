//! Network — layer/pathway container, build-time resolution, and the
//! theta-cycle scheduling hooks.
//!
//! Configuration refers to layers by name; `build` resolves every name to a
//! stable index exactly once and freezes capability flags (such as whether
//! a sender produces burst), so the per-cycle loops never touch strings.
//! Build errors split three ways: structural problems fail the build,
//! dangling cross-references degrade to a driverless/targetless layer with
//! a single warning, and transient conditions (an empty flush, an
//! oversized clamp) are silent no-ops.
//!
//! The scheduling contract per trial is:
//! `new_state` -> `cycle` x N (minus phase) -> `plus_phase_start` ->
//! `cycle` x N (plus phase) -> `trial_end`.

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::attn::AttnState;
use crate::burst::SuperState;
use crate::ct::CtState;
use crate::ctxt::{CtxtLearnRule, CtxtState};
use crate::layer::{Layer, LayerKind, LayerShape};
use crate::pathway::{Pathway, PathwayKind, Pattern, WtInitParams};
use crate::relay::{DriverRef, RelayState};

/// Structural configuration errors surfaced by `build`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("duplicate layer name {0:?}")]
    DuplicateLayer(String),
    #[error("layer {0:?} has no units")]
    EmptyLayer(String),
    #[error("pathway references unknown layer {name:?} ({end} end)")]
    UnknownLayer { name: String, end: &'static str },
    #[error("relay layer {0:?} names itself as driver")]
    SelfDriver(String),
}

/// Simulation clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct Time {
    /// Total cycles since network init; drives calcium timestamps.
    pub cycle: u32,
    /// Cycles within the current phase.
    pub phase_cycle: u32,
    /// Completed trials.
    pub trial: u32,
    /// True between `plus_phase_start` and `trial_end`.
    pub plus_phase: bool,
}

/// The full cortico-thalamic circuit.
pub struct Network {
    pub name: String,
    pub layers: Vec<Layer>,
    pub pathways: Vec<Pathway>,
    pub time: Time,
    seed: u64,
    built: bool,
}

impl Network {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layers: Vec::new(),
            pathways: Vec::new(),
            time: Time::default(),
            seed: 0,
            built: false,
        }
    }

    /// Weight-init RNG seed; identical seeds give identical networks.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn layer_idx(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layer_idx(name).map(|i| &self.layers[i])
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        let i = self.layer_idx(name)?;
        Some(&mut self.layers[i])
    }

    /// Add a layer with an already-sized kind; returns its index.
    pub fn add_layer(&mut self, name: &str, shape: LayerShape, kind: LayerKind) -> usize {
        self.layers.push(Layer::new(name, shape, kind));
        self.layers.len() - 1
    }

    pub fn add_input(&mut self, name: &str, shape: LayerShape) -> usize {
        self.add_layer(name, shape, LayerKind::Input)
    }

    pub fn add_hidden(&mut self, name: &str, shape: LayerShape) -> usize {
        self.add_layer(name, shape, LayerKind::Hidden)
    }

    pub fn add_super(&mut self, name: &str, shape: LayerShape) -> usize {
        let kind = LayerKind::Super(SuperState::new(shape.total()));
        self.add_layer(name, shape, kind)
    }

    pub fn add_ct(&mut self, name: &str, shape: LayerShape) -> usize {
        let kind = LayerKind::Ct(CtState::new(shape.total()));
        self.add_layer(name, shape, kind)
    }

    /// Add a driver-gated relay layer; `driver` is resolved at build.
    pub fn add_relay(&mut self, name: &str, shape: LayerShape, driver: Option<&str>) -> usize {
        let mut st = RelayState::new(shape.total());
        st.driver = driver.map(DriverRef::named);
        self.add_layer(name, shape, LayerKind::Relay(st))
    }

    pub fn add_thal(&mut self, name: &str, shape: LayerShape) -> usize {
        self.add_layer(name, shape, LayerKind::Thal)
    }

    /// Add an attention layer broadcasting to the named targets.
    pub fn add_attn(&mut self, name: &str, shape: LayerShape, to_lays: &[&str]) -> usize {
        let npools = if shape.pooled() { shape.pools as usize } else { 1 };
        let mut st = AttnState::new(npools);
        st.params.to_lays = to_lays.iter().map(|s| s.to_string()).collect();
        self.add_layer(name, shape, LayerKind::Attn(st))
    }

    /// Connect two layers with a standard conductance pathway. Standard
    /// pathways do not learn here; only context pathways carry plasticity.
    pub fn connect(&mut self, send: &str, recv: &str, pattern: Pattern) -> &mut Pathway {
        let mut pj = Pathway::new(send, recv, pattern, PathwayKind::Forward);
        pj.learn.learn = false;
        self.push_pathway(pj)
    }

    /// Connect with a top-down (back) pathway, conventionally weaker.
    pub fn connect_back(&mut self, send: &str, recv: &str, pattern: Pattern) -> &mut Pathway {
        let mut pj = Pathway::new(send, recv, pattern, PathwayKind::Back);
        pj.learn.learn = false;
        pj.scale = 0.2;
        self.push_pathway(pj)
    }

    /// Connect a context pathway into a context-integrating layer.
    pub fn connect_ctxt(
        &mut self,
        send: &str,
        recv: &str,
        pattern: Pattern,
        rule: CtxtLearnRule,
    ) -> &mut Pathway {
        let pj = Pathway::new(send, recv, pattern, PathwayKind::Ctxt(CtxtState::new(rule)));
        self.push_pathway(pj)
    }

    fn push_pathway(&mut self, pj: Pathway) -> &mut Pathway {
        self.pathways.push(pj);
        let i = self.pathways.len() - 1;
        &mut self.pathways[i]
    }

    /// Add a super layer paired with its CT layer: a fixed one-to-one
    /// burst conduit (context pathway, not learning) plus a fixed-weight
    /// one-to-one forward pathway. Learning context pathways are the
    /// non-super lateral ones, wired explicitly via `connect_ctxt`.
    pub fn add_super_ct(&mut self, name: &str, shape: LayerShape) -> (usize, usize) {
        let su = self.add_super(name, shape);
        let ct_name = format!("{name}CT");
        let ct = self.add_ct(&ct_name, shape);
        // build() fixes the from-super conduit (learn off, weights 0.8)
        self.connect_ctxt(name, &ct_name, Pattern::OneToOne, CtxtLearnRule::Trace);
        self.connect(name, &ct_name, Pattern::OneToOne).wt_init =
            WtInitParams { mean: 0.8, var: 0.0 };
        (su, ct)
    }

    /// `add_super_ct` plus a relay driven by the super layer, with the CT
    /// layer projecting to the relay and the relay feeding back.
    pub fn add_super_ct_relay(&mut self, name: &str, shape: LayerShape) -> (usize, usize, usize) {
        let (su, ct) = self.add_super_ct(name, shape);
        let p_name = format!("{name}P");
        let ct_name = format!("{name}CT");
        let pv = self.add_relay(&p_name, shape, Some(name));
        self.connect(&ct_name, &p_name, Pattern::Full);
        self.connect_back(&p_name, name, Pattern::Full);
        self.connect_back(&p_name, &ct_name, Pattern::Full);
        (su, ct, pv)
    }

    /// Resolve all names, validate structure, build connectivity, and
    /// initialize weights. Must be called once before running.
    pub fn build(&mut self) -> Result<(), BuildError> {
        for (i, ly) in self.layers.iter().enumerate() {
            if ly.is_empty() {
                return Err(BuildError::EmptyLayer(ly.name.clone()));
            }
            if self.layers[..i].iter().any(|o| o.name == ly.name) {
                return Err(BuildError::DuplicateLayer(ly.name.clone()));
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        for pi in 0..self.pathways.len() {
            let (send_name, recv_name) =
                (self.pathways[pi].send_name.clone(), self.pathways[pi].recv_name.clone());
            let send = self.layer_idx(&send_name).ok_or(BuildError::UnknownLayer {
                name: send_name.clone(),
                end: "send",
            })?;
            let recv = self.layer_idx(&recv_name).ok_or(BuildError::UnknownLayer {
                name: recv_name.clone(),
                end: "recv",
            })?;
            let pj = &mut self.pathways[pi];
            pj.send = send;
            pj.recv = recv;
            let from_super = self.layers[send].kind.is_super();
            if from_super && self.pathways[pi].kind.is_ctxt() {
                // fixed burst conduit: no plasticity, uniform strong weights
                self.pathways[pi].learn.learn = false;
                self.pathways[pi].wt_init = WtInitParams { mean: 0.8, var: 0.0 };
            }
            if let PathwayKind::Ctxt(c) = &mut self.pathways[pi].kind {
                c.from_super = from_super;
                if !matches!(self.layers[recv].kind, LayerKind::Ct(_)) {
                    warn!(
                        "[build] {}: context pathway {} -> {} ends on a {} layer; flush will be dropped",
                        self.name,
                        send_name,
                        recv_name,
                        self.layers[recv].kind.tag()
                    );
                }
            }
            let (s_shape, r_shape) = (self.layers[send].shape, self.layers[recv].shape);
            self.pathways[pi].build(&s_shape, &r_shape, &mut rng);
        }

        self.resolve_drivers()?;
        self.resolve_attn_targets();
        self.built = true;
        debug!(
            "[build] {}: {} layers, {} pathways, {} synapses",
            self.name,
            self.layers.len(),
            self.pathways.len(),
            self.pathways.iter().map(|p| p.total_syns()).sum::<usize>()
        );
        Ok(())
    }

    fn resolve_drivers(&mut self) -> Result<(), BuildError> {
        for li in 0..self.layers.len() {
            let (ly_name, drv_name) = {
                let ly = &self.layers[li];
                let LayerKind::Relay(r) = &ly.kind else { continue };
                let Some(d) = &r.driver else { continue };
                (ly.name.clone(), d.name.clone())
            };
            if drv_name == ly_name {
                return Err(BuildError::SelfDriver(ly_name));
            }
            let resolved = self.layer_idx(&drv_name);
            let is_super = resolved.map(|di| self.layers[di].kind.is_super()).unwrap_or(false);
            if resolved.is_none() {
                warn!(
                    "[build] {}: relay {} driver {:?} not found; running driverless",
                    self.name, ly_name, drv_name
                );
            }
            if let LayerKind::Relay(r) = &mut self.layers[li].kind {
                if let Some(d) = r.driver.as_mut() {
                    d.idx = resolved.map(|i| i as u32);
                    d.is_super = is_super;
                }
            }
        }
        Ok(())
    }

    fn resolve_attn_targets(&mut self) {
        for li in 0..self.layers.len() {
            let (ly_name, names) = {
                let ly = &self.layers[li];
                let LayerKind::Attn(a) = &ly.kind else { continue };
                (ly.name.clone(), a.params.to_lays.clone())
            };
            let mut targets = Vec::with_capacity(names.len());
            for name in &names {
                match self.layer_idx(name) {
                    Some(ti) if ti != li => targets.push(ti as u32),
                    Some(_) => warn!(
                        "[build] {}: attention layer {} targets itself; dropped",
                        self.name, ly_name
                    ),
                    None => warn!(
                        "[build] {}: attention target {:?} of {} not found; dropped",
                        self.name, name, ly_name
                    ),
                }
            }
            if let LayerKind::Attn(a) = &mut self.layers[li].kind {
                a.targets = targets;
            }
        }
    }

    /// Reset all dynamic state (activations, calcium, clocks) without
    /// touching weights. Synapse calcium timestamps restart with the clock.
    pub fn init_state(&mut self) {
        for ly in self.layers.iter_mut() {
            ly.init_state();
        }
        for pj in self.pathways.iter_mut() {
            for sy in pj.syns.iter_mut() {
                sy.tr = 0.0;
                sy.ca_p = 0.0;
                sy.ca_d = 0.0;
                sy.ca_t = 0;
            }
        }
        self.time = Time::default();
    }

    /// Re-randomize all pathway weights from the configured seed.
    pub fn init_weights(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        for pj in self.pathways.iter_mut() {
            pj.init_wts(&mut rng);
        }
    }

    /// Clamp external input onto a named layer. Unknown names and length
    /// mismatches degrade silently (values clip to the layer size).
    pub fn apply_ext(&mut self, name: &str, vals: &[f32]) {
        if let Some(ly) = self.layer_mut(name) {
            ly.apply_ext(vals);
        }
    }

    /// Start a new trial: snapshot previous activations, decay state, and
    /// reset the phase clock.
    pub fn new_state(&mut self) {
        for ly in self.layers.iter_mut() {
            ly.new_state();
            if let Some(r) = ly.kind.as_relay_mut() {
                r.clear_snapshot();
            }
        }
        self.time.plus_phase = false;
        self.time.phase_cycle = 0;
    }

    /// One update cycle: conductance transport, integration, inhibition,
    /// activation, then post-activation bookkeeping (burst, attention,
    /// synapse calcium).
    pub fn cycle(&mut self) {
        debug_assert!(self.built, "build() must run before cycling");
        let Network { layers, pathways, time, .. } = self;

        for pj in pathways.iter_mut() {
            let si = pj.send;
            pj.accumulate(&layers[si].units.act);
        }
        for pj in pathways.iter_mut() {
            let ri = pj.recv;
            pj.recv_g_inc(&mut layers[ri].units.ge_raw);
        }

        let plus = time.plus_phase;
        for ly in layers.iter_mut() {
            ly.ge_integrate();
            ly.inhib_update(plus);
            ly.act_update(plus);
            if plus {
                ly.burst_update();
            }
        }

        Self::attention_pass(layers);

        for pj in pathways.iter_mut() {
            if !pj.learn.learn {
                continue;
            }
            let (si, ri) = (pj.send, pj.recv);
            pj.syn_ca_update(&layers[si].units.ca_p, &layers[ri].units.ca_p, time.cycle);
        }

        time.cycle += 1;
        time.phase_cycle += 1;
    }

    /// Recompute attention factors and overlay them onto resolved targets.
    fn attention_pass(layers: &mut [Layer]) {
        for ai in 0..layers.len() {
            {
                let Layer { kind, pools, shape, .. } = &mut layers[ai];
                let LayerKind::Attn(a) = kind else { continue };
                a.compute(pools, shape.pooled());
            }
            let targets = match &layers[ai].kind {
                LayerKind::Attn(a) => a.targets.clone(),
                _ => continue,
            };
            for ti in targets {
                let (tgt, src) = pair_mut(layers, ti as usize, ai);
                if let LayerKind::Attn(a) = &src.kind {
                    a.apply_to(tgt);
                }
            }
        }
    }

    /// Minus-to-plus boundary. Barriers run in order: burst snapshot and
    /// recompute, driver snapshots, all context sends, all context
    /// flushes. Each stage completes across the whole network before the
    /// next starts.
    pub fn plus_phase_start(&mut self) {
        let Network { layers, pathways, time, .. } = self;

        for ly in layers.iter_mut() {
            ly.burst_snapshot();
            ly.burst_update();
        }

        for ri in 0..layers.len() {
            let di = match &layers[ri].kind {
                LayerKind::Relay(r) => match (&r.driver, r.gating()) {
                    (Some(d), true) => d.idx.map(|i| i as usize),
                    _ => None,
                },
                _ => continue,
            };
            match di {
                Some(di) => {
                    let (rly, dly) = pair_mut(layers, ri, di);
                    if let Some(r) = rly.kind.as_relay_mut() {
                        r.snapshot(dly);
                    }
                }
                None => {
                    if let Some(r) = layers[ri].kind.as_relay_mut() {
                        r.clear_snapshot();
                    }
                }
            }
        }

        for ly in layers.iter_mut() {
            if let LayerKind::Ct(ct) = &mut ly.kind {
                ct.begin_ctxt();
            }
        }

        for pj in pathways.iter_mut() {
            let from_super = match &pj.kind {
                PathwayKind::Ctxt(c) => c.from_super,
                _ => continue,
            };
            let sly = &layers[pj.send];
            match (from_super, sly.kind.as_super()) {
                (true, Some(s)) => pj.send_ctxt(&s.burst),
                _ => pj.send_ctxt(&sly.units.act),
            }
        }
        for pj in pathways.iter_mut() {
            let ri = pj.recv;
            pj.ctxt_fm_ge_inc(&mut layers[ri]);
        }

        time.plus_phase = true;
        time.phase_cycle = 0;
    }

    /// End of trial: accumulate context-pathway weight changes against the
    /// plus/minus calcium contrast, then consolidate weights.
    pub fn trial_end(&mut self) {
        let Network { layers, pathways, time, .. } = self;
        for pj in pathways.iter_mut() {
            let from_super = match &pj.kind {
                PathwayKind::Ctxt(c) => c.from_super,
                _ => continue,
            };
            let sly = &layers[pj.send];
            let send_prv: &[f32] = match (from_super, sly.kind.as_super()) {
                (true, Some(s)) => &s.burst_prv,
                _ => &sly.units.act_prv,
            };
            let ru = &layers[pj.recv].units;
            pj.dwt_ctxt(send_prv, ru, time.cycle);
        }
        for pj in pathways.iter_mut() {
            if pj.learn.learn {
                pj.wt_fm_dwt();
            }
        }
        time.trial += 1;
    }

    /// Convenience: run a full theta-cycle trial with `n` cycles per phase.
    pub fn trial(&mut self, cycles_per_phase: u32) {
        self.new_state();
        for _ in 0..cycles_per_phase {
            self.cycle();
        }
        self.plus_phase_start();
        for _ in 0..cycles_per_phase {
            self.cycle();
        }
        self.trial_end();
    }

    /// Named synapse variable on the connection `si -> ri` of the pathway
    /// between two named layers.
    pub fn syn_value(&self, send: &str, recv: &str, var: &str, si: usize, ri: usize) -> Option<f32> {
        let s = self.layer_idx(send)?;
        let r = self.layer_idx(recv)?;
        self.pathways
            .iter()
            .find(|p| p.send == s && p.recv == r && p.kind.is_ctxt())
            .or_else(|| self.pathways.iter().find(|p| p.send == s && p.recv == r))
            .and_then(|p| p.syn_value(var, si, ri))
    }
}

/// Split-borrow two distinct layers: the first mutably, the second shared.
fn pair_mut(layers: &mut [Layer], a: usize, b: usize) -> (&mut Layer, &Layer) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = layers.split_at_mut(b);
        (&mut lo[a], &hi[0])
    } else {
        let (lo, hi) = layers.split_at_mut(a);
        (&mut hi[0], &lo[b])
    }
}
