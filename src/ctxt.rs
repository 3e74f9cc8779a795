//! Context pathways — burst-driven input to context-integrating layers.
//!
//! A context pathway opts out of the standard per-cycle conductance send
//! entirely. Instead it transports once per theta cycle, at the minus-to-
//! plus boundary: `send_ctxt` accumulates sender burst into the pathway's
//! per-receiver buffer, and `ctxt_fm_ge_inc` flushes that buffer into the
//! receiving layer's context excitation. Flushing an empty buffer is a
//! no-op, so the flush is idempotent within a cycle.
//!
//! Two learning rules are available. The trace rule follows the synapse
//! calcium cascade through an eligibility trace; the no-trace rule is a
//! plain contrastive rule driven directly by the sender's previous-cycle
//! burst. Both learn against the receiver's plus/minus calcium contrast.

use serde::{Deserialize, Serialize};

use crate::layer::{Layer, LayerKind};
use crate::learn::{chl_dwt, soft_bound};
use crate::pathway::{Pathway, PathwayKind};
use crate::unit::UnitArrays;

/// Gate on sending values: below this, a sender contributes no context.
pub const CTXT_SEND_THR: f32 = 0.1;

/// Learning rule selection for context pathways.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtxtLearnRule {
    /// Synapse-calcium eligibility trace (default).
    #[default]
    Trace,
    /// Direct contrastive rule on the sender's previous-cycle signal.
    NoTrace,
}

/// Per-pathway context state.
pub struct CtxtState {
    pub rule: CtxtLearnRule,
    /// Resolved at build: sender produces burst rather than plain act.
    pub from_super: bool,
    /// Per-receiver context accumulator, drained by the flush.
    pub ctxt_ge_inc: Vec<f32>,
}

impl CtxtState {
    pub fn new(rule: CtxtLearnRule) -> Self {
        Self { rule, from_super: false, ctxt_ge_inc: Vec::new() }
    }
}

impl Pathway {
    /// Accumulate sender context values into the per-receiver buffer.
    /// `send_vals` is burst for super senders, plain act otherwise.
    /// Senders at or below the send gate contribute nothing.
    pub(crate) fn send_ctxt(&mut self, send_vals: &[f32]) {
        if self.off {
            return;
        }
        let scale = self.scale;
        let (syns, scon_st, scon_n, scon_idx) =
            (&self.syns, &self.scon_st, &self.scon_n, &self.scon_idx);
        let PathwayKind::Ctxt(ctxt) = &mut self.kind else {
            return;
        };
        for (si, &v) in send_vals.iter().enumerate() {
            if v <= CTXT_SEND_THR {
                continue;
            }
            let sv = scale * v;
            let st = scon_st[si] as usize;
            let n = scon_n[si] as usize;
            for ci in 0..n {
                let ri = scon_idx[st + ci] as usize;
                ctxt.ctxt_ge_inc[ri] += sv * syns[st + ci].wt;
            }
        }
    }

    /// Flush accumulated context into the receiving layer's context
    /// excitation and drain the buffer. Soft no-op when the receiver is
    /// not a context-integrating layer (logged once at build).
    pub(crate) fn ctxt_fm_ge_inc(&mut self, recv: &mut Layer) {
        let PathwayKind::Ctxt(ctxt) = &mut self.kind else {
            return;
        };
        let LayerKind::Ct(ct) = &mut recv.kind else {
            for g in ctxt.ctxt_ge_inc.iter_mut() {
                *g = 0.0;
            }
            return;
        };
        for (ri, g) in ctxt.ctxt_ge_inc.iter_mut().enumerate() {
            ct.ctxt_ge[ri] += *g;
            *g = 0.0;
        }
    }

    /// Accumulate weight changes for a context pathway at trial end.
    ///
    /// `send_prv` is the sender's previous-cycle signal (burst for super
    /// senders, previous act otherwise); `ru` is the receiving layer's unit
    /// state; `now` is the current cycle for calcium timestamp decode.
    pub(crate) fn dwt_ctxt(&mut self, send_prv: &[f32], ru: &UnitArrays, now: u32) {
        if self.off || !self.learn.learn {
            return;
        }
        let rule = match &self.kind {
            PathwayKind::Ctxt(c) => c.rule,
            _ => return,
        };
        match rule {
            CtxtLearnRule::Trace => self.dwt_ctxt_trace(ru, now),
            CtxtLearnRule::NoTrace => self.dwt_ctxt_no_trace(send_prv, ru),
        }
    }

    /// Trace rule: the synapse calcium cascade feeds an eligibility trace,
    /// and the trace gates the receiver's plus/minus calcium contrast.
    /// Zero-weight synapses keep their trace current but never change.
    fn dwt_ctxt_trace(&mut self, ru: &UnitArrays, now: u32) {
        let lrate = self.learn.lrate;
        let cp = self.learn.ca;
        let tp = self.learn.trace;
        for si in 0..self.scon_n.len() {
            let st = self.scon_st[si] as usize;
            let n = self.scon_n[si] as usize;
            for ci in 0..n {
                let ri = self.scon_idx[st + ci] as usize;
                let sy = &mut self.syns[st + ci];
                let (_, ca_d) = cp.cur_ca(now, sy.ca_t, sy.ca_p, sy.ca_d);
                sy.tr = tp.tr_fm_ca(sy.tr, ca_d);
                if sy.wt == 0.0 {
                    continue;
                }
                let err = soft_bound(sy.tr * (ru.ca_p[ri] - ru.ca_d[ri]), sy.lwt);
                sy.dwt += ru.rl_rate[ri] * lrate * err;
            }
        }
    }

    /// No-trace rule: plain contrastive learning with the sender side held
    /// at the previous-cycle signal for both phases.
    fn dwt_ctxt_no_trace(&mut self, send_prv: &[f32], ru: &UnitArrays) {
        let lrate = self.learn.lrate;
        for (si, &sact) in send_prv.iter().enumerate() {
            let st = self.scon_st[si] as usize;
            let n = self.scon_n[si] as usize;
            for ci in 0..n {
                let ri = self.scon_idx[st + ci] as usize;
                let sy = &mut self.syns[st + ci];
                let err = soft_bound(chl_dwt(sact, sact, ru.ca_p[ri], ru.ca_d[ri]), sy.lwt);
                sy.dwt += lrate * err;
            }
        }
    }
}
