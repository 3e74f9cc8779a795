//! Synaptic learning parameters — traces, calcium decode, soft bounding.
//!
//! The context pathway learning rules (see `ctxt`) are built from three
//! pieces kept here: a synapse-local eligibility trace updated by a fixed
//! mixing function, a time-lagged decode of the per-synapse calcium cascade
//! (synapses are only touched while their sender is active, so reading one
//! requires decaying it forward from its last-update timestamp), and
//! soft-bound scaling of the error term by the linear weight.

use serde::{Deserialize, Serialize};

/// Eligibility-trace parameters for the trace-based learning rule.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TraceParams {
    /// Time constant (in trials) for integrating the trace. Rate = 1/tau.
    pub tau: f32,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self { tau: 1.0 }
    }
}

impl TraceParams {
    #[inline]
    pub fn dt(&self) -> f32 {
        1.0 / self.tau
    }

    /// Updated trace as a mixing of the prior trace and a calcium factor:
    /// `tr += dt * (ca - tr)`.
    #[inline]
    pub fn tr_fm_ca(&self, tr: f32, ca: f32) -> f32 {
        tr + self.dt() * (ca - tr)
    }
}

/// Per-synapse calcium cascade parameters.
///
/// Synapse calcium is driven by the product of sender and receiver fast
/// calcium, integrated through a fast (`p`, potentiation) and a slow
/// (`d`, depression) stage. Updates are gated on sender activity, so a
/// synapse's stored values can be stale; `cur_ca` decays them forward to
/// the current cycle before use.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SynCaParams {
    /// Time constant (cycles) for the fast calcium stage.
    pub p_tau: f32,
    /// Time constant (cycles) for the slow calcium stage.
    pub d_tau: f32,
    /// Sender fast-calcium level below which synapse calcium is not updated.
    pub updt_thr: f32,
}

impl Default for SynCaParams {
    fn default() -> Self {
        Self {
            p_tau: 10.0,
            d_tau: 40.0,
            updt_thr: 0.01,
        }
    }
}

impl SynCaParams {
    #[inline]
    pub fn p_dt(&self) -> f32 {
        1.0 / self.p_tau
    }

    #[inline]
    pub fn d_dt(&self) -> f32 {
        1.0 / self.d_tau
    }

    /// One integration step from a drive value.
    #[inline]
    pub fn step(&self, drive: f32, ca_p: &mut f32, ca_d: &mut f32) {
        *ca_p += self.p_dt() * (drive - *ca_p);
        *ca_d += self.d_dt() * (*ca_p - *ca_d);
    }

    /// Decode the current value of a stored calcium pair that was last
    /// updated at cycle `ca_t`, decaying each stage forward by the elapsed
    /// cycles (zero drive assumed over the gap).
    pub fn cur_ca(&self, now: u32, ca_t: u32, ca_p: f32, ca_d: f32) -> (f32, f32) {
        let elapsed = now.saturating_sub(ca_t);
        if elapsed == 0 {
            return (ca_p, ca_d);
        }
        let pf = (1.0 - self.p_dt()).powi(elapsed as i32);
        let df = (1.0 - self.d_dt()).powi(elapsed as i32);
        (ca_p * pf, ca_d * df)
    }
}

/// Learning parameters for one pathway.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LearnParams {
    /// Master enable. When false, the weight-change step is a no-op.
    pub learn: bool,
    /// Base learning rate.
    pub lrate: f32,
    pub trace: TraceParams,
    pub ca: SynCaParams,
}

impl Default for LearnParams {
    fn default() -> Self {
        Self {
            learn: true,
            lrate: 0.04,
            trace: TraceParams::default(),
            ca: SynCaParams::default(),
        }
    }
}

/// Contrastive-Hebbian error component from sender/receiver fast (`p`)
/// and slow (`d`) signals: `su_p*ru_p - su_d*ru_d`.
#[inline]
pub fn chl_dwt(su_p: f32, su_d: f32, ru_p: f32, ru_d: f32) -> f32 {
    su_p * ru_p - su_d * ru_d
}

/// Soft-bound an error term by the linear weight: positive changes scale by
/// the headroom `(1 - lwt)`, negative changes by `lwt`.
#[inline]
pub fn soft_bound(err: f32, lwt: f32) -> f32 {
    if err > 0.0 {
        err * (1.0 - lwt)
    } else {
        err * lwt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn trace_mixes_toward_ca() {
        let tp = TraceParams { tau: 2.0 };
        let tr = tp.tr_fm_ca(0.0, 1.0);
        assert_relative_eq!(tr, 0.5);
        let tr2 = tp.tr_fm_ca(tr, 1.0);
        assert_relative_eq!(tr2, 0.75);
    }

    #[test]
    fn trace_tau_one_tracks_exactly() {
        let tp = TraceParams::default();
        assert_relative_eq!(tp.tr_fm_ca(0.3, 0.9), 0.9);
    }

    #[test]
    fn cur_ca_decays_by_elapsed_cycles() {
        let cp = SynCaParams::default();
        let (p0, d0) = cp.cur_ca(100, 100, 0.8, 0.4);
        assert_eq!((p0, d0), (0.8, 0.4), "no elapsed time, no decay");

        let (p1, _) = cp.cur_ca(101, 100, 0.8, 0.4);
        assert_relative_eq!(p1, 0.8 * (1.0 - cp.p_dt()));

        let (p5, d5) = cp.cur_ca(105, 100, 0.8, 0.4);
        assert!(p5 < p1, "more elapsed cycles, more decay");
        assert!(d5 < 0.4 && d5 > 0.0);
    }

    #[test]
    fn chl_sign_follows_fast_minus_slow() {
        assert!(chl_dwt(0.5, 0.5, 0.8, 0.2) > 0.0);
        assert!(chl_dwt(0.5, 0.5, 0.2, 0.8) < 0.0);
        assert_eq!(chl_dwt(0.0, 0.0, 0.9, 0.1), 0.0);
    }

    #[test]
    fn soft_bound_scales_by_headroom() {
        assert_relative_eq!(soft_bound(1.0, 0.8), 0.2);
        assert_relative_eq!(soft_bound(-1.0, 0.8), -0.8);
        assert_eq!(soft_bound(1.0, 1.0), 0.0, "saturated weight cannot grow");
        assert_eq!(soft_bound(-1.0, 0.0), 0.0, "floored weight cannot shrink");
    }
}
