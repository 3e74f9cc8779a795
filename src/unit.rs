//! Unit state — SoA (Structure of Arrays) layout for cache performance.
//!
//! Each per-unit field is stored as a separate contiguous array so that the
//! cycle hot path iterates over dense memory. Specialized layer kinds keep
//! their extra per-unit arrays (burst, context conductance) alongside these
//! in their own kind state; see `layer::LayerKind`.

/// SoA unit storage — each field is a separate contiguous array.
///
/// For N units, each Vec has exactly N elements.
///
/// Fields:
/// - `act`:     rate-coded activation, [0, 1)
/// - `act_prv`: activation at the start of the current trial
/// - `ge_raw`:  raw excitatory conductance accumulated from pathway sends,
///              consumed (zeroed) by each integration step
/// - `ge`:      time-integrated excitatory conductance
/// - `ca_p`:    fast calcium integral of activation (potentiation-driving)
/// - `ca_d`:    slow calcium integral, cascaded from `ca_p` (depression-driving)
/// - `rl_rate`: per-receiver learning-rate factor, default 1
/// - `attn`:    attention modulation overlay, default 1 (fully open)
/// - `off`:     lesion flag — off units are skipped everywhere and
///              contribute nothing to pool statistics
pub struct UnitArrays {
    pub act: Vec<f32>,
    pub act_prv: Vec<f32>,
    pub ge_raw: Vec<f32>,
    pub ge: Vec<f32>,
    pub ca_p: Vec<f32>,
    pub ca_d: Vec<f32>,
    pub rl_rate: Vec<f32>,
    pub attn: Vec<f32>,
    pub off: Vec<bool>,
}

impl UnitArrays {
    /// Allocate arrays for `n` units, all at the initialized (reset) state.
    pub fn new(n: usize) -> Self {
        Self {
            act: vec![0.0; n],
            act_prv: vec![0.0; n],
            ge_raw: vec![0.0; n],
            ge: vec![0.0; n],
            ca_p: vec![0.0; n],
            ca_d: vec![0.0; n],
            rl_rate: vec![1.0; n],
            attn: vec![1.0; n],
            off: vec![false; n],
        }
    }

    /// Number of units.
    #[inline]
    pub fn len(&self) -> usize {
        self.act.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.act.is_empty()
    }

    /// Reset all activation state to initial values. Off flags are preserved.
    pub fn init_acts(&mut self) {
        self.act.fill(0.0);
        self.act_prv.fill(0.0);
        self.ge_raw.fill(0.0);
        self.ge.fill(0.0);
        self.ca_p.fill(0.0);
        self.ca_d.fill(0.0);
        self.rl_rate.fill(1.0);
        self.attn.fill(1.0);
    }

    /// Save current activation as the previous-trial snapshot.
    /// Called once at trial start, before any decay.
    pub fn snapshot_act_prv(&mut self) {
        self.act_prv.copy_from_slice(&self.act);
    }
}

/// Read function for one named per-unit variable.
pub type UnitVarFn = fn(&UnitArrays, usize) -> f32;

/// Enumerated accessor table for the generic per-unit variables.
///
/// Specialized layer kinds append their own variables after these, at a
/// stable index offset equal to `UNIT_VARS.len()`, so observers can
/// enumerate all named variables without special-casing layer types.
pub const UNIT_VARS: &[(&str, UnitVarFn)] = &[
    ("Act", |u, i| u.act[i]),
    ("ActPrv", |u, i| u.act_prv[i]),
    ("GeRaw", |u, i| u.ge_raw[i]),
    ("Ge", |u, i| u.ge[i]),
    ("CaP", |u, i| u.ca_p[i]),
    ("CaD", |u, i| u.ca_d[i]),
    ("RLRate", |u, i| u.rl_rate[i]),
    ("Attn", |u, i| u.attn[i]),
];

/// Index of a generic unit variable by name, if it is one.
pub fn unit_var_idx(name: &str) -> Option<usize> {
    UNIT_VARS.iter().position(|(nm, _)| *nm == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_sized_to_unit_count() {
        let u = UnitArrays::new(17);
        assert_eq!(u.len(), 17);
        assert_eq!(u.act.len(), u.attn.len());
        assert_eq!(u.ca_p.len(), 17);
    }

    #[test]
    fn init_acts_resets_state_but_keeps_off() {
        let mut u = UnitArrays::new(4);
        u.act[1] = 0.7;
        u.ge[2] = 0.3;
        u.attn[3] = 0.2;
        u.off[0] = true;
        u.init_acts();
        assert_eq!(u.act[1], 0.0);
        assert_eq!(u.ge[2], 0.0);
        assert_eq!(u.attn[3], 1.0, "attn resets to fully open");
        assert!(u.off[0], "lesion flags survive init");
    }

    #[test]
    fn accessor_table_reads_named_vars() {
        let mut u = UnitArrays::new(2);
        u.act[1] = 0.42;
        let idx = unit_var_idx("Act").unwrap();
        let (_, f) = UNIT_VARS[idx];
        assert_eq!(f(&u, 1), 0.42);
        assert!(unit_var_idx("Burst").is_none(), "kind vars are not generic");
    }

    #[test]
    fn act_prv_snapshot() {
        let mut u = UnitArrays::new(3);
        u.act.copy_from_slice(&[0.1, 0.2, 0.3]);
        u.snapshot_act_prv();
        u.act[0] = 0.9;
        assert_eq!(u.act_prv, vec![0.1, 0.2, 0.3]);
    }
}
