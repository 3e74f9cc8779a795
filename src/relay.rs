//! Driver-gated relay ("pulvinar"-style) layer state.
//!
//! A relay layer optionally names a driver layer. At the start of each plus
//! phase the relay snapshots the driver once: a scalar inhibition factor
//! from the driver's peak activation, and a per-unit drive conductance.
//! During plus-phase cycles the snapshot gates the relay's own excitation
//! (see `Layer::ge_eff`): strong drivers suppress the relay's other inputs
//! and substitute their own signal. With drivers off or no driver resolved,
//! the relay follows the plain excitation path exactly.

use serde::{Deserialize, Serialize};

use crate::layer::Layer;

/// Relay gating parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RelayParams {
    /// Disable driver gating entirely (for lesion-style comparisons).
    pub drivers_off: bool,
    /// Conductance contributed per unit of driver signal.
    pub drive_scale: f32,
    /// Driver peak activation that fully suppresses other inputs.
    pub full_drive_act: f32,
}

impl Default for RelayParams {
    fn default() -> Self {
        Self { drivers_off: false, drive_scale: 0.05, full_drive_act: 0.6 }
    }
}

/// Reference to a driver layer, configured by name and resolved at build.
pub struct DriverRef {
    pub name: String,
    /// Resolved layer index; None if the name did not resolve (soft error,
    /// logged once at build — the relay then behaves as driverless).
    pub idx: Option<u32>,
    /// Capability flag resolved at build: driver produces burst.
    pub is_super: bool,
}

impl DriverRef {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string(), idx: None, is_super: false }
    }
}

/// Per-layer relay state.
pub struct RelayState {
    pub params: RelayParams,
    pub driver: Option<DriverRef>,
    /// Snapshot: scalar suppression of non-driver excitation, [0, 1].
    pub drv_inhib: f32,
    /// Snapshot: per-unit driver conductance.
    pub drive_ge: Vec<f32>,
}

impl RelayState {
    pub fn new(n: usize) -> Self {
        Self {
            params: RelayParams::default(),
            driver: None,
            drv_inhib: 0.0,
            drive_ge: vec![0.0; n],
        }
    }

    /// Whether driver gating is in effect this run.
    #[inline]
    pub fn gating(&self) -> bool {
        !self.params.drivers_off && matches!(&self.driver, Some(d) if d.idx.is_some())
    }

    /// Driver signal for one driver unit: burst for super drivers, plain
    /// activation otherwise. The same accessor serves both the per-unit
    /// drive and any aggregate use, with no normalization in between.
    #[inline]
    pub fn drive_act(dly: &Layer, is_super: bool, dni: usize) -> f32 {
        match (&dly.kind, is_super) {
            (crate::layer::LayerKind::Super(s), true) => s.burst[dni],
            _ => dly.units.act[dni],
        }
    }

    /// Take the plus-phase snapshot from the driver layer. Driver units map
    /// one-to-one onto relay units, clipped to the shorter of the two.
    pub fn snapshot(&mut self, dly: &Layer) {
        if !self.gating() {
            self.drv_inhib = 0.0;
            self.drive_ge.fill(0.0);
            return;
        }
        let is_super = self.driver.as_ref().map(|d| d.is_super).unwrap_or(false);
        self.drv_inhib = (dly.pools[0].act_max / self.params.full_drive_act).min(1.0);
        let n = self.drive_ge.len().min(dly.len());
        for dni in 0..n {
            self.drive_ge[dni] = self.params.drive_scale * Self::drive_act(dly, is_super, dni);
        }
        for g in self.drive_ge[n..].iter_mut() {
            *g = 0.0;
        }
    }

    /// Clear the snapshot at the start of a new trial.
    pub fn clear_snapshot(&mut self) {
        self.drv_inhib = 0.0;
        self.drive_ge.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::SuperState;
    use crate::layer::{LayerKind, LayerShape};
    use approx::assert_relative_eq;

    fn driver_layer(acts: &[f32]) -> Layer {
        let mut ly = Layer::new("drv", LayerShape::flat(acts.len() as u32), LayerKind::Hidden);
        ly.units.act.copy_from_slice(acts);
        ly.act_stats();
        ly
    }

    fn resolved(n: usize) -> RelayState {
        let mut r = RelayState::new(n);
        let mut d = DriverRef::named("drv");
        d.idx = Some(0);
        r.driver = Some(d);
        r
    }

    #[test]
    fn snapshot_scales_inhibition_by_peak() {
        let mut r = resolved(2);
        let dly = driver_layer(&[0.3, 0.1]);
        r.snapshot(&dly);
        // 0.3 / 0.6 full-drive point
        assert_relative_eq!(r.drv_inhib, 0.5);
        assert_relative_eq!(r.drive_ge[0], 0.05 * 0.3);
        assert_relative_eq!(r.drive_ge[1], 0.05 * 0.1);
    }

    #[test]
    fn inhibition_saturates_at_one() {
        let mut r = resolved(1);
        let dly = driver_layer(&[0.9]);
        r.snapshot(&dly);
        assert_eq!(r.drv_inhib, 1.0);
    }

    #[test]
    fn super_driver_contributes_burst_not_act() {
        let mut r = resolved(2);
        if let Some(d) = r.driver.as_mut() {
            d.is_super = true;
        }
        let mut dly = Layer::new("sup", LayerShape::flat(2), LayerKind::Super(SuperState::new(2)));
        dly.units.act = vec![0.8, 0.5];
        if let LayerKind::Super(s) = &mut dly.kind {
            s.burst = vec![0.8, 0.0]; // second unit sub-threshold
        }
        dly.act_stats();
        r.snapshot(&dly);
        assert_relative_eq!(r.drive_ge[0], 0.05 * 0.8);
        assert_eq!(r.drive_ge[1], 0.0, "non-bursting driver unit drives nothing");
    }

    #[test]
    fn drivers_off_yields_empty_snapshot() {
        let mut r = resolved(1);
        r.params.drivers_off = true;
        let dly = driver_layer(&[0.9]);
        r.snapshot(&dly);
        assert!(!r.gating());
        assert_eq!(r.drv_inhib, 0.0);
        assert_eq!(r.drive_ge, vec![0.0]);
    }

    #[test]
    fn unresolved_driver_never_gates() {
        let mut r = RelayState::new(1);
        r.driver = Some(DriverRef::named("missing"));
        assert!(!r.gating());
    }

    #[test]
    fn snapshot_clips_to_shorter_driver() {
        let mut r = resolved(3);
        r.drive_ge = vec![9.0; 3];
        let dly = driver_layer(&[0.3]);
        r.snapshot(&dly);
        assert!(r.drive_ge[0] > 0.0);
        assert_eq!(&r.drive_ge[1..], &[0.0, 0.0], "unmapped relay units cleared");
    }
}
