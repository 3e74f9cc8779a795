//! # corticothal
//!
//! Cortico-thalamic predictive-coding circuit: rate-coded layers with
//! pooled FFFB inhibition, burst-thresholded superficial layers, context
//! pathways into context-integrating deep layers, driver-gated relay
//! (pulvinar-style) layers, and pool-level attention broadcast.
//!
//! Simulation runs in discrete theta-cycle trials split into a minus and a
//! plus phase; `Network` owns the scheduling hooks and resolves all layer
//! cross-references to indices once at build time.

pub mod attn;
pub mod burst;
pub mod ct;
pub mod ctxt;
pub mod layer;
pub mod learn;
pub mod network;
pub mod pathway;
pub mod relay;
pub mod unit;

pub use attn::{AttnParams, AttnState};
pub use burst::{BurstParams, SuperState};
pub use ct::{CtParams, CtState};
pub use ctxt::{CtxtLearnRule, CtxtState};
pub use layer::{ActParams, DecayParams, InhibParams, Layer, LayerKind, LayerShape, PoolStat};
pub use learn::{LearnParams, SynCaParams, TraceParams};
pub use network::{BuildError, Network, Time};
pub use pathway::{Pathway, PathwayKind, Pattern, Synapse, WtInitParams};
pub use relay::{DriverRef, RelayParams, RelayState};
pub use unit::UnitArrays;
