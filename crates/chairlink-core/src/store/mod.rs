// ── Reactive fleet store ──
//
// A pure reducer plus the watch-backed store that serializes every
// mutation through it.

mod data_store;
pub mod reducer;

pub use data_store::DataStore;
pub use reducer::{
    AlarmOutcome, DeltaOutcome, FleetEvent, FleetState, MAX_PENDING_DELTAS, Outcome, Reduction,
    ResolveOutcome, SyncPhase, reduce,
};
