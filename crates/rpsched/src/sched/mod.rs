//! Scheduler interface and the concrete schedulers.

mod exact;
mod list;

pub use exact::ExactScheduler;
pub use list::ListScheduler;

use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::ScheduleDag;
use crate::unit::Units;

/// Appends a legal total order of `dag`'s units to `chain`
///
/// A scheduler may be handed a DAG any transformation stack produced, so the
/// graph is mutable; the concrete schedulers here leave it untouched, but a
/// glued transformation acting as a scheduler will rewrite it.
pub trait Scheduler {
    fn schedule(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        chain: &mut ScheduleChain,
    ) -> Result<(), ScheduleError>;
}
