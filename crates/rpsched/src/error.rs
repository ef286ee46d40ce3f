//! Scheduling error taxonomy
//!
//! Parse errors live with their formats ([`crate::ddl::DdlError`],
//! [`crate::lsd::LsdError`]); this module covers the scheduling core. The
//! exact scheduler's timeout is not an error: it is handled internally by
//! falling back to the best schedule found or to the fallback scheduler.

/// Category of failures raised by schedulers and transformations
///
/// Apart from `NoSchedulableUnit` on malformed inputs, every variant
/// indicates a bug in a scheduler or transformation rather than bad input.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ScheduleError {
    /// A produced chain does not respect the DAG it was scheduled from
    #[error("{scheduler} produced a schedule that violates the dependence graph")]
    InvalidSchedule { scheduler: &'static str },

    /// A structural invariant of the DAG does not hold
    #[error("schedule DAG is not consistent: {0}")]
    InconsistentDag(String),

    /// A transformation could not find its own units in the scheduled chain
    #[error("{transformation} found the schedule chain missing expected units")]
    IncompleteChain { transformation: &'static str },

    /// The ready set drained before all units were emitted
    #[error("no schedulable unit left ({0} units still unscheduled)")]
    NoSchedulableUnit(usize),
}
