//! Instruction scheduling for acyclic data-dependence graphs, minimizing
//! register pressure: the peak number of simultaneously live values over a
//! linear schedule.
//!
//! The library is organized bottom-up:
//! - [`unit`]: schedule units and the registry that owns them
//! - [`graph`]: the mutable schedule DAG and its queries
//! - [`chain`]: a concrete schedule (total order) with validation and
//!   register-pressure simulation
//! - [`sched`]: the list scheduler and the exact branch-and-bound scheduler
//! - [`transform`]: graph rewrites and the combinators that compose them
//!   around an inner scheduler
//! - [`ddl`], [`lsd`], [`dot`]: text formats and rendering

pub mod chain;
pub mod ddl;
pub mod dot;
pub mod error;
pub mod graph;
pub mod lsd;
pub mod sched;
pub mod transform;
pub mod unit;

pub use chain::ScheduleChain;
pub use error::ScheduleError;
pub use graph::{Dep, DepKind, ReachFlags, Reg, ScheduleDag};
pub use sched::{ExactScheduler, ListScheduler, Scheduler};
pub use transform::{
    BasicStatus, Pipeline, Transformation, TransformationLoop, TransformationStatus,
};
pub use unit::{ChainUnit, ScheduleUnit, UnitKey, Units};

use transform::reduction_loop_body;

/// The standard reduction pipeline: register renaming followed by a
/// fixed-point loop over the graph-simplifying transformations.
pub fn reduction_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.add_stage(Box::new(transform::UniqueRegIds));
    pipeline.add_stage(Box::new(TransformationLoop::new(Box::new(
        reduction_loop_body(),
    ))));
    pipeline
}
