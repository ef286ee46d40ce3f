//! Graph-rewriting transformations and the combinators that compose them.
//!
//! A [`Transformation`] reshapes a DAG into smaller equivalent scheduling
//! problems and threads an inner [`Scheduler`] through the pieces. The
//! status protocol lets combinators observe what a stage did: whether it
//! touched the graph, split it into several scheduler invocations
//! (`junction`) or emitted the schedule itself without calling the
//! scheduler at all (`deadlock`).

mod collapse;
mod cuts;
mod dom_use;
mod fuse;
mod strip;
mod symmetry;
mod unique_regs;

pub use collapse::CollapseChains;
pub use cuts::{SimplifyOrderCuts, SplitMergeBranchUnits};
pub use dom_use::SplitDefUseDomUseDeps;
pub use fuse::SmartFuseTwoUnits;
pub use strip::{StripDatalessUnits, StripUselessOrderDeps};
pub use symmetry::BreakSymmetricalBranchMerge;
pub use unique_regs::UniqueRegIds;

use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::ScheduleDag;
use crate::sched::Scheduler;
use crate::unit::Units;
use core::cell::Cell;

/// Flags a transformation reports while it runs
///
/// Handles are shared between a transformation and the glued scheduler
/// running beneath it, hence the `&self` mutators.
pub trait TransformationStatus {
    /// Brackets the start of a transformation
    fn begin(&self);
    /// Brackets the end, once everything is scheduled and reassembled
    fn end(&self);

    fn set_modified(&self, modified: bool);
    fn modified(&self) -> bool;

    /// The transformation emitted the whole schedule itself; the inner
    /// scheduler was never called. Mutually exclusive with `junction`.
    fn set_deadlock(&self, deadlock: bool);
    fn deadlock(&self) -> bool;

    /// The transformation split the DAG and called the scheduler several
    /// times. Mutually exclusive with `deadlock`.
    fn set_junction(&self, junction: bool);
    fn junction(&self) -> bool;
}

/// Plain status holder
#[derive(Default)]
pub struct BasicStatus {
    modified: Cell<bool>,
    deadlock: Cell<bool>,
    junction: Cell<bool>,
}

impl BasicStatus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransformationStatus for BasicStatus {
    fn begin(&self) {
        self.modified.set(false);
        self.deadlock.set(false);
        self.junction.set(false);
    }

    fn end(&self) {}

    fn set_modified(&self, modified: bool) {
        self.modified.set(modified);
    }

    fn modified(&self) -> bool {
        self.modified.get()
    }

    fn set_deadlock(&self, deadlock: bool) {
        if deadlock {
            self.junction.set(false);
        }
        self.deadlock.set(deadlock);
    }

    fn deadlock(&self) -> bool {
        self.deadlock.get()
    }

    fn set_junction(&self, junction: bool) {
        if junction {
            self.deadlock.set(false);
        }
        self.junction.set(junction);
    }

    fn junction(&self) -> bool {
        self.junction.get()
    }
}

/// Status wrapper used when stacking transformations: forwards `modified`
/// and `junction` upward, hides the stacking level so only the outermost
/// begin/end pair reaches the wrapped status, and drops `deadlock` (an
/// inner deadlock is an implementation detail of the stack)
pub struct PackedStatus<'a> {
    level: Cell<u32>,
    inner: &'a dyn TransformationStatus,
}

impl<'a> PackedStatus<'a> {
    pub fn new(inner: &'a dyn TransformationStatus) -> Self {
        Self {
            level: Cell::new(0),
            inner,
        }
    }
}

impl TransformationStatus for PackedStatus<'_> {
    fn begin(&self) {
        if self.level.get() == 0 {
            self.inner.begin();
        }
        self.level.set(self.level.get() + 1);
    }

    fn end(&self) {
        self.level.set(self.level.get() - 1);
        if self.level.get() == 0 {
            self.inner.end();
        }
    }

    fn set_modified(&self, modified: bool) {
        if modified {
            self.inner.set_modified(true);
        }
    }

    fn modified(&self) -> bool {
        self.inner.modified()
    }

    fn set_deadlock(&self, _deadlock: bool) {}

    fn deadlock(&self) -> bool {
        false
    }

    fn set_junction(&self, junction: bool) {
        if junction {
            self.inner.set_junction(true);
        }
    }

    fn junction(&self) -> bool {
        self.inner.junction()
    }
}

/// A graph rewrite composed around an inner scheduler
///
/// After `transform` returns, `chain` has grown by exactly the number of
/// units the input DAG held, and the added units respect every dependency
/// of the input DAG.
pub trait Transformation {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError>;
}

/// Presents a transformation (with its next-stage scheduler and status) as
/// a scheduler, so a stage above it can be oblivious to what runs below
pub struct GluedScheduler<'a> {
    pub transformation: &'a dyn Transformation,
    pub inner: &'a dyn Scheduler,
    pub status: &'a dyn TransformationStatus,
}

impl Scheduler for GluedScheduler<'_> {
    fn schedule(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        chain: &mut ScheduleChain,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> glued transformation scheduler");
        let res = self
            .transformation
            .transform(units, dag, self.inner, chain, self.status);
        log::trace!("<--- glued transformation scheduler");
        res
    }
}

/// `pack(first, second)`: run `first` with `second` glued in as its
/// scheduler
pub struct PackedTransformation {
    first: Box<dyn Transformation>,
    second: Box<dyn Transformation>,
}

impl PackedTransformation {
    pub fn new(first: Box<dyn Transformation>, second: Box<dyn Transformation>) -> Self {
        Self { first, second }
    }
}

impl Transformation for PackedTransformation {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        let packed = PackedStatus::new(status);
        let glued = GluedScheduler {
            transformation: &*self.second,
            inner,
            status: &packed,
        };
        self.first.transform(units, dag, &glued, chain, &packed)
    }
}

/// Left-fold of packed transformations: `[T1, T2, T3]` behaves as
/// `pack(pack(T1, T2), T3)`
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Transformation>>,
}

struct PipelineTail<'a> {
    stages: &'a [Box<dyn Transformation>],
    inner: &'a dyn Scheduler,
    status: &'a dyn TransformationStatus,
}

impl Scheduler for PipelineTail<'_> {
    fn schedule(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        chain: &mut ScheduleChain,
    ) -> Result<(), ScheduleError> {
        match self.stages.split_first() {
            None => self.inner.schedule(units, dag, chain),
            Some((stage, rest)) => {
                let tail = PipelineTail {
                    stages: rest,
                    inner: self.inner,
                    status: self.status,
                };
                stage.transform(units, dag, &tail, chain, self.status)
            }
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, stage: Box<dyn Transformation>) {
        self.stages.push(stage);
    }
}

impl Transformation for Pipeline {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> pipeline ({} stages)", self.stages.len());
        let res = match self.stages.split_first() {
            None => {
                // transparent transformation
                status.begin();
                status.set_modified(false);
                status.set_deadlock(false);
                status.set_junction(false);
                let res = inner.schedule(units, dag, chain);
                status.end();
                res
            }
            Some((stage, rest)) => {
                let packed = PackedStatus::new(status);
                let tail = PipelineTail {
                    stages: rest,
                    inner,
                    status: &packed,
                };
                stage.transform(units, dag, &tail, chain, &packed)
            }
        };
        log::trace!("<--- pipeline");
        res
    }
}

/// Fixed-point loop: keep re-running the body while it reports progress
///
/// The body runs with a scheduler below it that inspects the iteration's
/// status: if the body neither modified the graph nor split it, the real
/// inner scheduler runs; otherwise the body runs again against a fresh
/// status. Each re-run that happens is justified by progress, so the
/// recursion terminates.
pub struct TransformationLoop {
    body: Box<dyn Transformation>,
}

impl TransformationLoop {
    pub fn new(body: Box<dyn Transformation>) -> Self {
        Self { body }
    }
}

struct LoopScheduler<'a> {
    body: &'a dyn Transformation,
    inner: &'a dyn Scheduler,
    status: &'a dyn TransformationStatus,
}

impl Scheduler for LoopScheduler<'_> {
    fn schedule(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        chain: &mut ScheduleChain,
    ) -> Result<(), ScheduleError> {
        if !self.status.modified() && !self.status.junction() {
            return self.inner.schedule(units, dag, chain);
        }
        // a fresh status per iteration: this status is what decides whether
        // anything changed, reusing the caller's would loop forever
        let fresh = BasicStatus::new();
        let packed = PackedStatus::new(&fresh);
        let next = LoopScheduler {
            body: self.body,
            inner: self.inner,
            status: &packed,
        };
        self.body.transform(units, dag, &next, chain, &packed)
    }
}

impl Transformation for TransformationLoop {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> transformation loop");
        let packed = PackedStatus::new(status);
        let next = LoopScheduler {
            body: &*self.body,
            inner,
            status: &packed,
        };
        let res = self.body.transform(units, dag, &next, chain, &packed);
        log::trace!("<--- transformation loop");
        res
    }
}

/// The loop body of the standard reduction pipeline (spec'd stage order)
pub fn reduction_loop_body() -> Pipeline {
    let mut body = Pipeline::new();
    body.add_stage(Box::new(StripDatalessUnits));
    body.add_stage(Box::new(StripUselessOrderDeps));
    body.add_stage(Box::new(SimplifyOrderCuts));
    body.add_stage(Box::new(SplitDefUseDomUseDeps::new(true)));
    body.add_stage(Box::new(SmartFuseTwoUnits::new(false, true)));
    body.add_stage(Box::new(BreakSymmetricalBranchMerge));
    body.add_stage(Box::new(CollapseChains));
    body.add_stage(Box::new(SplitMergeBranchUnits));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::unit;
    use crate::graph::{Dep, Reg};
    use crate::sched::ListScheduler;

    #[test]
    fn empty_pipeline_is_transparent() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let a = unit(&mut units, "a");
        let b = unit(&mut units, "b");
        dag.add_units([a, b]);
        dag.add_dep(Dep::data(a, b, Reg(1)));

        let pipeline = Pipeline::new();
        let status = BasicStatus::new();
        let mut chain = ScheduleChain::new();
        pipeline
            .transform(
                &mut units,
                &mut dag,
                &ListScheduler::new(),
                &mut chain,
                &status,
            )
            .unwrap();
        assert!(chain.check_against_dag(&dag));
        assert!(!status.modified());
        assert!(!status.junction());
        assert!(!status.deadlock());
    }

    #[test]
    fn packed_pair_behaves_like_a_two_stage_pipeline() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let a = unit(&mut units, "a");
        let b = unit(&mut units, "b");
        let c = unit(&mut units, "c");
        dag.add_units([a, b, c]);
        dag.add_dep(Dep::data(a, b, Reg(1)));
        dag.add_dep(Dep::data(b, c, Reg(2)));
        dag.add_dep(Dep::order(a, c));

        let packed = PackedTransformation::new(
            Box::new(UniqueRegIds),
            Box::new(StripUselessOrderDeps),
        );
        let status = BasicStatus::new();
        let mut chain = ScheduleChain::new();
        let original = dag.dup();
        packed
            .transform(
                &mut units,
                &mut dag,
                &ListScheduler::new(),
                &mut chain,
                &status,
            )
            .unwrap();

        assert!(chain.check_against_dag(&original));
        // the redundant order dep is gone and the modification is reported
        // through the packed status
        assert_eq!(dag.deps().len(), 2);
        assert!(status.modified());
        assert!(!status.deadlock());
    }

    #[test]
    fn deadlock_and_junction_exclude_each_other() {
        let status = BasicStatus::new();
        status.set_junction(true);
        status.set_deadlock(true);
        assert!(status.deadlock() && !status.junction());
        status.set_junction(true);
        assert!(status.junction() && !status.deadlock());
    }

    #[test]
    fn packed_status_forwards_once() {
        let outer = BasicStatus::new();
        let packed = PackedStatus::new(&outer);
        packed.begin();
        packed.begin();
        packed.set_modified(true);
        packed.set_deadlock(true);
        packed.end();
        packed.end();
        assert!(outer.modified());
        assert!(!outer.deadlock());
    }
}
