//! Emitting an already-linear graph without searching.

use super::{Transformation, TransformationStatus};
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{ReachFlags, ScheduleDag};
use crate::sched::Scheduler;
use crate::unit::Units;

/// When the DAG is a single chain (one root, at most one immediate
/// successor per unit) there is nothing to decide: the chain itself is the
/// schedule, emitted directly with `deadlock` set
pub struct CollapseChains;

impl Transformation for CollapseChains {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> collapse chains");
        status.begin();

        let linear = 'check: {
            if dag.unit_count() <= 1 || dag.roots().len() != 1 {
                break 'check None;
            }
            let mut order = Vec::with_capacity(dag.unit_count());
            let mut unit = dag.roots()[0];
            loop {
                order.push(unit);
                let next =
                    dag.reachable(unit, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE);
                match next.len() {
                    0 => break,
                    1 => unit = dag.succs(unit)[0].to,
                    _ => break 'check None,
                }
            }
            (order.len() == dag.unit_count()).then_some(order)
        };

        match linear {
            Some(order) => {
                status.set_modified(false);
                status.set_junction(false);
                status.set_deadlock(true);
                chain.insert_many(chain.len(), &order);
            }
            None => {
                status.set_modified(false);
                status.set_junction(false);
                status.set_deadlock(false);
                inner.schedule(units, dag, chain)?;
            }
        }

        status.end();
        log::trace!("<--- collapse chains");
        Ok(())
    }
}
