//! Splitting a DAG into independently schedulable pieces.

use super::{Transformation, TransformationStatus};
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{ReachFlags, ScheduleDag};
use crate::sched::Scheduler;
use crate::unit::Units;

/// Cuts the graph along one-way order boundaries
///
/// For a unit `u`, the closure of `u` under "all predecessors" and "data
/// successors" is a component no dependency enters from the rest of the
/// graph. If it is proper, it can be scheduled first as an independent
/// sub-DAG and the remainder after it.
pub struct SimplifyOrderCuts;

impl SimplifyOrderCuts {
    fn do_transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
        level: u32,
    ) -> Result<(), ScheduleError> {
        if level == 0 {
            log::trace!("---> simplify order cuts");
            status.begin();
        }

        for unit in dag.units().collect::<Vec<_>>() {
            let component = dag.reachable(
                unit,
                ReachFlags::INCLUDE_UNIT | ReachFlags::FOLLOW_PREDS | ReachFlags::FOLLOW_SUCCS_DATA,
            );
            if component.len() == dag.unit_count() {
                continue;
            }

            let mut top = dag.dup_subgraph(&component);
            dag.remove_units(component.iter().copied().collect::<Vec<_>>());

            if level == 0 {
                status.set_modified(true);
                status.set_junction(true);
            }

            self.do_transform(units, &mut top, inner, chain, status, level + 1)?;
            self.do_transform(units, dag, inner, chain, status, level + 1)?;

            if level == 0 {
                status.end();
                log::trace!("<--- simplify order cuts");
            }
            return Ok(());
        }

        if level == 0 {
            status.set_modified(false);
            status.set_deadlock(false);
            status.set_junction(false);
        }

        inner.schedule(units, dag, chain)?;

        if level == 0 {
            status.end();
            log::trace!("<--- simplify order cuts");
        }
        Ok(())
    }
}

impl Transformation for SimplifyOrderCuts {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        self.do_transform(units, dag, inner, chain, status, 0)
    }
}

/// Splits at a unit whose predecessor closure and successor closure
/// partition the rest of the graph with no edge crossing between them: the
/// prefix half (ending in the pivot) and the suffix half (starting at it)
/// are then scheduled independently
pub struct SplitMergeBranchUnits;

impl SplitMergeBranchUnits {
    fn do_transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
        level: u32,
    ) -> Result<(), ScheduleError> {
        if level == 0 {
            log::trace!("---> split merge branch units");
            status.begin();
        }

        for unit in dag.units().collect::<Vec<_>>() {
            let before = dag.reachable(unit, ReachFlags::FOLLOW_PREDS);
            let after = dag.reachable(unit, ReachFlags::FOLLOW_SUCCS);

            if before.is_empty() || after.is_empty() {
                continue;
            }
            if before.len() + after.len() + 1 != dag.unit_count() {
                continue;
            }
            let crossing = before.iter().any(|&p| {
                dag.succs(p).iter().any(|d| after.contains(&d.to))
            }) || after.iter().any(|&s| {
                dag.preds(s).iter().any(|d| before.contains(&d.from))
            });
            if crossing {
                continue;
            }

            let mut suffix = dag.dup();
            dag.remove_units(after.iter().copied().collect::<Vec<_>>());
            suffix.remove_units(before.iter().copied().collect::<Vec<_>>());

            if level == 0 {
                status.set_modified(true);
                status.set_junction(true);
            }

            inner.schedule(units, dag, chain)?;

            // the pivot ends the prefix half and opens the suffix half;
            // drop its first occurrence so it is emitted once
            if chain.is_empty() || chain.at(chain.len() - 1) != unit {
                return Err(ScheduleError::InvalidSchedule {
                    scheduler: "split_merge_branch_units",
                });
            }
            chain.remove(chain.len() - 1);

            inner.schedule(units, &mut suffix, chain)?;

            if level == 0 {
                status.end();
                log::trace!("<--- split merge branch units");
            }
            return Ok(());
        }

        if level == 0 {
            status.set_modified(false);
            status.set_deadlock(false);
            status.set_junction(false);
        }

        inner.schedule(units, dag, chain)?;

        if level == 0 {
            status.end();
            log::trace!("<--- split merge branch units");
        }
        Ok(())
    }
}

impl Transformation for SplitMergeBranchUnits {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        self.do_transform(units, dag, inner, chain, status, 0)
    }
}
