//! Breaking combinatorial symmetry before the exact search.

use super::{Transformation, TransformationStatus};
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{Dep, ReachFlags, Reg, ScheduleDag};
use crate::sched::Scheduler;
use crate::unit::{UnitKey, Units};
use std::collections::BTreeMap;

/// Detects a dominator whose structurally identical children all funnel
/// into one collector, and chains those children with order deps
///
/// Interchangeable children multiply the search space without changing any
/// achievable peak; pinning one of their orders keeps exactly one
/// representative of each symmetric class.
///
/// A child group qualifies when each member has the dominator as its only
/// predecessor and the collector as its only successor, the members'
/// internal pressures and in/out register counts match, and every register
/// feeding the group is read either by all members or by exactly one, with
/// no consumer outside the group. Under those conditions any permutation of
/// the members yields the same live counts position by position.
pub struct BreakSymmetricalBranchMerge;

impl Transformation for BreakSymmetricalBranchMerge {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> break symmetrical branch merge");
        status.begin();

        let mut to_add = Vec::new();

        for unit in dag.units().collect::<Vec<_>>() {
            let succs = dag.reachable(unit, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE);

            // single-entry single-exit children, grouped by their collector
            let mut groups: BTreeMap<usize, Vec<UnitKey>> = BTreeMap::new();
            let mut kept = 0usize;
            for &child in &succs {
                let preds =
                    dag.reachable(child, ReachFlags::FOLLOW_PREDS | ReachFlags::IMMEDIATE);
                if preds.len() != 1 {
                    continue;
                }
                let outs =
                    dag.reachable(child, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE);
                if outs.len() != 1 {
                    continue;
                }
                kept += 1;
                let collector = dag.succs(child)[0].to;
                let slot = dag
                    .units()
                    .position(|u| u == collector)
                    .expect("collector is in the graph");
                groups.entry(slot).or_default().push(child);
            }
            if kept < 2 {
                continue;
            }

            'groups: for group in groups.values() {
                if group.len() <= 1 {
                    continue;
                }

                let mut in_count = 0;
                let mut out_count = 0;
                let mut irp = 0;
                for (i, &member) in group.iter().enumerate() {
                    let uses = dag.reg_use(member).len();
                    let defs = dag.reg_create(member).len();
                    let pressure = units.internal_pressure(member);
                    if i == 0 {
                        in_count = uses;
                        out_count = defs;
                        irp = pressure;
                    } else if uses != in_count || defs != out_count || pressure != irp {
                        continue 'groups;
                    }
                }

                let mut reg_use_count: BTreeMap<Reg, usize> = BTreeMap::new();
                for &member in group {
                    for reg in dag.reg_use(member) {
                        *reg_use_count.entry(reg).or_insert(0) += 1;
                    }
                }
                if reg_use_count
                    .values()
                    .any(|&count| count != 1 && count != group.len())
                {
                    continue 'groups;
                }
                // a group register read outside the group does not die with
                // the group; its lifetime would depend on the member order
                for &reg in reg_use_count.keys() {
                    let outside = dag
                        .succs(unit)
                        .iter()
                        .any(|d| d.is_data() && d.reg == reg && !group.contains(&d.to));
                    if outside {
                        continue 'groups;
                    }
                }

                log::debug!(
                    "symmetric group of {} under {}",
                    group.len(),
                    units.label(unit)
                );
                for pair in group.windows(2) {
                    to_add.push(Dep::order(pair[0], pair[1]));
                }
            }
        }

        let modified = !to_add.is_empty();
        dag.add_deps(to_add);

        status.set_modified(modified);
        status.set_deadlock(false);
        status.set_junction(false);

        inner.schedule(units, dag, chain)?;

        status.end();
        log::trace!("<--- break symmetrical branch merge");
        Ok(())
    }
}
