//! Removing dependencies and units that cannot influence register pressure.

use super::{Transformation, TransformationStatus};
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{Dep, ReachFlags, ScheduleDag};
use crate::sched::Scheduler;
use crate::unit::{UnitKey, Units};
use rpsched_core::collections::HashMap;

/// Deletes order deps already enforced by the rest of the graph: duplicate
/// order edges, and any `(a, u)` order edge when another predecessor `b` of
/// `u` is reachable from `a`
pub struct StripUselessOrderDeps;

impl Transformation for StripUselessOrderDeps {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> strip useless order deps");
        status.begin();

        // duplicate order deps between the same pair of units
        let mut to_remove = Vec::new();
        for unit in dag.units() {
            let mut order_count: HashMap<UnitKey, usize> = HashMap::default();
            for dep in dag.succs(unit) {
                if dep.is_order() {
                    let count = order_count.entry(dep.to).or_insert(0);
                    *count += 1;
                    if *count >= 2 {
                        to_remove.push(*dep);
                    }
                }
            }
        }
        let mut removed = to_remove.len();
        dag.remove_deps(to_remove.drain(..));

        let path = dag.build_path_map();

        // an order dep (a, u) is implied when some other dep (b, u) has a
        // path a -> b; mind the pair order so an edge is flagged once
        for unit in dag.units() {
            let preds = dag.preds(unit);
            for i in 0..preds.len() {
                for j in (i + 1)..preds.len() {
                    if path.path(preds[i].from, preds[j].from) && preds[i].is_order() {
                        to_remove.push(preds[i]);
                    } else if path.path(preds[j].from, preds[i].from) && preds[j].is_order() {
                        to_remove.push(preds[j]);
                    }
                }
            }
        }
        for dep in to_remove {
            if dag.remove_dep(dep) {
                removed += 1;
            }
        }

        status.set_modified(removed > 0);
        status.set_deadlock(false);
        status.set_junction(false);

        inner.schedule(units, dag, chain)?;

        status.end();
        log::trace!("<--- strip useless order deps");
        Ok(())
    }
}

/// Removes units that carry no data at all (zero IRP, order deps only),
/// bridging their neighbours with transitive order deps; after scheduling,
/// reinserts them at a position consistent with their original constraints
pub struct StripDatalessUnits;

struct Stripped {
    unit: UnitKey,
    succs: Vec<UnitKey>,
    preds: Vec<UnitKey>,
}

impl Transformation for StripDatalessUnits {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> strip dataless units");
        status.begin();

        let mut stripped: Vec<Stripped> = Vec::new();

        // one unit per round; every removal rewrites the neighbourhood
        loop {
            if dag.unit_count() <= 1 {
                break;
            }
            let found = dag.units().find(|&unit| {
                units.internal_pressure(unit) == 0
                    && dag.preds(unit).iter().all(Dep::is_order)
                    && dag.succs(unit).iter().all(Dep::is_order)
            });
            let Some(unit) = found else { break };

            let mut to_add = Vec::new();
            for pred in dag.preds(unit) {
                for succ in dag.succs(unit) {
                    to_add.push(Dep::order(pred.from, succ.to));
                }
            }

            stripped.push(Stripped {
                unit,
                succs: dag
                    .reachable(unit, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE)
                    .iter()
                    .copied()
                    .collect(),
                preds: dag
                    .reachable(unit, ReachFlags::FOLLOW_PREDS | ReachFlags::IMMEDIATE)
                    .iter()
                    .copied()
                    .collect(),
            });

            dag.remove_unit(unit);
            dag.add_deps(to_add);
        }

        status.set_modified(!stripped.is_empty());
        status.set_deadlock(false);
        status.set_junction(false);

        inner.schedule(units, dag, chain)?;

        // reinsert in reverse: just before the first scheduled successor,
        // or just after the last scheduled predecessor, or anywhere
        for entry in stripped.iter().rev() {
            let pos = if !entry.succs.is_empty() {
                let first_succ = (0..chain.len())
                    .find(|&p| entry.succs.contains(&chain.at(p)))
                    .ok_or(ScheduleError::IncompleteChain {
                        transformation: "strip_dataless_units",
                    })?;
                first_succ
            } else if !entry.preds.is_empty() {
                let last_pred = (0..chain.len())
                    .rev()
                    .find(|&p| entry.preds.contains(&chain.at(p)))
                    .ok_or(ScheduleError::IncompleteChain {
                        transformation: "strip_dataless_units",
                    })?;
                last_pred + 1
            } else {
                chain.len()
            };
            chain.insert(pos, entry.unit);
        }

        status.end();
        log::trace!("<--- strip dataless units");
        Ok(())
    }
}
