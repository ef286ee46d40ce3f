//! Register renaming: one fresh id per value.

use super::{Transformation, TransformationStatus};
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{Reg, ScheduleDag};
use crate::sched::Scheduler;
use crate::unit::Units;
use rpsched_core::collections::HashMap;

/// Renumbers all data-dep registers so that every distinct
/// `(producer, original register)` pair gets a fresh non-zero id
///
/// Everything downstream assumes register ids identify a single value; raw
/// inputs reuse ids freely (and may carry the "unassigned" zero), so this
/// runs first and always reports the graph as modified.
pub struct UniqueRegIds;

impl Transformation for UniqueRegIds {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> unique reg ids");
        status.begin();

        let mut to_remove = Vec::new();
        let mut to_add = Vec::new();
        for unit in dag.units() {
            let mut reg_map: HashMap<Reg, Reg> = HashMap::default();
            for dep in dag.succs(unit) {
                let mut dep = *dep;
                to_remove.push(dep);
                if dep.is_data() {
                    dep.reg = *reg_map
                        .entry(dep.reg)
                        .or_insert_with(|| dag.generate_unique_reg_id());
                }
                to_add.push(dep);
            }
        }

        dag.remove_deps(to_remove);
        dag.add_deps(to_add);

        status.set_modified(true);
        status.set_deadlock(false);
        status.set_junction(false);

        inner.schedule(units, dag, chain)?;

        status.end();
        log::trace!("<--- unique reg ids");
        Ok(())
    }
}
