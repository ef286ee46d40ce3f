//! Rewiring a value's consumers through a dominating consumer.

use super::{Transformation, TransformationStatus};
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{Dep, Reg, ScheduleDag};
use crate::sched::Scheduler;
use crate::unit::{ChainUnit, UnitKey, Units};
use rpsched_core::collections::HashMap;
use std::collections::BTreeMap;

/// When one data child `d` of a producer reaches every other child using
/// the same register, the register only has to survive until `d`: all other
/// uses are rewired to read a copy from `d` instead
///
/// `d` is wrapped in a chain unit with `IRP + 1` to account for the value
/// now living through it invisibly. Wrappers are expanded back out of the
/// chain after scheduling.
pub struct SplitDefUseDomUseDeps {
    generate_new_reg_ids: bool,
}

impl SplitDefUseDomUseDeps {
    pub fn new(generate_new_reg_ids: bool) -> Self {
        Self {
            generate_new_reg_ids,
        }
    }
}

impl Transformation for SplitDefUseDomUseDeps {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> split def-use dom-use deps");
        status.begin();

        // the path map is computed once; the rewires below only move uses
        // to units they were already reachable from, so it stays valid for
        // later rounds
        let path = dag.build_path_map();
        let mut pending_doms: Vec<UnitKey> = Vec::new();

        'rounds: loop {
            for unit in dag.units().collect::<Vec<_>>() {
                if dag.succs(unit).len() <= 1 {
                    continue;
                }
                let mut reg_succs: BTreeMap<Reg, Vec<Dep>> = BTreeMap::new();
                for dep in dag.succs(unit) {
                    if dep.is_data() {
                        reg_succs.entry(dep.reg).or_default().push(*dep);
                    }
                }

                for (reg, reg_use) in &reg_succs {
                    // the dominator may be any successor of the producer,
                    // not just a consumer of this register
                    let dominators: Vec<UnitKey> = dag
                        .succs(unit)
                        .iter()
                        .map(|d| d.to)
                        .filter(|&cand| reg_use.iter().all(|u| path.path(cand, u.to)))
                        .collect();

                    for dom in dominators {
                        let dom_in_use = reg_use.iter().any(|u| u.to == dom);
                        if !reg_use.iter().any(|u| u.to != dom) {
                            continue;
                        }

                        dag.remove_deps(reg_use.iter().copied());

                        let new_reg = if self.generate_new_reg_ids {
                            dag.generate_unique_reg_id()
                        } else {
                            *reg
                        };
                        let mut readd = Vec::new();
                        for user in reg_use {
                            if user.to == dom {
                                readd.push(*user);
                            } else {
                                let mut dep = *user;
                                dep.from = dom;
                                dep.reg = new_reg;
                                readd.push(dep);
                            }
                        }
                        if !dom_in_use {
                            readd.push(Dep::data(unit, dom, *reg));
                        }
                        dag.add_deps(readd);

                        // wrapping is deferred past the scan: the path map
                        // and the scan itself key the original units
                        pending_doms.push(dom);

                        // the dominator may admit further splitting
                        continue 'rounds;
                    }
                }
            }
            break;
        }

        // replace dominators by their wrappers, forwarding through earlier
        // wraps of the same unit
        let mut forward: HashMap<UnitKey, UnitKey> = HashMap::default();
        let mut wrappers: Vec<UnitKey> = Vec::new();
        for dom in pending_doms {
            let mut target = dom;
            while let Some(&next) = forward.get(&target) {
                target = next;
            }
            let irp = units.internal_pressure(target) + 1;
            let wrapper = units.insert(Box::new(ChainUnit::new(vec![target], irp)));
            dag.replace_unit(target, wrapper);
            forward.insert(target, wrapper);
            wrappers.push(wrapper);
        }

        status.set_modified(!wrappers.is_empty());
        status.set_deadlock(false);
        status.set_junction(false);

        inner.schedule(units, dag, chain)?;

        // unwrap in reverse; replacing one unit by one unit keeps indices
        let mut index: HashMap<UnitKey, usize> = HashMap::default();
        for i in 0..chain.len() {
            index.insert(chain.at(i), i);
        }
        for &wrapper in wrappers.iter().rev() {
            let Some(&pos) = index.get(&wrapper) else {
                return Err(ScheduleError::IncompleteChain {
                    transformation: "split_def_use_dom_use_deps",
                });
            };
            let parts = units
                .chain_parts(wrapper)
                .expect("wrapper is a chain unit")
                .to_vec();
            debug_assert_eq!(parts.len(), 1);
            chain.set(pos, parts[0]);
            index.remove(&wrapper);
            index.insert(parts[0], pos);
            units.remove(wrapper);
        }

        status.end();
        log::trace!("<--- split def-use dom-use deps");
        Ok(())
    }
}
