//! The schedule DAG: units connected by typed dependencies.
//!
//! The graph owns the topology only. Every dependency is recorded three
//! times (global edge list, predecessor list of its target, successor list
//! of its source) and the root/leaf caches are kept in sync by every
//! mutation. Any structural mutation may invalidate previously returned dep
//! slices; callers copy before iterating while mutating.

mod path_map;

pub use path_map::PathMap;

use crate::error::ScheduleError;
use crate::unit::{ChainUnit, UnitKey, Units};
use bitflags::bitflags;
use core::cell::Cell;
use indexmap::{IndexMap, IndexSet};
use rpsched_core::hash::FixedHasher;
use std::collections::{BTreeSet, VecDeque};

/// A register id carried by data dependencies
///
/// Valid registers are numbered from 1; [`Reg::NONE`] marks order-only deps
/// and data deps that have not been renamed yet.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, derive_more::Display, Default,
)]
#[display("r{_0}")]
pub struct Reg(pub u32);

impl Reg {
    pub const NONE: Reg = Reg(0);
}

/// What a dependency expresses
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DepKind {
    /// The source produces a register the target reads
    Data,
    /// Data through a physical register slot; constrains which units may be
    /// live simultaneously in that slot
    Phys,
    /// Pure ordering (memory, artificial), no register
    Order,
}

/// A typed dependency between two schedule units
///
/// Equality is componentwise. The same dep may appear several times between
/// the same endpoints; removal removes one instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Dep {
    pub from: UnitKey,
    pub to: UnitKey,
    pub kind: DepKind,
    pub reg: Reg,
}

impl Dep {
    pub fn data(from: UnitKey, to: UnitKey, reg: Reg) -> Self {
        Self {
            from,
            to,
            kind: DepKind::Data,
            reg,
        }
    }

    pub fn phys(from: UnitKey, to: UnitKey, reg: Reg) -> Self {
        Self {
            from,
            to,
            kind: DepKind::Phys,
            reg,
        }
    }

    pub fn order(from: UnitKey, to: UnitKey) -> Self {
        Self {
            from,
            to,
            kind: DepKind::Order,
            reg: Reg::NONE,
        }
    }

    /// True for virtual and physical register dependencies alike
    pub fn is_data(&self) -> bool {
        !matches!(self.kind, DepKind::Order)
    }

    pub fn is_phys(&self) -> bool {
        matches!(self.kind, DepKind::Phys)
    }

    pub fn is_order(&self) -> bool {
        matches!(self.kind, DepKind::Order)
    }
}

bitflags! {
    /// Edge-following flags for [`ScheduleDag::reachable`]
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ReachFlags: u8 {
        const FOLLOW_PREDS_ORDER = 1 << 0;
        const FOLLOW_PREDS_DATA = 1 << 1;
        const FOLLOW_PREDS = Self::FOLLOW_PREDS_ORDER.bits() | Self::FOLLOW_PREDS_DATA.bits();
        const FOLLOW_SUCCS_ORDER = 1 << 2;
        const FOLLOW_SUCCS_DATA = 1 << 3;
        const FOLLOW_SUCCS = Self::FOLLOW_SUCCS_ORDER.bits() | Self::FOLLOW_SUCCS_DATA.bits();
        /// Include the starting unit in the result
        const INCLUDE_UNIT = 1 << 4;
        /// Do not recurse past the immediate neighbours of the start
        const IMMEDIATE = 1 << 5;
    }
}

#[derive(Clone, Default)]
struct UnitLinks {
    preds: Vec<Dep>,
    succs: Vec<Dep>,
}

/// Deterministic set of units, in first-reached order
pub type UnitSet = IndexSet<UnitKey, FixedHasher>;

/// A mutable DAG of schedule units and typed dependencies
///
/// Acyclicity is the caller's responsibility on input; every transformation
/// in this crate preserves it.
#[derive(Clone, Default)]
pub struct ScheduleDag {
    units: IndexMap<UnitKey, UnitLinks, FixedHasher>,
    deps: Vec<Dep>,
    roots: Vec<UnitKey>,
    leaves: Vec<UnitKey>,
    modified: bool,
    // high-water mark so consecutive unique-reg requests never collide,
    // even before the deps carrying them are added
    next_reg: Cell<u32>,
}

fn swap_remove_first<T: PartialEq>(v: &mut Vec<T>, x: &T) -> bool {
    match v.iter().position(|e| e == x) {
        Some(i) => {
            v.swap_remove(i);
            true
        }
        None => false,
    }
}

impl ScheduleDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units in insertion order
    pub fn units(&self) -> impl ExactSizeIterator<Item = UnitKey> + '_ {
        self.units.keys().copied()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn contains_unit(&self, unit: UnitKey) -> bool {
        self.units.contains_key(&unit)
    }

    pub fn roots(&self) -> &[UnitKey] {
        &self.roots
    }

    pub fn leaves(&self) -> &[UnitKey] {
        &self.leaves
    }

    pub fn deps(&self) -> &[Dep] {
        &self.deps
    }

    pub fn preds(&self, unit: UnitKey) -> &[Dep] {
        &self.units[&unit].preds
    }

    pub fn succs(&self, unit: UnitKey) -> &[Dep] {
        &self.units[&unit].succs
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn add_unit(&mut self, unit: UnitKey) {
        self.units.insert(unit, UnitLinks::default());
        self.roots.push(unit);
        self.leaves.push(unit);
        self.modified = true;
    }

    pub fn add_units<I: IntoIterator<Item = UnitKey>>(&mut self, units: I) {
        for unit in units {
            self.add_unit(unit);
        }
    }

    /// Remove a unit and every dependency touching it
    pub fn remove_unit(&mut self, unit: UnitKey) {
        self.deps.retain(|d| d.from != unit && d.to != unit);
        for links in self.units.values_mut() {
            links.preds.retain(|d| d.from != unit && d.to != unit);
            links.succs.retain(|d| d.from != unit && d.to != unit);
        }
        self.units.shift_remove(&unit);

        self.recompute_roots_and_leaves();
        self.modified = true;
    }

    pub fn remove_units<I: IntoIterator<Item = UnitKey>>(&mut self, units: I) {
        for unit in units {
            self.remove_unit(unit);
        }
    }

    fn recompute_roots_and_leaves(&mut self) {
        self.roots.clear();
        self.leaves.clear();
        for (&unit, links) in &self.units {
            if links.preds.is_empty() {
                self.roots.push(unit);
            }
            if links.succs.is_empty() {
                self.leaves.push(unit);
            }
        }
    }

    pub fn add_dep(&mut self, dep: Dep) {
        self.units[&dep.from].succs.push(dep);
        self.units[&dep.to].preds.push(dep);
        self.deps.push(dep);

        swap_remove_first(&mut self.leaves, &dep.from);
        swap_remove_first(&mut self.roots, &dep.to);

        self.next_reg.set(self.next_reg.get().max(dep.reg.0 + 1));
        self.modified = true;
    }

    pub fn add_deps<I: IntoIterator<Item = Dep>>(&mut self, deps: I) {
        for dep in deps {
            self.add_dep(dep);
        }
    }

    /// Remove one instance of `dep`; returns false (and changes nothing)
    /// when no instance is present
    pub fn remove_dep(&mut self, dep: Dep) -> bool {
        if !swap_remove_first(&mut self.deps, &dep) {
            return false;
        }
        swap_remove_first(&mut self.units[&dep.from].succs, &dep);
        swap_remove_first(&mut self.units[&dep.to].preds, &dep);

        if self.units[&dep.from].succs.is_empty() {
            self.leaves.push(dep.from);
        }
        if self.units[&dep.to].preds.is_empty() {
            self.roots.push(dep.to);
        }
        self.modified = true;
        true
    }

    pub fn remove_deps<I: IntoIterator<Item = Dep>>(&mut self, deps: I) {
        for dep in deps {
            self.remove_dep(dep);
        }
    }

    pub fn clear(&mut self) {
        self.units.clear();
        self.deps.clear();
        self.roots.clear();
        self.leaves.clear();
        self.modified = true;
    }

    /// A register id not appearing on any dependency currently in the graph
    pub fn generate_unique_reg_id(&self) -> Reg {
        let next = self.next_reg.get().max(1);
        self.next_reg.set(next + 1);
        Reg(next)
    }

    /// Breadth-first set of units reachable from `unit` along the edges
    /// selected by `flags`
    pub fn reachable(&self, unit: UnitKey, flags: ReachFlags) -> UnitSet {
        let mut seen = UnitSet::default();
        let mut queue = VecDeque::new();
        queue.push_back(unit);

        while let Some(u) = queue.pop_front() {
            if seen.contains(&u) {
                continue;
            }
            if u != unit || flags.contains(ReachFlags::INCLUDE_UNIT) {
                seen.insert(u);
            }
            if flags.contains(ReachFlags::IMMEDIATE) && u != unit {
                continue;
            }

            for dep in self.preds(u) {
                let follow = if dep.is_data() {
                    ReachFlags::FOLLOW_PREDS_DATA
                } else {
                    ReachFlags::FOLLOW_PREDS_ORDER
                };
                if flags.contains(follow) {
                    queue.push_back(dep.from);
                }
            }
            for dep in self.succs(u) {
                let follow = if dep.is_data() {
                    ReachFlags::FOLLOW_SUCCS_DATA
                } else {
                    ReachFlags::FOLLOW_SUCCS_ORDER
                };
                if flags.contains(follow) {
                    queue.push_back(dep.to);
                }
            }
        }

        seen
    }

    /// Registers on outgoing data deps
    pub fn reg_create(&self, unit: UnitKey) -> BTreeSet<Reg> {
        self.succs(unit)
            .iter()
            .filter(|d| d.is_data())
            .map(|d| d.reg)
            .collect()
    }

    /// Registers on outgoing physical data deps
    pub fn reg_phys_create(&self, unit: UnitKey) -> BTreeSet<Reg> {
        self.succs(unit)
            .iter()
            .filter(|d| d.is_phys())
            .map(|d| d.reg)
            .collect()
    }

    /// Registers on incoming data deps
    pub fn reg_use(&self, unit: UnitKey) -> BTreeSet<Reg> {
        self.preds(unit)
            .iter()
            .filter(|d| d.is_data())
            .map(|d| d.reg)
            .collect()
    }

    /// Registers used by `unit` of which it is the only consumer.
    /// Under-approximation of the last-use set; kept deliberately, some
    /// transformations depend on the weaker notion.
    pub fn reg_destroy(&self, unit: UnitKey) -> BTreeSet<Reg> {
        let mut set = BTreeSet::new();
        'deps: for dep in self.preds(unit) {
            if !dep.is_data() {
                continue;
            }
            for sib in self.succs(dep.from) {
                if sib.is_data() && sib.reg == dep.reg && sib.to != unit {
                    continue 'deps;
                }
            }
            set.insert(dep.reg);
        }
        set
    }

    /// Registers used by `unit` that are guaranteed to die there. Unlike
    /// [`reg_destroy`](Self::reg_destroy), a sibling consumer `(p, v, r)`
    /// does not disqualify `r` when `v` must run before `unit` anyway.
    pub fn reg_destroy_exact(&self, unit: UnitKey) -> BTreeSet<Reg> {
        let mut set = BTreeSet::new();
        'deps: for dep in self.preds(unit) {
            if !dep.is_data() {
                continue;
            }
            for sib in self.succs(dep.from) {
                if sib.is_data() && sib.reg == dep.reg && sib.to != unit {
                    let after_sib = self.reachable(sib.to, ReachFlags::FOLLOW_SUCCS);
                    if !after_sib.contains(&unit) {
                        continue 'deps;
                    }
                }
            }
            set.insert(dep.reg);
        }
        set
    }

    /// Duplicate the topology; units are shared with the original
    pub fn dup(&self) -> ScheduleDag {
        self.clone()
    }

    /// Duplicate the topology and the units themselves
    pub fn deep_dup(&self, units: &mut Units) -> ScheduleDag {
        let mut map: IndexMap<UnitKey, UnitKey, FixedHasher> = IndexMap::default();
        let mut dag = ScheduleDag::new();
        for unit in self.units() {
            let copy = units.duplicate(unit);
            map.insert(unit, copy);
            dag.add_unit(copy);
        }
        for dep in &self.deps {
            let mut dep = *dep;
            dep.from = map[&dep.from];
            dep.to = map[&dep.to];
            dag.add_dep(dep);
        }
        dag
    }

    /// Independent DAG containing exactly the units of `set` and the deps
    /// with both endpoints inside it
    pub fn dup_subgraph(&self, set: &UnitSet) -> ScheduleDag {
        let mut dag = ScheduleDag::new();
        for unit in self.units() {
            if set.contains(&unit) {
                dag.add_unit(unit);
            }
        }
        for dep in &self.deps {
            if set.contains(&dep.from) && set.contains(&dep.to) {
                dag.add_dep(*dep);
            }
        }
        dag
    }

    /// Replace the induced subgraph on `set` by the single unit `new_unit`:
    /// crossing deps are rewired to it, internal deps are dropped
    pub fn collapse_subgraph(&mut self, set: &UnitSet, new_unit: UnitKey) {
        let mut crossing = Vec::new();
        for dep in &self.deps {
            match (set.contains(&dep.from), set.contains(&dep.to)) {
                (true, true) => {}
                (true, false) => {
                    let mut d = *dep;
                    d.from = new_unit;
                    crossing.push(d);
                }
                (false, true) => {
                    let mut d = *dep;
                    d.to = new_unit;
                    crossing.push(d);
                }
                (false, false) => {}
            }
        }

        self.remove_units(set.iter().copied().collect::<Vec<_>>());
        self.add_unit(new_unit);
        self.add_deps(crossing);
    }

    /// Swap one unit for another, keeping its deps and its position in the
    /// unit order
    pub fn replace_unit(&mut self, old: UnitKey, new_unit: UnitKey) {
        let index = self.units.get_index_of(&old).expect("unknown unit");
        let links = self.units.shift_remove(&old).unwrap();
        self.units
            .shift_insert(index, new_unit, UnitLinks::default());

        let redirect = |dep: &mut Dep| {
            if dep.from == old {
                dep.from = new_unit;
            }
            if dep.to == old {
                dep.to = new_unit;
            }
        };
        for dep in &mut self.deps {
            redirect(dep);
        }
        for links in self.units.values_mut() {
            links.preds.iter_mut().for_each(redirect);
            links.succs.iter_mut().for_each(redirect);
        }
        let mut links = links;
        links.preds.iter_mut().for_each(redirect);
        links.succs.iter_mut().for_each(redirect);
        self.units[&new_unit] = links;

        for list in [&mut self.roots, &mut self.leaves] {
            for u in list.iter_mut() {
                if *u == old {
                    *u = new_unit;
                }
            }
        }
        self.modified = true;
    }

    /// Fuse `a` and `b` (in that order) into a single [`ChainUnit`]
    ///
    /// The chain's IRP preserves the pair's contribution to peak pressure
    /// exactly when every register `b` reads from outside the pair dies
    /// inside it; otherwise the IRP is a safe upper bound, and the fusion is
    /// refused when `simulate_if_approx` asks for exact results only. Pairs
    /// touched by physical deps are refused outright, hiding a physical
    /// constraint inside a chain could manufacture illegal schedules.
    pub fn fuse_units(
        &mut self,
        units: &mut Units,
        a: UnitKey,
        b: UnitKey,
        simulate_if_approx: bool,
    ) -> Option<UnitKey> {
        let phys_touched = self
            .preds(a)
            .iter()
            .chain(self.succs(a))
            .chain(self.preds(b))
            .chain(self.succs(b))
            .any(Dep::is_phys);
        if phys_touched {
            return None;
        }

        let create_a = self.reg_create(a);
        let use_b = self.reg_use(b);

        // registers b reads that the pair does not produce; they die at the
        // pair unless some consumer outside the pair remains
        let ext_used: Vec<Reg> = use_b.difference(&create_a).copied().collect();
        let mut exact = true;
        for &reg in &ext_used {
            for dep in self.preds(b) {
                if !dep.is_data() || dep.reg != reg {
                    continue;
                }
                for sib in self.succs(dep.from) {
                    if sib.is_data() && sib.reg == reg && sib.to != a && sib.to != b {
                        exact = false;
                    }
                }
            }
        }
        if !exact && simulate_if_approx {
            return None;
        }

        // registers created by a that outlive the pair
        let escaping = create_a
            .iter()
            .filter(|&&reg| {
                self.succs(a)
                    .iter()
                    .any(|d| d.is_data() && d.reg == reg && d.to != b)
            })
            .count();

        let irp_a = units.internal_pressure(a);
        let irp_b = units.internal_pressure(b);
        let db = ext_used.len() as u32;
        let irp = (irp_a + db)
            .max(db + create_a.len() as u32)
            .max(escaping as u32 + irp_b);

        let chain = units.insert(Box::new(ChainUnit::new(vec![a, b], irp)));
        let mut set = UnitSet::default();
        set.insert(a);
        set.insert(b);
        self.collapse_subgraph(&set, chain);
        Some(chain)
    }

    /// Build the dense path matrix for the current graph
    pub fn build_path_map(&self) -> PathMap {
        PathMap::build(self)
    }

    /// Verify the structural invariants: root/leaf caches match the degree
    /// definitions, every dep is linked from both endpoints, and every
    /// endpoint exists
    pub fn check_consistency(&self) -> Result<(), ScheduleError> {
        let fail = |msg: &str| Err(ScheduleError::InconsistentDag(msg.into()));

        for &root in &self.roots {
            let Some(links) = self.units.get(&root) else {
                return fail("unit in roots list is not in master list");
            };
            if !links.preds.is_empty() {
                return fail("unit in roots list has predecessors");
            }
        }
        for &leaf in &self.leaves {
            let Some(links) = self.units.get(&leaf) else {
                return fail("unit in leaves list is not in master list");
            };
            if !links.succs.is_empty() {
                return fail("unit in leaves list has successors");
            }
        }

        for (&unit, links) in &self.units {
            for dep in &links.preds {
                if dep.to != unit {
                    return fail("predecessor dep does not target its unit");
                }
                if !self.units.contains_key(&dep.from) {
                    return fail("predecessor dep source does not exist");
                }
                if !self.deps.contains(dep) {
                    return fail("predecessor dep is not in master list");
                }
            }
            for dep in &links.succs {
                if dep.from != unit {
                    return fail("successor dep does not start at its unit");
                }
                if !self.units.contains_key(&dep.to) {
                    return fail("successor dep target does not exist");
                }
                if !self.deps.contains(dep) {
                    return fail("successor dep is not in master list");
                }
            }

            if links.preds.is_empty() && !self.roots.contains(&unit) {
                return fail("root unit missing from roots list");
            }
            if links.succs.is_empty() && !self.leaves.contains(&unit) {
                return fail("leaf unit missing from leaves list");
            }
        }

        for dep in &self.deps {
            if !self.units[&dep.from].succs.contains(dep) {
                return fail("dep in master list is not attached to its source");
            }
            if !self.units[&dep.to].preds.contains(dep) {
                return fail("dep in master list is not attached to its target");
            }
        }

        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        self.check_consistency().is_ok()
    }
}
