//! Schedule units and the registry that owns them.
//!
//! Units are shared by many DAGs at once: a sub-DAG produced by
//! [`ScheduleDag::dup_subgraph`](crate::graph::ScheduleDag::dup_subgraph)
//! refers to the same instructions as its parent. The registry is the single
//! owner; everything else holds [`UnitKey`]s, and unit identity is key
//! identity.

use downcast_rs::{Downcast, impl_downcast};
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// A unique identifier for a schedule unit in a [`Units`] registry
    pub struct UnitKey;
}

/// The capabilities a schedulable instruction must expose
///
/// Implementations are free to carry whatever payload they want (parsed DDL
/// instructions, LSD nodes, fused chains); the scheduler only ever needs a
/// label, a duplicate, and the pressure hidden inside the unit.
pub trait ScheduleUnit: Downcast {
    /// Textual label, possibly spanning several lines
    fn label(&self) -> String;

    /// Produce an equivalent unit, ownership transferred to the caller
    fn dup(&self) -> Box<dyn ScheduleUnit>;

    /// Number of values live strictly inside the unit and invisible on its
    /// boundary (non-zero for fused chains)
    fn internal_pressure(&self) -> u32;
}
impl_downcast!(ScheduleUnit);

/// A composite unit whose payload is a fixed internal order of sub-units
///
/// Participates in a DAG exactly like a primitive unit; the explicit IRP
/// accounts for values that live and die between the parts.
#[derive(Clone, Default)]
pub struct ChainUnit {
    parts: Vec<UnitKey>,
    irp: u32,
}

impl ChainUnit {
    pub fn new(parts: Vec<UnitKey>, irp: u32) -> Self {
        Self { parts, irp }
    }

    pub fn parts(&self) -> &[UnitKey] {
        &self.parts
    }

    pub fn set_internal_pressure(&mut self, irp: u32) {
        self.irp = irp;
    }
}

impl ScheduleUnit for ChainUnit {
    fn label(&self) -> String {
        format!("[Chain IRP={}]", self.irp)
    }

    fn dup(&self) -> Box<dyn ScheduleUnit> {
        Box::new(self.clone())
    }

    fn internal_pressure(&self) -> u32 {
        self.irp
    }
}

/// Owning registry of every schedule unit in flight
///
/// Units are never freed while scheduling runs; transformations that create
/// wrapper units remove them once they have been expanded out of the final
/// chain.
#[derive(Default)]
pub struct Units {
    units: SlotMap<UnitKey, Box<dyn ScheduleUnit>>,
}

impl Units {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: Box<dyn ScheduleUnit>) -> UnitKey {
        self.units.insert(unit)
    }

    pub fn get(&self, key: UnitKey) -> &dyn ScheduleUnit {
        &*self.units[key]
    }

    pub fn get_mut(&mut self, key: UnitKey) -> &mut Box<dyn ScheduleUnit> {
        &mut self.units[key]
    }

    pub fn remove(&mut self, key: UnitKey) -> Option<Box<dyn ScheduleUnit>> {
        self.units.remove(key)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Duplicate a unit into a fresh registry slot
    pub fn duplicate(&mut self, key: UnitKey) -> UnitKey {
        let copy = self.units[key].dup();
        self.units.insert(copy)
    }

    pub fn internal_pressure(&self, key: UnitKey) -> u32 {
        self.units[key].internal_pressure()
    }

    /// The sub-units of a chain unit, or `None` for a primitive unit
    pub fn chain_parts(&self, key: UnitKey) -> Option<&[UnitKey]> {
        self.units[key]
            .downcast_ref::<ChainUnit>()
            .map(ChainUnit::parts)
    }

    /// Label of a unit, rendering chain units with their parts inline
    pub fn label(&self, key: UnitKey) -> String {
        match self.units[key].downcast_ref::<ChainUnit>() {
            Some(chain) => {
                let mut out = chain.label();
                for (i, &part) in chain.parts().iter().enumerate() {
                    out.push('\n');
                    if i != 0 {
                        out.push_str("[Then]\n");
                    }
                    out.push_str(&self.label(part));
                }
                out
            }
            None => self.units[key].label(),
        }
    }
}
