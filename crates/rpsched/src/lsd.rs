//! LSD (LLVM Schedule DAG) input and output.
//!
//! A line-oriented dump of a schedule graph:
//!
//! ```text
//! Unit u0 Name load a\
//! second label line
//! To u1 Latency 1 Kind data Reg 1
//! To u2 Latency 1 Kind order
//! ```
//!
//! A trailing `\` continues a unit name on the next line. Latencies are
//! parsed and discarded; this scheduler does not model them.

use crate::graph::{Dep, DepKind, Reg, ScheduleDag};
use crate::unit::{ScheduleUnit, UnitKey, Units};
use rpsched_core::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Category of failures loading or writing an LSD file
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum LsdError {
    #[error("cannot access lsd file: {0}")]
    Io(#[from] std::io::Error),

    #[error("illformed lsd file: {reason} ('{line}')")]
    Malformed { reason: &'static str, line: String },
}

fn malformed(reason: &'static str, line: &str) -> LsdError {
    LsdError::Malformed {
        reason,
        line: line.into(),
    }
}

/// A unit read from an LSD file: a file-local id and a display name
pub struct LsdUnit {
    id: String,
    name: String,
}

impl LsdUnit {
    pub fn new(id: String) -> Self {
        Self {
            id,
            name: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name_mut(&mut self) -> &mut String {
        &mut self.name
    }
}

impl ScheduleUnit for LsdUnit {
    fn label(&self) -> String {
        self.name.clone()
    }

    fn dup(&self) -> Box<dyn ScheduleUnit> {
        Box::new(LsdUnit {
            id: self.id.clone(),
            name: self.name.clone(),
        })
    }

    fn internal_pressure(&self) -> u32 {
        0
    }
}

/// Parse an LSD dump into `dag`, registering its units as it goes
pub fn parse_lsd(source: &str, units: &mut Units, dag: &mut ScheduleDag) -> Result<(), LsdError> {
    let mut by_id: HashMap<String, UnitKey> = HashMap::default();
    let mut current: Option<UnitKey> = None;
    let mut lines = source.lines();

    let mut intern = |name: &str, units: &mut Units, dag: &mut ScheduleDag| -> UnitKey {
        *by_id.entry(name.to_string()).or_insert_with(|| {
            let key = units.insert(Box::new(LsdUnit::new(name.to_string())));
            dag.add_unit(key);
            key
        })
    };

    while let Some(raw) = lines.next() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("Unit ") {
            let rest = rest.trim_start();
            let Some((id, rest)) = rest.split_once(' ') else {
                return Err(malformed("Unit line with no name", line));
            };
            let key = intern(id, units, dag);
            current = Some(key);

            let Some(name_part) = rest.trim_start().strip_prefix("Name ") else {
                return Err(malformed("Unit line with no name", line));
            };

            let mut name = String::new();
            let mut part = name_part;
            while let Some(stem) = part.strip_suffix('\\') {
                name.push_str(stem);
                name.push('\n');
                part = lines
                    .next()
                    .ok_or_else(|| malformed("name continuation at end of file", line))?;
            }
            name.push_str(part);

            let unit = units
                .get_mut(key)
                .downcast_mut::<LsdUnit>()
                .expect("lsd ids intern lsd units");
            *unit.name_mut() = name;
        } else if let Some(rest) = line.strip_prefix("To ") {
            let Some(from) = current else {
                return Err(malformed("To line with no current unit", line));
            };
            let rest = rest.trim_start();
            let Some((id, rest)) = rest.split_once(' ') else {
                return Err(malformed("incomplete To line", line));
            };
            let to = intern(id, units, dag);

            let rest = rest.trim_start();
            let Some(rest) = rest.strip_prefix("Latency ") else {
                return Err(malformed("To line with no latency", line));
            };
            let rest = rest.trim_start();
            let Some((latency, rest)) = rest.split_once(' ') else {
                return Err(malformed("To line with no kind", line));
            };
            // parsed for validation only, latencies are not modeled
            latency
                .parse::<u32>()
                .map_err(|_| malformed("To line with invalid latency", line))?;

            let rest = rest.trim_start();
            let Some(rest) = rest.strip_prefix("Kind ") else {
                return Err(malformed("To line with no kind", line));
            };
            let rest = rest.trim_start();

            match rest.split_once(' ') {
                None if rest == "order" => {
                    dag.add_dep(Dep::order(from, to));
                }
                Some(("data", reg_part)) => {
                    let reg_part = reg_part.trim_start();
                    let Some(reg) = reg_part.strip_prefix("Reg ") else {
                        return Err(malformed("data To line with no reg", line));
                    };
                    let reg = reg
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| malformed("To line with invalid reg", line))?;
                    dag.add_dep(Dep::data(from, to, Reg(reg)));
                }
                _ => return Err(malformed("To line with bad kind", line)),
            }
        } else {
            return Err(malformed("unknown line type", line));
        }
    }
    Ok(())
}

pub fn load_lsd_file(path: &Path, units: &mut Units, dag: &mut ScheduleDag) -> Result<(), LsdError> {
    parse_lsd(&std::fs::read_to_string(path)?, units, dag)
}

/// Serialize a DAG back to the LSD format, with stable `u<n>` unit ids
pub fn write_lsd(units: &Units, dag: &ScheduleDag, out: &mut dyn Write) -> Result<(), LsdError> {
    let mut ids: HashMap<UnitKey, String> = HashMap::default();
    for (i, unit) in dag.units().enumerate() {
        ids.insert(unit, format!("u{i}"));
    }

    for unit in dag.units() {
        let name = units.label(unit).replace('\n', "\\\n");
        writeln!(out, "Unit {} Name {}", ids[&unit], name)?;
        for dep in dag.succs(unit) {
            match dep.kind {
                DepKind::Order => {
                    writeln!(out, "To {} Latency 1 Kind order", ids[&dep.to])?;
                }
                DepKind::Data | DepKind::Phys => {
                    writeln!(
                        out,
                        "To {} Latency 1 Kind data Reg {}",
                        ids[&dep.to], dep.reg.0
                    )?;
                }
            }
        }
    }
    Ok(())
}

pub fn dump_lsd_file(units: &Units, dag: &ScheduleDag, path: &Path) -> Result<(), LsdError> {
    let mut file = std::fs::File::create(path)?;
    write_lsd(units, dag, &mut file)
}
