//! DDL (Data Dependency Language) input.
//!
//! A DDL file is a list of instructions of the form `outs <- ins`, where
//! each side is a comma-separated list of whitespace-free names. `;` starts
//! a comment, blank lines are skipped. The format models data dependencies
//! only; every use reads the value of the name's last definition.
//!
//! ```text
//! a <-
//! b <-
//! d <- a
//! c <- a, b
//! e <- c, d
//! <- e
//! ```

use crate::graph::{Dep, Reg, ScheduleDag};
use crate::unit::{ScheduleUnit, UnitKey, Units};
use rpsched_core::collections::HashMap;
use std::path::Path;

/// Category of failures loading a DDL program
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum DdlError {
    #[error("cannot read ddl file: {0}")]
    Io(#[from] std::io::Error),

    #[error("illformed ddl line '{0}'")]
    MalformedLine(String),

    #[error("ddl instruction '{instr}' uses the undefined name '{name}'")]
    UndefinedName { instr: String, name: String },
}

/// One parsed DDL instruction
pub struct DdlUnit {
    outs: Vec<String>,
    ins: Vec<String>,
}

impl DdlUnit {
    pub fn new(outs: Vec<String>, ins: Vec<String>) -> Self {
        Self { outs, ins }
    }

    pub fn outs(&self) -> &[String] {
        &self.outs
    }

    pub fn ins(&self) -> &[String] {
        &self.ins
    }
}

impl ScheduleUnit for DdlUnit {
    fn label(&self) -> String {
        format!("{} <- {}", self.outs.join(", "), self.ins.join(", "))
    }

    fn dup(&self) -> Box<dyn ScheduleUnit> {
        Box::new(DdlUnit {
            outs: self.outs.clone(),
            ins: self.ins.clone(),
        })
    }

    fn internal_pressure(&self) -> u32 {
        0
    }
}

fn parse_name_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Parse DDL source into program order, registering one unit per
/// instruction
pub fn parse_ddl(source: &str, units: &mut Units) -> Result<Vec<UnitKey>, DdlError> {
    let mut program = Vec::new();
    for raw in source.lines() {
        let line = match raw.find(';') {
            Some(comment) => &raw[..comment],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(arrow) = line.find("<-") else {
            return Err(DdlError::MalformedLine(line.into()));
        };
        let instr = DdlUnit::new(
            parse_name_list(&line[..arrow]),
            parse_name_list(&line[arrow + 2..]),
        );
        program.push(units.insert(Box::new(instr)));
    }
    Ok(program)
}

pub fn load_ddl_file(path: &Path, units: &mut Units) -> Result<Vec<UnitKey>, DdlError> {
    parse_ddl(&std::fs::read_to_string(path)?, units)
}

/// Build the data-dependence DAG of a DDL program: each use depends on the
/// last definition of its name, through a register stable per name
pub fn build_dag_from_ddl(
    program: &[UnitKey],
    units: &Units,
    dag: &mut ScheduleDag,
) -> Result<(), DdlError> {
    for &key in program {
        dag.add_unit(key);
    }

    let mut last_def: HashMap<&str, UnitKey> = HashMap::default();
    let mut name_reg: HashMap<&str, Reg> = HashMap::default();
    let mut next_reg = 1u32;

    for &key in program {
        let instr = units
            .get(key)
            .downcast_ref::<DdlUnit>()
            .expect("ddl program refers to ddl units");

        for name in instr.ins() {
            let reg = *name_reg.entry(name).or_insert_with(|| {
                let reg = Reg(next_reg);
                next_reg += 1;
                reg
            });
            let Some(&def) = last_def.get(name.as_str()) else {
                return Err(DdlError::UndefinedName {
                    instr: instr.label(),
                    name: name.clone(),
                });
            };
            dag.add_dep(Dep::data(def, key, reg));
        }

        for name in instr.outs() {
            name_reg.entry(name).or_insert_with(|| {
                let reg = Reg(next_reg);
                next_reg += 1;
                reg
            });
            last_def.insert(name, key);
        }
    }
    Ok(())
}
