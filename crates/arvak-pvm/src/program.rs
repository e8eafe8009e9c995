//! Quil programs submitted to a persistent QVM.
//!
//! A [`Program`] is built instruction by instruction and rendered to Quil
//! text for the `run-program` call. Only the pieces the client needs to
//! understand are modelled: memory declarations and measurements, which
//! together determine which classical addresses a run writes. Anything else
//! is passed through as raw text.

use std::fmt;

use crate::error::{PvmError, PvmResult};
use crate::protocol::ClassicalAddresses;

/// Element type of a declared memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Bit,
    Octet,
    Integer,
    Real,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryType::Bit => write!(f, "BIT"),
            MemoryType::Octet => write!(f, "OCTET"),
            MemoryType::Integer => write!(f, "INTEGER"),
            MemoryType::Real => write!(f, "REAL"),
        }
    }
}

/// A single cell of a memory region, e.g. `ro[1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryRef {
    pub name: String,
    pub offset: u64,
}

impl MemoryRef {
    pub fn new(name: impl Into<String>, offset: u64) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

impl fmt::Display for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.offset)
    }
}

/// A declared memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub memory_type: MemoryType,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Instruction {
    Declare(Declaration),
    Measure { qubit: u32, target: Option<MemoryRef> },
    Wait,
    Raw(String),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Declare(decl) if decl.length == 1 => {
                write!(f, "DECLARE {} {}", decl.name, decl.memory_type)
            }
            Instruction::Declare(decl) => write!(
                f,
                "DECLARE {} {}[{}]",
                decl.name, decl.memory_type, decl.length
            ),
            Instruction::Measure {
                qubit,
                target: Some(target),
            } => write!(f, "MEASURE {qubit} {target}"),
            Instruction::Measure { qubit, target: None } => write!(f, "MEASURE {qubit}"),
            Instruction::Wait => write!(f, "WAIT"),
            Instruction::Raw(text) => f.write_str(text),
        }
    }
}

/// A Quil program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a memory region of `length` cells.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        memory_type: MemoryType,
        length: u64,
    ) -> PvmResult<&mut Self> {
        let name = name.into();
        if name.is_empty() || length == 0 {
            return Err(PvmError::Validation(format!(
                "invalid declaration of region {name:?} with length {length}"
            )));
        }
        if self.declaration(&name).is_some() {
            return Err(PvmError::Validation(format!(
                "region {name:?} is already declared"
            )));
        }
        self.instructions.push(Instruction::Declare(Declaration {
            name,
            memory_type,
            length,
        }));
        Ok(self)
    }

    /// Measure `qubit` into a declared memory cell.
    pub fn measure(&mut self, qubit: u32, target: MemoryRef) -> PvmResult<&mut Self> {
        let Some(decl) = self.declaration(&target.name) else {
            return Err(PvmError::Validation(format!(
                "measurement into undeclared region {:?}",
                target.name
            )));
        };
        if target.offset >= decl.length {
            return Err(PvmError::Validation(format!(
                "{target} is out of bounds for region of length {}",
                decl.length
            )));
        }
        self.instructions.push(Instruction::Measure {
            qubit,
            target: Some(target),
        });
        Ok(self)
    }

    /// Measure `qubit` and discard the outcome.
    pub fn measure_discard(&mut self, qubit: u32) -> &mut Self {
        self.instructions.push(Instruction::Measure {
            qubit,
            target: None,
        });
        self
    }

    /// Pause the QVM until it is resumed.
    pub fn wait(&mut self) -> &mut Self {
        self.instructions.push(Instruction::Wait);
        self
    }

    /// Append a raw Quil instruction, e.g. `"H 0"` or `"RX(theta) 1"`.
    ///
    /// Raw instructions are not inspected: memory they write does not show
    /// up in [`Program::classical_addresses`].
    pub fn inst(&mut self, quil: impl Into<String>) -> &mut Self {
        self.instructions.push(Instruction::Raw(quil.into()));
        self
    }

    /// Look up a declared region by name.
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations().find(|decl| decl.name == name)
    }

    /// All declared regions, in program order.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.instructions.iter().filter_map(|inst| match inst {
            Instruction::Declare(decl) => Some(decl),
            _ => None,
        })
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the program has no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The classical addresses written by this program's measurements.
    ///
    /// Offsets are sorted and deduplicated per region.
    pub fn classical_addresses(&self) -> ClassicalAddresses {
        let mut addresses = ClassicalAddresses::new();
        for inst in &self.instructions {
            if let Instruction::Measure {
                target: Some(target),
                ..
            } = inst
            {
                addresses
                    .entry(target.name.clone())
                    .or_default()
                    .push(target.offset);
            }
        }
        for offsets in addresses.values_mut() {
            offsets.sort_unstable();
            offsets.dedup();
        }
        addresses
    }

    /// Render the program as Quil text.
    pub fn to_quil(&self) -> String {
        let mut out = String::new();
        for inst in &self.instructions {
            out.push_str(&inst.to_string());
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_quil())
    }
}
