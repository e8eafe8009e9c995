//! Quil programs used by the demo.

use arvak_pvm::{MemoryRef, MemoryType, Program, PvmResult};

/// GHZ state on `num_qubits` qubits, every qubit measured into `ro`.
pub fn ghz(num_qubits: u32) -> PvmResult<Program> {
    let mut program = Program::new();
    program.declare("ro", MemoryType::Bit, u64::from(num_qubits))?;
    program.inst("H 0");
    for q in 1..num_qubits {
        program.inst(format!("CNOT 0 {q}"));
    }
    for q in 0..num_qubits {
        program.measure(q, MemoryRef::new("ro", u64::from(q)))?;
    }
    Ok(program)
}

/// Rotate qubit 0 by `theta`, pause, then measure.
///
/// While the QVM waits, `theta` can be read back or patched before the
/// program is resumed.
pub fn paused_rotation() -> PvmResult<Program> {
    let mut program = Program::new();
    program.declare("theta", MemoryType::Real, 1)?;
    program.declare("ro", MemoryType::Bit, 1)?;
    program.inst("RX(theta) 0").wait();
    program.measure(0, MemoryRef::new("ro", 0))?;
    Ok(program)
}
