//! Local parameter validation.
//!
//! Everything here runs before a payload is built, so a failure never leaves
//! anything behind on the service.

use crate::error::{PvmError, PvmResult};
use crate::protocol::{
    AllocationMethod, ClassicalAddresses, MemoryContents, RegionWrite, SimulationMethod,
    SubRequest,
};

/// The QVM must have at least one qubit.
pub fn validate_num_qubits(num_qubits: u32) -> PvmResult<()> {
    if num_qubits == 0 {
        return Err(PvmError::Validation(
            "num_qubits must be a positive integer".into(),
        ));
    }
    Ok(())
}

/// Check a simulation method given by its wire name.
pub fn validate_simulation_method(method: &str) -> PvmResult<SimulationMethod> {
    method.parse()
}

/// Check an allocation method given by its wire name.
pub fn validate_allocation_method(method: &str) -> PvmResult<AllocationMethod> {
    method.parse()
}

/// `None` means no noise. Otherwise exactly three probabilities in `[0, 1]`.
pub fn validate_noise(noise: Option<&[f64]>) -> PvmResult<()> {
    let Some(noise) = noise else {
        return Ok(());
    };
    if noise.len() != 3 {
        return Err(PvmError::Validation(format!(
            "noise vector must have length 3, got {}",
            noise.len()
        )));
    }
    if let Some(bad) = noise.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(PvmError::Validation(format!(
            "noise probabilities must be in [0, 1], got {bad}"
        )));
    }
    Ok(())
}

fn validate_token(token: &str, what: &str) -> PvmResult<()> {
    if token.trim().is_empty() {
        return Err(PvmError::Validation(format!("{what} must not be empty")));
    }
    Ok(())
}

/// Check that a sub-request carries the parameters its method requires.
pub fn validate_sub_request(sub_request: &SubRequest) -> PvmResult<()> {
    match sub_request {
        SubRequest::RunProgram(req) => {
            if req.compiled_quil.trim().is_empty() {
                return Err(PvmError::Validation(
                    "run-program sub-request requires compiled-quil".into(),
                ));
            }
            validate_addresses(&req.addresses)?;
            if let Some(token) = &req.qvm_token {
                validate_token(token, "qvm-token")?;
                let pinned = req.simulation_method.is_some()
                    || req.allocation_method.is_some()
                    || req.num_qubits.is_some()
                    || req.measurement_noise.is_some()
                    || req.gate_noise.is_some();
                if pinned {
                    return Err(PvmError::Validation(
                        "run-program against a persistent QVM must not set simulation, \
                         allocation, qubit or noise parameters"
                            .into(),
                    ));
                }
            } else {
                if req.simulation_method.is_none() || req.allocation_method.is_none() {
                    return Err(PvmError::Validation(
                        "run-program without qvm-token requires simulation-method and \
                         allocation-method"
                            .into(),
                    ));
                }
                if let Some(n) = req.num_qubits {
                    validate_num_qubits(n)?;
                }
            }
            Ok(())
        }
        SubRequest::QvmMemoryEstimate(req) => validate_num_qubits(req.num_qubits),
    }
}

/// Region names must be non-empty.
pub fn validate_addresses(addresses: &ClassicalAddresses) -> PvmResult<()> {
    if addresses.keys().any(|name| name.trim().is_empty()) {
        return Err(PvmError::Validation(
            "memory region names must not be empty".into(),
        ));
    }
    Ok(())
}

/// Region names must be non-empty, every write must carry at least one
/// value, and sparse writes must not repeat an index.
///
/// An empty write serializes as `[]`, which cannot be told apart from an
/// empty dense write on the wire.
pub fn validate_memory_contents(contents: &MemoryContents) -> PvmResult<()> {
    for (name, write) in contents {
        if name.trim().is_empty() {
            return Err(PvmError::Validation(
                "memory region names must not be empty".into(),
            ));
        }
        let empty = match write {
            RegionWrite::Dense(values) => values.is_empty(),
            RegionWrite::Sparse(pairs) => pairs.is_empty(),
        };
        if empty {
            return Err(PvmError::Validation(format!(
                "write to region {name:?} has no values"
            )));
        }
        if let RegionWrite::Sparse(pairs) = write {
            let mut indices: Vec<u64> = pairs.iter().map(|(i, _)| *i).collect();
            indices.sort_unstable();
            if let Some(w) = indices.windows(2).find(|w| w[0] == w[1]) {
                return Err(PvmError::Validation(format!(
                    "duplicate index {} in write to region {name:?}",
                    w[0]
                )));
            }
        }
    }
    Ok(())
}
