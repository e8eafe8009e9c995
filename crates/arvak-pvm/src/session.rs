//! Persistent QVM sessions.
//!
//! A [`Session`] owns one persistent QVM on the service. The QVM is
//! allocated by [`Session::create`] and released exactly once, either by an
//! explicit [`Session::close`] or, as a fallback, when the session is
//! dropped.
//!
//! ```text
//!   create ──→ active ──close()──→ closed
//!     │                              ▲
//!     └── (validation / version       │
//!          failure: no session)     drop
//! ```

use futures::future::BoxFuture;
use tracing::{info, instrument, warn};

use crate::connection::{Connection, Release};
use crate::error::{PvmError, PvmResult};
use crate::job::AsyncJob;
use crate::program::Program;
use crate::protocol::{
    AllocationMethod, ClassicalAddresses, CreateQvmRequest, MemoryContents,
    MemoryEstimateRequest, MemoryMap, NoiseVector, QvmInfo, RunProgramRequest,
    SimulationMethod, SubRequest, Token,
};
use crate::validate::{
    validate_addresses, validate_memory_contents, validate_noise, validate_num_qubits,
};

/// Parameters pinned when a persistent QVM is created.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub num_qubits: u32,
    pub simulation_method: SimulationMethod,
    pub allocation_method: AllocationMethod,
    pub measurement_noise: Option<NoiseVector>,
    pub gate_noise: Option<NoiseVector>,
    /// Seed sent with every `run-program` call.
    pub random_seed: Option<u64>,
}

impl SessionConfig {
    /// A noiseless pure-state QVM with natively allocated memory.
    pub fn new(num_qubits: u32) -> Self {
        Self {
            num_qubits,
            simulation_method: SimulationMethod::default(),
            allocation_method: AllocationMethod::default(),
            measurement_noise: None,
            gate_noise: None,
            random_seed: None,
        }
    }

    pub fn with_simulation_method(mut self, method: SimulationMethod) -> Self {
        self.simulation_method = method;
        self
    }

    pub fn with_allocation_method(mut self, method: AllocationMethod) -> Self {
        self.allocation_method = method;
        self
    }

    /// Pauli X, Y, Z probabilities applied before each measurement.
    pub fn with_measurement_noise(mut self, probabilities: &[f64]) -> PvmResult<Self> {
        self.measurement_noise = Some(NoiseVector::new(probabilities)?);
        Ok(self)
    }

    /// Pauli X, Y, Z probabilities applied after each gate.
    pub fn with_gate_noise(mut self, probabilities: &[f64]) -> PvmResult<Self> {
        self.gate_noise = Some(NoiseVector::new(probabilities)?);
        Ok(self)
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Check every field.
    pub fn validate(&self) -> PvmResult<()> {
        validate_num_qubits(self.num_qubits)?;
        for noise in [&self.measurement_noise, &self.gate_noise].into_iter().flatten() {
            validate_noise(Some(&noise.probabilities()[..]))?;
        }
        Ok(())
    }

    fn create_request(&self) -> CreateQvmRequest {
        CreateQvmRequest {
            simulation_method: self.simulation_method,
            allocation_method: self.allocation_method,
            num_qubits: self.num_qubits,
            measurement_noise: self.measurement_noise,
            gate_noise: self.gate_noise,
        }
    }

    fn estimate_request(&self) -> MemoryEstimateRequest {
        MemoryEstimateRequest {
            simulation_method: self.simulation_method,
            allocation_method: self.allocation_method,
            num_qubits: self.num_qubits,
            measurement_noise: self.measurement_noise,
            gate_noise: self.gate_noise,
        }
    }
}

/// Bytes the service needs to hold the state of a QVM configured as `config`.
///
/// Nothing is allocated, so the service version is not checked.
pub async fn estimate_memory(connection: &Connection, config: &SessionConfig) -> PvmResult<u64> {
    config.validate()?;
    connection
        .qvm_memory_estimate(config.estimate_request())
        .await
}

/// A persistent QVM held open on the service.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    connection: Connection,
    token: Option<Token>,
}

impl Session {
    /// Allocate a persistent QVM.
    ///
    /// The configuration is validated and the service version checked before
    /// anything is allocated.
    #[instrument(skip_all, fields(num_qubits = config.num_qubits))]
    pub async fn create(config: SessionConfig, connection: &Connection) -> PvmResult<Self> {
        config.validate()?;
        connection.check_compatibility().await?;

        let token = connection.create_qvm(config.create_request()).await?;
        info!(%token, "Persistent QVM created");

        Ok(Self {
            config,
            connection: connection.clone(),
            token: Some(token),
        })
    }

    /// Run `body` against a fresh session, then close it.
    ///
    /// The session is closed whether the body succeeds or fails. If both the
    /// body and the close fail, the body's error is returned.
    ///
    /// ```ignore
    /// let values = Session::scope(config, &connection, |session| {
    ///     Box::pin(async move { session.read_memory(&addresses).await })
    /// })
    /// .await?;
    /// ```
    pub async fn scope<T, F>(
        config: SessionConfig,
        connection: &Connection,
        body: F,
    ) -> PvmResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, PvmResult<T>>,
    {
        let mut session = Session::create(config, connection).await?;
        let result = body(&mut session).await;
        let closed = session.close().await;

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Failed to close session after error");
                Err(e)
            }
        }
    }

    /// Release the persistent QVM.
    ///
    /// Closing an already closed session does nothing. If the service
    /// rejects the release the session stays active, so the release can be
    /// retried.
    pub async fn close(&mut self) -> PvmResult<()> {
        let Some(token) = &self.token else {
            return Ok(());
        };
        self.connection.delete_qvm(token).await?;
        info!(%token, "Persistent QVM released");
        self.token = None;
        Ok(())
    }

    fn active_token(&self, operation: &str) -> PvmResult<&Token> {
        self.token.as_ref().ok_or_else(|| {
            PvmError::Usage(format!("cannot {operation}: the session has been closed"))
        })
    }

    /// The token of the persistent QVM, or `None` once closed.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Version reported by the service.
    pub async fn get_version_info(&self) -> PvmResult<String> {
        self.connection.get_version_info().await
    }

    /// Configuration of the persistent QVM as the service sees it.
    pub async fn get_info(&self) -> PvmResult<QvmInfo> {
        let token = self.active_token("get info")?;
        self.connection.qvm_info(token).await
    }

    /// Read classical memory, e.g. `{"ro": [0, 1]}`.
    pub async fn read_memory(&self, addresses: &ClassicalAddresses) -> PvmResult<MemoryMap> {
        let token = self.active_token("read memory")?;
        validate_addresses(addresses)?;
        self.connection.read_memory(token, addresses).await
    }

    /// Write classical memory.
    pub async fn write_memory(&self, contents: &MemoryContents) -> PvmResult<()> {
        let token = self.active_token("write memory")?;
        validate_memory_contents(contents)?;
        self.connection.write_memory(token, contents).await
    }

    /// Continue a program paused on `WAIT`.
    ///
    /// The service rejects this if the QVM is not waiting.
    pub async fn resume(&self) -> PvmResult<()> {
        let token = self.active_token("resume")?;
        self.connection.resume(token).await
    }

    /// Build the `run-program` request for `program` on this session.
    ///
    /// Simulation, allocation and noise parameters are left out: the service
    /// already holds them.
    fn run_program_request(&self, program: &Program) -> PvmResult<RunProgramRequest> {
        let token = self.active_token("run program")?;
        if program.is_empty() {
            return Err(PvmError::Validation("cannot run an empty program".into()));
        }
        Ok(RunProgramRequest::persistent(
            program.to_quil(),
            token,
            program.classical_addresses(),
            self.config.random_seed,
        ))
    }

    /// Run `program` and return the memory its measurements wrote.
    pub async fn run_program(&self, program: &Program) -> PvmResult<MemoryMap> {
        let request = self.run_program_request(program)?;
        self.connection.run_program(request).await
    }

    /// Submit `program` as an asynchronous job.
    ///
    /// The job runs against this session's QVM; its result has the same
    /// shape as the return value of [`Session::run_program`].
    pub async fn run_program_async(&self, program: &Program) -> PvmResult<AsyncJob> {
        let request = self.run_program_request(program)?;
        AsyncJob::create(SubRequest::RunProgram(request), &self.connection).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.connection.release_detached(Release::Qvm(token));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new(2);
        assert_eq!(config.simulation_method, SimulationMethod::PureState);
        assert_eq!(config.allocation_method, AllocationMethod::Native);
        assert!(config.measurement_noise.is_none());
        assert!(config.random_seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new(3)
            .with_simulation_method(SimulationMethod::FullDensityMatrix)
            .with_allocation_method(AllocationMethod::Foreign)
            .with_random_seed(52)
            .with_gate_noise(&[0.01, 0.0, 0.02])
            .unwrap();
        assert_eq!(config.random_seed, Some(52));
        assert_eq!(
            config.gate_noise.as_ref().map(NoiseVector::probabilities),
            Some([0.01, 0.0, 0.02])
        );

        let request = config.create_request();
        assert_eq!(request.num_qubits, 3);
        assert_eq!(request.simulation_method, SimulationMethod::FullDensityMatrix);
        assert!(request.measurement_noise.is_none());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(SessionConfig::new(0).validate().is_err());
        assert!(SessionConfig::new(1).with_measurement_noise(&[0.1, 0.1]).is_err());
        assert!(SessionConfig::new(1).with_gate_noise(&[0.1, 1.5, 0.0]).is_err());
    }
}
