//! QVM-NG RPC protocol types.
//!
//! Every RPC is a JSON object POSTed to the service endpoint, tagged with a
//! `"type"` field naming the method:
//!
//! ```text
//!   {"type": "create-qvm", "simulation-method": "pure-state", ...}  ──→ {"token": "..."}
//!   {"type": "run-program", "qvm-token": "...", "addresses": {...}} ──→ {"ro": [0, 1]}
//!   {"type": "create-job", "sub-request": {"type": "run-program", ...}}
//! ```
//!
//! [`Request`] has one variant per method. [`SubRequest`] is the subset of
//! methods that may be wrapped in a `create-job` call and executed
//! asynchronously.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PvmError, PvmResult};

/// Opaque, service-issued handle for one remote QVM or job.
///
/// Not `Clone`: a token has exactly one owner and is never reused once
/// released.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    /// Wrap a token string returned by the service.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token string, as embedded in request payloads.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the QVM represents the quantum state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationMethod {
    /// Wavefunction simulation.
    #[default]
    PureState,
    /// Density-matrix simulation.
    FullDensityMatrix,
}

impl SimulationMethod {
    /// Wire name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationMethod::PureState => "pure-state",
            SimulationMethod::FullDensityMatrix => "full-density-matrix",
        }
    }
}

impl FromStr for SimulationMethod {
    type Err = PvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pure-state" => Ok(SimulationMethod::PureState),
            "full-density-matrix" => Ok(SimulationMethod::FullDensityMatrix),
            other => Err(PvmError::Validation(format!(
                "Unknown simulation method: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for SimulationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the QVM allocates the state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationMethod {
    /// Lisp heap.
    #[default]
    Native,
    /// C heap.
    Foreign,
}

impl AllocationMethod {
    /// Wire name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMethod::Native => "native",
            AllocationMethod::Foreign => "foreign",
        }
    }
}

impl FromStr for AllocationMethod {
    type Err = PvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(AllocationMethod::Native),
            "foreign" => Ok(AllocationMethod::Foreign),
            other => Err(PvmError::Validation(format!(
                "Unknown allocation method: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pauli noise probabilities `[Px, Py, Pz]`.
///
/// Can only be built through [`NoiseVector::new`], so a value of this type
/// always holds exactly three probabilities in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct NoiseVector([f64; 3]);

impl NoiseVector {
    /// Validate and wrap a noise vector.
    pub fn new(probabilities: &[f64]) -> PvmResult<Self> {
        crate::validate::validate_noise(Some(probabilities))?;
        Ok(Self([probabilities[0], probabilities[1], probabilities[2]]))
    }

    /// The `[Px, Py, Pz]` probabilities.
    pub fn probabilities(&self) -> [f64; 3] {
        self.0
    }
}

impl TryFrom<Vec<f64>> for NoiseVector {
    type Error = PvmError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<NoiseVector> for Vec<f64> {
    fn from(value: NoiseVector) -> Self {
        value.0.to_vec()
    }
}

/// One classical memory cell.
///
/// BIT, OCTET and INTEGER regions hold integers; REAL regions hold floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryValue {
    Integer(i64),
    Real(f64),
}

impl MemoryValue {
    /// The value as a float, regardless of region type.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match self {
            MemoryValue::Integer(v) => *v as f64,
            MemoryValue::Real(v) => *v,
        }
    }
}

impl From<i64> for MemoryValue {
    fn from(v: i64) -> Self {
        MemoryValue::Integer(v)
    }
}

impl From<f64> for MemoryValue {
    fn from(v: f64) -> Self {
        MemoryValue::Real(v)
    }
}

/// Values to write into one memory region.
///
/// The two shapes serialize differently so the service can tell them apart:
/// dense as `[v0, v1, ...]`, sparse as `[[i0, v0], [i1, v1], ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionWrite {
    /// The i-th value is stored at index i.
    Dense(Vec<MemoryValue>),
    /// Each value is stored at its paired index.
    Sparse(Vec<(u64, MemoryValue)>),
}

impl RegionWrite {
    /// Dense write starting at index 0.
    pub fn dense<V: Into<MemoryValue>>(values: impl IntoIterator<Item = V>) -> Self {
        RegionWrite::Dense(values.into_iter().map(Into::into).collect())
    }

    /// Sparse write of `(index, value)` pairs.
    pub fn sparse<V: Into<MemoryValue>>(pairs: impl IntoIterator<Item = (u64, V)>) -> Self {
        RegionWrite::Sparse(pairs.into_iter().map(|(i, v)| (i, v.into())).collect())
    }

    /// The write as `(index, value)` pairs, whichever shape it was given in.
    pub fn indexed(&self) -> Vec<(u64, MemoryValue)> {
        match self {
            RegionWrite::Dense(values) => (0u64..).zip(values.iter().copied()).collect(),
            RegionWrite::Sparse(pairs) => pairs.clone(),
        }
    }
}

/// Region name to values to write.
pub type MemoryContents = BTreeMap<String, RegionWrite>;

/// Region name to the offsets read or written.
pub type ClassicalAddresses = BTreeMap<String, Vec<u64>>;

/// Region name to the values at the requested offsets.
pub type MemoryMap = BTreeMap<String, Vec<MemoryValue>>;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One RPC call to the QVM-NG service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    Version,
    CreateQvm(CreateQvmRequest),
    DeleteQvm(QvmTokenRequest),
    QvmInfo(QvmTokenRequest),
    ReadMemory(ReadMemoryRequest),
    WriteMemory(WriteMemoryRequest),
    Resume(QvmTokenRequest),
    RunProgram(RunProgramRequest),
    QvmMemoryEstimate(MemoryEstimateRequest),
    CreateJob(CreateJobRequest),
    DeleteJob(JobTokenRequest),
    JobInfo(JobTokenRequest),
    JobResult(JobTokenRequest),
}

impl Request {
    /// The `"type"` tag this request is sent with.
    pub fn method(&self) -> &'static str {
        match self {
            Request::Version => "version",
            Request::CreateQvm(_) => "create-qvm",
            Request::DeleteQvm(_) => "delete-qvm",
            Request::QvmInfo(_) => "qvm-info",
            Request::ReadMemory(_) => "read-memory",
            Request::WriteMemory(_) => "write-memory",
            Request::Resume(_) => "resume",
            Request::RunProgram(_) => "run-program",
            Request::QvmMemoryEstimate(_) => "qvm-memory-estimate",
            Request::CreateJob(_) => "create-job",
            Request::DeleteJob(_) => "delete-job",
            Request::JobInfo(_) => "job-info",
            Request::JobResult(_) => "job-result",
        }
    }
}

/// Parameters of `create-qvm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateQvmRequest {
    pub simulation_method: SimulationMethod,
    pub allocation_method: AllocationMethod,
    pub num_qubits: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_noise: Option<NoiseVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_noise: Option<NoiseVector>,
}

/// Parameters of the methods that only take a persistent QVM token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QvmTokenRequest {
    pub qvm_token: String,
}

/// Parameters of `read-memory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReadMemoryRequest {
    pub qvm_token: String,
    pub addresses: ClassicalAddresses,
}

/// Parameters of `write-memory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WriteMemoryRequest {
    pub qvm_token: String,
    pub memory_contents: MemoryContents,
}

/// Parameters of `run-program`.
///
/// Against a persistent QVM (`qvm_token` set) the simulation, allocation and
/// noise fields stay empty: they were fixed when the QVM was created.
/// Without a token the service spins up a throwaway QVM and needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunProgramRequest {
    pub compiled_quil: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qvm_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_method: Option<SimulationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_method: Option<AllocationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_qubits: Option<u32>,
    #[serde(default)]
    pub addresses: ClassicalAddresses,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_noise: Option<NoiseVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_noise: Option<NoiseVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

impl RunProgramRequest {
    /// Run `compiled_quil` against the persistent QVM identified by `qvm_token`.
    pub fn persistent(
        compiled_quil: impl Into<String>,
        qvm_token: &Token,
        addresses: ClassicalAddresses,
        rng_seed: Option<u64>,
    ) -> Self {
        Self {
            compiled_quil: compiled_quil.into(),
            qvm_token: Some(qvm_token.as_str().to_string()),
            simulation_method: None,
            allocation_method: None,
            num_qubits: None,
            addresses,
            measurement_noise: None,
            gate_noise: None,
            rng_seed,
        }
    }
}

/// Parameters of `qvm-memory-estimate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemoryEstimateRequest {
    pub simulation_method: SimulationMethod,
    pub allocation_method: AllocationMethod,
    pub num_qubits: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_noise: Option<NoiseVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_noise: Option<NoiseVector>,
}

/// Parameters of `create-job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateJobRequest {
    pub sub_request: SubRequest,
}

/// Parameters of the methods that only take a job token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobTokenRequest {
    pub job_token: String,
}

/// An RPC method and its parameters, to be executed as an asynchronous job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SubRequest {
    RunProgram(RunProgramRequest),
    QvmMemoryEstimate(MemoryEstimateRequest),
}

impl SubRequest {
    /// Decode and validate an untyped sub-request descriptor.
    ///
    /// The value must carry a `"type"` tag naming a method that can run
    /// asynchronously, plus that method's parameters.
    pub fn from_value(value: serde_json::Value) -> PvmResult<Self> {
        let sub_request: SubRequest = serde_json::from_value(value)
            .map_err(|e| PvmError::Validation(format!("Invalid job sub-request: {e}")))?;
        crate::validate::validate_sub_request(&sub_request)?;
        Ok(sub_request)
    }

    /// The `"type"` tag of the wrapped method.
    pub fn method(&self) -> &'static str {
        match self {
            SubRequest::RunProgram(_) => "run-program",
            SubRequest::QvmMemoryEstimate(_) => "qvm-memory-estimate",
        }
    }

    /// The equivalent synchronous request.
    pub fn into_request(self) -> Request {
        match self {
            SubRequest::RunProgram(req) => Request::RunProgram(req),
            SubRequest::QvmMemoryEstimate(req) => Request::QvmMemoryEstimate(req),
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Reply to `create-qvm` and `create-job`.
#[derive(Debug, Deserialize)]
pub struct TokenReply {
    pub token: String,
}

/// Reply to `qvm-memory-estimate`.
#[derive(Debug, Deserialize)]
pub struct MemoryEstimateReply {
    pub bytes: u64,
}

/// Server-side configuration snapshot of a persistent QVM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QvmInfo {
    #[serde(default)]
    pub qvm_type: Option<String>,
    #[serde(default)]
    pub num_qubits: Option<u32>,
    #[serde(default)]
    pub simulation_method: Option<SimulationMethod>,
    #[serde(default)]
    pub allocation_method: Option<AllocationMethod>,
    #[serde(default)]
    pub measurement_noise: Option<NoiseVector>,
    #[serde(default)]
    pub gate_noise: Option<NoiseVector>,
    /// Any further fields the service reports.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Status of an asynchronous job.
///
/// ```text
///   create-job ──→ Pending ──→ Running ──→ Finished
///                                  │
///                                  └──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    /// Reported as `"error"` on the wire.
    #[serde(rename = "error")]
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "pending" | "queued" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "finished" | "complete" | "completed" => Ok(JobStatus::Finished),
            "error" | "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("unknown job status: {value:?}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "error"),
        }
    }
}

/// Reply to `job-info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub status: JobStatus,
    /// The job's recorded result, once finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure reason, if the job errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
