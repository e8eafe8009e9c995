//! In-process QVM-NG stand-in for integration tests.
//!
//! Implements [`Transport`] directly, so requests never leave the process.
//! Every request is recorded and can be inspected after the fact.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arvak_pvm::protocol::{
    CreateQvmRequest, MemoryEstimateRequest, ReadMemoryRequest, RunProgramRequest,
    WriteMemoryRequest,
};
use arvak_pvm::{
    Connection, MemoryMap, MemoryValue, Reply, Request, SimulationMethod, SubRequest, Transport,
    TransportError,
};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

pub const ENDPOINT: &str = "fake://qvm-ng";

struct Qvm {
    create: CreateQvmRequest,
    memory: BTreeMap<String, Vec<MemoryValue>>,
    waiting: bool,
}

struct Job {
    polls_remaining: u32,
    result: Result<Value, String>,
}

struct State {
    version: String,
    reachable: bool,
    timing_out: bool,
    polls_until_finished: u32,
    failing_delete_qvm: u32,
    requests: Vec<Request>,
    qvms: FxHashMap<String, Qvm>,
    jobs: FxHashMap<String, Job>,
}

/// A fake QVM-NG service.
pub struct FakeQvm {
    state: Mutex<State>,
}

impl FakeQvm {
    pub fn new() -> Arc<Self> {
        Self::with_version("1.17.0 [cf3f91f]")
    }

    pub fn with_version(version: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                version: version.to_string(),
                reachable: true,
                timing_out: false,
                polls_until_finished: 2,
                failing_delete_qvm: 0,
                requests: Vec::new(),
                qvms: FxHashMap::default(),
                jobs: FxHashMap::default(),
            }),
        })
    }

    /// A connection through this service with a short poll interval.
    pub fn connection(self: &Arc<Self>) -> Connection {
        Connection::new(self.clone()).with_poll_interval(Duration::from_millis(10))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Make every request time out after being received.
    pub fn set_timing_out(&self, timing_out: bool) {
        self.state().timing_out = timing_out;
    }

    /// Number of `job-info` polls a new job answers with `running`.
    pub fn set_polls_until_finished(&self, polls: u32) {
        self.state().polls_until_finished = polls;
    }

    /// Make the next `count` `delete-qvm` calls fail.
    pub fn fail_delete_qvm(&self, count: u32) {
        self.state().failing_delete_qvm = count;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state().requests.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method() == method)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.state().requests.len()
    }

    pub fn live_qvms(&self) -> usize {
        self.state().qvms.len()
    }

    pub fn live_jobs(&self) -> usize {
        self.state().jobs.len()
    }

    /// Full contents of a region of a live QVM.
    pub fn region(&self, token: &str, region: &str) -> Option<Vec<MemoryValue>> {
        self.state()
            .qvms
            .get(token)
            .and_then(|qvm| qvm.memory.get(region).cloned())
    }

    /// Wait until the fake has seen `count` calls of `method`.
    ///
    /// Used to observe releases spawned from `Drop`.
    pub async fn wait_for(&self, method: &str, count: usize) {
        for _ in 0..1000 {
            if self.count(method) >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("timed out waiting for {count} {method} call(s)");
    }
}

fn remote(message: impl Into<String>) -> TransportError {
    TransportError::Remote {
        status: 400,
        message: message.into(),
    }
}

fn reply(value: &Value) -> Reply {
    Reply::new(value.to_string())
}

impl State {
    fn qvm(&mut self, token: &str) -> Result<&mut Qvm, TransportError> {
        self.qvms
            .get_mut(token)
            .ok_or_else(|| remote(format!("Unknown QVM token {token}")))
    }

    fn handle(&mut self, request: Request) -> Result<Reply, TransportError> {
        match request {
            Request::Version => Ok(Reply::new(self.version.clone())),
            Request::CreateQvm(req) => {
                let token = uuid::Uuid::new_v4().to_string();
                self.qvms.insert(
                    token.clone(),
                    Qvm {
                        create: req,
                        memory: BTreeMap::new(),
                        waiting: false,
                    },
                );
                Ok(reply(&json!({ "token": token })))
            }
            Request::DeleteQvm(req) => {
                if self.failing_delete_qvm > 0 {
                    self.failing_delete_qvm -= 1;
                    return Err(TransportError::Remote {
                        status: 503,
                        message: "QVM busy".into(),
                    });
                }
                self.qvms
                    .remove(&req.qvm_token)
                    .map(|_| reply(&json!(true)))
                    .ok_or_else(|| remote(format!("Unknown QVM token {}", req.qvm_token)))
            }
            Request::QvmInfo(req) => {
                let qvm = self.qvm(&req.qvm_token)?;
                let mut info = serde_json::to_value(&qvm.create)
                    .map_err(|e| remote(e.to_string()))?;
                info["qvm-type"] = json!("PERSISTENT");
                Ok(reply(&info))
            }
            Request::ReadMemory(req) => self.read_memory(&req),
            Request::WriteMemory(req) => self.write_memory(req),
            Request::Resume(req) => {
                let qvm = self.qvm(&req.qvm_token)?;
                if !qvm.waiting {
                    return Err(remote("QVM is not waiting"));
                }
                qvm.waiting = false;
                Ok(reply(&json!(true)))
            }
            Request::RunProgram(req) => {
                let result = self.run_program(&req)?;
                Ok(reply(&serde_json::to_value(result).map_err(|e| remote(e.to_string()))?))
            }
            Request::QvmMemoryEstimate(req) => {
                Ok(reply(&json!({ "bytes": memory_estimate(&req) })))
            }
            Request::CreateJob(req) => {
                let result = match req.sub_request {
                    SubRequest::RunProgram(run) => self
                        .run_program(&run)
                        .map(|memory| serde_json::to_value(memory).unwrap_or(Value::Null))
                        .map_err(|e| e.to_string()),
                    SubRequest::QvmMemoryEstimate(est) => Ok(json!(memory_estimate(&est))),
                };
                let token = uuid::Uuid::new_v4().to_string();
                self.jobs.insert(
                    token.clone(),
                    Job {
                        polls_remaining: self.polls_until_finished,
                        result,
                    },
                );
                Ok(reply(&json!({ "token": token })))
            }
            Request::DeleteJob(req) => self
                .jobs
                .remove(&req.job_token)
                .map(|_| reply(&json!(true)))
                .ok_or_else(|| remote(format!("Unknown job token {}", req.job_token))),
            Request::JobInfo(req) => {
                let job = self
                    .jobs
                    .get_mut(&req.job_token)
                    .ok_or_else(|| remote(format!("Unknown job token {}", req.job_token)))?;
                if job.polls_remaining > 0 {
                    job.polls_remaining -= 1;
                    return Ok(reply(&json!({ "status": "running" })));
                }
                Ok(reply(&match &job.result {
                    Ok(result) => json!({ "status": "finished", "result": result }),
                    Err(error) => json!({ "status": "error", "error": error }),
                }))
            }
            Request::JobResult(req) => {
                let job = self
                    .jobs
                    .get(&req.job_token)
                    .ok_or_else(|| remote(format!("Unknown job token {}", req.job_token)))?;
                if job.polls_remaining > 0 {
                    return Err(remote("Job has not finished"));
                }
                match &job.result {
                    Ok(result) => Ok(reply(result)),
                    Err(error) => Err(remote(error.clone())),
                }
            }
        }
    }

    fn read_memory(&mut self, req: &ReadMemoryRequest) -> Result<Reply, TransportError> {
        let qvm = self.qvm(&req.qvm_token)?;
        let mut out = MemoryMap::new();
        for (name, offsets) in &req.addresses {
            let region = qvm
                .memory
                .get(name)
                .ok_or_else(|| remote(format!("Unknown memory region {name}")))?;
            let values = offsets
                .iter()
                .map(|&i| {
                    usize::try_from(i)
                        .ok()
                        .and_then(|i| region.get(i).copied())
                        .ok_or_else(|| remote(format!("Offset {i} out of range for {name}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            out.insert(name.clone(), values);
        }
        Ok(reply(&serde_json::to_value(out).map_err(|e| remote(e.to_string()))?))
    }

    fn write_memory(&mut self, req: WriteMemoryRequest) -> Result<Reply, TransportError> {
        let qvm = self.qvm(&req.qvm_token)?;
        for (name, write) in &req.memory_contents {
            let region = qvm.memory.entry(name.clone()).or_default();
            for (index, value) in write.indexed() {
                let index = usize::try_from(index).map_err(|e| remote(e.to_string()))?;
                if region.len() <= index {
                    region.resize(index + 1, MemoryValue::Integer(0));
                }
                region[index] = value;
            }
        }
        Ok(reply(&json!(true)))
    }

    /// Measurements write `(seed + offset) % 2`, so results are deterministic.
    fn run_program(&mut self, req: &RunProgramRequest) -> Result<MemoryMap, TransportError> {
        let seed = req.rng_seed.unwrap_or(0);
        let waits = req.compiled_quil.lines().any(|l| l.trim() == "WAIT");

        let mut out = MemoryMap::new();
        for (name, offsets) in &req.addresses {
            let values = offsets
                .iter()
                .map(|&i| MemoryValue::Integer((seed.wrapping_add(i) % 2) as i64))
                .collect();
            out.insert(name.clone(), values);
        }

        if let Some(token) = &req.qvm_token {
            let qvm = self.qvm(token)?;
            for (name, offsets) in &req.addresses {
                let region = qvm.memory.entry(name.clone()).or_default();
                for (&i, value) in offsets.iter().zip(&out[name]) {
                    let i = i as usize;
                    if region.len() <= i {
                        region.resize(i + 1, MemoryValue::Integer(0));
                    }
                    region[i] = *value;
                }
            }
            qvm.waiting = waits;
        }

        Ok(out)
    }
}

fn memory_estimate(req: &MemoryEstimateRequest) -> u64 {
    let dim = match req.simulation_method {
        SimulationMethod::PureState => 1u64 << req.num_qubits,
        SimulationMethod::FullDensityMatrix => 1u64 << (2 * req.num_qubits),
    };
    16 * dim
}

#[async_trait]
impl Transport for FakeQvm {
    fn endpoint(&self) -> &str {
        ENDPOINT
    }

    async fn send(&self, request: &Request) -> Result<Reply, TransportError> {
        let mut state = self.state();
        if !state.reachable {
            return Err(TransportError::Unreachable("connection refused".into()));
        }
        state.requests.push(request.clone());
        if state.timing_out {
            return Err(TransportError::Timeout("operation timed out".into()));
        }
        state.handle(request.clone())
    }
}
