//! Typed access to the QVM-NG RPC methods.
//!
//! A [`Connection`] wraps a shared [`Transport`] and turns each RPC into a
//! typed call: it builds the [`Request`], decodes the reply and maps
//! transport failures onto [`PvmError`]. Cloning a connection is cheap and
//! every clone talks through the same transport and shares the releases
//! pending from dropped sessions and jobs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::PvmConfig;
use crate::error::{PvmError, PvmResult};
use crate::protocol::{
    ClassicalAddresses, CreateJobRequest, CreateQvmRequest, JobInfo, JobTokenRequest,
    MemoryContents, MemoryEstimateReply, MemoryEstimateRequest, MemoryMap, QvmInfo,
    QvmTokenRequest, ReadMemoryRequest, Request, RunProgramRequest, SubRequest, Token,
    TokenReply, WriteMemoryRequest,
};
use crate::transport::{HttpTransport, Reply, Transport, TransportError};
use crate::version::{Version, check_version};

/// Default delay between `job-info` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A remote resource whose token still has to be released.
pub(crate) enum Release {
    Qvm(Token),
    Job(Token),
}

impl Release {
    fn kind(&self) -> &'static str {
        match self {
            Release::Qvm(_) => "persistent QVM",
            Release::Job(_) => "job",
        }
    }

    fn token(&self) -> &Token {
        match self {
            Release::Qvm(token) | Release::Job(token) => token,
        }
    }
}

/// Shared handle to a QVM-NG service.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.transport.endpoint())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Connection {
    /// Connect through an existing transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            pending: Arc::default(),
        }
    }

    /// Build an HTTP connection from configuration.
    pub fn from_config(config: &PvmConfig) -> PvmResult<Self> {
        config.validate()?;
        let transport = HttpTransport::from_config(config).map_err(|e| PvmError::Http {
            endpoint: config.endpoint.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(Arc::new(transport)).with_poll_interval(config.poll_interval()))
    }

    /// Set the delay between `job-info` polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Location of the service.
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Delay between `job-info` polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn call(&self, request: Request) -> PvmResult<Reply> {
        debug!(method = request.method(), "QVM-NG call");
        self.transport
            .send(&request)
            .await
            .map_err(|e| match e {
                TransportError::Remote { status, message } => PvmError::Remote { status, message },
                TransportError::Unreachable(reason) => PvmError::ServiceUnreachable {
                    endpoint: self.endpoint().to_string(),
                    reason,
                },
                TransportError::Timeout(reason) => PvmError::Timeout {
                    endpoint: self.endpoint().to_string(),
                    reason,
                },
                TransportError::Http(e) => PvmError::Http {
                    endpoint: self.endpoint().to_string(),
                    reason: e.to_string(),
                },
            })
    }

    // -----------------------------------------------------------------------
    // Version
    // -----------------------------------------------------------------------

    /// The server version, e.g. `"1.17.0"`.
    ///
    /// The service appends a build hash (`"1.17.0 [cf3f91f]"`); only the
    /// leading version is returned.
    #[instrument(skip(self))]
    pub async fn get_version_info(&self) -> PvmResult<String> {
        let reply = self.call(Request::Version).await?;
        reply
            .text()
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| PvmError::VersionParse(reply.text().to_string()))
    }

    /// Probe the server and reject versions without persistent QVM support.
    pub async fn check_compatibility(&self) -> PvmResult<Version> {
        let version = self.get_version_info().await?;
        let parsed = check_version(&version)?;
        debug!(%parsed, "QVM-NG version accepted");
        Ok(parsed)
    }

    // -----------------------------------------------------------------------
    // Persistent QVMs
    // -----------------------------------------------------------------------

    /// Allocate a persistent QVM.
    #[instrument(skip(self, request), fields(num_qubits = request.num_qubits))]
    pub async fn create_qvm(&self, request: CreateQvmRequest) -> PvmResult<Token> {
        let reply: TokenReply = self.call(Request::CreateQvm(request)).await?.json()?;
        Ok(Token::new(reply.token))
    }

    /// Release a persistent QVM.
    #[instrument(skip(self))]
    pub async fn delete_qvm(&self, token: &Token) -> PvmResult<()> {
        self.call(Request::DeleteQvm(qvm_token(token))).await?;
        Ok(())
    }

    /// Configuration snapshot of a persistent QVM.
    #[instrument(skip(self))]
    pub async fn qvm_info(&self, token: &Token) -> PvmResult<QvmInfo> {
        Ok(self.call(Request::QvmInfo(qvm_token(token))).await?.json()?)
    }

    /// Read classical memory.
    #[instrument(skip(self, addresses))]
    pub async fn read_memory(
        &self,
        token: &Token,
        addresses: &ClassicalAddresses,
    ) -> PvmResult<MemoryMap> {
        let request = Request::ReadMemory(ReadMemoryRequest {
            qvm_token: token.as_str().to_string(),
            addresses: addresses.clone(),
        });
        Ok(self.call(request).await?.json()?)
    }

    /// Overwrite classical memory.
    #[instrument(skip(self, contents))]
    pub async fn write_memory(&self, token: &Token, contents: &MemoryContents) -> PvmResult<()> {
        let request = Request::WriteMemory(WriteMemoryRequest {
            qvm_token: token.as_str().to_string(),
            memory_contents: contents.clone(),
        });
        self.call(request).await?;
        Ok(())
    }

    /// Resume a QVM paused on a `WAIT` instruction.
    #[instrument(skip(self))]
    pub async fn resume(&self, token: &Token) -> PvmResult<()> {
        self.call(Request::Resume(qvm_token(token))).await?;
        Ok(())
    }

    /// Run a program and return the memory it wrote.
    #[instrument(skip(self, request))]
    pub async fn run_program(&self, request: RunProgramRequest) -> PvmResult<MemoryMap> {
        Ok(self.call(Request::RunProgram(request)).await?.json()?)
    }

    /// Bytes needed to hold the state of a QVM with the given parameters.
    #[instrument(skip(self, request), fields(num_qubits = request.num_qubits))]
    pub async fn qvm_memory_estimate(&self, request: MemoryEstimateRequest) -> PvmResult<u64> {
        let reply: MemoryEstimateReply = self
            .call(Request::QvmMemoryEstimate(request))
            .await?
            .json()?;
        Ok(reply.bytes)
    }

    // -----------------------------------------------------------------------
    // Asynchronous jobs
    // -----------------------------------------------------------------------

    /// Submit a sub-request for asynchronous execution.
    #[instrument(skip(self, sub_request), fields(method = sub_request.method()))]
    pub async fn create_job(&self, sub_request: SubRequest) -> PvmResult<Token> {
        let reply: TokenReply = self
            .call(Request::CreateJob(CreateJobRequest { sub_request }))
            .await?
            .json()?;
        Ok(Token::new(reply.token))
    }

    /// Release an asynchronous job.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, token: &Token) -> PvmResult<()> {
        self.call(Request::DeleteJob(job_token(token))).await?;
        Ok(())
    }

    /// Current status of an asynchronous job.
    #[instrument(skip(self))]
    pub async fn job_info(&self, token: &Token) -> PvmResult<JobInfo> {
        Ok(self.call(Request::JobInfo(job_token(token))).await?.json()?)
    }

    /// Result payload of an asynchronous job.
    ///
    /// The service holds the reply until the job has finished.
    #[instrument(skip(self))]
    pub async fn job_result(&self, token: &Token) -> PvmResult<serde_json::Value> {
        Ok(self.call(Request::JobResult(job_token(token))).await?.json()?)
    }

    // -----------------------------------------------------------------------
    // Release from Drop
    // -----------------------------------------------------------------------

    /// Release a token from a synchronous context.
    ///
    /// On a multi-thread runtime the calling thread blocks until the service
    /// has answered. A current-thread runtime cannot block inside a drop, so
    /// the delete call is spawned and tracked until [`flush_releases`]
    /// awaits it. Outside a runtime nothing can be sent.
    ///
    /// [`flush_releases`]: Connection::flush_releases
    pub(crate) fn release_detached(&self, release: Release) {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                token = %release.token(),
                "No tokio runtime available; {} was not released",
                release.kind()
            );
            return;
        };

        debug!(token = %release.token(), "Releasing {} on drop", release.kind());
        let connection = self.clone();
        match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(connection.release(release)));
            }
            _ => {
                let task = handle.spawn(connection.release(release));
                let mut pending = self.pending_releases();
                pending.retain(|t| !t.is_finished());
                pending.push(task);
            }
        }
    }

    /// Wait for releases spawned by sessions and jobs dropped on a
    /// current-thread runtime.
    ///
    /// Call this before such a runtime shuts down; a release that has not
    /// run by then is cancelled and the remote resource leaks.
    pub async fn flush_releases(&self) {
        let tasks = std::mem::take(&mut *self.pending_releases());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Release task did not complete");
            }
        }
    }

    fn pending_releases(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn release(self, release: Release) {
        let mut guard = ReleaseGuard {
            kind: release.kind(),
            token: release.token().to_string(),
            settled: false,
        };
        let result = match &release {
            Release::Qvm(token) => self.delete_qvm(token).await,
            Release::Job(token) => self.delete_job(token).await,
        };
        guard.settled = true;

        match result {
            Ok(()) => info!(token = %guard.token, "Released {} on drop", guard.kind),
            Err(e) => warn!(
                token = %guard.token,
                error = %e,
                "Failed to release {} on drop",
                guard.kind
            ),
        }
    }
}

/// Warns if a release is dropped before the service answered.
struct ReleaseGuard {
    kind: &'static str,
    token: String,
    settled: bool,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                token = %self.token,
                "Release of {} was cancelled; the remote resource leaked",
                self.kind
            );
        }
    }
}

fn qvm_token(token: &Token) -> QvmTokenRequest {
    QvmTokenRequest {
        qvm_token: token.as_str().to_string(),
    }
}

fn job_token(token: &Token) -> JobTokenRequest {
    JobTokenRequest {
        job_token: token.as_str().to_string(),
    }
}
