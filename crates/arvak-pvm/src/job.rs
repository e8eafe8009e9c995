//! Asynchronous QVM jobs.
//!
//! An [`AsyncJob`] wraps one `create-job` call. The service runs the
//! submitted [`SubRequest`] in the background; the job can be polled with
//! [`AsyncJob::get_job_info`] or awaited with [`AsyncJob::get_job_result`].
//! Like a [`Session`](crate::Session), the job token is released exactly
//! once, by [`AsyncJob::close`] or on drop.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::connection::{Connection, Release};
use crate::error::{PvmError, PvmResult};
use crate::protocol::{JobInfo, JobStatus, SubRequest, Token};
use crate::validate::validate_sub_request;

/// A job submitted to the service for asynchronous execution.
#[derive(Debug)]
pub struct AsyncJob {
    connection: Connection,
    sub_request: SubRequest,
    token: Option<Token>,
}

impl AsyncJob {
    /// Submit `sub_request` as a job.
    ///
    /// The sub-request is validated and the service version checked before
    /// anything is submitted.
    #[instrument(skip_all, fields(method = sub_request.method()))]
    pub async fn create(sub_request: SubRequest, connection: &Connection) -> PvmResult<Self> {
        validate_sub_request(&sub_request)?;
        connection.check_compatibility().await?;

        let token = connection.create_job(sub_request.clone()).await?;
        info!(%token, "Job submitted");

        Ok(Self {
            connection: connection.clone(),
            sub_request,
            token: Some(token),
        })
    }

    /// Run `body` against a freshly submitted job, then close it.
    ///
    /// Same contract as [`Session::scope`](crate::Session::scope).
    pub async fn scope<T, F>(
        sub_request: SubRequest,
        connection: &Connection,
        body: F,
    ) -> PvmResult<T>
    where
        F: for<'j> FnOnce(&'j mut AsyncJob) -> BoxFuture<'j, PvmResult<T>>,
    {
        let mut job = AsyncJob::create(sub_request, connection).await?;
        let result = body(&mut job).await;
        let closed = job.close().await;

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Failed to close job after error");
                Err(e)
            }
        }
    }

    /// Release the job.
    ///
    /// Closing an already closed job does nothing.
    pub async fn close(&mut self) -> PvmResult<()> {
        let Some(token) = &self.token else {
            return Ok(());
        };
        self.connection.delete_job(token).await?;
        info!(%token, "Job released");
        self.token = None;
        Ok(())
    }

    fn active_token(&self, operation: &str) -> PvmResult<&Token> {
        self.token.as_ref().ok_or_else(|| {
            PvmError::Usage(format!("cannot {operation}: the job has been closed"))
        })
    }

    /// The job token, or `None` once closed.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }

    /// The request this job executes.
    pub fn sub_request(&self) -> &SubRequest {
        &self.sub_request
    }

    /// Current status, without waiting.
    pub async fn get_job_info(&self) -> PvmResult<JobInfo> {
        let token = self.active_token("get job info")?;
        self.connection.job_info(token).await
    }

    /// Wait for the job to finish and return its result.
    ///
    /// Polls `job-info` at the connection's poll interval. There is no
    /// timeout: wrap the call in `tokio::time::timeout` to bound the wait.
    pub async fn get_job_result(&self) -> PvmResult<serde_json::Value> {
        let token = self.active_token("get job result")?;

        loop {
            let info = self.connection.job_info(token).await?;
            match info.status {
                JobStatus::Finished => break,
                JobStatus::Failed => {
                    return Err(PvmError::JobFailed(
                        info.error
                            .unwrap_or_else(|| format!("job {token} reported an error")),
                    ));
                }
                status => {
                    debug!(%token, %status, "Job not finished yet");
                    tokio::time::sleep(self.connection.poll_interval()).await;
                }
            }
        }

        self.connection.job_result(token).await
    }

    /// Wait for the job to finish and decode its result as `T`.
    ///
    /// A `run-program` job decodes as a [`MemoryMap`](crate::MemoryMap).
    pub async fn get_job_result_as<T: DeserializeOwned>(&self) -> PvmResult<T> {
        let value = self.get_job_result().await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Drop for AsyncJob {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.connection.release_detached(Release::Job(token));
        }
    }
}
