//! Arvak Persistent QVM Client
//!
//! This crate manages persistent QVMs and asynchronous jobs on a QVM-NG
//! simulation service. A persistent QVM keeps its quantum state and classical
//! memory between calls, so a program can be run, paused on `WAIT`, have its
//! memory inspected or patched, and resumed.
//!
//! # Overview
//!
//! - [`Session`] owns one persistent QVM: memory read/write, program
//!   execution, resume, teardown
//! - [`AsyncJob`] owns one background job created from a [`SubRequest`]
//! - [`Connection`] is the shared handle every session and job talks through
//! - [`Transport`] is the wire seam; [`HttpTransport`] POSTs JSON over HTTP
//!
//! Every session and job checks the server version before it asks for a
//! token, and releases the token exactly once: on [`Session::close`] /
//! [`AsyncJob::close`], or when dropped inside a tokio runtime.
//!
//! # Example
//!
//! ```ignore
//! use arvak_pvm::{Connection, MemoryRef, MemoryType, Program, PvmConfig, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connection = Connection::from_config(&PvmConfig::load(None)?)?;
//!
//!     let mut program = Program::new();
//!     program.declare("ro", MemoryType::Bit, 2)?;
//!     program.inst("H 0").inst("CNOT 0 1");
//!     program.measure(0, MemoryRef::new("ro", 0))?;
//!     program.measure(1, MemoryRef::new("ro", 1))?;
//!
//!     let mut session = Session::create(SessionConfig::new(2).with_random_seed(7), &connection).await?;
//!     let memory = session.run_program(&program).await?;
//!     println!("ro = {:?}", memory["ro"]);
//!
//!     let job = session.run_program_async(&program).await?;
//!     println!("async ro = {:?}", job.get_job_result().await?["ro"]);
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod job;
pub mod program;
pub mod protocol;
pub mod session;
pub mod tracing_config;
pub mod transport;
pub mod validate;
pub mod version;

pub use config::{ConfigError, PvmConfig};
pub use connection::Connection;
pub use error::{PvmError, PvmResult};
pub use job::AsyncJob;
pub use program::{MemoryRef, MemoryType, Program};
pub use protocol::{
    AllocationMethod, ClassicalAddresses, JobInfo, JobStatus, MemoryContents, MemoryMap,
    MemoryValue, NoiseVector, QvmInfo, RegionWrite, Request, SimulationMethod, SubRequest, Token,
};
pub use session::{Session, SessionConfig, estimate_memory};
pub use transport::{HttpTransport, Reply, Transport, TransportError};
pub use version::{Version, check_version};
