//! Persistent QVM Session Demo
//!
//! Opens a persistent QVM on a running QVM-NG server, runs a GHZ program
//! synchronously and as an asynchronous job, patches classical memory of a
//! paused program, and releases everything.

use std::f64::consts::FRAC_PI_2;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;

use arvak_pvm::tracing_config::{TracingConfig, init_tracing};
use arvak_pvm::{
    ClassicalAddresses, Connection, MemoryContents, MemoryMap, PvmConfig, PvmError, RegionWrite,
    Session, SessionConfig, SimulationMethod, estimate_memory,
};
use arvak_pvm_demos::programs::{ghz, paused_rotation};
use arvak_pvm_demos::{
    create_spinner, print_header, print_info, print_result, print_section, print_success,
};

#[derive(Parser, Debug)]
#[command(name = "demo-pvm-session")]
#[command(about = "Demonstrate persistent QVM sessions and asynchronous jobs")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// QVM-NG endpoint (overrides configuration)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Number of qubits
    #[arg(short = 'n', long, default_value = "3")]
    qubits: u32,

    /// Random seed sent with every run
    #[arg(short, long)]
    seed: Option<u64>,

    /// Use the density-matrix simulator
    #[arg(long)]
    density_matrix: bool,
}

fn format_memory(memory: &MemoryMap) -> String {
    serde_json::to_string(memory).unwrap_or_else(|_| format!("{memory:?}"))
}

/// Resume a QVM once it has reached its `WAIT`.
async fn resume_when_waiting(session: &Session) -> Result<()> {
    for _ in 0..50 {
        match session.resume().await {
            Ok(()) => return Ok(()),
            Err(PvmError::Remote { .. }) => tokio::time::sleep(Duration::from_millis(100)).await,
            Err(e) => return Err(e.into()),
        }
    }
    bail!("QVM never reached WAIT")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = init_tracing(&TracingConfig::from_env());

    print_header("Persistent QVM Session Demo");

    let mut config = PvmConfig::load(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    let connection = Connection::from_config(&config)?;

    let mut session_config = SessionConfig::new(args.qubits);
    if args.density_matrix {
        session_config =
            session_config.with_simulation_method(SimulationMethod::FullDensityMatrix);
    }
    if let Some(seed) = args.seed {
        session_config = session_config.with_random_seed(seed);
    }

    print_section("Server");
    print_result("Endpoint", connection.endpoint());
    let version = connection
        .check_compatibility()
        .await
        .context("QVM-NG server check failed")?;
    print_result("Version", version);
    let bytes = estimate_memory(&connection, &session_config).await?;
    print_result("State memory", format!("{bytes} bytes"));

    print_section("Session");
    let mut session = Session::create(session_config, &connection).await?;
    if let Some(token) = session.token() {
        print_result("Token", token);
    }
    let info = session.get_info().await?;
    print_result(
        "Simulation method",
        info.simulation_method
            .map_or_else(|| "unknown".to_string(), |m| m.to_string()),
    );

    print_section("GHZ program");
    let program = ghz(args.qubits)?;
    let sync = session.run_program(&program).await?;
    print_result("Synchronous", format_memory(&sync));

    let mut job = session.run_program_async(&program).await?;
    let spinner = create_spinner("Waiting for job result...");
    let async_result: MemoryMap = job.get_job_result_as().await?;
    spinner.finish_and_clear();
    job.close().await?;
    print_result("Asynchronous", format_memory(&async_result));
    if args.seed.is_some() && sync == async_result {
        print_success("Seeded runs agree");
    }

    print_section("Paused program");
    let mut theta = MemoryContents::new();
    theta.insert("theta".into(), RegionWrite::dense([FRAC_PI_2]));
    session.write_memory(&theta).await?;

    let mut job = session.run_program_async(&paused_rotation()?).await?;
    print_info("Program submitted; patching theta while it waits");
    theta.insert("theta".into(), RegionWrite::sparse([(0, std::f64::consts::PI)]));
    session.write_memory(&theta).await?;

    let mut addresses = ClassicalAddresses::new();
    addresses.insert("theta".into(), vec![0]);
    let patched = session.read_memory(&addresses).await?;
    if let Some(value) = patched.get("theta").and_then(|v| v.first()) {
        print_result("theta", format!("{:.4}", value.as_f64()));
    }

    resume_when_waiting(&session).await?;
    let result: MemoryMap = job.get_job_result_as().await?;
    job.close().await?;
    print_result("Result", format_memory(&result));

    session.close().await?;
    print_success("Session closed");

    Ok(())
}
