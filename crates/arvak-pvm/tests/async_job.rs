//! Asynchronous jobs against the in-process fake service.

mod common;

use arvak_pvm::protocol::RunProgramRequest;
use arvak_pvm::{
    AsyncJob, ClassicalAddresses, JobStatus, MemoryMap, MemoryRef, MemoryType, Program, PvmError,
    Session, SessionConfig, SubRequest, Token, Transport,
};
use common::FakeQvm;
use serde_json::json;

fn bell() -> Program {
    let mut program = Program::new();
    program.declare("ro", MemoryType::Bit, 2).unwrap();
    program.inst("H 0").inst("CNOT 0 1");
    program.measure(0, MemoryRef::new("ro", 0)).unwrap();
    program.measure(1, MemoryRef::new("ro", 1)).unwrap();
    program
}

fn estimate(num_qubits: u32) -> SubRequest {
    SubRequest::from_value(json!({
        "type": "qvm-memory-estimate",
        "simulation-method": "pure-state",
        "allocation-method": "native",
        "num-qubits": num_qubits,
    }))
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_async_result_matches_sync_result() {
    let fake = FakeQvm::new();
    let session = Session::create(SessionConfig::new(2).with_random_seed(3), &fake.connection())
        .await
        .unwrap();

    let sync = session.run_program(&bell()).await.unwrap();
    let job = session.run_program_async(&bell()).await.unwrap();
    let async_result: MemoryMap = job.get_job_result_as().await.unwrap();

    assert_eq!(async_result, sync);
    match job.sub_request() {
        SubRequest::RunProgram(req) => {
            assert_eq!(req.rng_seed, Some(3));
            assert!(req.simulation_method.is_none());
        }
        other => panic!("unexpected sub-request {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_get_job_result_waits_for_terminal_status() {
    let fake = FakeQvm::new();
    fake.set_polls_until_finished(4);
    let job = AsyncJob::create(estimate(3), &fake.connection())
        .await
        .unwrap();

    let result = job.get_job_result().await.unwrap();
    assert_eq!(result, json!(128));
    assert_eq!(fake.count("job-info"), 5);
    assert_eq!(fake.count("job-result"), 1);

    let info = job.get_job_info().await.unwrap();
    assert_eq!(info.status, JobStatus::Finished);
    assert_eq!(info.result, Some(result));
}

#[tokio::test(start_paused = true)]
async fn test_get_job_info_does_not_wait() {
    let fake = FakeQvm::new();
    fake.set_polls_until_finished(1);
    let job = AsyncJob::create(estimate(1), &fake.connection())
        .await
        .unwrap();

    let info = job.get_job_info().await.unwrap();
    assert_eq!(info.status, JobStatus::Running);
    assert!(info.result.is_none());
    assert_eq!(fake.count("job-result"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_job() {
    let fake = FakeQvm::new();
    let sub_request = SubRequest::RunProgram(RunProgramRequest::persistent(
        bell().to_quil(),
        &Token::new("no-such-qvm"),
        bell().classical_addresses(),
        None,
    ));
    let job = AsyncJob::create(sub_request, &fake.connection())
        .await
        .unwrap();

    let err = job.get_job_result().await.unwrap_err();
    assert!(matches!(err, PvmError::JobFailed(ref message) if message.contains("no-such-qvm")));
    assert_eq!(fake.count("job-result"), 0);
}

#[tokio::test]
async fn test_close_twice_releases_once() {
    let fake = FakeQvm::new();
    let mut job = AsyncJob::create(estimate(2), &fake.connection())
        .await
        .unwrap();

    job.close().await.unwrap();
    job.close().await.unwrap();
    assert_eq!(fake.count("delete-job"), 1);
    assert_eq!(fake.live_jobs(), 0);

    let before = fake.total_requests();
    assert!(matches!(job.get_job_info().await, Err(PvmError::Usage(_))));
    assert!(matches!(job.get_job_result().await, Err(PvmError::Usage(_))));
    assert_eq!(fake.total_requests(), before);
}

#[tokio::test]
async fn test_drop_releases_job() {
    let fake = FakeQvm::new();
    let job = AsyncJob::create(estimate(2), &fake.connection())
        .await
        .unwrap();
    drop(job);

    fake.wait_for("delete-job", 1).await;
    assert_eq!(fake.live_jobs(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_on_multi_thread_runtime_releases_job_before_returning() {
    let fake = FakeQvm::new();
    let job = AsyncJob::create(estimate(2), &fake.connection())
        .await
        .unwrap();
    drop(job);

    assert_eq!(fake.count("delete-job"), 1);
    assert_eq!(fake.live_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sub_request_sent_directly_matches_job_result() {
    let fake = FakeQvm::new();
    let session = Session::create(SessionConfig::new(2).with_random_seed(5), &fake.connection())
        .await
        .unwrap();
    let job = session.run_program_async(&bell()).await.unwrap();

    let request = job.sub_request().clone().into_request();
    assert_eq!(request.method(), "run-program");
    let direct: MemoryMap = fake.send(&request).await.unwrap().json().unwrap();
    let queued: MemoryMap = job.get_job_result_as().await.unwrap();

    assert_eq!(direct, queued);
}

#[tokio::test]
async fn test_job_checks_version() {
    let fake = FakeQvm::with_version("1.9.0");
    let err = AsyncJob::create(estimate(2), &fake.connection())
        .await
        .unwrap_err();

    assert!(matches!(err, PvmError::VersionMismatch { .. }));
    assert_eq!(fake.count("create-job"), 0);
}

#[tokio::test]
async fn test_invalid_sub_request_issues_no_rpc() {
    let fake = FakeQvm::new();
    let sub_request = SubRequest::RunProgram(RunProgramRequest::persistent(
        "",
        &Token::new("qvm"),
        ClassicalAddresses::new(),
        None,
    ));

    let err = AsyncJob::create(sub_request, &fake.connection())
        .await
        .unwrap_err();
    assert!(matches!(err, PvmError::Validation(_)));
    assert_eq!(fake.total_requests(), 0);
}

#[test]
fn test_sub_request_from_value() {
    assert!(matches!(
        SubRequest::from_value(json!({"type": "create-qvm", "num-qubits": 2})),
        Err(PvmError::Validation(_))
    ));
    assert!(matches!(
        SubRequest::from_value(json!({"num-qubits": 2})),
        Err(PvmError::Validation(_))
    ));
    assert!(matches!(
        SubRequest::from_value(json!({
            "type": "qvm-memory-estimate",
            "simulation-method": "pure-state",
            "allocation-method": "native",
            "num-qubits": 0,
        })),
        Err(PvmError::Validation(_))
    ));
    assert_eq!(estimate(4).method(), "qvm-memory-estimate");
}

#[tokio::test(start_paused = true)]
async fn test_scope_closes_job() {
    let fake = FakeQvm::new();

    let bytes = AsyncJob::scope(estimate(1), &fake.connection(), |job| {
        Box::pin(async move { job.get_job_result_as::<u64>().await })
    })
    .await
    .unwrap();

    assert_eq!(bytes, 32);
    assert_eq!(fake.count("delete-job"), 1);
    assert_eq!(fake.live_jobs(), 0);
}
