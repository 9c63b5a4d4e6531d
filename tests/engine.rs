//! End-to-end runs through the service, jobs, runner and repositories

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conformance_engine::executor::{
    ResumeOutcome, ServiceError, Signal, TestRunService, CANCELLED_MESSAGE, NO_TESTS_MESSAGE,
};
use conformance_engine::jobs::Jobs;
use conformance_engine::models::{
    GroupDefinition, InputDefinition, RequestRecord, ResultKind, RunStatus, RunnableId,
    RunnableTree, SuiteDefinition, SuiteOption, TestDefinition, TestResult,
};
use conformance_engine::repository::Repositories;

fn service(suites: Vec<SuiteDefinition>) -> TestRunService {
    let tree = Arc::new(RunnableTree::from_suites(suites).unwrap());
    TestRunService::inline(tree, Repositories::in_memory())
}

fn counted(id: &str, calls: &Arc<AtomicUsize>) -> TestDefinition {
    let calls = calls.clone();
    TestDefinition::new(id, id).run(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

fn current(service: &TestRunService, session_id: &str, id: &str) -> Option<TestResult> {
    service
        .repositories()
        .results
        .current_result(session_id, &RunnableId::new(id))
        .unwrap()
}

fn kind_of(service: &TestRunService, session_id: &str, id: &str) -> Option<ResultKind> {
    current(service, session_id, id).map(|result| result.result)
}

/// Suite whose group parks on `abc` after its first test
fn waiting_suite(
    first: &Arc<AtomicUsize>,
    waits: &Arc<AtomicUsize>,
    after: &Arc<AtomicUsize>,
) -> SuiteDefinition {
    let waits = waits.clone();
    SuiteDefinition::new("s", "Suite").group(
        GroupDefinition::new("g", "Launch")
            .test(counted("t-before", first))
            .test(TestDefinition::new("t-wait", "Waits").run(move |ctx| {
                waits.fetch_add(1, Ordering::SeqCst);
                ctx.wait("abc", "Waiting for abc", Duration::ZERO)?;
                Ok(())
            }))
            .test(counted("t-after", after)),
    )
}

fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    (
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    )
}

#[tokio::test]
async fn required_failure_rolls_up_to_suite() {
    let suite = SuiteDefinition::new("s", "Suite").group(
        GroupDefinition::new("g1", "Group")
            .test(TestDefinition::new("t1", "Passes").run(|_| Ok(())))
            .test(TestDefinition::new("t2", "Fails").run(|_| Err(Signal::fail("bad status").into()))),
    );
    let service = service(vec![suite]);
    let session = service.create_session("s", Vec::new()).unwrap();

    let run = service
        .create_run(&session.id, "g1", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(kind_of(&service, &session.id, "t1"), Some(ResultKind::Pass));
    assert_eq!(kind_of(&service, &session.id, "t2"), Some(ResultKind::Fail));
    assert_eq!(kind_of(&service, &session.id, "g1"), Some(ResultKind::Fail));
    assert_eq!(kind_of(&service, &session.id, "s"), Some(ResultKind::Fail));
    assert_eq!(
        current(&service, &session.id, "t2").unwrap().result_message.as_deref(),
        Some("bad status")
    );
}

#[tokio::test]
async fn panicking_test_is_an_error_and_run_continues() {
    let after = Arc::new(AtomicUsize::new(0));
    let suite = SuiteDefinition::new("s", "Suite").group(
        GroupDefinition::new("g1", "Group")
            .test(TestDefinition::new("t1", "Panics").run(|_| {
                let statuses: Vec<u16> = Vec::new();
                if statuses.is_empty() {
                    panic!("no status recorded");
                }
                Ok(())
            }))
            .test(counted("t2", &after)),
    );
    let service = service(vec![suite]);
    let session = service.create_session("s", Vec::new()).unwrap();

    let run = service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(kind_of(&service, &session.id, "t1"), Some(ResultKind::Error));
    assert_eq!(kind_of(&service, &session.id, "g1"), Some(ResultKind::Error));

    let message = current(&service, &session.id, "t1")
        .unwrap()
        .result_message
        .unwrap();
    assert!(message.starts_with("no status recorded\n"));
    assert!(message.contains("engine.rs:"));
}

#[tokio::test]
async fn optional_only_suite_passes() {
    let suite = SuiteDefinition::new("s", "Suite").group(
        GroupDefinition::new("g", "Optional group")
            .optional()
            .test(TestDefinition::new("t3", "Optional").optional().run(|_| Ok(()))),
    );
    let service = service(vec![suite]);
    let session = service.create_session("s", Vec::new()).unwrap();

    service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(kind_of(&service, &session.id, "t3"), Some(ResultKind::Pass));
    assert_eq!(kind_of(&service, &session.id, "g"), Some(ResultKind::Pass));
    assert_eq!(kind_of(&service, &session.id, "s"), Some(ResultKind::Pass));
}

#[tokio::test]
async fn wait_parks_run_until_resume() {
    let (before, waits, after) = counters();
    let service = service(vec![waiting_suite(&before, &waits, &after)]);
    let session = service.create_session("s", Vec::new()).unwrap();

    let run = service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Waiting);
    assert_eq!(run.identifier.as_deref(), Some("abc"));
    assert!(run.wait_timeout.is_some());
    assert_eq!(kind_of(&service, &session.id, "t-wait"), Some(ResultKind::Wait));
    assert_eq!(kind_of(&service, &session.id, "g"), Some(ResultKind::Wait));
    assert_eq!(kind_of(&service, &session.id, "t-after"), None);
    assert_eq!(after.load(Ordering::SeqCst), 0);

    let resumed = service.resume("abc", ResumeOutcome::Pass).await.unwrap();

    assert_eq!(resumed.id, run.id);
    assert_eq!(resumed.status, RunStatus::Done);
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(waits.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(kind_of(&service, &session.id, "t-wait"), Some(ResultKind::Pass));
    assert_eq!(kind_of(&service, &session.id, "g"), Some(ResultKind::Pass));
    assert_eq!(kind_of(&service, &session.id, "s"), Some(ResultKind::Pass));
}

#[tokio::test]
async fn resume_with_failure_fails_the_group() {
    let (before, waits, after) = counters();
    let service = service(vec![waiting_suite(&before, &waits, &after)]);
    let session = service.create_session("s", Vec::new()).unwrap();
    service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    let outcome = ResumeOutcome::from_str("fail", Some("launch denied".to_string())).unwrap();
    service.resume("abc", outcome).await.unwrap();

    let waited = current(&service, &session.id, "t-wait").unwrap();
    assert_eq!(waited.result, ResultKind::Fail);
    assert_eq!(waited.result_message.as_deref(), Some("launch denied"));
    assert_eq!(kind_of(&service, &session.id, "t-after"), Some(ResultKind::Pass));
    assert_eq!(kind_of(&service, &session.id, "g"), Some(ResultKind::Fail));
}

#[tokio::test]
async fn resume_without_waiting_run_is_rejected() {
    let service = service(vec![SuiteDefinition::new("s", "Suite")]);
    let err = service.resume("nobody", ResumeOutcome::Pass).await.unwrap_err();
    assert!(matches!(err, ServiceError::NoWaitingRun(_)));
}

#[tokio::test]
async fn cancelling_waiting_run_cancels_remaining_tests() {
    let (before, waits, after) = counters();
    let service = service(vec![waiting_suite(&before, &waits, &after)]);
    let session = service.create_session("s", Vec::new()).unwrap();
    let run = service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    let cancelled = service.cancel(&run.id).await.unwrap();

    assert_eq!(cancelled.status, RunStatus::Done);
    assert_eq!(after.load(Ordering::SeqCst), 0);
    let waited = current(&service, &session.id, "t-wait").unwrap();
    assert_eq!(waited.result, ResultKind::Cancel);
    assert_eq!(waited.result_message.as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(kind_of(&service, &session.id, "t-after"), Some(ResultKind::Cancel));
    assert_eq!(kind_of(&service, &session.id, "g"), Some(ResultKind::Cancel));

    let err = service.cancel(&run.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyDone(_)));
}

#[tokio::test]
async fn expired_waits_are_cancelled() {
    let (before, waits, after) = counters();
    let service = service(vec![waiting_suite(&before, &waits, &after)]);
    let session = service.create_session("s", Vec::new()).unwrap();
    let run = service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    let none = service.expire_waiting_runs(chrono::Utc::now()).await.unwrap();
    assert!(none.is_empty());

    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    let expired = service.expire_waiting_runs(later).await.unwrap();

    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, run.id);
    assert_eq!(expired[0].status, RunStatus::Done);
    assert_eq!(
        current(&service, &session.id, "t-wait").unwrap().result_message.as_deref(),
        Some("Timed out waiting for `abc`")
    );
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn group_without_selected_children_is_omitted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let suite = SuiteDefinition::new("s", "Suite")
        .test(TestDefinition::new("t1", "Passes").run(|_| Ok(())))
        .group(
            GroupDefinition::new("g-ehr", "EHR only")
                .test(counted("t-ehr", &calls).requires_option("launch", "ehr")),
        );
    let service = service(vec![suite]);
    let session = service
        .create_session("s", vec![SuiteOption::new("launch", "standalone")])
        .unwrap();

    service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    let group = current(&service, &session.id, "g-ehr").unwrap();
    assert_eq!(group.result, ResultKind::Omit);
    assert_eq!(group.result_message.as_deref(), Some(NO_TESTS_MESSAGE));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(kind_of(&service, &session.id, "s"), Some(ResultKind::Pass));
}

#[tokio::test]
async fn missing_input_skips_and_run_inputs_are_saved() {
    let suite = SuiteDefinition::new("s", "Suite").test(
        TestDefinition::new("t-url", "Needs url")
            .input(InputDefinition::new("url"))
            .output("host")
            .run(|ctx| {
                let url = ctx.require_input("url")?;
                ctx.output("host", url.trim_start_matches("http://").to_string());
                Ok(())
            }),
    );
    let service = service(vec![suite]);
    let session = service.create_session("s", Vec::new()).unwrap();

    service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();
    let skipped = current(&service, &session.id, "t-url").unwrap();
    assert_eq!(skipped.result, ResultKind::Skip);
    assert_eq!(skipped.result_message.as_deref(), Some("Missing input: `url`"));

    let mut inputs = BTreeMap::new();
    inputs.insert("url".to_string(), Value::from("http://example.test"));
    service.create_run(&session.id, "s", inputs).await.unwrap();

    assert_eq!(kind_of(&service, &session.id, "t-url"), Some(ResultKind::Pass));
    assert_eq!(
        service
            .repositories()
            .session_data
            .load(&session.id, "host")
            .unwrap(),
        Some(Value::from("example.test"))
    );
}

#[tokio::test]
async fn named_requests_reach_later_tests() {
    let suite = SuiteDefinition::new("s", "Suite")
        .test(
            TestDefinition::new("t-make", "Makes request")
                .makes_request("metadata")
                .run(|ctx| {
                    ctx.record_request(
                        RequestRecord::new("get", "http://example.test/metadata")
                            .with_name("metadata")
                            .with_status(200),
                    );
                    Ok(())
                }),
        )
        .test(
            TestDefinition::new("t-use", "Uses request")
                .uses_request("metadata")
                .run(|ctx| {
                    let status = ctx.named_request("metadata").and_then(|r| r.status);
                    ctx.assert(status == Some(200), "metadata request not loaded")?;
                    Ok(())
                }),
        );
    let service = service(vec![suite]);
    let session = service.create_session("s", Vec::new()).unwrap();

    service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(kind_of(&service, &session.id, "t-use"), Some(ResultKind::Pass));
    assert_eq!(
        current(&service, &session.id, "t-make").unwrap().requests.len(),
        1
    );
}

#[tokio::test]
async fn run_requests_are_validated() {
    let other = SuiteDefinition::new("other", "Other").test(TestDefinition::new("o1", "Other"));
    let (before, waits, after) = counters();
    let suite = waiting_suite(&before, &waits, &after).group(
        GroupDefinition::new("g-together", "Together")
            .run_as_group()
            .test(TestDefinition::new("t-inner", "Inner")),
    );
    let service = service(vec![suite, other]);
    let session = service.create_session("s", Vec::new()).unwrap();

    let err = service
        .create_run(&session.id, "o1", BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OutsideSuite { .. }));

    let err = service
        .create_run(&session.id, "t-inner", BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotUserRunnable(_)));

    let err = service.create_session("g", Vec::new()).unwrap_err();
    assert!(matches!(err, ServiceError::NotASuite(_)));

    service
        .create_run(&session.id, "g", BTreeMap::new())
        .await
        .unwrap();
    let err = service
        .create_run(&session.id, "g-together", BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ActiveRun { .. }));
}

#[tokio::test]
async fn background_jobs_finish_on_shutdown() {
    let calls = Arc::new(AtomicUsize::new(0));
    let suite = SuiteDefinition::new("s", "Suite").test(counted("t1", &calls));
    let tree = Arc::new(RunnableTree::from_suites(vec![suite]).unwrap());
    let repos = Repositories::in_memory();
    let jobs = Arc::new(Jobs::new(tree.clone(), repos.clone()).with_async(2));
    let service = TestRunService::new(tree, repos, jobs);
    let session = service.create_session("s", Vec::new()).unwrap();

    let run = service
        .create_run(&session.id, "s", BTreeMap::new())
        .await
        .unwrap();
    service.jobs().shutdown().await.unwrap();

    assert_eq!(service.find_run(&run.id).unwrap().status, RunStatus::Done);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn waiting_run_resumes_from_file_repository() {
    let dir = tempfile::tempdir().unwrap();
    let (before, waits, after) = counters();

    let open = |dir: &std::path::Path| {
        let tree = Arc::new(
            RunnableTree::from_suites(vec![waiting_suite(&before, &waits, &after)]).unwrap(),
        );
        TestRunService::inline(tree, Repositories::file(dir).unwrap())
    };

    let (session_id, run_id) = tokio_test::block_on(async {
        let service = open(dir.path());
        let session = service.create_session("s", Vec::new()).unwrap();
        let run = service
            .create_run(&session.id, "s", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Waiting);
        (session.id, run.id)
    });

    let service = open(dir.path());
    let resumed = tokio_test::block_on(service.resume("abc", ResumeOutcome::Pass)).unwrap();

    assert_eq!(resumed.id, run_id);
    assert_eq!(resumed.status, RunStatus::Done);
    assert_eq!(waits.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(kind_of(&service, &session_id, "s"), Some(ResultKind::Pass));

    let results = service.results(&run_id).unwrap();
    assert!(results.iter().all(|result| result.test_run_id == run_id));
    assert!(results
        .iter()
        .any(|result| result.runnable_id == RunnableId::new("t-after")));
}
