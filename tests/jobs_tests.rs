mod test_harness;

use std::time::{Duration, Instant};

use simforge::catalog::FileType;
use simforge::scheduler::{Job, JobData, JobOutput, ProcessResult, ResultType, UserPatch};
use simforge::JobError;
use test_harness::*;

fn process(out: &JobOutput) -> &ProcessResult {
    out.as_process().expect("process-backed job output")
}

#[tokio::test]
async fn test_store_then_read_round_trip() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;
    let source = "package alice.src;\npublic class Hello {}\n";

    let stored = manager
        .submit(store_job("alice", "src", "Hello", source))
        .await
        .unwrap();
    assert_eq!(stored.as_data().unwrap()["saved"], true);

    let read = manager
        .submit(read_job("alice", "src", "Hello"))
        .await
        .unwrap();
    let data = read.as_data().unwrap();
    assert_eq!(data["data"], source);
    assert_eq!(data["isPub"], false);

    let on_disk = std::fs::read_to_string(catalog.path("home/alice/src/Hello.java")).unwrap();
    assert_eq!(on_disk, source);
}

#[tokio::test]
async fn test_store_rescans_owner_tree() {
    let catalog = TestCatalog::new();
    let (services, manager) = catalog.start().await;

    manager
        .submit(store_job("alice", "src", "Hello", "class Hello {}"))
        .await
        .unwrap();

    let java = services.users.java_files("alice").await.unwrap();
    assert_eq!(java.len(), 1);
    assert_eq!(java[0].name, "Hello");
    assert_eq!(java[0].cate, "src");
    assert!(services.users.java_files("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_is_idempotent() {
    let catalog = TestCatalog::new();
    let (services, manager) = catalog.start().await;
    manager
        .submit(store_job("alice", "src", "Hello", "class Hello {}"))
        .await
        .unwrap();

    let first = services.users.scan_home("alice").await.unwrap();
    let second = services.users.scan_home("alice").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_read_missing_file_fails() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let err = manager
        .submit(read_job("alice", "src", "Missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)), "{:?}", err);
}

#[tokio::test]
async fn test_store_rejects_bad_coordinates() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let bad_cate = manager
        .submit(store_job("alice", "../etc", "Hello", "x"))
        .await
        .unwrap_err();
    assert!(matches!(bad_cate, JobError::Validation(_)));

    let bad_name = manager
        .submit(store_job("alice", "src", "../Hello", "x"))
        .await
        .unwrap_err();
    assert!(matches!(bad_name, JobError::Validation(_)));

    let missing = manager
        .submit(read_job("alice", "src", "Hello"))
        .await
        .unwrap_err();
    assert!(matches!(missing, JobError::NotFound(_)));
}

#[tokio::test]
async fn test_unknown_user_fails() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let err = manager
        .submit(store_job("mallory", "src", "Hello", "x"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Not found: user mallory");
}

#[tokio::test]
async fn test_delete_removes_file() {
    let catalog = TestCatalog::new();
    let (services, manager) = catalog.start().await;
    manager
        .submit(store_job("alice", "src", "Hello", "class Hello {}"))
        .await
        .unwrap();

    let deleted = manager
        .submit(delete_job("alice", "src", "Hello"))
        .await
        .unwrap();
    assert_eq!(deleted.as_data().unwrap()["deleted"], true);

    assert!(services.users.java_files("alice").await.unwrap().is_empty());
    let err = manager
        .submit(read_job("alice", "src", "Hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
}

#[tokio::test]
async fn test_compile_produces_class() {
    let catalog = TestCatalog::new();
    let (services, manager) = catalog.start().await;
    manager
        .submit(store_job("alice", "src", "Hello", "package alice.src; class Hello {}"))
        .await
        .unwrap();

    let out = manager
        .submit(compile_job("alice", "src", "Hello"))
        .await
        .unwrap();
    let result = process(&out);
    assert_eq!(result.kind, Some(ResultType::Success));
    let artifact = result.artifact.as_ref().unwrap();
    assert_eq!(artifact["jpath"], "alice.src.Hello");

    let classes = services.users.class_files("alice").await;
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0].jpath.as_deref(), Some("alice.src.Hello"));
    assert!(catalog.path("home/alice/src/Hello.class").exists());
}

#[tokio::test]
async fn test_compile_error_reports_stderr() {
    let catalog = TestCatalog::new();
    let (services, manager) = catalog.start().await;
    manager
        .submit(store_job("alice", "src", "Broken", "class Broken {"))
        .await
        .unwrap();

    let err = manager
        .submit(compile_job("alice", "src", "Broken"))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("Exit with 1. Msg:\n"), "{}", msg);
    assert!(msg.contains("error: ';' expected"));
    assert!(services.users.class_files("alice").await.is_empty());
}

#[tokio::test]
async fn test_compile_without_source_fails() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let err = manager
        .submit(compile_job("alice", "src", "Nothing"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
}

#[tokio::test]
async fn test_publish_is_idempotent_and_visible() {
    let catalog = TestCatalog::new();
    let (services, manager) = catalog.start().await;
    manager
        .submit(store_job("alice", "src", "Hello", "class Hello {}"))
        .await
        .unwrap();
    manager
        .submit(compile_job("alice", "src", "Hello"))
        .await
        .unwrap();
    assert!(services.users.class_files("bob").await.is_empty());

    for _ in 0..2 {
        manager
            .submit(add_pub_job("alice", "src", "Hello"))
            .await
            .unwrap();
    }

    let visible = services.users.class_files("bob").await;
    assert_eq!(visible.len(), 1);
    assert!(visible[0].public);
    assert_eq!(services.users.public_files("alice").await.unwrap().len(), 1);

    // Public flags survive a rescan.
    services.users.scan_home("alice").await.unwrap();
    assert!(
        services
            .users
            .is_pub("alice", FileType::Class, "src", "Hello")
            .await
    );
}

#[tokio::test]
async fn test_publish_unknown_file_fails() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let err = manager
        .submit(add_pub_job("alice", "src", "Ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
}

#[tokio::test]
async fn test_password_update_is_persisted() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let job = Job::new(
        "bob",
        JobData::UserMod(UserPatch::UpdatePassword("new-secret".into())),
    );
    manager.submit(job).await.unwrap();

    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(catalog.users_file()).unwrap()).unwrap();
    let bob = stored
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["name"] == "bob")
        .unwrap();
    assert_eq!(bob["passwd"], "new-secret");
}

#[tokio::test]
async fn test_simulate_inline_output() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let out = manager
        .submit(simulate_job("alice", &["--rounds", "3"], None))
        .await
        .unwrap();
    let result = process(&out);

    assert_eq!(result.kind, Some(ResultType::Success));
    assert!(result.logs.is_none());
    let args: Vec<&str> = result.msg.split_whitespace().collect();
    assert_eq!(args[0], "-cp");
    assert_eq!(
        &args[2..],
        [
            "Main",
            "admin.generator.Uniform",
            "alice.scheduler.Fifo",
            "alice.simulator.Basic",
            "alice.platform.Single",
            "--rounds",
            "3"
        ]
    );
    assert!(args[1].contains("sim.jar"));
}

#[tokio::test]
async fn test_simulate_log_files() {
    let catalog = TestCatalog::new().with_log_files();
    let (_, manager) = catalog.start().await;

    let job = simulate_job("alice", &[], None);
    let id = job.id.clone();
    let out = manager.submit(job).await.unwrap();
    let result = process(&out);

    let logs = result.logs.as_ref().unwrap();
    assert_eq!(logs.out, catalog.path("logs").join(format!("{}.out.log", id)));
    assert_eq!(result.msg, logs.out.display().to_string());
    let stdout = std::fs::read_to_string(&logs.out).unwrap();
    assert!(stdout.contains("alice.platform.Single"));
    assert_eq!(std::fs::read_to_string(&logs.err).unwrap(), "");
}

#[tokio::test]
async fn test_simulate_failure_keeps_logs() {
    let catalog = TestCatalog::new().with_log_files();
    let (_, manager) = catalog.start().await;

    let job = simulate_job("alice", &["fail"], None);
    let id = job.id.clone();
    let err = manager.submit(job).await.unwrap_err();

    assert!(matches!(err, JobError::Process { code: Some(3), .. }));
    assert_eq!(err.to_string(), "Exit with 3. Msg:\noops\n");
    let err_log = catalog.path("logs").join(format!("{}.err.log", id));
    assert_eq!(std::fs::read_to_string(err_log).unwrap(), "oops\n");
}

#[tokio::test]
async fn test_simulate_timeout() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let start = Instant::now();
    let err = manager
        .submit(simulate_job("alice", &["hang"], Some(300)))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "{:?}", err);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_timeout_does_not_block_next_job() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let hung = manager.submit(simulate_job("alice", &["hang"], Some(200)));
    let next = manager.submit(simulate_job("alice", &[], None));

    assert!(hung.await.unwrap_err().is_timeout());
    let out = next.await.unwrap();
    assert_eq!(process(&out).kind, Some(ResultType::Success));
}

#[tokio::test]
async fn test_back_to_back_simulations_are_serialized() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|label| manager.submit(simulate_job("alice", &["trace", label], None)))
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let trace = std::fs::read_to_string(catalog.env_dir().join("trace.log")).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(
        lines,
        ["start a", "end a", "start b", "end b", "start c", "end c"]
    );
}

#[tokio::test]
async fn test_simulate_rejects_bad_input() {
    let catalog = TestCatalog::new();
    let (_, manager) = catalog.start().await;

    let mut job = simulate_job("alice", &[], None);
    if let JobData::Simulate(req) = &mut job.data {
        req.gen.jpath = "Uniform".to_string();
    }
    let err = manager.submit(job).await.unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    let mut job = simulate_job("alice", &[], None);
    if let JobData::Simulate(req) = &mut job.data {
        req.env = "missing".to_string();
    }
    let err = manager.submit(job).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid job input: unknown environment \"missing\"");
}

#[tokio::test]
async fn test_builtin_classes_listed() {
    let catalog = TestCatalog::new();
    let services = catalog.services().await;

    assert_eq!(services.envs.list().await.unwrap(), vec![ENV.to_string()]);
    let builtin = services.envs.builtin(ENV).await.unwrap();
    assert_eq!(builtin.len(), 1);
    assert_eq!(builtin[0].jpath.as_deref(), Some("admin.generator.Uniform"));
    assert!(builtin[0].public);
}
