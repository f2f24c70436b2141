//! Service lifecycle operations against a scripted executor

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeExecutor, fail, node, ok};
use swarm_orchestration::{PollConfig, ServiceLifecycleManager, ServiceRef};

const STACK: &str = "myapp_prod";

fn manager(fake: Arc<FakeExecutor>) -> ServiceLifecycleManager {
    ServiceLifecycleManager::new(fake, node("coord")).with_poll_config(PollConfig {
        interval: Duration::from_millis(1),
        max_attempts: 5,
    })
}

fn services_listing() -> &'static str {
    "myapp_prod_web\nmyapp_prod_db\nmyapp_prod_worker\n"
}

#[smol_potat::test]
async fn scale_issues_the_exact_mutation() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on(
        "service scale",
        ok("myapp_prod_db scaled to 3\noverall progress: 3 out of 3 tasks"),
    );

    let outcome = manager(fake.clone())
        .scale(&ServiceRef::new(STACK, "db"), 3)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(fake.count_matching("docker service scale myapp_prod_db=3"), 1);
}

#[smol_potat::test]
async fn remote_rejection_is_an_outcome_not_an_error() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on("service rollback", fail(1, "service has no previous spec"));

    let outcome = manager(fake)
        .rollback(&ServiceRef::new(STACK, "db"))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.message, "service has no previous spec");
}

#[smol_potat::test]
async fn restart_all_continues_past_failures() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on("docker stack services", ok(services_listing()));
    fake.on(
        "service update --force myapp_prod_db",
        fail(1, "update out of sequence"),
    );

    let report = manager(fake.clone()).restart_all(STACK).await.unwrap();

    assert_eq!(report.succeeded, vec!["web", "worker"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "db");
    assert!(report.failed[0].1.contains("out of sequence"));
    assert!(!report.all_succeeded());
    // The third service is still attempted after the second fails.
    assert_eq!(fake.count_matching("service update --force"), 3);
}

#[smol_potat::test]
async fn scale_all_applies_one_count_to_every_service() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on("docker stack services", ok(services_listing()));

    let report = manager(fake.clone()).scale_all(STACK, 0).await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(fake.count_matching("=0"), 3);
}

#[smol_potat::test]
async fn remove_stack_polls_until_tasks_drain() {
    let fake = Arc::new(FakeExecutor::new());
    let header = "ID   NAME   IMAGE   NODE   DESIRED STATE";
    fake.on_sequence(
        "docker stack ps",
        vec![
            ok(&format!("{}\ntask.1  Running\ntask.2  Shutdown", header)),
            ok(&format!("{}\ntask.2  Shutdown", header)),
            ok(header),
        ],
    );

    let removal = manager(fake.clone()).remove_stack(STACK).await.unwrap();

    assert!(removal.outcome.success);
    assert!(removal.drained);
    assert_eq!(fake.count_matching("docker stack rm myapp_prod"), 1);
    assert_eq!(fake.count_matching("docker stack ps"), 3);
}

#[smol_potat::test]
async fn remove_stack_treats_vanished_stack_as_drained() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on("docker stack ps", fail(1, "nothing found in stack: myapp_prod"));

    let removal = manager(fake).remove_stack(STACK).await.unwrap();
    assert!(removal.drained);
}

#[smol_potat::test]
async fn remove_stack_reports_timeout_without_failing() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on(
        "docker stack ps",
        ok("ID   NAME\ntask.1  Running\ntask.2  Running"),
    );

    let removal = manager(fake.clone()).remove_stack(STACK).await.unwrap();

    // The mutation stands; only the drain observation timed out.
    assert!(removal.outcome.success);
    assert!(!removal.drained);
    // Exactly the configured attempt budget, not fewer or more.
    assert_eq!(fake.count_matching("docker stack ps"), 5);
}

#[smol_potat::test]
async fn rejected_removal_skips_the_drain_poll() {
    let fake = Arc::new(FakeExecutor::new());
    fake.on("docker stack rm", fail(1, "stack not found"));

    let removal = manager(fake.clone()).remove_stack(STACK).await.unwrap();

    assert!(!removal.outcome.success);
    assert!(!removal.drained);
    assert_eq!(fake.count_matching("docker stack ps"), 0);
}
