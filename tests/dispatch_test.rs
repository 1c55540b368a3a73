mod common;

use common::{quiet_config, MemoryTransport, Recorded};
use std::collections::HashMap;
use tokio::time::Duration;
use tracing_stack_sink::{ContextId, LogEntry, Shipper, ShipperError};

async fn start(recorded: &Recorded) -> Shipper {
    Shipper::start_with_transport(quiet_config(), Box::new(MemoryTransport::new(recorded.clone())))
        .await
        .expect("failed to start shipper")
}

#[tokio::test]
async fn end_twice_enqueues_one_record() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;

    let mut stack = shipper.create_stack_in(ContextId::new("ctx-end"));
    stack.end().await.expect("first end");
    match stack.end().await {
        Err(ShipperError::AlreadyEnded(id)) => assert_eq!(id, stack.id()),
        other => panic!("expected AlreadyEnded, got {:?}", other),
    }

    let report = shipper.flush().await.expect("flush");
    assert_eq!(report.stacks, 1);
    assert_eq!(recorded.stacks().len(), 1);
    assert_eq!(recorded.stacks()[0].id, stack.id());
}

#[tokio::test]
async fn attach_on_open_stack_fails_and_scrubs_binding() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;
    let ctx = ContextId::new("ctx-open");

    let stack = shipper.create_stack_in(ctx.clone());
    assert_eq!(shipper.correlation().resolve(&ctx).as_deref(), Some(stack.id()));

    match stack.attach_in(ctx.clone()) {
        Err(ShipperError::StackNotEnded { file, .. }) => assert_eq!(file, file!()),
        other => panic!("expected StackNotEnded, got {:?}", other.map(|s| s.id().to_string())),
    }
    assert_eq!(shipper.correlation().resolve(&ctx), None);

    let err = shipper
        .fire_in(&ctx, LogEntry::new(4, "lost"))
        .await
        .expect_err("no stack bound any more");
    assert!(matches!(err, ShipperError::StackNotFound));
}

#[tokio::test]
async fn attach_on_ended_stack_opens_child() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;

    let mut parent = shipper.create_stack_in(ContextId::new("ctx-parent"));
    parent.set_name("parent");
    parent.end().await.unwrap();

    let worker = ContextId::new("ctx-worker");
    let mut child = parent.attach_in(worker.clone()).expect("attach ended stack");
    assert_eq!(child.parent_id(), Some(parent.id()));
    assert_ne!(child.id(), parent.id());
    assert_eq!(shipper.correlation().resolve(&worker).as_deref(), Some(child.id()));

    shipper.fire_in(&worker, LogEntry::new(4, "in child")).await.unwrap();
    child.end().await.unwrap();
    shipper.flush().await.unwrap();

    let stacks = recorded.stacks();
    assert_eq!(stacks.len(), 2);
    assert_eq!(stacks[1].parent_id.as_deref(), Some(parent.id()));
    assert_eq!(recorded.logs()[0].request_id, child.id());
}

#[tokio::test]
async fn set_request_id_rebinds_context() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;
    let ctx = ContextId::new("ctx-custom");

    let mut stack = shipper.create_stack_in(ctx.clone());
    stack.set_request_id("req-1").set_attribute("path", "/checkout");
    assert_eq!(shipper.correlation().resolve(&ctx).as_deref(), Some("req-1"));

    shipper.fire_in(&ctx, LogEntry::new(4, "  hello  ")).await.unwrap();
    stack.end().await.unwrap();
    shipper.flush().await.unwrap();

    let log = &recorded.logs()[0];
    assert_eq!(log.request_id, "req-1");
    assert_eq!(log.message, "hello");
    assert_eq!(log.level, 5);
    let stack_record = &recorded.stacks()[0];
    assert_eq!(stack_record.id, "req-1");
    assert_eq!(stack_record.attributes["path"], "/checkout");
}

#[tokio::test]
async fn latest_stack_in_context_wins() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;
    let ctx = ContextId::new("ctx-twice");

    let _first = shipper.create_stack_in(ctx.clone());
    let second = shipper.create_stack_in(ctx.clone());
    shipper.fire_in(&ctx, LogEntry::new(3, "which one")).await.unwrap();
    shipper.flush().await.unwrap();

    assert_eq!(recorded.logs()[0].request_id, second.id());
}

#[tokio::test]
async fn implicit_context_follows_scope() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;

    let ctx = ContextId::generate();
    let id = ctx
        .scope(async {
            let mut stack = shipper.create_stack().unwrap();
            assert_eq!(shipper.current_request_id().as_deref(), Some(stack.id()));
            shipper.fire(LogEntry::new(2, "scoped")).await.unwrap();
            stack.end().await.unwrap();
            stack.id().to_string()
        })
        .await;

    let err = shipper.fire(LogEntry::new(2, "outside")).await.unwrap_err();
    assert!(matches!(err, ShipperError::NoContext));

    shipper.flush().await.unwrap();
    assert_eq!(recorded.logs().len(), 1);
    assert_eq!(recorded.logs()[0].request_id, id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_lose_nothing() {
    const PRODUCERS: usize = 16;
    const PER_PRODUCER: usize = 100;

    let recorded = Recorded::default();
    let mut config = quiet_config();
    config.flush_interval = Duration::from_millis(10);
    let shipper = Shipper::start_with_transport(config, Box::new(MemoryTransport::new(recorded.clone())))
        .await
        .unwrap();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let shipper = shipper.clone();
            tokio::spawn(async move {
                let ctx = ContextId::new(format!("producer-{p}"));
                let mut stack = shipper.create_stack_in(ctx.clone());
                stack.set_request_id(format!("req-{p}"));
                for i in 0..PER_PRODUCER {
                    shipper.fire_in(&ctx, LogEntry::new(4, i.to_string())).await.unwrap();
                }
                stack.end().await.unwrap();
            })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }
    shipper.flush().await.unwrap();

    let logs = recorded.logs();
    assert_eq!(logs.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(recorded.stacks().len(), PRODUCERS);

    let mut next: HashMap<String, usize> = HashMap::new();
    for log in logs {
        let expected = next.entry(log.request_id.clone()).or_default();
        assert_eq!(log.message.parse::<usize>().unwrap(), *expected);
        *expected += 1;
    }
    assert!(next.values().all(|&n| n == PER_PRODUCER));
}

#[tokio::test]
async fn slow_sends_are_never_overlapped() {
    let recorded = Recorded::default();
    let mut config = quiet_config();
    config.flush_interval = Duration::from_millis(10);
    let shipper = Shipper::start_with_transport(
        config,
        Box::new(MemoryTransport::with_delay(recorded.clone(), Duration::from_millis(50))),
    )
    .await
    .unwrap();

    let ctx = ContextId::new("ctx-slow");
    let mut stack = shipper.create_stack_in(ctx.clone());
    for i in 0..30 {
        shipper.fire_in(&ctx, LogEntry::new(4, i.to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    stack.end().await.unwrap();
    shipper.flush().await.unwrap();

    assert_eq!(recorded.max_active.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(recorded.logs().len(), 30);
}

#[tokio::test]
async fn flush_is_bounded_by_timeout() {
    let recorded = Recorded::default();
    let mut config = quiet_config();
    config.flush_timeout = Duration::from_millis(50);
    let shipper = Shipper::start_with_transport(
        config,
        Box::new(MemoryTransport::with_delay(recorded.clone(), Duration::from_secs(5))),
    )
    .await
    .unwrap();

    let mut stack = shipper.create_stack_in(ContextId::new("ctx-hung"));
    stack.end().await.unwrap();

    match shipper.flush().await {
        Err(ShipperError::FlushTimedOut(d)) => assert_eq!(d, Duration::from_millis(50)),
        other => panic!("expected FlushTimedOut, got {:?}", other),
    }
}

#[tokio::test]
async fn producing_after_flush_reports_shutdown() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;
    let ctx = ContextId::new("ctx-late");
    let mut stack = shipper.create_stack_in(ctx.clone());

    shipper.flush().await.unwrap();
    assert!(!shipper.is_running());

    let err = shipper.fire_in(&ctx, LogEntry::new(4, "late")).await.unwrap_err();
    assert!(matches!(err, ShipperError::ShutDown));
    let err = shipper.fire_blocking_in(&ctx, LogEntry::new(4, "late")).unwrap_err();
    assert!(matches!(err, ShipperError::ShutDown));
    assert!(matches!(stack.end().await, Err(ShipperError::ShutDown)));
    assert!(!stack.is_ended());
    assert!(matches!(stack.end_blocking(), Err(ShipperError::ShutDown)));
    assert!(matches!(shipper.flush().await, Err(ShipperError::ShutDown)));
}

#[tokio::test]
async fn runtime_thread_needs_a_scope() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;

    assert!(matches!(shipper.create_stack(), Err(ShipperError::NoContext)));
    assert_eq!(shipper.current_request_id(), None);
    assert!(shipper.correlation().is_empty());
}

#[tokio::test]
async fn finished_scopes_leave_no_bindings() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;

    for i in 0..1000 {
        shipper
            .scope(async {
                let mut stack = shipper.create_stack().unwrap();
                shipper.fire(LogEntry::new(4, i.to_string())).await.unwrap();
                stack.end().await.unwrap();
            })
            .await;
    }
    assert_eq!(shipper.correlation().len(), 0);

    let report = shipper.flush().await.unwrap();
    assert_eq!(report.stacks, 1000);
    assert_eq!(report.logs, 1000);
}

#[tokio::test]
async fn sync_scope_binding_is_removed() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;

    let id = shipper.sync_scope(|| {
        let mut stack = shipper.create_stack().unwrap();
        stack.end_blocking().unwrap();
        stack.id().to_string()
    });
    assert!(shipper.correlation().is_empty());

    shipper.flush().await.unwrap();
    assert_eq!(recorded.stacks()[0].id, id);
}

#[tokio::test]
async fn sync_producers_at_default_capacity_lose_nothing() {
    let recorded = Recorded::default();
    let shipper = start(&recorded).await;
    let ctx = ContextId::new("ctx-sync");

    let mut stack = shipper.create_stack_in(ctx.clone());
    for i in 0..50 {
        shipper.fire_blocking_in(&ctx, LogEntry::new(4, i.to_string())).unwrap();
    }
    stack.end_blocking().unwrap();
    assert!(stack.is_ended());

    let report = shipper.flush().await.unwrap();
    assert_eq!(report.logs, 50);
    assert_eq!(report.stacks, 1);
    let messages: Vec<_> = recorded.logs().into_iter().map(|l| l.message).collect();
    let expected: Vec<_> = (0..50).map(|i| i.to_string()).collect();
    assert_eq!(messages, expected);
}
