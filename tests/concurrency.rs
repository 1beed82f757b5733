//! Concurrency bound and handler threading
//!
//! External methods observe how many instances are inside the guarded region
//! at once; the count never exceeds the semaphore bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use weft::definition::{Expr, Parameters, SequenceBuilder, WorkflowBuilder};
use weft::runtime::{
    DispatchOrder, ExternalCatalog, InstanceHandlers, InstanceId, NullSink, Scheduler,
    SchedulerConfig,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_max_concurrency_instances_run_at_once() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let catalog = ExternalCatalog::new();
    {
        let active = active.clone();
        let peak = peak.clone();
        catalog.register("enter", move |_, _| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            Ok(None)
        });
    }
    {
        let active = active.clone();
        catalog.register("leave", move |_, _| {
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        });
    }

    let def = Arc::new(
        WorkflowBuilder::new("guarded")
            .body(
                SequenceBuilder::new()
                    .invoke("enter", Vec::new())
                    .delay(Expr::millis(Expr::int(40)))
                    .invoke("leave", Vec::new()),
            )
            .build()
            .unwrap(),
    );

    let sched = Scheduler::new(SchedulerConfig::default(), catalog.snapshot(), Arc::new(NullSink))
        .unwrap();
    sched.create_instances(&[def], 12, |_| Parameters::new()).unwrap();
    let summary = sched.run_all(3).await.unwrap();

    assert_eq!(summary.completed, 12);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeded the bound", peak);
    assert!(peak >= 2, "instances never overlapped (peak {})", peak);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_slot_runs_instances_in_dispatch_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let def = Arc::new(
        WorkflowBuilder::new("noop")
            .body(SequenceBuilder::new().emit(Expr::int(0)))
            .build()
            .unwrap(),
    );
    let config = SchedulerConfig {
        dispatch_order: DispatchOrder::Reverse,
        ..SchedulerConfig::default()
    };
    let sched = Scheduler::new(config, Default::default(), Arc::new(NullSink)).unwrap();
    let ids = sched.create_instances(&[def], 5, |_| Parameters::new()).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    for &id in &ids {
        let order = order.clone();
        let fired = fired.clone();
        sched
            .set_handlers(
                id,
                InstanceHandlers::new().on_completed(move |outcome| {
                    order.lock().push(outcome.id);
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }

    sched.run_all(1).await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 5);
    assert_eq!(
        *order.lock(),
        (1..=5).rev().map(InstanceId).collect::<Vec<_>>()
    );
}
