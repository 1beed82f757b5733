//! Fault containment across sibling instances
//!
//! A faulting or panicking instance settles as `Faulted` with its error
//! recorded; every other instance in the run still completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use weft::definition::{
    Expr, Parameters, SequenceBuilder, Value, ValueType, WorkflowBuilder, WorkflowDefinition,
};
use weft::runtime::{
    ExternalCatalog, ExternalRegistry, InstanceHandlers, InstanceId, InstanceStatus, MemorySink,
    NullSink, Scheduler, SchedulerConfig,
};

fn divider() -> Arc<WorkflowDefinition> {
    Arc::new(
        WorkflowBuilder::new("divider")
            .param("Divisor", ValueType::Integer)
            .body(
                SequenceBuilder::new()
                    .var_init("quotient", Expr::int(100))
                    .emit(Expr::var("quotient"))
                    .delay(Expr::millis(Expr::int(5)))
                    .assign("quotient", Expr::div(Expr::var("quotient"), Expr::var("Divisor")))
                    .emit(Expr::var("quotient")),
            )
            .build()
            .unwrap(),
    )
}

fn scheduler(registry: ExternalRegistry) -> Scheduler {
    Scheduler::new(SchedulerConfig::default(), registry, Arc::new(NullSink)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn division_by_zero_faults_only_its_instance() {
    let sched = scheduler(ExternalRegistry::empty());
    sched
        .create_instances(&[divider()], 6, |id| {
            let divisor = if id == InstanceId(4) { 0 } else { id.0 as i64 };
            Parameters::new().with("Divisor", divisor)
        })
        .unwrap();

    let summary = sched.run_all(3).await.unwrap();
    assert_eq!((summary.completed, summary.aborted, summary.faulted), (5, 0, 1));

    let faulted = summary.outcome(InstanceId(4)).unwrap();
    assert_eq!(faulted.status, InstanceStatus::Faulted);
    assert!(faulted.error.as_deref().unwrap().contains("division by zero"));
    assert_eq!(faulted.trace, vec![Value::Integer(100)]);

    let sibling = summary.outcome(InstanceId(5)).unwrap();
    assert_eq!(sibling.trace, vec![Value::Integer(100), Value::Integer(20)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn faulty_definition_in_round_robin_leaves_others_running() {
    let healthy = divider();
    // `pending` is declared but never assigned before it is read.
    let faulty = Arc::new(
        WorkflowBuilder::new("faulty")
            .param("Divisor", ValueType::Integer)
            .body(
                SequenceBuilder::new()
                    .var("pending")
                    .emit(Expr::var("Divisor"))
                    .emit(Expr::var("pending")),
            )
            .build()
            .unwrap(),
    );

    let sched = scheduler(ExternalRegistry::empty());
    let ids = sched
        .create_instances(&[healthy, faulty], 6, |_| Parameters::new().with("Divisor", 2))
        .unwrap();
    let summary = sched.run_all(6).await.unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.faulted, 3);
    for id in ids {
        let outcome = summary.outcome(id).unwrap();
        if id.0 % 2 == 1 {
            assert_eq!(outcome.workflow, "divider");
            assert_eq!(outcome.status, InstanceStatus::Completed);
        } else {
            assert_eq!(outcome.workflow, "faulty");
            assert_eq!(outcome.status, InstanceStatus::Faulted);
            assert!(outcome.error.as_deref().unwrap().contains("pending"));
            assert_eq!(outcome.trace, vec![Value::Integer(2)]);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn external_failures_and_panics_are_contained() {
    let catalog = ExternalCatalog::new();
    catalog.register("flaky", |instance, _| {
        match instance.0 {
            2 => Err("backend unavailable".into()),
            3 => panic!("method blew up"),
            _ => Ok(Some(Value::Integer(instance.0 as i64 * 2))),
        }
    });
    let def = Arc::new(
        WorkflowBuilder::new("caller")
            .body(
                SequenceBuilder::new()
                    .var("answer")
                    .invoke_into("flaky", Vec::new(), "answer")
                    .emit(Expr::var("answer")),
            )
            .build()
            .unwrap(),
    );

    let faults = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));
    let sched = scheduler(catalog.snapshot());
    let ids = sched.create_instances(&[def], 4, |_| Parameters::new()).unwrap();
    for &id in &ids {
        let faults = faults.clone();
        let completions = completions.clone();
        sched
            .set_handlers(
                id,
                InstanceHandlers::new()
                    .on_completed(move |_| {
                        completions.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_faulted(move |_| {
                        faults.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();
    }

    let summary = sched.run_all(4).await.unwrap();
    assert_eq!((summary.completed, summary.faulted), (2, 2));
    assert_eq!(completions.load(Ordering::SeqCst), 2);
    assert_eq!(faults.load(Ordering::SeqCst), 2);

    let failed = summary.outcome(InstanceId(2)).unwrap();
    assert!(failed.error.as_deref().unwrap().contains("backend unavailable"));
    let panicked = summary.outcome(InstanceId(3)).unwrap();
    assert_eq!(panicked.status, InstanceStatus::Faulted);
    assert!(panicked.error.as_deref().unwrap().contains("method blew up"));
    assert_eq!(
        summary.outcome(InstanceId(4)).unwrap().trace,
        vec![Value::Integer(8)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_method_faults_with_its_name() {
    let sink = Arc::new(MemorySink::new());
    let def = Arc::new(
        WorkflowBuilder::new("orphan")
            .body(
                SequenceBuilder::new()
                    .emit(Expr::int(1))
                    .invoke("does_not_exist", vec![Expr::int(1)])
                    .emit(Expr::int(2)),
            )
            .build()
            .unwrap(),
    );
    let sched = Scheduler::new(SchedulerConfig::default(), ExternalRegistry::empty(), sink.clone())
        .unwrap();
    sched.create_instances(&[def], 1, |_| Parameters::new()).unwrap();

    let summary = sched.run_all(1).await.unwrap();
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, InstanceStatus::Faulted);
    assert!(outcome.error.as_deref().unwrap().contains("does_not_exist"));
    assert_eq!(sink.lines(), vec!["[Instance 1] 1".to_string()]);
}
