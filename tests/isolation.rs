//! Isolation properties of concurrent instances
//!
//! Instances share definition objects but never each other's variables: the
//! traces they produce must not depend on dispatch order or on how many
//! definition objects they are spread across.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use weft::definition::{
    Expr, Parameters, SequenceBuilder, Value, ValueType, WorkflowBuilder, WorkflowDefinition,
};
use weft::runtime::{
    DispatchOrder, ExternalRegistry, InstanceId, NullSink, Scheduler, SchedulerConfig,
};

/// Accumulates a per-instance value with a jittered pause between steps.
fn accumulator() -> WorkflowDefinition {
    WorkflowBuilder::new("accumulator")
        .param("InstanceId", ValueType::Integer)
        .param("Step", ValueType::Integer)
        .body(
            SequenceBuilder::new()
                .var_init("total", Expr::mul(Expr::var("InstanceId"), Expr::int(1000)))
                .emit(Expr::var("total"))
                .delay(Expr::millis(Expr::var("Step")))
                .assign("total", Expr::add(Expr::var("total"), Expr::var("Step")))
                .emit(Expr::var("total"))
                .sequence(
                    SequenceBuilder::new()
                        .var_init("scratch", Expr::add(Expr::var("total"), Expr::var("InstanceId")))
                        .delay(Expr::millis(Expr::int(1)))
                        .assign("total", Expr::var("scratch"))
                        .emit(Expr::var("total")),
                ),
        )
        .build()
        .unwrap()
}

fn params(id: InstanceId) -> Parameters {
    Parameters::new()
        .with("InstanceId", id)
        .with("Step", (id.0 % 7) as i64)
}

fn expected(id: InstanceId) -> Vec<Value> {
    let base = id.0 as i64 * 1000;
    let step = (id.0 % 7) as i64;
    vec![
        Value::Integer(base),
        Value::Integer(base + step),
        Value::Integer(base + step + id.0 as i64),
    ]
}

fn run_once(
    definitions: &[Arc<WorkflowDefinition>],
    count: usize,
    order: DispatchOrder,
    concurrency: usize,
) -> BTreeMap<InstanceId, Vec<Value>> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let config = SchedulerConfig {
            dispatch_order: order,
            ..SchedulerConfig::default()
        };
        let sched = Scheduler::new(config, ExternalRegistry::empty(), Arc::new(NullSink)).unwrap();
        sched.create_instances(definitions, count, params).unwrap();
        let summary = sched.run_all(concurrency).await.unwrap();
        assert_eq!(summary.completed, count);
        sched.results().snapshot()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Any dispatch permutation yields the same per-instance traces.
    #[test]
    fn dispatch_order_does_not_change_traces(
        seed in any::<u64>(),
        count in 1usize..24,
        concurrency in 1usize..8,
    ) {
        let definition = Arc::new(accumulator());
        let fingerprint = definition.fingerprint();
        let defs = vec![definition.clone()];

        let baseline = run_once(&defs, count, DispatchOrder::InOrder, concurrency);
        let shuffled = run_once(&defs, count, DispatchOrder::Shuffled { seed }, concurrency);

        prop_assert_eq!(&baseline, &shuffled);
        for (id, trace) in &baseline {
            prop_assert_eq!(trace, &expected(*id));
        }
        prop_assert_eq!(definition.fingerprint(), fingerprint);
    }

    /// Spreading instances across K definition objects changes nothing either.
    #[test]
    fn definition_reuse_count_does_not_change_traces(
        reuse in 1usize..5,
        count in 1usize..16,
    ) {
        let defs: Vec<_> = (0..reuse).map(|_| Arc::new(accumulator())).collect();
        let traces = run_once(&defs, count, DispatchOrder::Reverse, 4);

        prop_assert_eq!(traces.len(), count);
        for (id, trace) in &traces {
            prop_assert_eq!(trace, &expected(*id));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_of_one_definition_do_not_cross_talk() {
    let definition = Arc::new(accumulator());
    let before = definition.fingerprint();
    let sched = Scheduler::new(
        SchedulerConfig::default(),
        ExternalRegistry::empty(),
        Arc::new(NullSink),
    )
    .unwrap();

    let ids = sched
        .create_instances(std::slice::from_ref(&definition), 32, params)
        .unwrap();
    let summary = sched.run_all(32).await.unwrap();
    assert_eq!(summary.completed, 32);

    let mut firsts = Vec::new();
    for id in ids {
        let trace = sched.results().trace(id).unwrap();
        assert_eq!(trace, expected(id));
        firsts.push(trace[0].clone());
    }
    firsts.dedup();
    assert_eq!(firsts.len(), 32);
    assert_eq!(definition.fingerprint(), before);
    assert_eq!(Arc::strong_count(&definition), 1);
}
