use std::sync::Arc;

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};

use orchestrator::{
    FlowDefinition, HandlerType, Orchestrator, Payload, StepDefinition, StepFailure, StepHandler,
};

/// Handler that succeeds immediately with a constant response.
struct NoOpHandler;

#[async_trait]
impl StepHandler for NoOpHandler {
    async fn call(
        &self,
        _action: &str,
        _handler_type: HandlerType,
        _payload: Payload,
    ) -> Result<Value, StepFailure> {
        Ok(json!({"ok": true}))
    }
}

fn linear_flow(len: usize) -> FlowDefinition {
    let mut step = StepDefinition::new(format!("step-{len}"));
    for i in (1..len).rev() {
        step = StepDefinition::new(format!("step-{i}")).then(step);
    }
    FlowDefinition::starting_with(step)
}

fn bench_compile(c: &mut Criterion) {
    let flow = linear_flow(20);

    c.bench_function("orchestrator/compile_20_steps", |b| {
        b.iter(|| {
            flow::compile(&flow).unwrap();
        });
    });
}

fn bench_linear_run(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let flow = linear_flow(10);
    let orchestrator = Orchestrator::new("bench-flow", &flow).unwrap();

    c.bench_function("orchestrator/linear_10_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut transaction = orchestrator.begin_transaction(
                    "bench-txn",
                    Arc::new(NoOpHandler),
                    Some(json!({"prop": 1})),
                );
                orchestrator.resume(&mut transaction).await;
            });
        });
    });
}

fn bench_parallel_run(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let flow = FlowDefinition::parallel(
        (0..8)
            .map(|i| StepDefinition::new(format!("fan-{i}")))
            .collect(),
    );
    let orchestrator = Orchestrator::new("bench-fan-out", &flow).unwrap();

    c.bench_function("orchestrator/fan_out_8_siblings", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut transaction =
                    orchestrator.begin_transaction("bench-txn", Arc::new(NoOpHandler), None);
                orchestrator.resume(&mut transaction).await;
            });
        });
    });
}

criterion_group!(benches, bench_compile, bench_linear_run, bench_parallel_run);
criterion_main!(benches);
