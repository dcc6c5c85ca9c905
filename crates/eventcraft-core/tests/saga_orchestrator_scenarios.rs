#![cfg(feature = "cqrs")]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventcraft_core::prelude::*;

/// Shared ledger an order-fulfillment saga's steps act on.
#[derive(Default)]
struct OrderLedger {
    reserved_stock: AtomicBool,
    charged_payment: AtomicBool,
    shipped: AtomicBool,
    stock_released: AtomicBool,
    payment_refunded: AtomicBool,
    payment_should_fail: AtomicBool,
}

fn reserve_stock_step() -> SagaStepDefinition<OrderLedger> {
    SagaStepDefinition::new(
        "reserve-stock",
        Duration::from_millis(200),
        step_action(|ledger: Arc<OrderLedger>| async move {
            ledger.reserved_stock.store(true, Ordering::SeqCst);
            Ok(())
        }),
    )
    .with_compensation(step_action(|ledger: Arc<OrderLedger>| async move {
        ledger.stock_released.store(true, Ordering::SeqCst);
        Ok(())
    }))
}

fn charge_payment_step() -> SagaStepDefinition<OrderLedger> {
    SagaStepDefinition::new(
        "charge-payment",
        Duration::from_millis(200),
        step_action(|ledger: Arc<OrderLedger>| async move {
            if ledger.payment_should_fail.load(Ordering::SeqCst) {
                return Err("card declined".to_string());
            }
            ledger.charged_payment.store(true, Ordering::SeqCst);
            Ok(())
        }),
    )
    .with_compensation(step_action(|ledger: Arc<OrderLedger>| async move {
        ledger.payment_refunded.store(true, Ordering::SeqCst);
        Ok(())
    }))
}

fn ship_order_step() -> SagaStepDefinition<OrderLedger> {
    SagaStepDefinition::new(
        "ship-order",
        Duration::from_millis(200),
        step_action(|ledger: Arc<OrderLedger>| async move {
            ledger.shipped.store(true, Ordering::SeqCst);
            Ok(())
        }),
    )
}

fn order_fulfillment_saga() -> SagaDefinition<OrderLedger> {
    SagaDefinition::new("order-fulfillment")
        .add_step(reserve_stock_step())
        .add_step(charge_payment_step())
        .add_step(ship_order_step())
}

// Scenario: happy-path orchestrated saga runs every step to completion with
// no compensation triggered.
#[tokio::test]
async fn happy_path_saga_completes_every_step() {
    let orchestrator: SagaOrchestrator<OrderLedger> = SagaOrchestrator::new();
    let ledger = Arc::new(OrderLedger::default());

    let instance = orchestrator
        .execute(order_fulfillment_saga(), Arc::clone(&ledger))
        .await
        .unwrap();

    assert_eq!(instance.status, SagaStatus::Completed);
    assert!(ledger.reserved_stock.load(Ordering::SeqCst));
    assert!(ledger.charged_payment.load(Ordering::SeqCst));
    assert!(ledger.shipped.load(Ordering::SeqCst));
    assert!(!ledger.stock_released.load(Ordering::SeqCst));
    assert!(!ledger.payment_refunded.load(Ordering::SeqCst));
}

// Scenario: a mid-saga failure (payment declined) triggers reverse-order
// compensation of every step that had already succeeded.
#[tokio::test]
async fn payment_failure_compensates_the_reserved_stock_in_reverse_order() {
    let orchestrator: SagaOrchestrator<OrderLedger> = SagaOrchestrator::new();
    let ledger = Arc::new(OrderLedger::default());
    ledger.payment_should_fail.store(true, Ordering::SeqCst);

    let instance = orchestrator
        .execute(order_fulfillment_saga(), Arc::clone(&ledger))
        .await
        .unwrap();

    assert_eq!(instance.status, SagaStatus::Failed);
    assert!(ledger.reserved_stock.load(Ordering::SeqCst));
    assert!(!ledger.charged_payment.load(Ordering::SeqCst));
    assert!(!ledger.shipped.load(Ordering::SeqCst));

    // Only the step that actually succeeded (reserve-stock) is compensated.
    assert!(ledger.stock_released.load(Ordering::SeqCst));
    assert!(!ledger.payment_refunded.load(Ordering::SeqCst));

    let step_statuses: Vec<StepStatus> = instance.per_step_status.iter().map(|s| s.status).collect();
    assert_eq!(
        step_statuses,
        vec![StepStatus::Compensated, StepStatus::Failed, StepStatus::Pending]
    );
}

// Boundary: a single-step saga with no compensation defined completes (or
// fails) without the runtime trying to invoke a compensation that doesn't
// exist.
#[tokio::test]
async fn single_step_saga_with_no_compensation_runs_cleanly() {
    let orchestrator: SagaOrchestrator<OrderLedger> = SagaOrchestrator::new();
    let ledger = Arc::new(OrderLedger::default());

    let definition = SagaDefinition::new("ship-only").add_step(ship_order_step());
    let instance = orchestrator.execute(definition, Arc::clone(&ledger)).await.unwrap();

    assert_eq!(instance.status, SagaStatus::Completed);
    assert!(ledger.shipped.load(Ordering::SeqCst));
}

// A step that keeps failing exhausts its retry budget before the saga
// overall reports failure.
#[tokio::test]
async fn a_step_retries_up_to_its_budget_before_failing() {
    let orchestrator: SagaOrchestrator<OrderLedger> = SagaOrchestrator::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    struct Ctx {
        attempts: Arc<AtomicUsize>,
    }

    let ctx = Arc::new(Ctx {
        attempts: Arc::clone(&attempts),
    });

    let flaky_step = SagaStepDefinition::new(
        "flaky",
        Duration::from_millis(200),
        step_action(|ctx: Arc<Ctx>| async move {
            ctx.attempts.fetch_add(1, Ordering::SeqCst);
            Err("transient failure".to_string())
        }),
    )
    .with_retries(3, Duration::from_millis(1));

    let definition = SagaDefinition::new("flaky-saga").add_step(flaky_step);
    let instance = orchestrator.execute(definition, ctx).await.unwrap();

    assert_eq!(instance.status, SagaStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

// Cancellation requested mid-retry is honored at the next retry attempt,
// not only once the retry budget is exhausted or the step hands back
// control between steps.
#[tokio::test]
async fn cancelling_mid_retry_stops_before_the_retry_budget_is_exhausted() {
    let orchestrator: Arc<SagaOrchestrator<OrderLedger>> = Arc::new(SagaOrchestrator::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    struct Ctx {
        attempts: Arc<AtomicUsize>,
    }

    let ctx = Arc::new(Ctx {
        attempts: Arc::clone(&attempts),
    });

    let flaky_step = SagaStepDefinition::new(
        "flaky",
        Duration::from_secs(5),
        step_action(|ctx: Arc<Ctx>| async move {
            ctx.attempts.fetch_add(1, Ordering::SeqCst);
            Err("transient failure".to_string())
        }),
    )
    .with_retries(100, Duration::from_millis(20));

    let definition = SagaDefinition::new("flaky-saga").add_step(flaky_step);

    let saga_id = orchestrator.start_saga(definition, ctx).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(orchestrator.cancel_saga(&saga_id).await);

    let instance = loop {
        if let Some(instance) = orchestrator.saga_status(&saga_id).await {
            if instance.status != SagaStatus::Running {
                break instance;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(instance.status, SagaStatus::Failed);
    // Cancellation lands well short of the 100-attempt budget.
    assert!(attempts.load(Ordering::SeqCst) < 100);
}

// A definition with no steps is rejected before execution starts.
#[tokio::test]
async fn an_empty_saga_definition_fails_validation() {
    let orchestrator: SagaOrchestrator<OrderLedger> = SagaOrchestrator::new();
    let definition: SagaDefinition<OrderLedger> = SagaDefinition::new("empty");

    let result = orchestrator.execute(definition, Arc::new(OrderLedger::default())).await;
    assert!(matches!(result, Err(SagaError::InvalidDefinition(_))));
}

// start_saga returns the saga id before the run finishes, so a caller can
// cancel a saga that is still mid-action; cancellation then compensates
// whatever had already completed.
#[tokio::test]
async fn start_saga_returns_an_id_that_can_cancel_a_still_running_saga() {
    let orchestrator: Arc<SagaOrchestrator<OrderLedger>> = Arc::new(SagaOrchestrator::new());
    let ledger = Arc::new(OrderLedger::default());

    let slow_reserve_stock = SagaStepDefinition::new(
        "reserve-stock",
        Duration::from_millis(500),
        step_action(|ledger: Arc<OrderLedger>| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ledger.reserved_stock.store(true, Ordering::SeqCst);
            Ok(())
        }),
    )
    .with_compensation(step_action(|ledger: Arc<OrderLedger>| async move {
        ledger.stock_released.store(true, Ordering::SeqCst);
        Ok(())
    }));

    let definition = SagaDefinition::new("order-fulfillment")
        .add_step(slow_reserve_stock)
        .add_step(charge_payment_step())
        .add_step(ship_order_step());

    let saga_id = orchestrator
        .start_saga(definition, Arc::clone(&ledger))
        .await
        .unwrap();
    assert!(!saga_id.is_empty());

    // Request cancellation while the first step is still running.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(orchestrator.cancel_saga(&saga_id).await);

    let instance = loop {
        if let Some(instance) = orchestrator.saga_status(&saga_id).await {
            if instance.status != SagaStatus::Running && instance.status != SagaStatus::Compensating {
                break instance;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(instance.status, SagaStatus::Failed);
    assert!(ledger.reserved_stock.load(Ordering::SeqCst));
    assert!(ledger.stock_released.load(Ordering::SeqCst));
    assert!(!ledger.charged_payment.load(Ordering::SeqCst));
}
