//! Integration tests for optimistic cart commands.
//!
//! Commands change the replica before the remote answers and restore the
//! exact previous replica when the remote rejects the change.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::time::Duration;

use cart_sync_core::ProductId;
use cart_sync_engine::{CartError, IdentityState};
use cart_sync_integration_tests::{
    Behavior, Call, FakeRemote, FakeTokens, Op, TIMEOUT, TokenBehavior, engine, line,
    run_pending_tasks, signed_in,
};
use tokio::time::Instant;

const TEA: ProductId = ProductId::new(1);
const JAM: ProductId = ProductId::new(2);

fn pantry() -> FakeRemote {
    FakeRemote::with_cart(vec![
        line(1, "Green Tea", "10.00", 1),
        line(2, "Strawberry Jam", "3.50", 2),
    ])
}

// =============================================================================
// set_quantity
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_set_quantity_updates_replica_and_remote() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    engine.set_quantity(TEA, 4).await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.quantity_of(TEA), 4);
    assert_eq!(snapshot.total_items, 6);
    assert_eq!(snapshot.total_price.to_string(), "$47.00");
    assert_eq!(remote.calls().last(), Some(&Call::SetQuantity(TEA, 4)));
    assert_eq!(remote.cart(), vec![(TEA, 4), (JAM, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_set_quantity_failure_restores_replica() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;
    let before = engine.snapshot();

    remote.set_behavior(Op::SetQuantity, Behavior::Fail);
    let err = engine.set_quantity(TEA, 5).await.unwrap_err();

    assert!(matches!(err, CartError::NetworkFailure(_)));
    let after = engine.snapshot();
    assert_eq!(after.lines, before.lines);
    assert_eq!(after.total_items, before.total_items);
    assert!(after.last_error.unwrap().contains("503"));
    assert!(!after.busy);
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_change_is_visible_before_remote_answers() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    remote.set_behavior(Op::SetQuantity, Behavior::Delay(Duration::from_secs(2)));
    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.set_quantity(JAM, 7).await }
    });
    run_pending_tasks().await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.quantity_of(JAM), 7);
    assert!(snapshot.busy);

    pending.await.unwrap().unwrap();
    assert!(!engine.snapshot().busy);
    assert_eq!(remote.cart(), vec![(TEA, 1), (JAM, 7)]);
}

#[tokio::test(start_paused = true)]
async fn test_non_positive_quantity_removes_line() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    engine.set_quantity(TEA, 0).await.unwrap();
    engine.set_quantity(JAM, -3).await.unwrap();

    let snapshot = engine.snapshot();
    assert!(snapshot.lines.is_empty());
    assert_eq!(snapshot.total_items, 0);
    assert_eq!(remote.count(Op::SetQuantity), 0);
    assert_eq!(remote.count(Op::Delete), 2);
}

#[tokio::test(start_paused = true)]
async fn test_set_quantity_for_absent_product_reports_remote_error() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    let err = engine.set_quantity(ProductId::new(99), 3).await.unwrap_err();

    assert!(matches!(err, CartError::NetworkFailure(_)));
    let snapshot = engine.snapshot();
    assert!(snapshot.line(ProductId::new(99)).is_none());
    assert_eq!(snapshot.lines.len(), 2);
}

// =============================================================================
// remove / clear
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_remove_failure_restores_line() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;
    let before = engine.snapshot();

    remote.set_behavior(Op::Delete, Behavior::Fail);
    engine.remove(JAM).await.unwrap_err();

    assert_eq!(engine.snapshot().lines, before.lines);
    assert_eq!(remote.cart(), vec![(TEA, 1), (JAM, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_empties_cart() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    engine.clear().await.unwrap();

    assert!(engine.snapshot().lines.is_empty());
    assert!(remote.cart().is_empty());
    assert_eq!(remote.calls().last(), Some(&Call::DeleteAll));
}

#[tokio::test(start_paused = true)]
async fn test_clear_failure_restores_every_line() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;
    let before = engine.snapshot();

    remote.set_behavior(Op::DeleteAll, Behavior::Fail);
    engine.clear().await.unwrap_err();

    let after = engine.snapshot();
    assert_eq!(after.lines, before.lines);
    assert_eq!(after.total_price, before.total_price);
}

// =============================================================================
// add_or_increment
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_add_new_product_refetches_details() {
    let remote = pantry();
    remote.stock(line(3, "Sourdough", "5.25", 1));
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    engine.add_or_increment(ProductId::new(3)).await.unwrap();

    let snapshot = engine.snapshot();
    let bread = snapshot.line(ProductId::new(3)).unwrap();
    assert_eq!(bread.product_name, "Sourdough");
    assert_eq!(bread.quantity.get(), 1);
    assert_eq!(
        remote.calls(),
        vec![Call::Read, Call::Add(ProductId::new(3)), Call::Read]
    );
}

#[tokio::test(start_paused = true)]
async fn test_add_respects_server_stock_clamp() {
    let mut tea = line(1, "Green Tea", "10.00", 2);
    tea.available_quantity = Some(2);
    let remote = FakeRemote::with_cart(vec![tea]);
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    engine.add_or_increment(TEA).await.unwrap();

    assert_eq!(engine.snapshot().quantity_of(TEA), 2);
}

#[tokio::test(start_paused = true)]
async fn test_add_failure_leaves_replica_untouched() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;
    let before = engine.snapshot();

    remote.set_behavior(Op::Add, Behavior::Fail);
    engine.add_or_increment(TEA).await.unwrap_err();

    let after = engine.snapshot();
    assert_eq!(after.lines, before.lines);
    assert!(after.last_error.is_some());
    assert_eq!(remote.count(Op::Read), 1);
}

// =============================================================================
// Preconditions and failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_commands_require_identity() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = engine(&remote, &tokens);
    engine.set_identity(IdentityState::signed_out());

    assert!(matches!(
        engine.add_or_increment(TEA).await,
        Err(CartError::NotAuthenticated)
    ));
    assert!(matches!(
        engine.set_quantity(TEA, 2).await,
        Err(CartError::NotAuthenticated)
    ));
    assert!(matches!(engine.remove(TEA).await, Err(CartError::NotAuthenticated)));
    assert!(matches!(engine.clear().await, Err(CartError::NotAuthenticated)));

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.last_error.as_deref(), Some("Not authenticated"));
    assert!(snapshot.lines.is_empty());
    assert!(remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hung_remote_times_out_and_rolls_back() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;
    let before = engine.snapshot();

    remote.set_behavior(Op::SetQuantity, Behavior::Hang);
    let started = Instant::now();
    let err = engine.set_quantity(TEA, 3).await.unwrap_err();

    assert!(matches!(err, CartError::Timeout(t) if t == TIMEOUT));
    assert!(started.elapsed() >= TIMEOUT);
    let after = engine.snapshot();
    assert_eq!(after.lines, before.lines);
    assert!(!after.busy);
    assert_eq!(after.last_error.as_deref(), Some("Request timed out after 10000ms"));
}

#[tokio::test(start_paused = true)]
async fn test_hung_token_provider_times_out() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    tokens.set_behavior(TokenBehavior::Hang);
    let err = engine.remove(TEA).await.unwrap_err();

    assert!(matches!(err, CartError::Timeout(_)));
    assert_eq!(engine.snapshot().quantity_of(TEA), 1);
    assert_eq!(remote.count(Op::Delete), 0);
}

#[tokio::test(start_paused = true)]
async fn test_user_switch_while_awaiting_token_drops_command() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    tokens.set_behavior(TokenBehavior::Delay(Duration::from_millis(100)));
    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.set_quantity(TEA, 9).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.set_identity(IdentityState::signed_in("shopper-2"));

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CartError::IdentityChanged));
    assert_eq!(remote.count(Op::SetQuantity), 0);

    let snapshot = engine.settled().await;
    assert_eq!(snapshot.quantity_of(TEA), 1);
    assert!(snapshot.last_error.is_none());
    assert_eq!(remote.calls(), vec![Call::Read, Call::Read]);
}

#[tokio::test(start_paused = true)]
async fn test_next_command_clears_last_error() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    remote.set_behavior(Op::SetQuantity, Behavior::Fail);
    engine.set_quantity(TEA, 2).await.unwrap_err();
    assert!(engine.snapshot().last_error.is_some());

    remote.heal(Op::SetQuantity);
    engine.set_quantity(TEA, 2).await.unwrap();
    assert!(engine.snapshot().last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_command_releases_busy() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    remote.set_behavior(Op::SetQuantity, Behavior::Hang);
    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.set_quantity(TEA, 9).await }
    });
    run_pending_tasks().await;
    assert!(engine.snapshot().busy);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    assert!(!engine.snapshot().busy);
}

#[tokio::test(start_paused = true)]
async fn test_commands_after_shutdown_are_rejected() {
    let remote = pantry();
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    engine.shutdown();

    assert!(matches!(engine.set_quantity(TEA, 2).await, Err(CartError::ShutDown)));
    assert!(matches!(engine.force_fetch().await, Err(CartError::ShutDown)));
    assert_eq!(remote.count(Op::SetQuantity), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lines_stay_unique_and_positive() {
    let remote = pantry();
    remote.stock(line(3, "Sourdough", "5.25", 1));
    let tokens = FakeTokens::default();
    let engine = signed_in(&remote, &tokens).await;

    engine.add_or_increment(TEA).await.unwrap();
    engine.add_or_increment(ProductId::new(3)).await.unwrap();
    engine.add_or_increment(ProductId::new(3)).await.unwrap();
    engine.set_quantity(JAM, 0).await.unwrap();
    engine.set_quantity(TEA, 12).await.unwrap();
    remote.set_behavior(Op::Delete, Behavior::Fail);
    engine.remove(TEA).await.unwrap_err();

    let snapshot = engine.snapshot();
    let ids: HashSet<_> = snapshot.lines.iter().map(|l| l.product_id).collect();
    assert_eq!(ids.len(), snapshot.lines.len());
    assert!(snapshot.lines.iter().all(|l| l.quantity.get() > 0));
    assert_eq!(snapshot.quantity_of(TEA), 12);
    assert_eq!(snapshot.quantity_of(ProductId::new(3)), 2);
    assert_eq!(snapshot.quantity_of(JAM), 0);
    assert_eq!(
        snapshot.total_items,
        snapshot.lines.iter().map(|l| u64::from(l.quantity.get())).sum::<u64>()
    );
}
