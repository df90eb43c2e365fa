mod common;

use std::sync::Arc;

use futures_util::future::join_all;

use referral_ledger::errors::LedgerError;
use referral_ledger::models::Cents;
use referral_ledger::repositories::users::MemoryUserStore;
use referral_ledger::services::ledger::{BalanceLedger, DebitStrategy};
use referral_ledger::services::LedgerCore;

use common::{core_with, ObservingStore};

const STRATEGIES: [DebitStrategy; 2] = [DebitStrategy::Conditional, DebitStrategy::Compensating];

async fn funded(strategy: DebitStrategy, balance: Cents) -> LedgerCore {
    let (core, _notices) = core_with(Arc::new(MemoryUserStore::new()), strategy);
    core.directory.create_user(5, None).await.unwrap();
    core.ledger.credit(5, balance).await.unwrap();
    core
}

async fn debit_concurrently(ledger: &BalanceLedger, count: usize, amount: Cents) -> usize {
    let tasks = (0..count).map(|_| {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.debit(5, amount).await })
    });

    let mut successes = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(balance) => {
                assert!(balance >= 0);
                successes += 1;
            }
            Err(LedgerError::InsufficientBalance { .. }) => {}
            Err(e) => panic!("unexpected debit error: {e}"),
        }
    }
    successes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_racing_debits_have_exactly_one_winner() {
    for strategy in STRATEGIES {
        for _ in 0..20 {
            let core = funded(strategy, 10).await;

            let successes = debit_concurrently(&core.ledger, 2, 8).await;

            assert_eq!(successes, 1, "{strategy:?}");
            assert_eq!(core.ledger.balance(5).await.unwrap(), 2);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_racing_debits_never_overdraw() {
    for strategy in STRATEGIES {
        let core = funded(strategy, 50).await;

        let successes = debit_concurrently(&core.ledger, 32, 8).await;

        // Every failure is compensated, so exactly as many debits as fit go through.
        assert_eq!(successes, 6, "{strategy:?}");
        assert_eq!(core.ledger.balance(5).await.unwrap(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_credits_and_debits_conserve_funds() {
    for strategy in STRATEGIES {
        let core = funded(strategy, 100).await;

        let credits = (0..20).map(|_| {
            let ledger = core.ledger.clone();
            tokio::spawn(async move { ledger.credit(5, 1).await })
        });
        let debits = (0..20).map(|_| {
            let ledger = core.ledger.clone();
            tokio::spawn(async move { ledger.debit(5, 3).await })
        });

        let (credited, debited) = tokio::join!(join_all(credits), join_all(debits));
        assert!(credited.into_iter().all(|r| r.unwrap().is_ok()));
        assert!(debited.into_iter().all(|r| r.unwrap().is_ok()));

        assert_eq!(core.ledger.balance(5).await.unwrap(), 60);
    }
}

#[tokio::test]
async fn balance_stays_non_negative_over_any_sequence() {
    for strategy in STRATEGIES {
        let core = funded(strategy, 5).await;

        // Small LCG so the sequence is varied but reproducible.
        let mut seed: u64 = 0x2545_f491;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let amount = ((seed >> 33) % 20 + 1) as Cents;

            let result = if seed & 1 == 0 {
                core.ledger.credit(5, amount).await
            } else {
                core.ledger.debit(5, amount).await
            };
            match result {
                Ok(balance) => assert!(balance >= 0),
                Err(LedgerError::InsufficientBalance { .. }) => {}
                Err(e) => panic!("unexpected ledger error: {e}"),
            }
            assert!(core.ledger.balance(5).await.unwrap() >= 0);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compensating_debits_expose_a_transient_negative_balance() {
    let store = ObservingStore::new(MemoryUserStore::new());
    let (core, _notices) = core_with(Arc::new(store.clone()), DebitStrategy::Compensating);
    core.directory.create_user(5, None).await.unwrap();
    core.ledger.credit(5, 10).await.unwrap();

    let successes = debit_concurrently(&core.ledger, 2, 8).await;

    assert_eq!(successes, 1);
    assert_eq!(store.lowest(), -6);
    assert_eq!(core.ledger.balance(5).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conditional_debits_never_expose_a_negative_balance() {
    let store = ObservingStore::new(MemoryUserStore::new());
    let (core, _notices) = core_with(Arc::new(store.clone()), DebitStrategy::Conditional);
    core.directory.create_user(5, None).await.unwrap();
    core.ledger.credit(5, 10).await.unwrap();

    let successes = debit_concurrently(&core.ledger, 2, 8).await;

    assert_eq!(successes, 1);
    assert_eq!(store.lowest(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_sub_unit_debits_leave_the_balance_exact() {
    for strategy in STRATEGIES {
        // 0.10 funded, eight racing debits of 0.07.
        let core = funded(strategy, 10).await;

        let successes = debit_concurrently(&core.ledger, 8, 7).await;

        assert_eq!(successes, 1, "{strategy:?}");
        assert_eq!(core.ledger.balance(5).await.unwrap(), 3);
        assert_eq!(core.ledger.debit(5, 3).await.unwrap(), 0);
    }
}
