// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the real engine from many threads and verify that its
//! locking (job record, then order record, then wallets in party order)
//! never forms a cycle.
//!
//! The tests rely on parking_lot's `deadlock_detection` feature, enabled for
//! dev builds, to detect cycles in the lock graph.

use garage_flow::{
    Actor, Decision, DocumentKind, Engine, EngineConfig, Instrument, JobAction, JobId, JobOrigin,
    LineItem, OrderId, PartyId, PayableRef, SettlementResult, WorkflowError,
};
use parking_lot::deadlock;
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

// === Deadlock Detector ===

/// Starts a background thread that periodically checks for deadlocks.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Fixtures ===

const CUSTOMER: u32 = 1;

/// Creates `count` self-service jobs, each with an approved bill of 10.00 and
/// its own technician.
fn billed_jobs(engine: &Engine, count: u64) {
    let customer = Actor::customer(CUSTOMER);
    for id in 0..count {
        let technician = Actor::technician(100 + id as u32);
        engine
            .create_job(&customer, JobId(id), Some(technician.id), "KA-01-1234", JobOrigin::SelfService)
            .unwrap();
        for action in [
            JobAction::Accept,
            JobAction::Arrive,
            JobAction::StartDiagnosis,
            JobAction::StartWork,
        ] {
            engine.advance(JobId(id), &technician, action).unwrap();
        }
        engine
            .propose_document(JobId(id), &technician, DocumentKind::Bill, vec![], dec!(10))
            .unwrap();
        engine
            .respond_to_document(JobId(id), &customer, Decision::Approve)
            .unwrap();
    }
}

// === Tests ===

#[test]
fn no_deadlock_concurrent_settlements_from_one_wallet() {
    let detector = start_deadlock_detector();
    let engine = Engine::new(EngineConfig::default());
    billed_jobs(&engine, 200);
    // Enough for exactly half of the bills.
    engine.top_up(&Actor::customer(CUSTOMER), dec!(1000)).unwrap();

    let results: Vec<Result<SettlementResult, WorkflowError>> = (0..200u64)
        .into_par_iter()
        .map(|id| {
            engine.settle(
                PayableRef::Job(JobId(id)),
                &Actor::customer(CUSTOMER),
                dec!(10),
                Instrument::Wallet,
            )
        })
        .collect();

    stop_deadlock_detector(detector);

    let paid = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| **r == Err(WorkflowError::InsufficientFunds))
        .count();
    assert_eq!(paid, 100);
    assert_eq!(short, 100);
    assert_eq!(engine.balance(PartyId(CUSTOMER)), Decimal::ZERO);
    for wallet in engine.wallets() {
        assert!(wallet.is_balanced());
    }
}

#[test]
fn no_deadlock_same_job_settled_from_many_threads() {
    let detector = start_deadlock_detector();
    let engine = Engine::new(EngineConfig::default());
    billed_jobs(&engine, 1);
    engine.top_up(&Actor::customer(CUSTOMER), dec!(1000)).unwrap();

    let results: Vec<SettlementResult> = (0..64)
        .into_par_iter()
        .map(|_| {
            engine
                .settle(
                    PayableRef::Job(JobId(0)),
                    &Actor::customer(CUSTOMER),
                    dec!(10),
                    Instrument::Wallet,
                )
                .unwrap()
        })
        .collect();

    stop_deadlock_detector(detector);

    let paid = results
        .iter()
        .filter(|r| matches!(r, SettlementResult::Paid { .. }))
        .count();
    assert_eq!(paid, 1);
    assert_eq!(engine.balance(PartyId(CUSTOMER)), dec!(990));
    assert_eq!(engine.balance(PartyId(100)), dec!(10));
}

#[test]
fn no_deadlock_cross_wallet_order_payments() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new(EngineConfig::default()));

    // Four technicians each buy from each of four suppliers. Even order ids
    // are cancelled and refunded; odd ones are partly withdrawn.
    let technicians: Vec<u32> = (10..14).collect();
    let suppliers: Vec<u32> = (20..24).collect();
    for t in &technicians {
        engine.top_up(&Actor::technician(*t), dec!(1000)).unwrap();
    }

    let mut next_order = 0u64;
    let mut orders = Vec::new();
    for t in &technicians {
        for s in &suppliers {
            let items = vec![LineItem::part("Spark Plug", 2, dec!(25))];
            let id = OrderId(next_order);
            next_order += 1;
            engine
                .create_order(&Actor::technician(*t), id, Some(PartyId(*s)), items.clone())
                .unwrap();
            engine
                .send_quotation(id, &Actor::supplier(*s), items, dec!(50))
                .unwrap();
            engine
                .respond_to_quotation(id, &Actor::technician(*t), true)
                .unwrap();
            orders.push((id, *t, *s));
        }
    }

    let mut handles = vec![];
    for (id, t, s) in orders {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            engine
                .settle(PayableRef::Order(id), &Actor::technician(t), dec!(50), Instrument::Wallet)
                .unwrap();
            if id.0 % 2 == 0 {
                engine.cancel_order(id, &Actor::technician(t)).unwrap();
            } else {
                engine.withdraw(&Actor::supplier(s), dec!(10)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    stop_deadlock_detector(detector);

    // Half of the 16 orders were refunded.
    let spent: Decimal = technicians
        .iter()
        .map(|t| dec!(1000) - engine.balance(PartyId(*t)))
        .sum();
    assert_eq!(spent, dec!(400));
    for wallet in engine.wallets() {
        assert!(wallet.is_balanced());
        assert!(wallet.balance() >= Decimal::ZERO);
    }
}
