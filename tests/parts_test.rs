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


//! Parts-order integration tests: quotation, fulfilment and job-spawned
//! sourcing.

use garage_flow::{
    Actor, Decision, DeliveryDetails, DeliveryType, DocumentKind, Engine, EngineConfig, Instrument,
    JobAction, JobId, JobOrigin, JobStatus, LineItem, OrderId, OrderStatus, PartyId, PayableRef,
    PaymentStatus, SettlementResult, WorkflowError,
};
use rust_decimal_macros::dec;

const CUSTOMER: u32 = 1;
const TECHNICIAN: u32 = 2;
const SUPPLIER: u32 = 7;

fn supplier() -> Actor {
    Actor::supplier(SUPPLIER)
}

fn technician() -> Actor {
    Actor::technician(TECHNICIAN)
}

fn items() -> Vec<LineItem> {
    vec![
        LineItem::part("Brake Pad", 4, dec!(400)),
        LineItem::part("Clutch Plate", 1, dec!(800)),
    ]
}

fn engine_with_order() -> Engine {
    let engine = Engine::new(EngineConfig::default());
    engine
        .create_order(&technician(), OrderId(1), Some(PartyId(SUPPLIER)), items())
        .unwrap();
    engine
}

fn confirmed_order() -> Engine {
    let engine = engine_with_order();
    engine
        .send_quotation(OrderId(1), &supplier(), items(), dec!(2400))
        .unwrap();
    engine
        .respond_to_quotation(OrderId(1), &technician(), true)
        .unwrap();
    engine
}

#[test]
fn quotation_matching_items_is_accepted() {
    let engine = engine_with_order();

    let order = engine
        .send_quotation(OrderId(1), &supplier(), items(), dec!(2400))
        .unwrap();

    assert_eq!(order.status, OrderStatus::Quoted);
    assert_eq!(order.total_amount, dec!(2400));
    assert!(order.quoted_at.is_some());
}

#[test]
fn quotation_disagreeing_with_items_is_rejected() {
    let engine = engine_with_order();

    let result = engine.send_quotation(OrderId(1), &supplier(), items(), dec!(2000));

    assert_eq!(result, Err(WorkflowError::AmountMismatch));
    assert_eq!(engine.order(OrderId(1)).unwrap().status, OrderStatus::Inquiry);
}

#[test]
fn quotation_within_rounding_tolerance_stores_exact_sum() {
    let engine = engine_with_order();

    let order = engine
        .send_quotation(OrderId(1), &supplier(), items(), dec!(2400.01))
        .unwrap();

    assert_eq!(order.total_amount, dec!(2400));
}

#[test]
fn supplier_may_revise_open_quotation() {
    let engine = engine_with_order();
    engine
        .send_quotation(OrderId(1), &supplier(), items(), dec!(2400))
        .unwrap();

    let revised = vec![LineItem::part("Brake Pad", 4, dec!(350))];
    let order = engine
        .send_quotation(OrderId(1), &supplier(), revised, dec!(1400))
        .unwrap();

    assert_eq!(order.status, OrderStatus::Quoted);
    assert_eq!(order.total_amount, dec!(1400));
    assert_eq!(order.items.len(), 1);
}

#[test]
fn broadcast_order_is_claimed_by_first_quoting_supplier() {
    let engine = Engine::new(EngineConfig::default());
    engine
        .create_order(&Actor::customer(CUSTOMER), OrderId(3), None, items())
        .unwrap();

    let order = engine
        .send_quotation(OrderId(3), &supplier(), items(), dec!(2400))
        .unwrap();
    assert_eq!(order.supplier, Some(PartyId(SUPPLIER)));

    let rival = engine.send_quotation(OrderId(3), &Actor::supplier(8), items(), dec!(2300));
    assert_eq!(rival, Err(WorkflowError::InvalidActor));
}

#[test]
fn suppliers_cannot_open_orders() {
    let engine = Engine::new(EngineConfig::default());

    let result = engine.create_order(&supplier(), OrderId(1), None, items());

    assert_eq!(result, Err(WorkflowError::InvalidActor));
}

#[test]
fn duplicate_order_ids_are_rejected() {
    let engine = engine_with_order();

    let result = engine.create_order(&technician(), OrderId(1), None, items());

    assert_eq!(result, Err(WorkflowError::AlreadyExists));
}

#[test]
fn courier_fulfilment_path() {
    let engine = confirmed_order();

    engine.mark_packed(OrderId(1), &supplier()).unwrap();
    let order = engine
        .submit_delivery_details(OrderId(1), &supplier(), DeliveryDetails::courier("BlueDart", "BD123"))
        .unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.delivery.as_ref().unwrap().delivery_type, DeliveryType::Courier);

    let order = engine.mark_delivered(OrderId(1), &supplier()).unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert!(order.delivered_at.is_some());
}

#[test]
fn local_delivery_goes_out_for_delivery() {
    let engine = confirmed_order();
    engine.mark_packed(OrderId(1), &supplier()).unwrap();

    let order = engine
        .submit_delivery_details(OrderId(1), &supplier(), DeliveryDetails::local("Ravi", "+91-98450-00000"))
        .unwrap();

    assert_eq!(order.status, OrderStatus::OutForDelivery);
}

#[test]
fn incomplete_courier_details_are_rejected() {
    let engine = confirmed_order();
    engine.mark_packed(OrderId(1), &supplier()).unwrap();

    let mut details = DeliveryDetails::courier("BlueDart", "");
    details.tracking_number = None;
    let result = engine.submit_delivery_details(OrderId(1), &supplier(), details);

    assert_eq!(result, Err(WorkflowError::InvalidDeliveryDetails));
    assert_eq!(engine.order(OrderId(1)).unwrap().status, OrderStatus::Packed);
}

#[test]
fn requester_cannot_pack() {
    let engine = confirmed_order();

    let result = engine.mark_packed(OrderId(1), &technician());

    assert_eq!(result, Err(WorkflowError::InvalidActor));
}

#[test]
fn supplier_declines_confirmed_order() {
    let engine = confirmed_order();

    let order = engine.decline_order(OrderId(1), &supplier()).unwrap();

    assert_eq!(order.status, OrderStatus::Rejected);
    assert_eq!(
        engine.mark_packed(OrderId(1), &supplier()),
        Err(WorkflowError::InvalidState)
    );
}

#[test]
fn declining_a_paid_order_refunds_the_requester() {
    let engine = confirmed_order();
    engine.top_up(&technician(), dec!(3000)).unwrap();
    engine
        .settle(PayableRef::Order(OrderId(1)), &technician(), dec!(2400), Instrument::Wallet)
        .unwrap();
    assert_eq!(engine.balance(PartyId(SUPPLIER)), dec!(2400));

    let order = engine.decline_order(OrderId(1), &supplier()).unwrap();

    assert_eq!(order.status, OrderStatus::Rejected);
    assert_eq!(order.payment.status, PaymentStatus::Refunded);
    assert_eq!(engine.balance(PartyId(TECHNICIAN)), dec!(3000));
    assert_eq!(engine.balance(PartyId(SUPPLIER)), dec!(0));
    assert_eq!(
        engine.cancel_order(OrderId(1), &technician()),
        Err(WorkflowError::InvalidState)
    );
}

#[test]
fn requester_rejects_quotation() {
    let engine = engine_with_order();
    engine
        .send_quotation(OrderId(1), &supplier(), items(), dec!(2400))
        .unwrap();

    let order = engine
        .respond_to_quotation(OrderId(1), &technician(), false)
        .unwrap();

    assert_eq!(order.status, OrderStatus::Rejected);
}

#[test]
fn packed_orders_cannot_be_cancelled() {
    let engine = confirmed_order();
    engine.mark_packed(OrderId(1), &supplier()).unwrap();

    let result = engine.cancel_order(OrderId(1), &technician());

    assert_eq!(result, Err(WorkflowError::InvalidState));
}

#[test]
fn parts_required_job_resumes_without_an_order() {
    let engine = Engine::new(EngineConfig::default());
    let customer = Actor::customer(CUSTOMER);
    engine
        .create_job(&customer, JobId(1), Some(PartyId(TECHNICIAN)), "KA-01-1234", JobOrigin::Marketplace)
        .unwrap();
    for action in [JobAction::Accept, JobAction::Arrive, JobAction::StartDiagnosis] {
        engine.advance(JobId(1), &technician(), action).unwrap();
    }
    engine
        .propose_document(JobId(1), &technician(), DocumentKind::Quote, items(), dec!(500))
        .unwrap();
    engine
        .respond_to_document(JobId(1), &customer, Decision::AcceptWithParts)
        .unwrap();

    let job = engine
        .advance(JobId(1), &technician(), JobAction::ResumeWork)
        .unwrap();

    assert_eq!(job.status, JobStatus::InProgress);
    assert!(job.orders.is_empty());
}

#[test]
fn parts_sourcing_for_a_job() {
    let engine = Engine::new(EngineConfig::default());
    let customer = Actor::customer(CUSTOMER);
    engine
        .create_job(&customer, JobId(1), Some(PartyId(TECHNICIAN)), "KA-01-1234", JobOrigin::Marketplace)
        .unwrap();
    for action in [JobAction::Accept, JobAction::Arrive, JobAction::StartDiagnosis] {
        engine.advance(JobId(1), &technician(), action).unwrap();
    }
    engine
        .propose_document(JobId(1), &technician(), DocumentKind::Quote, items(), dec!(500))
        .unwrap();
    let job = engine
        .respond_to_document(JobId(1), &customer, Decision::AcceptWithParts)
        .unwrap();
    assert_eq!(job.status, JobStatus::PartsRequired);
    assert!(job.parts_authorized);

    let order = engine
        .request_parts(JobId(1), &technician(), OrderId(10), Some(PartyId(SUPPLIER)), items())
        .unwrap();
    assert_eq!(order.job, Some(JobId(1)));
    assert_eq!(order.status, OrderStatus::Inquiry);

    let job = engine.job(JobId(1)).unwrap();
    assert_eq!(job.status, JobStatus::PartsOrdered);
    assert_eq!(job.orders, vec![OrderId(10)]);

    engine
        .send_quotation(OrderId(10), &supplier(), items(), dec!(2400))
        .unwrap();
    engine
        .respond_to_quotation(OrderId(10), &technician(), true)
        .unwrap();
    engine.mark_packed(OrderId(10), &supplier()).unwrap();
    engine
        .submit_delivery_details(OrderId(10), &supplier(), DeliveryDetails::local("Ravi", "+91-98450-00000"))
        .unwrap();
    engine.mark_delivered(OrderId(10), &supplier()).unwrap();

    // Delivery does not move the job; the technician resumes explicitly.
    assert_eq!(engine.job(JobId(1)).unwrap().status, JobStatus::PartsOrdered);
    let job = engine
        .advance(JobId(1), &technician(), JobAction::ResumeWork)
        .unwrap();
    assert_eq!(job.status, JobStatus::InProgress);
}

#[test]
fn request_parts_requires_authorization() {
    let engine = Engine::new(EngineConfig::default());
    let customer = Actor::customer(CUSTOMER);
    engine
        .create_job(&customer, JobId(1), Some(PartyId(TECHNICIAN)), "KA-01-1234", JobOrigin::SelfService)
        .unwrap();
    for action in [
        JobAction::Accept,
        JobAction::Arrive,
        JobAction::StartDiagnosis,
        JobAction::StartWork,
    ] {
        engine.advance(JobId(1), &technician(), action).unwrap();
    }

    let result = engine.request_parts(JobId(1), &technician(), OrderId(10), None, items());

    assert_eq!(result, Err(WorkflowError::InvalidState));
    assert_eq!(engine.order(OrderId(10)), Err(WorkflowError::NotFound));
}

#[test]
fn request_parts_with_taken_id_leaves_job_unchanged() {
    let engine = engine_with_order();
    let customer = Actor::customer(CUSTOMER);
    engine
        .create_job(&customer, JobId(1), Some(PartyId(TECHNICIAN)), "KA-01-1234", JobOrigin::Marketplace)
        .unwrap();
    for action in [JobAction::Accept, JobAction::Arrive, JobAction::StartDiagnosis] {
        engine.advance(JobId(1), &technician(), action).unwrap();
    }
    engine
        .propose_document(JobId(1), &technician(), DocumentKind::Quote, items(), dec!(500))
        .unwrap();
    engine
        .respond_to_document(JobId(1), &customer, Decision::AcceptWithParts)
        .unwrap();
    let before = engine.job(JobId(1)).unwrap();

    let result = engine.request_parts(JobId(1), &technician(), OrderId(1), None, items());

    assert_eq!(result, Err(WorkflowError::AlreadyExists));
    assert_eq!(engine.job(JobId(1)).unwrap(), before);
}

#[test]
fn cash_on_delivery_after_handover() {
    let engine = confirmed_order();
    engine.mark_packed(OrderId(1), &supplier()).unwrap();
    engine
        .submit_delivery_details(OrderId(1), &supplier(), DeliveryDetails::courier("BlueDart", "BD123"))
        .unwrap();
    engine.mark_delivered(OrderId(1), &supplier()).unwrap();

    let pending = engine
        .settle(PayableRef::Order(OrderId(1)), &technician(), dec!(2400), Instrument::Cash)
        .unwrap();
    assert_eq!(pending, SettlementResult::PendingCash);

    engine
        .confirm_cash(PayableRef::Order(OrderId(1)), &supplier())
        .unwrap();

    let order = engine.order(OrderId(1)).unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.payment.status, PaymentStatus::Paid);
    assert_eq!(engine.balance(PartyId(SUPPLIER)), dec!(2400));
}

#[test]
fn inquiry_is_not_payable() {
    let engine = engine_with_order();

    let result = engine.settle(PayableRef::Order(OrderId(1)), &technician(), dec!(2400), Instrument::Wallet);

    assert_eq!(result, Err(WorkflowError::InvalidState));
}
