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

//! Workflow engine.
//!
//! The [`Engine`] owns every job, parts order and wallet, and is the only way
//! to change them. Each command runs as one unit of work against a single
//! entity:
//!
//! 1. lock the entity's record,
//! 2. apply the command to a working copy,
//! 3. commit the copy (bumping `version`) only if every step succeeded.
//!
//! A failed command therefore leaves the entity exactly as it was. Settlement
//! commands post to the ledger from inside step 2, so the ledger posting is
//! the last fallible step before commit.
//!
//! # Lock order
//!
//! job, then parts order, then wallet accounts. No command takes a job lock
//! while holding an order lock.

use crate::base::{Actor, JobId, OrderId, PartyId, PayableRef, Role};
use crate::config::EngineConfig;
use crate::gateway::{OfflineGateway, PaymentGateway};
use crate::job::{Job, JobAction, JobOrigin, JobStatus, next_status};
use crate::ledger::{LedgerEntry, LedgerStore, WalletAccount};
use crate::negotiation::{Decision, DocumentKind, LineItem, Response, propose, respond};
use crate::notify::{EntityType, LogNotifier, Notifier, TransitionEvent};
use crate::order::{DeliveryDetails, OrderAction, OrderStatus, PartsOrder};
use crate::settlement::{Instrument, SettlementCoordinator, SettlementResult};
use crate::WorkflowError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::hash::Hash;
use std::sync::Arc;

/// Something the engine stores and versions.
trait Entity: Clone + PartialEq {
    const TYPE: EntityType;

    fn entity_id(&self) -> u64;
    fn status_label(&self) -> &'static str;
    fn version_mut(&mut self) -> &mut u64;
}

impl Entity for Job {
    const TYPE: EntityType = EntityType::Job;

    fn entity_id(&self) -> u64 {
        self.id.0
    }

    fn status_label(&self) -> &'static str {
        self.status.as_str()
    }

    fn version_mut(&mut self) -> &mut u64 {
        &mut self.version
    }
}

impl Entity for PartsOrder {
    const TYPE: EntityType = EntityType::PartsOrder;

    fn entity_id(&self) -> u64 {
        self.id.0
    }

    fn status_label(&self) -> &'static str {
        self.status.as_str()
    }

    fn version_mut(&mut self) -> &mut u64 {
        &mut self.version
    }
}

/// A lockable row.
struct Record<T> {
    inner: Mutex<T>,
}

impl<T> Record<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(value),
        })
    }
}

type Table<K, T> = DashMap<K, Arc<Record<T>>>;

/// Job and parts-order workflow engine.
///
/// # Invariants
///
/// - Statuses only move along the transition tables in [`crate::job`] and
///   [`crate::order`].
/// - A committed change bumps the entity's `version` by exactly one.
/// - Every payable is settled by at most one ledger posting.
pub struct Engine {
    config: EngineConfig,
    jobs: Table<JobId, Job>,
    orders: Table<OrderId, PartsOrder>,
    ledger: Arc<LedgerStore>,
    settlement: SettlementCoordinator,
    notifier: Arc<dyn Notifier>,
}

impl Engine {
    /// Creates an engine with an offline gateway and a logging notifier.
    pub fn new(config: EngineConfig) -> Self {
        let ledger = Arc::new(LedgerStore::new());
        let settlement = SettlementCoordinator::new(
            Arc::clone(&ledger),
            Arc::new(OfflineGateway::new()),
            config.clone(),
        );
        Engine {
            config,
            jobs: DashMap::new(),
            orders: DashMap::new(),
            ledger,
            settlement,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Replaces the payment gateway. Call before any gateway settlement.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.settlement =
            SettlementCoordinator::new(Arc::clone(&self.ledger), gateway, self.config.clone());
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn settlement(&self) -> &SettlementCoordinator {
        &self.settlement
    }

    // ---- jobs ----

    /// Opens a job in `pending`.
    ///
    /// `technician` assigns the job directly; `None` broadcasts it and the
    /// first technician to accept claims it.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::InvalidActor`] - Only customers create jobs.
    /// - [`WorkflowError::AlreadyExists`] - `id` is taken.
    pub fn create_job(
        &self,
        actor: &Actor,
        id: JobId,
        technician: Option<PartyId>,
        vehicle: impl Into<String>,
        origin: JobOrigin,
    ) -> Result<Job, WorkflowError> {
        if actor.role != Role::Customer {
            return Err(WorkflowError::InvalidActor);
        }
        let job = Job::new(id, actor.id, technician, vehicle, origin);
        insert_new(&self.jobs, id, job.clone())?;
        tracing::info!(job_id = %id, customer = %actor.id, ?origin, "job created");
        self.emit(&job, actor.role);
        Ok(job)
    }

    /// Points a pending job at a technician, replacing any earlier choice.
    pub fn assign_technician(
        &self,
        job: JobId,
        actor: &Actor,
        technician: PartyId,
    ) -> Result<Job, WorkflowError> {
        self.transact_job(job, actor, |job| {
            if actor.role != Role::Customer || !job.is_party(actor) {
                return Err(WorkflowError::InvalidActor);
            }
            if job.status != JobStatus::Pending {
                return Err(WorkflowError::InvalidState);
            }
            job.technician = Some(technician);
            Ok(())
        })
        .map(|(job, _)| job)
    }

    /// Applies a plain status move: accept, decline, arrive, start
    /// diagnosis, start work, resume work or deliver vehicle.
    ///
    /// Moves that carry a payload have their own methods and are rejected
    /// here with [`WorkflowError::InvalidState`].
    pub fn advance(&self, job: JobId, actor: &Actor, action: JobAction) -> Result<Job, WorkflowError> {
        let plain = matches!(
            action,
            JobAction::Accept
                | JobAction::Decline
                | JobAction::Arrive
                | JobAction::StartDiagnosis
                | JobAction::StartWork
                | JobAction::ResumeWork
                | JobAction::DeliverVehicle
        );
        if !plain {
            return Err(WorkflowError::InvalidState);
        }

        let policy = self.config.quote_skip;
        self.transact_job(job, actor, |job| {
            if action == JobAction::StartWork && !policy.allows_skip(job.origin) {
                next_status(job.status, action, actor.role)?;
                job.authorize(actor, action)?;
                return Err(WorkflowError::InvalidState);
            }
            job.apply(actor, action)
        })
        .map(|(job, _)| job)
    }

    /// Technician issues a quote or a bill.
    pub fn propose_document(
        &self,
        job: JobId,
        actor: &Actor,
        kind: DocumentKind,
        items: Vec<LineItem>,
        labor_amount: Decimal,
    ) -> Result<Job, WorkflowError> {
        self.transact_job(job, actor, |job| {
            propose(job, actor, kind, items, labor_amount).map(|_| ())
        })
        .map(|(job, _)| job)
    }

    /// Customer answers the active quote or bill. Repeating an acceptance is
    /// a no-op.
    pub fn respond_to_document(
        &self,
        job: JobId,
        actor: &Actor,
        decision: Decision,
    ) -> Result<Job, WorkflowError> {
        self.answer(job, actor, None, decision)
    }

    /// Like [`Engine::respond_to_document`], but answers the named document
    /// only. A retried quote approval then stays a no-op after a bill is issued.
    pub fn respond_to(
        &self,
        job: JobId,
        actor: &Actor,
        document: DocumentKind,
        decision: Decision,
    ) -> Result<Job, WorkflowError> {
        self.answer(job, actor, Some(document), decision)
    }

    fn answer(
        &self,
        job: JobId,
        actor: &Actor,
        document: Option<DocumentKind>,
        decision: Decision,
    ) -> Result<Job, WorkflowError> {
        let (job, response) =
            self.transact_job(job, actor, |job| respond(job, actor, document, decision))?;
        if response == Response::Unchanged {
            tracing::debug!(job_id = %job.id, ?decision, "decision already recorded");
        }
        Ok(job)
    }

    /// Records a media reference (photo, invoice scan) on an open job.
    pub fn attach(&self, job: JobId, actor: &Actor, reference: impl Into<String>) -> Result<Job, WorkflowError> {
        let reference = reference.into();
        self.transact_job(job, actor, |job| {
            if job.status.is_terminal() {
                return Err(WorkflowError::InvalidState);
            }
            if !job.is_party(actor) {
                return Err(WorkflowError::InvalidActor);
            }
            job.attachments.push(reference);
            Ok(())
        })
        .map(|(job, _)| job)
    }

    /// Cancels a job. Technicians must give a reason.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::MissingReason`] - Technician cancelled without a reason.
    /// - [`WorkflowError::InvalidState`] - Too late for this role to cancel.
    pub fn cancel_job(
        &self,
        job: JobId,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Job, WorkflowError> {
        let reason = reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty());
        self.transact_job(job, actor, |job| {
            next_status(job.status, JobAction::Cancel, actor.role)?;
            job.authorize(actor, JobAction::Cancel)?;
            if actor.role == Role::Technician && reason.is_none() {
                return Err(WorkflowError::MissingReason);
            }
            job.apply(actor, JobAction::Cancel)?;
            job.cancellation_reason = reason;
            Ok(())
        })
        .map(|(job, _)| job)
    }

    // ---- parts orders ----

    /// Technician sources parts for a job, opening an inquiry and moving the
    /// job to `parts_ordered`.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::InvalidState`] - Parts were not authorized on this job.
    /// - [`WorkflowError::AlreadyExists`] - `order` is taken.
    pub fn request_parts(
        &self,
        job: JobId,
        actor: &Actor,
        order: OrderId,
        supplier: Option<PartyId>,
        items: Vec<LineItem>,
    ) -> Result<PartsOrder, WorkflowError> {
        let (_, order) = self.transact_job(job, actor, |job| {
            next_status(job.status, JobAction::OrderParts, actor.role)?;
            job.authorize(actor, JobAction::OrderParts)?;
            if job.own_parts {
                return Err(WorkflowError::InvalidState);
            }
            let inquiry = PartsOrder::inquiry(order, actor, supplier, Some(job.id), items)?;
            job.apply(actor, JobAction::OrderParts)?;
            job.orders.push(order);
            insert_new(&self.orders, order, inquiry.clone())?;
            Ok(inquiry)
        })?;
        tracing::info!(order_id = %order.id, job_id = %job, "parts requested for job");
        self.emit(&order, actor.role);
        Ok(order)
    }

    /// Opens a standalone parts inquiry.
    pub fn create_order(
        &self,
        actor: &Actor,
        id: OrderId,
        supplier: Option<PartyId>,
        items: Vec<LineItem>,
    ) -> Result<PartsOrder, WorkflowError> {
        let order = PartsOrder::inquiry(id, actor, supplier, None, items)?;
        insert_new(&self.orders, id, order.clone())?;
        tracing::info!(order_id = %id, requester = %actor.id, "parts inquiry created");
        self.emit(&order, actor.role);
        Ok(order)
    }

    pub fn send_quotation(
        &self,
        order: OrderId,
        actor: &Actor,
        items: Vec<LineItem>,
        total_amount: Decimal,
    ) -> Result<PartsOrder, WorkflowError> {
        let tolerance = self.config.amount_tolerance;
        self.transact_order(order, actor, |order| {
            order.send_quotation(actor, items, total_amount, tolerance)
        })
        .map(|(order, _)| order)
    }

    pub fn respond_to_quotation(
        &self,
        order: OrderId,
        actor: &Actor,
        accept: bool,
    ) -> Result<PartsOrder, WorkflowError> {
        let action = if accept {
            OrderAction::AcceptQuotation
        } else {
            OrderAction::RejectQuotation
        };
        self.order_action(order, actor, action)
    }

    pub fn decline_order(&self, order: OrderId, actor: &Actor) -> Result<PartsOrder, WorkflowError> {
        self.order_action(order, actor, OrderAction::Decline)
    }

    pub fn mark_packed(&self, order: OrderId, actor: &Actor) -> Result<PartsOrder, WorkflowError> {
        self.order_action(order, actor, OrderAction::MarkPacked)
    }

    pub fn submit_delivery_details(
        &self,
        order: OrderId,
        actor: &Actor,
        details: DeliveryDetails,
    ) -> Result<PartsOrder, WorkflowError> {
        self.transact_order(order, actor, |order| {
            order.submit_delivery_details(actor, details)
        })
        .map(|(order, _)| order)
    }

    /// Marks the parts handed over. The originating job, if any, stays where
    /// it is until the technician resumes work.
    pub fn mark_delivered(&self, order: OrderId, actor: &Actor) -> Result<PartsOrder, WorkflowError> {
        self.order_action(order, actor, OrderAction::MarkDelivered)
    }

    /// Cancels a pre-packed order, refunding a wallet or gateway payment.
    pub fn cancel_order(&self, order: OrderId, actor: &Actor) -> Result<PartsOrder, WorkflowError> {
        self.order_action(order, actor, OrderAction::Cancel)
    }

    /// Applies `action`; an order that ends rejected or cancelled gives back
    /// whatever was settled on it within the same commit.
    fn order_action(
        &self,
        order: OrderId,
        actor: &Actor,
        action: OrderAction,
    ) -> Result<PartsOrder, WorkflowError> {
        let settlement = &self.settlement;
        self.transact_order(order, actor, |order| {
            let status = order.apply(actor, action)?;
            if matches!(status, OrderStatus::Rejected | OrderStatus::Cancelled) {
                settlement.refund(order)?;
            }
            Ok(())
        })
        .map(|(order, _)| order)
    }

    // ---- settlement ----

    /// Settles a job's approved bill or a confirmed parts order.
    ///
    /// # Errors
    ///
    /// See [`SettlementCoordinator::settle`]; additionally
    /// [`WorkflowError::NotFound`] for an unknown payable.
    pub fn settle(
        &self,
        payable: PayableRef,
        actor: &Actor,
        amount: Decimal,
        instrument: Instrument,
    ) -> Result<SettlementResult, WorkflowError> {
        let settlement = &self.settlement;
        match payable {
            PayableRef::Job(id) => self
                .transact_job(id, actor, |job| settlement.settle(job, actor, amount, instrument))
                .map(|(_, result)| result),
            PayableRef::Order(id) => self
                .transact_order(id, actor, |order| {
                    settlement.settle(order, actor, amount, instrument)
                })
                .map(|(_, result)| result),
        }
    }

    /// Receiving party confirms a cash payment.
    pub fn confirm_cash(&self, payable: PayableRef, actor: &Actor) -> Result<SettlementResult, WorkflowError> {
        let settlement = &self.settlement;
        match payable {
            PayableRef::Job(id) => self
                .transact_job(id, actor, |job| settlement.confirm_cash(job, actor))
                .map(|(_, result)| result),
            PayableRef::Order(id) => self
                .transact_order(id, actor, |order| settlement.confirm_cash(order, actor))
                .map(|(_, result)| result),
        }
    }

    /// Completes a gateway payment from the gateway's signed callback.
    pub fn verify_payment(
        &self,
        actor: &Actor,
        external_order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<SettlementResult, WorkflowError> {
        let settlement = &self.settlement;
        match settlement.gateway_payable(external_order_id)? {
            PayableRef::Job(id) => self
                .transact_job(id, actor, |job| {
                    settlement.verify_payment(job, actor, external_order_id, payment_id, signature)
                })
                .map(|(_, result)| result),
            PayableRef::Order(id) => self
                .transact_order(id, actor, |order| {
                    settlement.verify_payment(order, actor, external_order_id, payment_id, signature)
                })
                .map(|(_, result)| result),
        }
    }

    // ---- wallets ----

    pub fn top_up(&self, actor: &Actor, amount: Decimal) -> Result<LedgerEntry, WorkflowError> {
        let entry = self.ledger.top_up(actor.id, amount)?;
        tracing::info!(party = %actor.id, %amount, "wallet topped up");
        Ok(entry)
    }

    pub fn withdraw(&self, actor: &Actor, amount: Decimal) -> Result<LedgerEntry, WorkflowError> {
        let entry = self.ledger.withdraw(actor.id, amount)?;
        tracing::info!(party = %actor.id, %amount, "wallet withdrawal");
        Ok(entry)
    }

    pub fn balance(&self, party: PartyId) -> Decimal {
        self.ledger.balance(party)
    }

    /// All wallets, ordered by party.
    pub fn wallets(&self) -> Vec<Arc<WalletAccount>> {
        self.ledger.accounts()
    }

    // ---- queries ----

    pub fn job(&self, id: JobId) -> Result<Job, WorkflowError> {
        let record = record(&self.jobs, id)?;
        let job = record.inner.lock().clone();
        Ok(job)
    }

    pub fn order(&self, id: OrderId) -> Result<PartsOrder, WorkflowError> {
        let record = record(&self.orders, id)?;
        let order = record.inner.lock().clone();
        Ok(order)
    }

    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .map(|record| record.inner.lock().clone())
            .collect();
        jobs.sort_by_key(|job| job.id.0);
        jobs
    }

    // ---- unit of work ----

    fn transact_job<R>(
        &self,
        id: JobId,
        actor: &Actor,
        work: impl FnOnce(&mut Job) -> Result<R, WorkflowError>,
    ) -> Result<(Job, R), WorkflowError> {
        let record = record(&self.jobs, id)?;
        self.transact(&record, actor, work)
    }

    fn transact_order<R>(
        &self,
        id: OrderId,
        actor: &Actor,
        work: impl FnOnce(&mut PartsOrder) -> Result<R, WorkflowError>,
    ) -> Result<(PartsOrder, R), WorkflowError> {
        let record = record(&self.orders, id)?;
        self.transact(&record, actor, work)
    }

    fn transact<T: Entity, R>(
        &self,
        record: &Record<T>,
        actor: &Actor,
        work: impl FnOnce(&mut T) -> Result<R, WorkflowError>,
    ) -> Result<(T, R), WorkflowError> {
        let entity = T::TYPE;
        let mut current = record.inner.lock();
        let mut working = current.clone();
        let output = match work(&mut working) {
            Ok(output) => output,
            Err(error) => {
                tracing::debug!(
                    entity = %entity,
                    id = current.entity_id(),
                    status = current.status_label(),
                    actor = %actor.role,
                    %error,
                    "command rejected"
                );
                return Err(error);
            }
        };

        if working == *current {
            return Ok((working, output));
        }
        let previous = current.status_label();
        *working.version_mut() += 1;
        *current = working.clone();
        drop(current);

        tracing::info!(
            entity = %entity,
            id = working.entity_id(),
            from = previous,
            to = working.status_label(),
            actor = %actor.role,
            "committed"
        );
        if previous != working.status_label() {
            self.emit(&working, actor.role);
        }
        Ok((working, output))
    }

    fn emit<T: Entity>(&self, entity: &T, actor_role: Role) {
        let event = TransitionEvent {
            entity_type: T::TYPE,
            entity_id: entity.entity_id(),
            new_status: entity.status_label().to_string(),
            actor_role,
        };
        if let Err(error) = self.notifier.notify(&event) {
            tracing::warn!(entity = %event.entity_type, id = event.entity_id, %error, "notification dropped");
        }
    }
}

fn record<K: Eq + Hash, T>(table: &Table<K, T>, id: K) -> Result<Arc<Record<T>>, WorkflowError> {
    table
        .get(&id)
        .map(|record| Arc::clone(record.value()))
        .ok_or(WorkflowError::NotFound)
}

fn insert_new<K: Eq + Hash, T>(table: &Table<K, T>, id: K, value: T) -> Result<(), WorkflowError> {
    match table.entry(id) {
        Entry::Occupied(_) => Err(WorkflowError::AlreadyExists),
        Entry::Vacant(slot) => {
            slot.insert(Record::new(value));
            Ok(())
        }
    }
}
