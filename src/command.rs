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

//! Serializable commands.
//!
//! Every inbound command of the engine as one tagged enum, so that a command
//! stream (e.g. the replay CLI's JSON lines) can be dispatched through
//! [`Engine::execute`]. Amounts are decimal strings, as elsewhere in the
//! crate's serde output.

use crate::base::{Actor, JobId, OrderId, PartyId, PayableRef};
use crate::engine::Engine;
use crate::job::{Job, JobAction, JobOrigin};
use crate::ledger::LedgerEntry;
use crate::negotiation::{Decision, DocumentKind, LineItem};
use crate::order::{DeliveryDetails, PartsOrder};
use crate::settlement::{Instrument, SettlementResult};
use crate::WorkflowError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    CreateJob {
        job: JobId,
        #[serde(default)]
        technician: Option<PartyId>,
        vehicle: String,
        origin: JobOrigin,
    },
    AssignTechnician {
        job: JobId,
        technician: PartyId,
    },
    Advance {
        job: JobId,
        action: JobAction,
    },
    ProposeDocument {
        job: JobId,
        kind: DocumentKind,
        #[serde(default)]
        items: Vec<LineItem>,
        labor_amount: Decimal,
    },
    RespondToDocument {
        job: JobId,
        /// Which document is answered; the active one when absent.
        #[serde(default)]
        document: Option<DocumentKind>,
        decision: Decision,
    },
    Attach {
        job: JobId,
        reference: String,
    },
    CancelJob {
        job: JobId,
        #[serde(default)]
        reason: Option<String>,
    },
    RequestParts {
        job: JobId,
        order: OrderId,
        #[serde(default)]
        supplier: Option<PartyId>,
        items: Vec<LineItem>,
    },
    CreateOrder {
        order: OrderId,
        #[serde(default)]
        supplier: Option<PartyId>,
        items: Vec<LineItem>,
    },
    SendQuotation {
        order: OrderId,
        items: Vec<LineItem>,
        total_amount: Decimal,
    },
    RespondToQuotation {
        order: OrderId,
        accept: bool,
    },
    DeclineOrder {
        order: OrderId,
    },
    MarkPacked {
        order: OrderId,
    },
    SubmitDeliveryDetails {
        order: OrderId,
        details: DeliveryDetails,
    },
    MarkDelivered {
        order: OrderId,
    },
    CancelOrder {
        order: OrderId,
    },
    Settle {
        payable: PayableRef,
        amount: Decimal,
        instrument: Instrument,
    },
    ConfirmCash {
        payable: PayableRef,
    },
    VerifyPayment {
        external_order_id: String,
        payment_id: String,
        signature: String,
    },
    TopUp {
        amount: Decimal,
    },
    Withdraw {
        amount: Decimal,
    },
}

impl Command {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateJob { .. } => "create_job",
            Command::AssignTechnician { .. } => "assign_technician",
            Command::Advance { .. } => "advance",
            Command::ProposeDocument { .. } => "propose_document",
            Command::RespondToDocument { .. } => "respond_to_document",
            Command::Attach { .. } => "attach",
            Command::CancelJob { .. } => "cancel_job",
            Command::RequestParts { .. } => "request_parts",
            Command::CreateOrder { .. } => "create_order",
            Command::SendQuotation { .. } => "send_quotation",
            Command::RespondToQuotation { .. } => "respond_to_quotation",
            Command::DeclineOrder { .. } => "decline_order",
            Command::MarkPacked { .. } => "mark_packed",
            Command::SubmitDeliveryDetails { .. } => "submit_delivery_details",
            Command::MarkDelivered { .. } => "mark_delivered",
            Command::CancelOrder { .. } => "cancel_order",
            Command::Settle { .. } => "settle",
            Command::ConfirmCash { .. } => "confirm_cash",
            Command::VerifyPayment { .. } => "verify_payment",
            Command::TopUp { .. } => "top_up",
            Command::Withdraw { .. } => "withdraw",
        }
    }
}

/// An actor and the command they issued; one line of a replay file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub actor: Actor,
    pub command: Command,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Job(Box<Job>),
    Order(Box<PartsOrder>),
    Settlement(SettlementResult),
    Entry(LedgerEntry),
}

impl Engine {
    /// Dispatches `command` on behalf of `actor`.
    pub fn execute(&self, actor: &Actor, command: Command) -> Result<Outcome, WorkflowError> {
        let job = |job: Job| Outcome::Job(Box::new(job));
        let order = |order: PartsOrder| Outcome::Order(Box::new(order));
        match command {
            Command::CreateJob {
                job: id,
                technician,
                vehicle,
                origin,
            } => self.create_job(actor, id, technician, vehicle, origin).map(job),
            Command::AssignTechnician { job: id, technician } => {
                self.assign_technician(id, actor, technician).map(job)
            }
            Command::Advance { job: id, action } => self.advance(id, actor, action).map(job),
            Command::ProposeDocument {
                job: id,
                kind,
                items,
                labor_amount,
            } => self
                .propose_document(id, actor, kind, items, labor_amount)
                .map(job),
            Command::RespondToDocument {
                job: id,
                document: Some(kind),
                decision,
            } => self.respond_to(id, actor, kind, decision).map(job),
            Command::RespondToDocument {
                job: id,
                document: None,
                decision,
            } => self.respond_to_document(id, actor, decision).map(job),
            Command::Attach { job: id, reference } => self.attach(id, actor, reference).map(job),
            Command::CancelJob { job: id, reason } => self.cancel_job(id, actor, reason).map(job),
            Command::RequestParts {
                job: id,
                order: order_id,
                supplier,
                items,
            } => self
                .request_parts(id, actor, order_id, supplier, items)
                .map(order),
            Command::CreateOrder {
                order: id,
                supplier,
                items,
            } => self.create_order(actor, id, supplier, items).map(order),
            Command::SendQuotation {
                order: id,
                items,
                total_amount,
            } => self.send_quotation(id, actor, items, total_amount).map(order),
            Command::RespondToQuotation { order: id, accept } => {
                self.respond_to_quotation(id, actor, accept).map(order)
            }
            Command::DeclineOrder { order: id } => self.decline_order(id, actor).map(order),
            Command::MarkPacked { order: id } => self.mark_packed(id, actor).map(order),
            Command::SubmitDeliveryDetails { order: id, details } => {
                self.submit_delivery_details(id, actor, details).map(order)
            }
            Command::MarkDelivered { order: id } => self.mark_delivered(id, actor).map(order),
            Command::CancelOrder { order: id } => self.cancel_order(id, actor).map(order),
            Command::Settle {
                payable,
                amount,
                instrument,
            } => self
                .settle(payable, actor, amount, instrument)
                .map(Outcome::Settlement),
            Command::ConfirmCash { payable } => {
                self.confirm_cash(payable, actor).map(Outcome::Settlement)
            }
            Command::VerifyPayment {
                external_order_id,
                payment_id,
                signature,
            } => self
                .verify_payment(actor, &external_order_id, &payment_id, &signature)
                .map(Outcome::Settlement),
            Command::TopUp { amount } => self.top_up(actor, amount).map(Outcome::Entry),
            Command::Withdraw { amount } => self.withdraw(actor, amount).map(Outcome::Entry),
        }
    }
}
