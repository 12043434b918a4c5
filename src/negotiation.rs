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

//! Quote and bill negotiation.
//!
//! The technician proposes a [`Document`] of priced line items plus labor; the
//! customer answers with a [`Decision`]. A quote gates the start of work, a bill
//! gates settlement. Both share the same contract:
//!
//! - `approve` freezes the document and advances the job.
//! - `reject` clears the document and returns the job to where the proposal
//!   was made, so the technician can re-propose.
//! - `accept_with_parts` (quotes only) also authorizes parts sourcing.
//! - `accept_own_parts` (quotes only) approves labor and excludes part items
//!   from the payable amount.
//!
//! Repeating the decision that already froze a document is a no-op.

use crate::WorkflowError;
use crate::base::{Actor, CURRENCY_PRECISION, Role};
use crate::job::{Job, JobAction, JobStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Part,
    #[default]
    Service,
}

/// A priced line on a quote, bill or parts quotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default)]
    pub category: ItemCategory,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Always `quantity * unit_price`; recomputed on validation.
    #[serde(default)]
    pub total: Decimal,
}

impl LineItem {
    pub fn new(name: impl Into<String>, category: ItemCategory, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            name: name.into(),
            category,
            quantity,
            unit_price,
            total: unit_price * Decimal::from(quantity),
        }
    }

    pub fn part(name: impl Into<String>, quantity: u32, unit_price: Decimal) -> Self {
        Self::new(name, ItemCategory::Part, quantity, unit_price)
    }

    pub fn service(name: impl Into<String>, quantity: u32, unit_price: Decimal) -> Self {
        Self::new(name, ItemCategory::Service, quantity, unit_price)
    }

    /// Rejects empty names, zero quantities and negative prices, then fixes `total`.
    pub(crate) fn normalize(mut self) -> Result<Self, WorkflowError> {
        if self.name.trim().is_empty()
            || self.quantity == 0
            || self.unit_price < Decimal::ZERO
            || self.unit_price.round_dp(CURRENCY_PRECISION) != self.unit_price
        {
            return Err(WorkflowError::InvalidLineItem);
        }
        self.total = self.unit_price * Decimal::from(self.quantity);
        Ok(self)
    }
}

/// Sums the line totals.
pub fn items_total(items: &[LineItem]) -> Decimal {
    items.iter().map(|item| item.total).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Quote,
    Bill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    AcceptWithParts,
    AcceptOwnParts,
}

impl Decision {
    fn is_acceptance(&self) -> bool {
        !matches!(self, Decision::Reject)
    }
}

/// A proposed quote or bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub kind: DocumentKind,
    pub items: Vec<LineItem>,
    pub labor_amount: Decimal,
    /// `Σ item totals + labor_amount`.
    pub total_amount: Decimal,
    /// What the customer owes; excludes part items when they supply their own.
    pub payable_amount: Decimal,
    pub proposed_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    /// `Some` once accepted; a rejected document is removed instead.
    pub decision: Option<Decision>,
}

impl Document {
    fn new(kind: DocumentKind, items: Vec<LineItem>, labor_amount: Decimal, own_parts: bool) -> Self {
        let total_amount = items_total(&items) + labor_amount;
        let mut document = Self {
            kind,
            items,
            labor_amount,
            total_amount,
            payable_amount: total_amount,
            proposed_at: Utc::now(),
            responded_at: None,
            decision: None,
        };
        if own_parts {
            document.exclude_parts();
        }
        document
    }

    fn exclude_parts(&mut self) {
        let parts: Decimal = self
            .items
            .iter()
            .filter(|item| item.category == ItemCategory::Part)
            .map(|item| item.total)
            .sum();
        self.payable_amount = self.total_amount - parts;
    }

    pub fn is_approved(&self) -> bool {
        self.decision.is_some()
    }
}

/// Records a new quote or bill on `job`.
///
/// # Errors
///
/// - [`WorkflowError::InvalidActor`] - Caller is not the assigned technician.
/// - [`WorkflowError::InvalidState`] - Job cannot take this proposal now, e.g. a
///   quote is already awaiting an answer, or the quote was never approved.
/// - [`WorkflowError::InvalidLineItem`] / [`WorkflowError::InvalidAmount`] - Bad pricing.
pub fn propose(
    job: &mut Job,
    actor: &Actor,
    kind: DocumentKind,
    items: Vec<LineItem>,
    labor_amount: Decimal,
) -> Result<Document, WorkflowError> {
    let action = match kind {
        DocumentKind::Quote => JobAction::ProposeQuote,
        DocumentKind::Bill => JobAction::IssueBill,
    };
    // Validate the move before the payload so role errors win over pricing errors.
    crate::job::next_status(job.status, action, actor.role)?;
    job.authorize(actor, action)?;

    if kind == DocumentKind::Bill {
        // Work reached `in_progress` either through an approved quote or a skip.
        if job.quote.as_ref().is_some_and(|quote| !quote.is_approved()) {
            return Err(WorkflowError::InvalidState);
        }
    }

    let items = items
        .into_iter()
        .map(LineItem::normalize)
        .collect::<Result<Vec<_>, _>>()?;
    if labor_amount < Decimal::ZERO || labor_amount.round_dp(CURRENCY_PRECISION) != labor_amount {
        return Err(WorkflowError::InvalidAmount);
    }

    let document = Document::new(kind, items, labor_amount, job.own_parts);
    if document.payable_amount <= Decimal::ZERO && kind == DocumentKind::Bill {
        return Err(WorkflowError::InvalidAmount);
    }

    job.apply(actor, action)?;
    match kind {
        DocumentKind::Quote => job.quote = Some(document.clone()),
        DocumentKind::Bill => job.bill = Some(document.clone()),
    }
    Ok(document)
}

/// What [`respond`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Applied(JobStatus),
    /// The same acceptance had already been recorded.
    Unchanged,
}

/// Applies the customer's decision to a document.
///
/// `target` names the document being answered. Without it the decision goes
/// to the active document: the bill when one exists, otherwise the quote. A
/// client retrying an earlier answer should name the document, so a repeated
/// quote approval is not taken for an answer to a bill issued since.
///
/// # Errors
///
/// - [`WorkflowError::InvalidActor`] - Caller is not the job's customer.
/// - [`WorkflowError::InvalidState`] - Nothing awaits a decision, `target` is
///   not the document awaiting one, or the decision does not apply to a bill.
pub fn respond(
    job: &mut Job,
    actor: &Actor,
    target: Option<DocumentKind>,
    decision: Decision,
) -> Result<Response, WorkflowError> {
    let answered = match target {
        Some(DocumentKind::Quote) => job.quote.as_ref(),
        Some(DocumentKind::Bill) => job.bill.as_ref(),
        None => job.bill.as_ref().or(job.quote.as_ref()),
    };
    let already_decided = answered.is_some_and(|document| document.decision == Some(decision));
    if already_decided && decision.is_acceptance() {
        if actor.role != Role::Customer {
            return Err(WorkflowError::InvalidActor);
        }
        job.authorize(actor, JobAction::ApproveQuote)?;
        return Ok(Response::Unchanged);
    }

    let kind = match job.status {
        JobStatus::QuotePending => DocumentKind::Quote,
        JobStatus::BillingPending if job.bill.as_ref().is_some_and(|bill| !bill.is_approved()) => {
            DocumentKind::Bill
        }
        _ => return Err(WorkflowError::InvalidState),
    };
    if target.is_some_and(|target| target != kind) {
        return Err(WorkflowError::InvalidState);
    }

    let action = match (kind, decision) {
        (DocumentKind::Quote, Decision::Approve) => JobAction::ApproveQuote,
        (DocumentKind::Quote, Decision::AcceptWithParts) => JobAction::AcceptQuoteWithParts,
        (DocumentKind::Quote, Decision::AcceptOwnParts) => JobAction::AcceptQuoteOwnParts,
        (DocumentKind::Quote, Decision::Reject) => JobAction::RejectQuote,
        (DocumentKind::Bill, Decision::Approve) => JobAction::ApproveBill,
        (DocumentKind::Bill, Decision::Reject) => JobAction::RejectBill,
        (DocumentKind::Bill, _) => return Err(WorkflowError::InvalidState),
    };

    let status = job.apply(actor, action)?;
    let now = Utc::now();
    let slot = match kind {
        DocumentKind::Quote => &mut job.quote,
        DocumentKind::Bill => &mut job.bill,
    };

    if decision == Decision::Reject {
        *slot = None;
        return Ok(Response::Applied(status));
    }

    if let Some(document) = slot.as_mut() {
        document.decision = Some(decision);
        document.responded_at = Some(now);
        if decision == Decision::AcceptOwnParts {
            document.exclude_parts();
        }
    }
    match decision {
        Decision::AcceptWithParts => job.parts_authorized = true,
        Decision::AcceptOwnParts => job.own_parts = true,
        _ => {}
    }
    Ok(Response::Applied(status))
}
