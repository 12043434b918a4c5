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

//! Service job entity and its lifecycle.
//!
//! A job's status only moves through [`Job::apply`], which looks the move up
//! in a closed transition table keyed by `(status, action, role)`:
//!
//! ```text
//!  pending ─accept─► accepted ─arrive─► arrived ─diagnose─► diagnosing
//!     │                                                      │   │
//!   decline                                     propose quote│   │start work (policy)
//!     ▼                                                      ▼   │
//!  rejected        diagnosing ◄──reject── quote_pending ──approve┴──► in_progress
//!                                              │                        ▲   │
//!                                  accept w/ parts                resume│   │issue bill
//!                                              ▼                        │   ▼
//!                               parts_required ─order─► parts_ordered ──┘ billing_pending
//!                                                                            │ deliver (bill approved)
//!                       completed ◄─confirm cash─ payment_pending_cash ◄─cash┤
//!                           ▲                                                ▼
//!                           └───────────────wallet/gateway──────── vehicle_delivered
//! ```
//!
//! `parts_required` may also resume work directly when no order turns out to
//! be needed. Any pre-billing status may additionally move to `cancelled` (see
//! [`JobAction::Cancel`]).

use crate::WorkflowError;
use crate::base::{Actor, JobId, OrderId, PartyId, Role};
use crate::negotiation::Document;
use crate::settlement::PaymentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Accepted,
    Arrived,
    Diagnosing,
    QuotePending,
    PartsRequired,
    PartsOrdered,
    InProgress,
    BillingPending,
    VehicleDelivered,
    PaymentPendingCash,
    Completed,
    Cancelled,
    Rejected,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Accepted => "accepted",
            JobStatus::Arrived => "arrived",
            JobStatus::Diagnosing => "diagnosing",
            JobStatus::QuotePending => "quote_pending",
            JobStatus::PartsRequired => "parts_required",
            JobStatus::PartsOrdered => "parts_ordered",
            JobStatus::InProgress => "in_progress",
            JobStatus::BillingPending => "billing_pending",
            JobStatus::VehicleDelivered => "vehicle_delivered",
            JobStatus::PaymentPendingCash => "payment_pending_cash",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Rejected => "rejected",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Rejected
        )
    }

    pub const ALL: [JobStatus; 14] = [
        JobStatus::Pending,
        JobStatus::Accepted,
        JobStatus::Arrived,
        JobStatus::Diagnosing,
        JobStatus::QuotePending,
        JobStatus::PartsRequired,
        JobStatus::PartsOrdered,
        JobStatus::InProgress,
        JobStatus::BillingPending,
        JobStatus::VehicleDelivered,
        JobStatus::PaymentPendingCash,
        JobStatus::Completed,
        JobStatus::Cancelled,
        JobStatus::Rejected,
    ];
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named moves of the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Accept,
    Decline,
    Arrive,
    StartDiagnosis,
    ProposeQuote,
    ApproveQuote,
    AcceptQuoteWithParts,
    AcceptQuoteOwnParts,
    RejectQuote,
    OrderParts,
    ResumeWork,
    /// Begin work without a quote. Also gated by the quote-skip policy.
    StartWork,
    IssueBill,
    ApproveBill,
    RejectBill,
    DeliverVehicle,
    /// Wallet or gateway payment cleared.
    MarkPaid,
    PayByCash,
    ConfirmCash,
    Cancel,
}

/// How the job entered the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    /// Customer booked a garage directly and may forgo a quote.
    SelfService,
    /// Negotiated job; a quote must be approved before work starts.
    Marketplace,
}

struct Transition {
    from: JobStatus,
    action: JobAction,
    role: Role,
    to: JobStatus,
}

const fn t(from: JobStatus, action: JobAction, role: Role, to: JobStatus) -> Transition {
    Transition {
        from,
        action,
        role,
        to,
    }
}

use JobAction as A;
use JobStatus as S;
use Role::{Customer as C, Technician as T};

#[rustfmt::skip]
static TRANSITIONS: &[Transition] = &[
    t(S::Pending,            A::Accept,               T, S::Accepted),
    t(S::Pending,            A::Decline,              T, S::Rejected),
    t(S::Accepted,           A::Arrive,               T, S::Arrived),
    t(S::Arrived,            A::StartDiagnosis,       T, S::Diagnosing),
    t(S::Diagnosing,         A::ProposeQuote,         T, S::QuotePending),
    t(S::Diagnosing,         A::StartWork,            T, S::InProgress),
    t(S::QuotePending,       A::ApproveQuote,         C, S::InProgress),
    t(S::QuotePending,       A::AcceptQuoteWithParts, C, S::PartsRequired),
    t(S::QuotePending,       A::AcceptQuoteOwnParts,  C, S::InProgress),
    t(S::QuotePending,       A::RejectQuote,          C, S::Diagnosing),
    t(S::PartsRequired,      A::OrderParts,           T, S::PartsOrdered),
    t(S::PartsRequired,      A::ResumeWork,           T, S::InProgress),
    t(S::PartsOrdered,       A::OrderParts,           T, S::PartsOrdered),
    t(S::PartsOrdered,       A::ResumeWork,           T, S::InProgress),
    t(S::InProgress,         A::IssueBill,            T, S::BillingPending),
    t(S::BillingPending,     A::ApproveBill,          C, S::BillingPending),
    t(S::BillingPending,     A::RejectBill,           C, S::InProgress),
    t(S::BillingPending,     A::DeliverVehicle,       T, S::VehicleDelivered),
    t(S::BillingPending,     A::MarkPaid,             C, S::Completed),
    t(S::VehicleDelivered,   A::MarkPaid,             C, S::Completed),
    t(S::BillingPending,     A::PayByCash,            C, S::PaymentPendingCash),
    t(S::VehicleDelivered,   A::PayByCash,            C, S::PaymentPendingCash),
    t(S::PaymentPendingCash, A::ConfirmCash,          T, S::Completed),
    // Customer may walk away until diagnosis commits the technician.
    t(S::Pending,            A::Cancel,               C, S::Cancelled),
    t(S::Accepted,           A::Cancel,               C, S::Cancelled),
    t(S::Arrived,            A::Cancel,               C, S::Cancelled),
    // Technician may cancel anywhere before billing, with a reason.
    t(S::Pending,            A::Cancel,               T, S::Cancelled),
    t(S::Accepted,           A::Cancel,               T, S::Cancelled),
    t(S::Arrived,            A::Cancel,               T, S::Cancelled),
    t(S::Diagnosing,         A::Cancel,               T, S::Cancelled),
    t(S::QuotePending,       A::Cancel,               T, S::Cancelled),
    t(S::PartsRequired,      A::Cancel,               T, S::Cancelled),
    t(S::PartsOrdered,       A::Cancel,               T, S::Cancelled),
    t(S::InProgress,         A::Cancel,               T, S::Cancelled),
];

/// Looks up the status reached by `action` from `from` when performed by `role`.
///
/// # Errors
///
/// - [`WorkflowError::InvalidState`] - No row exists for `(from, action)`.
/// - [`WorkflowError::InvalidActor`] - Rows exist for `(from, action)` but none for `role`.
pub fn next_status(from: JobStatus, action: JobAction, role: Role) -> Result<JobStatus, WorkflowError> {
    let mut legal_for_someone = false;
    for row in TRANSITIONS.iter().filter(|row| row.from == from && row.action == action) {
        if row.role == role {
            return Ok(row.to);
        }
        legal_for_someone = true;
    }
    if legal_for_someone {
        Err(WorkflowError::InvalidActor)
    } else {
        Err(WorkflowError::InvalidState)
    }
}

/// A vehicle service request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub customer: PartyId,
    /// `None` until a technician is assigned or claims a broadcast job.
    pub technician: Option<PartyId>,
    pub vehicle: String,
    pub origin: JobOrigin,
    pub status: JobStatus,
    pub quote: Option<Document>,
    pub bill: Option<Document>,
    pub payment: PaymentState,
    /// Customer authorized parts sourcing when accepting the quote.
    pub parts_authorized: bool,
    /// Customer supplies parts; part items are excluded from payable totals.
    pub own_parts: bool,
    pub orders: Vec<OrderId>,
    /// Opaque media references.
    pub attachments: Vec<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Role>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Bumped on every committed change.
    pub version: u64,
}

impl Job {
    pub fn new(
        id: JobId,
        customer: PartyId,
        technician: Option<PartyId>,
        vehicle: impl Into<String>,
        origin: JobOrigin,
    ) -> Self {
        Self {
            id,
            customer,
            technician,
            vehicle: vehicle.into(),
            origin,
            status: JobStatus::Pending,
            quote: None,
            bill: None,
            payment: PaymentState::default(),
            parts_authorized: false,
            own_parts: false,
            orders: Vec::new(),
            attachments: Vec::new(),
            cancellation_reason: None,
            cancelled_by: None,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
        }
    }

    /// Checks that `actor` is the party this job knows in that role.
    ///
    /// An unassigned job accepts any technician, but only for [`JobAction::Accept`].
    pub(crate) fn authorize(&self, actor: &Actor, action: JobAction) -> Result<(), WorkflowError> {
        let claiming = actor.role == Role::Technician
            && self.technician.is_none()
            && action == JobAction::Accept;
        if claiming || self.is_party(actor) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidActor)
        }
    }

    /// Whether `actor` is this job's customer or its assigned technician.
    pub(crate) fn is_party(&self, actor: &Actor) -> bool {
        match actor.role {
            Role::Customer => actor.id == self.customer,
            Role::Technician => self.technician == Some(actor.id),
            Role::Supplier => false,
        }
    }

    /// Applies a status move after checking the table and the actor's identity.
    ///
    /// Only the status, timestamps and assignment change here; document and
    /// payment fields are handled by the negotiation and settlement modules.
    pub fn apply(&mut self, actor: &Actor, action: JobAction) -> Result<JobStatus, WorkflowError> {
        let next = next_status(self.status, action, actor.role)?;
        self.authorize(actor, action)?;
        // The vehicle leaves only once the customer has agreed what they owe.
        if action == JobAction::DeliverVehicle && !self.bill.as_ref().is_some_and(Document::is_approved) {
            return Err(WorkflowError::InvalidState);
        }

        let now = Utc::now();
        match action {
            JobAction::Accept => {
                self.technician = Some(actor.id);
                self.accepted_at = Some(now);
            }
            JobAction::Cancel => {
                self.cancelled_by = Some(actor.role);
                self.cancelled_at = Some(now);
            }
            _ => {}
        }
        if next == JobStatus::Completed {
            self.completed_at = Some(now);
        }

        self.status = next;
        Ok(next)
    }
}
