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

//! Parts orders.
//!
//! An order is raised by a technician (linked to a job) or by a customer
//! (standalone) and fulfilled by a supplier:
//!
//! ```text
//! inquiry ─quote─► quoted ─accept─► confirmed ─pack─► packed ─courier─► shipped ──────────┐
//!    │               │ ▲  │             │                 └──local───► out_for_delivery ─┴─deliver─► delivered
//!    │               └─┘  └─reject─► rejected
//!    └──── decline (supplier) ► rejected, cancel (requester) ► cancelled, until packed
//! ```
//!
//! Delivering an order never moves the originating job; the technician
//! resumes the job explicitly once sourcing is sufficient.

use crate::WorkflowError;
use crate::base::{Actor, JobId, OrderId, PartyId, Role};
use crate::negotiation::{LineItem, items_total};
use crate::settlement::PaymentState;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Inquiry,
    Quoted,
    Confirmed,
    Packed,
    Shipped,
    OutForDelivery,
    Delivered,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Inquiry => "inquiry",
            OrderStatus::Quoted => "quoted",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Packed => "packed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    /// Price agreed and not yet withdrawn; the order may be paid.
    pub fn is_payable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed
                | OrderStatus::Packed
                | OrderStatus::Shipped
                | OrderStatus::OutForDelivery
                | OrderStatus::Delivered
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    SendQuotation,
    AcceptQuotation,
    RejectQuotation,
    MarkPacked,
    ShipByCourier,
    DispatchLocal,
    MarkDelivered,
    Decline,
    Cancel,
}

struct Transition {
    from: OrderStatus,
    action: OrderAction,
    role: Role,
    to: OrderStatus,
}

const fn t(from: OrderStatus, action: OrderAction, role: Role, to: OrderStatus) -> Transition {
    Transition {
        from,
        action,
        role,
        to,
    }
}

use OrderAction as A;
use OrderStatus as S;
use Role::{Customer as C, Supplier as P, Technician as T};

#[rustfmt::skip]
static TRANSITIONS: &[Transition] = &[
    t(S::Inquiry,        A::SendQuotation,   P, S::Quoted),
    t(S::Quoted,         A::SendQuotation,   P, S::Quoted),
    t(S::Quoted,         A::AcceptQuotation, C, S::Confirmed),
    t(S::Quoted,         A::AcceptQuotation, T, S::Confirmed),
    t(S::Quoted,         A::RejectQuotation, C, S::Rejected),
    t(S::Quoted,         A::RejectQuotation, T, S::Rejected),
    t(S::Confirmed,      A::MarkPacked,      P, S::Packed),
    t(S::Packed,         A::ShipByCourier,   P, S::Shipped),
    t(S::Packed,         A::DispatchLocal,   P, S::OutForDelivery),
    t(S::Shipped,        A::MarkDelivered,   P, S::Delivered),
    t(S::OutForDelivery, A::MarkDelivered,   P, S::Delivered),
    t(S::Inquiry,        A::Decline,         P, S::Rejected),
    t(S::Quoted,         A::Decline,         P, S::Rejected),
    t(S::Confirmed,      A::Decline,         P, S::Rejected),
    t(S::Inquiry,        A::Cancel,          C, S::Cancelled),
    t(S::Quoted,         A::Cancel,          C, S::Cancelled),
    t(S::Confirmed,      A::Cancel,          C, S::Cancelled),
    t(S::Inquiry,        A::Cancel,          T, S::Cancelled),
    t(S::Quoted,         A::Cancel,          T, S::Cancelled),
    t(S::Confirmed,      A::Cancel,          T, S::Cancelled),
];

pub fn next_status(
    from: OrderStatus,
    action: OrderAction,
    role: Role,
) -> Result<OrderStatus, WorkflowError> {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    /// Supplier's own rider.
    Local,
    Courier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    pub delivery_type: DeliveryType,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub expected_at: Option<DateTime<Utc>>,
}

impl DeliveryDetails {
    pub fn local(contact_name: impl Into<String>, contact_phone: impl Into<String>) -> Self {
        Self {
            delivery_type: DeliveryType::Local,
            carrier: None,
            tracking_number: None,
            contact_name: Some(contact_name.into()),
            contact_phone: Some(contact_phone.into()),
            expected_at: None,
        }
    }

    pub fn courier(carrier: impl Into<String>, tracking_number: impl Into<String>) -> Self {
        Self {
            delivery_type: DeliveryType::Courier,
            carrier: Some(carrier.into()),
            tracking_number: Some(tracking_number.into()),
            contact_name: None,
            contact_phone: None,
            expected_at: None,
        }
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        let complete = match self.delivery_type {
            DeliveryType::Courier => present(&self.carrier) && present(&self.tracking_number),
            DeliveryType::Local => present(&self.contact_name) || present(&self.contact_phone),
        };
        if complete {
            Ok(())
        } else {
            Err(WorkflowError::InvalidDeliveryDetails)
        }
    }
}

/// A wholesale or retail order for parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartsOrder {
    pub id: OrderId,
    pub requester: PartyId,
    pub requester_role: Role,
    /// `None` means broadcast; the first supplier to quote claims the order.
    pub supplier: Option<PartyId>,
    pub job: Option<JobId>,
    pub items: Vec<LineItem>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub delivery: Option<DeliveryDetails>,
    pub payment: PaymentState,
    pub created_at: DateTime<Utc>,
    pub quoted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl PartsOrder {
    /// Opens an inquiry for `items`. Prices on an inquiry are indicative only.
    pub fn inquiry(
        id: OrderId,
        requester: &Actor,
        supplier: Option<PartyId>,
        job: Option<JobId>,
        items: Vec<LineItem>,
    ) -> Result<Self, WorkflowError> {
        if requester.role == Role::Supplier {
            return Err(WorkflowError::InvalidActor);
        }
        if items.is_empty() {
            return Err(WorkflowError::InvalidLineItem);
        }
        let items = items
            .into_iter()
            .map(LineItem::normalize)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id,
            requester: requester.id,
            requester_role: requester.role,
            supplier,
            job,
            total_amount: items_total(&items),
            items,
            status: OrderStatus::Inquiry,
            delivery: None,
            payment: PaymentState::default(),
            created_at: Utc::now(),
            quoted_at: None,
            confirmed_at: None,
            delivered_at: None,
            cancelled_at: None,
            version: 0,
        })
    }

    pub(crate) fn authorize(&self, actor: &Actor, action: OrderAction) -> Result<(), WorkflowError> {
        let permitted = match actor.role {
            Role::Supplier => match self.supplier {
                Some(supplier) => actor.id == supplier,
                None => action == OrderAction::SendQuotation,
            },
            role => role == self.requester_role && actor.id == self.requester,
        };
        if permitted {
            Ok(())
        } else {
            Err(WorkflowError::InvalidActor)
        }
    }

    pub fn apply(&mut self, actor: &Actor, action: OrderAction) -> Result<OrderStatus, WorkflowError> {
        let next = next_status(self.status, action, actor.role)?;
        self.authorize(actor, action)?;

        let now = Utc::now();
        match next {
            OrderStatus::Quoted => {
                self.supplier = Some(actor.id);
                self.quoted_at = Some(now);
            }
            OrderStatus::Confirmed => self.confirmed_at = Some(now),
            OrderStatus::Delivered => self.delivered_at = Some(now),
            OrderStatus::Cancelled | OrderStatus::Rejected => self.cancelled_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(next)
    }

    /// Supplier prices the order.
    ///
    /// `total_amount` must agree with the line totals within `tolerance`; the
    /// stored total is the exact line sum.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::AmountMismatch`] - `total_amount` disagrees with the items.
    /// - [`WorkflowError::InvalidLineItem`] - Empty item list or a malformed item.
    pub fn send_quotation(
        &mut self,
        actor: &Actor,
        items: Vec<LineItem>,
        total_amount: Decimal,
        tolerance: Decimal,
    ) -> Result<OrderStatus, WorkflowError> {
        next_status(self.status, OrderAction::SendQuotation, actor.role)?;
        self.authorize(actor, OrderAction::SendQuotation)?;

        if items.is_empty() {
            return Err(WorkflowError::InvalidLineItem);
        }
        let items = items
            .into_iter()
            .map(LineItem::normalize)
            .collect::<Result<Vec<_>, _>>()?;
        let sum = items_total(&items);
        if (sum - total_amount).abs() > tolerance {
            return Err(WorkflowError::AmountMismatch);
        }
        if sum <= Decimal::ZERO {
            return Err(WorkflowError::InvalidAmount);
        }

        let status = self.apply(actor, OrderAction::SendQuotation)?;
        self.items = items;
        self.total_amount = sum;
        Ok(status)
    }

    /// Supplier records how the parts travel, which dispatches the order.
    pub fn submit_delivery_details(
        &mut self,
        actor: &Actor,
        details: DeliveryDetails,
    ) -> Result<OrderStatus, WorkflowError> {
        let action = match details.delivery_type {
            DeliveryType::Courier => OrderAction::ShipByCourier,
            DeliveryType::Local => OrderAction::DispatchLocal,
        };
        next_status(self.status, action, actor.role)?;
        self.authorize(actor, action)?;
        details.validate()?;

        let status = self.apply(actor, action)?;
        self.delivery = Some(details);
        Ok(status)
    }
}
