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

//! Core identifier types for parties, jobs, orders and ledger entries.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a marketplace party (customer, technician, supplier
/// or the platform itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PartyId(pub u32);

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a service job.
///
/// Supplied by the caller on creation. Reusing an id is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Unique identifier for a parts order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order-{}", self.0)
    }
}

/// Ledger-issued identifier for a single entry. Monotonic per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three sides of the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Technician,
    Supplier,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Customer => "customer",
            Role::Technician => "technician",
            Role::Supplier => "supplier",
        };
        f.write_str(name)
    }
}

/// Identity and role of whoever issues a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Actor {
    pub id: PartyId,
    pub role: Role,
}

impl Actor {
    pub fn customer(id: u32) -> Self {
        Self {
            id: PartyId(id),
            role: Role::Customer,
        }
    }

    pub fn technician(id: u32) -> Self {
        Self {
            id: PartyId(id),
            role: Role::Technician,
        }
    }

    pub fn supplier(id: u32) -> Self {
        Self {
            id: PartyId(id),
            role: Role::Supplier,
        }
    }
}

/// Something that can be paid: a job's bill or a parts order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PayableRef {
    Job(JobId),
    Order(OrderId),
}

impl fmt::Display for PayableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayableRef::Job(id) => write!(f, "{id}"),
            PayableRef::Order(id) => write!(f, "{id}"),
        }
    }
}

/// Number of decimal places in the settlement currency's minor unit.
pub const CURRENCY_PRECISION: u32 = 2;

/// Converts a major-unit amount to minor units (e.g. rupees to paise).
///
/// Returns `None` for negative amounts or amounts finer than one minor unit.
pub fn to_minor_units(amount: Decimal) -> Option<u64> {
    if amount < Decimal::ZERO || amount.round_dp(CURRENCY_PRECISION) != amount {
        return None;
    }
    let scaled = amount * Decimal::from(10u64.pow(CURRENCY_PRECISION));
    scaled.trunc().to_u64()
}
