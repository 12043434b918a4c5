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

//! Error types for workflow commands.

use thiserror::Error;

/// Typed failures returned by every workflow command.
///
/// A command that fails leaves the targeted job, order and wallets exactly as
/// they were before the command ran.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The caller's role or identity may not perform this action
    #[error("actor is not permitted to perform this action")]
    InvalidActor,

    /// The action is not legal from the entity's current status
    #[error("action not allowed in current status")]
    InvalidState,

    /// A quoted or settled total disagrees with its line items
    #[error("amount does not match line items")]
    AmountMismatch,

    /// Wallet debit exceeds the available balance
    #[error("insufficient wallet balance")]
    InsufficientFunds,

    /// Gateway signature mismatch, unknown order, or replayed payment
    #[error("payment verification failed")]
    VerificationFailed,

    /// Referenced job, order or account does not exist
    #[error("entity not found")]
    NotFound,

    /// Amount is zero, negative, or finer than the currency's minor unit
    #[error("invalid amount")]
    InvalidAmount,

    /// Line item has no name, zero quantity or a negative price
    #[error("invalid line item")]
    InvalidLineItem,

    /// Technician cancellation must carry a reason
    #[error("cancellation reason required")]
    MissingReason,

    /// Delivery details lack the fields their delivery type needs
    #[error("incomplete delivery details")]
    InvalidDeliveryDetails,

    /// Caller-supplied id is already taken
    #[error("entity already exists")]
    AlreadyExists,

    /// Gateway order creation kept failing
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
}
