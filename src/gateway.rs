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

//! Online payment gateway collaborator.
//!
//! The gateway issues an external order id for an amount; after checkout the
//! client returns `(order_id, payment_id, signature)` where
//!
//! ```text
//! signature = hex(HMAC-SHA256(order_id + "|" + payment_id, shared_secret))
//! ```

use crate::WorkflowError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transient failure; safe to retry because no order exists yet.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Gateway refused the order outright.
    #[error("gateway rejected order: {0}")]
    Rejected(String),
}

/// Order-creation half of the gateway contract.
pub trait PaymentGateway: Send + Sync {
    /// Creates an external order for `amount_minor` minor units and returns its id.
    ///
    /// `receipt` is our own reference and may be echoed back by the gateway.
    fn create_order(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: &str,
    ) -> Result<String, GatewayError>;
}

/// Issues sequential local order ids. Used for replays and tests.
#[derive(Debug, Default)]
pub struct OfflineGateway {
    next: AtomicU64,
}

impl OfflineGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PaymentGateway for OfflineGateway {
    fn create_order(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: &str,
    ) -> Result<String, GatewayError> {
        if amount_minor == 0 {
            return Err(GatewayError::Rejected("amount must be positive".into()));
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(amount_minor, currency, receipt, n, "offline gateway order issued");
        Ok(format!("order_{n:08}"))
    }
}

/// Computes and checks gateway payment signatures with the shared secret.
#[derive(Clone)]
pub struct GatewaySigner {
    secret: Secret<String>,
}

impl GatewaySigner {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    fn mac(&self, order_id: &str, payment_id: &str) -> Result<HmacSha256, WorkflowError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| WorkflowError::VerificationFailed)?;
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        Ok(mac)
    }

    /// Hex HMAC-SHA256 of `order_id|payment_id`.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::VerificationFailed`] - The secret cannot key the MAC.
    pub fn sign(&self, order_id: &str, payment_id: &str) -> Result<String, WorkflowError> {
        let mac = self.mac(order_id, payment_id)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        self.mac(order_id, payment_id)
            .is_ok_and(|mac| mac.verify_slice(&bytes).is_ok())
    }
}

impl std::fmt::Debug for GatewaySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySigner").finish_non_exhaustive()
    }
}
