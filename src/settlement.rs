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

//! Settlement coordinator.
//!
//! Drives a [`Payable`] (a job's approved bill or a confirmed parts order) to
//! `paid` through one [`Instrument`]:
//!
//! | Instrument | Flow |
//! |------------|------|
//! | Wallet | Debit payer, credit payee (and platform commission) in one posting |
//! | Cash | Mark pending; the receiving party confirms, which posts the credit |
//! | Gateway | Create an external order, then verify the signed callback |
//!
//! Every settlement writes exactly one keyed posting per payable; settling an
//! already-paid payable is a no-op.

use crate::WorkflowError;
use crate::base::{Actor, PartyId, PayableRef, Role, to_minor_units};
use crate::config::EngineConfig;
use crate::gateway::{GatewayError, GatewaySigner, PaymentGateway};
use crate::job::{Job, JobAction, next_status};
use crate::ledger::{EntryReason, LedgerEntry, LedgerStore, Leg, PostingKey};
use crate::order::PartsOrder;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    Wallet,
    Cash,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    PendingCash,
    AwaitingGateway,
    Paid,
    Refunded,
}

/// Payment fields carried by jobs and orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct PaymentState {
    pub method: Option<Instrument>,
    pub status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SettlementResult {
    Paid { entries: Vec<LedgerEntry> },
    /// Nothing happened; the payable had already been paid.
    AlreadyPaid,
    PendingCash,
    AwaitingGateway {
        external_order_id: String,
        amount_minor: u64,
        currency: String,
    },
    Refunded { entries: Vec<LedgerEntry> },
}

/// An entity that can be settled.
pub trait Payable {
    fn payable_ref(&self) -> PayableRef;
    fn payment(&self) -> &PaymentState;
    fn payment_mut(&mut self) -> &mut PaymentState;
    fn payment_reason(&self) -> EntryReason;
    /// Returns the paying party if `actor` is it.
    fn check_payer(&self, actor: &Actor) -> Result<PartyId, WorkflowError>;
    /// Fails unless `actor` is the receiving party.
    fn check_payee(&self, actor: &Actor) -> Result<(), WorkflowError>;
    fn payee(&self) -> Result<PartyId, WorkflowError>;
    /// Agreed amount, once a price has been accepted.
    fn amount_due(&self) -> Result<Decimal, WorkflowError>;
    /// Validates that a payment may complete now, without changing anything.
    fn check_payable(&self, actor: &Actor) -> Result<(), WorkflowError>;
    fn record_paid(&mut self, actor: &Actor) -> Result<(), WorkflowError>;
    fn record_pending_cash(&mut self, actor: &Actor) -> Result<(), WorkflowError>;
    fn record_cash_confirmed(&mut self, actor: &Actor) -> Result<(), WorkflowError>;
}

impl Payable for Job {
    fn payable_ref(&self) -> PayableRef {
        PayableRef::Job(self.id)
    }

    fn payment(&self) -> &PaymentState {
        &self.payment
    }

    fn payment_mut(&mut self) -> &mut PaymentState {
        &mut self.payment
    }

    fn payment_reason(&self) -> EntryReason {
        EntryReason::JobPayment
    }

    fn check_payer(&self, actor: &Actor) -> Result<PartyId, WorkflowError> {
        if actor.role == Role::Customer && actor.id == self.customer {
            Ok(self.customer)
        } else {
            Err(WorkflowError::InvalidActor)
        }
    }

    fn check_payee(&self, actor: &Actor) -> Result<(), WorkflowError> {
        if actor.role == Role::Technician && Some(actor.id) == self.technician {
            Ok(())
        } else {
            Err(WorkflowError::InvalidActor)
        }
    }

    fn payee(&self) -> Result<PartyId, WorkflowError> {
        self.technician.ok_or(WorkflowError::InvalidState)
    }

    fn amount_due(&self) -> Result<Decimal, WorkflowError> {
        match &self.bill {
            Some(bill) if bill.is_approved() => Ok(bill.payable_amount),
            _ => Err(WorkflowError::InvalidState),
        }
    }

    fn check_payable(&self, actor: &Actor) -> Result<(), WorkflowError> {
        next_status(self.status, JobAction::MarkPaid, actor.role).map(|_| ())
    }

    fn record_paid(&mut self, actor: &Actor) -> Result<(), WorkflowError> {
        self.apply(actor, JobAction::MarkPaid).map(|_| ())
    }

    fn record_pending_cash(&mut self, actor: &Actor) -> Result<(), WorkflowError> {
        self.apply(actor, JobAction::PayByCash).map(|_| ())
    }

    fn record_cash_confirmed(&mut self, actor: &Actor) -> Result<(), WorkflowError> {
        self.apply(actor, JobAction::ConfirmCash).map(|_| ())
    }
}

impl Payable for PartsOrder {
    fn payable_ref(&self) -> PayableRef {
        PayableRef::Order(self.id)
    }

    fn payment(&self) -> &PaymentState {
        &self.payment
    }

    fn payment_mut(&mut self) -> &mut PaymentState {
        &mut self.payment
    }

    fn payment_reason(&self) -> EntryReason {
        EntryReason::OrderPayment
    }

    fn check_payer(&self, actor: &Actor) -> Result<PartyId, WorkflowError> {
        if actor.role == self.requester_role && actor.id == self.requester {
            Ok(self.requester)
        } else {
            Err(WorkflowError::InvalidActor)
        }
    }

    fn check_payee(&self, actor: &Actor) -> Result<(), WorkflowError> {
        if actor.role == Role::Supplier && Some(actor.id) == self.supplier {
            Ok(())
        } else {
            Err(WorkflowError::InvalidActor)
        }
    }

    fn payee(&self) -> Result<PartyId, WorkflowError> {
        self.supplier.ok_or(WorkflowError::InvalidState)
    }

    fn amount_due(&self) -> Result<Decimal, WorkflowError> {
        if self.status.is_payable() {
            Ok(self.total_amount)
        } else {
            Err(WorkflowError::InvalidState)
        }
    }

    fn check_payable(&self, _actor: &Actor) -> Result<(), WorkflowError> {
        self.amount_due().map(|_| ())
    }

    fn record_paid(&mut self, actor: &Actor) -> Result<(), WorkflowError> {
        self.check_payable(actor)
    }

    fn record_pending_cash(&mut self, actor: &Actor) -> Result<(), WorkflowError> {
        self.check_payable(actor)
    }

    fn record_cash_confirmed(&mut self, actor: &Actor) -> Result<(), WorkflowError> {
        self.check_payee(actor)?;
        self.check_payable(actor)
    }
}

/// A gateway order awaiting its signed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub payable: PayableRef,
    pub amount: Decimal,
    pub consumed: bool,
}

pub struct SettlementCoordinator {
    ledger: Arc<LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    signer: GatewaySigner,
    config: EngineConfig,
    /// External order id to the payable it settles.
    pending: DashMap<String, GatewayOrder>,
    /// Gateway payment ids already credited.
    used_payments: DashSet<String>,
}

impl SettlementCoordinator {
    pub fn new(ledger: Arc<LedgerStore>, gateway: Arc<dyn PaymentGateway>, config: EngineConfig) -> Self {
        Self {
            ledger,
            gateway,
            signer: GatewaySigner::new(config.gateway_secret.clone()),
            config,
            pending: DashMap::new(),
            used_payments: DashSet::new(),
        }
    }

    pub fn signer(&self) -> &GatewaySigner {
        &self.signer
    }

    /// Payable that an external order id was issued for.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::VerificationFailed`] - The order id was never issued here.
    pub fn gateway_payable(&self, external_order_id: &str) -> Result<PayableRef, WorkflowError> {
        self.pending
            .get(external_order_id)
            .map(|order| order.payable)
            .ok_or(WorkflowError::VerificationFailed)
    }

    pub fn gateway_order(&self, external_order_id: &str) -> Option<GatewayOrder> {
        self.pending.get(external_order_id).map(|order| order.clone())
    }

    /// Settles `payable` for `amount` through `instrument`.
    ///
    /// Callers hold the payable's lock and pass a working copy; on error the
    /// copy must be discarded.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::InvalidActor`] - `actor` is not the paying party.
    /// - [`WorkflowError::InvalidState`] - Nothing is payable yet, or cash is pending.
    /// - [`WorkflowError::AmountMismatch`] - `amount` differs from the agreed amount.
    /// - [`WorkflowError::InsufficientFunds`] - Wallet balance below `amount`.
    /// - [`WorkflowError::GatewayUnavailable`] - External order creation failed.
    pub fn settle<P: Payable>(
        &self,
        payable: &mut P,
        actor: &Actor,
        amount: Decimal,
        instrument: Instrument,
    ) -> Result<SettlementResult, WorkflowError> {
        let payer = payable.check_payer(actor)?;
        match payable.payment().status {
            PaymentStatus::Paid | PaymentStatus::Refunded => return Ok(SettlementResult::AlreadyPaid),
            PaymentStatus::PendingCash if instrument == Instrument::Cash => {
                return Ok(SettlementResult::PendingCash);
            }
            PaymentStatus::PendingCash => return Err(WorkflowError::InvalidState),
            PaymentStatus::Unpaid | PaymentStatus::AwaitingGateway => {}
        }

        let due = payable.amount_due()?;
        if amount != due {
            return Err(WorkflowError::AmountMismatch);
        }

        match instrument {
            Instrument::Wallet => self.settle_wallet(payable, actor, payer, due),
            Instrument::Cash => self.settle_cash(payable, actor),
            Instrument::Gateway => self.settle_gateway(payable, actor, due),
        }
    }

    fn settle_wallet<P: Payable>(
        &self,
        payable: &mut P,
        actor: &Actor,
        payer: PartyId,
        amount: Decimal,
    ) -> Result<SettlementResult, WorkflowError> {
        let payee = payable.payee()?;
        payable.record_paid(actor)?;
        let legs = self.payment_legs(Some(payer), payee, amount, payable.payment_reason());
        let receipt = self
            .ledger
            .post(PostingKey::Settlement(payable.payable_ref()), &legs)?;

        let payment = payable.payment_mut();
        payment.method = Some(Instrument::Wallet);
        payment.status = PaymentStatus::Paid;
        payment.paid_at = Some(Utc::now());

        tracing::info!(payable = %payable.payable_ref(), %amount, "settled from wallet");
        Ok(SettlementResult::Paid {
            entries: receipt.entries,
        })
    }

    fn settle_cash<P: Payable>(
        &self,
        payable: &mut P,
        actor: &Actor,
    ) -> Result<SettlementResult, WorkflowError> {
        payable.payee()?;
        payable.record_pending_cash(actor)?;
        let payment = payable.payment_mut();
        payment.method = Some(Instrument::Cash);
        payment.status = PaymentStatus::PendingCash;
        tracing::info!(payable = %payable.payable_ref(), "awaiting cash confirmation");
        Ok(SettlementResult::PendingCash)
    }

    fn settle_gateway<P: Payable>(
        &self,
        payable: &mut P,
        actor: &Actor,
        amount: Decimal,
    ) -> Result<SettlementResult, WorkflowError> {
        payable.payee()?;
        payable.check_payable(actor)?;
        let amount_minor = to_minor_units(amount).ok_or(WorkflowError::InvalidAmount)?;

        // Reuse the open order so a retried settle never creates a second one.
        if payable.payment().status == PaymentStatus::AwaitingGateway {
            if let Some(existing) = payable.payment().gateway_order_id.clone() {
                return Ok(SettlementResult::AwaitingGateway {
                    external_order_id: existing,
                    amount_minor,
                    currency: self.config.currency.clone(),
                });
            }
        }

        let receipt = payable.payable_ref().to_string();
        let external_order_id = self.create_gateway_order(amount_minor, &receipt)?;
        self.pending.insert(
            external_order_id.clone(),
            GatewayOrder {
                payable: payable.payable_ref(),
                amount,
                consumed: false,
            },
        );

        let payment = payable.payment_mut();
        payment.method = Some(Instrument::Gateway);
        payment.status = PaymentStatus::AwaitingGateway;
        payment.gateway_order_id = Some(external_order_id.clone());

        tracing::info!(
            payable = %payable.payable_ref(),
            order_id = %external_order_id,
            amount_minor,
            "gateway order created"
        );
        Ok(SettlementResult::AwaitingGateway {
            external_order_id,
            amount_minor,
            currency: self.config.currency.clone(),
        })
    }

    fn create_gateway_order(&self, amount_minor: u64, receipt: &str) -> Result<String, WorkflowError> {
        let attempts = self.config.gateway_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self
                .gateway
                .create_order(amount_minor, &self.config.currency, receipt)
            {
                Ok(order_id) => return Ok(order_id),
                Err(GatewayError::Unavailable(reason)) => {
                    tracing::warn!(attempt, attempts, %reason, "gateway order creation failed, retrying");
                    last_error = reason;
                }
                Err(GatewayError::Rejected(reason)) => {
                    return Err(WorkflowError::GatewayUnavailable(reason));
                }
            }
        }
        Err(WorkflowError::GatewayUnavailable(last_error))
    }

    /// Completes a gateway payment from its signed callback. Single use per
    /// order id and per payment id.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::VerificationFailed`] - Unknown or consumed order id,
    /// replayed payment id, superseded order, or bad signature.
    pub fn verify_payment<P: Payable>(
        &self,
        payable: &mut P,
        actor: &Actor,
        external_order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<SettlementResult, WorkflowError> {
        payable.check_payer(actor)?;

        let order = self
            .gateway_order(external_order_id)
            .ok_or(WorkflowError::VerificationFailed)?;
        let current = payable.payment();
        if order.consumed
            || order.payable != payable.payable_ref()
            || current.status != PaymentStatus::AwaitingGateway
            || current.gateway_order_id.as_deref() != Some(external_order_id)
            || self.used_payments.contains(payment_id)
        {
            tracing::warn!(order_id = %external_order_id, %payment_id, "gateway callback rejected as stale or replayed");
            return Err(WorkflowError::VerificationFailed);
        }
        if !self.signer.verify(external_order_id, payment_id, signature) {
            tracing::warn!(order_id = %external_order_id, %payment_id, "gateway signature mismatch");
            return Err(WorkflowError::VerificationFailed);
        }

        let payee = payable.payee()?;
        payable.record_paid(actor)?;

        if !self.used_payments.insert(payment_id.to_string()) {
            return Err(WorkflowError::VerificationFailed);
        }
        let legs = self.payment_legs(None, payee, order.amount, payable.payment_reason());
        let receipt = match self
            .ledger
            .post(PostingKey::Settlement(payable.payable_ref()), &legs)
        {
            Ok(receipt) => receipt,
            Err(error) => {
                self.used_payments.remove(payment_id);
                return Err(error);
            }
        };
        if let Some(mut pending) = self.pending.get_mut(external_order_id) {
            pending.consumed = true;
        }

        let payment = payable.payment_mut();
        payment.status = PaymentStatus::Paid;
        payment.paid_at = Some(Utc::now());

        tracing::info!(payable = %payable.payable_ref(), order_id = %external_order_id, %payment_id, "gateway payment verified");
        Ok(SettlementResult::Paid {
            entries: receipt.entries,
        })
    }

    /// Receiving party confirms cash in hand; posts the credit and finalizes.
    pub fn confirm_cash<P: Payable>(
        &self,
        payable: &mut P,
        actor: &Actor,
    ) -> Result<SettlementResult, WorkflowError> {
        payable.check_payee(actor)?;
        match payable.payment().status {
            PaymentStatus::Paid if payable.payment().method == Some(Instrument::Cash) => {
                return Ok(SettlementResult::AlreadyPaid);
            }
            PaymentStatus::PendingCash => {}
            _ => return Err(WorkflowError::InvalidState),
        }

        let payee = payable.payee()?;
        let amount = payable.amount_due()?;
        payable.record_cash_confirmed(actor)?;
        let legs = self.payment_legs(None, payee, amount, payable.payment_reason());
        let receipt = self
            .ledger
            .post(PostingKey::Settlement(payable.payable_ref()), &legs)?;

        let payment = payable.payment_mut();
        payment.status = PaymentStatus::Paid;
        payment.paid_at = Some(Utc::now());

        tracing::info!(payable = %payable.payable_ref(), %amount, "cash payment confirmed");
        Ok(SettlementResult::Paid {
            entries: receipt.entries,
        })
    }

    /// Offsets a paid payable's settlement entries. No-op when nothing was posted.
    pub fn refund<P: Payable>(&self, payable: &mut P) -> Result<Option<SettlementResult>, WorkflowError> {
        if payable.payment().status != PaymentStatus::Paid {
            return Ok(None);
        }
        let Some(settled) = self
            .ledger
            .posted(PostingKey::Settlement(payable.payable_ref()))
        else {
            return Ok(None);
        };

        let legs: Vec<Leg> = settled
            .iter()
            .map(|entry| Leg {
                account: entry.account,
                amount: -entry.amount,
                reason: EntryReason::Refund,
            })
            .collect();
        let receipt = self
            .ledger
            .post(PostingKey::Refund(payable.payable_ref()), &legs)?;
        payable.payment_mut().status = PaymentStatus::Refunded;

        tracing::info!(payable = %payable.payable_ref(), "settlement refunded");
        Ok(Some(SettlementResult::Refunded {
            entries: receipt.entries,
        }))
    }

    /// Debit from `payer` (if the money comes from a wallet), credit the payee
    /// net of commission, credit the platform the commission.
    fn payment_legs(
        &self,
        payer: Option<PartyId>,
        payee: PartyId,
        amount: Decimal,
        reason: EntryReason,
    ) -> Vec<Leg> {
        let commission = self.config.commission_on(amount);
        let mut legs = Vec::with_capacity(3);
        if let Some(payer) = payer {
            legs.push(Leg::debit(payer, amount, reason));
        }
        if amount > commission {
            legs.push(Leg::credit(payee, amount - commission, reason));
        }
        if commission > Decimal::ZERO {
            legs.push(Leg::credit(
                self.config.platform_account,
                commission,
                EntryReason::Commission,
            ));
        }
        legs
    }
}
