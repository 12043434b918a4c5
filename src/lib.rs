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

//! # Garage Flow
//!
//! Workflow core for a vehicle repair marketplace: the job lifecycle, quote
//! and bill negotiation, parts sourcing from suppliers, and settlement into
//! an append-only wallet ledger.
//!
//! ## Core Components
//!
//! - [`Engine`]: Owns jobs, parts orders and wallets; runs every command as one unit of work
//! - [`Job`] / [`PartsOrder`]: Entities whose statuses move through closed transition tables
//! - [`SettlementCoordinator`]: Wallet, cash and gateway payment flows
//! - [`LedgerStore`]: Wallet balances and their append-only entries
//! - [`WorkflowError`]: Error types for rejected commands
//!
//! ## Example
//!
//! ```
//! use garage_flow::{Actor, DocumentKind, Decision, Engine, EngineConfig, Instrument, JobAction,
//!     JobId, JobOrigin, JobStatus, LineItem, PartyId, PayableRef};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new(EngineConfig::default());
//! let customer = Actor::customer(1);
//! let technician = Actor::technician(2);
//!
//! engine.create_job(&customer, JobId(1), Some(PartyId(2)), "KA-01-1234", JobOrigin::Marketplace).unwrap();
//! for action in [JobAction::Accept, JobAction::Arrive, JobAction::StartDiagnosis] {
//!     engine.advance(JobId(1), &technician, action).unwrap();
//! }
//! engine
//!     .propose_document(JobId(1), &technician, DocumentKind::Quote,
//!         vec![LineItem::part("Brake Pad", 2, dec!(500))], dec!(300))
//!     .unwrap();
//! engine.respond_to_document(JobId(1), &customer, Decision::Approve).unwrap();
//! engine.propose_document(JobId(1), &technician, DocumentKind::Bill, vec![], dec!(1300)).unwrap();
//! engine.respond_to_document(JobId(1), &customer, Decision::Approve).unwrap();
//!
//! engine.top_up(&customer, dec!(2000)).unwrap();
//! engine.settle(PayableRef::Job(JobId(1)), &customer, dec!(1300), Instrument::Wallet).unwrap();
//!
//! assert_eq!(engine.job(JobId(1)).unwrap().status, JobStatus::Completed);
//! assert_eq!(engine.balance(PartyId(2)), dec!(1300));
//! ```
//!
//! ## Thread Safety
//!
//! Entities live in [`dashmap::DashMap`]s behind per-record mutexes, so
//! commands on different jobs run in parallel while commands on the same job
//! serialize.

mod base;
pub mod command;
pub mod config;
mod engine;
pub mod error;
pub mod gateway;
pub mod job;
pub mod ledger;
pub mod negotiation;
pub mod notify;
pub mod order;
pub mod progress;
pub mod settlement;

pub use base::{Actor, EntryId, JobId, OrderId, PartyId, PayableRef, Role, CURRENCY_PRECISION, to_minor_units};
pub use command::{Command, Envelope, Outcome};
pub use config::{ConfigError, EngineConfig, QuoteSkipPolicy};
pub use engine::Engine;
pub use error::WorkflowError;
pub use gateway::{GatewayError, GatewaySigner, OfflineGateway, PaymentGateway};
pub use job::{Job, JobAction, JobOrigin, JobStatus};
pub use ledger::{EntryReason, LedgerEntry, LedgerStore, WalletAccount};
pub use negotiation::{Decision, Document, DocumentKind, ItemCategory, LineItem};
pub use notify::{ChannelNotifier, EntityType, LogNotifier, Notifier, NotifyError, TransitionEvent};
pub use order::{DeliveryDetails, DeliveryType, OrderAction, OrderStatus, PartsOrder};
pub use settlement::{Instrument, PaymentState, PaymentStatus, SettlementCoordinator, SettlementResult};
