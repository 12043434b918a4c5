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

//! Status-change notifications.
//!
//! The engine emits one [`TransitionEvent`] per committed status change.
//! Delivery failures are logged and never undo the transition.

use crate::base::Role;
use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Job,
    PartsOrder,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Job => write!(f, "job"),
            EntityType::PartsOrder => write!(f, "parts_order"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub new_status: String,
    pub actor_role: Role,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Disconnected,
    #[error("notification rejected: {0}")]
    Rejected(String),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &TransitionEvent) -> Result<(), NotifyError>;
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &TransitionEvent) -> Result<(), NotifyError> {
        tracing::info!(
            entity = %event.entity_type,
            id = event.entity_id,
            status = %event.new_status,
            actor = %event.actor_role,
            "status changed"
        );
        Ok(())
    }
}

/// Forwards events to a crossbeam channel, for consumers on other threads.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<TransitionEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, Receiver<TransitionEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: &TransitionEvent) -> Result<(), NotifyError> {
        self.sender
            .send(event.clone())
            .map_err(|_| NotifyError::Disconnected)
    }
}
