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

//! Progress indicator for job timelines.
//!
//! Display-only: nothing here feeds back into transitions. Priorities are in
//! tenths so that `quote_pending` (3.5) and friends compare exactly.

use crate::job::JobStatus;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Complete,
    Active,
    Pending,
}

/// Position of `status` on the shared timeline, in tenths of a step.
///
/// `None` for `cancelled` and `rejected`, which sit off the timeline.
pub fn step_priority(status: JobStatus) -> Option<u16> {
    let tenths = match status {
        JobStatus::Pending => 0,
        JobStatus::Accepted => 10,
        JobStatus::Arrived => 20,
        JobStatus::Diagnosing => 30,
        JobStatus::QuotePending => 35,
        JobStatus::PartsRequired | JobStatus::PartsOrdered => 40,
        JobStatus::InProgress => 45,
        JobStatus::BillingPending => 55,
        JobStatus::VehicleDelivered => 58,
        JobStatus::PaymentPendingCash => 59,
        JobStatus::Completed => 60,
        JobStatus::Cancelled | JobStatus::Rejected => return None,
    };
    Some(tenths)
}

/// How the timeline step `step` renders while the job is at `current`.
pub fn step_state(step: JobStatus, current: JobStatus) -> Option<StepState> {
    let step = step_priority(step)?;
    let current = step_priority(current)?;
    let state = if step < current {
        StepState::Complete
    } else if step / 10 == current / 10 {
        StepState::Active
    } else {
        StepState::Pending
    };
    Some(state)
}

/// Every on-timeline status paired with its state, in timeline order.
pub fn timeline(current: JobStatus) -> Vec<(JobStatus, StepState)> {
    let mut steps: Vec<(JobStatus, u16)> = JobStatus::ALL
        .iter()
        .filter_map(|status| step_priority(*status).map(|p| (*status, p)))
        .collect();
    steps.sort_by_key(|(_, priority)| *priority);
    steps
        .into_iter()
        .filter_map(|(status, _)| step_state(status, current).map(|state| (status, state)))
        .collect()
}
