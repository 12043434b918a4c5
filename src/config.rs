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

//! Engine configuration.

use crate::base::PartyId;
use crate::job::JobOrigin;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::Secret;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Which job origins may start work without an approved quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSkipPolicy {
    #[default]
    SelfServiceOnly,
    Never,
    Always,
}

impl QuoteSkipPolicy {
    pub fn allows_skip(&self, origin: JobOrigin) -> bool {
        match self {
            QuoteSkipPolicy::SelfServiceOnly => origin == JobOrigin::SelfService,
            QuoteSkipPolicy::Never => false,
            QuoteSkipPolicy::Always => true,
        }
    }
}

impl FromStr for QuoteSkipPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "self_service_only" | "self-service-only" => Ok(QuoteSkipPolicy::SelfServiceOnly),
            "never" => Ok(QuoteSkipPolicy::Never),
            "always" => Ok(QuoteSkipPolicy::Always),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// ISO currency code sent to the gateway.
    pub currency: String,
    /// Platform commission in basis points of each settled amount.
    pub commission_bps: u32,
    /// Wallet credited with commission.
    pub platform_account: PartyId,
    /// Allowed gap between a quoted total and its line items.
    pub amount_tolerance: Decimal,
    /// Attempts at gateway order creation before giving up.
    pub gateway_attempts: u32,
    pub quote_skip: QuoteSkipPolicy,
    pub gateway_secret: Secret<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            commission_bps: 0,
            platform_account: PartyId(0),
            amount_tolerance: dec!(0.01),
            gateway_attempts: 3,
            quote_skip: QuoteSkipPolicy::default(),
            gateway_secret: Secret::new(String::new()),
        }
    }
}

impl EngineConfig {
    /// Reads `GARAGE_*` variables, loading `.env` first. Unset variables keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(currency) = lookup("GARAGE_CURRENCY") {
            config.currency = currency.trim().to_ascii_uppercase();
        }
        if let Some(value) = lookup("GARAGE_COMMISSION_BPS") {
            config.commission_bps = parse("GARAGE_COMMISSION_BPS", &value)?;
            if config.commission_bps >= 10_000 {
                return Err(ConfigError::InvalidValue {
                    key: "GARAGE_COMMISSION_BPS",
                    value,
                });
            }
        }
        if let Some(value) = lookup("GARAGE_PLATFORM_ACCOUNT") {
            config.platform_account = PartyId(parse("GARAGE_PLATFORM_ACCOUNT", &value)?);
        }
        if let Some(value) = lookup("GARAGE_AMOUNT_TOLERANCE") {
            config.amount_tolerance = parse("GARAGE_AMOUNT_TOLERANCE", &value)?;
        }
        if let Some(value) = lookup("GARAGE_GATEWAY_ATTEMPTS") {
            config.gateway_attempts = parse::<u32>("GARAGE_GATEWAY_ATTEMPTS", &value)?.max(1);
        }
        if let Some(value) = lookup("GARAGE_QUOTE_SKIP") {
            config.quote_skip = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "GARAGE_QUOTE_SKIP",
                value: value.clone(),
            })?;
        }
        if let Some(secret) = lookup("GARAGE_GATEWAY_SECRET") {
            config.gateway_secret = Secret::new(secret);
        }

        Ok(config)
    }

    /// Commission due on `amount`, rounded to the minor unit.
    pub fn commission_on(&self, amount: Decimal) -> Decimal {
        (amount * Decimal::from(self.commission_bps) / dec!(10000))
            .round_dp(crate::base::CURRENCY_PRECISION)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
