//! Environment configuration

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::value_objects::Money;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub event_subject_prefix: String,
    pub shipping_flat_rate: Money,
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8083,
            database_url: None,
            nats_url: None,
            event_subject_prefix: "opensase.fulfillment".to_string(),
            shipping_flat_rate: Money::ZERO,
            seed_file: None,
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to honour a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("PORT") {
            Some(p) => p.parse().with_context(|| format!("PORT is not a valid port: {p}"))?,
            None => defaults.port,
        };
        let shipping_flat_rate = match var("SHIPPING_FLAT_RATE") {
            Some(rate) => {
                let amount = Decimal::from_str(&rate).with_context(|| format!("SHIPPING_FLAT_RATE is not a decimal: {rate}"))?;
                anyhow::ensure!(!amount.is_sign_negative(), "SHIPPING_FLAT_RATE must not be negative");
                Money::new(amount)
            }
            None => defaults.shipping_flat_rate,
        };

        Ok(Self {
            port,
            database_url: var("DATABASE_URL"),
            nats_url: var("NATS_URL"),
            event_subject_prefix: var("EVENT_SUBJECT_PREFIX").unwrap_or(defaults.event_subject_prefix),
            shipping_flat_rate,
            seed_file: var("SEED_FILE").map(PathBuf::from),
        })
    }
}
