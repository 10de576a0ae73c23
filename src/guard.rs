//! Guard evaluation: decides whether a channel is eligible to run right now.
//!
//! Guards are named conditions referenced by channel config (e.g. "vpn").
//! A denied guard produces a skipped sample; it never counts as a failure.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::model::Channel;

/// Guard evaluation error. Treated by the runner as "skip this run".
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("unknown guard: {0}")]
    Unknown(String),
    #[error("guard evaluation failed: {0}")]
    Evaluation(String),
}

/// Evaluates a channel's guard references. Must be fast and non-blocking.
pub trait GuardEvaluator: Send + Sync {
    fn is_eligible(&self, channel: &Channel) -> Result<bool, GuardError>;
}

/// Evaluator that admits every channel. Used when no guards are configured.
pub struct AllowAll;

impl GuardEvaluator for AllowAll {
    fn is_eligible(&self, _channel: &Channel) -> Result<bool, GuardError> {
        Ok(true)
    }
}

/// Guard registry backed by named boolean flags.
///
/// The host flips flags as conditions change (VPN up, on AC power, ...);
/// a channel is eligible only if every guard it references is satisfied.
#[derive(Default)]
pub struct StaticGuards {
    flags: RwLock<HashMap<String, bool>>,
}

impl StaticGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, satisfied: bool) {
        let mut flags = self.flags.write().unwrap_or_else(|e| e.into_inner());
        flags.insert(name.to_string(), satisfied);
    }
}

impl GuardEvaluator for StaticGuards {
    fn is_eligible(&self, channel: &Channel) -> Result<bool, GuardError> {
        if channel.guards.is_empty() {
            return Ok(true);
        }
        let flags = self.flags.read().unwrap_or_else(|e| e.into_inner());
        for guard in &channel.guards {
            match flags.get(guard) {
                Some(true) => {}
                Some(false) => return Ok(false),
                None => return Err(GuardError::Unknown(guard.clone())),
            }
        }
        Ok(true)
    }
}
