use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

/// Per-actor rate limiter for one kind of action.
///
/// An actor may act when it has no record or its last permitted action is at
/// least `window_secs` old. Records live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct CooldownGuard {
    last_action: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and record in one step; `now` is stored only when permitted
    pub fn try_act(&self, actor_id: &str, now: DateTime<Utc>, window_secs: i64) -> bool {
        let mut records = self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        let permitted = match records.get(actor_id) {
            Some(last) => (now - *last).num_seconds() >= window_secs,
            None => true,
        };
        if permitted {
            records.insert(actor_id.to_string(), now);
        }
        permitted
    }

    /// Seconds until `actor_id` may act again, zero when it already may
    pub fn retry_after(&self, actor_id: &str, now: DateTime<Utc>, window_secs: i64) -> i64 {
        let records = self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(actor_id)
            .map(|last| (window_secs - (now - *last).num_seconds()).max(0))
            .unwrap_or(0)
    }

    /// Undo the action recorded at `at`, e.g. when it failed downstream.
    /// A newer record for the actor is left alone.
    pub fn revoke(&self, actor_id: &str, at: DateTime<Utc>) -> bool {
        let mut records = self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        if records.get(actor_id) == Some(&at) {
            records.remove(actor_id);
            true
        } else {
            false
        }
    }

    /// Drop records whose window has passed; returns how many were removed
    pub fn prune(&self, now: DateTime<Utc>, window_secs: i64) -> usize {
        let mut records = self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, last| (now - *last).num_seconds() < window_secs);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.last_action.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Rate limited user interactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownAction {
    CastVote,
    RoleToggle,
}

impl fmt::Display for CooldownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownAction::CastVote => write!(f, "cast_vote"),
            CooldownAction::RoleToggle => write!(f, "role_toggle"),
        }
    }
}

impl FromStr for CooldownAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cast_vote" => Ok(CooldownAction::CastVote),
            "role_toggle" => Ok(CooldownAction::RoleToggle),
            other => Err(format!("unknown cooldown action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownDecision {
    pub permitted: bool,
    pub retry_after: i64,
}

/// One independent guard per action kind
#[derive(Debug)]
pub struct Cooldowns {
    vote: CooldownGuard,
    role: CooldownGuard,
    vote_window_secs: i64,
    role_window_secs: i64,
}

impl Cooldowns {
    pub fn new(vote_window_secs: i64, role_window_secs: i64) -> Self {
        Self {
            vote: CooldownGuard::new(),
            role: CooldownGuard::new(),
            vote_window_secs,
            role_window_secs,
        }
    }

    fn guard(&self, action: CooldownAction) -> (&CooldownGuard, i64) {
        match action {
            CooldownAction::CastVote => (&self.vote, self.vote_window_secs),
            CooldownAction::RoleToggle => (&self.role, self.role_window_secs),
        }
    }

    pub fn check(&self, action: CooldownAction, actor_id: &str, now: DateTime<Utc>) -> CooldownDecision {
        let (guard, window) = self.guard(action);
        if guard.try_act(actor_id, now, window) {
            CooldownDecision {
                permitted: true,
                retry_after: 0,
            }
        } else {
            let retry_after = guard.retry_after(actor_id, now, window);
            debug!(action = %action, actor_id = %actor_id, retry_after, "Cooldown active");
            CooldownDecision {
                permitted: false,
                retry_after,
            }
        }
    }

    pub fn revoke(&self, action: CooldownAction, actor_id: &str, at: DateTime<Utc>) -> bool {
        let (guard, _) = self.guard(action);
        guard.revoke(actor_id, at)
    }

    /// Prune every guard against its own window
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        [CooldownAction::CastVote, CooldownAction::RoleToggle]
            .into_iter()
            .map(|action| {
                let (guard, window) = self.guard(action);
                guard.prune(now, window)
            })
            .sum()
    }
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self::new(5, 15)
    }
}
