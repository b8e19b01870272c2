//! Conflict detection and resolution
//!
//! Compares two versions of a record field by field and resolves them under
//! one of four strategies. Conflicting fields are never resolved by
//! timestamp: `Merge` keeps the remote value and reports the field back.

use chrono::{DateTime, Utc};
use mixtape_core::{Clock, MixtapeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Most recent resolutions kept for debugging
pub const HISTORY_LIMIT: usize = 10;

/// Field name used when the records themselves are not objects
const ROOT_FIELD: &str = "$";

/// Structural equality; numbers compare by value so `1` equals `1.0`
///
/// Integers compare exactly, floats only against floats or through `f64`.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| deep_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| deep_equal(v, other)))
        }
        _ => a == b,
    }
}

fn number_equal(x: &serde_json::Number, y: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
        return x == y;
    }
    if (x.is_i64() || x.is_u64()) && (y.is_i64() || y.is_u64()) {
        // One negative, one above i64::MAX
        return false;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => x == y,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictReport {
    pub has_conflict: bool,
    /// Fields present on both sides with different values, sorted
    pub conflicting_fields: Vec<String>,
    pub local_only: Vec<String>,
    pub remote_only: Vec<String>,
}

/// Diff two versions of a record
pub fn detect(local: &Value, remote: &Value) -> ConflictReport {
    let (Value::Object(local), Value::Object(remote)) = (local, remote) else {
        let differs = !deep_equal(local, remote);
        return ConflictReport {
            has_conflict: differs,
            conflicting_fields: if differs {
                vec![ROOT_FIELD.to_string()]
            } else {
                Vec::new()
            },
            ..ConflictReport::default()
        };
    };

    let keys: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    let mut report = ConflictReport::default();
    for key in keys {
        match (local.get(key), remote.get(key)) {
            (Some(l), Some(r)) if !deep_equal(l, r) => report.conflicting_fields.push(key.clone()),
            (Some(_), None) => report.local_only.push(key.clone()),
            (None, Some(_)) => report.remote_only.push(key.clone()),
            _ => {}
        }
    }
    report.has_conflict = !report.conflicting_fields.is_empty();
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Remote,
    Local,
    Merge,
    /// The caller picks a side for the whole record; `None` defers the choice
    UserChoice(Option<Side>),
}

/// Returned when a user must pick a side before anything is written
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDecision {
    pub record_type: String,
    pub local: Value,
    pub remote: Value,
    pub conflicting_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        value: Value,
        /// Conflicting fields kept from remote under `Merge`
        needs_user_input: Vec<String>,
    },
    Pending(PendingDecision),
}

impl Resolution {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Resolution::Resolved { value, .. } => Some(value),
            Resolution::Pending(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRecord {
    pub record_type: String,
    pub strategy: Strategy,
    pub local: Value,
    pub remote: Value,
    pub resolved: Value,
    pub at: DateTime<Utc>,
}

/// Resolves record conflicts and keeps a short audit trail
pub struct ConflictResolver {
    clock: Arc<dyn Clock>,
    history: Mutex<VecDeque<ResolutionRecord>>,
}

impl ConflictResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    pub fn detect(&self, record_type: &str, local: &Value, remote: &Value) -> ConflictReport {
        let report = detect(local, remote);
        if report.has_conflict {
            debug!(
                record_type,
                fields = ?report.conflicting_fields,
                "Conflict detected"
            );
        }
        report
    }

    pub fn resolve(
        &self,
        record_type: &str,
        local: &Value,
        remote: &Value,
        strategy: Strategy,
    ) -> Resolution {
        let (value, needs_user_input) = match strategy {
            Strategy::Remote | Strategy::UserChoice(Some(Side::Remote)) => {
                (remote.clone(), Vec::new())
            }
            Strategy::Local | Strategy::UserChoice(Some(Side::Local)) => (local.clone(), Vec::new()),
            Strategy::Merge => merge(local, remote),
            Strategy::UserChoice(None) => {
                let report = detect(local, remote);
                return Resolution::Pending(PendingDecision {
                    record_type: record_type.to_string(),
                    local: local.clone(),
                    remote: remote.clone(),
                    conflicting_fields: report.conflicting_fields,
                });
            }
        };

        info!(
            record_type,
            strategy = ?strategy,
            unresolved = needs_user_input.len(),
            "Conflict resolved"
        );
        self.record(ResolutionRecord {
            record_type: record_type.to_string(),
            strategy,
            local: local.clone(),
            remote: remote.clone(),
            resolved: value.clone(),
            at: self.clock.now(),
        });

        Resolution::Resolved {
            value,
            needs_user_input,
        }
    }

    /// Typed resolution
    ///
    /// Returns the resolved record and the fields still needing user input.
    /// A deferred user choice is `ConflictUnresolved`.
    pub fn resolve_as<T>(
        &self,
        record_type: &str,
        local: &T,
        remote: &T,
        strategy: Strategy,
    ) -> Result<(T, Vec<String>)>
    where
        T: Serialize + DeserializeOwned,
    {
        let local = serde_json::to_value(local)?;
        let remote = serde_json::to_value(remote)?;
        match self.resolve(record_type, &local, &remote, strategy) {
            Resolution::Resolved {
                value,
                needs_user_input,
            } => Ok((serde_json::from_value(value)?, needs_user_input)),
            Resolution::Pending(pending) => Err(MixtapeError::ConflictUnresolved {
                fields: pending.conflicting_fields,
            }),
        }
    }

    /// Oldest first
    pub fn history(&self) -> Vec<ResolutionRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.lock().clear();
    }

    fn record(&self, entry: ResolutionRecord) {
        let mut history = self.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(entry);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ResolutionRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remote is the base, local-only fields are added, conflicts stay remote
fn merge(local: &Value, remote: &Value) -> (Value, Vec<String>) {
    let (Value::Object(local_map), Value::Object(remote_map)) = (local, remote) else {
        let conflicts = if deep_equal(local, remote) {
            Vec::new()
        } else {
            vec![ROOT_FIELD.to_string()]
        };
        return (remote.clone(), conflicts);
    };

    let mut merged: Map<String, Value> = remote_map.clone();
    for (key, value) in local_map {
        if !remote_map.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    (Value::Object(merged), detect(local, remote).conflicting_fields)
}
