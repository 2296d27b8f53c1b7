//! In-memory alert registry.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{ExecutionError, HemoError, HemoResult};
use crate::reading::SubjectId;

use super::{Alert, AlertId};

fn lock_err(context: &'static str) -> HemoError {
    HemoError::internal(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct AlertState {
    by_id: HashMap<AlertId, Alert>,
    order: Vec<AlertId>,
}

/// Owns every alert ever raised in this engine instance.
///
/// Alerts are never removed; queries filter on the acknowledged flag.
#[derive(Debug, Default)]
pub struct AlertRegistry {
    state: RwLock<AlertState>,
}

impl AlertRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new alert. An existing id is never overwritten.
    ///
    /// # Errors
    ///
    /// `DuplicateAlert` if the id is already registered.
    pub fn raise(&self, alert: Alert) -> HemoResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("alerts.raise"))?;
        if state.by_id.contains_key(&alert.alert_id) {
            return Err(ExecutionError::DuplicateAlert {
                id: alert.alert_id.to_string(),
            }
            .into());
        }
        state.order.push(alert.alert_id.clone());
        state.by_id.insert(alert.alert_id.clone(), alert);
        Ok(())
    }

    /// Marks an alert acknowledged.
    ///
    /// Returns `true` if this call changed the flag, `false` if it was already set.
    ///
    /// # Errors
    ///
    /// `AlertNotFound` for an unknown id.
    pub fn acknowledge(&self, alert_id: &AlertId) -> HemoResult<bool> {
        let mut state = self.state.write().map_err(|_| lock_err("alerts.acknowledge"))?;
        let alert = state.by_id.get_mut(alert_id).ok_or_else(|| ExecutionError::AlertNotFound {
            id: alert_id.to_string(),
        })?;
        let changed = !alert.acknowledged;
        alert.acknowledged = true;
        Ok(changed)
    }

    pub fn get(&self, alert_id: &AlertId) -> HemoResult<Option<Alert>> {
        let state = self.state.read().map_err(|_| lock_err("alerts.get"))?;
        Ok(state.by_id.get(alert_id).cloned())
    }

    /// Unacknowledged alerts, optionally restricted to one subject.
    pub fn list_active(&self, subject: Option<&SubjectId>) -> HemoResult<Vec<Alert>> {
        self.list(subject, true)
    }

    /// Alerts in the order they were raised.
    pub fn list(&self, subject: Option<&SubjectId>, active_only: bool) -> HemoResult<Vec<Alert>> {
        let state = self.state.read().map_err(|_| lock_err("alerts.list"))?;
        let out = state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|a| subject.map_or(true, |s| &a.subject_id == s))
            .filter(|a| !active_only || !a.acknowledged)
            .cloned()
            .collect();
        Ok(out)
    }

    pub fn len(&self) -> HemoResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("alerts.len"))?;
        Ok(state.by_id.len())
    }

    pub fn is_empty(&self) -> HemoResult<bool> {
        Ok(self.len()? == 0)
    }
}
