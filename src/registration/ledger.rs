use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::diff::{render_history, HistoryItem};
use super::model::{HistoryEntry, Registration, RegistrationRequest, RegistrationWithOwner};
use crate::error::{AppError, AppResult};
use crate::identity::{Elevated, IdentityId};
use crate::notifier::Notifier;
use crate::storage::SharedStore;

/// Current registration per (identity, event) plus its append-only history.
#[derive(Clone)]
pub struct RegistrationLedger {
    store: SharedStore,
    notifier: Arc<dyn Notifier>,
    enabled_events: Vec<String>,
}

impl RegistrationLedger {
    pub fn new(store: SharedStore, notifier: Arc<dyn Notifier>, enabled_events: Vec<String>) -> Self {
        Self { store, notifier, enabled_events }
    }

    fn validate(&self, req: &RegistrationRequest) -> AppResult<()> {
        if req.event.trim().is_empty() {
            return Err(AppError::bad_request("missing_event", "Event must be provided"));
        }
        if !self.enabled_events.is_empty() && !self.enabled_events.iter().any(|e| *e == req.event) {
            return Err(AppError::bad_request("event_not_enabled", format!("Event {} is not open for registration", req.event)));
        }
        if req.fields.arrival_date > req.fields.departure_date {
            return Err(AppError::bad_request("invalid_dates", "Arrival date cannot be after departure date"));
        }
        Ok(())
    }

    pub async fn submit(&self, actor: IdentityId, req: RegistrationRequest) -> AppResult<Registration> {
        self.submit_at(actor, req, Utc::now()).await
    }

    /// Upsert the actor's registration for `req.event` and append one history snapshot, as a
    /// single transaction. The notification runs after commit and cannot fail the call.
    pub async fn submit_at(&self, actor: IdentityId, req: RegistrationRequest, now: DateTime<Utc>) -> AppResult<Registration> {
        self.validate(&req)?;

        let (saved, owner) = self.store.transaction(|t| {
            let mut reg = match t.registration(actor, &req.event) {
                Some(existing) => existing.clone(),
                None => Registration {
                    id: 0,
                    user_id: actor,
                    event: req.event.clone(),
                    fields: Default::default(),
                    created_at: now,
                    updated_at: now,
                },
            };
            reg.fields = req.fields.clone();
            reg.updated_at = now;
            let reg = t.save_registration(reg)?;
            t.append_history(HistoryEntry {
                id: 0,
                registration_id: reg.id,
                user_id: reg.user_id,
                event: reg.event.clone(),
                fields: reg.fields.clone(),
                created_at: now,
            });
            Ok((reg, t.identity(actor).cloned()))
        })?;
        info!(user_id = actor, event = %saved.event, cancelled = saved.fields.cancelled, "registration saved");

        if let Some(owner) = owner {
            if let Err(e) = self.notifier.notify_registration(&owner, &saved).await {
                warn!(user_id = actor, error = %e, "registration notification failed");
            }
        }
        Ok(saved)
    }

    /// The actor's history, newest first. `diff` defaults to true.
    pub fn history(&self, actor: IdentityId, diff: Option<bool>, event: Option<&str>) -> Vec<HistoryItem> {
        let entries = self.store.read(|t| t.history_for(actor, event));
        render_history(&entries, diff.unwrap_or(true))
    }

    pub fn registrations_for(&self, actor: IdentityId) -> Vec<Registration> {
        self.store.read(|t| t.registrations_for(actor))
    }

    pub fn list_all(&self, _proof: &Elevated, event: Option<&str>) -> Vec<RegistrationWithOwner> {
        self.store.read(|t| {
            t.registrations(event)
                .into_iter()
                .map(|r| {
                    let display_name = t.identity(r.user_id).map(|i| i.display_name.clone()).unwrap_or_default();
                    RegistrationWithOwner { registration: r, display_name }
                })
                .collect()
        })
    }
}
