//! History rendering: each snapshot shown in full, or only with the fields that changed
//! relative to the snapshot written just before it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{HistoryEntry, RegistrationFields};
use crate::identity::IdentityId;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_restrictions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FieldsView {
    pub fn full(f: &RegistrationFields) -> Self {
        FieldsView {
            arrival_date: Some(f.arrival_date),
            departure_date: Some(f.departure_date),
            food_restrictions: Some(f.food_restrictions.clone()),
            children_count: Some(f.children_count),
            cancelled: Some(f.cancelled),
            note: Some(f.note.clone()),
        }
    }

    /// Only the fields of `cur` that differ from `prev`.
    pub fn changed(cur: &RegistrationFields, prev: &RegistrationFields) -> Self {
        fn pick<T: PartialEq + Clone>(a: &T, b: &T) -> Option<T> {
            if a != b { Some(a.clone()) } else { None }
        }
        FieldsView {
            arrival_date: pick(&cur.arrival_date, &prev.arrival_date),
            departure_date: pick(&cur.departure_date, &prev.departure_date),
            food_restrictions: pick(&cur.food_restrictions, &prev.food_restrictions),
            children_count: pick(&cur.children_count, &prev.children_count),
            cancelled: pick(&cur.cancelled, &prev.cancelled),
            note: pick(&cur.note, &prev.note),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryItem {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub registration_id: u64,
    pub user_id: IdentityId,
    pub event: String,
    pub fields: FieldsView,
}

/// Render a newest-first history list. The predecessor of entry `i` is entry `i + 1`; the
/// last (oldest) entry has none and is always rendered in full.
pub fn render_history(entries: &[HistoryEntry], diff: bool) -> Vec<HistoryItem> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let fields = match entries.get(i + 1) {
                Some(prev) if diff => FieldsView::changed(&e.fields, &prev.fields),
                _ => FieldsView::full(&e.fields),
            };
            HistoryItem {
                id: e.id,
                created_at: e.created_at,
                registration_id: e.registration_id,
                user_id: e.user_id,
                event: e.event.clone(),
                fields,
            }
        })
        .collect()
}
