//! Turns letter workflow events into dispatch units.

use std::sync::Arc;

use crate::accounts::Role;
use crate::error::DatabaseError;
use crate::letters::{LetterStatus, LetterView};
use crate::notifications::{DispatchUnit, Dispatcher, NotificationPreference};
use crate::store::Database;

/// Workflow events that produce notifications.
#[derive(Debug, Clone)]
pub enum LetterEvent {
    /// A new letter was filed; reviewers are told.
    Created(LetterView),
    /// A letter's status changed; its requester is told.
    StatusChanged(LetterView),
}

pub struct NotificationRouter {
    store: Arc<dyn Database>,
    dispatcher: Dispatcher,
}

impl NotificationRouter {
    pub fn new(store: Arc<dyn Database>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Resolve recipients and queue one unit per enabled channel.
    ///
    /// Never waits on delivery and never fails the caller. Returns how many
    /// units were queued.
    pub async fn notify(&self, event: LetterEvent) -> usize {
        let units = match self.plan(&event).await {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!(error = %e, "Could not resolve notification recipients");
                return 0;
            }
        };

        let planned = units.len();
        let queued = units
            .into_iter()
            .filter(|unit| self.dispatcher.submit(unit.clone()))
            .count();
        tracing::debug!(planned, queued, "Notifications queued");
        queued
    }

    /// Recipients and message text for an event.
    pub async fn plan(&self, event: &LetterEvent) -> Result<Vec<DispatchUnit>, DatabaseError> {
        match event {
            LetterEvent::Created(view) => {
                let text = created_message(&view.user.name, &view.letter_type.name);
                let reviewers = self.store.list_preferences_by_role(Role::Reviewer).await?;
                Ok(reviewers
                    .iter()
                    .flat_map(|pref| units_for(pref, &text))
                    .collect())
            }
            LetterEvent::StatusChanged(view) => {
                let Some(pref) = self
                    .store
                    .get_preference_for_user(view.letter.user_id)
                    .await?
                else {
                    return Ok(Vec::new());
                };
                let text = status_message(
                    &view.letter_type.name,
                    view.letter.status,
                    &view.letter.reject_reason,
                );
                Ok(units_for(&pref, &text))
            }
        }
    }
}

fn units_for(pref: &NotificationPreference, text: &str) -> Vec<DispatchUnit> {
    pref.enabled_destinations()
        .into_iter()
        .map(|(channel, destination)| DispatchUnit {
            recipient_id: pref.user_id,
            channel,
            destination: destination.to_string(),
            text: text.to_string(),
        })
        .collect()
}

pub fn created_message(requester: &str, letter_type: &str) -> String {
    format!(
        "📩 New letter request from *{requester}* for letter type *{letter_type}* (status: pending)."
    )
}

pub fn status_message(letter_type: &str, status: LetterStatus, reject_reason: &str) -> String {
    let mut text = format!("📢 Your letter ({letter_type}) is now: *{status}*.");
    if status == LetterStatus::Rejected && !reject_reason.trim().is_empty() {
        text.push_str("\nReason: ");
        text.push_str(reject_reason.trim());
    }
    text
}
