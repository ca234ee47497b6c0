//! Letter lifecycle with role-gated transitions.
//!
//! | actor    | create            | update                                   | delete |
//! |----------|-------------------|------------------------------------------|--------|
//! | admin    | for any requester | requester, type, status, reject reason   | yes    |
//! | reviewer | no                | status (accept/reject) and reject reason | no     |
//! | user     | for themselves    | no                                       | no     |
//!
//! Accepted and rejected are terminal: nobody moves a letter back to pending.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::accounts::{Account, Role};
use crate::auth::Identity;
use crate::error::ApiError;
use crate::letters::{
    CreateLetterInput, Letter, LetterPatch, LetterStatus, LetterType, LetterView, NewLetter,
};
use crate::notifications::{LetterEvent, NotificationRouter};
use crate::store::Database;

pub struct LetterWorkflow {
    store: Arc<dyn Database>,
    router: Arc<NotificationRouter>,
}

impl LetterWorkflow {
    pub fn new(store: Arc<dyn Database>, router: Arc<NotificationRouter>) -> Self {
        Self { store, router }
    }

    /// File a new letter. Starts `pending` and alerts reviewers.
    pub async fn create(
        &self,
        actor: Identity,
        input: CreateLetterInput,
    ) -> Result<LetterView, ApiError> {
        let requester_id = match actor.role {
            Role::Reviewer => {
                return Err(ApiError::Forbidden("Reviewers cannot create letters".into()));
            }
            Role::User => actor.account_id,
            Role::Admin => match input.user_id {
                Some(id) if id != 0 => id,
                _ => return Err(ApiError::Validation("user_id is required".into())),
            },
        };

        let user = self
            .store
            .get_account(requester_id)
            .await?
            .ok_or_else(|| ApiError::Validation(format!("User {requester_id} does not exist")))?;
        let letter_type = self.require_letter_type(input.type_id).await?;

        let letter = self
            .store
            .insert_letter(&NewLetter {
                user_id: user.id,
                type_id: letter_type.id,
            })
            .await?;
        info!(letter_id = letter.id, requester = user.id, "Letter created");

        let view = LetterView {
            letter,
            user,
            letter_type,
        };
        self.emit(LetterEvent::Created(view.clone()));
        Ok(view)
    }

    /// Users see their own letters; admins and reviewers see all.
    pub async fn list(&self, actor: Identity) -> Result<Vec<LetterView>, ApiError> {
        let letters = match actor.role {
            Role::User => self.store.list_letters_by_user(actor.account_id).await?,
            Role::Admin | Role::Reviewer => self.store.list_letters().await?,
        };

        let mut users: HashMap<i64, Account> = HashMap::new();
        let mut types: HashMap<i64, LetterType> = HashMap::new();
        let mut views = Vec::with_capacity(letters.len());

        for letter in letters {
            if !users.contains_key(&letter.user_id) {
                let user = self.require_account(letter.user_id).await?;
                users.insert(user.id, user);
            }
            if !types.contains_key(&letter.type_id) {
                let letter_type = self.require_letter_type(letter.type_id).await?;
                types.insert(letter_type.id, letter_type);
            }
            views.push(LetterView {
                user: users[&letter.user_id].clone(),
                letter_type: types[&letter.type_id].clone(),
                letter,
            });
        }
        Ok(views)
    }

    pub async fn get(&self, id: i64) -> Result<LetterView, ApiError> {
        let letter = self.require_letter(id).await?;
        self.resolve(letter).await
    }

    /// Apply a role-checked patch. A status change alerts the requester.
    pub async fn transition(
        &self,
        actor: Identity,
        id: i64,
        patch: LetterPatch,
    ) -> Result<LetterView, ApiError> {
        if actor.role == Role::User {
            return Err(users_cannot_update());
        }

        let mut letter = self.require_letter(id).await?;

        let status = match actor.role {
            Role::Reviewer => {
                // Missing status, then ownership, then the status value.
                if patch.status.as_deref().is_none_or(|s| s.trim().is_empty()) {
                    return Err(ApiError::Validation("Reviewers must provide a status".into()));
                }
                if patch.touches_ownership() {
                    return Err(ApiError::Forbidden(
                        "Reviewers cannot change the requester or letter type".into(),
                    ));
                }
                let status = parse_status(patch.status.as_deref())?
                    .ok_or_else(|| ApiError::Validation("Reviewers must provide a status".into()))?;
                if status == LetterStatus::Pending {
                    return Err(ApiError::Validation(
                        "Reviewers may only accept or reject a letter".into(),
                    ));
                }
                apply_status(&mut letter, status, patch.reject_reason)?;
                Some(status)
            }
            Role::Admin => {
                let status = parse_status(patch.status.as_deref())?;
                if status == Some(LetterStatus::Pending) && letter.status != LetterStatus::Pending {
                    return Err(ApiError::Validation(format!(
                        "A {} letter cannot go back to pending",
                        letter.status
                    )));
                }
                if let Some(user_id) = patch.user_id.filter(|&id| id != 0) {
                    self.store.get_account(user_id).await?.ok_or_else(|| {
                        ApiError::Validation(format!("User {user_id} does not exist"))
                    })?;
                    letter.user_id = user_id;
                }
                if let Some(type_id) = patch.type_id.filter(|&id| id != 0) {
                    self.store.get_letter_type(type_id).await?.ok_or_else(|| {
                        ApiError::Validation(format!("Letter type {type_id} does not exist"))
                    })?;
                    letter.type_id = type_id;
                }
                match status {
                    Some(status) => apply_status(&mut letter, status, patch.reject_reason)?,
                    // A lone reason only amends an already rejected letter.
                    None if letter.status == LetterStatus::Rejected => {
                        if let Some(reason) = patch.reject_reason.filter(|r| !r.trim().is_empty()) {
                            letter.reject_reason = reason.trim().to_string();
                        }
                    }
                    None => {}
                }
                status
            }
            Role::User => return Err(users_cannot_update()),
        };

        let letter = self.store.update_letter(&letter).await?;
        info!(letter_id = letter.id, status = %letter.status, actor = actor.account_id, "Letter updated");

        let view = self.resolve(letter).await?;
        if status.is_some() {
            self.emit(LetterEvent::StatusChanged(view.clone()));
        }
        Ok(view)
    }

    pub async fn delete(&self, actor: Identity, id: i64) -> Result<(), ApiError> {
        if actor.role != Role::Admin {
            return Err(ApiError::Forbidden("Only admins can delete letters".into()));
        }
        if !self.store.delete_letter(id).await? {
            return Err(ApiError::not_found("Letter", id));
        }
        info!(letter_id = id, "Letter deleted");
        Ok(())
    }

    /// Hand an event to the router on its own task.
    fn emit(&self, event: LetterEvent) {
        let router = self.router.clone();
        tokio::spawn(async move {
            let queued = router.notify(event).await;
            debug!(queued, "Letter event routed");
        });
    }

    async fn resolve(&self, letter: Letter) -> Result<LetterView, ApiError> {
        let user = self.require_account(letter.user_id).await?;
        let letter_type = self.require_letter_type(letter.type_id).await?;
        Ok(LetterView {
            letter,
            user,
            letter_type,
        })
    }

    async fn require_letter(&self, id: i64) -> Result<Letter, ApiError> {
        self.store
            .get_letter(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Letter", id))
    }

    async fn require_account(&self, id: i64) -> Result<Account, ApiError> {
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| ApiError::Internal(format!("letter references missing user {id}")))
    }

    async fn require_letter_type(&self, id: i64) -> Result<LetterType, ApiError> {
        self.store
            .get_letter_type(id)
            .await?
            .ok_or_else(|| ApiError::Validation(format!("Letter type {id} does not exist")))
    }
}

fn users_cannot_update() -> ApiError {
    ApiError::Forbidden("Users can only submit letters".into())
}

/// Empty or missing status means "no status change".
fn parse_status(raw: Option<&str>) -> Result<Option<LetterStatus>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(ApiError::Validation),
    }
}

fn apply_status(
    letter: &mut Letter,
    status: LetterStatus,
    reason: Option<String>,
) -> Result<(), ApiError> {
    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if status == LetterStatus::Rejected && reason.is_none() {
        return Err(ApiError::Validation(
            "reject_reason is required when rejecting a letter".into(),
        ));
    }
    letter.set_status(status, reason);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::NewAccount;
    use crate::channels::ChannelManager;
    use crate::config::DispatchConfig;
    use crate::notifications::Dispatcher;
    use crate::store::LibSqlBackend;

    struct Fixture {
        workflow: LetterWorkflow,
        store: Arc<dyn Database>,
        admin: Identity,
        reviewer: Identity,
        user: Identity,
        other_user: Identity,
        type_id: i64,
    }

    async fn account(store: &Arc<dyn Database>, role: Role, email: &str) -> Identity {
        let role_id = store.get_role_by_name(role).await.unwrap().unwrap().id;
        let account = store
            .create_account(&NewAccount {
                role_id,
                name: email.split('@').next().unwrap().to_string(),
                email: email.to_string(),
                password_hash: "x".into(),
            })
            .await
            .unwrap();
        Identity {
            account_id: account.id,
            role,
        }
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let (dispatcher, _h) = Dispatcher::spawn(ChannelManager::new(), &DispatchConfig::default());
        let router = Arc::new(NotificationRouter::new(store.clone(), dispatcher));
        let workflow = LetterWorkflow::new(store.clone(), router);

        let admin = account(&store, Role::Admin, "admin@example.com").await;
        let reviewer = account(&store, Role::Reviewer, "rev@example.com").await;
        let user = account(&store, Role::User, "alice@example.com").await;
        let other_user = account(&store, Role::User, "bob@example.com").await;
        let type_id = store
            .create_letter_type("Recommendation", "Letter of recommendation")
            .await
            .unwrap()
            .id;

        Fixture {
            workflow,
            store,
            admin,
            reviewer,
            user,
            other_user,
            type_id,
        }
    }

    fn create_input(user_id: Option<i64>, type_id: i64) -> CreateLetterInput {
        CreateLetterInput { user_id, type_id }
    }

    fn status_patch(status: &str, reason: Option<&str>) -> LetterPatch {
        LetterPatch {
            status: Some(status.into()),
            reject_reason: reason.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn user_creates_for_themselves() {
        let f = fixture().await;
        let view = f
            .workflow
            .create(f.user, create_input(Some(f.other_user.account_id), f.type_id))
            .await
            .unwrap();
        assert_eq!(view.letter.user_id, f.user.account_id);
        assert_eq!(view.letter.status, LetterStatus::Pending);
        assert_eq!(view.letter.reject_reason, "");
        assert_eq!(view.user.name, "alice");
        assert_eq!(view.letter_type.name, "Recommendation");
    }

    #[tokio::test]
    async fn reviewer_cannot_create() {
        let f = fixture().await;
        let err = f
            .workflow
            .create(f.reviewer, create_input(None, f.type_id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
        assert!(f.store.list_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_create_requires_existing_requester() {
        let f = fixture().await;
        for user_id in [None, Some(0), Some(9999)] {
            let err = f
                .workflow
                .create(f.admin, create_input(user_id, f.type_id))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "validation_error", "user_id {user_id:?}");
        }
        let view = f
            .workflow
            .create(f.admin, create_input(Some(f.other_user.account_id), f.type_id))
            .await
            .unwrap();
        assert_eq!(view.letter.user_id, f.other_user.account_id);
    }

    #[tokio::test]
    async fn unknown_letter_type_is_validation_error() {
        let f = fixture().await;
        let err = f
            .workflow
            .create(f.user, create_input(None, 4242))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn list_is_scoped_for_users() {
        let f = fixture().await;
        f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap();
        f.workflow.create(f.other_user, create_input(None, f.type_id)).await.unwrap();
        f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap();

        let mine = f.workflow.list(f.user).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|v| v.letter.user_id == f.user.account_id));
        assert!(mine[0].letter.id < mine[1].letter.id);

        assert_eq!(f.workflow.list(f.reviewer).await.unwrap().len(), 3);
        assert_eq!(f.workflow.list(f.admin).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reviewer_accepts_and_rejects() {
        let f = fixture().await;
        let id = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;

        let rejected = f
            .workflow
            .transition(f.reviewer, id, status_patch("rejected", Some("missing signature")))
            .await
            .unwrap();
        assert_eq!(rejected.letter.status, LetterStatus::Rejected);
        assert_eq!(rejected.letter.reject_reason, "missing signature");

        let accepted = f
            .workflow
            .transition(f.reviewer, id, status_patch("accepted", Some("ignored")))
            .await
            .unwrap();
        assert_eq!(accepted.letter.status, LetterStatus::Accepted);
        assert_eq!(accepted.letter.reject_reason, "");
    }

    #[tokio::test]
    async fn reviewer_rules() {
        let f = fixture().await;
        let id = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;

        let cases = [
            (LetterPatch::default(), "validation_error"),
            (status_patch("pending", None), "validation_error"),
            (status_patch("archived", None), "validation_error"),
            (status_patch("rejected", None), "validation_error"),
            (status_patch("rejected", Some("   ")), "validation_error"),
            (
                LetterPatch {
                    user_id: Some(f.other_user.account_id),
                    ..status_patch("accepted", None)
                },
                "forbidden",
            ),
            (
                LetterPatch {
                    type_id: Some(f.type_id),
                    ..status_patch("accepted", None)
                },
                "forbidden",
            ),
        ];
        for (patch, code) in cases {
            let err = f
                .workflow
                .transition(f.reviewer, id, patch.clone())
                .await
                .unwrap_err();
            assert_eq!(err.code(), code, "patch {patch:?}");
        }

        let unchanged = f.store.get_letter(id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, LetterStatus::Pending);

        // Zero ids mean "not provided".
        let ok = f
            .workflow
            .transition(
                f.reviewer,
                id,
                LetterPatch {
                    user_id: Some(0),
                    type_id: Some(0),
                    ..status_patch("accepted", None)
                },
            )
            .await
            .unwrap();
        assert_eq!(ok.letter.status, LetterStatus::Accepted);
    }

    #[tokio::test]
    async fn user_cannot_transition_even_missing_letters() {
        let f = fixture().await;
        let id = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;
        for target in [id, 9999] {
            let err = f
                .workflow
                .transition(f.user, target, status_patch("accepted", None))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "forbidden");
        }
    }

    #[tokio::test]
    async fn missing_letter_is_not_found_for_staff() {
        let f = fixture().await;
        for actor in [f.admin, f.reviewer] {
            let err = f
                .workflow
                .transition(actor, 9999, status_patch("accepted", None))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "not_found");
        }
        assert_eq!(f.workflow.get(9999).await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn admin_rewrites_any_field() {
        let f = fixture().await;
        let id = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;
        let other_type = f.store.create_letter_type("Transcript", "").await.unwrap().id;

        let view = f
            .workflow
            .transition(
                f.admin,
                id,
                LetterPatch {
                    user_id: Some(f.other_user.account_id),
                    type_id: Some(other_type),
                    ..status_patch("rejected", Some("wrong form"))
                },
            )
            .await
            .unwrap();
        assert_eq!(view.letter.user_id, f.other_user.account_id);
        assert_eq!(view.letter_type.name, "Transcript");
        assert_eq!(view.letter.reject_reason, "wrong form");

        let amended = f
            .workflow
            .transition(
                f.admin,
                id,
                LetterPatch {
                    reject_reason: Some("wrong form, use v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(amended.letter.status, LetterStatus::Rejected);
        assert_eq!(amended.letter.reject_reason, "wrong form, use v2");

    }

    #[tokio::test]
    async fn reviewed_letters_never_return_to_pending() {
        let f = fixture().await;
        let accepted = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;
        let rejected = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;
        f.workflow
            .transition(f.reviewer, accepted, status_patch("accepted", None))
            .await
            .unwrap();
        f.workflow
            .transition(f.reviewer, rejected, status_patch("rejected", Some("unsigned")))
            .await
            .unwrap();

        for (id, status) in [(accepted, LetterStatus::Accepted), (rejected, LetterStatus::Rejected)] {
            let err = f
                .workflow
                .transition(f.admin, id, status_patch("pending", None))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "validation_error");
            assert_eq!(f.store.get_letter(id).await.unwrap().unwrap().status, status);
        }
        let kept = f.store.get_letter(rejected).await.unwrap().unwrap();
        assert_eq!(kept.reject_reason, "unsigned");

        // A pending letter may be set to pending again.
        let fresh = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;
        let view = f
            .workflow
            .transition(f.admin, fresh, status_patch("pending", None))
            .await
            .unwrap();
        assert_eq!(view.letter.status, LetterStatus::Pending);
    }

    #[tokio::test]
    async fn reviewer_checks_status_presence_before_ownership() {
        let f = fixture().await;
        let id = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;

        let cases = [
            // No status at all: validation wins over the ownership change.
            (
                LetterPatch {
                    type_id: Some(f.type_id),
                    ..Default::default()
                },
                "validation_error",
            ),
            (
                LetterPatch {
                    user_id: Some(f.other_user.account_id),
                    ..status_patch("  ", None)
                },
                "validation_error",
            ),
            // A status is present: the ownership change is refused before the value is read.
            (
                LetterPatch {
                    type_id: Some(f.type_id),
                    ..status_patch("bogus", None)
                },
                "forbidden",
            ),
            (
                LetterPatch {
                    user_id: Some(f.other_user.account_id),
                    ..status_patch("pending", None)
                },
                "forbidden",
            ),
            (
                LetterPatch {
                    type_id: Some(f.type_id),
                    ..status_patch("rejected", None)
                },
                "forbidden",
            ),
        ];
        for (patch, code) in cases {
            let err = f
                .workflow
                .transition(f.reviewer, id, patch.clone())
                .await
                .unwrap_err();
            assert_eq!(err.code(), code, "patch {patch:?}");
        }
        let unchanged = f.store.get_letter(id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, LetterStatus::Pending);
    }

    #[tokio::test]
    async fn admin_references_must_exist() {
        let f = fixture().await;
        let id = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;
        for patch in [
            LetterPatch {
                user_id: Some(9999),
                ..Default::default()
            },
            LetterPatch {
                type_id: Some(9999),
                ..Default::default()
            },
        ] {
            let err = f.workflow.transition(f.admin, id, patch).await.unwrap_err();
            assert_eq!(err.code(), "validation_error");
        }
    }

    #[tokio::test]
    async fn only_admin_deletes() {
        let f = fixture().await;
        let id = f.workflow.create(f.user, create_input(None, f.type_id)).await.unwrap().letter.id;

        for actor in [f.user, f.reviewer] {
            assert_eq!(
                f.workflow.delete(actor, id).await.unwrap_err().code(),
                "forbidden"
            );
        }
        f.workflow.delete(f.admin, id).await.unwrap();
        assert_eq!(
            f.workflow.delete(f.admin, id).await.unwrap_err().code(),
            "not_found"
        );
    }
}
