//! Promotion settings page and install-time setup.
//!
//! The page shows the current rule and the roles an administrator may choose from, and
//! accepts a submission of the five rule fields. A submission is validated in full before
//! anything is written; on success all five values are stored in one write.
use log::info;
use std::sync::Arc;
use thiserror::Error;

use crate::handler::Collaborators;
use crate::notify::{ActivityTypeOptions, POPUP_PREFERENCE_KEY, ROLE_PROMOTION};
use crate::roles::{default_member_role, selectable_roles, Role, RoleSet, UserId};
use crate::rule::{PromotionRule, RuleCandidate, RuleField};
use crate::store::{ConfigStore, NotificationQueue, RolePermissionLookup, StoreError};
use crate::validation::{validate, ValidationError};

pub const PAGE_TITLE: &str = "Promotion Rule";
pub const SAVED_MESSAGE: &str = "Your settings have been saved.";

/// Whoever is looking at or submitting the settings page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub can_manage_settings: bool,
}

impl Actor {
    /// An actor may manage settings if any of their roles grants it.
    pub fn from_roles(
        user_id: UserId,
        roles: &RoleSet,
        lookup: &dyn RolePermissionLookup,
    ) -> Result<Actor, StoreError> {
        let mut can_manage_settings = false;
        for role in roles {
            match lookup.get_permissions(*role) {
                Ok(p) if p.manage_settings => {
                    can_manage_settings = true;
                    break;
                }
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Actor {
            user_id,
            can_manage_settings,
        })
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("You don't have permission to manage settings")]
    PermissionDenied,

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("settings could not be saved: {0}")]
    Persistence(#[source] StoreError),
}

/// Data needed to draw the settings page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsView {
    pub title: &'static str,
    pub values: RuleCandidate,
    pub available_roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSaved {
    pub rule: PromotionRule,
    pub message: &'static str,
}

pub struct SettingsPage {
    settings: Arc<dyn ConfigStore>,
    permissions: Arc<dyn RolePermissionLookup>,
}

impl SettingsPage {
    pub fn new(collab: &Collaborators) -> Self {
        SettingsPage {
            settings: collab.settings.clone(),
            permissions: collab.permissions.clone(),
        }
    }

    /// The page as shown before anything is posted, pre-filled with stored values.
    pub fn render(&self, actor: &Actor) -> Result<SettingsView, SettingsError> {
        if !actor.can_manage_settings {
            return Err(SettingsError::PermissionDenied);
        }
        let roles = self
            .permissions
            .list_roles()
            .map_err(SettingsError::Persistence)?;
        let values = RuleCandidate::load(self.settings.as_ref()).map_err(SettingsError::Persistence)?;
        Ok(SettingsView {
            title: PAGE_TITLE,
            values,
            available_roles: selectable_roles(&roles),
        })
    }

    /// Validate and store a submitted rule. Nothing is written unless every check passes.
    pub fn submit(
        &self,
        actor: &Actor,
        candidate: &RuleCandidate,
    ) -> Result<SettingsSaved, SettingsError> {
        if !actor.can_manage_settings {
            return Err(SettingsError::PermissionDenied);
        }
        let rule = validate(candidate, self.permissions.as_ref())?;
        self.settings
            .set_many(&rule.to_entries())
            .map_err(SettingsError::Persistence)?;
        info!(
            target: "security",
            "User {} saved promotion rule: comments>={} discussions>={} posts>={} role {} -> {}",
            actor.user_id,
            rule.min_comments,
            rule.min_discussions,
            rule.min_posts,
            rule.from_role,
            rule.to_role
        );
        Ok(SettingsSaved {
            rule,
            message: SAVED_MESSAGE,
        })
    }
}

/// Install-time defaults: target role, popup preference and the activity type.
///
/// Existing values are left alone, so running setup again is harmless.
pub fn setup(collab: &Collaborators) -> Result<(), StoreError> {
    let settings = collab.settings.as_ref();
    if settings.get(RuleField::ToRoleId.key())?.is_none() {
        let roles = collab.permissions.list_roles()?;
        if let Some(member) = default_member_role(&roles) {
            settings.set(RuleField::ToRoleId.key(), &member.to_string())?;
        }
    }
    if settings.get(POPUP_PREFERENCE_KEY)?.is_none() {
        settings.set(POPUP_PREFERENCE_KEY, "1")?;
    }
    let notifications: &dyn NotificationQueue = collab.notifications.as_ref();
    notifications.define_type(
        ROLE_PROMOTION,
        ActivityTypeOptions {
            notify: true,
            public: false,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{default_roles, RoleId};
    use crate::storage::MemoryStore;

    fn page() -> (Arc<MemoryStore>, Collaborators, SettingsPage) {
        let store = Arc::new(MemoryStore::with_roles(default_roles()));
        let collab = Collaborators::from_backend(store.clone());
        let page = SettingsPage::new(&collab);
        (store, collab, page)
    }

    fn admin() -> Actor {
        Actor { user_id: UserId(1), can_manage_settings: true }
    }

    fn form(c: &str, d: &str, p: &str, from: &str, to: &str) -> RuleCandidate {
        RuleCandidate::from_pairs([
            ("promotion.min_comments", c),
            ("promotion.min_discussions", d),
            ("promotion.min_posts", p),
            ("promotion.from_role_id", from),
            ("promotion.to_role_id", to),
        ])
    }

    #[test]
    fn render_requires_permission_and_hides_privileged_roles() {
        let (_store, _collab, page) = page();
        let visitor = Actor { user_id: UserId(2), can_manage_settings: false };
        assert!(matches!(page.render(&visitor), Err(SettingsError::PermissionDenied)));

        let view = page.render(&admin()).unwrap();
        assert_eq!(view.title, PAGE_TITLE);
        assert!(view.available_roles.iter().all(|r| !r.role_type.is_privileged()));
    }

    #[test]
    fn submit_saves_all_fields() {
        let (store, _collab, page) = page();
        let saved = page.submit(&admin(), &form("5", "0", "0", "3", "8")).unwrap();
        assert_eq!(saved.message, SAVED_MESSAGE);
        assert_eq!(PromotionRule::load(&*store).unwrap(), Some(saved.rule));
        let view = page.render(&admin()).unwrap();
        assert_eq!(view.values.field(RuleField::MinComments), Some("5"));
    }

    #[test]
    fn rejected_submission_saves_nothing() {
        let (store, _collab, page) = page();
        let err = page.submit(&admin(), &form("5", "0", "0", "3", "4")).unwrap_err();
        match err {
            SettingsError::Invalid(ValidationError::TargetRoleRequiresModeration { role }) => {
                assert_eq!(role, RoleId(4))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.get(RuleField::MinComments.key()).unwrap(), None);
    }

    #[test]
    fn actor_permissions_come_from_roles() {
        let (store, _collab, _page) = page();
        let admin_roles: RoleSet = [RoleId(16)].into_iter().collect();
        let member_roles: RoleSet = [RoleId(8), RoleId(999)].into_iter().collect();
        assert!(Actor::from_roles(UserId(1), &admin_roles, &*store).unwrap().can_manage_settings);
        assert!(!Actor::from_roles(UserId(2), &member_roles, &*store).unwrap().can_manage_settings);
    }

    #[test]
    fn setup_fills_defaults_once() {
        let (store, collab, _page) = page();
        setup(&collab).unwrap();
        assert_eq!(store.get(RuleField::ToRoleId.key()).unwrap().as_deref(), Some("8"));
        assert_eq!(store.get(POPUP_PREFERENCE_KEY).unwrap().as_deref(), Some("1"));
        assert_eq!(
            store.activity_type(ROLE_PROMOTION),
            Some(ActivityTypeOptions { notify: true, public: false })
        );

        store.set(RuleField::ToRoleId.key(), "2").unwrap();
        setup(&collab).unwrap();
        assert_eq!(store.get(RuleField::ToRoleId.key()).unwrap().as_deref(), Some("2"));
    }
}
