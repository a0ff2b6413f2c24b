use modpromote::evaluator::NoActionReason;
use modpromote::events::{RecordRestored, RecordType};
use modpromote::handler::{Collaborators, PromotionHandler, RestoreOutcome, SkipReason};
use modpromote::roles::{Role, RoleId, RolePermissions, RoleType, UserId};
use modpromote::rule::RuleCandidate;
use modpromote::settings::{Actor, SettingsError, SettingsPage};
use modpromote::storage::MemoryStore;
use modpromote::store::{ConfigStore, RoleStore};
use modpromote::validation::ValidationError;
use std::sync::Arc;

// Roles 3 and 4 mirror a forum where 3 is moderated and 4 posts freely.
fn roles() -> Vec<Role> {
    let role = |id, name: &str, role_type, requires_approval| Role {
        id: RoleId(id),
        name: name.into(),
        role_type,
        permissions: RolePermissions { requires_approval, manage_settings: false },
    };
    vec![
        role(3, "Applicant", RoleType::Applicant, true),
        role(4, "Member", RoleType::Member, false),
        role(5, "Probation", RoleType::Member, true),
        role(16, "Administrator", RoleType::Administrator, false),
    ]
}

struct Forum {
    store: Arc<MemoryStore>,
    page: SettingsPage,
    handler: PromotionHandler,
}

fn forum() -> Forum {
    let store = Arc::new(MemoryStore::with_roles(roles()));
    let collab = Collaborators::from_backend(store.clone());
    Forum {
        store,
        page: SettingsPage::new(&collab),
        handler: PromotionHandler::new(collab),
    }
}

fn admin() -> Actor {
    Actor { user_id: UserId(1), can_manage_settings: true }
}

fn rule_form(c: u32, d: u32, p: u32, from: u32, to: u32) -> RuleCandidate {
    RuleCandidate {
        min_comments: Some(c.to_string()),
        min_discussions: Some(d.to_string()),
        min_posts: Some(p.to_string()),
        from_role: Some(from.to_string()),
        to_role: Some(to.to_string()),
    }
}

fn seed_posts(store: &MemoryStore, user: UserId, comments: usize, discussions: usize) {
    for _ in 0..comments {
        store.add_record(RecordType::Comment, user);
    }
    for _ in 0..discussions {
        store.add_record(RecordType::Discussion, user);
    }
}

fn approve(forum: &Forum, user: UserId) -> RestoreOutcome {
    forum
        .handler
        .handle(&RecordRestored::approved(RecordType::Comment, user))
        .unwrap()
}

#[test]
fn scenario_a_separate_counts_promote() {
    let f = forum();
    f.page.submit(&admin(), &rule_form(5, 0, 0, 3, 4)).unwrap();
    f.store.add_user(UserId(10), "ana", [RoleId(3)]);
    seed_posts(&f.store, UserId(10), 5, 0);

    match approve(&f, UserId(10)) {
        RestoreOutcome::Promoted(p) => {
            assert_eq!(p.removed_role, RoleId(3));
            assert_eq!(p.added_role, RoleId(4));
        }
        other => panic!("expected promotion, got {:?}", other),
    }
    let roles = f.store.get_roles(UserId(10)).unwrap();
    assert!(roles.contains(&RoleId(4)));
    assert!(!roles.contains(&RoleId(3)));
}

#[test]
fn scenario_b_combined_count_one_short() {
    let f = forum();
    f.page.submit(&admin(), &rule_form(0, 0, 10, 3, 4)).unwrap();
    f.store.add_user(UserId(11), "ben", [RoleId(3)]);
    seed_posts(&f.store, UserId(11), 4, 5);

    assert_eq!(
        approve(&f, UserId(11)),
        RestoreOutcome::Skipped(SkipReason::Evaluation(NoActionReason::BelowThreshold))
    );
    assert!(f.store.get_roles(UserId(11)).unwrap().contains(&RoleId(3)));
    assert!(f.store.delivered().is_empty());
}

#[test]
fn scenario_c_combined_count_reached() {
    let f = forum();
    f.page.submit(&admin(), &rule_form(0, 0, 10, 3, 4)).unwrap();
    f.store.add_user(UserId(12), "cleo", [RoleId(3)]);
    seed_posts(&f.store, UserId(12), 4, 6);

    assert!(matches!(approve(&f, UserId(12)), RestoreOutcome::Promoted(_)));
    let delivered = f.store.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].notify_user_id, UserId(12));
}

#[test]
fn scenario_d_user_without_source_role() {
    let f = forum();
    f.page.submit(&admin(), &rule_form(5, 0, 0, 3, 4)).unwrap();
    f.store.add_user(UserId(13), "dov", [RoleId(4)]);
    seed_posts(&f.store, UserId(13), 20, 20);

    assert_eq!(
        approve(&f, UserId(13)),
        RestoreOutcome::Skipped(SkipReason::Evaluation(NoActionReason::MissingSourceRole))
    );
}

#[test]
fn scenario_e_moderated_target_role_is_rejected() {
    let f = forum();
    let err = f.page.submit(&admin(), &rule_form(5, 0, 0, 3, 5)).unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Invalid(ValidationError::TargetRoleRequiresModeration { role: RoleId(5) })
    ));
    assert_eq!(f.store.get("promotion.to_role_id").unwrap(), None);
}

#[test]
fn posts_with_separate_counts_are_rejected() {
    let f = forum();
    for (c, d) in [(1, 0), (0, 1), (3, 3)] {
        let err = f.page.submit(&admin(), &rule_form(c, d, 7, 3, 4)).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(ValidationError::ConflictingThresholds)));
    }
}

#[test]
fn second_approval_after_promotion_does_nothing() {
    let f = forum();
    f.page.submit(&admin(), &rule_form(2, 1, 0, 3, 4)).unwrap();
    f.store.add_user(UserId(14), "eve", [RoleId(3), RoleId(5)]);
    seed_posts(&f.store, UserId(14), 2, 1);

    assert!(matches!(approve(&f, UserId(14)), RestoreOutcome::Promoted(_)));
    assert_eq!(
        approve(&f, UserId(14)),
        RestoreOutcome::Skipped(SkipReason::Evaluation(NoActionReason::MissingSourceRole))
    );
    let roles = f.store.get_roles(UserId(14)).unwrap();
    // unrelated roles survive the swap
    assert!(roles.contains(&RoleId(5)));
    assert_eq!(f.store.delivered().len(), 1);
}

#[test]
fn separate_counts_need_every_minimum() {
    let f = forum();
    f.page.submit(&admin(), &rule_form(2, 2, 0, 3, 4)).unwrap();
    f.store.add_user(UserId(15), "finn", [RoleId(3)]);
    seed_posts(&f.store, UserId(15), 10, 1);
    assert!(matches!(approve(&f, UserId(15)), RestoreOutcome::Skipped(_)));

    f.store.add_record(RecordType::Discussion, UserId(15));
    assert!(matches!(approve(&f, UserId(15)), RestoreOutcome::Promoted(_)));
}

#[test]
fn same_source_and_target_role_is_rejected() {
    let f = forum();
    let err = f.page.submit(&admin(), &rule_form(1, 0, 0, 4, 4)).unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Invalid(ValidationError::SameRole { role: RoleId(4) })
    ));

    // Even if such a rule were stored directly, approvals must not re-promote
    f.store.set_many(&[
        ("promotion.min_comments", "1".to_string()),
        ("promotion.min_discussions", "0".to_string()),
        ("promotion.min_posts", "0".to_string()),
        ("promotion.from_role_id", "4".to_string()),
        ("promotion.to_role_id", "4".to_string()),
    ])
    .unwrap();
    f.store.add_user(UserId(16), "gus", [RoleId(4)]);
    seed_posts(&f.store, UserId(16), 3, 0);
    for _ in 0..3 {
        assert_eq!(
            approve(&f, UserId(16)),
            RestoreOutcome::Skipped(SkipReason::Evaluation(NoActionReason::RuleInactive))
        );
    }
    assert!(f.store.delivered().is_empty());
}

#[test]
fn administrator_role_cannot_be_a_promotion_target() {
    let f = forum();
    let err = f.page.submit(&admin(), &rule_form(5, 0, 0, 3, 16)).unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Invalid(ValidationError::PrivilegedRole { role: RoleId(16), .. })
    ));
    assert_eq!(f.store.get("promotion.to_role_id").unwrap(), None);
}
