use modpromote::events::{EventBus, LogOperation, RecordRestored, RecordType};
use modpromote::handler::{Collaborators, PromotionHandler, RestoreOutcome, SkipReason};
use modpromote::notify::{POPUP_PREFERENCE_KEY, ROLE_PROMOTION};
use modpromote::roles::{RoleId, UserId};
use modpromote::rule::{RuleCandidate, RuleField};
use modpromote::settings::{setup, Actor, SettingsPage};
use modpromote::storage::FileStore;
use modpromote::store::{ConfigStore, RoleStore};
use std::sync::{Arc, Barrier};
use std::thread;

// Default role table: 3 = Unconfirmed (moderated), 8 = Member.
fn open_forum(tmp: &tempfile::TempDir) -> (Arc<FileStore>, Collaborators) {
    let store = Arc::new(FileStore::open(tmp.path().join("data")).unwrap());
    let collab = Collaborators::from_backend(store.clone());
    setup(&collab).unwrap();
    (store, collab)
}

fn save_rule(collab: &Collaborators, min_comments: &str, min_posts: &str) {
    let page = SettingsPage::new(collab);
    let mut form = RuleCandidate::load(collab.settings.as_ref()).unwrap();
    form.set_field(RuleField::MinComments, min_comments);
    form.set_field(RuleField::MinDiscussions, "0");
    form.set_field(RuleField::MinPosts, min_posts);
    form.set_field(RuleField::FromRoleId, "3");
    let admin = Actor { user_id: UserId(1), can_manage_settings: true };
    page.submit(&admin, &form).unwrap();
}

#[test]
fn setup_prefills_target_role_and_popup() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, _collab) = open_forum(&tmp);
    assert_eq!(store.get(RuleField::ToRoleId.key()).unwrap().as_deref(), Some("8"));
    assert_eq!(store.get(POPUP_PREFERENCE_KEY).unwrap().as_deref(), Some("1"));
    assert!(store.activity_types().unwrap().contains_key(ROLE_PROMOTION));
}

#[test]
fn approval_promotes_and_persists_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, collab) = open_forum(&tmp);
    save_rule(&collab, "0", "3");
    store.register_user(UserId(20), "gil", [RoleId(3)]).unwrap();

    let mut bus = EventBus::new();
    bus.on_restore(Arc::new(PromotionHandler::new(collab)));

    let mut promoted = Vec::new();
    for record_type in [RecordType::Comment, RecordType::Discussion, RecordType::Comment] {
        store.record_post(record_type, UserId(20)).unwrap();
        for result in bus.dispatch_restore(&RecordRestored::approved(record_type, UserId(20))) {
            if let RestoreOutcome::Promoted(p) = result.unwrap() {
                promoted.push(p);
            }
        }
    }
    assert_eq!(promoted.len(), 1);
    assert_eq!(
        promoted[0].message,
        "gil has been promoted and their posts will no longer need moderation"
    );

    let reopened = FileStore::open(store.base_dir()).unwrap();
    let roles = reopened.get_roles(UserId(20)).unwrap();
    assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![RoleId(8)]);
    let activities = reopened.activities().unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].activity_type, ROLE_PROMOTION);
    assert!(activities[0].popup);
    assert_eq!(reopened.role_audit().unwrap().len(), 1);
}

#[test]
fn spam_restores_do_not_count_as_approval() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, collab) = open_forum(&tmp);
    save_rule(&collab, "1", "0");
    store.register_user(UserId(21), "hal", [RoleId(3)]).unwrap();
    store.record_post(RecordType::Comment, UserId(21)).unwrap();

    let handler = PromotionHandler::new(collab);
    let event = RecordRestored {
        operation: LogOperation::Spam,
        record_type: RecordType::Comment,
        user_id: UserId(21),
    };
    assert_eq!(
        handler.handle(&event).unwrap(),
        RestoreOutcome::Skipped(SkipReason::NotAPendingPost)
    );
    assert!(store.get_roles(UserId(21)).unwrap().contains(&RoleId(3)));
}

#[test]
fn unknown_author_reports_fetch_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, collab) = open_forum(&tmp);
    save_rule(&collab, "1", "0");
    store.record_post(RecordType::Comment, UserId(404)).unwrap();

    let handler = PromotionHandler::new(collab);
    let err = handler
        .handle(&RecordRestored::approved(RecordType::Comment, UserId(404)))
        .unwrap_err();
    assert!(matches!(err, modpromote::handler::PromotionError::Fetch { .. }));
    assert!(store.activities().unwrap().is_empty());
}

#[test]
fn concurrent_approvals_promote_exactly_once() {
    const THREADS: usize = 8;
    let tmp = tempfile::tempdir().unwrap();
    let (store, collab) = open_forum(&tmp);
    save_rule(&collab, "1", "0");
    store.register_user(UserId(30), "ivy", [RoleId(3)]).unwrap();
    store.record_post(RecordType::Comment, UserId(30)).unwrap();

    let handler = Arc::new(PromotionHandler::new(collab));
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let handler = handler.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                handler
                    .handle(&RecordRestored::approved(RecordType::Comment, UserId(30)))
                    .unwrap()
            })
        })
        .collect();

    let promotions = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|o| matches!(o, RestoreOutcome::Promoted(_)))
        .count();
    assert_eq!(promotions, 1);
    assert_eq!(store.activities().unwrap().len(), 1);
    assert_eq!(store.role_audit().unwrap().len(), 1);
}

#[test]
fn independent_stores_on_one_directory_promote_each_user_once() {
    const USERS: u32 = 20;
    let tmp = tempfile::tempdir().unwrap();
    let (store, collab) = open_forum(&tmp);
    save_rule(&collab, "1", "0");
    for id in 100..100 + USERS {
        store.register_user(UserId(id), &format!("user{}", id), [RoleId(3)]).unwrap();
        store.record_post(RecordType::Comment, UserId(id)).unwrap();
    }

    // Each worker stands in for a separate process: its own store handle and handler
    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let dir = store.base_dir().to_path_buf();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let own = Arc::new(FileStore::open(dir).unwrap());
                let handler = PromotionHandler::new(Collaborators::from_backend(own));
                barrier.wait();
                (100..100 + USERS)
                    .map(|id| {
                        handler
                            .handle(&RecordRestored::approved(RecordType::Comment, UserId(id)))
                            .unwrap()
                    })
                    .filter(|o| matches!(o, RestoreOutcome::Promoted(_)))
                    .count()
            })
        })
        .collect();

    let promotions: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert_eq!(promotions, USERS as usize);
    assert_eq!(store.activities().unwrap().len(), USERS as usize);
    assert_eq!(store.role_audit().unwrap().len(), USERS as usize);
    for id in 100..100 + USERS {
        assert_eq!(
            store.get_roles(UserId(id)).unwrap().into_iter().collect::<Vec<_>>(),
            vec![RoleId(8)]
        );
    }
}
