//! # modpromote - Promote Users Out of Moderation
//!
//! Forums commonly hold posts from new members in a moderation queue. `modpromote`
//! watches approvals of those queued posts and, once a member has enough approved
//! comments and discussions, moves them from a moderated role into one that posts
//! freely.
//!
//! ## Features
//!
//! - **Two threshold modes**: separate comment/discussion minimums, or one combined post minimum.
//! - **Validated settings**: the rule is checked on save (conflicting thresholds, moderated target roles).
//! - **Idempotent promotion**: keyed on role membership, safe under concurrent approvals.
//! - **Notifications**: a forced `RolePromotion` activity for the promoted user and a
//!   confirmation for the approving moderator.
//! - **Pluggable host**: all forum access goes through the traits in [`store`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modpromote::events::{EventBus, RecordRestored, RecordType};
//! use modpromote::handler::{Collaborators, PromotionHandler};
//! use modpromote::roles::UserId;
//! use modpromote::storage::FileStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(FileStore::open("./data")?);
//!     let collab = Collaborators::from_backend(store);
//!     modpromote::settings::setup(&collab)?;
//!
//!     let mut bus = EventBus::new();
//!     bus.on_restore(Arc::new(PromotionHandler::new(collab)));
//!     bus.dispatch_restore(&RecordRestored::approved(RecordType::Comment, UserId(7)));
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`rule`] - The promotion rule, its persisted fields and activity counts
//! - [`validation`] - Settings validation
//! - [`evaluator`] - Pure promotion decision
//! - [`handler`] - Restore-event handler applying promotions
//! - [`settings`] - Settings page and install-time setup
//! - [`events`] - Typed moderation events and listener registry
//! - [`notify`] - Promotion notifications
//! - [`roles`] - Role ids, types and permissions
//! - [`store`] - Collaborator traits
//! - [`storage`] - File-backed and in-memory collaborators
//! - [`config`] - Binary configuration

pub mod config;
pub mod evaluator;
pub mod events;
pub mod handler;
pub mod notify;
pub mod roles;
pub mod rule;
pub mod settings;
pub mod storage;
pub mod store;
pub mod validation;
