//! Binary entrypoint for the modpromote CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml`, the data directory and install defaults
//! - `settings show` / `settings set ...` - view or submit the promotion rule
//! - `user add` / `user show` - manage forum users in the data directory
//! - `approve --user <id> --record-type comment|discussion` - approve a queued post and
//!   run the promotion handler for its author
//! - `status` - print the active rule and a brief summary
//!
//! See the library crate docs for module-level details: `modpromote::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;

use modpromote::config::Config;
use modpromote::events::{EventBus, RecordRestored, RecordType};
use modpromote::handler::{Collaborators, PromotionHandler, RestoreOutcome};
use modpromote::roles::{RoleId, UserId};
use modpromote::rule::{PromotionRule, RuleCandidate, RuleField};
use modpromote::settings::{setup, Actor, SettingsError, SettingsPage};
use modpromote::storage::FileStore;
use modpromote::store::{RoleStore, RolePermissionLookup};

#[derive(Parser)]
#[command(name = "modpromote")]
#[command(about = "Promote forum users out of moderation after enough approved posts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration and initialize the data directory
    Init,
    /// View or change the promotion rule
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Manage forum users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Approve a queued post and evaluate its author for promotion
    Approve {
        /// Author of the post
        #[arg(short, long)]
        user: u32,
        /// comment or discussion
        #[arg(short, long, default_value = "comment")]
        record_type: RecordType,
    },
    /// Show the active rule and data summary
    Status,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the stored rule and the selectable roles
    Show,
    /// Submit a new rule (all five values are required)
    Set {
        #[arg(long)]
        min_comments: Option<String>,
        #[arg(long)]
        min_discussions: Option<String>,
        #[arg(long)]
        min_posts: Option<String>,
        #[arg(long)]
        from_role: Option<String>,
        #[arg(long)]
        to_role: Option<String>,
        /// Act as this user instead of the local operator; their roles must allow managing settings
        #[arg(long)]
        actor: Option<u32>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create or overwrite a user
    Add {
        #[arg(long)]
        id: u32,
        #[arg(long)]
        name: String,
        /// Role id (repeatable)
        #[arg(long = "role")]
        roles: Vec<u32>,
    },
    /// Show a user's roles and approved post counts
    Show {
        #[arg(long)]
        id: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        if Path::new(&cli.config).exists() {
            info!("Keeping existing configuration at {}", cli.config);
        } else {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        let config = Config::load(&cli.config).await?;
        let store = open_store(&config)?;
        setup(&Collaborators::from_backend(store))?;
        info!("Initialized data directory {}", config.storage.data_dir);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    let store = open_store(&config)?;
    let collab = Collaborators::from_backend(store.clone());

    match cli.command {
        // handled before logging was configured
        Commands::Init => {}
        Commands::Settings { action } => {
            let page = SettingsPage::new(&collab);
            match action {
                SettingsAction::Show => {
                    let view = page.render(&operator())?;
                    println!("{}", view.title);
                    for field in RuleField::VALIDATION_ORDER {
                        println!(
                            "  {:<18} {}",
                            field.label(),
                            view.values.field(field).unwrap_or("(unset)")
                        );
                    }
                    println!("Selectable roles:");
                    for role in view.available_roles {
                        println!("  {:>4}  {}", role.id, role.name);
                    }
                }
                SettingsAction::Set {
                    min_comments,
                    min_discussions,
                    min_posts,
                    from_role,
                    to_role,
                    actor,
                } => {
                    let actor = match actor {
                        Some(id) => {
                            let id = UserId(id);
                            let roles = store.get_roles(id).with_context(|| format!("user {}", id))?;
                            Actor::from_roles(id, &roles, &*store)?
                        }
                        None => operator(),
                    };
                    let candidate = RuleCandidate {
                        min_comments,
                        min_discussions,
                        min_posts,
                        from_role,
                        to_role,
                    };
                    match page.submit(&actor, &candidate) {
                        Ok(saved) => println!("{}", saved.message),
                        Err(SettingsError::Invalid(e)) => {
                            let field = e.field().map(|f| f.label()).unwrap_or("form");
                            eprintln!("{}: {}", field, e);
                            std::process::exit(2);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Commands::User { action } => match action {
            UserAction::Add { id, name, roles } => {
                let user = store.register_user(UserId(id), &name, roles.into_iter().map(RoleId))?;
                println!("Saved user {} ({})", user.id, user.name);
            }
            UserAction::Show { id } => {
                let id = UserId(id);
                let user = store
                    .get_user(id)?
                    .with_context(|| format!("user {} not found", id))?;
                let roles: Vec<String> = user.roles.iter().map(|r| r.to_string()).collect();
                println!("{} ({})", user.name, user.id);
                println!("  roles:       {}", roles.join(", "));
                println!("  comments:    {}", collab.counter.count(RecordType::Comment, id)?);
                println!("  discussions: {}", collab.counter.count(RecordType::Discussion, id)?);
            }
        },
        Commands::Approve { user, record_type } => {
            let user_id = UserId(user);
            if store.get_user(user_id)?.is_none() {
                warn!("Approving post for unknown user {}", user_id);
            }
            store.record_post(record_type, user_id)?;
            info!("Approved {} by user {}", record_type, user_id);

            let mut bus = EventBus::new();
            bus.on_restore(Arc::new(PromotionHandler::new(collab)));
            for result in bus.dispatch_restore(&RecordRestored::approved(record_type, user_id)) {
                match result {
                    Ok(RestoreOutcome::Promoted(p)) => println!("{}", p.message),
                    Ok(RestoreOutcome::Skipped(reason)) => {
                        debug!("No promotion for user {}: {:?}", user_id, reason)
                    }
                    Err(e) => {
                        error!("{}", e);
                        if let Some(p) = e.promotion() {
                            println!("{}", p.message);
                        }
                        eprintln!("{}", e.user_message());
                    }
                }
            }
        }
        Commands::Status => {
            println!("Forum: {}", config.forum.name);
            println!("Data directory: {}", store.base_dir().display());
            match PromotionRule::load(collab.settings.as_ref())? {
                Some(rule) if rule.is_active() => println!(
                    "Rule: comments>={} discussions>={} posts>={}, role {} -> {}",
                    rule.min_comments, rule.min_discussions, rule.min_posts, rule.from_role, rule.to_role
                ),
                Some(_) => println!("Rule: inactive"),
                None => println!("Rule: not configured"),
            }
            println!("Roles: {}", store.list_roles()?.len());
            println!("Users: {}", store.list_users()?.len());
            println!("Promotions notified: {}", store.activities()?.len());
        }
    }

    Ok(())
}

/// The local operator running the CLI has full settings access.
fn operator() -> Actor {
    Actor {
        user_id: UserId(0),
        can_manage_settings: true,
    }
}

fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    let store = FileStore::open(&config.storage.data_dir)
        .with_context(|| format!("Failed to open data directory {}", config.storage.data_dir))?;
    Ok(Arc::new(store))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match (verbosity, config) {
        (0, Some(cfg)) => cfg.logging.level_filter(),
        (0, None) => log::LevelFilter::Info,
        (1, _) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    let security_path = config.as_ref().and_then(|cfg| cfg.logging.security_file.clone());

    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Echo to the console only when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
