//! WebWatch CLI
//!
//! Local execution entry point: runs the scheduler in the foreground and
//! manages users and sites in the storage directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;
use webwatch::{
    config,
    error::{AppError, Result},
    models::{Config, MonitoredSite, ScheduleSlots, User, UserId},
    pipeline::{RetentionPolicy, SiteChecker},
    scheduler::{CronSchedule, SchedulerService, normalize_expression},
    services::{ContentFetcher, Notifier, SmtpMailer, TelegramTransport},
    storage::{HistoryStore, LocalStorage},
    utils::{http, url::normalize_site_url},
};

/// WebWatch - Scheduled Web Page Change Monitor
#[derive(Parser, Debug)]
#[command(
    name = "webwatch",
    version,
    about = "Watches web pages and alerts on content changes"
)]
struct Cli {
    /// Path to storage directory containing config.toml and state.json
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Run,

    /// Check sites immediately
    Check(CheckArgs),

    /// Prune check history of every site
    Cleanup,

    /// List the triggers the scheduler would register
    Triggers,

    /// Validate configuration
    Validate,

    /// Manage monitored sites
    #[command(subcommand)]
    Site(SiteCommand),

    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct CheckArgs {
    /// Check one site by id
    #[arg(long)]
    site: Option<Uuid>,

    /// Check every site of a user
    #[arg(long)]
    user: Option<UserId>,

    /// Check every site through the global channels
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand, Debug)]
enum SiteCommand {
    /// Start monitoring a URL for a user
    Add {
        url: String,
        #[arg(long)]
        owner: UserId,
    },
    /// Stop monitoring a site and delete its history
    Remove { id: Uuid },
    /// List sites
    List {
        #[arg(long)]
        owner: Option<UserId>,
    },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Create or update a user
    Set(UserArgs),
    /// Show a user's settings and triggers
    Show { id: UserId },
}

#[derive(Args, Debug)]
struct UserArgs {
    id: UserId,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    bot_token: Option<String>,

    #[arg(long)]
    chat_id: Option<String>,

    /// Enable or disable email alerts
    #[arg(long)]
    email_alerts: Option<bool>,

    /// Address for email alerts (defaults to the account email)
    #[arg(long)]
    notify_email: Option<String>,

    /// Schedule slot as N=EXPR (N in 1-4); an empty EXPR clears the slot
    #[arg(long = "schedule", value_name = "N=EXPR")]
    schedules: Vec<String>,

    #[arg(long)]
    active: Option<bool>,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Wire the fetcher, notifier and store into a scheduler.
fn build_scheduler(config: &Config, store: Arc<LocalStorage>) -> Result<SchedulerService> {
    let fetcher = ContentFetcher::new(&config.fetcher)?;
    let api_client =
        http::create_api_client(Duration::from_secs(config.notifications.timeout_secs))?;
    let notifier = Notifier::new(
        Arc::new(TelegramTransport::new(api_client)),
        Arc::new(SmtpMailer::new()),
        &config.notifications,
    )?;
    let checker = SiteChecker::new(
        Arc::new(fetcher),
        store,
        notifier,
        RetentionPolicy::from(&config.retention),
    );
    SchedulerService::new(checker, config)
}

/// Parse `N=EXPR` into a zero-based slot and a normalized, valid expression.
fn parse_slot(raw: &str) -> Result<(usize, Option<String>)> {
    let (slot, expression) = raw
        .split_once('=')
        .ok_or_else(|| AppError::validation(format!("expected N=EXPR, got '{raw}'")))?;
    let slot: usize = slot
        .trim()
        .parse()
        .ok()
        .filter(|n| (1..=webwatch::models::SCHEDULE_SLOTS).contains(n))
        .ok_or_else(|| AppError::validation(format!("invalid schedule slot '{slot}'")))?;

    let expression = normalize_expression(expression);
    if expression.is_empty() {
        return Ok((slot - 1, None));
    }
    CronSchedule::parse(&expression)?;
    Ok((slot - 1, Some(expression)))
}

async fn set_user(store: &LocalStorage, args: UserArgs) -> Result<User> {
    let mut user = match store.get_user(args.id).await? {
        Some(user) => user,
        None => {
            let (Some(username), Some(email)) = (args.username.clone(), args.email.clone()) else {
                return Err(AppError::validation(
                    "new users need --username and --email",
                ));
            };
            User::new(args.id, username, email)
        }
    };

    if let Some(username) = args.username {
        user.username = username;
    }
    if let Some(email) = args.email {
        user.email = email;
    }
    if let Some(active) = args.active {
        user.is_active = active;
    }

    let settings = &mut user.settings;
    if let Some(token) = args.bot_token {
        settings.telegram_bot_token = Some(token).filter(|t| !t.trim().is_empty());
    }
    if let Some(chat_id) = args.chat_id {
        settings.telegram_chat_id = Some(chat_id).filter(|c| !c.trim().is_empty());
    }
    if let Some(enabled) = args.email_alerts {
        settings.email_notifications_enabled = enabled;
    }
    if let Some(address) = args.notify_email {
        settings.notification_email = Some(address).filter(|a| !a.trim().is_empty());
    }
    for raw in &args.schedules {
        let (slot, expression) = parse_slot(raw)?;
        settings.schedules.set(slot, expression);
    }

    store.upsert_user(user.clone()).await?;
    Ok(user)
}

fn print_site(site: &MonitoredSite) {
    let checked = site
        .last_checked
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{}  {:<8} user={:<6} checked={}  {}",
        site.id,
        site.status.as_str(),
        site.owner_id,
        checked,
        site.url
    );
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.storage_dir.join("config.toml");
    let level = Config::load(&config_path)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    log::info!("WebWatch starting...");

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config::load_all(&cli.storage_dir) {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!("✓ Config OK");
        return Ok(());
    }

    let config = config::load_all(&cli.storage_dir)?;
    log::info!("Loaded configuration from {}", cli.storage_dir.display());
    let store = Arc::new(LocalStorage::open(&cli.storage_dir).await?);

    match cli.command {
        Command::Run => {
            let scheduler = build_scheduler(&config, store.clone())?;
            scheduler.start().await?;

            // Pick up `user set` edits made by other processes
            let mut reload = tokio::time::interval(Duration::from_secs(
                config.scheduler.reload_interval_secs,
            ));
            reload.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            reload.tick().await;

            let interrupted = tokio::signal::ctrl_c();
            tokio::pin!(interrupted);
            loop {
                tokio::select! {
                    result = &mut interrupted => {
                        result?;
                        break;
                    }
                    _ = reload.tick() => match scheduler.sync_users().await {
                        Ok(0) => {}
                        Ok(n) => log::info!("Rescheduled {n} users after store changes"),
                        Err(e) => log::error!("Error reloading users: {e}"),
                    },
                }
            }
            log::info!("Interrupt received, shutting down...");
            scheduler.shutdown().await;
        }

        Command::Check(args) => {
            let scheduler = build_scheduler(&config, store.clone())?;
            if let Some(site_id) = args.site {
                let outcome = scheduler.check_site_now(site_id).await?;
                match &outcome.error {
                    Some(error) => log::error!("{}: {}", outcome.url, error),
                    None => log::info!(
                        "{}: {} (changed: {})",
                        outcome.url,
                        outcome.status.as_str(),
                        outcome.has_changed()
                    ),
                }
            } else if let Some(user_id) = args.user {
                scheduler.check_user_now(user_id).await?;
            } else if args.all {
                scheduler.check_all_now().await?;
            }
        }

        Command::Cleanup => {
            RetentionPolicy::from(&config.retention)
                .prune_all(store.clone())
                .await?;
        }

        Command::Triggers => {
            let scheduler = build_scheduler(&config, store.clone())?;
            scheduler.start().await?;
            // Let every trigger compute its first fire time
            tokio::time::sleep(Duration::from_millis(200)).await;

            let tz = config.scheduler.timezone()?;
            for info in scheduler.list_triggers() {
                let next = info
                    .next_fire
                    .map(|t| t.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<28} {:<18} {:<10} next={}",
                    info.id,
                    info.name,
                    info.expression,
                    info.state.as_str(),
                    next
                );
            }
            scheduler.shutdown().await;
        }

        Command::Validate => {}

        Command::Site(SiteCommand::Add { url, owner }) => {
            let url = normalize_site_url(&url)?;
            let site = store.insert_site(MonitoredSite::new(url, owner)).await?;
            log::info!("Monitoring {} for user {} (id {})", site.url, owner, site.id);
        }

        Command::Site(SiteCommand::Remove { id }) => {
            let removed = store.delete_site(id).await?;
            log::info!("Removed site {} and {} check records", id, removed);
        }

        Command::Site(SiteCommand::List { owner }) => {
            let sites = match owner {
                Some(owner) => store.list_sites_for_owner(owner).await?,
                None => store.list_sites().await?,
            };
            for site in &sites {
                print_site(site);
            }
            log::info!("{} sites", sites.len());
        }

        Command::User(UserCommand::Set(args)) => {
            let user = set_user(&store, args).await?;
            log::info!("Saved user {} ({})", user.username, user.id);
        }

        Command::User(UserCommand::Show { id }) => {
            let user = store
                .get_user(id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("user {id}")))?;
            let settings = &user.settings;
            println!("id:            {}", user.id);
            println!("username:      {}", user.username);
            println!("email:         {}", user.email);
            println!("active:        {}", user.is_active);
            println!("bot chat id:   {}", settings.telegram_chat_id.as_deref().unwrap_or("-"));
            println!("bot token set: {}", settings.telegram_bot_token.is_some());
            println!(
                "email alerts:  {} ({})",
                settings.email_notifications_enabled,
                user.notification_address().unwrap_or("-")
            );
            for slot in 0..webwatch::models::SCHEDULE_SLOTS {
                println!(
                    "{}:    {}",
                    ScheduleSlots::slot_name(slot),
                    settings.schedules.get(slot).unwrap_or("-")
                );
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
