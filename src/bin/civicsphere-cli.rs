//! CivicSphere CLI
//!
//! Non-interactive client for the SDK: signs in, runs one command and exits.
//! `watch` keeps live views mounted and prints every change it receives.
//! Without SUPABASE_URL / SUPABASE_ANON_KEY it runs against the local
//! SQLite store.

use anyhow::{Context, Result};
use civicsphere_sdk_core::sphere::action::{ActionType, ClimateAction, NewClimateAction};
use civicsphere_sdk_core::sphere::chat::{Composer, Message, Scope, COMMUNITY_ROOM};
use civicsphere_sdk_core::sphere::community::{search_and_sort, Community, CommunitySort, NewCommunity, Visibility};
use civicsphere_sdk_core::sphere::export::{export, ExportFormat};
use civicsphere_sdk_core::sphere::live::Row;
use civicsphere_sdk_core::sphere::logging::{init_logger, install_panic_hook, LogConfig};
use civicsphere_sdk_core::sphere::notification::{Notification, NotificationService};
use civicsphere_sdk_core::sphere::project::{arrange, NewProject, ProjectSort, StatusFilter};
use civicsphere_sdk_core::sphere::support::NewTicket;
use civicsphere_sdk_core::{SphereClient, SphereConfig, ViewListener};
use clap::{Parser, Subcommand};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// CivicSphere CLI
#[derive(Parser, Debug)]
#[command(name = "civicsphere-cli")]
#[command(about = "CivicSphere CLI - climate communities, actions and reports", long_about = None)]
struct Args {
    /// Account email (falls back to CIVICSPHERE_EMAIL)
    #[arg(short, long)]
    email: Option<String>,

    /// Account password (falls back to CIVICSPHERE_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info,civicsphere_sdk_core=debug")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Drop log lines containing this text (repeatable)
    #[arg(long = "suppress")]
    suppress: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List, create, join or leave communities
    Communities {
        /// Case-insensitive search on name and description
        #[arg(long, default_value = "")]
        search: String,
        /// recent | members | name
        #[arg(long, default_value = "recent")]
        sort: String,
        /// Create a community with this name
        #[arg(long)]
        create: Option<String>,
        /// public | request | closed (with --create)
        #[arg(long, default_value = "public")]
        visibility: String,
        #[arg(long)]
        join: Option<String>,
        #[arg(long)]
        leave: Option<String>,
    },
    /// List active climate actions or log a new one
    Actions {
        #[arg(long)]
        title: Option<String>,
        /// renewable | reforestation | waste | transportation | agriculture
        #[arg(long, default_value = "renewable")]
        kind: String,
        #[arg(long, allow_hyphen_values = true, default_value = "0")]
        lat: f64,
        #[arg(long, allow_hyphen_values = true, default_value = "0")]
        lng: f64,
        #[arg(long)]
        location: Option<String>,
        /// kg CO2 saved
        #[arg(long, default_value = "0")]
        impact: f64,
        #[arg(long)]
        community: Option<String>,
    },
    /// List projects or create one
    Projects {
        /// all | planning | active | completed
        #[arg(long, default_value = "all")]
        status: String,
        /// recent | impact | progress
        #[arg(long, default_value = "recent")]
        sort: String,
        #[arg(long)]
        create: Option<String>,
        #[arg(long)]
        community: Option<String>,
        #[arg(long, default_value = "0")]
        target: f64,
    },
    /// Show the notification drawer
    Notifications {
        /// Mark everything read
        #[arg(long)]
        read_all: bool,
    },
    /// Read or post chat messages
    Chat {
        /// Room name (defaults to the community room)
        #[arg(long)]
        room: Option<String>,
        /// Direct conversation with this user id
        #[arg(long)]
        with: Option<String>,
        /// Message to send
        #[arg(long)]
        send: Option<String>,
    },
    /// Export the impact report
    Report {
        /// csv | xlsx | pdf | png
        #[arg(long, default_value = "csv")]
        format: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Dashboard counts of communities, actions and projects
    Stats,
    /// File a support ticket
    Support {
        message: String,
        /// Page the problem was seen on
        #[arg(long)]
        url: Option<String>,
    },
    /// Set the interface language (en | id)
    Language { code: String },
    /// Insert demo communities and climate actions
    Seed,
    /// Keep live views mounted and print every change
    Watch {
        /// Seconds to run, 0 runs until interrupted
        #[arg(short, long, default_value = "0")]
        duration: u64,
        /// Chat room to follow
        #[arg(long, default_value = COMMUNITY_ROOM)]
        room: String,
    },
}

fn credential(flag: Option<String>, env_key: &str) -> Option<String> {
    flag.or_else(|| std::env::var(env_key).ok())
        .filter(|v| !v.trim().is_empty())
}

/// Prints every change of one live view
struct PrintListener {
    tag: &'static str,
}

#[async_trait::async_trait]
impl<T: Row + Debug> ViewListener<T> for PrintListener {
    async fn on_view_reset(&self, rows: Vec<T>) {
        info!("[CLI/{}] 📋 loaded {} row(s)", self.tag, rows.len());
    }

    async fn on_row_upserted(&self, row: T) {
        let json = serde_json::to_string(&row).unwrap_or_else(|_| format!("{:?}", row));
        info!("[CLI/{}] 🔄 {}", self.tag, json);
    }

    async fn on_row_removed(&self, key: String) {
        info!("[CLI/{}] 🗑️ removed {}", self.tag, key);
    }
}

async fn run(client: &SphereClient, command: Command) -> Result<()> {
    match command {
        Command::Communities {
            search,
            sort,
            create,
            visibility,
            join,
            leave,
        } => {
            if let Some(name) = create {
                let visibility = Visibility::parse(&visibility)
                    .with_context(|| format!("unknown visibility: {}", visibility))?;
                let community = client
                    .communities
                    .create(
                        &NewCommunity {
                            visibility,
                            ..NewCommunity::named(name)
                        },
                        None,
                    )
                    .await?;
                info!("[CLI] ✅ created {} ({})", community.name, community.id);
            }
            if let Some(id) = join {
                info!("[CLI] join {}: {:?}", id, client.communities.join(&id).await?);
            }
            if let Some(id) = leave {
                info!("[CLI] left {}: {}", id, client.communities.leave(&id).await?);
            }
            let sort = CommunitySort::parse(&sort).with_context(|| format!("unknown sort: {}", sort))?;
            let all = client.communities.list().await?;
            for c in search_and_sort(&all, &search, sort) {
                info!(
                    "[CLI]   - {} | {} members | {:?} | {}",
                    c.name,
                    c.member_count,
                    c.visibility,
                    c.location_name.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Actions {
            title,
            kind,
            lat,
            lng,
            location,
            impact,
            community,
        } => {
            if let Some(title) = title {
                let action_type = ActionType::parse(&kind).with_context(|| format!("unknown action type: {}", kind))?;
                let draft = NewClimateAction {
                    title,
                    description: String::new(),
                    action_type,
                    latitude: lat,
                    longitude: lng,
                    location_name: location,
                    impact_co2_saved: impact,
                    community_id: community,
                };
                let action = client.actions.create(&draft, None).await?;
                info!("[CLI] ✅ logged {} ({})", action.title, action.id);
            }
            let active = client.actions.list_active().await?;
            info!("[CLI] 🗺️ active actions ({})", active.len());
            for a in active {
                info!(
                    "[CLI]   - {} | {:?} | {} kg | ({:.3}, {:.3})",
                    a.title, a.action_type, a.impact_co2_saved, a.latitude, a.longitude
                );
            }
        }
        Command::Projects {
            status,
            sort,
            create,
            community,
            target,
        } => {
            if let Some(title) = create {
                let project = client
                    .projects
                    .create(
                        &NewProject {
                            title,
                            community_id: community,
                            target_co2_reduction: target,
                            ..NewProject::default()
                        },
                        None,
                    )
                    .await?;
                info!("[CLI] ✅ created project {} ({})", project.title, project.id);
            }
            let filter = StatusFilter::parse(&status).with_context(|| format!("unknown status: {}", status))?;
            let sort = ProjectSort::parse(&sort).with_context(|| format!("unknown sort: {}", sort))?;
            let projects = client.projects.list(None).await?;
            for p in arrange(&projects, filter, sort) {
                info!(
                    "[CLI]   - {} | {:?} | {}% of {} kg",
                    p.title,
                    p.status,
                    p.progress_percent(),
                    p.target_co2_reduction
                );
            }
        }
        Command::Notifications { read_all } => {
            if read_all {
                let n = client.notifications.mark_all_read(None).await?;
                info!("[CLI] ✅ marked {} read", n);
            }
            let view = client
                .notifications
                .live(Arc::new(PrintListener { tag: "Notification" }))
                .await?;
            let (items, unread) = NotificationService::drawer(&view).await;
            info!("[CLI] 📬 {} unread", unread);
            for n in items {
                info!("[CLI]   {} {} ({})", if n.is_read { " " } else { "•" }, n.title, n.kind);
            }
        }
        Command::Chat { room, with, send } => {
            let scope = match (with, room) {
                (Some(other), _) => {
                    let me = client.current_user().await.context("sign in to chat")?;
                    Scope::direct(&me.id, &other)
                }
                (None, Some(room)) => Scope::room(&room),
                (None, None) => Scope::room(COMMUNITY_ROOM),
            };
            if let Some(text) = send {
                let mut composer = Composer::new(text);
                let outcome = client.chat.send(&scope, &mut composer, None).await?;
                if let Some(reply) = outcome.ai_reply {
                    info!("[CLI] 🤖 {}", reply.text);
                }
            }
            for m in client.chat.history(&scope).await? {
                let who = if m.is_ai { "assistant" } else { m.sender_id.as_deref().unwrap_or("?") };
                info!("[CLI]   [{}] {}: {}", m.created_at.as_deref().unwrap_or(""), who, m.text);
            }
        }
        Command::Report { format, out } => {
            let format = ExportFormat::parse(&format).with_context(|| format!("unknown format: {}", format))?;
            let data = client.report().await?;
            let artifact = export(&data, format, "climate-impact-report")?;
            let path = artifact.save_to(&out).await?;
            info!("[CLI] 📄 report written to {}", path.display());
        }
        Command::Stats => {
            let stats = client.dashboard.quick_stats().await?;
            info!(
                "[CLI] 📊 {} communities | {} actions | {} projects",
                stats.communities, stats.actions, stats.projects
            );
        }
        Command::Support { message, url } => {
            let ticket = client
                .support
                .submit_ticket(&NewTicket {
                    message,
                    url,
                    user_agent: Some(format!("civicsphere-cli/{}", env!("CARGO_PKG_VERSION"))),
                    error_stack: None,
                })
                .await?;
            info!("[CLI] 🎫 ticket {} is {}", ticket.id, ticket.status);
        }
        Command::Language { code } => {
            let profile = client.profiles.set_language(&code).await?;
            info!("[CLI] 🌐 language is now {}", profile.language);
        }
        Command::Seed => {
            let report = client.seed_demo_data().await?;
            if report.skipped {
                info!("[CLI] demo data already present");
            } else {
                info!(
                    "[CLI] 🌍 seeded {} communities and {} actions",
                    report.communities, report.actions
                );
            }
        }
        Command::Watch { duration, room } => {
            let _communities = client
                .communities
                .live(Arc::new(PrintListener { tag: "Community" }) as Arc<dyn ViewListener<Community>>)
                .await?;
            let _actions = client
                .actions
                .active_map_view(Arc::new(PrintListener { tag: "Action" }) as Arc<dyn ViewListener<ClimateAction>>)
                .await?;
            let _chat = client
                .chat
                .open(
                    &Scope::room(&room),
                    Arc::new(PrintListener { tag: "Chat" }) as Arc<dyn ViewListener<Message>>,
                )
                .await?;
            let _notifications = match client.current_user().await {
                Some(_) => Some(
                    client
                        .notifications
                        .live(Arc::new(PrintListener { tag: "Notification" }) as Arc<dyn ViewListener<Notification>>)
                        .await?,
                ),
                None => None,
            };

            info!("[CLI] 📥 watching for changes");
            if duration > 0 {
                sleep(Duration::from_secs(duration)).await;
            } else {
                tokio::signal::ctrl_c().await.context("failed to wait for Ctrl+C")?;
            }
            info!("[CLI] 👋 exiting");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut log_config = LogConfig::new(args.log_level.clone());
    for pattern in &args.suppress {
        log_config = log_config.suppress(pattern.clone());
    }
    if let Some(path) = &args.log_file {
        log_config = log_config.file(path.clone());
    }
    init_logger(&log_config)?;
    install_panic_hook();

    info!("[CLI] 🚀 CivicSphere CLI");
    let config = SphereConfig::from_env();
    let client = SphereClient::connect(&config).await?;

    match (
        credential(args.email, "CIVICSPHERE_EMAIL"),
        credential(args.password, "CIVICSPHERE_PASSWORD"),
    ) {
        (Some(email), Some(password)) => {
            client
                .sign_in(&email, &password)
                .await
                .map_err(|e| anyhow::anyhow!("sign-in failed: {}", e))?;
        }
        _ => info!("[CLI] no credentials, continuing signed out"),
    }

    if let Err(e) = run(&client, args.command).await {
        error!("[CLI] ❌ {:#}", e);
        return Err(e);
    }
    Ok(())
}
