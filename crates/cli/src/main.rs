//! Field Vetting Resolver command line
//!
//! Loads a baseline data file, a user list and a JSON-lines vote log, then
//! prints the resolved view of one or all locales.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fvr_core::{FieldPath, Level, LocaleId, User, UserId};
use fvr_manager::{FactoryConfig, ResolvedField, VettingFactory};
use fvr_storage::{InMemoryBaseline, InMemoryUserDirectory, JsonlVoteStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Field Vetting Resolver
#[derive(Parser, Debug)]
#[command(
    name = "fvr",
    about = "Resolve weighted reviewer votes into one value per field",
    version
)]
struct Args {
    /// Logging level
    #[arg(
        short,
        long,
        global = true,
        default_value = "warn",
        env = "RUST_LOG",
        help = "Logging level (trace, debug, info, warn, error)"
    )]
    log_level: String,

    /// Enable JSON formatted logs
    #[arg(
        long,
        global = true,
        default_value = "false",
        env = "FVR_JSON_LOGS",
        help = "Output logs in JSON format"
    )]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

/// Files every data command needs
#[derive(clap::Args, Debug)]
struct DataArgs {
    /// Factory configuration (JSON); defaults apply when omitted
    #[arg(long, env = "FVR_CONFIG")]
    config: Option<PathBuf>,

    /// Baseline data file (JSON)
    #[arg(long, env = "FVR_BASELINE")]
    baseline: PathBuf,

    /// Vote log (JSON lines)
    #[arg(long, env = "FVR_VOTES")]
    votes: PathBuf,

    /// User list (JSON array)
    #[arg(long, env = "FVR_USERS")]
    users: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved value, status and last-modified time of every field
    Resolve {
        #[command(flatten)]
        data: DataArgs,

        /// Only this locale
        #[arg(long)]
        locale: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Cast or withdraw one vote and print the field afterwards
    Vote {
        #[command(flatten)]
        data: DataArgs,

        #[arg(long)]
        locale: String,

        #[arg(long)]
        user: u32,

        #[arg(long)]
        path: String,

        /// Value to vote for; omit to withdraw
        #[arg(long)]
        value: Option<String>,
    },

    /// Rewrite a vote log keeping only the latest row per user and field
    Compact {
        #[arg(long, env = "FVR_VOTES")]
        votes: PathBuf,
    },

    /// Validate a configuration file and print its level table
    CheckConfig {
        #[arg(long, env = "FVR_CONFIG")]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    match args.command {
        Command::Resolve { data, locale, json } => {
            let (factory, baseline) = open_factory(&data)?;
            let locales = match locale {
                Some(code) => vec![parse_locale(&code)?],
                None => all_locales(&factory, &baseline)?,
            };

            let mut views: BTreeMap<LocaleId, BTreeMap<FieldPath, ResolvedField>> = BTreeMap::new();
            for locale in locales {
                let snapshot = factory.resolved_view(&locale)?.snapshot();
                views.insert(locale, snapshot);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                print!("{}", render_table(&views));
            }
        }
        Command::Vote {
            data,
            locale,
            user,
            path,
            value,
        } => {
            let (factory, _) = open_factory(&data)?;
            let locale = parse_locale(&locale)?;
            let path = FieldPath::parse(&path).with_context(|| format!("invalid path '{}'", path))?;

            factory
                .ballot_box(&locale)?
                .vote_for_value(UserId(user), &path, value.as_deref())?;
            let field = factory.resolve(&locale, &path)?;
            println!("{}", serde_json::to_string_pretty(&field)?);
        }
        Command::Compact { votes } => {
            let store = JsonlVoteStore::open(&votes)?;
            let kept = store.compact()?;
            println!("{} rows kept in {}", kept, votes.display());
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            for level in Level::ALL {
                println!(
                    "{:<10} weight {:>3}  menu {:?}",
                    level,
                    config.levels.weight(level),
                    config.levels.vote_count_menu(level)
                );
            }
            println!(
                "approved at {} from {} organizations, contributed at {}",
                config.resolver.approval_weight,
                config.resolver.approval_min_organizations,
                config.resolver.contributed_weight
            );
        }
    }

    Ok(())
}

/// Initialize tracing subscriber; logs go to stderr so stdout stays parseable
fn init_tracing(args: &Args) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn parse_locale(code: &str) -> anyhow::Result<LocaleId> {
    LocaleId::parse(code).with_context(|| format!("invalid locale '{}'", code))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FactoryConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<FactoryConfig>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => FactoryConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {} {}", what, path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {} {}", what, path.display()))
}

fn open_factory(data: &DataArgs) -> anyhow::Result<(VettingFactory, Arc<InMemoryBaseline>)> {
    let config = load_config(data.config.as_deref())?;
    let baseline: Arc<InMemoryBaseline> = Arc::new(load_json(&data.baseline, "baseline")?);
    let users: Vec<User> = load_json(&data.users, "users")?;
    let store = JsonlVoteStore::open(&data.votes)
        .with_context(|| format!("opening vote log {}", data.votes.display()))?;

    info!(users = users.len(), votes = %data.votes.display(), "Loaded inputs");

    let factory = VettingFactory::new(
        config,
        Arc::new(InMemoryUserDirectory::from_users(users)),
        baseline.clone(),
        Arc::new(store),
    )?;
    Ok((factory, baseline))
}

/// Baseline locales plus every locale with stored votes
fn all_locales(factory: &VettingFactory, baseline: &InMemoryBaseline) -> anyhow::Result<Vec<LocaleId>> {
    let mut locales: BTreeSet<LocaleId> = baseline.locales().cloned().collect();
    locales.extend(factory.rebuild().map(|_| factory.loaded_locales())?);
    Ok(locales.into_iter().collect())
}

fn render_table(views: &BTreeMap<LocaleId, BTreeMap<FieldPath, ResolvedField>>) -> String {
    let mut out = String::new();
    for (locale, fields) in views {
        for (path, field) in fields {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                locale,
                path,
                field.value.as_deref().unwrap_or("-"),
                field.status,
                format_time(field.last_modified)
            ));
        }
    }
    out
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}
