pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use shelfmatch_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use shelfmatch_core::domain::rule::RuleStatus;

use commands::recommend::RecommendOptions;
use commands::rules::ListOptions;
use commands::smart::BuildSelection;

#[derive(Debug, Parser)]
#[command(
    name = "shelfmatch",
    about = "Shelfmatch operator CLI",
    long_about = "Manage recommendation rules, rebuild lookup indexes and smart lists, and query recommendations.",
    after_help = "Examples:\n  shelfmatch seed\n  shelfmatch rules list --detailed\n  shelfmatch recommend 104 --limit 4\n  shelfmatch diagnose 104"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Config file path (defaults to ./shelfmatch.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
}

impl GlobalArgs {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Validate config, database connectivity, schema and lookup index")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Load the deterministic demo catalog and sample rules")]
    Seed,
    #[command(subcommand, about = "List, toggle, delete, export and import rules")]
    Rules(RulesCommand),
    #[command(subcommand, about = "Maintain the condition-key lookup index")]
    Index(IndexCommand),
    #[command(about = "Recommend products for a product id")]
    Recommend {
        product_id: u64,
        #[arg(long, help = "Override every action limit and cap the merged list")]
        limit: Option<u32>,
        #[arg(long, help = "Override the out-of-stock filter (true|false)")]
        exclude_outofstock: Option<bool>,
        #[arg(long, help = "Comma-separated recently viewed product ids, most recent first")]
        recently_viewed: Option<String>,
    },
    #[command(about = "Trace rule resolution and every action for a product id")]
    Diagnose { product_id: u64 },
    #[command(subcommand, about = "Build or purge co-purchase and trending lists")]
    Smart(SmartCommand),
}

#[derive(Debug, Subcommand)]
enum RulesCommand {
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long, help = "id|name|priority|status|created_at|updated_at")]
        order_by: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, help = "Include condition groups and actions")]
        detailed: bool,
    },
    Toggle {
        id: i64,
    },
    Delete {
        id: i64,
    },
    Export {
        #[arg(long, short, help = "Write the document to a file instead of stdout")]
        output: Option<PathBuf>,
    },
    Import {
        path: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum IndexCommand {
    Rebuild {
        #[arg(long, help = "Only re-index this rule")]
        rule: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
enum SmartCommand {
    Build {
        #[arg(long)]
        copurchase: bool,
        #[arg(long)]
        trending: bool,
    },
    Purge,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
    Enabled,
    Disabled,
}

impl From<StatusArg> for RuleStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Enabled => RuleStatus::Enabled,
            StatusArg::Disabled => RuleStatus::Disabled,
        }
    }
}

/// Logs go to stderr so stdout carries only the command payload. Config
/// errors are reported by the command itself.
fn init_logging(options: &LoadOptions) {
    let Ok(config) = AppConfig::load(options.clone()) else {
        return;
    };
    if let Err(error) = install_subscriber(&config) {
        eprintln!("shelfmatch: logging disabled: {error}");
    }
}

fn install_subscriber(config: &AppConfig) -> Result<(), String> {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|error| error.to_string())
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();
    init_logging(&options);

    let result = match cli.command {
        Command::Config => commands::config::run(options),
        Command::Migrate => commands::migrate::run(options),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(options, json) }
        }
        Command::Seed => commands::seed::run(options),
        Command::Rules(command) => match command {
            RulesCommand::List { status, order_by, desc, limit, offset, detailed } => {
                let listing = ListOptions {
                    status: status.map(RuleStatus::from),
                    order_by,
                    descending: desc,
                    limit,
                    offset,
                    detailed,
                };
                commands::rules::list(options, listing)
            }
            RulesCommand::Toggle { id } => commands::rules::toggle(options, id),
            RulesCommand::Delete { id } => commands::rules::delete(options, id),
            RulesCommand::Export { output } => commands::rules::export(options, output),
            RulesCommand::Import { path } => commands::rules::import(options, path),
        },
        Command::Index(IndexCommand::Rebuild { rule }) => commands::index::rebuild(options, rule),
        Command::Recommend { product_id, limit, exclude_outofstock, recently_viewed } => {
            let request = RecommendOptions { limit, exclude_outofstock, recently_viewed };
            commands::recommend::run(options, product_id, request)
        }
        Command::Diagnose { product_id } => commands::diagnose::run(options, product_id),
        Command::Smart(SmartCommand::Build { copurchase, trending }) => {
            commands::smart::build(options, BuildSelection { copurchase, trending })
        }
        Command::Smart(SmartCommand::Purge) => commands::smart::purge(options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use shelfmatch_core::config::AppConfig;

    use super::{install_subscriber, Cli, Command, RulesCommand};

    #[test]
    fn second_subscriber_install_reports_an_error() {
        let config = AppConfig::default();
        let _ = install_subscriber(&config);

        let error = install_subscriber(&config).expect_err("global subscriber already set");
        assert!(!error.is_empty());
    }

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_become_load_overrides() {
        let cli = Cli::parse_from([
            "shelfmatch",
            "rules",
            "list",
            "--status",
            "disabled",
            "--database-url",
            "sqlite::memory:",
        ]);

        let options = cli.global.load_options();
        assert_eq!(options.overrides.database_url.as_deref(), Some("sqlite::memory:"));
        assert!(!options.require_file);
        assert!(matches!(cli.command, Command::Rules(RulesCommand::List { status: Some(_), .. })));
    }

    #[test]
    fn recommend_accepts_overrides() {
        let cli = Cli::parse_from([
            "shelfmatch",
            "recommend",
            "104",
            "--limit",
            "2",
            "--exclude-outofstock",
            "false",
            "--recently-viewed",
            "3,7",
        ]);

        let Command::Recommend { product_id, limit, exclude_outofstock, recently_viewed } = cli.command
        else {
            panic!("expected recommend");
        };
        assert_eq!(product_id, 104);
        assert_eq!(limit, Some(2));
        assert_eq!(exclude_outofstock, Some(false));
        assert_eq!(recently_viewed.as_deref(), Some("3,7"));
    }
}
