use clap::{Parser, Subcommand};
use dod_cli::cmd::{self, issues::IssuesSubcommand, report::ReportArgs, teams::TeamsSubcommand};
use dod_cli::root;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "dod",
    about = "Track Definition-of-Done compliance of epics in active Jira sprints",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .dod/ or .git/)
    #[arg(long, global = true, env = "DOD_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .dod/ with a default config and an empty snapshot database
    Init,

    /// Snapshot every active sprint from Jira
    Sync {
        /// Restrict the search to one Jira project
        #[arg(long)]
        project_key: Option<String>,

        /// Who triggered the run
        #[arg(long, env = "DOD_ACTOR", default_value = "anonymous")]
        actor: String,
    },

    /// List recent sync runs
    Runs {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List recent sprint generations
    Snapshots {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Compliance metrics over the selected scope
    Metrics {
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Evaluated epics with their failing DoD tasks and nudge state
    Epics {
        #[command(flatten)]
        report: ReportArgs,

        /// all | compliant | non_compliant
        #[arg(long, default_value = "all")]
        compliance_status: String,
    },

    /// Non-compliant epics only
    NonCompliant {
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Manage teams discovered from squad labels
    Teams {
        #[command(subcommand)]
        subcommand: TeamsSubcommand,
    },

    /// Draft and record a nudge for a non-compliant epic
    Nudge {
        epic_key: String,

        /// Recipient email (repeatable); overrides team and configured recipients
        #[arg(long = "recipient")]
        recipients: Vec<String>,

        /// Sprint generation id (default: active scope)
        #[arg(long)]
        snapshot: Option<i64>,

        #[arg(long, env = "DOD_ACTOR", default_value = "anonymous")]
        actor: String,

        /// Print the draft without recording it
        #[arg(long)]
        dry_run: bool,
    },

    /// Nudges sent within the selected scope, newest first
    Nudges {
        #[arg(long)]
        snapshot: Option<i64>,

        /// Team keys, comma separated
        #[arg(long = "squad", value_delimiter = ',')]
        squads: Vec<String>,

        /// 1..=200, default 50
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ad-hoc Jira lookups
    Issues {
        #[command(subcommand)]
        subcommand: IssuesSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Sync { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Sync { project_key, actor } => {
            cmd::sync::run(&root, project_key.as_deref(), &actor, cli.json)
        }
        Commands::Runs { limit } => cmd::runs::run(&root, limit, cli.json),
        Commands::Snapshots { limit } => cmd::snapshots::run(&root, limit, cli.json),
        Commands::Metrics { report } => cmd::report::metrics(&root, &report, cli.json),
        Commands::Epics {
            report,
            compliance_status,
        } => cmd::report::epics(&root, &report, &compliance_status, cli.json),
        Commands::NonCompliant { report } => cmd::report::non_compliant(&root, &report, cli.json),
        Commands::Teams { subcommand } => cmd::teams::run(&root, subcommand, cli.json),
        Commands::Nudge {
            epic_key,
            recipients,
            snapshot,
            actor,
            dry_run,
        } => cmd::nudge::send(
            &root,
            &cmd::nudge::NudgeArgs {
                epic_key,
                recipients,
                snapshot,
                actor,
                dry_run,
            },
            cli.json,
        ),
        Commands::Nudges {
            snapshot,
            squads,
            limit,
        } => cmd::nudge::history(&root, snapshot, &squads, limit, cli.json),
        Commands::Issues { subcommand } => cmd::issues::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
