use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use rolerag::{Role, Team};

#[derive(Debug, Parser)]
#[command(
    name = "rolerag",
    about = "Role-gated semantic search over team documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest documents into the index
    Ingest(IngestArgs),
    /// Search the documents visible to a role
    Search(SearchArgs),
    /// List the documents visible to a role
    Library(LibraryArgs),
    /// Remove a document; its chunks stay hidden until the next rebuild
    Remove(RemoveArgs),
    /// Compact the chunk store down to documents still indexed
    Rebuild,
    /// Show index statistics and health
    Status(StatusArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Files or directories to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Owning team of every ingested document
    #[arg(short, long, default_value_t = Team::Unassigned)]
    pub team: Team,

    /// Comma-separated tags attached to every ingested document
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Directory holding processed `<stem>.txt` twins of rich documents
    #[arg(long)]
    pub text_dir: Option<PathBuf>,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Role the query is issued under ("Admin" or a team name)
    #[arg(short, long)]
    pub role: Role,

    /// Number of results (defaults to the `top_k` setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print source-tagged context blocks instead of a result list
    #[arg(long, conflicts_with = "json")]
    pub context: bool,
}

// -- Library --

#[derive(Debug, Parser)]
pub struct LibraryArgs {
    /// Role whose library to list
    #[arg(short, long)]
    pub role: Role,

    /// Only list documents whose file name contains this text (any case)
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Remove --

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Document key, or the document's file name
    pub key: String,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting and any persisted value
    Show,
    /// Persist a setting
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
    /// Reset a setting to its default
    Unset {
        /// Setting name
        key: String,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "rolerag",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_with_team_role() {
        let cli = Cli::parse_from([
            "rolerag",
            "search",
            "credit limits",
            "--role",
            "Risk Tribe",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "credit limits");
                assert_eq!(args.role, Role::Member(Team::RiskTribe));
                assert_eq!(args.count, None);
                assert!(!args.json);
                assert!(!args.context);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_admin_with_count() {
        let cli =
            Cli::parse_from(["rolerag", "search", "q", "-r", "admin", "-n", "3"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.role, Role::Admin);
                assert_eq!(args.count, Some(3));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn search_requires_a_known_role() {
        assert!(Cli::try_parse_from(["rolerag", "search", "q"]).is_err());
        assert!(
            Cli::try_parse_from(["rolerag", "search", "q", "-r", "Nobody"])
                .is_err()
        );
    }

    #[test]
    fn context_conflicts_with_json() {
        assert!(
            Cli::try_parse_from([
                "rolerag", "search", "q", "-r", "admin", "--json", "--context",
            ])
            .is_err()
        );
    }

    #[test]
    fn parse_ingest_defaults() {
        let cli = Cli::parse_from(["rolerag", "ingest", "uploads"]);
        match cli.command {
            Command::Ingest(args) => {
                assert_eq!(args.paths, vec![PathBuf::from("uploads")]);
                assert_eq!(args.team, Team::Unassigned);
                assert!(args.tags.is_empty());
                assert!(args.text_dir.is_none());
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn parse_ingest_team_and_tags() {
        let cli = Cli::parse_from([
            "rolerag",
            "ingest",
            "a.md",
            "b.pdf",
            "--team",
            "card tribe",
            "--tags",
            "policy,2024",
            "--text-dir",
            "processed",
        ]);
        match cli.command {
            Command::Ingest(args) => {
                assert_eq!(args.paths.len(), 2);
                assert_eq!(args.team, Team::CardTribe);
                assert_eq!(args.tags, vec!["policy", "2024"]);
                assert_eq!(args.text_dir, Some(PathBuf::from("processed")));
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn ingest_needs_a_path() {
        assert!(Cli::try_parse_from(["rolerag", "ingest"]).is_err());
    }

    #[test]
    fn parse_library_filter() {
        let cli = Cli::parse_from([
            "rolerag", "library", "-r", "Card Tribe", "--filter", "policy",
        ]);
        match cli.command {
            Command::Library(args) => {
                assert_eq!(args.role, Role::Member(Team::CardTribe));
                assert_eq!(args.filter.as_deref(), Some("policy"));
            }
            _ => panic!("expected library command"),
        }

        let cli = Cli::parse_from(["rolerag", "library", "-r", "admin"]);
        assert!(matches!(
            cli.command,
            Command::Library(LibraryArgs { filter: None, .. })
        ));
    }

    #[test]
    fn parse_config_set() {
        let cli = Cli::parse_from(["rolerag", "config", "set", "top_k", "8"]);
        match cli.command {
            Command::Config {
                action: ConfigAction::Set { key, value },
            } => {
                assert_eq!(key, "top_k");
                assert_eq!(value, "8");
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(
            Cli::try_parse_from(["rolerag", "-v", "-q", "status"]).is_err()
        );
        let cli = Cli::parse_from(["rolerag", "-vv", "status", "--json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Status(StatusArgs { json: true })));
    }
}
