use clap::Parser;
use rolerag::{
    ConfigDb,
    DataDir,
    DocumentKey,
    EmbeddingProvider,
    EmbeddingTask,
    GeminiEmbedder,
    Retriever,
    Settings,
    error::{self, Error},
    ingestion::PathOptions,
    search,
    settings::SETTING_KEYS,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("ROLERAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Ingest(args) => {
            let settings = Settings::load(&config_db)?;
            let mut retriever = open_online(&data_dir, settings)?;
            cmd_ingest(&mut retriever, args)?;
        }
        Command::Search(args) => {
            let settings = Settings::load(&config_db)?;
            let retriever = open_online(&data_dir, settings)?;
            cmd_search(&retriever, &args)?;
        }
        Command::Library(args) => {
            let retriever = open_offline(&data_dir, &config_db)?;
            cmd_library(&retriever, &args)?;
        }
        Command::Remove(args) => {
            let retriever = open_offline(&data_dir, &config_db)?;
            cmd_remove(&retriever, &args.key)?;
        }
        Command::Rebuild => {
            let mut retriever = open_offline(&data_dir, &config_db)?;
            let stats = retriever.rebuild()?;
            println!(
                "Rebuilt chunk store: kept {}, dropped {}.",
                stats.kept, stats.dropped
            );
        }
        Command::Status(args) => {
            let retriever = open_offline(&data_dir, &config_db)?;
            cmd_status(&retriever, &data_dir, args.json)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Show => config_show(&config_db)?,
            ConfigAction::Set { key, value } => {
                Settings::validate(&key, &value)?;
                config_db.set_setting(&key, value.trim())?;
                println!("Set {key} = {}", value.trim());
            }
            ConfigAction::Unset { key } => {
                if !config_db.remove_setting(&key)? {
                    return Err(Error::NotFound {
                        kind: "setting",
                        name: key,
                    });
                }
                println!("Reset {key} to its default");
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Stands in for the remote provider on commands that never embed.
struct Offline;

impl EmbeddingProvider for Offline {
    fn embed(
        &self,
        _texts: &[String],
        _task: EmbeddingTask,
    ) -> error::Result<Vec<Vec<f32>>> {
        Err(Error::Config(
            "this command does not use an embedding provider".into(),
        ))
    }

    fn name(&self) -> &str {
        "offline"
    }
}

fn open_online(data_dir: &DataDir, settings: Settings) -> error::Result<Retriever> {
    let provider = GeminiEmbedder::from_env(settings.embedding_model.clone())?;
    Retriever::open(data_dir, Box::new(provider), settings)
}

fn open_offline(
    data_dir: &DataDir,
    config_db: &ConfigDb,
) -> error::Result<Retriever> {
    Retriever::open(data_dir, Box::new(Offline), Settings::load(config_db)?)
}

fn cmd_ingest(
    retriever: &mut Retriever,
    args: cli::IngestArgs,
) -> error::Result<()> {
    let options = PathOptions {
        team: args.team,
        tags: args
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        text_dir: args.text_dir,
    };
    let report = retriever.ingest_paths(&args.paths, &options)?;

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        for doc in &report.documents {
            println!("{doc}");
        }
        println!("{}", report.summary());
    }
    Ok(())
}

fn cmd_search(retriever: &Retriever, args: &cli::SearchArgs) -> error::Result<()> {
    let results = retriever.search(&args.query, args.role, args.count)?;

    if args.json {
        search::format_json(&results, &args.query, args.role)?;
    } else if args.context {
        println!("{}", search::source_tagged_context(&results));
    } else {
        search::format_human(&results);
    }
    Ok(())
}

#[derive(Serialize)]
struct LibraryEntry<'a> {
    key: &'a DocumentKey,
    file_name: &'a str,
    title: String,
    team: String,
    tags: &'a [String],
}

fn cmd_library(
    retriever: &Retriever,
    args: &cli::LibraryArgs,
) -> error::Result<()> {
    let role = args.role;
    let documents = retriever.library(role, args.filter.as_deref())?;

    if args.json {
        let entries: Vec<LibraryEntry<'_>> = documents
            .iter()
            .map(|(key, meta)| LibraryEntry {
                key,
                file_name: &meta.file_name,
                title: meta.display_title(),
                team: meta.team.to_string(),
                tags: &meta.tags,
            })
            .collect();
        println!("{}", serde_json::to_string(&entries)?);
    } else if documents.is_empty() {
        match args.filter.as_deref() {
            Some(filter) => {
                println!("No documents visible to {role} match '{filter}'.")
            }
            None => println!("No documents visible to {role}."),
        }
    } else {
        for (key, meta) in &documents {
            println!("{key}\t{}\t{}", meta.team, meta.display_title());
        }
    }
    Ok(())
}

fn cmd_remove(retriever: &Retriever, name: &str) -> error::Result<()> {
    let Some(key) = retriever.remove_by_name(name)? else {
        return Err(Error::NotFound {
            kind: "document",
            name: name.to_string(),
        });
    };
    println!("Removed '{key}'. Run `rolerag rebuild` to reclaim its chunks.");
    Ok(())
}

fn cmd_status(
    retriever: &Retriever,
    data_dir: &DataDir,
    json: bool,
) -> error::Result<()> {
    let status = retriever.status()?;
    let model = &retriever.settings().embedding_model;

    if json {
        #[derive(Serialize)]
        struct JsonStatus<'a> {
            data_dir: String,
            model: &'a str,
            #[serde(flatten)]
            status: &'a rolerag::retriever::Status,
        }
        let output = JsonStatus {
            data_dir: data_dir.root().display().to_string(),
            model,
            status: &status,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {model}");
        println!("Documents: {}", status.documents);
        println!("Chunks: {}", status.chunks);
        println!("Vectors: {}", status.vectors);
        match status.dimension {
            Some(dim) => println!("Dimension: {dim}"),
            None => println!("Dimension: (empty)"),
        }
        println!("Stale chunks: {}", status.stale_chunks);
        println!("Health: {}", status.health);
    }
    Ok(())
}

fn config_show(config_db: &ConfigDb) -> error::Result<()> {
    let persisted = config_db.list_settings()?;
    for (key, description) in SETTING_KEYS {
        match persisted.get(*key) {
            Some(value) => println!("{key} = {value}\t# {description}"),
            None => println!("{key} (default)\t# {description}"),
        }
    }
    Ok(())
}
