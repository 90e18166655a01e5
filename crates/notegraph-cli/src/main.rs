//! Notegraph CLI - local-first markdown knowledge graph

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use notegraph_core::commands::{project, sync};
use notegraph_core::config::Config;
use notegraph_core::domain::graph::HydratedEntity;
use notegraph_core::domain::sync::ChangeSet;
use notegraph_core::storage::Database;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "notegraph")]
#[command(author, version, about = "Local-first markdown knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a project directory into the graph
    Sync {
        /// Directory to sync instead of the configured project root
        path: Option<PathBuf>,
        /// Project name (defaults to `default_project`)
        #[arg(short, long, conflicts_with = "all")]
        project: Option<String>,
        /// Sync every configured project in parallel
        #[arg(long, conflicts_with = "path")]
        all: bool,
    },

    /// Show what the next sync would change
    Status {
        /// Directory to inspect instead of the configured project root
        path: Option<PathBuf>,
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show a note with its observations and relations
    Show {
        /// Permalink of the note
        permalink: String,
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Rename a note and keep its identity
    Mv {
        /// Current path, relative to the project root
        old: String,
        /// New path, relative to the project root
        new: String,
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Manage projects
    Projects {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// List configured projects
    List,
    /// Add a project directory
    Add {
        /// Project name
        name: String,
        /// Project root directory
        path: PathBuf,
        /// Make it the default project
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all configuration values
    Show,
    /// Show config file path
    Path,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so `--format json` output stays parseable
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("notegraph=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        if let Some(suggestion) = err
            .downcast_ref::<notegraph_core::Error>()
            .and_then(|e| e.suggestion())
        {
            eprintln!("Hint: {}", suggestion);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let output = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Sync { path, project, all } => {
            let (config, db) = open().await?;
            let token = cancel_on_ctrl_c();
            if all {
                cmd_sync_all(&db, &config, token, output).await
            } else {
                let path = path.map(absolute).transpose()?;
                let report = sync::sync_project(&db, &config, project.as_deref(), path.as_deref(), token).await?;
                output.sync_report(&report)
            }
        }

        Commands::Status { path, project } => {
            let (config, db) = open().await?;
            let path = path.map(absolute).transpose()?;
            let changes = sync::status(&db, &config, project.as_deref(), path.as_deref()).await?;
            output.status(&changes)
        }

        Commands::Show { permalink, project } => {
            let (config, db) = open().await?;
            let entity = sync::show(&db, &config, project.as_deref(), &permalink).await?;
            output.entity(&entity)
        }

        Commands::Mv { old, new, project } => {
            let (config, db) = open().await?;
            let entity = sync::move_file(&db, &config, project.as_deref(), &old, &new).await?;
            info!(entity_id = entity.id(), from = %old, to = %new, "Note moved");
            if output.format == OutputFormat::Json {
                return output.json(&entity);
            }
            if !output.quiet {
                println!("Moved {} -> {} (permalink: {})", old, new, entity.entity.permalink);
            }
            Ok(())
        }

        Commands::Projects { action } => cmd_projects(action, output).await,

        Commands::Config { action } => cmd_config(action, output),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn open() -> anyhow::Result<(Config, Database)> {
    let config = Config::load()?;
    let db = Database::new(config.database.database_config()).await?;
    Ok((config, db))
}

fn absolute(path: PathBuf) -> anyhow::Result<PathBuf> {
    Ok(std::path::absolute(&path)?)
}

/// Cancel the running pass on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current file");
            cancel.cancel();
        }
    });
    token
}

async fn cmd_sync_all(
    db: &Database,
    config: &Config,
    token: CancellationToken,
    output: Output,
) -> anyhow::Result<()> {
    let names: Vec<String> = config.projects.keys().cloned().collect();
    let results = sync::sync_projects(db, config, &names, token).await;

    let mut failed = 0;
    let mut reports = Vec::new();
    for (name, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(err) => {
                failed += 1;
                eprintln!("Error syncing '{}': {}", name, err);
            }
        }
    }

    if output.format == OutputFormat::Json {
        output.json(&reports)?;
    } else {
        for report in &reports {
            output.sync_report(report)?;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} projects failed to sync", failed, names.len());
    }
    Ok(())
}

async fn cmd_projects(action: ProjectAction, output: Output) -> anyhow::Result<()> {
    match action {
        ProjectAction::List => {
            let config = Config::load()?;

            if output.format == OutputFormat::Json {
                let projects: Vec<serde_json::Value> = config
                    .projects
                    .iter()
                    .map(|(name, path)| {
                        serde_json::json!({
                            "name": name,
                            "path": path,
                            "default": *name == config.default_project,
                        })
                    })
                    .collect();
                return output.json(&projects);
            }

            for (name, path) in &config.projects {
                let marker = if *name == config.default_project { "*" } else { " " };
                println!("{} {:<16} {}", marker, name, path.display());
            }
        }
        ProjectAction::Add { name, path, default } => {
            let path = absolute(path)?;
            if !path.is_dir() {
                anyhow::bail!("'{}' is not a directory", path.display());
            }

            let mut config = Config::load()?;
            config.projects.insert(name.clone(), path.clone());
            if default {
                config.default_project = name.clone();
            }
            config.save()?;

            let db = Database::new(config.database.database_config()).await?;
            let registered = project::ensure_with_db(&db, &name, &path).await?;

            if output.format == OutputFormat::Json {
                return output.json(&registered);
            }
            if !output.quiet {
                println!("Added project '{}' at {}", name, path.display());
                println!("\nRun `notegraph sync --project {}` to build its graph.", name);
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, output: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            let items = config.list()?;
            if output.format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                return output.json(&map);
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !output.quiet {
                println!("Set {} = {}", key, value);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn sync_report(&self, result: &sync::ProjectReport) -> anyhow::Result<()> {
        if self.format == OutputFormat::Json {
            return self.json(result);
        }

        let report = &result.report;
        if !self.quiet {
            println!(
                "Synced '{}' ({}): {} created, {} updated, {} deleted, {} moved, {} unchanged",
                result.project,
                result.root.display(),
                report.created,
                report.updated,
                report.deleted,
                report.moved,
                report.unchanged
            );
            if report.relations_resolved > 0 || report.relations_unresolved > 0 {
                println!(
                    "  relations: {} resolved, {} unresolved",
                    report.relations_resolved, report.relations_unresolved
                );
            }
            if report.cancelled {
                println!("  cancelled: remaining files will be synced next time");
            }
        }
        for failure in &report.errors {
            eprintln!("  {} [{}] {}", failure.path, failure.code, failure.message);
        }
        Ok(())
    }

    fn status(&self, changes: &ChangeSet) -> anyhow::Result<()> {
        if self.format == OutputFormat::Json {
            return self.json(changes);
        }
        if self.quiet {
            println!("{}", changes.pending());
            return Ok(());
        }
        for (path, reason) in &changes.skipped {
            eprintln!("  unreadable: {} ({})", path, reason);
        }
        if changes.is_empty() {
            println!("Nothing to sync ({} files up to date).", changes.unchanged.len());
            return Ok(());
        }

        for path in &changes.deleted {
            println!("  deleted:  {}", path);
        }
        for mv in &changes.moved {
            println!("  moved:    {} -> {}", mv.from, mv.to);
        }
        for path in &changes.modified {
            println!("  modified: {}", path);
        }
        for path in &changes.created {
            println!("  new:      {}", path);
        }
        println!("\n{} pending, {} unchanged", changes.pending(), changes.unchanged.len());
        Ok(())
    }

    fn entity(&self, hydrated: &HydratedEntity) -> anyhow::Result<()> {
        if self.format == OutputFormat::Json {
            return self.json(hydrated);
        }

        let entity = &hydrated.entity;
        println!("{}", entity.title);
        println!("  permalink: {}", entity.permalink);
        println!("  file:      {}", entity.file_path);
        println!("  type:      {}", entity.entity_type);
        if self.quiet {
            return Ok(());
        }

        if !hydrated.observations.is_empty() {
            println!("\nObservations:");
            for observation in &hydrated.observations {
                println!("  [{}] {}", observation.category, observation.content);
            }
        }

        if !hydrated.outgoing_relations.is_empty() {
            println!("\nRelations:");
            for relation in &hydrated.outgoing_relations {
                match relation.to_id.and_then(|id| hydrated.endpoint(id)) {
                    Some(target) => println!("  {} -> {} ({})", relation.relation_type, target.title, target.permalink),
                    None => println!("  {} -> {} (unresolved)", relation.relation_type, relation.to_name),
                }
            }
        }

        let sources: Vec<_> = hydrated.incoming_sources().collect();
        if !sources.is_empty() {
            println!("\nReferenced by:");
            for source in sources {
                println!("  {} ({})", source.title, source.permalink);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_with_project() {
        let cli = Cli::try_parse_from(["notegraph", "sync", "--project", "work", "--format", "json"]).unwrap();
        assert!(cli.format == OutputFormat::Json);
        match cli.command {
            Commands::Sync { path, project, all } => {
                assert!(path.is_none());
                assert_eq!(project.as_deref(), Some("work"));
                assert!(!all);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_all_conflicts_with_path() {
        assert!(Cli::try_parse_from(["notegraph", "sync", "notes", "--all"]).is_err());
    }
}
