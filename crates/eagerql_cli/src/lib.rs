//! Command-line interface for eagerql.
//!
//! # Usage
//!
//! ```bash
//! # Run a query against a fixture
//! eagerql run demos/blog.json demos/nested.json
//!
//! # Same query, one fetch per parent
//! eagerql run demos/blog.json demos/nested.json --no-batch
//!
//! # Describe the models and relation fields of a fixture
//! eagerql inspect demos/blog.json
//! ```

pub mod fixture;

use clap::{Parser, Subcommand};
use colored::Colorize;
use eagerql_runtime::{Context, ExecutionStats, RelationKind};
use fixture::{Fixture, QueryDocument};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "eagerql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a query against a fixture
    Run {
        /// Fixture file
        fixture: PathBuf,

        /// Query file (a JSON selection list)
        query: PathBuf,

        /// Load every relation field on its own instead of batching
        #[arg(long)]
        no_batch: bool,

        /// Print the response on a single line
        #[arg(long)]
        compact: bool,
    },

    /// Describe the models and relation fields of a fixture
    Inspect {
        /// Fixture file
        fixture: PathBuf,
    },

    /// Print version information
    Version,
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            fixture,
            query,
            no_batch,
            compact,
        } => run_query(&fixture, &query, no_batch, compact, cli.quiet).await,
        Commands::Inspect { fixture } => inspect_fixture(&fixture),
        Commands::Version => {
            println!("eagerql {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

async fn run_query(
    fixture_path: &Path,
    query_path: &Path,
    no_batch: bool,
    compact: bool,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut fixture = Fixture::load(fixture_path)?;
    if no_batch {
        fixture.config.batchload_relations = false;
    }
    let app = fixture.build()?;
    let plan = app.plan(QueryDocument::load(query_path)?)?;

    let (response, stats) = app.executor.run(&plan, &Context::new()).await;

    let output = if compact {
        serde_json::to_string(&response)?
    } else {
        serde_json::to_string_pretty(&response)?
    };
    println!("{}", output);

    if !quiet {
        eprintln!("{}", summary(&stats, app.store.fetch_count()));
        if let Some(errors) = &response.errors {
            for error in errors {
                let code = error.code().unwrap_or("ERROR");
                eprintln!("  {} {} {}", "-->".blue(), code.red().bold(), error.message);
            }
        }
    }

    Ok(if response.has_errors() { 1 } else { 0 })
}

fn summary(stats: &ExecutionStats, fetches: usize) -> String {
    format!(
        "{} {} field(s), {} fetch(es) in {} wave(s) ({} batch(es), {} parent(s)) in {:?}",
        "Executed".green().bold(),
        stats.fields_resolved,
        fetches.to_string().bold(),
        stats.waves,
        stats.batches,
        stats.parents,
        stats.execution_duration,
    )
}

fn inspect_fixture(path: &Path) -> Result<i32, Box<dyn std::error::Error>> {
    let fixture = Fixture::load(path)?;

    println!("{}", "Models".bold());
    for model in &fixture.models {
        let rows = fixture.rows.get(&model.name).map_or(0, Vec::len);
        println!(
            "  {} {}",
            model.name.cyan(),
            format!("(key: {}, {} row(s))", model.primary_key, rows).dimmed()
        );
        for relation in model.relations.values() {
            println!(
                "    {} {} {} {}",
                relation.name,
                kind_label(relation.kind).yellow(),
                relation.related.cyan(),
                format!("({} = {})", relation.local_key, relation.foreign_key).dimmed()
            );
        }
    }

    if !fixture.fields.is_empty() {
        println!("{}", "Relation fields".bold());
        for def in &fixture.fields {
            let field = &def.field;
            let mut line = format!("  {}.{} -> {}", def.parent_type, field.field, field.relation_name());
            if !field.scopes.is_empty() {
                line.push_str(&format!(" [{}]", field.scopes.join(", ")));
            }
            if let Some(kind) = field.pagination {
                line.push_str(&format!(" {}", kind.as_str().yellow()));
            }
            println!("{}", line);
        }
    }

    if !fixture.with_relations.is_empty() {
        println!("{}", "Eager-loaded fields".bold());
        for def in &fixture.with_relations {
            println!("  {}.{} <- {}", def.parent_type, def.field, def.relation);
        }
    }

    println!(
        "{} {}",
        "Batching".bold(),
        if fixture.config.batchload_relations {
            "on".green()
        } else {
            "off".red()
        }
    );
    Ok(0)
}

fn kind_label(kind: RelationKind) -> &'static str {
    match kind {
        RelationKind::HasMany => "hasMany",
        RelationKind::HasOne => "hasOne",
        RelationKind::BelongsTo => "belongsTo",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::parse_from(["eagerql", "run", "fixture.json", "query.json", "--no-batch"]);
        match cli.command {
            Commands::Run {
                fixture,
                no_batch,
                compact,
                ..
            } => {
                assert_eq!(fixture, PathBuf::from("fixture.json"));
                assert!(no_batch);
                assert!(!compact);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::parse_from(["eagerql", "--quiet", "inspect", "fixture.json"]);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Inspect { .. }));
    }

    #[test]
    fn test_summary() {
        colored::control::set_override(false);
        let stats = ExecutionStats {
            fields_resolved: 12,
            waves: 2,
            batches: 2,
            parents: 9,
            ..ExecutionStats::default()
        };
        let line = summary(&stats, 2);
        assert!(line.starts_with("Executed 12 field(s), 2 fetch(es) in 2 wave(s)"));
        assert!(line.contains("(2 batch(es), 9 parent(s))"));
    }
}
