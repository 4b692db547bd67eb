use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use recon_kg::config::EngineConfig;
use recon_kg::db::{init_pool, PgQueryExecutor, PgSchemaIntrospector};
use recon_kg::execution::{Defined, ExecutionGateway, GatewaySettings, RunTrigger};
use recon_kg::executor::{QueryExecutor, QueryOutput};
use recon_kg::field_preferences::PreferenceSet;
use recon_kg::knowledge_graph::{
    add_nl_relationships_to_kg, build_knowledge_graph, enrich_with_completion, get_relationship_statistics,
    merge_relationships, BuildOptions, EnrichmentOptions, KnowledgeGraph, MergeStrategy,
};
use recon_kg::llm::{CompletionService, LlmClient};
use recon_kg::nl::StopWords;
use recon_kg::reconciliation::{generate_reconciliation_rules, MatchType, RuleGenerationOptions, Ruleset};
use recon_kg::retry::{call_with_retry, CallPolicy};
use recon_kg::schema::{JsonSchemaSource, SchemaIntrospector, SchemaSnapshot};
use recon_kg::store::{
    DefinitionRepository, EngineStore, KnowledgeGraphRepository, PreferenceRepository,
    RulesetRepository, SqliteStore,
};
use recon_kg::telemetry::init_tracing;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "recon-kg")]
#[command(about = "Knowledge-graph guided natural language SQL and reconciliation rules")]
struct Args {
    /// JSON configuration file (defaults to environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a knowledge graph from live schemas or snapshot files and store it
    BuildKg {
        #[arg(long)]
        name: String,
        /// Schemas to include
        #[arg(long = "schema", required = true)]
        schemas: Vec<String>,
        /// Directory of `<schema>.json` snapshots; DATABASE_URL is used when absent
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
        /// Field preferences JSON, stored for later runs
        #[arg(long)]
        preferences: Option<PathBuf>,
        /// Score ambiguous column pairs with the completion service
        #[arg(long)]
        enrich: bool,
    },
    /// Relationship statistics of the latest graph version
    Stats {
        #[arg(long)]
        name: String,
    },
    /// Apply a merge strategy (union, deduplicate, high_confidence) and store a new version
    Merge {
        #[arg(long)]
        name: String,
        #[arg(long)]
        strategy: String,
    },
    /// Register a natural language relationship or query definition
    Define {
        #[arg(long)]
        name: String,
        /// Label for query definitions
        #[arg(long, default_value = "query")]
        title: String,
        text: String,
    },
    /// Execute a stored query definition
    Run {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        scheduled: bool,
        /// Write rows as CSV instead of printing the JSON report
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Accept SQL for a definition
    Accept {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        sql: String,
        /// Accept without caching
        #[arg(long)]
        no_cache: bool,
    },
    /// Turn cached SQL reuse on or off for a definition
    Cache {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: String,
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Generate and store a reconciliation ruleset
    Rules {
        #[arg(long)]
        name: String,
        #[arg(long)]
        ruleset: String,
        #[arg(long, default_value_t = 0.7)]
        min_confidence: f64,
        /// Comma-separated subset of exact,semantic,fuzzy
        #[arg(long, default_value = "exact,semantic,fuzzy")]
        match_types: String,
    },
    /// Define many definitions from a file, or run every stored definition
    Batch {
        #[arg(long)]
        name: String,
        /// JSON array of {"name", "text"}; runs all stored definitions when absent
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Approve an alias for a table; applied on the next build
    Alias {
        #[arg(long)]
        table: String,
        alias: String,
    },
}

#[derive(Deserialize)]
struct DefinitionEntry {
    name: String,
    text: String,
}

/// Stand-in executor for deployments without DATABASE_URL.
struct UnconfiguredExecutor;

#[async_trait::async_trait]
impl QueryExecutor for UnconfiguredExecutor {
    async fn execute(&self, _sql: &str, _row_limit: usize) -> recon_kg::Result<QueryOutput> {
        Err(recon_kg::EngineError::Config(
            "DATABASE_URL is not set; queries cannot be executed".to_string(),
        ))
    }
}

fn completion_service(config: &EngineConfig) -> Option<Arc<dyn CompletionService>> {
    match LlmClient::new(&config.llm) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Running without a completion service: {}", e);
            None
        }
    }
}

async fn executor(config: &EngineConfig) -> Result<Arc<dyn QueryExecutor>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgQueryExecutor::new(init_pool(url).await?))),
        None => Ok(Arc::new(UnconfiguredExecutor)),
    }
}

async fn gateway(config: &EngineConfig, store: Arc<SqliteStore>, name: &str) -> Result<ExecutionGateway> {
    let kg = store.load_graph(name)?;
    let preferences = store.load_preferences()?;
    let executor = executor(config).await?;
    let mut gateway = ExecutionGateway::new(
        kg,
        preferences,
        store as Arc<dyn EngineStore>,
        executor,
        GatewaySettings::from_config(config),
    )
    .with_stop_words(StopWords::with_overrides(&config.stop_words));
    if let Some(completion) = completion_service(config) {
        gateway = gateway.with_completion(completion);
    }
    Ok(gateway)
}

async fn load_schemas(
    config: &EngineConfig,
    schemas: &[String],
    snapshot_dir: Option<PathBuf>,
) -> Result<Vec<SchemaSnapshot>> {
    let introspector: Box<dyn SchemaIntrospector> = match (snapshot_dir, &config.database_url) {
        (Some(dir), _) => Box::new(JsonSchemaSource::new(dir)),
        (None, Some(url)) => Box::new(PgSchemaIntrospector::new(init_pool(url).await?)),
        (None, None) => bail!("either --snapshot-dir or DATABASE_URL is required"),
    };
    let policy = CallPolicy::new(config.collaborator_timeout());
    let mut snapshots = Vec::new();
    for schema in schemas {
        let snapshot = call_with_retry("schema introspection", policy, || introspector.introspect(schema))
            .await
            .with_context(|| format!("introspecting schema {}", schema))?;
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn save_merged(store: &SqliteStore, kg: &KnowledgeGraph) -> Result<u64> {
    let version = store.save_graph(kg)?;
    info!("Stored '{}' version {}", kg.name, version);
    Ok(version)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    let store = Arc::new(SqliteStore::open(&config.store_path)?);

    match args.command {
        Command::BuildKg {
            name,
            schemas,
            snapshot_dir,
            preferences,
            enrich,
        } => {
            if let Some(path) = preferences {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                store.save_preferences(&PreferenceSet::from_json(&raw)?)?;
            }
            let preferences = store.load_preferences()?;
            let snapshots = load_schemas(&config, &schemas, snapshot_dir).await?;
            let options = BuildOptions {
                alias_dictionary: store.alias_dictionary()?,
                ..BuildOptions::default()
            };
            let outcome = build_knowledge_graph(&name, &snapshots, &preferences, &options);
            for veto in &outcome.vetoed_hints {
                warn!(
                    "Field hint {}.{} -> {} vetoed: {}",
                    veto.table, veto.source_column, veto.target_column, veto.reason
                );
            }

            let mut kg = outcome.graph;
            if enrich {
                match completion_service(&config) {
                    Some(completion) => {
                        let options = EnrichmentOptions {
                            merge: config.confidence_merge,
                            ..EnrichmentOptions::default()
                        };
                        let policy = CallPolicy::new(config.collaborator_timeout());
                        let (enriched, report) =
                            enrich_with_completion(&kg, completion.as_ref(), &options, policy).await;
                        if let Some(reason) = &report.fallback_reason {
                            warn!("Enrichment fell back to rule-based graph: {}", reason);
                        }
                        kg = enriched;
                    }
                    None => warn!("--enrich ignored: no completion service configured"),
                }
            }
            save_merged(&store, &kg)?;
            print_json(&get_relationship_statistics(&kg))?;
        }
        Command::Stats { name } => {
            let kg = store.load_graph(&name)?;
            print_json(&get_relationship_statistics(&kg))?;
        }
        Command::Merge { name, strategy } => {
            let strategy: MergeStrategy = strategy.parse()?;
            let kg = store.load_graph(&name)?;
            let merged = merge_relationships(&kg, strategy);
            save_merged(&store, &merged)?;
            print_json(&get_relationship_statistics(&merged))?;
        }
        Command::Define { name, title, text } => {
            let gateway = gateway(&config, store.clone(), &name).await?;
            match gateway.define(&title, &text).await? {
                Defined::Relationship(relationship) => {
                    let merged = add_nl_relationships_to_kg(gateway.knowledge_graph(), &[relationship.clone()]);
                    save_merged(&store, &merged)?;
                    print_json(&relationship)?;
                }
                Defined::Query(definition) => {
                    let preview = gateway.preview(&definition.text).await?;
                    print_json(&serde_json::json!({
                        "definition": definition,
                        "preview": preview,
                    }))?;
                }
            }
        }
        Command::Run {
            name,
            id,
            scheduled,
            csv,
        } => {
            let gateway = gateway(&config, store.clone(), &name).await?;
            let trigger = if scheduled {
                RunTrigger::Scheduled
            } else {
                RunTrigger::Manual
            };
            let report = gateway.run(&id, trigger).await?;
            match csv {
                Some(path) => {
                    let output = QueryOutput {
                        columns: report.columns.clone(),
                        rows: report.rows.clone(),
                    };
                    output.write_csv(std::fs::File::create(&path)?)?;
                    info!("Wrote {} rows to {}", report.record_count, path.display());
                }
                None => print_json(&report)?,
            }
        }
        Command::Accept {
            name,
            id,
            sql,
            no_cache,
        } => {
            let gateway = gateway(&config, store.clone(), &name).await?;
            print_json(&gateway.accept(&id, &sql, !no_cache)?)?;
        }
        Command::Cache { name, id, enabled } => {
            let gateway = gateway(&config, store.clone(), &name).await?;
            print_json(&gateway.set_cache_enabled(&id, enabled)?)?;
        }
        Command::Rules {
            name,
            ruleset,
            min_confidence,
            match_types,
        } => {
            let kg = store.load_graph(&name)?;
            let preferences = store.load_preferences()?;
            let options = RuleGenerationOptions {
                min_confidence,
                allowed_match_types: match_types
                    .split(',')
                    .filter(|t| !t.trim().is_empty())
                    .map(str::parse::<MatchType>)
                    .collect::<recon_kg::Result<Vec<_>>>()?,
            };
            let output = generate_reconciliation_rules(&kg, &preferences, &options);
            for conflict in &output.conflicts {
                warn!("Rule conflict on {}.{}: {}", conflict.table, conflict.column, conflict.reason);
            }
            let ruleset = Ruleset::new(&ruleset, output.rules);
            store.save_ruleset(&ruleset)?;
            print_json(&ruleset)?;
        }
        Command::Batch { name, definitions } => {
            let gateway = gateway(&config, store.clone(), &name).await?;
            match definitions {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let entries: Vec<DefinitionEntry> = serde_json::from_str(&raw)?;
                    let pairs: Vec<(String, String)> = entries.into_iter().map(|e| (e.name, e.text)).collect();
                    let output = gateway.define_batch(&pairs).await;
                    if !output.relationships.is_empty() {
                        let merged = add_nl_relationships_to_kg(gateway.knowledge_graph(), &output.relationships);
                        save_merged(&store, &merged)?;
                    }
                    print_json(&output.report)?;
                }
                None => {
                    let ids: Vec<String> = store.list_definitions()?.into_iter().map(|d| d.id).collect();
                    let report = gateway.run_batch(&ids, RunTrigger::Scheduled).await;
                    print_json(&report)?;
                }
            }
        }
        Command::Alias { table, alias } => {
            store.add_alias(&table, &alias)?;
            print_json(&store.alias_dictionary()?)?;
        }
    }

    Ok(())
}
