//! regie operator CLI
//!
//! Consistency tooling for the event-management document store.
//!
//! ## Commands
//!
//! - `scan`: classify directory records against the migrated collection
//! - `duplicates <collection>`: detect duplicate records
//! - `fix-scope <collections>...`: stamp the tenant id onto unscoped documents
//! - `merge <collection> <ids>...`: collapse a duplicate cluster
//!
//! Destructive commands print their plan and stop unless `--apply` is
//! given; confirmation lives in the operator's shell history, not in a
//! blocking dialog.

use clap::{Parser, Subcommand};
use regie_core::{
    config::{load_config, ConsistencyConfig},
    document::{DocId, OrgId},
    event::Progress,
    repair, scan,
    scan::DuplicateCluster,
    similarity,
    store::db::SqliteStore,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "regie")]
#[command(author, version, about = "Consistency tooling for the event-management document store", long_about = None)]
struct Cli {
    /// Path to the SQLite document database
    #[arg(short, long, default_value = "regie_documents.db")]
    database: PathBuf,

    /// Tenant to operate on
    #[arg(short, long)]
    organization: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify directory records against the migrated collection
    Scan,

    /// Detect duplicate records in a collection
    Duplicates {
        /// Collection to inspect
        collection: String,

        /// Use weighted field similarity instead of exact name collisions
        #[arg(long)]
        fuzzy: bool,

        /// Persist detected clusters to the review queue
        #[arg(long)]
        save: bool,
    },

    /// Stamp the tenant id onto documents missing it
    FixScope {
        /// Collections to repair
        collections: Vec<String>,

        /// Execute the plan instead of only printing it
        #[arg(long)]
        apply: bool,
    },

    /// Collapse a duplicate cluster onto its principal record
    Merge {
        /// Collection holding the cluster documents
        collection: String,

        /// Ids of the cluster members
        ids: Vec<String>,

        /// Execute the plan instead of only printing it
        #[arg(long)]
        apply: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ConsistencyConfig::default(),
    };
    let org = OrgId::from(cli.organization.as_str());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let store = SqliteStore::open(&cli.database).await?;

        match cli.command {
            Commands::Scan => {
                let report =
                    scan::scan_migration(&store, &config, &org, &Progress::sink()).await?;
                println!("\n=== Migration Scan ({}) ===", org);
                println!("Checked:          {}", report.total_checked);
                println!("Migrated:         {}", report.migrated.len());
                println!("Not migrated:     {}", report.not_migrated.len());
                println!("Duplicated:       {}", report.duplicated.len());
                println!("Orphan liaisons:  {}", report.with_orphan_liaisons.len());
                for entry in &report.duplicated {
                    println!("  duplicated   {}  {}", entry.id, entry.display_name);
                }
                for entry in &report.not_migrated {
                    println!(
                        "  not migrated {}  {}  ({} persons, {} liaisons)",
                        entry.id, entry.display_name, entry.person_count, entry.liaison_count
                    );
                }
            }

            Commands::Duplicates {
                collection,
                fuzzy,
                save,
            } => {
                let clusters = if fuzzy {
                    let profile = if collection == config.collections.contacts {
                        similarity::person_profile()
                    } else {
                        similarity::structure_profile()
                    };
                    scan::find_similar(&store, &config, &org, &collection, &profile).await?
                } else {
                    scan::find_name_collisions(&store, &config, &org, &collection).await?
                };
                print_clusters(&collection, &clusters);
                if save && !clusters.is_empty() {
                    let saved = scan::save_for_review(&store, &config, &org, &clusters).await?;
                    println!("{saved} cluster(s) queued for review");
                }
            }

            Commands::FixScope { collections, apply } => {
                let collections = if collections.is_empty() {
                    let names = &config.collections;
                    vec![
                        names.bookings.clone(),
                        names.artists.clone(),
                        names.venues.clone(),
                        names.contacts.clone(),
                        names.structures.clone(),
                        names.liaisons.clone(),
                    ]
                } else {
                    collections
                };
                let plan = repair::plan_missing_scope(&store, &config, &org, &collections).await?;
                println!("\n=== Tenant Scope Plan ({}) ===", org);
                println!("Unscoped documents: {}", plan.len());
                for entry in &plan.entries {
                    println!("  {}/{}  {}", entry.collection, entry.id, entry.display_name);
                }
                if plan.is_empty() {
                    return Ok(());
                }
                if !apply {
                    println!("\nDry run. Re-run with --apply to stamp organization {org}.");
                    return Ok(());
                }
                let (progress, mut events) = Progress::channel();
                let summary =
                    repair::apply_missing_scope(&store, &config, &plan, &progress).await?;
                drop(progress);
                while let Ok(event) = events.try_recv() {
                    println!("  {event}");
                }
                println!(
                    "Stamped {}/{} documents in {} batch(es)",
                    summary.stamped, summary.total, summary.batches
                );
            }

            Commands::Merge {
                collection,
                ids,
                apply,
            } => {
                let ids: Vec<DocId> = ids.into_iter().map(DocId::from).collect();
                let plan =
                    repair::plan_merge(&store, &config, &org, &collection, &ids).await?;
                println!("\n=== Merge Plan ({}) ===", collection);
                println!("Principal:  {}  {}", plan.principal, plan.principal_name);
                println!("Duplicates: {}", plan.duplicates.len());
                for dup in &plan.duplicates {
                    println!("  retire {dup}");
                }
                println!("Repoints:   {}", plan.repoints.len());
                for repoint in &plan.repoints {
                    println!("  rewrite {}/{}", repoint.collection, repoint.id);
                }
                if !apply {
                    println!("\nDry run. Re-run with --apply to execute the merge.");
                    return Ok(());
                }
                let (progress, mut events) = Progress::channel();
                let summary = repair::apply_merge(&store, &config, &plan, &progress).await?;
                drop(progress);
                while let Ok(event) = events.try_recv() {
                    println!("  {event}");
                }
                println!(
                    "Merged onto {}: {} repointed, {} deleted, {} archived",
                    summary.principal, summary.repointed, summary.deleted, summary.archived
                );
            }
        }

        Ok::<(), regie_core::RegieError>(())
    })?;

    Ok(())
}

fn print_clusters(collection: &str, clusters: &[DuplicateCluster]) {
    println!("\n=== Duplicates in '{collection}' ===");
    if clusters.is_empty() {
        println!("No duplicate clusters found.");
        return;
    }
    for cluster in clusters {
        match &cluster.score {
            Some(score) => println!("cluster '{}' (score {:.2}):", cluster.key, score.score),
            None => println!("cluster '{}':", cluster.key),
        }
        for member in &cluster.members {
            match &member.created_at {
                Some(created) => {
                    println!("  {}  {}  created {}", member.id, member.display_name, created)
                }
                None => println!("  {}  {}", member.id, member.display_name),
            }
        }
    }
}
