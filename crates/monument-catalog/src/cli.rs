//! `monument` command line
//!
//! Translates files on disk into catalog operations and prints the
//! resulting reports.

use crate::catalog::{self, RemovalOutcome};
use crate::config::Config;
use crate::geodesy::Wgs84Transform;
use crate::ingest::{IncomingFile, IngestReport, Ingestor};
use crate::kml::{self, KmlReport};
use crate::{db, files, storage};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use monument_common::OutcomeMessage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Geodetic monument catalog
#[derive(Parser, Debug)]
#[command(name = "monument")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Ingest RINEX observation and navigation files
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Enrich points with metadata from KML exports
    ImportKml {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Match radius in meters (defaults to KML_MATCH_RADIUS_M)
        #[arg(long)]
        radius: Option<f64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download every file of an upload group as one ZIP archive
    Bundle {
        group: Uuid,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Delete a stored file record and its bytes
    DeleteFile { id: Uuid },

    /// Remove one observation, deleting its point if it was the last
    RemoveObservation { id: i64 },

    /// Show a point and its observation history
    ShowPoint { id: String },

    /// List recorded merges
    MergeAudits {
        /// Only merges flagged as ambiguous
        #[arg(long)]
        ambiguous: bool,
    },
}

fn print_messages(messages: &[OutcomeMessage]) {
    for message in messages {
        println!("[{:>7}] {}", message.level, message.text);
    }
}

fn print_ingest(report: &IngestReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_messages(&report.messages);
        println!("created observations: {}", report.total_created);
    }
    Ok(())
}

fn print_kml(report: &KmlReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_messages(&report.messages);
        print_messages(&[report.summary()]);
    }
    Ok(())
}

/// Execute one command. Returns false when the command ran but reported
/// failures.
pub async fn run(command: Commands) -> Result<bool> {
    let config = Config::load()?;
    let pool = db::create_pool(&config.database).await?;

    if let Commands::Migrate = command {
        db::run_migrations(&pool).await?;
        info!("migrations applied");
        println!("migrations applied");
        return Ok(true);
    }

    let store = storage::open_store(&config.storage).await?;

    match command {
        Commands::Migrate => Ok(true),

        Commands::Ingest { files, json } => {
            let reads = files.iter().map(|path| async move {
                IncomingFile::from_path(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))
            });
            let incoming = futures::future::try_join_all(reads).await?;

            let ingestor = Ingestor::new(pool, store, Arc::new(Wgs84Transform), config.ingest);
            let report = ingestor.ingest_batch(incoming).await;
            print_ingest(&report, json)?;
            Ok(report.success)
        },

        Commands::ImportKml {
            files,
            radius,
            json,
        } => {
            let radius = radius.unwrap_or(config.ingest.kml_match_radius_m);
            if !(radius.is_finite() && radius > 0.0) {
                anyhow::bail!("--radius must be a positive number of meters");
            }

            let mut total = KmlReport::default();
            for path in &files {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let report = kml::enrich_points(&pool, &bytes, radius)
                    .await
                    .with_context(|| format!("Failed to import {}", path.display()))?;
                total.absorb(report);
            }
            print_kml(&total, json)?;
            Ok(true)
        },

        Commands::Bundle { group, output } => {
            let mut conn = pool.acquire().await?;
            let archive = files::bundle_group(&mut conn, store.as_ref(), group).await?;
            tokio::fs::write(&output, &archive)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("wrote {} ({} bytes)", output.display(), archive.len());
            Ok(true)
        },

        Commands::DeleteFile { id } => {
            let record = files::delete_file(&pool, store.as_ref(), id).await?;
            println!("deleted file '{}' ({})", record.original_name, record.id);
            Ok(true)
        },

        Commands::RemoveObservation { id } => {
            let mut tx = pool.begin().await?;
            let outcome = catalog::remove_observation(&mut tx, id).await?;
            tx.commit().await?;
            match outcome {
                RemovalOutcome::PointDeleted { point_id } => {
                    println!("observation {} removed, point '{}' deleted", id, point_id)
                },
                RemovalOutcome::PointKept { point_id, location } => match location {
                    Some(location) => println!(
                        "observation {} removed, point '{}' moved to {}",
                        id, point_id, location
                    ),
                    None => println!("observation {} removed from point '{}'", id, point_id),
                },
            }
            Ok(true)
        },

        Commands::ShowPoint { id } => {
            let mut conn = pool.acquire().await?;
            let point = catalog::find_point(&mut conn, &id)
                .await?
                .with_context(|| format!("Point '{}' not found", id))?;
            let observations = catalog::observations_for_point(&mut conn, &point.id).await?;

            println!("{} at {} ({})", point.id, point.location(), point.point_type);
            if !point.aliases.is_empty() {
                println!("aliases: {}", point.aliases.join(", "));
            }
            for obs in &observations {
                let minutes = obs.duration().map(|d| d.num_minutes());
                println!(
                    "  #{} {} {}{}",
                    obs.id,
                    obs.observed_at.format("%Y-%m-%d %H:%M:%S"),
                    obs.location(),
                    minutes.map(|m| format!(" ({} min)", m)).unwrap_or_default()
                );
            }
            Ok(true)
        },

        Commands::MergeAudits { ambiguous } => {
            let mut conn = pool.acquire().await?;
            for audit in catalog::merge_audits(&mut conn, ambiguous).await? {
                println!(
                    "{} {} <- [{}] via {}{}",
                    audit.created_at.format("%Y-%m-%d %H:%M:%S"),
                    audit.main_point_id,
                    audit.merged_point_ids.join(", "),
                    audit.candidate_id,
                    if audit.ambiguous { " (ambiguous)" } else { "" }
                );
            }
            Ok(true)
        },
    }
}
