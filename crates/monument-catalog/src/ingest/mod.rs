//! RINEX batch ingestion
//!
//! A batch is split into upload groups by base station name. Each group is
//! stored, checked for completeness and parsed inside its own transaction,
//! so a failing group never affects its neighbours.
//!
//! # Flow per group
//!
//! 1. Store or reuse each member file by content digest
//! 2. Warn when the group lacks one of the expected kinds
//! 3. Parse the observation file from this batch, or the one stored
//!    earlier for the same group
//! 4. Commit; on a retryable conflict roll back and start over

use crate::catalog::MatchOptions;
use crate::config::IngestConfig;
use crate::error::{CatalogError, CatalogResult};
use crate::files::{self, target_key, StoredFile};
use crate::geodesy::CoordinateTransform;
use crate::models::UploadedFile;
use crate::rinex::HeaderSource;
use crate::storage::ByteStore;
use monument_common::types::rinex_base_name;
use monument_common::{FileKind, MessageLevel, OutcomeMessage};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub mod observation;

pub use observation::{parse_observation_file, ObservationParse, ParseContext};

/// A file handed to [`Ingestor::ingest_batch`]
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk, keeping only its file name
    pub async fn from_path(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }
}

/// Aggregated outcome of one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// False when any file or group failed
    pub success: bool,
    pub messages: Vec<OutcomeMessage>,
    /// Observations created across all groups
    pub total_created: usize,
}

impl IngestReport {
    pub fn has_failures(&self) -> bool {
        self.messages.iter().any(|m| m.level == MessageLevel::Danger)
    }
}

enum GroupAttempt {
    Done {
        created: usize,
        messages: Vec<OutcomeMessage>,
    },
    Conflict,
}

/// Drives batch ingestion against one database and byte store
#[derive(Debug, Clone)]
pub struct Ingestor {
    pool: PgPool,
    store: Arc<dyn ByteStore>,
    transform: Arc<dyn CoordinateTransform>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        pool: PgPool,
        store: Arc<dyn ByteStore>,
        transform: Arc<dyn CoordinateTransform>,
        config: IngestConfig,
    ) -> Self {
        Self {
            pool,
            store,
            transform,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn parse_context(&self) -> ParseContext<'_> {
        ParseContext {
            transform: self.transform.as_ref(),
            match_options: MatchOptions {
                radius_m: self.config.merge_radius_m,
                ambiguity_threshold: self.config.merge_audit_threshold,
            },
            header_line_limit: self.config.header_line_limit,
        }
    }

    /// Ingest a batch of uploaded files.
    ///
    /// Never fails as a whole: problems are reported per file or group.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn ingest_batch(&self, files: Vec<IncomingFile>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut groups: BTreeMap<String, Vec<IncomingFile>> = BTreeMap::new();

        for file in files {
            match rinex_base_name(&file.name) {
                Some(base) => groups.entry(base).or_default().push(file),
                None => {
                    warn!(file = %file.name, "unknown file kind");
                    report
                        .messages
                        .push(OutcomeMessage::danger("cannot determine file kind").scoped(&file.name));
                },
            }
        }

        for (base, members) in &groups {
            let (created, messages) = self.ingest_group(base, members).await;
            report.total_created += created;
            report.messages.extend(messages);
        }

        report.success = !report.has_failures();
        info!(
            groups = groups.len(),
            created = report.total_created,
            success = report.success,
            "batch ingested"
        );
        report
    }

    /// One group with bounded retries on conflicts
    async fn ingest_group(&self, base: &str, members: &[IncomingFile]) -> (usize, Vec<OutcomeMessage>) {
        let max_attempts = self.config.merge_conflict_retries + 1;

        for attempt in 1..=max_attempts {
            let mut saved_keys = Vec::new();
            let result = self.try_group(base, members, &mut saved_keys).await;

            let retry_reason = match result {
                Ok(GroupAttempt::Done { created, messages }) => return (created, messages),
                Ok(GroupAttempt::Conflict) => "point created concurrently".to_string(),
                Err(e) if is_retryable(&e) => e.to_string(),
                Err(e) => {
                    self.discard(&saved_keys).await;
                    error!(group = %base, error = %e, "group ingestion failed");
                    let text = format!("processing failed, group rolled back: {}", e);
                    return (0, vec![OutcomeMessage::danger(text).scoped(base)]);
                },
            };

            self.discard(&saved_keys).await;
            warn!(group = %base, attempt, reason = %retry_reason, "retrying group");
        }

        let text = format!(
            "gave up after {} attempts because of concurrent changes",
            max_attempts
        );
        (0, vec![OutcomeMessage::danger(text).scoped(base)])
    }

    /// Remove bytes written by an attempt that rolled back
    async fn discard(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.store.delete(key).await {
                warn!(%key, error = %e, "failed to remove bytes of rolled back upload");
            }
        }
    }

    async fn try_group(
        &self,
        base: &str,
        members: &[IncomingFile],
        saved_keys: &mut Vec<String>,
    ) -> CatalogResult<GroupAttempt> {
        let mut tx = self.pool.begin().await?;
        let mut messages = Vec::new();
        let mut stored: Vec<(&IncomingFile, UploadedFile)> = Vec::new();

        for file in members {
            let key = target_key(&self.config.upload_prefix, &file.name);
            let StoredFile {
                record,
                is_new,
                purged_stale,
            } = files::store_or_reuse(&mut tx, self.store.as_ref(), &file.bytes, &key).await?;

            if purged_stale {
                messages.push(
                    OutcomeMessage::warning("previous record had lost its stored bytes and was replaced")
                        .scoped(&file.name),
                );
            }
            if is_new {
                saved_keys.push(record.storage_path.clone());
                messages.push(OutcomeMessage::success("new file stored").scoped(&file.name));
            } else {
                messages.push(
                    OutcomeMessage::info(format!(
                        "identical file already stored as '{}', not saved again; re-processing",
                        record.stored_name()
                    ))
                    .scoped(&file.name),
                );
            }
            stored.push((file, record));
        }

        let group_ids: BTreeSet<Uuid> = stored.iter().map(|(_, r)| r.upload_group).collect();
        let mut kinds: BTreeSet<FileKind> = stored.iter().filter_map(|(_, r)| r.kind()).collect();
        for group in &group_ids {
            kinds.extend(files::group_files(&mut tx, *group).await?.iter().filter_map(|r| r.kind()));
        }
        let missing: Vec<&str> = FileKind::EXPECTED
            .iter()
            .filter(|k| !kinds.iter().any(|have| have.covers(**k)))
            .map(|k| k.label())
            .collect();
        if !missing.is_empty() {
            messages.push(
                OutcomeMessage::warning(format!("incomplete upload group, missing {}", missing.join(", ")))
                    .scoped(base),
            );
        }

        // observation files of this batch, else the ones stored earlier
        let mut seen = BTreeSet::new();
        let mut to_parse: Vec<(HeaderSource, UploadedFile, String)> = Vec::new();
        for (file, record) in &stored {
            if record.kind() == Some(FileKind::Observation) && seen.insert(record.id) {
                to_parse.push((HeaderSource::Bytes(file.bytes.clone()), record.clone(), file.name.clone()));
            }
        }
        if to_parse.is_empty() {
            for group in &group_ids {
                if let Some(record) = files::find_group_observation(&mut tx, *group).await? {
                    let source = self.store.header_source(&record.storage_path).await?;
                    messages.push(
                        OutcomeMessage::info(format!(
                            "processing previously stored observation file '{}'",
                            record.original_name
                        ))
                        .scoped(base),
                    );
                    let name = record.original_name.clone();
                    to_parse.push((source, record, name));
                }
            }
        }
        if to_parse.is_empty() {
            messages.push(OutcomeMessage::info("no observation file to process").scoped(base));
        }

        let ctx = self.parse_context();
        let mut created = 0;
        for (source, record, name) in to_parse {
            match parse_observation_file(&mut tx, source, &record, &ctx).await {
                Ok(ObservationParse::Completed {
                    created: count,
                    messages: parsed,
                }) => {
                    created += count;
                    messages.extend(parsed.into_iter().map(|m| m.scoped(&name)));
                },
                Ok(ObservationParse::Conflict { .. }) => return Ok(GroupAttempt::Conflict),
                Err(e) if is_retryable(&e) => return Err(e),
                Err(e @ CatalogError::Database(_)) => return Err(e),
                Err(e) => {
                    // header problems reject the file but not its siblings
                    warn!(file = %name, error = %e, "observation file rejected");
                    messages.push(OutcomeMessage::danger(e.to_string()).scoped(&name));
                },
            }
        }

        tx.commit().await?;
        Ok(GroupAttempt::Done { created, messages })
    }
}

/// Deadlocks and serialization failures go away on retry
pub fn is_retryable(err: &CatalogError) -> bool {
    match err {
        CatalogError::Database(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("40P01") | Some("40001"))
        },
        _ => false,
    }
}
