//! Content-addressed file records
//!
//! Every upload is keyed by the SHA-256 of its bytes. Identical bytes map to
//! one record no matter how often or under which name they arrive, and
//! sibling files of one station session share an upload group.

use crate::catalog::locks;
use crate::error::{CatalogError, CatalogResult};
use crate::models::{UploadedFile, FILE_COLUMNS};
use crate::storage::ByteStore;
use monument_common::checksum::sha256_bytes;
use monument_common::types::rinex_base_name;
use monument_common::FileKind;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub mod bundle;
pub mod naming;

pub use bundle::bundle_group;
pub use naming::{candidate_keys, target_key};

/// Result of [`store_or_reuse`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub record: UploadedFile,
    /// False when an existing record with the same digest was reused
    pub is_new: bool,
    /// A record for these bytes existed but its stored bytes were gone; it
    /// was removed before storing again
    pub purged_stale: bool,
}

/// Store `bytes` under `target_path` unless identical bytes are already
/// stored, returning the record that owns them.
///
/// Runs inside the caller's transaction. Bytes are written before the
/// record is inserted; when the transaction rolls back the caller removes
/// the key of any record reported as new.
#[instrument(skip(conn, store, bytes), fields(size = bytes.len()))]
pub async fn store_or_reuse(
    conn: &mut PgConnection,
    store: &dyn ByteStore,
    bytes: &[u8],
    target_path: &str,
) -> CatalogResult<StoredFile> {
    let original_name = naming::key_file_name(target_path).to_string();
    let kind = FileKind::infer(&original_name)
        .ok_or_else(|| CatalogError::UnknownFileKind(original_name.clone()))?;
    let base_name = rinex_base_name(&original_name)
        .ok_or_else(|| CatalogError::UnknownFileKind(original_name.clone()))?;
    crate::storage::validate_key(target_path)?;

    let digest = sha256_bytes(bytes);
    locks::lock_upload_group(conn, &base_name).await?;
    locks::lock_file(conn, &digest, target_path).await?;

    let mut purged_stale = false;
    if let Some(existing) = find_by_hash(conn, &digest).await? {
        if store.exists(&existing.storage_path).await? {
            debug!(file_id = %existing.id, "identical bytes already stored");
            return Ok(StoredFile {
                record: existing,
                is_new: false,
                purged_stale,
            });
        }

        let stale = CatalogError::StorageInconsistency {
            file_id: existing.id,
            path: existing.storage_path.clone(),
        };
        warn!(error = %stale, "purging stale file record");
        sqlx::query("DELETE FROM uploaded_files WHERE id = $1")
            .bind(existing.id)
            .execute(&mut *conn)
            .await?;
        purged_stale = true;
    }

    let key = free_key(store, target_path, &digest).await?;
    let upload_group = sibling_group(conn, &base_name).await?.unwrap_or_else(Uuid::new_v4);

    store.save(&key, bytes).await?;

    let inserted = sqlx::query_as::<_, UploadedFile>(&format!(
        r#"
        INSERT INTO uploaded_files (
            id, file_hash, storage_path, original_name, base_name, file_kind, upload_group
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (file_hash) DO NOTHING
        RETURNING {}
        "#,
        FILE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&digest)
    .bind(&key)
    .bind(&original_name)
    .bind(&base_name)
    .bind(kind.as_str())
    .bind(upload_group)
    .fetch_optional(&mut *conn)
    .await;

    let inserted = match inserted {
        Ok(inserted) => inserted,
        Err(e) => {
            if let Err(cleanup) = store.delete(&key).await {
                warn!(%key, error = %cleanup, "failed to remove bytes after failed insert");
            }
            return Err(e.into());
        },
    };

    match inserted {
        Some(record) => {
            info!(file_id = %record.id, key = %record.storage_path, kind = %kind, "file stored");
            Ok(StoredFile {
                record,
                is_new: true,
                purged_stale,
            })
        },
        None => {
            // inserted by a writer that bypassed the digest lock
            let existing = find_by_hash(conn, &digest)
                .await?
                .ok_or_else(|| CatalogError::not_found("File with digest", &digest))?;
            if existing.storage_path != key {
                store.delete(&key).await?;
            }
            Ok(StoredFile {
                record: existing,
                is_new: false,
                purged_stale,
            })
        },
    }
}

/// First candidate key not holding any bytes yet. The full-digest key is
/// used even when occupied, since whatever is there has the same content.
async fn free_key(store: &dyn ByteStore, target: &str, digest: &str) -> CatalogResult<String> {
    let candidates = naming::candidate_keys(target, digest);
    for key in &candidates {
        if !store.exists(key).await? {
            return Ok(key.clone());
        }
        debug!(%key, "storage key occupied");
    }
    Ok(candidates.last().cloned().unwrap_or_else(|| target.to_string()))
}

async fn find_by_hash(conn: &mut PgConnection, digest: &str) -> CatalogResult<Option<UploadedFile>> {
    let record = sqlx::query_as::<_, UploadedFile>(&format!(
        "SELECT {} FROM uploaded_files WHERE file_hash = $1",
        FILE_COLUMNS
    ))
    .bind(digest)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

/// Group of the most recent stored sibling with the same base name
async fn sibling_group(conn: &mut PgConnection, base_name: &str) -> CatalogResult<Option<Uuid>> {
    let group = sqlx::query_scalar(
        r#"
        SELECT upload_group FROM uploaded_files
        WHERE UPPER(base_name) = UPPER($1)
        ORDER BY uploaded_at DESC, id
        LIMIT 1
        "#,
    )
    .bind(base_name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(group)
}

/// Look up one file record
pub async fn get_file(conn: &mut PgConnection, file_id: Uuid) -> CatalogResult<UploadedFile> {
    sqlx::query_as::<_, UploadedFile>(&format!(
        "SELECT {} FROM uploaded_files WHERE id = $1",
        FILE_COLUMNS
    ))
    .bind(file_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CatalogError::not_found("File", file_id))
}

/// All files of an upload group, observation files first
pub async fn group_files(conn: &mut PgConnection, group: Uuid) -> CatalogResult<Vec<UploadedFile>> {
    let rows = sqlx::query_as::<_, UploadedFile>(&format!(
        r#"
        SELECT {} FROM uploaded_files
        WHERE upload_group = $1
        ORDER BY (file_kind = 'observation') DESC, file_kind, uploaded_at, id
        "#,
        FILE_COLUMNS
    ))
    .bind(group)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// The most recently stored observation file of a group
pub async fn find_group_observation(
    conn: &mut PgConnection,
    group: Uuid,
) -> CatalogResult<Option<UploadedFile>> {
    let record = sqlx::query_as::<_, UploadedFile>(&format!(
        r#"
        SELECT {} FROM uploaded_files
        WHERE upload_group = $1 AND file_kind = 'observation'
        ORDER BY uploaded_at DESC, id
        LIMIT 1
        "#,
        FILE_COLUMNS
    ))
    .bind(group)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

/// Delete a file record, then its bytes unless another record still
/// points at the same key. Observations keep their rows with the source
/// reference cleared.
#[instrument(skip(pool, store))]
pub async fn delete_file(
    pool: &PgPool,
    store: &dyn ByteStore,
    file_id: Uuid,
) -> CatalogResult<UploadedFile> {
    let mut tx = pool.begin().await?;

    let record = get_file(&mut tx, file_id).await?;
    locks::lock_file(&mut tx, &record.file_hash, &record.storage_path).await?;

    let deleted = sqlx::query("DELETE FROM uploaded_files WHERE id = $1")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(CatalogError::not_found("File", file_id));
    }

    let sharing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uploaded_files WHERE storage_path = $1")
        .bind(&record.storage_path)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    if sharing == 0 {
        store.delete(&record.storage_path).await?;
        info!(key = %record.storage_path, "file record and bytes deleted");
    } else {
        info!(key = %record.storage_path, sharing, "file record deleted, bytes still referenced");
    }

    Ok(record)
}
