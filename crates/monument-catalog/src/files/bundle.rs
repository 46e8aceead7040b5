//! ZIP export of an upload group

use crate::error::{CatalogError, CatalogResult};
use crate::files::group_files;
use crate::storage::ByteStore;
use monument_common::checksum::verify_sha256;
use sqlx::PgConnection;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::{info, instrument};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Pack every file of `group` into one ZIP archive.
///
/// Entries use the original upload names; a name seen twice falls back to
/// the stored key name. Bytes are checked against their recorded digest.
#[instrument(skip(conn, store))]
pub async fn bundle_group(
    conn: &mut PgConnection,
    store: &dyn ByteStore,
    group: Uuid,
) -> CatalogResult<Vec<u8>> {
    let files = group_files(conn, group).await?;
    if files.is_empty() {
        return Err(CatalogError::not_found("Upload group", group));
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut names = HashSet::new();

    for file in &files {
        let data = store.read(&file.storage_path).await.map_err(|_| {
            CatalogError::StorageInconsistency {
                file_id: file.id,
                path: file.storage_path.clone(),
            }
        })?;
        verify_sha256(&data, &file.file_hash)?;

        let name = if names.insert(file.original_name.clone()) {
            file.original_name.clone()
        } else {
            file.stored_name().to_string()
        };
        writer.start_file(name, options)?;
        writer.write_all(&data)?;
    }

    let archive = writer.finish()?.into_inner();
    info!(files = files.len(), size = archive.len(), "upload group bundled");
    Ok(archive)
}
