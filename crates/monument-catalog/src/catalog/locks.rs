//! Transaction-scoped advisory locks
//!
//! Every lock is released when the owning transaction ends. Keys are taken
//! in one global order (region key first, then ascending) so two
//! transactions can never wait on each other in a cycle within one call.

use crate::error::CatalogResult;
use crate::geodesy::SearchWindow;
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use tracing::{debug, instrument};

/// Windows overlapping more cells than this lock the whole catalog instead
pub const MAX_LOCKED_CELLS: usize = 64;

const REGION_SCOPE: &str = "region:*";

/// Stable 64-bit key for a named lock
pub fn lock_key(scope: &str, name: &str) -> i64 {
    let digest = Sha256::digest(format!("{}:{}", scope, name).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

async fn lock_exclusive(conn: &mut PgConnection, keys: &[i64]) -> CatalogResult<()> {
    for key in keys {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn sorted(mut keys: Vec<i64>) -> Vec<i64> {
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Serialize matching around a location.
///
/// Two candidates within the merge radius of each other always share at
/// least one grid cell of their windows, so their transactions queue up.
/// The candidate id gets its own key for the create-by-id path. Oversized
/// windows take the region key exclusively; ordinary ones hold it shared.
#[instrument(skip(conn, window))]
pub async fn lock_region(
    conn: &mut PgConnection,
    window: &SearchWindow,
    candidate_id: &str,
) -> CatalogResult<()> {
    let region = lock_key(REGION_SCOPE, "");
    let mut keys = vec![lock_key("point", candidate_id)];

    match window.grid_cells(MAX_LOCKED_CELLS) {
        Some(cells) => {
            sqlx::query("SELECT pg_advisory_xact_lock_shared($1)")
                .bind(region)
                .execute(&mut *conn)
                .await?;
            keys.extend(cells.iter().map(|(i, j)| lock_key("cell", &format!("{}:{}", i, j))));
            debug!(cells = cells.len(), "locking grid cells");
        },
        None => {
            debug!("search window too large, locking whole region");
            lock_exclusive(conn, &[region]).await?;
        },
    }

    lock_exclusive(conn, &sorted(keys)).await
}

/// Serialize operations on one point id
pub async fn lock_point(conn: &mut PgConnection, point_id: &str) -> CatalogResult<()> {
    lock_exclusive(conn, &[lock_key("point", point_id)]).await
}

/// Serialize group assignment for sibling files sharing a base name
pub async fn lock_upload_group(conn: &mut PgConnection, base_name: &str) -> CatalogResult<()> {
    lock_exclusive(conn, &[lock_key("group", &base_name.to_uppercase())]).await
}

/// Serialize storage of one digest and one target key
pub async fn lock_file(conn: &mut PgConnection, digest: &str, target_key: &str) -> CatalogResult<()> {
    let keys = sorted(vec![lock_key("file", digest), lock_key("path", target_key)]);
    lock_exclusive(conn, &keys).await
}
