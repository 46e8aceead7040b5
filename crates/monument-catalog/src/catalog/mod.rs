//! The point catalog: matching, merging and observation history

pub mod ledger;
pub mod locks;
pub mod matcher;

pub use ledger::{
    observations_for_point, remove_observation, resync_location, upsert_observation,
    RemovalOutcome, UpsertOutcome,
};
pub use matcher::{
    fetch_point, locate_or_create, points_within_radius, select_main, MatchOptions, MatchOutcome,
};

use crate::error::CatalogResult;
use crate::models::{GeodeticPoint, MergeAudit, POINT_COLUMNS};
use sqlx::PgConnection;

/// Point by primary id or by any alias it absorbed
pub async fn find_point(conn: &mut PgConnection, id: &str) -> CatalogResult<Option<GeodeticPoint>> {
    let id = id.trim().to_uppercase();
    let point = sqlx::query_as::<_, GeodeticPoint>(&format!(
        r#"
        SELECT {} FROM geodetic_points
        WHERE id = $1 OR $1 = ANY(aliases)
        ORDER BY (id = $1) DESC, created_at
        LIMIT 1
        "#,
        POINT_COLUMNS
    ))
    .bind(&id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(point)
}

/// Merge audit rows, newest first
pub async fn merge_audits(conn: &mut PgConnection, only_ambiguous: bool) -> CatalogResult<Vec<MergeAudit>> {
    let rows = sqlx::query_as::<_, MergeAudit>(
        r#"
        SELECT id, main_point_id, merged_point_ids, candidate_id, candidate_count,
               collapsed_observations, ambiguous, created_at
        FROM merge_audits
        WHERE ambiguous OR NOT $1
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(only_ambiguous)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
