//! Spatial point matching and merging
//!
//! An incoming station is attached to every existing point within the merge
//! radius or sharing its id. When several qualify they are the same
//! monument: the earliest created one survives and absorbs the rest.

use crate::catalog::{ledger, locks};
use crate::error::CatalogResult;
use crate::geodesy::{GeoLocation, SearchWindow};
use crate::models::{GeodeticPoint, POINT_COLUMNS};
use sqlx::PgConnection;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// Matching parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub radius_m: f64,
    /// Merges with more candidates than this are flagged ambiguous
    pub ambiguity_threshold: usize,
}

/// What [`locate_or_create`] did
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Created(GeodeticPoint),
    /// Exactly one existing point qualified
    Matched {
        point: GeodeticPoint,
        alias_added: bool,
    },
    /// Several points qualified and were collapsed into `point`
    Merged {
        point: GeodeticPoint,
        merged_ids: Vec<String>,
        /// Observations dropped because the survivor already had that session
        collapsed_observations: u64,
        ambiguous: bool,
    },
    /// Lost a creation race; the caller should roll back and retry
    Conflict { retryable: bool },
}

impl MatchOutcome {
    pub fn point(&self) -> Option<&GeodeticPoint> {
        match self {
            MatchOutcome::Created(point)
            | MatchOutcome::Matched { point, .. }
            | MatchOutcome::Merged { point, .. } => Some(point),
            MatchOutcome::Conflict { .. } => None,
        }
    }
}

fn bbox_query(suffix: &str) -> String {
    format!(
        r#"
        SELECT {} FROM geodetic_points
        WHERE (latitude BETWEEN $1 AND $2
               AND (longitude BETWEEN $3 AND $4 OR longitude BETWEEN $5 AND $6))
              {}
        "#,
        POINT_COLUMNS, suffix
    )
}

async fn fetch_window(
    conn: &mut PgConnection,
    window: &SearchWindow,
    sql: &str,
    candidate_id: Option<&str>,
) -> CatalogResult<Vec<GeodeticPoint>> {
    let first = window.lon_ranges.first().copied().unwrap_or((-180.0, 180.0));
    let second = window.lon_ranges.get(1).copied().unwrap_or(first);

    let mut query = sqlx::query_as::<_, GeodeticPoint>(sql)
        .bind(window.min_lat)
        .bind(window.max_lat)
        .bind(first.0)
        .bind(first.1)
        .bind(second.0)
        .bind(second.1);
    if let Some(id) = candidate_id {
        query = query.bind(id);
    }

    Ok(query.fetch_all(&mut *conn).await?)
}

/// Points within `radius_m` of `location`, nearest first. Read only.
pub async fn points_within_radius(
    conn: &mut PgConnection,
    location: &GeoLocation,
    radius_m: f64,
) -> CatalogResult<Vec<(GeodeticPoint, f64)>> {
    let window = SearchWindow::around(location, radius_m);
    let rows = fetch_window(conn, &window, &bbox_query(""), None).await?;

    let mut hits: Vec<(GeodeticPoint, f64)> = rows
        .into_iter()
        .map(|p| {
            let d = location.distance_m(&p.location());
            (p, d)
        })
        .filter(|(_, d)| *d <= radius_m)
        .collect();
    hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
    Ok(hits)
}

/// The point that survives a merge: earliest created, then smallest id
pub fn select_main(candidates: &[GeodeticPoint]) -> Option<&GeodeticPoint> {
    candidates
        .iter()
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Aliases of `main` after absorbing `duplicates` and seeing `candidate_id`
fn merged_aliases(main: &GeodeticPoint, duplicates: &[&GeodeticPoint], candidate_id: &str) -> Vec<String> {
    let mut aliases: BTreeSet<String> = main.aliases.iter().cloned().collect();
    for dup in duplicates {
        aliases.insert(dup.id.clone());
        aliases.extend(dup.aliases.iter().cloned());
    }
    aliases.insert(candidate_id.to_string());
    aliases.remove(&main.id);
    aliases.into_iter().collect()
}

/// Find the point an observation of `candidate_id` at `location` belongs
/// to, creating or merging points as needed.
///
/// Must run inside the caller's transaction; the advisory and row locks
/// taken here are held until it ends.
#[instrument(skip(conn, options), fields(%location))]
pub async fn locate_or_create(
    conn: &mut PgConnection,
    candidate_id: &str,
    location: GeoLocation,
    options: &MatchOptions,
) -> CatalogResult<MatchOutcome> {
    let window = SearchWindow::around(&location, options.radius_m);
    locks::lock_region(conn, &window, candidate_id).await?;

    let rows = fetch_window(
        conn,
        &window,
        &bbox_query("OR id = $7 ORDER BY created_at, id FOR UPDATE"),
        Some(candidate_id),
    )
    .await?;
    let candidates: Vec<GeodeticPoint> = rows
        .into_iter()
        .filter(|p| p.id == candidate_id || location.distance_m(&p.location()) <= options.radius_m)
        .collect();

    let Some(main) = select_main(&candidates).cloned() else {
        return create_point(conn, candidate_id, &location).await;
    };

    let duplicates: Vec<&GeodeticPoint> = candidates.iter().filter(|p| p.id != main.id).collect();
    let aliases = merged_aliases(&main, &duplicates, candidate_id);
    let alias_added = aliases != main.aliases;

    if duplicates.is_empty() {
        let point = if alias_added {
            store_aliases(conn, &main.id, &aliases).await?
        } else {
            main
        };
        return Ok(MatchOutcome::Matched { point, alias_added });
    }

    let merged_ids: Vec<String> = duplicates.iter().map(|p| p.id.clone()).collect();
    let ambiguous = candidates.len() > options.ambiguity_threshold;
    let collapsed = absorb(conn, &main.id, &merged_ids).await?;

    sqlx::query(
        r#"
        INSERT INTO merge_audits (
            main_point_id, merged_point_ids, candidate_id, candidate_count,
            collapsed_observations, ambiguous
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&main.id)
    .bind(&merged_ids)
    .bind(candidate_id)
    .bind(candidates.len() as i32)
    .bind(collapsed as i32)
    .bind(ambiguous)
    .execute(&mut *conn)
    .await?;

    store_aliases(conn, &main.id, &aliases).await?;
    ledger::resync_location(conn, &main.id).await?;
    let point = fetch_point(conn, &main.id).await?;

    if ambiguous {
        warn!(
            main = %point.id,
            merged = ?merged_ids,
            candidates = candidates.len(),
            "ambiguous merge flagged for review"
        );
    } else {
        info!(main = %point.id, merged = ?merged_ids, "points merged");
    }

    Ok(MatchOutcome::Merged {
        point,
        merged_ids,
        collapsed_observations: collapsed,
        ambiguous,
    })
}

async fn create_point(
    conn: &mut PgConnection,
    id: &str,
    location: &GeoLocation,
) -> CatalogResult<MatchOutcome> {
    let created = sqlx::query_as::<_, GeodeticPoint>(&format!(
        r#"
        INSERT INTO geodetic_points (id, longitude, latitude)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        RETURNING {}
        "#,
        POINT_COLUMNS
    ))
    .bind(id)
    .bind(location.longitude)
    .bind(location.latitude)
    .fetch_optional(&mut *conn)
    .await?;

    match created {
        Some(point) => {
            info!(point_id = %point.id, "point created");
            Ok(MatchOutcome::Created(point))
        },
        None => {
            warn!(point_id = %id, "point appeared concurrently, retry required");
            Ok(MatchOutcome::Conflict { retryable: true })
        },
    }
}

/// Move the duplicates' observations onto `main_id` and delete them.
///
/// A session already recorded on the survivor (or on a lower-numbered row
/// of another duplicate) is dropped rather than violating the per-point
/// timestamp uniqueness. Returns the number of dropped rows.
async fn absorb(conn: &mut PgConnection, main_id: &str, duplicate_ids: &[String]) -> CatalogResult<u64> {
    let collapsed = sqlx::query(
        r#"
        DELETE FROM observations o
        WHERE o.point_id = ANY($1)
          AND EXISTS (
              SELECT 1 FROM observations k
              WHERE k.observed_at = o.observed_at
                AND (k.point_id = $2 OR (k.point_id = ANY($1) AND k.id < o.id))
          )
        "#,
    )
    .bind(duplicate_ids)
    .bind(main_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query("UPDATE observations SET point_id = $2 WHERE point_id = ANY($1)")
        .bind(duplicate_ids)
        .bind(main_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM geodetic_points WHERE id = ANY($1)")
        .bind(duplicate_ids)
        .execute(&mut *conn)
        .await?;

    Ok(collapsed)
}

async fn store_aliases(
    conn: &mut PgConnection,
    point_id: &str,
    aliases: &[String],
) -> CatalogResult<GeodeticPoint> {
    let point = sqlx::query_as::<_, GeodeticPoint>(&format!(
        "UPDATE geodetic_points SET aliases = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        POINT_COLUMNS
    ))
    .bind(point_id)
    .bind(aliases)
    .fetch_one(&mut *conn)
    .await?;
    Ok(point)
}

/// Load one point by id
pub async fn fetch_point(conn: &mut PgConnection, point_id: &str) -> CatalogResult<GeodeticPoint> {
    sqlx::query_as::<_, GeodeticPoint>(&format!(
        "SELECT {} FROM geodetic_points WHERE id = $1",
        POINT_COLUMNS
    ))
    .bind(point_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| crate::error::CatalogError::not_found("Point", point_id))
}
