//! Observation history of each point
//!
//! Observations are inserted once and never edited; the only mutation is a
//! change of owning point during a merge. A point's stored location always
//! equals the location of its latest observation.

use crate::catalog::locks;
use crate::error::{CatalogError, CatalogResult};
use crate::geodesy::GeoLocation;
use crate::models::{NewObservation, Observation, OBSERVATION_COLUMNS};
use sqlx::PgConnection;
use tracing::{debug, info, instrument};

/// Result of recording an observation
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(Observation),
    /// The point already has an observation at this timestamp
    Duplicate { existing_id: i64 },
}

/// What happened to the owning point after an observation was removed
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalOutcome {
    /// Other observations remain; the location was recomputed
    PointKept {
        point_id: String,
        location: Option<GeoLocation>,
    },
    /// The removed observation was the last one, so the point went too
    PointDeleted { point_id: String },
}

/// Insert an observation unless (point, timestamp) is already recorded.
#[instrument(skip(conn, observation), fields(observed_at = %observation.observed_at))]
pub async fn upsert_observation(
    conn: &mut PgConnection,
    point_id: &str,
    observation: &NewObservation,
) -> CatalogResult<UpsertOutcome> {
    let duration_us = observation
        .duration
        .and_then(|d| d.num_microseconds());

    let inserted = sqlx::query_as::<_, Observation>(&format!(
        r#"
        INSERT INTO observations (
            point_id, longitude, latitude, observed_at, duration_us,
            raw_x, raw_y, raw_z, receiver_number, antenna_height, source_file_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (point_id, observed_at) DO NOTHING
        RETURNING {}
        "#,
        OBSERVATION_COLUMNS
    ))
    .bind(point_id)
    .bind(observation.location.longitude)
    .bind(observation.location.latitude)
    .bind(observation.observed_at)
    .bind(duration_us)
    .bind(observation.raw.x)
    .bind(observation.raw.y)
    .bind(observation.raw.z)
    .bind(observation.receiver_number.as_deref())
    .bind(observation.antenna_height)
    .bind(observation.source_file_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = inserted {
        debug!(observation_id = row.id, "observation recorded");
        return Ok(UpsertOutcome::Inserted(row));
    }

    let existing_id: i64 = sqlx::query_scalar(
        "SELECT id FROM observations WHERE point_id = $1 AND observed_at = $2",
    )
    .bind(point_id)
    .bind(observation.observed_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(UpsertOutcome::Duplicate { existing_id })
}

/// Set the point location to its latest observation's location.
///
/// Latest means greatest timestamp, then greatest row id. Returns the new
/// location only when it changed.
#[instrument(skip(conn))]
pub async fn resync_location(
    conn: &mut PgConnection,
    point_id: &str,
) -> CatalogResult<Option<GeoLocation>> {
    let latest: Option<(f64, f64)> = sqlx::query_as(
        r#"
        SELECT longitude, latitude FROM observations
        WHERE point_id = $1
        ORDER BY observed_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(point_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((longitude, latitude)) = latest else {
        return Ok(None);
    };

    let updated = sqlx::query(
        r#"
        UPDATE geodetic_points
        SET longitude = $2, latitude = $3, updated_at = NOW()
        WHERE id = $1 AND (longitude <> $2 OR latitude <> $3)
        "#,
    )
    .bind(point_id)
    .bind(longitude)
    .bind(latitude)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    let location = GeoLocation::new(longitude, latitude);
    debug!(%location, "representative location moved");
    Ok(Some(location))
}

/// Delete one observation, then resync or delete its point.
#[instrument(skip(conn))]
pub async fn remove_observation(
    conn: &mut PgConnection,
    observation_id: i64,
) -> CatalogResult<RemovalOutcome> {
    let point_id: String = sqlx::query_scalar("SELECT point_id FROM observations WHERE id = $1")
        .bind(observation_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CatalogError::not_found("Observation", observation_id))?;

    locks::lock_point(conn, &point_id).await?;
    sqlx::query("SELECT id FROM geodetic_points WHERE id = $1 FOR UPDATE")
        .bind(&point_id)
        .execute(&mut *conn)
        .await?;

    // a concurrent merge may have re-parented the row while we waited
    let point_id: String =
        sqlx::query_scalar("DELETE FROM observations WHERE id = $1 RETURNING point_id")
            .bind(observation_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| CatalogError::not_found("Observation", observation_id))?;

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM observations WHERE point_id = $1")
        .bind(&point_id)
        .fetch_one(&mut *conn)
        .await?;

    if remaining == 0 {
        sqlx::query("DELETE FROM geodetic_points WHERE id = $1")
            .bind(&point_id)
            .execute(&mut *conn)
            .await?;
        info!(observation_id, %point_id, "removed last observation, point deleted");
        return Ok(RemovalOutcome::PointDeleted { point_id });
    }

    let location = resync_location(conn, &point_id).await?;
    info!(observation_id, %point_id, remaining, "observation removed");
    Ok(RemovalOutcome::PointKept { point_id, location })
}

/// A point's observations, newest first
pub async fn observations_for_point(
    conn: &mut PgConnection,
    point_id: &str,
) -> CatalogResult<Vec<Observation>> {
    let rows = sqlx::query_as::<_, Observation>(&format!(
        "SELECT {} FROM observations WHERE point_id = $1 ORDER BY observed_at DESC, id DESC",
        OBSERVATION_COLUMNS
    ))
    .bind(point_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
