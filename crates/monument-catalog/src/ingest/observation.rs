//! One observation file: header to catalog entry

use crate::catalog::{self, MatchOptions, MatchOutcome, UpsertOutcome};
use crate::error::{CatalogError, CatalogResult};
use crate::geodesy::CoordinateTransform;
use crate::models::{NewObservation, UploadedFile};
use crate::rinex::{parse_epoch, parse_header, session_duration, HeaderSource, RinexHeader};
use monument_common::OutcomeMessage;
use sqlx::PgConnection;
use tracing::{info, instrument, warn};

/// Settings shared by every file of a batch
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub transform: &'a dyn CoordinateTransform,
    pub match_options: MatchOptions,
    pub header_line_limit: usize,
}

/// Result of [`parse_observation_file`]
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationParse {
    Completed {
        /// Observations inserted, zero for a duplicate session
        created: usize,
        messages: Vec<OutcomeMessage>,
    },
    /// Point creation raced another writer; roll back and retry the group
    Conflict { retryable: bool },
}

async fn read_header(source: HeaderSource, line_limit: usize) -> CatalogResult<RinexHeader> {
    tokio::task::spawn_blocking(move || parse_header(source, line_limit))
        .await
        .map_err(|e| CatalogError::Io(std::io::Error::other(e)))?
}

/// Parse an observation header and record its session.
///
/// Runs header, time and coordinate parsing, then matches or creates the
/// point, inserts the observation and resyncs the point location, all on
/// the caller's transaction.
#[instrument(skip(conn, source, ctx), fields(file = %file.original_name))]
pub async fn parse_observation_file(
    conn: &mut PgConnection,
    source: HeaderSource,
    file: &UploadedFile,
    ctx: &ParseContext<'_>,
) -> CatalogResult<ObservationParse> {
    let header = read_header(source, ctx.header_line_limit).await?;
    let mut messages = Vec::new();

    if !header.is_observation() {
        messages.push(OutcomeMessage::warning(format!(
            "header declares type '{}', not observation data; skipped",
            header.file_type.unwrap_or('?')
        )));
        return Ok(ObservationParse::Completed {
            created: 0,
            messages,
        });
    }
    if !header.complete {
        messages.push(OutcomeMessage::info(format!(
            "END OF HEADER not found within {} lines",
            ctx.header_line_limit
        )));
    }

    let observed_at = parse_epoch(&header.time_of_first_obs)?;
    let last = match header.time_of_last_obs.as_deref().map(parse_epoch).transpose() {
        Ok(last) => last,
        Err(e) => {
            warn!(error = %e, "ignoring malformed TIME OF LAST OBS");
            None
        },
    };
    let (location, _height) = ctx.transform.to_geodetic(&header.approx_position)?;

    let outcome =
        catalog::locate_or_create(conn, &header.marker_name, location, &ctx.match_options).await?;
    let point = match &outcome {
        MatchOutcome::Conflict { retryable } => {
            return Ok(ObservationParse::Conflict {
                retryable: *retryable,
            })
        },
        MatchOutcome::Created(point) => {
            messages.push(OutcomeMessage::success(format!(
                "created new point '{}' at {}",
                point.id, location
            )));
            point
        },
        MatchOutcome::Matched { point, alias_added } => {
            if *alias_added {
                messages.push(OutcomeMessage::info(format!(
                    "station '{}' matched existing point '{}' and was recorded as an alias",
                    header.marker_name, point.id
                )));
            }
            point
        },
        MatchOutcome::Merged {
            point,
            merged_ids,
            collapsed_observations,
            ambiguous,
        } => {
            let text = format!(
                "merged points {} into '{}'",
                merged_ids.join(", "),
                point.id
            );
            messages.push(if *ambiguous {
                OutcomeMessage::warning(format!("{} (ambiguous, flagged for review)", text))
            } else {
                OutcomeMessage::info(text)
            });
            if *collapsed_observations > 0 {
                messages.push(OutcomeMessage::info(format!(
                    "{} observation(s) already recorded on '{}' were dropped during the merge",
                    collapsed_observations, point.id
                )));
            }
            point
        },
    };

    let observation = NewObservation {
        location,
        observed_at,
        duration: session_duration(observed_at, last),
        raw: header.approx_position,
        receiver_number: header.receiver_number.clone(),
        antenna_height: header.antenna_height,
        source_file_id: Some(file.id),
    };

    let when = observed_at.format("%Y-%m-%d %H:%M");
    let created = match catalog::upsert_observation(conn, &point.id, &observation).await? {
        UpsertOutcome::Inserted(row) => {
            messages.push(OutcomeMessage::success(format!(
                "added observation for point '{}' at {}",
                point.id, when
            )));
            info!(point_id = %point.id, observation_id = row.id, "observation ingested");
            1
        },
        UpsertOutcome::Duplicate { existing_id } => {
            messages.push(OutcomeMessage::info(format!(
                "observation for point '{}' at {} already recorded",
                point.id, when
            )));
            info!(point_id = %point.id, existing_id, "duplicate observation");
            0
        },
    };

    catalog::resync_location(conn, &point.id).await?;

    Ok(ObservationParse::Completed { created, messages })
}
