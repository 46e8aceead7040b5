//! KML metadata enrichment
//!
//! Classification fields exported from a survey register are written onto
//! catalog points found near each placemark. Locations, ids and merge state
//! are never touched.

use crate::catalog::{locks, points_within_radius};
use crate::error::CatalogResult;
use monument_common::OutcomeMessage;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, instrument};

pub mod parse;

pub use parse::{
    classify_point_type, parse_coordinates, parse_placemarks, DescriptionParser, Placemark,
    PointMetadata,
};

/// Counters and messages for one KML document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KmlReport {
    pub updated: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub messages: Vec<OutcomeMessage>,
}

impl KmlReport {
    pub fn summary(&self) -> OutcomeMessage {
        OutcomeMessage::success(format!(
            "KML processed: {} updated, {} not found, {} skipped",
            self.updated, self.not_found, self.skipped
        ))
    }

    /// Add another document's counts and messages
    pub fn absorb(&mut self, other: KmlReport) {
        self.updated += other.updated;
        self.not_found += other.not_found;
        self.skipped += other.skipped;
        self.messages.extend(other.messages);
    }
}

/// Apply every placemark of a KML document to the point found within
/// `radius_m` of it. Only an unambiguous single match is updated.
///
/// Placemarks without usable coordinates, with several matches, or with a
/// single match but an empty or missing description count as skipped.
#[instrument(skip(pool, bytes), fields(size = bytes.len()))]
pub async fn enrich_points(pool: &PgPool, bytes: &[u8], radius_m: f64) -> CatalogResult<KmlReport> {
    let placemarks = parse_placemarks(bytes)?;
    let parser = DescriptionParser::new()?;
    let mut report = KmlReport::default();

    for placemark in &placemarks {
        let name = placemark.display_name();

        let Some(location) = placemark.coordinates.as_deref().and_then(parse_coordinates) else {
            report.skipped += 1;
            let reason = match &placemark.coordinates {
                Some(raw) => format!("invalid coordinates '{}'", raw),
                None => "no coordinates".to_string(),
            };
            report
                .messages
                .push(OutcomeMessage::warning(format!("{}, skipped", reason)).scoped(name));
            continue;
        };

        let mut tx = pool.begin().await?;
        let hits = points_within_radius(&mut tx, &location, radius_m).await?;

        let point = match hits.as_slice() {
            [] => {
                report.not_found += 1;
                report.messages.push(
                    OutcomeMessage::info(format!("no point within {} m", radius_m)).scoped(name),
                );
                continue;
            },
            [(point, _)] => point,
            many => {
                report.skipped += 1;
                let ids: Vec<&str> = many.iter().map(|(p, _)| p.id.as_str()).collect();
                report.messages.push(
                    OutcomeMessage::warning(format!(
                        "{} points within {} m ({}), skipped as ambiguous",
                        many.len(),
                        radius_m,
                        ids.join(", ")
                    ))
                    .scoped(name),
                );
                continue;
            },
        };

        let Some(description) = placemark.description.as_deref().filter(|d| !d.trim().is_empty()) else {
            report.skipped += 1;
            report.messages.push(
                OutcomeMessage::info(format!("matched point '{}' but has no description, skipped", point.id))
                    .scoped(name),
            );
            continue;
        };
        let meta = parser.parse(description);

        locks::lock_point(&mut tx, &point.id).await?;
        let updated = sqlx::query(
            r#"
            UPDATE geodetic_points
            SET network_class = $2,
                index_name = $3,
                center_type = $4,
                mark_number = $5,
                point_type = $6,
                station_name = CASE WHEN station_name = '' THEN $7 ELSE station_name END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&point.id)
        .bind(meta.network_class.as_deref().unwrap_or(""))
        .bind(meta.index_name.as_deref().unwrap_or(""))
        .bind(meta.center_type.as_deref().unwrap_or(""))
        .bind(meta.mark_number.as_deref().unwrap_or(""))
        .bind(meta.point_type.as_str())
        .bind(placemark.name.as_deref().unwrap_or(""))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if updated.rows_affected() == 0 {
            // merged away between the lookup and the update
            report.not_found += 1;
            debug!(point_id = %point.id, "point vanished before update");
            continue;
        }

        report.updated += 1;
        report.messages.push(
            OutcomeMessage::success(format!("point '{}' updated ({})", point.id, meta.point_type))
                .scoped(name),
        );
    }

    info!(
        placemarks = placemarks.len(),
        updated = report.updated,
        not_found = report.not_found,
        skipped = report.skipped,
        "KML enrichment finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_absorb_and_summary() {
        let mut total = KmlReport {
            updated: 1,
            ..Default::default()
        };
        total.absorb(KmlReport {
            updated: 2,
            not_found: 1,
            skipped: 3,
            messages: vec![OutcomeMessage::info("x")],
        });
        assert_eq!((total.updated, total.not_found, total.skipped), (3, 1, 3));
        assert_eq!(total.messages.len(), 1);
        assert_eq!(total.summary().text, "KML processed: 3 updated, 1 not found, 3 skipped");
    }
}
