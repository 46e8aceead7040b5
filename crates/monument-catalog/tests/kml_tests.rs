//! KML enrichment tests against PostgreSQL

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use helpers::*;
use monument_catalog::catalog::{self, MatchOptions};
use monument_catalog::geodesy::{EcefPosition, GeoLocation};
use monument_catalog::kml;
use monument_common::MessageLevel;

const DESCRIPTION: &str =
    "Индекс: Берёзовка, Класс: ГГС 2 класса, Центр: тип 1, Номер марки: 4521";

fn coordinates(location: &GeoLocation) -> String {
    format!("{},{},0", location.longitude, location.latitude)
}

/// Insert points without merging so tests control the layout exactly
async fn seed_points(db: &TestDb, points: &[(&str, EcefPosition)]) {
    let options = MatchOptions {
        radius_m: 0.5,
        ambiguity_threshold: 2,
    };
    let mut tx = db.pool().begin().await.unwrap();
    for (id, position) in points {
        catalog::locate_or_create(&mut tx, id, location_of(position), &options)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_single_match_is_enriched() {
    let Some(db) = TestDb::try_new().await else {
        return;
    };
    seed_points(&db, &[("STA1", STA1_POSITION)]).await;

    let near = location_of(&offset_position(&STA1_POSITION, 1.0, 1.0));
    let document = kml_document(&[("Берёзовка", Some(DESCRIPTION), Some(&coordinates(&near)))]);
    let report = kml::enrich_points(db.pool(), &document, 3.0).await.unwrap();

    assert_eq!((report.updated, report.not_found, report.skipped), (1, 0, 0));
    assert_eq!(report.summary().text, "KML processed: 1 updated, 0 not found, 0 skipped");

    let mut conn = db.pool().acquire().await.unwrap();
    let point = catalog::find_point(&mut conn, "STA1").await.unwrap().unwrap();
    assert_eq!(point.station_name, "Берёзовка");
    assert_eq!(point.index_name, "Берёзовка");
    assert_eq!(point.network_class, "ГГС 2 класса");
    assert_eq!(point.center_type, "тип 1");
    assert_eq!(point.mark_number, "4521");
    assert_eq!(point.point_type, "ggs");
    // enrichment never moves a point
    assert_eq!(point.location(), location_of(&STA1_POSITION));
    drop(conn);

    db.cleanup().await;
}

#[tokio::test]
async fn test_existing_station_name_is_kept() {
    let Some(db) = TestDb::try_new().await else {
        return;
    };
    seed_points(&db, &[("STA1", STA1_POSITION)]).await;
    sqlx::query("UPDATE geodetic_points SET station_name = 'Первая' WHERE id = 'STA1'")
        .execute(db.pool())
        .await
        .unwrap();

    let here = coordinates(&location_of(&STA1_POSITION));
    let description = "Класс: ВГС, Индекс: Вторая";
    let document = kml_document(&[("Вторая", Some(description), Some(&here))]);
    let report = kml::enrich_points(db.pool(), &document, 3.0).await.unwrap();
    assert_eq!(report.updated, 1);

    let mut conn = db.pool().acquire().await.unwrap();
    let point = catalog::find_point(&mut conn, "STA1").await.unwrap().unwrap();
    assert_eq!(point.station_name, "Первая");
    assert_eq!(point.index_name, "Вторая");
    assert_eq!(point.point_type, "astro");
    drop(conn);

    db.cleanup().await;
}

#[tokio::test]
async fn test_unmatched_and_unusable_placemarks() {
    let Some(db) = TestDb::try_new().await else {
        return;
    };
    let left = offset_position(&STA1_POSITION, 0.0, 1_000.0);
    let right = offset_position(&STA1_POSITION, 0.0, 1_002.0);
    seed_points(&db, &[("STA1", STA1_POSITION), ("LFT1", left), ("RGT1", right)]).await;

    let far = coordinates(&location_of(&offset_position(&STA1_POSITION, 5_000.0, 0.0)));
    let between = coordinates(&location_of(&offset_position(&STA1_POSITION, 0.0, 1_001.0)));
    let here = coordinates(&location_of(&STA1_POSITION));

    let document = kml_document(&[
        ("Далёкая", Some(DESCRIPTION), Some(&far)),
        ("Пара", Some(DESCRIPTION), Some(&between)),
        ("Без координат", Some(DESCRIPTION), None),
        ("Мусор", Some(DESCRIPTION), Some("not,a,number")),
        ("Без описания", None, Some(&here)),
    ]);
    let report = kml::enrich_points(db.pool(), &document, 3.0).await.unwrap();

    assert_eq!(report.updated, 0);
    assert_eq!(report.not_found, 1);
    assert_eq!(report.skipped, 4);

    let warned = |needle: &str| {
        report
            .messages
            .iter()
            .any(|m| m.level == MessageLevel::Warning && m.text.contains(needle))
    };
    assert!(warned("Пара: 2 points within 3 m"));
    assert!(warned("Без координат: no coordinates"));
    assert!(warned("invalid coordinates 'not,a,number'"));
    assert!(report.messages.iter().any(|m| m.text.contains("has no description")));

    // nothing was written
    let touched: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM geodetic_points WHERE network_class <> ''")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(touched, 0);

    db.cleanup().await;
}

#[tokio::test]
async fn test_invalid_document_is_rejected() {
    let Some(db) = TestDb::try_new().await else {
        return;
    };
    let result = kml::enrich_points(db.pool(), b"<kml><Document><Placemark>", 3.0).await;
    assert!(result.is_err());
    db.cleanup().await;
}
