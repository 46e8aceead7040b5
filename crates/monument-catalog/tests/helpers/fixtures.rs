//! RINEX and KML fixture builders

use monument_catalog::geodesy::{CoordinateTransform, EcefPosition, GeoLocation, Wgs84Transform};
use monument_catalog::ingest::IncomingFile;

/// Receiver position of the reference station used throughout the tests
pub const STA1_POSITION: EcefPosition = EcefPosition {
    x: 2849876.123,
    y: 2160123.456,
    z: 5251234.789,
};

/// Meters per degree of latitude on the mean sphere
const M_PER_DEG: f64 = 6_371_008.8 * std::f64::consts::PI / 180.0;

fn record(content: &str, label: &str) -> String {
    format!("{:<60}{:<20}\n", content, label)
}

/// Header of an observation file
#[derive(Debug, Clone)]
pub struct ObsHeader {
    pub marker: String,
    pub position: EcefPosition,
    pub first_obs: String,
    pub last_obs: Option<String>,
    pub receiver: String,
}

impl ObsHeader {
    pub fn new(marker: &str, position: EcefPosition, first_obs: &str) -> Self {
        Self {
            marker: marker.to_string(),
            position,
            first_obs: first_obs.to_string(),
            last_obs: None,
            receiver: "5123".to_string(),
        }
    }

    pub fn last_obs(mut self, last: &str) -> Self {
        self.last_obs = Some(last.to_string());
        self
    }

    pub fn render(&self) -> String {
        let mut text = [
            record("     2.11           OBSERVATION DATA    M (MIXED)", "RINEX VERSION / TYPE"),
            record("teqc  2019Feb25     Survey Dept         20250310 06:01:12UTC", "PGM / RUN BY / DATE"),
            record(&self.marker, "MARKER NAME"),
            record(&format!("{:<20}JAVAD TRE_3 DELTA   4.1.00", self.receiver), "REC # / TYPE / VERS"),
            record(
                &format!(
                    "{:14.4}{:14.4}{:14.4}",
                    self.position.x, self.position.y, self.position.z
                ),
                "APPROX POSITION XYZ",
            ),
            record("        1.5430        0.0000        0.0000", "ANTENNA: DELTA H/E/N"),
            record(&self.first_obs, "TIME OF FIRST OBS"),
        ]
        .concat();
        if let Some(last) = &self.last_obs {
            text.push_str(&record(last, "TIME OF LAST OBS"));
        }
        text.push_str(&record("", "END OF HEADER"));
        text.push_str(" 25  3 10  5  0  0.0000000  0 12G01G03G06G11G14G17G19G22G24G28G30G32\n");
        text
    }

    /// The header as an observation file upload
    pub fn file(&self, name: &str) -> IncomingFile {
        IncomingFile::new(name, self.render().into_bytes())
    }
}

/// A navigation file body; only its name and bytes matter to ingestion
pub fn nav_file(name: &str, seed: &str) -> IncomingFile {
    let text = [
        record("     2.11           N: GPS NAV DATA", "RINEX VERSION / TYPE"),
        record(seed, "COMMENT"),
        record("", "END OF HEADER"),
    ]
    .concat();
    IncomingFile::new(name, text.into_bytes())
}

/// Position `north_m` and `east_m` away from `base` at the same height
pub fn offset_position(base: &EcefPosition, north_m: f64, east_m: f64) -> EcefPosition {
    let transform = Wgs84Transform;
    let (location, height) = transform.to_geodetic(base).unwrap();
    let dlat = north_m / M_PER_DEG;
    let dlon = east_m / (M_PER_DEG * location.latitude.to_radians().cos());
    transform.to_ecef(
        &GeoLocation::new(location.longitude + dlon, location.latitude + dlat),
        height,
    )
}

/// Quantized location a position will be stored at
pub fn location_of(position: &EcefPosition) -> GeoLocation {
    Wgs84Transform.to_geodetic(position).unwrap().0
}

/// KML document with one placemark per `(name, description, coordinates)`
pub fn kml_document(placemarks: &[(&str, Option<&str>, Option<&str>)]) -> Vec<u8> {
    let mut body = String::new();
    for (name, description, coordinates) in placemarks {
        body.push_str("<Placemark>");
        body.push_str(&format!("<name>{}</name>", name));
        if let Some(description) = description {
            body.push_str(&format!("<description><![CDATA[{}]]></description>", description));
        }
        if let Some(coordinates) = coordinates {
            body.push_str(&format!("<Point><coordinates>{}</coordinates></Point>", coordinates));
        }
        body.push_str("</Placemark>\n");
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document><Folder>
{}</Folder></Document></kml>"#,
        body
    )
    .into_bytes()
}
