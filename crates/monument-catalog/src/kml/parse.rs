//! KML placemarks and their description fields

use crate::error::{CatalogError, CatalogResult};
use crate::geodesy::GeoLocation;
use crate::models::PointType;
use regex::Regex;
use serde::Deserialize;

/// `Document` and `Folder` share one shape and nest freely
#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(rename = "Document", default)]
    documents: Vec<Container>,
    #[serde(rename = "Folder", default)]
    folders: Vec<Container>,
    #[serde(rename = "Placemark", default)]
    placemarks: Vec<RawPlacemark>,
}

#[derive(Debug, Deserialize)]
struct RawPlacemark {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "Point", default)]
    point: Option<PointGeometry>,
    #[serde(rename = "MultiGeometry", default)]
    multi: Option<MultiGeometry>,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    #[serde(default)]
    coordinates: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MultiGeometry {
    #[serde(rename = "Point", default)]
    points: Vec<PointGeometry>,
}

/// One placemark with its text fields trimmed; empty fields are `None`
#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    pub name: Option<String>,
    pub description: Option<String>,
    pub coordinates: Option<String>,
}

impl Placemark {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn collect(container: Container, out: &mut Vec<Placemark>) {
    for raw in container.placemarks {
        let coordinates = raw
            .point
            .and_then(|p| p.coordinates)
            .or_else(|| raw.multi.and_then(|m| m.points.into_iter().find_map(|p| p.coordinates)));
        out.push(Placemark {
            name: non_empty(raw.name),
            description: non_empty(raw.description),
            coordinates: non_empty(coordinates),
        });
    }
    for child in container.documents.into_iter().chain(container.folders) {
        collect(child, out);
    }
}

/// Every placemark in a KML document, in document order per container
pub fn parse_placemarks(bytes: &[u8]) -> CatalogResult<Vec<Placemark>> {
    let text = String::from_utf8_lossy(bytes);
    let root: Container =
        quick_xml::de::from_str(&text).map_err(|e| CatalogError::Kml(format!("invalid KML: {}", e)))?;

    let mut placemarks = Vec::new();
    collect(root, &mut placemarks);
    Ok(placemarks)
}

/// Parse `lon,lat[,alt]`; only the first tuple of a list is used
pub fn parse_coordinates(text: &str) -> Option<GeoLocation> {
    let tuple = text.split_whitespace().next()?;
    let mut parts = tuple.split(',');
    let longitude: f64 = parts.next()?.trim().parse().ok()?;
    let latitude: f64 = parts.next()?.trim().parse().ok()?;
    let location = GeoLocation::new(longitude, latitude);
    location.is_valid().then_some(location)
}

/// Classification fields found in a placemark description
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointMetadata {
    pub index_name: Option<String>,
    pub network_class: Option<String>,
    pub center_type: Option<String>,
    pub mark_number: Option<String>,
    pub point_type: PointType,
}

/// Extracts `key: value` fields from exported descriptions
#[derive(Debug, Clone)]
pub struct DescriptionParser {
    index_name: Regex,
    network_class: Regex,
    center_type: Regex,
    mark_number: Regex,
}

impl DescriptionParser {
    pub fn new() -> CatalogResult<Self> {
        let field = |label: &str| {
            Regex::new(&format!(r"(?i){}:\s*([^,]+)", label))
                .map_err(|e| CatalogError::Kml(format!("bad description pattern: {}", e)))
        };
        Ok(Self {
            index_name: field("индекс")?,
            network_class: field("класс")?,
            center_type: field("центр")?,
            mark_number: field("номер марки")?,
        })
    }

    pub fn parse(&self, description: &str) -> PointMetadata {
        let capture = |re: &Regex| {
            re.captures(description)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let network_class = capture(&self.network_class);
        PointMetadata {
            index_name: capture(&self.index_name),
            point_type: network_class.as_deref().map(classify_point_type).unwrap_or_default(),
            network_class,
            center_type: capture(&self.center_type),
            mark_number: capture(&self.mark_number),
        }
    }
}

/// Point type implied by a network class name
pub fn classify_point_type(network_class: &str) -> PointType {
    let normalized: String = network_class
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect();
    let has = |needles: &[&str]| needles.iter().any(|n| normalized.contains(*n));

    if has(&["вгс", "фагс", "сгс1"]) {
        PointType::Astro
    } else if has(&["ггс", "государственнаягеодезическая"]) {
        PointType::Ggs
    } else if has(&["городская"]) {
        PointType::Survey
    } else if has(&["гнс", "нивелирная"]) {
        PointType::Leveling
    } else {
        PointType::Default
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>export</name>
    <Placemark>
      <name> Липки </name>
      <description><![CDATA[Индекс: 1234, Класс: ГГС 2 класс, Центр: тип 160, Номер марки: 77]]></description>
      <Point><coordinates>37.161072,55.924770,0</coordinates></Point>
    </Placemark>
    <Folder>
      <name>nested</name>
      <Placemark>
        <name>Без координат</name>
        <description>класс: городская сеть</description>
      </Placemark>
      <Folder>
        <Placemark>
          <name>Multi</name>
          <MultiGeometry><Point><coordinates>30.0,60.0</coordinates></Point></MultiGeometry>
        </Placemark>
      </Folder>
    </Folder>
  </Document>
</kml>"#;

    #[test]
    fn test_parse_placemarks_nested() {
        let placemarks = parse_placemarks(SAMPLE.as_bytes()).unwrap();
        assert_eq!(placemarks.len(), 3);

        assert_eq!(placemarks[0].display_name(), "Липки");
        assert_eq!(
            placemarks[0].coordinates.as_deref(),
            Some("37.161072,55.924770,0")
        );
        assert!(placemarks[1].coordinates.is_none());
        assert_eq!(placemarks[2].coordinates.as_deref(), Some("30.0,60.0"));
        assert!(placemarks[2].description.is_none());
    }

    #[test]
    fn test_parse_invalid_xml() {
        assert!(matches!(
            parse_placemarks(b"<kml><Document><Placemark><name>x</name>"),
            Err(CatalogError::Kml(_))
        ));
    }

    #[test]
    fn test_parse_coordinates() {
        let loc = parse_coordinates(" 37.5,55.25,120 ").unwrap();
        assert_eq!(loc, GeoLocation::new(37.5, 55.25));
        assert!(parse_coordinates("37.5").is_none());
        assert!(parse_coordinates("abc,55").is_none());
        assert!(parse_coordinates("200,55").is_none());
    }

    #[test]
    fn test_description_fields() {
        let parser = DescriptionParser::new().unwrap();
        let meta = parser.parse("Индекс: 1234, КЛАСС: ГГС 2 класс, центр: тип 160, номер марки: 77");
        assert_eq!(meta.index_name.as_deref(), Some("1234"));
        assert_eq!(meta.network_class.as_deref(), Some("ГГС 2 класс"));
        assert_eq!(meta.center_type.as_deref(), Some("тип 160"));
        assert_eq!(meta.mark_number.as_deref(), Some("77"));
        assert_eq!(meta.point_type, PointType::Ggs);

        let empty = parser.parse("no structured fields here");
        assert_eq!(empty, PointMetadata::default());
    }

    #[test]
    fn test_classify_point_type() {
        assert_eq!(classify_point_type("ФАГС"), PointType::Astro);
        assert_eq!(classify_point_type("СГС-1"), PointType::Astro);
        assert_eq!(classify_point_type("Государственная геодезическая сеть"), PointType::Ggs);
        assert_eq!(classify_point_type("Городская сеть"), PointType::Survey);
        assert_eq!(classify_point_type("Нивелирная сеть II"), PointType::Leveling);
        assert_eq!(classify_point_type("частная"), PointType::Default);
    }
}
