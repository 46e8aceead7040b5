//! Coordinate transformation and planar distance
//!
//! Receiver positions arrive as ECEF meters and are stored as WGS84
//! longitude/latitude quantized to 6 decimal degrees (about 0.1 m). All
//! proximity decisions are made on the quantized values with a local
//! equirectangular projection, so comparisons never happen in raw degrees.

use crate::error::{CatalogError, CatalogResult};
use map_3d::{deg2rad, ecef2geodetic, geodetic2ecef, rad2deg, Ellipsoid};
use serde::{Deserialize, Serialize};

/// Decimal places kept for stored longitudes and latitudes
pub const COORDINATE_PRECISION: usize = 6;

/// IUGG mean Earth radius used by the planar projection
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Ground stations sit between these distances from the geocenter
const MIN_STATION_RADIUS_M: f64 = 6_000_000.0;
const MAX_STATION_RADIUS_M: f64 = 7_000_000.0;

/// Side of a lock grid cell in degrees
pub const GRID_CELL_DEG: f64 = 0.01;

/// Earth-centered, Earth-fixed position in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EcefPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl EcefPosition {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Reject non-finite triples and positions that cannot be a ground
    /// station, such as the all-zero "unknown" placeholder.
    pub fn validate(&self) -> CatalogResult<()> {
        let reason = if !(self.x.is_finite() && self.y.is_finite() && self.z.is_finite()) {
            "non-finite component".to_string()
        } else {
            let r = self.magnitude();
            if (MIN_STATION_RADIUS_M..=MAX_STATION_RADIUS_M).contains(&r) {
                return Ok(());
            }
            format!("{:.1} km from the geocenter", r / 1000.0)
        };

        Err(CatalogError::InvalidCoordinates {
            x: self.x,
            y: self.y,
            z: self.z,
            reason,
        })
    }
}

/// Longitude/latitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoLocation {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Both components rounded to [`COORDINATE_PRECISION`] decimals
    pub fn quantized(self) -> Self {
        Self::new(quantize(self.longitude), quantize(self.latitude))
    }

    pub fn distance_m(&self, other: &GeoLocation) -> f64 {
        planar_distance_m(self, other)
    }

    pub fn is_valid(&self) -> bool {
        self.longitude.is_finite()
            && self.latitude.is_finite()
            && (-180.0..=180.0).contains(&self.longitude)
            && (-90.0..=90.0).contains(&self.latitude)
    }
}

impl std::fmt::Display for GeoLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.longitude, self.latitude)
    }
}

/// Round to [`COORDINATE_PRECISION`] decimals, half away from zero.
///
/// Rounding operates on the shortest decimal string that round-trips to the
/// same `f64`, so `0.0000005` becomes `0.000001` even though its binary value
/// lies slightly below the tie.
pub fn quantize(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }

    // f64 Display is the shortest round-trip form and never uses exponents
    let repr = format!("{}", value.abs());
    let (int_part, frac_part) = repr.split_once('.').unwrap_or((repr.as_str(), ""));
    if frac_part.len() <= COORDINATE_PRECISION {
        return value;
    }

    let kept = &frac_part[..COORDINATE_PRECISION];
    let round_up = frac_part.as_bytes()[COORDINATE_PRECISION] >= b'5';

    let mut scaled: u128 = 0;
    for digit in int_part.bytes().chain(kept.bytes()) {
        scaled = scaled * 10 + u128::from(digit - b'0');
    }
    if round_up {
        scaled += 1;
    }

    let magnitude = scaled as f64 / 10f64.powi(COORDINATE_PRECISION as i32);
    magnitude.copysign(value)
}

/// Distance in meters on a local equidistant projection.
///
/// Longitude deltas are scaled by the cosine of the mean latitude and
/// normalized into [-180, 180] so points on either side of the antimeridian
/// are near each other.
pub fn planar_distance_m(a: &GeoLocation, b: &GeoLocation) -> f64 {
    let mean_lat = deg2rad((a.latitude + b.latitude) / 2.0);
    let dlat = deg2rad(b.latitude - a.latitude);
    let dlon = deg2rad(normalize_longitude_delta(b.longitude - a.longitude));
    let x = dlon * mean_lat.cos();
    MEAN_EARTH_RADIUS_M * (x * x + dlat * dlat).sqrt()
}

fn normalize_longitude_delta(delta: f64) -> f64 {
    let wrapped = (delta + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid maps +180 to -180; keep the sign of the input for that case
    if wrapped == -180.0 && delta > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// ECEF to geodetic conversion used by ingestion
pub trait CoordinateTransform: Send + Sync + std::fmt::Debug {
    /// Quantized longitude/latitude and ellipsoidal height in meters
    fn to_geodetic(&self, ecef: &EcefPosition) -> CatalogResult<(GeoLocation, f64)>;

    /// Inverse conversion, used to verify stored locations
    fn to_ecef(&self, location: &GeoLocation, height_m: f64) -> EcefPosition;
}

/// WGS84 ellipsoid transform (EPSG:4978 to EPSG:4326)
#[derive(Debug, Clone, Copy, Default)]
pub struct Wgs84Transform;

impl CoordinateTransform for Wgs84Transform {
    fn to_geodetic(&self, ecef: &EcefPosition) -> CatalogResult<(GeoLocation, f64)> {
        ecef.validate()?;
        let (lat, lon, alt) = ecef2geodetic(ecef.x, ecef.y, ecef.z, Ellipsoid::WGS84);
        let location = GeoLocation::new(rad2deg(lon), rad2deg(lat)).quantized();
        if !location.is_valid() {
            return Err(CatalogError::InvalidCoordinates {
                x: ecef.x,
                y: ecef.y,
                z: ecef.z,
                reason: format!("transform produced {}", location),
            });
        }
        Ok((location, alt))
    }

    fn to_ecef(&self, location: &GeoLocation, height_m: f64) -> EcefPosition {
        let (x, y, z) = geodetic2ecef(
            deg2rad(location.latitude),
            deg2rad(location.longitude),
            height_m,
            Ellipsoid::WGS84,
        );
        EcefPosition::new(x, y, z)
    }
}

/// Latitude/longitude bounding box that contains every location within a
/// radius of a center, split in two when it crosses the antimeridian.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchWindow {
    pub min_lat: f64,
    pub max_lat: f64,
    /// One range normally, two when the window wraps at +/-180
    pub lon_ranges: Vec<(f64, f64)>,
}

impl SearchWindow {
    pub fn around(center: &GeoLocation, radius_m: f64) -> Self {
        // 1% margin plus one quantization step keeps boundary points inside
        let dlat = rad2deg(radius_m.max(0.0) / MEAN_EARTH_RADIUS_M) * 1.01 + 1e-6;
        let min_lat = (center.latitude - dlat).max(-90.0);
        let max_lat = (center.latitude + dlat).min(90.0);

        let extreme_lat = min_lat.abs().max(max_lat.abs());
        let cos_extreme = deg2rad(extreme_lat).cos();
        let dlon = if extreme_lat >= 89.9 || cos_extreme <= 0.0 {
            180.0
        } else {
            (dlat / cos_extreme).min(180.0)
        };

        let lon_ranges = if dlon >= 180.0 {
            vec![(-180.0, 180.0)]
        } else {
            let west = center.longitude - dlon;
            let east = center.longitude + dlon;
            if west < -180.0 {
                vec![(west + 360.0, 180.0), (-180.0, east)]
            } else if east > 180.0 {
                vec![(west, 180.0), (-180.0, east - 360.0)]
            } else {
                vec![(west, east)]
            }
        };

        Self {
            min_lat,
            max_lat,
            lon_ranges,
        }
    }

    pub fn contains(&self, location: &GeoLocation) -> bool {
        (self.min_lat..=self.max_lat).contains(&location.latitude)
            && self
                .lon_ranges
                .iter()
                .any(|(w, e)| (*w..=*e).contains(&location.longitude))
    }

    /// Grid cells of [`GRID_CELL_DEG`] overlapped by the window, or `None`
    /// when there are more than `limit` of them.
    pub fn grid_cells(&self, limit: usize) -> Option<Vec<(i64, i64)>> {
        let cell = |deg: f64| (deg / GRID_CELL_DEG).floor() as i64;
        let (lat_lo, lat_hi) = (cell(self.min_lat), cell(self.max_lat));

        let mut cells = Vec::new();
        for (west, east) in &self.lon_ranges {
            let (lon_lo, lon_hi) = (cell(*west), cell(*east));
            let count = (lat_hi - lat_lo + 1).saturating_mul(lon_hi - lon_lo + 1);
            if count < 0 || cells.len() + count as usize > limit {
                return None;
            }
            for i in lat_lo..=lat_hi {
                for j in lon_lo..=lon_hi {
                    cells.push((i, j));
                }
            }
        }

        cells.sort_unstable();
        cells.dedup();
        Some(cells)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quantize_half_up_on_decimal_repr() {
        assert_eq!(quantize(37.1234565), 37.123457);
        assert_eq!(quantize(-37.1234565), -37.123457);
        assert_eq!(quantize(0.0000005), 0.000001);
        assert_eq!(quantize(55.7558261), 55.755826);
        assert_eq!(quantize(12.5), 12.5);
        assert_eq!(quantize(179.9999996), 180.0);
    }

    #[test]
    fn test_transform_scenario_position() {
        let ecef = EcefPosition::new(2849876.123, 2160123.456, 5251234.789);
        let (loc, height) = Wgs84Transform.to_geodetic(&ecef).unwrap();

        assert!((loc.longitude - 37.161072).abs() < 2e-6, "lon {}", loc.longitude);
        assert!((loc.latitude - 55.924770).abs() < 2e-6, "lat {}", loc.latitude);
        assert_eq!(loc, loc.quantized());
        assert!((height + 10_284.9).abs() < 1.0, "height {}", height);
    }

    #[test]
    fn test_rejects_implausible_positions() {
        let zero = EcefPosition::new(0.0, 0.0, 0.0);
        assert!(matches!(
            Wgs84Transform.to_geodetic(&zero),
            Err(CatalogError::InvalidCoordinates { .. })
        ));

        let nan = EcefPosition::new(f64::NAN, 1.0, 1.0);
        assert!(nan.validate().is_err());

        let orbit = EcefPosition::new(26_000_000.0, 0.0, 0.0);
        assert!(orbit.validate().is_err());
    }

    #[test]
    fn test_planar_distance() {
        let a = GeoLocation::new(37.0, 55.0);
        let north = GeoLocation::new(37.0, 55.00001);
        // one microdegree of latitude is about 0.111 m
        let d = a.distance_m(&north);
        assert!((d - 1.1119).abs() < 0.001, "{}", d);

        let east = GeoLocation::new(37.00001, 55.0);
        let d = a.distance_m(&east);
        assert!((d - 1.1119 * deg2rad(55.0).cos()).abs() < 0.001, "{}", d);
    }

    #[test]
    fn test_distance_across_antimeridian() {
        let west = GeoLocation::new(179.99999, 10.0);
        let east = GeoLocation::new(-179.99999, 10.0);
        assert!(west.distance_m(&east) < 3.0);
        assert!(normalize_longitude_delta(360.0).abs() < 1e-12);
        assert_eq!(normalize_longitude_delta(180.0), 180.0);
        assert_eq!(normalize_longitude_delta(-180.0), -180.0);
    }

    #[test]
    fn test_search_window_contains_radius() {
        let center = GeoLocation::new(37.164, 55.79);
        let window = SearchWindow::around(&center, 7.0);
        assert_eq!(window.lon_ranges.len(), 1);

        // 6.9 m due east and due north are inside
        let dlat = rad2deg(6.9 / MEAN_EARTH_RADIUS_M);
        let dlon = dlat / deg2rad(55.79).cos();
        assert!(window.contains(&GeoLocation::new(37.164 + dlon, 55.79)));
        assert!(window.contains(&GeoLocation::new(37.164, 55.79 - dlat)));
        assert!(!window.contains(&GeoLocation::new(37.165, 55.79)));
    }

    #[test]
    fn test_search_window_splits_at_antimeridian() {
        let window = SearchWindow::around(&GeoLocation::new(179.99995, 0.0), 20.0);
        assert_eq!(window.lon_ranges.len(), 2);
        assert!(window.contains(&GeoLocation::new(-179.99999, 0.0)));
        assert!(window.contains(&GeoLocation::new(179.9999, 0.0)));
    }

    #[test]
    fn test_grid_cells() {
        let window = SearchWindow::around(&GeoLocation::new(37.164, 55.79), 7.0);
        let cells = window.grid_cells(64).unwrap();
        assert!(!cells.is_empty() && cells.len() <= 4);
        assert!(cells.contains(&(5579, 3716)));

        let polar = SearchWindow::around(&GeoLocation::new(0.0, 89.99995), 50.0);
        assert!(polar.grid_cells(64).is_none());
    }

    proptest! {
        #[test]
        fn prop_round_trip_within_quantization(
            lon in -179.9f64..179.9,
            lat in -89.0f64..89.0,
            height in -100.0f64..5000.0,
        ) {
            let original = GeoLocation::new(lon, lat).quantized();
            let ecef = Wgs84Transform.to_ecef(&original, height);
            let (back, back_height) = Wgs84Transform.to_geodetic(&ecef).unwrap();
            let ecef_again = Wgs84Transform.to_ecef(&back, back_height);

            // one quantization step is at most ~0.16 m on the ground
            let dx = ecef.x - ecef_again.x;
            let dy = ecef.y - ecef_again.y;
            let dz = ecef.z - ecef_again.z;
            prop_assert!((dx * dx + dy * dy + dz * dz).sqrt() < 0.2);
            prop_assert!(original.distance_m(&back) < 0.2);
        }
    }
}
