//! WGS84 latitude/longitude ↔ UTM conversion.
//!
//! The projection itself comes from the `utm` crate; this module adds the
//! range checks and the `UtmCoord` record. Zone selection includes the
//! Norway and Svalbard exceptions.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UtmError {
    #[error("latitude {0} outside UTM range [-80, 84]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("zone number {0} outside 1..=60")]
    InvalidZoneNumber(u8),
    #[error("zone letter '{0}' is not a UTM latitude band")]
    InvalidZoneLetter(char),
    #[error("({easting}, {northing}) cannot be inverted: {reason}")]
    Inverse {
        easting: f64,
        northing: f64,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmCoord {
    pub easting: f64,
    pub northing: f64,
    pub zone_number: u8,
    pub zone_letter: char,
}

const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[must_use]
pub fn zone_number(latitude: f64, longitude: f64) -> u8 {
    ::utm::lat_lon_to_zone_number(latitude, longitude)
}

pub fn zone_letter(latitude: f64) -> Result<char, UtmError> {
    if !(-80.0..=84.0).contains(&latitude) {
        return Err(UtmError::LatitudeOutOfRange(latitude));
    }
    ::utm::lat_to_zone_letter(latitude).ok_or(UtmError::LatitudeOutOfRange(latitude))
}

/// Project a WGS84 position into its natural UTM zone.
pub fn from_latlon(latitude: f64, longitude: f64) -> Result<UtmCoord, UtmError> {
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(UtmError::LongitudeOutOfRange(longitude));
    }
    let zone_letter = zone_letter(latitude)?;
    let zone_number = zone_number(latitude, longitude);
    let (mut northing, easting, _convergence) =
        ::utm::to_utm_wgs84(latitude, longitude, zone_number);
    if northing < 0.0 {
        northing += FALSE_NORTHING_SOUTH;
    }
    Ok(UtmCoord {
        easting,
        northing,
        zone_number,
        zone_letter,
    })
}

/// Inverse projection, returning `(latitude, longitude)` in degrees.
pub fn to_latlon(
    easting: f64,
    northing: f64,
    zone_number: u8,
    zone_letter: char,
) -> Result<(f64, f64), UtmError> {
    if !(1..=60).contains(&zone_number) {
        return Err(UtmError::InvalidZoneNumber(zone_number));
    }
    let letter = zone_letter.to_ascii_uppercase();
    if !matches!(letter, 'C'..='X') || matches!(letter, 'I' | 'O') {
        return Err(UtmError::InvalidZoneLetter(zone_letter));
    }
    ::utm::wsg84_utm_to_lat_lon(easting, northing, zone_number, letter).map_err(|err| {
        UtmError::Inverse {
            easting,
            northing,
            reason: format!("{err:?}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_known_position() {
        let utm = from_latlon(51.2, 7.5).expect("in range");
        assert!((utm.easting - 395_201.310).abs() < 1e-2, "{}", utm.easting);
        assert!((utm.northing - 5_673_135.241).abs() < 1e-2, "{}", utm.northing);
        assert_eq!(utm.zone_number, 32);
        assert_eq!(utm.zone_letter, 'U');
    }

    #[test]
    fn norway_exception_forces_zone_32() {
        assert_eq!(zone_number(60.0, 4.0), 32);
        assert_eq!(zone_number(60.0, 2.0), 31);
        assert_eq!(zone_number(52.52, 13.405), 33);
    }

    #[test]
    fn southern_positions_use_the_false_northing() {
        let utm = from_latlon(-33.86, 151.21).expect("in range");
        assert_eq!(utm.zone_number, 56);
        assert_eq!(utm.zone_letter, 'H');
        assert!(utm.northing > 6_000_000.0 && utm.northing < 6_500_000.0);
    }

    #[test]
    fn inverse_round_trips() {
        for (lat, lon) in [(52.52, 13.405), (53.5511, 9.9937), (-33.86, 151.21)] {
            let utm = from_latlon(lat, lon).expect("in range");
            let (back_lat, back_lon) =
                to_latlon(utm.easting, utm.northing, utm.zone_number, utm.zone_letter)
                    .expect("valid zone");
            assert!((back_lat - lat).abs() < 1e-6, "{lat} vs {back_lat}");
            assert!((back_lon - lon).abs() < 1e-6, "{lon} vs {back_lon}");
        }
    }

    #[test]
    fn rejects_polar_latitudes() {
        assert_eq!(
            from_latlon(85.0, 0.0),
            Err(UtmError::LatitudeOutOfRange(85.0))
        );
        assert!(to_latlon(500_000.0, 0.0, 0, 'U').is_err());
        assert!(to_latlon(500_000.0, 0.0, 32, 'I').is_err());
    }
}
