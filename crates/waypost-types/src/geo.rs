//! Great-circle distance and significant-motion detection.
//!
//! The distance filter is the only gate on upload volume: a new sample is
//! forwarded only when it is the first of a session or lies further than
//! [`SIGNIFICANT_DISTANCE_M`] from the last forwarded one.

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Movement below this distance is treated as jitter.
pub const SIGNIFICANT_DISTANCE_M: f64 = 10.0;

/// Anything that has a latitude and longitude in decimal degrees.
pub trait GeoPoint {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

impl GeoPoint for crate::types::LocationSample {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl GeoPoint for crate::position::Coordinates {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl GeoPoint for (f64, f64) {
    fn latitude(&self) -> f64 {
        self.0
    }

    fn longitude(&self) -> f64 {
        self.1
    }
}

/// Haversine distance in meters between two points on a spherical Earth.
///
/// Never returns NaN for finite input: the intermediate term is clamped to
/// `[0, 1]` before the square root so rounding at antipodal or identical
/// points cannot push it out of the domain of `asin`.
///
/// # Examples
///
/// ```
/// use waypost_types::geo::distance_m;
///
/// let d = distance_m(&(0.0, 0.0), &(0.0, 1.0));
/// assert!((d - 111_194.9).abs() < 1.0);
/// ```
#[must_use]
pub fn distance_m<A: GeoPoint + ?Sized, B: GeoPoint + ?Sized>(a: &A, b: &B) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lat2 = b.latitude().to_radians();
    let d_lat = (b.latitude() - a.latitude()).to_radians();
    let d_lon = (b.longitude() - a.longitude()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Whether `candidate` moved far enough from `previous` to be worth sending.
///
/// A missing `previous` (first sample of a session) is always significant.
#[must_use]
pub fn has_changed_significantly<A, B>(previous: Option<&A>, candidate: &B) -> bool
where
    A: GeoPoint + ?Sized,
    B: GeoPoint + ?Sized,
{
    has_moved_beyond(previous, candidate, SIGNIFICANT_DISTANCE_M)
}

/// [`has_changed_significantly`] with a custom threshold in meters.
#[must_use]
pub fn has_moved_beyond<A, B>(previous: Option<&A>, candidate: &B, threshold_m: f64) -> bool
where
    A: GeoPoint + ?Sized,
    B: GeoPoint + ?Sized,
{
    match previous {
        None => true,
        Some(previous) => distance_m(previous, candidate) > threshold_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Move `meters` due north from a point.
    fn north_of(lat: f64, lon: f64, meters: f64) -> (f64, f64) {
        (lat + (meters / EARTH_RADIUS_M).to_degrees(), lon)
    }

    #[test]
    fn test_identical_points() {
        let p = (48.8584, 2.2945);
        assert_eq!(distance_m(&p, &p), 0.0);
        assert!(!has_changed_significantly(Some(&p), &p));
    }

    #[test]
    fn test_first_sample_is_significant() {
        assert!(has_changed_significantly::<(f64, f64), _>(None, &(0.0, 0.0)));
    }

    #[test]
    fn test_known_reference_distance() {
        // Paris (Notre-Dame) to London (Trafalgar Square), ~343.9 km
        let paris = (48.8530, 2.3499);
        let london = (51.5080, -0.1281);
        let d = distance_m(&paris, &london);
        assert!((d - 343_886.5).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_two_meter_jitter_filtered() {
        let a = (56.9496, 24.1052);
        let b = north_of(a.0, a.1, 2.0);
        assert!((distance_m(&a, &b) - 2.0).abs() < 0.01);
        assert!(!has_changed_significantly(Some(&a), &b));
    }

    #[test]
    fn test_fifty_meters_is_significant() {
        let a = (56.9496, 24.1052);
        let b = north_of(a.0, a.1, 50.0);
        assert!(has_changed_significantly(Some(&a), &b));
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_m(&(0.0, 0.0), &(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);

        let poles = distance_m(&(90.0, 0.0), &(-90.0, 0.0));
        assert!(poles.is_finite());
    }

    #[test]
    fn test_custom_threshold() {
        let a = (10.0, 10.0);
        let b = north_of(a.0, a.1, 25.0);
        assert!(has_moved_beyond(Some(&a), &b, 20.0));
        assert!(!has_moved_beyond(Some(&a), &b, 30.0));
    }

    proptest! {
        #[test]
        fn prop_identity_never_significant(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
            prop_assert!(!has_changed_significantly(Some(&(lat, lon)), &(lat, lon)));
        }

        #[test]
        fn prop_distance_is_finite_and_symmetric(
            lat1 in -90.0f64..=90.0, lon1 in -180.0f64..=180.0,
            lat2 in -90.0f64..=90.0, lon2 in -180.0f64..=180.0,
        ) {
            let ab = distance_m(&(lat1, lon1), &(lat2, lon2));
            let ba = distance_m(&(lat2, lon2), &(lat1, lon1));
            prop_assert!(ab.is_finite());
            prop_assert!(ab >= 0.0);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_M + 1.0);
            prop_assert!((ab - ba).abs() < 1e-3);
        }
    }
}
