pub const HEALTH_ROUTE: &str = "/health";
pub const VERSION_ROUTE: &str = "/version";
pub const ROUTE_ROUTE: &str = "/route";
pub const ROUTE_LOCATION_ROUTE: &str = "/route&location";
pub const ROUTE_NEARBY_ROUTE: &str = "/route&nearby";

pub const FILTER_HEADER: &str = "filter";
pub const REQUIRED_SCOPE: &str = "full_access";

/// Owner assigned to routes that have been "deleted".
pub const SENTINEL_USER_ID: i64 = 0;

// Default search centre when the nearby filter is omitted (New Orleans).
pub const DEFAULT_NEARBY_LAT: f64 = 29.945_969_5;
pub const DEFAULT_NEARBY_LNG: f64 = -90.070_059_899_999_99;
pub const DEFAULT_NEARBY_DISTANCE: f64 = 0.07;

pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
