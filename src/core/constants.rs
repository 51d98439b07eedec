//! Core constants shared by the geometry and viewport code.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Width in pixels of the whole world at zoom 0. Zoom N renders `TILE_SIZE * 2^N` pixels.
pub const TILE_SIZE: f64 = 256.0;

/// `log2(TILE_SIZE)`, the offset between "world width in pixels" and zoom.
pub const TILE_SIZE_LOG2: f64 = 8.0;

/// Mean earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Mean earth radius in kilometers.
pub const EARTH_RADIUS_KILOMETERS: f64 = 6371.0;

/// Upper bound on the fraction of a viewport axis that padding may consume.
/// Anything larger is scaled down so the fitted content keeps a positive area.
pub const MAX_PADDING: f64 = 0.98;

/// Zoom used when a fit collapses to a single point.
pub const DEFAULT_SINGLE_PIN_ZOOM: f64 = 14.0;

/// Zoom used when a map is created or fit to zero coordinates.
pub const DEFAULT_ZOOM: f64 = 4.0;

/// Center used when a map is created or fit to zero coordinates (continental US).
pub const DEFAULT_CENTER: (f64, f64) = (39.83, -98.58);

/// Default pin icon size in pixels (width, height).
pub const PIN_SIZE: (f64, f64) = (33.0, 39.0);

/// Default pin anchor as a fraction of the icon size (x, y): bottom center.
pub const PIN_ANCHOR: (f64, f64) = (0.5, 1.0);

/// Icon key used when a pin status does not select one.
pub const DEFAULT_PIN_ICON: &str = "default";

/// Screen-reader text used when a pin status does not provide one.
pub const DEFAULT_PIN_SR_TEXT: &str = "map pin";

/// Interval between timer-driven animation frames (60 Hz).
pub const FRAME_INTERVAL_MS: u64 = 16;
