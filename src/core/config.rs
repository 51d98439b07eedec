//! Configuration for maps and pins
//!
//! Options are plain structs: fill in the fields you care about on top of
//! `Default` (or [`MapPinOptions::new`]) and hand them to [`Map::new`] or
//! [`MapPin::new`], which validate them once.
//!
//! [`Map::new`]: crate::core::map::Map::new
//! [`MapPin::new`]: crate::core::pin::MapPin::new

use crate::{
    core::{
        bounds::GeoBounds,
        constants::{DEFAULT_CENTER, DEFAULT_SINGLE_PIN_ZOOM, DEFAULT_ZOOM},
        geo::Coordinate,
        pin::{PinProperties, PinStatus},
    },
    prelude::HashMap,
    provider::MapProvider,
    runtime::FrameScheduler,
    MapError, Result,
};
use std::{fmt, sync::Arc};

/// Called after the map settles from a pan or zoom with the bounds before and after.
pub type PanHandler = Arc<dyn Fn(GeoBounds, GeoBounds) + Send + Sync>;

/// Called when the map starts moving, with the bounds it is moving away from.
pub type PanStartHandler = Arc<dyn Fn(GeoBounds) + Send + Sync>;

/// Pure mapping from a pin's status to how it should look.
pub type PropertiesForStatus = Arc<dyn Fn(&PinStatus) -> PinProperties + Send + Sync>;

/// One edge of padding in pixels, either fixed or recomputed on every fit.
#[derive(Clone)]
pub enum PaddingValue {
    Fixed(f64),
    Dynamic(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl PaddingValue {
    /// Wraps a closure that is evaluated each time the map fits its viewport
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// Current value in pixels. Negative or non-finite values count as zero.
    pub fn pixels(&self) -> f64 {
        let value = match self {
            Self::Fixed(value) => *value,
            Self::Dynamic(f) => f(),
        };
        if value.is_finite() {
            value.max(0.0)
        } else {
            0.0
        }
    }
}

impl Default for PaddingValue {
    fn default() -> Self {
        Self::Fixed(0.0)
    }
}

impl From<f64> for PaddingValue {
    fn from(value: f64) -> Self {
        Self::Fixed(value)
    }
}

impl fmt::Debug for PaddingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Minimum margin, per edge, kept clear around fitted content
#[derive(Debug, Clone, Default)]
pub struct Padding {
    pub top: PaddingValue,
    pub bottom: PaddingValue,
    pub left: PaddingValue,
    pub right: PaddingValue,
}

impl Padding {
    /// Same fixed padding on every edge
    pub fn uniform(pixels: f64) -> Self {
        Self {
            top: pixels.into(),
            bottom: pixels.into(),
            left: pixels.into(),
            right: pixels.into(),
        }
    }
}

/// Options for [`Map::new`](crate::core::map::Map::new)
#[derive(Clone)]
pub struct MapOptions {
    /// Center used initially and when fitting zero coordinates
    pub default_center: Coordinate,
    /// Zoom used initially and when fitting zero coordinates
    pub default_zoom: f64,
    /// Highest zoom a fit may reach, which is what a single coordinate ends up at
    pub single_pin_zoom: f64,
    pub padding: Padding,
    /// Whether the provider should show its own zoom/pan controls
    pub control_enabled: bool,
    /// Passed through untouched to the provider's map factory
    pub provider_options: serde_json::Value,
    pub pan_handler: Option<PanHandler>,
    pub pan_start_handler: Option<PanStartHandler>,
    /// Source of animation frames for pan throttling; timer-driven when unset
    pub frame_scheduler: Option<Arc<dyn FrameScheduler>>,
}

impl MapOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.default_zoom.is_finite() {
            return Err(MapError::InvalidArgument(format!(
                "default zoom must be finite, got {}",
                self.default_zoom
            )));
        }
        if !self.single_pin_zoom.is_finite() || self.single_pin_zoom < 0.0 {
            return Err(MapError::InvalidArgument(format!(
                "single pin zoom must be a finite, non-negative number, got {}",
                self.single_pin_zoom
            )));
        }
        Ok(())
    }
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            default_center: Coordinate::from_valid(DEFAULT_CENTER.0, DEFAULT_CENTER.1),
            default_zoom: DEFAULT_ZOOM,
            single_pin_zoom: DEFAULT_SINGLE_PIN_ZOOM,
            padding: Padding::default(),
            control_enabled: true,
            provider_options: serde_json::Value::Null,
            pan_handler: None,
            pan_start_handler: None,
            frame_scheduler: None,
        }
    }
}

impl fmt::Debug for MapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapOptions")
            .field("default_center", &self.default_center)
            .field("default_zoom", &self.default_zoom)
            .field("single_pin_zoom", &self.single_pin_zoom)
            .field("padding", &self.padding)
            .field("control_enabled", &self.control_enabled)
            .field("provider_options", &self.provider_options)
            .field("pan_handler", &self.pan_handler.is_some())
            .field("pan_start_handler", &self.pan_start_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Options for [`MapPin::new`](crate::core::pin::MapPin::new)
#[derive(Clone)]
pub struct MapPinOptions {
    pub provider: MapProvider,
    pub coordinate: Coordinate,
    /// Icon key to image URL (or data URI). `PinProperties::icon` picks one by key.
    pub icons: HashMap<String, String>,
    /// Detach the pin from the provider map while it is outside the visible bounds
    pub hide_offscreen: bool,
    /// Free-form tag callers can use to tell kinds of pins apart
    pub pin_type: Option<String>,
    pub properties_for_status: PropertiesForStatus,
    /// Passed through untouched to the provider's pin factory
    pub provider_options: serde_json::Value,
}

impl MapPinOptions {
    pub fn new(provider: &MapProvider) -> Self {
        Self {
            provider: provider.clone(),
            coordinate: Coordinate::origin(),
            icons: HashMap::default(),
            hide_offscreen: false,
            pin_type: None,
            properties_for_status: Arc::new(|_: &PinStatus| PinProperties::default()),
            provider_options: serde_json::Value::Null,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.icons.keys().any(|key| key.is_empty()) {
            return Err(MapError::InvalidArgument(
                "icon keys must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for MapPinOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapPinOptions")
            .field("provider", &self.provider.name())
            .field("coordinate", &self.coordinate)
            .field("icons", &self.icons)
            .field("hide_offscreen", &self.hide_offscreen)
            .field("pin_type", &self.pin_type)
            .field("provider_options", &self.provider_options)
            .finish_non_exhaustive()
    }
}
