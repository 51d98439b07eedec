//! # mapbridge
//!
//! A provider-agnostic map control core.
//!
//! This library lets callers place pins, fit viewports to a set of locations and
//! react to pan/zoom without caring which map SDK draws the tiles. Concrete SDK
//! adapters plug in through the [`provider`] contract; everything above it
//! (geometry, viewport fitting, motion signaling, offscreen pin hiding) lives here.

pub mod core;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    bounds::GeoBounds,
    config::{MapOptions, MapPinOptions, Padding, PaddingValue},
    geo::{Coordinate, Projection, Unit},
    map::{Map, MapWrapper, SizedWrapper},
    motion::MotionState,
    pin::{MapPin, PinProperties, PinStatus},
};

pub use crate::provider::{
    batch::{BatchConfig, ConversionBatcher},
    headless::HeadlessBackend,
    LoadOptions, LoadState, MapProvider, ProviderBackend, ProviderMap, ProviderMapOptions,
    ProviderPin, ProviderPinOptions,
};

pub use crate::runtime::{FrameScheduler, ManualFrameScheduler, TimerFrameScheduler};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Provider '{provider}' is not loaded")]
    NotLoaded { provider: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unit {unit:?} is not supported under the {projection:?} projection")]
    UnsupportedUnit { unit: Unit, projection: Projection },

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Provider '{provider}' failed to load: {reason}")]
    LoadFailed { provider: String, reason: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Error type alias for convenience
pub type Error = MapError;

/// Initializes `env_logger` for hosts and tests that want to see the crate's log output.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
