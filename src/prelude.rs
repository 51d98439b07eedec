//! Prelude module for common mapbridge types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use mapbridge::prelude::*;`

pub use crate::core::{
    bounds::GeoBounds,
    config::{
        MapOptions, MapPinOptions, Padding, PaddingValue, PanHandler, PanStartHandler,
        PropertiesForStatus,
    },
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

pub use crate::runtime::{
    runtime, spawn, AsyncHandle, AsyncSpawner, FrameScheduler, ManualFrameScheduler,
    TimerFrameScheduler,
};

pub use crate::{Error as MapError, Result};

pub use std::sync::Arc;

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
