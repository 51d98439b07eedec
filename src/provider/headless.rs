//! In-memory map backend
//!
//! `HeadlessBackend` honours the whole provider contract without an SDK: zoom is
//! continuous, moves apply instantly and pins just remember where they are. It suits
//! server-side hosts that only need the fitting math, and tests.
//!
//! Programmatic moves do not fire the pan callbacks. Use [`HeadlessMap::simulate_pan`]
//! to play back a user gesture.

use super::{
    ClickHandler, FlagHandler, LoadOptions, MotionCallback, ProviderBackend, ProviderMap,
    ProviderMapOptions, ProviderPin, ProviderPinOptions,
};
use crate::{
    core::{geo::Coordinate, map::MapWrapper, pin::PinProperties},
    prelude::HashMap,
    runtime::async_delay,
    MapError, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    any::Any,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// Backend whose maps and pins live entirely in memory
#[derive(Clone, Default)]
pub struct HeadlessBackend {
    shared: Arc<BackendShared>,
}

#[derive(Default)]
struct BackendShared {
    next_id: AtomicU64,
    load_calls: AtomicUsize,
    load_delay: Duration,
    failure: Option<String>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose loader takes `delay` to finish
    pub fn with_load_delay(delay: Duration) -> Self {
        Self {
            shared: Arc::new(BackendShared {
                load_delay: delay,
                ..Default::default()
            }),
        }
    }

    /// A backend whose loader always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(BackendShared {
                failure: Some(reason.into()),
                ..Default::default()
            }),
        }
    }

    /// How many times the loader has run
    pub fn load_calls(&self) -> usize {
        self.shared.load_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl ProviderBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    async fn load(&self, _api_key: &str, options: &LoadOptions) -> anyhow::Result<()> {
        self.shared.load_calls.fetch_add(1, Ordering::SeqCst);
        log::debug!("Headless backend loading (locale: {:?})", options.locale);

        if !self.shared.load_delay.is_zero() {
            async_delay(self.shared.load_delay).await;
        }
        if let Some(reason) = &self.shared.failure {
            anyhow::bail!("{}", reason);
        }
        Ok(())
    }

    fn create_map(&self, options: ProviderMapOptions) -> Result<Box<dyn ProviderMap>> {
        Ok(Box::new(HeadlessMap {
            id: self.next_id(),
            view: Mutex::new(View {
                center: Coordinate::origin(),
                zoom: 0.0,
            }),
            wrapper: options.wrapper,
            control_enabled: options.control_enabled,
            pan_handler: options.pan_handler,
            pan_start_handler: options.pan_start_handler,
        }))
    }

    fn create_pin(&self, options: ProviderPinOptions) -> Result<Box<dyn ProviderPin>> {
        Ok(Box::new(HeadlessPin {
            id: self.next_id(),
            icons: options.icons,
            state: Mutex::new(PinState::default()),
            click_handler: options.click_handler,
            focus_handler: options.focus_handler,
            hover_handler: options.hover_handler,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct View {
    center: Coordinate,
    zoom: f64,
}

/// A map held in memory
pub struct HeadlessMap {
    id: u64,
    view: Mutex<View>,
    wrapper: Arc<dyn MapWrapper>,
    control_enabled: bool,
    pan_handler: MotionCallback,
    pan_start_handler: MotionCallback,
}

impl HeadlessMap {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn control_enabled(&self) -> bool {
        self.control_enabled
    }

    /// Pixel size of the container the map was created in
    pub fn size(&self) -> (f64, f64) {
        (self.wrapper.width(), self.wrapper.height())
    }

    /// Plays back a user drag or pinch ending at `center` and `zoom`
    pub fn simulate_pan(&self, center: Coordinate, zoom: f64) {
        (self.pan_start_handler)();
        *self.view.lock() = View { center, zoom };
        (self.pan_handler)();
    }

    /// Fires only the start of a gesture, leaving the map mid-move
    pub fn simulate_pan_start(&self) {
        (self.pan_start_handler)();
    }

    /// Moves the map and fires only the end of a gesture
    pub fn simulate_pan_end(&self, center: Coordinate, zoom: f64) {
        *self.view.lock() = View { center, zoom };
        (self.pan_handler)();
    }
}

impl ProviderMap for HeadlessMap {
    fn center(&self) -> Result<Coordinate> {
        Ok(self.view.lock().center)
    }

    fn zoom(&self) -> Result<f64> {
        Ok(self.view.lock().zoom)
    }

    fn set_center(&self, center: Coordinate, _animated: bool) -> Result<()> {
        self.view.lock().center = center;
        Ok(())
    }

    fn set_zoom(&self, zoom: f64, _animated: bool) -> Result<()> {
        if !zoom.is_finite() {
            return Err(MapError::InvalidArgument(format!(
                "zoom must be finite, got {}",
                zoom
            )));
        }
        self.view.lock().zoom = zoom;
        Ok(())
    }

    fn set_zoom_center(&self, zoom: f64, center: Coordinate, animated: bool) -> Result<()> {
        self.set_zoom(zoom, animated)?;
        self.set_center(center, animated)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
struct PinState {
    coordinate: Option<Coordinate>,
    map_id: Option<u64>,
    properties: Option<PinProperties>,
    membership_changes: usize,
}

/// A pin held in memory
pub struct HeadlessPin {
    id: u64,
    icons: HashMap<String, String>,
    state: Mutex<PinState>,
    click_handler: ClickHandler,
    focus_handler: FlagHandler,
    hover_handler: FlagHandler,
}

impl HeadlessPin {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        self.state.lock().coordinate
    }

    /// Id of the map the pin is currently drawn on
    pub fn map_id(&self) -> Option<u64> {
        self.state.lock().map_id
    }

    pub fn properties(&self) -> Option<PinProperties> {
        self.state.lock().properties.clone()
    }

    /// URL of the icon the current properties select
    pub fn icon_url(&self) -> Option<String> {
        let state = self.state.lock();
        let key = &state.properties.as_ref()?.icon;
        self.icons.get(key).cloned()
    }

    /// How many times the pin has been added to or removed from a map
    pub fn membership_changes(&self) -> usize {
        self.state.lock().membership_changes
    }

    pub fn click(&self) {
        (self.click_handler)();
    }

    pub fn focus(&self, focused: bool) {
        (self.focus_handler)(focused);
    }

    pub fn hover(&self, hovered: bool) {
        (self.hover_handler)(hovered);
    }
}

impl ProviderPin for HeadlessPin {
    fn set_coordinate(&self, coordinate: Coordinate) -> Result<()> {
        self.state.lock().coordinate = Some(coordinate);
        Ok(())
    }

    fn set_map(&self, map: Option<&dyn ProviderMap>) -> Result<()> {
        let map_id = match map {
            Some(map) => Some(
                map.as_any()
                    .downcast_ref::<HeadlessMap>()
                    .ok_or_else(|| {
                        MapError::Provider("headless pins can only be placed on headless maps".into())
                    })?
                    .id(),
            ),
            None => None,
        };

        let mut state = self.state.lock();
        if state.map_id != map_id {
            state.map_id = map_id;
            state.membership_changes += 1;
        }
        Ok(())
    }

    fn set_properties(&self, properties: &PinProperties) -> Result<()> {
        self.state.lock().properties = Some(properties.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
