//! Provider-agnostic map pins
//!
//! A [`MapPin`] owns exactly one SDK pin. Callers describe what the pin means through
//! a status bag; a pure function turns that status into [`PinProperties`], which the
//! SDK pin then draws. Pins can optionally take themselves off the map while they
//! are out of view, which keeps SDKs with expensive markers responsive.

use crate::{
    core::{
        config::{MapPinOptions, PropertiesForStatus},
        constants::{DEFAULT_PIN_ICON, DEFAULT_PIN_SR_TEXT, PIN_ANCHOR, PIN_SIZE},
        geo::Coordinate,
        map::{Map, WeakMap},
        motion::MotionState,
    },
    prelude::HashMap,
    provider::{ClickHandler, FlagHandler, MapProvider, ProviderPin, ProviderPinOptions},
    runtime, Result,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};
use tokio_util::sync::CancellationToken;

/// Arbitrary caller state attached to a pin, e.g. `{"selected": true}`
pub type PinStatus = HashMap<String, serde_json::Value>;

/// How a pin is drawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinProperties {
    /// Horizontal anchor as a fraction of the width, 0 at the left edge
    pub anchor_x: f64,
    /// Vertical anchor as a fraction of the height, 0 at the top edge
    pub anchor_y: f64,
    /// Width in pixels
    pub width: f64,
    /// Height in pixels
    pub height: f64,
    /// Key into the pin's icon table
    pub icon: String,
    pub z_index: i32,
    /// CSS class added to the pin's element, where the SDK has one
    pub class: String,
    /// Markup drawn instead of the icon
    pub element: Option<String>,
    /// Text read out by screen readers
    pub sr_text: String,
}

impl Default for PinProperties {
    fn default() -> Self {
        Self {
            anchor_x: PIN_ANCHOR.0,
            anchor_y: PIN_ANCHOR.1,
            width: PIN_SIZE.0,
            height: PIN_SIZE.1,
            icon: DEFAULT_PIN_ICON.to_string(),
            z_index: 0,
            class: String::new(),
            element: None,
            sr_text: DEFAULT_PIN_SR_TEXT.to_string(),
        }
    }
}

/// Handle to a pin. Clones refer to the same pin.
#[derive(Clone)]
pub struct MapPin {
    inner: Arc<PinInner>,
}

struct PinInner {
    provider: MapProvider,
    provider_pin: Box<dyn ProviderPin>,
    icons: HashMap<String, String>,
    hide_offscreen: bool,
    pin_type: Option<String>,
    properties_for_status: PropertiesForStatus,
    handlers: Arc<PinHandlers>,
    state: Mutex<PinState>,
    /// Taken off the provider map because it is out of view
    hidden: AtomicBool,
}

struct PinState {
    coordinate: Coordinate,
    status: PinStatus,
    properties: PinProperties,
    map: Option<Map>,
    /// Stops the visibility task of the current attachment
    tracker: Option<CancellationToken>,
}

#[derive(Default)]
struct PinHandlers {
    click: RwLock<Option<ClickHandler>>,
    focus: RwLock<Option<FlagHandler>>,
    hover: RwLock<Option<FlagHandler>>,
}

impl MapPin {
    /// Creates a pin through the provider's pin factory. The provider must be loaded.
    pub fn new(options: MapPinOptions) -> Result<Self> {
        options.validate()?;
        if !options.provider.is_loaded() {
            return Err(options.provider.not_loaded());
        }

        let handlers = Arc::new(PinHandlers::default());
        let click = handlers.clone();
        let focus = handlers.clone();
        let hover = handlers.clone();

        let provider_pin = options.provider.create_pin(ProviderPinOptions {
            icons: options.icons.clone(),
            click_handler: Arc::new(move || {
                let handler = click.click.read().clone();
                if let Some(handler) = handler {
                    handler();
                }
            }),
            focus_handler: Arc::new(move |focused| {
                let handler = focus.focus.read().clone();
                if let Some(handler) = handler {
                    handler(focused);
                }
            }),
            hover_handler: Arc::new(move |hovered| {
                let handler = hover.hover.read().clone();
                if let Some(handler) = handler {
                    handler(hovered);
                }
            }),
            provider_options: options.provider_options.clone(),
        })?;

        let status = PinStatus::default();
        let properties = (options.properties_for_status)(&status);
        provider_pin.set_coordinate(options.coordinate)?;
        provider_pin.set_properties(&properties)?;

        Ok(Self {
            inner: Arc::new(PinInner {
                provider: options.provider,
                provider_pin,
                icons: options.icons,
                hide_offscreen: options.hide_offscreen,
                pin_type: options.pin_type,
                properties_for_status: options.properties_for_status,
                handlers,
                state: Mutex::new(PinState {
                    coordinate: options.coordinate,
                    status,
                    properties,
                    map: None,
                    tracker: None,
                }),
                hidden: AtomicBool::new(false),
            }),
        })
    }

    pub fn provider(&self) -> &MapProvider {
        &self.inner.provider
    }

    pub fn coordinate(&self) -> Coordinate {
        self.inner.state.lock().coordinate
    }

    pub fn set_coordinate(&self, coordinate: Coordinate) -> Result<()> {
        let tracked = {
            let mut state = self.inner.state.lock();
            state.coordinate = coordinate;
            self.inner.provider_pin.set_coordinate(coordinate)?;
            state.map.clone().zip(state.tracker.clone())
        };

        // An idle map will not recheck until it moves again
        if let Some((map, token)) = tracked {
            if map.motion_state() == MotionState::Idle {
                self.inner.update_visibility(&map, &token)?;
            }
        }
        Ok(())
    }

    pub fn status(&self) -> PinStatus {
        self.inner.state.lock().status.clone()
    }

    /// Merges `status` into the current status (top-level keys replace) and redraws
    pub fn set_status(&self, status: PinStatus) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.status.extend(status);
        let properties = (self.inner.properties_for_status)(&state.status);
        self.inner.provider_pin.set_properties(&properties)?;
        state.properties = properties;
        Ok(())
    }

    pub fn properties(&self) -> PinProperties {
        self.inner.state.lock().properties.clone()
    }

    /// Image URL registered under `key`
    pub fn icon(&self, key: &str) -> Option<&str> {
        self.inner.icons.get(key).map(String::as_str)
    }

    pub fn pin_type(&self) -> Option<&str> {
        self.inner.pin_type.as_deref()
    }

    pub fn map(&self) -> Option<Map> {
        self.inner.state.lock().map.clone()
    }

    /// Whether the pin is currently off the map for being out of view
    pub fn is_hidden(&self) -> bool {
        self.inner.hidden.load(Ordering::Acquire)
    }

    /// Places the pin on `map`, or takes it off its current map on `None`.
    ///
    /// A pin is on at most one map; moving it detaches it from the previous one first.
    pub fn set_map(&self, map: Option<&Map>) -> Result<()> {
        let mut state = self.inner.state.lock();

        if let Some(tracker) = state.tracker.take() {
            tracker.cancel();
        }
        if state.map.take().is_some() {
            let was_hidden = self.inner.hidden.swap(false, Ordering::AcqRel);
            if !was_hidden {
                self.inner.provider_pin.set_map(None)?;
            }
        }

        let Some(map) = map else {
            return Ok(());
        };

        self.inner.provider_pin.set_map(Some(map.provider_map()))?;
        state.map = Some(map.clone());

        if self.inner.hide_offscreen {
            let token = CancellationToken::new();
            state.tracker = Some(token.clone());
            runtime::spawn(track_visibility(
                Arc::downgrade(&self.inner),
                map.downgrade(),
                token,
            ));
        }
        Ok(())
    }

    pub fn set_click_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.handlers.click.write() = Some(Arc::new(handler));
    }

    /// Called with `true` when the pin gains focus and `false` when it loses it
    pub fn set_focus_handler<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.inner.handlers.focus.write() = Some(Arc::new(handler));
    }

    /// Called with `true` when the pointer enters the pin and `false` when it leaves
    pub fn set_hover_handler<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.inner.handlers.hover.write() = Some(Arc::new(handler));
    }

    /// Runs `f` against the SDK pin, e.g. to downcast to the adapter's type
    pub fn with_provider_pin<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&dyn ProviderPin) -> R,
    {
        f(self.inner.provider_pin.as_ref())
    }
}

impl PinInner {
    /// Adds or removes the SDK pin depending on whether it is in view
    fn update_visibility(&self, map: &Map, token: &CancellationToken) -> Result<()> {
        let bounds = map.bounds()?;

        let state = self.state.lock();
        // Detached while the bounds were being read
        if token.is_cancelled() {
            return Ok(());
        }

        let visible = bounds.contains(&state.coordinate);
        let hidden = self.hidden.load(Ordering::Acquire);
        if visible && hidden {
            self.provider_pin.set_map(Some(map.provider_map()))?;
            self.hidden.store(false, Ordering::Release);
            log::debug!("Showing pin at {:?}", state.coordinate);
        } else if !visible && !hidden {
            self.provider_pin.set_map(None)?;
            self.hidden.store(true, Ordering::Release);
            log::debug!("Hiding offscreen pin at {:?}", state.coordinate);
        }
        Ok(())
    }
}

/// Rechecks the pin each time the map comes to rest, until cancelled or either side
/// goes away
async fn track_visibility(pin: Weak<PinInner>, map: WeakMap, token: CancellationToken) {
    loop {
        let idle = match map.upgrade() {
            Some(map) => map.idle(),
            None => break,
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = idle => {}
        }

        let moving = {
            let (Some(pin), Some(map)) = (pin.upgrade(), map.upgrade()) else {
                break;
            };
            // Registered before the check so a move that starts during it is not missed
            let moving = map.moving();
            if let Err(e) = pin.update_visibility(&map, &token) {
                log::warn!("Offscreen check failed: {}", e);
            }
            moving
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = moving => {}
        }
    }
}

impl Drop for PinInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(tracker) = state.tracker.take() {
            tracker.cancel();
        }
        if state.map.take().is_some() && !*self.hidden.get_mut() {
            if let Err(e) = self.provider_pin.set_map(None) {
                log::warn!("Failed to remove dropped pin from its map: {}", e);
            }
        }
    }
}

impl fmt::Debug for MapPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MapPin")
            .field("coordinate", &state.coordinate)
            .field("status", &state.status)
            .field("pin_type", &self.inner.pin_type)
            .field("attached", &state.map.is_some())
            .field("hidden", &self.is_hidden())
            .finish_non_exhaustive()
    }
}
