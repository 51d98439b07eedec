//! Provider-agnostic map control plane
//!
//! A [`Map`] sits on top of one [`ProviderMap`] and owns everything that should not
//! differ between SDKs: fitting a padded viewport to a set of coordinates, deriving
//! the visible bounds, throttling pan notifications to one per animation frame and
//! signaling when the map is idle or moving.

use crate::{
    core::{
        bounds::GeoBounds,
        config::{MapOptions, MapPinOptions, Padding, PanHandler, PanStartHandler},
        constants::{MAX_PADDING, TILE_SIZE_LOG2},
        geo::{Coordinate, Projection, Unit},
        motion::{MotionSignal, MotionState},
    },
    provider::{MapProvider, MotionCallback, ProviderMap, ProviderMapOptions},
    runtime::{FrameScheduler, TimerFrameScheduler},
    MapError, Result,
};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

/// The container a map is drawn in
pub trait MapWrapper: Send + Sync {
    /// Width in pixels
    fn width(&self) -> f64;

    /// Height in pixels
    fn height(&self) -> f64;
}

/// A container whose size the host sets directly
#[derive(Debug)]
pub struct SizedWrapper {
    size: Mutex<(f64, f64)>,
}

impl SizedWrapper {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            size: Mutex::new((width, height)),
        }
    }

    pub fn set_size(&self, width: f64, height: f64) {
        *self.size.lock() = (width, height);
    }
}

impl MapWrapper for SizedWrapper {
    fn width(&self) -> f64 {
        self.size.lock().0
    }

    fn height(&self) -> f64 {
        self.size.lock().1
    }
}

/// Handle to an interactive map.
///
/// Clones are cheap and all refer to the same map.
#[derive(Clone)]
pub struct Map {
    inner: Arc<MapInner>,
}

/// Non-owning reference to a [`Map`], held by background tasks
#[derive(Clone)]
pub(crate) struct WeakMap(Weak<MapInner>);

impl WeakMap {
    pub(crate) fn upgrade(&self) -> Option<Map> {
        self.0.upgrade().map(|inner| Map { inner })
    }
}

struct MapInner {
    provider: MapProvider,
    wrapper: Arc<dyn MapWrapper>,
    provider_map: Box<dyn ProviderMap>,
    default_center: Coordinate,
    default_zoom: f64,
    single_pin_zoom: f64,
    padding: RwLock<Padding>,
    pan_handler: RwLock<Option<PanHandler>>,
    pan_start_handler: RwLock<Option<PanStartHandler>>,
    frames: Arc<dyn FrameScheduler>,
    motion: MotionSignal,
    /// Valid until the next move
    cached_bounds: Mutex<Option<GeoBounds>>,
    /// Bounds the current move started from
    pan_start_bounds: Mutex<Option<GeoBounds>>,
    pan_start_running: AtomicBool,
    pan_running: AtomicBool,
}

impl Map {
    /// Creates a map in `wrapper` using an already loaded provider.
    ///
    /// The map starts out idle at the default center and zoom.
    pub fn new(
        provider: &MapProvider,
        wrapper: Arc<dyn MapWrapper>,
        options: MapOptions,
    ) -> Result<Self> {
        options.validate()?;
        if !provider.is_loaded() {
            return Err(provider.not_loaded());
        }

        // The provider map has to exist before the map it reports back to
        let link: Arc<OnceCell<WeakMap>> = Arc::new(OnceCell::new());
        let pan_handler = motion_callback(&link, Map::handle_pan);
        let pan_start_handler = motion_callback(&link, Map::handle_pan_start);

        let provider_map = provider.create_map(ProviderMapOptions {
            wrapper: wrapper.clone(),
            control_enabled: options.control_enabled,
            pan_handler,
            pan_start_handler,
            provider_options: options.provider_options.clone(),
        })?;

        let frames = options
            .frame_scheduler
            .unwrap_or_else(|| Arc::new(TimerFrameScheduler::new()));

        let map = Map {
            inner: Arc::new(MapInner {
                provider: provider.clone(),
                wrapper,
                provider_map,
                default_center: options.default_center,
                default_zoom: options.default_zoom,
                single_pin_zoom: options.single_pin_zoom,
                padding: RwLock::new(options.padding),
                pan_handler: RwLock::new(options.pan_handler),
                pan_start_handler: RwLock::new(options.pan_start_handler),
                frames,
                motion: MotionSignal::new(),
                cached_bounds: Mutex::new(None),
                pan_start_bounds: Mutex::new(None),
                pan_start_running: AtomicBool::new(false),
                pan_running: AtomicBool::new(false),
            }),
        };
        let _ = link.set(map.downgrade());

        map.set_zoom_center(options.default_zoom, options.default_center, false)?;
        log::debug!(
            "Created {} map ({}x{} px)",
            provider.name(),
            map.inner.wrapper.width(),
            map.inner.wrapper.height()
        );

        Ok(map)
    }

    pub(crate) fn downgrade(&self) -> WeakMap {
        WeakMap(Arc::downgrade(&self.inner))
    }

    /// Whether two handles refer to the same map
    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn provider(&self) -> &MapProvider {
        &self.inner.provider
    }

    pub fn wrapper(&self) -> &Arc<dyn MapWrapper> {
        &self.inner.wrapper
    }

    /// Pin options bound to this map's provider
    pub fn new_pin_options(&self) -> MapPinOptions {
        MapPinOptions::new(&self.inner.provider)
    }

    /// Runs `f` against the SDK map, e.g. to downcast to the adapter's type
    pub fn with_provider_map<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&dyn ProviderMap) -> R,
    {
        f(self.inner.provider_map.as_ref())
    }

    pub(crate) fn provider_map(&self) -> &dyn ProviderMap {
        self.inner.provider_map.as_ref()
    }

    pub fn center(&self) -> Result<Coordinate> {
        self.inner.provider_map.center()
    }

    pub fn zoom(&self) -> Result<f64> {
        self.inner.provider_map.zoom()
    }

    pub fn set_center(&self, center: Coordinate, animated: bool) -> Result<()> {
        let result = self.inner.provider_map.set_center(center, animated);
        self.invalidate_bounds();
        result
    }

    pub fn set_zoom(&self, zoom: f64, animated: bool) -> Result<()> {
        let result = self.inner.provider_map.set_zoom(zoom, animated);
        self.invalidate_bounds();
        result
    }

    pub fn set_zoom_center(&self, zoom: f64, center: Coordinate, animated: bool) -> Result<()> {
        let result = self
            .inner
            .provider_map
            .set_zoom_center(zoom, center, animated);
        self.invalidate_bounds();
        result
    }

    /// Replaces the padding used by [`Map::fit_coordinates`]
    pub fn set_padding(&self, padding: Padding) {
        *self.inner.padding.write() = padding;
    }

    pub fn padding(&self) -> Padding {
        self.inner.padding.read().clone()
    }

    /// Called with the bounds before and after each pan or zoom, once it settles
    pub fn set_pan_handler<F>(&self, handler: F)
    where
        F: Fn(GeoBounds, GeoBounds) + Send + Sync + 'static,
    {
        *self.inner.pan_handler.write() = Some(Arc::new(handler));
    }

    /// Called with the current bounds whenever the map starts moving
    pub fn set_pan_start_handler<F>(&self, handler: F)
    where
        F: Fn(GeoBounds) + Send + Sync + 'static,
    {
        *self.inner.pan_start_handler.write() = Some(Arc::new(handler));
    }

    /// Frames the given coordinates with the configured padding.
    ///
    /// Zoom never goes above `max_zoom`, which defaults to the single pin zoom; that
    /// is also where a single coordinate ends up. With no coordinates the map returns
    /// to its default center and zoom.
    pub fn fit_coordinates(
        &self,
        coordinates: &[Coordinate],
        animated: bool,
        max_zoom: Option<f64>,
    ) -> Result<()> {
        if coordinates.is_empty() {
            return self.set_zoom_center(
                self.inner.default_zoom,
                self.inner.default_center,
                animated,
            );
        }

        let bounds = GeoBounds::fit(coordinates)?;
        let max_zoom = max_zoom.unwrap_or(self.inner.single_pin_zoom);
        let padding = self.padding();
        self.set_bounds(bounds, animated, Some(&padding), Some(max_zoom))
    }

    /// Centers and zooms the map so `bounds` fills the area inside the padding.
    ///
    /// `padding` defaults to none; [`Map::fit_coordinates`] is the call that applies the
    /// configured padding. With `max_zoom` unset the
    /// zoom is unbounded, so degenerate bounds are rejected. Does nothing while the
    /// container has no size.
    pub fn set_bounds(
        &self,
        bounds: GeoBounds,
        animated: bool,
        padding: Option<&Padding>,
        max_zoom: Option<f64>,
    ) -> Result<()> {
        let pixel_width = self.inner.wrapper.width();
        let pixel_height = self.inner.wrapper.height();
        if !(pixel_width > 0.0 && pixel_height > 0.0) {
            log::debug!(
                "Skipping set_bounds on a {}x{} container",
                pixel_width,
                pixel_height
            );
            return Ok(());
        }

        let padding = padding.cloned().unwrap_or_default();
        let (top, bottom) = padding_fractions(
            padding.top.pixels() / pixel_height,
            padding.bottom.pixels() / pixel_height,
        );
        let (left, right) = padding_fractions(
            padding.left.pixels() / pixel_width,
            padding.right.pixels() / pixel_width,
        );
        let vertical = top + bottom;
        let horizontal = left + right;

        let usable_height = pixel_height * (1.0 - vertical);
        let usable_width = pixel_width * (1.0 - horizontal);

        let height = bounds
            .sw
            .distance_to(&bounds.nw(), Unit::Degree, Projection::Mercator)?;
        let width = bounds.width_degrees();

        let mut new_height = height.max(width * usable_height / usable_width) / (1.0 - vertical);
        let mut new_width = width.max(height * usable_width / usable_height) / (1.0 - horizontal);

        let mut zoom = (pixel_width * 360.0 / new_width).log2() - TILE_SIZE_LOG2;
        if let Some(max_zoom) = max_zoom {
            if zoom > max_zoom {
                zoom = max_zoom;
                let world = 2f64.powf(zoom + TILE_SIZE_LOG2);
                new_width = pixel_width * 360.0 / world;
                new_height = pixel_height * 360.0 / world;
            }
        }
        if !zoom.is_finite() {
            return Err(MapError::InvalidArgument(format!(
                "cannot fit bounds {:?} without a maximum zoom",
                bounds
            )));
        }

        let center = bounds.center(Projection::Mercator)?.offset(
            (top - bottom) / 2.0 * new_height,
            (right - left) / 2.0 * new_width,
            Unit::Degree,
            Projection::Mercator,
        )?;

        log::debug!("Fitting bounds at zoom {:.3}, center {:?}", zoom, center);
        self.set_zoom_center(zoom, center, animated)
    }

    /// The area currently in view, derived from center, zoom and container size.
    ///
    /// At low zoom on a wide container this can span the whole globe.
    pub fn bounds(&self) -> Result<GeoBounds> {
        if let Some(bounds) = *self.inner.cached_bounds.lock() {
            return Ok(bounds);
        }

        let zoom = self.inner.provider_map.zoom()?;
        let center = self.inner.provider_map.center()?;
        let degrees_per_pixel = 360.0 / 2f64.powf(zoom + TILE_SIZE_LOG2);
        let half_height = self.inner.wrapper.height() * degrees_per_pixel / 2.0;
        let half_width = self.inner.wrapper.width() * degrees_per_pixel / 2.0;

        let sw = center.offset(-half_height, -half_width, Unit::Degree, Projection::Mercator)?;
        let ne = center.offset(half_height, half_width, Unit::Degree, Projection::Mercator)?;
        let bounds = GeoBounds::new(sw, ne);

        // Mid-move results go stale as soon as the gesture continues
        if self.inner.motion.state() == MotionState::Idle {
            *self.inner.cached_bounds.lock() = Some(bounds);
        }
        Ok(bounds)
    }

    fn invalidate_bounds(&self) {
        *self.inner.cached_bounds.lock() = None;
    }

    pub fn motion_state(&self) -> MotionState {
        self.inner.motion.state()
    }

    /// Resolves when the map is idle: immediately if it is now, else when it settles
    pub fn idle(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.motion.wait_for(MotionState::Idle)
    }

    /// Resolves when the map is moving: immediately if it is now, else when it starts
    pub fn moving(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.motion.wait_for(MotionState::Moving)
    }

    /// Notes that the map started moving. Calls within one frame are merged.
    pub fn handle_pan_start(&self) {
        if self.inner.pan_start_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let map = self.downgrade();
        self.inner.frames.request_frame(Box::new(move || {
            if let Some(map) = map.upgrade() {
                map.inner.pan_start_running.store(false, Ordering::Release);
                map.pan_started();
            }
        }));
    }

    /// Notes that the map finished moving. Calls within one frame are merged.
    pub fn handle_pan(&self) {
        if self.inner.pan_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let map = self.downgrade();
        self.inner.frames.request_frame(Box::new(move || {
            if let Some(map) = map.upgrade() {
                map.inner.pan_running.store(false, Ordering::Release);
                map.pan_settled();
            }
        }));
    }

    fn pan_started(&self) {
        let bounds = match self.bounds() {
            Ok(bounds) => bounds,
            Err(e) => {
                log::warn!("Could not read bounds at pan start: {}", e);
                return;
            }
        };
        self.invalidate_bounds();

        // A move that is already under way keeps its original starting point
        self.inner.pan_start_bounds.lock().get_or_insert(bounds);
        self.inner.motion.transition(MotionState::Moving);

        let handler = self.inner.pan_start_handler.read().clone();
        if let Some(handler) = handler {
            handler(bounds);
        }
    }

    fn pan_settled(&self) {
        self.invalidate_bounds();
        let current = match self.bounds() {
            Ok(bounds) => bounds,
            Err(e) => {
                log::warn!("Could not read bounds after pan: {}", e);
                return;
            }
        };
        let previous = self.inner.pan_start_bounds.lock().take();
        self.inner.motion.transition(MotionState::Idle);

        let handler = self.inner.pan_handler.read().clone();
        if let Some(handler) = handler {
            handler(previous.unwrap_or(current), current);
        }
    }
}

/// Builds a provider callback that reaches the map once it exists
fn motion_callback(link: &Arc<OnceCell<WeakMap>>, action: fn(&Map)) -> MotionCallback {
    let link = link.clone();
    Arc::new(move || {
        if let Some(map) = link.get().and_then(WeakMap::upgrade) {
            action(&map);
        }
    })
}

/// Scales a pair of opposite padding fractions down so they total at most
/// [`MAX_PADDING`]
fn padding_fractions(first: f64, second: f64) -> (f64, f64) {
    let first = first.max(0.0);
    let second = second.max(0.0);
    let total = first + second;
    if total > MAX_PADDING {
        let scale = MAX_PADDING / total;
        (first * scale, second * scale)
    } else {
        (first, second)
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("provider", &self.inner.provider.name())
            .field("center", &self.center().ok())
            .field("zoom", &self.zoom().ok())
            .field("motion", &self.motion_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::config::PaddingValue,
        provider::{headless::{HeadlessBackend, HeadlessMap}, LoadOptions},
        runtime::ManualFrameScheduler,
    };
    use approx::assert_relative_eq;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    async fn loaded_provider() -> MapProvider {
        let provider = MapProvider::new(HeadlessBackend::new());
        provider.load("test", LoadOptions::default()).await.unwrap();
        provider
    }

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    async fn manual_map(width: f64, height: f64) -> (Map, Arc<ManualFrameScheduler>) {
        let frames = Arc::new(ManualFrameScheduler::new());
        let map = Map::new(
            &loaded_provider().await,
            Arc::new(SizedWrapper::new(width, height)),
            MapOptions {
                frame_scheduler: Some(frames.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        (map, frames)
    }

    fn simulate_pan(map: &Map, center: Coordinate, zoom: f64) {
        map.with_provider_map(|provider_map| {
            provider_map
                .as_any()
                .downcast_ref::<HeadlessMap>()
                .unwrap()
                .simulate_pan(center, zoom)
        });
    }

    #[test]
    fn test_requires_loaded_provider() {
        let provider = MapProvider::new(HeadlessBackend::new());
        let result = Map::new(
            &provider,
            Arc::new(SizedWrapper::new(800.0, 600.0)),
            MapOptions::default(),
        );
        assert!(matches!(result, Err(MapError::NotLoaded { .. })));
    }

    #[tokio::test]
    async fn test_starts_at_default_view() {
        let (map, _) = manual_map(800.0, 600.0).await;
        assert_eq!(map.zoom().unwrap(), 4.0);
        assert_relative_eq!(map.center().unwrap().latitude(), 39.83);
        assert_relative_eq!(map.center().unwrap().longitude(), -98.58);
        assert_eq!(map.motion_state(), MotionState::Idle);
        assert!(map.idle().now_or_never().is_some());
    }

    #[tokio::test]
    async fn test_fit_wide_bounds() {
        let (map, _) = manual_map(800.0, 600.0).await;
        map.fit_coordinates(&[coord(-1.0, -10.0), coord(1.0, 10.0)], false, None)
            .unwrap();

        // 20 degrees across 800 px
        let expected = (800.0f64 * 360.0 / 20.0).log2() - 8.0;
        assert_relative_eq!(map.zoom().unwrap(), expected, epsilon = 1e-9);
        assert_relative_eq!(map.center().unwrap().latitude(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(map.center().unwrap().longitude(), 0.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_single_coordinate_uses_single_pin_zoom() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let target = coord(40.7128, -74.006);

        map.fit_coordinates(&[target], false, None).unwrap();
        assert_eq!(map.zoom().unwrap(), 14.0);
        assert_relative_eq!(map.center().unwrap().latitude(), 40.7128, epsilon = 1e-9);

        map.fit_coordinates(&[target], false, Some(9.5)).unwrap();
        assert_eq!(map.zoom().unwrap(), 9.5);
    }

    #[tokio::test]
    async fn test_fit_nothing_resets_view() {
        let (map, _) = manual_map(800.0, 600.0).await;
        map.set_zoom_center(11.0, coord(10.0, 10.0), false).unwrap();
        map.fit_coordinates(&[], false, None).unwrap();
        assert_eq!(map.zoom().unwrap(), 4.0);
        assert_relative_eq!(map.center().unwrap().longitude(), -98.58);
    }

    #[tokio::test]
    async fn test_degenerate_bounds_need_max_zoom() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let point = coord(5.0, 5.0);
        let result = map.set_bounds(GeoBounds::new(point, point), false, None, None);
        assert!(matches!(result, Err(MapError::InvalidArgument(_))));
        assert_eq!(map.zoom().unwrap(), 4.0);
    }

    #[tokio::test]
    async fn test_zero_size_container_is_a_no_op() {
        let wrapper = Arc::new(SizedWrapper::new(0.0, 0.0));
        let map = Map::new(&loaded_provider().await, wrapper.clone(), MapOptions::default())
            .unwrap();

        map.fit_coordinates(&[coord(1.0, 1.0), coord(2.0, 2.0)], false, None)
            .unwrap();
        assert_eq!(map.zoom().unwrap(), 4.0);

        wrapper.set_size(800.0, 600.0);
        map.fit_coordinates(&[coord(1.0, 1.0), coord(2.0, 2.0)], false, None)
            .unwrap();
        assert!(map.zoom().unwrap() > 4.0);
    }

    #[tokio::test]
    async fn test_excess_padding_is_capped() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let bounds = GeoBounds::new(coord(-1.0, -1.0), coord(1.0, 1.0));

        map.set_bounds(bounds, false, Some(&Padding::default()), Some(20.0))
            .unwrap();
        let unpadded = map.zoom().unwrap();

        map.set_bounds(bounds, false, Some(&Padding::uniform(10_000.0)), Some(20.0))
            .unwrap();
        let padded = map.zoom().unwrap();
        assert!(padded.is_finite());
        assert!(padded < unpadded);
        assert_relative_eq!(map.center().unwrap().latitude(), 0.0, epsilon = 1e-9);

        // Whatever is asked for, 2% of each axis is left for the content
        let (top, bottom) = padding_fractions(10_000.0 / 600.0, 10_000.0 / 600.0);
        assert_relative_eq!(top + bottom, MAX_PADDING);
        assert_relative_eq!(top, bottom);
        assert_eq!(padding_fractions(0.2, 0.3), (0.2, 0.3));
        assert_eq!(padding_fractions(-1.0, 0.3), (0.0, 0.3));
    }

    #[tokio::test]
    async fn test_asymmetric_padding_shifts_center() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let bounds = GeoBounds::new(coord(-1.0, -1.0), coord(1.0, 1.0));
        let padding = Padding {
            top: PaddingValue::Fixed(200.0),
            ..Default::default()
        };

        map.set_bounds(bounds, false, Some(&padding), Some(20.0)).unwrap();
        // Room is taken off the top, so the view shifts north to keep content below it
        assert!(map.center().unwrap().latitude() > 0.0);
        assert!(map.bounds().unwrap().contains(&coord(1.0, 1.0)));
    }

    #[tokio::test]
    async fn test_padded_fit_of_tall_bounds() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let bounds = GeoBounds::new(coord(10.0, 0.0), coord(40.0, 5.0));
        let padding = Padding {
            top: PaddingValue::Fixed(60.0),
            left: PaddingValue::Fixed(40.0),
            right: PaddingValue::Fixed(120.0),
            ..Default::default()
        };

        // Height dominates, and the wider right padding pushes the center east
        map.set_bounds(bounds, false, Some(&padding), None).unwrap();
        assert_relative_eq!(map.zoom().unwrap(), 4.495690696785296, epsilon = 1e-9);
        let center = map.center().unwrap();
        assert_relative_eq!(center.latitude(), 27.615521042580582, epsilon = 1e-9);
        assert_relative_eq!(center.longitude(), 4.9933587819689444, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_max_zoom_clamp_rescales_padding_shift() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let padding = Padding {
            top: PaddingValue::Fixed(60.0),
            left: PaddingValue::Fixed(40.0),
            right: PaddingValue::Fixed(120.0),
            ..Default::default()
        };

        let tall = GeoBounds::new(coord(10.0, 0.0), coord(40.0, 5.0));
        map.set_bounds(tall, false, Some(&padding), Some(3.0)).unwrap();
        assert_eq!(map.zoom().unwrap(), 3.0);
        let center = map.center().unwrap();
        assert_relative_eq!(center.latitude(), 30.588731582811562, epsilon = 1e-9);
        // 800 px at zoom 3 is 140.625 degrees; the shift is 5% of that
        assert_relative_eq!(center.longitude(), 2.5 + 0.05 * 140.625, epsilon = 1e-9);

        let padding = Padding {
            top: PaddingValue::Fixed(100.0),
            bottom: PaddingValue::Fixed(20.0),
            left: PaddingValue::Fixed(40.0),
            right: PaddingValue::Fixed(120.0),
        };
        let small = GeoBounds::new(coord(-1.0, -1.0), coord(1.0, 1.0));
        map.set_bounds(small, false, Some(&padding), Some(6.0)).unwrap();
        assert_eq!(map.zoom().unwrap(), 6.0);
        let center = map.center().unwrap();
        assert_relative_eq!(center.latitude(), 0.8788717828324195, epsilon = 1e-9);
        assert_relative_eq!(center.longitude(), 0.87890625, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_set_bounds_without_padding_ignores_configured_padding() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let bounds = GeoBounds::new(coord(-1.0, -10.0), coord(1.0, 10.0));

        map.set_bounds(bounds, false, None, Some(20.0)).unwrap();
        let unpadded = map.zoom().unwrap();

        map.set_padding(Padding::uniform(100.0));
        map.set_bounds(bounds, false, None, Some(20.0)).unwrap();
        assert_eq!(map.zoom().unwrap(), unpadded);

        map.fit_coordinates(&[coord(-1.0, -10.0), coord(1.0, 10.0)], false, Some(20.0))
            .unwrap();
        assert!(map.zoom().unwrap() < unpadded);
    }

    #[tokio::test]
    async fn test_dynamic_padding_is_read_on_each_fit() {
        let (map, _) = manual_map(800.0, 600.0).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        map.set_padding(Padding {
            left: PaddingValue::dynamic(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                100.0
            }),
            ..Default::default()
        });

        let coordinates = [coord(1.0, 1.0), coord(2.0, 2.0)];
        map.fit_coordinates(&coordinates, false, None).unwrap();
        map.fit_coordinates(&coordinates, false, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fitted_bounds_contain_coordinates() {
        let (map, _) = manual_map(1024.0, 768.0).await;
        map.set_padding(Padding::uniform(40.0));
        let coordinates = [
            coord(51.5074, -0.1278),
            coord(48.8566, 2.3522),
            coord(52.52, 13.405),
        ];
        map.fit_coordinates(&coordinates, false, None).unwrap();

        let bounds = map.bounds().unwrap();
        for c in &coordinates {
            assert!(bounds.contains(c), "{:?} not in {:?}", c, bounds);
        }
    }

    #[tokio::test]
    async fn test_bounds_follow_zoom() {
        let (map, _) = manual_map(512.0, 512.0).await;
        map.set_zoom_center(1.0, Coordinate::origin(), false).unwrap();
        let bounds = map.bounds().unwrap();
        // 512 px at zoom 1 is the whole world
        assert_relative_eq!(bounds.sw.longitude(), -180.0, epsilon = 1e-9);
        assert_relative_eq!(bounds.ne.longitude(), 180.0, epsilon = 1e-9);
        assert!(bounds.contains(&coord(10.0, 179.0)));

        map.set_zoom(3.0, false).unwrap();
        assert_relative_eq!(map.bounds().unwrap().ne.longitude(), 45.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_pan_lifecycle() {
        let (map, frames) = manual_map(800.0, 600.0).await;
        let before = map.bounds().unwrap();

        let started = Arc::new(Mutex::new(Vec::new()));
        let settled = Arc::new(Mutex::new(Vec::new()));
        let started_log = started.clone();
        let settled_log = settled.clone();
        map.set_pan_start_handler(move |bounds| started_log.lock().push(bounds));
        map.set_pan_handler(move |previous, current| settled_log.lock().push((previous, current)));

        let mut moving = Box::pin(map.moving());
        assert!((&mut moving).now_or_never().is_none());

        simulate_pan(&map, coord(10.0, 10.0), 6.0);
        assert_eq!(frames.pending(), 2);
        assert_eq!(frames.run_frame(), 2);

        assert!(moving.now_or_never().is_some());
        assert_eq!(map.motion_state(), MotionState::Idle);
        assert_eq!(*started.lock(), vec![before]);

        let settled = settled.lock();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].0, before);
        assert_eq!(settled[0].1, map.bounds().unwrap());
    }

    #[tokio::test]
    async fn test_pan_callbacks_are_throttled_per_frame() {
        let (map, frames) = manual_map(800.0, 600.0).await;
        let settled = Arc::new(AtomicUsize::new(0));
        let counter = settled.clone();
        map.set_pan_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            map.handle_pan();
        }
        assert_eq!(frames.run_frame(), 1);
        assert_eq!(settled.load(Ordering::SeqCst), 1);

        map.handle_pan();
        assert_eq!(frames.run_frame(), 1);
        assert_eq!(settled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_moving_resolves_before_next_idle() {
        let (map, frames) = manual_map(800.0, 600.0).await;
        map.handle_pan_start();
        frames.run_frame();

        assert_eq!(map.motion_state(), MotionState::Moving);
        assert!(map.moving().now_or_never().is_some());
        let mut idle = Box::pin(map.idle());
        assert!((&mut idle).now_or_never().is_none());

        map.handle_pan();
        frames.run_frame();
        assert!(idle.now_or_never().is_some());
    }

    #[tokio::test]
    async fn test_bounds_cache_dropped_on_move() {
        let (map, frames) = manual_map(800.0, 600.0).await;
        let before = map.bounds().unwrap();

        map.with_provider_map(|provider_map| {
            let headless = provider_map.as_any().downcast_ref::<HeadlessMap>().unwrap();
            headless.simulate_pan_start();
        });
        frames.run_frame();
        map.with_provider_map(|provider_map| {
            let headless = provider_map.as_any().downcast_ref::<HeadlessMap>().unwrap();
            headless.simulate_pan_end(coord(-20.0, 30.0), 8.0);
        });

        // Still mid-move until the next frame, but nothing stale is served
        assert_ne!(map.bounds().unwrap(), before);
        frames.run_frame();
        assert!(map.bounds().unwrap().contains(&coord(-20.0, 30.0)));
    }
}
