//! The contract between the control plane and a concrete map SDK
//!
//! An adapter implements [`ProviderBackend`] (load the SDK once, build maps and pins)
//! plus [`ProviderMap`] and [`ProviderPin`] for the objects it builds. Only
//! [`Coordinate`]s cross this boundary; zoom always follows the standard formula where
//! the world is `256 * 2^zoom` pixels wide, and adapters convert at the edge.

pub mod batch;
pub mod headless;

use crate::{
    core::{geo::Coordinate, map::MapWrapper, pin::PinProperties},
    prelude::HashMap,
    runtime, MapError, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::watch;

/// Invoked by a provider map when the user starts or finishes moving it
pub type MotionCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked by a provider pin when it is clicked
pub type ClickHandler = Arc<dyn Fn() + Send + Sync>;

/// Invoked by a provider pin when it gains or loses focus or hover
pub type FlagHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Options passed to a backend loader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Locale for labels and controls, e.g. `en-US`
    pub locale: Option<String>,
    /// Extra SDK-specific query parameters
    pub params: HashMap<String, String>,
}

/// Load lifecycle of a provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed(String),
}

/// What an adapter registers to make its SDK available
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Short identifier used in logs and errors, e.g. `google`
    fn name(&self) -> &str;

    /// Loads the SDK. Called at most once per [`MapProvider`].
    async fn load(&self, api_key: &str, options: &LoadOptions) -> anyhow::Result<()>;

    fn create_map(&self, options: ProviderMapOptions) -> Result<Box<dyn ProviderMap>>;

    fn create_pin(&self, options: ProviderPinOptions) -> Result<Box<dyn ProviderPin>>;
}

/// A map instance owned by an SDK
pub trait ProviderMap: Send + Sync {
    fn center(&self) -> Result<Coordinate> {
        Err(MapError::NotImplemented("ProviderMap::center"))
    }

    fn zoom(&self) -> Result<f64> {
        Err(MapError::NotImplemented("ProviderMap::zoom"))
    }

    fn set_center(&self, _center: Coordinate, _animated: bool) -> Result<()> {
        Err(MapError::NotImplemented("ProviderMap::set_center"))
    }

    fn set_zoom(&self, _zoom: f64, _animated: bool) -> Result<()> {
        Err(MapError::NotImplemented("ProviderMap::set_zoom"))
    }

    /// Moves and zooms in one step. SDKs with a combined call should override this.
    fn set_zoom_center(&self, zoom: f64, center: Coordinate, animated: bool) -> Result<()> {
        self.set_zoom(zoom, animated)?;
        self.set_center(center, animated)
    }

    /// Lets adapters recover their concrete type, e.g. to place pins on it
    fn as_any(&self) -> &dyn Any;
}

/// A pin instance owned by an SDK
pub trait ProviderPin: Send + Sync {
    fn set_coordinate(&self, _coordinate: Coordinate) -> Result<()> {
        Err(MapError::NotImplemented("ProviderPin::set_coordinate"))
    }

    /// Adds the pin to `map`, or removes it from its current map on `None`
    fn set_map(&self, _map: Option<&dyn ProviderMap>) -> Result<()> {
        Err(MapError::NotImplemented("ProviderPin::set_map"))
    }

    fn set_properties(&self, _properties: &PinProperties) -> Result<()> {
        Err(MapError::NotImplemented("ProviderPin::set_properties"))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Everything a backend needs to build a map
#[derive(Clone)]
pub struct ProviderMapOptions {
    pub wrapper: Arc<dyn MapWrapper>,
    pub control_enabled: bool,
    /// Must be called at least once per discrete user move, after it settles
    pub pan_handler: MotionCallback,
    /// Must be called at least once per discrete user move, when it starts
    pub pan_start_handler: MotionCallback,
    pub provider_options: serde_json::Value,
}

impl fmt::Debug for ProviderMapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMapOptions")
            .field("control_enabled", &self.control_enabled)
            .field("provider_options", &self.provider_options)
            .finish_non_exhaustive()
    }
}

/// Everything a backend needs to build a pin
#[derive(Clone)]
pub struct ProviderPinOptions {
    /// Icon key to image URL
    pub icons: HashMap<String, String>,
    pub click_handler: ClickHandler,
    pub focus_handler: FlagHandler,
    pub hover_handler: FlagHandler,
    pub provider_options: serde_json::Value,
}

impl fmt::Debug for ProviderPinOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderPinOptions")
            .field("icons", &self.icons)
            .field("provider_options", &self.provider_options)
            .finish_non_exhaustive()
    }
}

/// A map SDK and its one-shot load lifecycle.
///
/// Cloning is cheap and every clone shares the same load state.
#[derive(Clone)]
pub struct MapProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    backend: Arc<dyn ProviderBackend>,
    invoked: AtomicBool,
    state: watch::Sender<LoadState>,
}

impl MapProvider {
    pub fn new<B: ProviderBackend + 'static>(backend: B) -> Self {
        Self::from_backend(Arc::new(backend))
    }

    pub fn from_backend(backend: Arc<dyn ProviderBackend>) -> Self {
        let (state, _) = watch::channel(LoadState::Unloaded);
        Self {
            inner: Arc::new(ProviderInner {
                backend,
                invoked: AtomicBool::new(false),
                state,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn backend(&self) -> &Arc<dyn ProviderBackend> {
        &self.inner.backend
    }

    pub fn state(&self) -> LoadState {
        self.inner.state.borrow().clone()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.inner.state.borrow(), LoadState::Loaded)
    }

    /// Loads the SDK.
    ///
    /// Only the first call runs the backend loader; every other call waits for that
    /// outcome. The loader runs as its own task, so dropping the returned future does
    /// not interrupt it. A failed load stays failed.
    pub async fn load(&self, api_key: &str, options: LoadOptions) -> Result<()> {
        if !self.inner.invoked.swap(true, Ordering::AcqRel) {
            log::info!("Loading map provider '{}'", self.name());
            self.inner.state.send_replace(LoadState::Loading);

            let inner = self.inner.clone();
            let pending = PendingLoad(Some(self.inner.clone()));
            let api_key = api_key.to_string();
            runtime::spawn(async move {
                let outcome = inner.backend.load(&api_key, &options).await;
                pending.finish(outcome);
            });
        }
        self.ready().await
    }

    /// Resolves once a load has finished, with its outcome
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        loop {
            let outcome = self.outcome(&rx.borrow_and_update());
            if let Some(outcome) = outcome {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(self.not_loaded());
            }
        }
    }

    fn outcome(&self, state: &LoadState) -> Option<Result<()>> {
        match state {
            LoadState::Loaded => Some(Ok(())),
            LoadState::Failed(reason) => Some(Err(MapError::LoadFailed {
                provider: self.name().to_string(),
                reason: reason.clone(),
            })),
            LoadState::Unloaded | LoadState::Loading => None,
        }
    }

    pub(crate) fn not_loaded(&self) -> MapError {
        MapError::NotLoaded {
            provider: self.name().to_string(),
        }
    }

    pub fn create_map(&self, options: ProviderMapOptions) -> Result<Box<dyn ProviderMap>> {
        if !self.is_loaded() {
            return Err(self.not_loaded());
        }
        self.inner.backend.create_map(options)
    }

    pub fn create_pin(&self, options: ProviderPinOptions) -> Result<Box<dyn ProviderPin>> {
        if !self.is_loaded() {
            return Err(self.not_loaded());
        }
        self.inner.backend.create_pin(options)
    }

    /// Whether two handles share the same load state
    pub fn ptr_eq(&self, other: &MapProvider) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Publishes the outcome of a running load. A load that is dropped before it
/// finishes, e.g. because no runtime could run it, ends as `Failed`.
struct PendingLoad(Option<Arc<ProviderInner>>);

impl PendingLoad {
    fn finish(mut self, outcome: anyhow::Result<()>) {
        let Some(inner) = self.0.take() else {
            return;
        };
        let name = inner.backend.name();
        let state = match outcome {
            Ok(()) => {
                log::info!("Map provider '{}' loaded", name);
                LoadState::Loaded
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                log::warn!("Map provider '{}' failed to load: {}", name, reason);
                LoadState::Failed(reason)
            }
        };
        inner.state.send_replace(state);
    }
}

impl Drop for PendingLoad {
    fn drop(&mut self) {
        if let Some(inner) = self.0.take() {
            log::warn!(
                "Map provider '{}' load was dropped before finishing",
                inner.backend.name()
            );
            inner
                .state
                .send_replace(LoadState::Failed("load cancelled".to_string()));
        }
    }
}

impl fmt::Debug for MapProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapProvider")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
