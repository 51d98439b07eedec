//! Runtime abstraction layer for async operations
//!
//! This module provides runtime-agnostic interfaces for spawning background tasks
//! (pin visibility tracking, batch flush timers) and for animation frames, which the
//! map uses to throttle pan notifications.

use crate::core::constants::FRAME_INTERVAL_MS;
use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a future and return a handle to it
    fn spawn_boxed(&self, future: BoxFuture<'static, ()>) -> Box<dyn AsyncHandle>;

    /// A future that completes after `duration` on this runtime's clock
    fn delay(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Handle to a spawned async task
pub trait AsyncHandle: Send + Sync {
    /// Check if the task is finished
    fn is_finished(&self) -> bool;

    /// Cancel the task
    fn cancel(&self);
}

/// Convenience function for spawning with type safety
pub fn spawn<F>(future: F) -> Box<dyn AsyncHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    runtime().spawn_boxed(Box::pin(future))
}

/// Default spawner implementations
pub mod spawners {
    use super::*;

    #[cfg(feature = "tokio-runtime")]
    pub mod tokio_impl {
        use super::*;
        use ::tokio::runtime::Handle;
        use ::tokio::task::JoinHandle;

        /// Tokio-based async spawner. Spawns onto the runtime of the calling thread.
        pub struct TokioSpawner;

        impl AsyncSpawner for TokioSpawner {
            fn spawn_boxed(&self, future: BoxFuture<'static, ()>) -> Box<dyn AsyncHandle> {
                match Handle::try_current() {
                    Ok(handle) => Box::new(TokioHandle(handle.spawn(future))),
                    Err(e) => {
                        log::error!("Cannot spawn task outside of a Tokio runtime: {}", e);
                        Box::new(super::DetachedHandle)
                    }
                }
            }

            fn delay(&self, duration: Duration) -> BoxFuture<'static, ()> {
                Box::pin(::tokio::time::sleep(duration))
            }
        }

        struct TokioHandle(JoinHandle<()>);

        impl AsyncHandle for TokioHandle {
            fn is_finished(&self) -> bool {
                self.0.is_finished()
            }

            fn cancel(&self) {
                self.0.abort();
            }
        }
    }

    /// Handle for a task that never started
    pub(crate) struct DetachedHandle;

    impl AsyncHandle for DetachedHandle {
        fn is_finished(&self) -> bool {
            true
        }

        fn cancel(&self) {}
    }

    /// Used when no spawner was installed and no default runtime is compiled in
    #[cfg(not(feature = "tokio-runtime"))]
    pub(crate) struct MissingSpawner;

    #[cfg(not(feature = "tokio-runtime"))]
    impl AsyncSpawner for MissingSpawner {
        fn spawn_boxed(&self, _future: BoxFuture<'static, ()>) -> Box<dyn AsyncHandle> {
            log::error!(
                "No async runtime available. Enable the 'tokio-runtime' feature or call init_runtime()."
            );
            Box::new(DetachedHandle)
        }

        fn delay(&self, _duration: Duration) -> BoxFuture<'static, ()> {
            log::error!("No async runtime available to time a delay");
            Box::pin(futures::future::pending::<()>())
        }
    }
}

/// Wait without blocking the executor, on the clock of the installed spawner
pub async fn async_delay(duration: Duration) {
    runtime().delay(duration).await;
}

/// Global runtime instance
static RUNTIME: OnceCell<Box<dyn AsyncSpawner>> = OnceCell::new();

/// Initialize the runtime with a specific spawner. Only the first call takes effect.
pub fn init_runtime(spawner: Box<dyn AsyncSpawner>) {
    if RUNTIME.set(spawner).is_err() {
        log::debug!("Runtime already initialized; ignoring new spawner");
    }
}

/// Get the global runtime spawner
pub fn runtime() -> &'static dyn AsyncSpawner {
    RUNTIME
        .get_or_init(|| {
            #[cfg(feature = "tokio-runtime")]
            {
                Box::new(spawners::tokio_impl::TokioSpawner)
            }

            #[cfg(not(feature = "tokio-runtime"))]
            {
                Box::new(spawners::MissingSpawner)
            }
        })
        .as_ref()
}

/// Work scheduled for the next animation frame
pub type FrameCallback = Box<dyn FnOnce() + Send + 'static>;

/// Source of animation frames.
///
/// Callbacks requested before a frame all run in that frame, in the order they were
/// requested. Callbacks requested while a frame is running go to the next frame.
pub trait FrameScheduler: Send + Sync {
    fn request_frame(&self, callback: FrameCallback);
}

/// Timer-driven frames at roughly 60 Hz, for hosts without a display refresh signal.
#[derive(Default)]
pub struct TimerFrameScheduler {
    queue: Arc<Mutex<FrameQueue>>,
}

#[derive(Default)]
struct FrameQueue {
    callbacks: Vec<FrameCallback>,
    frame_pending: bool,
}

impl TimerFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameScheduler for TimerFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) {
        let start_frame = {
            let mut queue = self.queue.lock();
            queue.callbacks.push(callback);
            !std::mem::replace(&mut queue.frame_pending, true)
        };

        if start_frame {
            let queue = self.queue.clone();
            spawn(async move {
                async_delay(Duration::from_millis(FRAME_INTERVAL_MS)).await;
                let callbacks = {
                    let mut queue = queue.lock();
                    queue.frame_pending = false;
                    std::mem::take(&mut queue.callbacks)
                };
                for callback in callbacks {
                    callback();
                }
            });
        }
    }
}

/// Frames driven by the host, e.g. from its own render loop.
#[derive(Default)]
pub struct ManualFrameScheduler {
    callbacks: Mutex<Vec<FrameCallback>>,
}

impl ManualFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every callback queued so far and returns how many ran
    pub fn run_frame(&self) -> usize {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }

    /// Number of callbacks waiting for the next frame
    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) {
        self.callbacks.lock().push(callback);
    }
}
