// src/utils.rs

//! Utility helpers shared by the explainer and tooltip code paths
//!
//! Rate limiting (debounce/throttle), memoization, and timing. The rate
//! wrappers mirror the contracts the front-end modules rely on: debounce
//! fires only the last call of a burst, throttle fires at most once per
//! window with the latest attempted arguments.

use std::future::Future;
use std::time::{Duration, Instant};

/// Timing utilities
pub mod timing {
    use super::*;

    /// Simple stopwatch for measuring execution time
    #[derive(Debug, Clone)]
    pub struct Stopwatch {
        start_time: Instant,
    }

    impl Stopwatch {
        /// Create and start a new stopwatch
        pub fn start() -> Self {
            Self {
                start_time: Instant::now(),
            }
        }

        /// Get elapsed time since start
        pub fn elapsed(&self) -> Duration {
            Instant::now().duration_since(self.start_time)
        }

        /// Stop the stopwatch and return total elapsed time
        pub fn stop(self) -> Duration {
            Instant::now().duration_since(self.start_time)
        }
    }

    /// Execute a future and measure its execution time
    pub async fn measure_async<F, T>(future: F) -> (T, Duration)
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let result = future.await;
        let duration = start.elapsed();
        (result, duration)
    }
}

/// Rate-limiting wrappers
pub mod rate {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;

    use super::Duration;

    /// Trailing-edge debouncer: every call cancels the pending one and
    /// reschedules with the latest arguments, so only the last call of a
    /// burst fires.
    pub struct Debouncer<T: Clone + Send + 'static> {
        delay: Duration,
        func: Arc<dyn Fn(T) + Send + Sync>,
        pending: Arc<Mutex<Option<JoinHandle<()>>>>,
    }

    impl<T: Clone + Send + 'static> Debouncer<T> {
        pub fn new(delay: Duration, func: impl Fn(T) + Send + Sync + 'static) -> Self {
            Self {
                delay,
                func: Arc::new(func),
                pending: Arc::new(Mutex::new(None)),
            }
        }

        pub fn call(&self, arg: T) {
            let mut pending = self.pending.lock();
            if let Some(handle) = pending.take() {
                handle.abort();
            }

            let func = Arc::clone(&self.func);
            let delay = self.delay;
            *pending = Some(tokio::spawn(async move {
                sleep(delay).await;
                func(arg);
            }));
        }

        /// Drops any pending invocation without firing it
        pub fn cancel(&self) {
            if let Some(handle) = self.pending.lock().take() {
                handle.abort();
            }
        }
    }

    impl<T: Clone + Send + 'static> Drop for Debouncer<T> {
        fn drop(&mut self) {
            self.cancel();
        }
    }

    struct ThrottleState<T> {
        in_window: bool,
        trailing: Option<T>,
    }

    /// Leading + trailing throttler: the first call of a window fires
    /// synchronously; later calls only replace the pending trailing
    /// arguments, which fire once when the window closes.
    pub struct Throttler<T: Clone + Send + 'static> {
        delay: Duration,
        func: Arc<dyn Fn(T) + Send + Sync>,
        state: Arc<Mutex<ThrottleState<T>>>,
    }

    impl<T: Clone + Send + 'static> Throttler<T> {
        pub fn new(delay: Duration, func: impl Fn(T) + Send + Sync + 'static) -> Self {
            Self {
                delay,
                func: Arc::new(func),
                state: Arc::new(Mutex::new(ThrottleState {
                    in_window: false,
                    trailing: None,
                })),
            }
        }

        pub fn call(&self, arg: T) {
            {
                let mut state = self.state.lock();
                if state.in_window {
                    state.trailing = Some(arg);
                    return;
                }
                state.in_window = true;
            }

            (self.func)(arg);
            self.run_window();
        }

        fn run_window(&self) {
            let state = Arc::clone(&self.state);
            let func = Arc::clone(&self.func);
            let delay = self.delay;

            tokio::spawn(async move {
                loop {
                    sleep(delay).await;
                    let trailing = state.lock().trailing.take();
                    match trailing {
                        // Trailing call extends the window by one more delay
                        Some(arg) => func(arg),
                        None => {
                            state.lock().in_window = false;
                            break;
                        }
                    }
                }
            });
        }
    }
}

/// Memoization with presence-based hit detection
pub mod memo {
    use std::hash::Hash;
    use std::sync::Arc;

    use dashmap::DashMap;

    /// A cache that can be emptied by the shared cleanup path
    pub trait ClearableCache: Send + Sync {
        fn clear(&self);
        fn len(&self) -> usize;
        fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl<K: Eq + Hash + Send + Sync, V: Send + Sync> ClearableCache for DashMap<K, V> {
        fn clear(&self) {
            DashMap::clear(self)
        }

        fn len(&self) -> usize {
            DashMap::len(self)
        }
    }

    /// Memoizing wrapper around a pure function. A key is present or it
    /// is not; cached values that happen to be empty or `None` still
    /// count as hits.
    pub struct Memoized<A, K: Eq + Hash, R: Clone> {
        func: Arc<dyn Fn(&A) -> R + Send + Sync>,
        key_fn: Arc<dyn Fn(&A) -> K + Send + Sync>,
        cache: Arc<DashMap<K, R>>,
    }

    impl<A, R> Memoized<A, A, R>
    where
        A: Clone + Eq + Hash + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        /// Memoizes on the argument itself
        pub fn new(func: impl Fn(&A) -> R + Send + Sync + 'static) -> Self {
            Self::with_key(func, |arg: &A| arg.clone())
        }
    }

    impl<A, K, R> Memoized<A, K, R>
    where
        K: Eq + Hash + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        /// Memoizes on a derived key
        pub fn with_key(
            func: impl Fn(&A) -> R + Send + Sync + 'static,
            key_fn: impl Fn(&A) -> K + Send + Sync + 'static,
        ) -> Self {
            Self {
                func: Arc::new(func),
                key_fn: Arc::new(key_fn),
                cache: Arc::new(DashMap::new()),
            }
        }

        pub fn call(&self, arg: A) -> R {
            let key = (self.key_fn)(&arg);
            if let Some(hit) = self.cache.get(&key) {
                return hit.clone();
            }
            let value = (self.func)(&arg);
            self.cache.insert(key, value.clone());
            value
        }

        /// Shared handle for registering with the cleanup path
        pub fn cache_handle(&self) -> Arc<dyn ClearableCache> {
            Arc::clone(&self.cache) as Arc<dyn ClearableCache>
        }

        pub fn clear(&self) {
            self.cache.clear();
        }

        pub fn len(&self) -> usize {
            self.cache.len()
        }

        pub fn is_empty(&self) -> bool {
            self.cache.is_empty()
        }
    }
}
