use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};

use crate::config::CoalescerConfig;
use crate::defer::CallOnDrop;

/// The upstream fetch operation driven by a [`Coalescer`].
///
/// Implementors describe how to fetch the value for a key from some slow or
/// expensive upstream. The fetch may fail with any error type, as long as that
/// type is cloneable so a single failure can be fanned out to every waiting
/// caller.
///
/// The fetch is invoked from a spawned task and must be safe to call
/// concurrently for different keys. The [`Coalescer`] guarantees it is never
/// invoked concurrently for the same key.
pub trait FetchRequest: Send + Sync + 'static {
    /// The key identifying a fetchable resource.
    type Key: Clone + Eq + Hash + Send + Sync + 'static;
    /// The value produced by a successful fetch.
    type Value: Clone + Send + Sync + 'static;
    /// The error produced by a failed fetch.
    type Error: Clone + Send + Sync + 'static;

    /// Fetches the value for `key` from the upstream.
    fn fetch<'a>(&'a self, key: &'a Self::Key) -> BoxFuture<'a, Result<Self::Value, Self::Error>>;
}

/// The waiting side of one episode.
///
/// All callers attached to an episode await a clone of this, so all of them
/// observe the identical outcome. The channel is closed without a result only
/// if the fetch task died before reporting.
type SharedReceiver<V, E> = Shared<oneshot::Receiver<Result<V, E>>>;

struct State<F: FetchRequest> {
    /// Successfully fetched values, kept for the process lifetime.
    values: HashMap<F::Key, F::Value>,
    /// Episodes currently being fetched. At most one entry per key.
    inflight: HashMap<F::Key, SharedReceiver<F::Value, F::Error>>,
}

/// Deduplicates concurrent fetches per key and caches successful results.
///
/// For any key, at most one fetch runs at a time. Callers requesting a key
/// whose fetch is already in flight wait for that fetch instead of starting
/// their own, and all of them receive the single shared outcome. See the
/// [crate docs](crate) for the full lookup flow.
pub struct Coalescer<F: FetchRequest> {
    fetcher: Arc<F>,
    state: Arc<Mutex<State<F>>>,
    name: Arc<str>,
}

impl<F: FetchRequest> fmt::Debug for Coalescer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (values, inflight) = self
            .state
            .try_lock()
            .map(|state| (state.values.len(), state.inflight.len()))
            .unwrap_or_default();
        f.debug_struct("Coalescer")
            .field("name", &self.name)
            .field("cached values", &values)
            .field("in-flight episodes", &inflight)
            .finish()
    }
}

impl<F: FetchRequest> Clone for Coalescer<F> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Coalescer {
            fetcher: Arc::clone(&self.fetcher),
            state: Arc::clone(&self.state),
            name: Arc::clone(&self.name),
        }
    }
}

impl<F: FetchRequest> Coalescer<F> {
    /// Creates a new `Coalescer` driving the given fetcher, with default
    /// configuration.
    pub fn new(fetcher: F) -> Self {
        Self::with_config(fetcher, Default::default())
    }

    /// Creates a new `Coalescer` driving the given fetcher.
    pub fn with_config(fetcher: F, config: CoalescerConfig) -> Self {
        let state = State {
            values: HashMap::with_capacity(config.initial_capacity),
            inflight: HashMap::new(),
        };
        Coalescer {
            fetcher: Arc::new(fetcher),
            state: Arc::new(Mutex::new(state)),
            name: config.name.into(),
        }
    }

    /// Looks up the value for `key`, fetching it if necessary.
    ///
    /// A cached value is returned immediately. Otherwise this either joins the
    /// fetch already in flight for `key`, or starts one. Either way, the call
    /// resolves to the outcome of a single [`FetchRequest::fetch`] invocation,
    /// shared with every other caller of the same episode.
    ///
    /// # Errors
    ///
    /// Fails with the error the fetch produced. Errors are not cached: the
    /// next call for the same key makes a fresh attempt against the upstream.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future detaches this caller only. The fetch runs
    /// in a separate task, continues to completion and still populates the
    /// cache for future callers.
    pub async fn get(&self, key: &F::Key) -> Result<F::Value, F::Error> {
        loop {
            let receiver = {
                let mut state = self.state.lock().unwrap();

                if let Some(value) = state.values.get(key) {
                    tracing::trace!(coalescer = %self.name, "Serving cached value");
                    return Ok(value.clone());
                }

                // The cache lookup above and the entry below happen under one
                // lock, so exactly one caller per episode takes the vacant
                // branch and becomes responsible for the fetch.
                match state.inflight.entry(key.clone()) {
                    Entry::Occupied(entry) => {
                        tracing::trace!(coalescer = %self.name, "Joining in-flight fetch");
                        entry.get().clone()
                    }
                    Entry::Vacant(entry) => {
                        tracing::trace!(coalescer = %self.name, "Spawning deduplicated fetch");
                        entry.insert(self.spawn_fetch(key.clone())).clone()
                    }
                }
            };

            match receiver.await {
                Ok(outcome) => return outcome,
                Err(oneshot::Canceled) => {
                    // The fetch task went away without reporting a result,
                    // which only happens when the fetch itself panicked. Its
                    // entry has been torn down already, so looping around
                    // starts (or joins) a fresh episode.
                    tracing::warn!(
                        coalescer = %self.name,
                        "In-flight fetch vanished without a result, retrying"
                    );
                }
            }
        }
    }

    /// Spawns the fetch task for one episode and returns the shared handle to
    /// its outcome.
    ///
    /// The in-flight entry for `key` must be inserted by the caller while
    /// still holding the state lock.
    fn spawn_fetch(&self, key: F::Key) -> SharedReceiver<F::Value, F::Error> {
        let (sender, receiver) = oneshot::channel();

        let fetcher = Arc::clone(&self.fetcher);
        let state = Arc::clone(&self.state);
        let name = Arc::clone(&self.name);

        tokio::spawn(async move {
            // Tear the entry down even if the fetch panics, so no waiter ever
            // hangs on an episode that can no longer resolve.
            let guard = CallOnDrop::new({
                let state = Arc::clone(&state);
                let key = key.clone();
                move || {
                    state.lock().unwrap().inflight.remove(&key);
                }
            });

            let result = fetcher.fetch(&key).await;

            if let Ok(value) = &result {
                state.lock().unwrap().values.insert(key.clone(), value.clone());
            }

            // The guard is the only place that removes the entry. Removing it
            // here as well could race with a fresh episode for the same key
            // and tear down that episode's entry instead. On success the
            // value is already cached at this point, so a caller arriving
            // after the teardown is served from the cache rather than
            // starting a duplicate fetch.
            drop(guard);

            if sender.send(result).is_err() {
                tracing::trace!(coalescer = %name, "No callers left to receive fetch result");
            }
        });

        receiver.shared()
    }

    /// Removes the cached value for `key`, returning it if there was one.
    ///
    /// A fetch currently in flight for `key` is unaffected and will re-insert
    /// its value once it succeeds.
    pub fn evict(&self, key: &F::Key) -> Option<F::Value> {
        self.state.lock().unwrap().values.remove(key)
    }

    /// Removes all cached values.
    ///
    /// Fetches currently in flight are unaffected.
    pub fn clear(&self) {
        self.state.lock().unwrap().values.clear();
    }

    /// The number of values in the result cache.
    pub fn cached_len(&self) -> usize {
        self.state.lock().unwrap().values.len()
    }

    /// Whether the result cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cached_len() == 0
    }
}
