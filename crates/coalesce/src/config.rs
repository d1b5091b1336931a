use serde::Deserialize;

/// Configuration for a [`Coalescer`](crate::Coalescer).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// Human-readable name of the coalescer instance.
    ///
    /// The name is attached as a field to all log records the coalescer
    /// emits, which keeps multiple instances in one process apart.
    ///
    /// Defaults to `coalesce`.
    pub name: String,

    /// Initial capacity of the result cache.
    ///
    /// The result cache grows with the number of distinct keys fetched
    /// successfully and is never bounded; this only pre-sizes the map.
    ///
    /// Defaults to `0`.
    pub initial_capacity: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            name: "coalesce".into(),
            initial_capacity: 0,
        }
    }
}
