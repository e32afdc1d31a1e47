//! # Drive Request Observability
//!
//! Every pipeline attempt — success, retried failure, or fatal failure —
//! lands exactly one observation here: method, endpoint label (path only,
//! query stripped), status, wall-clock duration, and an error-kind tag when
//! the attempt failed. Collaborators scrape the snapshot; each observation
//! is also mirrored as a `tracing` event.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Identity of one counter bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: &'static str,
    pub endpoint: String,
    pub status: u16,
}

/// Aggregated stats for one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestStats {
    pub count: u64,
    pub total_duration: Duration,
}

#[derive(Default)]
struct Registry {
    requests: HashMap<RequestKey, RequestStats>,
    errors: HashMap<(RequestKey, &'static str), u64>,
}

/// Process-local request counters for the Drive pipeline.
#[derive(Default)]
pub struct DriveMetrics {
    registry: Mutex<Registry>,
}

impl DriveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt.
    pub fn observe(
        &self,
        method: &'static str,
        endpoint: &str,
        status: u16,
        duration: Duration,
        error_kind: Option<&'static str>,
    ) {
        debug!(
            method,
            endpoint,
            status,
            duration_ms = duration.as_millis() as u64,
            error_kind,
            "drive request observed"
        );

        let key = RequestKey {
            method,
            endpoint: endpoint.to_string(),
            status,
        };

        let mut registry = self.registry.lock().expect("metrics mutex poisoned");
        let stats = registry.requests.entry(key.clone()).or_default();
        stats.count += 1;
        stats.total_duration += duration;

        if let Some(kind) = error_kind {
            *registry.errors.entry((key, kind)).or_default() += 1;
        }
    }

    /// Attempt count for one (method, endpoint, status) bucket.
    pub fn request_count(&self, method: &'static str, endpoint: &str, status: u16) -> u64 {
        let key = RequestKey {
            method,
            endpoint: endpoint.to_string(),
            status,
        };
        self.registry
            .lock()
            .expect("metrics mutex poisoned")
            .requests
            .get(&key)
            .map(|s| s.count)
            .unwrap_or(0)
    }

    /// Error count for one (method, endpoint, status, kind) bucket.
    pub fn error_count(
        &self,
        method: &'static str,
        endpoint: &str,
        status: u16,
        kind: &'static str,
    ) -> u64 {
        let key = RequestKey {
            method,
            endpoint: endpoint.to_string(),
            status,
        };
        self.registry
            .lock()
            .expect("metrics mutex poisoned")
            .errors
            .get(&(key, kind))
            .copied()
            .unwrap_or(0)
    }

    /// Copy of every request bucket.
    pub fn snapshot(&self) -> Vec<(RequestKey, RequestStats)> {
        self.registry
            .lock()
            .expect("metrics mutex poisoned")
            .requests
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
