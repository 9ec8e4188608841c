//! Process-wide request metrics.
//!
//! One [`Metrics`] value is created at the composition root, wrapped in an
//! `Arc`, and shared by the logging layer (the only writer) and whatever
//! reads it (the `/metrics` handler). Every update runs inside a single
//! critical section so count, sum, min and max always agree with each
//! other; readers get a [`Snapshot`], an owned copy that concurrent writers
//! cannot touch.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::status::StatusClass;

/// Concurrency-safe request counters and latency statistics.
#[derive(Debug)]
pub struct Metrics {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    total: u64,
    success: u64,
    client_errors: u64,
    server_errors: u64,
    latency_sum: Duration,
    // Seeded with `Duration::MAX` so the first sample always wins.
    latency_min: Duration,
    latency_max: Duration,
    status_codes: HashMap<u16, u64>,
    endpoints: HashMap<String, u64>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            total: 0,
            success: 0,
            client_errors: 0,
            server_errors: 0,
            latency_sum: Duration::ZERO,
            latency_min: Duration::MAX,
            latency_max: Duration::ZERO,
            status_codes: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Records one finished request.
    pub fn record_request(&self, status: u16, latency: Duration, endpoint: &str) {
        let mut s = self.state.lock();

        s.total += 1;
        match StatusClass::of(status) {
            Some(StatusClass::Success) => s.success += 1,
            Some(StatusClass::ClientError) => s.client_errors += 1,
            Some(StatusClass::ServerError) => s.server_errors += 1,
            None => {}
        }

        *s.status_codes.entry(status).or_insert(0) += 1;
        // Avoid allocating the key on the hot path once the endpoint is known.
        if let Some(count) = s.endpoints.get_mut(endpoint) {
            *count += 1;
        } else {
            s.endpoints.insert(endpoint.to_owned(), 1);
        }

        s.latency_sum = s.latency_sum.saturating_add(latency);
        if latency < s.latency_min {
            s.latency_min = latency;
        }
        if latency > s.latency_max {
            s.latency_max = latency;
        }
    }

    /// An independent point-in-time copy of every counter.
    pub fn snapshot(&self) -> Snapshot {
        let s = self.state.lock();

        let (avg_latency, min_latency) = if s.total == 0 {
            (Duration::ZERO, Duration::ZERO)
        } else {
            let avg = s.latency_sum.as_nanos() / u128::from(s.total);
            (
                Duration::from_nanos(u64::try_from(avg).unwrap_or(u64::MAX)),
                s.latency_min,
            )
        };

        Snapshot {
            total: s.total,
            success: s.success,
            client_errors: s.client_errors,
            server_errors: s.server_errors,
            avg_latency,
            min_latency,
            max_latency: s.latency_max,
            status_codes: s.status_codes.iter().map(|(k, v)| (*k, *v)).collect(),
            endpoints: s.endpoints.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// A read-only copy of [`Metrics`] at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub total: u64,
    pub success: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    /// `latency_sum / total`, or zero when nothing was recorded.
    pub avg_latency: Duration,
    /// Zero when nothing was recorded.
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub status_codes: BTreeMap<u16, u64>,
    pub endpoints: BTreeMap<String, u64>,
}

/// The JSON document served by the metrics endpoint.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    requests: RequestCounts,
    latency: LatencyMillis,
    status_codes: &'a BTreeMap<u16, u64>,
    endpoints: &'a BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
struct RequestCounts {
    total: u64,
    success: u64,
    client_errors: u64,
    server_errors: u64,
}

#[derive(Debug, Serialize)]
struct LatencyMillis {
    avg_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Snapshot {
    pub fn report(&self) -> Report<'_> {
        Report {
            requests: RequestCounts {
                total: self.total,
                success: self.success,
                client_errors: self.client_errors,
                server_errors: self.server_errors,
            },
            latency: LatencyMillis {
                avg_ms: millis(self.avg_latency),
                min_ms: millis(self.min_latency),
                max_ms: millis(self.max_latency),
            },
            status_codes: &self.status_codes,
            endpoints: &self.endpoints,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.report())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn empty_snapshot_reports_zero_not_the_sentinel() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.min_latency, Duration::ZERO);
        assert_eq!(snap.max_latency, Duration::ZERO);
        assert_eq!(snap.avg_latency, Duration::ZERO);
    }

    #[test]
    fn classifies_and_breaks_down_requests() {
        let m = Metrics::new();
        m.record_request(200, ms(10), "/");
        m.record_request(201, ms(20), "/api/v1/users");
        m.record_request(404, ms(5), "/missing");
        m.record_request(429, ms(1), "/");
        m.record_request(500, ms(30), "/panic");
        m.record_request(302, ms(2), "/");
        m.record_request(700, ms(2), "/");

        let snap = m.snapshot();
        assert_eq!(snap.total, 7);
        assert_eq!(snap.success, 2);
        assert_eq!(snap.client_errors, 2);
        assert_eq!(snap.server_errors, 1);
        assert!(snap.success + snap.client_errors + snap.server_errors <= snap.total);
        assert_eq!(snap.status_codes[&302], 1);
        assert_eq!(snap.status_codes[&700], 1);
        assert_eq!(snap.endpoints["/"], 4);
        assert_eq!(snap.endpoints["/panic"], 1);
    }

    #[test]
    fn min_max_bound_every_sample_and_average_is_computed_at_read() {
        let m = Metrics::new();
        let samples = [ms(7), ms(3), ms(12), ms(9)];
        for s in samples {
            m.record_request(200, s, "/");
        }

        let snap = m.snapshot();
        for s in samples {
            assert!(snap.min_latency <= s && s <= snap.max_latency);
        }
        assert_eq!(snap.min_latency, ms(3));
        assert_eq!(snap.max_latency, ms(12));
        assert_eq!(snap.avg_latency, Duration::from_micros(7750));
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let m = Metrics::new();
        m.record_request(200, ms(1), "/");
        let before = m.snapshot();
        m.record_request(200, ms(1), "/");

        assert_eq!(before.total, 1);
        assert_eq!(before.endpoints["/"], 1);
        assert_eq!(m.snapshot().total, 2);
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        let m = Arc::new(Metrics::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        let status = if i % 2 == 0 { 200 } else { 503 };
                        m.record_request(status, ms(t + 1), "/load");
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snap = m.snapshot();
        assert_eq!(snap.total, 8_000);
        assert_eq!(snap.success, 4_000);
        assert_eq!(snap.server_errors, 4_000);
        assert_eq!(snap.endpoints["/load"], 8_000);
        assert_eq!(snap.min_latency, ms(1));
        assert_eq!(snap.max_latency, ms(8));
    }

    #[test]
    fn report_has_the_documented_shape() {
        let m = Metrics::new();
        m.record_request(200, ms(4), "/health");
        m.record_request(404, ms(2), "/nope");

        let json: serde_json::Value = serde_json::from_slice(&m.snapshot().to_json().unwrap()).unwrap();
        assert_eq!(json["requests"]["total"], 2);
        assert_eq!(json["requests"]["success"], 1);
        assert_eq!(json["requests"]["client_errors"], 1);
        assert_eq!(json["requests"]["server_errors"], 0);
        assert_eq!(json["latency"]["avg_ms"], 3);
        assert_eq!(json["latency"]["min_ms"], 2);
        assert_eq!(json["latency"]["max_ms"], 4);
        assert_eq!(json["status_codes"]["404"], 1);
        assert_eq!(json["endpoints"]["/health"], 1);
    }
}
