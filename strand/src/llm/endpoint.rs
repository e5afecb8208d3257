//! Endpoint configuration and health tracking.
//!
//! Each endpoint walks a small state machine: `unknown → healthy | degraded →
//! unhealthy`. Consecutive failures past `degraded_after` mark it degraded,
//! past `unhealthy_after` unhealthy; the first success restores healthy.
//! A background probe pings `/models` on every endpoint at a fixed interval.
//! Single writer (the probe and the failover loop), many readers;
//! last-write-wins is acceptable for this map.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

/// One LLM endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub name: String,
    pub timeout: Duration,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, name: impl Into<String>, timeout: Duration) -> Self {
        let url = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            name: name.into(),
            timeout,
        }
    }

    /// Chat-completions URL for this endpoint.
    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.url)
    }

    /// Probe URL (OpenAI-compatible model listing).
    pub fn probe_url(&self) -> String {
        format!("{}/models", self.url)
    }
}

/// Endpoint health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointHealth {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl EndpointHealth {
    /// Candidate ordering rank: healthy first, unknown next (untested is
    /// worth trying early), then degraded, unhealthy last resort.
    fn rank(&self) -> u8 {
        match self {
            EndpointHealth::Healthy => 0,
            EndpointHealth::Unknown => 1,
            EndpointHealth::Degraded => 2,
            EndpointHealth::Unhealthy => 3,
        }
    }
}

struct EndpointState {
    health: EndpointHealth,
    consecutive_failures: u32,
}

/// Shared health map over endpoint names.
pub struct HealthTracker {
    states: DashMap<String, EndpointState>,
    degraded_after: u32,
    unhealthy_after: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(1, 3)
    }
}

impl HealthTracker {
    pub fn new(degraded_after: u32, unhealthy_after: u32) -> Self {
        Self {
            states: DashMap::new(),
            degraded_after,
            unhealthy_after,
        }
    }

    pub fn health(&self, name: &str) -> EndpointHealth {
        self.states
            .get(name)
            .map(|s| s.health)
            .unwrap_or(EndpointHealth::Unknown)
    }

    pub fn record_success(&self, name: &str) {
        let mut entry = self.states.entry(name.to_string()).or_insert(EndpointState {
            health: EndpointHealth::Unknown,
            consecutive_failures: 0,
        });
        if entry.health != EndpointHealth::Healthy {
            tracing::info!(endpoint = name, "endpoint healthy");
        }
        entry.health = EndpointHealth::Healthy;
        entry.consecutive_failures = 0;
    }

    pub fn record_failure(&self, name: &str) {
        let mut entry = self.states.entry(name.to_string()).or_insert(EndpointState {
            health: EndpointHealth::Unknown,
            consecutive_failures: 0,
        });
        entry.consecutive_failures += 1;
        let next = if entry.consecutive_failures >= self.unhealthy_after {
            EndpointHealth::Unhealthy
        } else if entry.consecutive_failures >= self.degraded_after {
            EndpointHealth::Degraded
        } else {
            entry.health
        };
        if next != entry.health {
            tracing::warn!(
                endpoint = name,
                failures = entry.consecutive_failures,
                health = ?next,
                "endpoint health changed"
            );
        }
        entry.health = next;
    }

    /// Orders candidates for a call: healthy, unknown, degraded, then
    /// unhealthy as last resort. Stable within a rank (configured order).
    pub fn ordered<'a>(&self, endpoints: &'a [EndpointConfig]) -> Vec<&'a EndpointConfig> {
        let mut indexed: Vec<(usize, &EndpointConfig)> = endpoints.iter().enumerate().collect();
        indexed.sort_by_key(|(idx, ep)| (self.health(&ep.name).rank(), *idx));
        indexed.into_iter().map(|(_, ep)| ep).collect()
    }
}

/// Spawns the background health probe: pings every endpoint's `/models` at
/// `interval` and feeds the tracker. Abort the returned handle to stop it.
pub fn spawn_health_probe(
    http: reqwest::Client,
    endpoints: Vec<EndpointConfig>,
    tracker: Arc<HealthTracker>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for ep in &endpoints {
                let result = http
                    .get(ep.probe_url())
                    .timeout(ep.timeout)
                    .send()
                    .await;
                match result {
                    Ok(resp) if resp.status().is_success() => tracker.record_success(&ep.name),
                    Ok(resp) => {
                        tracing::debug!(endpoint = %ep.name, status = %resp.status(), "probe failed");
                        tracker.record_failure(&ep.name);
                    }
                    Err(e) => {
                        tracing::debug!(endpoint = %ep.name, error = %e, "probe failed");
                        tracker.record_failure(&ep.name);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(name: &str) -> EndpointConfig {
        EndpointConfig::new(format!("http://{name}:8000/v1"), name, Duration::from_secs(5))
    }

    /// **Scenario**: failures walk unknown → degraded → unhealthy; success resets.
    #[test]
    fn health_state_machine_transitions() {
        let t = HealthTracker::new(2, 4);
        assert_eq!(t.health("a"), EndpointHealth::Unknown);
        t.record_failure("a");
        assert_eq!(t.health("a"), EndpointHealth::Unknown);
        t.record_failure("a");
        assert_eq!(t.health("a"), EndpointHealth::Degraded);
        t.record_failure("a");
        t.record_failure("a");
        assert_eq!(t.health("a"), EndpointHealth::Unhealthy);
        t.record_success("a");
        assert_eq!(t.health("a"), EndpointHealth::Healthy);
    }

    /// **Scenario**: ordering puts healthy first and unhealthy last.
    #[test]
    fn ordered_candidates_by_health() {
        let endpoints = vec![ep("bad"), ep("good"), ep("meh")];
        let t = HealthTracker::new(1, 2);
        t.record_failure("bad");
        t.record_failure("bad");
        t.record_success("good");
        t.record_failure("meh");

        let ordered: Vec<&str> = t
            .ordered(&endpoints)
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(ordered, vec!["good", "meh", "bad"]);
    }

    /// **Scenario**: ties keep configured order (stable sort).
    #[test]
    fn ordering_is_stable_within_rank() {
        let endpoints = vec![ep("first"), ep("second")];
        let t = HealthTracker::default();
        let ordered: Vec<&str> = t
            .ordered(&endpoints)
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(ordered, vec!["first", "second"]);
    }

    #[test]
    fn urls_are_normalized() {
        let e = EndpointConfig::new("http://host:8000/v1/", "e", Duration::from_secs(1));
        assert_eq!(e.chat_url(), "http://host:8000/v1/chat/completions");
        assert_eq!(e.probe_url(), "http://host:8000/v1/models");
    }
}
