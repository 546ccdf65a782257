// src/utils/logging.rs - Logging helpers for a single resolution call
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::MatchResponse;

#[derive(Clone)]
pub struct ResolutionLogger {
    request_id: String,
    query: String,
    debug_mode: bool,
    start_time: Instant,
}

impl ResolutionLogger {
    pub fn new(query: &str, debug_mode: bool) -> Self {
        let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            request_id,
            query: query.to_string(),
            debug_mode,
            start_time: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn log_start(&self, has_context: bool, skip_cache: bool) {
        info!(
            "[{}] 🔎 Resolving '{}'{}{}",
            self.request_id,
            self.query,
            if has_context { " with context" } else { "" },
            if skip_cache { " (cache skipped)" } else { "" }
        );
    }

    pub fn log_phase(&self, depth: usize, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        match details {
            Some(details) => debug!(
                "[{}] 🔄 depth {} · {} - {} [+{:.0}ms]",
                self.request_id,
                depth,
                phase,
                details,
                elapsed.as_secs_f64() * 1000.0
            ),
            None => debug!(
                "[{}] 🔄 depth {} · {} [+{:.0}ms]",
                self.request_id,
                depth,
                phase,
                elapsed.as_secs_f64() * 1000.0
            ),
        }
    }

    pub fn log_cache_hit(&self, record_id: &str, confidence: f64, match_count: u32) {
        info!(
            "[{}] ⚡ Cache hit → {} (confidence {:.3}, seen {} times)",
            self.request_id, record_id, confidence, match_count
        );
    }

    pub fn log_fast_path(&self, depth: usize, record_id: &str, confidence: f64) {
        info!(
            "[{}] 🚀 Fast path at depth {} → {} (confidence {:.3})",
            self.request_id, depth, record_id, confidence
        );
    }

    pub fn log_escalation(&self, strategy: &str, accepted: bool) {
        if accepted {
            info!(
                "[{}] 🪜 Escalation '{}' produced an accepted match",
                self.request_id, strategy
            );
        } else {
            debug!(
                "[{}] 🪜 Escalation '{}' did not produce a match",
                self.request_id, strategy
            );
        }
    }

    pub fn log_degraded(&self, collaborator: &str, error: &str) {
        warn!(
            "[{}] ⚠️  {} degraded: {}",
            self.request_id, collaborator, error
        );
    }

    pub fn log_completion(&self, response: &MatchResponse, trace: &[String]) {
        let elapsed = self.get_elapsed();
        info!(
            "[{}] ✅ '{}' resolved as {} (best confidence {:.3}) in {:.1}ms",
            self.request_id,
            self.query,
            response.status(),
            response.best_confidence(),
            elapsed.as_secs_f64() * 1000.0
        );
        if trace.is_empty() {
            return;
        }
        if self.debug_mode {
            for step in trace {
                info!("[{}]    · {}", self.request_id, step);
            }
        } else {
            for step in trace {
                debug!("[{}]    · {}", self.request_id, step);
            }
        }
    }

    pub fn get_elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_short_and_distinct() {
        let a = ResolutionLogger::new("Acme", false);
        let b = ResolutionLogger::new("Acme", false);
        assert_eq!(a.request_id().len(), 8);
        assert_ne!(a.request_id(), b.request_id());
    }
}
