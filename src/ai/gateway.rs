// src/ai/gateway.rs - Timeout, usage reporting and failure degradation for reasoning calls
use anyhow::Result;
use log::warn;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ai::reasoning::ReasoningService;
use crate::ai::types::Reasoned;
use crate::ai::usage::UsageSink;
use crate::errors::MatchError;
use crate::utils::with_timeout;

/// Wraps the reasoning service so that a failed, slow or malformed call becomes `None`
/// and the caller keeps its non-AI result.
pub struct ReasoningGateway {
    service: Arc<dyn ReasoningService>,
    usage: Option<Arc<dyn UsageSink>>,
    timeout: Duration,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl ReasoningGateway {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        usage: Option<Arc<dyn UsageSink>>,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            usage,
            timeout,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &dyn ReasoningService {
        self.service.as_ref()
    }

    /// Runs one reasoning call under the collaborator timeout.
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<Reasoned<T>>>,
    {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match with_timeout(self.timeout, operation, fut).await {
            Ok(Reasoned { value, usage }) => {
                if let (Some(sink), Some(usage)) = (&self.usage, usage) {
                    sink.record(operation, &usage);
                }
                Some(value)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let kind = match e.downcast_ref::<MatchError>() {
                    Some(MatchError::MalformedResponse(_)) => "returned a malformed answer",
                    Some(MatchError::ReasoningUnavailable(_)) => "was unavailable",
                    _ => "failed",
                };
                warn!(
                    "🤖 Reasoning call '{}' {}, falling back to base scoring: {:#}",
                    operation, kind, e
                );
                None
            }
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}
