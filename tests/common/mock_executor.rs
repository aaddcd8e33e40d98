use async_trait::async_trait;
use checkup_relay::executor::{ExecutorRequest, FetchExecutor, UpstreamFailure};
use checkup_relay::models::SessionArtifacts;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted executor response
#[derive(Debug, Clone)]
pub enum Scripted {
    Success(serde_json::Value),
    Failure(UpstreamFailure),
    /// Never answers within any reasonable deadline
    Hang,
    Panic,
}

/// Executor that replays a script, then falls back to a default payload
#[derive(Debug)]
pub struct MockExecutor {
    script: Mutex<VecDeque<Scripted>>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<ExecutorRequest>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Respond in order with `responses`, then with the default payload
    pub fn scripted(responses: impl IntoIterator<Item = Scripted>) -> Self {
        let executor = Self::new();
        executor.script.lock().extend(responses);
        executor
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ExecutorRequest> {
        self.requests.lock().clone()
    }

    pub fn default_payload() -> serde_json::Value {
        json!({
            "items": [{ "year": 2024, "hospital": "Seoul Clinic" }],
            "summary": { "count": 1 }
        })
    }
}

#[async_trait]
impl FetchExecutor for MockExecutor {
    async fn execute(
        &self,
        request: &ExecutorRequest,
        _session: &SessionArtifacts,
    ) -> Result<serde_json::Value, UpstreamFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match next {
            None => Ok(Self::default_payload()),
            Some(Scripted::Success(payload)) => Ok(payload),
            Some(Scripted::Failure(failure)) => Err(failure),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Self::default_payload())
            }
            Some(Scripted::Panic) => panic!("scripted executor panic"),
        }
    }
}
