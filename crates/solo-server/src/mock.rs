use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use solo_core::{DependencyError, Payload};

use crate::dependency::Dependency;

/// How a [`MockDependency`] responds.
pub enum MockBehavior {
    /// Complete after a fixed delay.
    Delay(Duration),
    /// Parse the message text as a millisecond delay (non-numeric → no delay).
    DelayFromPayload,
    /// Fail with a network error when the message text equals this value.
    FailOn(String),
}

/// Deterministic dependency for tests without network access.
pub struct MockDependency {
    behavior: MockBehavior,
    call_count: AtomicUsize,
}

impl MockDependency {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn instant() -> Self {
        Self::new(MockBehavior::Delay(Duration::ZERO))
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dependency for MockDependency {
    async fn call(&self, payload: &Payload) -> Result<(), DependencyError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        match &self.behavior {
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            MockBehavior::DelayFromPayload => {
                let millis = payload.content().trim().parse::<u64>().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(())
            }
            MockBehavior::FailOn(text) if payload.content() == text.as_str() => {
                Err(DependencyError::Network("mock failure".into()))
            }
            MockBehavior::FailOn(_) => Ok(()),
        }
    }
}
