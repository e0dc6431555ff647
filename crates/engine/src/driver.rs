//! Browser capture driver seam

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegressionResult;
use crate::profile::ViewportProfile;
use crate::record::RawImage;

/// Page state to wait for before capturing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadySignal {
    /// DOM parsed; does not wait for images or the load event
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl ReadySignal {
    /// Playwright `waitUntil` value
    pub fn as_wait_until(&self) -> &'static str {
        match self {
            ReadySignal::DomContentLoaded => "domcontentloaded",
            ReadySignal::Load => "load",
            ReadySignal::NetworkIdle => "networkidle",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NavigateOptions {
    pub timeout: Duration,
    pub ready_signal: ReadySignal,
}

/// Result of a navigation that produced a page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationOutcome {
    /// HTTP status of the main document, when known
    pub status: Option<u16>,
}

impl NavigationOutcome {
    pub fn is_http_error(&self) -> bool {
        self.status.map(|s| s >= 400).unwrap_or(false)
    }
}

/// Drives one isolated browsing context per capture task.
///
/// Contexts are owned by the task that opened them and never shared, so
/// concurrent tasks never see each other's page state.
#[async_trait::async_trait]
pub trait CaptureDriver: Send + Sync + 'static {
    type Context: Send + 'static;

    /// Open a fresh browsing context with the profile applied
    async fn open(&self, profile: &ViewportProfile) -> RegressionResult<Self::Context>;

    /// Navigate and wait for the ready signal.
    ///
    /// HTTP error statuses are not errors; only failures to produce a page are.
    async fn navigate(
        &self,
        context: &mut Self::Context,
        url: &str,
        options: &NavigateOptions,
    ) -> RegressionResult<NavigationOutcome>;

    /// Capture the full scrollable page as an encoded image
    async fn capture_full_page(&self, context: &mut Self::Context) -> RegressionResult<RawImage>;

    async fn close(&self, context: Self::Context) -> RegressionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_signal_wait_until() {
        assert_eq!(ReadySignal::default().as_wait_until(), "domcontentloaded");
        assert_eq!(ReadySignal::NetworkIdle.as_wait_until(), "networkidle");
    }

    #[test]
    fn test_http_error_status() {
        assert!(NavigationOutcome { status: Some(404) }.is_http_error());
        assert!(!NavigationOutcome { status: Some(200) }.is_http_error());
        assert!(!NavigationOutcome::default().is_http_error());
    }
}
