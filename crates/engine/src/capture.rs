//! Capture orchestration: one target under one profile, inside a bounded pool

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::{CaptureDriver, NavigateOptions};
use crate::error::{RegressionError, RegressionResult};
use crate::profile::ViewportProfile;
use crate::record::{CaptureRecord, RawImage};
use crate::store::{ImageStore, Role};
use crate::target::Target;

/// Runs captures through a driver, holding at most `limit` contexts open.
pub struct Capturer<D: CaptureDriver> {
    driver: Arc<D>,
    store: ImageStore,
    navigate: NavigateOptions,
    grace: Duration,
    permits: Arc<Semaphore>,
}

impl<D: CaptureDriver> Clone for Capturer<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            store: self.store.clone(),
            navigate: self.navigate,
            grace: self.grace,
            permits: self.permits.clone(),
        }
    }
}

impl<D: CaptureDriver> Capturer<D> {
    pub fn new(
        driver: Arc<D>,
        store: ImageStore,
        navigate: NavigateOptions,
        grace: Duration,
        limit: usize,
    ) -> Self {
        Self {
            driver,
            store,
            navigate,
            grace,
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Capture `target` under `profile` and persist it at its store path.
    ///
    /// The browsing context is opened only once a pool slot is free and is
    /// always closed before the slot is released. Cancellation aborts the
    /// in-flight step and returns `Cancelled`.
    pub async fn capture(
        &self,
        target: &Target,
        profile: &ViewportProfile,
        role: Role,
        cancel: &CancellationToken,
    ) -> RegressionResult<CaptureRecord> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RegressionError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| RegressionError::Cancelled)?,
        };

        let mut context = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RegressionError::Cancelled),
            context = self.driver.open(profile) => context?,
        };

        let shot = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RegressionError::Cancelled),
            shot = self.navigate_and_capture(&mut context, target, profile) => shot,
        };

        match timeout(self.grace, self.driver.close(context)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(profile = %profile.name, target = %target.identifier, "Closing context failed: {}", e),
            Err(_) => warn!(profile = %profile.name, target = %target.identifier, "Context did not close within {:?}", self.grace),
        }
        drop(permit);

        let raw = shot?;
        let path = self.store.resolve_path(role, &profile.name, &target.identifier);

        let (profile_name, identifier, decode_path) = (profile.name.clone(), target.identifier.clone(), path.clone());
        let (record, raw) = tokio::task::spawn_blocking(move || {
            let record = CaptureRecord::decode(role, &profile_name, &identifier, &decode_path, &raw.bytes);
            (record, raw)
        })
        .await
        .map_err(|e| RegressionError::Task(e.to_string()))?;
        let record = record?;

        ImageStore::write_image(&path, &raw.bytes).await?;
        debug!(
            profile = %profile.name,
            target = %target.identifier,
            "Captured {} {} into {}",
            role.as_str(),
            record.dimensions(),
            path.display()
        );
        Ok(record)
    }

    async fn navigate_and_capture(
        &self,
        context: &mut D::Context,
        target: &Target,
        profile: &ViewportProfile,
    ) -> RegressionResult<RawImage> {
        let limit = self.navigate.timeout + self.grace;
        let timed_out = || RegressionError::CaptureTimeout {
            url: target.url.clone(),
            timeout_ms: self.navigate.timeout.as_millis() as u64,
        };

        let outcome = timeout(limit, self.driver.navigate(context, &target.url, &self.navigate))
            .await
            .map_err(|_| timed_out())??;
        if outcome.is_http_error() {
            warn!(
                profile = %profile.name,
                target = %target.identifier,
                "{} answered HTTP {}, capturing anyway",
                target.url,
                outcome.status.unwrap_or_default()
            );
        }

        timeout(limit, self.driver.capture_full_page(context))
            .await
            .map_err(|_| timed_out())?
    }
}
