//! Dependency-image resolution
//!
//! Bundled runs boot faster from an image that already holds their
//! dependency tree. The cache is keyed by lockfile hash; the conditional
//! insert in the store yields at-most-one builder per hash across the
//! whole worker fleet, with everyone else polling the row.

use std::collections::HashMap;
use std::time::Duration;

use voiceci_config::MachineConfig;
use voiceci_persistence::{DepImageStore, ImageStatus};

use crate::api::{ControlPlaneClient, ProvisionRequest};
use crate::{size_for_test_count, MachineError};

/// Poll cadence while another worker's builder runs.
const BUILD_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// How long to wait on someone else's in-flight build.
const BUILD_POLL_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ImageResolver {
    images: DepImageStore,
    control: ControlPlaneClient,
    config: MachineConfig,
    /// Where the builder posts its completion callback.
    builder_callback_url: String,
    callback_secret: String,
}

impl ImageResolver {
    pub fn new(
        images: DepImageStore,
        control: ControlPlaneClient,
        config: MachineConfig,
        builder_callback_url: String,
        callback_secret: String,
    ) -> Self {
        Self {
            images,
            control,
            config,
            builder_callback_url,
            callback_secret,
        }
    }

    /// Resolve the boot image for a bundled run. Always returns *some*
    /// image; cache trouble degrades to the base image, never to failure.
    pub async fn resolve(
        &self,
        lockfile_hash: Option<&str>,
        bundle_url: Option<&str>,
    ) -> Result<String, MachineError> {
        let (Some(hash), Some(bundle_url)) = (lockfile_hash, bundle_url) else {
            return Ok(self.config.base_image.clone());
        };

        match self.images.get(hash).await? {
            Some(record) if record.status == ImageStatus::Ready => {
                if record.base_image_ref == self.config.base_image {
                    tracing::debug!(hash, image = %record.image_ref, "dependency image cache hit");
                    return Ok(record.image_ref);
                }
                // Base image moved; the cached layer stack is stale.
                tracing::info!(hash, "base image changed, rebuilding dependency image");
                self.images.delete(hash).await?;
            }
            Some(record) if record.status == ImageStatus::Building => {
                return Ok(self.poll_for_ready(hash).await);
            }
            Some(_) => {
                // Failed previously; don't retry on the run path.
                return Ok(self.config.base_image.clone());
            }
            None => {}
        }

        let image_ref = derived_image_ref(&self.config.base_image, hash);
        let claimed = self
            .images
            .try_claim_build(hash, &image_ref, &self.config.base_image)
            .await?;

        if !claimed {
            // Another worker won the race; wait on its build.
            return Ok(self.poll_for_ready(hash).await);
        }

        match self.run_builder(hash, bundle_url, &image_ref).await {
            Ok(()) => Ok(self.poll_for_ready(hash).await),
            Err(e) => {
                tracing::warn!(hash, "builder launch failed: {}", e);
                self.images.mark_failed(hash, &e.to_string()).await?;
                Ok(self.config.base_image.clone())
            }
        }
    }

    /// Wait for someone's build to finish; base image on failure/timeout.
    async fn poll_for_ready(&self, hash: &str) -> String {
        let deadline = tokio::time::Instant::now() + BUILD_POLL_TIMEOUT;

        while tokio::time::Instant::now() < deadline {
            match self.images.get(hash).await {
                Ok(Some(record)) => match record.status {
                    ImageStatus::Ready => return record.image_ref,
                    ImageStatus::Failed => return self.config.base_image.clone(),
                    ImageStatus::Building => {}
                },
                Ok(None) => return self.config.base_image.clone(),
                Err(e) => {
                    tracing::warn!(hash, "image poll failed: {}", e);
                    return self.config.base_image.clone();
                }
            }
            tokio::time::sleep(BUILD_POLL_INTERVAL).await;
        }

        tracing::warn!(hash, "dependency image build did not finish in time");
        self.config.base_image.clone()
    }

    /// Boot a builder VM that installs the bundle's dependencies, pushes the
    /// image, and posts completion to the builder callback.
    async fn run_builder(
        &self,
        hash: &str,
        bundle_url: &str,
        image_ref: &str,
    ) -> Result<(), MachineError> {
        let mut env = HashMap::new();
        env.insert("VOICECI_BUILD_MODE".into(), "dependency-image".into());
        env.insert("VOICECI_BUNDLE_URL".into(), bundle_url.to_string());
        env.insert("VOICECI_LOCKFILE_HASH".into(), hash.to_string());
        env.insert("VOICECI_IMAGE_REF".into(), image_ref.to_string());
        env.insert(
            "VOICECI_CALLBACK_URL".into(),
            self.builder_callback_url.clone(),
        );
        env.insert("VOICECI_CALLBACK_SECRET".into(), self.callback_secret.clone());

        let request = ProvisionRequest {
            name: format!("voiceci-builder-{}", &hash[..hash.len().min(12)]),
            image: self.config.base_image.clone(),
            size: size_for_test_count(1),
            env,
        };
        let machine = self.control.provision(&request).await?;
        self.images.set_builder_machine(hash, &machine.id).await?;

        // The builder reports through the callback sink; our wait is just a
        // babysitter that reclaims the VM.
        let control = self.control.clone();
        let images = self.images.clone();
        let hash = hash.to_string();
        let timeout = Duration::from_secs(self.config.builder_timeout_secs);
        tokio::spawn(async move {
            match control.wait_for_exit(&machine.id, timeout).await {
                Ok(_) => {}
                Err(MachineError::WaitTimeout(secs)) => {
                    tracing::warn!(hash = %hash, "builder timed out after {}s", secs);
                    let _ = images.mark_failed(&hash, "builder timed out").await;
                    let _ = control.destroy(&machine.id).await;
                }
                Err(e) => {
                    tracing::warn!(hash = %hash, "builder wait failed: {}", e);
                    let _ = images.mark_failed(&hash, &e.to_string()).await;
                    let _ = control.destroy(&machine.id).await;
                }
            }
        });

        Ok(())
    }
}

/// Cache image ref: same registry as the base image, tagged by hash.
fn derived_image_ref(base_image: &str, lockfile_hash: &str) -> String {
    let tag = &lockfile_hash[..lockfile_hash.len().min(12)];
    match base_image.rsplit_once('/') {
        Some((registry, _)) => format!("{}/dep-cache:{}", registry, tag),
        None => format!("dep-cache:{}", tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ref_reuses_registry() {
        assert_eq!(
            derived_image_ref(
                "registry.voiceci.dev/runner-base:latest",
                "abcdef0123456789"
            ),
            "registry.voiceci.dev/dep-cache:abcdef012345"
        );
        assert_eq!(derived_image_ref("base:latest", "xy"), "dep-cache:xy");
    }
}
