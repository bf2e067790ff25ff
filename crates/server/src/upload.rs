//! Bundle upload plumbing
//!
//! The object store is an external collaborator reached through its presign
//! service: we mint a presigned PUT for the client's tarball and presigned
//! GETs for runner machines. The upload command we hand back tars the
//! project with a fixed exclude list and records both the bundle hash and
//! the lockfile hash the image cache keys on.

use serde::Deserialize;

use voiceci_config::Settings;

use crate::ServerError;

/// Paths never shipped in a bundle.
const TAR_EXCLUDES: [&str; 8] = [
    "node_modules",
    ".git",
    "dist",
    "build",
    ".env*",
    "*.log",
    "coverage",
    "__pycache__",
];

#[derive(Deserialize)]
struct PresignResponse {
    url: String,
}

/// Mint a presigned PUT URL for a bundle key.
pub async fn presign_put(settings: &Settings, bundle_key: &str) -> Result<String, ServerError> {
    let endpoint = &settings.storage.presign_endpoint;
    if endpoint.is_empty() {
        return Err(ServerError::ConfigMissing(
            "storage.presign_endpoint is not set".into(),
        ));
    }

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/presign", endpoint))
        .json(&serde_json::json!({
            "bucket": settings.storage.bucket,
            "key": bundle_key,
            "method": "PUT",
            "expires_secs": 900,
        }))
        .send()
        .await
        .map_err(|e| ServerError::Internal(format!("presign request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServerError::Internal(format!(
            "presign HTTP {}: {}",
            status, body
        )));
    }

    let presigned: PresignResponse = response
        .json()
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(presigned.url)
}

/// URL a runner machine fetches the bundle from. Machines carry store
/// credentials, so this is the direct object path rather than a presign.
pub fn download_url(settings: &Settings, bundle_key: &str) -> String {
    format!(
        "{}/object/{}/{}",
        settings.storage.presign_endpoint, settings.storage.bucket, bundle_key
    )
}

/// Shell command the client runs: tar with excludes, hash the tarball and
/// the lockfile, PUT to the presigned URL.
pub fn upload_command(project_root: &str, upload_url: &str) -> String {
    let excludes: String = TAR_EXCLUDES
        .iter()
        .map(|pattern| format!("--exclude='{}' ", pattern))
        .collect();

    format!(
        "cd {root} && \
         tar {excludes}-czf /tmp/voiceci-bundle.tar.gz . && \
         BUNDLE_HASH=$(sha256sum /tmp/voiceci-bundle.tar.gz | cut -d' ' -f1) && \
         LOCKFILE_HASH=$(cat package-lock.json pnpm-lock.yaml yarn.lock Cargo.lock uv.lock 2>/dev/null | sha256sum | cut -d' ' -f1) && \
         curl -sS -X PUT --upload-file /tmp/voiceci-bundle.tar.gz '{url}' && \
         echo \"bundle_hash=$BUNDLE_HASH lockfile_hash=$LOCKFILE_HASH\"",
        root = project_root,
        excludes = excludes,
        url = upload_url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_command_carries_excludes_and_hashes() {
        let command = upload_command(".", "https://store/presigned");
        for pattern in TAR_EXCLUDES {
            assert!(command.contains(pattern), "missing exclude {}", pattern);
        }
        assert!(command.contains("sha256sum"));
        assert!(command.contains("https://store/presigned"));
        assert!(command.contains("lockfile_hash="));
    }
}
