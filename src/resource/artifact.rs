//! Artifact upload into the artifact bucket
//!
//! The archive's blake3 digest travels as object metadata, so an unchanged
//! artifact is never uploaded twice. The digest is also this step's
//! identifier: the function records it as the revision it runs.

use anyhow::Result;
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots};

use super::{ProviderHandle, removed_or_absent, short, slots, staged};
use crate::stage::Artifact;

#[derive(Debug)]
pub struct ArtifactUpload {
    provider: ProviderHandle,
    bucket: String,
    key: String,
    artifact: Option<Artifact>,
    purge: bool,
}

impl ArtifactUpload {
    /// Upload step of a create plan
    pub fn new(provider: ProviderHandle, bucket: &str, key: &str, artifact: Artifact) -> Self {
        Self {
            provider,
            bucket: bucket.to_string(),
            key: key.to_string(),
            artifact: Some(artifact),
            purge: false,
        }
    }

    /// Counterpart in a delete plan; only removes anything when `purge` is set
    pub fn retained(provider: ProviderHandle, bucket: &str, key: &str, purge: bool) -> Self {
        Self {
            provider,
            bucket: bucket.to_string(),
            key: key.to_string(),
            artifact: None,
            purge,
        }
    }

    fn remote_digest(&self) -> Result<Option<Option<String>>> {
        if !self.provider.bucket_exists(&self.bucket)? {
            return Ok(None);
        }
        Ok(self
            .provider
            .head_object(&self.bucket, &self.key)?
            .map(|o| o.digest))
    }

    fn delete_bucket(&self) -> Result<ApplyResult> {
        match self.provider.delete_bucket(&self.bucket) {
            Err(e) if e.category() == cloudkit::ErrorCategory::Conflict => {
                log::warn!("Keeping bucket {}: {e}", self.bucket);
                Ok(ApplyResult::NoChange)
            }
            other => removed_or_absent(other, "artifact bucket"),
        }
    }
}

impl Resource for ArtifactUpload {
    fn id(&self) -> String {
        "artifact".to_string()
    }

    fn description(&self) -> String {
        format!("Artifact s3://{}/{}", self.bucket, self.key)
    }

    fn resource_type(&self) -> &'static str {
        "artifact_object"
    }

    fn provides(&self) -> Option<&'static str> {
        Some(slots::ARTIFACT)
    }

    fn current_state(&self, _slots: &Slots) -> Result<ResourceState> {
        let Some(remote) = self.remote_digest()? else {
            return Ok(ResourceState::Absent);
        };
        let remote = remote.unwrap_or_default();

        Ok(match &self.artifact {
            Some(local) if local.digest != remote => ResourceState::Modified {
                from: short(&remote).to_string(),
                to: short(&local.digest).to_string(),
            },
            _ => ResourceState::Present {
                details: Some(short(&remote).to_string()),
            },
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self.remote_digest()?.flatten())
    }

    fn upsert(&self, _ctx: &mut ApplyContext) -> Result<Outcome> {
        let artifact = staged(&self.artifact, "artifact")?;

        if !self.provider.bucket_exists(&self.bucket)? {
            log::info!("Creating artifact bucket {}", self.bucket);
            self.provider.create_bucket(&self.bucket)?;
        }

        let result = match self.provider.head_object(&self.bucket, &self.key)? {
            Some(object) if object.digest.as_deref() == Some(artifact.digest.as_str()) => {
                log::debug!("Artifact {} unchanged", short(&artifact.digest));
                return Ok(Outcome::new(ApplyResult::NoChange).with_identifier(&artifact.digest));
            }
            Some(_) => ApplyResult::Modified,
            None => ApplyResult::Created,
        };

        self.provider
            .put_object(&self.bucket, &self.key, &artifact.path, &artifact.digest)?;
        Ok(Outcome::new(result).with_identifier(&artifact.digest))
    }

    fn retains_on_delete(&self) -> bool {
        !self.purge
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if !self.purge {
            return Ok(ApplyResult::Skipped {
                reason: "artifact retained".to_string(),
            });
        }
        if !self.provider.bucket_exists(&self.bucket)? {
            return Ok(ApplyResult::NoChange);
        }

        let object = removed_or_absent(
            self.provider.delete_object(&self.bucket, &self.key),
            "artifact object",
        )?;
        let bucket = self.delete_bucket()?;

        Ok(if object.is_change() || bucket.is_change() {
            ApplyResult::Removed
        } else {
            ApplyResult::NoChange
        })
    }
}
