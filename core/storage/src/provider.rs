//! Storage provider trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;

use conduit_common::{Error, Result, TransferOptions};

use crate::orchestrator;
use crate::stream::StreamObject;

/// Metadata for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique identifier for the object (provider-specific).
    pub id: String,
    /// Name of the object.
    pub name: String,
    /// Size in bytes, if known.
    pub size: Option<u64>,
    /// MIME type of the stored content.
    pub content_type: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// ETag or revision ID.
    pub etag: Option<String>,
    /// Provider-specific metadata.
    pub provider_data: Option<serde_json::Value>,
}

/// Capability contract every storage backend implements.
///
/// `download`, `upload` and `delete` are required. Intra-provider
/// acceleration is optional: the capability predicates default to `false`
/// and the operations default to [`Error::Unsupported`]. An implementation
/// that reports a capability may still decline at execution time by
/// returning `Unsupported`; the orchestrator then falls back to streaming.
///
/// All options are opaque to the core and interpreted by the backend.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Get the provider name (e.g., "memory", "local", "http").
    fn name(&self) -> &str;

    /// Used by backends to recognize a peer of their own type.
    fn as_any(&self) -> &dyn Any;

    /// Fetch an object.
    ///
    /// # Preconditions
    /// - `options` carries the backend's addressing keys (usually `path`)
    ///
    /// # Postconditions
    /// - The returned stream must be consumed or dropped by the caller
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    /// - `PermissionDenied` if the backend refuses access
    /// - `Transfer` for any other backend failure
    async fn download(&self, options: &TransferOptions) -> Result<StreamObject>;

    /// Store an object.
    ///
    /// # Preconditions
    /// - `obj.content` has not been polled yet
    ///
    /// # Postconditions
    /// - `obj.content` is consumed to the end or the call fails
    /// - No partial object is left visible on failure
    /// - Returns metadata of the stored object
    ///
    /// # Errors
    /// - `Transfer` if the stream fails or its length differs from `obj.size`
    /// - `PermissionDenied` if the backend refuses the write
    async fn upload(&self, obj: StreamObject, options: &TransferOptions) -> Result<Metadata>;

    /// Remove an object.
    ///
    /// # Postconditions
    /// - The object no longer exists; deleting a missing object succeeds
    ///
    /// # Errors
    /// - `PermissionDenied` if the backend refuses the delete
    /// - `Transfer` for any other backend failure
    async fn delete(&self, options: &TransferOptions) -> Result<()>;

    /// Whether `intra_copy` to `other` is worth attempting.
    fn can_intra_copy(&self, _other: &dyn Provider) -> bool {
        false
    }

    /// Whether `intra_move` to `other` is worth attempting.
    fn can_intra_move(&self, _other: &dyn Provider) -> bool {
        false
    }

    /// Backend-native copy that avoids streaming bytes through this process.
    ///
    /// # Errors
    /// - `Unsupported` to decline; the caller then streams instead
    async fn intra_copy(
        &self,
        dest: &dyn Provider,
        _source_options: &TransferOptions,
        _dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        Err(Error::Unsupported(format!(
            "{} has no native copy to {}",
            self.name(),
            dest.name()
        )))
    }

    /// Backend-native move that avoids streaming bytes through this process.
    async fn intra_move(
        &self,
        dest: &dyn Provider,
        _source_options: &TransferOptions,
        _dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        Err(Error::Unsupported(format!(
            "{} has no native move to {}",
            self.name(),
            dest.name()
        )))
    }

    /// Copy an object from this provider to `dest`.
    ///
    /// Uses `intra_copy` when available and falls back to download+upload.
    ///
    /// # Postconditions
    /// - Exactly one transfer path completed; the source is untouched
    ///
    /// # Errors
    /// - Any error from `intra_copy` other than `Unsupported`
    /// - Any error from the fallback `download` or `upload`
    async fn copy_to(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        orchestrator::copy(self, dest, source_options, dest_options).await
    }

    /// Move an object from this provider to `dest`.
    ///
    /// # Postconditions
    /// - On success the object exists only at the destination
    ///
    /// # Errors
    /// - Any error from the copy, in which case the source is untouched
    /// - The delete error if the copy succeeded but the source could not be
    ///   removed; the object then exists on both sides
    async fn move_to(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        orchestrator::move_object(self, dest, source_options, dest_options).await
    }
}

/// A provider that can be built from a typed configuration.
///
/// The configuration struct is the backend's option schema: it should use
/// `#[serde(deny_unknown_fields)]` so that undeclared keys are rejected, and
/// leave required fields without defaults so that missing keys are rejected.
pub trait Backend: Provider + Sized {
    /// Construction options.
    type Config: serde::de::DeserializeOwned;

    /// Build the provider from validated options.
    fn from_config(config: Self::Config) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;

    #[test]
    fn test_metadata_serialization() {
        let metadata = Metadata {
            id: "test-id".to_string(),
            name: "test-file.txt".to_string(),
            size: Some(1024),
            content_type: "text/plain".to_string(),
            modified: Utc::now(),
            etag: Some("abc123".to_string()),
            provider_data: None,
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: Metadata = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, metadata.id);
        assert_eq!(deserialized.name, metadata.name);
        assert_eq!(deserialized.size, metadata.size);
        assert_eq!(deserialized.content_type, metadata.content_type);
    }

    /// Implements only the required operations.
    struct Bare;

    #[async_trait]
    impl Provider for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        async fn download(&self, _options: &TransferOptions) -> Result<StreamObject> {
            Err(Error::NotFound("nothing here".to_string()))
        }

        async fn upload(&self, obj: StreamObject, _options: &TransferOptions) -> Result<Metadata> {
            obj.collect().await?;
            Err(Error::PermissionDenied("read-only".to_string()))
        }

        async fn delete(&self, _options: &TransferOptions) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_acceleration_defaults_to_unsupported() {
        let bare = Bare;
        let other = MemoryProvider::new();
        let opts = TransferOptions::with_path("/x");

        assert!(!bare.can_intra_copy(&other));
        assert!(!bare.can_intra_move(&other));
        assert!(bare.intra_copy(&other, &opts, &opts).await.unwrap_err().is_unsupported());
        assert!(bare.intra_move(&other, &opts, &opts).await.unwrap_err().is_unsupported());
    }
}
