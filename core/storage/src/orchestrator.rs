//! Copy and move between providers.
//!
//! Each call runs exactly one transfer path: the source's native
//! (intra-provider) operation when it reports the capability and does not
//! decline, otherwise a streamed download from the source into an upload on
//! the destination. Only [`Error::Unsupported`] from the native attempt
//! triggers the fallback; every other error is returned unchanged. Nothing
//! is retried here.

use tracing::{debug, info, warn};

use conduit_common::{Result, TransferOptions};

use crate::provider::{Metadata, Provider};

/// Copy one object from `source` to `dest`.
///
/// # Errors
/// - Any non-`Unsupported` error from `intra_copy`
/// - Any error from the fallback `download` or `upload`
pub async fn copy<S>(
    source: &S,
    dest: &dyn Provider,
    source_options: &TransferOptions,
    dest_options: &TransferOptions,
) -> Result<Metadata>
where
    S: Provider + ?Sized,
{
    if source.can_intra_copy(dest) {
        debug!("Attempting native copy {} -> {}", source.name(), dest.name());
        match source.intra_copy(dest, source_options, dest_options).await {
            Ok(metadata) => {
                info!("Native copy {} -> {} complete", source.name(), dest.name());
                return Ok(metadata);
            }
            Err(e) if e.is_unsupported() => {
                debug!("Native copy declined, streaming instead: {}", e);
            }
            Err(e) => return Err(e),
        }
    }

    stream_copy(source, dest, source_options, dest_options).await
}

/// Move one object from `source` to `dest`.
///
/// Without a native move this is a full [`copy`] followed by a delete of the
/// source. The delete only runs after the copy succeeded. If it fails, the
/// error is returned while the destination already holds the object.
pub async fn move_object<S>(
    source: &S,
    dest: &dyn Provider,
    source_options: &TransferOptions,
    dest_options: &TransferOptions,
) -> Result<Metadata>
where
    S: Provider + ?Sized,
{
    if source.can_intra_move(dest) {
        debug!("Attempting native move {} -> {}", source.name(), dest.name());
        match source.intra_move(dest, source_options, dest_options).await {
            Ok(metadata) => {
                info!("Native move {} -> {} complete", source.name(), dest.name());
                return Ok(metadata);
            }
            Err(e) if e.is_unsupported() => {
                debug!("Native move declined, copying instead: {}", e);
            }
            Err(e) => return Err(e),
        }
    }

    let metadata = copy(source, dest, source_options, dest_options).await?;

    if let Err(e) = source.delete(source_options).await {
        warn!(
            "Copied to {} but failed to delete source on {}: {}",
            dest.name(),
            source.name(),
            e
        );
        return Err(e);
    }

    info!("Moved {} -> {}", source.name(), dest.name());
    Ok(metadata)
}

async fn stream_copy<S>(
    source: &S,
    dest: &dyn Provider,
    source_options: &TransferOptions,
    dest_options: &TransferOptions,
) -> Result<Metadata>
where
    S: Provider + ?Sized,
{
    let obj = source.download(source_options).await?;
    debug!(
        "Streaming {} ({:?} bytes) {} -> {}",
        obj.content_type,
        obj.size,
        source.name(),
        dest.name()
    );
    dest.upload(obj, dest_options).await
}
