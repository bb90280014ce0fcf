//! The [`DiffChainReader`] implementation that lets `coffer-manifest`'s
//! reconciliation algorithm decode diffs without knowing anything about the
//! pipeline codec.

use coffer_manifest::{DiffChainReader, DiffEntry, ManifestError};
use coffer_pipeline::PipelineDecoder;
use coffer_store::{ObjectStore, ObjectVersion};

use crate::context::EngineContext;

/// Reads one published diff object and decodes it through the meta
/// pipeline back into its entries.
pub struct MetaDiffReader<'a, S: ObjectStore> {
    ctx: &'a EngineContext<S>,
    key: String,
}

impl<'a, S: ObjectStore> MetaDiffReader<'a, S> {
    #[must_use]
    pub fn new(ctx: &'a EngineContext<S>, key: impl Into<String>) -> Self {
        Self { ctx, key: key.into() }
    }
}

impl<S: ObjectStore> DiffChainReader for MetaDiffReader<'_, S> {
    async fn read_diff(&self, version: &ObjectVersion) -> Result<Vec<DiffEntry>, ManifestError> {
        let object = self
            .ctx
            .store
            .get_object(&self.key, Some(&version.version_id))
            .await?;
        let (mut decoder, consumed) = PipelineDecoder::from_header(&object.body, self.ctx.encrypt_key())?;
        let (plaintext, _) = decoder.decode_chunk(&object.body[consumed..], true)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
