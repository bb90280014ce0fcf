//! The explicit, non-global handle threaded through commit, restore, and
//! garbage-collection operations.
//!
//! The reference implementation this crate's algorithms are drawn from
//! keeps the bound meta-pipeline format and the process's crypto key
//! material as module-level globals (`meta_pl_format`, `pl_in`, `pl_out`
//! in its `core.py`), initialised once per run by an `init()` call. This
//! crate re-architects that as an explicit [`EngineContext`] constructed
//! once per commit/restore/GC invocation and passed by reference, so
//! nothing here is mutable process-wide state.

use bytes::Bytes;
use coffer_crypto::{EncryptParams, KEY_LEN, generate_salt};
use coffer_pipeline::{PipelineDecoder, PipelineEncoder, TransformKind};
use coffer_store::{ObjectStore, PutResult};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::EngineError;

/// Bundles an object-store connection, the resolved configuration, and
/// (if any pipeline uses `encrypt`) the derived symmetric key and its
/// parameters, as loaded/bootstrapped once at the start of a run.
pub struct EngineContext<S: ObjectStore> {
    pub store: S,
    pub config: Config,
    encrypt: Option<(EncryptParams, [u8; KEY_LEN])>,
}

impl<S: ObjectStore> EngineContext<S> {
    /// Builds a context for `config` against `store`: verifies versioning
    /// is enabled, and — if any configured pipeline (meta or per-file)
    /// requests encryption — bootstraps the remote salt object (creating
    /// it on first use) and derives the symmetric key from
    /// `config.crypto.crypt_password`.
    pub async fn new(store: S, config: Config) -> Result<Self, EngineError> {
        store.verify_versioning().await?;

        let uses_encryption = config.meta_pipeline.contains(&TransformKind::Encrypt)
            || config
                .file_pipeline
                .iter()
                .any(|rule| rule.transforms.contains(&TransformKind::Encrypt));

        let encrypt = if uses_encryption {
            let password = config
                .crypto
                .crypt_password
                .clone()
                .ok_or(EngineError::InvalidPipelineHeader(
                    "encrypt transform configured but no crypt_password supplied".to_string(),
                ))?;
            let params = bootstrap_salt(&store, &config.crypto.salt_file).await?;
            let key = params.derive_key(&password)?;
            Some((params, key))
        } else {
            None
        };

        Ok(Self {
            store,
            config,
            encrypt,
        })
    }

    /// The derived key, if any pipeline in use requests encryption.
    #[must_use]
    pub fn encrypt_key(&self) -> Option<[u8; KEY_LEN]> {
        self.encrypt.as_ref().map(|(_, key)| *key)
    }

    /// The encryption parameters bound to this run, if any.
    #[must_use]
    pub fn encrypt_params(&self) -> Option<&EncryptParams> {
        self.encrypt.as_ref().map(|(params, _)| params)
    }

    fn meta_encrypt(&self) -> Option<(EncryptParams, [u8; KEY_LEN])> {
        if self.config.meta_pipeline.contains(&TransformKind::Encrypt) {
            self.encrypt.clone()
        } else {
            None
        }
    }

    /// Serialises `value` as JSON and writes it through the meta pipeline
    /// (`config.meta_pipeline`) to `key`, as a brand-new object version.
    pub async fn write_meta_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<PutResult, EngineError> {
        let plaintext = serde_json::to_vec(value)?;
        let mut encoder =
            PipelineEncoder::new(&self.config.meta_pipeline, self.config.chunk_size, self.meta_encrypt())?;
        let mut wire = encoder.header_bytes()?;
        wire.extend(encoder.encode_chunk(&plaintext, true)?);
        let result = self.store.put_object(key, Bytes::from(wire)).await?;
        debug!(key, version_id = %result.version_id, "wrote meta object");
        Ok(result)
    }

    /// Reads and decodes a meta object (a manifest diff, the GC-log, the
    /// garbage-object log) previously written by
    /// [`Self::write_meta_json`]. Returns `None` if the key (or the
    /// specific `version`) does not exist, matching the original's
    /// `ValueError -> None` contract rather than surfacing a not-found
    /// error to callers that treat absence as the expected case.
    pub async fn read_meta_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        version: Option<&str>,
    ) -> Result<Option<(T, coffer_store::ObjectMeta)>, EngineError> {
        let object = match self.store.get_object(key, version).await {
            Ok(object) => object,
            Err(coffer_store::StoreError::NoSuch { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (mut decoder, consumed) = PipelineDecoder::from_header(&object.body, self.encrypt_key())?;
        let (plaintext, _) = decoder.decode_chunk(&object.body[consumed..], true)?;
        let value = serde_json::from_slice(&plaintext)?;
        Ok(Some((value, object.meta)))
    }
}

/// Reads the remote salt object, bootstrapping it with a fresh random
/// salt on first use.
async fn bootstrap_salt<S: ObjectStore>(store: &S, salt_key: &str) -> Result<EncryptParams, EngineError> {
    match store.get_object(salt_key, None).await {
        Ok(object) => {
            let params: EncryptParams = serde_json::from_slice(&object.body)?;
            Ok(params)
        }
        Err(coffer_store::StoreError::NoSuch { .. }) => {
            info!(key = salt_key, "bootstrapping new KDF salt");
            let salt = generate_salt();
            let params = EncryptParams::interactive(&salt);
            let bytes = serde_json::to_vec(&params)?;
            store.put_object(salt_key, Bytes::from(bytes)).await?;
            Ok(params)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_store::LocalStore;

    #[tokio::test]
    async fn unencrypted_context_has_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = EngineContext::new(store, config).await.unwrap();
        assert!(ctx.encrypt_key().is_none());
    }

    #[tokio::test]
    async fn encrypted_context_bootstraps_salt_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let config = Config::builder(dir.path())
            .file_pipeline(vec![crate::config::PipelineRule::new(
                "*",
                vec![TransformKind::Encrypt],
            )])
            .crypt_password("hunter2")
            .build();
        let ctx = EngineContext::new(store, config.clone()).await.unwrap();
        assert!(ctx.encrypt_key().is_some());

        // A second context against the same store must derive the same key
        // (the salt was persisted, not regenerated).
        let store2 = LocalStore::new(dir.path()).await.unwrap();
        let ctx2 = EngineContext::new(store2, config).await.unwrap();
        assert_eq!(ctx.encrypt_key(), ctx2.encrypt_key());
    }

    #[tokio::test]
    async fn meta_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = EngineContext::new(store, config).await.unwrap();

        ctx.write_meta_json("some_key", &vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let (value, _meta): (Vec<String>, _) = ctx.read_meta_json("some_key", None).await.unwrap().unwrap();
        assert_eq!(value, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn missing_meta_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = EngineContext::new(store, config).await.unwrap();
        let result: Option<(Vec<String>, _)> = ctx.read_meta_json("never_written", None).await.unwrap();
        assert!(result.is_none());
    }
}
