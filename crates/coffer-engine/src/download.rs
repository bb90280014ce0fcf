//! Streaming a single file's content back down through its pipeline,
//! reading only small ranges of the remote object at a time.
//!
//! This deliberately avoids `get_object`'s whole-body fetch: a restore of a
//! multi-gigabyte object must not require holding it entirely in memory, so
//! every step below reads just the bytes it immediately needs via
//! `ranged_download`.

use std::path::Path;

use coffer_pipeline::PipelineDecoder;
use coffer_store::ObjectStore;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::context::EngineContext;
use crate::error::EngineError;

/// Downloads `remote_key`'s `version`, decodes it through the pipeline
/// described by its own header, and writes the plaintext to `local_path`
/// (creating parent directories as needed).
pub async fn download_file<S: ObjectStore>(
    ctx: &EngineContext<S>,
    remote_key: &str,
    version: &str,
    local_path: &Path,
) -> Result<(), EngineError> {
    let meta = ctx.store.head_object(remote_key, Some(version)).await?;
    let total = meta.content_length;

    let len_prefix = ctx.store.ranged_download(remote_key, version, 0..4).await?;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&len_prefix);
    let header_json_len = u32::from_be_bytes(len_bytes) as u64;
    let header_end = 4 + header_json_len;

    let header_bytes = ctx.store.ranged_download(remote_key, version, 0..header_end).await?;
    let (mut decoder, _consumed) = PipelineDecoder::from_header(&header_bytes, ctx.encrypt_key())?;

    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut out = tokio::fs::File::create(local_path).await?;

    let mut offset = header_end;
    while offset < total {
        let chunk_len_bytes = ctx.store.ranged_download(remote_key, version, offset..offset + 4).await?;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&chunk_len_bytes);
        let chunk_len = u64::from(u32::from_be_bytes(len_bytes));

        let chunk_end = offset + 4 + chunk_len;
        let framed = ctx.store.ranged_download(remote_key, version, offset..chunk_end).await?;
        let is_last = chunk_end >= total;
        let (plaintext, consumed) = decoder.decode_chunk(&framed, is_last)?;
        out.write_all(&plaintext).await?;
        offset += consumed as u64;
    }

    out.flush().await?;
    debug!(remote_key, version, %total, "downloaded file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::upload::upload_file;

    async fn context(config: Config) -> EngineContext<coffer_store::LocalStore> {
        let store = coffer_store::LocalStore::new(&config.base_path.join(".store")).await.unwrap();
        EngineContext::new(store, config).await.unwrap()
    }

    #[tokio::test]
    async fn round_trips_small_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = context(config).await;

        let outcome = upload_file(&ctx, "/a.txt").await.unwrap();
        let restore_path = dir.path().join("restored/a.txt");
        download_file(&ctx, &outcome.remote_key, &outcome.version_id, &restore_path)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&restore_path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn round_trips_multi_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"y".repeat(37);
        std::fs::write(dir.path().join("big.bin"), &content).unwrap();
        let config = Config::builder(dir.path()).chunk_size(10).build();
        let ctx = context(config).await;

        let outcome = upload_file(&ctx, "/big.bin").await.unwrap();
        let restore_path = dir.path().join("restored/big.bin");
        download_file(&ctx, &outcome.remote_key, &outcome.version_id, &restore_path)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&restore_path).unwrap(), content);
    }

    #[tokio::test]
    async fn round_trips_encrypted_compressed_file() {
        use crate::config::PipelineRule;
        use coffer_pipeline::TransformKind;

        let dir = tempfile::tempdir().unwrap();
        let content = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        std::fs::write(dir.path().join("secret.log"), &content).unwrap();
        let config = Config::builder(dir.path())
            .file_pipeline(vec![PipelineRule::new(
                "*",
                vec![TransformKind::Compress, TransformKind::Encrypt],
            )])
            .crypt_password("correct horse battery staple")
            .chunk_size(coffer_pipeline::MIN_CHUNK_SIZE)
            .build();
        let ctx = context(config).await;

        let outcome = upload_file(&ctx, "/secret.log").await.unwrap();
        let restore_path = dir.path().join("restored/secret.log");
        download_file(&ctx, &outcome.remote_key, &outcome.version_id, &restore_path)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&restore_path).unwrap(), content);
    }
}
