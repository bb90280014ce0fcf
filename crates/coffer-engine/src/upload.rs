//! Streaming a single file's content up through its configured pipeline.

use bytes::Bytes;
use coffer_pipeline::PipelineEncoder;
use coffer_store::{MultipartUpload, ObjectStore, PutResult};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::naming::remote_key_for;

/// The outcome of uploading one file: the remote key it landed at and the
/// version the store assigned it.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub remote_key: String,
    pub version_id: String,
}

/// Uploads the local file at `logical_path` (a manifest-style rooted path,
/// e.g. `/a/b.txt`) through the pipeline selected by `file_pipeline`.
///
/// Reads and transforms the file in `config.chunk_size`-sized chunks so
/// memory use stays bounded regardless of file size. If any read or upload
/// step fails partway through, the in-progress multipart upload is aborted
/// before the error is returned — no partial, undecodable object is left
/// behind.
pub async fn upload_file<S: ObjectStore>(
    ctx: &EngineContext<S>,
    logical_path: &str,
) -> Result<UploadOutcome, EngineError> {
    let transforms = ctx
        .config
        .pipeline_for(logical_path)
        .ok_or_else(|| EngineError::NoPipelineMatch(logical_path.to_string()))?
        .to_vec();

    let encrypt = if transforms.contains(&coffer_pipeline::TransformKind::Encrypt) {
        match (ctx.encrypt_params(), ctx.encrypt_key()) {
            (Some(params), Some(key)) => Some((params.clone(), key)),
            _ => {
                return Err(EngineError::InvalidPipelineHeader(
                    "encrypt transform configured but no key material is bound to this context".to_string(),
                ));
            }
        }
    } else {
        None
    };

    let remote_key = remote_key_for(&ctx.config, logical_path, &transforms);
    let local_path = ctx.config.base_path.join(logical_path.trim_start_matches('/'));

    let mut encoder = PipelineEncoder::new(&transforms, ctx.config.chunk_size, encrypt)?;
    let mut file = tokio::fs::File::open(&local_path).await?;
    let mut upload = ctx.store.begin_multipart_upload(&remote_key).await?;

    match stream_upload(&mut file, &mut encoder, &mut upload, ctx.config.chunk_size).await {
        Ok(()) => {}
        Err(e) => {
            warn!(logical_path, %remote_key, error = %e, "aborting upload after mid-stream failure");
            upload.abort().await?;
            return Err(e);
        }
    }

    let PutResult { version_id } = upload.finish().await?;
    debug!(logical_path, %remote_key, %version_id, "uploaded file");
    Ok(UploadOutcome {
        remote_key,
        version_id,
    })
}

async fn stream_upload<U: MultipartUpload>(
    file: &mut tokio::fs::File,
    encoder: &mut PipelineEncoder,
    upload: &mut U,
    chunk_size: u64,
) -> Result<(), EngineError> {
    upload.upload_part(Bytes::from(encoder.header_bytes()?)).await?;

    let chunk_size = chunk_size as usize;
    let mut current = read_chunk(file, chunk_size).await?;

    loop {
        let next = read_chunk(file, chunk_size).await?;
        let is_last = next.is_empty();
        let framed = encoder.encode_chunk(&current, is_last)?;
        upload.upload_part(Bytes::from(framed)).await?;
        if is_last {
            break;
        }
        current = next;
    }

    Ok(())
}

async fn read_chunk(file: &mut tokio::fs::File, chunk_size: usize) -> Result<Vec<u8>, EngineError> {
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let read = file.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buf.truncate(filled);
    Ok(buf)
}
