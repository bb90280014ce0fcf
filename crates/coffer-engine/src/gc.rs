//! Garbage collection of object versions left behind by interrupted
//! uploads.
//!
//! Every file upload is only referenced from a manifest once its owning
//! diff has been published; a crash between a successful upload and the
//! diff that references it leaves an orphaned object version on the
//! remote. Two collection strategies are available: `simple` cross-checks
//! the breadcrumb log written just before uploads began against the
//! current manifest, and `full` cross-checks every object version in the
//! store against every object the full diff chain references. `simple` is
//! cheap and handles the overwhelmingly common case; `full` is a slow,
//! exhaustive audit for when the log itself is suspect.

use std::collections::{HashMap, HashSet};

use coffer_manifest::{DiffChainReader, ManifestCache, get_manifest};
use coffer_store::{ObjectStore, ObjectVersion};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::naming::remote_key_for;
use crate::reader::MetaDiffReader;

/// Which garbage-collection strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Cross-check the gc-log breadcrumb written before the last commit's
    /// uploads began.
    Simple,
    /// Cross-check every object version in the store against the full
    /// diff chain.
    Full,
}

/// One entry of the breadcrumb log written to `remote_gc_log_file` just
/// before a commit starts uploading: the set of logical paths it is about
/// to upload, so a crash mid-upload can be detected even though the diff
/// that would have referenced them was never published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcLogEntry {
    pub path: String,
}

/// Outcome of a collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcOutcome {
    /// Garbage object versions actually deleted.
    pub deleted: usize,
    /// Garbage object versions appended to the garbage-object log instead
    /// of being deleted, because this engine lacks delete permission.
    pub logged: usize,
}

/// Runs a collection pass. A no-op, returning an empty outcome, if the
/// engine is configured `read_only` — garbage collection is itself a
/// remote-mutating operation (at minimum, it always clears the gc-log at
/// the end).
pub async fn garbage_collect<S: ObjectStore>(
    ctx: &EngineContext<S>,
    mode: GcMode,
) -> Result<GcOutcome, EngineError> {
    if ctx.config.read_only {
        return Ok(GcOutcome::default());
    }

    let garbage = match mode {
        GcMode::Simple => verify_manifest_with_gc_log(ctx).await?,
        GcMode::Full => {
            let missing = verify_manifest_fully(ctx).await?;
            if !missing.is_empty() {
                return Err(EngineError::MissingObjects(missing.len()));
            }
            full_garbage_objects(ctx).await?
        }
    };

    let outcome = delete_garbage_objects(ctx, &garbage).await?;
    delete_all_versions(ctx, &ctx.config.remote_gc_log_file).await?;
    Ok(outcome)
}

/// `simple` mode: reads the gc-log, and for every path it names, checks
/// whether the latest remote version still matches what the manifest
/// expects. A mismatch (or an addition absent from the manifest entirely)
/// whose timestamp is at or after the gc-log's own means the upload
/// succeeded but the commit never got around to publishing the diff that
/// would have referenced it — that version is garbage.
async fn verify_manifest_with_gc_log<S: ObjectStore>(
    ctx: &EngineContext<S>,
) -> Result<Vec<(String, String)>, EngineError> {
    let Some((gc_log, gc_log_meta)) = ctx
        .read_meta_json::<Vec<GcLogEntry>>(&ctx.config.remote_gc_log_file, None)
        .await?
    else {
        return Ok(Vec::new());
    };

    let manifest = reconcile_manifest(ctx).await?;
    let manifest_index: HashMap<&str, &coffer_manifest::FileRecord> =
        manifest.files.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut garbage = Vec::new();
    for item in &gc_log {
        let transforms = ctx.config.pipeline_for(&item.path).unwrap_or(&[]);
        let remote_key = remote_key_for(&ctx.config, &item.path, transforms);
        let versions = ctx.store.list_versions(&remote_key).await?;
        let latest = versions.last();

        match (manifest_index.get(item.path.as_str()), latest) {
            (Some(record), _) if record.empty => {}
            (Some(_), None) => {}
            (Some(record), Some(latest))
                if record.version_id.as_deref() != Some(latest.version_id.as_str())
                    && latest.last_modified >= gc_log_meta.last_modified =>
            {
                garbage.push((remote_key, latest.version_id.clone()));
            }
            (Some(_), Some(_)) => {}
            (None, None) => {}
            (None, Some(latest)) if latest.last_modified >= gc_log_meta.last_modified => {
                garbage.push((remote_key, latest.version_id.clone()));
            }
            (None, Some(_)) => {}
        }
    }

    Ok(garbage)
}

/// `full` mode's first pass: every object the diff chain references must
/// actually exist in the store. Returns the ones that don't — a non-empty
/// result is always fatal, since it means the backup itself is missing
/// data, not merely accumulating garbage.
async fn verify_manifest_fully<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<Vec<(String, String)>, EngineError> {
    let all_objects: HashSet<(String, String)> = ctx
        .store
        .list_all_versions()
        .await?
        .into_iter()
        .map(|v| (v.key, v.version_id))
        .collect();

    let referenced = referenced_objects(ctx).await?;

    Ok(referenced
        .into_iter()
        .filter(|k| !all_objects.contains(k))
        .collect())
}

/// `full` mode's second pass: every object version in the store that the
/// diff chain does *not* reference (after excluding the engine's own
/// bookkeeping objects) is garbage. Only called once
/// [`verify_manifest_fully`] has confirmed nothing referenced is missing.
async fn full_garbage_objects<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<Vec<(String, String)>, EngineError> {
    let all_objects: HashSet<(String, String)> = ctx
        .store
        .list_all_versions()
        .await?
        .into_iter()
        .map(|v| (v.key, v.version_id))
        .collect();

    let mut referenced = referenced_objects(ctx).await?;
    for protected in [
        &ctx.config.remote_gc_log_file,
        &ctx.config.remote_manifest_diff_file,
        &ctx.config.remote_garbage_object_log_file,
        &ctx.config.crypto.salt_file,
    ] {
        for (key, version_id) in &all_objects {
            if key == protected {
                referenced.insert((key.clone(), version_id.clone()));
            }
        }
    }

    Ok(all_objects.difference(&referenced).cloned().collect())
}

async fn referenced_objects<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<HashSet<(String, String)>, EngineError> {
    let versions = ctx.store.list_versions(&ctx.config.remote_manifest_diff_file).await?;
    let reader = MetaDiffReader::new(ctx, ctx.config.remote_manifest_diff_file.clone());

    let mut referenced = HashSet::new();
    for version in &versions {
        for entry in reader.read_diff(version).await? {
            if entry.record.empty {
                continue;
            }
            let (Some(real_path), Some(version_id)) = (&entry.record.real_path, &entry.record.version_id) else {
                continue;
            };
            let transforms = ctx.config.pipeline_for(real_path).unwrap_or(&[]);
            let remote_key = remote_key_for(&ctx.config, real_path, transforms);
            referenced.insert((remote_key, version_id.clone()));
        }
    }
    Ok(referenced)
}

/// Deletes (or, if this engine lacks delete permission, appends to the
/// garbage-object log) every `(key, version_id)` pair in `garbage`.
async fn delete_garbage_objects<S: ObjectStore>(
    ctx: &EngineContext<S>,
    garbage: &[(String, String)],
) -> Result<GcOutcome, EngineError> {
    if garbage.is_empty() {
        return Ok(GcOutcome::default());
    }

    if ctx.config.may_delete_versions() {
        for (key, version_id) in garbage {
            info!(key, version_id, "deleting garbage object");
            ctx.store.delete_version(key, version_id).await?;
        }
        Ok(GcOutcome {
            deleted: garbage.len(),
            logged: 0,
        })
    } else {
        warn!(count = garbage.len(), "lack delete permission, appending to garbage-object log");
        let key = &ctx.config.remote_garbage_object_log_file;
        let mut log: Vec<Vec<(String, String)>> = ctx.read_meta_json(key, None).await?.map(|(log, _)| log).unwrap_or_default();
        log.push(garbage.to_vec());
        ctx.write_meta_json(key, &log).await?;
        Ok(GcOutcome {
            deleted: 0,
            logged: garbage.len(),
        })
    }
}

/// Deletes every object version appended to `remote_garbage_object_log_file`
/// by previous write-only-mode collection passes, then clears the log
/// itself. Refuses if this engine cannot delete versions — there would be
/// nothing this call could safely do.
pub async fn clean_gc_log<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<GcOutcome, EngineError> {
    if !ctx.config.may_delete_versions() {
        return Err(EngineError::CannotDelete);
    }

    let key = &ctx.config.remote_garbage_object_log_file;
    let Some((log, _)): Option<(Vec<Vec<(String, String)>>, _)> = ctx.read_meta_json(key, None).await? else {
        return Ok(GcOutcome::default());
    };

    let flattened: Vec<(String, String)> = log.into_iter().flatten().collect();
    for (key, version_id) in &flattened {
        ctx.store.delete_version(key, version_id).await?;
    }
    delete_all_versions(ctx, &ctx.config.remote_garbage_object_log_file).await?;

    Ok(GcOutcome {
        deleted: flattened.len(),
        logged: 0,
    })
}

async fn reconcile_manifest<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<coffer_manifest::Manifest, EngineError> {
    let cache = ManifestCache::new(&ctx.config.local_manifest_file);
    let reader = MetaDiffReader::new(ctx, ctx.config.remote_manifest_diff_file.clone());
    Ok(get_manifest(&ctx.store, &ctx.config.remote_manifest_diff_file, &cache, &reader).await?)
}

/// Deletes every version of `key`, clearing it entirely — the meta-object
/// equivalent of a non-versioned store's plain delete.
async fn delete_all_versions<S: ObjectStore>(ctx: &EngineContext<S>, key: &str) -> Result<(), EngineError> {
    for version in ctx.store.list_versions(key).await? {
        ctx.store.delete_version(key, &version.version_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::upload::upload_file;
    use bytes::Bytes;
    use coffer_store::LocalStore;

    async fn context(config: Config) -> EngineContext<LocalStore> {
        let store = LocalStore::new(&config.base_path.join(".store")).await.unwrap();
        EngineContext::new(store, config).await.unwrap()
    }

    #[tokio::test]
    async fn read_only_engine_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder(dir.path()).read_only(true).build();
        let ctx = context(config).await;
        let outcome = garbage_collect(&ctx, GcMode::Simple).await.unwrap();
        assert_eq!(outcome, GcOutcome::default());
    }

    #[tokio::test]
    async fn simple_mode_with_no_gc_log_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = context(config).await;
        let outcome = garbage_collect(&ctx, GcMode::Simple).await.unwrap();
        assert_eq!(outcome, GcOutcome::default());
    }

    #[tokio::test]
    async fn simple_mode_deletes_orphaned_upload_not_referenced_by_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orphan.txt"), b"orphaned content").unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = context(config).await;

        // Simulate the crash window: the object was uploaded and the
        // gc-log breadcrumb was written, but the diff that would reference
        // it never got published.
        upload_file(&ctx, "/orphan.txt").await.unwrap();
        ctx.write_meta_json(
            &ctx.config.remote_gc_log_file,
            &vec![GcLogEntry {
                path: "/orphan.txt".to_string(),
            }],
        )
        .await
        .unwrap();

        let outcome = garbage_collect(&ctx, GcMode::Simple).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(ctx.store.list_versions("files/orphan.txt").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn simple_mode_without_delete_permission_logs_instead() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orphan.txt"), b"x").unwrap();
        let config = Config::builder(dir.path()).allow_delete_versions(false).build();
        let ctx = context(config).await;

        upload_file(&ctx, "/orphan.txt").await.unwrap();
        ctx.write_meta_json(
            &ctx.config.remote_gc_log_file,
            &vec![GcLogEntry {
                path: "/orphan.txt".to_string(),
            }],
        )
        .await
        .unwrap();

        let outcome = garbage_collect(&ctx, GcMode::Simple).await.unwrap();
        assert_eq!(outcome.logged, 1);
        assert!(!ctx.store.list_versions("files/orphan.txt").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_mode_raises_on_missing_referenced_object() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = context(config).await;

        // Publish a diff that references an object that was never
        // actually uploaded.
        let entry = coffer_manifest::DiffEntry {
            record: coffer_manifest::FileRecord {
                path: "/ghost.txt".to_string(),
                created: 0.0,
                last_mod: 0.0,
                hash: Some("deadbeef".to_string()),
                real_path: Some("/ghost.txt".to_string()),
                version_id: Some("nonexistent".to_string()),
                empty: false,
            },
            status: coffer_manifest::ChangeStatus::New,
        };
        ctx.write_meta_json(&ctx.config.remote_manifest_diff_file, &vec![entry])
            .await
            .unwrap();

        let err = garbage_collect(&ctx, GcMode::Full).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingObjects(1)));
    }

    #[tokio::test]
    async fn clean_gc_log_without_permission_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder(dir.path()).allow_delete_versions(false).build();
        let ctx = context(config).await;
        let err = clean_gc_log(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::CannotDelete));
    }

    #[tokio::test]
    async fn clean_gc_log_deletes_logged_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder(dir.path()).build();
        let ctx = context(config).await;

        let put = ctx.store.put_object("files/garbage", Bytes::from_static(b"x")).await.unwrap();
        ctx.write_meta_json(
            &ctx.config.remote_garbage_object_log_file,
            &vec![vec![("files/garbage".to_string(), put.version_id.clone())]],
        )
        .await
        .unwrap();

        let outcome = clean_gc_log(&ctx).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(ctx.store.list_versions("files/garbage").await.unwrap().is_empty());
    }
}
