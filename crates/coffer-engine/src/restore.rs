//! The restore engine: rebuild a manifest at a chosen version and stream
//! every file it lists back down to a local directory — §4.6.

use std::path::Path;

use coffer_manifest::{FileRecord, rebuild};
use coffer_scan::{build_glob_set, dirname_basename_key};
use coffer_store::ObjectStore;
use tracing::{debug, info};

use crate::context::EngineContext;
use crate::download::download_file;
use crate::error::EngineError;
use crate::naming::remote_key_for;
use crate::reader::MetaDiffReader;

/// Summary of one [`restore`] invocation.
#[derive(Debug, Clone, Default)]
pub struct RestoreOutcome {
    /// Files written to `target_directory`.
    pub restored: usize,
    /// Files skipped because they matched an ignore glob.
    pub ignored: usize,
}

/// Rebuilds the manifest as of `version_id` (the most recent diff, if
/// `None`) and restores every file it lists into `target_directory`,
/// recreating directories as needed. Files matching `ignore_globs` are
/// skipped. Restoration order follows the same `(dirname, basename)` sort
/// every other pass in this engine uses.
#[tracing::instrument(skip(ctx, ignore_globs), fields(target = %target_directory.display()))]
pub async fn restore<S: ObjectStore>(
    ctx: &EngineContext<S>,
    version_id: Option<&str>,
    target_directory: &Path,
    ignore_globs: &[String],
) -> Result<RestoreOutcome, EngineError> {
    if ctx.config.write_only {
        return Err(EngineError::WriteOnly);
    }

    let versions = ctx.store.list_versions(&ctx.config.remote_manifest_diff_file).await?;
    let reader = MetaDiffReader::new(ctx, ctx.config.remote_manifest_diff_file.clone());

    let mut diffs = Vec::with_capacity(versions.len());
    for version in &versions {
        let entries = reader.read_diff(version).await?;
        let last_modified = version
            .last_modified
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| version.last_modified.to_string());
        diffs.push(coffer_manifest::Diff {
            version_id: version.version_id.clone(),
            last_modified,
            entries,
        });
    }

    let mut files = rebuild(&diffs, version_id)?;
    files.sort_by_key(|f| dirname_basename_key(&f.path));

    let globs = build_glob_set(ignore_globs)?;

    let mut outcome = RestoreOutcome::default();
    for record in &files {
        if globs.is_match(&record.path) {
            outcome.ignored += 1;
            continue;
        }
        restore_one(ctx, record, target_directory).await?;
        outcome.restored += 1;
    }

    info!(restored = outcome.restored, ignored = outcome.ignored, version_id, "restore complete");
    Ok(outcome)
}

async fn restore_one<S: ObjectStore>(
    ctx: &EngineContext<S>,
    record: &FileRecord,
    target_directory: &Path,
) -> Result<(), EngineError> {
    let target_path = target_directory.join(record.path.trim_start_matches('/'));

    if record.empty {
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::File::create(&target_path).await?;
        debug!(path = %record.path, "restored empty file");
        return Ok(());
    }

    let real_path = record
        .real_path
        .as_deref()
        .ok_or_else(|| EngineError::CorruptRecord(record.path.clone()))?;
    let version_id = record
        .version_id
        .as_deref()
        .ok_or_else(|| EngineError::CorruptRecord(record.path.clone()))?;

    let transforms = ctx.config.pipeline_for(real_path).unwrap_or(&[]);
    let remote_key = remote_key_for(&ctx.config, real_path, transforms);
    download_file(ctx, &remote_key, version_id, &target_path).await?;
    debug!(path = %record.path, %remote_key, version_id, "restored file");
    Ok(())
}

/// The list of `version_id` and publication time of every diff currently in
/// the chain, oldest first — used by embedders to present a "which snapshot
/// do you want to restore" menu.
pub async fn list_snapshots<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<Vec<SnapshotInfo>, EngineError> {
    let versions = ctx.store.list_versions(&ctx.config.remote_manifest_diff_file).await?;
    Ok(versions
        .into_iter()
        .map(|v| SnapshotInfo {
            version_id: v.version_id,
            last_modified: v.last_modified,
        })
        .collect())
}

/// One entry of [`list_snapshots`]'s result.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub version_id: String,
    pub last_modified: time::OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::commit;
    use crate::config::Config;
    use coffer_store::LocalStore;

    async fn context(config: Config) -> EngineContext<LocalStore> {
        let store = LocalStore::new(&config.base_path.join(".store")).await.unwrap();
        EngineContext::new(store, config).await.unwrap()
    }

    #[tokio::test]
    async fn restores_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let config = Config::builder(dir.path())
            .local_manifest_file(dir.path().join(".manifest"))
            .local_lock_file(dir.path().join(".lock"))
            .build();
        let ctx = context(config).await;
        commit(&ctx).await.unwrap();

        let target = dir.path().join("restored");
        let outcome = restore(&ctx, None, &target, &[]).await.unwrap();
        assert_eq!(outcome.restored, 1);
        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn restores_prior_snapshot_after_a_later_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let config = Config::builder(dir.path())
            .local_manifest_file(dir.path().join(".manifest"))
            .local_lock_file(dir.path().join(".lock"))
            .build();
        let ctx = context(config).await;
        let first = commit(&ctx).await.unwrap();
        let first_version = first.manifest.latest_remote_diff.version_id.clone().unwrap();

        std::fs::write(dir.path().join("a.txt"), b"y").unwrap();
        commit(&ctx).await.unwrap();

        let target = dir.path().join("restored-first");
        restore(&ctx, Some(&first_version), &target, &[]).await.unwrap();
        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn empty_file_restores_as_zero_length() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), b"").unwrap();
        let config = Config::builder(dir.path())
            .local_manifest_file(dir.path().join(".manifest"))
            .local_lock_file(dir.path().join(".lock"))
            .build();
        let ctx = context(config).await;
        commit(&ctx).await.unwrap();

        let target = dir.path().join("restored");
        restore(&ctx, None, &target, &[]).await.unwrap();
        let metadata = std::fs::metadata(target.join("empty.txt")).unwrap();
        assert_eq!(metadata.len(), 0);
    }

    #[tokio::test]
    async fn ignore_globs_skip_matching_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("skip.tmp"), b"b").unwrap();
        let config = Config::builder(dir.path())
            .local_manifest_file(dir.path().join(".manifest"))
            .local_lock_file(dir.path().join(".lock"))
            .build();
        let ctx = context(config).await;
        commit(&ctx).await.unwrap();

        let target = dir.path().join("restored");
        let outcome = restore(&ctx, None, &target, &["/skip.tmp".to_string()]).await.unwrap();
        assert_eq!(outcome.restored, 1);
        assert_eq!(outcome.ignored, 1);
        assert!(!target.join("skip.tmp").exists());
    }

    #[tokio::test]
    async fn write_only_engine_refuses_to_restore() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder(dir.path()).write_only(true).build();
        let ctx = context(config).await;
        let err = restore(&ctx, None, &dir.path().join("out"), &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::WriteOnly));
    }
}
