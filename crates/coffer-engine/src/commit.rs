//! The commit engine: scan, dedup, stream uploads, and publish one new
//! diff — backup orchestration, §4.5.
//!
//! A commit proceeds in independently-atomic chunks (§4.5 step 4): each
//! chunk publishes its own gc-log breadcrumb, uploads, diff, and local
//! manifest update before the next chunk begins. `split_chunk_size == 0`
//! (the default) runs the whole change set as a single chunk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use coffer_manifest::{
    ChangeStatus, Diff, DiffEntry, FileRecord, Manifest, ManifestCache, apply_diffs, get_manifest,
};
use coffer_scan::{build_glob_set, dirname_basename_key, find_changes, hash_files, scan};
use coffer_store::ObjectStore;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::gc::{GcLogEntry, GcMode, garbage_collect};
use crate::lock::CommitLock;
use crate::reader::MetaDiffReader;
use crate::upload::upload_file;

/// Summary of one [`commit`] invocation.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// The manifest after every chunk's diff has been folded in.
    pub manifest: Manifest,
    /// How many chunks actually published a diff (a chunk whose change set
    /// was entirely `skip_delete`-filtered deletions publishes nothing).
    pub diffs_published: usize,
    /// Local paths dropped from this commit because they could not be
    /// read — logged, not fatal.
    pub read_errors: Vec<PathBuf>,
}

/// Runs one full commit: scans `ctx.config.base_path`, diffs it against the
/// current manifest, and publishes however many chunks of changes result.
///
/// Acquires the single-host advisory lock for the duration of the call;
/// fails immediately with [`EngineError::Locked`] if another commit is
/// already in progress. Fails immediately with [`EngineError::ReadOnly`] if
/// the engine is configured read-only.
#[tracing::instrument(skip(ctx), fields(base_path = %ctx.config.base_path.display()))]
pub async fn commit<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<CommitOutcome, EngineError> {
    if ctx.config.read_only {
        return Err(EngineError::ReadOnly);
    }

    let lock = CommitLock::acquire(&ctx.config.local_lock_file)?;
    let result = run_commit(ctx).await;
    lock.release()?;

    match &result {
        Ok(outcome) => info!(diffs_published = outcome.diffs_published, files = outcome.manifest.files.len(), "commit complete"),
        Err(e) => tracing::error!(error = %e, "commit failed"),
    }
    result
}

async fn run_commit<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<CommitOutcome, EngineError> {
    ctx.store.abort_failed_multiparts().await?;
    garbage_collect(ctx, GcMode::Simple).await?;

    let mut manifest = reconcile_manifest(ctx).await?;

    let globs = build_glob_set(&ctx.config.ignore_files)?;
    let scan_result = scan(&ctx.config.base_path, &globs, ctx.config.visit_mountpoints);
    let mut read_errors = scan_result.read_errors;

    let changes = find_changes(&scan_result.files, &manifest.files);
    if changes.is_empty() {
        return Ok(CommitOutcome {
            manifest,
            diffs_published: 0,
            read_errors,
        });
    }

    let mut sorted: Vec<DiffEntry> = changes.into_values().collect();
    sorted.sort_by_key(|entry| dirname_basename_key(entry.path()));

    let mut diffs_published = 0;
    for chunk in split_into_chunks(sorted, ctx.config.split_chunk_size) {
        let (new_diff, chunk_errors) = run_chunk(ctx, chunk, &manifest).await?;
        read_errors.extend(chunk_errors);
        if new_diff.is_empty() {
            continue;
        }

        let uploaded = new_diff
            .iter()
            .any(|e| matches!(e.status, ChangeStatus::New | ChangeStatus::Changed) && !e.record.empty);

        manifest = publish_diff(ctx, new_diff, manifest).await?;
        diffs_published += 1;

        if uploaded {
            tokio::time::sleep(Duration::from_secs(1)).await;
            delete_all_versions(ctx, &ctx.config.remote_gc_log_file).await?;
        }
    }

    Ok(CommitOutcome {
        manifest,
        diffs_published,
        read_errors,
    })
}

fn split_into_chunks(sorted: Vec<DiffEntry>, split_chunk_size: usize) -> Vec<Vec<DiffEntry>> {
    if split_chunk_size == 0 || sorted.len() <= split_chunk_size {
        return vec![sorted];
    }
    sorted
        .chunks(split_chunk_size)
        .map(<[DiffEntry]>::to_vec)
        .collect()
}

/// One chunk of §4.5 steps (a)–(e): hashes, deduplicates, publishes the
/// gc-log, drives uploads, and resolves new-duplicates. Returns the
/// finished diff entries for this chunk plus any per-file errors
/// encountered along the way (read errors during hashing are folded into
/// `find_changes`'s caller already; this covers files that vanished or
/// failed mid-upload between the scan and the upload).
async fn run_chunk<S: ObjectStore>(
    ctx: &EngineContext<S>,
    chunk: Vec<DiffEntry>,
    manifest: &Manifest,
) -> Result<(Vec<DiffEntry>, Vec<PathBuf>), EngineError> {
    let mut chunk_by_path: HashMap<String, DiffEntry> =
        chunk.into_iter().map(|e| (e.path().to_string(), e)).collect();
    hash_files(&mut chunk_by_path, &ctx.config.base_path).await?;
    let mut sorted_paths: Vec<String> = chunk_by_path.keys().cloned().collect();
    sorted_paths.sort_by_key(|p| dirname_basename_key(p));

    let mut hash_index: HashMap<String, FileRecord> = HashMap::new();
    for record in &manifest.files {
        if let Some(hash) = &record.hash {
            hash_index.entry(hash.clone()).or_insert_with(|| record.clone());
        }
    }

    let mut new_diff: Vec<DiffEntry> = Vec::new();
    let mut upload_queue: Vec<String> = Vec::new();
    let mut pending_templates: HashMap<String, DiffEntry> = HashMap::new();
    let mut pending_chunk_hashes: HashMap<String, String> = HashMap::new();
    let mut new_duplicates: Vec<(DiffEntry, String)> = Vec::new();
    let mut read_errors = Vec::new();

    for path in &sorted_paths {
        let Some(entry) = chunk_by_path.remove(path) else {
            continue;
        };

        match entry.status {
            ChangeStatus::Deleted => {
                if ctx.config.skip_delete.iter().any(|glob| glob_matches(glob, path)) {
                    continue;
                }
                new_diff.push(entry);
            }
            ChangeStatus::New | ChangeStatus::Changed => {
                let local_path = ctx.config.base_path.join(path.trim_start_matches('/'));
                let metadata = match tokio::fs::metadata(&local_path).await {
                    Ok(m) => m,
                    Err(_) => continue, // race-deleted since the scan; drop silently.
                };

                let mut record = entry.record.clone();
                if metadata.len() == 0 {
                    record.empty = true;
                    new_diff.push(DiffEntry {
                        record,
                        status: entry.status,
                    });
                    continue;
                }

                let Some(hash) = record.hash.clone() else {
                    // hash_files always attaches a hash to new/changed entries;
                    // absence here means the content read failed after the
                    // stat succeeded (race). Drop silently, matching the
                    // same-race handling above.
                    continue;
                };
                if let Some(master) = hash_index.get(&hash) {
                    record.reference_duplicate_to(master);
                    new_diff.push(DiffEntry {
                        record,
                        status: entry.status,
                    });
                } else if let Some(master_path) = pending_chunk_hashes.get(&hash) {
                    new_duplicates.push((
                        DiffEntry {
                            record,
                            status: entry.status,
                        },
                        master_path.clone(),
                    ));
                } else {
                    pending_chunk_hashes.insert(hash, path.clone());
                    upload_queue.push(path.clone());
                    pending_templates.insert(
                        path.clone(),
                        DiffEntry {
                            record,
                            status: entry.status,
                        },
                    );
                }
            }
        }
    }

    if !upload_queue.is_empty() {
        let gc_entries: Vec<GcLogEntry> = upload_queue
            .iter()
            .map(|path| GcLogEntry { path: path.clone() })
            .collect();
        ctx.write_meta_json(&ctx.config.remote_gc_log_file, &gc_entries).await?;
    }

    let mut upload_results: HashMap<String, (String, String)> = HashMap::new();
    for path in &upload_queue {
        let Some(template) = pending_templates.remove(path) else {
            continue;
        };

        let local_path = ctx.config.base_path.join(path.trim_start_matches('/'));
        let metadata = match tokio::fs::metadata(&local_path).await {
            Ok(m) => m,
            Err(_) => continue,
        };

        if metadata.len() == 0 {
            let mut record = template.record;
            record.empty = true;
            new_diff.push(DiffEntry {
                record,
                status: template.status,
            });
            continue;
        }

        match upload_file(ctx, path).await {
            Ok(outcome) => {
                let mut record = template.record;
                record.real_path = Some(path.clone());
                record.version_id = Some(outcome.version_id.clone());
                upload_results.insert(path.clone(), (path.clone(), outcome.version_id));
                new_diff.push(DiffEntry {
                    record,
                    status: template.status,
                });
            }
            Err(EngineError::NoPipelineMatch(p)) => return Err(EngineError::NoPipelineMatch(p)),
            Err(e) => {
                warn!(path, error = %e, "upload failed mid-stream, skipping file for this commit");
                read_errors.push(PathBuf::from(path));
            }
        }
    }

    for (mut dup, master_path) in new_duplicates {
        if let Some((real_path, version_id)) = upload_results.get(&master_path) {
            dup.record.real_path = Some(real_path.clone());
            dup.record.version_id = Some(version_id.clone());
            new_diff.push(dup);
        } else {
            info!(path = dup.path(), master_path, "master upload did not complete, dropping duplicate for this commit");
        }
    }

    Ok((new_diff, read_errors))
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    globset::Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(path))
        .unwrap_or(false)
}

/// Publishes `entries` as a new diff object, folds it into `manifest`, and
/// writes the manifest cache atomically — §4.5 steps (f) and (g).
async fn publish_diff<S: ObjectStore>(
    ctx: &EngineContext<S>,
    entries: Vec<DiffEntry>,
    manifest: Manifest,
) -> Result<Manifest, EngineError> {
    let put = ctx
        .write_meta_json(&ctx.config.remote_manifest_diff_file, &entries)
        .await?;
    let meta = ctx
        .store
        .head_object(&ctx.config.remote_manifest_diff_file, Some(&put.version_id))
        .await?;
    let last_modified = meta
        .last_modified
        .format(&Rfc3339)
        .unwrap_or_else(|_| meta.last_modified.to_string());

    let diff = Diff {
        version_id: put.version_id.clone(),
        last_modified: last_modified.clone(),
        entries,
    };
    let files = apply_diffs(std::slice::from_ref(&diff), &manifest.files);
    let new_manifest = Manifest {
        latest_remote_diff: coffer_manifest::LatestRemoteDiff {
            version_id: Some(put.version_id),
            last_modified: Some(last_modified),
        },
        files,
    };

    let cache = ManifestCache::new(&ctx.config.local_manifest_file);
    cache.write_atomic(&new_manifest).await?;
    Ok(new_manifest)
}

async fn reconcile_manifest<S: ObjectStore>(ctx: &EngineContext<S>) -> Result<Manifest, EngineError> {
    let cache = ManifestCache::new(&ctx.config.local_manifest_file);
    let reader = MetaDiffReader::new(ctx, ctx.config.remote_manifest_diff_file.clone());
    Ok(get_manifest(&ctx.store, &ctx.config.remote_manifest_diff_file, &cache, &reader).await?)
}

async fn delete_all_versions<S: ObjectStore>(ctx: &EngineContext<S>, key: &str) -> Result<(), EngineError> {
    for version in ctx.store.list_versions(key).await? {
        ctx.store.delete_version(key, &version.version_id).await?;
    }
    Ok(())
}
