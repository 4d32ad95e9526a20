//! `batchdl add <title> <url>...` – record a batch for the next `batchdl run`.

use anyhow::{anyhow, Result};
use batchdl_core::model::unix_millis;
use batchdl_core::persistence::DownloadsPersistence;
use batchdl_core::BatchRequest;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub async fn run_add(
    store: &dyn DownloadsPersistence,
    title: &str,
    dir: &Path,
    urls: &[String],
    id: Option<String>,
) -> Result<()> {
    let request = build_request(title, dir, urls, id);
    request.validate().map_err(|e| anyhow!(e))?;
    let (status, files) = request.into_records(unix_millis());
    store.persist_batch(&status, &files).await?;
    println!("Added batch {} ({} file(s))", status.id, files.len());
    Ok(())
}

pub(crate) fn build_request(title: &str, dir: &Path, urls: &[String], id: Option<String>) -> BatchRequest {
    let mut request = BatchRequest::new(title, dir);
    if let Some(id) = id {
        request = request.with_id(id);
    }
    let mut seen = HashSet::new();
    for (i, url) in urls.iter().enumerate() {
        let mut name = destination_for(url, i);
        if !seen.insert(name.clone()) {
            name = PathBuf::from(format!("{}-{}", i + 1, name.display()));
            seen.insert(name.clone());
        }
        request = request.file(url.as_str(), name);
    }
    request
}

/// Last path segment of the URL, or `download-<n>` when it has none.
pub(crate) fn destination_for(url: &str, index: usize) -> PathBuf {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("download-{}", index + 1)))
}
