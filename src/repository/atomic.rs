//! Durable whole-file replacement.

use std::io;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write `bytes` to `path` so readers see either the old or the new file.
///
/// Writes a sibling temp file, fsyncs it, renames it over `path`, then
/// fsyncs the directory.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = parent.join(format!(".{file_name}.tmp-{}", Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
        return result;
    }

    sync_dir(parent).await;
    Ok(())
}

/// Best-effort directory fsync so renames survive a crash.
pub async fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir).await {
        if let Err(e) = handle.sync_all().await {
            tracing::debug!(dir = %dir.display(), error = %e, "Directory fsync not supported");
        }
    }
}
