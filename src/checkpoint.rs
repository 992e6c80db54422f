use std::path::Path;

use anyhow::Context as _;
use tokio::fs;

use crate::formats::{Checkpoint, DiagnosticRecord};

/// Writes the checkpoint next to its final path, then renames it into place.
pub async fn write(path: &Path, checkpoint: &Checkpoint) -> anyhow::Result<()> {
    write_json_atomic(path, checkpoint).await
}

pub async fn load(path: &Path) -> anyhow::Result<Checkpoint> {
    let data = fs::read(path)
        .await
        .with_context(|| format!("read checkpoint: {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parse checkpoint: {}", path.display()))
}

pub async fn write_diagnostics(path: &Path, records: &[DiagnosticRecord]) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record).context("serialize diagnostic")?;
        buf.push(b'\n');
    }
    fs::write(path, &buf)
        .await
        .with_context(|| format!("write diagnostics: {}", path.display()))?;
    Ok(())
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
