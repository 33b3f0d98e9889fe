use anyhow::Context;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

pub async fn save_json<T: Serialize + ?Sized>(file_path: &str, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("Failed to serialize JSON")?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(file_path)
        .await
        .with_context(|| format!("Failed to open `{}`", file_path))?;
    file.write_all(&data)
        .await
        .with_context(|| format!("Failed to write to `{}`", file_path))?;
    file.flush().await.context("Failed to flush JSON file")?;
    Ok(())
}
