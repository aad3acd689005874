use anyhow::Result;
use tally_common::Sample;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Writes one JSON object per sample, one sample per line.
pub async fn write_batch<W: AsyncWrite + Unpin>(writer: &mut W, batch: &[Sample]) -> Result<()> {
    let mut buf = Vec::with_capacity(batch.len() * 128);
    for sample in batch {
        tracing::trace!(sample = %sample, "Writing sample");
        serde_json::to_writer(&mut buf, sample)?;
        buf.push(b'\n');
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Drains `rx` into `writer` until every sender is gone. A failed write is
/// logged and the batch dropped.
pub async fn run_writer<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<Vec<Sample>>) -> usize {
    let mut written = 0;
    while let Some(batch) = rx.recv().await {
        match write_batch(&mut writer, &batch).await {
            Ok(()) => written += batch.len(),
            Err(e) => tracing::warn!(error = %e, dropped = batch.len(), "Failed to write samples"),
        }
    }
    written
}
