//! Repository archive extraction.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::RepoError;

/// Extract a `.tar.gz` archive into `dest`, dropping the archive's top-level
/// directory (GitLab wraps contents in `<project>-<ref>-<sha>/`).
pub async fn extract_tar_gz(archive: &[u8], dest: &Path) -> Result<(), RepoError> {
    tokio::fs::create_dir_all(dest).await?;

    let start = std::time::Instant::now();
    let mut child = Command::new("tar")
        .args(["-xzf", "-", "--strip-components=1", "-C"])
        .arg(dest)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RepoError::Extract("Failed to capture tar stdin".into()))?;
    // A write error here means tar exited early; its stderr explains why.
    let write_result = stdin.write_all(archive).await;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RepoError::Extract(format!(
            "tar exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    write_result?;

    debug!(
        dest = %dest.display(),
        elapsed_ms = start.elapsed().as_millis(),
        "Extracted repository archive"
    );
    Ok(())
}
