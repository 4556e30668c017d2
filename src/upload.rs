//! Delivery seam for finished results.
//!
//! Where a result goes after the pipeline is done with it is a transport
//! concern; the pipeline only hands over a path. The single-file helper
//! runs the preflight the transports share: the path must exist and a
//! cancelled task never uploads.

use crate::error::{TransformError, TransformResult};
use crate::probe;
use crate::task::TaskContext;
use async_trait::async_trait;
use std::path::Path;

/// Destination for a finished file or directory.
#[async_trait]
pub trait UploadTarget: Send + Sync {
    async fn upload(&self, ctx: &TaskContext, path: &Path) -> TransformResult<()>;
}

/// Deliver one finished result to the target.
pub async fn deliver(target: &dyn UploadTarget, ctx: &TaskContext, path: &Path) -> TransformResult<()> {
    if ctx.is_cancelled() {
        return Err(TransformError::Cancelled);
    }
    if !path.exists() {
        return Err(TransformError::Validation(format!(
            "nothing to upload at {}",
            path.display()
        )));
    }

    let size = probe::path_size(path).await;
    log::info!("Uploading {} ({} bytes) for task {}", path.display(), size, ctx.task_id);
    target.upload(ctx, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTarget {
        uploads: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl UploadTarget for RecordingTarget {
        async fn upload(&self, _ctx: &TaskContext, path: &Path) -> TransformResult<()> {
            if let Ok(mut uploads) = self.uploads.lock() {
                uploads.push(path.to_path_buf());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deliver_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.mkv");
        std::fs::write(&file, b"x").unwrap();

        let target = RecordingTarget::default();
        let ctx = TaskContext::new(1, 10, 500, "job");
        deliver(&target, &ctx, &file).await.unwrap();
        assert_eq!(*target.uploads.lock().unwrap(), vec![file]);
    }

    #[tokio::test]
    async fn test_deliver_rejects_missing_path() {
        let target = RecordingTarget::default();
        let ctx = TaskContext::new(1, 10, 500, "job");
        let result = deliver(&target, &ctx, Path::new("/nonexistent/out.mkv")).await;
        assert!(matches!(result, Err(TransformError::Validation(_))));
        assert!(target.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_refuses_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.mkv");
        std::fs::write(&file, b"x").unwrap();

        let target = RecordingTarget::default();
        let ctx = TaskContext::new(1, 10, 500, "job");
        ctx.cancel();
        let result = deliver(&target, &ctx, &file).await;
        assert!(matches!(result, Err(TransformError::Cancelled)));
        assert!(target.uploads.lock().unwrap().is_empty());
    }
}
