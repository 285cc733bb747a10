//! Submits packaged contexts to a build service and interprets its status stream.

use crate::cancel::{CancelCheck, CancellationToken};
use crate::context_cache::ArchiveHandle;
use crate::digest::Digest;
use crate::progress::ProgressTracker;
use crate::status::{StatusEvent, StatusRecord};
use async_trait::async_trait;
use bytes::Bytes;
use dockyard_core::{Error, Result};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything the build service needs for one image.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub archive: Bytes,
    /// Manifest location inside the archive.
    pub manifest: String,
    /// Tag applied by the build itself. Further tags are applied afterwards.
    pub tag: String,
}

/// The container build service. Status arrives as a stream of records;
/// transport failures come through as `Err` items.
#[async_trait]
pub trait BuildService: Send + Sync {
    fn build(&self, request: BuildRequest) -> BoxStream<'_, Result<StatusRecord>>;

    async fn tag(&self, image: &str, tag: &str) -> Result<()>;

    /// Push `tag` and return the registry digest when the service reports one.
    async fn push(&self, tag: &str) -> Result<Option<Digest>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    /// `None` when the stream closed without an error or an image id.
    pub image_id: Option<String>,
    pub tags: Vec<String>,
}

/// Consume status records until the stream closes.
///
/// The first `error` record ends the build with `Error::Build` carrying the
/// message verbatim. Undecodable records are logged and skipped. The last aux
/// image id seen is the result.
pub async fn consume<S>(
    mut stream: S,
    tracker: &ProgressTracker,
    cancel: &CancellationToken,
) -> Result<Option<String>>
where
    S: Stream<Item = Result<StatusRecord>> + Unpin,
{
    let mut image_id = None;

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                tracker.build_failed("cancelled");
                return Err(Error::Cancelled);
            }
            item = stream.next() => item,
        };

        let record = match item {
            None => break,
            Some(Ok(record)) => record,
            Some(Err(err @ Error::Protocol { .. })) => {
                tracker.protocol_error(&err);
                continue;
            }
            Some(Err(err)) => {
                tracker.build_failed(&err.to_string());
                return Err(err);
            }
        };

        match record.classify() {
            StatusEvent::Error(message) => {
                tracker.build_failed(message);
                return Err(Error::Build(message.to_string()));
            }
            StatusEvent::ImageId(id) => {
                debug!(image_id = %id, "Build reported image id");
                image_id = Some(id.to_string());
            }
            _ => tracker.record(&record),
        }
    }

    tracker.build_completed(image_id.as_deref());
    Ok(image_id)
}

pub struct BuildExecutor {
    service: Arc<dyn BuildService>,
    quiet: bool,
    verbose: bool,
}

impl BuildExecutor {
    pub fn new(service: Arc<dyn BuildService>) -> Self {
        Self {
            service,
            quiet: false,
            verbose: false,
        }
    }

    pub fn with_output(mut self, quiet: bool, verbose: bool) -> Self {
        self.quiet = quiet;
        self.verbose = verbose;
        self
    }

    pub fn service(&self) -> &Arc<dyn BuildService> {
        &self.service
    }

    /// Build `archive` with the manifest at `manifest`, then apply every tag.
    ///
    /// The first tag goes to the build itself; the rest are added once an
    /// image id is known.
    pub async fn build(
        &self,
        service_name: &str,
        archive: &ArchiveHandle,
        manifest: &str,
        tags: &[String],
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome> {
        let (primary, extra) = tags
            .split_first()
            .ok_or_else(|| Error::Build(format!("No image tag for service {}", service_name)))?;

        // bollard 0.18 takes the build body as one `Bytes`, so the whole
        // archive is held in memory for the duration of the request.
        let bytes = tokio::fs::read(&archive.path)
            .await
            .map_err(|e| Error::io(&archive.path, e))?;

        let tracker = ProgressTracker::new(service_name, self.quiet, self.verbose);
        tracker.build_started(primary);

        let request = BuildRequest {
            archive: Bytes::from(bytes),
            manifest: manifest.to_string(),
            tag: primary.clone(),
        };

        let image_id = consume(self.service.build(request), &tracker, cancel).await?;

        let mut applied = vec![primary.clone()];
        if let Some(id) = image_id.as_deref() {
            for tag in extra {
                cancel.check()?;
                self.service.tag(id, tag).await?;
                applied.push(tag.clone());
            }
        }

        info!(
            service = %service_name,
            image_id = image_id.as_deref().unwrap_or("<none>"),
            tags = ?applied,
            "Image built"
        );

        Ok(BuildOutcome {
            image_id,
            tags: applied,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fake::ReplayService;
    use super::*;
    use crate::status::decode_line;
    use futures_util::stream;

    fn records(lines: &[&str]) -> impl Stream<Item = Result<StatusRecord>> + Unpin {
        let items: Vec<_> = lines.iter().filter_map(|l| decode_line(l)).collect();
        stream::iter(items)
    }

    fn tracker() -> ProgressTracker {
        ProgressTracker::new("test", true, false)
    }

    #[tokio::test]
    async fn test_error_record_is_build_error() {
        let result = consume(records(&[r#"{"error":"disk full"}"#]), &tracker(), &CancellationToken::new()).await;
        match result {
            Err(Error::Build(msg)) => assert_eq!(msg, "disk full"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_stops_consumption() {
        let result = consume(
            records(&[
                r#"{"stream":"Step 1/2"}"#,
                r#"{"error":"failed to fetch"}"#,
                r#"{"aux":{"ID":"sha256:late"}}"#,
            ]),
            &tracker(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::Build(msg)) if msg == "failed to fetch"));
    }

    #[tokio::test]
    async fn test_last_image_id_wins_and_bad_lines_are_skipped() {
        let tracker = tracker();
        let id = consume(
            records(&[
                r#"{"aux":{"ID":"sha256:first"}}"#,
                "not json",
                r#"{"stream":"Successfully built"}"#,
                r#"{"aux":{"ID":"sha256:second"}}"#,
                r#"{"odd":1}"#,
            ]),
            &tracker,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(id.as_deref(), Some("sha256:second"));
        assert_eq!(tracker.counts().protocol_errors, 1);
        assert_eq!(tracker.counts().unrecognized, 1);
    }

    #[tokio::test]
    async fn test_empty_stream_is_successful_without_id() {
        let id = consume(records(&[]), &tracker(), &CancellationToken::new()).await.unwrap();
        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn test_transport_error_aborts() {
        let items: Vec<Result<StatusRecord>> = vec![Err(Error::Build("connection reset".into()))];
        let result = consume(stream::iter(items), &tracker(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Build(_))));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_pending_stream() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = consume(stream::pending::<Result<StatusRecord>>(), &tracker(), &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_executor_builds_and_tags() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ctx.tar");
        std::fs::write(&path, b"archive").unwrap();
        let handle = ArchiveHandle {
            path,
            fingerprint: "abc".to_string(),
            reused: false,
        };

        let service = Arc::new(ReplayService::new(&[
            r#"{"stream":"Step 1/1 : FROM scratch"}"#,
            r#"{"aux":{"ID":"sha256:img"}}"#,
        ]));
        let executor = BuildExecutor::new(service.clone()).with_output(true, false);

        let outcome = executor
            .build(
                "web",
                &handle,
                "Dockerfile.generated",
                &["reg/web:7".to_string(), "web".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.image_id.as_deref(), Some("sha256:img"));
        assert_eq!(outcome.tags, vec!["reg/web:7", "web"]);

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests[0].manifest, "Dockerfile.generated");
        assert_eq!(requests[0].tag, "reg/web:7");
        assert_eq!(&requests[0].archive[..], b"archive");
        assert_eq!(
            *service.tagged.lock().unwrap(),
            vec![("sha256:img".to_string(), "web".to_string())]
        );
    }

    #[tokio::test]
    async fn test_executor_failure_skips_tagging() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ctx.tar");
        std::fs::write(&path, b"archive").unwrap();
        let handle = ArchiveHandle {
            path,
            fingerprint: "abc".to_string(),
            reused: true,
        };

        let service = Arc::new(ReplayService::new(&[r#"{"error":"disk full"}"#]));
        let executor = BuildExecutor::new(service.clone()).with_output(true, false);

        let err = executor
            .build(
                "web",
                &handle,
                "Dockerfile",
                &["web:1".to_string(), "web".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert!(service.tagged.lock().unwrap().is_empty());
    }
}
