//! Docker daemon as the build service.

use crate::digest::Digest;
use crate::executor::{BuildRequest, BuildService};
use crate::status::{AuxId, ErrorDetail, StatusRecord};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, PushImageOptions, TagImageOptions};
use bollard::models::BuildInfo;
use bollard::Docker;
use dockyard_core::{Error, Result};
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use tracing::{debug, info};

pub struct DockerBuildService {
    docker: Docker,
    credentials: Option<DockerCredentials>,
}

impl DockerBuildService {
    /// Connect using the local socket or `DOCKER_HOST`.
    pub fn connect(credentials: Option<DockerCredentials>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Build(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker, credentials })
    }

    fn build_credentials(&self) -> Option<HashMap<String, DockerCredentials>> {
        let credentials = self.credentials.clone()?;
        let server = credentials.serveraddress.clone().unwrap_or_default();
        Some(HashMap::from([(server, credentials)]))
    }
}

impl From<BuildInfo> for StatusRecord {
    fn from(info: BuildInfo) -> Self {
        StatusRecord {
            id: info.id,
            stream: info.stream,
            status: info.status,
            progress: info.progress,
            error: info.error,
            error_detail: info.error_detail.map(|d| ErrorDetail { message: d.message }),
            aux: info.aux.map(|a| AuxId { id: a.id }),
        }
    }
}

/// Map a bollard stream item onto the status protocol. Errors the daemon
/// reports mid-stream become error records; undecodable payloads become
/// protocol errors so consumption continues.
fn map_build_item(item: std::result::Result<BuildInfo, DockerError>) -> Result<StatusRecord> {
    match item {
        Ok(info) => Ok(StatusRecord::from(info)),
        Err(DockerError::DockerStreamError { error }) => Ok(StatusRecord::error(error)),
        Err(DockerError::JsonDataError { message, .. }) => Err(Error::Protocol {
            line: message.clone(),
            error: <serde_json::Error as serde::de::Error>::custom(message),
        }),
        Err(DockerError::JsonSerdeError { err }) => Err(Error::Protocol {
            line: String::new(),
            error: err,
        }),
        Err(e) => Err(Error::Build(format!("Build service error: {}", e))),
    }
}

/// Split `registry:5000/name:tag` into `("registry:5000/name", "tag")`.
pub fn split_repo_tag(reference: &str) -> (&str, &str) {
    match reference.rfind(':') {
        Some(idx) if !reference[idx + 1..].contains('/') => (&reference[..idx], &reference[idx + 1..]),
        _ => (reference, "latest"),
    }
}

#[async_trait]
impl BuildService for DockerBuildService {
    fn build(&self, request: BuildRequest) -> BoxStream<'_, Result<StatusRecord>> {
        let options = BuildImageOptions {
            dockerfile: request.manifest,
            t: request.tag,
            rm: true,
            ..Default::default()
        };

        self.docker
            .build_image(options, self.build_credentials(), Some(request.archive))
            .map(map_build_item)
            .boxed()
    }

    async fn tag(&self, image: &str, tag: &str) -> Result<()> {
        let (repo, tag) = split_repo_tag(tag);
        debug!(image = %image, repo = %repo, tag = %tag, "Tagging image");
        self.docker
            .tag_image(image, Some(TagImageOptions { repo, tag }))
            .await
            .map_err(|e| Error::Build(format!("Failed to tag {} as {}:{}: {}", image, repo, tag, e)))
    }

    async fn push(&self, reference: &str) -> Result<Option<Digest>> {
        let (name, tag) = split_repo_tag(reference);
        info!(image = %reference, "Pushing image");

        let mut stream = self.docker.push_image(
            name,
            Some(PushImageOptions { tag }),
            self.credentials.clone(),
        );

        let mut digest = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(Error::Build(error));
                    }
                    if let Some(status) = info.status.as_deref() {
                        debug!(image = %reference, "{} {}", status, info.progress.as_deref().unwrap_or(""));
                        if let Some(found) = Digest::from_push_status(status) {
                            digest = Some(found);
                        }
                    }
                }
                Err(DockerError::DockerStreamError { error }) => return Err(Error::Build(error)),
                Err(e) => {
                    return Err(Error::Build(format!("Failed to push {}: {}", reference, e)))
                }
            }
        }

        Ok(digest)
    }
}
