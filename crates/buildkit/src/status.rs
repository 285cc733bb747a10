//! Decoding of the build service's line-delimited status records.

use dockyard_core::{Error, Result};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxId {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
}

/// One status record. Every field is optional; a record is decoded into a
/// fresh value, so nothing carries over from the previous line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorDetail", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<AuxId>,
}

/// What a record means, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent<'a> {
    Error(&'a str),
    ImageId(&'a str),
    Status {
        status: &'a str,
        progress: Option<&'a str>,
    },
    Stream(&'a str),
    Unrecognized,
}

impl StatusRecord {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn classify(&self) -> StatusEvent<'_> {
        if let Some(error) = self.error.as_deref() {
            return StatusEvent::Error(error);
        }
        if let Some(detail) = self.error_detail.as_ref().and_then(|d| d.message.as_deref()) {
            return StatusEvent::Error(detail);
        }
        if let Some(id) = self.aux.as_ref().and_then(|a| a.id.as_deref()) {
            return StatusEvent::ImageId(id);
        }
        if let Some(status) = self.status.as_deref() {
            return StatusEvent::Status {
                status,
                progress: self.progress.as_deref().filter(|p| !p.is_empty()),
            };
        }
        if let Some(stream) = self.stream.as_deref() {
            return StatusEvent::Stream(stream);
        }
        StatusEvent::Unrecognized
    }
}

/// Decode one line. Blank lines yield `None`.
pub fn decode_line(line: &str) -> Option<Result<StatusRecord>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(trimmed).map_err(|error| Error::Protocol {
            line: trimmed.to_string(),
            error,
        }),
    )
}

/// Turn a newline-delimited reader into a stream of records.
///
/// Undecodable lines come through as `Error::Protocol` items and the stream
/// continues; a read failure ends the stream after yielding the error.
pub fn decode_lines<R>(reader: R) -> impl Stream<Item = Result<StatusRecord>>
where
    R: AsyncBufRead + Unpin,
{
    stream::unfold(Some(reader.lines()), |state| async move {
        let mut lines = state?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(item) = decode_line(&line) {
                        return Some((item, Some(lines)));
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some((Err(Error::io("<status stream>", e)), None)),
            }
        }
    })
}
