// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receives reporter events from a runner process that isn't spawned by suitesync itself, such
//! as one started under a debugger.

use crate::{
    client::{ReporterSink, dispatch_event},
    errors::ReporterServerError,
};
use suitesync_metadata::ReporterEvent;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Environment variable telling the runner where to send reporter events.
pub const REPORTER_ENDPOINT_ENV: &str = "SUITESYNC_REPORTER_ENDPOINT";

/// A loopback TCP listener that accepts a single reporter connection.
///
/// The runner writes one JSON [`ReporterEvent`] per line.
#[derive(Debug)]
pub struct ReporterServer {
    listener: TcpListener,
    endpoint: String,
}

impl ReporterServer {
    /// Binds to an ephemeral port on the loopback interface.
    pub async fn bind() -> Result<Self, ReporterServerError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(ReporterServerError::Bind)?;
        let addr = listener.local_addr().map_err(ReporterServerError::Bind)?;
        Ok(Self {
            listener,
            endpoint: addr.to_string(),
        })
    }

    /// The `host:port` the runner should connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The environment variable that points the runner at this server.
    pub fn env(&self) -> (&'static str, String) {
        (REPORTER_ENDPOINT_ENV, self.endpoint.clone())
    }

    /// Waits for the runner to connect and streams its events into `sink`.
    ///
    /// Cancelling `token` only stops waiting for a connection. Once connected, events are read
    /// until `onEnd` or the end of the stream.
    pub async fn wire_reporter(
        self,
        sink: &mut dyn ReporterSink,
        token: &CancellationToken,
    ) -> Result<(), ReporterServerError> {
        // A connection that is already waiting wins over a session that has just ended.
        let stream = tokio::select! {
            biased;

            accepted = self.listener.accept() => {
                let (stream, peer) = accepted.map_err(ReporterServerError::Accept)?;
                debug!("reporter connected from {peer}");
                stream
            }
            _ = token.cancelled() => {
                debug!("stopped waiting for reporter on {}", self.endpoint);
                return Ok(());
            }
        };

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await.map_err(ReporterServerError::Read)? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ReporterEvent>(&line) {
                Ok(event) => {
                    if dispatch_event(sink, &event) {
                        break;
                    }
                }
                Err(error) => debug!("skipping malformed reporter event `{line}`: {error}"),
            }
        }
        Ok(())
    }
}
