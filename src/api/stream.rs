//! Incremental decoding of newline-delimited JSON response bodies.
//!
//! Values are parsed one at a time from a growing byte buffer, so objects may
//! be split across network chunks and separated by any whitespace.

use futures_util::{Stream, StreamExt};
use log::debug;
use serde::de::DeserializeOwned;
use std::io::Write;
use tokio_util::sync::CancellationToken;

use super::error::{ApiError, Error, Result};
use super::types::{GenerateChunk, PullChunk};

pub const GENERATE_ENDPOINT: &str = "/api/generate";
pub const PULL_ENDPOINT: &str = "/api/pull";

/// Reads JSON values one at a time from a byte stream.
pub struct JsonStream<S> {
    body: S,
    buf: Vec<u8>,
    eof: bool,
    context: &'static str,
}

impl<S, B> JsonStream<S>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    /// `context` names the stream in decode errors.
    pub fn new(body: S, context: &'static str) -> Self {
        Self {
            body,
            buf: Vec::new(),
            eof: false,
            context,
        }
    }

    /// Next value, or `None` once the body ends with nothing pending.
    pub async fn next<T: DeserializeOwned>(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        loop {
            let start = self
                .buf
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buf.len());
            self.buf.drain(..start);

            if !self.buf.is_empty() {
                let parsed = {
                    let mut values =
                        serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
                    values
                        .next()
                        .map(|result| result.map(|value| (value, values.byte_offset())))
                };
                match parsed {
                    Some(Ok((value, consumed))) => {
                        self.buf.drain(..consumed);
                        return Ok(Some(value));
                    }
                    // Incomplete value: wait for more bytes.
                    Some(Err(e)) if e.is_eof() && !self.eof => {}
                    Some(Err(e)) => return Err(Error::decode(self.context, e)),
                    None => {}
                }
            } else if self.eof {
                return Ok(None);
            }

            self.fill(cancel).await?;
        }
    }

    async fn fill(&mut self, cancel: &CancellationToken) -> Result<()> {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = self.body.next() => next,
        };
        match next {
            Some(Ok(bytes)) => self.buf.extend_from_slice(bytes.as_ref()),
            Some(Err(e)) => return Err(Error::transport("read response stream", e)),
            None => self.eof = true,
        }
        Ok(())
    }
}

/// Copies generated text from a `/api/generate` stream into `sink`.
///
/// Ends successfully at a `done` chunk or at end of input; an `error` field
/// ends the stream with an [`ApiError`] carrying status 0.
pub async fn decode_generate<S, B, W>(
    body: S,
    sink: &mut W,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
    W: Write + ?Sized,
{
    let mut stream = JsonStream::new(body, "generate stream decode");
    while let Some(chunk) = stream.next::<GenerateChunk>(cancel).await? {
        if !chunk.error.is_empty() {
            return Err(ApiError::in_stream(GENERATE_ENDPOINT, chunk.error).into());
        }
        if !chunk.response.is_empty() {
            sink.write_all(chunk.response.as_bytes())
                .and_then(|_| sink.flush())
                .map_err(|e| Error::io("write response", e))?;
        }
        if chunk.done {
            debug!("generate stream finished");
            break;
        }
    }
    Ok(())
}

/// Renders a `/api/pull` progress stream into `sink`, one line per chunk.
pub async fn decode_pull<S, B, W>(body: S, sink: &mut W, cancel: &CancellationToken) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
    W: Write + ?Sized,
{
    let mut stream = JsonStream::new(body, "pull stream decode");
    while let Some(chunk) = stream.next::<PullChunk>(cancel).await? {
        if !chunk.error.is_empty() {
            return Err(ApiError::in_stream(PULL_ENDPOINT, chunk.error).into());
        }
        if let Some(line) = progress_line(&chunk) {
            writeln!(sink, "{}", line)
                .and_then(|_| sink.flush())
                .map_err(|e| Error::io("write progress", e))?;
        }
    }
    Ok(())
}

fn progress_line(chunk: &PullChunk) -> Option<String> {
    let status = chunk.status.trim();
    if !chunk.digest.is_empty() && chunk.total > 0 {
        Some(format!(
            "{} {} {}/{}",
            status, chunk.digest, chunk.completed, chunk.total
        ))
    } else if !status.is_empty() {
        Some(status.to_string())
    } else {
        None
    }
}
