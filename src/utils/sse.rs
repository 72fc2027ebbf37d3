//! Bounded parsing of `data:` events from a provider SSE body.

use futures_util::TryStreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use crate::{FableError, Result};

#[derive(Clone, Copy, Debug)]
pub struct SseLimits {
    pub max_line_bytes: usize,
    pub max_event_bytes: usize,
}

impl Default for SseLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 256 * 1024,
            max_event_bytes: 4 * 1024 * 1024,
        }
    }
}

async fn read_line_limited<R>(reader: &mut R, line: &mut Vec<u8>, max_bytes: usize) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    line.clear();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(!line.is_empty());
        }

        let newline = buf.iter().position(|b| *b == b'\n');
        let take = newline.map(|pos| pos + 1).unwrap_or(buf.len());
        if line.len().saturating_add(take) > max_bytes {
            return Err(FableError::InvalidResponse(format!(
                "SSE line exceeds max_line_bytes={max_bytes}"
            )));
        }

        line.extend_from_slice(&buf[..take]);
        reader.consume(take);
        if newline.is_some() {
            return Ok(true);
        }
    }
}

/// Reads lines until a blank line flushes the accumulated `data:` payload.
/// Returns `None` at end of input or on the `[DONE]` sentinel.
async fn next_data_event<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    event: &mut String,
    limits: SseLimits,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    event.clear();

    loop {
        if !read_line_limited(reader, line, limits.max_line_bytes).await? {
            if event.is_empty() {
                return Ok(None);
            }
            return Ok(Some(std::mem::take(event)));
        }

        let text = std::str::from_utf8(line)
            .map_err(|err| FableError::InvalidResponse(format!("invalid SSE UTF-8: {err}")))?;
        let text = text.trim_end_matches(['\r', '\n']);

        if text.is_empty() {
            if event.is_empty() {
                continue;
            }
            if event == "[DONE]" {
                return Ok(None);
            }
            return Ok(Some(std::mem::take(event)));
        }

        let Some(data) = text.strip_prefix("data:") else {
            // Comments and non-data fields are skipped.
            continue;
        };
        let data = data.trim_start();

        let separator = usize::from(!event.is_empty());
        if event.len().saturating_add(separator).saturating_add(data.len()) > limits.max_event_bytes
        {
            return Err(FableError::InvalidResponse(format!(
                "SSE event exceeds max_event_bytes={}",
                limits.max_event_bytes
            )));
        }
        if separator == 1 {
            event.push('\n');
        }
        event.push_str(data);
    }
}

pub fn data_stream_from_reader<R>(reader: R, limits: SseLimits) -> BoxStream<'static, Result<String>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    Box::pin(stream::try_unfold(
        (reader, Vec::new(), String::new(), limits),
        |(mut reader, mut line, mut event, limits)| async move {
            match next_data_event(&mut reader, &mut line, &mut event, limits).await? {
                Some(data) => Ok(Some((data, (reader, line, event, limits)))),
                None => Ok(None),
            }
        },
    ))
}

pub fn data_stream_from_response(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
    data_stream_from_reader(reader, SseLimits::default())
}
