use std::fmt::{self, Display};

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Chunks(ChunksError),
    InvalidUtf8,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Chunks(err) => write!(f, "{err}"),
            Error::InvalidUtf8 => write!(f, "event stream is not valid UTF-8"),
        }
    }
}

/// Reads the `data` payloads of server-sent events from a chunk stream.
///
/// Only what chat completion endpoints actually send is understood:
/// `data:` fields (several lines of one event are joined by `\n`).
/// Comments and other fields like `event:` or `id:` are skipped, and so
/// are events without data.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
    exhausted: bool,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
            exhausted: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            while let Some(block) = self.take_block() {
                if let Some(data) = parse_block(&block)? {
                    return Ok(Some(data));
                }
            }
            if self.exhausted {
                // A trailing event without the blank line is incomplete
                // and gets dropped.
                return Ok(None);
            }

            match self.chunks.next_chunk().await.map_err(Error::Chunks)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
    }

    /// Takes one complete event block out of the buffer.
    ///
    /// Works on bytes, so a multi-byte character split across two chunks
    /// is reassembled before decoding.
    fn take_block(&mut self) -> Option<Vec<u8>> {
        let (end, sep_len) = find_blank_line(&self.buf)?;
        let block = self.buf[..end].to_vec();
        self.buf.drain(..end + sep_len);
        Some(block)
    }
}

fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    for idx in 0..buf.len() {
        let rest = &buf[idx..];
        if rest.starts_with(b"\r\n\r\n") {
            return Some((idx, 4));
        }
        if rest.starts_with(b"\n\n") {
            return Some((idx, 2));
        }
    }
    None
}

fn parse_block(block: &[u8]) -> Result<Option<String>, Error> {
    let block = std::str::from_utf8(block).map_err(|_| Error::InvalidUtf8)?;
    let mut data: Option<String> = None;
    for line in block.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match &mut data {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => data = Some(value.to_owned()),
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_from(parts: &[&'static [u8]]) -> Sse {
        let chunks = parts.iter().map(|p| Bytes::from_static(*p)).collect();
        Sse::new(Chunks::from_vec_deque(chunks))
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_from(&[b"data: hello\n\n", b"data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_across_chunks() {
        let mut sse = sse_from(&[b"data:", b" hel", b"lo\r\n", b"\r\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);

        // "é" is two bytes and arrives in two chunks.
        let mut sse = sse_from(&[b"data: caf\xc3", b"\xa9\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "café");
    }

    #[tokio::test]
    async fn test_skips_comments_and_other_fields() {
        let mut sse = sse_from(&[
            b": keep-alive\n\n",
            b"event: message\nid: 7\ndata: first\ndata: second\n\n",
            b"retry: 1000\n\n",
            b"data: [DONE]\n\n",
        ]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "first\nsecond");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "[DONE]");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incomplete_and_invalid_data() {
        let mut sse = sse_from(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_from(&[b"data: \xff\xfe\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidUtf8);
    }
}
