//! Header-aware request framing.
//!
//! A request is complete once httparse has accepted the whole head and
//! `Content-Length` further bytes have followed it. Without a
//! `Content-Length` header the body is empty. Framing is incremental and
//! does no I/O, so the blocking and cooperative drivers share it.

use thiserror::Error;

const MAX_HEADERS: usize = 100;

/// Why a request could not be framed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("request head exceeds {0} bytes")]
    HeadersTooLarge(usize),

    #[error("invalid Content-Length '{0}'")]
    InvalidContentLength(String),

    #[error("conflicting Content-Length headers")]
    ConflictingContentLength,

    #[error("declared body of {declared} bytes exceeds limit of {limit}")]
    BodyTooLarge { declared: u64, limit: usize },
}

/// Result of feeding more bytes to a [`RequestFramer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Incomplete,
    /// The first `n` buffered bytes form the whole request.
    Complete(usize),
}

/// Incremental framer over a growing buffer.
#[derive(Debug, Clone)]
pub struct RequestFramer {
    max_header_bytes: usize,
    max_body_bytes: usize,
    header_len: Option<usize>,
    body_len: usize,
}

impl RequestFramer {
    pub fn new(max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            max_header_bytes,
            max_body_bytes,
            header_len: None,
            body_len: 0,
        }
    }

    /// Length of the request head including the terminator, once known.
    pub fn header_len(&self) -> Option<usize> {
        self.header_len
    }

    /// Total request length, once the head has been parsed.
    pub fn expected_len(&self) -> Option<usize> {
        self.header_len.map(|h| h + self.body_len)
    }

    /// Re-examine `buf`, which must extend the buffer passed previously.
    pub fn advance(&mut self, buf: &[u8]) -> Result<FrameStatus, FramingError> {
        if self.header_len.is_none() {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut request = httparse::Request::new(&mut headers);
            match request.parse(buf)? {
                httparse::Status::Complete(header_len) => {
                    if header_len > self.max_header_bytes {
                        return Err(FramingError::HeadersTooLarge(self.max_header_bytes));
                    }
                    self.body_len = self.content_length(request.headers)?;
                    self.header_len = Some(header_len);
                }
                httparse::Status::Partial => {
                    if buf.len() > self.max_header_bytes {
                        return Err(FramingError::HeadersTooLarge(self.max_header_bytes));
                    }
                    return Ok(FrameStatus::Incomplete);
                }
            }
        }

        match self.expected_len() {
            Some(total) if buf.len() >= total => Ok(FrameStatus::Complete(total)),
            _ => Ok(FrameStatus::Incomplete),
        }
    }

    fn content_length(&self, headers: &[httparse::Header<'_>]) -> Result<usize, FramingError> {
        let mut declared: Option<u64> = None;

        for header in headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("content-length"))
        {
            let raw = String::from_utf8_lossy(header.value).trim().to_string();
            // `Content-Length: 5, 5` is legal when every element agrees.
            for item in raw.split(',') {
                let item = item.trim();
                if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(FramingError::InvalidContentLength(raw.clone()));
                }
                let n: u64 = item
                    .parse()
                    .map_err(|_| FramingError::InvalidContentLength(raw.clone()))?;
                match declared {
                    Some(prev) if prev != n => return Err(FramingError::ConflictingContentLength),
                    _ => declared = Some(n),
                }
            }
        }

        let declared = declared.unwrap_or(0);
        if declared > self.max_body_bytes as u64 {
            return Err(FramingError::BodyTooLarge {
                declared,
                limit: self.max_body_bytes,
            });
        }
        Ok(declared as usize)
    }
}

/// Accumulates client bytes until a whole request has been framed.
#[derive(Debug)]
pub struct RequestBuffer {
    buf: Vec<u8>,
    framer: RequestFramer,
}

impl RequestBuffer {
    pub fn new(max_header_bytes: usize, max_body_bytes: usize, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            framer: RequestFramer::new(max_header_bytes, max_body_bytes),
        }
    }

    /// Append freshly read bytes. Returns the request once it is complete;
    /// bytes past the framed request are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>, FramingError> {
        self.buf.extend_from_slice(bytes);
        match self.framer.advance(&self.buf)? {
            FrameStatus::Complete(len) => {
                self.buf.truncate(len);
                Ok(Some(std::mem::take(&mut self.buf)))
            }
            FrameStatus::Incomplete => Ok(None),
        }
    }

    /// The client half-closed. Whatever arrived is forwarded as is; `None`
    /// means nothing arrived at all.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        if self.framer.header_len().is_none() {
            tracing::debug!(bytes = self.buf.len(), "Forwarding unfinished request head as is");
        } else {
            tracing::debug!(
                bytes = self.buf.len(),
                expected = self.framer.expected_len().unwrap_or_default(),
                "Client closed before declared body was complete"
            );
        }
        Some(self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
