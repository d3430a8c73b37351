use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Terminates every frame on the wire.
pub const FRAME_DELIMITER: &[u8] = b"\n\n";
/// Prefix of the payload line inside a frame.
pub const DATA_MARKER: &str = "data: ";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("frame data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stateful reassembly buffer.
///
/// Network reads never line up with frame boundaries, so bytes are buffered
/// until a delimiter arrives. Only bytes before a delimiter ever leave the
/// buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Offset up to which the buffer is known to contain no delimiter.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            // A delimiter may straddle the previous scan boundary.
            let start = self.scanned.saturating_sub(FRAME_DELIMITER.len() - 1);
            let found = self.buffer[start..]
                .windows(FRAME_DELIMITER.len())
                .position(|window| window == FRAME_DELIMITER);

            match found {
                Some(offset) => {
                    let frame = self.buffer.split_to(start + offset).freeze();
                    self.buffer.advance(FRAME_DELIMITER.len());
                    self.scanned = 0;
                    if !frame.is_empty() {
                        frames.push(frame);
                    }
                }
                None => {
                    self.scanned = self.buffer.len();
                    return frames;
                }
            }
        }
    }

    /// Bytes still waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Parses one complete frame.
///
/// Returns `Ok(None)` for frames without a data line (keep-alive comments,
/// bare `id:` frames). Multiple data lines are joined with `\n`.
pub fn parse_frame(frame: &[u8]) -> Result<Option<serde_json::Value>, FrameError> {
    let text = std::str::from_utf8(frame)?;

    let mut data: Option<String> = None;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let payload = line
            .strip_prefix(DATA_MARKER)
            .or_else(|| line.strip_prefix("data:"));

        if let Some(payload) = payload {
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(payload);
                }
                None => data = Some(payload.to_string()),
            }
        }
    }

    match data {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}
