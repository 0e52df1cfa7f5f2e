//! Wire framing for the tracking stream.
//!
//! Two disciplines are supported:
//! - [`Framing::Line`]: one record per `\n`-terminated line (default).
//! - [`Framing::Whitespace`]: a flat token stream where every 11 numeric
//!   tokens form a record. This is what older trackers emit (`"%.4f " * 11`
//!   with no terminator).
//!
//! Malformed input is yielded as an `Err` item instead of a codec error, so a
//! bad record never tears down the framed stream.

use bytes::{Buf, BufMut, BytesMut};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::error::MalformedRecord;
use crate::pose::{parse_field, PoseSnapshot, FIELD_COUNT};

/// Default upper bound for a single line or token, in bytes.
pub const DEFAULT_MAX_RECORD_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    #[default]
    Line,
    Whitespace,
}

pub type Decoded = Result<PoseSnapshot, MalformedRecord>;

#[derive(Debug)]
pub struct RecordCodec {
    framing: Framing,
    max_len: usize,
    /// Line mode: bytes already scanned for `\n`.
    next_index: usize,
    /// Dropping an over-long line/token until the next delimiter.
    discarding: bool,
    /// Whitespace mode: fields of the record being assembled.
    pending: Vec<f32>,
    /// Whitespace mode: first defect of the current record. A poisoned record
    /// still consumes all 11 tokens, keeping later records aligned.
    poison: Option<MalformedRecord>,
}

impl RecordCodec {
    pub fn new(framing: Framing, max_len: usize) -> Self {
        Self {
            framing,
            max_len,
            next_index: 0,
            discarding: false,
            pending: Vec::with_capacity(FIELD_COUNT),
            poison: None,
        }
    }

    /// Fill one field slot; a bad slot poisons the record without shortening it.
    fn push_slot(&mut self, value: Result<f32, MalformedRecord>) -> Option<Decoded> {
        match value {
            Ok(v) => self.pending.push(v),
            Err(reason) => {
                self.pending.push(0.0);
                self.poison.get_or_insert(reason);
            }
        }
        if self.pending.len() < FIELD_COUNT {
            return None;
        }

        let mut fields = [0.0f32; FIELD_COUNT];
        fields.copy_from_slice(&self.pending);
        self.pending.clear();
        Some(match self.poison.take() {
            Some(reason) => Err(reason),
            None => Ok(PoseSnapshot::from_fields(fields)),
        })
    }

    fn decode_line(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<Decoded>> {
        loop {
            let read_to = std::cmp::min(self.max_len.saturating_add(1), buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(offset + self.next_index + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = offset + self.next_index;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    if let Some(item) = decode_line_bytes(&line[..end]) {
                        return Ok(Some(item));
                    }
                }
                (false, None) if buf.len() > self.max_len => {
                    self.discarding = true;
                    return Ok(Some(Err(MalformedRecord::TooLong {
                        limit: self.max_len,
                    })));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_tokens(&mut self, buf: &mut BytesMut, eof: bool) -> std::io::Result<Option<Decoded>> {
        loop {
            if self.discarding {
                match buf.iter().position(u8::is_ascii_whitespace) {
                    Some(end) => {
                        buf.advance(end);
                        self.discarding = false;
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
            }

            let Some(start) = buf.iter().position(|b| !b.is_ascii_whitespace()) else {
                buf.clear();
                if eof && !self.pending.is_empty() {
                    let found = self.pending.len();
                    self.pending.clear();
                    self.poison = None;
                    return Ok(Some(Err(MalformedRecord::WrongArity { found })));
                }
                return Ok(None);
            };
            buf.advance(start);

            let end = match buf.iter().position(u8::is_ascii_whitespace) {
                Some(end) => end,
                None if eof => buf.len(),
                None if buf.len() > self.max_len => {
                    // the rest of the token is skipped by the discarding branch
                    self.discarding = true;
                    buf.clear();
                    let reason = MalformedRecord::TooLong {
                        limit: self.max_len,
                    };
                    if let Some(item) = self.push_slot(Err(reason)) {
                        return Ok(Some(item));
                    }
                    continue;
                }
                // token may continue in the next read
                None => return Ok(None),
            };

            let token = buf.split_to(end);
            let value = std::str::from_utf8(&token)
                .ok()
                .and_then(parse_field)
                .ok_or_else(|| MalformedRecord::InvalidNumber {
                    token: String::from_utf8_lossy(&token).into_owned(),
                });
            if let Some(item) = self.push_slot(value) {
                return Ok(Some(item));
            }
        }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(Framing::Line, DEFAULT_MAX_RECORD_LEN)
    }
}

/// `None` for blank lines, which are skipped silently.
fn decode_line_bytes(line: &[u8]) -> Option<Decoded> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(_) => return Some(Err(MalformedRecord::InvalidUtf8)),
    };
    if text.split_ascii_whitespace().next().is_none() {
        return None;
    }
    Some(text.parse())
}

impl Decoder for RecordCodec {
    type Item = Decoded;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::Line => self.decode_line(buf),
            Framing::Whitespace => self.decode_tokens(buf, false),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::Line => {
                if let Some(item) = self.decode_line(buf)? {
                    return Ok(Some(item));
                }
                // unterminated last line
                let rest = buf.split_to(buf.len());
                self.next_index = 0;
                if std::mem::take(&mut self.discarding) {
                    return Ok(None);
                }
                Ok(decode_line_bytes(&rest))
            }
            Framing::Whitespace => self.decode_tokens(buf, true),
        }
    }
}

/// Writes records with the tracker's fixed 4-decimal format.
impl Encoder<PoseSnapshot> for RecordCodec {
    type Error = std::io::Error;

    fn encode(&mut self, pose: PoseSnapshot, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = match self.framing {
            Framing::Line => format!("{:.4}\n", pose),
            Framing::Whitespace => format!("{:.4} ", pose),
        };
        dst.reserve(text.len());
        dst.put_slice(text.as_bytes());
        Ok(())
    }
}

pub type RecordStream<R> = FramedRead<R, RecordCodec>;
pub type RecordSink<W> = FramedWrite<W, RecordCodec>;

/// Wrap a reader in a record decoder.
pub fn record_stream<R: AsyncRead>(reader: R, framing: Framing, max_len: usize) -> RecordStream<R> {
    FramedRead::new(reader, RecordCodec::new(framing, max_len))
}

/// Wrap a writer in a record encoder.
pub fn record_sink<W: AsyncWrite>(writer: W, framing: Framing) -> RecordSink<W> {
    FramedWrite::new(writer, RecordCodec::new(framing, DEFAULT_MAX_RECORD_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "0 0 0 0.35 0.35 0.5 0.5 0.5 0.5 0.2 70";

    fn decode_all(codec: &mut RecordCodec, input: &[u8]) -> Vec<Decoded> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            out.push(item);
        }
        while let Some(item) = codec.decode_eof(&mut buf).unwrap() {
            out.push(item);
        }
        out
    }

    fn line_codec() -> RecordCodec {
        RecordCodec::new(Framing::Line, DEFAULT_MAX_RECORD_LEN)
    }

    #[test]
    fn test_line_coalesced_records() {
        let input = format!("{GOOD}\n{GOOD}\n");
        let out = decode_all(&mut line_codec(), input.as_bytes());
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_line_fragmented_record() {
        let mut codec = line_codec();
        let mut buf = BytesMut::from(&GOOD.as_bytes()[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&GOOD.as_bytes()[10..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        let pose = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(pose.mouth_distance, 70.0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_malformed_then_good() {
        let input = format!("1 2 3\nfoo 1 2 3 4 5 6 7 8 9 10\n1 2 3 4 5\n{GOOD}\n");
        let out = decode_all(&mut line_codec(), input.as_bytes());
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Err(MalformedRecord::WrongArity { found: 3 }));
        assert!(matches!(out[1], Err(MalformedRecord::InvalidNumber { .. })));
        assert!(out[2].is_err());
        assert_eq!(out[3].as_ref().unwrap().ear_left, 0.35);
    }

    #[test]
    fn test_line_blank_and_crlf() {
        let input = format!("\n   \n{GOOD}\r\n");
        let out = decode_all(&mut line_codec(), input.as_bytes());
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
    }

    #[test]
    fn test_line_invalid_utf8() {
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(GOOD.as_bytes());
        input.push(b'\n');
        let out = decode_all(&mut line_codec(), &input);
        assert_eq!(out[0], Err(MalformedRecord::InvalidUtf8));
        assert!(out[1].is_ok());
    }

    #[test]
    fn test_line_too_long_is_dropped() {
        let mut codec = RecordCodec::new(Framing::Line, 64);
        let input = format!("{}\n{GOOD}\n", "1".repeat(200));
        let out = decode_all(&mut codec, input.as_bytes());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Err(MalformedRecord::TooLong { limit: 64 }));
        assert!(out[1].is_ok());
    }

    #[test]
    fn test_line_unterminated_at_eof() {
        let out = decode_all(&mut line_codec(), GOOD.as_bytes());
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
    }

    #[test]
    fn test_whitespace_legacy_stream() {
        // older trackers write "%.4f " * 11 with no newline
        let pose = PoseSnapshot::from_fields([1.0, 2.0, 3.0, 0.3, 0.31, 0.4, 0.5, 0.6, 0.7, 0.2, 65.0]);
        let one = format!("{:.4} ", pose);
        let input = format!("{one}{one}");
        let mut codec = RecordCodec::new(Framing::Whitespace, DEFAULT_MAX_RECORD_LEN);
        let out = decode_all(&mut codec, input.as_bytes());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), &pose);
        assert_eq!(out[1].as_ref().unwrap(), &pose);
    }

    #[test]
    fn test_whitespace_token_split_across_reads() {
        let mut codec = RecordCodec::new(Framing::Whitespace, DEFAULT_MAX_RECORD_LEN);
        let mut buf = BytesMut::from("1 2 3 4 5 6 7 8 9 10 7");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"0.5 ");
        let pose = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(pose.mouth_distance, 70.5);
    }

    #[test]
    fn test_whitespace_bad_token_keeps_alignment() {
        // a NaN estimate printed by the tracker mid-record
        let good = PoseSnapshot::from_fields([1.0, 2.0, 3.0, 0.3, 0.31, 0.4, 0.5, 0.6, 0.7, 0.2, 65.0]);
        let bad = "1.0000 2.0000 nan 0.3000 0.3100 0.4000 0.5000 0.6000 0.7000 0.2000 65.0000 ";
        let input = format!("{bad}{0}{0}{0}", format!("{:.4} ", good));
        let mut codec = RecordCodec::new(Framing::Whitespace, DEFAULT_MAX_RECORD_LEN);
        let out = decode_all(&mut codec, input.as_bytes());

        assert_eq!(out.len(), 4);
        assert_eq!(
            out[0],
            Err(MalformedRecord::InvalidNumber {
                token: "nan".to_string()
            })
        );
        for item in &out[1..] {
            assert_eq!(item.as_ref().unwrap(), &good);
        }
    }

    #[test]
    fn test_whitespace_several_bad_tokens_report_first() {
        let input = format!("x 2 3 4 5 6 7 8 y 10 11 {GOOD} ");
        let mut codec = RecordCodec::new(Framing::Whitespace, DEFAULT_MAX_RECORD_LEN);
        let out = decode_all(&mut codec, input.as_bytes());
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0],
            Err(MalformedRecord::InvalidNumber {
                token: "x".to_string()
            })
        );
        assert_eq!(out[1].as_ref().unwrap().mouth_distance, 70.0);
    }

    #[test]
    fn test_whitespace_too_long_token_keeps_alignment() {
        let mut codec = RecordCodec::new(Framing::Whitespace, 16);
        let mut buf = BytesMut::from("1 2 3 4 5 ");
        buf.extend_from_slice("9".repeat(40).as_bytes());
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(format!("999 7 8 9 10 11 {GOOD} ").as_bytes());
        let mut out = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            out.push(item);
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Err(MalformedRecord::TooLong { limit: 16 }));
        assert_eq!(out[1].as_ref().unwrap().mouth_distance, 70.0);
    }

    #[test]
    fn test_whitespace_partial_at_eof() {
        let mut codec = RecordCodec::new(Framing::Whitespace, DEFAULT_MAX_RECORD_LEN);
        let out = decode_all(&mut codec, b"1 2 3 4");
        assert_eq!(out, vec![Err(MalformedRecord::WrongArity { found: 4 })]);
    }

    #[test]
    fn test_encode_line() {
        let mut codec = line_codec();
        let mut dst = BytesMut::new();
        codec.encode(PoseSnapshot::neutral(), &mut dst).unwrap();
        let text = std::str::from_utf8(&dst).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.split_ascii_whitespace().count(), FIELD_COUNT);
    }
}
