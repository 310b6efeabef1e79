/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Delimiter/depth framing of raw byte streams.
//!
//! A frame starts at an open delimiter seen at depth 0 and ends at the close
//! delimiter that brings the depth back to 0.  Everything between frames is
//! noise and is skipped.  Frames of [`MIN_FRAME_LEN`] bytes or less (`{}`) are
//! discarded.
//!
//! For JSON the scanner also tracks string literals once inside a frame, so
//! a `}` inside `"message":"a } b"` does not close the frame early.  String
//! tracking only starts at depth > 0: a stray quote in the noise between
//! frames cannot swallow the next frame.
//!
//! Two entry points share one scanner:
//! * [`split_frames`]: a complete buffer, accumulate-then-frame.
//! * [`StreamFramer`]: incremental, for live transports; keeps an unfinished
//!   frame between pushes.
//!
//! [`read_available`] is the accumulate half: it drains whatever a reader has
//! to offer right now.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Frames must be strictly longer than this to be returned.
pub const MIN_FRAME_LEN: usize = 2;

const READ_CHUNK: usize = 4096;

// ── Delimiters ────────────────────────────────────────────────────────────────

/// Open/close bytes of a frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub open: u8,
    pub close: u8,
    /// Skip over `"..."` literals (with `\` escapes) while inside a frame.
    pub quoted_strings: bool,
}

impl Delimiters {
    /// JSON object framing: `{ ... }` with string literals.
    pub const JSON: Delimiters = Delimiters {
        open: b'{',
        close: b'}',
        quoted_strings: true,
    };
}

// ── Scanner ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Scanner {
    delims: Delimiters,
    depth: usize,
    start: usize,
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    fn new(delims: Delimiters) -> Self {
        Self {
            delims,
            depth: 0,
            start: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Feed the byte at `index`.  Returns the start index of the frame that
    /// this byte closes, if any.
    fn step(&mut self, index: usize, byte: u8) -> Option<usize> {
        if self.depth > 0 && self.delims.quoted_strings {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                return None;
            }
            if byte == b'"' {
                self.in_string = true;
                return None;
            }
        }

        if byte == self.delims.open {
            if self.depth == 0 {
                self.start = index;
            }
            self.depth += 1;
        } else if byte == self.delims.close && self.depth > 0 {
            self.depth -= 1;
            if self.depth == 0 {
                return Some(self.start);
            }
        }
        None
    }
}

// ── Whole-buffer framing ──────────────────────────────────────────────────────

/// Split `buffer` into complete frames, in order.
///
/// An unterminated frame at the end of the buffer is not returned.
pub fn split_frames(buffer: &[u8], delims: Delimiters) -> Vec<&[u8]> {
    let mut scanner = Scanner::new(delims);
    let mut frames = Vec::new();
    for (index, &byte) in buffer.iter().enumerate() {
        if let Some(start) = scanner.step(index, byte) {
            let frame = &buffer[start..=index];
            if frame.len() > MIN_FRAME_LEN {
                frames.push(frame);
            }
        }
    }
    frames
}

// ── Incremental framing ───────────────────────────────────────────────────────

/// Incremental framer for a live byte stream.
#[derive(Debug, Clone)]
pub struct StreamFramer {
    buffer: Vec<u8>,
    scanned: usize,
    scanner: Scanner,
}

impl StreamFramer {
    pub fn new(delims: Delimiters) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            scanner: Scanner::new(delims),
        }
    }

    /// Append `bytes` and return every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        for index in self.scanned..self.buffer.len() {
            if let Some(start) = self.scanner.step(index, self.buffer[index]) {
                if index + 1 - start > MIN_FRAME_LEN {
                    frames.push(self.buffer[start..=index].to_vec());
                }
            }
        }

        // Keep only the unfinished frame, if one is open.
        let keep_from = if self.scanner.depth > 0 {
            self.scanner.start
        } else {
            self.buffer.len()
        };
        self.buffer.drain(..keep_from);
        self.scanner.start -= keep_from.min(self.scanner.start);
        self.scanned = self.buffer.len();

        frames
    }

    /// Bytes held for a frame that has not closed yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// Drain everything `reader` can deliver right now.
///
/// Reads until the source reaches EOF or a read stays idle for `idle`,
/// giving a writer on the other end time to catch up between chunks.
///
/// Returns `Ok(None)` when the source was already exhausted on entry.
pub async fn read_available<R>(reader: &mut R, idle: Duration) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut saw_data = false;

    loop {
        match tokio::time::timeout(idle, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                if !saw_data {
                    return Ok(None);
                }
                break;
            }
            Ok(Ok(n)) => {
                out.extend_from_slice(&chunk[..n]);
                saw_data = true;
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(e),
            // idle
            Err(_) => break,
        }
    }
    Ok(Some(out))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn frames(buffer: &[u8]) -> Vec<String> {
        split_frames(buffer, Delimiters::JSON)
            .into_iter()
            .map(|f| String::from_utf8(f.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn nested_frames_are_one_frame() {
        assert_eq!(
            frames(br#"xx{"a":{"b":{}}}yy{"c":1}"#),
            vec![r#"{"a":{"b":{}}}"#, r#"{"c":1}"#]
        );
    }

    #[test]
    fn short_frames_are_discarded() {
        assert_eq!(frames(b"{}{ }{a}"), vec!["{ }", "{a}"]);
        assert!(frames(b"{}{}").is_empty());
    }

    #[test]
    fn delimiters_inside_strings_do_not_count() {
        assert_eq!(
            frames(br#"{"m":"a } b { c"}{"e":"q\"}"}"#),
            vec![r#"{"m":"a } b { c"}"#, r#"{"e":"q\"}"}"#]
        );
    }

    #[test]
    fn quotes_in_noise_are_ignored() {
        assert_eq!(frames(br#"he said "hi {"k":1}"#), vec![r#"{"k":1}"#]);
    }

    #[test]
    fn stray_close_and_unterminated_tail() {
        assert_eq!(frames(br#"}}{"a":1}{"b":"#), vec![r#"{"a":1}"#]);
    }

    #[test]
    fn stream_framer_joins_split_frames() {
        let mut framer = StreamFramer::new(Delimiters::JSON);
        assert!(framer.push(br#"noise {"typeKey":1,"ver"#).is_empty());
        assert!(framer.pending() > 0);
        let out = framer.push(br#"sion":"1"}{"typeKey":3}tail"#);
        assert_eq!(
            out,
            vec![
                br#"{"typeKey":1,"version":"1"}"#.to_vec(),
                br#"{"typeKey":3}"#.to_vec()
            ]
        );
        assert_eq!(framer.pending(), 0);
        assert!(framer.push(b"").is_empty());
    }

    #[test]
    fn stream_framer_byte_at_a_time() {
        let input = br#"{"m":"}"}..{"n":{"o":2}}"#;
        let mut framer = StreamFramer::new(Delimiters::JSON);
        let mut out = Vec::new();
        for b in input.iter() {
            out.extend(framer.push(std::slice::from_ref(b)));
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], br#"{"m":"}"}"#.to_vec());
        assert_eq!(out[1], br#"{"n":{"o":2}}"#.to_vec());
    }

    #[tokio::test]
    async fn read_available_on_exhausted_source_is_none() {
        let mut empty = tokio::io::empty();
        let got = read_available(&mut empty, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn read_available_reads_to_eof() {
        let mut src: &[u8] = b"{\"typeKey\":1}";
        let got = read_available(&mut src, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"{\"typeKey\":1}"[..]));
    }

    #[tokio::test]
    async fn read_available_stops_when_writer_goes_quiet() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        tx.write_all(b"abc").await.unwrap();
        tx.write_all(b"def").await.unwrap();

        let got = read_available(&mut rx, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"abcdef"[..]));

        // Writer still open but silent: an empty, non-None read.
        let got = read_available(&mut rx, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b""[..]));
        drop(tx);
    }
}
