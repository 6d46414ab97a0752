//! Capture input: JSON-lines bus event streams.
//!
//! One object per line, tagged with the analyzer's frame type:
//!
//! ```text
//! {"type":"enable","start":0.0,"end":0.0}
//! {"type":"result","start":1.0,"end":1.5,"mosi":"1f","miso":"44"}
//! {"type":"disable","start":2.0,"end":2.0}
//! ```
//!
//! Unrecognized type tags are passed through to the decoder, which reports
//! them as errors.

use std::{
    pin::Pin,
    str::Utf8Error,
    task::{
        Context,
        Poll,
    },
};

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use tokio::io::{
    AsyncRead,
    ReadBuf,
};

use crate::{
    decoder::Decoder,
    event::{
        BusEvent,
        BusEventKind,
        Timestamp,
        Transfer,
    },
    record::Record,
};

const RECEIVE_BUFFER_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
#[error("capture decode error")]
pub enum Error {
    Io(#[from] std::io::Error),
    MaxLineLengthExceeded,
    InvalidEncoding(#[from] Utf8Error),
    InvalidFrame(#[from] serde_json::Error),
    InvalidPayload(#[from] hex::FromHexError),
}

/// One line of the capture format.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    start: f64,
    end: f64,
    #[serde(default)]
    mosi: Option<String>,
    #[serde(default)]
    miso: Option<String>,
}

impl RawFrame {
    fn into_event(self) -> Result<BusEvent, Error> {
        let RawFrame {
            kind,
            start,
            end,
            mosi,
            miso,
        } = self;

        let kind = if kind == "enable" {
            BusEventKind::Enable
        }
        else if kind == "result" {
            BusEventKind::Transfer(Transfer {
                mosi: Bytes::from(hex::decode(mosi.as_deref().unwrap_or_default())?),
                miso: Bytes::from(hex::decode(miso.as_deref().unwrap_or_default())?),
            })
        }
        else if kind == "disable" {
            BusEventKind::Disable
        }
        else if kind == "error" {
            BusEventKind::Error
        }
        else {
            BusEventKind::Other(kind)
        };

        Ok(BusEvent {
            kind,
            start: Timestamp::from_secs(start),
            end: Timestamp::from_secs(end),
        })
    }
}

pub fn parse_line(line: &str) -> Result<BusEvent, Error> {
    let frame: RawFrame = serde_json::from_str(line)?;
    frame.into_event()
}

pin_project! {
    /// Reads JSON-lines capture data into a stream of [`BusEvent`]s.
    #[derive(Debug)]
    pub struct Reader<R> {
        #[pin]
        reader: R,
        receive_buffer: ReceiveBuffer,
    }
}

impl<R: AsyncRead> Reader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            receive_buffer: ReceiveBuffer::default(),
        }
    }
}

impl<R: AsyncRead> Stream for Reader<R> {
    type Item = Result<BusEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let this = self.as_mut().project();

            if let Some(line) = this.receive_buffer.next_line() {
                // empty lines and trailing `\r` from `\r\n` captures are
                // skipped, not errors
                if !line.is_empty() {
                    let result = str::from_utf8(line)
                        .map_err(Error::from)
                        .and_then(parse_line);
                    return Poll::Ready(Some(result));
                }
            }
            else {
                if !this.receive_buffer.prepare_read() {
                    return Poll::Ready(Some(Err(Error::MaxLineLengthExceeded)));
                }

                let mut read_buf =
                    ReadBuf::new(&mut this.receive_buffer.buffer[this.receive_buffer.write_pos..]);
                match this.reader.poll_read(cx, &mut read_buf) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(error)) => return Poll::Ready(Some(Err(error.into()))),
                    Poll::Ready(Ok(())) => {
                        let num_bytes_read = read_buf.filled().len();
                        if num_bytes_read == 0 {
                            return Poll::Ready(None);
                        }

                        this.receive_buffer.write_pos += num_bytes_read;
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct ReceiveBuffer {
    buffer: [u8; RECEIVE_BUFFER_SIZE],
    read_pos: usize,
    write_pos: usize,
}

impl ReceiveBuffer {
    fn next_line(&mut self) -> Option<&[u8]> {
        let newline = self.buffer[self.read_pos..self.write_pos]
            .iter()
            .position(|byte| *byte == b'\n' || *byte == b'\r')?;
        let start = self.read_pos;
        self.read_pos = start + newline + 1;
        Some(&self.buffer[start..start + newline])
    }

    /// Compacts the buffer before the next read. Returns false if the
    /// buffer is full with no line break in sight.
    fn prepare_read(&mut self) -> bool {
        if self.read_pos > 0 {
            self.buffer.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.read_pos = 0;
        }
        self.write_pos < self.buffer.len()
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self {
            buffer: [0; RECEIVE_BUFFER_SIZE],
            read_pos: 0,
            write_pos: 0,
        }
    }
}

pin_project! {
    /// Drives a [`Decoder`] over a stream of bus events.
    #[derive(Debug)]
    pub struct DecodeStream<S> {
        #[pin]
        stream: S,
        decoder: Decoder,
    }
}

impl<S> DecodeStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }
}

impl<S, E> Stream for DecodeStream<S>
where
    S: Stream<Item = Result<BusEvent, E>>,
{
    type Item = Result<Record, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let this = self.as_mut().project();

            match this.stream.poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(Some(Ok(event))) => {
                    // most events decode to nothing; keep polling
                    if let Some(record) = this.decoder.decode(&event) {
                        return Poll::Ready(Some(Ok(record)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::TryStreamExt;

    use crate::{
        capture::{
            DecodeStream,
            Reader,
            parse_line,
        },
        event::BusEventKind,
        record::Record,
    };

    const EXAMPLE: &'static str = r#"{"type":"enable","start":0.0,"end":0.0}
{"type":"result","start":1.0,"end":1.5,"mosi":"1f","miso":"44"}
{"type":"result","start":2.0,"end":2.5,"mosi":"00","miso":"44"}
{"type":"result","start":3.0,"end":3.5,"mosi":"00","miso":"28"}
{"type":"disable","start":4.0,"end":4.0}
"#;

    #[test]
    fn it_parses_capture_lines() {
        let event = parse_line(r#"{"type":"result","start":1.0,"end":1.5,"mosi":"1f","miso":"44"}"#)
            .unwrap();
        match event.kind {
            BusEventKind::Transfer(transfer) => {
                assert_eq!(&transfer.mosi[..], &[0x1F]);
                assert_eq!(&transfer.miso[..], &[0x44]);
            }
            other => panic!("unexpected event kind: {other:?}"),
        }

        let event = parse_line(r#"{"type":"mode-change","start":0.0,"end":0.0}"#).unwrap();
        assert_eq!(event.kind, BusEventKind::Other("mode-change".to_owned()));
    }

    #[tokio::test]
    async fn it_decodes_a_capture_stream() {
        let mut records = DecodeStream::new(Reader::new(EXAMPLE.as_bytes()));

        let mut texts = vec![];
        while let Some(record) = records.try_next().await.unwrap() {
            assert!(matches!(record, Record::Transaction { .. }));
            texts.push(record.text().to_owned());
        }

        assert_eq!(
            texts,
            [
                "Status:M=STDBY_RC,S=Done",
                "Status:M=STDBY_RC,S=Done",
                "GetRssiInst()=-20.0 dBm",
            ]
        );
    }
}
