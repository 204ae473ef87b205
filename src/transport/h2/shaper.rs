//! Write-side HTTP/2 frame shaper.
//!
//! The `h2` engine has no notion of stream priority. The shaper sits between
//! the engine and the socket, parses outgoing frame headers, and
//!
//! - injects the template's PRIORITY frames once, right after the opening
//!   SETTINGS (and the connection WINDOW_UPDATE if it follows directly);
//! - stamps the template's priority onto HEADERS frames that carry none.
//!
//! Everything else is forwarded byte for byte.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::fingerprint::http2::{PriorityFrame, PriorityParam};

const PREFACE_LEN: usize = 24;
const FRAME_HEADER_SIZE: usize = 9;
const PRIORITY_BLOCK_LEN: usize = 5;
/// Smallest SETTINGS_MAX_FRAME_SIZE a peer may advertise.
const MIN_MAX_FRAME_SIZE: usize = 16_384;
const HIGH_WATER: usize = 64 * 1024;

const TYPE_HEADERS: u8 = 0x1;
const TYPE_PRIORITY: u8 = 0x2;
const TYPE_SETTINGS: u8 = 0x4;
const TYPE_WINDOW_UPDATE: u8 = 0x8;
const FLAG_ACK: u8 = 0x1;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitSettings,
    AfterSettings,
    InWindowUpdate,
    Done,
}

/// `AsyncWrite` wrapper that rewrites the engine's output frames.
pub struct FrameShaper<S> {
    inner: S,
    priority: Option<PriorityParam>,
    priority_frames: Vec<PriorityFrame>,
    preface_left: usize,
    header: [u8; FRAME_HEADER_SIZE],
    header_len: usize,
    payload_left: usize,
    phase: Phase,
    out: BytesMut,
}

impl<S> FrameShaper<S> {
    pub fn new(
        inner: S,
        priority: Option<PriorityParam>,
        priority_frames: Vec<PriorityFrame>,
    ) -> Self {
        Self {
            inner,
            priority,
            priority_frames,
            preface_left: PREFACE_LEN,
            header: [0; FRAME_HEADER_SIZE],
            header_len: 0,
            payload_left: 0,
            phase: Phase::AwaitSettings,
            out: BytesMut::with_capacity(4096),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Parse `buf` and append the shaped bytes to the output buffer.
    fn shape(&mut self, mut buf: &[u8]) {
        while !buf.is_empty() {
            if self.preface_left > 0 {
                let n = self.preface_left.min(buf.len());
                self.out.extend_from_slice(&buf[..n]);
                self.preface_left -= n;
                buf = &buf[n..];
                continue;
            }

            if self.payload_left > 0 {
                let n = self.payload_left.min(buf.len());
                self.out.extend_from_slice(&buf[..n]);
                self.payload_left -= n;
                buf = &buf[n..];
                if self.payload_left == 0 {
                    self.frame_complete();
                }
                continue;
            }

            let n = (FRAME_HEADER_SIZE - self.header_len).min(buf.len());
            self.header[self.header_len..self.header_len + n].copy_from_slice(&buf[..n]);
            self.header_len += n;
            buf = &buf[n..];
            if self.header_len == FRAME_HEADER_SIZE {
                self.header_len = 0;
                self.on_header();
            }
        }
    }

    fn on_header(&mut self) {
        let h = self.header;
        let length = ((h[0] as usize) << 16) | ((h[1] as usize) << 8) | h[2] as usize;
        let frame_type = h[3];
        let flags = h[4];
        let stream_id = u32::from_be_bytes([h[5] & 0x7f, h[6], h[7], h[8]]);

        match self.phase {
            Phase::AfterSettings if frame_type == TYPE_WINDOW_UPDATE && stream_id == 0 => {
                self.phase = Phase::InWindowUpdate;
            }
            Phase::AfterSettings => self.inject_priority_frames(),
            _ => {}
        }

        let stamp = frame_type == TYPE_HEADERS
            && flags & (FLAG_PRIORITY | FLAG_PADDED) == 0
            && length + PRIORITY_BLOCK_LEN <= MIN_MAX_FRAME_SIZE;
        match self.priority {
            Some(priority) if stamp => {
                let length = length + PRIORITY_BLOCK_LEN;
                self.out.put_u8((length >> 16) as u8);
                self.out.put_u8((length >> 8) as u8);
                self.out.put_u8(length as u8);
                self.out.put_u8(frame_type);
                self.out.put_u8(flags | FLAG_PRIORITY);
                self.out.extend_from_slice(&h[5..]);
                put_priority(&mut self.out, priority);
                tracing::trace!("stamped priority on HEADERS for stream {}", stream_id);
            }
            _ => self.out.extend_from_slice(&h),
        }

        if self.phase == Phase::AwaitSettings && frame_type == TYPE_SETTINGS && flags & FLAG_ACK == 0
        {
            self.phase = Phase::AfterSettings;
        }

        self.payload_left = length;
        if length == 0 {
            self.frame_complete();
        }
    }

    fn frame_complete(&mut self) {
        if self.phase == Phase::InWindowUpdate {
            self.inject_priority_frames();
        }
    }

    fn inject_priority_frames(&mut self) {
        for frame in &self.priority_frames {
            self.out.put_u8(0);
            self.out.put_u8(0);
            self.out.put_u8(PRIORITY_BLOCK_LEN as u8);
            self.out.put_u8(TYPE_PRIORITY);
            self.out.put_u8(0);
            self.out.put_u32(frame.stream_id & 0x7fff_ffff);
            put_priority(&mut self.out, frame.priority);
        }
        if !self.priority_frames.is_empty() {
            tracing::trace!("injected {} PRIORITY frames", self.priority_frames.len());
        }
        self.phase = Phase::Done;
    }

    /// At a frame boundary, nothing else will follow SETTINGS before a flush.
    fn inject_on_flush(&mut self) {
        let at_boundary = self.header_len == 0 && self.payload_left == 0;
        if self.phase == Phase::AfterSettings && at_boundary {
            self.inject_priority_frames();
        }
    }
}

fn put_priority(out: &mut BytesMut, priority: PriorityParam) {
    let dependency = if priority.exclusive {
        priority.stream_dependency | 0x8000_0000
    } else {
        priority.stream_dependency & 0x7fff_ffff
    };
    out.put_u32(dependency);
    out.put_u8(priority.weight);
}

impl<S: AsyncWrite + Unpin> FrameShaper<S> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.out.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.out))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.out.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FrameShaper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FrameShaper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.out.len() >= HIGH_WATER {
            ready!(this.poll_drain(cx))?;
        }
        this.shape(buf);
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.inject_on_flush();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

    fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let len = payload.len();
        let mut out = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, frame_type, flags];
        out.extend_from_slice(&stream_id.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn priority_frame(stream_id: u32, dependency: u32, weight: u8) -> Vec<u8> {
        let mut payload = dependency.to_be_bytes().to_vec();
        payload.push(weight);
        frame(TYPE_PRIORITY, 0, stream_id, &payload)
    }

    fn engine_output() -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
        let settings = frame(TYPE_SETTINGS, 0, 0, &[0, 1, 0, 1, 0, 0]);
        let window = frame(TYPE_WINDOW_UPDATE, 0, 0, &12_517_377u32.to_be_bytes());
        let headers = frame(TYPE_HEADERS, 0x4, 1, b"hpack");
        let mut all = PREFACE.to_vec();
        all.extend_from_slice(&settings);
        all.extend_from_slice(&window);
        all.extend_from_slice(&headers);
        (all, settings, window, headers)
    }

    #[tokio::test]
    async fn test_injects_after_window_update_and_stamps_headers() {
        let (input, settings, window, _) = engine_output();
        let frames = vec![PriorityFrame::new(3, 0, 200), PriorityFrame::new(5, 0, 100)];
        let priority = PriorityParam::new(13, false, 41);
        let mut shaper = FrameShaper::new(Vec::new(), Some(priority), frames);

        // One byte at a time to cross every boundary.
        for byte in &input {
            shaper.write_all(std::slice::from_ref(byte)).await.unwrap();
        }
        shaper.flush().await.unwrap();
        let out = shaper.into_inner();

        let mut expected = PREFACE.to_vec();
        expected.extend_from_slice(&settings);
        expected.extend_from_slice(&window);
        expected.extend_from_slice(&priority_frame(3, 0, 200));
        expected.extend_from_slice(&priority_frame(5, 0, 100));
        let mut stamped = 13u32.to_be_bytes().to_vec();
        stamped.push(41);
        stamped.extend_from_slice(b"hpack");
        expected.extend_from_slice(&frame(TYPE_HEADERS, 0x4 | FLAG_PRIORITY, 1, &stamped));
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_injects_on_flush_without_window_update() {
        let settings = frame(TYPE_SETTINGS, 0, 0, &[]);
        let mut input = PREFACE.to_vec();
        input.extend_from_slice(&settings);

        let mut shaper = FrameShaper::new(Vec::new(), None, vec![PriorityFrame::new(3, 0, 200)]);
        shaper.write_all(&input).await.unwrap();
        shaper.flush().await.unwrap();

        // A SETTINGS ACK later must not trigger a second injection.
        shaper
            .write_all(&frame(TYPE_SETTINGS, FLAG_ACK, 0, &[]))
            .await
            .unwrap();
        shaper.flush().await.unwrap();
        let out = shaper.into_inner();

        let mut expected = input.clone();
        expected.extend_from_slice(&priority_frame(3, 0, 200));
        expected.extend_from_slice(&frame(TYPE_SETTINGS, FLAG_ACK, 0, &[]));
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_exclusive_priority_and_padded_headers_untouched() {
        let (mut input, settings, window, _) = engine_output();
        input.truncate(PREFACE.len() + settings.len() + window.len());
        let padded = frame(TYPE_HEADERS, 0x4 | FLAG_PADDED, 3, &[0, b'x']);
        let plain = frame(TYPE_HEADERS, 0x4, 5, b"y");
        input.extend_from_slice(&padded);
        input.extend_from_slice(&plain);

        let mut shaper = FrameShaper::new(Vec::new(), Some(PriorityParam::new(0, true, 255)), vec![]);
        shaper.write_all(&input).await.unwrap();
        shaper.flush().await.unwrap();
        let out = shaper.into_inner();

        let tail = &out[PREFACE.len() + settings.len() + window.len()..];
        assert_eq!(&tail[..padded.len()], &padded[..]);
        let stamped = &tail[padded.len()..];
        assert_eq!(stamped[2], 6);
        assert_eq!(stamped[4], 0x4 | FLAG_PRIORITY);
        assert_eq!(&stamped[9..14], &[0x80, 0, 0, 0, 255]);
        assert_eq!(&stamped[14..], b"y");
    }
}
