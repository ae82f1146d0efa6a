//! Outgoing message framing: transparent splitting of large messages and
//! caller-driven manual fragmentation.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::MessageKind;
use crate::protocol::{Frame, OpCode};

/// Iterator slicing one payload into frames of at most `chunk` bytes.
///
/// The first frame carries `opcode` and the reserved bits, the rest are
/// plain continuations. Only the last frame carries `fin`. An empty payload
/// still yields one frame.
struct Slices {
    payload: Bytes,
    opcode: OpCode,
    chunk: usize,
    fin: bool,
    rsv: u8,
    first: bool,
}

impl Iterator for Slices {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.payload.is_empty() && !self.first {
            return None;
        }
        let take = self.payload.len().min(self.chunk);
        let part = self.payload.split_to(take);
        let (opcode, rsv) = if self.first {
            self.first = false;
            (self.opcode, self.rsv)
        } else {
            (OpCode::Continuation, 0)
        };
        let fin = self.fin && self.payload.is_empty();
        Some(Frame::new(fin, opcode, part).with_rsv(rsv))
    }
}

/// Per-connection outgoing fragmentation state.
#[derive(Debug, Clone)]
pub struct OutgoingFrameSplitter {
    max_frame_size: usize,
    split_large_frames: bool,
    in_progress: Option<MessageKind>,
}

impl OutgoingFrameSplitter {
    #[must_use]
    pub fn new(max_frame_size: usize, split_large_frames: bool) -> Self {
        Self {
            max_frame_size: max_frame_size.max(1),
            split_large_frames,
            in_progress: None,
        }
    }

    /// Kind of the manually fragmented message still open, if any.
    #[must_use]
    pub fn in_progress(&self) -> Option<MessageKind> {
        self.in_progress
    }

    /// Frames for one complete message.
    ///
    /// # Errors
    ///
    /// - [`Error::IllegalState`] while a manual fragment sequence is open
    /// - [`Error::OutgoingFrameTooLarge`] for an oversize payload when
    ///   splitting is disabled
    pub fn split_message(&self, kind: MessageKind, payload: Bytes) -> Result<Vec<Frame>> {
        if let Some(open) = self.in_progress {
            return Err(Error::IllegalState(format!(
                "cannot send a {kind} message while a fragmented {open} message is in progress"
            )));
        }
        self.slice(kind.opcode(), payload, true, 0)
    }

    /// Frames for one caller-supplied fragment.
    ///
    /// The first fragment of a sequence carries the message opcode, the
    /// rest are continuations. The sequence stays open until a fragment with
    /// `fin` set succeeds. A rejected fragment leaves the state unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::IllegalState`] when `kind` differs from the open sequence
    /// - [`Error::OutgoingFrameTooLarge`] as for [`Self::split_message`]
    pub fn fragment(
        &mut self,
        kind: MessageKind,
        payload: Bytes,
        fin: bool,
        rsv: u8,
    ) -> Result<Vec<Frame>> {
        let opcode = match self.in_progress {
            None => kind.opcode(),
            Some(open) if open == kind => OpCode::Continuation,
            Some(open) => {
                return Err(Error::IllegalState(format!(
                    "cannot send a {kind} fragment while a fragmented {open} message is in progress"
                )));
            }
        };
        let frames = self.slice(opcode, payload, fin, rsv)?;
        self.in_progress = if fin { None } else { Some(kind) };
        Ok(frames)
    }

    /// Forget an open sequence, e.g. once the connection is gone.
    pub fn reset(&mut self) {
        self.in_progress = None;
    }

    fn slice(&self, opcode: OpCode, payload: Bytes, fin: bool, rsv: u8) -> Result<Vec<Frame>> {
        if payload.len() > self.max_frame_size && !self.split_large_frames {
            return Err(Error::OutgoingFrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        Ok(Slices {
            payload,
            opcode,
            chunk: self.max_frame_size,
            fin,
            rsv,
            first: true,
        }
        .collect())
    }
}
