//! Reassembly of fragmented incoming messages (RFC 6455 section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::{LogicalMessage, MessageKind};
use crate::protocol::{Frame, OpCode};

#[derive(Debug)]
enum AssemblyState {
    Idle,
    Assembling {
        kind: MessageKind,
        buffer: BytesMut,
        fragments: usize,
    },
}

/// Joins continuation frames into [`LogicalMessage`]s.
///
/// Control frames pass through untouched; the session handles them. Any
/// error discards the partial message and leaves the assembler idle.
#[derive(Debug)]
pub struct FragmentAssembler {
    state: AssemblyState,
    max_message_size: usize,
    max_fragment_count: usize,
}

impl FragmentAssembler {
    /// Create an assembler bounded by `limits`.
    #[must_use]
    pub fn new(limits: &Limits) -> Self {
        Self {
            state: AssemblyState::Idle,
            max_message_size: limits.max_message_size,
            max_fragment_count: limits.max_fragment_count,
        }
    }

    /// Feed one frame. Returns the message it completes, if any.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] for a continuation with nothing to
    ///   continue, or a new data frame while a message is in progress
    /// - [`Error::MessageTooLarge`] / [`Error::TooManyFragments`]
    pub fn push(&mut self, frame: Frame) -> Result<Option<LogicalMessage>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }
        let result = self.advance(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn advance(&mut self, frame: Frame) -> Result<Option<LogicalMessage>> {
        match &mut self.state {
            AssemblyState::Idle => {
                let Some(kind) = MessageKind::from_opcode(frame.opcode) else {
                    return Err(Error::ProtocolViolation(
                        "continuation frame without a message in progress".into(),
                    ));
                };
                check_size(frame.payload.len(), self.max_message_size)?;
                if frame.fin {
                    return Ok(Some(LogicalMessage::new(kind, frame.payload)));
                }
                let mut buffer = BytesMut::with_capacity(frame.payload.len() * 2);
                buffer.extend_from_slice(&frame.payload);
                self.state = AssemblyState::Assembling {
                    kind,
                    buffer,
                    fragments: 1,
                };
                Ok(None)
            }
            AssemblyState::Assembling {
                kind,
                buffer,
                fragments,
            } => {
                if frame.opcode != OpCode::Continuation {
                    return Err(Error::ProtocolViolation(format!(
                        "{} frame while a fragmented {kind} message is in progress",
                        frame.opcode
                    )));
                }
                *fragments += 1;
                if *fragments > self.max_fragment_count {
                    return Err(Error::TooManyFragments {
                        count: *fragments,
                        max: self.max_fragment_count,
                    });
                }
                check_size(buffer.len() + frame.payload.len(), self.max_message_size)?;
                buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                let kind = *kind;
                let payload = std::mem::take(buffer).freeze();
                self.state = AssemblyState::Idle;
                Ok(Some(LogicalMessage::new(kind, payload)))
            }
        }
    }

    /// Kind of the message currently being assembled.
    #[must_use]
    pub fn in_progress(&self) -> Option<MessageKind> {
        match &self.state {
            AssemblyState::Idle => None,
            AssemblyState::Assembling { kind, .. } => Some(*kind),
        }
    }

    /// Bytes buffered for the message in progress.
    #[must_use]
    pub fn buffered(&self) -> usize {
        match &self.state {
            AssemblyState::Idle => 0,
            AssemblyState::Assembling { buffer, .. } => buffer.len(),
        }
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.state = AssemblyState::Idle;
    }
}

fn check_size(size: usize, max: usize) -> Result<()> {
    if size > max {
        Err(Error::MessageTooLarge { size, max })
    } else {
        Ok(())
    }
}
