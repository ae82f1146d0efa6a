//! Wire-level protocol pieces: framing, masking, reassembly and the
//! HTTP/1.1 exchanges that precede them.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use assembler::FragmentAssembler;
pub use frame::{Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{UpgradeRequest, UpgradeResponse, WS_GUID, compute_accept_key};
pub use http::{Method, Request, Response};
pub use mask::{apply_mask, random_mask};
pub use opcode::OpCode;
pub use validation::FrameValidator;
