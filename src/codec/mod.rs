//! Frame codec and the framed transport that drives it over async I/O.

mod framed;

pub use framed::{FrameCodec, FramedTransport};
