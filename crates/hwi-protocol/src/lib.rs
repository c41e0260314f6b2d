pub mod codec;
pub mod command;
pub mod frame;
pub mod grammar;
pub mod registry;
pub mod stream_decoder;

pub use codec::LightingCodec;
pub use command::Command;
pub use frame::{DecodedFrame, LightingEvent};
pub use grammar::{FrameGrammar, FrameKind, GrammarMatch};
pub use registry::{FrameHandler, FrameRegistry};
pub use stream_decoder::{DrainFrames, StreamDecoder};
