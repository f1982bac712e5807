//! Generation control: stop strings, streaming cadence, backend dispatch and
//! the single generation slot.

pub mod decode;
pub mod emitter;
pub mod extensions;
pub mod format;
pub mod generate;
pub mod seed;
pub mod session;
pub mod stopping;
pub mod streaming;

pub use emitter::{Cadence, RateLimitedEmitter};
pub use extensions::{ExtensionChain, Extensions, NoExtensions};
pub use generate::{Replies, ReplyChunk, ReplyRequest, TextGenerator, TokenReplies};
pub use session::{Guarded, SessionManager, SlotPermit};
pub use stopping::apply_stopping_strings;
