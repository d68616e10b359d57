//! Window Registry & Lifecycle for Peek
//!
//! Provides:
//! - **Window registry**: handle → owner address and open parameters
//! - **Close cascade**: depth-first close of every window owned, directly or
//!   transitively, by an address; the root window is never closed
//! - **Escape policy**: `close`, `navigate` (bounded round trip to the
//!   content) and `auto`, with hide-vs-close per window
//! - **Modal lost-focus close**
//!
//! # Ownership
//!
//! ```text
//! root (peek://system/)
//!  └── W1  owner = peek://system/
//!       ├── W2  owner = W1.params.address
//!       └── W3  owner = W1.params.address
//! ```
//!
//! `window:closed {id, source}` is handed to the owner of every closed
//! window exactly once, through an [`OwnerNotifier`].

mod error;
mod lifecycle;
pub mod window;

pub use error::{LifecycleError, Result};
pub use lifecycle::{
    CloseOutcome, EscapeOutcome, EscapeResponse, LifecycleConfig, LifecycleController, OwnerNotifier,
    DEFAULT_ESCAPE_TIMEOUT, DEFAULT_MODAL_BLUR_DELAY,
};
pub use peek_host::EscapeMode;
pub use window::{sanitize_key, WindowParams, WindowRecord, WindowRegistry};
