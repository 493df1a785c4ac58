//! # Folio Editor
//!
//! Rich-text editor state and view reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Editor::update: callback on a Transaction   │
//! │  - copy-on-write writes to the pending state│
//! │  - queued updates, transforms, GC           │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ commit: Reconciler diffs prev → next        │
//! │  - keyed child diff, clean subtrees reused  │
//! │  - patches sent to the attached View        │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ publish: frozen EditorState, listeners      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Published states are immutable**: every write goes through a
//!    transaction over a pending copy
//! 2. **Structural sharing**: unchanged nodes are the same `Arc` in both
//!    snapshots, which is what lets the reconciler skip them
//! 3. **The view is derived**: it can always be thrown away and re-rendered
//!    from the state
//!
//! ## Usage
//!
//! ```rust
//! use folio_editor::{Editor, NodeKey, UpdateOptions};
//!
//! let mut editor = Editor::default();
//! editor
//!     .update_with(UpdateOptions::discrete(), |txn| {
//!         let paragraph = txn.create_paragraph()?;
//!         let text = txn.create_text("Hello")?;
//!         txn.append(&paragraph, &[text.clone()])?;
//!         txn.append(&NodeKey::root(), &[paragraph])?;
//!         txn.select_end(&text)?;
//!         txn.insert_text(", world")
//!     })
//!     .unwrap();
//!
//! assert_eq!(editor.editor_state().text_content(), "Hello, world");
//! ```

pub mod commands;
mod config;
mod dirty;
mod editor;
mod errors;
mod gc;
mod key;
mod listeners;
mod node;
pub mod reconciler;
mod registry;
pub mod selection;
pub mod serializer;
mod state;
mod transaction;
mod transforms;
pub mod utils;
pub mod view;

pub use commands::{CommandListener, CommandPriority, CommandRegistry, SharedCommands};
pub use config::{DecoratorConfig, EditorConfig};
pub use dirty::{DirtyTracker, DirtyType};
pub use editor::{Editor, ErrorHandler, UpdatePhase};
pub use errors::{EditorError, EditorResult, SerializationError, ViewError};
pub use key::{KeyGenerator, NodeKey};
pub use listeners::{ListenerId, MutationMap, NodeMutation, UpdatePayload};
pub use node::{
    BlockKind, DecoratorNode, Direction, ElementFormat, ElementNode, HeadingTag, Node, NodeKind,
    TextDetail, TextFormat, TextFormatType, TextMode, TextNode,
};
pub use reconciler::{ReconcileOutcome, ReconcileStats, Reconciler};
pub use registry::{NodeFactory, NodeRegistry, NodeSpec};
pub use selection::{
    normalize_point, Affinity, NativePoint, NativeRange, NodeSelection, Point, PointKind,
    RangeSelection, Selection,
};
pub use serializer::{SerializedEditorState, SerializedNode};
pub use state::{EditorState, DOUBLE_LINE_BREAK};
pub use transaction::{DeferredCallback, Transaction, UpdateFn, UpdateOptions};
pub use transforms::{TransformFn, TransformRegistry};
pub use view::{ExternalMutation, RecordingView, View, ViewDelta, ViewHandle, ViewOp};
