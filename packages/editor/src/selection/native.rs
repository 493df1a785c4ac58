//! Mapping between range selections and the view's native ranges

use super::{normalize_point, Affinity, Point, PointKind, RangeSelection};
use crate::errors::{EditorError, EditorResult};
use crate::key::NodeKey;
use crate::state::EditorState;
use crate::view::ViewHandle;
use serde::{Deserialize, Serialize};

/// A position inside a view element: characters for text, children otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePoint {
    pub handle: ViewHandle,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRange {
    pub anchor: NativePoint,
    pub focus: NativePoint,
}

impl NativeRange {
    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

fn to_native_point(
    point: &Point,
    lookup: &impl Fn(&NodeKey) -> Option<ViewHandle>,
) -> Option<NativePoint> {
    Some(NativePoint {
        handle: lookup(&point.key)?,
        offset: point.offset,
    })
}

/// Native range for a range selection. `None` when a point has no handle.
pub fn to_native(
    selection: &RangeSelection,
    lookup: impl Fn(&NodeKey) -> Option<ViewHandle>,
) -> Option<NativeRange> {
    Some(NativeRange {
        anchor: to_native_point(selection.anchor(), &lookup)?,
        focus: to_native_point(selection.focus(), &lookup)?,
    })
}

fn resolve_native_point(
    native: &NativePoint,
    state: &EditorState,
    resolve: &impl Fn(ViewHandle) -> Option<NodeKey>,
) -> EditorResult<Point> {
    let key = resolve(native.handle).ok_or_else(|| {
        EditorError::InvalidSelection(format!("no node for view handle {}", native.handle))
    })?;
    let node = state.get(&key)?;
    let point = if let Some(text) = node.as_text() {
        Point::text(key, native.offset.min(text.len()))
    } else if let Some(el) = node.as_element() {
        // Offsets past the last child land on the line-break placeholder
        Point::element(key, native.offset.min(el.size))
    } else {
        let parent = node.parent.clone().ok_or_else(|| {
            EditorError::InvalidSelection(format!("view handle {} is detached", native.handle))
        })?;
        let index = state.index_within_parent(&key).unwrap_or(0);
        let index = if native.offset > 0 { index + 1 } else { index };
        Point::element(parent, index)
    };
    Ok(match point.kind {
        PointKind::Element => normalize_point(&point, state, Affinity::Backward),
        PointKind::Text => point,
    })
}

/// Resolve a native range back to a range selection over `state`
pub fn from_native(
    range: &NativeRange,
    state: &EditorState,
    resolve: impl Fn(ViewHandle) -> Option<NodeKey>,
) -> EditorResult<RangeSelection> {
    let anchor = resolve_native_point(&range.anchor, state, &resolve)?;
    let focus = resolve_native_point(&range.focus, state, &resolve)?;
    let format = if anchor.kind == PointKind::Text {
        state.text(&anchor.key)?.format
    } else {
        Default::default()
    };
    Ok(RangeSelection::new(anchor, focus).with_format(format))
}
