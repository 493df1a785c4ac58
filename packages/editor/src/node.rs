//! # Node Model
//!
//! Nodes are a closed set of kinds stored by key in an [`crate::EditorState`].
//! Containers keep their children as an intrusive doubly-linked list:
//! `first`/`last`/`size` on the element and `prev`/`next` on every child.
//!
//! ```text
//! root ── paragraph ── text("Hello ") ⇄ text("world", bold) ⇄ linebreak
//!      └─ heading(h1) ── text("Title")
//! ```
//!
//! Nodes are never mutated in place outside a [`crate::Transaction`]; the
//! transaction clones a node the first time it is written (see
//! `Transaction::get_writable`).

use crate::key::NodeKey;
use crate::utils::char_len;
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;

bitflags! {
    /// Text format flags, stored as their numeric bits in JSON
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextFormat: u32 {
        const BOLD = 1;
        const ITALIC = 1 << 1;
        const STRIKETHROUGH = 1 << 2;
        const UNDERLINE = 1 << 3;
        const CODE = 1 << 4;
        const SUBSCRIPT = 1 << 5;
        const SUPERSCRIPT = 1 << 6;
        const HIGHLIGHT = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextDetail: u32 {
        const DIRECTIONLESS = 1;
        const UNMERGEABLE = 1 << 1;
    }
}

/// Serialize flag sets as their bits; unknown bits survive a round trip
macro_rules! impl_bits_serde {
    ($flags:ty) => {
        impl Default for $flags {
            fn default() -> Self {
                Self::empty()
            }
        }

        impl Serialize for $flags {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.bits().serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $flags {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                u32::deserialize(deserializer).map(Self::from_bits_retain)
            }
        }
    };
}

impl_bits_serde!(TextFormat);
impl_bits_serde!(TextDetail);

impl TextFormat {
    /// Toggle a format, keeping subscript and superscript mutually exclusive
    pub fn toggled(self, ty: TextFormatType) -> TextFormat {
        let flag = ty.flag();
        let mut next = self ^ flag;
        if next.contains(flag) {
            match ty {
                TextFormatType::Subscript => next.remove(TextFormat::SUPERSCRIPT),
                TextFormatType::Superscript => next.remove(TextFormat::SUBSCRIPT),
                _ => {}
            }
        }
        next
    }

    /// Outer tag a renderer would use for this format
    pub fn outer_tag(self) -> &'static str {
        if self.contains(TextFormat::CODE) {
            "code"
        } else if self.contains(TextFormat::SUBSCRIPT) {
            "sub"
        } else if self.contains(TextFormat::SUPERSCRIPT) {
            "sup"
        } else {
            "span"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormatType {
    Bold,
    Italic,
    Strikethrough,
    Underline,
    Code,
    Subscript,
    Superscript,
    Highlight,
}

impl TextFormatType {
    pub fn flag(self) -> TextFormat {
        match self {
            TextFormatType::Bold => TextFormat::BOLD,
            TextFormatType::Italic => TextFormat::ITALIC,
            TextFormatType::Strikethrough => TextFormat::STRIKETHROUGH,
            TextFormatType::Underline => TextFormat::UNDERLINE,
            TextFormatType::Code => TextFormat::CODE,
            TextFormatType::Subscript => TextFormat::SUBSCRIPT,
            TextFormatType::Superscript => TextFormat::SUPERSCRIPT,
            TextFormatType::Highlight => TextFormat::HIGHLIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMode {
    #[default]
    Normal,
    /// Edited as a single unit
    Token,
    /// Deleted segment by segment
    Segmented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementFormat {
    #[default]
    #[serde(rename = "")]
    Unset,
    Left,
    Start,
    Center,
    Right,
    Justify,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingTag {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

/// Concrete container kinds
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Root,
    Paragraph,
    Heading(HeadingTag),
    Quote,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextNode {
    pub(crate) text: String,
    pub(crate) format: TextFormat,
    pub(crate) style: String,
    pub(crate) mode: TextMode,
    pub(crate) detail: TextDetail,
}

impl TextNode {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_mode(mut self, mode: TextMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_detail(mut self, detail: TextDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn format(&self) -> TextFormat {
        self.format
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    pub fn mode(&self) -> TextMode {
        self.mode
    }

    pub fn detail(&self) -> TextDetail {
        self.detail
    }

    pub fn has_format(&self, ty: TextFormatType) -> bool {
        self.format.contains(ty.flag())
    }

    /// Number of characters, the unit of text point offsets
    pub fn len(&self) -> usize {
        char_len(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_simple(&self) -> bool {
        self.mode == TextMode::Normal
    }

    pub fn is_token(&self) -> bool {
        self.mode == TextMode::Token
    }

    pub fn is_segmented(&self) -> bool {
        self.mode == TextMode::Segmented
    }

    pub fn is_directionless(&self) -> bool {
        self.detail.contains(TextDetail::DIRECTIONLESS)
    }

    pub fn is_unmergeable(&self) -> bool {
        self.detail.contains(TextDetail::UNMERGEABLE)
    }

    /// Whether two adjacent simple text nodes may be merged
    pub fn can_merge_with(&self, other: &TextNode) -> bool {
        self.mode == other.mode && self.format == other.format && self.style == other.style
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub(crate) first: Option<NodeKey>,
    pub(crate) last: Option<NodeKey>,
    pub(crate) size: usize,
    pub(crate) format: ElementFormat,
    pub(crate) indent: u32,
    pub(crate) direction: Option<Direction>,
    pub(crate) block: BlockKind,
}

impl ElementNode {
    pub fn new(block: BlockKind) -> Self {
        Self {
            first: None,
            last: None,
            size: 0,
            format: ElementFormat::Unset,
            indent: 0,
            direction: None,
            block,
        }
    }

    pub fn paragraph() -> Self {
        Self::new(BlockKind::Paragraph)
    }

    pub fn heading(tag: HeadingTag) -> Self {
        Self::new(BlockKind::Heading(tag))
    }

    pub fn quote() -> Self {
        Self::new(BlockKind::Quote)
    }

    pub fn first_child(&self) -> Option<&NodeKey> {
        self.first.as_ref()
    }

    pub fn last_child(&self) -> Option<&NodeKey> {
        self.last.as_ref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn format(&self) -> ElementFormat {
        self.format
    }

    pub fn indent(&self) -> u32 {
        self.indent
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn block(&self) -> &BlockKind {
        &self.block
    }

    /// Copy of this element without children, used when a block is split
    pub(crate) fn empty_like(&self) -> ElementNode {
        ElementNode {
            first: None,
            last: None,
            size: 0,
            format: self.format,
            indent: self.indent,
            direction: self.direction,
            block: self.block.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoratorNode {
    pub(crate) node_type: String,
    pub(crate) inline: bool,
    pub(crate) data: serde_json::Value,
}

impl DecoratorNode {
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Text(TextNode),
    LineBreak,
    Element(ElementNode),
    Decorator(DecoratorNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) key: NodeKey,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) prev: Option<NodeKey>,
    pub(crate) next: Option<NodeKey>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(key: NodeKey, kind: NodeKind) -> Self {
        Self {
            key,
            parent: None,
            prev: None,
            next: None,
            kind,
        }
    }

    pub(crate) fn root() -> Self {
        Node::new(NodeKey::root(), NodeKind::Element(ElementNode::new(BlockKind::Root)))
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn parent(&self) -> Option<&NodeKey> {
        self.parent.as_ref()
    }

    pub fn prev_sibling(&self) -> Option<&NodeKey> {
        self.prev.as_ref()
    }

    pub fn next_sibling(&self) -> Option<&NodeKey> {
        self.next.as_ref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Registered type name
    pub fn node_type(&self) -> &str {
        match &self.kind {
            NodeKind::Text(_) => "text",
            NodeKind::LineBreak => "linebreak",
            NodeKind::Decorator(d) => &d.node_type,
            NodeKind::Element(el) => match el.block {
                BlockKind::Root => "root",
                BlockKind::Paragraph => "paragraph",
                BlockKind::Heading(_) => "heading",
                BlockKind::Quote => "quote",
            },
        }
    }

    pub fn is_root(&self) -> bool {
        self.key.is_root()
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }

    pub fn is_line_break(&self) -> bool {
        matches!(self.kind, NodeKind::LineBreak)
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self.kind, NodeKind::Decorator(_))
    }

    pub fn as_text(&self) -> Option<&TextNode> {
        match &self.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_decorator(&self) -> Option<&DecoratorNode> {
        match &self.kind {
            NodeKind::Decorator(d) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn as_text_mut(&mut self) -> Option<&mut TextNode> {
        match &mut self.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn as_element_mut(&mut self) -> Option<&mut ElementNode> {
        match &mut self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_element()
    }

    pub fn is_inline(&self) -> bool {
        match &self.kind {
            NodeKind::Text(_) | NodeKind::LineBreak => true,
            NodeKind::Decorator(d) => d.inline,
            NodeKind::Element(_) => false,
        }
    }

    /// Block elements and block decorators may live directly under root
    pub fn is_block(&self) -> bool {
        !self.is_inline()
    }

    pub fn is_inline_decorator(&self) -> bool {
        matches!(&self.kind, NodeKind::Decorator(d) if d.inline)
    }

    /// Text content of a leaf. Elements aggregate through the state.
    pub fn leaf_text(&self) -> Cow<'_, str> {
        match &self.kind {
            NodeKind::Text(text) => Cow::Borrowed(&text.text),
            NodeKind::LineBreak => Cow::Borrowed("\n"),
            NodeKind::Decorator(_) | NodeKind::Element(_) => Cow::Borrowed(""),
        }
    }

    /// Size in point-offset units: characters for text, children for elements
    pub fn offset_size(&self) -> usize {
        match &self.kind {
            NodeKind::Text(text) => text.len(),
            NodeKind::Element(el) => el.size,
            NodeKind::LineBreak | NodeKind::Decorator(_) => 0,
        }
    }

    /// Whether a structural attribute changed so the rendered element must
    /// be destroyed and created again instead of patched.
    pub fn should_recreate(&self, prev: &Node) -> bool {
        match (&prev.kind, &self.kind) {
            (NodeKind::Text(a), NodeKind::Text(b)) => a.format.outer_tag() != b.format.outer_tag(),
            (NodeKind::LineBreak, NodeKind::LineBreak) => false,
            (NodeKind::Element(a), NodeKind::Element(b)) => a.block != b.block,
            (NodeKind::Decorator(a), NodeKind::Decorator(b)) => {
                a.node_type != b.node_type || a.inline != b.inline
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_toggle_sub_super_exclusive() {
        let format = TextFormat::empty().toggled(TextFormatType::Subscript);
        assert!(format.contains(TextFormat::SUBSCRIPT));

        let format = format.toggled(TextFormatType::Superscript);
        assert!(format.contains(TextFormat::SUPERSCRIPT));
        assert!(!format.contains(TextFormat::SUBSCRIPT));

        let format = format.toggled(TextFormatType::Superscript);
        assert!(format.is_empty());
    }

    #[test]
    fn test_format_serializes_as_bits() {
        let format = TextFormat::BOLD | TextFormat::CODE;
        assert_eq!(serde_json::to_value(format).unwrap(), serde_json::json!(17));

        let parsed: TextFormat = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, TextFormat::BOLD | TextFormat::ITALIC);
        let unknown: TextDetail = serde_json::from_str("8").unwrap();
        assert_eq!(unknown.bits(), 8);
        assert_eq!(TextDetail::default(), TextDetail::empty());
    }

    #[test]
    fn test_node_types() {
        let text = Node::new(NodeKey::from("1"), NodeKind::Text(TextNode::new("hi")));
        assert_eq!(text.node_type(), "text");
        assert!(text.is_inline());
        assert_eq!(text.offset_size(), 2);

        let heading = Node::new(
            NodeKey::from("2"),
            NodeKind::Element(ElementNode::heading(HeadingTag::H2)),
        );
        assert_eq!(heading.node_type(), "heading");
        assert!(heading.is_block());
    }

    #[test]
    fn test_should_recreate() {
        let plain = Node::new(NodeKey::from("1"), NodeKind::Text(TextNode::new("a")));
        let bold = Node::new(
            NodeKey::from("1"),
            NodeKind::Text(TextNode::new("a").with_format(TextFormat::BOLD)),
        );
        let code = Node::new(
            NodeKey::from("1"),
            NodeKind::Text(TextNode::new("a").with_format(TextFormat::CODE)),
        );
        assert!(!bold.should_recreate(&plain));
        assert!(code.should_recreate(&plain));

        let h1 = Node::new(NodeKey::from("2"), NodeKind::Element(ElementNode::heading(HeadingTag::H1)));
        let h2 = Node::new(NodeKey::from("2"), NodeKind::Element(ElementNode::heading(HeadingTag::H2)));
        assert!(h2.should_recreate(&h1));
    }

    #[test]
    fn test_element_format_serde() {
        assert_eq!(serde_json::to_string(&ElementFormat::Unset).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&ElementFormat::Center).unwrap(), "\"center\"");
        let parsed: ElementFormat = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, ElementFormat::Unset);
    }
}
