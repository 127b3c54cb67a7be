use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::config::{ArgumentInterpolatorDefinition, ModifierDefinition, ParseContext};
use crate::message::Message;

pub type BlockSeq = Vec<BlockEntity>;
pub type InlineSeq = Vec<InlineEntity>;

/// Argument lists are short in practice; four covers nearly every head.
pub type ArgumentSeq = SmallVec<[ModifierArgument; 4]>;

/// Opaque handle naming a source, e.g. a file name. Shared by every range
/// produced from one parse.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self { name: name.into() })
    }
}

/// Half-open `[start, end)` range in character offsets.
///
/// `actual_end` is the end of the content excluding a trailing closing tag
/// (`[;]`, `--:`). `original` links a range inside a generated expansion
/// back to the writing that produced it; chains of `original` links form
/// the referral DAG used by message reporting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocationRange {
    pub source: Rc<SourceDescriptor>,
    pub start: usize,
    pub end: usize,
    pub actual_end: Option<usize>,
    pub original: Option<Box<LocationRange>>,
}

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum RangeError {
    #[error("inverted range: start {start} is past end {end}")]
    Inverted { start: usize, end: usize },
}

impl LocationRange {
    pub fn new(
        source: Rc<SourceDescriptor>,
        start: usize,
        end: usize,
    ) -> Result<Self, RangeError> {
        if start <= end {
            Ok(Self {
                source,
                start,
                end,
                actual_end: None,
                original: None,
            })
        } else {
            Err(RangeError::Inverted { start, end })
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Stamps this range as generated from `original`, chaining when the
    /// range already carries an origin link.
    pub fn with_original(mut self, original: LocationRange) -> Self {
        match self.original.take() {
            Some(existing) => {
                self.original = Some(Box::new(existing.with_original(original)));
            }
            None => self.original = Some(Box::new(original)),
        }
        self
    }

    /// Walks `original` links down to the range in the actually-written
    /// source.
    pub fn origin(&self) -> &LocationRange {
        let mut range = self;
        while let Some(original) = &range.original {
            range = original;
        }
        range
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockEntity {
    Paragraph(ParagraphNode),
    Preformatted(PreformattedNode),
    Modifier(BlockModifierNode),
    System(SystemModifierNode),
}

impl BlockEntity {
    pub fn location(&self) -> &LocationRange {
        match self {
            BlockEntity::Paragraph(node) => &node.location,
            BlockEntity::Preformatted(node) => &node.location,
            BlockEntity::Modifier(node) => &node.location,
            BlockEntity::System(node) => &node.location,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InlineEntity {
    Text(TextNode),
    Escaped(EscapedNode),
    Modifier(InlineModifierNode),
}

impl InlineEntity {
    pub fn location(&self) -> &LocationRange {
        match self {
            InlineEntity::Text(node) => &node.location,
            InlineEntity::Escaped(node) => &node.location,
            InlineEntity::Modifier(node) => &node.location,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParagraphNode {
    pub location: LocationRange,
    pub content: InlineSeq,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextNode {
    pub location: LocationRange,
    pub content: String,
}

/// A backslash escape; `content` is the single escaped character.
#[derive(Clone, Debug, PartialEq)]
pub struct EscapedNode {
    pub location: LocationRange,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PreformattedNode {
    pub location: LocationRange,
    pub content: RawText,
}

/// Verbatim text with the character range it was read from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawText {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Modifier-private state. Allocated by the parser on request of the
/// definition's callbacks, never interpreted by the core.
#[derive(Clone)]
pub struct NodeState(Rc<RefCell<dyn Any>>);

impl NodeState {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn with<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut value = self.0.borrow_mut();
        value.downcast_mut::<T>().map(f)
    }
}

impl fmt::Debug for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeState(..)")
    }
}

/// One modifier invocation. `E` is the entity kind the modifier contains
/// and expands to: [`BlockEntity`] for block and system modifiers,
/// [`InlineEntity`] for inline ones.
///
/// `expansion` stays `None` until the expansion engine assigns it; once it
/// is `Some`, the node rewrites to those entities and `content` remains
/// reachable only as a fallback for renderers.
#[derive(Clone, Debug)]
pub struct ModifierNode<E> {
    pub definition: Rc<ModifierDefinition<E>>,
    pub location: LocationRange,
    pub head: LocationRange,
    pub arguments: ArgumentSeq,
    pub state: Option<NodeState>,
    pub content: Vec<E>,
    pub expansion: Option<Vec<E>>,
}

pub type BlockModifierNode = ModifierNode<BlockEntity>;
pub type InlineModifierNode = ModifierNode<InlineEntity>;
pub type SystemModifierNode = ModifierNode<BlockEntity>;

impl<E: PartialEq> PartialEq for ModifierNode<E> {
    // State is callback-owned and opaque; equality is structural identity
    // of everything else, with definitions compared by pointer.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.definition, &other.definition)
            && self.location == other.location
            && self.head == other.head
            && self.arguments == other.arguments
            && self.content == other.content
            && self.expansion == other.expansion
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArgumentEntity {
    Text(TextNode),
    Escaped(EscapedNode),
    Interpolation(InterpolationNode),
}

impl ArgumentEntity {
    pub fn location(&self) -> &LocationRange {
        match self {
            ArgumentEntity::Text(node) => &node.location,
            ArgumentEntity::Escaped(node) => &node.location,
            ArgumentEntity::Interpolation(node) => &node.location,
        }
    }
}

/// A balanced interpolator use inside an argument, e.g. `$(x)`.
#[derive(Clone, Debug)]
pub struct InterpolationNode {
    pub definition: Rc<ArgumentInterpolatorDefinition>,
    pub location: LocationRange,
    pub argument: ModifierArgument,
    pub expansion: Option<String>,
}

impl PartialEq for InterpolationNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.definition, &other.definition)
            && self.location == other.location
            && self.argument == other.argument
            && self.expansion == other.expansion
    }
}

impl InterpolationNode {
    /// Resolves this interpolation to its textual value, caching on
    /// success. Inside a delayed region nothing resolves: the writing is
    /// being captured verbatim and must re-resolve per instantiation.
    pub fn expand(&mut self, cxt: &mut ParseContext, immediate: bool) -> Option<String> {
        if let Some(cached) = &self.expansion {
            return Some(cached.clone());
        }
        if cxt.delay_depth > 0 {
            return None;
        }
        let inner = self.argument.expand(cxt, immediate)?;
        let definition = self.definition.clone();
        let value = match &definition.expand {
            Some(expand) => (**expand)(&inner, cxt, immediate)?,
            None => inner,
        };
        self.expansion = Some(value.clone());
        Some(value)
    }
}

/// One argument of a modifier head. `expansion` caches the fully-expanded
/// textual value; it stays `None` while any contained interpolation cannot
/// resolve yet (e.g. inside a delayed definition body).
#[derive(Clone, Debug, PartialEq)]
pub struct ModifierArgument {
    pub location: LocationRange,
    pub content: Vec<ArgumentEntity>,
    pub expansion: Option<String>,
}

impl ModifierArgument {
    /// Computes and caches the fully-expanded textual value. `None` means
    /// some interpolation inside could not resolve (yet); nothing is
    /// cached in that case.
    pub fn expand(&mut self, cxt: &mut ParseContext, immediate: bool) -> Option<String> {
        if let Some(cached) = &self.expansion {
            return Some(cached.clone());
        }
        let mut out = String::new();
        for entity in &mut self.content {
            match entity {
                ArgumentEntity::Text(node) => out.push_str(&node.content),
                ArgumentEntity::Escaped(node) => out.push_str(&node.content),
                ArgumentEntity::Interpolation(node) => {
                    out.push_str(&node.expand(cxt, immediate)?);
                }
            }
        }
        self.expansion = Some(out.clone());
        Some(out)
    }

    /// The argument text with escapes resolved and interpolations left as
    /// written. Used for messages about arguments that cannot expand.
    pub fn raw_text(&self) -> String {
        let mut out = String::new();
        for entity in &self.content {
            match entity {
                ArgumentEntity::Text(node) => out.push_str(&node.content),
                ArgumentEntity::Escaped(node) => out.push_str(&node.content),
                ArgumentEntity::Interpolation(node) => {
                    out.push_str(&node.definition.name);
                    out.push_str(&node.argument.raw_text());
                    out.push_str(&node.definition.postfix);
                }
            }
        }
        out
    }
}

impl<E> ModifierNode<E> {
    /// Expands every argument, returning their values in order, or `None`
    /// as soon as one cannot resolve.
    pub fn expand_arguments(
        &mut self,
        cxt: &mut ParseContext,
        immediate: bool,
    ) -> Option<Vec<String>> {
        let mut out = Vec::with_capacity(self.arguments.len());
        for argument in self.arguments.iter_mut() {
            out.push(argument.expand(cxt, immediate)?);
        }
        Some(out)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RootNode {
    pub location: LocationRange,
    pub content: BlockSeq,
}

/// The result of a parse: tree plus accumulated messages.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub source: Rc<SourceDescriptor>,
    pub root: RootNode,
    pub messages: Vec<Message>,
}

impl Document {
    /// Returns a copy ready for rendering: every modifier node with an
    /// assigned expansion is replaced by it, system modifier nodes are
    /// removed, and nodes that deliberately kept their content survive
    /// with that content stripped in place.
    pub fn to_stripped(&self) -> Document {
        Document {
            source: self.source.clone(),
            root: RootNode {
                location: self.root.location.clone(),
                content: strip_blocks(&self.root.content),
            },
            messages: self.messages.clone(),
        }
    }
}

fn strip_blocks(blocks: &[BlockEntity]) -> BlockSeq {
    let mut out = Vec::new();
    for entity in blocks {
        match entity {
            BlockEntity::Paragraph(node) => {
                out.push(BlockEntity::Paragraph(ParagraphNode {
                    location: node.location.clone(),
                    content: strip_inlines(&node.content),
                }));
            }
            BlockEntity::Preformatted(node) => {
                out.push(BlockEntity::Preformatted(node.clone()));
            }
            BlockEntity::Modifier(node) => match &node.expansion {
                Some(expansion) => out.extend(strip_blocks(expansion)),
                None => {
                    let mut kept = node.clone();
                    kept.content = strip_blocks(&node.content);
                    out.push(BlockEntity::Modifier(kept));
                }
            },
            BlockEntity::System(_) => {}
        }
    }
    out
}

fn strip_inlines(inlines: &[InlineEntity]) -> InlineSeq {
    let mut out = Vec::new();
    for entity in inlines {
        match entity {
            InlineEntity::Text(node) => out.push(InlineEntity::Text(node.clone())),
            InlineEntity::Escaped(node) => out.push(InlineEntity::Escaped(node.clone())),
            InlineEntity::Modifier(node) => match &node.expansion {
                Some(expansion) => out.extend(strip_inlines(expansion)),
                None => {
                    let mut kept = node.clone();
                    kept.content = strip_inlines(&node.content);
                    out.push(InlineEntity::Modifier(kept));
                }
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{LocationRange, RangeError, SourceDescriptor};

    #[test]
    fn range_new_rejects_inverted() {
        let source = SourceDescriptor::new("<test>");
        assert!(LocationRange::new(source.clone(), 3, 3).is_ok());
        assert_eq!(
            LocationRange::new(source, 4, 3),
            Err(RangeError::Inverted { start: 4, end: 3 })
        );
    }

    #[test]
    fn original_links_chain() {
        let source = SourceDescriptor::new("<test>");
        let written = LocationRange::new(source.clone(), 0, 5).unwrap();
        let first = LocationRange::new(source.clone(), 10, 12)
            .unwrap()
            .with_original(written.clone());
        let second = LocationRange::new(source, 20, 22)
            .unwrap()
            .with_original(first.clone());
        assert_eq!(second.origin(), written.origin());
        assert_eq!(second.original.as_deref(), Some(&first));
    }
}
