mod ast;
pub mod builtins;
mod config;
mod message;
mod parser;
mod render;
mod scanner;

pub use ast::{
    ArgumentEntity, ArgumentSeq, BlockEntity, BlockModifierNode, BlockSeq, Document, EscapedNode,
    InlineEntity, InlineModifierNode, InlineSeq, InterpolationNode, LocationRange,
    ModifierArgument, ModifierNode, NodeState, ParagraphNode, PreformattedNode, RangeError,
    RawText, RootNode, SourceDescriptor, SystemModifierNode, TextNode,
};
pub use config::{
    ArgumentInterpolatorDefinition, BlockModifierDefinition, Configuration,
    DEFAULT_REPARSE_DEPTH_LIMIT, ExpandFn, HookFn, InlineModifierDefinition,
    InterpolatorExpandFn, ModifierDefinition, Named, ParseContext, Registry, Shorthand,
    ShorthandSet, SlotType, SystemModifierDefinition,
};
pub use message::{
    E_ARGUMENT_COUNT_MISMATCH, E_EXPECTED, E_INVALID_ARGUMENT, E_NAME_ALREADY_DEFINED,
    E_REACHED_REPARSE_LIMIT, E_REFERRED, E_UNCLOSED_INLINE_MODIFIER, E_UNKNOWN_MODIFIER,
    FixSuggestion, Message, MessageSeverity, W_CONTENT_SHOULD_BE_ON_NEWLINE,
    W_NEW_BLOCK_SHOULD_BE_ON_NEWLINE, W_UNNECESSARY_NEWLINE,
};
pub use parser::parse;
pub use render::{
    BlockRenderFn, DefinitionId, InlineRenderFn, InvalidBlockFn, InvalidInlineFn,
    ParagraphRenderFn, PreformattedRenderFn, RenderContext, RenderOutput, Renderer,
    RendererConfig, TextRenderFn,
};
pub use scanner::Scanner;
