use std::rc::Rc;

use smallvec::SmallVec;

use crate::ast::{
    ArgumentEntity, ArgumentSeq, BlockEntity, Document, EscapedNode, InlineEntity,
    InlineModifierNode, InterpolationNode, LocationRange, ModifierArgument, ModifierNode,
    ParagraphNode, PreformattedNode, RawText, RootNode, TextNode,
};
use crate::config::{
    ArgumentInterpolatorDefinition, BlockModifierDefinition, HookFn, InlineModifierDefinition,
    ModifierDefinition, ParseContext, Shorthand, SlotType, SystemModifierDefinition,
};
use crate::message::{FixSuggestion, Message};
use crate::scanner::Scanner;

const GROUP_OPEN: &str = ":--";
const GROUP_CLOSE: &str = "--:";
const BLOCK_OPEN: &str = "[.";
const SYSTEM_OPEN: &str = "[-";
const INLINE_OPEN: &str = "[/";
const HEAD_CLOSE: &str = "]";
const MARKER_CLOSE: &str = ";]";
const INLINE_CLOSE_TAG: &str = "[;]";

/// Consumes the scanner's source against the context's live configuration
/// and returns the document tree together with every message produced,
/// including those raised by definition callbacks and by expansion.
///
/// Definitions the source registers (via `define-*` and friends) mutate
/// `cxt.config` and affect the rest of the same parse; hand a fresh
/// [`crate::Configuration::from`] clone to each parse that may define
/// names.
pub fn parse(scanner: Scanner, cxt: &mut ParseContext) -> Document {
    let source = scanner.source().clone();
    let length = scanner.len();
    let mut parser = Parser {
        scanner,
        cxt,
        messages: Vec::new(),
        group_depth: 0,
        referral_stack: Vec::new(),
        tables: LookupTables::default(),
    };
    let content = parser.parse_block_sequence(false);
    let messages = parser.messages;
    let location = LocationRange {
        source: source.clone(),
        start: 0,
        end: length,
        actual_end: None,
        original: None,
    };
    Document {
        source,
        root: RootNode { location, content },
        messages,
    }
}

/// Lookup lists sorted by descending name length, so overlapping names
/// (`em` vs `emph`) resolve to the longest match. Rebuilt whenever the
/// configuration generation moves.
#[derive(Default)]
struct LookupTables {
    generation: Option<u64>,
    block_defs: Vec<Rc<BlockModifierDefinition>>,
    inline_defs: Vec<Rc<InlineModifierDefinition>>,
    system_defs: Vec<Rc<SystemModifierDefinition>>,
    interpolators: Vec<Rc<ArgumentInterpolatorDefinition>>,
    block_shorthands: Vec<Rc<Shorthand<BlockEntity>>>,
    inline_shorthands: Vec<Rc<Shorthand<InlineEntity>>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HeadEnd {
    /// `]`
    Closed,
    /// `;]`
    Marker,
    /// Newline or EOF inside the head; recovery closed it there.
    Broken,
}

enum InlineTerminator<'a> {
    /// Blank line, EOF, or a block opener.
    ParagraphEnd,
    /// `[;]`
    ClosingTag,
    /// A shorthand slot postfix.
    Literal(&'a str),
}

struct InlineParse {
    content: Vec<InlineEntity>,
    /// Whether the intended terminator was actually seen.
    terminated: bool,
    /// End of the content, excluding the terminator itself.
    content_end: usize,
}

struct Parser<'a> {
    scanner: Scanner,
    cxt: &'a mut ParseContext,
    messages: Vec<Message>,
    group_depth: usize,
    referral_stack: Vec<LocationRange>,
    tables: LookupTables,
}

impl<'a> Parser<'a> {
    // ------------------------------------------------------------------
    // Messages and hooks

    fn push_message(&mut self, mut message: Message) {
        for frame in self.referral_stack.iter().rev() {
            message = Message::referred(message, frame.clone());
        }
        self.messages.push(message);
    }

    fn run_hook<E>(&mut self, hook: Option<&HookFn<E>>, node: &mut ModifierNode<E>) {
        if let Some(hook) = hook {
            let hook = hook.clone();
            let messages = (*hook)(node, self.cxt);
            for message in messages {
                self.push_message(message);
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup

    fn refresh_tables(&mut self) {
        let generation = self.cxt.config.generation();
        if self.tables.generation == Some(generation) {
            return;
        }
        let config = &self.cxt.config;
        self.tables.block_defs = config.block_modifiers.entries().cloned().collect();
        self.tables.inline_defs = config.inline_modifiers.entries().cloned().collect();
        self.tables.system_defs = config.system_modifiers.entries().cloned().collect();
        self.tables.interpolators = config.argument_interpolators.entries().cloned().collect();
        self.tables.block_shorthands = config.block_shorthands.entries().cloned().collect();
        self.tables.inline_shorthands = config.inline_shorthands.entries().cloned().collect();

        sort_longest_first(&mut self.tables.block_defs, |def| &def.name);
        sort_longest_first(&mut self.tables.inline_defs, |def| &def.name);
        sort_longest_first(&mut self.tables.system_defs, |def| &def.name);
        sort_longest_first(&mut self.tables.interpolators, |def| &def.name);
        sort_longest_first(&mut self.tables.block_shorthands, |sh| &sh.name);
        sort_longest_first(&mut self.tables.inline_shorthands, |sh| &sh.name);
        self.tables.generation = Some(generation);
    }

    /// A modifier name must be followed by a head delimiter; otherwise a
    /// longer unregistered word would silently bind to a shorter name.
    fn name_boundary_ok(&self, name_len: usize) -> bool {
        match self.scanner.peek_char_at(name_len) {
            None => true,
            Some(ch) => ch == ']' || ch == ':' || ch == ';' || ch.is_whitespace(),
        }
    }

    fn match_block_def(&mut self) -> Option<Rc<BlockModifierDefinition>> {
        self.refresh_tables();
        let matched = self
            .tables
            .block_defs
            .iter()
            .find(|def| {
                self.scanner.peek(&def.name) && self.name_boundary_ok(def.name.chars().count())
            })
            .cloned();
        if let Some(def) = &matched {
            self.scanner.accept(&def.name);
        }
        matched
    }

    fn match_inline_def(&mut self) -> Option<Rc<InlineModifierDefinition>> {
        self.refresh_tables();
        let matched = self
            .tables
            .inline_defs
            .iter()
            .find(|def| {
                self.scanner.peek(&def.name) && self.name_boundary_ok(def.name.chars().count())
            })
            .cloned();
        if let Some(def) = &matched {
            self.scanner.accept(&def.name);
        }
        matched
    }

    fn match_system_def(&mut self) -> Option<Rc<SystemModifierDefinition>> {
        self.refresh_tables();
        let matched = self
            .tables
            .system_defs
            .iter()
            .find(|def| {
                self.scanner.peek(&def.name) && self.name_boundary_ok(def.name.chars().count())
            })
            .cloned();
        if let Some(def) = &matched {
            self.scanner.accept(&def.name);
        }
        matched
    }

    fn find_interpolator(&mut self) -> Option<Rc<ArgumentInterpolatorDefinition>> {
        self.refresh_tables();
        self.tables
            .interpolators
            .iter()
            .find(|def| self.scanner.peek(&def.name))
            .cloned()
    }

    fn find_block_shorthand(&mut self) -> Option<Rc<Shorthand<BlockEntity>>> {
        self.refresh_tables();
        self.tables
            .block_shorthands
            .iter()
            .find(|sh| self.scanner.peek(&sh.name))
            .cloned()
    }

    fn find_inline_shorthand(&mut self) -> Option<Rc<Shorthand<InlineEntity>>> {
        self.refresh_tables();
        self.tables
            .inline_shorthands
            .iter()
            .find(|sh| self.scanner.peek(&sh.name))
            .cloned()
    }

    // ------------------------------------------------------------------
    // Block structure

    fn skip_block_space(&mut self) {
        while let Some(ch) = self.scanner.peek_char() {
            if ch.is_whitespace() {
                self.scanner.accept_char();
            } else {
                break;
            }
        }
    }

    fn parse_block_sequence(&mut self, in_group: bool) -> Vec<BlockEntity> {
        let mut content = Vec::new();
        loop {
            self.skip_block_space();
            if in_group && self.scanner.peek(GROUP_CLOSE) {
                break;
            }
            if self.scanner.is_eof() {
                break;
            }
            content.extend(self.parse_block(true));
        }
        content
    }

    /// Parses one block construct. Groups are transparent and contribute
    /// all of their blocks, hence the sequence return.
    fn parse_block(&mut self, at_line_start: bool) -> Vec<BlockEntity> {
        if self.scanner.peek(BLOCK_OPEN) {
            return vec![self.parse_block_modifier()];
        }
        if self.scanner.peek(SYSTEM_OPEN) {
            return vec![self.parse_system_modifier()];
        }
        if self.scanner.peek(GROUP_OPEN) {
            return self.parse_group();
        }
        if let Some(shorthand) = self.find_block_shorthand() {
            return vec![self.parse_block_shorthand(shorthand)];
        }
        vec![self.parse_paragraph(at_line_start)]
    }

    fn parse_group(&mut self) -> Vec<BlockEntity> {
        self.scanner.accept(GROUP_OPEN);
        while self.scanner.accept_whitespace_char().is_some() {}
        if !self.scanner.accept("\n") && !self.scanner.is_eof() {
            let at = self.scanner.position();
            self.push_message(Message::content_should_be_on_newline(
                self.scanner.location_from(at),
            ));
        }
        self.group_depth += 1;
        let content = self.parse_block_sequence(true);
        self.group_depth -= 1;
        if !self.scanner.accept(GROUP_CLOSE) {
            let at = self.scanner.position();
            self.push_message(
                Message::expected(self.scanner.location_from(at), "`--:`").with_suggestion(
                    FixSuggestion::insert("insert the missing `--:`", at, "--:"),
                ),
            );
        }
        content
    }

    fn parse_block_modifier(&mut self) -> BlockEntity {
        let start = self.scanner.position();
        self.scanner.accept(BLOCK_OPEN);
        let definition = match self.match_block_def() {
            Some(definition) => definition,
            None => {
                self.report_unknown_name("block");
                self.cxt.config.unknown_block_modifier().clone()
            }
        };
        let node = self.parse_blockish_tail(start, definition);
        BlockEntity::Modifier(node)
    }

    fn parse_system_modifier(&mut self) -> BlockEntity {
        let start = self.scanner.position();
        self.scanner.accept(SYSTEM_OPEN);
        let definition = match self.match_system_def() {
            Some(definition) => definition,
            None => {
                self.report_unknown_name("system");
                self.cxt.config.unknown_system_modifier().clone()
            }
        };
        let node = self.parse_blockish_tail(start, definition);
        BlockEntity::System(node)
    }

    /// Shared tail of `[.` and `[-` heads: arguments, optional content
    /// block, expansion.
    fn parse_blockish_tail(
        &mut self,
        start: usize,
        definition: Rc<ModifierDefinition<BlockEntity>>,
    ) -> ModifierNode<BlockEntity> {
        let (arguments, head_end) = self.parse_head_arguments();
        let head = self.scanner.location_from(start);
        let mut node = ModifierNode {
            definition: definition.clone(),
            location: head.clone(),
            head,
            arguments,
            state: None,
            content: Vec::new(),
            expansion: None,
        };

        let marker = head_end == HeadEnd::Marker || definition.slot_type == SlotType::None;
        if !marker {
            self.run_hook(definition.before_parse_content.as_ref(), &mut node);
            if definition.delay_content_expansion {
                self.cxt.delay_depth += 1;
            }
            node.content = if definition.slot_type == SlotType::Preformatted {
                self.parse_preformatted_block_content()
            } else {
                self.parse_block_content()
            };
            if definition.delay_content_expansion {
                self.cxt.delay_depth -= 1;
            }
            self.run_hook(definition.after_parse_content.as_ref(), &mut node);
        }

        node.location = self.scanner.location_from(start);
        self.expand_modifier(&mut node, 0);
        node
    }

    /// Content of a normal-slot block modifier: one block (or group) on
    /// the same line or the next. Blank lines in between are tolerated
    /// with a warning.
    fn parse_block_content(&mut self) -> Vec<BlockEntity> {
        while self.scanner.accept_whitespace_char().is_some() {}
        if self.scanner.is_eof() {
            return Vec::new();
        }
        if !self.scanner.peek("\n") {
            return self.parse_block(false);
        }
        self.scanner.accept("\n");

        let blank_start = self.scanner.position();
        let mut saw_blank = false;
        while self.blank_line_here() {
            while self.scanner.accept_whitespace_char().is_some() {}
            if !self.scanner.accept("\n") {
                break;
            }
            saw_blank = true;
        }
        if saw_blank {
            self.push_message(Message::unnecessary_newline(
                self.scanner.location_from(blank_start),
            ));
        }

        while self.scanner.accept_whitespace_char().is_some() {}
        if self.scanner.is_eof() {
            return Vec::new();
        }
        if self.group_depth > 0 && self.scanner.peek(GROUP_CLOSE) {
            return Vec::new();
        }
        self.parse_block(true)
    }

    /// True when the rest of the current line is only spaces and tabs.
    fn blank_line_here(&self) -> bool {
        let mut offset = 0;
        loop {
            match self.scanner.peek_char_at(offset) {
                None | Some('\n') => return true,
                Some(' ') | Some('\t') => offset += 1,
                Some(_) => return false,
            }
        }
    }

    /// Assumes the cursor is on a `\n`: true when the line after it is
    /// blank or the input ends.
    fn newline_then_blank(&self) -> bool {
        let mut offset = 1;
        loop {
            match self.scanner.peek_char_at(offset) {
                None | Some('\n') => return true,
                Some(' ') | Some('\t') => offset += 1,
                Some(_) => return false,
            }
        }
    }

    fn parse_preformatted_block_content(&mut self) -> Vec<BlockEntity> {
        while self.scanner.accept_whitespace_char().is_some() {}
        if !self.scanner.accept("\n") && !self.scanner.is_eof() {
            let at = self.scanner.position();
            self.push_message(Message::content_should_be_on_newline(
                self.scanner.location_from(at),
            ));
        }

        let start = self.scanner.position();
        let mut text = String::new();
        while !self.scanner.is_eof() {
            if self.scanner.peek("\n") {
                if self.newline_then_blank() {
                    break;
                }
                self.scanner.accept("\n");
                text.push('\n');
            } else if let Some(ch) = self.scanner.accept_char() {
                text.push(ch);
            }
        }
        let end = self.scanner.position();
        if text.is_empty() {
            return Vec::new();
        }
        vec![BlockEntity::Preformatted(PreformattedNode {
            location: self.scanner.location_from(start),
            content: RawText { start, end, text },
        })]
    }

    // ------------------------------------------------------------------
    // Paragraphs and inline structure

    fn parse_paragraph(&mut self, at_line_start: bool) -> BlockEntity {
        let start = self.scanner.position();
        let parsed = self.parse_inline_sequence(&InlineTerminator::ParagraphEnd, at_line_start);
        let mut location = self.scanner.location_from(start);
        location.end = parsed.content_end.max(start);
        BlockEntity::Paragraph(ParagraphNode {
            location,
            content: parsed.content,
        })
    }

    fn parse_inline_sequence(
        &mut self,
        terminator: &InlineTerminator<'_>,
        mut at_line_start: bool,
    ) -> InlineParse {
        let mut content: Vec<InlineEntity> = Vec::new();
        let mut buffer = String::new();
        let mut buffer_start = self.scanner.position();
        let mut content_end = self.scanner.position();
        let mut terminated = false;

        macro_rules! flush {
            () => {
                if !buffer.is_empty() {
                    let mut location = self.scanner.location_from(buffer_start);
                    location.end = content_end;
                    content.push(InlineEntity::Text(TextNode {
                        location,
                        content: std::mem::take(&mut buffer),
                    }));
                }
            };
        }

        loop {
            if self.scanner.is_eof() {
                terminated = matches!(terminator, InlineTerminator::ParagraphEnd);
                break;
            }

            if let InlineTerminator::Literal(literal) = terminator {
                if self.scanner.peek(literal) {
                    content_end = self.scanner.position();
                    self.scanner.accept(literal);
                    terminated = true;
                    break;
                }
            }
            if matches!(terminator, InlineTerminator::ClosingTag)
                && self.scanner.peek(INLINE_CLOSE_TAG)
            {
                content_end = self.scanner.position();
                self.scanner.accept(INLINE_CLOSE_TAG);
                terminated = true;
                break;
            }

            if self.scanner.peek("\n") {
                if self.newline_then_blank() {
                    // Blank line: ends a paragraph, leaves inline
                    // modifiers unclosed. The newline stays put for the
                    // enclosing block structure.
                    terminated = matches!(terminator, InlineTerminator::ParagraphEnd);
                    break;
                }
                self.scanner.accept("\n");
                if self.scanner.peek(BLOCK_OPEN)
                    || self.scanner.peek(SYSTEM_OPEN)
                    || self.scanner.peek(GROUP_OPEN)
                    || (self.group_depth > 0 && self.scanner.peek(GROUP_CLOSE))
                {
                    terminated = matches!(terminator, InlineTerminator::ParagraphEnd);
                    break;
                }
                buffer.push('\n');
                if buffer.len() == 1 {
                    buffer_start = self.scanner.position() - 1;
                }
                content_end = self.scanner.position();
                at_line_start = true;
                continue;
            }

            if self.scanner.peek(BLOCK_OPEN)
                || self.scanner.peek(SYSTEM_OPEN)
                || self.scanner.peek(GROUP_OPEN)
                || (self.group_depth > 0 && self.scanner.peek(GROUP_CLOSE))
            {
                // A block construct interrupting running text.
                if !at_line_start && matches!(terminator, InlineTerminator::ParagraphEnd) {
                    let at = self.scanner.position();
                    let mut location = self.scanner.location_from(at);
                    location.end = at + 2;
                    self.push_message(Message::new_block_should_be_on_newline(location));
                }
                terminated = matches!(terminator, InlineTerminator::ParagraphEnd);
                break;
            }

            if self.scanner.peek(INLINE_OPEN) {
                flush!();
                content.push(self.parse_inline_modifier());
                content_end = self.scanner.position();
                buffer_start = self.scanner.position();
                at_line_start = false;
                continue;
            }

            if self.scanner.peek("\\") {
                flush!();
                let escape_start = self.scanner.position();
                self.scanner.accept("\\");
                match self.scanner.accept_char() {
                    Some(ch) => {
                        content.push(InlineEntity::Escaped(EscapedNode {
                            location: self.scanner.location_from(escape_start),
                            content: ch.to_string(),
                        }));
                    }
                    None => {
                        content.push(InlineEntity::Text(TextNode {
                            location: self.scanner.location_from(escape_start),
                            content: "\\".to_string(),
                        }));
                    }
                }
                content_end = self.scanner.position();
                buffer_start = self.scanner.position();
                at_line_start = false;
                continue;
            }

            if let Some(shorthand) = self.find_inline_shorthand() {
                flush!();
                content.push(self.parse_inline_shorthand(shorthand));
                content_end = self.scanner.position();
                buffer_start = self.scanner.position();
                at_line_start = false;
                continue;
            }

            if buffer.is_empty() {
                buffer_start = self.scanner.position();
            }
            if let Some(ch) = self.scanner.accept_char() {
                buffer.push(ch);
            }
            content_end = self.scanner.position();
            at_line_start = false;
        }

        flush!();
        InlineParse {
            content,
            terminated,
            content_end,
        }
    }

    fn parse_inline_modifier(&mut self) -> InlineEntity {
        let start = self.scanner.position();
        self.scanner.accept(INLINE_OPEN);
        let definition = match self.match_inline_def() {
            Some(definition) => definition,
            None => {
                self.report_unknown_name("inline");
                self.cxt.config.unknown_inline_modifier().clone()
            }
        };

        let (arguments, head_end) = self.parse_head_arguments();
        let head = self.scanner.location_from(start);
        let mut node = ModifierNode {
            definition: definition.clone(),
            location: head.clone(),
            head,
            arguments,
            state: None,
            content: Vec::new(),
            expansion: None,
        };

        let marker = head_end == HeadEnd::Marker || definition.slot_type == SlotType::None;
        if !marker {
            self.run_hook(definition.before_parse_content.as_ref(), &mut node);
            if definition.delay_content_expansion {
                self.cxt.delay_depth += 1;
            }
            let closed = if definition.slot_type == SlotType::Preformatted {
                self.parse_preformatted_inline_content(&mut node)
            } else {
                let parsed =
                    self.parse_inline_sequence(&InlineTerminator::ClosingTag, false);
                node.content = parsed.content;
                if parsed.terminated {
                    node.location.actual_end = Some(parsed.content_end);
                }
                parsed.terminated
            };
            if definition.delay_content_expansion {
                self.cxt.delay_depth -= 1;
            }
            self.run_hook(definition.after_parse_content.as_ref(), &mut node);

            if !closed {
                let at = self.scanner.position();
                self.push_message(
                    Message::unclosed_inline_modifier(node.head.clone(), &definition.name)
                        .with_suggestion(FixSuggestion::insert(
                            "insert the missing `[;]`",
                            at,
                            INLINE_CLOSE_TAG,
                        )),
                );
            }
        }

        let actual_end = node.location.actual_end;
        node.location = self.scanner.location_from(start);
        node.location.actual_end = actual_end;
        self.expand_modifier(&mut node, 0);
        InlineEntity::Modifier(node)
    }

    /// Raw content of a preformatted inline modifier: characters up to the
    /// closing tag, with no recognition of anything else. Returns whether
    /// the closing tag was found.
    fn parse_preformatted_inline_content(&mut self, node: &mut InlineModifierNode) -> bool {
        let start = self.scanner.position();
        let mut text = String::new();
        let mut closed = false;
        while !self.scanner.is_eof() {
            if self.scanner.peek(INLINE_CLOSE_TAG) {
                node.location.actual_end = Some(self.scanner.position());
                self.scanner.accept(INLINE_CLOSE_TAG);
                closed = true;
                break;
            }
            if let Some(ch) = self.scanner.accept_char() {
                text.push(ch);
            }
        }
        if !text.is_empty() {
            let mut location = self.scanner.location_from(start);
            if let Some(actual_end) = node.location.actual_end {
                location.end = actual_end;
            }
            node.content = vec![InlineEntity::Text(TextNode {
                location,
                content: text,
            })];
        }
        closed
    }

    // ------------------------------------------------------------------
    // Shorthands

    fn parse_inline_shorthand(&mut self, shorthand: Rc<Shorthand<InlineEntity>>) -> InlineEntity {
        let start = self.scanner.position();
        self.scanner.accept(&shorthand.name);

        let mut arguments: ArgumentSeq = SmallVec::new();
        for part in &shorthand.parts {
            let (argument, found) = self.parse_argument_until(part);
            arguments.push(argument);
            if !found {
                let at = self.scanner.position();
                self.push_message(Message::expected(
                    self.scanner.location_from(at),
                    &format!("`{part}`"),
                ));
                break;
            }
        }

        let definition = shorthand.definition.clone();
        let head = self.scanner.location_from(start);
        let mut node = ModifierNode {
            definition: definition.clone(),
            location: head.clone(),
            head,
            arguments,
            state: None,
            content: Vec::new(),
            expansion: None,
        };

        if let Some(postfix) = &shorthand.postfix {
            self.run_hook(definition.before_parse_content.as_ref(), &mut node);
            if definition.delay_content_expansion {
                self.cxt.delay_depth += 1;
            }
            let parsed = self.parse_inline_sequence(&InlineTerminator::Literal(postfix), false);
            node.content = parsed.content;
            if parsed.terminated {
                node.location.actual_end = Some(parsed.content_end);
            } else {
                let at = self.scanner.position();
                self.push_message(Message::expected(
                    self.scanner.location_from(at),
                    &format!("`{postfix}`"),
                ));
            }
            if definition.delay_content_expansion {
                self.cxt.delay_depth -= 1;
            }
            self.run_hook(definition.after_parse_content.as_ref(), &mut node);
        }

        let actual_end = node.location.actual_end;
        node.location = self.scanner.location_from(start);
        node.location.actual_end = actual_end;
        self.expand_modifier(&mut node, 0);
        InlineEntity::Modifier(node)
    }

    fn parse_block_shorthand(&mut self, shorthand: Rc<Shorthand<BlockEntity>>) -> BlockEntity {
        let start = self.scanner.position();
        self.scanner.accept(&shorthand.name);

        let mut arguments: ArgumentSeq = SmallVec::new();
        for part in &shorthand.parts {
            let (argument, found) = self.parse_argument_until(part);
            arguments.push(argument);
            if !found {
                let at = self.scanner.position();
                self.push_message(Message::expected(
                    self.scanner.location_from(at),
                    &format!("`{part}`"),
                ));
                break;
            }
        }

        let definition = shorthand.definition.clone();
        let head = self.scanner.location_from(start);
        let mut node = ModifierNode {
            definition: definition.clone(),
            location: head.clone(),
            head,
            arguments,
            state: None,
            content: Vec::new(),
            expansion: None,
        };

        if let Some(postfix) = &shorthand.postfix {
            self.run_hook(definition.before_parse_content.as_ref(), &mut node);
            if definition.delay_content_expansion {
                self.cxt.delay_depth += 1;
            }
            node.content = self.parse_block_content();
            if definition.delay_content_expansion {
                self.cxt.delay_depth -= 1;
            }
            self.run_hook(definition.after_parse_content.as_ref(), &mut node);

            if !postfix.is_empty() {
                while self.scanner.accept_whitespace_char().is_some() {}
                if !self.scanner.accept(postfix) {
                    let at = self.scanner.position();
                    self.push_message(Message::expected(
                        self.scanner.location_from(at),
                        &format!("`{postfix}`"),
                    ));
                }
            }
        }

        node.location = self.scanner.location_from(start);
        self.expand_modifier(&mut node, 0);
        BlockEntity::Modifier(node)
    }

    // ------------------------------------------------------------------
    // Heads, arguments, interpolations

    /// Consumes an unrecognized head name so parsing can continue, and
    /// reports it.
    fn report_unknown_name(&mut self, kind: &str) {
        let start = self.scanner.position();
        let mut name = String::new();
        while let Some(ch) = self.scanner.peek_char() {
            if ch == ']' || ch == ':' || ch == ';' || ch.is_whitespace() {
                break;
            }
            self.scanner.accept_char();
            name.push(ch);
        }
        let location = self.scanner.location_from(start);
        self.push_message(Message::unknown_modifier(location, kind, &name));
    }

    /// Argument list of a modifier head, ending at `]` or `;]`. A newline
    /// or EOF breaks the head with an `Expected` message.
    fn parse_head_arguments(&mut self) -> (ArgumentSeq, HeadEnd) {
        let mut arguments: ArgumentSeq = SmallVec::new();

        let explicit_first = self.scanner.accept(":");
        if !explicit_first {
            while self.scanner.accept_whitespace_char().is_some() {}
            if self.scanner.accept(MARKER_CLOSE) {
                return (arguments, HeadEnd::Marker);
            }
            if self.scanner.accept(HEAD_CLOSE) {
                return (arguments, HeadEnd::Closed);
            }
            if self.scanner.is_eof() || self.scanner.peek("\n") {
                return (arguments, self.break_head());
            }
        }

        loop {
            let (argument, end) = self.parse_head_argument();
            arguments.push(argument);
            match end {
                ArgumentEnd::Separator => continue,
                ArgumentEnd::Closed => return (arguments, HeadEnd::Closed),
                ArgumentEnd::Marker => return (arguments, HeadEnd::Marker),
                ArgumentEnd::Broken => return (arguments, self.break_head()),
            }
        }
    }

    fn break_head(&mut self) -> HeadEnd {
        let at = self.scanner.position();
        self.push_message(
            Message::expected(self.scanner.location_from(at), "`]`")
                .with_suggestion(FixSuggestion::insert("insert the missing `]`", at, "]")),
        );
        HeadEnd::Broken
    }

    fn parse_head_argument(&mut self) -> (ModifierArgument, ArgumentEnd) {
        let start = self.scanner.position();
        let mut content: Vec<ArgumentEntity> = Vec::new();
        let mut buffer = String::new();
        let mut buffer_start = start;
        let end;

        macro_rules! flush {
            () => {
                if !buffer.is_empty() {
                    content.push(ArgumentEntity::Text(TextNode {
                        location: self.scanner.location_from(buffer_start),
                        content: std::mem::take(&mut buffer),
                    }));
                }
            };
        }

        loop {
            if self.scanner.is_eof() || self.scanner.peek("\n") {
                end = ArgumentEnd::Broken;
                break;
            }
            if self.scanner.accept(MARKER_CLOSE) {
                end = ArgumentEnd::Marker;
                break;
            }
            if self.scanner.accept(HEAD_CLOSE) {
                end = ArgumentEnd::Closed;
                break;
            }
            if self.scanner.accept(":") {
                end = ArgumentEnd::Separator;
                break;
            }
            if self.scanner.peek("\\") {
                flush!();
                content.push(self.parse_escape_entity());
                buffer_start = self.scanner.position();
                continue;
            }
            if self.find_interpolator().is_some() {
                flush!();
                content.push(self.parse_interpolation());
                buffer_start = self.scanner.position();
                continue;
            }
            if buffer.is_empty() {
                buffer_start = self.scanner.position();
            }
            if let Some(ch) = self.scanner.accept_char() {
                buffer.push(ch);
            }
        }

        flush!();
        let argument = self.finish_argument(start, content, end.consumed_len());
        (argument, end)
    }

    /// Argument text delimited by an arbitrary literal (a shorthand part
    /// or an interpolator postfix). Never crosses a newline.
    fn parse_argument_until(&mut self, literal: &str) -> (ModifierArgument, bool) {
        let start = self.scanner.position();
        let mut content: Vec<ArgumentEntity> = Vec::new();
        let mut buffer = String::new();
        let mut buffer_start = start;
        let mut found = false;

        macro_rules! flush {
            () => {
                if !buffer.is_empty() {
                    content.push(ArgumentEntity::Text(TextNode {
                        location: self.scanner.location_from(buffer_start),
                        content: std::mem::take(&mut buffer),
                    }));
                }
            };
        }

        loop {
            if self.scanner.is_eof() || self.scanner.peek("\n") {
                break;
            }
            if self.scanner.accept(literal) {
                found = true;
                break;
            }
            if self.scanner.peek("\\") {
                flush!();
                content.push(self.parse_escape_entity());
                buffer_start = self.scanner.position();
                continue;
            }
            if self.find_interpolator().is_some() {
                flush!();
                content.push(self.parse_interpolation());
                buffer_start = self.scanner.position();
                continue;
            }
            if buffer.is_empty() {
                buffer_start = self.scanner.position();
            }
            if let Some(ch) = self.scanner.accept_char() {
                buffer.push(ch);
            }
        }

        flush!();
        let trailing = if found { literal.chars().count() } else { 0 };
        let argument = self.finish_argument(start, content, trailing);
        (argument, found)
    }

    fn parse_escape_entity(&mut self) -> ArgumentEntity {
        let start = self.scanner.position();
        self.scanner.accept("\\");
        match self.scanner.accept_char() {
            Some(ch) => ArgumentEntity::Escaped(EscapedNode {
                location: self.scanner.location_from(start),
                content: ch.to_string(),
            }),
            None => ArgumentEntity::Text(TextNode {
                location: self.scanner.location_from(start),
                content: "\\".to_string(),
            }),
        }
    }

    /// Assumes `find_interpolator` just matched at the cursor.
    fn parse_interpolation(&mut self) -> ArgumentEntity {
        let start = self.scanner.position();
        let definition = self
            .find_interpolator()
            .expect("caller checked an interpolator matches here");
        self.scanner.accept(&definition.name);

        let argument = if definition.postfix.is_empty() {
            ModifierArgument {
                location: self.scanner.location_from(self.scanner.position()),
                content: Vec::new(),
                expansion: Some(String::new()),
            }
        } else {
            let (argument, found) = self.parse_argument_until(&definition.postfix);
            if !found {
                let at = self.scanner.position();
                self.push_message(Message::expected(
                    self.scanner.location_from(at),
                    &format!("`{}`", definition.postfix),
                ));
            }
            argument
        };

        let mut node = InterpolationNode {
            definition,
            location: self.scanner.location_from(start),
            argument,
            expansion: None,
        };
        if self.cxt.delay_depth == 0 {
            let _ = node.expand(self.cxt, true);
        }
        ArgumentEntity::Interpolation(node)
    }

    /// Builds the argument value, with `trailing` characters of terminator
    /// excluded from its range, and caches its expansion when allowed.
    fn finish_argument(
        &mut self,
        start: usize,
        content: Vec<ArgumentEntity>,
        trailing: usize,
    ) -> ModifierArgument {
        let mut location = self.scanner.location_from(start);
        location.end = location.end.saturating_sub(trailing).max(start);
        let mut argument = ModifierArgument {
            location,
            content,
            expansion: None,
        };
        if self.cxt.delay_depth == 0 {
            let _ = argument.expand(self.cxt, true);
        }
        argument
    }

    // ------------------------------------------------------------------
    // Expansion

    /// The expansion loop of one modifier node. Returns `false` when the
    /// reparse depth limit was exceeded somewhere below; the offending
    /// subtree is left with unexpanded leaves.
    fn expand_modifier<E: ParsedEntity>(
        &mut self,
        node: &mut ModifierNode<E>,
        depth: usize,
    ) -> bool {
        if node.expansion.is_some() {
            return true;
        }
        let definition = node.definition.clone();
        if self.cxt.delay_depth > 0 && !definition.always_try_expand {
            return true;
        }
        // At most `reparse_depth_limit` levels of generated nodes.
        if depth >= self.cxt.config.reparse_depth_limit {
            return false;
        }

        let mut ok = true;
        if depth > 0 && !node.content.is_empty() {
            // Generated content never went through the scanner; give the
            // definition its parse hooks and walk the children as a
            // simulated re-parse.
            self.run_hook(definition.before_parse_content.as_ref(), node);
            if definition.delay_content_expansion {
                self.cxt.delay_depth += 1;
            }
            ok &= self.reparse_sequence(&mut node.content, depth);
            if definition.delay_content_expansion {
                self.cxt.delay_depth -= 1;
            }
            self.run_hook(definition.after_parse_content.as_ref(), node);
        }

        self.run_hook(definition.prepare_expand.as_ref(), node);
        if let Some(expand) = &definition.expand {
            let expand = expand.clone();
            node.expansion = (*expand)(node, self.cxt, true);
        }
        if node.expansion.is_none() {
            // Deliberately not rewritten: keep the content.
            return ok;
        }

        self.referral_stack.push(node.location.clone());
        self.run_hook(definition.before_process_expansion.as_ref(), node);
        if let Some(expansion) = node.expansion.as_mut() {
            ok &= self.reparse_sequence(expansion, depth);
        }
        self.run_hook(definition.after_process_expansion.as_ref(), node);
        self.referral_stack.pop();

        if !ok && depth == 0 {
            self.push_message(Message::reached_reparse_limit(
                node.location.clone(),
                &definition.name,
            ));
        }
        ok
    }

    fn reparse_sequence<E: ParsedEntity>(&mut self, entities: &mut [E], depth: usize) -> bool {
        let mut ok = true;
        for entity in entities {
            ok &= E::reparse(self, entity, depth);
        }
        ok
    }
}

fn sort_longest_first<T, F: Fn(&T) -> &String>(entries: &mut [Rc<T>], name: F) {
    entries.sort_by(|a, b| {
        let a_len = name(a.as_ref()).chars().count();
        let b_len = name(b.as_ref()).chars().count();
        b_len.cmp(&a_len)
    });
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ArgumentEnd {
    Separator,
    Closed,
    Marker,
    Broken,
}

impl ArgumentEnd {
    /// Characters of terminator that were consumed after the argument.
    fn consumed_len(self) -> usize {
        match self {
            ArgumentEnd::Separator | ArgumentEnd::Closed => 1,
            ArgumentEnd::Marker => 2,
            ArgumentEnd::Broken => 0,
        }
    }
}

/// Dispatch used by the expansion engine's recursive walk. Leaves report
/// success; modifier nodes re-enter the expansion loop one level deeper.
trait ParsedEntity: Sized {
    fn reparse(parser: &mut Parser<'_>, entity: &mut Self, depth: usize) -> bool;
}

impl ParsedEntity for BlockEntity {
    fn reparse(parser: &mut Parser<'_>, entity: &mut Self, depth: usize) -> bool {
        match entity {
            BlockEntity::Paragraph(node) => parser.reparse_sequence(&mut node.content, depth),
            BlockEntity::Preformatted(_) => true,
            BlockEntity::Modifier(node) => parser.expand_modifier(node, depth + 1),
            BlockEntity::System(node) => parser.expand_modifier(node, depth + 1),
        }
    }
}

impl ParsedEntity for InlineEntity {
    fn reparse(parser: &mut Parser<'_>, entity: &mut Self, depth: usize) -> bool {
        match entity {
            InlineEntity::Text(_) | InlineEntity::Escaped(_) => true,
            InlineEntity::Modifier(node) => parser.expand_modifier(node, depth + 1),
        }
    }
}
