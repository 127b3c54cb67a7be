use emmm_core::{
    BlockEntity, Configuration, Document, InlineEntity, MessageSeverity, ModifierDefinition,
    ParseContext, Scanner, SlotType, SourceDescriptor, E_EXPECTED, E_REACHED_REPARSE_LIMIT,
    E_UNCLOSED_INLINE_MODIFIER, E_UNKNOWN_MODIFIER, W_CONTENT_SHOULD_BE_ON_NEWLINE,
    W_NEW_BLOCK_SHOULD_BE_ON_NEWLINE, W_UNNECESSARY_NEWLINE, parse,
};

fn parse_source(source: &str) -> (Document, ParseContext) {
    let mut cxt = ParseContext::new(Configuration::with_builtins());
    let scanner = Scanner::new(source, SourceDescriptor::new("<test>"));
    let document = parse(scanner, &mut cxt);
    (document, cxt)
}

fn codes(document: &Document) -> Vec<&'static str> {
    document.messages.iter().map(|message| message.code).collect()
}

fn inline_text(entities: &[InlineEntity]) -> String {
    let mut out = String::new();
    for entity in entities {
        match entity {
            InlineEntity::Text(node) => out.push_str(&node.content),
            InlineEntity::Escaped(node) => out.push_str(&node.content),
            InlineEntity::Modifier(node) => match &node.expansion {
                Some(expansion) => out.push_str(&inline_text(expansion)),
                None => out.push_str(&inline_text(&node.content)),
            },
        }
    }
    out
}

/// Texts of the top-level paragraphs of the stripped document.
fn stripped_paragraphs(document: &Document) -> Vec<String> {
    let stripped = document.to_stripped();
    stripped
        .root
        .content
        .iter()
        .filter_map(|entity| match entity {
            BlockEntity::Paragraph(node) => Some(inline_text(&node.content)),
            _ => None,
        })
        .collect()
}

#[test]
fn shorthand_without_arguments_expands_to_its_body() {
    let (document, _) = parse_source("[-inline-shorthand p] 123\n\np");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["123"]);
}

#[test]
fn marker_shorthand_expands_to_nothing() {
    let (document, _) = parse_source("[-inline-shorthand p;]\n\np");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), [""]);
}

#[test]
fn shorthand_argument_reaches_print_through_interpolation() {
    let (document, _) = parse_source("[-inline-shorthand p:x:p][/print $(x)]\n\np1p");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["1"]);
}

#[test]
fn shorthand_argument_surfaces_as_a_modifier() {
    let (document, _) = parse_source("[-inline-shorthand p:x:p][/$x]\n\np1p");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["1"]);
}

#[test]
fn unknown_block_modifier_recovers_and_keeps_content() {
    let (document, cxt) = parse_source("[.unknown] hello");
    assert_eq!(codes(&document), [E_UNKNOWN_MODIFIER]);
    assert_eq!(document.messages[0].severity, MessageSeverity::Error);

    let root = &document.root.content;
    assert_eq!(root.len(), 1);
    let BlockEntity::Modifier(node) = &root[0] else {
        panic!("expected a modifier node, got {:?}", root[0]);
    };
    assert!(cxt.config.is_unknown_block(&node.definition));
    let BlockEntity::Paragraph(paragraph) = &node.content[0] else {
        panic!("expected paragraph content");
    };
    assert_eq!(inline_text(&paragraph.content), "hello");
}

#[test]
fn groups_are_transparent() {
    let (document, _) = parse_source(":--\nhello\n--:\nworld");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["hello", "world"]);
    assert_eq!(document.root.content.len(), 2);
}

#[test]
fn self_referential_definition_hits_the_reparse_limit_once() {
    let (document, cxt) = parse_source("[-define-block x][.x]\n\n[.x]");
    assert_eq!(codes(&document), [E_REACHED_REPARSE_LIMIT]);

    // The instance carries at most `reparse_depth_limit` generated
    // levels, then degrades to an unexpanded leaf.
    let BlockEntity::Modifier(instance) = &document.root.content[1] else {
        panic!("expected the instance node");
    };
    fn generated_levels(node: &emmm_core::BlockModifierNode) -> usize {
        match &node.expansion {
            None => 0,
            Some(expansion) => {
                1 + expansion
                    .iter()
                    .filter_map(|entity| match entity {
                        BlockEntity::Modifier(inner) => Some(generated_levels(inner)),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0)
            }
        }
    }
    let levels = generated_levels(instance);
    assert!(levels >= 2, "recursion never unfolded: {levels}");
    assert!(
        levels <= cxt.config.reparse_depth_limit,
        "too many levels: {levels}"
    );
}

#[test]
fn longest_name_wins() {
    let mut config = Configuration::new();
    config
        .block_modifiers
        .add(ModifierDefinition::<BlockEntity>::new("a", SlotType::None));
    config
        .block_modifiers
        .add(ModifierDefinition::<BlockEntity>::new("ab", SlotType::None));
    let mut cxt = ParseContext::new(config);
    let scanner = Scanner::new("[.ab]", SourceDescriptor::new("<test>"));
    let document = parse(scanner, &mut cxt);

    assert!(document.messages.is_empty(), "{:?}", document.messages);
    let BlockEntity::Modifier(node) = &document.root.content[0] else {
        panic!("expected a modifier node");
    };
    assert_eq!(node.definition.name, "ab");
}

#[test]
fn escapes_neutralize_reserved_tokens() {
    let (document, _) = parse_source("a\\[.b");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["a[.b"]);
}

#[test]
fn groups_nest() {
    let (document, _) = parse_source(":--\n:--\na\n--:\nb\n--:");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["a", "b"]);
}

#[test]
fn preformatted_block_ignores_modifier_syntax() {
    let (document, _) = parse_source("[.code]\nlet [.x] = $(y);\nmore\n");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    let BlockEntity::Modifier(node) = &document.root.content[0] else {
        panic!("expected the code block");
    };
    let BlockEntity::Preformatted(pre) = &node.content[0] else {
        panic!("expected preformatted content");
    };
    assert_eq!(pre.content.text, "let [.x] = $(y);\nmore");
}

#[test]
fn preformatted_inline_only_honours_the_closing_tag() {
    let (document, _) = parse_source("x [/code]a[.b$(v)[;] y");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    let BlockEntity::Paragraph(paragraph) = &document.root.content[0] else {
        panic!("expected a paragraph");
    };
    let code = paragraph
        .content
        .iter()
        .find_map(|entity| match entity {
            InlineEntity::Modifier(node) => Some(node),
            _ => None,
        })
        .expect("code node present");
    assert_eq!(inline_text(&code.content), "a[.b$(v)");
    assert!(code.location.actual_end.is_some());
}

#[test]
fn marker_head_takes_no_content() {
    let (document, _) = parse_source("[.quote;] text");
    assert_eq!(document.root.content.len(), 2);
    let BlockEntity::Modifier(node) = &document.root.content[0] else {
        panic!("expected the quote marker");
    };
    assert!(node.content.is_empty());
    assert_eq!(stripped_paragraphs(&document), ["text"]);
}

#[test]
fn unclosed_inline_modifier_is_reported() {
    let (document, _) = parse_source("[/emph]abc");
    assert_eq!(codes(&document), [E_UNCLOSED_INLINE_MODIFIER]);
    assert_eq!(stripped_paragraphs(&document), ["abc"]);
}

#[test]
fn broken_head_suggests_the_missing_bracket() {
    let source = "[.quote\nhello";
    let (document, _) = parse_source(source);
    assert_eq!(codes(&document), [E_EXPECTED]);

    let suggestion = &document.messages[0].suggestions[0];
    let (fixed, _) = suggestion.apply(source, 0);
    assert_eq!(fixed, "[.quote]\nhello");
}

#[test]
fn missing_group_close_suggests_itself() {
    let source = ":--\nhello";
    let (document, _) = parse_source(source);
    assert_eq!(codes(&document), [E_EXPECTED]);
    let suggestion = &document.messages[0].suggestions[0];
    let (fixed, _) = suggestion.apply(source, 0);
    assert_eq!(fixed, ":--\nhello--:");
}

#[test]
fn blank_line_before_content_warns_but_attaches() {
    let (document, _) = parse_source("[.quote]\n\ntext");
    assert_eq!(codes(&document), [W_UNNECESSARY_NEWLINE]);
    assert_eq!(document.messages[0].severity, MessageSeverity::Warning);
    let BlockEntity::Modifier(node) = &document.root.content[0] else {
        panic!("expected the quote");
    };
    let BlockEntity::Paragraph(paragraph) = &node.content[0] else {
        panic!("expected attached paragraph");
    };
    assert_eq!(inline_text(&paragraph.content), "text");
}

#[test]
fn block_opener_mid_paragraph_warns() {
    let (document, _) = parse_source("abc [.quote] x");
    assert_eq!(codes(&document), [W_NEW_BLOCK_SHOULD_BE_ON_NEWLINE]);
    assert_eq!(document.root.content.len(), 2);
}

#[test]
fn same_line_preformatted_content_warns() {
    let (document, _) = parse_source("[.code] same");
    assert_eq!(codes(&document), [W_CONTENT_SHOULD_BE_ON_NEWLINE]);
}

#[test]
fn stripped_documents_drop_system_nodes() {
    let (document, _) = parse_source("[-var a:1]\n\nhello");
    let stripped = document.to_stripped();
    assert!(
        stripped
            .root
            .content
            .iter()
            .all(|entity| !matches!(entity, BlockEntity::System(_)))
    );
    assert_eq!(stripped_paragraphs(&document), ["hello"]);
}

#[test]
fn severity_threshold_splits_errors_from_warnings() {
    let (document, _) = parse_source("abc [.unknown] x");
    let errors: Vec<_> = document
        .messages
        .iter()
        .filter(|message| message.severity >= MessageSeverity::Error)
        .collect();
    let warnings: Vec<_> = document
        .messages
        .iter()
        .filter(|message| message.severity == MessageSeverity::Warning)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(warnings.len(), 1);
}
