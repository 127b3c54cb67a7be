use emmm_core::{
    BlockEntity, Configuration, Document, InlineEntity, ParseContext, Scanner, SourceDescriptor,
    E_ARGUMENT_COUNT_MISMATCH, E_INVALID_ARGUMENT, E_NAME_ALREADY_DEFINED, E_REFERRED, parse,
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

fn stripped_paragraphs(document: &Document) -> Vec<String> {
    document
        .to_stripped()
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
fn define_inline_with_arguments() {
    let (document, _) = parse_source("[-define-inline wrap:a][/print $(a):$(a)]\n\n[/wrap:hi]");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["hihi"]);
}

#[test]
fn define_inline_argument_as_modifier() {
    let (document, _) = parse_source("[-define-inline wrap:a]<[/$a]>\n\n[/wrap:mid]");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["<mid>"]);
}

#[test]
fn define_block_with_content_slot() {
    let source = "[-define-block note:(content)]\n[.quote]\n[.content]\n\n[.note]\nhello";
    let (document, _) = parse_source(source);
    assert!(document.messages.is_empty(), "{:?}", document.messages);

    let stripped = document.to_stripped();
    // The instance rewrote to its body: a quote holding the slot content.
    let BlockEntity::Modifier(quote) = &stripped.root.content[0] else {
        panic!("expected the quote, got {:?}", stripped.root.content);
    };
    assert_eq!(quote.definition.name, "quote");
    let BlockEntity::Paragraph(paragraph) = &quote.content[0] else {
        panic!("expected slot content inside the quote");
    };
    assert_eq!(inline_text(&paragraph.content), "hello");
}

#[test]
fn inline_shorthand_with_content_slot() {
    let source = "[-inline-shorthand q:(s):Q][/emph][/s][;]\n\nqHELLOQ";
    let (document, _) = parse_source(source);
    assert!(document.messages.is_empty(), "{:?}", document.messages);

    let stripped = document.to_stripped();
    let BlockEntity::Paragraph(paragraph) = &stripped.root.content[0] else {
        panic!("expected a paragraph");
    };
    let InlineEntity::Modifier(emph) = &paragraph.content[0] else {
        panic!("expected the emph node, got {:?}", paragraph.content);
    };
    assert_eq!(emph.definition.name, "emph");
    assert_eq!(inline_text(&emph.content), "HELLO");
}

#[test]
fn block_shorthand_takes_the_following_block() {
    let source = "[-block-shorthand >>:(body):]\n[.quote]\n[.body]\n\n>> indented";
    let (document, _) = parse_source(source);
    assert!(document.messages.is_empty(), "{:?}", document.messages);

    let stripped = document.to_stripped();
    let BlockEntity::Modifier(quote) = &stripped.root.content[0] else {
        panic!("expected the quote, got {:?}", stripped.root.content);
    };
    assert_eq!(quote.definition.name, "quote");
    let BlockEntity::Paragraph(paragraph) = &quote.content[0] else {
        panic!("expected slot content");
    };
    assert_eq!(inline_text(&paragraph.content), "indented");
}

#[test]
fn var_registers_an_interpolator() {
    let (document, _) = parse_source("[-var greeting:hello]\n\n[/print $(greeting)]");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["hello"]);
}

#[test]
fn var_name_matches_directly_as_interpolator() {
    let (document, _) = parse_source("[-var greeting:hello]\n\n[/print $greeting]");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["hello"]);
}

#[test]
fn interpolators_prefer_the_longest_opener() {
    let (document, _) = parse_source("[-var a:1]\n\n[-var ab:2]\n\n[/print $ab]");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["2"]);
}

#[test]
fn redefining_a_variable_reports_and_replaces() {
    let (document, _) = parse_source("[-var a:1]\n\n[-var a:2]\n\n[/print $(a)]");
    assert_eq!(codes(&document), [E_NAME_ALREADY_DEFINED]);
    assert_eq!(stripped_paragraphs(&document), ["2"]);
}

#[test]
fn redefining_a_modifier_reports() {
    let (document, _) = parse_source("[-define-block x] a\n\n[-define-block x] b");
    assert_eq!(codes(&document), [E_NAME_ALREADY_DEFINED]);
}

#[test]
fn instance_argument_count_is_checked() {
    let (document, _) = parse_source("[-define-inline wrap:a][/print $(a)]\n\n[/wrap]");
    assert!(codes(&document).contains(&E_ARGUMENT_COUNT_MISMATCH));
}

#[test]
fn unresolved_interpolation_is_reported_at_the_use_site() {
    let source = "[-define-inline w][/print $(nope)]\n\n[/w]";
    let (document, _) = parse_source(source);
    assert_eq!(codes(&document), [E_REFERRED]);

    let message = &document.messages[0];
    assert_eq!(message.origin().code, E_INVALID_ARGUMENT);
    // The wrapper points at the instantiation site in the written
    // document.
    let instance_at = source.find("[/w]").expect("instance present");
    assert_eq!(message.location.start, instance_at);
}

#[test]
fn definitions_do_not_leak_into_the_source_configuration() {
    let base = Configuration::with_builtins();
    let mut cxt = ParseContext::new(Configuration::from(&base));
    let scanner = Scanner::new("[-inline-shorthand p] 123\n\np", SourceDescriptor::new("<test>"));
    let document = parse(scanner, &mut cxt);

    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert!(cxt.config.inline_shorthands.has("p"));
    assert!(!base.inline_shorthands.has("p"));
}

#[test]
fn bound_argument_names_are_scoped_to_the_body() {
    let (document, cxt) = parse_source("[-define-inline wrap:a][/$a]\n\n[/wrap:x]");
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    // `$a` was only live while the body was being captured.
    assert!(!cxt.config.inline_modifiers.has("$a"));
    assert!(!cxt.config.argument_interpolators.has("$a"));
}

#[test]
fn nested_definitions_shadow_and_restore() {
    let source = concat!(
        "[-var a:outer]\n\n",
        "[-define-inline wrap:a][/print $(a)]\n\n",
        "[/print $(a)] [/wrap:inner] [/print $(a)]",
    );
    let (document, _) = parse_source(source);
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["outer inner outer"]);
}

#[test]
fn shorthand_bodies_may_use_shorthands() {
    let source = concat!(
        "[-inline-shorthand !:x:!][/emph][/print $(x)][;]\n\n",
        "[-inline-shorthand ?:y:?]<!$(y)!>\n\n",
        "?deep?",
    );
    let (document, _) = parse_source(source);
    assert!(document.messages.is_empty(), "{:?}", document.messages);
    assert_eq!(stripped_paragraphs(&document), ["<deep>"]);
}
