use std::panic;

use emmm_core::{
    ArgumentEntity, BlockEntity, Configuration, Document, InlineEntity, LocationRange,
    ModifierArgument, ParseContext, Scanner, SourceDescriptor, parse,
};

const CASES: usize = 200;
const MAX_LEN: usize = 512;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789 \n\t[]/.;:$()-\\\"'=!?";

fn parse_source(source: &str) -> Document {
    let mut cxt = ParseContext::new(Configuration::with_builtins());
    let scanner = Scanner::new(source, SourceDescriptor::new("<random>"));
    parse(scanner, &mut cxt)
}

#[test]
fn parser_never_panics_on_random_input() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = Lcg::new(0x7f4a_2d91_13b4_55a1);
    for case in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let source = random_string(&mut rng, len);
        let result = panic::catch_unwind(|| parse_source(&source));
        if result.is_err() {
            return Err(format!("parse panicked for case {}: {:?}", case, source).into());
        }
    }
    Ok(())
}

#[test]
fn ranges_stay_in_bounds_on_random_input() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = Lcg::new(0x91d4_2f8e_c1a3_044f);
    for case in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let source = random_string(&mut rng, len);
        let document = parse_source(&source);
        let source_len = source.chars().count();
        if let Err(message) = check_document(&document, source_len) {
            return Err(format!(
                "range check failed for case {}: {}\nSource:\n---\n{}\n---",
                case, message, source
            )
            .into());
        }
    }
    Ok(())
}

#[test]
fn stripped_trees_have_no_system_nodes_on_random_input() {
    let mut rng = Lcg::new(0x5ad1_90cf_7b22_e013);
    for _ in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let source = random_string(&mut rng, len);
        let stripped = parse_source(&source).to_stripped();
        assert_stripped_blocks(&stripped.root.content);
    }
}

fn assert_stripped_blocks(blocks: &[BlockEntity]) {
    for entity in blocks {
        match entity {
            BlockEntity::System(_) => panic!("system node survived stripping"),
            BlockEntity::Paragraph(node) => assert_stripped_inlines(&node.content),
            BlockEntity::Preformatted(_) => {}
            BlockEntity::Modifier(node) => {
                assert!(
                    node.expansion.is_none(),
                    "stripped node kept an expansion field"
                );
                assert_stripped_blocks(&node.content);
            }
        }
    }
}

fn assert_stripped_inlines(inlines: &[InlineEntity]) {
    for entity in inlines {
        if let InlineEntity::Modifier(node) = entity {
            assert!(
                node.expansion.is_none(),
                "stripped node kept an expansion field"
            );
            assert_stripped_inlines(&node.content);
        }
    }
}

// ----------------------------------------------------------------------
// Range checking. Containment and sibling ordering are asserted for
// ranges written in the source; generated ranges (those carrying an
// `original` link) are only checked for bounds, since they point at the
// definition site.

fn check_document(document: &Document, source_len: usize) -> Result<(), String> {
    check_range(&document.root.location, source_len, "root")?;
    check_blocks(
        &document.root.content,
        Some(&document.root.location),
        source_len,
        "root.content",
    )
}

fn check_blocks(
    blocks: &[BlockEntity],
    parent: Option<&LocationRange>,
    source_len: usize,
    context: &str,
) -> Result<(), String> {
    let mut prev_end = parent.map(|range| range.start).unwrap_or(0);
    for (index, entity) in blocks.iter().enumerate() {
        let label = format!("{}[{}]", context, index);
        let location = entity.location();
        check_range(location, source_len, &label)?;
        if location.original.is_none() {
            if let Some(parent) = parent {
                check_within(location, parent, &label)?;
            }
            if location.start < prev_end {
                return Err(format!(
                    "{} range {}..{} overlaps previous end {}",
                    label, location.start, location.end, prev_end
                ));
            }
            prev_end = location.end;
        }
        check_block(entity, source_len, &label)?;
    }
    Ok(())
}

fn check_block(entity: &BlockEntity, source_len: usize, context: &str) -> Result<(), String> {
    match entity {
        BlockEntity::Paragraph(node) => check_inlines(
            &node.content,
            Some(&node.location),
            source_len,
            &format!("{}.paragraph", context),
        ),
        BlockEntity::Preformatted(_) => Ok(()),
        BlockEntity::Modifier(node) | BlockEntity::System(node) => {
            check_range(&node.head, source_len, &format!("{}.head", context))?;
            for (index, argument) in node.arguments.iter().enumerate() {
                check_argument(
                    argument,
                    source_len,
                    &format!("{}.arguments[{}]", context, index),
                )?;
            }
            check_blocks(
                &node.content,
                Some(&node.location),
                source_len,
                &format!("{}.content", context),
            )?;
            if let Some(expansion) = &node.expansion {
                check_blocks(
                    expansion,
                    None,
                    source_len,
                    &format!("{}.expansion", context),
                )?;
            }
            Ok(())
        }
    }
}

fn check_inlines(
    inlines: &[InlineEntity],
    parent: Option<&LocationRange>,
    source_len: usize,
    context: &str,
) -> Result<(), String> {
    let mut prev_end = parent.map(|range| range.start).unwrap_or(0);
    for (index, entity) in inlines.iter().enumerate() {
        let label = format!("{}[{}]", context, index);
        let location = entity.location();
        check_range(location, source_len, &label)?;
        if location.original.is_none() {
            if let Some(parent) = parent {
                check_within(location, parent, &label)?;
            }
            if location.start < prev_end {
                return Err(format!(
                    "{} range {}..{} overlaps previous end {}",
                    label, location.start, location.end, prev_end
                ));
            }
            prev_end = location.end;
        }
        if let InlineEntity::Modifier(node) = entity {
            check_range(&node.head, source_len, &format!("{}.head", label))?;
            for (arg_index, argument) in node.arguments.iter().enumerate() {
                check_argument(
                    argument,
                    source_len,
                    &format!("{}.arguments[{}]", label, arg_index),
                )?;
            }
            check_inlines(
                &node.content,
                Some(&node.location),
                source_len,
                &format!("{}.content", label),
            )?;
            if let Some(expansion) = &node.expansion {
                check_inlines(
                    expansion,
                    None,
                    source_len,
                    &format!("{}.expansion", label),
                )?;
            }
        }
    }
    Ok(())
}

fn check_argument(
    argument: &ModifierArgument,
    source_len: usize,
    context: &str,
) -> Result<(), String> {
    check_range(&argument.location, source_len, context)?;
    for (index, entity) in argument.content.iter().enumerate() {
        let label = format!("{}[{}]", context, index);
        check_range(entity.location(), source_len, &label)?;
        if let ArgumentEntity::Interpolation(node) = entity {
            check_argument(&node.argument, source_len, &format!("{}.inner", label))?;
        }
    }
    Ok(())
}

fn check_within(
    range: &LocationRange,
    parent: &LocationRange,
    context: &str,
) -> Result<(), String> {
    if range.start < parent.start || range.end > parent.end {
        return Err(format!(
            "{} range {}..{} not within parent {}..{}",
            context, range.start, range.end, parent.start, parent.end
        ));
    }
    Ok(())
}

fn check_range(range: &LocationRange, source_len: usize, context: &str) -> Result<(), String> {
    if range.start > range.end {
        return Err(format!(
            "{} inverted range {}..{}",
            context, range.start, range.end
        ));
    }
    if range.end > source_len {
        return Err(format!(
            "{} range {}..{} out of bounds (len={})",
            context, range.start, range.end, source_len
        ));
    }
    if let Some(actual_end) = range.actual_end {
        if actual_end < range.start || actual_end > range.end {
            return Err(format!(
                "{} actual_end {} outside range {}..{}",
                context, actual_end, range.start, range.end
            ));
        }
    }
    Ok(())
}

fn random_string(rng: &mut Lcg, len: usize) -> String {
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let index = rng.gen_range(0, CHARSET.len());
        let byte = CHARSET.get(index).copied().unwrap_or(b' ');
        out.push(byte as char);
    }
    out
}

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn gen_range(&mut self, min: usize, max: usize) -> usize {
        if max <= min {
            return min;
        }
        let span = max - min;
        let value = (self.next() >> 1) as usize;
        min + (value % span)
    }
}
