//! The built-in modifier families: the user-definition system modifiers
//! (`define-block`, `define-inline`, `block-shorthand`, `inline-shorthand`,
//! `var`), the `$(` interpolator, and a small exemplar set covering every
//! slot type.

mod basic;
mod define;
mod shorthand;
mod var;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{
    ArgumentEntity, BlockEntity, InlineEntity, LocationRange, ModifierArgument, TextNode,
};
use crate::config::{
    ArgumentInterpolatorDefinition, BlockModifierDefinition, Configuration,
    InlineModifierDefinition, ModifierDefinition, ParseContext, SlotType,
};

pub use basic::PRINT_NAME;

/// Registers every built-in definition into `config`.
pub fn install(config: &mut Configuration) {
    var::install(config);
    define::install(config);
    shorthand::install(config);
    basic::install(config);
}

/// The captured body of a user definition. Filled in when the defining
/// modifier expands; instances clone out of it per instantiation.
pub(crate) type BodyCell<E> = Rc<RefCell<Option<Vec<E>>>>;

pub(crate) fn new_body_cell<E>() -> BodyCell<E> {
    Rc::new(RefCell::new(None))
}

/// One live instantiation of a user-defined modifier or shorthand,
/// pushed around the reparse of its expansion.
pub(crate) struct Frame {
    pub vars: HashMap<String, String>,
    pub block_slot: Option<(String, Vec<BlockEntity>)>,
    pub inline_slot: Option<(String, Vec<InlineEntity>)>,
}

/// Store payload: instantiation frames, innermost last.
#[derive(Default)]
pub(crate) struct InstantiationFrames(pub Vec<Frame>);

/// Store payload: definitions currently capturing their body, innermost
/// last. Each entry owns the temporarily-bound argument and slot
/// definitions that must be unregistered when the capture ends.
#[derive(Default)]
pub(crate) struct DefinitionStack(pub Vec<PendingDefinition>);

pub(crate) struct PendingDefinition {
    pub name: String,
    pub bound: Vec<BoundDefinition>,
}

/// A definition registered only for the duration of a body capture,
/// remembering what it shadowed.
pub(crate) enum BoundDefinition {
    Block {
        name: String,
        previous: Option<Rc<BlockModifierDefinition>>,
    },
    Inline {
        name: String,
        previous: Option<Rc<InlineModifierDefinition>>,
    },
    Interpolator {
        name: String,
        previous: Option<Rc<ArgumentInterpolatorDefinition>>,
    },
}

pub(crate) fn lookup_variable(cxt: &ParseContext, name: &str) -> Option<String> {
    let frames = cxt.get::<InstantiationFrames>()?;
    for frame in frames.0.iter().rev() {
        if let Some(value) = frame.vars.get(name) {
            return Some(value.clone());
        }
    }
    None
}

pub(crate) fn find_block_slot(cxt: &ParseContext, name: &str) -> Option<Vec<BlockEntity>> {
    let frames = cxt.get::<InstantiationFrames>()?;
    for frame in frames.0.iter().rev() {
        if let Some((slot, content)) = &frame.block_slot {
            if slot == name {
                return Some(content.clone());
            }
        }
    }
    None
}

pub(crate) fn find_inline_slot(cxt: &ParseContext, name: &str) -> Option<Vec<InlineEntity>> {
    let frames = cxt.get::<InstantiationFrames>()?;
    for frame in frames.0.iter().rev() {
        if let Some((slot, content)) = &frame.inline_slot {
            if slot == name {
                return Some(content.clone());
            }
        }
    }
    None
}

/// Binds `$name` for each declared argument, both as an inline marker
/// modifier and as an interpolator, so a definition body can say `[/$x]`
/// and `$x` alike. All bound definitions resolve against the innermost
/// matching instantiation frame.
pub(crate) fn bind_argument_definitions(
    cxt: &mut ParseContext,
    arg_names: &[String],
) -> Vec<BoundDefinition> {
    let mut bound = Vec::new();
    for arg_name in arg_names {
        let dollar = format!("${arg_name}");

        let lookup_name = arg_name.clone();
        let modifier = ModifierDefinition::<InlineEntity> {
            always_try_expand: true,
            expand: Some(Rc::new(move |node, cxt, _immediate| {
                let value = lookup_variable(cxt, &lookup_name)?;
                Some(vec![InlineEntity::Text(TextNode {
                    location: node.location.clone(),
                    content: value,
                })])
            })),
            ..ModifierDefinition::new(&dollar, SlotType::None)
        };
        let previous = cxt.config.inline_modifiers.add(modifier);
        bound.push(BoundDefinition::Inline {
            name: dollar.clone(),
            previous,
        });

        let lookup_name = arg_name.clone();
        let mut interpolator = ArgumentInterpolatorDefinition::new(&dollar, "");
        interpolator.expand = Some(Rc::new(move |_content, cxt, _immediate| {
            lookup_variable(cxt, &lookup_name)
        }));
        let previous = cxt.config.argument_interpolators.add(interpolator);
        bound.push(BoundDefinition::Interpolator {
            name: dollar,
            previous,
        });
    }
    bound
}

pub(crate) fn bind_block_slot(cxt: &mut ParseContext, slot: &str) -> BoundDefinition {
    let lookup_name = slot.to_string();
    let definition = ModifierDefinition::<BlockEntity> {
        always_try_expand: true,
        expand: Some(Rc::new(move |node, cxt, _immediate| {
            let content = find_block_slot(cxt, &lookup_name)?;
            Some(instantiate_blocks(&content, &node.location))
        })),
        ..ModifierDefinition::new(slot, SlotType::None)
    };
    let previous = cxt.config.block_modifiers.add(definition);
    BoundDefinition::Block {
        name: slot.to_string(),
        previous,
    }
}

pub(crate) fn bind_inline_slot(cxt: &mut ParseContext, slot: &str) -> BoundDefinition {
    let lookup_name = slot.to_string();
    let definition = ModifierDefinition::<InlineEntity> {
        always_try_expand: true,
        expand: Some(Rc::new(move |node, cxt, _immediate| {
            let content = find_inline_slot(cxt, &lookup_name)?;
            Some(instantiate_inlines(&content, &node.location))
        })),
        ..ModifierDefinition::new(slot, SlotType::None)
    };
    let previous = cxt.config.inline_modifiers.add(definition);
    BoundDefinition::Inline {
        name: slot.to_string(),
        previous,
    }
}

/// Unregisters capture-scoped definitions, restoring whatever they
/// shadowed.
pub(crate) fn unbind(cxt: &mut ParseContext, bound: Vec<BoundDefinition>) {
    for entry in bound.into_iter().rev() {
        match entry {
            BoundDefinition::Block { name, previous } => match previous {
                Some(previous) => {
                    cxt.config.block_modifiers.add_shared(previous);
                }
                None => {
                    cxt.config.block_modifiers.remove(&name);
                }
            },
            BoundDefinition::Inline { name, previous } => match previous {
                Some(previous) => {
                    cxt.config.inline_modifiers.add_shared(previous);
                }
                None => {
                    cxt.config.inline_modifiers.remove(&name);
                }
            },
            BoundDefinition::Interpolator { name, previous } => match previous {
                Some(previous) => {
                    cxt.config.argument_interpolators.add_shared(previous);
                }
                None => {
                    cxt.config.argument_interpolators.remove(&name);
                }
            },
        }
    }
}

// ----------------------------------------------------------------------
// Compiled user definitions

/// The head of a user definition: the new name, its argument names, and
/// the optional content slot name.
#[derive(Clone, Debug)]
pub(crate) struct UserDefinitionSpec {
    pub name: String,
    pub arg_names: Vec<String>,
    pub slot_name: Option<String>,
}

/// Builds the definition a `define-block` / `block-shorthand` registers.
/// Instances expand to a stamped clone of the captured body; around the
/// reparse of that expansion an instantiation frame binds the argument
/// values and the slot content.
pub(crate) fn compile_block_definition(
    spec: &UserDefinitionSpec,
    body: BodyCell<BlockEntity>,
) -> BlockModifierDefinition {
    let slot_type = if spec.slot_name.is_some() {
        SlotType::Normal
    } else {
        SlotType::None
    };
    let arg_names: Rc<[String]> = spec.arg_names.clone().into();
    let slot_name = spec.slot_name.clone();

    ModifierDefinition::<BlockEntity> {
        prepare_expand: Some(user_prepare_expand(arg_names.len())),
        expand: Some(Rc::new(move |node, _cxt, _immediate| {
            let body = body.borrow();
            let body = body.as_ref()?;
            Some(instantiate_blocks(body, &node.location))
        })),
        before_process_expansion: Some(Rc::new(move |node, cxt| {
            let vars = bind_frame_vars(&arg_names, &mut node.arguments, cxt);
            let block_slot = slot_name.clone().map(|slot| (slot, node.content.clone()));
            cxt.get_or_init::<InstantiationFrames>().0.push(Frame {
                vars,
                block_slot,
                inline_slot: None,
            });
            Vec::new()
        })),
        after_process_expansion: Some(Rc::new(|_node, cxt| {
            if let Some(frames) = cxt.get_mut::<InstantiationFrames>() {
                frames.0.pop();
            }
            Vec::new()
        })),
        ..ModifierDefinition::new(&spec.name, slot_type)
    }
}

pub(crate) fn compile_inline_definition(
    spec: &UserDefinitionSpec,
    body: BodyCell<InlineEntity>,
) -> InlineModifierDefinition {
    let slot_type = if spec.slot_name.is_some() {
        SlotType::Normal
    } else {
        SlotType::None
    };
    let arg_names: Rc<[String]> = spec.arg_names.clone().into();
    let slot_name = spec.slot_name.clone();

    ModifierDefinition::<InlineEntity> {
        prepare_expand: Some(user_prepare_expand(arg_names.len())),
        expand: Some(Rc::new(move |node, _cxt, _immediate| {
            let body = body.borrow();
            let body = body.as_ref()?;
            Some(instantiate_inlines(body, &node.location))
        })),
        before_process_expansion: Some(Rc::new(move |node, cxt| {
            let vars = bind_frame_vars(&arg_names, &mut node.arguments, cxt);
            let inline_slot = slot_name.clone().map(|slot| (slot, node.content.clone()));
            cxt.get_or_init::<InstantiationFrames>().0.push(Frame {
                vars,
                block_slot: None,
                inline_slot,
            });
            Vec::new()
        })),
        after_process_expansion: Some(Rc::new(|_node, cxt| {
            if let Some(frames) = cxt.get_mut::<InstantiationFrames>() {
                frames.0.pop();
            }
            Vec::new()
        })),
        ..ModifierDefinition::new(&spec.name, slot_type)
    }
}

fn user_prepare_expand<E: 'static>(
    expected: usize,
) -> crate::config::HookFn<E> {
    Rc::new(move |node, cxt| {
        let mut messages = Vec::new();
        if node.arguments.len() != expected {
            messages.push(crate::message::Message::argument_count_mismatch(
                node.head.clone(),
                expected,
                node.arguments.len(),
            ));
        }
        for argument in node.arguments.iter_mut() {
            if argument.expand(cxt, true).is_none() {
                messages.push(crate::message::Message::invalid_argument(
                    argument.location.clone(),
                    format!("cannot expand argument `{}`", argument.raw_text()),
                ));
            }
        }
        messages
    })
}

fn bind_frame_vars(
    arg_names: &[String],
    arguments: &mut crate::ast::ArgumentSeq,
    cxt: &mut ParseContext,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (name, argument) in arg_names.iter().zip(arguments.iter_mut()) {
        if let Some(value) = argument.expand(cxt, true) {
            vars.insert(name.clone(), value);
        }
    }
    vars
}

// ----------------------------------------------------------------------
// Instantiation cloning

/// Clones captured entities for one instantiation, stamping every range
/// with the instantiation site so messages and tooling can walk back to
/// the writing that produced the output.
pub(crate) fn instantiate_blocks(
    entities: &[BlockEntity],
    site: &LocationRange,
) -> Vec<BlockEntity> {
    let mut clones = entities.to_vec();
    for entity in &mut clones {
        stamp_block(entity, site);
    }
    clones
}

pub(crate) fn instantiate_inlines(
    entities: &[InlineEntity],
    site: &LocationRange,
) -> Vec<InlineEntity> {
    let mut clones = entities.to_vec();
    for entity in &mut clones {
        stamp_inline(entity, site);
    }
    clones
}

fn stamp_range(range: &mut LocationRange, site: &LocationRange) {
    *range = range.clone().with_original(site.clone());
}

fn stamp_block(entity: &mut BlockEntity, site: &LocationRange) {
    match entity {
        BlockEntity::Paragraph(node) => {
            stamp_range(&mut node.location, site);
            for child in &mut node.content {
                stamp_inline(child, site);
            }
        }
        BlockEntity::Preformatted(node) => stamp_range(&mut node.location, site),
        BlockEntity::Modifier(node) | BlockEntity::System(node) => {
            stamp_range(&mut node.location, site);
            stamp_range(&mut node.head, site);
            for argument in node.arguments.iter_mut() {
                stamp_argument(argument, site);
            }
            for child in &mut node.content {
                stamp_block(child, site);
            }
            if let Some(expansion) = &mut node.expansion {
                for child in expansion {
                    stamp_block(child, site);
                }
            }
        }
    }
}

fn stamp_inline(entity: &mut InlineEntity, site: &LocationRange) {
    match entity {
        InlineEntity::Text(node) => stamp_range(&mut node.location, site),
        InlineEntity::Escaped(node) => stamp_range(&mut node.location, site),
        InlineEntity::Modifier(node) => {
            stamp_range(&mut node.location, site);
            stamp_range(&mut node.head, site);
            for argument in node.arguments.iter_mut() {
                stamp_argument(argument, site);
            }
            for child in &mut node.content {
                stamp_inline(child, site);
            }
            if let Some(expansion) = &mut node.expansion {
                for child in expansion {
                    stamp_inline(child, site);
                }
            }
        }
    }
}

fn stamp_argument(argument: &mut ModifierArgument, site: &LocationRange) {
    stamp_range(&mut argument.location, site);
    for entity in &mut argument.content {
        match entity {
            ArgumentEntity::Text(node) => stamp_range(&mut node.location, site),
            ArgumentEntity::Escaped(node) => stamp_range(&mut node.location, site),
            ArgumentEntity::Interpolation(node) => {
                stamp_range(&mut node.location, site);
                stamp_argument(&mut node.argument, site);
            }
        }
    }
}
