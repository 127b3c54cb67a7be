use std::rc::Rc;

use crate::ast::{BlockEntity, InlineEntity, NodeState, SystemModifierNode};
use crate::config::{
    Configuration, ModifierDefinition, ParseContext, SlotType, SystemModifierDefinition,
};
use crate::message::Message;

use super::{
    BodyCell, DefinitionStack, PendingDefinition, UserDefinitionSpec, bind_argument_definitions,
    bind_block_slot, bind_inline_slot, compile_block_definition, compile_inline_definition,
    new_body_cell, unbind,
};

pub(crate) fn install(config: &mut Configuration) {
    config.system_modifiers.add(define_block_modifier());
    config.system_modifiers.add(define_inline_modifier());
}

/// Node state of a `define-block` use. `spec: None` means the head was
/// malformed; the definition is inert but parsing continues.
struct DefineBlockState {
    spec: Option<UserDefinitionSpec>,
    body: BodyCell<BlockEntity>,
    collision: bool,
}

struct DefineInlineState {
    spec: Option<UserDefinitionSpec>,
    body: BodyCell<InlineEntity>,
    collision: bool,
}

fn define_block_modifier() -> SystemModifierDefinition {
    ModifierDefinition::<BlockEntity> {
        delay_content_expansion: true,
        always_try_expand: true,
        before_parse_content: Some(Rc::new(|node, cxt| ensure_block_state(node, cxt, true))),
        after_parse_content: Some(Rc::new(|node, cxt| {
            let has_spec = state_name_block(node).is_some();
            if has_spec {
                finish_capture(node, cxt, state_name_block(node));
            }
            Vec::new()
        })),
        prepare_expand: Some(Rc::new(|node, cxt| {
            let mut messages = ensure_block_state(node, cxt, false);
            if let Some(name) = collision_name_block(node) {
                messages.push(Message::name_already_defined(
                    definition_name_location(node),
                    &name,
                ));
            }
            messages
        })),
        expand: Some(Rc::new(|node, _cxt, _immediate| {
            let state = node.state.as_ref()?;
            let content = node.content.clone();
            let _ = state.with::<DefineBlockState, _>(|state| {
                if state.spec.is_some() {
                    *state.body.borrow_mut() = Some(content);
                }
            });
            Some(Vec::new())
        })),
        ..ModifierDefinition::new("define-block", SlotType::Normal)
    }
}

fn define_inline_modifier() -> SystemModifierDefinition {
    ModifierDefinition::<BlockEntity> {
        delay_content_expansion: true,
        always_try_expand: true,
        before_parse_content: Some(Rc::new(|node, cxt| ensure_inline_state(node, cxt, true))),
        after_parse_content: Some(Rc::new(|node, cxt| {
            let mut messages = Vec::new();
            for entity in &node.content {
                if !matches!(entity, BlockEntity::Paragraph(_)) {
                    messages.push(Message::invalid_argument(
                        entity.location().clone(),
                        "an inline definition body may only hold paragraph content",
                    ));
                }
            }
            let has_spec = state_name_inline(node).is_some();
            if has_spec {
                finish_capture(node, cxt, state_name_inline(node));
            }
            messages
        })),
        prepare_expand: Some(Rc::new(|node, cxt| {
            let mut messages = ensure_inline_state(node, cxt, false);
            if let Some(name) = collision_name_inline(node) {
                messages.push(Message::name_already_defined(
                    definition_name_location(node),
                    &name,
                ));
            }
            messages
        })),
        expand: Some(Rc::new(|node, _cxt, _immediate| {
            let state = node.state.as_ref()?;
            let flattened = flatten_inline_body(&node.content);
            let _ = state.with::<DefineInlineState, _>(|state| {
                if state.spec.is_some() {
                    *state.body.borrow_mut() = Some(flattened);
                }
            });
            Some(Vec::new())
        })),
        ..ModifierDefinition::new("define-inline", SlotType::Normal)
    }
}

/// Parses the head, pre-registers the definition under its new name (so a
/// body may invoke itself), and, while capturing, binds `$arg` and slot
/// definitions for the body parse. Runs at most once per node; a head
/// whose arguments cannot resolve yet (inside an enclosing capture) is
/// retried on the next reparse.
fn ensure_block_state(
    node: &mut SystemModifierNode,
    cxt: &mut ParseContext,
    capturing: bool,
) -> Vec<Message> {
    if node.state.is_some() {
        return Vec::new();
    }
    let mut messages = Vec::new();
    let Some(values) = expand_head_arguments(node, cxt, &mut messages) else {
        return messages;
    };
    let spec = parse_definition_head(&values, node, &mut messages);

    let body = new_body_cell();
    let mut collision = false;
    if let Some(spec) = &spec {
        collision = cxt.config.block_modifiers.has(&spec.name);
        cxt.config
            .block_modifiers
            .add(compile_block_definition(spec, body.clone()));
        if capturing {
            let mut bound = bind_argument_definitions(cxt, &spec.arg_names);
            if let Some(slot) = &spec.slot_name {
                bound.push(bind_block_slot(cxt, slot));
            }
            cxt.get_or_init::<DefinitionStack>().0.push(PendingDefinition {
                name: spec.name.clone(),
                bound,
            });
        }
    }
    node.state = Some(NodeState::new(DefineBlockState {
        spec,
        body,
        collision,
    }));
    messages
}

fn ensure_inline_state(
    node: &mut SystemModifierNode,
    cxt: &mut ParseContext,
    capturing: bool,
) -> Vec<Message> {
    if node.state.is_some() {
        return Vec::new();
    }
    let mut messages = Vec::new();
    let Some(values) = expand_head_arguments(node, cxt, &mut messages) else {
        return messages;
    };
    let spec = parse_definition_head(&values, node, &mut messages);

    let body = new_body_cell();
    let mut collision = false;
    if let Some(spec) = &spec {
        collision = cxt.config.inline_modifiers.has(&spec.name);
        cxt.config
            .inline_modifiers
            .add(compile_inline_definition(spec, body.clone()));
        if capturing {
            let mut bound = bind_argument_definitions(cxt, &spec.arg_names);
            if let Some(slot) = &spec.slot_name {
                bound.push(bind_inline_slot(cxt, slot));
            }
            cxt.get_or_init::<DefinitionStack>().0.push(PendingDefinition {
                name: spec.name.clone(),
                bound,
            });
        }
    }
    node.state = Some(NodeState::new(DefineInlineState {
        spec,
        body,
        collision,
    }));
    messages
}

/// Expands the head arguments to strings. Inside an enclosing capture an
/// unresolved argument is not an error yet: the whole head parse is
/// retried when the surrounding definition instantiates.
pub(crate) fn expand_head_arguments(
    node: &mut SystemModifierNode,
    cxt: &mut ParseContext,
    messages: &mut Vec<Message>,
) -> Option<Vec<String>> {
    let mut values = Vec::with_capacity(node.arguments.len());
    for argument in node.arguments.iter_mut() {
        match argument.expand(cxt, true) {
            Some(value) => values.push(value),
            None => {
                if cxt.delay_depth == 0 {
                    messages.push(Message::invalid_argument(
                        argument.location.clone(),
                        format!("cannot expand argument `{}`", argument.raw_text()),
                    ));
                    node.state = Some(NodeState::new(()));
                }
                return None;
            }
        }
    }
    Some(values)
}

/// `name arg₀ … argₙ (slot)?` — the parenthesised final argument names
/// the content slot.
fn parse_definition_head(
    values: &[String],
    node: &SystemModifierNode,
    messages: &mut Vec<Message>,
) -> Option<UserDefinitionSpec> {
    if values.is_empty() {
        messages.push(Message::argument_count_mismatch(node.head.clone(), 1, 0));
        return None;
    }
    let name = values[0].clone();
    if name.is_empty() {
        messages.push(Message::invalid_argument(
            definition_name_location(node),
            "the definition name is empty",
        ));
        return None;
    }

    let mut arg_names = Vec::new();
    let mut slot_name = None;
    for (index, value) in values[1..].iter().enumerate() {
        if let Some(inner) = slot_marker(value) {
            if index + 2 != values.len() {
                messages.push(Message::invalid_argument(
                    node.arguments[index + 1].location.clone(),
                    "the content slot must be the last argument",
                ));
            }
            slot_name = Some(inner.to_string());
        } else {
            arg_names.push(value.clone());
        }
    }
    Some(UserDefinitionSpec {
        name,
        arg_names,
        slot_name,
    })
}

pub(crate) fn slot_marker(value: &str) -> Option<&str> {
    value.strip_prefix('(')?.strip_suffix(')')
}

pub(crate) fn definition_name_location(node: &SystemModifierNode) -> crate::ast::LocationRange {
    node.arguments
        .first()
        .map(|argument| argument.location.clone())
        .unwrap_or_else(|| node.head.clone())
}

/// Pops this definition's capture entry and unregisters its bound names.
pub(crate) fn finish_capture(
    _node: &SystemModifierNode,
    cxt: &mut ParseContext,
    expected_name: Option<String>,
) {
    let pending = cxt
        .get_mut::<DefinitionStack>()
        .and_then(|stack| stack.0.pop());
    if let Some(pending) = pending {
        debug_assert_eq!(Some(&pending.name), expected_name.as_ref());
        unbind(cxt, pending.bound);
    }
}

fn state_name_block(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<DefineBlockState, _>(|state| {
            state.spec.as_ref().map(|spec| spec.name.clone())
        })
        .flatten()
}

fn state_name_inline(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<DefineInlineState, _>(|state| {
            state.spec.as_ref().map(|spec| spec.name.clone())
        })
        .flatten()
}

fn collision_name_block(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<DefineBlockState, _>(|state| {
            if state.collision {
                state.spec.as_ref().map(|spec| spec.name.clone())
            } else {
                None
            }
        })
        .flatten()
}

fn collision_name_inline(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<DefineInlineState, _>(|state| {
            if state.collision {
                state.spec.as_ref().map(|spec| spec.name.clone())
            } else {
                None
            }
        })
        .flatten()
}

fn flatten_inline_body(content: &[BlockEntity]) -> Vec<InlineEntity> {
    let mut out = Vec::new();
    for entity in content {
        if let BlockEntity::Paragraph(node) = entity {
            out.extend(node.content.iter().cloned());
        }
    }
    out
}
