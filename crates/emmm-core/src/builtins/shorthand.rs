use std::rc::Rc;

use crate::ast::{BlockEntity, InlineEntity, NodeState, SystemModifierNode};
use crate::config::{
    Configuration, ModifierDefinition, ParseContext, Shorthand, SlotType,
    SystemModifierDefinition,
};
use crate::message::Message;

use super::define::{
    definition_name_location, expand_head_arguments, finish_capture, slot_marker,
};
use super::{
    BodyCell, DefinitionStack, PendingDefinition, UserDefinitionSpec, bind_argument_definitions,
    bind_block_slot, bind_inline_slot, compile_block_definition, compile_inline_definition,
    new_body_cell,
};

pub(crate) fn install(config: &mut Configuration) {
    config.system_modifiers.add(inline_shorthand_modifier());
    config.system_modifiers.add(block_shorthand_modifier());
}

/// The compiled pattern of a `*-shorthand` head:
/// `name arg₀ part₀ arg₁ part₁ … (slot) postfix`.
struct ShorthandSpec {
    user: UserDefinitionSpec,
    parts: Vec<String>,
    /// `Some` iff the shorthand has a content slot.
    postfix: Option<String>,
}

struct InlineShorthandState {
    spec: Option<ShorthandSpec>,
    body: BodyCell<InlineEntity>,
    collision: bool,
}

struct BlockShorthandState {
    spec: Option<ShorthandSpec>,
    body: BodyCell<BlockEntity>,
    collision: bool,
}

fn inline_shorthand_modifier() -> SystemModifierDefinition {
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
                        "an inline shorthand body may only hold paragraph content",
                    ));
                }
            }
            let name = inline_state_name(node);
            if name.is_some() {
                finish_capture(node, cxt, name);
            }
            messages
        })),
        prepare_expand: Some(Rc::new(|node, cxt| {
            let mut messages = ensure_inline_state(node, cxt, false);
            if let Some(name) = inline_collision_name(node) {
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
            let _ = state.with::<InlineShorthandState, _>(|state| {
                if state.spec.is_some() {
                    *state.body.borrow_mut() = Some(flattened);
                }
            });
            Some(Vec::new())
        })),
        ..ModifierDefinition::new("inline-shorthand", SlotType::Normal)
    }
}

fn block_shorthand_modifier() -> SystemModifierDefinition {
    ModifierDefinition::<BlockEntity> {
        delay_content_expansion: true,
        always_try_expand: true,
        before_parse_content: Some(Rc::new(|node, cxt| ensure_block_state(node, cxt, true))),
        after_parse_content: Some(Rc::new(|node, cxt| {
            let name = block_state_name(node);
            if name.is_some() {
                finish_capture(node, cxt, name);
            }
            Vec::new()
        })),
        prepare_expand: Some(Rc::new(|node, cxt| {
            let mut messages = ensure_block_state(node, cxt, false);
            if let Some(name) = block_collision_name(node) {
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
            let _ = state.with::<BlockShorthandState, _>(|state| {
                if state.spec.is_some() {
                    *state.body.borrow_mut() = Some(content);
                }
            });
            Some(Vec::new())
        })),
        ..ModifierDefinition::new("block-shorthand", SlotType::Normal)
    }
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
    let spec = parse_shorthand_head(&values, node, false, &mut messages);

    let body = new_body_cell();
    let mut collision = false;
    if let Some(spec) = &spec {
        collision = cxt.config.inline_shorthands.has(&spec.user.name);
        let definition = Rc::new(compile_inline_definition(&spec.user, body.clone()));
        cxt.config.inline_shorthands.add(Shorthand {
            name: spec.user.name.clone(),
            parts: spec.parts.clone(),
            postfix: spec.postfix.clone(),
            definition,
        });
        if capturing {
            let mut bound = bind_argument_definitions(cxt, &spec.user.arg_names);
            if let Some(slot) = &spec.user.slot_name {
                bound.push(bind_inline_slot(cxt, slot));
            }
            cxt.get_or_init::<DefinitionStack>().0.push(PendingDefinition {
                name: spec.user.name.clone(),
                bound,
            });
        }
    }
    node.state = Some(NodeState::new(InlineShorthandState {
        spec,
        body,
        collision,
    }));
    messages
}

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
    let spec = parse_shorthand_head(&values, node, true, &mut messages);

    let body = new_body_cell();
    let mut collision = false;
    if let Some(spec) = &spec {
        collision = cxt.config.block_shorthands.has(&spec.user.name);
        let definition = Rc::new(compile_block_definition(&spec.user, body.clone()));
        cxt.config.block_shorthands.add(Shorthand {
            name: spec.user.name.clone(),
            parts: spec.parts.clone(),
            postfix: spec.postfix.clone(),
            definition,
        });
        if capturing {
            let mut bound = bind_argument_definitions(cxt, &spec.user.arg_names);
            if let Some(slot) = &spec.user.slot_name {
                bound.push(bind_block_slot(cxt, slot));
            }
            cxt.get_or_init::<DefinitionStack>().0.push(PendingDefinition {
                name: spec.user.name.clone(),
                bound,
            });
        }
    }
    node.state = Some(NodeState::new(BlockShorthandState {
        spec,
        body,
        collision,
    }));
    messages
}

/// `name arg₀ part₀ … (slot) postfix` with a trailing empty argument (or
/// the absence of a slot) marking a marker shorthand.
fn parse_shorthand_head(
    values: &[String],
    node: &SystemModifierNode,
    block: bool,
    messages: &mut Vec<Message>,
) -> Option<ShorthandSpec> {
    if values.is_empty() {
        messages.push(Message::argument_count_mismatch(node.head.clone(), 1, 0));
        return None;
    }
    let name = values[0].clone();
    if name.is_empty() {
        messages.push(Message::invalid_argument(
            definition_name_location(node),
            "the shorthand opening is empty",
        ));
        return None;
    }

    let mut arg_names = Vec::new();
    let mut parts = Vec::new();
    let mut slot_name = None;
    let mut postfix = None;
    let mut index = 1;
    while index < values.len() {
        let value = &values[index];
        if let Some(inner) = slot_marker(value) {
            if index + 1 < values.len() {
                postfix = Some(values[index + 1].clone());
                slot_name = Some(inner.to_string());
                if index + 2 < values.len() {
                    messages.push(Message::invalid_argument(
                        node.arguments[index + 2].location.clone(),
                        "nothing may follow the slot postfix",
                    ));
                }
            } else {
                messages.push(Message::invalid_argument(
                    node.arguments[index].location.clone(),
                    "a content slot needs a postfix argument",
                ));
            }
            break;
        }
        if index + 1 < values.len() {
            let part = values[index + 1].clone();
            if part.is_empty() {
                messages.push(Message::invalid_argument(
                    node.arguments[index + 1].location.clone(),
                    "a shorthand part may not be empty",
                ));
            } else {
                arg_names.push(value.clone());
                parts.push(part);
            }
            index += 2;
            continue;
        }
        // Lone trailing argument: empty means "marker", anything else is
        // a part with no argument to collect.
        if !value.is_empty() {
            messages.push(Message::invalid_argument(
                node.arguments[index].location.clone(),
                "dangling shorthand argument",
            ));
        }
        index += 1;
    }

    if !block {
        if let Some(value) = &postfix {
            if value.is_empty() {
                messages.push(Message::invalid_argument(
                    definition_name_location(node),
                    "an inline content slot needs a non-empty postfix",
                ));
                postfix = None;
                slot_name = None;
            }
        }
    }

    Some(ShorthandSpec {
        user: UserDefinitionSpec {
            name,
            arg_names,
            slot_name,
        },
        parts,
        postfix,
    })
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

fn inline_state_name(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<InlineShorthandState, _>(|state| {
            state.spec.as_ref().map(|spec| spec.user.name.clone())
        })
        .flatten()
}

fn block_state_name(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<BlockShorthandState, _>(|state| {
            state.spec.as_ref().map(|spec| spec.user.name.clone())
        })
        .flatten()
}

fn inline_collision_name(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<InlineShorthandState, _>(|state| {
            if state.collision {
                state.spec.as_ref().map(|spec| spec.user.name.clone())
            } else {
                None
            }
        })
        .flatten()
}

fn block_collision_name(node: &SystemModifierNode) -> Option<String> {
    let state = node.state.as_ref()?;
    state
        .with::<BlockShorthandState, _>(|state| {
            if state.collision {
                state.spec.as_ref().map(|spec| spec.user.name.clone())
            } else {
                None
            }
        })
        .flatten()
}
