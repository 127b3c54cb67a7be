use std::rc::Rc;

use crate::ast::{BlockEntity, InlineEntity, TextNode};
use crate::config::{
    BlockModifierDefinition, Configuration, InlineModifierDefinition, ModifierDefinition,
    SlotType,
};
use crate::message::Message;

pub const PRINT_NAME: &str = "print";

/// A minimal exemplar set covering every slot type. Renderers key off
/// these definitions; everything else users build with `define-*`.
pub(crate) fn install(config: &mut Configuration) {
    config.block_modifiers.add(quote_modifier());
    config.block_modifiers.add(code_block_modifier());
    config.inline_modifiers.add(emph_modifier());
    config.inline_modifiers.add(code_inline_modifier());
    config.inline_modifiers.add(print_modifier());
}

fn quote_modifier() -> BlockModifierDefinition {
    ModifierDefinition::<BlockEntity> {
        role_hint: Some("quote".to_string()),
        ..ModifierDefinition::new("quote", SlotType::Normal)
    }
}

fn code_block_modifier() -> BlockModifierDefinition {
    ModifierDefinition::<BlockEntity> {
        role_hint: Some("code".to_string()),
        ..ModifierDefinition::new("code", SlotType::Preformatted)
    }
}

fn emph_modifier() -> InlineModifierDefinition {
    ModifierDefinition::<InlineEntity> {
        role_hint: Some("emphasis".to_string()),
        ..ModifierDefinition::new("emph", SlotType::Normal)
    }
}

fn code_inline_modifier() -> InlineModifierDefinition {
    ModifierDefinition::<InlineEntity> {
        role_hint: Some("code".to_string()),
        ..ModifierDefinition::new("code", SlotType::Preformatted)
    }
}

/// `[/print args…]` expands to the text of its expanded arguments.
fn print_modifier() -> InlineModifierDefinition {
    ModifierDefinition::<InlineEntity> {
        prepare_expand: Some(Rc::new(|node, cxt| {
            let mut messages = Vec::new();
            for argument in node.arguments.iter_mut() {
                if argument.expand(cxt, true).is_none() && cxt.delay_depth == 0 {
                    messages.push(Message::invalid_argument(
                        argument.location.clone(),
                        format!("cannot expand argument `{}`", argument.raw_text()),
                    ));
                }
            }
            messages
        })),
        expand: Some(Rc::new(|node, cxt, _immediate| {
            let values = node.expand_arguments(cxt, true)?;
            Some(vec![InlineEntity::Text(TextNode {
                location: node.location.clone(),
                content: values.concat(),
            })])
        })),
        ..ModifierDefinition::new(PRINT_NAME, SlotType::None)
    }
}
