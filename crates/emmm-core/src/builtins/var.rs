use std::rc::Rc;

use crate::ast::BlockEntity;
use crate::config::{
    ArgumentInterpolatorDefinition, Configuration, ModifierDefinition, SlotType,
    SystemModifierDefinition,
};
use crate::message::Message;

use super::lookup_variable;

pub(crate) fn install(config: &mut Configuration) {
    config.argument_interpolators.add(dollar_interpolator());
    config.system_modifiers.add(var_modifier());
}

/// `$( name )` resolves `name` as a variable: innermost instantiation
/// frame first, then the `$name` interpolators registered by `var`.
fn dollar_interpolator() -> ArgumentInterpolatorDefinition {
    let mut definition = ArgumentInterpolatorDefinition::new("$(", ")");
    definition.expand = Some(Rc::new(|content, cxt, immediate| {
        if let Some(value) = lookup_variable(cxt, content) {
            return Some(value);
        }
        let name = format!("${content}");
        let global = cxt.config.argument_interpolators.get(&name).cloned()?;
        let expand = global.expand.clone()?;
        (*expand)("", cxt, immediate)
    }));
    definition
}

/// `[-var name:value]` registers the interpolator `$name`, expanding to
/// `value`.
fn var_modifier() -> SystemModifierDefinition {
    ModifierDefinition::<BlockEntity> {
        delay_content_expansion: true,
        always_try_expand: true,
        prepare_expand: Some(Rc::new(|node, cxt| {
            let mut messages = Vec::new();
            if node.arguments.len() != 2 {
                messages.push(Message::argument_count_mismatch(
                    node.head.clone(),
                    2,
                    node.arguments.len(),
                ));
                return messages;
            }
            match node.arguments[0].expand(cxt, true) {
                Some(name) if name.is_empty() => {
                    messages.push(Message::invalid_argument(
                        node.arguments[0].location.clone(),
                        "the variable name is empty",
                    ));
                }
                Some(name) => {
                    if cxt.config.argument_interpolators.has(&format!("${name}")) {
                        messages.push(Message::name_already_defined(
                            node.arguments[0].location.clone(),
                            &format!("${name}"),
                        ));
                    }
                }
                None => {
                    if cxt.delay_depth == 0 {
                        messages.push(Message::invalid_argument(
                            node.arguments[0].location.clone(),
                            format!(
                                "cannot expand argument `{}`",
                                node.arguments[0].raw_text()
                            ),
                        ));
                    }
                }
            }
            messages
        })),
        expand: Some(Rc::new(|node, cxt, _immediate| {
            if node.arguments.len() != 2 {
                return Some(Vec::new());
            }
            let name = node.arguments[0].expand(cxt, true)?;
            let value = node.arguments[1].expand(cxt, true)?;
            if name.is_empty() {
                return Some(Vec::new());
            }
            let mut interpolator =
                ArgumentInterpolatorDefinition::new(format!("${name}"), "");
            interpolator.expand =
                Some(Rc::new(move |_content, _cxt, _immediate| Some(value.clone())));
            cxt.config.argument_interpolators.add(interpolator);
            Some(Vec::new())
        })),
        ..ModifierDefinition::new("var", SlotType::None)
    }
}
