use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{
    BlockEntity, BlockModifierNode, Document, InlineEntity, InlineModifierNode, ParagraphNode,
    PreformattedNode,
};
use crate::config::{BlockModifierDefinition, InlineModifierDefinition};

/// Output a renderer produces and concatenates. The framework only needs
/// an empty value and appending.
pub trait RenderOutput: Default {
    fn append(&mut self, other: Self);
}

impl RenderOutput for String {
    fn append(&mut self, other: Self) {
        self.push_str(&other);
    }
}

impl<T> RenderOutput for Vec<T> {
    fn append(&mut self, mut other: Self) {
        self.extend(other.drain(..));
    }
}

/// Identity of a modifier definition, used to key renderer maps. One
/// definition is one allocation, so the address is the identity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DefinitionId(usize);

impl DefinitionId {
    pub fn of_block(definition: &Rc<BlockModifierDefinition>) -> Self {
        Self(Rc::as_ptr(definition) as *const () as usize)
    }

    pub fn of_inline(definition: &Rc<InlineModifierDefinition>) -> Self {
        Self(Rc::as_ptr(definition) as *const () as usize)
    }
}

pub type BlockRenderFn<O, S> =
    Rc<dyn Fn(&BlockModifierNode, &mut RenderContext<'_, O, S>) -> O>;
pub type InlineRenderFn<O, S> =
    Rc<dyn Fn(&InlineModifierNode, &mut RenderContext<'_, O, S>) -> O>;
pub type ParagraphRenderFn<O, S> =
    Rc<dyn Fn(&ParagraphNode, &mut RenderContext<'_, O, S>) -> O>;
pub type TextRenderFn<O, S> = Rc<dyn Fn(&str, &mut RenderContext<'_, O, S>) -> O>;
pub type PreformattedRenderFn<O, S> =
    Rc<dyn Fn(&PreformattedNode, &mut RenderContext<'_, O, S>) -> O>;
pub type InvalidBlockFn<O, S> =
    Rc<dyn Fn(&BlockModifierNode, &str, &mut RenderContext<'_, O, S>) -> O>;
pub type InvalidInlineFn<O, S> =
    Rc<dyn Fn(&InlineModifierNode, &str, &mut RenderContext<'_, O, S>) -> O>;

/// Maps modifier definitions to render functions, plus the handlers for
/// the leaf node kinds and the fallbacks for nodes nothing accounts for.
pub struct RendererConfig<O: RenderOutput, S> {
    block_renderers: HashMap<DefinitionId, BlockRenderFn<O, S>>,
    inline_renderers: HashMap<DefinitionId, InlineRenderFn<O, S>>,
    pub text: TextRenderFn<O, S>,
    pub escaped: TextRenderFn<O, S>,
    pub paragraph: ParagraphRenderFn<O, S>,
    pub preformatted: PreformattedRenderFn<O, S>,
    pub invalid_block: InvalidBlockFn<O, S>,
    pub invalid_inline: InvalidInlineFn<O, S>,
}

impl<O: RenderOutput + 'static, S: 'static> RendererConfig<O, S> {
    pub fn new() -> Self {
        Self {
            block_renderers: HashMap::new(),
            inline_renderers: HashMap::new(),
            text: Rc::new(|_, _| O::default()),
            escaped: Rc::new(|_, _| O::default()),
            // A paragraph is its children unless the back-end says
            // otherwise.
            paragraph: Rc::new(|node, cxt| cxt.render_inlines(&node.content)),
            preformatted: Rc::new(|_, _| O::default()),
            invalid_block: Rc::new(|_, _, _| O::default()),
            invalid_inline: Rc::new(|_, _, _| O::default()),
        }
    }

    pub fn on_block(
        &mut self,
        definition: &Rc<BlockModifierDefinition>,
        render: impl Fn(&BlockModifierNode, &mut RenderContext<'_, O, S>) -> O + 'static,
    ) -> &mut Self {
        self.block_renderers
            .insert(DefinitionId::of_block(definition), Rc::new(render));
        self
    }

    pub fn on_inline(
        &mut self,
        definition: &Rc<InlineModifierDefinition>,
        render: impl Fn(&InlineModifierNode, &mut RenderContext<'_, O, S>) -> O + 'static,
    ) -> &mut Self {
        self.inline_renderers
            .insert(DefinitionId::of_inline(definition), Rc::new(render));
        self
    }

    pub fn block_renderer(
        &self,
        definition: &Rc<BlockModifierDefinition>,
    ) -> Option<&BlockRenderFn<O, S>> {
        self.block_renderers.get(&DefinitionId::of_block(definition))
    }

    pub fn inline_renderer(
        &self,
        definition: &Rc<InlineModifierDefinition>,
    ) -> Option<&InlineRenderFn<O, S>> {
        self.inline_renderers
            .get(&DefinitionId::of_inline(definition))
    }
}

impl<O: RenderOutput + 'static, S: 'static> Default for RendererConfig<O, S> {
    fn default() -> Self {
        Self::new()
    }
}

/// One render invocation: the configuration plus the mutable side-channel
/// the back-end accumulates into (stylesheets, counters, collected
/// notes).
pub struct RenderContext<'a, O: RenderOutput, S> {
    config: &'a RendererConfig<O, S>,
    pub state: &'a mut S,
}

impl<'a, O: RenderOutput + 'static, S: 'static> RenderContext<'a, O, S> {
    pub fn render_blocks(&mut self, entities: &[BlockEntity]) -> O {
        let mut out = O::default();
        for entity in entities {
            out.append(self.render_block(entity));
        }
        out
    }

    pub fn render_block(&mut self, entity: &BlockEntity) -> O {
        match entity {
            BlockEntity::Paragraph(node) => {
                let render = self.config.paragraph.clone();
                (*render)(node, self)
            }
            BlockEntity::Preformatted(node) => {
                let render = self.config.preformatted.clone();
                (*render)(node, self)
            }
            BlockEntity::Modifier(node) => self.render_block_modifier(node),
            BlockEntity::System(_) => O::default(),
        }
    }

    /// The dispatch ladder: a registered renderer wins; otherwise the
    /// node's expansion renders in its place; failing both, the invalid
    /// fallback reports it.
    pub fn render_block_modifier(&mut self, node: &BlockModifierNode) -> O {
        if let Some(render) = self.config.block_renderer(&node.definition).cloned() {
            return (*render)(node, self);
        }
        if let Some(expansion) = &node.expansion {
            return self.render_blocks(expansion);
        }
        let invalid = self.config.invalid_block.clone();
        (*invalid)(node, "no renderer registered and no expansion", self)
    }

    pub fn render_inlines(&mut self, entities: &[InlineEntity]) -> O {
        let mut out = O::default();
        for entity in entities {
            out.append(self.render_inline(entity));
        }
        out
    }

    pub fn render_inline(&mut self, entity: &InlineEntity) -> O {
        match entity {
            InlineEntity::Text(node) => {
                let render = self.config.text.clone();
                (*render)(&node.content, self)
            }
            InlineEntity::Escaped(node) => {
                let render = self.config.escaped.clone();
                (*render)(&node.content, self)
            }
            InlineEntity::Modifier(node) => self.render_inline_modifier(node),
        }
    }

    pub fn render_inline_modifier(&mut self, node: &InlineModifierNode) -> O {
        if let Some(render) = self.config.inline_renderer(&node.definition).cloned() {
            return (*render)(node, self);
        }
        if let Some(expansion) = &node.expansion {
            return self.render_inlines(expansion);
        }
        let invalid = self.config.invalid_inline.clone();
        (*invalid)(node, "no renderer registered and no expansion", self)
    }
}

/// The top-level entry dispatching a document (or any entity sequence)
/// against a configuration and a state.
pub struct Renderer<O: RenderOutput, S> {
    pub config: RendererConfig<O, S>,
}

impl<O: RenderOutput + 'static, S: 'static> Renderer<O, S> {
    pub fn new(config: RendererConfig<O, S>) -> Self {
        Self { config }
    }

    pub fn render(&self, document: &Document, state: &mut S) -> O {
        self.render_entities(&document.root.content, state)
    }

    pub fn render_entities(&self, entities: &[BlockEntity], state: &mut S) -> O {
        let mut cxt = RenderContext {
            config: &self.config,
            state,
        };
        cxt.render_blocks(entities)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use smallvec::SmallVec;

    use super::{Renderer, RendererConfig};
    use crate::ast::{
        BlockEntity, InlineEntity, LocationRange, ModifierNode, ParagraphNode, SourceDescriptor,
        TextNode,
    };
    use crate::config::{ModifierDefinition, SlotType};

    fn range(start: usize, end: usize) -> LocationRange {
        LocationRange {
            source: SourceDescriptor::new("<test>"),
            start,
            end,
            actual_end: None,
            original: None,
        }
    }

    fn text(content: &str) -> InlineEntity {
        InlineEntity::Text(TextNode {
            location: range(0, content.chars().count()),
            content: content.to_string(),
        })
    }

    fn inline_node(
        definition: &Rc<ModifierDefinition<InlineEntity>>,
        expansion: Option<Vec<InlineEntity>>,
    ) -> InlineEntity {
        InlineEntity::Modifier(ModifierNode {
            definition: definition.clone(),
            location: range(0, 1),
            head: range(0, 1),
            arguments: SmallVec::new(),
            state: None,
            content: Vec::new(),
            expansion,
        })
    }

    fn paragraph(content: Vec<InlineEntity>) -> BlockEntity {
        BlockEntity::Paragraph(ParagraphNode {
            location: range(0, 1),
            content,
        })
    }

    #[test]
    fn dispatch_prefers_registered_renderer() {
        let registered = Rc::new(ModifierDefinition::<InlineEntity>::new(
            "a",
            SlotType::None,
        ));
        let mut config: RendererConfig<String, ()> = RendererConfig::new();
        config.text = Rc::new(|content, _| content.to_string());
        config.on_inline(&registered, |_, _| "<reg/>".to_string());

        let doc = vec![paragraph(vec![inline_node(
            &registered,
            Some(vec![text("expansion")]),
        )])];
        let renderer = Renderer::new(config);
        let mut state = ();
        assert_eq!(renderer.render_entities(&doc, &mut state), "<reg/>");
    }

    #[test]
    fn dispatch_falls_back_to_expansion_then_invalid() {
        let unregistered = Rc::new(ModifierDefinition::<InlineEntity>::new(
            "b",
            SlotType::None,
        ));
        let mut config: RendererConfig<String, ()> = RendererConfig::new();
        config.text = Rc::new(|content, _| content.to_string());
        config.invalid_inline = Rc::new(|node, _, _| format!("<bad {}/>", node.definition.name));

        let doc = vec![paragraph(vec![
            inline_node(&unregistered, Some(vec![text("expanded")])),
            inline_node(&unregistered, None),
        ])];
        let renderer = Renderer::new(config);
        let mut state = ();
        assert_eq!(renderer.render_entities(&doc, &mut state), "expanded<bad b/>");
    }

    #[test]
    fn system_nodes_render_to_nothing() {
        let system = Rc::new(ModifierDefinition::<BlockEntity>::new(
            "sys",
            SlotType::None,
        ));
        let mut config: RendererConfig<String, ()> = RendererConfig::new();
        config.invalid_block = Rc::new(|_, _, _| "<bad/>".to_string());
        let doc = vec![BlockEntity::System(ModifierNode {
            definition: system,
            location: range(0, 1),
            head: range(0, 1),
            arguments: SmallVec::new(),
            state: None,
            content: Vec::new(),
            expansion: None,
        })];
        let renderer = Renderer::new(config);
        let mut state = ();
        assert_eq!(renderer.render_entities(&doc, &mut state), "");
    }

    #[test]
    fn state_is_a_mutable_side_channel() {
        let counted = Rc::new(ModifierDefinition::<InlineEntity>::new(
            "note",
            SlotType::None,
        ));
        let mut config: RendererConfig<String, Vec<String>> = RendererConfig::new();
        config.on_inline(&counted, |node, cxt| {
            cxt.state.push(node.definition.name.clone());
            format!("[{}]", cxt.state.len())
        });

        let doc = vec![paragraph(vec![
            inline_node(&counted, None),
            inline_node(&counted, None),
        ])];
        let renderer = Renderer::new(config);
        let mut state = Vec::new();
        assert_eq!(renderer.render_entities(&doc, &mut state), "[1][2]");
        assert_eq!(state, ["note", "note"]);
    }
}
