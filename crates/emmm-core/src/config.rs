use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{BlockEntity, InlineEntity, ModifierNode};
use crate::builtins;
use crate::message::Message;

/// What the content position of a modifier holds.
///
/// `None` marks a marker modifier: both `;]` and `]` terminate its head
/// and no content slot follows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotType {
    Normal,
    Preformatted,
    None,
}

pub type HookFn<E> = Rc<dyn Fn(&mut ModifierNode<E>, &mut ParseContext) -> Vec<Message>>;
pub type ExpandFn<E> = Rc<dyn Fn(&mut ModifierNode<E>, &mut ParseContext, bool) -> Option<Vec<E>>>;

/// A block, inline or system modifier definition. The three kinds share
/// this shape and differ only in the entity type `E` they contain and
/// expand to, and in which registry they live.
///
/// Definitions are shared via `Rc` and compared by pointer identity:
/// renderer dispatch, shorthand compilation and the user-define machinery
/// all rely on one definition being one allocation.
pub struct ModifierDefinition<E> {
    pub name: String,
    pub slot_type: SlotType,
    /// Advisory only; editors and renderers may use it to classify output.
    pub role_hint: Option<String>,
    /// Children parsed inside this node are registered but not expanded
    /// during their own parse.
    pub delay_content_expansion: bool,
    /// Children of a delaying ancestor still expand when their definition
    /// sets this.
    pub always_try_expand: bool,
    pub before_parse_content: Option<HookFn<E>>,
    pub after_parse_content: Option<HookFn<E>>,
    pub before_process_expansion: Option<HookFn<E>>,
    pub after_process_expansion: Option<HookFn<E>>,
    pub prepare_expand: Option<HookFn<E>>,
    /// `None` from the callback means "keep the content": the node is not
    /// rewritten and a later reparse may try again.
    pub expand: Option<ExpandFn<E>>,
}

impl<E> ModifierDefinition<E> {
    pub fn new(name: impl Into<String>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
            role_hint: None,
            delay_content_expansion: false,
            always_try_expand: false,
            before_parse_content: None,
            after_parse_content: None,
            before_process_expansion: None,
            after_process_expansion: None,
            prepare_expand: None,
            expand: None,
        }
    }
}

impl<E> fmt::Debug for ModifierDefinition<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierDefinition")
            .field("name", &self.name)
            .field("slot_type", &self.slot_type)
            .finish_non_exhaustive()
    }
}

pub type BlockModifierDefinition = ModifierDefinition<BlockEntity>;
pub type InlineModifierDefinition = ModifierDefinition<InlineEntity>;
pub type SystemModifierDefinition = ModifierDefinition<BlockEntity>;

pub type InterpolatorExpandFn = Rc<dyn Fn(&str, &mut ParseContext, bool) -> Option<String>>;

/// A balanced textual construct inside arguments, e.g. `$(` … `)`.
/// `expand` receives the already-expanded content between the delimiters;
/// returning `None` leaves the interpolation uncached so a later reparse
/// may resolve it.
pub struct ArgumentInterpolatorDefinition {
    pub name: String,
    pub postfix: String,
    pub expand: Option<InterpolatorExpandFn>,
}

impl ArgumentInterpolatorDefinition {
    pub fn new(name: impl Into<String>, postfix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            postfix: postfix.into(),
            expand: None,
        }
    }
}

impl fmt::Debug for ArgumentInterpolatorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentInterpolatorDefinition")
            .field("name", &self.name)
            .field("postfix", &self.postfix)
            .finish_non_exhaustive()
    }
}

pub trait Named {
    fn name(&self) -> &str;
}

impl<E> Named for ModifierDefinition<E> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ArgumentInterpolatorDefinition {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered, name-unique registry of definitions. Every mutation bumps the
/// owning configuration's generation so parsers rebuild their
/// longest-match lookup tables.
pub struct Registry<D> {
    entries: Vec<Rc<D>>,
    index: HashMap<String, usize>,
    version: Rc<Cell<u64>>,
}

impl<D: Named> Registry<D> {
    fn new(version: Rc<Cell<u64>>) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            version,
        }
    }

    fn cloned(&self, version: Rc<Cell<u64>>) -> Self {
        Self {
            entries: self.entries.clone(),
            index: self.index.clone(),
            version,
        }
    }

    fn bump(&self) {
        self.version.set(self.version.get() + 1);
    }

    /// Registers a definition, replacing and returning any previous entry
    /// of the same name.
    pub fn add(&mut self, definition: D) -> Option<Rc<D>> {
        self.add_shared(Rc::new(definition))
    }

    pub fn add_shared(&mut self, definition: Rc<D>) -> Option<Rc<D>> {
        self.bump();
        let name = definition.name().to_string();
        match self.index.get(&name) {
            Some(&at) => {
                let old = std::mem::replace(&mut self.entries[at], definition);
                Some(old)
            }
            None => {
                self.index.insert(name, self.entries.len());
                self.entries.push(definition);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Rc<D>> {
        let at = self.index.remove(name)?;
        self.bump();
        let old = self.entries.remove(at);
        for slot in self.index.values_mut() {
            if *slot > at {
                *slot -= 1;
            }
        }
        Some(old)
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Rc<D>> {
        self.index.get(name).map(|&at| &self.entries[at])
    }

    pub fn entries(&self) -> impl Iterator<Item = &Rc<D>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A textual pattern `name arg₀ parts[0] arg₁ parts[1] … [postfix slot
/// postfix]` that unfolds into an invocation of `definition`.
pub struct Shorthand<E> {
    pub name: String,
    pub parts: Vec<String>,
    pub postfix: Option<String>,
    pub definition: Rc<ModifierDefinition<E>>,
}

impl<E> fmt::Debug for Shorthand<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shorthand")
            .field("name", &self.name)
            .field("parts", &self.parts)
            .field("postfix", &self.postfix)
            .finish_non_exhaustive()
    }
}

pub struct ShorthandSet<E> {
    entries: Vec<Rc<Shorthand<E>>>,
    index: HashMap<String, usize>,
    version: Rc<Cell<u64>>,
}

impl<E> ShorthandSet<E> {
    fn new(version: Rc<Cell<u64>>) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            version,
        }
    }

    fn cloned(&self, version: Rc<Cell<u64>>) -> Self {
        Self {
            entries: self.entries.clone(),
            index: self.index.clone(),
            version,
        }
    }

    pub fn add(&mut self, shorthand: Shorthand<E>) -> Option<Rc<Shorthand<E>>> {
        self.version.set(self.version.get() + 1);
        let name = shorthand.name.clone();
        let shorthand = Rc::new(shorthand);
        match self.index.get(&name) {
            Some(&at) => Some(std::mem::replace(&mut self.entries[at], shorthand)),
            None => {
                self.index.insert(name, self.entries.len());
                self.entries.push(shorthand);
                None
            }
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Shorthand<E>>> {
        self.index.get(name).map(|&at| &self.entries[at])
    }

    pub fn entries(&self) -> impl Iterator<Item = &Rc<Shorthand<E>>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub const DEFAULT_REPARSE_DEPTH_LIMIT: usize = 10;

/// The definition registries and shorthand sets a parse runs against.
///
/// A configuration may be shared read-only between parses; a parse whose
/// source defines names mutates it and should be handed a fresh
/// [`Configuration::from`] clone.
pub struct Configuration {
    pub block_modifiers: Registry<BlockModifierDefinition>,
    pub inline_modifiers: Registry<InlineModifierDefinition>,
    pub system_modifiers: Registry<SystemModifierDefinition>,
    pub argument_interpolators: Registry<ArgumentInterpolatorDefinition>,
    pub block_shorthands: ShorthandSet<BlockEntity>,
    pub inline_shorthands: ShorthandSet<InlineEntity>,
    pub reparse_depth_limit: usize,
    version: Rc<Cell<u64>>,
    unknown_block: Rc<BlockModifierDefinition>,
    unknown_inline: Rc<InlineModifierDefinition>,
    unknown_system: Rc<SystemModifierDefinition>,
}

impl Configuration {
    /// An empty configuration: no modifiers, no shorthands.
    pub fn new() -> Self {
        let version = Rc::new(Cell::new(0));
        Self {
            block_modifiers: Registry::new(version.clone()),
            inline_modifiers: Registry::new(version.clone()),
            system_modifiers: Registry::new(version.clone()),
            argument_interpolators: Registry::new(version.clone()),
            block_shorthands: ShorthandSet::new(version.clone()),
            inline_shorthands: ShorthandSet::new(version.clone()),
            reparse_depth_limit: DEFAULT_REPARSE_DEPTH_LIMIT,
            version,
            unknown_block: Rc::new(ModifierDefinition::new("UNKNOWN", SlotType::Normal)),
            unknown_inline: Rc::new(ModifierDefinition::new("UNKNOWN", SlotType::Normal)),
            unknown_system: Rc::new(ModifierDefinition::new("UNKNOWN", SlotType::Normal)),
        }
    }

    /// The stock configuration: the `define-*`/`*-shorthand`/`var` system
    /// modifiers, the `$(` interpolator and the basic exemplar set.
    pub fn with_builtins() -> Self {
        let mut config = Self::new();
        builtins::install(&mut config);
        config
    }

    /// Shallow clone: registries and shorthand sets are copied (sharing
    /// the `Rc`'d definitions), after which mutations on either side are
    /// invisible to the other.
    pub fn from(other: &Configuration) -> Self {
        let version = Rc::new(Cell::new(0));
        Self {
            block_modifiers: other.block_modifiers.cloned(version.clone()),
            inline_modifiers: other.inline_modifiers.cloned(version.clone()),
            system_modifiers: other.system_modifiers.cloned(version.clone()),
            argument_interpolators: other.argument_interpolators.cloned(version.clone()),
            block_shorthands: other.block_shorthands.cloned(version.clone()),
            inline_shorthands: other.inline_shorthands.cloned(version.clone()),
            reparse_depth_limit: other.reparse_depth_limit,
            version,
            unknown_block: other.unknown_block.clone(),
            unknown_inline: other.unknown_inline.clone(),
            unknown_system: other.unknown_system.clone(),
        }
    }

    /// Bumped on every registry or shorthand mutation. Parsers compare
    /// against the generation they built their lookup tables at and
    /// rebuild when it moved.
    pub fn generation(&self) -> u64 {
        self.version.get()
    }

    /// Reserved definition substituted when a `[.` head names nothing.
    pub fn unknown_block_modifier(&self) -> &Rc<BlockModifierDefinition> {
        &self.unknown_block
    }

    pub fn unknown_inline_modifier(&self) -> &Rc<InlineModifierDefinition> {
        &self.unknown_inline
    }

    pub fn unknown_system_modifier(&self) -> &Rc<SystemModifierDefinition> {
        &self.unknown_system
    }

    pub fn is_unknown_block(&self, definition: &Rc<BlockModifierDefinition>) -> bool {
        Rc::ptr_eq(definition, &self.unknown_block)
    }

    pub fn is_unknown_inline(&self, definition: &Rc<InlineModifierDefinition>) -> bool {
        Rc::ptr_eq(definition, &self.unknown_inline)
    }

    pub fn is_unknown_system(&self, definition: &Rc<SystemModifierDefinition>) -> bool {
        Rc::ptr_eq(definition, &self.unknown_system)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-parse state: the live configuration, the delay counter, and a
/// typed store that lets modifier families keep parse-scoped bookkeeping
/// without globals. The store is keyed by payload type; each subsystem
/// brings its own private payload type, which plays the role of the
/// identity token.
pub struct ParseContext {
    pub config: Configuration,
    pub delay_depth: usize,
    store: HashMap<TypeId, Box<dyn Any>>,
}

impl ParseContext {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            delay_depth: 0,
            store: HashMap::new(),
        }
    }

    /// Stores `payload` unless a payload of that type already exists.
    /// Returns whether the store changed.
    pub fn init<T: Any>(&mut self, payload: T) -> bool {
        match self.store.entry(TypeId::of::<T>()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Box::new(payload));
                true
            }
        }
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.store
            .get(&TypeId::of::<T>())
            .and_then(|payload| payload.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.store
            .get_mut(&TypeId::of::<T>())
            .and_then(|payload| payload.downcast_mut())
    }

    pub fn get_or_init<T: Any + Default>(&mut self) -> &mut T {
        self.store
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::<T>::default())
            .downcast_mut()
            .expect("store entry is keyed by its own TypeId")
    }
}
