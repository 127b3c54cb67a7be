use crate::ast::LocationRange;

pub const E_EXPECTED: &str = "E_EXPECTED";
pub const E_UNKNOWN_MODIFIER: &str = "E_UNKNOWN_MODIFIER";
pub const E_UNCLOSED_INLINE_MODIFIER: &str = "E_UNCLOSED_INLINE_MODIFIER";
pub const E_INVALID_ARGUMENT: &str = "E_INVALID_ARGUMENT";
pub const E_ARGUMENT_COUNT_MISMATCH: &str = "E_ARGUMENT_COUNT_MISMATCH";
pub const E_NAME_ALREADY_DEFINED: &str = "E_NAME_ALREADY_DEFINED";
pub const E_REACHED_REPARSE_LIMIT: &str = "E_REACHED_REPARSE_LIMIT";
pub const E_REFERRED: &str = "E_REFERRED";

pub const W_UNNECESSARY_NEWLINE: &str = "W_UNNECESSARY_NEWLINE";
pub const W_NEW_BLOCK_SHOULD_BE_ON_NEWLINE: &str = "W_NEW_BLOCK_SHOULD_BE_ON_NEWLINE";
pub const W_CONTENT_SHOULD_BE_ON_NEWLINE: &str = "W_CONTENT_SHOULD_BE_ON_NEWLINE";

/// Ordered so that `Error > Warning > Info`; hosts pick their own
/// reporting threshold.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}

/// A diagnostic. Messages are data, not control flow: parsing always runs
/// to EOF and returns everything it noticed alongside the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub severity: MessageSeverity,
    pub code: &'static str,
    pub location: LocationRange,
    pub info: String,
    pub suggestions: Vec<FixSuggestion>,
    /// Present on `E_REFERRED` wrappers: the message that was issued while
    /// expanding the writing at `location`.
    pub referred: Option<Box<Message>>,
}

impl Message {
    pub fn new(
        severity: MessageSeverity,
        code: &'static str,
        location: LocationRange,
        info: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code,
            location,
            info: info.into(),
            suggestions: Vec::new(),
            referred: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: FixSuggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Wraps `inner` in a referral frame: "this message was issued while
    /// expanding the writing at `location`".
    pub fn referred(inner: Message, location: LocationRange) -> Self {
        Self {
            severity: inner.severity,
            code: E_REFERRED,
            location,
            info: format!("expanded from here: {}", inner.info),
            suggestions: Vec::new(),
            referred: Some(Box::new(inner)),
        }
    }

    /// Walks the referral chain down to the message that was actually
    /// issued.
    pub fn origin(&self) -> &Message {
        let mut message = self;
        while let Some(inner) = &message.referred {
            message = inner;
        }
        message
    }

    pub fn expected(location: LocationRange, what: &str) -> Self {
        Self::new(
            MessageSeverity::Error,
            E_EXPECTED,
            location,
            format!("expected {what}"),
        )
    }

    pub fn unknown_modifier(location: LocationRange, kind: &str, name: &str) -> Self {
        Self::new(
            MessageSeverity::Error,
            E_UNKNOWN_MODIFIER,
            location,
            format!("unknown {kind} modifier `{name}`"),
        )
    }

    pub fn unclosed_inline_modifier(location: LocationRange, name: &str) -> Self {
        Self::new(
            MessageSeverity::Error,
            E_UNCLOSED_INLINE_MODIFIER,
            location,
            format!("inline modifier `{name}` is never closed"),
        )
    }

    pub fn invalid_argument(location: LocationRange, info: impl Into<String>) -> Self {
        Self::new(MessageSeverity::Error, E_INVALID_ARGUMENT, location, info)
    }

    pub fn argument_count_mismatch(location: LocationRange, expected: usize, got: usize) -> Self {
        Self::new(
            MessageSeverity::Error,
            E_ARGUMENT_COUNT_MISMATCH,
            location,
            format!("expected {expected} argument(s), got {got}"),
        )
    }

    pub fn name_already_defined(location: LocationRange, name: &str) -> Self {
        Self::new(
            MessageSeverity::Error,
            E_NAME_ALREADY_DEFINED,
            location,
            format!("`{name}` is already defined"),
        )
    }

    pub fn reached_reparse_limit(location: LocationRange, name: &str) -> Self {
        Self::new(
            MessageSeverity::Error,
            E_REACHED_REPARSE_LIMIT,
            location,
            format!("expansion of `{name}` exceeded the reparse depth limit"),
        )
    }

    pub fn unnecessary_newline(location: LocationRange) -> Self {
        Self::new(
            MessageSeverity::Warning,
            W_UNNECESSARY_NEWLINE,
            location,
            "unnecessary blank line before content",
        )
    }

    pub fn new_block_should_be_on_newline(location: LocationRange) -> Self {
        Self::new(
            MessageSeverity::Warning,
            W_NEW_BLOCK_SHOULD_BE_ON_NEWLINE,
            location,
            "a new block should begin on its own line",
        )
    }

    pub fn content_should_be_on_newline(location: LocationRange) -> Self {
        Self::new(
            MessageSeverity::Warning,
            W_CONTENT_SHOULD_BE_ON_NEWLINE,
            location,
            "content should begin on the next line",
        )
    }
}

/// An optional, never auto-applied repair. The edit is a pure description:
/// replace characters `[start, end)` of the source with `replacement`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixSuggestion {
    pub info: String,
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

impl FixSuggestion {
    pub fn new(info: impl Into<String>, start: usize, end: usize, replacement: &str) -> Self {
        Self {
            info: info.into(),
            start,
            end,
            replacement: replacement.to_string(),
        }
    }

    pub fn insert(info: impl Into<String>, at: usize, text: &str) -> Self {
        Self::new(info, at, at, text)
    }

    /// Applies the edit, returning the new text and the adjusted cursor.
    /// Offsets are code points, matching scanner positions.
    pub fn apply(&self, source: &str, cursor: usize) -> (String, usize) {
        let chars: Vec<char> = source.chars().collect();
        let start = self.start.min(chars.len());
        let end = self.end.min(chars.len()).max(start);
        let mut out = String::new();
        out.extend(&chars[..start]);
        out.push_str(&self.replacement);
        out.extend(&chars[end..]);

        let inserted = self.replacement.chars().count();
        let cursor = if cursor >= end {
            cursor - (end - start) + inserted
        } else if cursor > start {
            start + inserted
        } else {
            cursor
        };
        (out, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::{FixSuggestion, Message, MessageSeverity};
    use crate::ast::{LocationRange, SourceDescriptor};

    fn range(start: usize, end: usize) -> LocationRange {
        LocationRange {
            source: SourceDescriptor::new("<test>"),
            start,
            end,
            actual_end: None,
            original: None,
        }
    }

    #[test]
    fn severity_ordering() {
        assert!(MessageSeverity::Error > MessageSeverity::Warning);
        assert!(MessageSeverity::Warning > MessageSeverity::Info);
    }

    #[test]
    fn referral_preserves_origin() {
        let inner = Message::expected(range(4, 5), "`]`");
        let wrapped = Message::referred(inner.clone(), range(10, 12));
        let rewrapped = Message::referred(wrapped, range(20, 25));
        assert_eq!(rewrapped.location.start, 20);
        assert_eq!(rewrapped.severity, MessageSeverity::Error);
        assert_eq!(rewrapped.origin(), &inner);
    }

    #[test]
    fn fix_suggestion_applies_as_pure_edit() {
        let fix = FixSuggestion::insert("insert the missing `]`", 3, "]");
        let (text, cursor) = fix.apply("[.a hello", 7);
        assert_eq!(text, "[.a] hello");
        assert_eq!(cursor, 8);

        let fix = FixSuggestion::new("drop the blank line", 2, 4, "");
        let (text, cursor) = fix.apply("ab\n\ncd", 1);
        assert_eq!(text, "abcd");
        assert_eq!(cursor, 1);
    }

    #[test]
    fn fix_suggestion_edits_by_code_point() {
        let fix = FixSuggestion::new("replace the crab", 1, 2, "x");
        let (text, cursor) = fix.apply("a🦀b", 3);
        assert_eq!(text, "axb");
        assert_eq!(cursor, 3);
    }
}
