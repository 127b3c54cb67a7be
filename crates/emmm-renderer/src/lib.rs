use std::collections::BTreeMap;
use std::rc::Rc;

use once_cell::sync::Lazy;

use emmm_core::{
    Configuration, Document, Message, ParseContext, Renderer, RendererConfig, Scanner,
    SourceDescriptor, parse,
};

const BASE_CSS: &str = include_str!("../assets/emmm.css");

#[derive(Debug, Clone, Copy)]
pub enum Theme {
    Auto,
    Light,
    Dark,
}

/// Mutable per-render side channel of the HTML back-end: the injected
/// asset resolver, CSS variable overrides, and counters render functions
/// accumulate into.
#[derive(Default)]
pub struct HtmlState {
    pub transform_asset: Option<Box<dyn Fn(&str) -> Option<String>>>,
    pub vars: BTreeMap<String, String>,
    pub invalid_nodes: usize,
}

impl HtmlState {
    pub fn resolve_asset(&self, url: &str) -> Option<String> {
        self.transform_asset.as_ref().and_then(|transform| transform(url))
    }
}

/// Builds the HTML renderer configuration for the built-in definitions of
/// `config`. Definitions registered later (user defines) are covered by
/// the expansion fallback of the dispatch ladder.
pub fn html_config(config: &Configuration) -> RendererConfig<String, HtmlState> {
    let mut out: RendererConfig<String, HtmlState> = RendererConfig::new();

    out.text = Rc::new(|content, _| escape_html(content));
    out.escaped = Rc::new(|content, _| escape_html(content));
    out.paragraph = Rc::new(|node, cxt| {
        let mut html = String::from("<p>");
        html.push_str(&cxt.render_inlines(&node.content));
        html.push_str("</p>\n");
        html
    });
    out.preformatted = Rc::new(|node, _| {
        format!(
            "<pre class=\"emmm-pre\"><code>{}</code></pre>\n",
            escape_html(&node.content.text)
        )
    });
    out.invalid_block = Rc::new(|node, reason, cxt| {
        cxt.state.invalid_nodes += 1;
        format!(
            "<div class=\"emmm-invalid\" title=\"{}\">[.{}]</div>\n",
            escape_html(reason),
            escape_html(&node.definition.name)
        )
    });
    out.invalid_inline = Rc::new(|node, reason, cxt| {
        cxt.state.invalid_nodes += 1;
        format!(
            "<span class=\"emmm-invalid\" title=\"{}\">[/{}]</span>",
            escape_html(reason),
            escape_html(&node.definition.name)
        )
    });

    if let Some(quote) = config.block_modifiers.get("quote") {
        out.on_block(quote, |node, cxt| {
            let mut html = String::from("<blockquote>\n");
            html.push_str(&cxt.render_blocks(&node.content));
            html.push_str("</blockquote>\n");
            html
        });
    }
    if let Some(code) = config.block_modifiers.get("code") {
        out.on_block(code, |node, _cxt| {
            let mut inner = String::new();
            for entity in &node.content {
                if let emmm_core::BlockEntity::Preformatted(pre) = entity {
                    inner.push_str(&escape_html(&pre.content.text));
                }
            }
            format!("<pre class=\"emmm-codeblock\"><code>{inner}</code></pre>\n")
        });
    }
    if let Some(emph) = config.inline_modifiers.get("emph") {
        out.on_inline(emph, |node, cxt| {
            format!("<em>{}</em>", cxt.render_inlines(&node.content))
        });
    }
    if let Some(code) = config.inline_modifiers.get("code") {
        out.on_inline(code, |node, cxt| {
            format!("<code>{}</code>", cxt.render_inlines(&node.content))
        });
    }

    out
}

/// Parses `source` against the stock configuration and renders HTML.
/// Returns the output together with every message from the parse.
pub fn render_html(source: &str, name: &str) -> (String, Vec<Message>) {
    let mut cxt = ParseContext::new(Configuration::with_builtins());
    let scanner = Scanner::new(source, SourceDescriptor::new(name));
    let document = parse(scanner, &mut cxt);
    let html = render_document(&document, &cxt.config, &mut HtmlState::default());
    (html, document.messages)
}

pub fn render_html_sanitized(source: &str, name: &str) -> (String, Vec<Message>) {
    let (html, messages) = render_html(source, name);
    (sanitize_html(&html), messages)
}

pub fn render_document(
    document: &Document,
    config: &Configuration,
    state: &mut HtmlState,
) -> String {
    let renderer = Renderer::new(html_config(config));
    renderer.render(document, state)
}

/// Sanitizes rendered output against a fixed allow-list, for hosts that
/// embed untrusted documents.
pub fn sanitize_html(html: &str) -> String {
    let tags: std::collections::HashSet<&'static str> = [
        "a", "blockquote", "br", "code", "div", "em", "p", "pre", "span", "strong",
    ]
    .iter()
    .copied()
    .collect();

    let mut generic_attributes = std::collections::HashSet::new();
    generic_attributes.insert("class");
    generic_attributes.insert("title");

    ammonia::Builder::default()
        .tags(tags)
        .generic_attributes(generic_attributes)
        .clean(html)
        .to_string()
}

/// Stylesheet and page embedding for standalone output, driven by CSS
/// variables so hosts can restyle without re-rendering.
#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    theme: Theme,
    custom_vars: BTreeMap<String, String>,
}

impl HtmlRenderer {
    pub fn new(theme: Theme) -> Self {
        Self {
            theme,
            custom_vars: BTreeMap::new(),
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_vars.insert(key.into(), value.into());
        self
    }

    pub fn stylesheet(&self) -> String {
        let mut out = String::new();
        match self.theme {
            Theme::Auto => {
                out.push_str(&root_block(&LIGHT_VARS, true));
                out.push_str("@media (prefers-color-scheme: dark) {\n");
                out.push_str(&indent_root_block(&DARK_VARS));
                out.push_str("}\n");
            }
            Theme::Light => {
                out.push_str(&root_block(&LIGHT_VARS, true));
            }
            Theme::Dark => {
                out.push_str(&root_block(&DARK_VARS, true));
            }
        }

        if !self.custom_vars.is_empty() {
            out.push_str(":root {\n");
            for (key, value) in &self.custom_vars {
                out.push_str("  ");
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push_str(";\n");
            }
            out.push_str("}\n");
        }

        out.push_str(BASE_CSS);
        out
    }

    pub fn embed_html(&self, html: &str, with_inline_css: bool) -> String {
        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n");
        out.push_str("<html lang=\"en\">\n");
        out.push_str("<head>\n");
        out.push_str("  <meta charset=\"utf-8\" />\n");
        out.push_str("  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n");
        if with_inline_css {
            out.push_str("  <style>\n");
            out.push_str(&self.stylesheet());
            out.push_str("\n  </style>\n");
        }
        out.push_str("</head>\n");
        out.push_str("<body>\n");
        out.push_str(html);
        if !html.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("</body>\n");
        out.push_str("</html>\n");
        out
    }
}

static LIGHT_VARS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("--emmm-bg", "#fbfbf8"),
        ("--emmm-fg", "#1f2328"),
        ("--emmm-muted", "#5f6b76"),
        ("--emmm-border", "#d8dee4"),
        ("--emmm-accent", "#2b6cb0"),
        ("--emmm-code-bg", "#f4f6f8"),
        ("--emmm-code-fg", "#1f2328"),
        ("--emmm-invalid", "#b42318"),
    ])
});

static DARK_VARS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("--emmm-bg", "#0e1116"),
        ("--emmm-fg", "#e6edf3"),
        ("--emmm-muted", "#9aa4af"),
        ("--emmm-border", "#2a313b"),
        ("--emmm-accent", "#63b3ed"),
        ("--emmm-code-bg", "#202634"),
        ("--emmm-code-fg", "#f0f6fc"),
        ("--emmm-invalid", "#ff7b72"),
    ])
});

fn root_block(vars: &BTreeMap<&'static str, &'static str>, include_color_scheme: bool) -> String {
    let mut out = String::new();
    out.push_str(":root {\n");
    if include_color_scheme {
        out.push_str("  color-scheme: light dark;\n");
    }
    for (key, value) in vars {
        out.push_str("  ");
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str(";\n");
    }
    out.push_str("}\n");
    out
}

fn indent_root_block(vars: &BTreeMap<&'static str, &'static str>) -> String {
    let mut out = String::new();
    out.push_str("  :root {\n");
    out.push_str("    color-scheme: light dark;\n");
    for (key, value) in vars {
        out.push_str("    ");
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str(";\n");
    }
    out.push_str("  }\n");
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{HtmlRenderer, Theme, render_html, render_html_sanitized};

    #[test]
    fn renders_paragraphs_and_inline_markup() {
        let (html, messages) = render_html("hello [/emph]world[;] \\& more", "<test>");
        assert!(messages.is_empty(), "{messages:?}");
        assert_eq!(html, "<p>hello <em>world</em> &amp; more</p>\n");
    }

    #[test]
    fn renders_quote_blocks_and_preformatted_code() {
        let source = "[.quote] quoted\n\n[.code]\nlet x = 1;\n";
        let (html, messages) = render_html(source, "<test>");
        assert!(messages.is_empty(), "{messages:?}");
        assert!(html.contains("<blockquote>\n<p>quoted</p>\n</blockquote>"));
        assert!(html.contains("<pre class=\"emmm-codeblock\"><code>"));
        assert!(html.contains("let x = 1;"));
    }

    #[test]
    fn user_definitions_render_through_their_expansion() {
        let source = "[-inline-shorthand p:x:p][/print $(x)]\n\np7p";
        let (html, messages) = render_html(source, "<test>");
        assert!(messages.is_empty(), "{messages:?}");
        assert_eq!(html, "<p>7</p>\n");
    }

    #[test]
    fn unknown_modifiers_surface_as_invalid_nodes() {
        let (html, messages) = render_html("[/mystery]x[;]", "<test>");
        assert!(!messages.is_empty());
        assert!(html.contains("emmm-invalid"));
    }

    #[test]
    fn sanitized_output_drops_unlisted_markup() {
        let (html, _) = render_html_sanitized("\\<script\\>alert(1)\\</script\\>", "<test>");
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn embed_html_wraps_output() {
        let renderer = HtmlRenderer::new(Theme::Light).with_var("--emmm-bg", "#fff");
        let page = renderer.embed_html("<p>Hi</p>", true);
        assert!(page.contains("<style>"));
        assert!(page.contains("--emmm-bg: #fff;"));
        assert!(page.contains("<p>Hi</p>"));
    }
}
