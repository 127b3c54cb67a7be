use std::env;
use std::fs;
use std::io::{self, Read};
use std::process;

use emmm_core::{
    Configuration, Message, MessageSeverity, ParseContext, Scanner, SourceDescriptor, parse,
};
use emmm_renderer::{HtmlRenderer, HtmlState, Theme, render_document, sanitize_html};

fn main() {
    let mut input: Option<String> = None;
    let mut sanitized = false;
    let mut embed = false;
    let mut theme = Theme::Auto;
    let mut messages_mode: Option<MessagesMode> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return;
            }
            "--sanitized" => sanitized = true,
            "--embed" => embed = true,
            "--theme" => {
                theme = match args.next().as_deref() {
                    Some("auto") => Theme::Auto,
                    Some("light") => Theme::Light,
                    Some("dark") => Theme::Dark,
                    _ => {
                        eprintln!("--theme expects: auto | light | dark");
                        print_usage();
                        process::exit(2);
                    }
                };
            }
            "--messages" => {
                let mode = match args.next().as_deref() {
                    Some("json") => MessagesMode::Json,
                    Some("pretty") => MessagesMode::Pretty,
                    _ => {
                        eprintln!("--messages expects: json | pretty");
                        print_usage();
                        process::exit(2);
                    }
                };
                messages_mode = Some(mode);
            }
            _ => {
                if input.is_none() {
                    input = Some(arg);
                } else {
                    eprintln!("unexpected argument: {}", arg);
                    print_usage();
                    process::exit(2);
                }
            }
        }
    }

    let (source, name) = match input {
        Some(path) => {
            let text = fs::read_to_string(&path).unwrap_or_else(|err| {
                eprintln!("failed to read {}: {}", path, err);
                process::exit(1);
            });
            (text, path)
        }
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .unwrap_or_else(|err| {
                    eprintln!("failed to read stdin: {}", err);
                    process::exit(1);
                });
            (buffer, "<stdin>".to_string())
        }
    };

    let mut cxt = ParseContext::new(Configuration::with_builtins());
    let scanner = Scanner::new(&source, SourceDescriptor::new(&name));
    let document = parse(scanner, &mut cxt);

    if let Some(mode) = messages_mode {
        emit_messages(&document.messages, mode);
    }

    let mut state = HtmlState::default();
    let mut html = render_document(&document, &cxt.config, &mut state);
    if sanitized {
        html = sanitize_html(&html);
    }
    if embed {
        html = HtmlRenderer::new(theme).embed_html(&html, true);
    }
    print!("{}", html);

    if document
        .messages
        .iter()
        .any(|message| message.severity == MessageSeverity::Error)
    {
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!(
        "Usage: emmm-cli [--sanitized] [--embed] [--theme auto|light|dark] [--messages json|pretty] [input]"
    );
}

#[derive(Clone, Copy)]
enum MessagesMode {
    Json,
    Pretty,
}

fn emit_messages(messages: &[Message], mode: MessagesMode) {
    match mode {
        MessagesMode::Json => {
            eprintln!("{}", messages_to_json(messages));
        }
        MessagesMode::Pretty => {
            for message in messages {
                eprintln!("{}", message_to_pretty(message));
            }
        }
    }
}

fn message_to_pretty(message: &Message) -> String {
    let origin = message.origin();
    let mut out = format!(
        "{}..{} {} {} {}",
        origin.location.start,
        origin.location.end,
        severity_label(origin.severity),
        origin.code,
        origin.info
    );
    // Walk outward through the referral chain: each wrapper names the
    // expansion site the message travelled through.
    let mut frame = message;
    while frame.referred.is_some() {
        out.push_str(&format!(
            "\n  referred from {}..{}",
            frame.location.start, frame.location.end
        ));
        match &frame.referred {
            Some(inner) => frame = inner,
            None => break,
        }
    }
    for suggestion in &origin.suggestions {
        out.push_str(&format!("\n  fix: {}", suggestion.info));
    }
    out
}

fn messages_to_json(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "[]".to_string();
    }

    let mut out = String::new();
    out.push_str("[\n");
    for (index, message) in messages.iter().enumerate() {
        let origin = message.origin();
        out.push_str("  {\n");
        out.push_str(&format!("    \"code\": \"{}\",\n", origin.code));
        out.push_str(&format!(
            "    \"severity\": \"{}\",\n",
            severity_label(origin.severity)
        ));
        out.push_str(&format!("    \"info\": \"{}\",\n", escape_json(&origin.info)));
        out.push_str(&format!(
            "    \"range\": {{ \"start\": {}, \"end\": {} }}",
            origin.location.start, origin.location.end
        ));

        let referred_from = referral_sites(message);
        if referred_from.is_empty() {
            out.push_str("\n  }");
        } else {
            out.push_str(",\n    \"referredFrom\": [\n");
            for (site_index, (start, end)) in referred_from.iter().enumerate() {
                out.push_str(&format!(
                    "      {{ \"start\": {}, \"end\": {} }}",
                    start, end
                ));
                if site_index + 1 < referred_from.len() {
                    out.push_str(",\n");
                } else {
                    out.push('\n');
                }
            }
            out.push_str("    ]\n  }");
        }

        if index + 1 < messages.len() {
            out.push_str(",\n");
        } else {
            out.push('\n');
        }
    }
    out.push(']');
    out
}

/// Expansion sites between the reported message and its origin, outermost
/// first.
fn referral_sites(message: &Message) -> Vec<(usize, usize)> {
    let mut sites = Vec::new();
    let mut frame = message;
    while let Some(inner) = &frame.referred {
        sites.push((frame.location.start, frame.location.end));
        frame = inner;
    }
    sites
}

fn severity_label(severity: MessageSeverity) -> &'static str {
    match severity {
        MessageSeverity::Error => "error",
        MessageSeverity::Warning => "warning",
        MessageSeverity::Info => "info",
    }
}

fn escape_json(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
