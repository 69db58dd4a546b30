//! HTML to Markdown.
//!
//! A small deterministic DOM walker, not a readability engine: ATX
//! headings, fenced code blocks, `-` bullets, inline emphasis/links.
//! `script`, `style`, `noscript` and `iframe` subtrees never reach the
//! output.

use ego_tree::NodeRef;
use scraper::{Html, Node};

const DROPPED: [&str; 4] = ["script", "style", "noscript", "iframe"];

struct Writer {
    out: String,
}

impl Writer {
    fn block_break(&mut self) {
        while self.out.ends_with(' ') {
            self.out.pop();
        }
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            while self.out.ends_with('\n') {
                self.out.pop();
            }
            self.out.push_str("\n\n");
        }
    }

    /// Separator before an inline element that starts its own markup.
    fn space(&mut self) {
        if !self.out.is_empty()
            && !self.out.ends_with(char::is_whitespace)
            && !self.out.ends_with('(')
            && !self.out.ends_with('[')
        {
            self.out.push(' ');
        }
    }

    fn push_inline(&mut self, text: &str) {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return;
        }
        if !self.out.is_empty()
            && !self.out.ends_with(char::is_whitespace)
            && !self.out.ends_with('(')
            && !self.out.ends_with('[')
            && text.starts_with(char::is_whitespace)
        {
            self.out.push(' ');
        }
        self.out.push_str(&collapsed);
        if text.ends_with(char::is_whitespace) {
            self.out.push(' ');
        }
    }
}

fn inline_text(node: NodeRef<'_, Node>) -> String {
    let mut s = String::new();
    for child in node.children() {
        match child.value() {
            Node::Text(t) => s.push_str(&t),
            Node::Element(el) => {
                if !DROPPED.contains(&el.name()) {
                    s.push_str(&inline_text(child));
                }
            }
            _ => {}
        }
    }
    s
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn walk_children(node: NodeRef<'_, Node>, w: &mut Writer, list_stack: &mut Vec<Option<u64>>) {
    for child in node.children() {
        walk(child, w, list_stack);
    }
}

fn walk(node: NodeRef<'_, Node>, w: &mut Writer, list_stack: &mut Vec<Option<u64>>) {
    match node.value() {
        Node::Text(t) => w.push_inline(&t),
        Node::Element(el) => {
            let tag = el.name();
            if DROPPED.contains(&tag) {
                return;
            }
            match tag {
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    let level = tag.as_bytes()[1] - b'0';
                    let text = collapse(&inline_text(node));
                    if !text.is_empty() {
                        w.block_break();
                        for _ in 0..level {
                            w.out.push('#');
                        }
                        w.out.push(' ');
                        w.out.push_str(&text);
                        w.block_break();
                    }
                }
                "pre" => {
                    let code = inline_text(node);
                    let code = code.trim_matches('\n');
                    w.block_break();
                    w.out.push_str("```\n");
                    w.out.push_str(code);
                    w.out.push_str("\n```");
                    w.block_break();
                }
                "code" => {
                    // Inline code; `<pre><code>` is handled by the pre arm.
                    let text = collapse(&inline_text(node));
                    if !text.is_empty() {
                        w.space();
                        w.out.push('`');
                        w.out.push_str(&text);
                        w.out.push('`');
                    }
                }
                "strong" | "b" => {
                    let text = collapse(&inline_text(node));
                    if !text.is_empty() {
                        w.space();
                        w.out.push_str("**");
                        w.out.push_str(&text);
                        w.out.push_str("**");
                    }
                }
                "em" | "i" => {
                    let text = collapse(&inline_text(node));
                    if !text.is_empty() {
                        w.space();
                        w.out.push('*');
                        w.out.push_str(&text);
                        w.out.push('*');
                    }
                }
                "a" => {
                    let text = collapse(&inline_text(node));
                    match el.attr("href") {
                        Some(href) if !text.is_empty() => {
                            w.space();
                            w.out.push('[');
                            w.out.push_str(&text);
                            w.out.push_str("](");
                            w.out.push_str(href.trim());
                            w.out.push(')');
                        }
                        _ => w.push_inline(&text),
                    }
                }
                "img" => {
                    if let Some(src) = el.attr("src") {
                        let alt = el.attr("alt").unwrap_or("");
                        w.space();
                        w.out.push_str("![");
                        w.out.push_str(&collapse(alt));
                        w.out.push_str("](");
                        w.out.push_str(src.trim());
                        w.out.push(')');
                    }
                }
                "br" => w.out.push('\n'),
                "hr" => {
                    w.block_break();
                    w.out.push_str("---");
                    w.block_break();
                }
                "ul" => {
                    w.block_break();
                    list_stack.push(None);
                    walk_children(node, w, list_stack);
                    list_stack.pop();
                    w.block_break();
                }
                "ol" => {
                    w.block_break();
                    list_stack.push(Some(0));
                    walk_children(node, w, list_stack);
                    list_stack.pop();
                    w.block_break();
                }
                "li" => {
                    while w.out.ends_with(' ') {
                        w.out.pop();
                    }
                    if !w.out.is_empty() && !w.out.ends_with('\n') {
                        w.out.push('\n');
                    }
                    let depth = list_stack.len().saturating_sub(1);
                    for _ in 0..depth {
                        w.out.push_str("  ");
                    }
                    match list_stack.last_mut() {
                        Some(Some(n)) => {
                            *n += 1;
                            w.out.push_str(&format!("{n}. "));
                        }
                        _ => w.out.push_str("- "),
                    }
                    walk_children(node, w, list_stack);
                }
                "blockquote" => {
                    let text = collapse(&inline_text(node));
                    if !text.is_empty() {
                        w.block_break();
                        w.out.push_str("> ");
                        w.out.push_str(&text);
                        w.block_break();
                    }
                }
                "tr" => {
                    w.block_break();
                    let cells: Vec<String> = node
                        .children()
                        .filter_map(|c| match c.value() {
                            Node::Element(e) if matches!(e.name(), "td" | "th") => {
                                Some(collapse(&inline_text(c)))
                            }
                            _ => None,
                        })
                        .collect();
                    if !cells.is_empty() {
                        w.out.push_str("| ");
                        w.out.push_str(&cells.join(" | "));
                        w.out.push_str(" |");
                    }
                    w.block_break();
                }
                "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "aside"
                | "nav" | "figure" | "figcaption" | "table" | "thead" | "tbody" | "dl" | "dt"
                | "dd" => {
                    w.block_break();
                    walk_children(node, w, list_stack);
                    w.block_break();
                }
                _ => walk_children(node, w, list_stack),
            }
        }
        _ => {}
    }
}

/// Render an HTML string (document or fragment) as Markdown.
pub fn html_to_markdown(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut w = Writer { out: String::new() };
    let mut list_stack = Vec::new();
    walk_children(*doc.root_element(), &mut w, &mut list_stack);
    let mut out = w.out;
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_string()
}
