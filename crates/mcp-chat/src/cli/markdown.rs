use owo_colors::{OwoColorize, Style};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

const CODE_INDENT: &str = "  ";
const RULE: &str = "────────────────────────────────";

/// Renders a Markdown answer for the terminal.
///
/// Emphasis becomes ANSI styling, list items get bullets or numbers and
/// code blocks are indented. Every styled span ends on its line, so the
/// result can be printed line by line behind a prefix.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut renderer = Renderer::default();
    for event in Parser::new_ext(markdown, options) {
        renderer.event(event);
    }
    renderer.out.trim_end().to_owned()
}

#[derive(Default)]
struct Renderer {
    out: String,
    strong: usize,
    emphasis: usize,
    strikethrough: usize,
    heading: bool,
    code_block: bool,
    // Next number of each open list, `None` for bullet lists.
    lists: Vec<Option<u64>>,
    link: Option<String>,
}

impl Renderer {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if self.code_block {
                    self.code_text(&text);
                } else {
                    self.text(&text, Renderer::style(self));
                }
            }
            Event::Code(code) => {
                self.text(&code, Style::new().yellow());
            }
            Event::SoftBreak | Event::HardBreak => self.out.push('\n'),
            Event::Rule => {
                self.start_line();
                self.text(RULE, Style::new().dimmed());
                self.out.push_str("\n\n");
            }
            Event::TaskListMarker(done) => {
                self.out.push_str(if done { "[x] " } else { "[ ] " });
            }
            Event::Html(html) | Event::InlineHtml(html) => {
                self.out.push_str(&html);
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { .. } => {
                self.start_line();
                self.heading = true;
            }
            Tag::CodeBlock(_) => {
                self.start_line();
                self.code_block = true;
            }
            Tag::List(first) => {
                self.start_line();
                self.lists.push(first);
            }
            Tag::Item => {
                self.start_line();
                let depth = self.lists.len().saturating_sub(1);
                self.out.push_str(&"  ".repeat(depth));
                let marker = match self.lists.last_mut() {
                    Some(Some(number)) => {
                        let marker = format!("{number}. ");
                        *number += 1;
                        marker
                    }
                    _ => "• ".to_owned(),
                };
                self.text(&marker, Style::new().bright_cyan());
            }
            Tag::Strong => self.strong += 1,
            Tag::Emphasis => self.emphasis += 1,
            Tag::Strikethrough => self.strikethrough += 1,
            Tag::Link { dest_url, .. } => {
                self.link = Some(dest_url.to_string());
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                // Paragraphs inside list items stay tight.
                self.out.push_str(if self.lists.is_empty() {
                    "\n\n"
                } else {
                    "\n"
                });
            }
            TagEnd::Heading(_) => {
                self.heading = false;
                self.out.push_str("\n\n");
            }
            TagEnd::CodeBlock => {
                self.code_block = false;
                self.start_line();
                self.out.push('\n');
            }
            TagEnd::List(_) => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.start_line();
                    self.out.push('\n');
                }
            }
            TagEnd::Item => self.start_line(),
            TagEnd::Strong => self.strong = self.strong.saturating_sub(1),
            TagEnd::Emphasis => {
                self.emphasis = self.emphasis.saturating_sub(1);
            }
            TagEnd::Strikethrough => {
                self.strikethrough = self.strikethrough.saturating_sub(1);
            }
            TagEnd::Link => {
                if let Some(url) = self.link.take() {
                    self.text(&format!(" ({url})"), Style::new().dimmed());
                }
            }
            _ => {}
        }
    }

    fn style(&self) -> Option<Style> {
        let mut style = Style::new();
        let mut plain = true;
        if self.heading {
            style = style.bold().bright_magenta();
            plain = false;
        }
        if self.strong > 0 {
            style = style.bold();
            plain = false;
        }
        if self.emphasis > 0 {
            style = style.italic();
            plain = false;
        }
        if self.strikethrough > 0 {
            style = style.strikethrough();
            plain = false;
        }
        if self.link.is_some() {
            style = style.underline().bright_blue();
            plain = false;
        }
        (!plain).then_some(style)
    }

    fn text(&mut self, text: &str, style: impl Into<Option<Style>>) {
        let style = style.into();
        for (idx, line) in text.split('\n').enumerate() {
            if idx > 0 {
                self.out.push('\n');
            }
            if line.is_empty() {
                continue;
            }
            match style {
                Some(style) => {
                    self.out.push_str(&line.style(style).to_string());
                }
                None => self.out.push_str(line),
            }
        }
    }

    fn code_text(&mut self, text: &str) {
        for line in text.split_inclusive('\n') {
            if self.at_line_start() {
                self.out.push_str(CODE_INDENT);
            }
            let (content, newline) = match line.strip_suffix('\n') {
                Some(content) => (content, true),
                None => (line, false),
            };
            self.text(content, Style::new().yellow());
            if newline {
                self.out.push('\n');
            }
        }
    }

    #[inline]
    fn at_line_start(&self) -> bool {
        self.out.is_empty() || self.out.ends_with('\n')
    }

    #[inline]
    fn start_line(&mut self) {
        if !self.at_line_start() {
            self.out.push('\n');
        }
    }
}
