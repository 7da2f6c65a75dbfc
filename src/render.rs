//! Markup rendering seam for commit messages and READMEs
//!
//! The hub never turns user text into HTML itself. It hands commit messages and
//! README content to a [`MarkupRenderer`] and only ever passes the resulting
//! [`SafeMarkup`] on. Diff output is never rendered through this seam.
//!
//! [`EscapingRenderer`] is the default: it escapes HTML and keeps line breaks.
//! Applications plug in a real markdown sanitizer through
//! [`HubBuilder::renderer`](crate::HubBuilder::renderer).

use std::fmt;

/// Markup that a renderer declared safe to embed in a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeMarkup(String);

impl SafeMarkup {
    /// Wrap markup produced by a trusted renderer
    pub fn from_trusted(markup: impl Into<String>) -> Self {
        Self(markup.into())
    }

    /// The markup
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the markup string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SafeMarkup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transform from user text to safe markup
pub trait MarkupRenderer: Send + Sync {
    /// Render `text` so it can be embedded in a page as-is
    fn render_safe(&self, text: &str) -> SafeMarkup;
}

/// Renderer that HTML-escapes text and turns newlines into `<br>`
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapingRenderer;

impl MarkupRenderer for EscapingRenderer {
    fn render_safe(&self, text: &str) -> SafeMarkup {
        let mut out = String::with_capacity(text.len() + text.len() / 8);
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                '\n' => out.push_str("<br>\n"),
                '\r' => {}
                c => out.push(c),
            }
        }
        SafeMarkup(out)
    }
}

impl<F> MarkupRenderer for F
where
    F: Fn(&str) -> SafeMarkup + Send + Sync,
{
    fn render_safe(&self, text: &str) -> SafeMarkup {
        self(text)
    }
}
