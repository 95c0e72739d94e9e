//! Markdown → Telegram HTML converter.
//!
//! Model replies and the assistant's own texts use light Markdown
//! (`**bold**`, `_italic_`, `` `code` ``, bullets). Telegram renders a small
//! HTML subset, so replies are converted before sending:
//!
//! - Code blocks (```) → `<pre><code>...</code></pre>`
//! - Inline code (`) → `<code>...</code>`
//! - Bold (`**` / `__`) → `<b>...</b>`
//! - Italic (`_`) → `<i>...</i>`, never inside snake_case words
//! - Strikethrough (`~~`) → `<s>...</s>`
//! - Links `[text](url)` → `<a href="url">text</a>`
//! - Headers and blockquotes → plain text
//! - Bullets (`-` / `*`) → `•`

use std::sync::LazyLock;

use regex::{Captures, Regex};

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex must compile")
}

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)```(?:\w+)?\n?(.*?)```"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| re(r"`([^`\n]+)`"));
static HEADER: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^#{1,6}\s+(.+)$"));
static BLOCKQUOTE: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^>\s?(.*)$"));
static LINK: LazyLock<Regex> = LazyLock::new(|| re(r"\[([^\]]+)\]\(([^)\s]+)\)"));
static BOLD_STAR: LazyLock<Regex> = LazyLock::new(|| re(r"\*\*(.+?)\*\*"));
static BOLD_UNDER: LazyLock<Regex> = LazyLock::new(|| re(r"__(.+?)__"));
// No lookbehind in `regex`: the surrounding characters are captured instead.
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| re(r"(^|[^\p{L}\p{N}_])_([^_\n]+?)_($|[^\p{L}\p{N}_])"));
static STRIKE: LazyLock<Regex> = LazyLock::new(|| re(r"~~(.+?)~~"));
static BULLET: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^[ \t]*[-*][ \t]+"));

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert Markdown text to Telegram-compatible HTML.
///
/// Telegram rejects malformed HTML; callers fall back to the raw text when a
/// send with HTML parse mode fails.
pub fn markdown_to_telegram_html(text: &str) -> String {
    // Code is lifted out first so nothing inside it gets formatted.
    let mut blocks: Vec<String> = Vec::new();
    let text = CODE_BLOCK.replace_all(text, |caps: &Captures| {
        blocks.push(caps[1].to_string());
        format!("\x00B{}\x00", blocks.len() - 1)
    });

    let mut inline: Vec<String> = Vec::new();
    let text = INLINE_CODE.replace_all(&text, |caps: &Captures| {
        inline.push(caps[1].to_string());
        format!("\x00I{}\x00", inline.len() - 1)
    });

    let text = HEADER.replace_all(&text, "$1");
    let text = BLOCKQUOTE.replace_all(&text, "$1");
    let text = escape_html(&text);

    let text = LINK.replace_all(&text, r#"<a href="$2">$1</a>"#);
    let text = BOLD_STAR.replace_all(&text, "<b>$1</b>");
    let text = BOLD_UNDER.replace_all(&text, "<b>$1</b>");
    let text = ITALIC.replace_all(&text, "$1<i>$2</i>$3");
    let text = STRIKE.replace_all(&text, "<s>$1</s>");
    let mut text = BULLET.replace_all(&text, "• ").into_owned();

    for (idx, code) in inline.iter().enumerate() {
        text = text.replace(
            &format!("\x00I{idx}\x00"),
            &format!("<code>{}</code>", escape_html(code)),
        );
    }
    for (idx, code) in blocks.iter().enumerate() {
        text = text.replace(
            &format!("\x00B{idx}\x00"),
            &format!("<pre><code>{}</code></pre>", escape_html(code)),
        );
    }

    text
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Prefers the last newline inside each window; a chunk never ends in the
/// middle of a UTF-8 sequence.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        let window_end = match remaining.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => byte_idx,
            None => {
                chunks.push(remaining.to_string());
                return chunks;
            }
        };

        let split_at = match remaining[..window_end].rfind('\n') {
            Some(0) | None => window_end,
            Some(nl) => nl,
        };
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.to_string());
        remaining = rest.strip_prefix('\n').unwrap_or(rest);
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
