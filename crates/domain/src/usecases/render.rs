//! Rendering use case - turns a post into a channel message (Telegram HTML)

use crate::model::Post;

/// Configuration for the renderer
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Maximum characters of body text included in the message
    pub preview_chars: usize,
    /// Whether to append the source label (e.g., "RSS", "X")
    pub include_source_label: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            preview_chars: 500,
            include_source_label: true,
        }
    }
}

/// Renderer for channel messages
#[derive(Debug, Clone)]
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render a post as Telegram HTML: bold title, preview, link and label
    pub fn render(&self, post: &Post) -> String {
        let title = self.title(post);
        let preview = self.truncate_to_length(post.text.trim(), self.config.preview_chars);

        let mut message = format!("<b>{}</b>", html_escape::encode_text(&title));

        if !preview.is_empty() && preview != title {
            message.push('\n');
            message.push_str(&html_escape::encode_text(&preview));
        }

        message.push_str(&format!(
            "\n\n<a href=\"{}\">Open</a>",
            html_escape::encode_double_quoted_attribute(&post.url)
        ));

        if self.config.include_source_label {
            message.push_str(&format!(
                " | <i>{}</i>",
                html_escape::encode_text(&self.source_label(post))
            ));
        }

        message
    }

    /// Plain-text variant (no markup), used by the outbox and dry runs
    pub fn render_plain(&self, post: &Post) -> String {
        let title = self.title(post);
        let preview = self.truncate_to_length(post.text.trim(), self.config.preview_chars);

        if preview.is_empty() || preview == title {
            format!("{}\n{}", title, post.url)
        } else {
            format!("{}\n{}\n{}", title, preview, post.url)
        }
    }

    fn title(&self, post: &Post) -> String {
        match post.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("New post from {}", post.author),
        }
    }

    fn source_label(&self, post: &Post) -> String {
        match post.title {
            // Feed entries are labelled with the feed's author/name
            Some(_) if !post.author.is_empty() => post.author.clone(),
            _ => post.kind.label().to_string(),
        }
    }

    /// Truncate to a number of characters, preserving word boundaries
    fn truncate_to_length(&self, content: &str, max_chars: usize) -> String {
        if content.chars().count() <= max_chars {
            return content.to_string();
        }

        let keep = max_chars.saturating_sub(3);
        let cut = content
            .char_indices()
            .nth(keep)
            .map(|(idx, _)| idx)
            .unwrap_or(content.len());
        let head = &content[..cut];
        let break_point = head.rfind(char::is_whitespace).unwrap_or(head.len());

        format!("{}...", head[..break_point].trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceKind;
    use time::OffsetDateTime;

    fn sample_post() -> Post {
        Post {
            source_id: "microblog:testuser".to_string(),
            kind: SourceKind::Microblog,
            external_id: "123".to_string(),
            published_at: OffsetDateTime::UNIX_EPOCH,
            author: "testuser".to_string(),
            title: None,
            text: "Rates <unchanged> & steady".to_string(),
            url: "https://x.com/testuser/status/123".to_string(),
        }
    }

    #[test]
    fn test_render_escapes_html() {
        let renderer = Renderer::new(RenderConfig::default());

        let text = renderer.render(&sample_post());

        assert!(text.starts_with("<b>New post from testuser</b>"));
        assert!(text.contains("Rates &lt;unchanged&gt; &amp; steady"));
        assert!(text.contains("<a href=\"https://x.com/testuser/status/123\">Open</a>"));
        assert!(text.ends_with("<i>X</i>"));
    }

    #[test]
    fn test_render_feed_entry_uses_title_and_feed_name() {
        let renderer = Renderer::new(RenderConfig::default());
        let post = Post {
            source_id: "feed:https://example.com/rss".to_string(),
            kind: SourceKind::Feed,
            author: "Example News".to_string(),
            title: Some("Markets open higher".to_string()),
            text: "Stocks rose.".to_string(),
            ..sample_post()
        };

        let text = renderer.render(&post);

        assert!(text.starts_with("<b>Markets open higher</b>\nStocks rose."));
        assert!(text.ends_with("<i>Example News</i>"));
    }

    #[test]
    fn test_preview_is_truncated_on_char_boundary() {
        let renderer = Renderer::new(RenderConfig {
            preview_chars: 20,
            ..Default::default()
        });
        let post = Post {
            text: "ééééé ééééé ééééé ééééé ééééé".to_string(),
            ..sample_post()
        };

        let text = renderer.render_plain(&post);
        let preview = text.lines().nth(1).unwrap();

        assert!(preview.ends_with("..."));
        assert!(preview.chars().count() <= 20);
    }

    #[test]
    fn test_render_plain_has_no_markup() {
        let renderer = Renderer::new(RenderConfig::default());

        let text = renderer.render_plain(&sample_post());

        assert_eq!(
            text,
            "New post from testuser\nRates <unchanged> & steady\nhttps://x.com/testuser/status/123"
        );
    }
}
