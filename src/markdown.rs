//! Block → Markdown/HTML rendering.

use anyhow::Result;

use crate::asset::AssetResolver;
use crate::notion::model::{Block, BlockKind, MediaBlock, RichText, RichTextKind};

/// Inline Markdown for a run of rich-text spans.
pub fn rich_text_to_markdown(spans: &[RichText]) -> String {
    spans.iter().map(span_to_markdown).collect()
}

/// Concatenated `plain_text` of the spans, no markup.
pub fn plain_text(spans: &[RichText]) -> String {
    spans.iter().map(|s| s.plain_text.as_str()).collect()
}

fn span_to_markdown(span: &RichText) -> String {
    match &span.kind {
        RichTextKind::Text { text } => match &text.link {
            Some(link) => format!("[{}]({})", text.content, link.url),
            None => text.content.clone(),
        },
        // Mentions, equations and future kinds render as their plain text.
        RichTextKind::Other => span.plain_text.clone(),
    }
}

/// Render one block (without its children). Unsupported kinds render as an
/// empty string.
pub async fn transform_block(block: &Block, assets: &AssetResolver) -> Result<String> {
    let out = match &block.kind {
        BlockKind::Heading1 { heading_1 } => {
            format!("# {}", rich_text_to_markdown(&heading_1.rich_text))
        }
        BlockKind::Heading2 { heading_2 } => {
            format!("## {}", rich_text_to_markdown(&heading_2.rich_text))
        }
        BlockKind::Heading3 { heading_3 } => {
            format!("### {}", rich_text_to_markdown(&heading_3.rich_text))
        }
        BlockKind::Paragraph { paragraph } => rich_text_to_markdown(&paragraph.rich_text),
        BlockKind::BulletedListItem { bulleted_list_item } => {
            format!("- {}", rich_text_to_markdown(&bulleted_list_item.rich_text))
        }
        BlockKind::NumberedListItem { numbered_list_item } => {
            format!("1. {}", rich_text_to_markdown(&numbered_list_item.rich_text))
        }
        BlockKind::Quote { quote } => format!("> {}", rich_text_to_markdown(&quote.rich_text)),
        BlockKind::Image { image } => match resolve_media(image, assets).await? {
            Some((src, caption)) => format!("![{}]({})", caption, src),
            None => String::new(),
        },
        BlockKind::Video { video } => match resolve_media(video, assets).await? {
            Some((src, caption)) => format!(
                "<figure>\n<video controls src=\"{}\"></video>\n<figcaption>{}</figcaption>\n</figure>",
                html_attr(&src),
                html_escape(&caption)
            ),
            None => String::new(),
        },
        BlockKind::File { file } => match resolve_media(file, assets).await? {
            Some((src, caption)) => {
                let title = if plain_text(&file.caption).trim().is_empty() {
                    file.name
                        .as_deref()
                        .filter(|n| !n.trim().is_empty())
                        .map(str::to_string)
                        .unwrap_or(caption)
                } else {
                    caption
                };
                format!("[{}]({})", title, src)
            }
            None => String::new(),
        },
        BlockKind::Pdf { pdf } => match resolve_media(pdf, assets).await? {
            Some((src, caption)) => format!(
                "<figure>\n<iframe src=\"{}\" width=\"100%\" height=\"600\"></iframe>\n<figcaption>{}</figcaption>\n</figure>",
                html_attr(&src),
                html_escape(&caption)
            ),
            None => String::new(),
        },
        BlockKind::Unsupported => String::new(),
    };
    Ok(out)
}

/// Prefix applied to every line of a block's rendered children, or `None`
/// when the block kind does not nest children.
pub fn child_indent(kind: &BlockKind) -> Option<&'static str> {
    match kind {
        BlockKind::BulletedListItem { .. } | BlockKind::NumberedListItem { .. } => Some("    "),
        BlockKind::Quote { .. } => Some("> "),
        BlockKind::Paragraph { .. }
        | BlockKind::Heading1 { .. }
        | BlockKind::Heading2 { .. }
        | BlockKind::Heading3 { .. } => Some(""),
        _ => None,
    }
}

/// Cached path plus display caption (rich-text caption, or the file name of
/// the cached path when the caption is empty).
async fn resolve_media(media: &MediaBlock, assets: &AssetResolver) -> Result<Option<(String, String)>> {
    let Some(src) = assets.resolve(&media.source).await? else {
        return Ok(None);
    };
    let caption = plain_text(&media.caption);
    let caption = if caption.trim().is_empty() {
        file_name(&src).to_string()
    } else {
        caption
    };
    Ok(Some((src, caption)))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_attr(s: &str) -> String {
    html_escape(s).replace('"', "&quot;")
}
