//! Markdown outline parsing and flattening.
//!
//! The LLM returns a Markdown outline (`#`..`####` headings plus nested
//! lists). It is parsed into a tree of [`OutlineNode`], then flattened
//! pre-order into a dense 0-indexed sequence of [`FlatItem`] that the chunk
//! generator walks.

use crate::store::ItemKind;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum OutlineNode {
    Heading {
        level: i64,
        title: String,
        items: Vec<OutlineNode>,
    },
    ListItem {
        level: i64,
        text: String,
        items: Vec<OutlineNode>,
    },
    Paragraph {
        level: i64,
        text: String,
    },
}

impl OutlineNode {
    fn level(&self) -> i64 {
        match self {
            OutlineNode::Heading { level, .. }
            | OutlineNode::ListItem { level, .. }
            | OutlineNode::Paragraph { level, .. } => *level,
        }
    }

    fn items_mut(&mut self) -> &mut Vec<OutlineNode> {
        match self {
            OutlineNode::Heading { items, .. } | OutlineNode::ListItem { items, .. } => items,
            OutlineNode::Paragraph { .. } => {
                unreachable!("paragraphs are never kept on the container stack")
            }
        }
    }
}

/// A single node of the flattened outline with its sequential index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatItem {
    pub index: i64,
    pub level: i64,
    pub kind: ItemKind,
    pub title: String,
    pub content: String,
}

const INTRO_KEYWORDS: &[&str] = &["intro", "mở đầu", "giới thiệu", "引言", "opening"];
const OUTRO_KEYWORDS: &[&str] = &[
    "outro",
    "kết luận",
    "conclusion",
    "结论",
    "tổng kết",
    "cta",
    "call to action",
];
const QUOTE_KEYWORDS: &[&str] = &["quote", "trích dẫn", "danh ngôn", "名言", "\""];
const STORY_KEYWORDS: &[&str] = &["story", "câu chuyện", "ví dụ", "example", "故事", "例子"];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Tag a heading from its title text. Top-level headings become
/// intro/outro/section headers; deeper headings become quote/story
/// suggestions or plain points.
pub fn classify(level: i64, text: &str) -> ItemKind {
    let lower = text.to_lowercase();
    if level <= 2 {
        if contains_any(&lower, INTRO_KEYWORDS) {
            ItemKind::Intro
        } else if contains_any(&lower, OUTRO_KEYWORDS) {
            ItemKind::Outro
        } else {
            ItemKind::SectionHeader
        }
    } else {
        classify_entry(&lower)
    }
}

/// List items and paragraphs can only be quotes, stories or plain points.
fn classify_entry(lower: &str) -> ItemKind {
    if contains_any(lower, QUOTE_KEYWORDS) {
        ItemKind::Quote
    } else if contains_any(lower, STORY_KEYWORDS) {
        ItemKind::Story
    } else {
        ItemKind::Point
    }
}

fn heading_level(line: &str) -> Option<(i64, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    Some((hashes as i64, rest.trim()))
}

fn list_item(line: &str) -> Option<(usize, &str)> {
    let indent = line.len() - line.trim_start().len();
    let trimmed = line.trim_start();

    let text = if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        rest
    } else {
        // Ordered list markers: "1. text"
        let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let after = &trimmed[digits..];
        after.strip_prefix(". ")?
    };

    Some((indent, text.trim()))
}

fn strip_markup(text: &str) -> String {
    text.trim()
        .trim_matches('*')
        .trim()
        .trim_matches(':')
        .trim()
        .to_string()
}

/// Close every open container at `level` or deeper, attaching each popped
/// node to the container above it (or to the root).
fn close_to(root: &mut Vec<OutlineNode>, stack: &mut Vec<OutlineNode>, level: i64) {
    while stack.last().map_or(false, |node| node.level() >= level) {
        let node = stack.pop().expect("non-empty checked above");
        match stack.last_mut() {
            Some(parent) => parent.items_mut().push(node),
            None => root.push(node),
        }
    }
}

/// Parse a Markdown outline into a node tree. Returns an empty vec when the
/// text contains no usable structure.
pub fn parse_outline(markdown: &str) -> Vec<OutlineNode> {
    let mut root: Vec<OutlineNode> = Vec::new();
    // Chain of open containers, shallowest first.
    let mut stack: Vec<OutlineNode> = Vec::new();
    let mut current_heading_level: i64 = 0;

    for line in markdown.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some((level, title)) = heading_level(line) {
            let title = strip_markup(title);
            if title.is_empty() {
                continue;
            }
            current_heading_level = level;
            close_to(&mut root, &mut stack, level);
            stack.push(OutlineNode::Heading {
                level,
                title,
                items: Vec::new(),
            });
        } else if let Some((indent, text)) = list_item(line) {
            let text = strip_markup(text);
            if text.is_empty() {
                continue;
            }
            let depth = (indent / 2) as i64;
            let level = current_heading_level + 1 + depth;
            close_to(&mut root, &mut stack, level);
            stack.push(OutlineNode::ListItem {
                level,
                text,
                items: Vec::new(),
            });
        } else {
            let text = strip_markup(line);
            if text.is_empty() {
                continue;
            }
            let level = current_heading_level + 1;
            let node = OutlineNode::Paragraph { level, text };
            match stack.last_mut() {
                Some(parent) => parent.items_mut().push(node),
                None => root.push(node),
            }
        }
    }

    close_to(&mut root, &mut stack, i64::MIN);
    debug!("Parsed outline into {} top-level nodes", root.len());
    root
}

fn flatten_into(node: &OutlineNode, out: &mut Vec<FlatItem>) {
    let (level, title, kind, children): (i64, &str, ItemKind, &[OutlineNode]) = match node {
        OutlineNode::Heading {
            level,
            title,
            items,
        } => (*level, title.as_str(), classify(*level, title), items),
        OutlineNode::ListItem { level, text, items } => (
            *level,
            text.as_str(),
            classify_entry(&text.to_lowercase()),
            items,
        ),
        OutlineNode::Paragraph { level, text } => (*level, text.as_str(), ItemKind::Point, &[]),
    };

    if !title.trim().is_empty() {
        out.push(FlatItem {
            index: 0, // assigned after the walk
            level,
            kind,
            title: title.to_string(),
            content: title.to_string(),
        });
    }

    for child in children {
        flatten_into(child, out);
    }
}

/// Pre-order traversal emitting a dense 0-indexed list.
pub fn flatten_outline(nodes: &[OutlineNode]) -> Vec<FlatItem> {
    let mut flat = Vec::new();
    for node in nodes {
        flatten_into(node, &mut flat);
    }
    for (i, item) in flat.iter_mut().enumerate() {
        item.index = i as i64;
    }
    debug!("Flattened outline into {} items", flat.len());
    flat
}

/// Content of the nearest preceding item one level up; the generation
/// prompt uses it as the surrounding context.
pub fn parent_context<'a>(flat: &'a [FlatItem], index: usize, fallback: &'a str) -> &'a str {
    let level = flat[index].level;
    if level <= 0 {
        return fallback;
    }
    flat[..index]
        .iter()
        .rev()
        .find(|item| item.level == level - 1)
        .map(|item| item.content.as_str())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# Introduction
Some opening thoughts.

## Body - Part 1: Quote Analysis
### Quote 1: "The obstacle is the way"
- Context and author
- Meaning analysis
### Quote 2: "Know thyself"

## Body - Part 2: Stories
### Story 1: The farmer and the horse
- Detailed telling
- Lesson learned

# Conclusion
"#;

    #[test]
    fn test_parse_builds_tree() {
        // Only the two level-1 headings are top-level; the level-2 body
        // sections nest under the first one.
        let nodes = parse_outline(SAMPLE);
        assert_eq!(nodes.len(), 2);

        match &nodes[0] {
            OutlineNode::Heading { title, items, .. } => {
                assert_eq!(title, "Introduction");
                assert!(!items.is_empty());
            }
            other => panic!("expected heading, got {other:?}"),
        }
    }

    #[test]
    fn test_flatten_is_dense_and_ordered() {
        let flat = flatten_outline(&parse_outline(SAMPLE));
        assert!(flat.len() >= 8);
        for (i, item) in flat.iter().enumerate() {
            assert_eq!(item.index, i as i64);
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(1, "introduction"), ItemKind::Intro);
        assert_eq!(classify(1, "kết luận"), ItemKind::Outro);
        assert_eq!(classify(2, "body - part 1"), ItemKind::SectionHeader);
        assert_eq!(classify(3, "quote 1: \"the obstacle\""), ItemKind::Quote);
        assert_eq!(classify(3, "story 1: the farmer"), ItemKind::Story);
        assert_eq!(classify(4, "context and author"), ItemKind::Point);
        assert_eq!(classify(3, "câu chuyện về nhà sư"), ItemKind::Story);
    }

    #[test]
    fn test_flat_kinds_from_sample() {
        let flat = flatten_outline(&parse_outline(SAMPLE));
        assert_eq!(flat[0].kind, ItemKind::Intro);
        assert!(flat.iter().any(|i| i.kind == ItemKind::Quote));
        assert!(flat.iter().any(|i| i.kind == ItemKind::Story));
        assert_eq!(flat.last().unwrap().kind, ItemKind::Outro);
    }

    #[test]
    fn test_parent_context() {
        let flat = flatten_outline(&parse_outline(SAMPLE));
        let quote_pos = flat
            .iter()
            .position(|i| i.kind == ItemKind::Quote)
            .unwrap();
        let parent = parent_context(&flat, quote_pos, "topic");
        assert!(parent.contains("Part 1"), "got parent: {parent}");
    }

    #[test]
    fn test_empty_outline() {
        assert!(parse_outline("").is_empty());
        assert!(flatten_outline(&[]).is_empty());
    }

    #[test]
    fn test_ordered_list_items() {
        let nodes = parse_outline("## Section\n1. first point\n2. second point\n");
        let flat = flatten_outline(&nodes);
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[1].title, "first point");
        assert_eq!(flat[1].level, 3);
    }
}
