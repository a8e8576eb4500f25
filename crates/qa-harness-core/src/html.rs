//! Structural summary of an HTML target page.
//!
//! Pulls out the page title and every interactive element (form controls,
//! buttons, links, labels, plus anything carrying an `id`) so prompts can
//! list real selectors and generated scripts can be checked against them.
//! This is a tolerant regex scan, not a DOM parser.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment regex"));
static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("valid script/style regex")
});
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").expect("valid title regex"));
static OPEN_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<([a-zA-Z][a-zA-Z0-9-]*)\b([^>]*)>").expect("valid tag regex")
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("valid attribute regex")
});
static ANY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid markup regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

const INTERACTIVE_TAGS: &[&str] = &[
    "input", "button", "select", "textarea", "a", "form", "label", "option",
];
const MAX_TEXT_CHARS: usize = 80;
const MAX_SUMMARY_ELEMENTS: usize = 50;

/// One element of interest on the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageElement {
    pub tag: String,
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub element_type: Option<String>,
    pub class: Option<String>,
    /// Visible text directly following the opening tag.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageStructure {
    pub title: Option<String>,
    pub elements: Vec<PageElement>,
    pub ids: BTreeSet<String>,
    pub names: BTreeSet<String>,
    /// Individual class tokens from every `class` attribute.
    pub classes: BTreeSet<String>,
}

impl PageStructure {
    pub fn extract(html: &str) -> Self {
        let cleaned = strip_noise(html);
        let mut page = PageStructure {
            title: TITLE_RE
                .captures(&cleaned)
                .map(|c| collapse_whitespace(&ANY_TAG_RE.replace_all(&c[1], " ")))
                .filter(|t| !t.is_empty()),
            ..Default::default()
        };

        for caps in OPEN_TAG_RE.captures_iter(&cleaned) {
            let tag = caps[1].to_ascii_lowercase();
            let attrs = parse_attributes(&caps[2]);
            let id = attrs.get("id").filter(|v| !v.is_empty()).cloned();
            let name = attrs.get("name").filter(|v| !v.is_empty()).cloned();

            if let Some(id) = &id {
                page.ids.insert(id.clone());
            }
            if let Some(name) = &name {
                page.names.insert(name.clone());
            }
            if let Some(class) = attrs.get("class") {
                page.classes.extend(class.split_whitespace().map(str::to_string));
            }
            if !INTERACTIVE_TAGS.contains(&tag.as_str()) && id.is_none() {
                continue;
            }

            let after = caps.get(0).map_or(cleaned.len(), |m| m.end());
            let following = &cleaned[after..];
            let text = following
                .find('<')
                .map_or(following, |end| &following[..end]);
            let text = collapse_whitespace(text);

            page.elements.push(PageElement {
                tag,
                id,
                name,
                element_type: attrs.get("type").cloned(),
                class: attrs.get("class").cloned(),
                text: (!text.is_empty()).then(|| text.chars().take(MAX_TEXT_CHARS).collect()),
            });
        }

        page
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    /// Human-readable listing for prompts and HTML document content.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(&format!("Page title: {title}\n"));
        }

        let (forms, controls): (Vec<&PageElement>, Vec<&PageElement>) =
            self.elements.iter().partition(|e| e.tag == "form");
        if !forms.is_empty() {
            out.push_str("Forms:\n");
            for form in forms {
                out.push_str(&format!("- {}\n", describe(form)));
            }
        }

        out.push_str("Interactive elements:\n");
        for element in controls.iter().take(MAX_SUMMARY_ELEMENTS) {
            out.push_str(&format!("- {}\n", describe(element)));
        }
        if controls.len() > MAX_SUMMARY_ELEMENTS {
            out.push_str(&format!(
                "- ... {} more elements omitted\n",
                controls.len() - MAX_SUMMARY_ELEMENTS
            ));
        }

        if !self.ids.is_empty() {
            let ids: Vec<&str> = self.ids.iter().map(|s| s.as_str()).collect();
            out.push_str(&format!("Element ids: {}\n", ids.join(", ")));
        }
        if !self.names.is_empty() {
            let names: Vec<&str> = self.names.iter().map(|s| s.as_str()).collect();
            out.push_str(&format!("Field names: {}\n", names.join(", ")));
        }
        if !self.classes.is_empty() {
            let classes: Vec<&str> = self.classes.iter().map(|s| s.as_str()).collect();
            out.push_str(&format!("Classes: {}\n", classes.join(", ")));
        }
        out
    }
}

fn describe(element: &PageElement) -> String {
    let mut parts = vec![format!("<{}>", element.tag)];
    for (key, value) in [
        ("id", &element.id),
        ("name", &element.name),
        ("type", &element.element_type),
        ("class", &element.class),
    ] {
        if let Some(v) = value {
            parts.push(format!("{key}=\"{v}\""));
        }
    }
    if let Some(text) = &element.text {
        parts.push(format!("text=\"{text}\""));
    }
    parts.join(" ")
}

/// Page text with markup, scripts, styles and comments removed.
pub fn visible_text(html: &str) -> String {
    let cleaned = strip_noise(html);
    let text = ANY_TAG_RE.replace_all(&cleaned, "\n");
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_noise(html: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(html, " ");
    SCRIPT_STYLE_RE.replace_all(&without_comments, " ").into_owned()
}

fn parse_attributes(raw: &str) -> BTreeMap<String, String> {
    ATTR_RE
        .captures_iter(raw)
        .map(|c| {
            let key = c[1].to_ascii_lowercase();
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map_or(String::new(), |m| m.as_str().to_string());
            (key, value)
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}
