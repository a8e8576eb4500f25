//! Selenium script synthesis.
//!
//! Sends one test case, a structural summary of the target page and an
//! HTML excerpt to the completion service, then validates the returned
//! script: it must set up a WebDriver, wait explicitly, assert, tear the
//! driver down in a `finally:` block, and only reference element ids and
//! names that exist in the page.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::completion::{CompletionRequest, CompletionService};
use crate::error::{with_deadline, QaError, Result};
use crate::html::PageStructure;
use crate::models::{sha256_hex, RetrievalResult, ScriptArtifact, TestCase};

pub const DEFAULT_MAX_HTML_CHARS: usize = 8000;
pub const DEFAULT_TARGET_PATH: &str = "./sample_project/checkout.html";

pub const SYSTEM_PROMPT: &str = "You are a test automation engineer writing Selenium WebDriver \
scripts in Python. Use only element ids, names, classes and selectors that appear in the page \
structure you are given. Reply with a single JSON object of the form \
{\"script\": \"<python source>\", \"description\": \"<one sentence>\"}.";

/// Sections every script must contain, as (marker, what it proves).
const REQUIRED_SECTIONS: &[(&str, &str)] = &[
    ("webdriver.", "driver setup"),
    ("WebDriverWait", "explicit wait"),
    ("assert", "assertion"),
    ("finally:", "teardown block"),
];

/// A quoted locator value, or the first character of a computed one.
const LOCATOR_VALUE: &str = r#"(?:"([^"]*)"|'([^']*)'|([^\s"')]))"#;
const LITERAL_VALUE: &str = r#"(?:"([^"]*)"|'([^']*)')"#;

/// `By.X, value`, `find_element("x", "value")` and `find_element_by_x(value)`.
static LOCATOR_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"By\.(ID|NAME|CLASS_NAME|CSS_SELECTOR|XPATH)\b\s*,\s*{LOCATOR_VALUE}"),
        format!(r#"\(\s*["'](id|name|class name|css selector|xpath)["']\s*,\s*{LITERAL_VALUE}"#),
        format!(r"find_elements?_by_(id|name|class_name|css_selector|xpath)\(\s*{LOCATOR_VALUE}"),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid locator regex"))
    .collect()
});
static CSS_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\[\s*(id|name|class)\s*([~*^$|]?)=\s*(?:"([^"]*)"|'([^']*)'|([^\]\s]+))\s*(?:[iIsS]\s*)?\]"#,
    )
    .expect("valid css attribute regex")
});
static CSS_BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[(?:[^\]"']|"[^"]*"|'[^']*')*\]"#).expect("valid css bracket regex")
});
static CSS_SIMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([#.])(-?[A-Za-z_][\w-]*)").expect("valid css simple selector regex")
});
static XPATH_EQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(id|name|class)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid xpath regex")
});
static XPATH_FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:contains|starts-with)\(\s*@(id|name|class)\s*,\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid xpath function regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RefKind {
    Id,
    Name,
    Class,
}

impl RefKind {
    fn parse(attr: &str) -> Option<Self> {
        match attr {
            "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "class" => Some(Self::Class),
            _ => None,
        }
    }
}

/// An attribute value a script locates elements by. A `partial` reference
/// only has to occur inside some value on the page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ElementRef {
    kind: RefKind,
    value: String,
    partial: bool,
}

impl ElementRef {
    fn exact(kind: RefKind, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            partial: false,
        }
    }

    fn exists_in(&self, page: &PageStructure) -> bool {
        let values = match self.kind {
            RefKind::Id => &page.ids,
            RefKind::Name => &page.names,
            RefKind::Class => &page.classes,
        };
        if self.partial {
            values.iter().any(|v| v.contains(&self.value))
        } else {
            values.contains(&self.value)
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RefKind::Id => "id",
            RefKind::Name => "name",
            RefKind::Class => "class",
        };
        let sep = if self.partial { "~" } else { ":" };
        write!(f, "{kind}{sep}{}", self.value)
    }
}

/// Attribute-level references for one `kind` / operator / value triple,
/// shared by CSS attribute selectors and XPath predicates.
fn attribute_refs(kind: RefKind, partial: bool, value: &str, out: &mut Vec<ElementRef>) {
    if kind == RefKind::Class && !partial {
        out.extend(value.split_whitespace().map(|c| ElementRef::exact(kind, c)));
    } else if !value.is_empty() {
        out.push(ElementRef {
            kind,
            value: value.to_string(),
            partial,
        });
    }
}

fn css_refs(selector: &str, out: &mut Vec<ElementRef>) {
    for caps in CSS_ATTR_RE.captures_iter(selector) {
        let Some(kind) = RefKind::parse(&caps[1]) else {
            continue;
        };
        let op = &caps[2];
        let value = quoted(&caps, 3).or_else(|| caps.get(5).map(|m| m.as_str()));
        let partial = !(op.is_empty() || (op == "~" && kind == RefKind::Class));
        attribute_refs(kind, partial, value.unwrap_or(""), out);
    }
    let bare = CSS_BRACKET_RE.replace_all(selector, " ");
    for caps in CSS_SIMPLE_RE.captures_iter(&bare) {
        let kind = if &caps[1] == "#" { RefKind::Id } else { RefKind::Class };
        out.push(ElementRef::exact(kind, &caps[2]));
    }
}

fn xpath_refs(xpath: &str, out: &mut Vec<ElementRef>) {
    for (re, partial) in [(&*XPATH_EQ_RE, false), (&*XPATH_FN_RE, true)] {
        for caps in re.captures_iter(xpath) {
            if let Some(kind) = RefKind::parse(&caps[1]) {
                attribute_refs(kind, partial, quoted(&caps, 2).unwrap_or(""), out);
            }
        }
    }
}

/// Locator strategy, from `By.CLASS_NAME`, `"class name"` or `class_name`.
fn strategy_refs(strategy: &str, value: &str, out: &mut Vec<ElementRef>) {
    let normalized: String = strategy
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "id" => attribute_refs(RefKind::Id, false, value.trim(), out),
        "name" => attribute_refs(RefKind::Name, false, value.trim(), out),
        "classname" => attribute_refs(RefKind::Class, false, value, out),
        "cssselector" => css_refs(value, out),
        "xpath" => xpath_refs(value, out),
        _ => {}
    }
}

/// Every element reference in `script`, in order of first appearance,
/// plus the locators whose value is computed at runtime.
fn scan_locators(script: &str) -> (Vec<ElementRef>, Vec<String>) {
    let mut found: Vec<(usize, ElementRef)> = Vec::new();
    let mut dynamic = Vec::new();

    for re in LOCATOR_RES.iter() {
        for caps in re.captures_iter(script) {
            let at = caps.get(0).map_or(0, |m| m.start());
            match quoted(&caps, 2) {
                Some(value) => {
                    let mut refs = Vec::new();
                    strategy_refs(&caps[1], value, &mut refs);
                    found.extend(refs.into_iter().map(|r| (at, r)));
                }
                None => dynamic.push(format!("{} locator", &caps[1])),
            }
        }
    }

    found.sort_by_key(|(at, _)| *at);
    let mut seen = BTreeSet::new();
    let refs = found
        .into_iter()
        .map(|(_, r)| r)
        .filter(|r| seen.insert(r.clone()))
        .collect();
    (refs, dynamic)
}

/// Identifier for a target page that was supplied inline rather than
/// ingested.
pub fn inline_target_id(html: &str) -> String {
    format!("html-{}", &sha256_hex(html)[..16])
}

/// Remove a surrounding Markdown code fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => "",
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Element references a script makes, as `id:<value>`, `name:<value>` or
/// `class:<value>`. Substring matches from XPath `contains()` and CSS
/// `*=`-style operators use `~` instead of `:`.
pub fn element_refs(script: &str) -> Vec<String> {
    scan_locators(script)
        .0
        .iter()
        .map(ElementRef::to_string)
        .collect()
}

/// The first and second capture after `first` are the double- and
/// single-quoted forms of the same value.
fn quoted<'h>(caps: &regex::Captures<'h>, first: usize) -> Option<&'h str> {
    caps.get(first)
        .or_else(|| caps.get(first + 1))
        .map(|m| m.as_str())
}

/// Check a script's shape and its element references against `page`.
///
/// Returns the cleaned script text and its element references.
pub fn validate_script(raw: &str, page: &PageStructure) -> Result<(String, Vec<String>)> {
    let script = strip_code_fence(raw);
    if script.is_empty() {
        return Err(QaError::schema("script", "script is empty"));
    }

    for (marker, section) in REQUIRED_SECTIONS {
        if !script.contains(marker) {
            return Err(QaError::schema(
                "script",
                format!("missing {section} (expected `{marker}`)"),
            ));
        }
    }
    let teardown_quits = script
        .find("finally:")
        .is_some_and(|at| script[at..].contains(".quit()"));
    if !teardown_quits {
        return Err(QaError::schema(
            "script",
            "the finally: block never calls .quit() on the driver",
        ));
    }

    let (refs, dynamic) = scan_locators(script);
    if !dynamic.is_empty() {
        return Err(QaError::schema(
            "script",
            format!(
                "locators built at runtime cannot be checked against the target page: {}",
                dynamic.join(", ")
            ),
        ));
    }
    let missing: Vec<String> = refs
        .iter()
        .filter(|r| !r.exists_in(page))
        .map(ElementRef::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(QaError::schema(
            "script",
            format!(
                "references elements not present in the target page: {}",
                missing.join(", ")
            ),
        ));
    }

    let refs = refs.iter().map(ElementRef::to_string).collect();
    Ok((script.to_string(), refs))
}

#[derive(Deserialize)]
struct RawScript {
    script: String,
    #[serde(default)]
    description: Option<String>,
}

pub struct ScriptSynthesizer {
    completer: Arc<dyn CompletionService>,
    timeout: Duration,
    max_html_chars: usize,
    target_path: String,
}

impl ScriptSynthesizer {
    pub fn new(
        completer: Arc<dyn CompletionService>,
        timeout: Duration,
        max_html_chars: usize,
        target_path: impl Into<String>,
    ) -> Self {
        Self {
            completer,
            timeout,
            max_html_chars,
            target_path: target_path.into(),
        }
    }

    /// Generate and validate a script for `test_case` against `target_html`.
    ///
    /// `documentation` is optional supporting evidence placed after the page
    /// description. A blank page fails with [`QaError::MissingTarget`] before
    /// any model call. There is no automatic retry.
    pub async fn synthesize(
        &self,
        test_case: &TestCase,
        target_html: &str,
        target_source: &str,
        documentation: &[RetrievalResult],
    ) -> Result<ScriptArtifact> {
        if target_html.trim().is_empty() {
            return Err(QaError::MissingTarget(
                "a target HTML page is required to generate a script".to_string(),
            ));
        }

        let page = PageStructure::extract(target_html);
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: self.build_prompt(test_case, &page, target_html, documentation),
            json_response: true,
        };
        tracing::info!(test_id = %test_case.test_id, target = target_source, "requesting script");
        let response = with_deadline(
            "completion service",
            self.timeout,
            self.completer.complete(&request),
        )
        .await?;

        let raw: RawScript = serde_json::from_str(response.trim()).map_err(|e| {
            QaError::schema("script", format!("response is not a script envelope: {e}"))
        })?;
        let (script_text, element_refs) = validate_script(&raw.script, &page)?;

        Ok(ScriptArtifact {
            test_id: test_case.test_id.clone(),
            script_text,
            target_source: target_source.to_string(),
            description: raw.description.filter(|d| !d.trim().is_empty()),
            element_refs,
        })
    }

    fn build_prompt(
        &self,
        test_case: &TestCase,
        page: &PageStructure,
        html: &str,
        documentation: &[RetrievalResult],
    ) -> String {
        let steps = test_case
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if s.data.is_empty() {
                    format!("{}. {}", i + 1, s.action)
                } else {
                    format!("{}. {} (data: {})", i + 1, s.action, s.data)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let excerpt: String = html.chars().take(self.max_html_chars).collect();
        let docs = documentation
            .iter()
            .map(|r| r.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            r#"Write a Selenium (Python) script that automates this test case.

TEST CASE {id}: {title}
Category: {category:?}
Preconditions: {preconditions}
Steps:
{steps}
Expected result: {expected}

PAGE STRUCTURE:
{summary}
HTML EXCERPT:
{excerpt}

DOCUMENTATION:
{docs}

REQUIREMENTS:
- Start Chrome with `webdriver.Chrome()` and open "file://" + os.path.abspath("{target_path}").
- Locate elements only with the ids, names and classes listed in PAGE STRUCTURE.
- Use WebDriverWait with expected_conditions instead of time.sleep.
- Check the expected result with assert statements.
- Put the test in try/finally and call driver.quit() in the finally: block.
"#,
            id = test_case.test_id,
            title = test_case.title,
            category = test_case.category,
            preconditions = if test_case.preconditions.is_empty() {
                "none"
            } else {
                test_case.preconditions.as_str()
            },
            expected = test_case.expected_result,
            summary = page.summary(),
            target_path = self.target_path,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<form id="checkout"><input id="email" name="email">
        <button id="pay-now" class="btn primary">Pay</button><div id="success-message"></div>
        <a href="#top" id="back">Back</a></form>"##;

    const GOOD: &str = r#"from selenium import webdriver
from selenium.webdriver.common.by import By
from selenium.webdriver.support.ui import WebDriverWait
from selenium.webdriver.support import expected_conditions as EC

driver = webdriver.Chrome()
try:
    driver.find_element(By.ID, "email").send_keys("a@b.co")
    driver.find_element(By.CSS_SELECTOR, "form#checkout button#pay-now").click()
    msg = WebDriverWait(driver, 10).until(EC.visibility_of_element_located((By.ID, 'success-message')))
    assert "Successful" in msg.text
finally:
    driver.quit()
"#;

    #[test]
    fn test_valid_script_passes_and_lists_refs() {
        let page = PageStructure::extract(PAGE);
        let (script, refs) = validate_script(GOOD, &page).unwrap();
        assert!(script.starts_with("from selenium"));
        assert_eq!(
            refs,
            vec!["id:email", "id:checkout", "id:pay-now", "id:success-message"]
        );
    }

    #[test]
    fn test_code_fence_stripped() {
        let fenced = format!("```python\n{GOOD}```\n");
        let page = PageStructure::extract(PAGE);
        let (script, _) = validate_script(&fenced, &page).unwrap();
        assert!(!script.contains("```"));
        assert_eq!(strip_code_fence("```\n```"), "");
    }

    #[test]
    fn test_unknown_selector_rejected() {
        let page = PageStructure::extract(PAGE);
        let script = GOOD.replace("\"email\"", "\"coupon-box\"");
        let err = validate_script(&script, &page).unwrap_err();
        assert!(err.to_string().contains("id:coupon-box"));
    }

    #[test]
    fn test_missing_sections_rejected() {
        let page = PageStructure::extract(PAGE);
        let no_wait = GOOD.replace("WebDriverWait", "Waiter");
        assert!(validate_script(&no_wait, &page)
            .unwrap_err()
            .to_string()
            .contains("explicit wait"));

        let no_quit = GOOD.replace("driver.quit()", "pass");
        assert!(validate_script(&no_quit, &page)
            .unwrap_err()
            .to_string()
            .contains(".quit()"));

        assert!(validate_script("   ", &page).is_err());
    }

    #[test]
    fn test_legacy_finders_checked() {
        let refs = element_refs(
            "driver.find_element_by_name('email'); driver.find_element_by_id(\"x\")",
        );
        assert_eq!(refs, vec!["name:email", "id:x"]);
    }

    fn with_locator(locator: &str) -> String {
        GOOD.replace("By.ID, \"email\"", locator)
    }

    #[test]
    fn test_xpath_attributes_checked() {
        let page = PageStructure::extract(PAGE);
        let ok = with_locator(r#"By.XPATH, "//input[@id='email' and @name='email']""#);
        let (_, refs) = validate_script(&ok, &page).unwrap();
        assert!(refs.contains(&"name:email".to_string()));

        let invented = with_locator(r#"By.XPATH, "//*[@id='invented-button']""#);
        let err = validate_script(&invented, &page).unwrap_err();
        assert!(err.to_string().contains("id:invented-button"));

        let partial = with_locator(r#"By.XPATH, "//button[contains(@id, 'pay')]""#);
        assert!(validate_script(&partial, &page).is_ok());
        let partial = with_locator(r#"By.XPATH, "//button[contains(@id, 'refund')]""#);
        assert!(validate_script(&partial, &page)
            .unwrap_err()
            .to_string()
            .contains("id~refund"));
    }

    #[test]
    fn test_string_strategy_locators_checked() {
        let page = PageStructure::extract(PAGE);
        for locator in [r#""id", "invented-button""#, r#""name", 'coupon'"#] {
            let script = with_locator(locator);
            assert!(validate_script(&script, &page).is_err(), "{locator} accepted");
        }
        let ok = with_locator(r#""name", "email""#);
        assert!(validate_script(&ok, &page).is_ok());
    }

    #[test]
    fn test_class_names_checked_against_page() {
        let page = PageStructure::extract(PAGE);
        let ok = with_locator(r#"By.CLASS_NAME, "btn""#);
        assert!(validate_script(&ok, &page).is_ok());
        let invented = with_locator(r#"By.CLASS_NAME, "invented-class""#);
        assert!(validate_script(&invented, &page)
            .unwrap_err()
            .to_string()
            .contains("class:invented-class"));
        let css = with_locator(r#"By.CSS_SELECTOR, "button.primary.ghost""#);
        assert!(validate_script(&css, &page)
            .unwrap_err()
            .to_string()
            .contains("class:ghost"));
    }

    #[test]
    fn test_css_attribute_values_are_not_ids() {
        let page = PageStructure::extract(PAGE);
        let script = with_locator(r#"By.CSS_SELECTOR, "a[href='#top']""#);
        let (_, refs) = validate_script(&script, &page).unwrap();
        assert!(!refs.iter().any(|r| r.contains("top")));

        let by_attr = with_locator(r#"By.CSS_SELECTOR, "input[name='discount']""#);
        assert!(validate_script(&by_attr, &page)
            .unwrap_err()
            .to_string()
            .contains("name:discount"));
    }

    #[test]
    fn test_runtime_locators_rejected() {
        let page = PageStructure::extract(PAGE);
        let script = with_locator("By.ID, field_id");
        let err = validate_script(&script, &page).unwrap_err();
        assert!(err.to_string().contains("built at runtime"));
    }

    #[test]
    fn test_inline_target_id_is_stable() {
        assert_eq!(inline_target_id(PAGE), inline_target_id(PAGE));
        assert!(inline_target_id(PAGE).starts_with("html-"));
    }
}
