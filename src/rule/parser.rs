//! Evaluation of rule strings against parsed HTML.
//!
//! A rule is a small selector expression:
//!
//! ```text
//! rule      := alt ( "||" alt )*
//! alt       := base ( "##" pattern ( "##" replacement )? )?
//! base      := css ( "@" attr )?
//! css       := selector ( "." index )?
//! ```
//!
//! Evaluation never fails. A bad selector or a bad regex degrades to an empty
//! or unprocessed value and is logged at debug level, because rules are user
//! authored and run against third-party markup.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static INDEX_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\.(-?\d+)$").expect("index suffix regex is valid"));

/// Parse a full HTML document.
pub fn parse_document(html: &str) -> Html {
    Html::parse_document(html)
}

/// Evaluate `rule` under `root` and return the first non-blank value, or `""`.
pub fn get_string(root: ElementRef<'_>, rule: &str) -> String {
    if rule.trim().is_empty() {
        return String::new();
    }

    for alternative in rule.split("||") {
        let value = eval_single(root, alternative.trim());
        let value = value.trim();
        if !value.is_empty() {
            return value.to_string();
        }
    }
    String::new()
}

/// Evaluate `rule` against every matched element, dropping blank values.
///
/// The first `||` alternative producing any value wins.
pub fn get_strings(root: ElementRef<'_>, rule: &str) -> Vec<String> {
    if rule.trim().is_empty() {
        return Vec::new();
    }

    for alternative in rule.split("||") {
        let parts = RuleParts::parse(alternative.trim());
        let values: Vec<String> = select_css(root, parts.css)
            .into_iter()
            .map(|el| parts.post_process(extract_attr(el, parts.attr)))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if !values.is_empty() {
            return values;
        }
    }
    Vec::new()
}

/// Select the elements `rule` refers to.
///
/// Attribute (`@...`) and regex (`##...`) suffixes are ignored. A leading `-`
/// reverses the match order and a blank rule yields `root` itself.
pub fn get_elements<'a>(root: ElementRef<'a>, rule: &str) -> Vec<ElementRef<'a>> {
    let rule = rule.trim();
    if rule.is_empty() {
        return vec![root];
    }

    for alternative in rule.split("||") {
        let alternative = alternative.trim();
        let (reverse, alternative) = match alternative.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, alternative),
        };
        let parts = RuleParts::parse(alternative);

        let mut elements = select_css(root, parts.css);
        if reverse {
            elements.reverse();
        }
        if !elements.is_empty() {
            return elements;
        }
    }
    Vec::new()
}

/// Evaluate one `||`-free alternative.
fn eval_single(root: ElementRef<'_>, rule: &str) -> String {
    let parts = RuleParts::parse(rule);

    let element = if parts.css.trim().is_empty() {
        Some(root)
    } else {
        select_one(root, parts.css)
    };

    match element {
        Some(el) => parts.post_process(extract_attr(el, parts.attr)),
        None => String::new(),
    }
}

/// An alternative split into its selector, attribute and regex pieces.
struct RuleParts<'r> {
    css: &'r str,
    attr: &'r str,
    pattern: Option<&'r str>,
    replacement: Option<&'r str>,
}

impl<'r> RuleParts<'r> {
    fn parse(rule: &'r str) -> Self {
        let mut sections = rule.splitn(3, "##");
        let base = sections.next().unwrap_or_default();
        let pattern = sections.next().filter(|p| !p.is_empty());
        let replacement = sections.next();

        let (css, attr) = if base.starts_with('[') {
            (base, "text")
        } else {
            match base.rsplit_once('@') {
                Some((css, attr)) => (css, attr),
                None => (base, "text"),
            }
        };

        Self {
            css: css.trim(),
            attr: attr.trim(),
            pattern,
            replacement,
        }
    }

    /// Apply the `##pattern##replacement` stage to an extracted value.
    fn post_process(&self, value: String) -> String {
        let Some(pattern) = self.pattern else {
            return value;
        };

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                debug!(pattern, error = %e, "Invalid regex in rule, keeping raw value");
                return value;
            }
        };

        match self.replacement {
            Some(replacement) if !replacement.is_empty() => regex.replace_all(&value, replacement).into_owned(),
            _ => regex
                .captures(&value)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Select every element matching `css` (with an optional `.N` index suffix).
fn select_css<'a>(root: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    if css.is_empty() {
        return vec![root];
    }

    let (css, index) = split_index(css);
    let Some(selector) = parse_selector(css) else {
        return Vec::new();
    };
    let matched: Vec<ElementRef<'a>> = root.select(&selector).collect();

    match index {
        Some(index) => pick(&matched, index).into_iter().collect(),
        None => matched,
    }
}

fn select_one<'a>(root: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let (css, index) = split_index(css);
    let selector = parse_selector(css)?;

    match index {
        None => root.select(&selector).next(),
        Some(index) if index >= 0 => root.select(&selector).nth(index as usize),
        Some(index) => {
            let matched: Vec<ElementRef<'a>> = root.select(&selector).collect();
            pick(&matched, index)
        }
    }
}

/// Python-style indexing; out-of-range negative indices fall back to the first element.
fn pick<'a>(matched: &[ElementRef<'a>], index: i64) -> Option<ElementRef<'a>> {
    if index >= 0 {
        return matched.get(index as usize).copied();
    }

    let from_end = index.unsigned_abs() as usize;
    if from_end <= matched.len() {
        matched.get(matched.len() - from_end).copied()
    } else {
        matched.first().copied()
    }
}

fn split_index(css: &str) -> (&str, Option<i64>) {
    match INDEX_SUFFIX.captures(css) {
        Some(caps) => {
            let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let index = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
            match index {
                Some(index) => (base.trim(), Some(index)),
                None => (css, None),
            }
        }
        None => (css, None),
    }
}

fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            debug!(css, error = %e, "Invalid CSS selector in rule");
            None
        }
    }
}

fn extract_attr(el: ElementRef<'_>, attr: &str) -> String {
    match attr.to_ascii_lowercase().as_str() {
        "" => String::new(),
        "text" => element_text(el),
        "html" | "innerhtml" => el.inner_html(),
        "outerhtml" => el.html(),
        "owntext" => own_text(el),
        name => el.value().attr(name).unwrap_or_default().to_string(),
    }
}

/// Concatenated descendant text with runs of whitespace collapsed.
pub fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn own_text(el: ElementRef<'_>) -> String {
    let text: String = el
        .children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect();
    collapse_whitespace(&text)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
