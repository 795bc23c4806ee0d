//! SVG Sanitizer - Untrusted Markup In, Safe Markup Out
//!
//! Never returns an error. Every failure ends in either defanged markup or
//! the fixed placeholder, and the output is a fixed point:
//! `sanitize(sanitize(x)) == sanitize(x)`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dom::{self, Attribute, Element, Node};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static SANITIZE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_sanitize_call_count() -> u32 {
    SANITIZE_CALL_COUNT.load(Ordering::SeqCst)
}

pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"><rect width="100" height="100" fill="#f2f2f2"/></svg>"##;

/// Element local names removed with their whole subtree (lowercase).
const BANNED_ELEMENTS: &[&str] = &[
    "script",
    "foreignobject",
    "animate",
    "animatemotion",
    "animatetransform",
    "animatecolor",
    "set",
    "use",
    "iframe",
    "embed",
    "object",
    "handler",
    "listener",
    "annotation",
    "annotation-xml",
    "color-profile",
];

/// Attribute local names stripped from every element (lowercase). Any `on*`
/// handler is stripped as well.
const BANNED_ATTRIBUTES: &[&str] = &[
    "href",
    "action",
    "formaction",
    "begin",
    "end",
    "dur",
    "repeatcount",
    "repeatdur",
    "restart",
    "attributename",
    "attributetype",
    "from",
    "to",
    "by",
    "keytimes",
    "keysplines",
    "calcmode",
    "additive",
    "accumulate",
];

const STYLE_FORBIDDEN: &[&str] = &["expression", "javascript", "behavior"];

/// Literal signatures that send raw input straight to the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signature {
    ScriptTag,
    JavascriptUri,
    VbscriptUri,
    CssExpression,
    DataUri,
    Base64,
    HexEntityRun,
    EventHandler,
}

impl Signature {
    pub fn name(&self) -> &'static str {
        match self {
            Signature::ScriptTag => "script_tag",
            Signature::JavascriptUri => "javascript_uri",
            Signature::VbscriptUri => "vbscript_uri",
            Signature::CssExpression => "css_expression",
            Signature::DataUri => "data_uri",
            Signature::Base64 => "base64",
            Signature::HexEntityRun => "hex_entity_run",
            Signature::EventHandler => "event_handler",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderReason {
    MalformedInput,
    UnsafeSignature(Signature),
    NoSvgElement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SanitizeOutcome {
    Clean,
    Defanged {
        removed_elements: usize,
        removed_attributes: usize,
        scrubbed_styles: usize,
    },
    Placeholder {
        reason: PlaceholderReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sanitized {
    pub markup: String,
    pub outcome: SanitizeOutcome,
}

impl Sanitized {
    fn placeholder(reason: PlaceholderReason) -> Self {
        Self {
            markup: PLACEHOLDER_SVG.to_string(),
            outcome: SanitizeOutcome::Placeholder { reason },
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.outcome, SanitizeOutcome::Placeholder { .. })
    }
}

/// Sanitize raw bytes and return only the markup.
pub fn sanitize(raw: &[u8]) -> String {
    sanitize_report(raw).markup
}

pub fn sanitize_str(raw: &str) -> String {
    sanitize_report(raw.as_bytes()).markup
}

/// Sanitize raw bytes, reporting what was done to them.
pub fn sanitize_report(raw: &[u8]) -> Sanitized {
    #[cfg(feature = "test-hooks")]
    SANITIZE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    let decoded = String::from_utf8_lossy(raw);
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);

    if let Some(signature) = scan_signatures(text) {
        warn!(signature = signature.name(), "unsafe signature in raw svg, using placeholder");
        return Sanitized::placeholder(PlaceholderReason::UnsafeSignature(signature));
    }

    let mut root = match parse_svg_root(text) {
        Ok(root) => root,
        Err(reason) => {
            debug!(?reason, "svg could not be recovered, using placeholder");
            return Sanitized::placeholder(reason);
        }
    };

    let mut stats = DefangStats::default();
    defang(&mut root, &mut stats);
    let markup = root.to_markup();

    // Entity-decoded text can surface a signature the raw scan never saw.
    // Text never carries a literal `=`, so the handler check only sees
    // attribute names.
    let late = scan_signatures(&markup)
        .or_else(|| handler_regex().is_match(&markup).then_some(Signature::EventHandler));
    if let Some(signature) = late {
        warn!(signature = signature.name(), "unsafe signature after parsing, using placeholder");
        return Sanitized::placeholder(PlaceholderReason::UnsafeSignature(signature));
    }

    let outcome = if stats.is_clean() {
        SanitizeOutcome::Clean
    } else {
        warn!(
            removed_elements = stats.removed_elements,
            removed_attributes = stats.removed_attributes,
            scrubbed_styles = stats.scrubbed_styles,
            "defanged unsafe svg content"
        );
        SanitizeOutcome::Defanged {
            removed_elements: stats.removed_elements,
            removed_attributes: stats.removed_attributes,
            scrubbed_styles: stats.scrubbed_styles,
        }
    };

    Sanitized { markup, outcome }
}

/// Return the first deny-listed signature found in `text`.
pub fn scan_signatures(text: &str) -> Option<Signature> {
    if let Some((signature, _)) = signature_patterns().iter().find(|(_, re)| re.is_match(text)) {
        return Some(*signature);
    }
    if has_non_image_data_uri(text) {
        return Some(Signature::DataUri);
    }
    None
}

fn signature_patterns() -> &'static [(Signature, Regex)] {
    static PATTERNS: OnceLock<Vec<(Signature, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (Signature::ScriptTag, r"(?i)<\s*/?\s*script"),
            (Signature::JavascriptUri, r"(?i)javascript\s*:"),
            (Signature::VbscriptUri, r"(?i)vbscript\s*:"),
            (Signature::CssExpression, r"(?i)expression\s*\("),
            (Signature::Base64, r"(?i)base64"),
            // Three or more hex references to ASCII code points in a row.
            (Signature::HexEntityRun, r"(?i)(?:&#x0*[0-7]?[0-9a-f];?){3,}"),
        ]
        .into_iter()
        .map(|(signature, pattern)| (signature, Regex::new(pattern).expect("valid regex")))
        .collect()
    })
}

fn handler_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\son[a-z0-9_.:-]*\s*=\s*["']"#).expect("valid regex"))
}

/// `data:` only counts inside `url(..)` or at the start of a quoted
/// attribute value.
fn data_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:url\(\s*['"]?|=\s*["'])\s*data\s*:\s*([a-z0-9.+\-]*/[a-z0-9.+\-]*)?"#)
            .expect("valid regex")
    })
}

fn has_non_image_data_uri(text: &str) -> bool {
    data_uri_regex().captures_iter(text).any(|caps| {
        !caps
            .get(1)
            .is_some_and(|media| media.as_str().to_ascii_lowercase().starts_with("image/"))
    })
}

fn is_svg(element: &Element) -> bool {
    element.local_name().eq_ignore_ascii_case("svg")
}

fn parse_svg_root(text: &str) -> Result<Element, PlaceholderReason> {
    match dom::parse_strict(text) {
        Ok(root) => first_svg(root).ok_or(PlaceholderReason::NoSvgElement),
        Err(err) => {
            debug!(error = %err, "strict xml parse failed, retrying lenient markup parse");
            let svg = match dom::parse_lenient_svg(text) {
                Ok(Some(svg)) => svg,
                Ok(None) => return Err(PlaceholderReason::NoSvgElement),
                Err(_) => return Err(PlaceholderReason::MalformedInput),
            };
            // Only well-formed XML leaves this module.
            dom::parse_strict(&svg.to_markup()).map_err(|_| PlaceholderReason::MalformedInput)
        }
    }
}

fn first_svg(root: Element) -> Option<Element> {
    if is_svg(&root) {
        return Some(root);
    }
    root.children.into_iter().find_map(|child| match child {
        Node::Element(e) => first_svg(e),
        Node::Text(_) => None,
    })
}

#[derive(Debug, Default)]
struct DefangStats {
    removed_elements: usize,
    removed_attributes: usize,
    scrubbed_styles: usize,
}

impl DefangStats {
    fn is_clean(&self) -> bool {
        self.removed_elements == 0 && self.removed_attributes == 0 && self.scrubbed_styles == 0
    }
}

// Removal sets are computed over the untouched child/attribute lists first,
// then applied with a single `retain` each.
fn defang(element: &mut Element, stats: &mut DefangStats) {
    let doomed_children: Vec<bool> = element
        .children
        .iter()
        .map(|child| matches!(child, Node::Element(e) if is_banned_element(e)))
        .collect();
    stats.removed_elements += doomed_children.iter().filter(|d| **d).count();
    let mut flags = doomed_children.into_iter();
    element.children.retain(|_| !flags.next().unwrap_or(false));

    let doomed_attributes: Vec<bool> = element.attributes.iter().map(is_banned_attribute).collect();
    stats.removed_attributes += doomed_attributes.iter().filter(|d| **d).count();
    let mut flags = doomed_attributes.into_iter();
    element.attributes.retain(|_| !flags.next().unwrap_or(false));

    if let Some(style) = element.attr("style") {
        if let Some(scrubbed) = scrub_style(style) {
            stats.scrubbed_styles += 1;
            if scrubbed.is_empty() {
                element.remove_attr("style");
            } else {
                element.set_attr("style", scrubbed);
            }
        }
    }

    for child in element.children.iter_mut() {
        if let Node::Element(e) = child {
            defang(e, stats);
        }
    }
}

fn is_banned_element(element: &Element) -> bool {
    let local = element.local_name().to_ascii_lowercase();
    if BANNED_ELEMENTS.contains(&local.as_str()) {
        return true;
    }
    local == "style" && contains_forbidden_style(&element.text_content())
}

fn is_banned_attribute(attr: &Attribute) -> bool {
    if attr.name.is_namespace_decl() {
        return false;
    }
    let local = attr.name.local.to_ascii_lowercase();
    local.starts_with("on") || BANNED_ATTRIBUTES.contains(&local.as_str())
}

fn contains_forbidden_style(css: &str) -> bool {
    let lowered = css.to_ascii_lowercase();
    STYLE_FORBIDDEN.iter().any(|token| lowered.contains(token))
}

/// Drop every declaration carrying a forbidden token. `None` when the style
/// is already clean.
fn scrub_style(style: &str) -> Option<String> {
    if !contains_forbidden_style(style) {
        return None;
    }
    let kept: Vec<&str> = style
        .split(';')
        .map(str::trim)
        .filter(|decl| !decl.is_empty() && !contains_forbidden_style(decl))
        .collect();
    Some(kept.join(";"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[&str] = &[
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><rect width="10" height="10"/></svg>"#,
        r#"<svg onload="alert(1)"><circle r="4" onclick="x()"/></svg>"#,
        r#"<svg><script>alert(1)</script><rect/></svg>"#,
        r#"<svg><a href="javascript:alert(1)"><text>hi</text></a></svg>"#,
        r#"<svg><text style="fill:red; behavior:url(x.htc)">t</text></svg>"#,
        r#"<svg><foreignObject><div>x</div></foreignObject><g><animate attributeName="x" dur="1s"/></g></svg>"#,
        r#"<svg><text>a & b</text></svg>"#,
        r#"<svg><text>&#106;avascript:void(0)</text></svg>"#,
        r#"<svg><text>onload=steal()</text></svg>"#,
        "not markup at all",
        "<html><body><svg viewBox=\"0 0 4 4\"><rect width=\"4\"></rect></svg></body></html>",
        r#"<svg xmlns:xlink="http://www.w3.org/1999/xlink"><image xlink:href="x.png" width="3"/></svg>"#,
        "",
    ];

    #[test]
    fn test_sanitize_idempotent() {
        for input in CORPUS {
            let once = sanitize_str(input);
            let twice = sanitize_str(&once);
            assert_eq!(once, twice, "not a fixed point for {input:?}");
        }
    }

    #[test]
    fn test_placeholder_is_fixed_point() {
        let report = sanitize_report(PLACEHOLDER_SVG.as_bytes());
        assert_eq!(report.markup, PLACEHOLDER_SVG);
        assert_eq!(report.outcome, SanitizeOutcome::Clean);
    }

    #[test]
    fn test_dangerous_substrings_never_survive() {
        for input in CORPUS {
            let out = sanitize_str(input).to_ascii_lowercase();
            assert!(!out.contains("<script"), "{out}");
            assert!(!out.contains("onload="), "{out}");
            assert!(!out.contains("javascript:"), "{out}");
        }
    }

    #[test]
    fn test_script_signature_short_circuits() {
        let report = sanitize_report(CORPUS[2].as_bytes());
        assert_eq!(
            report.outcome,
            SanitizeOutcome::Placeholder {
                reason: PlaceholderReason::UnsafeSignature(Signature::ScriptTag)
            }
        );
    }

    #[test]
    fn test_handlers_and_banned_elements_removed() {
        let report = sanitize_report(CORPUS[1].as_bytes());
        assert_eq!(report.markup, r#"<svg><circle r="4"/></svg>"#);
        assert!(matches!(
            report.outcome,
            SanitizeOutcome::Defanged { removed_attributes: 2, .. }
        ));

        let out = sanitize_str(CORPUS[5]);
        assert_eq!(out, "<svg><g/></svg>");
    }

    #[test]
    fn test_element_names_match_exactly() {
        let out = sanitize_str("<svg><user/><settings/><use/></svg>");
        assert_eq!(out, "<svg><user/><settings/></svg>");
    }

    #[test]
    fn test_style_scrubbed_per_declaration() {
        let out = sanitize_str(CORPUS[4]);
        assert_eq!(out, r#"<svg><text style="fill:red">t</text></svg>"#);

        let out = sanitize_str(r#"<svg><g style="behavior:url(a)"/></svg>"#);
        assert_eq!(out, "<svg><g/></svg>");
    }

    #[test]
    fn test_xlink_href_stripped() {
        let out = sanitize_str(CORPUS[11]);
        assert!(!out.contains("href"));
        assert!(out.contains(r#"width="3""#));
    }

    #[test]
    fn test_entity_obfuscation_caught_after_parse() {
        let report = sanitize_report(CORPUS[7].as_bytes());
        assert!(report.is_placeholder());
    }

    #[test]
    fn test_hex_entity_run_rejected() {
        let input = "<svg><text>&#x6a;&#x61;&#x76;&#x61;</text></svg>";
        assert_eq!(
            sanitize_report(input.as_bytes()).outcome,
            SanitizeOutcome::Placeholder {
                reason: PlaceholderReason::UnsafeSignature(Signature::HexEntityRun)
            }
        );
        // Non-ASCII references are ordinary text.
        let cjk = "<svg><text>&#x4e2d;&#x6587;&#x5b57;</text></svg>";
        assert!(!sanitize_report(cjk.as_bytes()).is_placeholder());
    }

    #[test]
    fn test_data_uri_policy() {
        assert_eq!(scan_signatures("fill=\"url(data:text/html,x)\""), Some(Signature::DataUri));
        assert_eq!(scan_signatures("src=\"data:image/png,abc\""), None);
        assert_eq!(scan_signatures("<text>metadata: none</text>"), None);
        assert_eq!(scan_signatures("<text>Big data: 2024</text>"), None);
    }

    #[test]
    fn test_prose_is_not_markup() {
        for slogan in ["one = family", "Big data: 2024", "Team onload=1", "score = 3:1"] {
            let input = format!("<svg><text>{slogan}</text></svg>");
            let report = sanitize_report(input.as_bytes());
            assert!(!report.is_placeholder(), "{slogan:?} became the placeholder");
            assert!(!report.markup.to_ascii_lowercase().contains("onload="));
            assert_eq!(sanitize_str(&report.markup), report.markup);
        }
        assert_eq!(sanitize_str(CORPUS[8]), "<svg><text>onload&#61;steal()</text></svg>");
    }

    #[test]
    fn test_data_uri_in_attribute_value_after_decoding() {
        let input = r#"<svg><rect fill="&#100;ata:text/html,x"/></svg>"#;
        assert_eq!(
            sanitize_report(input.as_bytes()).outcome,
            SanitizeOutcome::Placeholder {
                reason: PlaceholderReason::UnsafeSignature(Signature::DataUri)
            }
        );
    }

    #[test]
    fn test_malformed_recovered_leniently() {
        let report = sanitize_report(CORPUS[6].as_bytes());
        assert!(!report.is_placeholder());
        assert_eq!(report.markup, "<svg><text>a &amp; b</text></svg>");
    }

    #[test]
    fn test_garbage_yields_placeholder() {
        assert_eq!(sanitize_str("not markup at all"), PLACEHOLDER_SVG);
        assert_eq!(sanitize_str(""), PLACEHOLDER_SVG);
        assert_eq!(sanitize_str("<html><p>no vector here</p></html>"), PLACEHOLDER_SVG);
    }

    #[test]
    fn test_external_entities_never_expanded() {
        let input = r#"<!DOCTYPE svg [<!ENTITY xxe SYSTEM "file:///etc/passwd">]><svg><text>&xxe;</text></svg>"#;
        let out = sanitize_str(input);
        assert!(!out.contains("root:"));
        assert!(!out.contains("passwd"));
    }

    #[test]
    fn test_svg_nested_in_xml_root_is_extracted() {
        let out = sanitize_str(r#"<doc><svg width="2"><rect/></svg></doc>"#);
        assert_eq!(out, r#"<svg width="2"><rect/></svg>"#);
    }
}
