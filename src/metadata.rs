//! Metadata Extractor - Intrinsic Size of Sanitized SVG
//!
//! Always yields a positive width and height so callers can divide by them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dom;

pub const FALLBACK_SIZE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewBox {
    pub fn from_size(width: f64, height: f64) -> Self {
        Self { min_x: 0.0, min_y: 0.0, width, height }
    }

    /// Parse `"min-x min-y width height"`, comma and/or whitespace separated.
    /// Non-positive extents are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<f64> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect::<Option<_>>()?;
        let [min_x, min_y, width, height] = parts[..] else {
            return None;
        };
        if width > 0.0 && height > 0.0 {
            Some(Self { min_x, min_y, width, height })
        } else {
            None
        }
    }
}

impl fmt::Display for ViewBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.min_x, self.min_y, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvgMetrics {
    pub width: f64,
    pub height: f64,
    pub view_box: String,
}

impl SvgMetrics {
    fn fallback() -> Self {
        Self {
            width: FALLBACK_SIZE,
            height: FALLBACK_SIZE,
            view_box: ViewBox::from_size(FALLBACK_SIZE, FALLBACK_SIZE).to_string(),
        }
    }
}

/// Pixel factor for an absolute length unit. Percentages have no fixed
/// factor and are treated as absent.
fn unit_factor(unit: &str) -> Option<f64> {
    match unit {
        "" | "px" => Some(1.0),
        "pt" => Some(4.0 / 3.0),
        "pc" => Some(16.0),
        "mm" => Some(96.0 / 25.4),
        "cm" => Some(96.0 / 2.54),
        "in" => Some(96.0),
        _ => None,
    }
}

/// Parse an SVG length (`"12"`, `"3.5mm"`, `"1in"`) into pixels. Returns
/// `None` for missing, zero, negative, relative or unknown values.
pub fn parse_length(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic() || c == '%')
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value = number.trim().parse::<f64>().ok()?;
    let px = value * unit_factor(&unit.trim().to_ascii_lowercase())?;
    (px.is_finite() && px > 0.0).then_some(px)
}

/// Extract `{width, height, viewBox}` from sanitized markup.
pub fn extract_metrics(markup: &str) -> SvgMetrics {
    let Ok(root) = dom::parse_strict(markup) else {
        return SvgMetrics::fallback();
    };

    let width = root.attr_ignore_case("width").and_then(parse_length);
    let height = root.attr_ignore_case("height").and_then(parse_length);
    let view_box = root.attr_ignore_case("viewBox").and_then(ViewBox::parse);

    let (width, height, view_box) = match (width, height, view_box) {
        (None, None, None) => return SvgMetrics::fallback(),
        (w, h, Some(vb)) => (w.unwrap_or(vb.width), h.unwrap_or(vb.height), vb),
        (w, h, None) => {
            let w = w.unwrap_or(FALLBACK_SIZE);
            let h = h.unwrap_or(FALLBACK_SIZE);
            (w, h, ViewBox::from_size(w, h))
        }
    };

    SvgMetrics { width, height, view_box: view_box.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_box_only() {
        let m = extract_metrics(r#"<svg viewBox="0 0 200 100"/>"#);
        assert_eq!(m.width, 200.0);
        assert_eq!(m.height, 100.0);
        assert_eq!(m.view_box, "0 0 200 100");
    }

    #[test]
    fn test_size_only_synthesizes_view_box() {
        let m = extract_metrics(r#"<svg width="300px" height="150"/>"#);
        assert_eq!((m.width, m.height), (300.0, 150.0));
        assert_eq!(m.view_box, "0 0 300 150");
    }

    #[test]
    fn test_units_normalized() {
        assert_eq!(parse_length("1in"), Some(96.0));
        assert!((parse_length("72pt").unwrap() - 96.0).abs() < 1e-9);
        assert_eq!(parse_length("2pc"), Some(32.0));
        assert!((parse_length("25.4mm").unwrap() - 96.0).abs() < 1e-9);
        assert!((parse_length("2.54cm").unwrap() - 96.0).abs() < 1e-9);
        assert_eq!(parse_length("50%"), None);
        assert_eq!(parse_length("0"), None);
        assert_eq!(parse_length("12em"), None);
    }

    #[test]
    fn test_zero_dimension_falls_back_to_view_box() {
        let m = extract_metrics(r#"<svg width="0" height="40" viewBox="0,0,80,60"/>"#);
        assert_eq!((m.width, m.height), (80.0, 40.0));
    }

    #[test]
    fn test_percent_defers_to_view_box() {
        let m = extract_metrics(r#"<svg width="100%" height="100%" viewBox="0 0 64 32"/>"#);
        assert_eq!((m.width, m.height), (64.0, 32.0));
    }

    #[test]
    fn test_nothing_parseable() {
        assert_eq!(extract_metrics("<svg/>"), SvgMetrics::fallback());
        assert_eq!(extract_metrics(r#"<svg viewBox="0 0 0 0"/>"#), SvgMetrics::fallback());
        assert_eq!(extract_metrics("garbage"), SvgMetrics::fallback());
    }
}
