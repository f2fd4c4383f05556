use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;
use url::Url;

static PRICE_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)rs\.?|[,\s₹*]").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\d.]+").unwrap());
static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%").unwrap());
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static TRAILING_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)$").unwrap());
static SLUG_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w-]+-(\d+)").unwrap());
static DRUG_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/drugs/([\w-]+)-(\d+)$").unwrap());

/// Ordered pack-size patterns; the first one that matches wins.
static PACK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)strip of \d+\s*\w+",
        r"(?i)\b\d+\s*(?:tablets?|capsules?|strips?|ml|mg|gm|pieces?|pcs|sachets?)\b",
        r"(?i)\bpack\s*of\s*\d+",
        r"(?i)\b\d+\s*x\s*\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// How a site writes its discount figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountRule {
    /// "20% off" → 20; text without a `%`-suffixed integer → None.
    PercentSuffixed,
    /// First digit run whether or not a `%` follows ("18.5" → 18.5).
    LeadingDigits,
}

/// How a site encodes its product identifier in a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRule {
    /// `.../telma-40-tablet-12345` → "12345"
    TrailingDigits,
    /// `/<prefix>/<slug>-<digits>` anywhere in the URL.
    SlugSuffix(&'static str),
    /// Last non-empty path segment.
    LastSegment,
    None,
}

/// Parse a price out of display text such as "₹1,234.50" or "MRP Rs. 99".
pub fn extract_price<'a>(text: impl Into<Option<&'a str>>) -> Option<f64> {
    let text = text.into()?;
    if text.trim().is_empty() {
        return None;
    }
    let cleaned = PRICE_NOISE_RE.replace_all(text, "");
    let m = NUMBER_RE.find(&cleaned)?;
    m.as_str().parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Price from a JSON field that may be a number or a display string.
pub fn price_from_json(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|p| *p >= 0.0),
        Value::String(s) => extract_price(s.as_str()),
        _ => None,
    }
}

pub fn extract_discount_percentage<'a>(
    text: impl Into<Option<&'a str>>,
    rule: DiscountRule,
) -> Option<f64> {
    let text = text.into()?;
    let value = match rule {
        DiscountRule::PercentSuffixed => PERCENT_RE
            .captures(text)
            .and_then(|c| c[1].parse::<f64>().ok()),
        DiscountRule::LeadingDigits => DIGITS_RE
            .find(text)
            .and_then(|m| m.as_str().parse::<f64>().ok()),
    };
    value.and_then(percentage)
}

pub fn discount_from_json(value: Option<&Value>, rule: DiscountRule) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().and_then(percentage),
        Value::String(s) => extract_discount_percentage(s.as_str(), rule),
        _ => None,
    }
}

/// Discounts live in 0..=100; anything else is a misread field.
fn percentage(value: f64) -> Option<f64> {
    if (0.0..=100.0).contains(&value) {
        Some(value)
    } else {
        warn!(discount = value, "discount outside 0-100, dropped");
        None
    }
}

pub fn extract_medicine_id(url: &str, rule: IdRule) -> Option<String> {
    if rule == IdRule::None {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let path = parsed.path();
    match rule {
        IdRule::TrailingDigits => TRAILING_DIGITS_RE
            .captures(path)
            .map(|c| c[1].to_string()),
        IdRule::SlugSuffix(prefix) => {
            let mut segments = path.split('/');
            segments.find(|s| *s == prefix)?;
            let slug = segments.next()?;
            SLUG_ID_RE.captures(slug).map(|c| c[1].to_string())
        }
        IdRule::LastSegment => path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
        IdRule::None => None,
    }
}

pub fn extract_pack_size<'a>(text: impl Into<Option<&'a str>>) -> Option<String> {
    let text = text.into()?.trim();
    if text.is_empty() {
        return None;
    }
    PACK_PATTERNS
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().to_string())
        .or_else(|| Some(text.to_string()))
}

/// `/drugs/durite-5-tablet-737465` → "Durite 5 Tablet"
pub fn title_from_slug(url: &str) -> Option<String> {
    let caps = DRUG_SLUG_RE.captures(url)?;
    let title = caps[1]
        .split('-')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    Some(title)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Lower-case, dash separated, alphanumerics only.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn price_basic() {
        assert_eq!(extract_price("₹1,234.50"), Some(1234.50));
        assert_eq!(extract_price("MRP ₹ 250"), Some(250.0));
        assert_eq!(extract_price("Rs. 99.5*"), Some(99.5));
        assert_eq!(extract_price(""), None);
        assert_eq!(extract_price("   "), None);
        assert_eq!(extract_price(None), None);
        assert_eq!(extract_price("free"), None);
    }

    #[test]
    fn price_is_idempotent_on_its_output() {
        for raw in ["₹1,234.50", "213", "MRP ₹ 0.75", "12.0", "₹ 1,00,000"] {
            let first = extract_price(raw).unwrap();
            assert_eq!(extract_price(first.to_string().as_str()), Some(first), "{}", raw);
        }
    }

    #[test]
    fn price_never_panics_on_garbage() {
        assert_eq!(extract_price("..."), None);
        assert_eq!(extract_price("1.2.3"), None);
    }

    #[test]
    fn price_from_json_values() {
        assert_eq!(price_from_json(Some(&json!(45.5))), Some(45.5));
        assert_eq!(price_from_json(Some(&json!("₹45"))), Some(45.0));
        assert_eq!(price_from_json(Some(&json!(null))), None);
        assert_eq!(price_from_json(None), None);
    }

    #[test]
    fn discount_percent_suffixed() {
        let r = DiscountRule::PercentSuffixed;
        assert_eq!(extract_discount_percentage("20% off", r), Some(20.0));
        assert_eq!(extract_discount_percentage("Save 15%", r), Some(15.0));
        assert_eq!(extract_discount_percentage("off", r), None);
        assert_eq!(extract_discount_percentage("20 off", r), None);
        assert_eq!(extract_discount_percentage("20 % off", r), None);
        assert_eq!(extract_discount_percentage(None, r), None);
    }

    #[test]
    fn discount_leading_digits() {
        let r = DiscountRule::LeadingDigits;
        assert_eq!(extract_discount_percentage("18", r), Some(18.0));
        assert_eq!(extract_discount_percentage("18.5", r), Some(18.5));
        assert_eq!(extract_discount_percentage("upto 22% off", r), Some(22.0));
        assert_eq!(extract_discount_percentage("none", r), None);
    }

    #[test]
    fn discount_from_json_passthrough() {
        let r = DiscountRule::PercentSuffixed;
        assert_eq!(discount_from_json(Some(&json!(12)), r), Some(12.0));
        assert_eq!(discount_from_json(Some(&json!("12% off")), r), Some(12.0));
        assert_eq!(discount_from_json(Some(&json!("12")), r), None);
        assert_eq!(discount_from_json(Some(&json!("12")), DiscountRule::LeadingDigits), Some(12.0));
    }

    #[test]
    fn medicine_ids() {
        assert_eq!(
            extract_medicine_id("https://www.1mg.com/drugs/telma-40-tablet-12345", IdRule::TrailingDigits),
            Some("12345".into())
        );
        assert_eq!(
            extract_medicine_id("https://www.1mg.com/drugs/telma-40-tablet", IdRule::TrailingDigits),
            None
        );
        assert_eq!(
            extract_medicine_id(
                "https://pharmeasy.in/online-medicine-order/telma-40mg-strip-of-15-tablets-170519?src=srp",
                IdRule::SlugSuffix("online-medicine-order"),
            ),
            Some("170519".into())
        );
        assert_eq!(
            extract_medicine_id("https://www.platinumrx.in/medicines/Telma%2040/PRX123/", IdRule::LastSegment),
            Some("PRX123".into())
        );
        assert_eq!(extract_medicine_id("https://x.in/a-1", IdRule::None), None);
        assert_eq!(
            extract_medicine_id("https://www.1mg.com/drugs/telma-40-tablet-12345#reviews", IdRule::TrailingDigits),
            Some("12345".into())
        );
        assert_eq!(extract_medicine_id("https://pharmeasy.in/", IdRule::LastSegment), None);
        assert_eq!(extract_medicine_id("not a url", IdRule::TrailingDigits), None);
    }

    #[test]
    fn slug_suffix_needs_the_prefix_segment() {
        let rule = IdRule::SlugSuffix("online-medicine-order");
        assert_eq!(
            extract_medicine_id("https://pharmeasy.in/in/online-medicine-order/dolo-650-tablet-15-44140", rule),
            Some("44140".into())
        );
        assert_eq!(extract_medicine_id("https://pharmeasy.in/health-care/dolo-650-44140", rule), None);
        assert_eq!(extract_medicine_id("https://pharmeasy.in/online-medicine-order/", rule), None);
    }

    #[test]
    fn out_of_range_discounts_are_dropped() {
        let r = DiscountRule::LeadingDigits;
        assert_eq!(discount_from_json(Some(&json!(140)), r), None);
        assert_eq!(discount_from_json(Some(&json!(-5)), r), None);
        assert_eq!(discount_from_json(Some(&json!(100)), r), Some(100.0));
        assert_eq!(discount_from_json(Some(&json!(0.0)), r), Some(0.0));
        assert_eq!(extract_discount_percentage("250% off", DiscountRule::PercentSuffixed), None);
    }

    #[test]
    fn pack_size_patterns_in_order() {
        assert_eq!(extract_pack_size("strip of 15 tablets"), Some("strip of 15 tablets".into()));
        assert_eq!(extract_pack_size("Box with 12 tablets inside"), Some("12 tablets".into()));
        assert_eq!(extract_pack_size("bottle of 100 ml"), Some("100 ml".into()));
        assert_eq!(extract_pack_size("Pack of 10"), Some("Pack of 10".into()));
        assert_eq!(extract_pack_size("2 x 10"), Some("2 x 10".into()));
        assert_eq!(extract_pack_size("  Tube  "), Some("Tube".into()));
        assert_eq!(extract_pack_size(""), None);
        assert_eq!(extract_pack_size(None), None);
    }

    #[test]
    fn slug_titles() {
        assert_eq!(
            title_from_slug("https://www.1mg.com/drugs/durite-5-tablet-737465"),
            Some("Durite 5 Tablet".into())
        );
        assert_eq!(title_from_slug("https://www.1mg.com/otc/durite"), None);
        assert_eq!(slugify("Telma 40 Tablet (Glenmark)"), "telma-40-tablet-glenmark");
    }
}
