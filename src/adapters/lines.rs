use serde_json::json;
use tracing::debug;

use crate::extract::{extract_discount_percentage, extract_pack_size, extract_price, slugify, DiscountRule};
use crate::model::{DetailRecord, GenericAlternative, ListingRecord, SearchOutcome, Source};

const UNIT_KEYWORDS: &[&str] = &["tablet", "mg", "capsule", "syrup", "drops"];
const PACK_MARKER: &str = "Strip of";
const RUPEE: &str = "₹";
const MRP: &str = "MRP";

/// A fixed-length lookahead over the lines following an anchor.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    /// Lines visited are `anchor + 1 .. anchor + span` for the primary window
    /// and `start .. start + span` for the substitute window.
    pub span: usize,
    /// An all-caps line shorter than 50 chars (not an MRP line) closes the window.
    pub stop_on_header: bool,
    pub stop_after_price: bool,
    /// Close the window, leaving the line for the next product.
    pub break_on: &'static [&'static str],
    /// Close the window, consuming the line.
    pub end_on: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct NameRule {
    pub unit_keyword: bool,
    /// Exclusive bounds on the character count.
    pub min_len: usize,
    pub max_len: usize,
    pub reject_shouting: bool,
}

/// How one site's rendered search page reads as plain lines.
#[derive(Debug)]
pub struct LineProfile {
    pub start_marker: &'static str,
    /// Exact lines to ignore everywhere.
    pub skip: &'static [&'static str],
    pub name: NameRule,
    pub primary: Window,
    pub substitute: Option<Window>,
    pub manufacturers: &'static [&'static str],
    /// When set, a product is in stock only if this marker shows up in its
    /// primary window. Otherwise products default to in stock.
    pub stock_marker: Option<&'static str>,
    /// Render names as "Name (Company)".
    pub company_in_name: bool,
    /// Lines containing any of these are field lines, never product names.
    pub field_markers: &'static [&'static str],
    pub discount_rule: DiscountRule,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstituteBlock {
    pub name: String,
    pub company: Option<String>,
    pub pack: Option<String>,
    pub price: f64,
    pub mrp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedProduct {
    pub name: String,
    pub company: Option<String>,
    pub pack: Option<String>,
    pub price: f64,
    pub mrp: Option<f64>,
    pub discount: Option<f64>,
    pub in_stock: bool,
    pub substitute: Option<SubstituteBlock>,
}

/// Read position over the page lines.
#[derive(Debug)]
pub struct LineCursor<'a> {
    lines: &'a [String],
    pos: usize,
}

impl<'a> LineCursor<'a> {
    pub fn new(lines: &'a [String]) -> Self {
        LineCursor { lines, pos: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.lines.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn current(&self) -> &'a str {
        self.line(self.pos)
    }

    pub fn line(&self, idx: usize) -> &'a str {
        self.lines.get(idx).map(|l| l.trim()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    /// Jump forward; never moves backwards so the scan always terminates.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.max(self.pos + 1);
    }
}

/// Fields gathered from a primary window.
#[derive(Debug, Default)]
struct PrimaryFields {
    company: Option<String>,
    pack: Option<String>,
    price: Option<String>,
    mrp: Option<String>,
    discount: Option<String>,
    stocked: bool,
}

pub fn scan(lines: &[String], profile: &LineProfile, max_results: usize) -> Vec<ScannedProduct> {
    let mut cursor = LineCursor::new(lines);
    let mut products = Vec::new();
    let mut started = false;

    while !cursor.at_end() && products.len() < max_results {
        let line = cursor.current();

        if line.contains(profile.start_marker) {
            started = true;
            cursor.advance();
            continue;
        }
        if !started || line.is_empty() || profile.skip.contains(&line) || !looks_like_name(line, profile) {
            cursor.advance();
            continue;
        }

        let anchor = cursor.pos();
        let (fields, primary_end) = read_primary(&cursor, anchor, profile);
        let Some(price) = fields.price.as_deref().and_then(|p| extract_price(p)) else {
            debug!(line = anchor, name = line, "no price in window");
            cursor.advance();
            continue;
        };

        let (substitute, end) = match profile.substitute {
            Some(window) => read_substitute(&cursor, primary_end, window, profile),
            None => (None, primary_end),
        };

        let product = ScannedProduct {
            name: line.to_string(),
            company: fields.company,
            pack: fields.pack,
            price,
            mrp: fields.mrp.as_deref().and_then(|m| extract_price(m)),
            discount: fields
                .discount
                .as_deref()
                .and_then(|d| extract_discount_percentage(d, profile.discount_rule)),
            in_stock: profile.stock_marker.is_none() || fields.stocked,
            substitute,
        };
        debug!(
            line = anchor,
            name = %product.name,
            price = product.price,
            substitute = product.substitute.is_some(),
            "product scanned"
        );
        products.push(product);
        cursor.seek(end);
    }
    products
}

fn looks_like_name(line: &str, profile: &LineProfile) -> bool {
    let rule = &profile.name;
    let len = line.chars().count();
    if len <= rule.min_len || len >= rule.max_len {
        return false;
    }
    if profile.field_markers.iter().any(|m| line.contains(m)) {
        return false;
    }
    if rule.reject_shouting && is_shouting(line) {
        return false;
    }
    !rule.unit_keyword || has_unit_keyword(line)
}

fn has_unit_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    UNIT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// At least one letter and no lower-case ones.
fn is_shouting(line: &str) -> bool {
    line.chars().any(|c| c.is_alphabetic()) && !line.chars().any(|c| c.is_lowercase())
}

fn is_header(line: &str) -> bool {
    is_shouting(line) && line.chars().count() < 50 && !line.starts_with(MRP)
}

fn is_manufacturer(line: &str, profile: &LineProfile) -> bool {
    profile.manufacturers.iter().any(|m| line.contains(m))
}

/// Returns the gathered fields and the index just past the last line consumed.
fn read_primary(cursor: &LineCursor, anchor: usize, profile: &LineProfile) -> (PrimaryFields, usize) {
    let window = profile.primary;
    let limit = (anchor + window.span).min(cursor.len());
    let mut fields = PrimaryFields::default();
    let mut j = anchor + 1;

    while j < limit {
        let line = cursor.line(j);
        if line.is_empty() || profile.skip.contains(&line) {
            j += 1;
            continue;
        }
        if window.break_on.iter().any(|m| line.contains(m)) {
            break;
        }
        if window.stop_on_header && is_header(line) {
            break;
        }
        if window.end_on.iter().any(|m| line.contains(m)) {
            j += 1;
            break;
        }
        if let Some(marker) = profile.stock_marker {
            if line.contains(marker) {
                fields.stocked = true;
                j += 1;
                break;
            }
        }

        if fields.company.is_none() && is_manufacturer(line, profile) {
            fields.company = Some(line.to_string());
        } else if fields.pack.is_none() && line.contains(PACK_MARKER) {
            fields.pack = extract_pack_size(line);
        } else if fields.price.is_none() && line.contains(RUPEE) && !line.contains(MRP) {
            fields.price = Some(line.to_string());
            if window.stop_after_price {
                j += 1;
                break;
            }
        } else if fields.mrp.is_none() && line.contains(MRP) {
            fields.mrp = Some(line.to_string());
        } else if fields.discount.is_none() && line.contains('%') && line.contains("OFF") {
            fields.discount = Some(line.to_string());
        }
        j += 1;
    }
    (fields, j)
}

/// The name comes first. Company and pack may follow in either order, and
/// price and MRP only count once both are known.
fn read_substitute(
    cursor: &LineCursor,
    start: usize,
    window: Window,
    profile: &LineProfile,
) -> (Option<SubstituteBlock>, usize) {
    let limit = (start + window.span).min(cursor.len());
    let mut name: Option<String> = None;
    let mut company: Option<String> = None;
    let mut pack: Option<String> = None;
    let mut price: Option<f64> = None;
    let mut mrp: Option<f64> = None;
    let mut k = start;

    while k < limit {
        let line = cursor.line(k);
        if line.is_empty() || profile.skip.contains(&line) {
            k += 1;
            continue;
        }
        if window.stop_on_header && is_header(line) {
            break;
        }
        if window.end_on.iter().any(|m| line.contains(m)) {
            k += 1;
            break;
        }

        if name.is_none() {
            if has_unit_keyword(line) {
                name = Some(line.to_string());
            }
        } else if company.is_none() && is_manufacturer(line, profile) {
            company = Some(line.to_string());
        } else if pack.is_none() && line.contains(PACK_MARKER) {
            pack = extract_pack_size(line);
        } else if company.is_some() && pack.is_some() {
            if price.is_none() && line.contains(RUPEE) && !line.contains(MRP) {
                price = extract_price(line);
            } else if line.contains(MRP) {
                mrp = extract_price(line);
            }
        }
        k += 1;
    }

    let block = match (name, price) {
        (Some(name), Some(price)) => Some(SubstituteBlock {
            name,
            company,
            pack,
            price,
            mrp,
        }),
        _ => None,
    };
    (block, k)
}

/// Line-scanned products have no URL of their own; each gets a stable
/// fragment on the search page so the url key stays unique.
pub fn product_url(page_url: &str, name: &str) -> String {
    format!("{}#prod-{}", page_url, slugify(name))
}

pub fn into_outcome(
    products: Vec<ScannedProduct>,
    page_url: &str,
    source: Source,
    profile: &LineProfile,
) -> SearchOutcome {
    let mut outcome = SearchOutcome::default();

    for p in products {
        let display_name = match (&p.company, profile.company_in_name) {
            (Some(company), true) => format!("{} ({})", p.name, company),
            _ => p.name.clone(),
        };
        let url = product_url(page_url, &display_name);
        let Some(listing) = ListingRecord::assemble(
            url.clone(),
            source,
            None,
            Some(display_name.clone()),
            p.mrp,
            Some(p.price),
            p.discount,
            p.pack.clone(),
            p.in_stock,
        ) else {
            continue;
        };
        if !outcome.push_listing(listing) {
            debug!(url = %url, "duplicate product skipped");
            continue;
        }

        let mut detail = DetailRecord::empty(&url, source);
        detail.name = Some(display_name);
        detail.marketer = p.company.clone();
        detail.mrp = p.mrp;
        detail.selling_price = Some(p.price);
        detail.discount_percentage = p.discount;
        detail.pack_size_info = p.pack.clone();
        if let Some(sub) = p.substitute {
            detail.substitutes.push(json!({
                "substitute_name": sub.name,
                "company": sub.company,
                "pack_size_quantity": sub.pack,
                "selling_price": sub.price,
                "mrp": sub.mrp,
            }));
            detail.generic_alternative_available = true;
            detail.generic_alternative = Some(GenericAlternative {
                alternate_name: Some(sub.name),
                url: None,
                price: Some(sub.price),
                manufacturer: sub.company,
                composition: None,
            });
        }
        outcome.details.push(detail);
    }
    outcome
}
