use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::extract::{
    extract_discount_percentage, extract_medicine_id, extract_pack_size, extract_price,
    title_from_slug, DiscountRule, IdRule,
};
use crate::model::{DetailRecord, GenericAlternative, ListingRecord, Source};

static RUPEE_AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"₹\s*[\d,]+").unwrap());
static COMPOSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z][a-z]+.*\([\d.]+\s*[mgu]+\)").unwrap());
static STORAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)store.*below").unwrap());

/// Where a card keeps a value.
#[derive(Debug, Clone, Copy)]
pub enum Field {
    /// First element matching the selector.
    Css(&'static str),
    /// Element whose own text is the label; the value is the parent's text.
    Label(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub enum LinkRule {
    /// Nearest `<a href>` wrapping the name element, else the first link in the card.
    AroundName,
    First(&'static str),
}

/// Selectors for a search-results page made of repeated product cards.
#[derive(Debug)]
pub struct DomProfile {
    pub base_url: &'static str,
    pub card: &'static str,
    pub name: &'static str,
    /// Appended to the name as "Name (Brand)"; a leading "By " is dropped.
    pub brand: Option<&'static str>,
    pub link: LinkRule,
    pub link_must_contain: Option<&'static str>,
    pub mrp: Field,
    pub price: Field,
    pub discount: Field,
    /// Element holding the pack text verbatim; `None` scans the whole card
    /// text for a pack phrase.
    pub pack: Option<&'static str>,
    pub in_stock_text: &'static str,
    pub id_rule: IdRule,
    pub discount_rule: DiscountRule,
}

#[derive(Debug)]
pub struct SubstituteSelectors {
    pub container: &'static str,
    pub item: &'static str,
    pub name: &'static str,
    pub unit_price: &'static str,
    pub save_text: &'static str,
}

#[derive(Debug)]
pub struct GenericSelectors {
    /// Tried in order; the first container present wins.
    pub containers: &'static [&'static str],
    pub link: &'static str,
    pub composition_fallback: &'static str,
}

/// Selectors for a single product page.
#[derive(Debug)]
pub struct DomDetailProfile {
    pub base_url: &'static str,
    pub name: &'static str,
    pub composition: &'static str,
    pub marketer: &'static str,
    pub mrp: &'static str,
    /// Tried in order until one yields a price.
    pub price: &'static [&'static str],
    pub discount: &'static str,
    pub pack: &'static str,
    pub substitutes: SubstituteSelectors,
    pub generic: GenericSelectors,
    pub discount_rule: DiscountRule,
}

pub fn parse_listing(html: &str, profile: &DomProfile, source: Source, max_results: usize) -> Vec<ListingRecord> {
    let doc = Html::parse_document(html);
    let Some(card_sel) = selector(profile.card) else {
        return Vec::new();
    };
    let Some(base) = base_url(profile.base_url) else {
        return Vec::new();
    };

    let cards: Vec<ElementRef> = doc.select(&card_sel).collect();
    debug!(source = %source, cards = cards.len(), "product cards found");

    let mut records: Vec<ListingRecord> = Vec::new();
    for (idx, card) in cards.into_iter().enumerate() {
        if records.len() >= max_results {
            break;
        }
        match parse_card(card, &base, profile, source) {
            Some(record) if records.iter().any(|r| r.url == record.url) => {
                debug!(card = idx, url = %record.url, "duplicate card skipped");
            }
            Some(record) => {
                debug!(
                    card = idx,
                    name = %record.name,
                    price = ?record.selling_price,
                    discount = ?record.discount_percentage,
                    "card accepted"
                );
                records.push(record);
            }
            None => debug!(card = idx, "card skipped: missing link, name or price"),
        }
    }
    records
}

fn parse_card(card: ElementRef, base: &Url, profile: &DomProfile, source: Source) -> Option<ListingRecord> {
    let name_el = first(card, profile.name);

    let href = match profile.link {
        LinkRule::AroundName => name_el
            .and_then(enclosing_link)
            .or_else(|| first(card, "a[href]").and_then(|a| a.value().attr("href"))),
        LinkRule::First(css) => first(card, css).and_then(|a| a.value().attr("href")),
    };
    let url = absolutize(base, href?)?;
    if let Some(needle) = profile.link_must_contain {
        if !url.contains(needle) {
            return None;
        }
    }

    let mut name = name_el.map(element_text).filter(|n| !n.is_empty());
    if let (Some(n), Some(brand_css)) = (name.as_mut(), profile.brand) {
        if let Some(brand) = first(card, brand_css).map(element_text) {
            let brand = brand.trim_start_matches("By ").trim();
            if !brand.is_empty() {
                *n = format!("{} ({})", n, brand);
            }
        }
    }

    let selling_price = field_text(card, profile.price).and_then(|t| extract_price(t.as_str()));
    let mrp = field_text(card, profile.mrp).and_then(|t| extract_price(t.as_str()));
    let discount = field_text(card, profile.discount)
        .and_then(|t| extract_discount_percentage(t.as_str(), profile.discount_rule));

    let card_text = element_text(card);
    let pack = match profile.pack {
        Some(css) => first(card, css).map(element_text).filter(|t| !t.is_empty()),
        None => pack_from_card_text(&card_text),
    };
    let in_stock = card_text
        .to_lowercase()
        .contains(&profile.in_stock_text.to_lowercase());

    let medicine_id = extract_medicine_id(&url, profile.id_rule);
    ListingRecord::assemble(url, source, medicine_id, name, mrp, selling_price, discount, pack, in_stock)
}

/// Whole-card text only counts when a pack phrase is actually present; the
/// plain-text fallback would otherwise return the entire card.
fn pack_from_card_text(text: &str) -> Option<String> {
    static STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)strip of \d+\s*\w+|\d+\s*\w+ in (?:strip|tablet|capsule)|\bof \d+\s*\w+").unwrap()
    });
    STRIP_RE.find(text).map(|m| m.as_str().to_string())
}

pub fn parse_detail(html: &str, url: &str, profile: &DomDetailProfile, source: Source) -> Option<DetailRecord> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    let base = base_url(profile.base_url)?;

    let mut record = DetailRecord::empty(url, source);
    record.name = first(root, profile.name).map(element_text).filter(|t| !t.is_empty());
    record.composition = first(root, profile.composition).map(element_text).filter(|t| !t.is_empty());
    record.marketer = first(root, profile.marketer).map(element_text).filter(|t| !t.is_empty());
    record.storage_instructions = storage_text(root);
    record.mrp = first(root, profile.mrp).and_then(|e| extract_price(element_text(e).as_str()));
    record.selling_price = profile
        .price
        .iter()
        .find_map(|css| first(root, css).and_then(|e| extract_price(element_text(e).as_str())));
    record.discount_percentage = first(root, profile.discount)
        .and_then(|e| extract_discount_percentage(element_text(e).as_str(), profile.discount_rule));
    record.pack_size_info = first(root, profile.pack).and_then(|e| extract_pack_size(element_text(e).as_str()));
    record.substitutes = substitutes(root, &base, profile);
    record.generic_alternative = generic_alternative(root, &base, profile);
    record.generic_alternative_available = record.generic_alternative.is_some();

    if record.name.is_none() && record.selling_price.is_none() {
        debug!(url, "detail page had neither name nor price");
        return None;
    }
    Some(record)
}

fn storage_text(root: ElementRef) -> Option<String> {
    if let Some(el) = find_by_own_text(root, |t| STORAGE_RE.is_match(t)) {
        return Some(element_text(el));
    }
    let label = find_by_own_text(root, |t| t.eq_ignore_ascii_case("storage"))?;
    label
        .next_siblings()
        .find_map(ElementRef::wrap)
        .map(element_text)
        .filter(|t| !t.is_empty())
}

fn substitutes(root: ElementRef, base: &Url, profile: &DomDetailProfile) -> Vec<serde_json::Value> {
    let s = &profile.substitutes;
    let Some(container) = first(root, s.container) else {
        return Vec::new();
    };
    let Some(item_sel) = selector(s.item) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in container.select(&item_sel) {
        let name = first(item, s.name).map(element_text).filter(|t| !t.is_empty());
        let url = first(item, "a[href]")
            .and_then(|a| a.value().attr("href"))
            .and_then(|h| absolutize(base, h));
        let (Some(name), Some(url)) = (name, url) else {
            continue;
        };
        let price = first(item, s.unit_price).and_then(|e| extract_price(element_text(e).as_str()));
        let cheaper = first(item, s.save_text).map(element_text).filter(|t| !t.is_empty());
        out.push(json!({
            "substitute_name": name,
            "url": url,
            "price_per_unit": price,
            "cheaper_percentage": cheaper,
        }));
    }
    debug!(count = out.len(), "substitutes found");
    out
}

fn generic_alternative(root: ElementRef, base: &Url, profile: &DomDetailProfile) -> Option<GenericAlternative> {
    let g = &profile.generic;
    let container = g.containers.iter().find_map(|css| first(root, css))?;

    let url = first(container, g.link)
        .and_then(|a| a.value().attr("href"))
        .and_then(|h| absolutize(base, h));
    let alternate_name = url.as_deref().and_then(title_from_slug);
    let price = find_by_own_text(container, |t| RUPEE_AMOUNT_RE.is_match(t))
        .and_then(|e| extract_price(element_text(e).as_str()));
    let manufacturer = find_by_own_text(container, |t| t.to_lowercase().starts_with("by "))
        .map(own_text)
        .and_then(|t| t.get(3..).map(|rest| rest.trim().to_string()))
        .filter(|t| !t.is_empty());
    let composition = find_by_own_text(container, |t| COMPOSITION_RE.is_match(t))
        .or_else(|| first(root, g.composition_fallback))
        .map(element_text);

    Some(GenericAlternative {
        alternate_name,
        url,
        price,
        manufacturer,
        composition,
    })
}

// ── DOM helpers ──

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!(css, error = %e, "invalid selector");
            None
        }
    }
}

fn first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let sel = selector(css)?;
    let found = scope.select(&sel).next();
    found
}

/// Text of all descendant text nodes, trimmed and joined by single spaces.
pub fn element_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the element's direct text children only.
fn own_text(el: ElementRef) -> String {
    el.children()
        .filter_map(|c| match c.value() {
            Node::Text(t) => Some(&**t),
            _ => None,
        })
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_by_own_text<'a>(scope: ElementRef<'a>, pred: impl Fn(&str) -> bool) -> Option<ElementRef<'a>> {
    scope
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| {
            let t = own_text(*el);
            !t.is_empty() && pred(&t)
        })
}

fn field_text(card: ElementRef, field: Field) -> Option<String> {
    match field {
        Field::Css(css) => first(card, css).map(element_text),
        Field::Label(label) => {
            let label_el = find_by_own_text(card, |t| t.eq_ignore_ascii_case(label))?;
            let parent = label_el.parent().and_then(ElementRef::wrap)?;
            let text = element_text(parent);
            Some(text.replacen(label, "", 1).trim().to_string())
        }
    }
}

fn enclosing_link<'a>(el: ElementRef<'a>) -> Option<&'a str> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "a")
        .and_then(|a| a.value().attr("href"))
}

fn base_url(raw: &str) -> Option<Url> {
    Url::parse(raw)
        .map_err(|e| warn!(base = raw, error = %e, "bad base url in site profile"))
        .ok()
}

/// Resolve an href against the page base. Non-http(s) targets don't count.
fn absolutize(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.into())
}
