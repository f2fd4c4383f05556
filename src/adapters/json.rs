use serde_json::{Map, Value};
use tracing::debug;

use crate::extract::{discount_from_json, price_from_json, DiscountRule};
use crate::model::{DetailRecord, GenericAlternative, ListingRecord, SearchOutcome, Source};

/// Keys read from both the master and the substitute sub-objects.
#[derive(Debug)]
pub struct ItemKeys {
    pub name: &'static str,
    pub composition: &'static str,
    pub id: &'static str,
    pub manufacturer: &'static str,
    pub mrp: &'static str,
    pub price: &'static str,
    pub discount: &'static str,
}

#[derive(Debug)]
pub enum PackRule {
    /// "{quantity} {unit}"
    QuantityUnit { quantity: &'static str, unit: &'static str },
    Key(&'static str),
}

#[derive(Debug)]
pub enum UrlRule {
    /// `{base}/{percent-encoded name}/{id}`
    EncodedName { base: &'static str },
    /// `{base}/{value of key}`
    Slug { base: &'static str, key: &'static str },
}

/// Where the "a substitute exists" flag lives.
#[derive(Debug)]
pub enum FlagRule {
    Item(&'static str),
    Master(&'static str),
}

#[derive(Debug)]
pub struct JsonProfile {
    /// Path from the response root to the items array.
    pub items_path: &'static [&'static str],
    pub master_key: &'static str,
    pub substitute_key: &'static str,
    pub keys: ItemKeys,
    pub pack: PackRule,
    pub url: UrlRule,
    pub flag: FlagRule,
    /// Boolean key that, when true, sets storage to "Cold storage".
    pub cold_storage_key: Option<&'static str>,
    pub discount_rule: DiscountRule,
}

pub fn parse_items(payload: &Value, profile: &JsonProfile, source: Source, max_results: usize) -> SearchOutcome {
    let mut outcome = SearchOutcome::default();

    let items = profile
        .items_path
        .iter()
        .try_fold(payload, |node, key| node.get(*key))
        .and_then(Value::as_array);
    let Some(items) = items else {
        debug!(source = %source, path = ?profile.items_path, "no items array in response");
        return outcome;
    };
    debug!(source = %source, items = items.len(), "api items found");

    for (idx, item) in items.iter().enumerate() {
        if outcome.listings.len() >= max_results {
            break;
        }
        let Some(master) = item.get(profile.master_key).and_then(Value::as_object).filter(|m| !m.is_empty()) else {
            debug!(item = idx, "item without master data skipped");
            continue;
        };
        let substitute = item
            .get(profile.substitute_key)
            .and_then(Value::as_object)
            .filter(|s| !s.is_empty());

        let Some((listing, detail)) = map_item(item, master, substitute, profile, source) else {
            debug!(item = idx, "item skipped: missing name or price");
            continue;
        };
        debug!(item = idx, name = %listing.name, price = ?listing.selling_price, "item accepted");
        if outcome.push_listing(listing) {
            outcome.details.push(detail);
        }
    }
    outcome
}

fn map_item(
    item: &Value,
    master: &Map<String, Value>,
    substitute: Option<&Map<String, Value>>,
    profile: &JsonProfile,
    source: Source,
) -> Option<(ListingRecord, DetailRecord)> {
    let keys = &profile.keys;
    let name = text(master, keys.name);
    let id = text(master, keys.id);
    let url = item_url(master, profile)?;

    let mrp = price_from_json(master.get(keys.mrp));
    let selling_price = price_from_json(master.get(keys.price));
    let discount = discount_from_json(master.get(keys.discount), profile.discount_rule);
    let pack = pack_text(master, &profile.pack);

    let listing = ListingRecord::assemble(
        url.clone(),
        source,
        id,
        name.clone(),
        mrp,
        selling_price,
        discount,
        pack.clone(),
        true,
    )?;

    let mut detail = DetailRecord::empty(&url, source);
    detail.name = name;
    detail.composition = text(master, keys.composition);
    detail.marketer = text(master, keys.manufacturer);
    detail.storage_instructions = profile
        .cold_storage_key
        .filter(|key| master.get(*key).and_then(Value::as_bool).unwrap_or(false))
        .map(|_| "Cold storage".to_string());
    detail.mrp = mrp;
    detail.selling_price = selling_price;
    detail.discount_percentage = discount;
    detail.pack_size_info = pack;
    detail.generic_alternative_available = match profile.flag {
        FlagRule::Item(key) => item.get(key),
        FlagRule::Master(key) => master.get(key),
    }
    .and_then(Value::as_bool)
    .unwrap_or(false);

    if let Some(sub) = substitute {
        detail.substitutes.push(Value::Object(sub.clone()));
        detail.generic_alternative = Some(GenericAlternative {
            alternate_name: text(sub, keys.name),
            url: item_url(sub, profile),
            price: price_from_json(sub.get(keys.price)),
            manufacturer: text(sub, keys.manufacturer),
            composition: text(sub, keys.composition),
        });
    }
    Some((listing, detail))
}

/// String or number value as trimmed text; blanks are `None`.
fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn pack_text(obj: &Map<String, Value>, rule: &PackRule) -> Option<String> {
    match rule {
        PackRule::Key(key) => text(obj, key),
        PackRule::QuantityUnit { quantity, unit } => {
            let parts: Vec<String> = [text(obj, quantity), text(obj, unit)].into_iter().flatten().collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
    }
}

fn item_url(obj: &Map<String, Value>, profile: &JsonProfile) -> Option<String> {
    match &profile.url {
        UrlRule::EncodedName { base } => {
            let name = text(obj, profile.keys.name)?;
            let id = text(obj, profile.keys.id).unwrap_or_default();
            // `/` inside a name stays literal, everything else is percent-encoded
            let encoded: Vec<_> = name.split('/').map(urlencoding::encode).collect();
            Some(format!("{}/{}/{}", base, encoded.join("/"), id))
        }
        UrlRule::Slug { base, key } => {
            let slug = text(obj, key)?;
            Some(format!("{}/{}", base, slug.trim_start_matches('/')))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sites::{PLATINUMRX_API, TRUEMEDS_API};

    fn fixture(name: &str) -> Value {
        let raw = std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn platinumrx_items_map_to_records() {
        let payload = fixture("platinumrx_api.json");
        let out = parse_items(&payload, &PLATINUMRX_API, Source::PlatinumRx, 10);

        assert_eq!(out.listings.len(), 2);
        assert_eq!(out.details.len(), 2);

        let l = &out.listings[0];
        assert_eq!(l.url, "https://www.platinumrx.in/medicines/Telma%2040%20Tablet/PRX10045");
        assert_eq!(l.medicine_id.as_deref(), Some("PRX10045"));
        assert_eq!(l.name, "Telma 40 Tablet");
        assert_eq!(l.mrp, Some(262.5));
        assert_eq!(l.selling_price, Some(199.0));
        assert_eq!(l.discount_percentage, Some(24.0));
        assert_eq!(l.pack_size.as_deref(), Some("15 Tablets"));

        let d = &out.details[0];
        assert_eq!(d.medicine_url, l.url);
        assert_eq!(d.composition.as_deref(), Some("Telmisartan (40mg)"));
        assert_eq!(d.marketer.as_deref(), Some("Glenmark Pharmaceuticals Ltd"));
        assert!(d.generic_alternative_available);
        let g = d.generic_alternative.as_ref().unwrap();
        assert_eq!(g.alternate_name.as_deref(), Some("Telmisartan 40mg Tablet"));
        assert_eq!(g.url.as_deref(), Some("https://www.platinumrx.in/medicines/Telmisartan%2040mg%20Tablet/PRX20871"));
        assert_eq!(g.price, Some(48.0));
        assert_eq!(d.substitutes.len(), 1);

        let second = &out.details[1];
        assert!(!second.generic_alternative_available);
        assert!(second.generic_alternative.is_none());
        assert!(second.substitutes.is_empty());
    }

    #[test]
    fn platinumrx_max_results() {
        let payload = fixture("platinumrx_api.json");
        let out = parse_items(&payload, &PLATINUMRX_API, Source::PlatinumRx, 1);
        assert_eq!(out.listings.len(), 1);
    }

    #[test]
    fn truemeds_items_map_to_records() {
        let payload = fixture("truemeds_api.json");
        let out = parse_items(&payload, &TRUEMEDS_API, Source::TrueMeds, 10);

        assert_eq!(out.listings.len(), 2);
        let l = &out.listings[0];
        assert_eq!(l.url, "https://www.truemeds.in/medicine/telma-40mg-strip-of-15-tablets-tm-tacr1-011234");
        assert_eq!(l.medicine_id.as_deref(), Some("TM-TACR1-011234"));
        assert_eq!(l.selling_price, Some(183.75));
        assert_eq!(l.discount_percentage, Some(25.0));
        assert_eq!(l.pack_size.as_deref(), Some("Strip of 15 tablets"));

        let d = &out.details[0];
        assert!(d.generic_alternative_available);
        assert_eq!(d.storage_instructions, None);
        let g = d.generic_alternative.as_ref().unwrap();
        assert_eq!(g.url.as_deref(), Some("https://www.truemeds.in/medicine/telmisartan-40mg-strip-of-15-tablets-tm-tacr1-022301"));
        assert_eq!(g.manufacturer.as_deref(), Some("Intas Pharmaceuticals Ltd"));

        let insulin = &out.details[1];
        assert_eq!(insulin.storage_instructions.as_deref(), Some("Cold storage"));
        assert!(!insulin.generic_alternative_available);
        assert!(insulin.generic_alternative.is_none());
    }

    #[test]
    fn encoded_names_keep_slashes() {
        let item = serde_json::json!({"display_name": "Paracetamol/Caffeine 500mg Tablet", "master_drug_code": "PRX77"});
        let url = item_url(item.as_object().unwrap(), &PLATINUMRX_API);
        assert_eq!(
            url.as_deref(),
            Some("https://www.platinumrx.in/medicines/Paracetamol/Caffeine%20500mg%20Tablet/PRX77")
        );
    }

    #[test]
    fn wrong_shape_yields_nothing() {
        let out = parse_items(&serde_json::json!({"message": "rate limited"}), &PLATINUMRX_API, Source::PlatinumRx, 10);
        assert!(out.is_empty());
        let out = parse_items(&serde_json::json!({}), &TRUEMEDS_API, Source::TrueMeds, 10);
        assert!(out.is_empty());
    }
}
