use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pharmacy sites the scraper knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "1MG")]
    OneMg,
    #[serde(rename = "PharmEasy")]
    PharmEasy,
    #[serde(rename = "PlatinumRx")]
    PlatinumRx,
    #[serde(rename = "TrueMeds")]
    TrueMeds,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::OneMg,
        Source::PharmEasy,
        Source::PlatinumRx,
        Source::TrueMeds,
    ];

    /// Label persisted in every `source` column.
    pub fn label(&self) -> &'static str {
        match self {
            Source::OneMg => "1MG",
            Source::PharmEasy => "PharmEasy",
            Source::PlatinumRx => "PlatinumRx",
            Source::TrueMeds => "TrueMeds",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Source::ALL
            .into_iter()
            .find(|src| src.label().to_lowercase() == wanted || (wanted == "onemg" && *src == Source::OneMg))
            .ok_or_else(|| format!("unknown source '{}' (expected 1MG, PharmEasy, PlatinumRx or TrueMeds)", s))
    }
}

/// One product as seen on a search/listing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRecord {
    pub url: String,
    pub source: Source,
    pub medicine_id: Option<String>,
    pub name: String,
    pub mrp: Option<f64>,
    pub selling_price: Option<f64>,
    pub discount_percentage: Option<f64>,
    pub pack_size: Option<String>,
    pub in_stock: bool,
    pub stock_status: String,
}

impl ListingRecord {
    /// Build a record from independently extracted fields. Returns `None` when
    /// the name or the selling price is missing; such cards are never stored.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        url: String,
        source: Source,
        medicine_id: Option<String>,
        name: Option<String>,
        mrp: Option<f64>,
        selling_price: Option<f64>,
        discount_percentage: Option<f64>,
        pack_size: Option<String>,
        in_stock: bool,
    ) -> Option<Self> {
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
        selling_price?;
        Some(ListingRecord {
            url,
            source,
            medicine_id,
            name,
            mrp,
            selling_price,
            discount_percentage,
            pack_size: pack_size.filter(|p| !p.trim().is_empty()),
            in_stock,
            stock_status: stock_label(in_stock).to_string(),
        })
    }

    /// `selling_price <= mrp` is expected but not guaranteed by the sites.
    pub fn price_inverted(&self) -> bool {
        matches!((self.selling_price, self.mrp), (Some(sp), Some(mrp)) if sp > mrp)
    }
}

pub fn stock_label(in_stock: bool) -> &'static str {
    if in_stock {
        "In Stock"
    } else {
        "Out of Stock"
    }
}

/// Cheaper alternative a site recommends for a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericAlternative {
    pub alternate_name: Option<String>,
    pub url: Option<String>,
    pub price: Option<f64>,
    pub manufacturer: Option<String>,
    pub composition: Option<String>,
}

/// Full product information from the detail pass (or inline from a listing).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRecord {
    pub medicine_url: String,
    pub source: Source,
    pub name: Option<String>,
    pub composition: Option<String>,
    pub marketer: Option<String>,
    pub storage_instructions: Option<String>,
    pub mrp: Option<f64>,
    pub selling_price: Option<f64>,
    pub discount_percentage: Option<f64>,
    pub pack_size_info: Option<String>,
    /// Raw substitute blobs, kept in page order.
    pub substitutes: Vec<serde_json::Value>,
    pub generic_alternative_available: bool,
    pub generic_alternative: Option<GenericAlternative>,
}

impl DetailRecord {
    pub fn empty(medicine_url: &str, source: Source) -> Self {
        DetailRecord {
            medicine_url: medicine_url.to_string(),
            source,
            name: None,
            composition: None,
            marketer: None,
            storage_instructions: None,
            mrp: None,
            selling_price: None,
            discount_percentage: None,
            pack_size_info: None,
            substitutes: Vec::new(),
            generic_alternative_available: false,
            generic_alternative: None,
        }
    }
}

/// Everything one listing search produced.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub listings: Vec<ListingRecord>,
    pub details: Vec<DetailRecord>,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Push a listing unless its url was already seen in this search.
    pub fn push_listing(&mut self, record: ListingRecord) -> bool {
        if self.listings.iter().any(|r| r.url == record.url) {
            return false;
        }
        self.listings.push(record);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_labels_round_trip() {
        for src in Source::ALL {
            assert_eq!(src.label().parse::<Source>().unwrap(), src);
        }
        assert_eq!("1mg".parse::<Source>().unwrap(), Source::OneMg);
        assert_eq!("truemeds".parse::<Source>().unwrap(), Source::TrueMeds);
        assert!("netmeds".parse::<Source>().is_err());
    }

    #[test]
    fn assemble_requires_name_and_price() {
        let url = "https://example.com/a".to_string();
        let none_name = ListingRecord::assemble(
            url.clone(), Source::OneMg, None, None, None, Some(10.0), None, None, true,
        );
        assert!(none_name.is_none());

        let blank_name = ListingRecord::assemble(
            url.clone(), Source::OneMg, None, Some("  ".into()), None, Some(10.0), None, None, true,
        );
        assert!(blank_name.is_none());

        let no_price = ListingRecord::assemble(
            url.clone(), Source::OneMg, None, Some("Telma 40".into()), Some(20.0), None, None, None, true,
        );
        assert!(no_price.is_none());

        let ok = ListingRecord::assemble(
            url, Source::OneMg, None, Some(" Telma 40 ".into()), None, Some(10.0), None, Some(String::new()), false,
        )
        .unwrap();
        assert_eq!(ok.name, "Telma 40");
        assert_eq!(ok.pack_size, None);
        assert_eq!(ok.stock_status, "Out of Stock");
    }

    #[test]
    fn inverted_price_is_flagged() {
        let mut r = ListingRecord::assemble(
            "u".into(), Source::PharmEasy, None, Some("X".into()), Some(10.0), Some(12.0), None, None, true,
        )
        .unwrap();
        assert!(r.price_inverted());
        r.mrp = None;
        assert!(!r.price_inverted());
    }

    #[test]
    fn outcome_dedups_by_url() {
        let rec = ListingRecord::assemble(
            "u".into(), Source::PharmEasy, None, Some("X".into()), None, Some(1.0), None, None, true,
        )
        .unwrap();
        let mut out = SearchOutcome::default();
        assert!(out.push_listing(rec.clone()));
        assert!(!out.push_listing(rec));
        assert_eq!(out.listings.len(), 1);
    }
}
