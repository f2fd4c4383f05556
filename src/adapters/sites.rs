use serde_json::json;

use crate::adapters::dom::{
    DomDetailProfile, DomProfile, Field, GenericSelectors, LinkRule, SubstituteSelectors,
};
use crate::adapters::json::{FlagRule, ItemKeys, JsonProfile, PackRule, UrlRule};
use crate::adapters::lines::{LineProfile, NameRule, Window};
use crate::error::TransportError;
use crate::extract::{DiscountRule, IdRule};
use crate::fetch::{Expect, PageRequest};
use crate::model::Source;

/// How a site is reached: its JSON API or its rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Channel {
    Api,
    Page,
}

#[derive(Debug, Clone, Copy)]
pub enum ListingStrategy {
    Dom(&'static DomProfile),
    Lines(&'static LineProfile),
    Json(&'static JsonProfile),
}

#[derive(Debug, Clone, Copy)]
pub enum DetailStrategy {
    Dom(&'static DomDetailProfile),
}

/// Everything needed to scrape one source through one channel.
#[derive(Debug, Clone, Copy)]
pub struct Site {
    pub source: Source,
    pub channel: Channel,
    pub listing: ListingStrategy,
    pub detail: Option<DetailStrategy>,
}

impl Site {
    /// The channel used when none is asked for.
    pub fn default_channel(source: Source) -> Channel {
        match source {
            Source::OneMg | Source::PharmEasy => Channel::Page,
            Source::PlatinumRx | Source::TrueMeds => Channel::Api,
        }
    }

    pub fn listing_request(&self, term: &str) -> PageRequest {
        let term = term.trim();
        match (self.source, self.channel) {
            (Source::OneMg, _) => {
                PageRequest::get("https://www.1mg.com/search/all", Expect::Html).with_query(&[("name", term)])
            }
            (Source::PharmEasy, _) => {
                PageRequest::get("https://pharmeasy.in/search/all", Expect::Html).with_query(&[("name", term)])
            }
            (Source::PlatinumRx, Channel::Api) => PageRequest::post_json(
                "https://backend.platinumrx.in/pdp/fetchPlpInfo",
                json!({ "drugName": term, "searchType": null }),
            )
            .with_headers(&[
                ("accept", "application/json, text/plain, */*"),
                ("origin", "https://www.platinumrx.in"),
                ("referer", "https://www.platinumrx.in/"),
            ]),
            (Source::TrueMeds, Channel::Api) => {
                PageRequest::get("https://nal.tmmumbai.in/CustomerService/getSearchResult", Expect::Json)
                    .with_query(&[
                        ("warehouseId", "20"),
                        ("elasticSearchType", "SKU_BRAND_SEARCH"),
                        ("searchString", term),
                        ("isMultiSearch", "true"),
                        ("pageName", "srp"),
                        ("variantId", "18"),
                        ("platform", "m_web"),
                    ])
                    .with_headers(&[
                        ("accept", "application/json, text/plain, */*"),
                        ("origin", "https://www.truemeds.in"),
                        ("referer", "https://www.truemeds.in/"),
                    ])
            }
            (Source::PlatinumRx, Channel::Page) | (Source::TrueMeds, Channel::Page) => {
                PageRequest::get(self.page_url(term), Expect::Lines)
            }
        }
    }

    /// Human-facing search page; line-scanned products hang their URLs off it.
    pub fn page_url(&self, term: &str) -> String {
        let dashed = term.trim().to_lowercase().replace(' ', "-");
        match self.source {
            Source::OneMg => format!("https://www.1mg.com/search/all?name={}", term.trim().replace(' ', "+")),
            Source::PharmEasy => format!("https://pharmeasy.in/search/all?name={}", term.trim().replace(' ', "+")),
            Source::PlatinumRx => format!("https://www.platinumrx.in/product-listing/{}", dashed),
            Source::TrueMeds => format!("https://www.truemeds.in/search/{}", dashed),
        }
    }

    pub fn detail_request(&self, url: &str) -> Option<PageRequest> {
        match self.detail? {
            DetailStrategy::Dom(_) => Some(PageRequest::get(url, Expect::Html)),
        }
    }
}

pub fn site(source: Source, channel: Option<Channel>) -> Result<Site, TransportError> {
    let channel = channel.unwrap_or_else(|| Site::default_channel(source));
    let (listing, detail) = match (source, channel) {
        (Source::OneMg, Channel::Page) => (ListingStrategy::Dom(&ONEMG_LISTING), Some(DetailStrategy::Dom(&ONEMG_DETAIL))),
        (Source::PharmEasy, Channel::Page) => (ListingStrategy::Dom(&PHARMEASY_LISTING), None),
        (Source::PlatinumRx, Channel::Api) => (ListingStrategy::Json(&PLATINUMRX_API), None),
        (Source::PlatinumRx, Channel::Page) => (ListingStrategy::Lines(&PLATINUMRX_LINES), None),
        (Source::TrueMeds, Channel::Api) => (ListingStrategy::Json(&TRUEMEDS_API), None),
        (Source::TrueMeds, Channel::Page) => (ListingStrategy::Lines(&TRUEMEDS_LINES), None),
        (Source::OneMg, Channel::Api) | (Source::PharmEasy, Channel::Api) => {
            return Err(TransportError::Unsupported(format!("{} has no API channel", source)));
        }
    };
    Ok(Site {
        source,
        channel,
        listing,
        detail,
    })
}

// ── 1mg ──

pub static ONEMG_LISTING: DomProfile = DomProfile {
    base_url: "https://www.1mg.com",
    card: r#"div[class*="VerticalProductTile__container"]"#,
    name: r#"[class*="VerticalProductTile__header"]"#,
    brand: None,
    link: LinkRule::AroundName,
    link_must_contain: None,
    mrp: Field::Label("Original Price"),
    price: Field::Label("Discounted Price"),
    discount: Field::Label("Discount Percentage"),
    pack: None,
    in_stock_text: "Add to cart",
    id_rule: IdRule::TrailingDigits,
    discount_rule: DiscountRule::PercentSuffixed,
};

pub static ONEMG_DETAIL: DomDetailProfile = DomDetailProfile {
    base_url: "https://www.1mg.com",
    name: r#"h1[class*="DrugHeader__title"]"#,
    composition: r#"div[class*="saltInfo"]"#,
    marketer: r#"div[class*="DrugHeader__meta-value"]"#,
    mrp: r#"span[class*="DrugPriceBox__slashed-price"]"#,
    price: &[
        r#"div[class*="DrugPriceBox__best-price"]"#,
        r#"div[class*="DrugPriceBox__mrp-wrapper"] div[class*="DrugPriceBox__price"]"#,
    ],
    discount: r#"span[class*="DrugPriceBox__slashed-percent"]"#,
    pack: r#"div[class*="DrugPriceBox__quantity"]"#,
    substitutes: SubstituteSelectors {
        container: r#"div[class*="SubstituteList__container"]"#,
        item: r#"div[class*="SubstituteItem__item"]"#,
        name: r#"div[class*="SubstituteItem__name"]"#,
        unit_price: r#"div[class*="SubstituteItem__unit-price"]"#,
        save_text: r#"div[class*="SubstituteItem__save-text"]"#,
    },
    generic: GenericSelectors {
        containers: &[
            r#"div[class*="InStockRxSubstitution__rightSku"]"#,
            r#"div[class*="OOSRxSubstitution__skuCard"]"#,
        ],
        link: r#"a[href*="/drugs/"]"#,
        composition_fallback: r#"div[class*="OOSRxSubstitution__saltComposition"]"#,
    },
    discount_rule: DiscountRule::PercentSuffixed,
};

// ── PharmEasy ──

pub static PHARMEASY_LISTING: DomProfile = DomProfile {
    base_url: "https://pharmeasy.in",
    card: r#"div[class*="ProductCard_medicineUnitContainer"]"#,
    name: r#"[class*="ProductCard_nameAndDeleteIconWrapper__"]"#,
    brand: Some(r#"[class*="ProductCard_brandName__"]"#),
    link: LinkRule::First("a[href]"),
    link_must_contain: Some("/online-medicine-order/"),
    mrp: Field::Css(r#"[class*="ProductCard_originalMrp__"]"#),
    price: Field::Css(r#"[class*="ProductCard_ourPrice__"]"#),
    discount: Field::Css(r#"[class*="ProductCard_priceDiscountWrapper__"]"#),
    pack: Some(r#"[class*="ProductCard_measurementUnit__"]"#),
    in_stock_text: "Add To Cart",
    id_rule: IdRule::SlugSuffix("online-medicine-order"),
    discount_rule: DiscountRule::PercentSuffixed,
};

// ── PlatinumRx ──

const PLATINUMRX_MANUFACTURERS: &[&str] = &[
    "Pharmaceuticals", "Ltd", "Inc", "Glenmark", "Cipla", "Sun", "Mankind", "Dr.", "Abbott", "Alkem", "Lupin",
];

pub static PLATINUMRX_API: JsonProfile = JsonProfile {
    items_path: &["message"],
    master_key: "masterItemData",
    substitute_key: "substituteItemData",
    keys: ItemKeys {
        name: "display_name",
        composition: "salt_composition",
        id: "master_drug_code",
        manufacturer: "manufacturer_name",
        mrp: "mrp",
        price: "discounted_price",
        discount: "discount_percentage",
    },
    pack: PackRule::QuantityUnit {
        quantity: "pack_quantity_value",
        unit: "unit_of_measurement",
    },
    url: UrlRule::EncodedName {
        base: "https://www.platinumrx.in/medicines",
    },
    flag: FlagRule::Item("hasSubstitute"),
    cold_storage_key: None,
    discount_rule: DiscountRule::PercentSuffixed,
};

pub static PLATINUMRX_LINES: LineProfile = LineProfile {
    start_marker: "You Searched",
    skip: &[
        "Download App",
        "Login",
        "Personal Care",
        "Health Conditions",
        "Healthcare Devices",
        "Vitamins And Supplements",
        "Health Resources",
        "You Searched",
        "We Recommend",
        "PlatinumRx Recommended Medicines",
        "Same salt composition and dosage",
        "Top Brands, 100% safe and effective",
        "FDA and WHO certified medicines",
        "Add to Cart",
    ],
    name: NameRule {
        unit_keyword: true,
        min_len: 5,
        max_len: 200,
        reject_shouting: true,
    },
    primary: Window {
        span: 8,
        stop_on_header: true,
        stop_after_price: true,
        break_on: &[],
        end_on: &[],
    },
    substitute: Some(Window {
        span: 20,
        stop_on_header: true,
        stop_after_price: false,
        break_on: &[],
        end_on: &["Salt Composition"],
    }),
    manufacturers: PLATINUMRX_MANUFACTURERS,
    stock_marker: None,
    company_in_name: false,
    field_markers: &["₹", "MRP", "Strip of", "Salt Composition"],
    discount_rule: DiscountRule::PercentSuffixed,
};

// ── TrueMeds ──

pub static TRUEMEDS_API: JsonProfile = JsonProfile {
    items_path: &["responseData", "elasticProductDetails"],
    master_key: "product",
    substitute_key: "suggestion",
    keys: ItemKeys {
        name: "skuName",
        composition: "composition",
        id: "productCode",
        manufacturer: "manufacturerName",
        mrp: "mrp",
        price: "sellingPrice",
        discount: "discount",
    },
    pack: PackRule::Key("packForm"),
    url: UrlRule::Slug {
        base: "https://www.truemeds.in",
        key: "productUrlSuffix",
    },
    flag: FlagRule::Master("subsFound"),
    cold_storage_key: Some("coldStorage"),
    discount_rule: DiscountRule::LeadingDigits,
};

pub static TRUEMEDS_LINES: LineProfile = LineProfile {
    start_marker: "Showing all results for",
    skip: &[
        "Login",
        "Search",
        "Cart",
        "Medicines",
        "Deliver to",
        "Download App",
        "Login / Signup",
        "Showing all results",
        "FLAT",
    ],
    name: NameRule {
        unit_keyword: false,
        min_len: 3,
        max_len: 70,
        reject_shouting: false,
    },
    primary: Window {
        span: 15,
        stop_on_header: false,
        stop_after_price: false,
        break_on: &["Get Substitute"],
        end_on: &[],
    },
    substitute: None,
    manufacturers: &["Pharmaceuticals", "Ltd", "Inc", "Glenmark", "Cipla", "Sun", "Mankind"],
    stock_marker: Some("Add To Cart"),
    company_in_name: true,
    field_markers: &["Get Substitute", "₹", "MRP", "% OFF", "Strip of", "Add To Cart"],
    discount_rule: DiscountRule::PercentSuffixed,
};
