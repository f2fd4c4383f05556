use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Local};

use crate::db::DetailRow;
use crate::model::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Csv,
    Jsonl,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Jsonl => "jsonl",
        }
    }
}

/// Row filter for exports. Empty lists and `None` bounds match everything;
/// a bound on a missing value never matches.
#[derive(Debug, Default, Clone)]
pub struct ExportFilter {
    /// Case-insensitive substring of the name or the composition.
    pub text: Option<String>,
    pub sources: Vec<Source>,
    pub marketers: Vec<String>,
    pub generic: Option<bool>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_discount: Option<f64>,
    pub max_discount: Option<f64>,
}

impl ExportFilter {
    pub fn matches(&self, row: &DetailRow) -> bool {
        if let Some(text) = self.text.as_deref().map(str::to_lowercase).filter(|t| !t.is_empty()) {
            let hit = [&row.medicine_name, &row.medicine_composition]
                .iter()
                .any(|field| field.as_deref().is_some_and(|v| v.to_lowercase().contains(&text)));
            if !hit {
                return false;
            }
        }
        if !self.sources.is_empty() && !self.sources.iter().any(|s| s.label() == row.source) {
            return false;
        }
        if !self.marketers.is_empty() {
            let Some(marketer) = row.medicine_marketer.as_deref() else {
                return false;
            };
            if !self.marketers.iter().any(|m| m.eq_ignore_ascii_case(marketer)) {
                return false;
            }
        }
        if self.generic.is_some_and(|g| g != row.generic_alternative_available) {
            return false;
        }
        in_range(row.medicine_selling_price, self.min_price, self.max_price)
            && in_range(row.medicine_discount, self.min_discount, self.max_discount)
    }

    pub fn apply<'a>(&self, rows: &'a [DetailRow]) -> Vec<&'a DetailRow> {
        rows.iter().filter(|r| self.matches(r)).collect()
    }
}

fn in_range(value: Option<f64>, min: Option<f64>, max: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(v) = value else {
        return false;
    };
    min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi)
}

/// `scraped_data_20250101_093000.csv`
pub fn default_file_name(format: Format, now: DateTime<Local>) -> String {
    format!("scraped_data_{}.{}", now.format("%Y%m%d_%H%M%S"), format.extension())
}

const CSV_HEADERS: [&str; 15] = [
    "medicine_url",
    "medicine_name",
    "medicine_composition",
    "medicine_marketer",
    "medicine_storage",
    "medicine_mrp",
    "medicine_selling_price",
    "medicine_discount",
    "pack_size_information",
    "substitutes",
    "generic_alternative_available",
    "generic_alternative",
    "source",
    "created_at",
    "updated_at",
];

pub fn write_csv<W: Write>(out: W, rows: &[&DetailRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(CSV_HEADERS)?;
    for r in rows {
        let generic = match &r.generic_alternative {
            Some(g) => serde_json::to_string(g)?,
            None => String::new(),
        };
        wtr.write_record([
            r.medicine_url.clone(),
            r.medicine_name.clone().unwrap_or_default(),
            r.medicine_composition.clone().unwrap_or_default(),
            r.medicine_marketer.clone().unwrap_or_default(),
            r.medicine_storage.clone().unwrap_or_default(),
            opt_num(r.medicine_mrp),
            opt_num(r.medicine_selling_price),
            opt_num(r.medicine_discount),
            r.pack_size_information.clone().unwrap_or_default(),
            serde_json::to_string(&r.substitutes)?,
            r.generic_alternative_available.to_string(),
            generic,
            r.source.clone(),
            r.created_at.clone(),
            r.updated_at.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_jsonl<W: Write>(mut out: W, rows: &[&DetailRow]) -> Result<()> {
    for r in rows {
        serde_json::to_writer(&mut out, r)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn opt_num(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(name: &str, source: &str, price: Option<f64>, discount: Option<f64>, generic: bool) -> DetailRow {
        DetailRow {
            medicine_url: format!("https://x.in/{}", name.to_lowercase().replace(' ', "-")),
            medicine_name: Some(name.to_string()),
            medicine_composition: Some("Telmisartan (40mg)".into()),
            medicine_marketer: Some("Glenmark Pharmaceuticals Ltd".into()),
            medicine_storage: None,
            medicine_mrp: Some(250.0),
            medicine_selling_price: price,
            medicine_discount: discount,
            pack_size_information: Some("strip of 15 tablets".into()),
            substitutes: vec![json!({"substitute_name": "Telmikind 40"})],
            generic_alternative_available: generic,
            generic_alternative: None,
            source: source.to_string(),
            created_at: "2025-01-01 09:30:00".into(),
            updated_at: "2025-01-01 09:30:00".into(),
        }
    }

    fn rows() -> Vec<DetailRow> {
        vec![
            row("Telma 40 Tablet", "1MG", Some(213.5), Some(15.0), true),
            row("Telma H Tablet", "PharmEasy", Some(336.0), Some(20.0), false),
            row("Dolo 650 Tablet", "TrueMeds", None, None, false),
        ]
    }

    #[test]
    fn empty_filter_matches_all() {
        let rows = rows();
        assert_eq!(ExportFilter::default().apply(&rows).len(), 3);
    }

    #[test]
    fn text_matches_name_or_composition() {
        let rows = rows();
        let f = ExportFilter {
            text: Some("TELMA h".into()),
            ..Default::default()
        };
        assert_eq!(f.apply(&rows).len(), 1);
        let f = ExportFilter {
            text: Some("telmisartan".into()),
            ..Default::default()
        };
        assert_eq!(f.apply(&rows).len(), 3);
    }

    #[test]
    fn source_generic_and_marketer_filters() {
        let rows = rows();
        let f = ExportFilter {
            sources: vec![Source::OneMg, Source::TrueMeds],
            generic: Some(false),
            ..Default::default()
        };
        let hits = f.apply(&rows);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "TrueMeds");

        let f = ExportFilter {
            marketers: vec!["cipla ltd".into()],
            ..Default::default()
        };
        assert!(f.apply(&rows).is_empty());
    }

    #[test]
    fn ranges_exclude_missing_values() {
        let rows = rows();
        let f = ExportFilter {
            min_price: Some(200.0),
            max_price: Some(300.0),
            ..Default::default()
        };
        let hits = f.apply(&rows);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].medicine_name.as_deref(), Some("Telma 40 Tablet"));

        let f = ExportFilter {
            min_discount: Some(16.0),
            ..Default::default()
        };
        assert_eq!(f.apply(&rows).len(), 1);
    }

    #[test]
    fn csv_has_header_and_json_columns() {
        let rows = rows();
        let refs: Vec<&DetailRow> = rows.iter().collect();
        let mut buf = Vec::new();
        write_csv(&mut buf, &refs).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("medicine_url,medicine_name,"));
        let first = lines.next().unwrap();
        assert!(first.contains("Telma 40 Tablet"));
        assert!(first.contains(r#""[{""substitute_name"":""Telmikind 40""}]""#));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn jsonl_one_object_per_line() {
        let rows = rows();
        let refs: Vec<&DetailRow> = rows.iter().collect();
        let mut buf = Vec::new();
        write_jsonl(&mut buf, &refs).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let parsed: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2]["medicine_selling_price"], serde_json::Value::Null);
        assert_eq!(parsed[0]["substitutes"][0]["substitute_name"], "Telmikind 40");
    }

    #[test]
    fn file_name_is_timestamped() {
        let now = Local.with_ymd_and_hms(2025, 1, 1, 9, 30, 0).unwrap();
        assert_eq!(default_file_name(Format::Csv, now), "scraped_data_20250101_093000.csv");
        assert_eq!(default_file_name(Format::Jsonl, now), "scraped_data_20250101_093000.jsonl");
    }
}
