//! Output types: the receipt record, its line items, barcode results and the
//! merged response body.
//!
//! Model replies are read leniently. A vision model asked for
//! `"Total Amount": "number or null"` will, on some receipts, answer
//! `"$1,234.50"` or `"12,50 €"`. A string that is unambiguously a number is
//! converted; any other string is kept verbatim as [`Amount::Text`], never
//! reinterpreted. Text fields accept numbers. Keys outside the schema are kept
//! verbatim in `extra`, on the record and on each line item.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::path::PathBuf;

/// Structured data extracted from one receipt image.
///
/// Every field serialises even when `None` (as `null`), so callers can rely
/// on the full key set being present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    #[serde(rename = "Date", default, deserialize_with = "lenient_string")]
    pub date: Option<String>,
    #[serde(rename = "Time", default, deserialize_with = "lenient_string")]
    pub time: Option<String>,
    #[serde(rename = "Total Amount", default, deserialize_with = "lenient_number")]
    pub total_amount: Option<Amount>,
    #[serde(rename = "Currency", default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
    #[serde(rename = "Store Name", default, deserialize_with = "lenient_string")]
    pub store_name: Option<String>,
    #[serde(rename = "Store Address", default, deserialize_with = "lenient_string")]
    pub store_address: Option<String>,
    #[serde(rename = "Store Contact", default, deserialize_with = "lenient_string")]
    pub store_contact: Option<String>,
    #[serde(rename = "Payment Method", default, deserialize_with = "lenient_string")]
    pub payment_method: Option<String>,
    #[serde(rename = "Subtotal", default, deserialize_with = "lenient_number")]
    pub subtotal: Option<Amount>,
    #[serde(rename = "Tax", default, deserialize_with = "lenient_number")]
    pub tax: Option<Amount>,
    #[serde(rename = "Category", default, deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(rename = "Total Items Count", default, deserialize_with = "lenient_number")]
    pub total_items_count: Option<Amount>,
    #[serde(rename = "Description", default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(rename = "Barcode Number", default, deserialize_with = "lenient_string")]
    pub barcode_number: Option<String>,
    /// Line items in receipt order.
    #[serde(rename = "Items", default, deserialize_with = "lenient_items")]
    pub items: Option<Vec<ItemEntry>>,
    /// Keys the model returned beyond the schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One purchased line on a receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(rename = "Product Name", default, deserialize_with = "lenient_string")]
    pub product_name: Option<String>,
    /// Not always an integer: weighed goods are sold by the kilogram.
    #[serde(rename = "Quantity", default, deserialize_with = "lenient_number")]
    pub quantity: Option<Amount>,
    #[serde(rename = "Price Per Unit", default, deserialize_with = "lenient_number")]
    pub price_per_unit: Option<Amount>,
    #[serde(rename = "Total Price", default, deserialize_with = "lenient_number")]
    pub total_price: Option<Amount>,
    /// Keys the model returned beyond the item schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the `Items` array.
///
/// Objects are read as [`LineItem`]; anything else the model put in the list
/// (a bare string, a number) is kept as-is so the list keeps its length and
/// order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemEntry {
    Item(LineItem),
    Raw(Value),
}

impl ItemEntry {
    pub fn item(&self) -> Option<&LineItem> {
        match self {
            ItemEntry::Item(item) => Some(item),
            ItemEntry::Raw(_) => None,
        }
    }
}

/// A numeric field as the model gave it.
///
/// Serialises as a JSON number or, for text that is not unambiguously a
/// number, as the original string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Amount {
    Number(Number),
    Text(String),
}

impl Amount {
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Amount::Number(n) => Some(n),
            Amount::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().and_then(Number::as_f64)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(Number::as_i64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Number(n) => write!(f, "{n}"),
            Amount::Text(t) => f.write_str(t),
        }
    }
}

/// What the extractor produced for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractionOutcome {
    /// The model replied with a JSON object.
    Record(ReceiptRecord),
    /// The model's reply was not a JSON object. Reported in the payload
    /// instead of failing the request.
    ParseFailure { error: String },
}

impl ExtractionOutcome {
    /// Message used for unparseable model replies.
    pub const PARSE_ERROR: &'static str = "Failed to parse JSON response";

    pub fn parse_failure() -> Self {
        ExtractionOutcome::ParseFailure {
            error: Self::PARSE_ERROR.to_string(),
        }
    }

    pub fn record(&self) -> Option<&ReceiptRecord> {
        match self {
            ExtractionOutcome::Record(r) => Some(r),
            ExtractionOutcome::ParseFailure { .. } => None,
        }
    }
}

/// A barcode found on the receipt and its regenerated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeResult {
    /// Decoded payload of the first symbol found.
    pub text: String,
    /// Where the regenerated Code 128 image was written.
    pub image_path: PathBuf,
    /// Public URL of the regenerated image under the media root.
    pub image_url: String,
}

/// Response keys owned by [`ProcessedReceipt`] rather than the model.
pub const MERGED_KEYS: [&str; 4] = ["error", "barcode_detected", "barcode_number", "barcode_image"];

/// The merged response for one upload: extractor output plus barcode fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedReceipt {
    #[serde(flatten)]
    pub extraction: ExtractionOutcome,
    pub barcode_detected: bool,
    pub barcode_number: Option<String>,
    pub barcode_image: Option<String>,
}

impl ProcessedReceipt {
    /// Merge the barcode scan into the extractor's outcome. A missing barcode
    /// yields `false`/`null`/`null`.
    ///
    /// Keys the merge writes are removed from the record's `extra` first, so
    /// each appears once in the output and the scan result wins.
    pub fn merge(mut extraction: ExtractionOutcome, barcode: Option<BarcodeResult>) -> Self {
        if let ExtractionOutcome::Record(ref mut record) = extraction {
            for key in MERGED_KEYS {
                if record.extra.remove(key).is_some() {
                    tracing::debug!("Model reply key {:?} replaced by scan result", key);
                }
            }
        }
        match barcode {
            Some(b) => Self {
                extraction,
                barcode_detected: true,
                barcode_number: Some(b.text),
                barcode_image: Some(b.image_url),
            },
            None => Self {
                extraction,
                barcode_detected: false,
                barcode_number: None,
                barcode_image: None,
            },
        }
    }
}

/// Response of the download endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadLinks {
    pub json_url: Option<String>,
    pub barcode_url: Option<Value>,
}

// ── Lenient field readers ────────────────────────────────────────────────

/// A plain decimal (`12.50`) or one with comma thousands groups
/// (`1,234.50`), optionally signed and with a currency symbol either side.
static RE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<sign>[-+])?\s*[$€£]?\s*(?P<num>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*[$€£]?$",
    )
    .unwrap()
});

fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    })
}

fn lenient_number<'de, D>(d: D) -> Result<Option<Amount>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(amount_from_value(Value::deserialize(d)?))
}

fn lenient_items<'de, D>(d: D) -> Result<Option<Vec<ItemEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Array(values) => Some(values.into_iter().map(item_entry).collect()),
        _ => None,
    })
}

fn item_entry(value: Value) -> ItemEntry {
    if !value.is_object() {
        return ItemEntry::Raw(value);
    }
    match serde_json::from_value::<LineItem>(value.clone()) {
        Ok(item) => ItemEntry::Item(item),
        Err(_) => ItemEntry::Raw(value),
    }
}

/// Read a JSON value as an amount.
///
/// Numbers pass through; strings become numbers only when [`parse_amount`]
/// accepts them and are otherwise kept verbatim. Blank strings, booleans,
/// arrays and objects are `None`.
pub fn amount_from_value(value: Value) -> Option<Amount> {
    match value {
        Value::Number(n) => Some(Amount::Number(n)),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(match parse_amount(&s) {
            Some(n) => Amount::Number(n),
            None => Amount::Text(s),
        }),
        _ => None,
    }
}

/// `"$1,234.50"` → `1234.5`; `"3"` → `3`; `"12,50 €"`, `"1.234,56"`, `"n/a"` → `None`.
///
/// Only unambiguous forms are converted: a comma must separate groups of
/// exactly three digits and a dot is always the decimal point.
pub fn parse_amount(raw: &str) -> Option<Number> {
    let caps = RE_AMOUNT.captures(raw.trim())?;
    let digits = caps["num"].replace(',', "");
    let negative = caps.name("sign").is_some_and(|m| m.as_str() == "-");

    if !digits.contains('.') {
        if let Ok(i) = digits.parse::<i64>() {
            return Some(Number::from(if negative { -i } else { i }));
        }
    }
    let f = digits.parse::<f64>().ok()?;
    Number::from_f64(if negative { -f } else { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{ITEM_KEYS, RECORD_KEYS};
    use serde_json::json;

    #[test]
    fn every_schema_key_is_emitted_for_empty_object() {
        let record: ReceiptRecord = serde_json::from_value(json!({})).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        for key in RECORD_KEYS {
            assert!(obj.contains_key(key), "missing {key}");
            assert!(obj[key].is_null(), "{key} should be null");
        }
    }

    #[test]
    fn keys_follow_schema_order() {
        let record = ReceiptRecord::default();
        let value = serde_json::to_value(&record).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, RECORD_KEYS.to_vec());
    }

    #[test]
    fn numeric_strings_are_parsed() {
        let record: ReceiptRecord = serde_json::from_value(json!({
            "Total Amount": "$1,234.50",
            "Tax": "",
            "Subtotal": 12,
            "Total Items Count": "3"
        }))
        .unwrap();
        assert_eq!(record.total_amount.unwrap().as_f64(), Some(1234.5));
        assert_eq!(record.tax, None);
        assert_eq!(record.subtotal.unwrap().as_i64(), Some(12));
        assert_eq!(record.total_items_count.unwrap().as_i64(), Some(3));
    }

    #[test]
    fn ambiguous_amounts_are_kept_verbatim() {
        let record: ReceiptRecord = serde_json::from_value(json!({
            "Total Amount": "12,50 €",
            "Subtotal": "1.234,56",
            "Tax": "n/a",
            "Total Items Count": "3 pcs"
        }))
        .unwrap();
        assert_eq!(record.total_amount, Some(Amount::Text("12,50 €".into())));
        assert_eq!(record.subtotal, Some(Amount::Text("1.234,56".into())));
        assert_eq!(record.tax, Some(Amount::Text("n/a".into())));
        assert_eq!(record.total_items_count.as_ref().unwrap().as_i64(), None);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["Total Amount"], json!("12,50 €"));
        assert_eq!(value["Subtotal"], json!("1.234,56"));
        assert_eq!(value["Tax"], json!("n/a"));
        assert_eq!(value["Total Items Count"], json!("3 pcs"));
    }

    #[test]
    fn ambiguous_item_prices_are_kept_verbatim() {
        let record: ReceiptRecord = serde_json::from_value(json!({
            "Items": [{ "Product Name": "Käse", "Price Per Unit": "2,99", "Total Price": "5,98 €" }]
        }))
        .unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["Items"][0]["Price Per Unit"], json!("2,99"));
        assert_eq!(value["Items"][0]["Total Price"], json!("5,98 €"));
    }

    #[test]
    fn numeric_barcode_number_is_stringified() {
        let record: ReceiptRecord =
            serde_json::from_value(json!({ "Barcode Number": 4006381333931u64 })).unwrap();
        assert_eq!(record.barcode_number.as_deref(), Some("4006381333931"));
    }

    #[test]
    fn items_keep_receipt_order_and_all_keys() {
        let record: ReceiptRecord = serde_json::from_value(json!({
            "Items": [
                { "Product Name": "Milk", "Quantity": 2, "Price Per Unit": 0.99, "Total Price": 1.98 },
                { "Product Name": "Bread" },
                { "Product Name": "Apples", "Quantity": "1.25", "Total Price": "2.50" }
            ]
        }))
        .unwrap();
        let items: Vec<&LineItem> = record
            .items
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.item().unwrap())
            .collect();
        let names: Vec<_> = items.iter().map(|i| i.product_name.as_deref().unwrap()).collect();
        assert_eq!(names, ["Milk", "Bread", "Apples"]);
        assert_eq!(items[2].quantity.as_ref().unwrap().as_f64(), Some(1.25));

        let value = serde_json::to_value(&record).unwrap();
        let bread = &value["Items"][1];
        for key in ITEM_KEYS {
            assert!(bread.get(key).is_some(), "item missing {key}");
        }
        assert!(bread["Quantity"].is_null());
    }

    #[test]
    fn odd_items_are_kept_in_place() {
        let record: ReceiptRecord = serde_json::from_value(json!({
            "Items": [
                { "Product Name": "Milk", "SKU": "A1" },
                "Bread 2.49",
                { "Product Name": "Eggs" }
            ]
        }))
        .unwrap();
        let items = record.items.as_ref().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].item().unwrap().extra["SKU"], json!("A1"));
        assert_eq!(items[1], ItemEntry::Raw(json!("Bread 2.49")));
        assert_eq!(items[2].item().unwrap().product_name.as_deref(), Some("Eggs"));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["Items"][0]["SKU"], json!("A1"));
        assert_eq!(value["Items"][1], json!("Bread 2.49"));
        assert_eq!(value["Items"][2]["Product Name"], json!("Eggs"));
    }

    #[test]
    fn non_array_items_become_null() {
        let record: ReceiptRecord = serde_json::from_value(json!({ "Items": "none" })).unwrap();
        assert_eq!(record.items, None);
    }

    #[test]
    fn extra_keys_are_preserved() {
        let record: ReceiptRecord =
            serde_json::from_value(json!({ "Store Name": "ACME", "Loyalty Points": 120 })).unwrap();
        assert_eq!(record.store_name.as_deref(), Some("ACME"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["Loyalty Points"], json!(120));
    }

    #[test]
    fn merge_without_barcode() {
        let merged = ProcessedReceipt::merge(
            ExtractionOutcome::Record(ReceiptRecord::default()),
            None,
        );
        let value = serde_json::to_value(&merged).unwrap();
        assert_eq!(value["barcode_detected"], json!(false));
        assert!(value["barcode_number"].is_null());
        assert!(value["barcode_image"].is_null());
        assert!(value.get("Store Name").is_some());
    }

    #[test]
    fn merge_with_barcode() {
        let merged = ProcessedReceipt::merge(
            ExtractionOutcome::Record(ReceiptRecord::default()),
            Some(BarcodeResult {
                text: "12345670".into(),
                image_path: PathBuf::from("media/barcodes/barcode_x.png"),
                image_url: "/media/barcodes/barcode_x.png".into(),
            }),
        );
        let value = serde_json::to_value(&merged).unwrap();
        assert_eq!(value["barcode_detected"], json!(true));
        assert_eq!(value["barcode_number"], json!("12345670"));
        assert_eq!(value["barcode_image"], json!("/media/barcodes/barcode_x.png"));
    }

    #[test]
    fn merged_keys_from_the_model_are_not_duplicated() {
        let record: ReceiptRecord = serde_json::from_value(json!({
            "Store Name": "ACME",
            "barcode_detected": "yes",
            "barcode_number": "999",
            "barcode_image": "http://elsewhere/x.png",
            "error": "none"
        }))
        .unwrap();
        let merged = ProcessedReceipt::merge(
            ExtractionOutcome::Record(record),
            Some(BarcodeResult {
                text: "12345670".into(),
                image_path: PathBuf::from("media/barcodes/barcode_x.png"),
                image_url: "/media/barcodes/barcode_x.png".into(),
            }),
        );

        let text = serde_json::to_string(&merged).unwrap();
        for key in MERGED_KEYS {
            assert!(
                text.matches(&format!("\"{key}\":")).count() <= 1,
                "{key} emitted twice in {text}"
            );
        }
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["barcode_detected"], json!(true));
        assert_eq!(value["barcode_number"], json!("12345670"));
        assert_eq!(value["barcode_image"], json!("/media/barcodes/barcode_x.png"));
        assert!(value.get("error").is_none());
        assert_eq!(value["Store Name"], json!("ACME"));
    }

    #[test]
    fn parse_failure_payload_shape() {
        let merged = ProcessedReceipt::merge(ExtractionOutcome::parse_failure(), None);
        let value = serde_json::to_value(&merged).unwrap();
        assert_eq!(
            value,
            json!({
                "error": "Failed to parse JSON response",
                "barcode_detected": false,
                "barcode_number": null,
                "barcode_image": null
            })
        );
    }

    #[test]
    fn parse_amount_variants() {
        assert_eq!(parse_amount("12.99").unwrap().as_f64(), Some(12.99));
        assert_eq!(parse_amount(" 7 ").unwrap().as_i64(), Some(7));
        assert_eq!(parse_amount("-3.10").unwrap().as_f64(), Some(-3.1));
        assert_eq!(parse_amount("1,234").unwrap().as_i64(), Some(1234));
        assert_eq!(parse_amount("£ 8.00").unwrap().as_f64(), Some(8.0));
        assert_eq!(parse_amount("12,50 €"), None);
        assert_eq!(parse_amount("1.234,56"), None);
        assert_eq!(parse_amount("12,5"), None);
        assert_eq!(parse_amount("3 pcs"), None);
        assert_eq!(parse_amount("free"), None);
        assert_eq!(parse_amount(""), None);
    }
}
