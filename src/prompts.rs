//! Prompts for VLM-based receipt extraction.
//!
//! The prompt is the schema: every key listed here is a key the
//! [`crate::output::ReceiptRecord`] type reads back. Change both together.
//!
//! Callers can override the default via [`crate::config::ServiceConfig::system_prompt`];
//! the constant here is used only when no override is provided.

/// Default prompt sent alongside the receipt image.
pub const RECEIPT_EXTRACTION_PROMPT: &str = r#"Extract structured JSON data from this receipt image.
Return a single JSON object that strictly matches this schema:

{
  "Date": "string or null",
  "Time": "string or null",
  "Total Amount": "number or null",
  "Currency": "string or null",
  "Store Name": "string or null",
  "Store Address": "string or null",
  "Store Contact": "string or null",
  "Payment Method": "string or null",
  "Subtotal": "number or null",
  "Tax": "number or null",
  "Category": "string or null",
  "Total Items Count": "integer or null",
  "Description": "string or null",
  "Barcode Number": "string or null",
  "Items": [
    {
      "Product Name": "string",
      "Quantity": "number",
      "Price Per Unit": "number",
      "Total Price": "number"
    }
  ]
}

Rules:
- Every key must be present. Use null for any value you cannot read.
- List "Items" in the order they are printed on the receipt.
- "Description" is a one or two sentence overview of the purchase.
- "Category" classifies the purchase, e.g. "Groceries", "Electronics",
  "Clothing", "Restaurant", "Fuel", "Pharmacy".
- "Barcode Number" is the digit sequence printed directly above or below the
  barcode on the receipt.
- Output ONLY the JSON object. No Markdown fences, no commentary."#;

/// Schema keys every record carries, in output order.
pub const RECORD_KEYS: [&str; 15] = [
    "Date",
    "Time",
    "Total Amount",
    "Currency",
    "Store Name",
    "Store Address",
    "Store Contact",
    "Payment Method",
    "Subtotal",
    "Tax",
    "Category",
    "Total Items Count",
    "Description",
    "Barcode Number",
    "Items",
];

/// Keys every line item carries, in output order.
pub const ITEM_KEYS: [&str; 4] = ["Product Name", "Quantity", "Price Per Unit", "Total Price"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_mentions_every_schema_key() {
        for key in RECORD_KEYS.iter().chain(ITEM_KEYS.iter()) {
            assert!(
                RECEIPT_EXTRACTION_PROMPT.contains(&format!("\"{key}\"")),
                "prompt is missing key {key:?}"
            );
        }
    }
}
