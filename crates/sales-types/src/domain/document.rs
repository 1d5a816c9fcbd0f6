use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Order,
    Invoice,
    CreditNote,
}

impl DocumentKind {
    /// Collection segment under `/sales`.
    pub fn collection(self) -> &'static str {
        match self {
            DocumentKind::Order => "orders",
            DocumentKind::Invoice => "invoices",
            DocumentKind::CreditNote => "credit-notes",
        }
    }

    pub fn from_collection(segment: &str) -> Option<Self> {
        match segment {
            "orders" => Some(DocumentKind::Order),
            "invoices" => Some(DocumentKind::Invoice),
            "credit-notes" => Some(DocumentKind::CreditNote),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DocumentKind::Order => "Sales Order",
            DocumentKind::Invoice => "Invoice",
            DocumentKind::CreditNote => "Credit Note",
        }
    }

    pub fn collection_path(self) -> String {
        format!("sales/{}", self.collection())
    }

    pub fn document_path(self, id: &str) -> String {
        format!("sales/{}/{id}", self.collection())
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    Approved,
    Posted,
    Rejected,
    Cancelled,
    RevisionRequested,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DocumentStatus {
    /// Position along `DRAFT -> SUBMITTED -> APPROVED -> POSTED`; `None` for
    /// states off that path.
    pub fn stage(self) -> Option<u8> {
        match self {
            DocumentStatus::Draft => Some(0),
            DocumentStatus::Submitted => Some(1),
            DocumentStatus::Approved => Some(2),
            DocumentStatus::Posted => Some(3),
            _ => None,
        }
    }

    /// Rejected, cancelled and revision-requested documents have left the
    /// forward path for good.
    pub fn is_off_path(self) -> bool {
        matches!(
            self,
            DocumentStatus::Rejected
                | DocumentStatus::Cancelled
                | DocumentStatus::RevisionRequested
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Submitted => "SUBMITTED",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Posted => "POSTED",
            DocumentStatus::Rejected => "REJECTED",
            DocumentStatus::Cancelled => "CANCELLED",
            DocumentStatus::RevisionRequested => "REVISION_REQUESTED",
            DocumentStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxPricingMode {
    Inclusive,
    Exclusive,
}

/// A document line as the server returns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(deserialize_with = "amount::deserialize")]
    pub quantity: f64,
    #[serde(deserialize_with = "amount::deserialize")]
    pub unit_price: f64,
    #[serde(
        default,
        deserialize_with = "amount::option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub discount_percent: Option<f64>,
    #[serde(
        default,
        deserialize_with = "amount::option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub discount_amount: Option<f64>,
    #[serde(
        default,
        deserialize_with = "amount::option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub line_total: Option<f64>,
}

impl DocumentItem {
    /// Line amount after discount. The stored absolute discount wins over the
    /// percentage it was derived from.
    pub fn net_amount(&self) -> f64 {
        match self.discount_amount {
            Some(discount) => self.quantity * self.unit_price - discount,
            None => net_amount(
                self.quantity,
                self.unit_price,
                self.discount_percent.unwrap_or(0.0),
            ),
        }
    }
}

impl From<&LineInput> for DocumentItem {
    fn from(line: &LineInput) -> Self {
        Self {
            id: None,
            item_id: line.item_id.clone(),
            item_name: None,
            quantity: line.quantity,
            unit_price: line.unit_price,
            discount_percent: Some(line.discount_percent),
            discount_amount: None,
            line_total: Some(line.net_amount()),
        }
    }
}

/// Local echo of a server-owned document. Stale as soon as the next mutating
/// call is issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<DocumentItem>>,
    #[serde(
        default,
        deserialize_with = "amount::option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub subtotal: Option<f64>,
    #[serde(
        default,
        deserialize_with = "amount::option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub total: Option<f64>,
}

impl Document {
    pub fn item_count(&self) -> Option<usize> {
        self.items.as_ref().map(Vec::len)
    }

    pub fn lines(&self) -> &[DocumentItem] {
        self.items.as_deref().unwrap_or(&[])
    }

    pub fn net_amount(&self) -> f64 {
        self.lines().iter().map(DocumentItem::net_amount).sum()
    }
}

/// A line in a create or update payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineInput {
    pub item_id: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount_percent: f64,
}

impl LineInput {
    /// Re-quantifies an existing line, keeping its item and price.
    pub fn from_item(item: &DocumentItem, quantity: f64) -> Self {
        Self {
            item_id: item.item_id.clone(),
            quantity,
            unit_price: item.unit_price,
            discount_percent: 0.0,
        }
    }

    pub fn net_amount(&self) -> f64 {
        net_amount(self.quantity, self.unit_price, self.discount_percent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDraft {
    pub document_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_date: Option<NaiveDate>,
    pub person_id: String,
    pub tax_pricing_mode: TaxPricingMode,
    pub items: Vec<LineInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DocumentDraft {
    /// Sum of line amounts after discount, before tax.
    pub fn net_subtotal(&self) -> f64 {
        self.items.iter().map(LineInput::net_amount).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    pub items: Vec<LineInput>,
}

impl DocumentPatch {
    pub fn net_amount(&self) -> f64 {
        self.items.iter().map(LineInput::net_amount).sum()
    }
}

fn net_amount(quantity: f64, unit_price: f64, discount_percent: f64) -> f64 {
    quantity * unit_price * (1.0 - discount_percent / 100.0)
}
