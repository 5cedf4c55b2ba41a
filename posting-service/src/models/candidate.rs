//! Posting candidates submitted by the invoice-intake collaborator.

use crate::models::account::PartnerKind;
use crate::models::amount::DebitCredit;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Where an accounting event came from. Each variant carries only the fields
/// that source kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    /// Vendor invoice. Posting it creates a supplier sub-ledger entry.
    SupplierInvoice {
        document_id: Uuid,
        invoice_number: String,
        /// Organisation number or external id of the vendor, used to link a partner.
        vendor_ref: Option<String>,
        vendor_name: Option<String>,
        /// KID / structured payment reference printed on the invoice.
        payment_reference: Option<String>,
        due_date: Option<NaiveDate>,
    },
    /// Outgoing customer invoice. Posting it creates a customer sub-ledger entry.
    CustomerInvoice {
        document_id: Uuid,
        invoice_number: String,
        customer_ref: Option<String>,
        customer_name: Option<String>,
        payment_reference: Option<String>,
        due_date: Option<NaiveDate>,
    },
    /// Correction of a previously posted voucher.
    Reversal { original_voucher_id: Uuid },
    /// Manual journal entry. Never creates sub-ledger rows.
    Manual,
}

impl SourceRef {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::SupplierInvoice { .. } => SourceKind::SupplierInvoice,
            Self::CustomerInvoice { .. } => SourceKind::CustomerInvoice,
            Self::Reversal { .. } => SourceKind::Reversal,
            Self::Manual => SourceKind::Manual,
        }
    }

    /// Id of the source document, if the source has one.
    pub fn source_id(&self) -> Option<Uuid> {
        match self {
            Self::SupplierInvoice { document_id, .. }
            | Self::CustomerInvoice { document_id, .. } => Some(*document_id),
            Self::Reversal {
                original_voucher_id,
            } => Some(*original_voucher_id),
            Self::Manual => None,
        }
    }

    /// The sub-ledger side this source feeds, if any.
    pub fn partner_kind(&self) -> Option<PartnerKind> {
        match self {
            Self::SupplierInvoice { .. } => Some(PartnerKind::Supplier),
            Self::CustomerInvoice { .. } => Some(PartnerKind::Customer),
            Self::Reversal { .. } | Self::Manual => None,
        }
    }
}

/// Flat discriminant of [`SourceRef`], stored in the `source_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SupplierInvoice,
    CustomerInvoice,
    Reversal,
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupplierInvoice => "supplier_invoice",
            Self::CustomerInvoice => "customer_invoice",
            Self::Reversal => "reversal",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supplier_invoice" => Ok(Self::SupplierInvoice),
            "customer_invoice" => Ok(Self::CustomerInvoice),
            "reversal" => Ok(Self::Reversal),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

impl TryFrom<String> for SourceKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One proposed line. Amounts may be unquantized and the account code may be
/// missing when the extractor could not determine it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLine {
    pub account_code: Option<String>,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

impl CandidateLine {
    pub fn debit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: Some(account_code.to_string()),
            debit: amount,
            credit: Decimal::ZERO,
            description: None,
        }
    }

    pub fn credit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: Some(account_code.to_string()),
            debit: Decimal::ZERO,
            credit: amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

impl DebitCredit for CandidateLine {
    fn debit(&self) -> Decimal {
        self.debit
    }
    fn credit(&self) -> Decimal {
        self.credit
    }
}

/// VAT breakdown as printed on the source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VatBreakdown {
    pub amount_excl_vat: Option<Decimal>,
    pub vat_amount: Option<Decimal>,
    pub total: Option<Decimal>,
}

/// An accounting event proposed for posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingCandidate {
    pub tenant_id: Uuid,
    pub source: SourceRef,
    pub accounting_date: Option<NaiveDate>,
    pub description: String,
    pub currency: String,
    pub lines: Vec<CandidateLine>,
    #[serde(default)]
    pub vat: VatBreakdown,
    /// Raw confidence from the upstream extractor on a 0-100 scale.
    pub extractor_confidence: Option<f64>,
}

/// Lifecycle of a stored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Queued,
    Posted,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Posted => "posted",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for CandidateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "posted" => Ok(Self::Posted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown candidate status '{}'", other)),
        }
    }
}

impl TryFrom<String> for CandidateStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Durable record of a submitted candidate (`posting_candidates`).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StoredCandidate {
    pub candidate_id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(json)]
    pub payload: PostingCandidate,
    pub score: i16,
    /// Serialized check results that produced `score`.
    pub checks: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub status: CandidateStatus,
    pub rejection_reason: Option<String>,
    pub voucher_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}
