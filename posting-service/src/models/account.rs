//! Chart of accounts, partners and per-tenant accounting policy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Account types following standard accounting categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Revenue => "revenue",
            Self::Expense => "expense",
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(Self::Asset),
            "liability" => Ok(Self::Liability),
            "equity" => Ok(Self::Equity),
            "revenue" => Ok(Self::Revenue),
            "expense" => Ok(Self::Expense),
            other => Err(format!("unknown account type '{}'", other)),
        }
    }
}

impl TryFrom<String> for AccountType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One account in a tenant's chart of accounts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChartAccount {
    pub tenant_id: Uuid,
    pub account_code: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub account_type: AccountType,
    pub is_active: bool,
}

/// In-memory view of a tenant's chart of accounts, keyed by account code.
#[derive(Debug, Clone, Default)]
pub struct ChartOfAccounts {
    accounts: HashMap<String, ChartAccount>,
}

impl ChartOfAccounts {
    pub fn new(accounts: impl IntoIterator<Item = ChartAccount>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|a| (a.account_code.clone(), a))
                .collect(),
        }
    }

    /// Look up an active account. Inactive accounts do not resolve.
    pub fn resolve(&self, account_code: &str) -> Option<&ChartAccount> {
        self.accounts
            .get(account_code.trim())
            .filter(|a| a.is_active)
    }

    pub fn contains(&self, account_code: &str) -> bool {
        self.resolve(account_code).is_some()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Supplier or customer master-data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnerKind {
    Supplier,
    Customer,
}

impl PartnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier",
            Self::Customer => "customer",
        }
    }
}

impl FromStr for PartnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supplier" => Ok(Self::Supplier),
            "customer" => Ok(Self::Customer),
            other => Err(format!("unknown partner kind '{}'", other)),
        }
    }
}

impl TryFrom<String> for PartnerKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Partner {
    pub partner_id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: PartnerKind,
    pub name: String,
    pub org_number: Option<String>,
    pub external_ref: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Per-tenant accounting policy. Rows are optional; `TenantSettings::defaults`
/// supplies the values used when a tenant has not configured anything.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: Uuid,
    pub currency: String,
    pub minor_units: i16,
    pub auto_post_threshold: i16,
    pub auto_match_threshold: f64,
    pub payable_control_account: String,
    pub receivable_control_account: String,
    pub rounding_account: String,
    pub rounding_tolerance: Decimal,
}

impl TenantSettings {
    pub const DEFAULT_AUTO_POST_THRESHOLD: i16 = 85;
    pub const DEFAULT_AUTO_MATCH_THRESHOLD: f64 = 0.90;

    pub fn defaults(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            currency: "NOK".to_string(),
            minor_units: 2,
            auto_post_threshold: Self::DEFAULT_AUTO_POST_THRESHOLD,
            auto_match_threshold: Self::DEFAULT_AUTO_MATCH_THRESHOLD,
            payable_control_account: "2400".to_string(),
            receivable_control_account: "1500".to_string(),
            rounding_account: "7790".to_string(),
            rounding_tolerance: Decimal::new(5, 2),
        }
    }

    pub fn minor_units(&self) -> u32 {
        self.minor_units.max(0) as u32
    }

    /// Control account for the given partner side of the sub-ledger.
    pub fn control_account(&self, kind: PartnerKind) -> &str {
        match kind {
            PartnerKind::Supplier => &self.payable_control_account,
            PartnerKind::Customer => &self.receivable_control_account,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(code: &str, account_type: AccountType, is_active: bool) -> ChartAccount {
        ChartAccount {
            tenant_id: Uuid::nil(),
            account_code: code.to_string(),
            name: code.to_string(),
            account_type,
            is_active,
        }
    }

    #[test]
    fn test_chart_resolves_only_active_accounts() {
        let chart = ChartOfAccounts::new(vec![
            account("6300", AccountType::Expense, true),
            account("6301", AccountType::Expense, false),
        ]);
        assert!(chart.contains("6300"));
        assert!(chart.contains(" 6300 "));
        assert!(!chart.contains("6301"));
        assert!(!chart.contains("9999"));
    }

    #[test]
    fn test_account_type_round_trip_through_string() {
        for t in [
            AccountType::Asset,
            AccountType::Liability,
            AccountType::Equity,
            AccountType::Revenue,
            AccountType::Expense,
        ] {
            assert_eq!(AccountType::try_from(t.as_str().to_string()), Ok(t));
        }
        assert!(AccountType::from_str("bogus").is_err());
    }

    #[test]
    fn test_default_settings() {
        let s = TenantSettings::defaults(Uuid::nil());
        assert_eq!(s.auto_post_threshold, 85);
        assert_eq!(s.control_account(PartnerKind::Supplier), "2400");
        assert_eq!(s.control_account(PartnerKind::Customer), "1500");
        assert_eq!(s.minor_units(), 2);
    }
}
