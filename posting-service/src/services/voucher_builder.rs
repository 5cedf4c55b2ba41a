//! Turns candidate lines into a balanced draft voucher.

use crate::error::ValidationError;
use crate::models::amount::{line_totals, quantize};
use crate::models::{
    CandidateLine, ChartOfAccounts, PostingCandidate, TenantSettings, Voucher, VoucherLine,
    VoucherStatus,
};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct VoucherBuilder<'a> {
    settings: &'a TenantSettings,
}

impl<'a> VoucherBuilder<'a> {
    pub fn new(settings: &'a TenantSettings) -> Self {
        Self { settings }
    }

    /// Build a draft voucher from `candidate`.
    ///
    /// Amounts are quantized to the tenant's minor units first. A residual
    /// within the tenant's rounding tolerance is absorbed by one line on the
    /// rounding account; any larger residual is rejected as unbalanced.
    pub fn build(
        &self,
        candidate: &PostingCandidate,
        chart: &ChartOfAccounts,
    ) -> Result<Voucher, ValidationError> {
        let accounting_date = candidate
            .accounting_date
            .ok_or_else(|| ValidationError::MissingField {
                field: "accounting_date".to_string(),
            })?;
        if candidate.currency.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "currency".to_string(),
            });
        }

        let mut lines = self.quantize_lines(&candidate.lines)?;
        check_line_count(&lines)?;
        for (index, line) in lines.iter().enumerate() {
            check_line(index, line, chart)?;
        }

        if let Some(rounding) = self.rounding_line(&lines, chart)? {
            warn!(
                tenant_id = %candidate.tenant_id,
                account_code = %rounding.account_code,
                debit = %rounding.debit,
                credit = %rounding.credit,
                "Adding rounding line to absorb residual"
            );
            lines.push(rounding);
        }

        validate_lines(&lines, chart)?;

        let voucher = Voucher {
            voucher_id: Uuid::new_v4(),
            tenant_id: candidate.tenant_id,
            accounting_date,
            description: candidate.description.clone(),
            currency: candidate.currency.trim().to_uppercase(),
            source: candidate.source.clone(),
            lines,
            status: VoucherStatus::Draft,
        };

        debug!(
            voucher_id = %voucher.voucher_id,
            line_count = voucher.lines.len(),
            total = %voucher.total(),
            "Draft voucher built"
        );

        Ok(voucher)
    }

    fn quantize_lines(&self, lines: &[CandidateLine]) -> Result<Vec<VoucherLine>, ValidationError> {
        let minor_units = self.settings.minor_units();
        lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let account_code = line
                    .account_code
                    .as_deref()
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .ok_or_else(|| ValidationError::MissingField {
                        field: format!("lines[{}].account_code", index),
                    })?;
                Ok(VoucherLine {
                    account_code: account_code.to_string(),
                    debit: quantize(line.debit, minor_units),
                    credit: quantize(line.credit, minor_units),
                    description: line.description.clone(),
                    is_rounding: false,
                })
            })
            .collect()
    }

    /// The line that closes a de-minimis residual, if one is needed.
    fn rounding_line(
        &self,
        lines: &[VoucherLine],
        chart: &ChartOfAccounts,
    ) -> Result<Option<VoucherLine>, ValidationError> {
        let (debit, credit) = line_totals(lines);
        let residual = debit - credit;
        if residual.is_zero() {
            return Ok(None);
        }

        let tolerance = self.settings.rounding_tolerance;
        if tolerance <= Decimal::ZERO || residual.abs() > tolerance {
            return Err(ValidationError::Unbalanced {
                debit,
                credit,
                difference: residual.abs(),
            });
        }

        let account = chart
            .resolve(&self.settings.rounding_account)
            .ok_or_else(|| ValidationError::InvalidAccount {
                account_code: self.settings.rounding_account.clone(),
            })?;

        let (debit, credit) = if residual > Decimal::ZERO {
            (Decimal::ZERO, residual)
        } else {
            (residual.abs(), Decimal::ZERO)
        };

        Ok(Some(VoucherLine {
            account_code: account.account_code.clone(),
            debit,
            credit,
            description: Some("Rounding".to_string()),
            is_rounding: true,
        }))
    }
}

/// Validate a complete line set. Pure; used before every post.
pub fn validate_lines(lines: &[VoucherLine], chart: &ChartOfAccounts) -> Result<(), ValidationError> {
    check_line_count(lines)?;
    for (index, line) in lines.iter().enumerate() {
        check_line(index, line, chart)?;
    }

    let (debit, credit) = line_totals(lines);
    if debit != credit {
        return Err(ValidationError::Unbalanced {
            debit,
            credit,
            difference: (debit - credit).abs(),
        });
    }
    Ok(())
}

fn check_line_count(lines: &[VoucherLine]) -> Result<(), ValidationError> {
    if lines.len() < 2 {
        return Err(ValidationError::TooFewLines { count: lines.len() });
    }
    Ok(())
}

fn check_line(
    index: usize,
    line: &VoucherLine,
    chart: &ChartOfAccounts,
) -> Result<(), ValidationError> {
    let (debit, credit) = (line.debit, line.credit);
    let reason = if debit < Decimal::ZERO || credit < Decimal::ZERO {
        Some("amounts must not be negative")
    } else if !debit.is_zero() && !credit.is_zero() {
        Some("both debit and credit are non-zero")
    } else if debit.is_zero() && credit.is_zero() {
        Some("both debit and credit are zero")
    } else {
        None
    };
    if let Some(reason) = reason {
        return Err(ValidationError::InvalidLine {
            index,
            reason: reason.to_string(),
        });
    }

    if !chart.contains(&line.account_code) {
        return Err(ValidationError::InvalidAccount {
            account_code: line.account_code.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, ChartAccount, SourceRef, VatBreakdown};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn chart() -> ChartOfAccounts {
        let account = |code: &str, account_type| ChartAccount {
            tenant_id: Uuid::nil(),
            account_code: code.to_string(),
            name: code.to_string(),
            account_type,
            is_active: true,
        };
        ChartOfAccounts::new(vec![
            account("6300", AccountType::Expense),
            account("2740", AccountType::Liability),
            account("2400", AccountType::Liability),
            account("7790", AccountType::Expense),
        ])
    }

    fn candidate(lines: Vec<CandidateLine>) -> PostingCandidate {
        PostingCandidate {
            tenant_id: Uuid::nil(),
            source: SourceRef::Manual,
            accounting_date: NaiveDate::from_ymd_opt(2026, 1, 15),
            description: "Rent".to_string(),
            currency: "nok".to_string(),
            lines,
            vat: VatBreakdown::default(),
            extractor_confidence: Some(92.0),
        }
    }

    fn settings() -> TenantSettings {
        TenantSettings::defaults(Uuid::nil())
    }

    #[test]
    fn test_balanced_candidate_builds_draft() {
        let settings = settings();
        let voucher = VoucherBuilder::new(&settings)
            .build(
                &candidate(vec![
                    CandidateLine::debit("6300", dec!(10000)),
                    CandidateLine::debit("2740", dec!(2500)),
                    CandidateLine::credit("2400", dec!(12500)),
                ]),
                &chart(),
            )
            .unwrap();
        assert_eq!(voucher.status, VoucherStatus::Draft);
        assert_eq!(voucher.lines.len(), 3);
        assert_eq!(voucher.total(), dec!(12500));
        assert_eq!(voucher.currency, "NOK");
    }

    #[test]
    fn test_unbalanced_candidate_is_rejected_with_difference() {
        let settings = settings();
        let err = VoucherBuilder::new(&settings)
            .build(
                &candidate(vec![
                    CandidateLine::debit("6300", dec!(10000)),
                    CandidateLine::debit("2740", dec!(2500)),
                    CandidateLine::credit("2400", dec!(19999.99)),
                ]),
                &chart(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::Unbalanced {
                debit: dec!(12500),
                credit: dec!(19999.99),
                difference: dec!(7499.99),
            }
        );
    }

    #[test]
    fn test_small_residual_gets_one_rounding_line() {
        let settings = settings();
        let voucher = VoucherBuilder::new(&settings)
            .build(
                &candidate(vec![
                    CandidateLine::debit("6300", dec!(100.004)),
                    CandidateLine::debit("2740", dec!(25.004)),
                    CandidateLine::credit("2400", dec!(125.03)),
                ]),
                &chart(),
            )
            .unwrap();
        let rounding: Vec<_> = voucher.lines.iter().filter(|l| l.is_rounding).collect();
        assert_eq!(rounding.len(), 1);
        assert_eq!(rounding[0].account_code, "7790");
        assert_eq!(rounding[0].debit, dec!(0.03));
        assert!(validate_lines(&voucher.lines, &chart()).is_ok());
    }

    #[test]
    fn test_rounding_requires_rounding_account() {
        let mut settings = settings();
        settings.rounding_account = "9999".to_string();
        let err = VoucherBuilder::new(&settings)
            .build(
                &candidate(vec![
                    CandidateLine::debit("6300", dec!(100.02)),
                    CandidateLine::credit("2400", dec!(100)),
                ]),
                &chart(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidAccount {
                account_code: "9999".to_string()
            }
        );
    }

    #[test]
    fn test_structural_rejections() {
        let settings = settings();
        let builder = VoucherBuilder::new(&settings);

        assert_eq!(
            builder
                .build(&candidate(vec![CandidateLine::debit("6300", dec!(1))]), &chart())
                .unwrap_err(),
            ValidationError::TooFewLines { count: 1 }
        );

        let mut both = CandidateLine::debit("6300", dec!(10));
        both.credit = dec!(10);
        assert!(matches!(
            builder
                .build(
                    &candidate(vec![both, CandidateLine::credit("2400", dec!(0))]),
                    &chart()
                )
                .unwrap_err(),
            ValidationError::InvalidLine { index: 0, .. }
        ));

        assert_eq!(
            builder
                .build(
                    &candidate(vec![
                        CandidateLine::debit("4000", dec!(10)),
                        CandidateLine::credit("2400", dec!(10)),
                    ]),
                    &chart()
                )
                .unwrap_err(),
            ValidationError::InvalidAccount {
                account_code: "4000".to_string()
            }
        );

        let mut missing = candidate(vec![
            CandidateLine::debit("6300", dec!(10)),
            CandidateLine::credit("2400", dec!(10)),
        ]);
        missing.lines[1].account_code = None;
        assert_eq!(
            builder.build(&missing, &chart()).unwrap_err(),
            ValidationError::MissingField {
                field: "lines[1].account_code".to_string()
            }
        );
    }

    #[test]
    fn test_validate_lines_is_exact() {
        let line = |code: &str, debit, credit| VoucherLine {
            account_code: code.to_string(),
            debit,
            credit,
            description: None,
            is_rounding: false,
        };
        let lines = vec![
            line("6300", dec!(100.01), Decimal::ZERO),
            line("2400", Decimal::ZERO, dec!(100.00)),
        ];
        assert!(matches!(
            validate_lines(&lines, &chart()),
            Err(ValidationError::Unbalanced { .. })
        ));
    }
}
