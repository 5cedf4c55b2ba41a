//! Domain models for posting-service.

pub mod amount;
mod account;
mod bank;
mod candidate;
pub mod reference;
mod subledger;
mod task;
mod voucher;

pub use account::{
    AccountType, ChartAccount, ChartOfAccounts, Partner, PartnerKind, TenantSettings,
};
pub use bank::{
    Allocation, BankTransaction, BankTransactionStatus, ImportSummary, MatchCandidate,
    MatchMethod, MatchRecord, NewBankTransaction, ScoreBreakdown, UnmatchRecord,
};
pub use candidate::{
    CandidateLine, CandidateStatus, PostingCandidate, SourceKind, SourceRef, StoredCandidate,
    VatBreakdown,
};
pub use subledger::{
    fold_history, reduce_remaining, ConsistencyIssue, Reduction, ReductionError,
    SubLedgerEntry, SubLedgerStatus, SubLedgerTransaction, SubLedgerTransactionKind,
};
pub use task::{
    NewReviewTask, Priority, ResolveAction, ReviewTask, SweepReport, TaskKind, TaskOutcome,
    TaskStatus,
};
pub use voucher::{PostedVoucher, Voucher, VoucherLine, VoucherRow, VoucherStatus};
