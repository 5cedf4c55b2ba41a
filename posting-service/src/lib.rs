//! Posting Service - voucher posting, review queue and bank reconciliation.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
