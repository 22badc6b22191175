use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Commitment, Currency};

/// Counterparty bank a facility is drawn against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    pub key: String,
    pub name: String,
}

/// A credit facility as read back from storage.
///
/// `bank_name` is denormalized from the banks table by list/get queries and
/// is `None` when the referenced bank row has been removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditLine {
    pub id: String,
    pub bank_key: String,
    pub bank_name: Option<String>,
    pub description: Option<String>,
    pub currency: Currency,
    /// Facility amount in whole currency units.
    pub amount: i64,
    pub committed: Commitment,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub note: Option<String>,
}

/// Payload for creating a credit line; the identifier is allocated by the
/// store at insert time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCreditLine {
    pub bank_key: String,
    pub description: Option<String>,
    pub currency: Currency,
    pub amount: i64,
    pub committed: Commitment,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub note: Option<String>,
}

/// A fixed advance (funding draw) against a credit line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedAdvance {
    pub id: String,
    pub bank: String,
    pub credit_line_id: String,
    pub cl_description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub continuation_date: NaiveDate,
    pub currency: Currency,
    pub amount_original: i64,
    pub interest_amount: f64,
}

/// Payload for creating a fixed advance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewFixedAdvance {
    pub bank: String,
    pub credit_line_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub continuation_date: NaiveDate,
    pub currency: Currency,
    pub amount_original: i64,
    pub interest_amount: f64,
}
