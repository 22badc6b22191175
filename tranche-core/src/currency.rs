use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Booking currency of a facility or advance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Chf,
    Eur,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Chf => "CHF",
            Currency::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHF" => Ok(Currency::Chf),
            "EUR" => Ok(Currency::Eur),
            other => Err(format!("unknown currency: {other}")),
        }
    }
}

/// Whether a credit line is a committed facility.
///
/// Persisted as the literal `Yes`/`No` text the storage schema checks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Commitment {
    Yes,
    No,
}

impl Commitment {
    pub fn as_str(self) -> &'static str {
        match self {
            Commitment::Yes => "Yes",
            Commitment::No => "No",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Yes" => Ok(Commitment::Yes),
            "No" => Ok(Commitment::No),
            other => Err(format!("unknown commitment flag: {other}")),
        }
    }
}
