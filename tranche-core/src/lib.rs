//! Domain types shared across the Tranche register.

mod currency;
mod record;
mod settings;

pub use currency::{Commitment, Currency};
pub use record::{Bank, CreditLine, FixedAdvance, NewCreditLine, NewFixedAdvance};
pub use settings::SettingKey;
