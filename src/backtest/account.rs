//! Simulated account balances.
//!
//! Each currency holds an available and a locked amount. Resting orders
//! lock funds; fills consume locked funds and credit the other currency;
//! cancels release them. No operation drives a balance negative.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    balances: BTreeMap<String, Balance>,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances<I, S>(balances: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        let mut account = Self::new();
        for (currency, amount) in balances {
            let currency: String = currency.into();
            account.deposit(&currency, amount);
        }
        account
    }

    pub fn balance(&self, currency: &str) -> Balance {
        self.balances.get(currency).copied().unwrap_or_default()
    }

    pub fn balances(&self) -> &BTreeMap<String, Balance> {
        &self.balances
    }

    pub fn deposit(&mut self, currency: &str, amount: Decimal) {
        self.balances.entry(currency.to_string()).or_default().available += amount;
    }

    /// Move `amount` from available to locked.
    pub fn lock(&mut self, currency: &str, amount: Decimal) -> Result<(), ExchangeError> {
        let balance = self.balances.entry(currency.to_string()).or_default();
        if balance.available < amount {
            return Err(ExchangeError::InsufficientBalance {
                currency: currency.to_string(),
                required: amount,
                available: balance.available,
            });
        }
        balance.available -= amount;
        balance.locked += amount;
        Ok(())
    }

    /// Move `amount` from locked back to available.
    pub fn unlock(&mut self, currency: &str, amount: Decimal) {
        let balance = self.balances.entry(currency.to_string()).or_default();
        let released = amount.min(balance.locked);
        balance.locked -= released;
        balance.available += released;
    }

    /// Remove `amount` from locked funds (consumed by a fill).
    pub fn consume_locked(&mut self, currency: &str, amount: Decimal) {
        let balance = self.balances.entry(currency.to_string()).or_default();
        balance.locked -= amount.min(balance.locked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lock_unlock_round() {
        let mut account = Account::with_balances([("USDT", dec!(1000))]);
        account.lock("USDT", dec!(400)).unwrap();
        assert_eq!(
            account.balance("USDT"),
            Balance { available: dec!(600), locked: dec!(400) }
        );

        account.unlock("USDT", dec!(400));
        assert_eq!(account.balance("USDT").available, dec!(1000));
        assert_eq!(account.balance("USDT").locked, dec!(0));
    }

    #[test]
    fn test_lock_rejects_overdraft() {
        let mut account = Account::with_balances([("USDT", dec!(50))]);
        let err = account.lock("USDT", dec!(60)).unwrap_err();
        assert_eq!(
            err,
            ExchangeError::InsufficientBalance {
                currency: "USDT".into(),
                required: dec!(60),
                available: dec!(50),
            }
        );
        // Nothing moved
        assert_eq!(account.balance("USDT").available, dec!(50));
    }

    #[test]
    fn test_consume_never_goes_negative() {
        let mut account = Account::with_balances([("BTC", dec!(1))]);
        account.lock("BTC", dec!(1)).unwrap();
        account.consume_locked("BTC", dec!(2));
        assert_eq!(account.balance("BTC").total(), dec!(0));
    }
}
