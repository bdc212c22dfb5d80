//! # VERA Service Ledger
//!
//! The incentive and accounting side of a VERA deployment. Replicas earn
//! a small service fee for every read they serve and every write they
//! accept; auditors can challenge a replica, freezing its account until
//! it proves (or fails to prove) that it answered honestly.
//!
//! ## Lifecycle of an audit
//!
//! ```text
//! deposit → serve (pay_service × N) → challenge (frozen)
//!     → submit_proof(valid)   → audit fee credited, unfrozen
//!     → submit_proof(invalid) → deposit and balance slashed to zero
//! ```
//!
//! While frozen, a replica can neither earn fees nor withdraw — the
//! deposit is the collateral that makes a false answer expensive.
//!
//! The ledger implements [`ServiceHook`], which is how the node's
//! read/write path consults it without this crate appearing anywhere in
//! the protocol library.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use vera_protocol::network::node::{HookError, ServiceHook};

/// Errors surfaced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The account is frozen pending audit; funds cannot move.
    #[error("account {0} is frozen")]
    AccountFrozen(String),
}

/// A withdrawal receipt: how much left the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    pub amount: u64,
}

/// Per-node accounting: deposits (collateral), balances (earned fees),
/// and the frozen set.
#[derive(Debug, Default)]
struct Accounts {
    deposit: HashMap<String, u64>,
    balance: HashMap<String, u64>,
    frozen: HashSet<String>,
}

/// The service ledger. Cheap to share behind an `Arc`; one mutex guards
/// the maps because every operation touches at most a handful of entries.
#[derive(Debug)]
pub struct ServiceLedger {
    /// Fee credited per served read / accepted write.
    service_fee: u64,
    /// Fee credited for a successfully answered challenge.
    audit_fee: u64,
    accounts: Mutex<Accounts>,
}

impl ServiceLedger {
    pub fn new(service_fee: u64, audit_fee: u64) -> Self {
        Self {
            service_fee,
            audit_fee,
            accounts: Mutex::new(Accounts::default()),
        }
    }

    /// Add collateral to a node's deposit.
    pub fn deposit(&self, node_id: &str, amount: u64) {
        let mut accounts = self.accounts.lock();
        *accounts.deposit.entry(node_id.to_string()).or_default() += amount;
        info!(node = %node_id, amount, "deposit received");
    }

    /// Freeze a node's account pending an audit.
    pub fn challenge(&self, node_id: &str) {
        let mut accounts = self.accounts.lock();
        accounts.frozen.insert(node_id.to_string());
        info!(node = %node_id, "account frozen by challenge");
    }

    /// Settle an audit. A valid proof earns the audit fee; an invalid
    /// one slashes deposit and balance to zero. Either way the account
    /// unfreezes.
    pub fn submit_proof(&self, node_id: &str, valid: bool) {
        let mut accounts = self.accounts.lock();
        if valid {
            *accounts.balance.entry(node_id.to_string()).or_default() += self.audit_fee;
        } else {
            accounts.deposit.insert(node_id.to_string(), 0);
            accounts.balance.insert(node_id.to_string(), 0);
        }
        accounts.frozen.remove(node_id);
        info!(node = %node_id, valid, "audit settled");
    }

    /// Withdraw everything — deposit plus earned balance. Refused while
    /// frozen.
    pub fn withdraw(&self, node_id: &str) -> Result<Withdrawal, LedgerError> {
        let mut accounts = self.accounts.lock();
        if accounts.frozen.contains(node_id) {
            return Err(LedgerError::AccountFrozen(node_id.to_string()));
        }
        let amount = accounts.deposit.remove(node_id).unwrap_or(0)
            + accounts.balance.remove(node_id).unwrap_or(0);
        info!(node = %node_id, amount, "withdrawal");
        Ok(Withdrawal { amount })
    }

    /// Whether a node is currently frozen.
    pub fn is_frozen(&self, node_id: &str) -> bool {
        self.accounts.lock().frozen.contains(node_id)
    }

    /// Current earned balance (excluding deposit).
    pub fn balance_of(&self, node_id: &str) -> u64 {
        self.accounts
            .lock()
            .balance
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }

    /// Current deposit.
    pub fn deposit_of(&self, node_id: &str) -> u64 {
        self.accounts
            .lock()
            .deposit
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }
}

impl ServiceHook for ServiceLedger {
    /// Credit the service fee for one served operation, unless frozen.
    fn pay_service(&self, node_id: &str) -> Result<(), HookError> {
        let mut accounts = self.accounts.lock();
        if accounts.frozen.contains(node_id) {
            return Err(HookError::AccountFrozen(node_id.to_string()));
        }
        *accounts.balance.entry(node_id.to_string()).or_default() += self.service_fee;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pay_service_accrues_fees() {
        let ledger = ServiceLedger::new(1, 5);
        ledger.pay_service("node-a").unwrap();
        ledger.pay_service("node-a").unwrap();
        ledger.pay_service("node-b").unwrap();
        assert_eq!(ledger.balance_of("node-a"), 2);
        assert_eq!(ledger.balance_of("node-b"), 1);
    }

    #[test]
    fn frozen_account_refuses_service() {
        let ledger = ServiceLedger::new(1, 5);
        ledger.challenge("node-a");
        assert!(matches!(
            ledger.pay_service("node-a"),
            Err(HookError::AccountFrozen(_))
        ));
        // Other accounts are unaffected.
        ledger.pay_service("node-b").unwrap();
    }
}
