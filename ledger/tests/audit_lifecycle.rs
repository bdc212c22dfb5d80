//! Integration tests for the audit lifecycle: deposit, earn, challenge,
//! settle, withdraw. Exercises the ledger exactly the way the node's
//! HTTP routes do.

use vera_ledger::{LedgerError, ServiceLedger};
use vera_protocol::network::node::ServiceHook;

#[test]
fn earn_then_withdraw_everything() {
    let ledger = ServiceLedger::new(1, 5);
    ledger.deposit("replica-1", 100);
    for _ in 0..3 {
        ledger.pay_service("replica-1").unwrap();
    }

    let receipt = ledger.withdraw("replica-1").unwrap();
    assert_eq!(receipt.amount, 103);

    // The account is drained; a second withdrawal yields nothing.
    assert_eq!(ledger.withdraw("replica-1").unwrap().amount, 0);
}

#[test]
fn challenge_blocks_withdrawal_until_settled() {
    let ledger = ServiceLedger::new(1, 5);
    ledger.deposit("replica-1", 50);
    ledger.challenge("replica-1");

    assert!(ledger.is_frozen("replica-1"));
    assert!(matches!(
        ledger.withdraw("replica-1"),
        Err(LedgerError::AccountFrozen(_))
    ));

    ledger.submit_proof("replica-1", true);
    assert!(!ledger.is_frozen("replica-1"));
    // Deposit survived and the audit fee was credited.
    assert_eq!(ledger.withdraw("replica-1").unwrap().amount, 55);
}

#[test]
fn failed_audit_slashes_everything() {
    let ledger = ServiceLedger::new(1, 5);
    ledger.deposit("replica-1", 50);
    ledger.pay_service("replica-1").unwrap();
    ledger.challenge("replica-1");

    ledger.submit_proof("replica-1", false);
    assert!(!ledger.is_frozen("replica-1"));
    assert_eq!(ledger.deposit_of("replica-1"), 0);
    assert_eq!(ledger.balance_of("replica-1"), 0);
    assert_eq!(ledger.withdraw("replica-1").unwrap().amount, 0);
}

#[test]
fn frozen_replica_cannot_earn_during_audit() {
    let ledger = ServiceLedger::new(1, 5);
    ledger.pay_service("replica-1").unwrap();
    ledger.challenge("replica-1");
    assert!(ledger.pay_service("replica-1").is_err());

    ledger.submit_proof("replica-1", true);
    ledger.pay_service("replica-1").unwrap();
    assert_eq!(ledger.balance_of("replica-1"), 7); // 1 + 5 + 1
}
