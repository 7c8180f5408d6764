//! Integration tests for the inheritance vault.
//!
//! These tests drive the vault the way a host does: through `VaultCall`
//! dispatch with a native ledger as the transfer sink, walking the
//! deploy, withdraw, re-designate and claim lifecycle across module
//! boundaries.

use chrono::{DateTime, Duration, TimeZone, Utc};
use heirloom_contracts::{
    CallContext, InheritanceVault, SignedCall, VaultCall, VaultError, VaultEvent,
};
use heirloom_protocol::config::INACTIVITY_DELAY_SECS;
use heirloom_protocol::{Address, Amount, NativeLedger, VaultKeypair};

/// The four accounts every scenario uses: owner, heir, new heir, stranger.
struct Signers {
    owner: Address,
    heir: Address,
    new_heir: Address,
    other: Address,
}

fn signers() -> Signers {
    let addr = |seed: u8| VaultKeypair::from_seed(&[seed; 32]).address();
    Signers {
        owner: addr(1),
        heir: addr(2),
        new_heir: addr(3),
        other: addr(4),
    }
}

fn one() -> Amount {
    Amount::parse_decimal("1").unwrap()
}

fn deployed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Helper: deploys a vault holding 1.0 with `heir` as successor.
fn deploy(s: &Signers) -> InheritanceVault {
    InheritanceVault::new(&CallContext::new(s.owner, deployed_at()), s.heir, one()).unwrap()
}

fn call(
    vault: &mut InheritanceVault,
    ledger: &mut NativeLedger,
    caller: Address,
    now: DateTime<Utc>,
    call: VaultCall,
) -> Result<Vec<VaultEvent>, VaultError> {
    call.dispatch(vault, &CallContext::new(caller, now), ledger)
}

// ---------------------------------------------------------------------------
// Lifecycle Tests
// ---------------------------------------------------------------------------

#[test]
fn deployment_sets_owner_and_heir() {
    let s = signers();
    let vault = deploy(&s);
    assert_eq!(vault.owner(), s.owner);
    assert_eq!(vault.heir(), s.heir);
    assert_eq!(vault.balance(), one());
}

#[test]
fn owner_withdraws_funds() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();
    let now = deployed_at() + Duration::minutes(5);

    let events = call(
        &mut vault,
        &mut ledger,
        s.owner,
        now,
        VaultCall::Withdraw { amount: one() },
    )
    .unwrap();

    assert_eq!(
        events,
        vec![VaultEvent::FundsWithdrawn {
            recipient: s.owner,
            amount: one()
        }]
    );
    assert_eq!(vault.balance(), Amount::ZERO);
    assert_eq!(ledger.balance_of(&s.owner), one());
    assert_eq!(vault.last_activity(), now);
}

#[test]
fn owner_sets_new_heir() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();

    let events = call(
        &mut vault,
        &mut ledger,
        s.owner,
        deployed_at(),
        VaultCall::SetHeir {
            new_heir: s.new_heir,
        },
    )
    .unwrap();

    assert_eq!(
        events,
        vec![VaultEvent::HeirChanged {
            previous_heir: s.heir,
            new_heir: s.new_heir
        }]
    );
    assert_eq!(vault.heir(), s.new_heir);
}

#[test]
fn heir_claims_after_delay() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();
    let after = deployed_at() + Duration::seconds(INACTIVITY_DELAY_SECS);

    let events = call(
        &mut vault,
        &mut ledger,
        s.heir,
        after,
        VaultCall::ClaimOwnership {
            next_heir: s.new_heir,
        },
    )
    .unwrap();

    assert_eq!(
        events[0],
        VaultEvent::OwnershipTransferred {
            previous_owner: s.owner,
            new_owner: s.heir
        }
    );
    assert_eq!(
        events[1],
        VaultEvent::HeirChanged {
            previous_heir: s.heir,
            new_heir: s.new_heir
        }
    );
    assert_eq!(vault.owner(), s.heir);
    assert_eq!(vault.heir(), s.new_heir);
}

#[test]
fn full_succession_scenario() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();
    let t1 = deployed_at() + Duration::hours(1);

    // 1. Owner empties the vault.
    call(&mut vault, &mut ledger, s.owner, t1, VaultCall::Withdraw { amount: one() }).unwrap();
    assert_eq!(vault.balance(), Amount::ZERO);

    // 2. Owner re-designates.
    call(
        &mut vault,
        &mut ledger,
        s.owner,
        t1,
        VaultCall::SetHeir {
            new_heir: s.new_heir,
        },
    )
    .unwrap();

    // 3. Thirty days and a second of silence; the new heir claims.
    let t2 = t1 + Duration::seconds(INACTIVITY_DELAY_SECS + 1);
    let events = call(
        &mut vault,
        &mut ledger,
        s.new_heir,
        t2,
        VaultCall::ClaimOwnership { next_heir: s.other },
    )
    .unwrap();

    assert_eq!(vault.owner(), s.new_heir);
    assert_eq!(vault.heir(), s.other);
    assert_eq!(
        events[0],
        VaultEvent::OwnershipTransferred {
            previous_owner: s.owner,
            new_owner: s.new_heir
        }
    );

    // 4. The old owner is now a stranger.
    let err = call(&mut vault, &mut ledger, s.owner, t2, VaultCall::Withdraw { amount: Amount::ZERO })
        .unwrap_err();
    assert_eq!(err.to_string(), "Only the owner can withdraw funds.");
    assert!(vault.check_invariants().is_ok());
}

#[test]
fn claim_succeeds_exactly_once() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();
    let after = deployed_at() + Duration::days(31);

    call(
        &mut vault,
        &mut ledger,
        s.heir,
        after,
        VaultCall::ClaimOwnership {
            next_heir: s.new_heir,
        },
    )
    .unwrap();

    // The claimer is now the owner, not the heir.
    let err = call(
        &mut vault,
        &mut ledger,
        s.heir,
        after,
        VaultCall::ClaimOwnership {
            next_heir: s.other,
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), "Unauthorized");

    // And the new heir has to wait a fresh thirty days.
    let err = call(
        &mut vault,
        &mut ledger,
        s.new_heir,
        after + Duration::days(1),
        VaultCall::ClaimOwnership { next_heir: s.other },
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "The owner still has control.");
}

#[test]
fn deposits_accumulate_without_resetting_timer() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();
    let later = deployed_at() + Duration::days(29);

    for caller in [s.owner, s.other, s.heir] {
        call(&mut vault, &mut ledger, caller, later, VaultCall::Deposit { amount: one() }).unwrap();
    }
    assert_eq!(vault.balance(), Amount::from_coins(4).unwrap());
    assert_eq!(vault.total_deposited(), Amount::from_coins(4).unwrap());
    assert_eq!(vault.last_activity(), deployed_at());

    // Owner's own deposit did not keep the heir away.
    let claim_at = deployed_at() + Duration::days(30);
    call(
        &mut vault,
        &mut ledger,
        s.heir,
        claim_at,
        VaultCall::ClaimOwnership {
            next_heir: s.new_heir,
        },
    )
    .unwrap();
}

#[test]
fn signed_call_identifies_owner() {
    let owner_kp = VaultKeypair::from_seed(&[1; 32]);
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();

    let signed = SignedCall::sign(VaultCall::Withdraw { amount: one() }, 0, &owner_kp).unwrap();
    let caller = signed.verify().unwrap();
    assert_eq!(caller, s.owner);

    signed
        .call
        .dispatch(&mut vault, &CallContext::new(caller, deployed_at()), &mut ledger)
        .unwrap();
    assert_eq!(vault.balance(), Amount::ZERO);
}

// ---------------------------------------------------------------------------
// Error Cases
// ---------------------------------------------------------------------------

#[test]
fn non_owner_cannot_withdraw() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();
    let two = Amount::from_coins(2).unwrap();

    let err = call(&mut vault, &mut ledger, s.other, deployed_at(), VaultCall::Withdraw { amount: two })
        .unwrap_err();
    assert_eq!(err.to_string(), "Only the owner can withdraw funds.");
}

#[test]
fn non_owner_cannot_set_heir() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();

    let err = call(
        &mut vault,
        &mut ledger,
        s.other,
        deployed_at(),
        VaultCall::SetHeir {
            new_heir: s.new_heir,
        },
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Only the owner can set a new heir.");
    assert_eq!(vault.heir(), s.heir);
}

#[test]
fn non_heir_cannot_claim() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();

    let err = call(
        &mut vault,
        &mut ledger,
        s.other,
        deployed_at(),
        VaultCall::ClaimOwnership {
            next_heir: s.new_heir,
        },
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Only the designated heir can claim ownership.");
}

#[test]
fn heir_cannot_claim_before_delay() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();

    let err = call(
        &mut vault,
        &mut ledger,
        s.heir,
        deployed_at(),
        VaultCall::ClaimOwnership {
            next_heir: s.new_heir,
        },
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "The owner still has control.");
    assert_eq!(vault.owner(), s.owner);
}

#[test]
fn owner_activity_resets_claim_window() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();
    let day_29 = deployed_at() + Duration::days(29);

    call(&mut vault, &mut ledger, s.owner, day_29, VaultCall::Withdraw { amount: Amount::ZERO })
        .unwrap();

    let err = call(
        &mut vault,
        &mut ledger,
        s.heir,
        deployed_at() + Duration::days(31),
        VaultCall::ClaimOwnership {
            next_heir: s.new_heir,
        },
    )
    .unwrap_err();
    assert!(matches!(err, VaultError::OwnerStillActive { .. }));
}

#[test]
fn invalid_heirs_rejected() {
    let s = signers();
    let mut vault = deploy(&s);
    let mut ledger = NativeLedger::new();

    for bad in [Address::ZERO, s.owner] {
        let err = call(
            &mut vault,
            &mut ledger,
            s.owner,
            deployed_at(),
            VaultCall::SetHeir { new_heir: bad },
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidHeir");
    }
    assert_eq!(vault.heir(), s.heir);
}

#[test]
fn repeated_failures_never_mutate() {
    let s = signers();
    let mut vault = deploy(&s);
    let before = vault.clone();
    let mut ledger = NativeLedger::new();
    let now = deployed_at() + Duration::days(3);

    for _ in 0..3 {
        let _ = call(&mut vault, &mut ledger, s.other, now, VaultCall::Withdraw { amount: one() });
        let _ = call(
            &mut vault,
            &mut ledger,
            s.owner,
            now,
            VaultCall::Withdraw {
                amount: Amount::from_coins(5).unwrap(),
            },
        );
        let _ = call(
            &mut vault,
            &mut ledger,
            s.heir,
            now,
            VaultCall::ClaimOwnership {
                next_heir: s.new_heir,
            },
        );
    }

    assert_eq!(vault, before);
    assert_eq!(ledger.accounts().count(), 0);
}
