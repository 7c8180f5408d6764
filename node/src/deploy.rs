//! # Deployment
//!
//! Creates the vault in a fresh data directory: funds the deployer's
//! external account (dev only), moves the funding out of it, constructs the
//! vault and writes everything in one commit together with the deployment
//! metadata.
//!
//! The deployer's key lives next to the database in `owner.key` so that
//! `run` can act as the owner without a signature.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use heirloom_contracts::{CallContext, InheritanceVault, VaultError};
use heirloom_protocol::config::{DEV_ACCOUNT_ALLOWANCE_COINS, PROTOCOL_VERSION};
use heirloom_protocol::storage::{Commit, VaultDB};
use heirloom_protocol::{Address, Amount, NativeLedger, VaultKeypair};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::host::{HostError, HostResult, DEPLOYMENT_KEY, VAULT_KEY};

/// File name of the deployer's secret key inside the data directory.
pub const OWNER_KEY_FILE: &str = "owner.key";

/// Inputs to [`deploy_vault`].
#[derive(Debug, Clone)]
pub struct DeployParams {
    pub owner: Address,
    pub heir: Address,
    pub funding: Amount,
    pub network_url: String,
    /// Accounts credited with the dev allowance before funding.
    pub dev_fund: Vec<Address>,
    pub now: DateTime<Utc>,
}

/// Metadata stored alongside the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub vault_id: String,
    pub deployer: Address,
    pub heir: Address,
    pub funding: Amount,
    pub network_url: String,
    pub deployed_at: DateTime<Utc>,
    pub protocol_version: String,
}

/// Deploys a new vault into `db`.
///
/// Fails with [`HostError::AlreadyDeployed`] if `db` already holds one, and
/// with a ledger error if the owner can't cover `funding`. Nothing is
/// written on failure.
pub fn deploy_vault(db: &VaultDB, params: DeployParams) -> HostResult<Deployment> {
    if db.has_state(VAULT_KEY)? {
        return Err(HostError::AlreadyDeployed);
    }

    let mut ledger = NativeLedger::new();
    for (address, balance) in db.accounts()? {
        ledger.credit(&address, balance)?;
    }

    if !params.dev_fund.is_empty() {
        let allowance = Amount::from_coins(DEV_ACCOUNT_ALLOWANCE_COINS)
            .ok_or(HostError::Vault(VaultError::AmountOverflow))?;
        for address in &params.dev_fund {
            ledger.credit(address, allowance)?;
        }
    }

    ledger.debit(&params.owner, params.funding)?;

    let ctx = CallContext::new(params.owner, params.now);
    let vault = InheritanceVault::new(&ctx, params.heir, params.funding)?;

    let deployment = Deployment {
        vault_id: vault.vault_id().to_string(),
        deployer: params.owner,
        heir: params.heir,
        funding: params.funding,
        network_url: params.network_url,
        deployed_at: params.now,
        protocol_version: PROTOCOL_VERSION.to_string(),
    };

    let mut commit = Commit::new()
        .put_state(VAULT_KEY, &vault)?
        .put_state(DEPLOYMENT_KEY, &deployment)?;
    for (address, balance) in ledger.accounts() {
        commit = commit.put_account(*address, *balance);
    }
    db.commit(commit)?;

    info!(
        vault_id = %deployment.vault_id,
        owner = %deployment.deployer,
        heir = %deployment.heir,
        funding = %deployment.funding,
        "vault deployed"
    );
    Ok(deployment)
}

/// Deploys the vault owned by `owner` and stores its key in `data_dir`.
///
/// The key file is created before the vault is committed, and removed again
/// if the commit fails, so a stored vault always has its `owner.key`. An
/// existing key file is never overwritten.
pub fn deploy_with_owner_key(
    db: &VaultDB,
    data_dir: &Path,
    owner: &VaultKeypair,
    params: DeployParams,
) -> Result<(Deployment, PathBuf)> {
    if db.has_state(VAULT_KEY)? {
        return Err(HostError::AlreadyDeployed.into());
    }
    let key_path = write_owner_key(data_dir, owner)?;

    let params = DeployParams {
        owner: owner.address(),
        ..params
    };
    match deploy_vault(db, params) {
        Ok(deployment) => Ok((deployment, key_path)),
        Err(err) => {
            if let Err(e) = std::fs::remove_file(&key_path) {
                warn!(path = %key_path.display(), error = %e, "failed to remove unused owner key");
            }
            Err(err.into())
        }
    }
}

/// Reads the stored deployment metadata.
pub fn load_deployment(db: &VaultDB) -> HostResult<Deployment> {
    db.get_state(DEPLOYMENT_KEY)?.ok_or(HostError::NotDeployed)
}

pub fn owner_key_path(data_dir: &Path) -> PathBuf {
    data_dir.join(OWNER_KEY_FILE)
}

/// Creates `owner.key` holding the owner's secret key, readable by the user
/// only. Fails if the file already exists.
pub fn write_owner_key(data_dir: &Path, keypair: &VaultKeypair) -> Result<PathBuf> {
    let key_path = owner_key_path(data_dir);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&key_path)
        .with_context(|| format!("failed to create owner key at {}", key_path.display()))?;
    file.write_all(keypair.secret_key_hex().as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write owner key to {}", key_path.display()))?;

    Ok(key_path)
}

/// Reads `owner.key`, if the data directory has one.
pub fn read_owner_key(data_dir: &Path) -> Result<Option<VaultKeypair>> {
    let key_path = owner_key_path(data_dir);
    if !key_path.exists() {
        return Ok(None);
    }
    let hex_str = std::fs::read_to_string(&key_path)
        .with_context(|| format!("failed to read {}", key_path.display()))?;
    let keypair = VaultKeypair::from_hex(&hex_str)
        .with_context(|| format!("{} does not hold a valid key", key_path.display()))?;
    Ok(Some(keypair))
}

#[cfg(test)]
mod tests {
    use super::*;
    use heirloom_contracts::InvalidHeirReason;

    fn coins(n: u128) -> Amount {
        Amount::from_coins(n).unwrap()
    }

    fn params(owner: Address, heir: Address) -> DeployParams {
        DeployParams {
            owner,
            heir,
            funding: coins(1),
            network_url: "http://localhost:8545".into(),
            dev_fund: vec![owner],
            now: Utc::now(),
        }
    }

    #[test]
    fn deploy_writes_vault_deployment_and_accounts() {
        let db = VaultDB::open_temporary().unwrap();
        let owner = VaultKeypair::dev_account(0).address();
        let heir = VaultKeypair::dev_account(1).address();

        let deployment = deploy_vault(&db, params(owner, heir)).unwrap();
        assert_eq!(deployment.deployer, owner);
        assert_eq!(deployment.protocol_version, PROTOCOL_VERSION);

        let vault: InheritanceVault = db.require_state(VAULT_KEY).unwrap();
        assert_eq!(vault.owner(), owner);
        assert_eq!(vault.heir(), heir);
        assert_eq!(vault.balance(), coins(1));
        assert_eq!(load_deployment(&db).unwrap(), deployment);

        let remaining = db.get_account(&owner).unwrap().unwrap();
        assert_eq!(
            remaining,
            coins(DEV_ACCOUNT_ALLOWANCE_COINS)
                .checked_sub(coins(1))
                .unwrap()
        );
    }

    #[test]
    fn deploy_refuses_second_vault() {
        let db = VaultDB::open_temporary().unwrap();
        let owner = VaultKeypair::dev_account(0).address();
        let heir = VaultKeypair::dev_account(1).address();
        deploy_vault(&db, params(owner, heir)).unwrap();
        assert!(matches!(
            deploy_vault(&db, params(owner, heir)),
            Err(HostError::AlreadyDeployed)
        ));
    }

    #[test]
    fn unfunded_owner_cannot_deploy() {
        let db = VaultDB::open_temporary().unwrap();
        let owner = VaultKeypair::dev_account(0).address();
        let heir = VaultKeypair::dev_account(1).address();
        let mut p = params(owner, heir);
        p.dev_fund.clear();

        let err = deploy_vault(&db, p).unwrap_err();
        assert!(matches!(err, HostError::Ledger(_)));
        assert!(!db.has_state(VAULT_KEY).unwrap());
        assert_eq!(db.account_count(), 0);
    }

    #[test]
    fn zero_funding_needs_no_allowance() {
        let db = VaultDB::open_temporary().unwrap();
        let owner = VaultKeypair::dev_account(0).address();
        let heir = VaultKeypair::dev_account(1).address();
        let mut p = params(owner, heir);
        p.dev_fund.clear();
        p.funding = Amount::ZERO;

        deploy_vault(&db, p).unwrap();
        let vault: InheritanceVault = db.require_state(VAULT_KEY).unwrap();
        assert!(vault.balance().is_zero());
    }

    #[test]
    fn invalid_heir_rejected_at_deploy() {
        let db = VaultDB::open_temporary().unwrap();
        let owner = VaultKeypair::dev_account(0).address();

        let err = deploy_vault(&db, params(owner, Address::ZERO)).unwrap_err();
        assert!(matches!(
            err,
            HostError::Vault(VaultError::InvalidHeir(InvalidHeirReason::ZeroAddress))
        ));
        assert_eq!(err.to_string(), "Heir cannot be the zero address.");

        let err = deploy_vault(&db, params(owner, owner)).unwrap_err();
        assert_eq!(err.to_string(), "Owner cannot be the heir.");
        assert!(!db.has_state(VAULT_KEY).unwrap());
    }

    #[test]
    fn owner_key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_owner_key(dir.path()).unwrap().is_none());

        let kp = VaultKeypair::generate();
        let path = write_owner_key(dir.path(), &kp).unwrap();
        assert!(path.ends_with(OWNER_KEY_FILE));

        let restored = read_owner_key(dir.path()).unwrap().unwrap();
        assert_eq!(restored.address(), kp.address());
        assert!(write_owner_key(dir.path(), &VaultKeypair::generate()).is_err());
        assert_eq!(
            read_owner_key(dir.path()).unwrap().unwrap().address(),
            kp.address()
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn owner_key_is_written_before_the_vault() {
        let dir = tempfile::tempdir().unwrap();
        let db = VaultDB::open_temporary().unwrap();
        let owner = VaultKeypair::dev_account(0);
        let heir = VaultKeypair::dev_account(1).address();

        // Unwritable key location: nothing is committed.
        let missing = dir.path().join("missing");
        let err =
            deploy_with_owner_key(&db, &missing, &owner, params(owner.address(), heir))
                .unwrap_err();
        assert!(err.to_string().contains("failed to create owner key"));
        assert!(!db.has_state(VAULT_KEY).unwrap());

        let (deployment, key_path) =
            deploy_with_owner_key(&db, dir.path(), &owner, params(owner.address(), heir))
                .unwrap();
        assert_eq!(deployment.deployer, owner.address());
        assert_eq!(key_path, owner_key_path(dir.path()));
        assert_eq!(
            read_owner_key(dir.path()).unwrap().unwrap().address(),
            owner.address()
        );

        let err =
            deploy_with_owner_key(&db, dir.path(), &owner, params(owner.address(), heir))
                .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HostError>(),
            Some(HostError::AlreadyDeployed)
        ));
    }

    #[test]
    fn failed_deploy_removes_the_new_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = VaultDB::open_temporary().unwrap();
        let owner = VaultKeypair::dev_account(0);
        let heir = VaultKeypair::dev_account(1).address();
        let mut p = params(owner.address(), heir);
        p.dev_fund.clear();

        assert!(deploy_with_owner_key(&db, dir.path(), &owner, p).is_err());
        assert!(!owner_key_path(dir.path()).exists());
        assert!(!db.has_state(VAULT_KEY).unwrap());

        deploy_with_owner_key(&db, dir.path(), &owner, params(owner.address(), heir)).unwrap();
        assert!(db.has_state(VAULT_KEY).unwrap());
    }

    #[test]
    fn existing_key_file_blocks_deploy() {
        let dir = tempfile::tempdir().unwrap();
        let db = VaultDB::open_temporary().unwrap();
        let earlier = VaultKeypair::generate();
        write_owner_key(dir.path(), &earlier).unwrap();

        let owner = VaultKeypair::dev_account(0);
        let heir = VaultKeypair::dev_account(1).address();
        assert!(
            deploy_with_owner_key(&db, dir.path(), &owner, params(owner.address(), heir))
                .is_err()
        );
        assert!(!db.has_state(VAULT_KEY).unwrap());
        assert_eq!(
            read_owner_key(dir.path()).unwrap().unwrap().address(),
            earlier.address()
        );
    }
}
