//! Credential vault.
//!
//! Keystore files and their unlock passwords belong to provisioning
//! orders and are stored sealed. Plaintext exists only inside the two
//! admin decrypt accessors; everything else in the server handles opaque
//! encoded blobs. Public keys and indexes stay cleartext alongside the
//! ciphertext so provisioning and monitoring never need to decrypt.

use thiserror::Error;
use tracing::info;

use stakewatch_common::crypto::{self, CryptoError, SealedBlob};

use crate::model::{KeystoreEntry, OrderStatus, ServiceType, Validator};
use crate::registry::{AssignmentStrategy, CreateSpec, ValidatorRegistry};
use crate::store::FleetStore;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("order not found")]
    OrderNotFound,
    #[error("order has no stored password")]
    NoPassword,
    #[error("order is {actual:?}, expected {expected:?}")]
    WrongOrderState { expected: OrderStatus, actual: OrderStatus },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("decrypted payload is not valid utf-8")]
    NotUtf8,
}

pub struct CredentialVault {
    store: FleetStore,
    key: [u8; 32],
}

impl CredentialVault {
    pub fn new(store: FleetStore, passphrase: &str) -> CredentialVault {
        CredentialVault {
            store,
            key: crypto::derive_key(passphrase),
        }
    }

    /// Seal a keystore JSON file onto an order.
    pub fn store_keystore(
        &self,
        order_id: &str,
        filename: &str,
        keystore_json: &str,
        public_key: Option<String>,
        index: Option<u64>,
        now_ms: u64,
    ) -> Result<(), VaultError> {
        let blob = crypto::seal(&self.key, keystore_json.as_bytes())?;
        let entry = KeystoreEntry {
            filename: filename.to_string(),
            ciphertext: blob.encode(),
            public_key,
            index,
        };
        self.store
            .update_order(order_id, |o| {
                o.keystores.push(entry);
                o.updated_at = now_ms;
            })
            .ok_or(VaultError::OrderNotFound)?;
        info!(order_id, filename, "keystore sealed");
        Ok(())
    }

    /// Seal the batch unlock password onto an order, replacing any
    /// previous one.
    pub fn set_password(
        &self,
        order_id: &str,
        plaintext: &str,
        now_ms: u64,
    ) -> Result<(), VaultError> {
        let blob = crypto::seal(&self.key, plaintext.as_bytes())?;
        self.store
            .update_order(order_id, |o| {
                o.keystore_password = Some(blob.encode());
                o.updated_at = now_ms;
            })
            .ok_or(VaultError::OrderNotFound)?;
        info!(order_id, "keystore password sealed");
        Ok(())
    }

    /// Open every keystore on an order. Admin-only callers.
    pub fn decrypt_keystores(&self, order_id: &str) -> Result<Vec<(String, String)>, VaultError> {
        let order = self
            .store
            .get_order(order_id)
            .ok_or(VaultError::OrderNotFound)?;
        let mut out = Vec::with_capacity(order.keystores.len());
        for entry in &order.keystores {
            let blob = SealedBlob::decode(&entry.ciphertext)?;
            let plaintext = crypto::open(&self.key, &blob)?;
            let json = String::from_utf8(plaintext).map_err(|_| VaultError::NotUtf8)?;
            out.push((entry.filename.clone(), json));
        }
        Ok(out)
    }

    /// Open the batch password on an order. Admin-only callers.
    pub fn decrypt_password(&self, order_id: &str) -> Result<String, VaultError> {
        let order = self
            .store
            .get_order(order_id)
            .ok_or(VaultError::OrderNotFound)?;
        let encoded = order.keystore_password.ok_or(VaultError::NoPassword)?;
        let blob = SealedBlob::decode(&encoded)?;
        let plaintext = crypto::open(&self.key, &blob)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::NotUtf8)
    }

    /// Turn a paid order into managed validator records.
    ///
    /// Only the cleartext pubkeys stored next to the ciphertexts are
    /// read; nothing is decrypted. Entries without a pubkey are skipped
    /// (their keys have not hit the deposit contract yet). Marks the
    /// order provisioned.
    pub fn provision_from_order(
        &self,
        registry: &ValidatorRegistry,
        order_id: &str,
        strategy: AssignmentStrategy,
        now_ms: u64,
    ) -> Result<Vec<Validator>, VaultError> {
        let order = self
            .store
            .get_order(order_id)
            .ok_or(VaultError::OrderNotFound)?;
        if order.status != OrderStatus::Paid {
            return Err(VaultError::WrongOrderState {
                expected: OrderStatus::Paid,
                actual: order.status,
            });
        }

        let mut provisioned = Vec::new();
        for entry in order.keystores.iter().filter(|e| e.public_key.is_some()) {
            let pubkey = entry.public_key.clone().expect("filtered above");
            let server_id = strategy.pick(&self.store);
            let create = CreateSpec {
                name: format!(
                    "validator-{}",
                    entry
                        .index
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| pubkey.chars().take(10).collect())
                ),
                network: order.network,
                service_type: ServiceType::Managed,
                owner: Some(order.user_id.clone()),
                server_id,
            };
            let index = entry.index;
            let user_id = order.user_id.clone();
            let v = registry.upsert_by_pubkey(&pubkey, create, now_ms, |v| {
                v.order_id = Some(order_id.to_string());
                if v.owner.is_none() {
                    v.owner = Some(user_id);
                }
                if index.is_some() {
                    v.index = index;
                }
            });
            provisioned.push(v);
        }

        self.store
            .update_order(order_id, |o| {
                o.status = OrderStatus::Provisioned;
                o.updated_at = now_ms;
            })
            .ok_or(VaultError::OrderNotFound)?;
        info!(order_id, count = provisioned.len(), "order provisioned");
        Ok(provisioned)
    }
}
