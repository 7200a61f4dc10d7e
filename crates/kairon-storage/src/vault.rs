//! Bot-scoped secret store, encrypted at rest with AES-256-GCM.
//!
//! Each value is sealed with a fresh random 96-bit nonce. The `bot/key` pair is
//! bound as additional authenticated data so a ciphertext copied to another
//! row fails to open.

use std::sync::Arc;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use rusqlite::OptionalExtension;
use tracing::debug;

use kairon_core::error::KaironError;

use crate::db::Database;

/// Generate a random 32-byte master key.
pub fn generate_key() -> Result<[u8; 32], KaironError> {
    let mut key = [0u8; 32];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| KaironError::Vault("failed to generate random key".to_string()))?;
    Ok(key)
}

/// Parse a hex-encoded 32-byte master key.
pub fn key_from_hex(encoded: &str) -> Result<[u8; 32], KaironError> {
    let bytes = hex::decode(encoded.trim())
        .map_err(|e| KaironError::Vault(format!("master key is not valid hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| KaironError::Vault("master key must be 32 bytes".to_string()))
}

/// Encrypted key/value store keyed by `(bot, key)`.
pub struct KeyVault {
    db: Arc<Database>,
    master_key: [u8; 32],
    rng: SystemRandom,
}

impl KeyVault {
    pub fn new(db: Arc<Database>, master_key: [u8; 32]) -> Self {
        Self {
            db,
            master_key,
            rng: SystemRandom::new(),
        }
    }

    pub fn from_hex(db: Arc<Database>, encoded: &str) -> Result<Self, KaironError> {
        Ok(Self::new(db, key_from_hex(encoded)?))
    }

    fn cipher(&self) -> Result<LessSafeKey, KaironError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.master_key)
            .map_err(|_| KaironError::Vault("failed to create AES-256-GCM key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    fn seal(&self, bot: &str, key: &str, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12]), KaironError> {
        let mut nonce_bytes = [0u8; 12];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| KaironError::Vault("failed to generate nonce".to_string()))?;

        let aad = format!("{bot}/{key}");
        let mut in_out = plaintext.to_vec();
        self.cipher()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| KaironError::Vault("encryption failed".to_string()))?;
        Ok((in_out, nonce_bytes))
    }

    fn open(&self, bot: &str, key: &str, nonce: &[u8], ciphertext: &[u8]) -> Result<String, KaironError> {
        let nonce_bytes: [u8; 12] = nonce
            .try_into()
            .map_err(|_| KaironError::Vault(format!("corrupt nonce for {bot}/{key}")))?;
        let aad = format!("{bot}/{key}");
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .cipher()?
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| {
                KaironError::Vault(format!(
                    "decryption failed for {bot}/{key}: wrong key or corrupted data"
                ))
            })?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| KaironError::Vault(format!("secret {bot}/{key} is not UTF-8")))
    }

    /// Store or replace a secret.
    pub fn put(&self, bot: &str, key: &str, value: &str) -> Result<(), KaironError> {
        let (ciphertext, nonce) = self.seal(bot, key, value.as_bytes())?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO key_vault (bot, key, ciphertext, nonce, updated_at)
                 VALUES (?1, ?2, ?3, ?4, strftime('%s', 'now'))
                 ON CONFLICT (bot, key) DO UPDATE SET
                    ciphertext = excluded.ciphertext,
                    nonce = excluded.nonce,
                    updated_at = excluded.updated_at",
                rusqlite::params![bot, key, ciphertext, nonce.to_vec()],
            )
            .map_err(|e| KaironError::Storage(format!("Failed to save secret: {}", e)))?;
            Ok(())
        })?;
        debug!(bot = %bot, key = %key, "Secret stored");
        Ok(())
    }

    /// Fetch and decrypt a secret. `Ok(None)` when the key does not exist.
    pub fn get(&self, bot: &str, key: &str) -> Result<Option<String>, KaironError> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT ciphertext, nonce FROM key_vault WHERE bot = ?1 AND key = ?2",
                rusqlite::params![bot, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| KaironError::Storage(e.to_string()))
        })?;

        match row {
            Some((ciphertext, nonce)) => Ok(Some(self.open(bot, key, &nonce, &ciphertext)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, bot: &str, key: &str) -> Result<bool, KaironError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM key_vault WHERE bot = ?1 AND key = ?2",
                    rusqlite::params![bot, key],
                )
                .map_err(|e| KaironError::Storage(format!("Failed to delete secret: {}", e)))?;
            Ok(affected > 0)
        })
    }

    /// Names of all secrets stored for a bot, sorted.
    pub fn list_keys(&self, bot: &str) -> Result<Vec<String>, KaironError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key FROM key_vault WHERE bot = ?1 ORDER BY key")
                .map_err(|e| KaironError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![bot], |row| row.get::<_, String>(0))
                .map_err(|e| KaironError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| KaironError::Storage(e.to_string()))
        })
    }
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_vault() -> KeyVault {
        let db = Arc::new(Database::in_memory().unwrap());
        KeyVault::new(db, generate_key().unwrap())
    }

    #[test]
    fn test_put_and_get() {
        let vault = make_vault();
        vault.put("b1", "API_KEY", "s3cr3t").unwrap();
        assert_eq!(vault.get("b1", "API_KEY").unwrap().as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let vault = make_vault();
        assert!(vault.get("b1", "NOPE").unwrap().is_none());
    }

    #[test]
    fn test_secrets_are_bot_scoped() {
        let vault = make_vault();
        vault.put("b1", "API_KEY", "one").unwrap();
        assert!(vault.get("b2", "API_KEY").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let vault = make_vault();
        vault.put("b1", "API_KEY", "old").unwrap();
        vault.put("b1", "API_KEY", "new").unwrap();
        assert_eq!(vault.get("b1", "API_KEY").unwrap().as_deref(), Some("new"));
        assert_eq!(vault.list_keys("b1").unwrap(), vec!["API_KEY".to_string()]);
    }

    #[test]
    fn test_ciphertext_is_not_plaintext() {
        let vault = make_vault();
        vault.put("b1", "API_KEY", "plain-value").unwrap();
        let stored: Vec<u8> = vault
            .db
            .with_conn(|conn| {
                conn.query_row("SELECT ciphertext FROM key_vault", [], |row| row.get(0))
                    .map_err(|e| KaironError::Storage(e.to_string()))
            })
            .unwrap();
        assert_ne!(stored, b"plain-value".to_vec());
        assert_eq!(stored.len(), "plain-value".len() + 16);
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let db = Arc::new(Database::in_memory().unwrap());
        let writer = KeyVault::new(Arc::clone(&db), generate_key().unwrap());
        writer.put("b1", "API_KEY", "s3cr3t").unwrap();

        let reader = KeyVault::new(db, generate_key().unwrap());
        let err = reader.get("b1", "API_KEY").unwrap_err();
        assert!(matches!(err, KaironError::Vault(_)));
    }

    #[test]
    fn test_ciphertext_bound_to_row() {
        let vault = make_vault();
        vault.put("b1", "A", "alpha").unwrap();
        vault
            .db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO key_vault (bot, key, ciphertext, nonce)
                     SELECT 'b1', 'B', ciphertext, nonce FROM key_vault WHERE key = 'A'",
                    [],
                )
                .map_err(|e| KaironError::Storage(e.to_string()))
            })
            .unwrap();
        assert!(vault.get("b1", "B").is_err());
    }

    #[test]
    fn test_delete() {
        let vault = make_vault();
        vault.put("b1", "API_KEY", "x").unwrap();
        assert!(vault.delete("b1", "API_KEY").unwrap());
        assert!(!vault.delete("b1", "API_KEY").unwrap());
        assert!(vault.get("b1", "API_KEY").unwrap().is_none());
    }

    #[test]
    fn test_key_from_hex() {
        let key = key_from_hex(&"0f".repeat(32)).unwrap();
        assert_eq!(key, [0x0f; 32]);
        assert!(key_from_hex("zz").is_err());
        assert!(key_from_hex("0f0f").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let vault = make_vault();
        let debug = format!("{:?}", vault);
        assert!(debug.contains("REDACTED"));
    }
}
