//! Field-level encryption at rest.
//!
//! Encrypted values are stored as a tagged object:
//!
//! ```json
//! {"__encrypted": true, "payload": "<hex(nonce || ciphertext)>"}
//! ```
//!
//! The plaintext is the JSON text of the original value, so any column type
//! round-trips. Each encryption draws a fresh 96-bit nonce.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::catalog::{EncryptionOptions, Row};
use crate::error::Error;

/// Marker key identifying tagged ciphertext.
pub const ENCRYPTED_TAG: &str = "__encrypted";

/// Key holding the hex payload inside tagged ciphertext.
pub const PAYLOAD_KEY: &str = "payload";

const NONCE_LEN: usize = 12;

/// Symmetric cipher for individual field values.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Derive a cipher from caller-supplied key material.
    pub fn new(key: &str) -> Result<Self, Error> {
        let digest = Sha256::digest(key.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest)
            .map_err(|e| Error::Encryption(format!("invalid key length: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Check if a value carries the ciphertext tag.
    pub fn is_tagged(value: &Value) -> bool {
        match value {
            Value::Object(obj) => {
                obj.get(ENCRYPTED_TAG) == Some(&Value::Bool(true))
                    && obj.get(PAYLOAD_KEY).is_some_and(Value::is_string)
            }
            _ => false,
        }
    }

    /// Encrypt a value into tagged ciphertext.
    ///
    /// Values that are already tagged are returned unchanged.
    pub fn encrypt_field(&self, value: &Value) -> Result<Value, Error> {
        if Self::is_tagged(value) {
            return Ok(value.clone());
        }

        let plaintext = serde_json::to_vec(value)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        let mut tagged = Map::new();
        tagged.insert(ENCRYPTED_TAG.to_string(), Value::Bool(true));
        tagged.insert(PAYLOAD_KEY.to_string(), Value::String(hex::encode(payload)));
        Ok(Value::Object(tagged))
    }

    /// Decrypt tagged ciphertext.
    ///
    /// Untagged values pass through. A payload that cannot be decrypted
    /// (wrong key, corruption) is returned still tagged.
    pub fn decrypt_field(&self, value: &Value) -> Value {
        if !Self::is_tagged(value) {
            return value.clone();
        }
        match self.try_decrypt(value) {
            Some(plain) => plain,
            None => {
                warn!("field decryption failed, returning ciphertext");
                value.clone()
            }
        }
    }

    fn try_decrypt(&self, value: &Value) -> Option<Value> {
        let payload = value.get(PAYLOAD_KEY)?.as_str()?;
        let bytes = hex::decode(payload).ok()?;
        if bytes.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        serde_json::from_slice(&plaintext).ok()
    }
}

/// Encrypt one value with `key`.
pub fn encrypt_field(value: &Value, key: &str) -> Result<Value, Error> {
    FieldCipher::new(key)?.encrypt_field(value)
}

/// Decrypt one value with `key`, passing through anything undecryptable.
pub fn decrypt_field(value: &Value, key: &str) -> Value {
    match FieldCipher::new(key) {
        Ok(cipher) => cipher.decrypt_field(value),
        Err(_) => value.clone(),
    }
}

/// Applies a table's encryption settings to whole rows.
pub struct RowCipher<'a> {
    cipher: Option<FieldCipher>,
    fields: &'a [String],
}

impl<'a> RowCipher<'a> {
    /// Build the row cipher for a table's options.
    pub fn for_table(options: &'a EncryptionOptions) -> Result<Self, Error> {
        let cipher = match (&options.key, options.fields.is_empty()) {
            (Some(key), false) => Some(FieldCipher::new(key)?),
            _ => None,
        };
        Ok(Self {
            cipher,
            fields: &options.fields,
        })
    }

    /// Whether this table stores any field encrypted.
    pub fn is_active(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt the configured fields of a row. Null values stay null.
    pub fn encrypt_row(&self, row: &Row) -> Result<Row, Error> {
        let Some(cipher) = &self.cipher else {
            return Ok(row.clone());
        };
        let mut out = row.clone();
        for field in self.fields {
            if let Some(value) = out.get_mut(field) {
                if !value.is_null() {
                    *value = cipher.encrypt_field(value)?;
                }
            }
        }
        Ok(out)
    }

    /// Decrypt the configured fields of a row.
    pub fn decrypt_row(&self, row: &Row) -> Row {
        let Some(cipher) = &self.cipher else {
            return row.clone();
        };
        let mut out = row.clone();
        for field in self.fields {
            if let Some(value) = out.get_mut(field) {
                *value = cipher.decrypt_field(value);
            }
        }
        out
    }

    /// Decrypt every row.
    pub fn decrypt_rows(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter().map(|r| self.decrypt_row(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_type() {
        let cipher = FieldCipher::new("secret").unwrap();
        for value in [
            json!("hello"),
            json!(42),
            json!(3.25),
            json!(true),
            json!({"nested": [1, 2]}),
            json!("123e4567-e89b-12d3-a456-426614174000"),
        ] {
            let tagged = cipher.encrypt_field(&value).unwrap();
            assert!(FieldCipher::is_tagged(&tagged));
            assert_ne!(tagged, value);
            assert_eq!(cipher.decrypt_field(&tagged), value);
        }
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = FieldCipher::new("secret").unwrap();
        let a = cipher.encrypt_field(&json!("same")).unwrap();
        let b = cipher.encrypt_field(&json!("same")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_returns_ciphertext() {
        let tagged = encrypt_field(&json!("hello"), "right").unwrap();
        let out = decrypt_field(&tagged, "wrong");
        assert_eq!(out, tagged);
        assert_ne!(out, json!("hello"));
    }

    #[test]
    fn test_plaintext_and_corrupt_payload_pass_through() {
        let cipher = FieldCipher::new("k").unwrap();
        assert_eq!(cipher.decrypt_field(&json!("plain")), json!("plain"));

        let corrupt = json!({"__encrypted": true, "payload": "zz"});
        assert_eq!(cipher.decrypt_field(&corrupt), corrupt);

        let short = json!({"__encrypted": true, "payload": "0011"});
        assert_eq!(cipher.decrypt_field(&short), short);
    }

    #[test]
    fn test_no_double_encryption() {
        let cipher = FieldCipher::new("k").unwrap();
        let once = cipher.encrypt_field(&json!(1)).unwrap();
        let twice = cipher.encrypt_field(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_row_cipher_touches_only_listed_fields() {
        let options = EncryptionOptions::new("k", ["ssn"]);
        let rows = RowCipher::for_table(&options).unwrap();
        let row = json!({"id": "1", "name": "a", "ssn": "123", "note": null})
            .as_object()
            .cloned()
            .unwrap();

        let stored = rows.encrypt_row(&row).unwrap();
        assert!(FieldCipher::is_tagged(&stored["ssn"]));
        assert_eq!(stored["name"], json!("a"));

        assert_eq!(rows.decrypt_row(&stored), row);
    }

    #[test]
    fn test_inactive_without_key() {
        let options = EncryptionOptions::default();
        let rows = RowCipher::for_table(&options).unwrap();
        assert!(!rows.is_active());
    }
}
