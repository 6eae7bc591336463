//! Field-level encryption.

mod cipher;

pub use cipher::{
    decrypt_field, encrypt_field, FieldCipher, RowCipher, ENCRYPTED_TAG, PAYLOAD_KEY,
};
