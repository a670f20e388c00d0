//! Client-side password encryption for identity providers that publish a
//! per-page salt.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use casgate_types::{PasswordEncoding, PasswordEncoder, PlainPassword, SsoError};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// Alphabet of the random prefix and IV; excludes look-alike characters.
const RANDOM_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTWXYZabcdefhijkmnprstwxyz2345678";
const PREFIX_LEN: usize = 64;
const IV_LEN: usize = 16;

/// AES-128-CBC with the page salt as key.
///
/// The plaintext is 64 random characters followed by the password, so a
/// server decrypting with any IV recovers the password intact after
/// dropping the prefix. PKCS7 padded, base64 encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaltedAesPassword;

impl PasswordEncoder for SaltedAesPassword {
    fn encode(&self, password: &str, salt: Option<&str>) -> Result<String, SsoError> {
        let Some(salt) = salt.map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(SsoError::invalid_input(
                "login page carries no password salt; cannot encrypt password",
            ));
        };

        let iv = random_string(IV_LEN);
        let cipher = Aes128CbcEnc::new_from_slices(salt.as_bytes(), iv.as_bytes()).map_err(|_| {
            SsoError::invalid_input("password salt must be 16 bytes")
                .with_detail("salt_len", salt.len().to_string())
        })?;

        let mut plaintext = random_string(PREFIX_LEN);
        plaintext.push_str(password);
        let encrypted = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(STANDARD.encode(encrypted))
    }
}

/// Encoder selected by the configured encoding.
#[must_use]
pub fn password_encoder(encoding: PasswordEncoding) -> Arc<dyn PasswordEncoder> {
    match encoding {
        PasswordEncoding::Plain => Arc::new(PlainPassword),
        PasswordEncoding::SaltedAes => Arc::new(SaltedAesPassword),
    }
}

fn random_string(len: usize) -> String {
    (0..len)
        .map(|_| char::from(RANDOM_CHARS[rand::random_range(0..RANDOM_CHARS.len())]))
        .collect()
}
