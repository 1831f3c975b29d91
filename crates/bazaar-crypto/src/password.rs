use anyhow::{Result, anyhow};
use argon2::{Algorithm, Argon2, Params, Version};
use subtle::ConstantTimeEq;

/// Memory cost in KiB (19 MiB), iterations, lanes. Fixed for every stored hash:
/// the encoding does not record them, so changing them invalidates existing rows.
const MEMORY_KIB: u32 = 19 * 1024;
const ITERATIONS: u32 = 2;
const LANES: u32 = 1;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 64;

fn kdf() -> Result<Argon2<'static>> {
    let params = Params::new(MEMORY_KIB, ITERATIONS, LANES, Some(KEY_LEN))
        .map_err(|e| anyhow!("Invalid Argon2 params: {}", e))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    kdf()?
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
    Ok(key)
}

/// Hash a password with a fresh random salt.
///
/// Output is `hex(derived_key).hex(salt)`.
pub fn hash_password(password: &str) -> Result<String> {
    let salt: [u8; SALT_LEN] = rand::random();
    let key = derive(password, &salt)?;
    Ok(format!("{}.{}", hex::encode(key), hex::encode(salt)))
}

/// Check a password against a stored `hash_password` string.
///
/// Never errors: a malformed stored value is simply a mismatch.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((key_hex, salt_hex)) = stored.split_once('.') else {
        return false;
    };
    let (Ok(expected), Ok(salt)) = (hex::decode(key_hex), hex::decode(salt_hex)) else {
        return false;
    };
    if expected.is_empty() || salt.is_empty() {
        return false;
    }

    match derive(password, &salt) {
        Ok(supplied) => supplied.as_slice().ct_eq(expected.as_slice()).into(),
        Err(_) => false,
    }
}
