use subtle::ConstantTimeEq;

/// Bytes of entropy in every issued token.
pub const TOKEN_BYTES: usize = 32;

/// A fresh 256-bit random token, hex encoded.
pub fn random_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    hex::encode(bytes)
}

/// Constant-time token equality. Empty or length-mismatched inputs fail closed.
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    if expected.is_empty() || presented.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
