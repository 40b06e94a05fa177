//
// Random values
//
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use data_encoding::{BASE64URL_NOPAD, HEXLOWER};

pub fn get_random_bytes(len: usize) -> Vec<u8> {
    let mut array = vec![0u8; len];
    SystemRandom::new().fill(&mut array).expect("Error generating random values");

    array
}

/// Random url-safe string, used for `state`, `nonce` and session ids.
pub fn random_url_safe(len: usize) -> String {
    BASE64URL_NOPAD.encode(&get_random_bytes(len))
}

/// 32 random bytes, hex encoded. Used for CSRF tokens.
pub fn csrf_token() -> String {
    HEXLOWER.encode(&get_random_bytes(32))
}

//
// Digests
//
pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

//
// Constant time compare
//
pub fn ct_eq<T: AsRef<[u8]>, U: AsRef<[u8]>>(a: T, b: U) -> bool {
    use ring::constant_time::verify_slices_are_equal;

    verify_slices_are_equal(a.as_ref(), b.as_ref()).is_ok()
}

/// Compare a received CSRF token against the issued one without leaking
/// timing information.
pub fn verify_csrf(received: &str, issued: &str) -> bool {
    ct_eq(received.as_bytes(), issued.as_bytes())
}
