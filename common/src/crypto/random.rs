/// Cryptographically secure random byte generation.
///
/// All identifier and handle generation MUST use OsRng, not thread_rng():
/// external handles double as unguessable references and their entropy
/// comes straight from the operating system CSPRNG.
use rand::rngs::OsRng;
use rand::RngCore;

/// Generate cryptographically secure random bytes
pub fn secure_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
