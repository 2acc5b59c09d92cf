use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};

/// Process-wide protected-session key. Set on login, cleared on logout.
///
/// A query captures whether a session is present at its start and uses that
/// captured value for its whole duration (spec §9, "Protected-session
/// lifecycle") -- callers should read [`ProtectedSession::snapshot`] once per
/// search call rather than re-checking `is_active` mid-evaluation.
#[derive(Default)]
pub struct ProtectedSession {
    key: RwLock<Option<[u8; 32]>>,
}

/// A captured key, valid for the lifetime of one search call.
#[derive(Clone, Copy)]
pub struct SessionKey([u8; 32]);

impl ProtectedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, passphrase: &[u8]) {
        let key = blake3::hash(passphrase);
        *self.key.write() = Some(*key.as_bytes());
    }

    /// Zeroizes the in-memory key. Callers are expected to follow this with
    /// a full cache rebuild (decrypted titles must not linger).
    pub fn logout(&self) {
        if let Some(mut key) = self.key.write().take() {
            key.iter_mut().for_each(|b| *b = 0);
        }
    }

    pub fn is_active(&self) -> bool {
        self.key.read().is_some()
    }

    pub fn snapshot(&self) -> Option<SessionKey> {
        self.key.read().map(SessionKey)
    }
}

/// Toy reversible envelope standing in for the host's real encryption layer.
/// The search engine only needs *some* keyed, deterministic transform here
/// so that protected-content invariants (never indexed, only decryptable
/// with an active session) are exercisable in tests; it is not a
/// cryptographic primitive and must never be used outside this crate's
/// protected-note emulation.
fn keystream(key: &SessionKey, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = blake3::Hasher::new_keyed(&key.0);
        hasher.update(&counter.to_le_bytes());
        out.extend_from_slice(hasher.finalize().as_bytes());
        counter += 1;
    }
    out.truncate(len);
    out
}

const TAG_LEN: usize = 8;

/// Encrypts `plaintext` into `[integrity tag][ciphertext]`. The tag lets
/// `decrypt` detect a wrong key (e.g. a stale session after key rotation)
/// instead of silently returning garbage bytes.
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
    let tag = blake3::keyed_hash(&key.0, plaintext);
    let ks = keystream(key, plaintext.len());
    let mut out = Vec::with_capacity(TAG_LEN + plaintext.len());
    out.extend_from_slice(&tag.as_bytes()[..TAG_LEN]);
    out.extend(plaintext.iter().zip(ks).map(|(b, k)| b ^ k));
    out
}

/// Decrypts an envelope produced by [`encrypt`]. Returns
/// [`CoreError::DecryptionFailed`] when the recovered plaintext does not
/// match the stored integrity tag, which callers (the protected-notes
/// fallback scan) treat as "skip this note, log it, keep going".
pub fn decrypt(key: &SessionKey, envelope: &[u8], note_id: &str) -> CoreResult<Vec<u8>> {
    if envelope.len() < TAG_LEN {
        return Err(CoreError::DecryptionFailed {
            note_id: note_id.to_string(),
            reason: "envelope shorter than integrity tag".to_string(),
        });
    }
    let (tag, ciphertext) = envelope.split_at(TAG_LEN);
    let ks = keystream(key, ciphertext.len());
    let plaintext: Vec<u8> = ciphertext.iter().zip(ks).map(|(b, k)| b ^ k).collect();

    let expected = blake3::keyed_hash(&key.0, &plaintext);
    if &expected.as_bytes()[..TAG_LEN] != tag {
        return Err(CoreError::DecryptionFailed {
            note_id: note_id.to_string(),
            reason: "integrity tag mismatch".to_string(),
        });
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let session = ProtectedSession::new();
        session.login(b"hunter2");
        let key = session.snapshot().unwrap();

        let plaintext = b"confidential note body";
        let ciphertext = encrypt(&key, plaintext);
        assert_ne!(ciphertext, plaintext);

        let decrypted = decrypt(&key, &ciphertext, "note1").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn logout_clears_key() {
        let session = ProtectedSession::new();
        session.login(b"hunter2");
        assert!(session.is_active());
        session.logout();
        assert!(!session.is_active());
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let a = ProtectedSession::new();
        a.login(b"key-a");
        let b = ProtectedSession::new();
        b.login(b"key-b");

        let ciphertext = encrypt(&a.snapshot().unwrap(), b"secret");
        let result = decrypt(&b.snapshot().unwrap(), &ciphertext, "note1");
        assert!(matches!(result, Err(CoreError::DecryptionFailed { .. })));
    }
}
