//! Packet protection primitives: X25519 agreement carried by CRYPTO frames
//! and the AES-256-GCM keys derived from it.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

/// Opaque AEAD failure. Counted by the connection; never reported on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AeadError;

/// One direction of packet protection: an AES-256-GCM key and the static IV
/// the packet number is folded into.
pub struct SealKey {
    cipher: Aes256Gcm,
    iv: [u8; 12],
}

impl SealKey {
    pub fn new(key: [u8; 32], iv: [u8; 12]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            iv,
        }
    }

    // Nonce is the IV XOR the big-endian full packet number.
    fn nonce(&self, packet_number: u64) -> [u8; 12] {
        let mut nonce = self.iv;
        let pn = packet_number.to_be_bytes();
        for (n, p) in nonce[4..].iter_mut().zip(pn) {
            *n ^= p;
        }
        nonce
    }

    /// Seals `plaintext`, authenticating `aad`, and returns ciphertext with
    /// the tag appended.
    pub fn seal(&self, packet_number: u64, aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let nonce = self.nonce(packet_number);
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .expect("AES-GCM encryption is infallible for in-range lengths")
    }

    pub fn open(
        &self,
        packet_number: u64,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        let nonce = self.nonce(packet_number);
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| AeadError)
    }
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealKey").finish_non_exhaustive()
    }
}

/// Both directions of a connection's packet protection.
#[derive(Debug)]
pub struct KeyPair {
    pub send: SealKey,
    pub recv: SealKey,
}

/// In-progress key agreement. Holds the local ephemeral secret until the
/// peer's CRYPTO frame arrives.
pub struct Handshake {
    secret: StaticSecret,
    pub random: [u8; 16],
    pub public: [u8; 32],
}

impl Handshake {
    pub fn new(rng: &mut dyn RngCore) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        let mut random = [0u8; 16];
        rng.fill_bytes(&mut random);
        let public = PublicKey::from(&secret).to_bytes();
        Self {
            secret,
            random,
            public,
        }
    }

    /// Completes the agreement against the peer's CRYPTO material and
    /// derives both traffic keys. The initiator sends on the "c" direction.
    pub fn derive(
        &self,
        peer_public: &[u8; 32],
        peer_random: &[u8; 16],
        is_initiator: bool,
    ) -> KeyPair {
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(*peer_public))
            .to_bytes();
        let (client_random, server_random) = if is_initiator {
            (&self.random, peer_random)
        } else {
            (peer_random, &self.random)
        };

        let client = direction_keys(&shared, client_random, server_random, b"c");
        let server = direction_keys(&shared, client_random, server_random, b"s");
        if is_initiator {
            KeyPair {
                send: client,
                recv: server,
            }
        } else {
            KeyPair {
                send: server,
                recv: client,
            }
        }
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("random", &self.random)
            .finish_non_exhaustive()
    }
}

fn direction_keys(
    shared: &[u8; 32],
    client_random: &[u8; 16],
    server_random: &[u8; 16],
    dir: &[u8],
) -> SealKey {
    let key = derive_material(shared, client_random, server_random, b"riptide key ", dir);
    let iv_full = derive_material(shared, client_random, server_random, b"riptide iv ", dir);
    let mut iv = [0u8; 12];
    iv.copy_from_slice(&iv_full[..12]);
    SealKey::new(key, iv)
}

fn derive_material(
    shared: &[u8; 32],
    client_random: &[u8; 16],
    server_random: &[u8; 16],
    label: &[u8],
    dir: &[u8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(client_random);
    hasher.update(server_random);
    hasher.update(label);
    hasher.update(dir);
    hasher.finalize().into()
}

/// Mints an opaque resumption token.
pub fn mint_session_token(rng: &mut dyn RngCore) -> [u8; 32] {
    let mut token = [0u8; 32];
    rng.fill_bytes(&mut token);
    token
}
