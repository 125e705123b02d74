//! Control-channel key agreement.
//!
//! ```text
//!  client                                     console
//!    │ Hello{version, regist_key, pub_c, n_c}   │
//!    │─────────────────────────────────────────▶│
//!    │        LoginPinRequired{incorrect}       │  (optional, repeatable)
//!    │◀─────────────────────────────────────────│
//!    │ LoginPin{pin}                            │
//!    │─────────────────────────────────────────▶│
//!    │   HelloAck{pub_s, n_s, confirm}          │
//!    │◀─────────────────────────────────────────│
//! ```
//!
//! Both sides compute `secret = KDF(X25519(pub), morning, n_c, n_s)`.
//! `morning` is the long-term secret from registration and never
//! travels on the wire; a console holding a different one produces a
//! `confirm` the client cannot reproduce.

use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::error::HandshakeFailure;
use crate::flags::InputFeatures;
use crate::keys::{KeyRole, KeySession};
use crate::message::{ControlMessage, RejectReason};

/// Protocol version announced in `Hello`.
pub const PROTOCOL_VERSION: u32 = 12;

const CTX_SESSION_SECRET: &str = "takion 2024-06 session secret";

// ── Credentials ──────────────────────────────────────────────────

/// Long-term credentials obtained at registration.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Identifies this client to the console.
    pub regist_key: Vec<u8>,
    /// Shared secret mixed into every session key.
    pub morning: [u8; 16],
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("regist_key", &format_args!("<{} bytes>", self.regist_key.len()))
            .field("morning", &"<redacted>")
            .finish()
    }
}

fn session_secret(
    shared: &[u8; 32],
    morning: &[u8; 16],
    client_nonce: &[u8; 16],
    console_nonce: &[u8; 16],
) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(CTX_SESSION_SECRET);
    hasher.update(shared);
    hasher.update(morning);
    hasher.update(client_nonce);
    hasher.update(console_nonce);
    Zeroizing::new(*hasher.finalize().as_bytes())
}

fn confirmation(secret: &[u8; 32], client_public: &[u8; 32], console_public: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_keyed(secret);
    hasher.update(b"confirm");
    hasher.update(client_public);
    hasher.update(console_public);
    *hasher.finalize().as_bytes()
}

fn random_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// ── ClientHandshake ──────────────────────────────────────────────

/// Client half of the key agreement. Consumed by [`finish`](Self::finish).
pub struct ClientHandshake {
    secret: EphemeralSecret,
    public: PublicKey,
    nonce: [u8; 16],
    credentials: Credentials,
    features: InputFeatures,
}

impl ClientHandshake {
    pub fn new(credentials: Credentials, features: InputFeatures) -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public,
            nonce: random_nonce(),
            credentials,
            features,
        }
    }

    pub fn hello(&self) -> ControlMessage {
        ControlMessage::Hello {
            version: PROTOCOL_VERSION,
            regist_key: self.credentials.regist_key.clone(),
            client_public: self.public.to_bytes(),
            client_nonce: self.nonce,
            features: self.features.bits(),
        }
    }

    /// Complete the agreement with the console's final reply.
    pub fn finish(self, reply: &ControlMessage) -> Result<KeySession, HandshakeFailure> {
        match reply {
            ControlMessage::HelloAck {
                console_public,
                console_nonce,
                confirm,
            } => {
                let shared = self.secret.diffie_hellman(&PublicKey::from(*console_public));
                let secret = session_secret(
                    shared.as_bytes(),
                    &self.credentials.morning,
                    &self.nonce,
                    console_nonce,
                );
                let expected = confirmation(&secret, self.public.as_bytes(), console_public);
                if !bool::from(expected.as_slice().ct_eq(confirm.as_slice())) {
                    return Err(HandshakeFailure::Credentials);
                }
                Ok(KeySession::new(*secret, KeyRole::Client))
            }
            ControlMessage::HelloReject { reason, version } => Err(match reason {
                RejectReason::Credentials => HandshakeFailure::Credentials,
                RejectReason::Version => HandshakeFailure::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: *version,
                },
                RejectReason::Busy => HandshakeFailure::Busy,
            }),
            _ => Err(HandshakeFailure::Protocol("unexpected handshake reply")),
        }
    }
}

// ── ConsoleHandshake ─────────────────────────────────────────────

/// What the console answers to a `Hello`.
pub struct ConsoleReply {
    pub message: ControlMessage,
    /// Present when the hello was accepted.
    pub keys: Option<KeySession>,
}

/// Console half of the key agreement, used by test consoles and tools.
#[derive(Debug, Clone)]
pub struct ConsoleHandshake {
    credentials: Credentials,
    version: u32,
}

impl ConsoleHandshake {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            version: PROTOCOL_VERSION,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn respond(&self, hello: &ControlMessage) -> Result<ConsoleReply, HandshakeFailure> {
        let ControlMessage::Hello {
            version,
            regist_key,
            client_public,
            client_nonce,
            ..
        } = hello
        else {
            return Err(HandshakeFailure::Protocol("expected hello"));
        };

        let reject = |reason| ConsoleReply {
            message: ControlMessage::HelloReject {
                reason,
                version: self.version,
            },
            keys: None,
        };
        if *version != self.version {
            return Ok(reject(RejectReason::Version));
        }
        if !bool::from(regist_key.as_slice().ct_eq(&self.credentials.regist_key)) {
            return Ok(reject(RejectReason::Credentials));
        }

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let console_public = PublicKey::from(&secret).to_bytes();
        let console_nonce = random_nonce();
        let shared = secret.diffie_hellman(&PublicKey::from(*client_public));
        let session = session_secret(
            shared.as_bytes(),
            &self.credentials.morning,
            client_nonce,
            &console_nonce,
        );
        let confirm = confirmation(&session, client_public, &console_public);

        Ok(ConsoleReply {
            message: ControlMessage::HelloAck {
                console_public,
                console_nonce,
                confirm,
            },
            keys: Some(KeySession::new(*session, KeyRole::Console)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(morning: u8) -> Credentials {
        Credentials {
            regist_key: b"regist-0001".to_vec(),
            morning: [morning; 16],
        }
    }

    #[test]
    fn agreement_produces_matching_keys() {
        let client = ClientHandshake::new(creds(1), InputFeatures::DUALSENSE);
        let console = ConsoleHandshake::new(creds(1));
        let reply = console.respond(&client.hello()).unwrap();
        let console_keys = reply.keys.unwrap();
        let client_keys = client.finish(&reply.message).unwrap();

        let (ct, tag) = client_keys.encrypt_and_tag(b"mic", 0, b"").unwrap();
        assert_eq!(console_keys.decrypt_and_verify(&ct, &tag, 0, b"").unwrap(), b"mic");
    }

    #[test]
    fn wrong_morning_is_credential_failure() {
        let client = ClientHandshake::new(creds(1), InputFeatures::empty());
        let reply = ConsoleHandshake::new(creds(2)).respond(&client.hello()).unwrap();
        assert_eq!(client.finish(&reply.message).unwrap_err(), HandshakeFailure::Credentials);
    }

    #[test]
    fn wrong_regist_key_is_rejected() {
        let client = ClientHandshake::new(
            Credentials {
                regist_key: b"other".to_vec(),
                morning: [1; 16],
            },
            InputFeatures::empty(),
        );
        let reply = ConsoleHandshake::new(creds(1)).respond(&client.hello()).unwrap();
        assert!(reply.keys.is_none());
        assert!(client.finish(&reply.message).unwrap_err().is_credential_problem());
    }

    #[test]
    fn version_mismatch_is_not_credential_problem() {
        let client = ClientHandshake::new(creds(1), InputFeatures::empty());
        let reply = ConsoleHandshake::new(creds(1))
            .with_version(9)
            .respond(&client.hello())
            .unwrap();
        let err = client.finish(&reply.message).unwrap_err();
        assert_eq!(
            err,
            HandshakeFailure::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: 9
            }
        );
        assert!(!err.is_credential_problem());
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let s = format!("{:?}", creds(0xAB));
        assert!(!s.contains("171"));
        assert!(s.contains("redacted"));
    }
}
