//! Per-packet encryption and authentication keyed by key position.
//!
//! ```text
//!   session secret ──derive(epoch)──▶ ┌ send cipher key ┐  ChaCha20, nonce = epoch
//!                                     ├ send mac key    ┤  BLAKE3 keyed, 4-byte tag
//!                                     ├ recv cipher key ┤
//!                                     └ recv mac key    ┘
//! ```
//!
//! The key position is the byte offset into the epoch's keystream. Each
//! sealed packet reserves `payload.len()` positions, so no keystream byte
//! is reused within an epoch. When the 32-bit position would overflow,
//! sealing fails with [`TakionError::KeyPositionExhausted`] and the
//! session rotates to the next epoch. Rotation only happens on request.

use std::sync::{Mutex, RwLock};

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::TakionError;
use crate::packet::PacketLayout;

pub const TAG_LEN: usize = 4;

/// Which side of the connection owns this key session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Client,
    Console,
}

const CTX_C2S_CIPHER: &str = "takion 2024-06 client-to-console cipher";
const CTX_C2S_MAC: &str = "takion 2024-06 client-to-console mac";
const CTX_S2C_CIPHER: &str = "takion 2024-06 console-to-client cipher";
const CTX_S2C_MAC: &str = "takion 2024-06 console-to-client mac";

// ── DirectionKeys ────────────────────────────────────────────────

#[derive(Zeroize, ZeroizeOnDrop)]
struct DirectionKeys {
    cipher: [u8; 32],
    mac: [u8; 32],
}

impl DirectionKeys {
    fn derive(secret: &[u8; 32], epoch: u32, cipher_ctx: &str, mac_ctx: &str) -> Self {
        let mut material = Zeroizing::new([0u8; 36]);
        material[..32].copy_from_slice(secret);
        material[32..].copy_from_slice(&epoch.to_be_bytes());
        Self {
            cipher: blake3::derive_key(cipher_ctx, material.as_slice()),
            mac: blake3::derive_key(mac_ctx, material.as_slice()),
        }
    }

    fn apply_keystream(&self, epoch: u32, key_pos: u32, data: &mut [u8]) {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&epoch.to_be_bytes());
        let mut cipher = ChaCha20::new((&self.cipher).into(), (&nonce).into());
        cipher.seek(u64::from(key_pos));
        cipher.apply_keystream(data);
    }

    fn tag(&self, key_pos: u32, aad: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = blake3::Hasher::new_keyed(&self.mac);
        hasher.update(&key_pos.to_be_bytes());
        hasher.update(aad);
        hasher.update(ciphertext);
        let hash = hasher.finalize();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&hash.as_bytes()[..TAG_LEN]);
        tag
    }
}

struct EpochKeys {
    epoch: u32,
    send: DirectionKeys,
    recv: DirectionKeys,
}

impl EpochKeys {
    fn derive(secret: &[u8; 32], role: KeyRole, epoch: u32) -> Self {
        let c2s = DirectionKeys::derive(secret, epoch, CTX_C2S_CIPHER, CTX_C2S_MAC);
        let s2c = DirectionKeys::derive(secret, epoch, CTX_S2C_CIPHER, CTX_S2C_MAC);
        let (send, recv) = match role {
            KeyRole::Client => (c2s, s2c),
            KeyRole::Console => (s2c, c2s),
        };
        Self { epoch, send, recv }
    }

    fn open(&self, key_pos: u32, aad: &[u8], data: &mut [u8], tag: &[u8; TAG_LEN]) -> bool {
        let expected = self.recv.tag(key_pos, aad, data);
        if !bool::from(expected.as_slice().ct_eq(tag.as_slice())) {
            return false;
        }
        self.recv.apply_keystream(self.epoch, key_pos, data);
        true
    }
}

struct KeyMaterial {
    current: EpochKeys,
    /// Kept after a rotation so packets in flight still open.
    previous: Option<EpochKeys>,
}

// ── KeySession ───────────────────────────────────────────────────

pub struct KeySession {
    secret: Zeroizing<[u8; 32]>,
    role: KeyRole,
    material: RwLock<KeyMaterial>,
    /// Next unused send position in the current epoch.
    local_pos: Mutex<u32>,
    limit: u32,
}

impl KeySession {
    pub fn new(secret: [u8; 32], role: KeyRole) -> Self {
        let secret = Zeroizing::new(secret);
        let current = EpochKeys::derive(&secret, role, 0);
        Self {
            secret,
            role,
            material: RwLock::new(KeyMaterial {
                current,
                previous: None,
            }),
            local_pos: Mutex::new(0),
            limit: u32::MAX,
        }
    }

    /// Lower the highest usable key position, so exhaustion can be
    /// reached without sending gigabytes.
    pub fn with_position_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn role(&self) -> KeyRole {
        self.role
    }

    /// Next key position a send would use.
    pub fn current_key_position(&self) -> u32 {
        self.local_pos.lock().map(|p| *p).unwrap_or(u32::MAX)
    }

    pub fn epoch(&self) -> u32 {
        self.material
            .read()
            .map(|m| m.current.epoch)
            .unwrap_or(u32::MAX)
    }

    /// Claim `len` keystream bytes, returning the first position.
    pub fn reserve_key_position(&self, len: usize) -> Result<u32, TakionError> {
        let mut pos = self
            .local_pos
            .lock()
            .map_err(|_| TakionError::InvalidState("key position lock poisoned"))?;
        let len = u32::try_from(len).map_err(|_| TakionError::KeyPositionExhausted)?;
        let next = pos
            .checked_add(len)
            .filter(|next| *next <= self.limit)
            .ok_or(TakionError::KeyPositionExhausted)?;
        let start = *pos;
        *pos = next;
        Ok(start)
    }

    /// Encrypt `plaintext` at `key_pos` and compute its tag over
    /// `aad` and the ciphertext.
    pub fn encrypt_and_tag(
        &self,
        plaintext: &[u8],
        key_pos: u32,
        aad: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), TakionError> {
        let material = self.read()?;
        let keys = &material.current;
        let mut data = plaintext.to_vec();
        keys.send.apply_keystream(keys.epoch, key_pos, &mut data);
        let tag = keys.send.tag(key_pos, aad, &data);
        Ok((data, tag))
    }

    /// Verify `tag` and decrypt. Nothing is decrypted unless the tag matches.
    pub fn decrypt_and_verify(
        &self,
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
        key_pos: u32,
        aad: &[u8],
    ) -> Result<Vec<u8>, TakionError> {
        let material = self.read()?;
        let mut data = ciphertext.to_vec();
        if material.current.open(key_pos, aad, &mut data, tag) {
            return Ok(data);
        }
        if let Some(previous) = &material.previous {
            if previous.open(key_pos, aad, &mut data, tag) {
                return Ok(data);
            }
        }
        Err(TakionError::AuthFailure { key_pos })
    }

    /// Seal a framed packet in place: reserve a key position, write it,
    /// encrypt the payload and write the tag. Returns the key position.
    pub fn seal(&self, packet: &mut [u8], layout: &PacketLayout) -> Result<u32, TakionError> {
        check_layout(packet, layout)?;
        // Held across reserve + encrypt so a rotation cannot interleave.
        let material = self.read()?;
        let keys = &material.current;

        let key_pos = self.reserve_key_position(packet.len() - layout.header_len)?;
        packet[layout.key_pos_offset..layout.key_pos_offset + 4]
            .copy_from_slice(&key_pos.to_be_bytes());
        packet[layout.tag_offset..layout.tag_offset + TAG_LEN].fill(0);

        let (header, payload) = packet.split_at_mut(layout.header_len);
        keys.send.apply_keystream(keys.epoch, key_pos, payload);
        let tag = keys.send.tag(key_pos, header, payload);
        header[layout.tag_offset..layout.tag_offset + TAG_LEN].copy_from_slice(&tag);
        Ok(key_pos)
    }

    /// Verify and decrypt a sealed packet. Returns the plaintext packet
    /// with the header unchanged.
    pub fn open(&self, packet: &[u8], layout: &PacketLayout) -> Result<Vec<u8>, TakionError> {
        check_layout(packet, layout)?;
        let off = layout.key_pos_offset;
        let key_pos = u32::from_be_bytes([packet[off], packet[off + 1], packet[off + 2], packet[off + 3]]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&packet[layout.tag_offset..layout.tag_offset + TAG_LEN]);

        let mut aad = packet[..layout.header_len].to_vec();
        aad[layout.tag_offset..layout.tag_offset + TAG_LEN].fill(0);

        let plaintext =
            self.decrypt_and_verify(&packet[layout.header_len..], &tag, key_pos, &aad)?;
        let mut out = packet[..layout.header_len].to_vec();
        out.extend_from_slice(&plaintext);
        Ok(out)
    }

    /// Switch to `epoch`. The send position restarts at zero; the previous
    /// epoch stays valid for receiving until the next rotation.
    pub fn rotate(&self, epoch: u32) -> Result<(), TakionError> {
        let mut material = self
            .material
            .write()
            .map_err(|_| TakionError::InvalidState("key material lock poisoned"))?;
        if epoch <= material.current.epoch {
            return Err(TakionError::InvalidState("rekey epoch is not newer"));
        }
        let next = EpochKeys::derive(&self.secret, self.role, epoch);
        let old = std::mem::replace(&mut material.current, next);
        material.previous = Some(old);

        let mut pos = self
            .local_pos
            .lock()
            .map_err(|_| TakionError::InvalidState("key position lock poisoned"))?;
        *pos = 0;
        debug!(epoch, role = ?self.role, "key session rotated");
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, KeyMaterial>, TakionError> {
        self.material
            .read()
            .map_err(|_| TakionError::InvalidState("key material lock poisoned"))
    }
}

impl std::fmt::Debug for KeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySession")
            .field("role", &self.role)
            .field("epoch", &self.epoch())
            .field("key_pos", &self.current_key_position())
            .finish_non_exhaustive()
    }
}

fn check_layout(packet: &[u8], layout: &PacketLayout) -> Result<(), TakionError> {
    let fields_end = (layout.tag_offset + TAG_LEN).max(layout.key_pos_offset + 4);
    if packet.len() < layout.header_len || layout.header_len < fields_end {
        return Err(TakionError::MalformedPacket("packet shorter than its sealed header"));
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
