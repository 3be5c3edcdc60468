//! Per-segment envelope encryption: a fresh AES-256 key encrypted with
//! textbook (unpadded) RSA-2048, a 16-byte IV, and a 32 KiB XOR key blob
//! encrypted under that AES key with AES-256-CBC. Once the envelope has been
//! written, payload bytes are XORed in place with the (now known) plaintext
//! blob, indexed by their offset modulo 32 KiB.

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

/// Length, in bytes, of an RSA-2048 modulus and of the ciphertext it produces.
pub const RSA_CIPHERTEXT_LEN: usize = 256;
/// Length of the AES-CBC initialization vector.
pub const IV_LEN: usize = 16;
/// Length of the XOR key blob, and the period of the XOR stream.
pub const XOR_BLOB_LEN: usize = 32 * 1024;
/// Length of the AES-256 key.
const AES_KEY_LEN: usize = 32;

/// Errors that can occur during segment envelope encryption or decryption.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to parse OpenSSH public key: {0}")]
    PublicKey(#[source] ssh_key::Error),
    #[error("failed to parse RSA private key")]
    PrivateKey,
    #[error("RSA modulus is not {RSA_CIPHERTEXT_LEN} bytes (not a 2048-bit key)")]
    UnsupportedKeySize,
    #[error("segment envelope is shorter than the fixed header it must carry")]
    Truncated,
}

/// Parses an OpenSSH-format `ssh-rsa AAAA...` public key line.
pub fn parse_public_key(openssh_line: &str) -> Result<RsaPublicKey, Error> {
    let key = ssh_key::PublicKey::from_openssh(openssh_line).map_err(Error::PublicKey)?;
    let rsa = key.key_data().rsa().ok_or(Error::PublicKey(ssh_key::Error::AlgorithmUnknown))?;
    let n = BigUint::from_bytes_be(rsa.n.as_bytes());
    let e = BigUint::from_bytes_be(rsa.e.as_bytes());
    RsaPublicKey::new(n, e).map_err(|_| Error::UnsupportedKeySize)
}

/// Parses a PKCS#8 PEM-encoded RSA private key, used on the decoding side.
pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey, Error> {
    use rsa::pkcs8::DecodePrivateKey;
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| Error::PrivateKey)
}

/// Raw (unpadded) RSA encryption: `ciphertext = plaintext^e mod n`, fixed to
/// the modulus byte length.
fn rsa_encrypt_raw(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let modulus_len = (key.n().bits() + 7) / 8;
    if modulus_len != RSA_CIPHERTEXT_LEN {
        return Err(Error::UnsupportedKeySize);
    }
    let m = BigUint::from_bytes_be(plaintext);
    let c = m.modpow(key.e(), key.n());
    Ok(fixed_width_be(&c, RSA_CIPHERTEXT_LEN))
}

/// The inverse of [`rsa_encrypt_raw`].
fn rsa_decrypt_raw(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let modulus_len = (key.n().bits() + 7) / 8;
    if modulus_len != RSA_CIPHERTEXT_LEN || ciphertext.len() != RSA_CIPHERTEXT_LEN {
        return Err(Error::UnsupportedKeySize);
    }
    let c = BigUint::from_bytes_be(ciphertext);
    let m = c.modpow(key.d(), key.n());
    Ok(m.to_bytes_be())
}

fn fixed_width_be(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; len];
    let start = len - bytes.len().min(len);
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(len)..]);
    out
}

/// A freshly generated segment envelope: the RSA-encrypted AES key, the IV,
/// the AES-CBC-encrypted XOR blob, and the plaintext XOR blob used for
/// subsequent payload streaming.
pub(crate) struct Envelope {
    pub(crate) header: Vec<u8>,
    pub(crate) xor_blob: Vec<u8>,
}

/// Builds a new envelope for a segment, to be written verbatim after the
/// segment head.
pub(crate) fn seal(public_key: &RsaPublicKey) -> Result<Envelope, Error> {
    let mut aes_key = [0u8; AES_KEY_LEN];
    OsRng.fill_bytes(&mut aes_key);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut xor_blob = vec![0u8; XOR_BLOB_LEN];
    OsRng.fill_bytes(&mut xor_blob);

    let rsa_ct = rsa_encrypt_raw(public_key, &aes_key)?;

    let mut cbc_input = xor_blob.clone();
    let encryptor = cbc::Encryptor::<Aes256>::new(&aes_key.into(), &iv.into());
    // PKCS#7 padding is unnecessary since the blob length is already a
    // multiple of the AES block size.
    debug_assert_eq!(cbc_input.len() % 16, 0);
    for block in cbc_input.chunks_mut(16) {
        let block: &mut [u8; 16] = block.try_into().unwrap();
        encryptor.clone().encrypt_block_mut(block.into());
    }

    let mut header = Vec::with_capacity(RSA_CIPHERTEXT_LEN + IV_LEN + XOR_BLOB_LEN);
    header.extend_from_slice(&rsa_ct);
    header.extend_from_slice(&iv);
    header.extend_from_slice(&cbc_input);

    Ok(Envelope { header, xor_blob })
}

/// Recovers the plaintext XOR blob from a previously sealed envelope, given
/// the RSA private key.
pub(crate) fn unseal(private_key: &RsaPrivateKey, header: &[u8]) -> Result<Vec<u8>, Error> {
    if header.len() < RSA_CIPHERTEXT_LEN + IV_LEN + XOR_BLOB_LEN {
        return Err(Error::Truncated);
    }
    let rsa_ct = &header[..RSA_CIPHERTEXT_LEN];
    let iv = &header[RSA_CIPHERTEXT_LEN..RSA_CIPHERTEXT_LEN + IV_LEN];
    let cbc_ct = &header[RSA_CIPHERTEXT_LEN + IV_LEN..RSA_CIPHERTEXT_LEN + IV_LEN + XOR_BLOB_LEN];

    let aes_key = rsa_decrypt_raw(private_key, rsa_ct)?;
    let aes_key: [u8; AES_KEY_LEN] =
        aes_key[aes_key.len().saturating_sub(AES_KEY_LEN)..].try_into().unwrap_or([0; 32]);

    let mut plaintext = cbc_ct.to_vec();
    let decryptor = cbc::Decryptor::<Aes256>::new(&aes_key.into(), iv.try_into().unwrap());
    for block in plaintext.chunks_mut(16) {
        let block: &mut [u8; 16] = block.try_into().unwrap();
        decryptor.clone().decrypt_block_mut(block.into());
    }

    Ok(plaintext)
}

/// XORs `data` in place against the (cyclic) key blob, treating `data[0]`
/// as lying at `file_offset` within the overall payload stream.
///
/// An 8-byte-aligned fast path XORs whole `u64` words when both the offset
/// and the remaining run fall on an 8-byte boundary; a scalar loop handles
/// the unaligned head and tail.
pub(crate) fn xor_stream(data: &mut [u8], file_offset: usize, blob: &[u8]) {
    debug_assert_eq!(blob.len(), XOR_BLOB_LEN);
    let mut i = 0;
    while i < data.len() {
        let blob_pos = (file_offset + i) % XOR_BLOB_LEN;

        let remaining_in_blob = XOR_BLOB_LEN - blob_pos;
        let aligned =
            blob_pos % 8 == 0 && i % 8 == 0 && data.len() - i >= 8 && remaining_in_blob >= 8;

        if aligned {
            let data_word = u64::from_ne_bytes(data[i..i + 8].try_into().unwrap());
            let blob_word = u64::from_ne_bytes(blob[blob_pos..blob_pos + 8].try_into().unwrap());
            data[i..i + 8].copy_from_slice(&(data_word ^ blob_word).to_ne_bytes());
            i += 8;
        } else {
            data[i] ^= blob[blob_pos];
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use rsa::traits::PublicKeyParts;

    use super::*;

    fn test_key_pair() -> (RsaPublicKey, RsaPrivateKey) {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).expect("key generation");
        let public = RsaPublicKey::from(&private);
        (public, private)
    }

    #[test]
    fn test_raw_rsa_roundtrip() {
        let (public, private) = test_key_pair();
        let plaintext = [7u8; 32];
        let ct = rsa_encrypt_raw(&public, &plaintext).unwrap();
        assert_eq!(ct.len(), RSA_CIPHERTEXT_LEN);
        let pt = rsa_decrypt_raw(&private, &ct).unwrap();
        assert_eq!(&pt[pt.len() - 32..], &plaintext);
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let (public, private) = test_key_pair();
        let envelope = seal(&public).unwrap();
        let recovered = unseal(&private, &envelope.header).unwrap();
        assert_eq!(recovered, envelope.xor_blob);
    }

    #[test]
    fn test_xor_stream_roundtrip() {
        let mut blob = vec![0u8; XOR_BLOB_LEN];
        OsRng.fill_bytes(&mut blob);

        let original = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut data = original.clone();
        xor_stream(&mut data, 12345, &blob);
        assert_ne!(data, original);
        xor_stream(&mut data, 12345, &blob);
        assert_eq!(data, original);
    }

    #[test]
    fn test_xor_stream_wraps_at_blob_boundary() {
        let mut blob = vec![0u8; XOR_BLOB_LEN];
        OsRng.fill_bytes(&mut blob);

        let mut data = vec![1u8; 64];
        xor_stream(&mut data, XOR_BLOB_LEN - 32, &blob);

        let mut expected = vec![1u8; 64];
        for (i, byte) in expected.iter_mut().enumerate() {
            *byte ^= blob[(XOR_BLOB_LEN - 32 + i) % XOR_BLOB_LEN];
        }
        assert_eq!(data, expected);
    }
}
