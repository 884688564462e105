//! Credential resolution and private key format detection.
//!
//! A key file is handed to each [`KeyDecoder`] in a fixed order (Ed25519,
//! ECDSA, RSA) and accepted by the first one that parses it. Only when every
//! decoder has rejected the file is [`CredentialError::UnloadableKey`]
//! returned.

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use sec1::der::SecretDocument;
use sec1::EcPrivateKey;
use ssh_key::{Algorithm, PrivateKey};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::RemoteTarget;
use crate::error::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Ed25519,
    Ecdsa,
    Rsa,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyKind::Ed25519 => "Ed25519",
            KeyKind::Ecdsa => "ECDSA",
            KeyKind::Rsa => "RSA",
        };
        f.write_str(name)
    }
}

/// The credential used to authenticate one session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    PrivateKey(PathBuf),
    Password(String),
}

impl Credential {
    /// Key material wins over a password when both are configured.
    pub fn resolve(target: &RemoteTarget) -> Result<Self, CredentialError> {
        if let Some(path) = target
            .private_key_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
        {
            return Ok(Credential::PrivateKey(path.clone()));
        }
        match target.password.as_deref() {
            Some(password) if !password.is_empty() => Ok(Credential::Password(password.to_string())),
            _ => Err(CredentialError::NoCredential),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// A key file that one of the decoders accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedKey {
    pub path: PathBuf,
    pub kind: KeyKind,
}

/// Recognises one private key type.
pub trait KeyDecoder: Send + Sync {
    fn kind(&self) -> KeyKind;

    /// Accept `contents` if it is an unencrypted key of this decoder's type.
    fn decode(&self, contents: &str) -> Result<(), String>;
}

pub struct Ed25519Decoder;
pub struct EcdsaDecoder;
pub struct RsaDecoder;

impl KeyDecoder for Ed25519Decoder {
    fn kind(&self) -> KeyKind {
        KeyKind::Ed25519
    }

    fn decode(&self, contents: &str) -> Result<(), String> {
        match pem_label(contents) {
            Some(OPENSSH_LABEL) => decode_openssh(contents, KeyKind::Ed25519),
            Some(other) => Err(format!("unsupported PEM block `{other}` for Ed25519")),
            None => Err("no PEM header found".to_string()),
        }
    }
}

impl KeyDecoder for EcdsaDecoder {
    fn kind(&self) -> KeyKind {
        KeyKind::Ecdsa
    }

    fn decode(&self, contents: &str) -> Result<(), String> {
        match pem_label(contents) {
            Some(OPENSSH_LABEL) => decode_openssh(contents, KeyKind::Ecdsa),
            Some(EC_LABEL) => decode_legacy_pem(contents).and_then(decode_sec1),
            Some(other) => Err(format!("unsupported PEM block `{other}` for ECDSA")),
            None => Err("no PEM header found".to_string()),
        }
    }
}

impl KeyDecoder for RsaDecoder {
    fn kind(&self) -> KeyKind {
        KeyKind::Rsa
    }

    fn decode(&self, contents: &str) -> Result<(), String> {
        match pem_label(contents) {
            Some(OPENSSH_LABEL) => decode_openssh(contents, KeyKind::Rsa),
            Some(RSA_LABEL) => decode_legacy_pem(contents).and_then(decode_pkcs1),
            Some(other) => Err(format!("unsupported PEM block `{other}` for RSA")),
            None => Err("no PEM header found".to_string()),
        }
    }
}

const OPENSSH_LABEL: &str = "OPENSSH PRIVATE KEY";
const EC_LABEL: &str = "EC PRIVATE KEY";
const RSA_LABEL: &str = "RSA PRIVATE KEY";

fn pem_label(contents: &str) -> Option<&str> {
    let first = contents.lines().map(str::trim).find(|l| !l.is_empty())?;
    first.strip_prefix("-----BEGIN ")?.strip_suffix("-----")
}

fn decode_openssh(contents: &str, expected: KeyKind) -> Result<(), String> {
    let key = PrivateKey::from_openssh(contents).map_err(|e| e.to_string())?;
    let found = match key.algorithm() {
        Algorithm::Ed25519 => Some(KeyKind::Ed25519),
        Algorithm::Ecdsa { .. } => Some(KeyKind::Ecdsa),
        Algorithm::Rsa { .. } => Some(KeyKind::Rsa),
        _ => None,
    };
    if found != Some(expected) {
        return Err(format!(
            "key algorithm is {}, not {expected}",
            key.algorithm().as_str()
        ));
    }
    if key.is_encrypted() {
        return Err("key is passphrase-protected".to_string());
    }
    Ok(())
}

/// Screens a legacy PEM block and hands back the text to decode.
fn decode_legacy_pem(contents: &str) -> Result<&str, String> {
    if contents.contains("Proc-Type: 4,ENCRYPTED") {
        return Err("key is passphrase-protected".to_string());
    }
    Ok(contents.trim())
}

/// SEC1 `EC PRIVATE KEY` body.
fn decode_sec1(pem: &str) -> Result<(), String> {
    let (label, document) = SecretDocument::from_pem(pem).map_err(|e| e.to_string())?;
    if label != EC_LABEL {
        return Err(format!("unexpected PEM label `{label}`"));
    }
    EcPrivateKey::try_from(document.as_bytes()).map_err(|e| e.to_string())?;
    Ok(())
}

/// PKCS#1 `RSA PRIVATE KEY` body.
fn decode_pkcs1(pem: &str) -> Result<(), String> {
    RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| e.to_string())?;
    Ok(())
}

/// Decoders in the order they are tried.
pub fn default_decoders() -> Vec<Box<dyn KeyDecoder>> {
    vec![
        Box::new(Ed25519Decoder),
        Box::new(EcdsaDecoder),
        Box::new(RsaDecoder),
    ]
}

pub fn load_private_key(path: &Path) -> Result<LoadedKey, CredentialError> {
    load_private_key_with(path, &default_decoders())
}

pub fn load_private_key_with(
    path: &Path,
    decoders: &[Box<dyn KeyDecoder>],
) -> Result<LoadedKey, CredentialError> {
    if !path.exists() {
        return Err(CredentialError::KeyFileMissing {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let contents = String::from_utf8_lossy(&bytes);

    let mut attempted = Vec::with_capacity(decoders.len());
    for decoder in decoders {
        let kind = decoder.kind();
        attempted.push(kind);
        match decoder.decode(&contents) {
            Ok(()) => {
                info!(key_path = %path.display(), key_kind = %kind, "Loaded private key");
                return Ok(LoadedKey {
                    path: path.to_path_buf(),
                    kind,
                });
            }
            Err(reason) => {
                debug!(key_path = %path.display(), key_kind = %kind, reason = %reason, "Key decoder rejected file");
            }
        }
    }

    Err(CredentialError::UnloadableKey {
        path: path.to_path_buf(),
        attempted,
    })
}
