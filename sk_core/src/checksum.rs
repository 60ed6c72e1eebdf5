use crate::Error;

/// Expected digest of a downloaded package.
///
/// Manifests write hashes as `ALGO:hex`; a bare hex string is SHA-256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Sha256(String),
    Blake3(String),
}

impl Checksum {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let (algo, hex) = match s.split_once(':') {
            Some((algo, hex)) => (algo.to_ascii_uppercase(), hex),
            None => ("SHA256".to_string(), s),
        };

        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::format(format!("invalid checksum '{s}'")));
        }
        let hex = hex.to_ascii_lowercase();

        match algo.as_str() {
            "SHA256" => Ok(Checksum::Sha256(hex)),
            "BLAKE3" => Ok(Checksum::Blake3(hex)),
            other => Err(Error::format(format!("unsupported hash algorithm '{other}'"))),
        }
    }

    pub fn hex(&self) -> &str {
        match self {
            Checksum::Sha256(h) | Checksum::Blake3(h) => h,
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Checksum::Sha256(h) => write!(f, "SHA256:{h}"),
            Checksum::Blake3(h) => write!(f, "BLAKE3:{h}"),
        }
    }
}
