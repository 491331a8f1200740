use anyhow::{anyhow, Context, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::exchange::Suite;
use crate::pke::curve::{Curve, CurveParams};
use crate::pke::dh::{DhGroup, DH_FRAME_LEN, DH_PRIVATE_BITS};

/// Optional settings file, TOML.
///
/// ```toml
/// host = "127.0.0.1"
/// output_dir = "."
///
/// [dh]
/// prime = "ffff..."     # hex, defaults to the 4096-bit MODP group
/// generator = 2
/// private_bits = 4096
/// frame_len = 8192
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub output_dir: PathBuf,
    pub dh: DhConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DhConfig {
    pub prime: Option<String>,
    pub generator: u32,
    pub private_bits: u64,
    pub frame_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            output_dir: PathBuf::from("."),
            dh: DhConfig::default(),
        }
    }
}

impl Default for DhConfig {
    fn default() -> Self {
        Self {
            prime: None,
            generator: 2,
            private_bits: DH_PRIVATE_BITS,
            frame_len: DH_FRAME_LEN,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn dh_group(&self) -> Result<DhGroup> {
        let group = match &self.dh.prime {
            Some(hex) => {
                let digits: String = hex
                    .trim()
                    .trim_start_matches("0x")
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                let p = BigUint::parse_bytes(digits.as_bytes(), 16)
                    .ok_or_else(|| anyhow!("dh prime is not a hex number"))?;
                DhGroup::new(p, BigUint::from(self.dh.generator))?
            }
            None if self.dh.generator == 2 => DhGroup::modp_4096(),
            None => DhGroup::new(
                DhGroup::modp_4096().p().clone(),
                BigUint::from(self.dh.generator),
            )?,
        };
        Ok(group
            .with_private_bits(self.dh.private_bits)?
            .with_frame_len(self.dh.frame_len)?)
    }

    /// ECDH always runs over secp256r1.
    pub fn suite(&self, ec: bool) -> Result<Suite> {
        if ec {
            Ok(Suite::Ecdh(Curve::new(CurveParams::secp256r1())))
        } else {
            Ok(Suite::Dh(self.dh_group()?))
        }
    }
}

#[test]
fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.dh_group().unwrap(), DhGroup::modp_4096());
}

#[test]
fn test_custom_dh_group() {
    let config = Config::parse(
        r#"
host = "localhost"
output_dir = "/tmp/out"

[dh]
prime = "0x17"
generator = 5
private_bits = 16
frame_len = 4
"#,
    )
    .unwrap();
    assert_eq!(config.host, "localhost");
    assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    let group = config.dh_group().unwrap();
    assert_eq!(group.p(), &BigUint::from(23u32));
    assert_eq!(group.g(), &BigUint::from(5u32));
    assert_eq!(group.private_bits(), 16);
    assert_eq!(group.frame_len(), 4);
}

#[test]
fn test_bad_dh_group() {
    let config = Config::parse("[dh]\nprime = \"15\"\n").unwrap();
    assert!(config.dh_group().is_err());
    let config = Config::parse("[dh]\nprime = \"xyz\"\n").unwrap();
    assert!(config.dh_group().is_err());
    assert!(Config::parse("host = 5").is_err());
}

#[test]
fn test_suite_selection() {
    let config = Config::default();
    assert!(matches!(config.suite(true).unwrap(), Suite::Ecdh(_)));
    assert!(matches!(config.suite(false).unwrap(), Suite::Dh(_)));
    assert_eq!(config.suite(true).unwrap().frame_len(), 65);
    assert_eq!(config.suite(false).unwrap().frame_len(), 8192);
}

#[test]
fn test_oversized_dh_settings() {
    let config = Config::parse("[dh]\nframe_len = 33554432\n").unwrap();
    assert!(config.dh_group().is_err());
    assert!(config.suite(false).is_err());
    let config = Config::parse("[dh]\nprivate_bits = 1099511627776\n").unwrap();
    assert!(config.dh_group().is_err());
}
