//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use serde::de;
use serde::{Deserialize, Deserializer};

// Runtime options, merged from the command line and the configuration file.
#[derive(Clone, Debug)]
pub struct Config {
    pub iface: String,
    pub dead: Duration,
    pub routes: Vec<RoutePrefix>,
    pub routers: Vec<Ipv4Addr>,
    pub notify: bool,
    pub up: bool,
    pub nojoin: bool,
    pub dry_run: bool,
    pub force: bool,
    pub noclean: bool,
}

// On-disk configuration file format.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(rename = "Dead", deserialize_with = "duration_de")]
    pub dead: Duration,
    #[serde(rename = "Routes")]
    pub routes: Vec<RoutePrefix>,
    #[serde(rename = "Routers")]
    pub routers: Vec<Ipv4Addr>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(serde_yaml::Error),
}

// Destination prefix in `<address>/<mask>` form, where the mask is either a
// CIDR bit length or a dotted-quad IPv4 mask. Dotted-quad masks must be
// contiguous. Prefixes are canonicalized to masked-address/CIDR form on
// parse, so equality and display are byte-stable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RoutePrefix(pub Ipv4Network);

#[derive(Debug, Eq, PartialEq)]
pub struct InvalidPrefixError(String);

#[derive(Debug, Eq, PartialEq)]
pub struct InvalidDurationError(String);

// ===== impl ConfigFile =====

impl ConfigFile {
    pub const DFLT_FILEPATH: &'static str = "/etc/nrd.yml";

    pub fn load(path: &str) -> Result<ConfigFile, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        serde_yaml::from_str(&data).map_err(ConfigError::Parse)
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(error) => {
                write!(f, "failed to read configuration file: {error}")
            }
            ConfigError::Parse(error) => {
                write!(f, "failed to parse configuration file: {error}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== impl RoutePrefix =====

impl FromStr for RoutePrefix {
    type Err = InvalidPrefixError;

    fn from_str(s: &str) -> Result<RoutePrefix, InvalidPrefixError> {
        let err = || InvalidPrefixError(s.to_owned());

        let (addr, mask) = s.split_once('/').ok_or_else(err)?;
        let addr = addr.parse::<Ipv4Addr>().map_err(|_| err())?;

        let prefix = if mask.contains('.') {
            let mask = mask.parse::<Ipv4Addr>().map_err(|_| err())?;
            let bits = u32::from(mask);
            if bits.count_ones() != bits.leading_ones() {
                return Err(err());
            }
            bits.count_ones() as u8
        } else {
            let prefix = mask.parse::<u8>().map_err(|_| err())?;
            if prefix > 32 {
                return Err(err());
            }
            prefix
        };

        let network = Ipv4Network::new(addr, prefix).map_err(|_| err())?;
        let canonical =
            Ipv4Network::new(network.network(), prefix).map_err(|_| err())?;
        Ok(RoutePrefix(canonical))
    }
}

impl std::fmt::Display for RoutePrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for RoutePrefix {
    fn deserialize<D>(deserializer: D) -> Result<RoutePrefix, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ===== impl InvalidPrefixError =====

impl std::fmt::Display for InvalidPrefixError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid prefix: {}", self.0)
    }
}

impl std::error::Error for InvalidPrefixError {}

// ===== impl InvalidDurationError =====

impl std::fmt::Display for InvalidDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid duration: {}", self.0)
    }
}

impl std::error::Error for InvalidDurationError {}

// ===== helper functions =====

// Parses Go-style duration strings: one or more `<integer><unit>` groups
// where the unit is "h", "m", "s" or "ms" (e.g. "40s", "1m30s", "500ms").
fn parse_duration(s: &str) -> Result<Duration, InvalidDurationError> {
    let err = || InvalidDurationError(s.to_owned());

    if s.is_empty() {
        return Err(err());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end =
            rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(err)?;
        if digits_end == 0 {
            return Err(err());
        }
        let value =
            rest[..digits_end].parse::<u64>().map_err(|_| err())?;
        rest = &rest[digits_end..];

        // "ms" has to be matched before "m".
        let (unit_len, unit_ms) = if rest.starts_with("ms") {
            (2, 1)
        } else if rest.starts_with('s') {
            (1, 1000)
        } else if rest.starts_with('m') {
            (1, 60 * 1000)
        } else if rest.starts_with('h') {
            (1, 3600 * 1000)
        } else {
            return Err(err());
        };
        rest = &rest[unit_len..];

        total += Duration::from_millis(value.saturating_mul(unit_ms));
    }

    Ok(total)
}

fn duration_de<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix_cidr() {
        let prefix = "10.0.0.0/24".parse::<RoutePrefix>().unwrap();
        assert_eq!(prefix.to_string(), "10.0.0.0/24");
        assert_eq!(prefix.0.prefix(), 24);
    }

    #[test]
    fn test_parse_prefix_dotted_mask() {
        let prefix =
            "192.168.1.0/255.255.255.0".parse::<RoutePrefix>().unwrap();
        assert_eq!(prefix.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_parse_prefix_canonicalizes_host_bits() {
        let prefix = "10.0.0.5/24".parse::<RoutePrefix>().unwrap();
        assert_eq!(prefix.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn test_parse_prefix_zero_mask() {
        let prefix = "0.0.0.0/0".parse::<RoutePrefix>().unwrap();
        assert_eq!(prefix.to_string(), "0.0.0.0/0");
        let prefix = "0.0.0.0/0.0.0.0".parse::<RoutePrefix>().unwrap();
        assert_eq!(prefix.to_string(), "0.0.0.0/0");
    }

    #[test]
    fn test_parse_prefix_errors() {
        assert!("10.0.0.0".parse::<RoutePrefix>().is_err());
        assert!("10.0.0.0/33".parse::<RoutePrefix>().is_err());
        assert!("10.0.0.0/255.0.255.0".parse::<RoutePrefix>().is_err());
        assert!("10.0.0.0/255.255".parse::<RoutePrefix>().is_err());
        assert!("10.0.0/24".parse::<RoutePrefix>().is_err());
        assert!("abc/24".parse::<RoutePrefix>().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("40s"), Ok(Duration::from_secs(40)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(
            parse_duration("1h30m10s"),
            Ok(Duration::from_secs(5410))
        );
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("10s5").is_err());
    }

    #[test]
    fn test_parse_config_file() {
        let config = "Dead: 40s\n\
                      Routes:\n\
                      - 10.0.0.0/24\n\
                      - 192.168.1.0/255.255.255.0\n\
                      Routers:\n\
                      - 10.1.1.1\n\
                      - 10.1.1.2\n";
        let config: ConfigFile = serde_yaml::from_str(config).unwrap();
        assert_eq!(config.dead, Duration::from_secs(40));
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].to_string(), "192.168.1.0/24");
        assert_eq!(config.routers, vec![
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(10, 1, 1, 2)
        ]);
    }

    #[test]
    fn test_parse_config_file_rejects_bad_prefix() {
        let config = "Dead: 40s\n\
                      Routes:\n\
                      - 10.0.0.0-24\n\
                      Routers: []\n";
        assert!(serde_yaml::from_str::<ConfigFile>(config).is_err());
    }
}
