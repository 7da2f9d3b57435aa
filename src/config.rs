//! Connection settings for the remote device.
//!
//! Read from `config.json` (the layout of `config.example.json`) or from a
//! TOML file with the same keys, picked by file extension.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detail::{DetailTokenizer, DEFAULT_BREAK_TOKENS};
use crate::error::{RIPTError, RIPTResult};

const MISSING_CONFIG: &str =
  "Missing config file. Copy config.example.json and update it with the remote device credentials.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SSHConfig {
  pub host: String,
  pub username: String,
  #[serde(default)]
  pub password: Option<String>,
  #[serde(default = "default_port")]
  pub port: u16,
  /// Private key passed to `ssh -i`.
  #[serde(default)]
  pub key_filename: Option<String>,
  /// Connect timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout: u64,
  #[serde(default = "default_list_command")]
  pub list_command: String,
  /// Prefix of every mutation, e.g. `sudo iptables` or `ip6tables`.
  #[serde(default = "default_iptables_command")]
  pub iptables_command: String,
  #[serde(default = "default_break_tokens")]
  pub break_tokens: Vec<String>,
}

fn default_port() -> u16 {
  22
}

fn default_timeout() -> u64 {
  10
}

fn default_list_command() -> String {
  "iptables -L -n --line-numbers".to_string()
}

fn default_iptables_command() -> String {
  "iptables".to_string()
}

fn default_break_tokens() -> Vec<String> {
  DEFAULT_BREAK_TOKENS.iter().map(|item| item.to_string()).collect()
}

impl SSHConfig {
  pub fn new<S: Into<String>>(host: S, username: S) -> SSHConfig {
    SSHConfig {
      host: host.into(),
      username: username.into(),
      password: None,
      port: default_port(),
      key_filename: None,
      timeout: default_timeout(),
      list_command: default_list_command(),
      iptables_command: default_iptables_command(),
      break_tokens: default_break_tokens(),
    }
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> RIPTResult<SSHConfig> {
    let path = path.as_ref();
    if !path.exists() {
      return Err(self::config_error(path, MISSING_CONFIG));
    }
    let text = fs::read_to_string(path).map_err(|err| self::config_error(path, err))?;

    let is_json = path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
      SSHConfig::from_json_str(&text)
    } else {
      SSHConfig::from_toml_str(&text)
    };
    config.map_err(|err| match err {
      RIPTError::Invalid(message) => self::config_error(path, message),
      other => other,
    })
  }

  pub fn from_json_str(text: &str) -> RIPTResult<SSHConfig> {
    let config: SSHConfig = serde_json::from_str(text).map_err(|err| RIPTError::Invalid(err.to_string()))?;
    config.validate()
  }

  pub fn from_toml_str(text: &str) -> RIPTResult<SSHConfig> {
    let config: SSHConfig = toml::from_str(text).map_err(|err| RIPTError::Invalid(err.to_string()))?;
    config.validate()
  }

  fn validate(self) -> RIPTResult<SSHConfig> {
    if self.host.trim().is_empty() {
      return Err(RIPTError::Invalid("host must not be empty".to_string()));
    }
    if self.username.trim().is_empty() {
      return Err(RIPTError::Invalid("username must not be empty".to_string()));
    }
    Ok(self)
  }

  pub fn tokenizer(&self) -> DetailTokenizer {
    DetailTokenizer::with_break_tokens(self.break_tokens.iter().cloned())
  }
}

fn config_error<M: ToString>(path: &Path, message: M) -> RIPTError {
  RIPTError::Config {
    path: PathBuf::from(path),
    message: message.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn json_defaults() {
    let config = SSHConfig::from_json_str(r#"{"host": "192.168.1.1", "username": "root"}"#).unwrap();
    assert_eq!(config, SSHConfig::new("192.168.1.1", "root"));
    assert_eq!(config.port, 22);
    assert_eq!(config.timeout, 10);
    assert_eq!(config.list_command, "iptables -L -n --line-numbers");
    assert_eq!(config.break_tokens, vec!["TCPMSS"]);
  }

  #[test]
  fn json_all_fields() {
    let config = SSHConfig::from_json_str(r#"{
      "host": "router.lan", "username": "admin", "password": "secret", "port": 2222,
      "key_filename": "/home/admin/.ssh/id_ed25519", "timeout": 3,
      "list_command": "sudo iptables -L -n --line-numbers", "iptables_command": "sudo iptables",
      "break_tokens": ["TCPMSS", "LOG"]
    }"#).unwrap();
    assert_eq!(config.password.as_deref(), Some("secret"));
    assert_eq!(config.port, 2222);
    assert_eq!(config.iptables_command, "sudo iptables");
    assert_eq!(config.tokenizer().break_tokens().collect::<Vec<_>>(), vec!["LOG", "TCPMSS"]);
  }

  #[test]
  fn toml_config() {
    let config = SSHConfig::from_toml_str("host = \"10.0.0.1\"\nusername = \"pi\"\nport = 2200\n").unwrap();
    assert_eq!(config.host, "10.0.0.1");
    assert_eq!(config.port, 2200);
  }

  #[test]
  fn missing_username_is_invalid() {
    assert!(matches!(SSHConfig::from_json_str(r#"{"host": "h"}"#), Err(RIPTError::Invalid(_))));
    assert!(matches!(SSHConfig::from_json_str(r#"{"host": " ", "username": "u"}"#), Err(RIPTError::Invalid(_))));
  }

  #[test]
  fn unknown_field_is_invalid() {
    assert!(SSHConfig::from_json_str(r#"{"host": "h", "username": "u", "hostname": "x"}"#).is_err());
  }

  #[test]
  fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    match SSHConfig::from_file(&path) {
      Err(RIPTError::Config { path: err_path, message }) => {
        assert_eq!(err_path, path);
        assert!(message.contains("config.example.json"));
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn file_by_extension() {
    let dir = tempfile::tempdir().unwrap();

    let json = dir.path().join("config.json");
    fs::File::create(&json).unwrap().write_all(br#"{"host": "a", "username": "b"}"#).unwrap();
    assert_eq!(SSHConfig::from_file(&json).unwrap().host, "a");

    let toml = dir.path().join("panel.toml");
    fs::write(&toml, "host = \"c\"\nusername = \"d\"\n").unwrap();
    assert_eq!(SSHConfig::from_file(&toml).unwrap().username, "d");

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{").unwrap();
    assert!(matches!(SSHConfig::from_file(&broken), Err(RIPTError::Config { .. })));
  }
}
