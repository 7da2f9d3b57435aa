use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use config::SSHConfig;
use error::{RIPTError, RIPTResult};
use iptparser::ChainParser;
use rule::RIPTChain;

pub mod config;
pub mod detail;
pub mod error;
pub mod iptparser;
pub mod rule;
pub mod web;

pub use iptparser::parse_chains;

/// Operations the panel needs from the device.
///
/// Every call is blocking and independent of the others.
pub trait Firewall: Send + Sync {
  /// Runs the listing command and parses its output.
  fn list(&self) -> RIPTResult<Vec<RIPTChain>>;

  /// Appends `specification` to `chain`, or inserts it at `position` when given.
  fn add(&self, chain: &str, specification: &str, position: Option<u32>) -> RIPTResult<()>;

  /// Replaces rule `number` of `chain` with `specification`.
  fn replace(&self, chain: &str, number: u32, specification: &str) -> RIPTResult<()>;

  /// Deletes rule `number` from `chain`.
  fn delete(&self, chain: &str, number: u32) -> RIPTResult<()>;
}

/// iptables on a remote host, driven through the local `ssh` client.
pub struct RIPTables {
  config: SSHConfig,
  parser: ChainParser,
}

impl RIPTables {
  pub fn new(config: SSHConfig) -> RIPTables {
    let parser = ChainParser::new(config.tokenizer());
    RIPTables { config, parser }
  }

  pub fn from_config_file<P: AsRef<Path>>(path: P) -> RIPTResult<RIPTables> {
    Ok(RIPTables::new(SSHConfig::from_file(path)?))
  }

  pub fn config(&self) -> &SSHConfig {
    &self.config
  }

  /// Execute a command on the device
  ///
  /// Returns the standard output, or `RIPTError::Command` with the captured
  /// standard error when the exit status is not zero.
  pub fn execute<S: AsRef<str>>(&self, args: &[S]) -> RIPTResult<String> {
    let args: Vec<String> = args.iter().map(|item| item.as_ref().to_string()).collect();
    SshCaller::new(&self.config).call(&args)
  }

  /// Arguments of the listing command.
  fn list_args(&self) -> RIPTResult<Vec<String>> {
    iptparser::split_quoted(&self.config.list_command)
  }

  /// `iptables_command` followed by `action` and the split `specification`.
  ///
  /// Fails with `RIPTError::Invalid` on unbalanced quoting, before anything
  /// is sent to the device.
  fn command_args(&self, action: &[String], specification: Option<&str>) -> RIPTResult<Vec<String>> {
    let mut args = iptparser::split_quoted(&self.config.iptables_command)?;
    args.extend_from_slice(action);
    if let Some(specification) = specification {
      args.extend(iptparser::split_quoted(specification)?);
    }
    Ok(args)
  }

  fn iptables(&self, action: &[String], specification: Option<&str>) -> RIPTResult<()> {
    let args = self.command_args(action, specification)?;
    info!("{}@{}: {}", self.config.username, self.config.host, args.join(" "));
    self.execute(&args)?;
    Ok(())
  }
}

fn add_action(chain: &str, position: Option<u32>) -> Vec<String> {
  match position {
    Some(position) => vec!["-I".to_string(), chain.to_string(), position.to_string()],
    None => vec!["-A".to_string(), chain.to_string()],
  }
}

fn numbered_action(flag: &str, chain: &str, number: u32) -> Vec<String> {
  vec![flag.to_string(), chain.to_string(), number.to_string()]
}

impl Firewall for RIPTables {
  fn list(&self) -> RIPTResult<Vec<RIPTChain>> {
    let args = self.list_args()?;
    let output = self.execute(&args)?;
    Ok(self.parser.parse(&output))
  }

  fn add(&self, chain: &str, specification: &str, position: Option<u32>) -> RIPTResult<()> {
    self.iptables(&self::add_action(chain, position), Some(specification))
  }

  fn replace(&self, chain: &str, number: u32, specification: &str) -> RIPTResult<()> {
    self.iptables(&self::numbered_action("-R", chain, number), Some(specification))
  }

  fn delete(&self, chain: &str, number: u32) -> RIPTResult<()> {
    self.iptables(&self::numbered_action("-D", chain, number), None)
  }
}

struct SshCaller<'a> {
  config: &'a SSHConfig,
}

impl<'a> SshCaller<'a> {
  fn new(config: &'a SSHConfig) -> SshCaller<'a> {
    SshCaller { config }
  }

  /// The local process that runs `args` on the remote host.
  fn command(&self, args: &[String]) -> Command {
    let remote = args.iter().map(|item| self::quote(item)).collect::<Vec<String>>().join(" ");

    let mut command = match self.config.password {
      Some(ref password) => {
        let mut sshpass = Command::new("sshpass");
        sshpass.env("SSHPASS", password).arg("-e").arg("ssh");
        sshpass
      }
      None => {
        let mut ssh = Command::new("ssh");
        ssh.arg("-o").arg("BatchMode=yes");
        ssh
      }
    };

    command
      .arg("-p").arg(self.config.port.to_string())
      .arg("-o").arg(format!("ConnectTimeout={}", self.config.timeout))
      .arg("-o").arg("StrictHostKeyChecking=accept-new")
      .arg("-T");
    if let Some(ref key_filename) = self.config.key_filename {
      command.arg("-i").arg(key_filename);
    }
    command
      .arg(format!("{}@{}", self.config.username, self.config.host))
      .arg(remote)
      .stdin(Stdio::null());
    command
  }

  fn call(&self, args: &[String]) -> RIPTResult<String> {
    let mut command = self.command(args);
    debug!("{:?}", self::command_line(&command));
    let output = command.output()?;

    match output.status.code() {
      Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
      Some(status) => Err(RIPTError::Command {
        command: args.to_vec(),
        status,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
      }),
      None => Err("ssh was terminated by a signal".into()),
    }
  }
}

/// Program and arguments, leaving out the environment that carries the password.
fn command_line(command: &Command) -> Vec<String> {
  let mut parts = vec![self::to_string(command.get_program())];
  parts.extend(command.get_args().map(self::to_string));
  parts
}

/// Quotes one argument for a POSIX shell.
pub fn quote(arg: &str) -> String {
  if arg.is_empty() {
    return "''".to_string();
  }
  let safe = arg.chars().all(|ch| ch.is_ascii_alphanumeric() || "@%+=:,./-_".contains(ch));
  if safe {
    return arg.to_string();
  }
  format!("'{}'", arg.replace('\'', "'\"'\"'"))
}

fn to_string<S>(text: S) -> String where S: AsRef<OsStr> {
  text.as_ref().to_string_lossy().into_owned()
}
