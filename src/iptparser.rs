use once_cell::sync::Lazy;
use regex::Regex;
use text_reader::TextReader;
use tracing::trace;

use crate::detail::DetailTokenizer;
use crate::error::{RIPTError, RIPTResult};
use crate::rule::{RIPTChain, RIPTRule};

static CHAIN_HEADER: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^Chain\s+(?P<name>\S+)\s+\((?P<descriptor>[^)]*)\)").unwrap());
static CHAIN_POLICY: Lazy<Regex> = Lazy::new(|| Regex::new(r"policy\s+(?P<policy>\S+)").unwrap());
static CHAIN_REFERENCES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?P<count>\d+)\s+references").unwrap());

/// Number of fixed columns before the free-form tail:
/// `num target prot opt source destination`.
const RULE_COLUMNS: usize = 6;

/// Parses the output of `iptables -L -n --line-numbers` with the default break set.
pub fn parse_chains(text: &str) -> Vec<RIPTChain> {
  ChainParser::default().parse(text)
}

#[derive(Debug, Clone, Default)]
pub struct ChainParser {
  tokenizer: DetailTokenizer,
}

impl ChainParser {
  pub fn new(tokenizer: DetailTokenizer) -> ChainParser {
    ChainParser { tokenizer }
  }

  /// Never fails: every line starts a chain, is skipped, or becomes one rule.
  pub fn parse(&self, text: &str) -> Vec<RIPTChain> {
    let mut builder = ChainsBuilder::default();

    for line in text.lines() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }

      if let Some(chain) = self::parse_chain_header(line) {
        builder.start(chain);
        continue;
      }

      if self::is_legend(line) {
        continue;
      }

      if !builder.has_chain() {
        trace!("skipping line outside of any chain: {:?}", line);
        continue;
      }

      if let Some(rule) = self.parse_rule_line(line) {
        builder.push(rule);
      }
    }

    builder.finish()
  }

  /// Returns `None` for legend rows, a degraded rule for lines without the column layout.
  pub fn parse_rule_line(&self, line: &str) -> Option<RIPTRule> {
    let line = line.trim();
    if self::is_legend(line) {
      return None;
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < RULE_COLUMNS {
      trace!("rule line has {} columns: {:?}", parts.len(), line);
      return Some(RIPTRule::degraded(line));
    }

    let number = match parts[0].parse::<u32>() {
      Ok(number) => number,
      Err(err) => {
        trace!("rule number {:?} is not an integer ({}): {:?}", parts[0], err, line);
        return Some(RIPTRule::degraded(line));
      }
    };

    Some(RIPTRule {
      number,
      target: parts[1].to_string(),
      protocol: parts[2].to_string(),
      option: parts[3].to_string(),
      source: parts[4].to_string(),
      destination: parts[5].to_string(),
      details: self.tokenizer.tokenize(&parts[RULE_COLUMNS..]),
      raw: line.to_string(),
    })
  }
}

/// Result sequence under construction; the chain being filled is always the last one.
#[derive(Default)]
struct ChainsBuilder {
  chains: Vec<RIPTChain>,
}

impl ChainsBuilder {
  fn start(&mut self, chain: RIPTChain) {
    self.chains.push(chain);
  }

  fn has_chain(&self) -> bool {
    !self.chains.is_empty()
  }

  fn push(&mut self, rule: RIPTRule) {
    if let Some(chain) = self.chains.last_mut() {
      chain.rules.push(rule);
    }
  }

  fn finish(self) -> Vec<RIPTChain> {
    self.chains
  }
}

/// Recognizes `Chain <name> (<descriptor>)`, the returned chain has no rules yet.
pub fn parse_chain_header(line: &str) -> Option<RIPTChain> {
  let captures = CHAIN_HEADER.captures(line.trim())?;
  let descriptor = captures.name("descriptor").map_or("", |item| item.as_str()).trim();

  let mut chain = RIPTChain::new(&captures["name"]);
  chain.policy = CHAIN_POLICY.captures(descriptor)
    .map(|item| item["policy"].to_string());
  chain.references = CHAIN_REFERENCES.captures(descriptor)
    .and_then(|item| item["count"].parse::<u32>().ok());
  Some(chain)
}

/// Column legend rows such as `num  target  prot opt source  destination`.
pub fn is_legend(line: &str) -> bool {
  matches!(line.split_whitespace().next(), Some("num") | Some("target"))
}

/// Splits a rule specification into arguments the way a POSIX shell would.
///
/// Single quotes are literal, double quotes honour `\"`, `\\`, `\$` and `` \` ``,
/// a backslash outside quotes escapes the next character.
pub fn split_quoted<S: AsRef<str>>(text: S) -> RIPTResult<Vec<String>> {
  let mut reader = TextReader::new(text.as_ref().to_string());
  let mut args = vec![];
  let mut builder = String::new();
  let mut in_word = false;
  let mut quote: Option<char> = None;

  while reader.has_next() {
    let ch = match reader.next() {
      Some(ch) => ch,
      None => break,
    };
    match (quote, ch) {
      (None, ch) if ch.is_whitespace() => {
        if in_word {
          args.push(std::mem::take(&mut builder));
          in_word = false;
        }
      }
      (None, '\'') | (None, '"') => {
        quote = Some(ch);
        in_word = true;
      }
      (None, '\\') => {
        in_word = true;
        match reader.next() {
          Some('\n') => {}
          Some(escaped) => builder.push(escaped),
          None => return Err(RIPTError::Invalid("No escaped character".to_string())),
        }
      }
      (Some(open), ch) if open == ch => quote = None,
      (Some('"'), '\\') => {
        match reader.next() {
          Some(escaped @ ('"' | '\\' | '$' | '`')) => builder.push(escaped),
          Some('\n') => {}
          Some(other) => {
            builder.push('\\');
            builder.push(other);
          }
          None => break,
        }
      }
      (_, ch) => {
        builder.push(ch);
        in_word = true;
      }
    }
  }

  if quote.is_some() {
    return Err(RIPTError::Invalid(format!("No closing quotation in {:?}", text.as_ref())));
  }
  if in_word {
    args.push(builder);
  }
  Ok(args)
}
