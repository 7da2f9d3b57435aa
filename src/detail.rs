//! Splits the free-form tail of an `iptables -L` rule line into details.
//!
//! The tail has no grammar of its own. Match extensions print a mix of bare
//! flags (`ctstate`), joined pairs (`dpt:22`), open labels whose value follows
//! (`tcpflags: 0x06/0x02`) and label words that prefix the next joined pair
//! (`tcp dpt:22` reads as label `tcp dpt`).

use std::collections::BTreeSet;

use crate::rule::RIPTDetail;

/// Target names that open a new detail even though they carry no colon.
pub const DEFAULT_BREAK_TOKENS: &[&str] = &["TCPMSS"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailTokenizer {
  break_tokens: BTreeSet<String>,
}

impl Default for DetailTokenizer {
  fn default() -> Self {
    DetailTokenizer::with_break_tokens(DEFAULT_BREAK_TOKENS.iter().copied())
  }
}

impl DetailTokenizer {
  pub fn new() -> DetailTokenizer {
    DetailTokenizer::default()
  }

  /// Replaces the break set entirely.
  pub fn with_break_tokens<I, S>(tokens: I) -> DetailTokenizer where I: IntoIterator<Item=S>, S: Into<String> {
    DetailTokenizer {
      break_tokens: tokens.into_iter().map(Into::into).collect(),
    }
  }

  /// Adds one token to the break set.
  pub fn break_token<S: Into<String>>(mut self, token: S) -> DetailTokenizer {
    self.break_tokens.insert(token.into());
    self
  }

  pub fn break_tokens(&self) -> impl Iterator<Item=&str> {
    self.break_tokens.iter().map(|item| &item[..])
  }

  pub fn tokenize<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<RIPTDetail> {
    let tokens: Vec<&str> = tokens.iter().map(|item| item.as_ref()).collect();
    let mut details = vec![];
    let mut prefix: Vec<&str> = vec![];
    let mut i = 0;

    while i < tokens.len() {
      let token = tokens[i];

      if let Some((label_part, value_part)) = token.split_once(':') {
        prefix.push(label_part);
        let label = prefix.join(" ");
        prefix.clear();

        let mut value = vec![];
        if !value_part.is_empty() {
          value.push(value_part);
        }
        i = self.collect_value(&tokens, i + 1, &mut value);
        details.push(self::make_detail(&label, &value, label_part));
        continue;
      }

      if tokens.get(i + 1).map_or(false, |next| next.contains(':')) {
        prefix.push(token);
        i += 1;
        continue;
      }

      prefix.push(token);
      let label = prefix.join(" ");
      prefix.clear();

      let mut value = vec![];
      i = self.collect_value(&tokens, i + 1, &mut value);
      details.push(self::make_detail(&label, &value, token));
    }

    if let Some(last) = prefix.last() {
      details.push(self::make_detail(&prefix.join(" "), &[], last));
    }

    details
  }

  /// Appends value tokens starting at `from`, returns the index of the first token not taken.
  fn collect_value<'a>(&self, tokens: &[&'a str], from: usize, value: &mut Vec<&'a str>) -> usize {
    let mut i = from;
    while i < tokens.len() {
      let lookahead = tokens[i];
      if lookahead.contains(':') || lookahead.ends_with(':') {
        break;
      }
      if !value.is_empty() && self.break_tokens.contains(lookahead) {
        break;
      }
      value.push(lookahead);
      i += 1;
    }
    i
  }
}

fn make_detail(label: &str, value: &[&str], key: &str) -> RIPTDetail {
  let value = value.join(" ");
  let value = value.trim();
  RIPTDetail {
    label: label.trim().to_string(),
    value: if value.is_empty() { None } else { Some(value.to_string()) },
    key: self::normalize_key(key),
  }
}

fn normalize_key(raw: &str) -> Option<String> {
  let key = raw.trim().to_lowercase();
  let key = key.trim_end_matches(':');
  if key.is_empty() {
    return None;
  }
  Some(key.to_string())
}
