use serde::Serialize;

/// One trailing option of a rule line, e.g. `dpt:22` or `state RELATED,ESTABLISHED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RIPTDetail {
  pub label: String,
  pub value: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub key: Option<String>,
}

impl RIPTDetail {
  pub fn new<S: Into<String>>(label: S) -> RIPTDetail {
    RIPTDetail { label: label.into(), value: None, key: None }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RIPTRule {
  /// 1-based position in the chain, `0` for a line that could not be read.
  pub number: u32,
  pub target: String,
  pub protocol: String,
  pub option: String,
  pub source: String,
  pub destination: String,
  pub details: Vec<RIPTDetail>,
  pub raw: String,
}

impl RIPTRule {
  /// Placeholder kept for a line that does not have the column layout.
  pub fn degraded<S: Into<String>>(line: S) -> RIPTRule {
    let raw = line.into();
    RIPTRule {
      number: 0,
      target: String::new(),
      protocol: String::new(),
      option: String::new(),
      source: String::new(),
      destination: String::new(),
      details: vec![RIPTDetail::new(raw.clone())],
      raw,
    }
  }

  /// Whether this is a placeholder from `degraded`. A parsed rule numbered
  /// `0` still has its columns, so the number alone does not tell.
  pub fn is_degraded(&self) -> bool {
    self.number == 0
      && self.target.is_empty()
      && self.protocol.is_empty()
      && self.option.is_empty()
      && self.source.is_empty()
      && self.destination.is_empty()
      && self.details.len() == 1
      && self.details[0].label == self.raw
      && self.details[0].value.is_none()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RIPTChain {
  pub name: String,
  /// Default policy, only built-in chains carry one.
  pub policy: Option<String>,
  /// Number of rules jumping into this chain.
  pub references: Option<u32>,
  pub rules: Vec<RIPTRule>,
}

impl RIPTChain {
  pub fn new<S: Into<String>>(name: S) -> RIPTChain {
    RIPTChain {
      name: name.into(),
      policy: None,
      references: None,
      rules: vec![],
    }
  }

  pub fn rule(&self, number: u32) -> Option<&RIPTRule> {
    self.rules.iter().find(|item| item.number == number)
  }
}
