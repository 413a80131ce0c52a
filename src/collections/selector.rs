//! Typed Kubernetes label selectors.
//!
//! A [`Selector`] is an ordered list of [`Requirement`]s, each a key, an
//! operator and a set of values. Selectors render to the canonical string
//! form used by the API server (`k=v,k2 in (a,b),k3,!k4`) and parse back from
//! it, so a selector persisted in a status field can be rebuilt later.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use thiserror::Error;

use crate::crd::{CLUSTER_NAME_LABEL, ETCD_CLUSTER_LABEL};

/// Maximum length of a label name or value.
const MAX_LABEL_LENGTH: usize = 63;

/// Maximum length of a DNS subdomain used as a label key prefix.
const MAX_PREFIX_LENGTH: usize = 253;

static LABEL_NAME_RE: LazyLock<Option<regex::Regex>> = LazyLock::new(|| {
    regex::Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").ok()
});

static DNS_SUBDOMAIN_RE: LazyLock<Option<regex::Regex>> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
});

/// Errors raised while building or parsing a selector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid label value {value:?} for key {key:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("operator '{operator}' on key {key:?} requires {expected}, got {count}")]
    InvalidArity {
        key: String,
        operator: Operator,
        expected: &'static str,
        count: usize,
    },

    #[error("unable to parse requirement {0:?}")]
    Parse(String),
}

/// Result type for selector operations.
pub type Result<T> = std::result::Result<T, SelectorError>;

/// Label selector operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    DoubleEquals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Equals => write!(f, "="),
            Operator::DoubleEquals => write!(f, "=="),
            Operator::NotEquals => write!(f, "!="),
            Operator::In => write!(f, "in"),
            Operator::NotIn => write!(f, "notin"),
            Operator::Exists => write!(f, "exists"),
            Operator::DoesNotExist => write!(f, "!"),
        }
    }
}

/// A single `key <op> values` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    /// Build a validated requirement. Values are stored sorted.
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let key = key.into();
        validate_key(&key)?;

        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        let count = values.len();
        let arity_error = |expected| SelectorError::InvalidArity {
            key: key.clone(),
            operator,
            expected,
            count,
        };
        match operator {
            Operator::Equals | Operator::DoubleEquals | Operator::NotEquals if count != 1 => {
                return Err(arity_error("exactly one value"));
            }
            Operator::In | Operator::NotIn if count == 0 => {
                return Err(arity_error("at least one value"));
            }
            Operator::Exists | Operator::DoesNotExist if count != 0 => {
                return Err(arity_error("no values"));
            }
            _ => {}
        }

        for value in &values {
            validate_value(&key, value)?;
        }
        values.sort();

        Ok(Self {
            key,
            operator,
            values,
        })
    }

    /// Shorthand for `key=value`.
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let value: String = value.into();
        Self::new(key, Operator::Equals, [value])
    }

    /// Shorthand for a bare existence test on `key`.
    pub fn exists(key: impl Into<String>) -> Result<Self> {
        Self::new(key, Operator::Exists, Vec::<String>::new())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Evaluate this requirement against a label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::DoubleEquals | Operator::In => {
                value.is_some_and(|v| self.values.contains(v))
            }
            Operator::NotEquals | Operator::NotIn => {
                value.is_none_or(|v| !self.values.contains(v))
            }
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
            Operator::Equals | Operator::DoubleEquals | Operator::NotEquals => {
                write!(f, "{}{}{}", self.key, self.operator, self.values.join(","))
            }
            Operator::In | Operator::NotIn => {
                write!(
                    f,
                    "{} {} ({})",
                    self.key,
                    self.operator,
                    self.values.join(",")
                )
            }
        }
    }
}

/// A conjunction of requirements. An empty selector matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector with no requirements.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Add a requirement, keeping requirements ordered by key.
    pub fn add(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self.requirements.sort_by(|a, b| a.key.cmp(&b.key));
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// True if every requirement matches the label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self> {
        let mut selector = Selector::everything();
        for clause in split_clauses(s)? {
            selector = selector.add(parse_requirement(clause)?);
        }
        Ok(selector)
    }
}

/// Selector matching the etcd member machines of one cluster: the cluster
/// name label must equal `cluster_name` and the etcd role label must exist.
pub fn etcd_plane_selector_for_cluster(cluster_name: &str) -> Result<Selector> {
    Ok(Selector::everything()
        .add(Requirement::equals(CLUSTER_NAME_LABEL, cluster_name)?)
        .add(Requirement::exists(ETCD_CLUSTER_LABEL)?))
}

/// Split on commas that are not inside a parenthesised value list.
fn split_clauses(s: &str) -> Result<Vec<&str>> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::Parse(s.to_string()))?;
            }
            ',' if depth == 0 => {
                clauses.push(s.get(start..i).unwrap_or_default());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Parse(s.to_string()));
    }
    clauses.push(s.get(start..).unwrap_or_default());

    let trimmed: Vec<&str> = clauses.into_iter().map(str::trim).collect();
    if trimmed.len() == 1 && trimmed.first().is_some_and(|c| c.is_empty()) {
        return Ok(Vec::new());
    }
    if trimmed.iter().any(|c| c.is_empty()) {
        return Err(SelectorError::Parse(s.to_string()));
    }
    Ok(trimmed)
}

fn parse_requirement(clause: &str) -> Result<Requirement> {
    let parse_error = || SelectorError::Parse(clause.to_string());

    if let Some(key) = clause.strip_prefix('!') {
        return Requirement::new(key.trim(), Operator::DoesNotExist, Vec::<String>::new());
    }

    if let Some(open) = clause.find('(') {
        let body = clause
            .get(open + 1..)
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(parse_error)?;
        let head: Vec<&str> = clause.get(..open).unwrap_or_default().split_whitespace().collect();
        let (key, operator) = match head.as_slice() {
            [key, "in"] => (*key, Operator::In),
            [key, "notin"] => (*key, Operator::NotIn),
            _ => return Err(parse_error()),
        };
        let values: Vec<&str> = body.split(',').map(str::trim).collect();
        return Requirement::new(key, operator, values);
    }

    for (token, operator) in [
        ("!=", Operator::NotEquals),
        ("==", Operator::DoubleEquals),
        ("=", Operator::Equals),
    ] {
        if let Some((key, value)) = clause.split_once(token) {
            return Requirement::new(key.trim(), operator, [value.trim()]);
        }
    }

    if clause.contains(char::is_whitespace) {
        return Err(parse_error());
    }
    Requirement::new(clause, Operator::Exists, Vec::<String>::new())
}

fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason: &str| SelectorError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH {
                return Err(invalid("prefix must be a non-empty DNS subdomain"));
            }
            let valid_prefix = DNS_SUBDOMAIN_RE
                .as_ref()
                .is_some_and(|re| re.is_match(prefix));
            if !valid_prefix {
                return Err(invalid("prefix must be a lowercase DNS subdomain"));
            }
            name
        }
        None => key,
    };

    if name.is_empty() || name.len() > MAX_LABEL_LENGTH {
        return Err(invalid("name must be 1-63 characters"));
    }
    if !is_label_token(name) {
        return Err(invalid(
            "name must consist of alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric",
        ));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_LABEL_LENGTH || !is_label_token(value) {
        return Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be at most 63 alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric"
                .to_string(),
        });
    }
    Ok(())
}

fn is_label_token(s: &str) -> bool {
    LABEL_NAME_RE.as_ref().is_some_and(|re| re.is_match(s))
}
