use std::{fmt, str::FromStr};

use thiserror::Error;

/// Prefix of the `ipn` URI scheme.
const IPN_SCHEME: &str = "ipn:";

/// Why a string is not an `ipn` endpoint identifier. Each variant carries the input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EidError {
    #[error("missing \"ipn:\" scheme in {0:?}")]
    Scheme(String),
    #[error("missing '.' separator in {0:?}")]
    Separator(String),
    #[error("invalid node number in {0:?}")]
    Node(String),
    #[error("invalid service number in {0:?}")]
    Service(String),
}

/// A fully qualified endpoint identifier in the `ipn` scheme: `ipn:<node>.<service>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Eid {
    pub node: u64,
    pub service: u64,
}

impl Eid {
    pub const fn new(node: u64, service: u64) -> Self {
        Self { node, service }
    }

    /// Returns the administrative endpoint of this node (`ipn:<node>.0`).
    pub const fn node_admin(&self) -> Self {
        Self { node: self.node, service: 0 }
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{IPN_SCHEME}{}.{}", self.node, self.service)
    }
}

impl FromStr for Eid {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<EidPattern>()? {
            EidPattern::Exact(eid) => Ok(eid),
            EidPattern::AnyService(_) => Err(EidError::Service(s.to_owned())),
        }
    }
}

/// A destination pattern: either one exact endpoint or every service of a node (`ipn:<node>.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EidPattern {
    Exact(Eid),
    AnyService(u64),
}

impl EidPattern {
    pub const fn node(&self) -> u64 {
        match self {
            Self::Exact(eid) => eid.node,
            Self::AnyService(node) => *node,
        }
    }

    pub fn matches(&self, eid: &Eid) -> bool {
        match self {
            Self::Exact(exact) => exact == eid,
            Self::AnyService(node) => *node == eid.node,
        }
    }
}

impl fmt::Display for EidPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(eid) => eid.fmt(f),
            Self::AnyService(node) => write!(f, "{IPN_SCHEME}{node}.*"),
        }
    }
}

impl FromStr for EidPattern {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(IPN_SCHEME).ok_or_else(|| EidError::Scheme(s.to_owned()))?;
        let (node, service) = rest.split_once('.').ok_or_else(|| EidError::Separator(s.to_owned()))?;

        let node = parse_number(node).ok_or_else(|| EidError::Node(s.to_owned()))?;

        if service == "*" {
            return Ok(Self::AnyService(node));
        }

        let service = parse_number(service).ok_or_else(|| EidError::Service(s.to_owned()))?;
        Ok(Self::Exact(Eid { node, service }))
    }
}

/// Parses a plain decimal number. Signs, whitespace and empty strings are rejected.
fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    s.parse().ok()
}
