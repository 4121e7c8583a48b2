//! SF-004: Version constraint sets for registry sources.
//!
//! A constraint string is a comma-separated intersection such as
//! `"~> 1.2, != 1.2.5"`. Supported operators: `=`, `!=`, `>`, `>=`, `<`,
//! `<=`, and the pessimistic `~>`. A bare version means `=`. An empty string
//! allows any release version.
//!
//! Pre-release versions are only allowed by an exact `=` constraint naming
//! that pre-release.

use semver::Version;
use std::collections::BTreeSet;
use std::fmt;

/// Error parsing a version or constraint string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid version constraint {input:?}: {reason}")]
    InvalidConstraint { input: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Pessimistic,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Pessimistic => "~>",
        }
    }
}

/// One `op version` term.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Constraint {
    op: Op,
    version: Version,
    /// How many of major/minor/patch were written (1..=3).
    precision: usize,
}

impl Constraint {
    fn allows(&self, v: &Version) -> bool {
        match self.op {
            Op::Eq => v == &self.version,
            Op::Neq => v != &self.version,
            Op::Gt => v > &self.version,
            Op::Gte => v >= &self.version,
            Op::Lt => v < &self.version,
            Op::Lte => v <= &self.version,
            Op::Pessimistic => {
                // A minor bump that overflows falls back to the next major;
                // past the last major there is no upper bound.
                let next_major = self.version.major.checked_add(1).map(|m| Version::new(m, 0, 0));
                let upper = match self.precision {
                    1 | 2 => next_major,
                    _ => match self.version.minor.checked_add(1) {
                        Some(n) => Some(Version::new(self.version.major, n, 0)),
                        None => next_major,
                    },
                };
                v >= &self.version && upper.map_or(true, |u| v < &u)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.version;
        let text = match self.precision {
            1 => v.major.to_string(),
            2 => format!("{}.{}", v.major, v.minor),
            _ => v.to_string(),
        };
        write!(f, "{} {}", self.op.as_str(), text)
    }
}

/// An intersection of version constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraints(Vec<Constraint>);

impl VersionConstraints {
    /// Constraints that allow any release version.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse a comma-separated constraint string.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let mut terms = Vec::new();
        if input.trim().is_empty() {
            return Ok(Self(terms));
        }
        for raw in input.split(',') {
            terms.push(parse_term(input, raw.trim())?);
        }
        Ok(Self(terms))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `v` is a member of the set of versions these constraints
    /// describe.
    pub fn allows(&self, v: &Version) -> bool {
        if !v.pre.is_empty() {
            let named = self
                .0
                .iter()
                .any(|c| c.op == Op::Eq && &c.version == v);
            if !named {
                return false;
            }
        }
        self.0.iter().all(|c| c.allows(v))
    }

    /// The newest version in `available` that these constraints allow.
    pub fn newest_in(&self, available: &BTreeSet<Version>) -> Option<Version> {
        available.iter().rev().find(|v| self.allows(v)).cloned()
    }
}

impl fmt::Display for VersionConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", terms.join(", "))
    }
}

fn parse_term(input: &str, raw: &str) -> Result<Constraint, VersionError> {
    let invalid = |reason: &str| VersionError::InvalidConstraint {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if raw.is_empty() {
        return Err(invalid("empty constraint term"));
    }

    // Longest operators first so ">=" isn't read as ">".
    let ops = [
        ("~>", Op::Pessimistic),
        (">=", Op::Gte),
        ("<=", Op::Lte),
        ("!=", Op::Neq),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ];
    let (op, rest) = ops
        .iter()
        .find_map(|(prefix, op)| raw.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, raw));

    let (version, precision) = parse_partial_version(rest.trim()).map_err(|e| invalid(&e))?;
    if !version.pre.is_empty() && op != Op::Eq {
        return Err(invalid("pre-release versions may only be selected with an exact match"));
    }
    Ok(Constraint {
        op,
        version,
        precision,
    })
}

/// Parse `1`, `1.2`, `1.2.3`, or a full semver string, zero-filling missing
/// parts and reporting how many parts were written.
fn parse_partial_version(s: &str) -> Result<(Version, usize), String> {
    let s = s.strip_prefix('v').unwrap_or(s);
    if s.is_empty() {
        return Err("missing version number".to_string());
    }
    let core_end = s.find(['-', '+']).unwrap_or(s.len());
    let parts: Vec<&str> = s[..core_end].split('.').collect();
    if parts.len() > 3 {
        return Err(format!("too many version components in {:?}", s));
    }
    let mut nums = [0u64; 3];
    for (i, part) in parts.iter().enumerate() {
        nums[i] = part
            .parse()
            .map_err(|_| format!("{:?} is not a valid version number", s))?;
    }
    if parts.len() == 3 {
        let v = Version::parse(s).map_err(|e| format!("{}: {}", s, e))?;
        return Ok((v, 3));
    }
    if core_end != s.len() {
        return Err(format!("{:?} needs major.minor.patch to carry a suffix", s));
    }
    Ok((Version::new(nums[0], nums[1], nums[2]), parts.len()))
}
