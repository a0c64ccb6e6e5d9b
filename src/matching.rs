//! Match-Type Resolver.
//!
//! An edge is ingested as [`MatchFlag::ExactMatch`] only when its declared
//! requirement admits exactly one concrete version and that version is the
//! one the target node resolved to. Everything else, including requirements
//! that cannot be parsed, is a [`MatchFlag::RangeMatch`] with the requirement
//! kept verbatim.
//!
//! Requirements are read with npm-flavoured semver range syntax:
//! `||` alternatives, space-separated comparator sets, `=`, `<`, `<=`, `>`,
//! `>=`, `^`, `~`, `x`/`*` wildcards, partial versions and hyphen ranges.

use crate::model::{GraphEdge, GraphNode, MatchFlag};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),
    #[error("Dangling operator in '{0}'")]
    DanglingOperator(String),
    #[error("Version component {0} has no successor")]
    ComponentOverflow(u64),
}

fn succ(n: u64) -> Result<u64, RangeError> {
    n.checked_add(1).ok_or(RangeError::ComponentOverflow(n))
}

// ============================================================================
// Versions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl Identifier {
    fn parse(s: &str) -> Self {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = s.parse() {
                return Identifier::Numeric(n);
            }
        }
        Identifier::Alpha(s.to_string())
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::Alpha(_)) => Ordering::Less,
            (Identifier::Alpha(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::Alpha(a), Identifier::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A concrete semantic version. Build metadata is discarded on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pre: Vec<Identifier>,
}

impl Version {
    fn release(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
        }
    }

    /// `major.minor.patch-0`, the lowest version of that release line.
    fn floor_pre(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: vec![Identifier::Numeric(0)],
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    fn tuple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }

    /// Parses a full `major.minor.patch[-pre][+build]` version, accepting a
    /// leading `v`.
    pub fn parse(s: &str) -> Result<Self, RangeError> {
        let partial = Partial::parse(s)?;
        match (partial.major, partial.minor, partial.patch) {
            (Some(major), Some(minor), Some(patch)) => Ok(Self {
                major,
                minor,
                patch,
                pre: partial.pre,
            }),
            _ => Err(RangeError::InvalidVersion(s.to_string())),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tuple()
            .cmp(&other.tuple())
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A possibly partial version such as `1`, `1.2`, `1.x` or `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Vec<Identifier>,
}

impl Partial {
    fn parse(s: &str) -> Result<Self, RangeError> {
        let invalid = || RangeError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let body = body.split_once('+').map_or(body, |(core, _build)| core);
        let (core, pre) = match body.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => {
                (core, pre.split('.').map(Identifier::parse).collect())
            }
            Some(_) => return Err(invalid()),
            None => (body, Vec::new()),
        };
        if core.is_empty() {
            return Err(invalid());
        }

        let mut parts = [None; 3];
        let mut wildcard = false;
        for (i, part) in core.split('.').enumerate() {
            if i >= 3 {
                return Err(invalid());
            }
            if matches!(part, "x" | "X" | "*") {
                wildcard = true;
                continue;
            }
            let n: u64 = part.parse().map_err(|_| invalid())?;
            if !wildcard {
                parts[i] = Some(n);
            }
        }

        let [major, minor, patch] = parts;
        if !pre.is_empty() && patch.is_none() {
            return Err(invalid());
        }
        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    fn full(&self) -> Option<Version> {
        Some(Version {
            major: self.major?,
            minor: self.minor?,
            patch: self.patch?,
            pre: self.pre.clone(),
        })
    }

    /// Missing components filled with zero.
    fn floor(&self) -> Version {
        self.full().unwrap_or_else(|| {
            Version::release(
                self.major.unwrap_or(0),
                self.minor.unwrap_or(0),
                self.patch.unwrap_or(0),
            )
        })
    }

    /// First release after the last specified component, e.g. `1.2` -> `1.3.0`.
    fn next(&self) -> Result<Version, RangeError> {
        let major = self.major.unwrap_or(0);
        Ok(match (self.minor, self.patch) {
            (None, _) => Version::release(succ(major)?, 0, 0),
            (Some(minor), None) => Version::release(major, succ(minor)?, 0),
            (Some(minor), Some(patch)) => Version::release(major, minor, succ(patch)?),
        })
    }

    /// Exclusive upper bound covering every version of the partial, including
    /// pre-releases of the next line.
    fn next_floor(&self) -> Result<Version, RangeError> {
        let next = self.next()?;
        Ok(Version::floor_pre(next.major, next.minor, next.patch))
    }
}

// ============================================================================
// Ranges
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

impl Bound {
    fn inclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    fn exclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Tilde,
    Caret,
}

impl Op {
    /// Splits a leading operator off a comparator token.
    fn split(token: &str) -> (Op, &str) {
        const OPS: [(&str, Op); 8] = [
            (">=", Op::Gte),
            ("<=", Op::Lte),
            ("==", Op::Eq),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Eq),
            ("^", Op::Caret),
            ("~", Op::Tilde),
        ];
        for (prefix, op) in OPS {
            if let Some(rest) = token.strip_prefix(prefix) {
                return (op, rest);
            }
        }
        (Op::Eq, token)
    }
}

/// Intersection of comparators: one `||` alternative.
#[derive(Debug, Clone, Default)]
struct ComparatorSet {
    lower: Option<Bound>,
    upper: Option<Bound>,
    unsatisfiable: bool,
    /// Release tuples whose pre-releases this set admits
    pre_tuples: Vec<(u64, u64, u64)>,
}

/// Replaces `slot` when `bound` lies further in the `inward` direction, or
/// at the same version but exclusive.
fn tighten(slot: &mut Option<Bound>, bound: Bound, inward: Ordering) {
    let tighter = slot.as_ref().map_or(true, |cur| {
        let ord = bound.version.cmp(&cur.version);
        ord == inward || (ord == Ordering::Equal && cur.inclusive && !bound.inclusive)
    });
    if tighter {
        *slot = Some(bound);
    }
}

impl ComparatorSet {
    fn raise_lower(&mut self, bound: Bound) {
        tighten(&mut self.lower, bound, Ordering::Greater);
    }

    fn lower_upper(&mut self, bound: Bound) {
        tighten(&mut self.upper, bound, Ordering::Less);
    }

    fn apply(&mut self, op: Op, p: &Partial) -> Result<(), RangeError> {
        if let Some(v) = p.full().filter(Version::is_prerelease) {
            self.pre_tuples.push(v.tuple());
        }
        if p.major.is_none() {
            // `*` admits everything, except as a strict bound.
            if matches!(op, Op::Gt | Op::Lt) {
                self.unsatisfiable = true;
            }
            return Ok(());
        }
        let full = p.full();
        match op {
            Op::Eq => match full {
                Some(v) => {
                    self.raise_lower(Bound::inclusive(v.clone()));
                    self.lower_upper(Bound::inclusive(v));
                }
                None => {
                    self.raise_lower(Bound::inclusive(p.floor()));
                    self.lower_upper(Bound::exclusive(p.next_floor()?));
                }
            },
            Op::Gt => match full {
                Some(v) => self.raise_lower(Bound::exclusive(v)),
                None => self.raise_lower(Bound::inclusive(p.next()?)),
            },
            Op::Gte => self.raise_lower(Bound::inclusive(p.floor())),
            Op::Lt => match full {
                Some(v) => self.lower_upper(Bound::exclusive(v)),
                None => {
                    let f = p.floor();
                    self.lower_upper(Bound::exclusive(Version::floor_pre(
                        f.major, f.minor, f.patch,
                    )));
                }
            },
            Op::Lte => match full {
                Some(v) => self.lower_upper(Bound::inclusive(v)),
                None => self.lower_upper(Bound::exclusive(p.next_floor()?)),
            },
            Op::Tilde => {
                self.raise_lower(Bound::inclusive(p.floor()));
                let major = p.major.unwrap_or(0);
                let upper = match p.minor {
                    Some(minor) => Version::floor_pre(major, succ(minor)?, 0),
                    None => Version::floor_pre(succ(major)?, 0, 0),
                };
                self.lower_upper(Bound::exclusive(upper));
            }
            Op::Caret => {
                let floor = p.floor();
                let upper = if floor.major > 0 || p.minor.is_none() {
                    Version::floor_pre(succ(floor.major)?, 0, 0)
                } else if floor.minor > 0 || p.patch.is_none() {
                    Version::floor_pre(0, succ(floor.minor)?, 0)
                } else {
                    Version::floor_pre(0, 0, succ(floor.patch)?)
                };
                self.raise_lower(Bound::inclusive(floor));
                self.lower_upper(Bound::exclusive(upper));
            }
        }
        Ok(())
    }

    fn apply_hyphen(&mut self, from: &Partial, to: &Partial) -> Result<(), RangeError> {
        if from.major.is_some() {
            self.raise_lower(Bound::inclusive(from.floor()));
        }
        if to.major.is_some() {
            match to.full() {
                Some(v) => self.lower_upper(Bound::inclusive(v)),
                None => self.lower_upper(Bound::exclusive(to.next_floor()?)),
            }
        }
        Ok(())
    }

    fn parse(set: &str) -> Result<Self, RangeError> {
        let mut out = ComparatorSet::default();
        let tokens: Vec<&str> = set.split_whitespace().collect();
        let mut i = 0;
        while i < tokens.len() {
            if tokens.get(i + 1) == Some(&"-") {
                let to = tokens
                    .get(i + 2)
                    .ok_or_else(|| RangeError::DanglingOperator(set.to_string()))?;
                out.apply_hyphen(&Partial::parse(tokens[i])?, &Partial::parse(to)?)?;
                i += 3;
                continue;
            }
            let (op, mut rest) = Op::split(tokens[i]);
            if rest.is_empty() {
                // Operator written apart from its version: `>= 1.2.3`.
                i += 1;
                rest = *tokens
                    .get(i)
                    .ok_or_else(|| RangeError::DanglingOperator(set.to_string()))?;
            }
            out.apply(op, &Partial::parse(rest)?)?;
            i += 1;
        }
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        if self.unsatisfiable {
            return true;
        }
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi)) => match lo.version.cmp(&hi.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(lo.inclusive && hi.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    /// The only version this set admits, if there is exactly one.
    fn single(&self) -> Option<Version> {
        if self.is_empty() {
            return None;
        }
        let lo = self.lower.as_ref().filter(|b| b.inclusive)?;
        let hi = self.upper.as_ref()?;
        if hi.inclusive {
            return (hi.version == lo.version).then(|| lo.version.clone());
        }
        // `>=L <L+1-0` admits only L. `>=L <L+1` does too, unless the set
        // lets pre-releases of L+1 through.
        let l = &lo.version;
        if l.is_prerelease() {
            return None;
        }
        let bump = (l.major, l.minor, l.patch.checked_add(1)?);
        let excludes_rest = hi.version.tuple() == bump
            && if hi.version.is_prerelease() {
                hi.version == Version::floor_pre(bump.0, bump.1, bump.2)
            } else {
                !self.pre_tuples.contains(&bump)
            };
        excludes_rest.then(|| l.clone())
    }

    fn matches(&self, v: &Version) -> bool {
        if self.is_empty() {
            return false;
        }
        if v.is_prerelease() && !self.pre_tuples.contains(&v.tuple()) {
            return false;
        }
        let above = self.lower.as_ref().map_or(true, |b| match v.cmp(&b.version) {
            Ordering::Greater => true,
            Ordering::Equal => b.inclusive,
            Ordering::Less => false,
        });
        let below = self.upper.as_ref().map_or(true, |b| match v.cmp(&b.version) {
            Ordering::Less => true,
            Ordering::Equal => b.inclusive,
            Ordering::Greater => false,
        });
        above && below
    }
}

/// A parsed requirement: a union of comparator sets.
#[derive(Debug, Clone)]
pub struct VersionRange {
    sets: Vec<ComparatorSet>,
}

impl VersionRange {
    pub fn parse(requirement: &str) -> Result<Self, RangeError> {
        let sets = requirement
            .split("||")
            .map(ComparatorSet::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sets })
    }

    /// The single concrete version this range admits, if any.
    pub fn single_version(&self) -> Option<Version> {
        let mut found: Option<Version> = None;
        for set in self.sets.iter().filter(|s| !s.is_empty()) {
            let v = set.single()?;
            match &found {
                Some(prev) if *prev != v => return None,
                _ => found = Some(v),
            }
        }
        found
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.sets.iter().any(|s| s.matches(version))
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Result of classifying one requirement against a resolved version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchDecision {
    pub flag: MatchFlag,

    /// Whether the resolved version satisfies the requirement; `None` when
    /// either side could not be parsed
    pub satisfied: Option<bool>,
}

/// Classifies `requirement` against the resolved `version`. Pure function of
/// its inputs.
pub fn classify(requirement: &str, version: &str) -> MatchDecision {
    let range = match VersionRange::parse(requirement) {
        Ok(range) if !requirement.trim().is_empty() => range,
        _ => {
            return MatchDecision {
                flag: MatchFlag::RangeMatch,
                satisfied: None,
            }
        }
    };
    let resolved = match Version::parse(version) {
        Ok(v) => v,
        Err(_) => {
            return MatchDecision {
                flag: MatchFlag::RangeMatch,
                satisfied: None,
            }
        }
    };

    let flag = match range.single_version() {
        Some(pinned) if pinned == resolved => MatchFlag::ExactMatch,
        _ => MatchFlag::RangeMatch,
    };
    MatchDecision {
        flag,
        satisfied: Some(range.matches(&resolved)),
    }
}

/// Decides the match flag for `edge`, whose target is `target`.
pub fn resolve(edge: &GraphEdge, target: &GraphNode) -> MatchFlag {
    classify(&edge.requirement, &target.version_key.version).flag
}
