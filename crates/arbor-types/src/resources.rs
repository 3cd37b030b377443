//! The resource algebra: typed quantities with role and reservation metadata
//!
//! A [`Resource`] is a named quantity of one of three kinds (scalar, integer
//! ranges, discrete items), tagged with a role (default `"*"`, meaning
//! unreserved) and optional reservation metadata recording the principal
//! that reserved it. A [`ResourceSet`] is an ordered, deduplicated multiset
//! of resources supporting merge, checked subtraction, containment, and the
//! `flatten` transform that rewrites role/reservation while preserving
//! quantities. Flatten is the reserve/unreserve primitive: for any
//! unreserved set `r`, `r.flatten(role, p).flatten_unreserved() == r`.
//!
//! Pure value semantics throughout; nothing here touches shared state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// The default role: unreserved, shared by everyone
pub const DEFAULT_ROLE: &str = "*";

/// Tolerance for scalar comparisons, absorbing f64 accumulation dust
const EPSILON: f64 = 1e-9;

/// Errors from resource algebra operations
///
/// `InsufficientResources` is an ordinary runtime condition (the ledger
/// lacks matching quantity); `IncompatibleKinds` signals a programming
/// error such as subtracting a range quantity from a scalar of the same
/// name. The two are never conflated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Subtraction lacked a matching entry of sufficient quantity
    #[error("insufficient resources: {missing} is not covered")]
    InsufficientResources { missing: String },

    /// Two quantities of different kinds met under the same name
    #[error("incompatible resource kinds for '{name}': {left} vs {right}")]
    IncompatibleKinds {
        name: String,
        left: &'static str,
        right: &'static str,
    },

    /// A textual resource specification could not be parsed
    #[error("invalid resource specification: {0}")]
    InvalidResource(String),
}

/// Reservation metadata: who reserved the resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The principal that issued the reservation
    pub principal: String,
}

impl Reservation {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }
}

/// A closed integer interval, `begin <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub begin: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(begin: u64, end: u64) -> Self {
        debug_assert!(begin <= end);
        Self { begin, end }
    }

    fn covers(&self, other: &Interval) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.begin, self.end)
    }
}

/// The kind-specific quantity of a resource
///
/// Arithmetic dispatches on the tag; quantities of different tags never
/// combine (see [`ResourceError::IncompatibleKinds`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A fractional magnitude, e.g. `cpus:1.5`
    Scalar { value: f64 },

    /// Disjoint integer ranges, e.g. `ports:[31000-32000]`
    Ranges { ranges: Vec<Interval> },

    /// Discrete named items, e.g. `disks:{sda1,sda2}`
    Items { items: BTreeSet<String> },
}

impl ResourceKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceKind::Scalar { .. } => "scalar",
            ResourceKind::Ranges { .. } => "ranges",
            ResourceKind::Items { .. } => "items",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResourceKind::Scalar { value } => *value <= EPSILON,
            ResourceKind::Ranges { ranges } => ranges.is_empty(),
            ResourceKind::Items { items } => items.is_empty(),
        }
    }

    /// Whether this quantity covers `other` entirely
    ///
    /// Quantities of different kinds never cover each other.
    pub fn contains(&self, other: &ResourceKind) -> bool {
        match (self, other) {
            (ResourceKind::Scalar { value: a }, ResourceKind::Scalar { value: b }) => {
                *b <= *a + EPSILON
            }
            (ResourceKind::Ranges { ranges: a }, ResourceKind::Ranges { ranges: b }) => {
                b.iter().all(|r| a.iter().any(|c| c.covers(r)))
            }
            (ResourceKind::Items { items: a }, ResourceKind::Items { items: b }) => {
                b.is_subset(a)
            }
            _ => false,
        }
    }

    /// Sum two quantities; `None` when the kinds differ
    pub fn checked_add(&self, other: &ResourceKind) -> Option<ResourceKind> {
        match (self, other) {
            (ResourceKind::Scalar { value: a }, ResourceKind::Scalar { value: b }) => {
                Some(ResourceKind::Scalar { value: a + b })
            }
            (ResourceKind::Ranges { ranges: a }, ResourceKind::Ranges { ranges: b }) => {
                let mut merged = a.clone();
                merged.extend(b.iter().copied());
                Some(ResourceKind::Ranges {
                    ranges: coalesce(merged),
                })
            }
            (ResourceKind::Items { items: a }, ResourceKind::Items { items: b }) => {
                Some(ResourceKind::Items {
                    items: a.union(b).cloned().collect(),
                })
            }
            _ => None,
        }
    }

    /// Subtract a contained quantity; `None` when the kinds differ
    ///
    /// Callers must establish `self.contains(other)` first; subtraction of
    /// a non-contained quantity is reported by the caller as
    /// `InsufficientResources` before this runs.
    fn sub_contained(&self, other: &ResourceKind) -> Option<ResourceKind> {
        match (self, other) {
            (ResourceKind::Scalar { value: a }, ResourceKind::Scalar { value: b }) => {
                let remaining = a - b;
                Some(ResourceKind::Scalar {
                    value: if remaining <= EPSILON { 0.0 } else { remaining },
                })
            }
            (ResourceKind::Ranges { ranges: a }, ResourceKind::Ranges { ranges: b }) => {
                Some(ResourceKind::Ranges {
                    ranges: subtract_ranges(a, b),
                })
            }
            (ResourceKind::Items { items: a }, ResourceKind::Items { items: b }) => {
                Some(ResourceKind::Items {
                    items: a.difference(b).cloned().collect(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Scalar { value } => write!(f, "{}", value),
            ResourceKind::Ranges { ranges } => {
                let parts: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            ResourceKind::Items { items } => {
                let parts: Vec<&str> = items.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

/// Sort and merge overlapping or adjacent intervals
fn coalesce(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort();
    let mut result: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match result.last_mut() {
            // Adjacent integer intervals merge too: [1-2] + [3-4] = [1-4].
            Some(last) if interval.begin <= last.end.saturating_add(1) => {
                last.end = last.end.max(interval.end);
            }
            _ => result.push(interval),
        }
    }
    result
}

/// Remove `b` from `a`; both coalesced, `b` contained in `a`
fn subtract_ranges(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut result = Vec::new();
    for interval in a {
        let mut cursor = interval.begin;
        let mut exhausted = false;
        for cut in b.iter().filter(|c| c.begin <= interval.end && c.end >= interval.begin) {
            if cut.begin > cursor {
                result.push(Interval::new(cursor, cut.begin - 1));
            }
            if cut.end >= interval.end {
                exhausted = true;
                break;
            }
            cursor = cursor.max(cut.end + 1);
        }
        if !exhausted && cursor <= interval.end {
            result.push(Interval::new(cursor, interval.end));
        }
    }
    coalesce(result)
}

/// A typed, role- and reservation-tagged quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource name, e.g. `cpus`, `mem`, `ports`
    pub name: String,

    /// The quantity and its kind
    pub kind: ResourceKind,

    /// Role this resource is assigned to; `"*"` means unreserved
    pub role: String,

    /// Reservation metadata, present iff dynamically reserved
    pub reservation: Option<Reservation>,
}

impl Resource {
    /// An unreserved scalar resource
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Scalar { value },
            role: DEFAULT_ROLE.to_string(),
            reservation: None,
        }
    }

    /// An unreserved ranges resource
    pub fn ranges(name: impl Into<String>, ranges: Vec<Interval>) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Ranges {
                ranges: coalesce(ranges),
            },
            role: DEFAULT_ROLE.to_string(),
            reservation: None,
        }
    }

    /// An unreserved items resource
    pub fn items<I, S>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ResourceKind::Items {
                items: items.into_iter().map(Into::into).collect(),
            },
            role: DEFAULT_ROLE.to_string(),
            reservation: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_reservation(mut self, principal: impl Into<String>) -> Self {
        self.reservation = Some(Reservation::new(principal));
        self
    }

    /// Whether this resource carries the default role
    pub fn is_unreserved(&self) -> bool {
        self.role == DEFAULT_ROLE
    }

    /// Whether this resource is dynamically reserved: non-default role
    /// plus reservation metadata
    pub fn is_dynamically_reserved(&self) -> bool {
        self.role != DEFAULT_ROLE && self.reservation.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
    }

    /// Same ledger identity: name, role, and reservation metadata
    fn same_identity(&self, other: &Resource) -> bool {
        self.name == other.name && self.role == other.role && self.reservation == other.reservation
    }

    /// Fungible resources merge and subtract: same identity, same kind tag
    fn is_fungible_with(&self, other: &Resource) -> bool {
        self.same_identity(other) && self.kind.kind_name() == other.kind.kind_name()
    }

    /// This resource with its role and reservation rewritten
    pub fn flattened(&self, role: &str, reservation: Option<&Reservation>) -> Resource {
        Resource {
            name: self.name.clone(),
            kind: self.kind.clone(),
            role: role.to_string(),
            reservation: reservation.cloned(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reservation {
            Some(reservation) => write!(
                f,
                "{}({}, {}):{}",
                self.name, self.role, reservation.principal, self.kind
            ),
            None => write!(f, "{}({}):{}", self.name, self.role, self.kind),
        }
    }
}

/// An ordered, deduplicated collection of resources
///
/// Pushing a resource fungible with an existing entry sums the two;
/// resources differing in name, role, reservation, or kind stay separate
/// entries. Empty quantities are dropped on entry, so two sets that
/// represent the same multiset compare equal entry-for-entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawResourceSet")]
pub struct ResourceSet {
    entries: Vec<Resource>,
}

/// Wire mirror of [`ResourceSet`]; re-pushed entry by entry on the way
/// in so a deserialized set honors the same normal form `push` enforces.
#[derive(Deserialize)]
struct RawResourceSet {
    entries: Vec<Resource>,
}

impl From<RawResourceSet> for ResourceSet {
    fn from(raw: RawResourceSet) -> Self {
        raw.entries
            .into_iter()
            .map(|mut resource| {
                if let ResourceKind::Ranges { ranges } = resource.kind {
                    resource.kind = ResourceKind::Ranges {
                        ranges: coalesce(ranges),
                    };
                }
                resource
            })
            .collect()
    }
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the compact text form: `cpus:1;mem:512`,
    /// `ports(role):[31000-32000]`, `disks:{sda1,sda2}`
    pub fn parse(spec: &str) -> Result<Self, ResourceError> {
        let mut set = ResourceSet::new();
        for token in spec.split(';') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (head, value) = token.split_once(':').ok_or_else(|| {
                ResourceError::InvalidResource(format!("missing ':' in '{}'", token))
            })?;
            let (name, role) = match head.split_once('(') {
                Some((name, rest)) => {
                    let role = rest.strip_suffix(')').ok_or_else(|| {
                        ResourceError::InvalidResource(format!("unclosed role in '{}'", head))
                    })?;
                    (name.trim(), role.trim())
                }
                None => (head.trim(), DEFAULT_ROLE),
            };
            if name.is_empty() {
                return Err(ResourceError::InvalidResource(format!(
                    "empty resource name in '{}'",
                    token
                )));
            }
            let resource = parse_quantity(name, value.trim())?.with_role(role);
            set.push(resource);
        }
        Ok(set)
    }

    /// Add a resource, summing it into a fungible entry if one exists
    pub fn push(&mut self, resource: Resource) {
        if resource.is_empty() {
            return;
        }
        for entry in &mut self.entries {
            if entry.is_fungible_with(&resource) {
                if let Some(sum) = entry.kind.checked_add(&resource.kind) {
                    entry.kind = sum;
                    return;
                }
            }
        }
        self.entries.push(resource);
    }

    /// The union of two sets, summing fungible entries
    pub fn merge(&self, other: &ResourceSet) -> ResourceSet {
        let mut result = self.clone();
        for resource in &other.entries {
            result.push(resource.clone());
        }
        result
    }

    /// Subtract `other` from this set
    ///
    /// Fails with `InsufficientResources` when a matching entry of
    /// sufficient quantity is missing, and with `IncompatibleKinds` when
    /// the only identity match carries a different kind tag. Never clamps.
    pub fn checked_sub(&self, other: &ResourceSet) -> Result<ResourceSet, ResourceError> {
        let mut result = self.clone();
        for resource in other.entries.iter().filter(|r| !r.is_empty()) {
            let index = result
                .entries
                .iter()
                .position(|entry| entry.is_fungible_with(resource));
            let index = match index {
                Some(index) => index,
                None => {
                    // Distinguish a kind clash from plain insufficiency.
                    if let Some(clash) = result
                        .entries
                        .iter()
                        .find(|entry| entry.same_identity(resource))
                    {
                        return Err(ResourceError::IncompatibleKinds {
                            name: resource.name.clone(),
                            left: clash.kind.kind_name(),
                            right: resource.kind.kind_name(),
                        });
                    }
                    return Err(ResourceError::InsufficientResources {
                        missing: resource.to_string(),
                    });
                }
            };
            let entry = &mut result.entries[index];
            if !entry.kind.contains(&resource.kind) {
                return Err(ResourceError::InsufficientResources {
                    missing: resource.to_string(),
                });
            }
            match entry.kind.sub_contained(&resource.kind) {
                Some(remaining) => entry.kind = remaining,
                None => {
                    return Err(ResourceError::IncompatibleKinds {
                        name: resource.name.clone(),
                        left: entry.kind.kind_name(),
                        right: resource.kind.kind_name(),
                    })
                }
            }
            if result.entries[index].is_empty() {
                result.entries.remove(index);
            }
        }
        Ok(result)
    }

    /// Whether every entry of `other` is covered by a fungible entry here
    pub fn contains(&self, other: &ResourceSet) -> bool {
        other.entries.iter().filter(|r| !r.is_empty()).all(|resource| {
            self.entries
                .iter()
                .any(|entry| entry.is_fungible_with(resource) && entry.kind.contains(&resource.kind))
        })
    }

    /// Rewrite every entry's role and reservation, preserving quantities
    ///
    /// This is the reserve/unreserve transform. Entries that become
    /// identical under the new tags are summed.
    pub fn flatten(&self, role: &str, reservation: Option<&Reservation>) -> ResourceSet {
        let mut result = ResourceSet::new();
        for resource in &self.entries {
            result.push(resource.flattened(role, reservation));
        }
        result
    }

    /// Rewrite every entry back to the default role with no reservation
    pub fn flatten_unreserved(&self) -> ResourceSet {
        self.flatten(DEFAULT_ROLE, None)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Resource::is_empty)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.entries.iter()
    }

    /// Distinct roles present in this set
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !roles.contains(&entry.role) {
                roles.push(entry.role.clone());
            }
        }
        roles
    }

    /// Distinct reservation principals recorded in this set
    pub fn reserver_principals(&self) -> Vec<String> {
        let mut principals: Vec<String> = Vec::new();
        for entry in &self.entries {
            if let Some(reservation) = &entry.reservation {
                if !principals.contains(&reservation.principal) {
                    principals.push(reservation.principal.clone());
                }
            }
        }
        principals
    }
}

fn parse_quantity(name: &str, value: &str) -> Result<Resource, ResourceError> {
    if let Some(body) = value.strip_prefix('[') {
        let body = body.strip_suffix(']').ok_or_else(|| {
            ResourceError::InvalidResource(format!("unclosed range list for '{}'", name))
        })?;
        let mut ranges = Vec::new();
        for part in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (begin, end) = part.split_once('-').ok_or_else(|| {
                ResourceError::InvalidResource(format!("malformed range '{}'", part))
            })?;
            let begin: u64 = begin.trim().parse().map_err(|_| {
                ResourceError::InvalidResource(format!("malformed range '{}'", part))
            })?;
            let end: u64 = end.trim().parse().map_err(|_| {
                ResourceError::InvalidResource(format!("malformed range '{}'", part))
            })?;
            if begin > end {
                return Err(ResourceError::InvalidResource(format!(
                    "inverted range '{}'",
                    part
                )));
            }
            ranges.push(Interval::new(begin, end));
        }
        Ok(Resource::ranges(name, ranges))
    } else if let Some(body) = value.strip_prefix('{') {
        let body = body.strip_suffix('}').ok_or_else(|| {
            ResourceError::InvalidResource(format!("unclosed item list for '{}'", name))
        })?;
        let items: Vec<&str> = body.split(',').map(str::trim).filter(|i| !i.is_empty()).collect();
        Ok(Resource::items(name, items))
    } else {
        let scalar: f64 = value.parse().map_err(|_| {
            ResourceError::InvalidResource(format!("malformed scalar '{}' for '{}'", value, name))
        })?;
        if scalar < 0.0 {
            return Err(ResourceError::InvalidResource(format!(
                "negative quantity for '{}'",
                name
            )));
        }
        Ok(Resource::scalar(name, scalar))
    }
}

impl std::ops::Add for ResourceSet {
    type Output = ResourceSet;

    fn add(self, other: ResourceSet) -> ResourceSet {
        self.merge(&other)
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        for resource in iter {
            set.push(resource);
        }
        set
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.entries.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}
