//! Resource algebra
//!
//! Resources are a set-like collection of (name, role, value) triples,
//! optionally annotated with disk metadata for persistent volumes.
//! Within a role, scalars of the same name are summed and ranges are
//! kept merged and disjoint. Scalars never go negative: subtraction
//! clamps at empty.

pub mod value;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use value::Value;

/// The unreserved role.
pub const ANY_ROLE: &str = "*";

/// Ephemeral port resources are accounted for internally but stripped
/// from offers before they reach frameworks.
pub const EPHEMERAL_PORTS: &str = "ephemeral_ports";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub container_path: String,
    pub host_path: Option<String>,
    pub mode: VolumeMode,
}

/// Disk metadata. A disk resource with a persistence id is a persistent
/// volume: it survives task termination and is scoped by role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub persistence: Option<String>,
    pub volume: Option<Volume>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub role: String,
    pub value: Value,
    pub disk: Option<DiskInfo>,
}

impl Resource {
    pub fn scalar(name: &str, role: &str, amount: f64) -> Self {
        Resource {
            name: name.to_string(),
            role: role.to_string(),
            value: Value::Scalar(amount),
            disk: None,
        }
    }

    pub fn ranges(name: &str, role: &str, ranges: &[(u64, u64)]) -> Self {
        Resource {
            name: name.to_string(),
            role: role.to_string(),
            value: Value::Ranges(value::coalesce(ranges.to_vec())),
            disk: None,
        }
    }

    /// A persistent disk volume of `amount` megabytes.
    pub fn persistent_disk(role: &str, amount: f64, id: &str, container_path: &str) -> Self {
        Resource {
            name: "disk".to_string(),
            role: role.to_string(),
            value: Value::Scalar(amount),
            disk: Some(DiskInfo {
                persistence: Some(id.to_string()),
                volume: Some(Volume {
                    container_path: container_path.to_string(),
                    host_path: None,
                    mode: VolumeMode::ReadWrite,
                }),
            }),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.disk
            .as_ref()
            .map_or(false, |d| d.persistence.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("resource has an empty name".to_string());
        }
        self.value
            .validate()
            .map_err(|e| format!("resource '{}' is invalid: {}", self.name, e))
    }

    /// Whether `other` can be merged into this entry. Persistent
    /// volumes are unique and never merge.
    fn addable(&self, other: &Resource) -> bool {
        self.name == other.name
            && self.role == other.role
            && self.value.same_kind(&other.value)
            && self.disk == other.disk
            && !self.is_persistent()
    }

    fn matches(&self, other: &Resource) -> bool {
        self.name == other.name
            && self.role == other.role
            && self.value.same_kind(&other.value)
            && self.disk == other.disk
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):{}", self.name, self.role, self.value)?;
        if let Some(disk) = &self.disk {
            if let Some(id) = &disk.persistence {
                write!(f, "[{}]", id)?;
            }
        }
        Ok(())
    }
}

/// A collection of resources closed under addition and subtraction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources(Vec<Resource>);

impl Resources {
    pub fn new() -> Self {
        Resources(Vec::new())
    }

    /// Parse `"cpus:4;mem(prod):1024;ports:[31000-32000]"`, applying
    /// `default_role` to entries without an explicit `(role)` suffix.
    pub fn parse(text: &str, default_role: &str) -> Result<Self, String> {
        let mut resources = Resources::new();
        for entry in text.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (head, raw_value) = entry
                .split_once(':')
                .ok_or_else(|| format!("expected 'name:value' in '{}'", entry))?;

            let (name, role) = match head.trim().split_once('(') {
                Some((name, role)) => {
                    let role = role
                        .strip_suffix(')')
                        .ok_or_else(|| format!("unclosed role in '{}'", head))?;
                    (name.trim().to_string(), role.trim().to_string())
                }
                None => (head.trim().to_string(), default_role.to_string()),
            };

            let resource = Resource {
                name,
                role,
                value: value::parse(raw_value)?,
                disk: None,
            };
            resource.validate()?;
            resources.add(resource);
        }
        Ok(resources)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.0.iter()
    }

    pub fn add(&mut self, resource: Resource) {
        if resource.is_empty() {
            return;
        }
        for existing in &mut self.0 {
            if existing.addable(&resource) {
                existing.value = existing.value.add(&resource.value);
                return;
            }
        }
        self.0.push(resource);
    }

    pub fn add_all(&mut self, other: &Resources) {
        for resource in other.iter() {
            self.add(resource.clone());
        }
    }

    /// Remove `resource` from the collection, clamping at empty.
    pub fn subtract(&mut self, resource: &Resource) {
        if resource.is_empty() {
            return;
        }
        for existing in &mut self.0 {
            if existing.matches(resource) {
                existing.value = existing.value.subtract(&resource.value);
                break;
            }
        }
        self.0.retain(|r| !r.is_empty());
    }

    pub fn subtract_all(&mut self, other: &Resources) {
        for resource in other.iter() {
            self.subtract(resource);
        }
    }

    pub fn plus(&self, other: &Resources) -> Resources {
        let mut result = self.clone();
        result.add_all(other);
        result
    }

    pub fn minus(&self, other: &Resources) -> Resources {
        let mut result = self.clone();
        result.subtract_all(other);
        result
    }

    pub fn contains(&self, other: &Resources) -> bool {
        other.iter().all(|needed| {
            // Sum every entry matching (name, role, kind, disk) and
            // check containment of the combined value.
            let mut combined: Option<Value> = None;
            for r in self.iter() {
                if r.matches(needed) {
                    combined = Some(match combined {
                        Some(v) => v.add(&r.value),
                        None => r.value.clone(),
                    });
                }
            }
            combined.map_or(false, |v| v.contains(&needed.value))
        })
    }

    pub fn contains_resource(&self, needed: &Resource) -> bool {
        let mut single = Resources::new();
        single.add(needed.clone());
        self.contains(&single)
    }

    /// Strip roles: every entry is re-labeled with `role` (default the
    /// unreserved role) and merged.
    pub fn flatten(&self, role: Option<&str>) -> Resources {
        let role = role.unwrap_or(ANY_ROLE);
        let mut flattened = Resources::new();
        for resource in self.iter() {
            let mut r = resource.clone();
            r.role = role.to_string();
            flattened.add(r);
        }
        flattened
    }

    /// Extract a subset matching `target`, preferring resources
    /// reserved for `role`, then unreserved, then any other role.
    ///
    /// Returns None when the target cannot be satisfied.
    pub fn find(&self, target: &Resources, role: &str) -> Option<Resources> {
        let mut found = Resources::new();

        for want in target.iter() {
            let mut remaining = want.clone();
            remaining.role = role.to_string();
            let mut done = false;

            for pass in 0..3 {
                if done {
                    break;
                }
                for candidate in self.iter() {
                    if candidate.name != want.name
                        || !candidate.value.same_kind(&want.value)
                        || candidate.disk != want.disk
                    {
                        continue;
                    }
                    let eligible = match pass {
                        0 => candidate.role == role,
                        1 => candidate.role == ANY_ROLE && role != ANY_ROLE,
                        _ => candidate.role != ANY_ROLE && candidate.role != role,
                    };
                    if !eligible {
                        continue;
                    }

                    if candidate.value.contains(&remaining.value) {
                        let mut taken = remaining.clone();
                        taken.role = candidate.role.clone();
                        found.add(taken);
                        done = true;
                        break;
                    } else {
                        found.add(candidate.clone());
                        remaining.value = remaining.value.subtract(&candidate.value);
                    }
                }
            }

            if !done {
                return None;
            }
        }

        Some(found)
    }

    /// All persistent disk volumes in the collection.
    pub fn persistent_disks(&self) -> Vec<&Resource> {
        self.iter().filter(|r| r.is_persistent()).collect()
    }

    /// Drop entries by name (used to strip ephemeral ports from offers).
    pub fn without(&self, name: &str) -> Resources {
        Resources(self.iter().filter(|r| r.name != name).cloned().collect())
    }

    pub fn cpus(&self) -> f64 {
        self.sum_scalar("cpus")
    }

    pub fn mem(&self) -> f64 {
        self.sum_scalar("mem")
    }

    fn sum_scalar(&self, name: &str) -> f64 {
        self.iter()
            .filter(|r| r.name == name)
            .map(|r| match &r.value {
                Value::Scalar(s) => *s,
                _ => 0.0,
            })
            .sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        for resource in self.iter() {
            resource.validate()?;
        }
        Ok(())
    }

    /// Group by framework-visible role for logging.
    pub fn by_role(&self) -> HashMap<String, Resources> {
        let mut map: HashMap<String, Resources> = HashMap::new();
        for resource in self.iter() {
            map.entry(resource.role.clone())
                .or_default()
                .add(resource.clone());
        }
        map
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, resource) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", resource)?;
        }
        Ok(())
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut resources = Resources::new();
        for resource in iter {
            resources.add(resource);
        }
        resources
    }
}
