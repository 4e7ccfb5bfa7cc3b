use std::cmp::Ordering;
use std::fmt;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::hash::Signature;

pub const METRIC_NAME_LABEL: &str = "__name__";

const SEP: u8 = 0xff;

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        let cmp = self.name.cmp(&other.name);
        if cmp != Ordering::Equal {
            cmp
        } else {
            self.value.cmp(&other.value)
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}

/// A label set, kept sorted by label name with unique names.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn empty() -> Self {
        Self(vec![])
    }

    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort();
        labels.dedup_by(|a, b| a.name == b.name);
        Self(labels)
    }

    pub fn from_pairs<N: AsRef<str>, V: AsRef<str>>(pairs: &[(N, V)]) -> Self {
        let labels = pairs
            .iter()
            .map(|(n, v)| Label::new(n.as_ref(), v.as_ref()))
            .collect();
        Self::new(labels)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    /// Returns the value of the label or an empty string when the label is absent.
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    /// Sets the label, replacing any existing value. An empty value removes the label.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.0.binary_search_by(|l| l.name.as_str().cmp(name)) {
            Ok(idx) => {
                if value.is_empty() {
                    self.0.remove(idx);
                } else {
                    self.0[idx].value = value.to_string();
                }
            }
            Err(idx) => {
                if !value.is_empty() {
                    self.0.insert(idx, Label::new(name, value));
                }
            }
        }
    }

    pub fn remove(&mut self, name: &str) {
        if let Ok(idx) = self.0.binary_search_by(|l| l.name.as_str().cmp(name)) {
            self.0.remove(idx);
        }
    }

    pub fn without_metric_name(&self) -> Labels {
        let labels = self
            .0
            .iter()
            .filter(|l| l.name != METRIC_NAME_LABEL)
            .cloned()
            .collect();
        Labels(labels)
    }

    /// Keeps only the named labels.
    pub fn keep<S: AsRef<str>>(&self, names: &[S]) -> Labels {
        let labels = self
            .0
            .iter()
            .filter(|l| names.iter().any(|n| n.as_ref() == l.name))
            .cloned()
            .collect();
        Labels(labels)
    }

    /// Drops the named labels together with the metric name.
    pub fn drop_with_name<S: AsRef<str>>(&self, names: &[S]) -> Labels {
        let labels = self
            .0
            .iter()
            .filter(|l| l.name != METRIC_NAME_LABEL && !names.iter().any(|n| n.as_ref() == l.name))
            .cloned()
            .collect();
        Labels(labels)
    }

    pub fn signature(&self) -> Signature {
        Signature::from(self.hash_labels(|_| true))
    }

    /// Hashes only the named labels.
    pub fn signature_with<S: AsRef<str>>(&self, names: &[S]) -> Signature {
        Signature::from(self.hash_labels(|l| names.iter().any(|n| n.as_ref() == l.name)))
    }

    /// Hashes every label except the metric name and the named labels.
    pub fn signature_without<S: AsRef<str>>(&self, names: &[S]) -> Signature {
        Signature::from(self.hash_labels(|l| {
            l.name != METRIC_NAME_LABEL && !names.iter().any(|n| n.as_ref() == l.name)
        }))
    }

    /// Stable 64 bit hash over the whole label set.
    pub fn stable_hash(&self) -> u64 {
        self.hash_labels(|_| true)
    }

    fn hash_labels(&self, include: impl Fn(&Label) -> bool) -> u64 {
        let mut hasher = Xxh3::new();
        for label in self.0.iter().filter(|l| include(l)) {
            hasher.update(label.name.as_bytes());
            hasher.update(&[SEP]);
            hasher.update(label.value.as_bytes());
            hasher.update(&[SEP]);
        }
        hasher.digest()
    }

    pub fn into_vec(self) -> Vec<Label> {
        self.0
    }
}

impl Deref for Labels {
    type Target = [Label];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialOrd for Labels {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Labels {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let cmp = a.cmp(b);
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl FromIterator<Label> for Labels {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Labels::new(iter.into_iter().collect())
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{label}")?;
        }
        write!(f, "}}")
    }
}

/// Builder for incremental edits that re-sorts once on completion.
#[derive(Debug, Default, Clone)]
pub struct LabelsBuilder {
    base: Labels,
    del: Vec<String>,
    add: Vec<Label>,
}

impl LabelsBuilder {
    pub fn new(base: &Labels) -> Self {
        Self {
            base: base.clone(),
            del: vec![],
            add: vec![],
        }
    }

    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        self.del.retain(|n| n != name);
        self.add.retain(|l| l.name != name);
        if value.is_empty() {
            self.del.push(name.to_string());
        } else {
            self.add.push(Label::new(name, value));
        }
        self
    }

    pub fn del(&mut self, name: &str) -> &mut Self {
        self.add.retain(|l| l.name != name);
        self.del.push(name.to_string());
        self
    }

    pub fn labels(&self) -> Labels {
        let mut labels: Vec<Label> = self
            .base
            .iter()
            .filter(|l| !self.del.contains(&l.name) && !self.add.iter().any(|a| a.name == l.name))
            .cloned()
            .collect();
        labels.extend(self.add.iter().cloned());
        Labels::new(labels)
    }
}

impl Hash for LabelsBuilder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.labels().hash(state)
    }
}

/// Reports whether `name` is a valid label name.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
