use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

#[cfg(test)]
mod tests;

/// Tag used for coverage collected over an arbitrary (whole) run.
pub const RUN_TAG: &str = "cov";

/// Tag used for coverage collected per owner (e.g. a test module or class).
pub const CLASS_TAG: &str = "clz";

/// A single dependency of a coverage unit: the resource reference and the
/// digest of its content when the unit last finished.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyRecord {
    /// Canonical resource reference (a path or a `file:` URI).
    pub reference: String,

    /// Opaque digest string produced by the
    /// [`Hasher`](crate::hashing::Hasher).
    pub digest: String,
}

impl DependencyRecord {
    pub fn new(reference: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            digest: digest.into(),
        }
    }
}

impl fmt::Display for DependencyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference, self.digest)
    }
}

/// The set of dependencies recorded for one coverage unit.
///
/// Records are unique by reference. Iteration is ordered by reference, which
/// is what the prefix-compressed store format relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    records: BTreeMap<String, String>,
}

impl DependencySet {
    /// Creates an empty dependency set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing the digest if the reference is already
    /// present.
    ///
    /// Returns the previous digest for the reference, if any.
    pub fn insert(&mut self, record: DependencyRecord) -> Option<String> {
        self.records.insert(record.reference, record.digest)
    }

    /// Returns the digest recorded for `reference`.
    pub fn digest(&self, reference: &str) -> Option<&str> {
        self.records.get(reference).map(String::as_str)
    }

    /// Checks if `reference` is part of the set.
    pub fn contains(&self, reference: &str) -> bool {
        self.records.contains_key(reference)
    }

    /// Iterates over `(reference, digest)` pairs in reference order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.records.iter(),
        }
    }

    /// Iterates over the references only.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<DependencyRecord> for DependencySet {
    fn from_iter<I: IntoIterator<Item = DependencyRecord>>(iter: I) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl Extend<DependencyRecord> for DependencySet {
    fn extend<I: IntoIterator<Item = DependencyRecord>>(&mut self, iter: I) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl<'a> IntoIterator for &'a DependencySet {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the `(reference, digest)` pairs of a [`DependencySet`].
pub struct Iter<'a> {
    inner: btree_map::Iter<'a, String, String>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(reference, digest)| (reference.as_str(), digest.as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// How finely a coverage unit is tracked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    /// One dependency set for an arbitrary run.
    Run,
    /// One dependency set per owner (test module, test class).
    Class,
    /// One dependency set per test method. Experimental.
    Method(String),
}

impl Granularity {
    /// The tag used as the file name extension in the store.
    pub fn tag(&self) -> &str {
        match self {
            Granularity::Run => RUN_TAG,
            Granularity::Class => CLASS_TAG,
            Granularity::Method(name) => name,
        }
    }
}

/// Identifies a coverage unit: the owner's name plus the granularity at which
/// its dependencies are tracked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitKey {
    owner: String,
    granularity: Granularity,
}

impl UnitKey {
    pub fn new(owner: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            owner: owner.into(),
            granularity,
        }
    }

    /// Key for whole-run coverage of `owner`.
    pub fn run(owner: impl Into<String>) -> Self {
        Self::new(owner, Granularity::Run)
    }

    /// Key for owner-level coverage.
    pub fn class(owner: impl Into<String>) -> Self {
        Self::new(owner, Granularity::Class)
    }

    /// Key for method-level coverage.
    pub fn method(owner: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(owner, Granularity::Method(method.into()))
    }

    /// Parses a store file name back into a key.
    ///
    /// `<owner>.cov` and `<owner>.clz` map to run and class granularity; any
    /// other `<owner>.<name>` is treated as method granularity. Names without
    /// a `.` (fully hashed names) cannot be mapped back and yield `None`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (owner, tag) = file_name.rsplit_once('.')?;
        if owner.is_empty() || tag.is_empty() {
            return None;
        }
        let granularity = match tag {
            RUN_TAG => Granularity::Run,
            CLASS_TAG => Granularity::Class,
            method => Granularity::Method(method.to_string()),
        };
        Some(Self::new(owner, granularity))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn granularity(&self) -> &Granularity {
        &self.granularity
    }

    /// The tag part of the key (`cov`, `clz` or the method name).
    pub fn tag(&self) -> &str {
        self.granularity.tag()
    }

    /// `<owner>.<tag>`, used both as the store file name and for matching
    /// selection include/exclude prefixes.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.owner, self.tag())
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.tag())
    }
}
