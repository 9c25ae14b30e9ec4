//! Test selection.
//!
//! A filter decides whether a node is selected (`matches`) and, derived from
//! that, whether it takes part in a run at all (`pass`): a node passes when
//! it matches, when an ancestor matches, or when a descendant matches.

use std::fmt;

use crate::properties::names;
use crate::tree::TestRef;

pub trait TestFilter: Send + Sync + fmt::Debug {
    /// Whether the node itself is selected.
    fn matches(&self, test: TestRef<'_>) -> bool;

    /// An empty filter selects everything.
    fn is_empty(&self) -> bool {
        false
    }

    fn pass(&self, test: TestRef<'_>) -> bool {
        self.matches(test) || self.match_parent(test) || self.match_descendant(test)
    }

    /// Selection that names the node or something below it; explicit tests
    /// only run when this holds.
    fn is_explicit_match(&self, test: TestRef<'_>) -> bool {
        self.matches(test) || self.match_descendant(test)
    }

    fn match_parent(&self, test: TestRef<'_>) -> bool {
        let mut current = test.parent();
        while let Some(parent) = current {
            if self.matches(parent) {
                return true;
            }
            current = parent.parent();
        }
        false
    }

    fn match_descendant(&self, test: TestRef<'_>) -> bool {
        test.children()
            .any(|child| self.matches(child) || self.match_descendant(child))
    }
}

/// Selects every test. Never an explicit match.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFilter;

impl TestFilter for EmptyFilter {
    fn matches(&self, _test: TestRef<'_>) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        true
    }

    fn pass(&self, _test: TestRef<'_>) -> bool {
        true
    }

    fn is_explicit_match(&self, _test: TestRef<'_>) -> bool {
        false
    }
}

fn collect<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

/// Matches tests by simple name.
#[derive(Debug, Clone)]
pub struct NameFilter {
    names: Vec<String>,
}

impl NameFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NameFilter { names: collect(names) }
    }
}

impl TestFilter for NameFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        self.names.iter().any(|n| n == test.name())
    }
}

/// Matches tests by full name, exactly or by substring.
#[derive(Debug, Clone)]
pub struct FullNameFilter {
    names: Vec<String>,
    partial: bool,
}

impl FullNameFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FullNameFilter {
            names: collect(names),
            partial: false,
        }
    }

    /// Match any full name containing `text`.
    pub fn containing(text: impl Into<String>) -> Self {
        FullNameFilter {
            names: vec![text.into()],
            partial: true,
        }
    }
}

impl TestFilter for FullNameFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        let full_name = test.full_name();
        if self.partial {
            self.names.iter().any(|n| full_name.contains(n.as_str()))
        } else {
            self.names.iter().any(|n| n == full_name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdFilter {
    ids: Vec<String>,
}

impl IdFilter {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IdFilter { ids: collect(ids) }
    }
}

impl TestFilter for IdFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        self.ids.iter().any(|id| id == test.id())
    }
}

/// Matches tests carrying any of the given categories.
#[derive(Debug, Clone)]
pub struct CategoryFilter {
    categories: Vec<String>,
}

impl CategoryFilter {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CategoryFilter {
            categories: collect(categories),
        }
    }
}

impl TestFilter for CategoryFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        let props = test.properties();
        self.categories
            .iter()
            .any(|c| props.contains(names::CATEGORY, c))
    }
}

#[derive(Debug, Clone)]
pub struct PropertyFilter {
    key: String,
    value: String,
}

impl PropertyFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        PropertyFilter {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl TestFilter for PropertyFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        test.properties().contains(&self.key, &self.value)
    }
}

/// Inverts a filter. A test passes only if neither it nor an ancestor is
/// selected by the inner filter.
#[derive(Debug)]
pub struct NotFilter {
    inner: Box<dyn TestFilter>,
}

impl NotFilter {
    pub fn new(inner: impl TestFilter + 'static) -> Self {
        NotFilter {
            inner: Box::new(inner),
        }
    }
}

impl TestFilter for NotFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        !self.inner.matches(test)
    }

    fn pass(&self, test: TestRef<'_>) -> bool {
        !self.inner.matches(test) && !self.inner.match_parent(test)
    }

    fn is_explicit_match(&self, _test: TestRef<'_>) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct AndFilter {
    filters: Vec<Box<dyn TestFilter>>,
}

impl AndFilter {
    pub fn new(filters: Vec<Box<dyn TestFilter>>) -> Self {
        AndFilter { filters }
    }

    pub fn and(mut self, filter: impl TestFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl TestFilter for AndFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        self.filters.iter().all(|f| f.matches(test))
    }

    fn is_empty(&self) -> bool {
        self.filters.iter().all(|f| f.is_empty())
    }

    fn pass(&self, test: TestRef<'_>) -> bool {
        self.filters.iter().all(|f| f.pass(test))
    }

    fn is_explicit_match(&self, test: TestRef<'_>) -> bool {
        self.filters.iter().all(|f| f.is_explicit_match(test))
    }
}

#[derive(Debug, Default)]
pub struct OrFilter {
    filters: Vec<Box<dyn TestFilter>>,
}

impl OrFilter {
    pub fn new(filters: Vec<Box<dyn TestFilter>>) -> Self {
        OrFilter { filters }
    }

    pub fn or(mut self, filter: impl TestFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl TestFilter for OrFilter {
    fn matches(&self, test: TestRef<'_>) -> bool {
        self.filters.iter().any(|f| f.matches(test))
    }

    fn is_empty(&self) -> bool {
        self.filters.iter().all(|f| f.is_empty())
    }

    fn pass(&self, test: TestRef<'_>) -> bool {
        self.filters.iter().any(|f| f.pass(test))
    }

    fn is_explicit_match(&self, test: TestRef<'_>) -> bool {
        self.filters.iter().any(|f| f.is_explicit_match(test))
    }
}
