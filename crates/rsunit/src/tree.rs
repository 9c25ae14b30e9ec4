//! The test tree: an arena of test nodes addressed by [`NodeIndex`].
//!
//! Suites own the ordered list of their children's indices; every node keeps
//! a non-owning index of its parent. Ids come from the tree's own
//! [`IdGenerator`], so they are unique within one tree.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::filter::TestFilter;
use crate::method::{FixtureFactory, Hook, TestMethod};
use crate::properties::{names, PropertyBag};

// ============================================================================
// Identifiers
// ============================================================================

/// Position of a node in its [`TestTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Hands out prefixed, monotonically increasing test ids.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
    next: u64,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        IdGenerator {
            prefix: prefix.into(),
            next: 1000,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}-{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator::new("0")
    }
}

// ============================================================================
// Node data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    NotRunnable,
    Runnable,
    Explicit,
    Skipped,
    Ignored,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Role of a suite in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuiteKind {
    Assembly,
    Namespace,
    Fixture,
    SetUpFixture,
    ParameterizedFixture,
    GenericFixture,
    ParameterizedMethod,
    Theory,
}

impl SuiteKind {
    pub fn test_type(self) -> &'static str {
        match self {
            SuiteKind::Assembly => "Assembly",
            SuiteKind::Namespace => "TestSuite",
            SuiteKind::Fixture => "TestFixture",
            SuiteKind::SetUpFixture => "SetUpFixture",
            SuiteKind::ParameterizedFixture => "ParameterizedFixture",
            SuiteKind::GenericFixture => "GenericFixture",
            SuiteKind::ParameterizedMethod => "ParameterizedMethod",
            SuiteKind::Theory => "Theory",
        }
    }

    /// Kinds that stand for a fixture class and give their tests a class name.
    fn is_fixture_like(self) -> bool {
        matches!(
            self,
            SuiteKind::Fixture
                | SuiteKind::SetUpFixture
                | SuiteKind::ParameterizedFixture
                | SuiteKind::GenericFixture
        )
    }

    fn is_method_suite(self) -> bool {
        matches!(self, SuiteKind::ParameterizedMethod | SuiteKind::Theory)
    }
}

/// How fixture instances are handed to leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifeCycle {
    #[default]
    SingleInstance,
    InstancePerTestCase,
}

#[derive(Clone)]
pub struct TestSuite {
    pub kind: SuiteKind,
    pub children: Vec<NodeIndex>,
    pub one_time_setup: Vec<Hook>,
    pub one_time_teardown: Vec<Hook>,
    pub setup: Vec<Hook>,
    pub teardown: Vec<Hook>,
    pub arguments: Vec<Value>,
    pub maintain_order: bool,
    pub fixture: Option<FixtureFactory>,
    pub lifecycle: LifeCycle,
}

impl TestSuite {
    pub fn new(kind: SuiteKind) -> Self {
        TestSuite {
            kind,
            children: Vec::new(),
            one_time_setup: Vec::new(),
            one_time_teardown: Vec::new(),
            setup: Vec::new(),
            teardown: Vec::new(),
            arguments: Vec::new(),
            maintain_order: false,
            fixture: None,
            lifecycle: LifeCycle::default(),
        }
    }

    pub fn has_per_test_hooks(&self) -> bool {
        !self.setup.is_empty() || !self.teardown.is_empty()
    }

    fn hooks(&self) -> impl Iterator<Item = &Hook> {
        self.one_time_setup
            .iter()
            .chain(&self.one_time_teardown)
            .chain(&self.setup)
            .chain(&self.teardown)
    }

    /// Same suite data without children.
    fn shallow_clone(&self) -> Self {
        TestSuite {
            children: Vec::new(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("kind", &self.kind)
            .field("children", &self.children)
            .field("one_time_setup", &self.one_time_setup.len())
            .field("one_time_teardown", &self.one_time_teardown.len())
            .field("setup", &self.setup.len())
            .field("teardown", &self.teardown.len())
            .field("maintain_order", &self.maintain_order)
            .field("has_fixture", &self.fixture.is_some())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Method(Arc<TestMethod>),
    Suite(TestSuite),
}

#[derive(Debug, Clone)]
pub struct TestNode {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub run_state: RunState,
    pub properties: PropertyBag,
    pub parent: Option<NodeIndex>,
    pub kind: NodeKind,
}

impl TestNode {
    pub fn is_suite(&self) -> bool {
        matches!(self.kind, NodeKind::Suite(_))
    }

    pub fn suite(&self) -> Option<&TestSuite> {
        match &self.kind {
            NodeKind::Suite(s) => Some(s),
            NodeKind::Method(_) => None,
        }
    }

    pub fn method(&self) -> Option<&Arc<TestMethod>> {
        match &self.kind {
            NodeKind::Method(m) => Some(m),
            NodeKind::Suite(_) => None,
        }
    }

    pub fn test_type(&self) -> &'static str {
        match &self.kind {
            NodeKind::Suite(s) => s.kind.test_type(),
            NodeKind::Method(_) => "TestMethod",
        }
    }

    /// First recorded reason for a non-runnable, skipped or ignored state.
    pub fn skip_reason(&self) -> Option<&str> {
        self.properties.get(names::SKIP_REASON)
    }
}

// ============================================================================
// Tree
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TestTree {
    nodes: Vec<TestNode>,
    ids: IdGenerator,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_prefix(prefix: impl Into<String>) -> Self {
        TestTree {
            nodes: Vec::new(),
            ids: IdGenerator::new(prefix),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a detached suite node. Attach it with [`add`](Self::add).
    pub fn add_suite(&mut self, kind: SuiteKind, name: impl Into<String>) -> NodeIndex {
        let name = name.into();
        let method_name = kind.is_method_suite().then(|| name.clone());
        let class_name = kind.is_fixture_like().then(|| name.clone());
        self.push(name, class_name, method_name, NodeKind::Suite(TestSuite::new(kind)))
    }

    /// Create a detached leaf node.
    pub fn add_method(&mut self, name: impl Into<String>, method: TestMethod) -> NodeIndex {
        let method_name = Some(method.signature.name.clone());
        self.push(name.into(), None, method_name, NodeKind::Method(Arc::new(method)))
    }

    fn push(
        &mut self,
        name: String,
        class_name: Option<String>,
        method_name: Option<String>,
        kind: NodeKind,
    ) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(TestNode {
            id: self.ids.next_id(),
            full_name: name.clone(),
            name,
            class_name,
            method_name,
            run_state: RunState::Runnable,
            properties: PropertyBag::new(),
            parent: None,
            kind,
        });
        index
    }

    /// Append `child` to `parent` and recompute the full names of the child's subtree.
    ///
    /// Duplicate names are not rejected.
    pub fn add(&mut self, parent: NodeIndex, child: NodeIndex) -> Result<()> {
        self.node(child)?;
        let node = self.node_mut(parent)?;
        match &mut node.kind {
            NodeKind::Suite(suite) => suite.children.push(child),
            NodeKind::Method(_) => return Err(EngineError::NotASuite(node.full_name.clone())),
        }
        self.nodes[child.0].parent = Some(parent);
        self.refresh_names(child);
        Ok(())
    }

    fn refresh_names(&mut self, start: NodeIndex) {
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            let (full_name, class_name) = self.derived_names(index);
            let node = &mut self.nodes[index.0];
            node.full_name = full_name;
            node.class_name = class_name;
            if let NodeKind::Suite(suite) = &node.kind {
                stack.extend(suite.children.iter().copied());
            }
        }
    }

    fn derived_names(&self, index: NodeIndex) -> (String, Option<String>) {
        let node = &self.nodes[index.0];
        let Some(parent) = node.parent.map(|p| &self.nodes[p.0]) else {
            return (node.name.clone(), node.class_name.clone());
        };
        let parent_kind = parent.suite().map(|s| s.kind);
        let full_name = match parent_kind {
            Some(SuiteKind::Assembly) => node.name.clone(),
            // Cases of a method suite sit beside the method name, not under it.
            Some(SuiteKind::ParameterizedMethod | SuiteKind::Theory) => {
                let prefix = parent.full_name.strip_suffix(parent.name.as_str()).unwrap_or("");
                format!("{prefix}{}", node.name)
            }
            _ => format!("{}.{}", parent.full_name, node.name),
        };
        let class_name = match node.suite().map(|s| s.kind) {
            Some(kind) if kind.is_fixture_like() => Some(full_name.clone()),
            Some(kind) if !kind.is_method_suite() => None,
            _ => parent.class_name.clone(),
        };
        (full_name, class_name)
    }

    pub fn get(&self, index: NodeIndex) -> Option<&TestNode> {
        self.nodes.get(index.0)
    }

    pub fn node(&self, index: NodeIndex) -> Result<&TestNode> {
        self.nodes.get(index.0).ok_or(EngineError::UnknownNode(index.0))
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> Result<&mut TestNode> {
        self.nodes
            .get_mut(index.0)
            .ok_or(EngineError::UnknownNode(index.0))
    }

    pub fn test(&self, index: NodeIndex) -> Option<TestRef<'_>> {
        self.get(index).map(|_| TestRef { tree: self, index })
    }

    pub fn suite(&self, index: NodeIndex) -> Result<&TestSuite> {
        let node = self.node(index)?;
        node.suite()
            .ok_or_else(|| EngineError::NotASuite(node.full_name.clone()))
    }

    pub fn suite_mut(&mut self, index: NodeIndex) -> Result<&mut TestSuite> {
        let node = self.node_mut(index)?;
        match &mut node.kind {
            NodeKind::Suite(s) => Ok(s),
            NodeKind::Method(_) => Err(EngineError::NotASuite(node.full_name.clone())),
        }
    }

    pub fn children(&self, index: NodeIndex) -> &[NodeIndex] {
        match self.get(index).map(|n| &n.kind) {
            Some(NodeKind::Suite(s)) => &s.children,
            _ => &[],
        }
    }

    /// Leaf = 1, suite = recursive sum over children.
    pub fn test_case_count(&self, index: NodeIndex) -> usize {
        match self.get(index).map(|n| &n.kind) {
            Some(NodeKind::Method(_)) => 1,
            Some(NodeKind::Suite(s)) => s.children.iter().map(|&c| self.test_case_count(c)).sum(),
            None => 0,
        }
    }

    /// Find a node by full name.
    pub fn find(&self, full_name: &str) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|n| n.full_name == full_name)
            .map(NodeIndex)
    }

    pub fn iter(&self) -> impl Iterator<Item = TestRef<'_>> {
        (0..self.nodes.len()).map(move |i| TestRef {
            tree: self,
            index: NodeIndex(i),
        })
    }

    pub fn set_run_state(&mut self, index: NodeIndex, state: RunState, reason: Option<&str>) -> Result<()> {
        let node = self.node_mut(index)?;
        node.run_state = state;
        if let Some(reason) = reason {
            node.properties.add(names::SKIP_REASON, reason);
        }
        Ok(())
    }

    /// Mark a node NotRunnable with `reason`.
    pub fn make_invalid(&mut self, index: NodeIndex, reason: &str) -> Result<()> {
        self.set_run_state(index, RunState::NotRunnable, Some(reason))
    }

    /// Recursively sort children by full name.
    ///
    /// A suite that maintains its order keeps its own child order, but its
    /// child suites are still sorted.
    pub fn sort(&mut self, suite: NodeIndex) -> Result<()> {
        let (mut children, maintain_order) = match &self.node(suite)?.kind {
            NodeKind::Suite(s) => (s.children.clone(), s.maintain_order),
            NodeKind::Method(_) => return Ok(()),
        };
        if !maintain_order {
            children.sort_by(|a, b| self.nodes[a.0].full_name.cmp(&self.nodes[b.0].full_name));
            self.suite_mut(suite)?.children = children.clone();
        }
        for child in children {
            self.sort(child)?;
        }
        Ok(())
    }

    /// Copy `suite` keeping only the children that pass `filter`.
    ///
    /// The copy gets a new id but keeps the name, full name, run state and
    /// parent pointer of the original. Passing child suites are copied
    /// recursively; passing leaves are shared by index.
    pub fn copy(&mut self, suite: NodeIndex, filter: &dyn TestFilter) -> Result<NodeIndex> {
        let original = self.node(suite)?;
        let NodeKind::Suite(data) = &original.kind else {
            return Err(EngineError::NotASuite(original.full_name.clone()));
        };
        let children = data.children.clone();
        let mut copied = TestNode {
            id: String::new(),
            name: original.name.clone(),
            full_name: original.full_name.clone(),
            class_name: original.class_name.clone(),
            method_name: original.method_name.clone(),
            run_state: original.run_state,
            properties: original.properties.clone(),
            parent: original.parent,
            kind: NodeKind::Suite(data.shallow_clone()),
        };
        copied.id = self.ids.next_id();
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(copied);

        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            let passes = self.test(child).is_some_and(|t| filter.pass(t));
            if !passes {
                continue;
            }
            if self.nodes[child.0].is_suite() {
                let child_copy = self.copy(child, filter)?;
                self.nodes[child_copy.0].parent = Some(index);
                kept.push(child_copy);
            } else {
                kept.push(child);
            }
        }
        self.suite_mut(index)?.children = kept;
        Ok(index)
    }

    /// Hooks of `suite` in declaration order, for validation.
    pub(crate) fn hooks(&self, suite: NodeIndex) -> Vec<&Hook> {
        self.suite(suite)
            .map(|s| s.hooks().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Borrowed view
// ============================================================================

/// Read-only handle to one node and its neighbourhood.
#[derive(Clone, Copy)]
pub struct TestRef<'a> {
    tree: &'a TestTree,
    index: NodeIndex,
}

impl<'a> TestRef<'a> {
    fn node(&self) -> &'a TestNode {
        &self.tree.nodes[self.index.0]
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn tree(&self) -> &'a TestTree {
        self.tree
    }

    pub fn id(&self) -> &'a str {
        &self.node().id
    }

    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    pub fn full_name(&self) -> &'a str {
        &self.node().full_name
    }

    pub fn class_name(&self) -> Option<&'a str> {
        self.node().class_name.as_deref()
    }

    pub fn method_name(&self) -> Option<&'a str> {
        self.node().method_name.as_deref()
    }

    pub fn run_state(&self) -> RunState {
        self.node().run_state
    }

    pub fn properties(&self) -> &'a PropertyBag {
        &self.node().properties
    }

    pub fn skip_reason(&self) -> Option<&'a str> {
        self.node().skip_reason()
    }

    pub fn is_suite(&self) -> bool {
        self.node().is_suite()
    }

    pub fn suite(&self) -> Option<&'a TestSuite> {
        self.node().suite()
    }

    pub fn method(&self) -> Option<&'a Arc<TestMethod>> {
        self.node().method()
    }

    pub fn test_type(&self) -> &'static str {
        self.node().test_type()
    }

    pub fn test_case_count(&self) -> usize {
        self.tree.test_case_count(self.index)
    }

    pub fn parent(&self) -> Option<TestRef<'a>> {
        self.node().parent.and_then(|p| self.tree.test(p))
    }

    pub fn children(&self) -> impl Iterator<Item = TestRef<'a>> + 'a {
        let tree = self.tree;
        tree.children(self.index)
            .iter()
            .map(move |&index| TestRef { tree, index })
    }
}

impl fmt::Debug for TestRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRef")
            .field("index", &self.index)
            .field("full_name", &self.full_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{EmptyFilter, NameFilter};
    use crate::method::Body;

    fn leaf(tree: &mut TestTree, name: &str) -> NodeIndex {
        tree.add_method(name, TestMethod::new(name, Body::from_fn(|_| ())))
    }

    #[test]
    fn test_full_names_follow_the_hierarchy() {
        let mut tree = TestTree::new();
        let asm = tree.add_suite(SuiteKind::Assembly, "tests.dll");
        let ns = tree.add_suite(SuiteKind::Namespace, "Acme");
        let fixture = tree.add_suite(SuiteKind::Fixture, "MathTests");
        let t = leaf(&mut tree, "Adds");
        tree.add(fixture, t).unwrap();
        tree.add(ns, fixture).unwrap();
        tree.add(asm, ns).unwrap();

        assert_eq!(tree.node(ns).unwrap().full_name, "Acme");
        assert_eq!(tree.node(fixture).unwrap().full_name, "Acme.MathTests");
        assert_eq!(tree.node(t).unwrap().full_name, "Acme.MathTests.Adds");
        assert_eq!(tree.node(t).unwrap().class_name.as_deref(), Some("Acme.MathTests"));
        assert_eq!(tree.test_case_count(asm), 1);
    }

    #[test]
    fn test_method_suite_cases_sit_beside_method_name() {
        let mut tree = TestTree::new();
        let fixture = tree.add_suite(SuiteKind::Fixture, "F");
        let method = tree.add_suite(SuiteKind::ParameterizedMethod, "Sum");
        tree.add(fixture, method).unwrap();
        let case = leaf(&mut tree, "Sum(1,2)");
        tree.add(method, case).unwrap();
        assert_eq!(tree.node(method).unwrap().full_name, "F.Sum");
        assert_eq!(tree.node(case).unwrap().full_name, "F.Sum(1,2)");
    }

    #[test]
    fn test_add_to_leaf_is_rejected() {
        let mut tree = TestTree::new();
        let a = leaf(&mut tree, "a");
        let b = leaf(&mut tree, "b");
        assert!(matches!(tree.add(a, b), Err(EngineError::NotASuite(_))));
        assert!(matches!(
            tree.add(NodeIndex(99), b),
            Err(EngineError::UnknownNode(99))
        ));
    }

    #[test]
    fn test_ids_are_prefixed_and_sequential() {
        let mut tree = TestTree::with_id_prefix("7");
        let a = leaf(&mut tree, "a");
        let b = leaf(&mut tree, "b");
        assert_eq!(tree.node(a).unwrap().id, "7-1000");
        assert_eq!(tree.node(b).unwrap().id, "7-1001");
    }

    #[test]
    fn test_sort_respects_maintain_order() {
        let mut tree = TestTree::new();
        let root = tree.add_suite(SuiteKind::Fixture, "Root");
        let inner = tree.add_suite(SuiteKind::Fixture, "Inner");
        for name in ["c", "a", "b"] {
            let t = leaf(&mut tree, name);
            tree.add(inner, t).unwrap();
        }
        let z = leaf(&mut tree, "z");
        tree.add(root, z).unwrap();
        tree.add(root, inner).unwrap();
        tree.suite_mut(root).unwrap().maintain_order = true;

        tree.sort(root).unwrap();

        let names = |tree: &TestTree, s| {
            tree.children(s)
                .iter()
                .map(|&c| tree.node(c).unwrap().name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&tree, root), ["z", "Inner"]);
        assert_eq!(names(&tree, inner), ["a", "b", "c"]);
    }

    #[test]
    fn test_copy_keeps_leaves_and_copies_suites() {
        let mut tree = TestTree::new();
        let root = tree.add_suite(SuiteKind::Fixture, "Root");
        let inner = tree.add_suite(SuiteKind::Fixture, "Inner");
        let a = leaf(&mut tree, "A");
        let b = leaf(&mut tree, "B");
        tree.add(root, a).unwrap();
        tree.add(root, inner).unwrap();
        tree.add(inner, b).unwrap();

        let copy = tree.copy(root, &EmptyFilter).unwrap();
        let copied = tree.node(copy).unwrap();
        assert_ne!(copied.id, tree.node(root).unwrap().id);
        assert_eq!(copied.full_name, "Root");
        let kids = tree.children(copy).to_vec();
        assert_eq!(kids[0], a);
        assert_ne!(kids[1], inner);
        assert_eq!(tree.node(kids[1]).unwrap().parent, Some(copy));
        assert_eq!(tree.children(kids[1]), [b]);

        let only_a = tree.copy(root, &NameFilter::new(["A"])).unwrap();
        assert_eq!(tree.children(only_a), [a]);
    }
}
