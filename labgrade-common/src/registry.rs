//! Test registry: the ordered list of test cases for one run.
//!
//! Insertion order is execution order. A parent is a pass/fail gate: it
//! never reorders anything, and it must be registered before its children.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::errors::{GradeError, GradeResult};

/// A test body. Fails by returning an error; may also panic.
pub type TestBody<C> = Box<dyn FnMut(&mut C) -> GradeResult<()>>;

/// One test case.
pub struct TestCase<C> {
    id: String,
    name: String,
    points: u32,
    parent: Option<String>,
    timeout: Option<Duration>,
    body: TestBody<C>,
}

impl<C> TestCase<C> {
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, points: u32, body: F) -> Self
    where
        F: FnMut(&mut C) -> GradeResult<()> + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            points,
            parent: None,
            timeout: None,
            body: Box::new(body),
        }
    }

    /// Gate this test on the outcome of `parent`.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Session timeout for this test, overriding the run default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> u32 {
        self.points
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn run_body(&mut self, ctx: &mut C) -> GradeResult<()> {
        (self.body)(ctx)
    }
}

impl<C> fmt::Debug for TestCase<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("points", &self.points)
            .field("parent", &self.parent)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Append-only, ordered collection of test cases keyed by id.
pub struct TestRegistry<C> {
    cases: Vec<TestCase<C>>,
    index: HashMap<String, usize>,
}

impl<C> Default for TestRegistry<C> {
    fn default() -> Self {
        Self {
            cases: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<C> TestRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a test. Fails with `DuplicateTest` if the id is taken.
    ///
    /// Parent references are checked by [`validate`](Self::validate), so a
    /// whole suite can be declared before anything is reported.
    pub fn register(&mut self, case: TestCase<C>) -> GradeResult<()> {
        if self.index.contains_key(&case.id) {
            return Err(GradeError::DuplicateTest(case.id));
        }
        self.index.insert(case.id.clone(), self.cases.len());
        self.cases.push(case);
        Ok(())
    }

    /// Check that every parent exists and precedes its child.
    ///
    /// Requiring parents to come first also rules out cycles.
    pub fn validate(&self) -> GradeResult<()> {
        for (pos, case) in self.cases.iter().enumerate() {
            let Some(parent) = case.parent.as_deref() else {
                continue;
            };
            match self.index.get(parent) {
                None => {
                    return Err(GradeError::UnknownParent {
                        test: case.id.clone(),
                        parent: parent.to_string(),
                    });
                }
                Some(&parent_pos) if parent_pos >= pos => {
                    return Err(GradeError::ParentOrder {
                        test: case.id.clone(),
                        parent: parent.to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TestCase<C>> {
        self.index.get(id).map(|&pos| &self.cases[pos])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestCase<C>> {
        self.cases.iter()
    }

    pub(crate) fn cases_mut(&mut self) -> &mut [TestCase<C>] {
        &mut self.cases
    }

    pub fn ids(&self) -> Vec<&str> {
        self.cases.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Sum of all point values.
    pub fn total_points(&self) -> u64 {
        self.cases.iter().map(|c| u64::from(c.points)).sum()
    }

    /// Ancestors of `id`, nearest first. Stops at a missing or repeated id.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|c| c.parent.as_deref());
        while let Some(parent) = current {
            if chain.contains(&parent) || parent == id {
                break;
            }
            chain.push(parent);
            current = self.get(parent).and_then(|c| c.parent.as_deref());
        }
        chain
    }
}

impl<C> fmt::Debug for TestRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.cases.iter()).finish()
    }
}
