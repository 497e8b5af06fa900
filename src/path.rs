//! Typed locations in the database tree.
//!
//! A [`Path`] is what callers build; a [`Reference`] is what the backend
//! addresses. Resolving a path turns every [`Component::NewChild`] into a
//! freshly minted key, so a path containing one resolves to a different
//! reference every time.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use crate::backend::Backend;
use crate::error::PathError;

/// Segment value that stands for "mint a new unique key here".
pub const NEW_CHILD: &str = "*";

// ============================================================================
// Component
// ============================================================================

/// One segment of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    /// A literal child key. Never empty.
    Literal(String),
    /// Placeholder for a key the backend mints during resolution.
    NewChild,
}

impl Component {
    fn from_segment(segment: &str) -> Self {
        if segment == NEW_CHILD {
            Self::NewChild
        } else {
            Self::Literal(segment.to_string())
        }
    }

    /// Display value: `*` for [`Component::NewChild`], the key otherwise.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(key) => key,
            Self::NewChild => NEW_CHILD,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Path
// ============================================================================

/// Immutable, non-empty sequence of [`Component`]s.
///
/// ```
/// use rtdb_reactive::path::Path;
///
/// let cities = Path::parse("/countries/france/cities/").unwrap();
/// let new_city = cities.new_child();
/// assert_eq!(new_city.to_string(), "countries/france/cities/*");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    components: Vec<Component>,
}

impl Path {
    /// Parse a `/`-separated path.
    ///
    /// Leading and trailing slashes are ignored. Fails when nothing is left
    /// or when any interior segment is empty (`a//b`).
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let trimmed = text.trim_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty {
                path: text.to_string(),
            });
        }

        let mut components = Vec::new();
        for (index, segment) in trimmed.split('/').enumerate() {
            if segment.is_empty() {
                return Err(PathError::EmptySegment {
                    path: text.to_string(),
                    index,
                });
            }
            components.push(Component::from_segment(segment));
        }

        Ok(Self { components })
    }

    /// Build a path from already-split segments. `*` becomes
    /// [`Component::NewChild`].
    pub fn from_components<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<S> = segments.into_iter().collect();
        let joined = || {
            segments
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join("/")
        };

        if segments.is_empty() {
            return Err(PathError::Empty { path: joined() });
        }

        let mut components = Vec::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate() {
            let segment = segment.as_ref();
            if segment.is_empty() {
                return Err(PathError::EmptySegment {
                    path: joined(),
                    index,
                });
            }
            components.push(Component::from_segment(segment));
        }

        Ok(Self { components })
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Never `true` for a constructed path.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn last(&self) -> &Component {
        // Non-empty by construction.
        &self.components[self.components.len() - 1]
    }

    /// A new path with `id` appended as a literal key.
    ///
    /// `id` is taken verbatim, including `*`; use [`Path::new_child`] or the
    /// `+` operator for the placeholder. An empty `id` appends nothing and
    /// returns an unchanged copy.
    pub fn child(&self, id: impl Into<String>) -> Self {
        let id = id.into();
        if id.is_empty() {
            return self.clone();
        }
        self.appended(Component::Literal(id))
    }

    /// A new path with a [`Component::NewChild`] appended.
    pub fn new_child(&self) -> Self {
        self.appended(Component::NewChild)
    }

    /// Join the components with `/`. Diagnostic only.
    pub fn render(&self) -> String {
        self.components
            .iter()
            .map(Component::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Walk the components from the backend's root, minting a key for each
    /// [`Component::NewChild`].
    pub fn resolve<B: Backend + ?Sized>(&self, backend: &B) -> Reference {
        let segments = self
            .components
            .iter()
            .map(|component| match component {
                Component::Literal(key) => key.clone(),
                Component::NewChild => backend.mint_key(),
            })
            .collect();
        Reference { segments }
    }

    fn appended(&self, component: Component) -> Self {
        let mut components = self.components.clone();
        components.push(component);
        Self { components }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Add<&str> for Path {
    type Output = Path;

    fn add(self, rhs: &str) -> Path {
        if rhs == NEW_CHILD {
            self.new_child()
        } else {
            self.child(rhs)
        }
    }
}

impl Add<&str> for &Path {
    type Output = Path;

    fn add(self, rhs: &str) -> Path {
        self.clone() + rhs
    }
}

// ============================================================================
// Reference
// ============================================================================

/// A concrete location: every segment is a real key. The empty reference is
/// the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    segments: Vec<String>,
}

impl Reference {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last key, or `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(key.into());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// `true` if `self` equals `other` or lies underneath it.
    pub fn starts_with(&self, other: &Reference) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
