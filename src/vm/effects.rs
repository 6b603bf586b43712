//! Captured side-effects of a bundle execution.

use indexmap::IndexMap;

/// Attribute map for one emitted element; iteration order is declaration
/// order.
pub type AttributeMap = IndexMap<String, String>;

/// Ordered list of emitted head elements keyed by id.
///
/// Ids are unique and keep their insertion position; re-adding an id replaces
/// the attributes without moving the element. HTML output determinism depends
/// on both orders, so this is an insertion-ordered mapping rather than a hash
/// map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementList {
    items: IndexMap<String, AttributeMap>,
}

impl ElementList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, attrs: AttributeMap) {
        self.items.insert(id.into(), attrs);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeMap)> {
        self.items.iter().map(|(id, attrs)| (id.as_str(), attrs))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// A redirect requested by the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub url: String,
    pub status: u16,
}

/// Everything a bundle run can ask of the response.
#[derive(Debug, Clone, Default)]
pub struct VmEffects {
    /// Body-fragment HTML for the container div.
    pub render: Option<String>,
    pub title: Option<String>,
    pub status: Option<u16>,
    /// Last `setRedirect` call wins; extra calls are logged as warnings.
    pub redirect: Option<Redirect>,
    pub headers: IndexMap<String, String>,
    pub metas: ElementList,
    pub links: ElementList,
    pub scripts: ElementList,
}
