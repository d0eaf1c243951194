#![forbid(unsafe_code)]

//! Static descriptors attached to every operation.

/// Immutable descriptor of an operation type.
///
/// `id` is a dotted namespace such as `scene.update-object-property` and is
/// expected to be globally unique. `coalesce_key` groups rapid-fire edits
/// (slider drags, typing) into a single history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMetadata {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub coalesce_key: Option<String>,
}

impl OperationMetadata {
    /// Create metadata with an id and a human-readable title.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            tags: Vec::new(),
            keywords: Vec::new(),
            coalesce_key: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Set the default coalesce key. Callers can override it per invocation.
    #[must_use]
    pub fn with_coalesce_key(mut self, key: impl Into<String>) -> Self {
        self.coalesce_key = Some(key.into());
        self
    }

    /// The first segment of the dotted id (`scene` for `scene.add-node`).
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.id.split('.').next().unwrap_or(&self.id)
    }
}
