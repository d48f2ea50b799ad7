use std::collections::BTreeSet;

pub const AWAIT: &str = "AWAIT";
pub const NOSTATUS: &str = "NOSTATUS";
pub const SHOWRESULTS: &str = "SHOWRESULTS";

/// Statement-level hints such as `/*+ AWAIT, NOSTATUS */`.
///
/// Names are case-insensitive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommentDirectives {
    names: BTreeSet<String>,
}

impl CommentDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut directives = Self::new();
        for name in names {
            directives.set(name.as_ref());
        }
        directives
    }

    /// Collects the names from every `/*+ ... */` hint block in `query`.
    pub fn from_query(query: &str) -> Self {
        let mut directives = Self::new();
        let mut rest = query;
        while let Some(start) = rest.find("/*+") {
            let after = &rest[start + 3..];
            let Some(end) = after.find("*/") else {
                break;
            };
            for name in after[..end].split(|c: char| c == ',' || c.is_whitespace()) {
                directives.set(name);
            }
            rest = &after[end + 2..];
        }
        directives
    }

    pub fn set(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.names.insert(name.to_ascii_uppercase());
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.names.contains(&name.trim().to_ascii_uppercase())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
