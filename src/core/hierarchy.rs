//! Resolved provider metadata for one table reference.
//!
//! Produced by the name resolver (`provider.service.resource.method`); this
//! crate only reads it.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    pub name: String,
    pub version: String,
}

impl ProviderHandle {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHandle {
    pub name: String,
    pub http_method: String,
    /// The call starts a long-running operation that can be polled.
    pub awaitable: bool,
    pub read_only: bool,
}

impl MethodHandle {
    pub fn new(name: impl Into<String>, http_method: impl Into<String>) -> Self {
        let http_method = http_method.into().to_ascii_uppercase();
        let read_only = matches!(http_method.as_str(), "GET" | "HEAD" | "OPTIONS");
        Self {
            name: name.into(),
            http_method,
            awaitable: false,
            read_only,
        }
    }

    pub fn awaitable(mut self) -> Self {
        self.awaitable = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub provider: ProviderHandle,
    pub service: String,
    pub resource: String,
    pub method: MethodHandle,
}

impl Hierarchy {
    pub fn new(
        provider: ProviderHandle,
        service: impl Into<String>,
        resource: impl Into<String>,
        method: MethodHandle,
    ) -> Self {
        Self {
            provider,
            service: service.into(),
            resource: resource.into(),
            method,
        }
    }

    /// `provider.service.resource`
    pub fn table_name(&self) -> String {
        format!("{}.{}.{}", self.provider.name, self.service, self.resource)
    }

    /// What to tell the user after a mutating call succeeds.
    ///
    /// Google methods whose names suggest a read get a hint to use SELECT.
    pub fn success_messages(&self, awaited: bool) -> Vec<String> {
        let base = if awaited {
            "The operation completed successfully"
        } else {
            "The operation was despatched successfully"
        };
        let reads = matches!(
            self.method.name.as_str(),
            "select" | "get" | "list" | "aggregatedList"
        );
        if self.provider.name == "google" && reads {
            return vec![format!(
                "{base}, consider using a SELECT statement if you are performing an operation that returns data"
            )];
        }
        vec![base.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_read_only_follows_http_verb() {
        assert!(MethodHandle::new("list", "get").read_only);
        let insert = MethodHandle::new("insert", "POST").awaitable();
        assert!(!insert.read_only);
        assert!(insert.awaitable);
    }

    #[test]
    fn test_success_messages() {
        let google = ProviderHandle::new("google", "v1");
        let insert = Hierarchy::new(
            google.clone(),
            "compute",
            "disks",
            MethodHandle::new("insert", "POST"),
        );
        assert_eq!(insert.success_messages(false), vec!["The operation was despatched successfully"]);
        assert_eq!(insert.success_messages(true), vec!["The operation completed successfully"]);

        let list = Hierarchy::new(google, "compute", "disks", MethodHandle::new("aggregatedList", "POST"));
        assert!(list.success_messages(true)[0].contains("consider using a SELECT statement"));
        let other = Hierarchy::new(
            ProviderHandle::new("azure", "v1"),
            "compute",
            "disks",
            MethodHandle::new("list", "POST"),
        );
        assert_eq!(other.success_messages(true), vec!["The operation completed successfully"]);
    }

    #[test]
    fn test_table_name() {
        let h = Hierarchy::new(
            ProviderHandle::new("google", "v1"),
            "compute",
            "instances",
            MethodHandle::new("list", "GET"),
        );
        assert_eq!(h.table_name(), "google.compute.instances");
    }
}
