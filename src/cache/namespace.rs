//! Versioned namespace names.

use std::fmt;

/// The two logical namespaces a version owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
  /// Manifest assets, served cache-first
  Static,
  /// API responses, served network-first
  Api,
}

impl NamespaceKind {
  pub fn label(self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Api => "api",
    }
  }
}

/// A namespace name of the form `{app}-{kind}-{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceName {
  pub app: String,
  pub kind: NamespaceKind,
  pub version: String,
}

impl NamespaceName {
  pub fn new(app: &str, kind: NamespaceKind, version: &str) -> Self {
    Self {
      app: app.to_string(),
      kind,
      version: version.to_string(),
    }
  }

  /// Parse a stored name back into its parts.
  ///
  /// Names written by other applications, or by hand, yield `None`.
  pub fn parse(app: &str, name: &str) -> Option<Self> {
    let rest = name.strip_prefix(app)?.strip_prefix('-')?;
    [NamespaceKind::Static, NamespaceKind::Api]
      .into_iter()
      .find_map(|kind| {
        let version = rest.strip_prefix(kind.label())?.strip_prefix('-')?;
        (!version.is_empty()).then(|| Self::new(app, kind, version))
      })
  }
}

impl fmt::Display for NamespaceName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}-{}", self.app, self.kind.label(), self.version)
  }
}
