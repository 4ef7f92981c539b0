//! Route classification for the gate.
//!
//! Paths are classified against ordered prefix lists. The first matching
//! prefix wins within a list, and the protected list is consulted before the
//! auth-entry list so overlapping prefixes resolve to the stricter class.

/// Class assigned to a request path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteClass {
    /// Requires a session; admin role is additionally enforced downstream.
    AdminProtected,
    /// Requires a session.
    Protected,
    /// Login and signup surfaces; authenticated users are bounced home.
    AuthEntry,
    /// No gating beyond rate limiting.
    Public,
}

impl RouteClass {
    #[must_use]
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::AdminProtected => "admin_protected",
            Self::Protected => "protected",
            Self::AuthEntry => "auth_entry",
            Self::Public => "public",
        }
    }

    /// `true` when the class requires a session cookie to pass.
    #[must_use]
    pub const fn requires_session(self) -> bool {
        matches!(self, Self::AdminProtected | Self::Protected)
    }
}

/// Ordered prefix lists the gate classifies request paths against.
#[derive(Clone, Debug)]
pub struct RouteTable {
    protected: Vec<String>,
    auth: Vec<String>,
    admin: Vec<String>,
}

impl RouteTable {
    /// Build a table from prefix lists. Admin prefixes designate the subset of
    /// protected paths that additionally require the admin role; they are
    /// matched independently so an admin prefix need not repeat in the
    /// protected list.
    #[must_use]
    pub fn new(protected: Vec<String>, auth: Vec<String>, admin: Vec<String>) -> Self {
        Self {
            protected,
            auth,
            admin,
        }
    }

    /// Classify a request path. Matching is by path-segment prefix: `/admin`
    /// covers `/admin` and `/admin/users` but not `/administrator`.
    #[must_use]
    pub fn classify(&self, path: &str) -> RouteClass {
        if self.admin.iter().any(|prefix| prefix_matches(prefix, path)) {
            return RouteClass::AdminProtected;
        }
        if self
            .protected
            .iter()
            .any(|prefix| prefix_matches(prefix, path))
        {
            return RouteClass::Protected;
        }
        if self.auth.iter().any(|prefix| prefix_matches(prefix, path)) {
            return RouteClass::AuthEntry;
        }
        RouteClass::Public
    }

    /// `true` when `path` falls under any of the given prefixes.
    #[must_use]
    pub fn covered_by(prefixes: &[String], path: &str) -> bool {
        prefixes.iter().any(|prefix| prefix_matches(prefix, path))
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return prefix == "/";
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
