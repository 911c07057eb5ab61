//! Segment trie used to resolve request paths.
//!
//! Each node owns one path segment. Static children are kept in insertion
//! order; a node has at most one parameter child. Matching walks one node per
//! segment and always prefers an exact static child over the parameter child
//! at the same depth, so `/users/me` wins over `/users/:id`. There is no
//! backtracking: once a static child matched, the parameter child at that
//! depth is not retried.
//!
//! The router is generic over the handler type so it can be exercised without
//! a running server.

use super::{RateLimitConfig, RouteError, normalize_path, segments};
use http::Method;

/// Maximum number of parameters a single pattern may declare.
pub const MAX_PARAMS: usize = 10;

/// Parameters captured by a successful match, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    entries: Vec<(String, String)>,
}

impl PathParams {
    /// Creates an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Returns the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of captured parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch<H> {
    /// Handler registered for the method at the terminal node.
    pub handler: H,
    /// Captured path parameters.
    pub params: PathParams,
    /// Normalized pattern of the matched route, e.g. `/users/:id`.
    pub pattern: String,
    /// Rate limit attached to the route, if any.
    pub rate_limit: Option<RateLimitConfig>,
}

/// Outcome of [`TrieRouter::lookup`].
#[derive(Debug, Clone)]
pub enum Lookup<H> {
    /// The path and method resolved to a handler.
    Found(RouteMatch<H>),
    /// The path exists but has no handler for the method.
    MethodNotAllowed(Vec<Method>),
    /// Nothing is registered for the path.
    NotFound,
}

impl<H> Lookup<H> {
    /// Returns `true` for [`Lookup::Found`].
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

#[derive(Debug)]
struct TrieNode<H> {
    segment: String,
    handlers: Vec<(Method, H)>,
    children: Vec<TrieNode<H>>,
    param_child: Option<Box<TrieNode<H>>>,
    rate_limit: Option<RateLimitConfig>,
    pattern: Option<String>,
}

impl<H> TrieNode<H> {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            handlers: Vec::new(),
            children: Vec::new(),
            param_child: None,
            rate_limit: None,
            pattern: None,
        }
    }

    fn param_name(&self) -> &str {
        &self.segment[1..]
    }
}

/// Path-segment trie mapping patterns to per-method handlers.
#[derive(Debug)]
pub struct TrieRouter<H> {
    root: TrieNode<H>,
}

impl<H: Clone> TrieRouter<H> {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(""),
        }
    }

    /// Inserts `handler` for `method` at `pattern`.
    ///
    /// Inserting the same method and pattern again replaces the handler. The
    /// pattern is validated before anything is created, so a rejected insert
    /// leaves the tree untouched.
    pub fn insert(&mut self, method: Method, pattern: &str, handler: H) -> Result<(), RouteError> {
        self.check(pattern)?;

        let mut node = &mut self.root;
        for segment in segments(pattern) {
            if segment.starts_with(':') {
                node = node
                    .param_child
                    .get_or_insert_with(|| Box::new(TrieNode::new(segment)))
                    .as_mut();
            } else {
                let index = match node.children.iter().position(|c| c.segment == segment) {
                    Some(index) => index,
                    None => {
                        node.children.push(TrieNode::new(segment));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[index];
            }
        }

        match node.handlers.iter_mut().find(|(m, _)| *m == method) {
            Some(slot) => slot.1 = handler,
            None => node.handlers.push((method, handler)),
        }
        node.pattern = Some(normalize_path(pattern));
        Ok(())
    }

    /// Resolves `path` for `method`.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<H> {
        let mut node = &self.root;
        let mut params = PathParams::new();

        for segment in segments(path) {
            if let Some(child) = node.children.iter().find(|c| c.segment == segment) {
                node = child;
                continue;
            }
            match node.param_child.as_deref() {
                Some(child) => {
                    params.push(child.param_name(), segment);
                    node = child;
                }
                None => return Lookup::NotFound,
            }
        }

        if node.handlers.is_empty() {
            return Lookup::NotFound;
        }

        match node.handlers.iter().find(|(m, _)| m == method) {
            Some((_, handler)) => Lookup::Found(RouteMatch {
                handler: handler.clone(),
                params,
                pattern: node.pattern.clone().unwrap_or_else(|| normalize_path(path)),
                rate_limit: node.rate_limit.clone(),
            }),
            None => Lookup::MethodNotAllowed(node.handlers.iter().map(|(m, _)| m.clone()).collect()),
        }
    }

    /// Attaches `config` to the terminal node of `pattern`.
    ///
    /// The pattern is walked by exact segment text, so `/users/:id` addresses
    /// the parameter route rather than matching it like a request path.
    /// Returns `false` if no route is registered there.
    pub fn set_rate_limit(&mut self, pattern: &str, config: RateLimitConfig) -> bool {
        match self.node_mut(pattern) {
            Some(node) if !node.handlers.is_empty() => {
                node.rate_limit = Some(config);
                true
            }
            _ => false,
        }
    }

    /// Rate limit attached to `pattern`, if any.
    pub fn rate_limit(&self, pattern: &str) -> Option<&RateLimitConfig> {
        self.node(pattern).and_then(|node| node.rate_limit.as_ref())
    }

    /// Methods registered at exactly `pattern`, walked by segment text.
    ///
    /// Returns `None` when no route ends there.
    pub fn find(&self, pattern: &str) -> Option<Vec<Method>> {
        self.node(pattern)
            .filter(|node| !node.handlers.is_empty())
            .map(|node| node.handlers.iter().map(|(m, _)| m.clone()).collect())
    }

    fn node(&self, pattern: &str) -> Option<&TrieNode<H>> {
        let mut node = &self.root;
        for segment in segments(pattern) {
            node = match node.children.iter().find(|c| c.segment == segment) {
                Some(child) => child,
                None => node.param_child.as_deref().filter(|c| c.segment == segment)?,
            };
        }
        Some(node)
    }

    fn node_mut(&mut self, pattern: &str) -> Option<&mut TrieNode<H>> {
        let mut node = &mut self.root;
        for segment in segments(pattern) {
            node = match node.children.iter().position(|c| c.segment == segment) {
                Some(index) => &mut node.children[index],
                None => node
                    .param_child
                    .as_deref_mut()
                    .filter(|c| c.segment == segment)?,
            };
        }
        Some(node)
    }

    /// Validates `pattern` against the current tree without mutating it.
    fn check(&self, pattern: &str) -> Result<(), RouteError> {
        let mut node = Some(&self.root);
        let mut params = 0;

        for segment in segments(pattern) {
            let is_param = segment.starts_with(':');
            if is_param {
                if segment.len() == 1 {
                    return Err(RouteError::InvalidPattern(pattern.to_string()));
                }
                params += 1;
                if params > MAX_PARAMS {
                    return Err(RouteError::TooManyParams {
                        pattern: pattern.to_string(),
                        max: MAX_PARAMS,
                    });
                }
            }

            node = match node {
                Some(n) if is_param => match n.param_child.as_deref() {
                    Some(child) if child.segment != segment => {
                        return Err(RouteError::ParamConflict {
                            existing: child.param_name().to_string(),
                            requested: segment[1..].to_string(),
                        });
                    }
                    other => other,
                },
                Some(n) => n.children.iter().find(|c| c.segment == segment),
                None => None,
            };
        }
        Ok(())
    }
}

impl<H: Clone> Default for TrieRouter<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(routes: &[(&str, &'static str)]) -> TrieRouter<&'static str> {
        let mut router = TrieRouter::new();
        for (pattern, name) in routes {
            router.insert(Method::GET, pattern, *name).unwrap();
        }
        router
    }

    fn found(lookup: Lookup<&'static str>) -> RouteMatch<&'static str> {
        match lookup {
            Lookup::Found(m) => m,
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_static_match() {
        let router = router(&[("/api/users", "users"), ("/api/upload", "upload")]);

        let m = found(router.lookup(&Method::GET, "/api/upload"));
        assert_eq!(m.handler, "upload");
        assert!(m.params.is_empty());
        assert_eq!(m.pattern, "/api/upload");
    }

    #[test]
    fn test_param_capture() {
        let router = router(&[("/users/:id", "user")]);

        let m = found(router.lookup(&Method::GET, "/users/42"));
        assert_eq!(m.handler, "user");
        assert_eq!(m.params.get("id"), Some("42"));
        assert_eq!(m.pattern, "/users/:id");
    }

    #[test]
    fn test_static_has_priority_over_param() {
        let router = router(&[("/users/:id", "by_id"), ("/users/me", "me")]);

        assert_eq!(found(router.lookup(&Method::GET, "/users/me")).handler, "me");
        assert_eq!(found(router.lookup(&Method::GET, "/users/7")).handler, "by_id");
    }

    #[test]
    fn test_params_in_declaration_order() {
        let router = router(&[("/orgs/:org/repos/:repo/issues/:issue", "issue")]);

        let m = found(router.lookup(&Method::GET, "/orgs/rust/repos/cargo/issues/9"));
        let params: Vec<_> = m.params.iter().collect();
        assert_eq!(
            params,
            vec![("org", "rust"), ("repo", "cargo"), ("issue", "9")]
        );
    }

    #[test]
    fn test_not_found() {
        let router = router(&[("/users/:id", "user")]);

        assert!(matches!(router.lookup(&Method::GET, "/posts"), Lookup::NotFound));
        assert!(matches!(
            router.lookup(&Method::GET, "/users/1/extra"),
            Lookup::NotFound
        ));
        // Intermediate node without a handler.
        assert!(matches!(router.lookup(&Method::GET, "/users"), Lookup::NotFound));
    }

    #[test]
    fn test_no_backtracking_after_static_match() {
        let router = router(&[("/users/me/settings", "settings"), ("/users/:id/posts", "posts")]);

        assert!(matches!(
            router.lookup(&Method::GET, "/users/me/posts"),
            Lookup::NotFound
        ));
        assert_eq!(found(router.lookup(&Method::GET, "/users/3/posts")).handler, "posts");
    }

    #[test]
    fn test_method_not_allowed() {
        let mut router = router(&[("/items", "list")]);
        router.insert(Method::POST, "/items", "create").unwrap();

        match router.lookup(&Method::DELETE, "/items") {
            Lookup::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec![Method::GET, Method::POST]);
            }
            other => panic!("expected 405, got {:?}", other),
        }
        assert_eq!(found(router.lookup(&Method::POST, "/items")).handler, "create");
    }

    #[test]
    fn test_reinsert_overwrites_handler() {
        let mut router = router(&[("/ping", "old")]);
        router.insert(Method::GET, "/ping/", "new").unwrap();

        assert_eq!(found(router.lookup(&Method::GET, "/ping")).handler, "new");
    }

    #[test]
    fn test_root_and_empty_segments() {
        let router = router(&[("/", "root"), ("/a/b", "ab")]);

        assert_eq!(found(router.lookup(&Method::GET, "/")).handler, "root");
        assert_eq!(found(router.lookup(&Method::GET, "//a//b/")).handler, "ab");
    }

    #[test]
    fn test_conflicting_param_names_rejected_without_mutation() {
        let mut router = router(&[("/users/:id", "user")]);

        let err = router
            .insert(Method::GET, "/users/:name/profile", "profile")
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::ParamConflict {
                existing: "id".to_string(),
                requested: "name".to_string(),
            }
        );

        // Nothing under /users/:id was created by the failed insert.
        assert!(matches!(
            router.lookup(&Method::GET, "/users/1/profile"),
            Lookup::NotFound
        ));
        assert_eq!(found(router.lookup(&Method::GET, "/users/1")).params.get("id"), Some("1"));
    }

    #[test]
    fn test_same_param_name_shares_node() {
        let mut router = router(&[("/users/:id", "user")]);
        router.insert(Method::GET, "/users/:id/posts", "posts").unwrap();

        let m = found(router.lookup(&Method::GET, "/users/5/posts"));
        assert_eq!(m.handler, "posts");
        assert_eq!(m.params.get("id"), Some("5"));
    }

    #[test]
    fn test_too_many_params_rejected() {
        let mut router: TrieRouter<&str> = TrieRouter::new();
        let pattern: String = (0..=MAX_PARAMS).map(|i| format!("/:p{i}")).collect();

        let err = router.insert(Method::GET, &pattern, "deep").unwrap_err();
        assert!(matches!(err, RouteError::TooManyParams { max: MAX_PARAMS, .. }));

        let at_cap: String = (0..MAX_PARAMS).map(|i| format!("/:p{i}")).collect();
        router.insert(Method::GET, &at_cap, "cap").unwrap();
        let path: String = (0..MAX_PARAMS).map(|i| format!("/{i}")).collect();
        assert_eq!(found(router.lookup(&Method::GET, &path)).params.len(), MAX_PARAMS);
    }

    #[test]
    fn test_unnamed_param_rejected() {
        let mut router: TrieRouter<&str> = TrieRouter::new();
        assert!(matches!(
            router.insert(Method::GET, "/files/:", "x"),
            Err(RouteError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_set_rate_limit() {
        let mut router = router(&[("/users/:id", "user")]);

        assert!(router.set_rate_limit("/users/:id", RateLimitConfig::new(60, 5)));
        assert!(!router.set_rate_limit("/users", RateLimitConfig::new(60, 5)));
        assert!(!router.set_rate_limit("/missing", RateLimitConfig::new(60, 5)));

        let m = found(router.lookup(&Method::GET, "/users/9"));
        assert_eq!(m.rate_limit, Some(RateLimitConfig::new(60, 5)));
        assert_eq!(router.rate_limit("/users/:id").map(|c| c.burst_limit), Some(5));
    }

    #[test]
    fn test_find_by_pattern_text() {
        let mut router = router(&[("/users/:id", "user")]);
        router.insert(Method::DELETE, "/users/:id", "delete").unwrap();

        assert_eq!(
            router.find("/users/:id"),
            Some(vec![Method::GET, Method::DELETE])
        );
        assert_eq!(router.find("/users/42"), None);
        assert_eq!(router.find("/users"), None);
    }
}
