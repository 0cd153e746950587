//! Request Router: classifies intercepted requests.
//!
//! The checks run in a fixed order. Navigations are tested before the
//! extension/app-route check because most navigations have no extension
//! and would otherwise fall through to the dynamic branch.

use hashbrown::HashSet;
use http::Method;
use url::Url;

use crate::config::WorkerConfig;
use crate::request::FetchRequest;
use crate::strategy::Strategy;

/// Why a request was not intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Not a GET.
    NonGet,
    /// Framework runtime/build namespace.
    InternalAsset,
    /// Other origin, with same-origin interception enabled.
    CrossOrigin,
    /// The worker is not activated yet (or was retired).
    NotActive,
}

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Leave the request to the network, untouched.
    Passthrough(PassthroughReason),
    /// Full-page document load.
    Navigation,
    /// File-like path or known app route.
    Static,
    /// Everything else (API calls, data).
    Dynamic,
}

impl Route {
    /// Strategy serving this route, or why the request is left alone.
    pub fn strategy(&self) -> Result<Strategy, PassthroughReason> {
        match *self {
            Route::Passthrough(reason) => Err(reason),
            Route::Navigation => Ok(Strategy::NavigationFallback),
            Route::Static => Ok(Strategy::CacheFirst),
            Route::Dynamic => Ok(Strategy::NetworkFirst),
        }
    }
}

/// Request router.
#[derive(Debug, Clone)]
pub struct Router {
    origin: Url,
    app_routes: HashSet<String>,
    ignored_prefixes: Vec<String>,
    same_origin_only: bool,
}

impl Router {
    /// Build a router for the worker at `origin`.
    pub fn new(config: &WorkerConfig, origin: Url) -> Self {
        Self {
            origin,
            app_routes: config.app_routes.iter().cloned().collect(),
            ignored_prefixes: config.ignored_prefixes.clone(),
            same_origin_only: config.same_origin_only,
        }
    }

    /// Classify a request.
    pub fn classify(&self, request: &FetchRequest) -> Route {
        if request.method != Method::GET {
            return Route::Passthrough(PassthroughReason::NonGet);
        }

        let path = request.url.path();
        if self
            .ignored_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Route::Passthrough(PassthroughReason::InternalAsset);
        }

        if self.same_origin_only && request.url.origin() != self.origin.origin() {
            return Route::Passthrough(PassthroughReason::CrossOrigin);
        }

        if request.is_navigation() {
            return Route::Navigation;
        }

        if has_file_extension(path) || self.app_routes.contains(path) {
            return Route::Static;
        }

        Route::Dynamic
    }
}

/// Whether the last path segment looks like `name.ext` (dotfiles do not).
fn has_file_extension(path: &str) -> bool {
    let segment = path.rsplit('/').next().unwrap_or("");
    match segment.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && !ext.is_empty(),
        None => false,
    }
}
