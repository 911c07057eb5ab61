//! Route handlers.
//!
//! A handler receives the parsed [`Request`] and the [`Response`] it should
//! fill in. It does not return the response; it mutates it, and the pipeline
//! frames whatever the handler left behind.
//!
//! # Handler Forms
//!
//! | Form | Use |
//! |------|-----|
//! | closure `Fn(&Request, &mut Response)` | Most routes, via [`handler()`] |
//! | closure returning `Result<()>` | Routes that can fail, via [`handler()`] |
//! | type implementing [`Handler`] | Routes that need to `.await`, e.g. file serving |
//!
//! A handler that returns an error gets a `500` JSON error response, unless it
//! already ended the response.
//!
//! # Examples
//!
//! ## Closures
//!
//! ```
//! use reqforge_core::prelude::*;
//!
//! let hello = handler(|_req: &Request, res: &mut Response| {
//!     res.send_text("hello");
//! });
//!
//! let echo = handler(|req: &Request, res: &mut Response| -> Result<()> {
//!     let value: serde_json::Value = req.json()?;
//!     res.json(&value)?;
//!     Ok(())
//! });
//! # let _ = (hello, echo);
//! ```
//!
//! ## Async Handlers
//!
//! ```
//! use reqforge_core::prelude::*;
//! use async_trait::async_trait;
//!
//! struct Download;
//!
//! #[async_trait]
//! impl Handler for Download {
//!     async fn call(&self, req: &Request, res: &mut Response) -> Result<()> {
//!         let name = req.param("name").unwrap_or("index.html");
//!         res.send_file(format!("static/{name}")).await;
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

/// Core trait for route handlers.
///
/// Handlers are shared between connections behind an `Arc`, so they must be
/// `Send + Sync`. Implement this trait directly when the handler needs to
/// await; otherwise wrap a closure with [`handler()`].
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Fills in `res` for `req`.
    async fn call(&self, req: &Request, res: &mut Response) -> Result<()>;
}

/// Return types a closure handler may use.
pub trait IntoOutcome {
    /// Converts the closure's return value into the handler result.
    fn into_outcome(self) -> Result<()>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<()> {
        Ok(())
    }
}

impl IntoOutcome for Result<()> {
    fn into_outcome(self) -> Result<()> {
        self
    }
}

/// Adapter that turns a closure into a [`Handler`].
///
/// You typically don't construct this directly; use [`handler()`] instead.
pub struct HandlerFn<F, R> {
    f: F,
    _marker: PhantomData<fn() -> R>,
}

impl<F, R> HandlerFn<F, R> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, R> Handler for HandlerFn<F, R>
where
    F: Fn(&Request, &mut Response) -> R + Send + Sync + 'static,
    R: IntoOutcome + Send + 'static,
{
    async fn call(&self, req: &Request, res: &mut Response) -> Result<()> {
        (self.f)(req, res).into_outcome()
    }
}

/// Wraps a closure as a shareable handler.
///
/// The closure may return `()` or [`Result<()>`](crate::Result).
///
/// # Examples
///
/// ```
/// use reqforge_core::prelude::*;
///
/// let server = Server::new().get("/users/:id", handler(|req: &Request, res: &mut Response| {
///     let id = req.param("id").unwrap_or_default();
///     res.send_json(format!(r#"{{"id":"{id}"}}"#));
/// }));
/// # let _ = server;
/// ```
pub fn handler<F, R>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&Request, &mut Response) -> R + Send + Sync + 'static,
    R: IntoOutcome + Send + 'static,
{
    Arc::new(HandlerFn::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use http::Method;

    #[tokio::test]
    async fn test_unit_closure() {
        let h = handler(|_req: &Request, res: &mut Response| {
            res.send_text("ok");
        });

        let req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        h.call(&req, &mut res).await.unwrap();
        assert_eq!(res.body(), b"ok");
    }

    #[tokio::test]
    async fn test_result_closure_propagates_error() {
        let h = handler(|_req: &Request, _res: &mut Response| -> Result<()> {
            Err(Error::handler("boom"))
        });

        let req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        assert!(matches!(
            h.call(&req, &mut res).await,
            Err(Error::Handler(_))
        ));
    }

    struct Status(u16);

    #[async_trait]
    impl Handler for Status {
        async fn call(&self, _req: &Request, res: &mut Response) -> Result<()> {
            res.set_status(self.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_trait_handler() {
        let h: Arc<dyn Handler> = Arc::new(Status(204));
        let req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        h.call(&req, &mut res).await.unwrap();
        assert_eq!(res.status(), 204);
    }
}
