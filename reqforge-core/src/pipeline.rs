//! Per-request dispatch.
//!
//! Every request, whether it came from an HTTP connection or a WebSocket
//! message, goes through the same fixed sequence of stages:
//!
//! ```text
//! Accepted → Middleware → PreHooks → Routed → Handler → PostHooks → Flushed
//! ```
//!
//! Any stage may end the response. Once it has ended, every later stage is
//! skipped and the pipeline goes straight to `Flushed`, so the client receives
//! exactly what the short-circuiting stage wrote. Errors from middleware,
//! hooks or the handler become a `500` JSON error (unless the response had
//! already ended) and are logged; they never escape [`dispatch`].

use crate::context::ServerContext;
use crate::error::Error;
use crate::middleware::Flow;
use crate::request::{Protocol, Request};
use crate::response::Response;
use crate::router::Lookup;
use http::Method;
use tracing::{Instrument, error, info, info_span};

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The request entered the pipeline.
    Accepted,
    /// Middleware ran.
    Middleware,
    /// Pre-handler plugin hooks ran.
    PreHooks,
    /// The router resolved the path.
    Routed,
    /// The handler (or the synthesized 404/405) ran.
    Handler,
    /// Post-handler plugin hooks ran.
    PostHooks,
    /// The response was frozen for transmission.
    Flushed,
}

/// Runs `req` through the pipeline, filling in `res`.
///
/// Returns the stages visited, in order; the last one is always
/// [`Stage::Flushed`]. On return the response has ended.
pub async fn dispatch(ctx: &ServerContext, req: &mut Request, res: &mut Response) -> Vec<Stage> {
    req.set_metrics(ctx.next_metrics());
    if ctx.config().log.enable_tracing && req.trace_id().is_empty() {
        req.set_trace_id(uuid::Uuid::new_v4().to_string());
    }

    let span = info_span!(
        "request",
        trace_id = %req.trace_id(),
        method = %req.method(),
        path = %req.path(),
    );

    async move {
        let mut stages = vec![Stage::Accepted];
        run_stages(ctx, req, res, &mut stages).await;

        stages.push(Stage::Flushed);
        res.end();
        info!(
            status = res.status(),
            latency_us = req.metrics().started_at.elapsed().as_micros() as u64,
            sequence = req.metrics().sequence,
            "Request completed"
        );
        stages
    }
    .instrument(span)
    .await
}

async fn run_stages(
    ctx: &ServerContext,
    req: &mut Request,
    res: &mut Response,
    stages: &mut Vec<Stage>,
) {
    if req.protocol() == Protocol::Http {
        negotiate_compression(ctx, req, res);
    }

    stages.push(Stage::Middleware);
    match ctx.middleware().run(req, res).await {
        Ok(Flow::Continue) => {}
        Ok(Flow::Halt) => return,
        Err(e) => return fail(res, "middleware", e),
    }

    stages.push(Stage::PreHooks);
    if let Err(e) = ctx.plugins().run_pre(req, res).await {
        return fail(res, "pre-handler hook", e);
    }
    if res.is_headers_sent() {
        return;
    }

    stages.push(Stage::Routed);
    let lookup = ctx.routes().lookup(req.method(), req.path());

    stages.push(Stage::Handler);
    match lookup {
        Lookup::Found(matched) => {
            req.set_route(matched.pattern, matched.params);
            if let Err(e) = matched.handler.call(req, res).await {
                return fail(res, "handler", e);
            }
        }
        Lookup::MethodNotAllowed(allowed) => {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            res.send_error(405, "Method Not Allowed");
            res.set_header("Allow", allow);
        }
        Lookup::NotFound => {
            if !serve_static(ctx, req, res).await {
                res.send_error(404, "Not Found");
            }
        }
    }
    if res.is_headers_sent() {
        return;
    }

    stages.push(Stage::PostHooks);
    if let Err(e) = ctx.plugins().run_post(req, res).await {
        fail(res, "post-handler hook", e);
    }
}

async fn serve_static(ctx: &ServerContext, req: &Request, res: &mut Response) -> bool {
    let Some(files) = ctx.static_files() else {
        return false;
    };
    let method = req.method();
    if req.protocol() != Protocol::Http || (*method != Method::GET && *method != Method::HEAD) {
        return false;
    }
    files.serve(req.path(), res).await
}

fn negotiate_compression(ctx: &ServerContext, req: &Request, res: &mut Response) {
    let Some(preferred) = ctx.config().compression else {
        return;
    };
    if let Some(accept) = req.header("accept-encoding") {
        if preferred.accepted_by(accept) {
            res.set_compression(preferred);
        }
    }
}

fn fail(res: &mut Response, stage: &str, err: Error) {
    error!("Error in {}: {}", stage, err);
    if !res.is_headers_sent() {
        res.send_error(500, "Internal Server Error");
    }
    res.end();
}
