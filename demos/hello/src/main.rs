use reqforge::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Visits(AtomicU64);

#[derive(Debug, Deserialize, Serialize)]
struct Echo {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default().with_bind_address("127.0.0.1:8080"),
    };
    logging::init(&config.log);

    let require_key = from_fn(|req: &mut Request, res: &mut Response| {
        if req.path().starts_with("/admin") && req.header("x-api-key").is_none() {
            res.send_error(401, "Unauthorized");
            return Flow::Halt;
        }
        Flow::Continue
    });

    let bind = config.bind_address.clone();
    let server = Server::with_config(config)
        .with_state(Arc::new(Visits::default()))
        .layer(LoggerMiddleware::new())
        .layer(require_key)
        .get("/", handler(|req: &Request, res: &mut Response| {
            let visits = req
                .state::<Visits>()
                .map(|v| v.0.fetch_add(1, Ordering::Relaxed) + 1)
                .unwrap_or_default();
            res.send_text(format!("Hello from ReqForge! Visit #{visits}"));
        }))
        .get("/users/:id", handler(|req: &Request, res: &mut Response| -> Result<()> {
            let id = req.param("id").unwrap_or_default();
            res.json(&serde_json::json!({ "id": id, "trace": req.trace_id() }))
        }))
        .get("/users/:id/posts/:post", handler(|req: &Request, res: &mut Response| -> Result<()> {
            res.json(&serde_json::json!({
                "user": req.param("id"),
                "post": req.param("post"),
            }))
        }))
        .post("/echo", handler(|req: &Request, res: &mut Response| -> Result<()> {
            let body: Echo = req.json()?;
            res.json(&body)
        }))
        .get("/admin/stats", handler(|_req: &Request, res: &mut Response| {
            res.send_json(r#"{"status":"ok"}"#);
        }))
        .rate_limit("/echo", RateLimitConfig::new(60, 10));

    tracing::info!("🚀 Listening on http://{}", bind);
    tracing::info!("   try: curl http://{}/users/42", bind);

    server
        .serve_with_shutdown(
            tokio::net::TcpListener::bind(&bind).await?,
            async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("👋 Shutting down");
            },
        )
        .await
}
