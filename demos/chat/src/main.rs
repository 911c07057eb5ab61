use reqforge::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    username: String,
    message: String,
    #[serde(default)]
    timestamp: u64,
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::default().with_bind_address("127.0.0.1:9000");
    logging::init(&config.log);

    let server = Server::with_config(config).layer(LoggerMiddleware::new());
    let manager = server.context().connections().clone();
    let stats = manager.clone();

    let server = server
        .ws("/chat", handler(move |req: &Request, res: &mut Response| -> Result<()> {
            let mut msg: ChatMessage = req.json()?;
            msg.timestamp = now();
            tracing::info!("💬 {} says: {}", msg.username, msg.message);

            let json = serde_json::to_string(&msg)?;
            let sender = req.connection_id().unwrap_or_default();
            let delivered = manager.broadcast_except(sender, &json)?;
            res.json(&serde_json::json!({ "delivered": delivered }))
        }))
        .get("/stats", handler(move |_req: &Request, res: &mut Response| -> Result<()> {
            res.json(&serde_json::json!({
                "total_connections": stats.count(),
                "websocket_connections": stats.websocket_count(),
                "connection_ids": stats.all_ids(),
            }))
        }));

    tracing::info!("💬 Chat server running on ws://127.0.0.1:9000/chat");
    tracing::info!(
        "📊 Send JSON: {{ \"username\": \"Alice\", \"message\": \"Hello!\" }}"
    );

    server.listen().await
}
