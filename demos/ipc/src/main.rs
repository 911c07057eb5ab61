//! Passes requests to a worker thread through the shared channel and logs the
//! replies into a message arena.

use reqforge::ipc::{MessageArena, SharedChannel, decode_at};
use reqforge::prelude::*;
use std::sync::Arc;
use std::thread;

fn main() -> Result<()> {
    logging::init(&LogConfig::default());

    let channel = Arc::new(SharedChannel::default());
    let arena = MessageArena::new(64 * 1024);
    let requests = ["GET /users/1", "GET /users/2", "POST /echo"];

    let worker = {
        let channel = channel.clone();
        thread::spawn(move || {
            for _ in 0..requests.len() {
                channel.serve_one(|req| {
                    let mut reply = b"200 OK ".to_vec();
                    reply.extend_from_slice(req);
                    reply
                });
            }
        })
    };

    for request in requests {
        let reply = channel.call(request.as_bytes())?;
        let msg = arena.write(&reply)?;
        tracing::info!("📦 stored reply at offset {}", msg.offset());
    }
    if worker.join().is_err() {
        return Err(Error::custom("worker thread panicked"));
    }

    // The committed prefix is what a host on the other side of the boundary
    // would receive.
    let snapshot = arena.committed().to_vec();
    for entry in arena.messages() {
        let (offset, payload) = entry?;
        let copy = decode_at(&snapshot, offset)?;
        assert_eq!(payload, copy);
        tracing::info!("📨 {}: {}", offset, String::from_utf8_lossy(payload));
    }
    tracing::info!("arena: {} of {} bytes used", arena.used(), arena.capacity());
    Ok(())
}
