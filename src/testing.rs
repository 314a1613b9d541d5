use tokio::sync::mpsc;
use warp::ws::Message;

use crate::messages::ServerMessage;
use crate::registry::ConnectionHandle;

pub fn connection() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle::new(tx), rx)
}

/// Everything queued for a connection so far, decoded.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Ok(text) = frame.to_str() {
            out.push(serde_json::from_str(text).expect("server frame is valid JSON"));
        }
    }
    out
}
