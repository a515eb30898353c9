//! Queue of messages bound for the downstream consumer. Handlers enqueue;
//! one writer task owns stdout.

use mcpproxy_protocol::jsonrpc::JSONRPCError;
use mcpproxy_protocol::jsonrpc::JSONRPCErrorError;
use mcpproxy_protocol::jsonrpc::JSONRPCMessage;
use mcpproxy_protocol::jsonrpc::JSONRPCNotification;
use mcpproxy_protocol::jsonrpc::JSONRPCResponse;
use mcpproxy_protocol::jsonrpc::JSONRPC_VERSION;
use mcpproxy_protocol::jsonrpc::RequestId;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

pub(crate) struct OutgoingMessageSender {
    sender: mpsc::UnboundedSender<JSONRPCMessage>,
}

impl OutgoingMessageSender {
    pub(crate) fn new(sender: mpsc::UnboundedSender<JSONRPCMessage>) -> Self {
        Self { sender }
    }

    pub(crate) fn send_response<T: Serialize>(&self, id: RequestId, response: T) {
        let result = match serde_json::to_value(response) {
            Ok(result) => result,
            Err(err) => {
                self.send_error(
                    id,
                    mcpproxy_protocol::jsonrpc::INTERNAL_ERROR,
                    format!("failed to serialize response: {err}"),
                    None,
                );
                return;
            }
        };
        let message = JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        });
        if self.sender.send(message).is_err() {
            warn!("downstream writer is gone; dropping response");
        }
    }

    pub(crate) fn send_error(
        &self,
        id: RequestId,
        code: i64,
        message: String,
        data: Option<Value>,
    ) {
        let message = JSONRPCMessage::Error(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JSONRPCErrorError {
                code,
                message,
                data,
            },
        });
        if self.sender.send(message).is_err() {
            warn!("downstream writer is gone; dropping error");
        }
    }

    pub(crate) fn send_notification(&self, method: &str, params: Option<Value>) {
        let message = JSONRPCMessage::Notification(JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        });
        if self.sender.send(message).is_err() {
            warn!("downstream writer is gone; dropping notification");
        }
    }
}
