//! The `http` node

use super::{require_str, NodeExecutor};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::http::HttpRequest;
use crate::payload::Node;
use async_trait::async_trait;
use serde_json::Value;

/// `http` — gated request through a registry client.
///
/// The optional single input overrides the configured body, so an
/// upstream node can feed a computed payload into the request.
pub struct HttpExecutor;

#[async_trait]
impl NodeExecutor for HttpExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let url = require_str(node, &node.data.url, "url")?;
        let spec = ctx.registry().resolve(node.data.client_name.as_deref())?;

        let inputs = ctx.input_values(&node.id).await?;
        let body = inputs
            .into_iter()
            .next()
            .filter(|v| !v.is_null())
            .or_else(|| node.data.body.clone());

        let request = HttpRequest {
            url: url.to_string(),
            method: node.data.method.clone(),
            headers: node.data.headers.clone(),
            body,
        };

        ctx.check_cancelled()?;
        ctx.registry()
            .execute(&spec, ctx.gate(), &request, ctx.cancel_token())
            .await
    }
}
