//! JSON-RPC and explorer fixtures shared by the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers JSON-RPC requests with a fixed result or error, echoing the request id.
pub struct RpcResponder {
    outcome: Result<Value, (i64, String)>,
}

impl RpcResponder {
    pub fn result(result: Value) -> Self {
        Self {
            outcome: Ok(result),
        }
    }

    pub fn error(code: i64, message: &str) -> Self {
        Self {
            outcome: Err((code, message.to_string())),
        }
    }
}

impl Respond for RpcResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let id = body.get("id").cloned().unwrap_or(Value::Null);
        let payload = match &self.outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
        };
        ResponseTemplate::new(200).set_body_json(payload)
    }
}

/// Mount a handler for one JSON-RPC method.
pub async fn mock_rpc(server: &MockServer, rpc_method: &str, responder: RpcResponder) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// Mount an explorer `getabi` response for `address` (as it appears in the query string).
pub async fn mock_abi(server: &MockServer, address: &str, abi: &str) {
    Mock::given(method("GET"))
        .and(path("/api"))
        .and(query_param("module", "contract"))
        .and(query_param("action", "getabi"))
        .and(query_param("address", address))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "message": "OK",
            "result": abi,
        })))
        .mount(server)
        .await;
}

/// Bodies of every JSON-RPC request the server saw for `rpc_method`.
pub async fn rpc_requests(server: &MockServer, rpc_method: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .filter(|body| body["method"] == rpc_method)
        .collect()
}

/// An ABI-encoded `address` return word.
pub fn address_word(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x"))
}

pub const TOKEN_ABI: &str = r#"[
    {"type":"function","name":"transfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
     "outputs":[{"name":"","type":"bool"}]},
    {"type":"function","name":"balanceOf","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"}],
     "outputs":[{"name":"","type":"uint256"}]}
]"#;

/// ABI of a proxy exposing only `getter()` and `upgradeTo(address)`.
pub fn proxy_abi(getter: &str) -> String {
    format!(
        r#"[
        {{"type":"function","name":"{getter}","stateMutability":"view","inputs":[],
          "outputs":[{{"name":"","type":"address"}}]}},
        {{"type":"function","name":"upgradeTo","stateMutability":"nonpayable",
          "inputs":[{{"name":"impl","type":"address"}}],"outputs":[]}}
    ]"#
    )
}
