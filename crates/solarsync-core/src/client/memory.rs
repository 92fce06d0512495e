//! In-memory request client for tests and offline demos.
//!
//! [`InMemoryClient`] answers requests from scripted responses and records
//! every request it sees, so tests can assert both on outcomes and on the
//! absence of network calls.
//!
//! Lookup order for a request, keyed by method and route (query stripped):
//! 1. the next queued one-shot response,
//! 2. a handler closure,
//! 3. a sticky response,
//! 4. otherwise a `404` failure envelope.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{ApiRequest, ApiResponse, Method, RequestClient};

type Handler = Arc<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

#[derive(Default)]
struct Route {
    queued: VecDeque<ApiResponse>,
    handler: Option<Handler>,
    sticky: Option<ApiResponse>,
}

#[derive(Default)]
struct ClientState {
    routes: HashMap<(Method, String), Route>,
    requests: Vec<ApiRequest>,
}

/// Scripted [`RequestClient`].
#[derive(Clone, Default)]
pub struct InMemoryClient {
    state: Arc<Mutex<ClientState>>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for InMemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryClient")
            .field("latency", &self.latency)
            .field("requests", &self.request_count())
            .finish_non_exhaustive()
    }
}

impl InMemoryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency` (uses the tokio clock).
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientState> {
        // Recording state stays usable after a panicking test thread.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a one-shot response.
    pub fn respond(&self, method: Method, route: &str, response: ApiResponse) {
        self.lock()
            .routes
            .entry((method, route.to_string()))
            .or_default()
            .queued
            .push_back(response);
    }

    /// Answer every request on this route with a copy of `response`.
    pub fn respond_always(&self, method: Method, route: &str, response: ApiResponse) {
        self.lock()
            .routes
            .entry((method, route.to_string()))
            .or_default()
            .sticky = Some(response);
    }

    /// Compute the response from the request.
    pub fn respond_with<F>(&self, method: Method, route: &str, handler: F)
    where
        F: Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static,
    {
        self.lock()
            .routes
            .entry((method, route.to_string()))
            .or_default()
            .handler = Some(Arc::new(handler));
    }

    /// Every request received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().requests.clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Requests whose route equals `route`.
    #[must_use]
    pub fn requests_to(&self, method: Method, route: &str) -> Vec<ApiRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|req| req.method == method && req.route() == route)
            .cloned()
            .collect()
    }

    fn answer(&self, request: &ApiRequest) -> ApiResponse {
        let mut state = self.lock();
        state.requests.push(request.clone());
        let key = (request.method, request.route().to_string());
        let Some(route) = state.routes.get_mut(&key) else {
            return ApiResponse::failure(404, format!("no route for {} {}", request.method, key.1));
        };
        if let Some(response) = route.queued.pop_front() {
            return response;
        }
        if let Some(handler) = route.handler.clone() {
            drop(state);
            return handler(request);
        }
        route
            .sticky
            .clone()
            .unwrap_or_else(|| ApiResponse::failure(404, format!("no response scripted for {}", key.1)))
    }
}

#[async_trait]
impl RequestClient for InMemoryClient {
    async fn send(&self, request: ApiRequest) -> ApiResponse {
        // Record at send time so in-flight requests are visible to tests.
        let response = self.answer(&request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn queued_responses_are_consumed_in_order() {
        let client = InMemoryClient::new();
        client.respond(Method::Get, "/projects/p1", ApiResponse::ok(json!({"n": 1})));
        client.respond(Method::Get, "/projects/p1", ApiResponse::ok(json!({"n": 2})));

        assert_eq!(client.get("/projects/p1").await.data, Some(json!({"n": 1})));
        assert_eq!(client.get("/projects/p1").await.data, Some(json!({"n": 2})));
        assert_eq!(client.get("/projects/p1").await.status, 404);
        assert_eq!(client.request_count(), 3);
    }

    #[tokio::test]
    async fn sticky_and_handler_routes() {
        let client = InMemoryClient::new();
        client.respond_always(Method::Get, "/projects/updates", ApiResponse::ok(json!([])));
        client.respond_with(Method::Patch, "/projects/p1/status", |req| {
            ApiResponse::ok(req.body.clone().unwrap_or_default())
        });

        assert!(client.get("/projects/updates?since=x").await.success);
        assert!(client.get("/projects/updates?since=y").await.success);
        let echoed = client
            .patch("/projects/p1/status", Some(json!({"status": "on_hold"})))
            .await;
        assert_eq!(echoed.data, Some(json!({"status": "on_hold"})));
        assert_eq!(client.requests_to(Method::Get, "/projects/updates").len(), 2);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let client = InMemoryClient::new();
        let resp = client.delete("/projects/zz", None).await;
        assert!(!resp.success);
        assert_eq!(resp.status, 404);
    }
}
