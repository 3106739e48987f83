//! Qdrant REST backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{SearchRequest, VectorBackend};
use crate::error::VectorError;
use crate::filter::{Condition, Filter};
use crate::types::{
    CollectionConfig, CollectionStats, DistanceMetric, Payload, SearchResult, VectorPoint,
};

/// Configuration for the Qdrant backend.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Base URL (e.g., "http://localhost:6333")
    pub url: String,
    pub api_key: Option<SecretString>,
    /// Timeout for a single HTTP request
    pub timeout: Duration,
    /// Idle connections kept in the pool
    pub pool_max_idle: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
            pool_max_idle: 16,
        }
    }
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }
}

/// Backend speaking Qdrant's HTTP API.
pub struct QdrantBackend {
    client: Client,
    config: QdrantConfig,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<u64>,
    config: CollectionInfoConfig,
}

#[derive(Deserialize)]
struct CollectionInfoConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

impl QdrantBackend {
    pub fn new(config: QdrantConfig) -> Result<Self, VectorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle)
            .build()
            .map_err(|e| VectorError::InvalidInput(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("api-key", key.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, VectorError> {
        self.authorize(request)
            .send()
            .await
            .map_err(classify_transport)
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, VectorError> {
        let envelope: Envelope<T> = response.json().await.map_err(classify_transport)?;
        Ok(envelope.result)
    }
}

fn distance_to_wire(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "Cosine",
        DistanceMetric::Euclidean => "Euclid",
        DistanceMetric::Dot => "Dot",
    }
}

fn distance_from_wire(distance: &str) -> Result<DistanceMetric, VectorError> {
    match distance {
        "Cosine" => Ok(DistanceMetric::Cosine),
        "Euclid" => Ok(DistanceMetric::Euclidean),
        "Dot" => Ok(DistanceMetric::Dot),
        other => Err(VectorError::Rejected(format!(
            "unsupported distance metric: {}",
            other
        ))),
    }
}

/// Numeric ids go over the wire as integers, everything else as strings
/// (Qdrant requires those to be UUIDs).
fn id_to_wire(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(id),
    }
}

fn id_from_wire(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn condition_to_wire(condition: &Condition) -> Option<Value> {
    match condition {
        Condition::Match { key, value } => Some(json!({"key": key, "match": {"value": value}})),
        Condition::MatchAny { key, values } => Some(json!({"key": key, "match": {"any": values}})),
        Condition::Range {
            key,
            gt,
            gte,
            lt,
            lte,
        } => {
            let mut range = serde_json::Map::new();
            for (name, bound) in [("gt", gt), ("gte", gte), ("lt", lt), ("lte", lte)] {
                if let Some(b) = bound {
                    range.insert(name.to_string(), json!(b));
                }
            }
            Some(json!({"key": key, "range": range}))
        }
        Condition::TextContains { .. } => None,
    }
}

fn filter_to_wire(filter: &Filter) -> Option<Value> {
    let clause = |conditions: &[Condition]| -> Option<Vec<Value>> {
        conditions.iter().map(condition_to_wire).collect()
    };

    let mut wire = serde_json::Map::new();
    for (name, conditions) in [
        ("must", &filter.must),
        ("should", &filter.should),
        ("must_not", &filter.must_not),
    ] {
        if !conditions.is_empty() {
            wire.insert(name.to_string(), Value::Array(clause(conditions.as_slice())?));
        }
    }
    Some(Value::Object(wire))
}

/// Map an HTTP status to the transient/permanent split.
fn classify_status(status: StatusCode, body: &str) -> VectorError {
    let message = format!("HTTP {}: {}", status, body);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        VectorError::Unavailable(message)
    } else {
        VectorError::Rejected(message)
    }
}

fn classify_transport(err: reqwest::Error) -> VectorError {
    if err.is_decode() {
        VectorError::Rejected(format!("malformed response: {}", err))
    } else {
        VectorError::Unavailable(err.to_string())
    }
}

async fn error_for(response: Response, collection: &str) -> VectorError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        VectorError::CollectionNotFound(collection.to_string())
    } else {
        classify_status(status, &body)
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionStats>, VectorError> {
        let response = self
            .send(self.client.get(self.url(&format!("/collections/{}", name))))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response, name).await);
        }

        let info: CollectionInfo = Self::parse(response).await?;
        let params = info.config.params.vectors;
        Ok(Some(CollectionStats {
            point_count: info.points_count.unwrap_or(0),
            config: CollectionConfig::new(params.size, distance_from_wire(&params.distance)?),
        }))
    }

    async fn create_collection(
        &self,
        name: &str,
        config: &CollectionConfig,
    ) -> Result<bool, VectorError> {
        let params = VectorParams {
            size: config.vector_size,
            distance: distance_to_wire(config.distance).to_string(),
        };
        let body = json!({ "vectors": params });
        let response = self
            .send(
                self.client
                    .put(self.url(&format!("/collections/{}", name)))
                    .json(&body),
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(collection = %name, "Created collection");
            return Ok(true);
        }

        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT
            || (status == StatusCode::BAD_REQUEST && text.contains("already exists"))
        {
            return Ok(false);
        }
        Err(classify_status(status, &text))
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, VectorError> {
        let response = self
            .send(self.client.delete(self.url(&format!("/collections/{}", name))))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(error_for(response, name).await);
        }
        Self::parse::<bool>(response).await
    }

    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<(), VectorError> {
        let wire: Vec<Value> = points
            .iter()
            .map(|p| {
                json!({
                    "id": id_to_wire(&p.id),
                    "vector": p.vector,
                    "payload": p.payload,
                })
            })
            .collect();

        let response = self
            .send(
                self.client
                    .put(self.url(&format!("/collections/{}/points?wait=true", collection)))
                    .json(&json!({ "points": wire })),
            )
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response, collection).await);
        }
        debug!(collection = %collection, count = points.len(), "Upserted points");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, VectorError> {
        // Qdrant reports raw distance for Euclid; flip to similarity orientation.
        let euclid = request.metric == DistanceMetric::Euclidean;

        let mut body = json!({
            "vector": request.vector,
            "limit": request.limit,
            "with_payload": true,
        });
        if let Some(threshold) = request.score_threshold {
            body["score_threshold"] = json!(if euclid { -threshold } else { threshold });
        }
        if let Some(filter) = &request.filter {
            let wire = filter_to_wire(filter).ok_or_else(|| {
                VectorError::InvalidInput("filter cannot be evaluated by qdrant".to_string())
            })?;
            body["filter"] = wire;
        }

        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/collections/{}/points/search", collection)))
                    .json(&body),
            )
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response, collection).await);
        }

        let points: Vec<ScoredPoint> = Self::parse(response).await?;
        Ok(points
            .into_iter()
            .map(|p| SearchResult {
                id: id_from_wire(&p.id),
                score: if euclid { -p.score } else { p.score },
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }

    fn supports_filter(&self, filter: &Filter) -> bool {
        filter_to_wire(filter).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::match_value;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> QdrantBackend {
        QdrantBackend::new(QdrantConfig::new(server.uri())).unwrap()
    }

    fn info_body(size: usize, distance: &str, count: u64) -> Value {
        json!({
            "status": "ok",
            "result": {
                "status": "green",
                "points_count": count,
                "config": {"params": {"vectors": {"size": size, "distance": distance}}}
            }
        })
    }

    #[tokio::test]
    async fn test_collection_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/kb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(info_body(768, "Cosine", 12)))
            .mount(&server)
            .await;

        let stats = backend(&server).collection_info("kb").await.unwrap().unwrap();
        assert_eq!(stats.point_count, 12);
        assert_eq!(stats.config, CollectionConfig::new(768, DistanceMetric::Cosine));
    }

    #[tokio::test]
    async fn test_missing_collection_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"status": {"error": "Not found"}})),
            )
            .mount(&server)
            .await;

        assert!(backend(&server).collection_info("kb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_collection_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/kb"))
            .and(body_partial_json(json!({"vectors": {"size": 768, "distance": "Euclid"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let created = backend(&server)
            .create_collection("kb", &CollectionConfig::new(768, DistanceMetric::Euclidean))
            .await
            .unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn test_create_conflict_reports_existing() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
            .mount(&server)
            .await;

        let created = backend(&server)
            .create_collection("kb", &CollectionConfig::new(4, DistanceMetric::Cosine))
            .await
            .unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn test_upsert_sends_numeric_ids_and_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/kb/points"))
            .and(query_param("wait", "true"))
            .and(header("api-key", "s3cret"))
            .and(body_partial_json(json!({"points": [{"id": 1, "vector": [1.0, 0.0]}]})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": {"status": "completed"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            QdrantBackend::new(QdrantConfig::new(server.uri()).with_api_key("s3cret")).unwrap();
        backend
            .upsert("kb", &[VectorPoint::new("1", vec![1.0, 0.0])])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_with_filter_and_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/kb/points/search"))
            .and(body_partial_json(json!({
                "limit": 5,
                "with_payload": true,
                "score_threshold": 0.5,
                "filter": {"must": [{"key": "lang", "match": {"value": "rust"}}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": 7, "score": 0.9, "payload": {"lang": "rust"}},
                    {"id": "3f6c2a9e-0000-4000-8000-000000000000", "score": 0.6}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = SearchRequest {
            vector: vec![1.0, 0.0],
            limit: 5,
            score_threshold: Some(0.5),
            filter: Some(Filter::new().must(match_value("lang", "rust"))),
            metric: DistanceMetric::Cosine,
        };
        let hits = backend(&server).search("kb", &request).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "7");
        assert_eq!(hits[0].payload["lang"], "rust");
        assert_eq!(hits[1].id, "3f6c2a9e-0000-4000-8000-000000000000");
        assert!(hits[1].payload.is_empty());
    }

    #[tokio::test]
    async fn test_euclid_scores_are_negated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"score_threshold": 2.0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{"id": 1, "score": 0.5}, {"id": 2, "score": 1.5}]
            })))
            .mount(&server)
            .await;

        let request = SearchRequest {
            vector: vec![0.0, 0.0],
            limit: 2,
            score_threshold: Some(-2.0),
            filter: None,
            metric: DistanceMetric::Euclidean,
        };
        let hits = backend(&server).search("kb", &request).await.unwrap();
        assert_eq!(hits[0].score, -0.5);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/down/points/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/bad/points/search"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad vector"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/gone/points/search"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let request = SearchRequest {
            vector: vec![1.0],
            limit: 1,
            score_threshold: None,
            filter: None,
            metric: DistanceMetric::Cosine,
        };
        assert!(matches!(
            backend.search("down", &request).await,
            Err(VectorError::Unavailable(_))
        ));
        assert!(matches!(
            backend.search("bad", &request).await,
            Err(VectorError::Rejected(_))
        ));
        assert!(matches!(
            backend.search("gone", &request).await,
            Err(VectorError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_text_filter_not_pushed_down() {
        let backend = QdrantBackend::new(QdrantConfig::default()).unwrap();
        let text = Filter::new().must(Condition::TextContains {
            key: "body".into(),
            text: "rust".into(),
        });
        assert!(!backend.supports_filter(&text));
        assert!(backend.supports_filter(&Filter::new().must(match_value("lang", "rust"))));
    }

    #[test]
    fn test_range_wire_omits_unset_bounds() {
        let wire = condition_to_wire(&Condition::Range {
            key: "year".into(),
            gt: None,
            gte: Some(2020.0),
            lt: None,
            lte: None,
        })
        .unwrap();
        assert_eq!(wire, json!({"key": "year", "range": {"gte": 2020.0}}));
    }
}
