use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use scanner_kernel::{
    AnalysisPipeline, AnalysisService, DirectoryCollector, SearchConfig, SearchGenerator, SearchMode,
    ServerAssessor, ToolCollector,
};
use scanner_oracle::{
    GatewayConfig, OracleDescriptor, OracleGateway, OracleRequest, OracleResult, ReasoningOracle,
    RuleBasedOracle,
};
use scanner_primitives::{AnalysisFragment, CapabilityMap, KeyId, ToolDeclaration};
use scanner_server::{AppState, build_router};
use scanner_store::VolatileStore;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tower::ServiceExt;

/// Rule-based answers, optionally gated or hanging on chosen tool pairs.
struct TestOracle {
    inner: RuleBasedOracle,
    gate: Option<Arc<Semaphore>>,
    hang_on: Option<[&'static str; 2]>,
}

impl TestOracle {
    fn rules() -> Self {
        Self {
            inner: RuleBasedOracle::default(),
            gate: None,
            hang_on: None,
        }
    }
}

#[async_trait]
impl ReasoningOracle for TestOracle {
    fn descriptor(&self) -> OracleDescriptor {
        OracleDescriptor::new("test", "rules", 0.0)
    }

    async fn classify(&self, tools: &[ToolDeclaration]) -> OracleResult<CapabilityMap> {
        self.inner.classify(tools).await
    }

    async fn detect_surpluses(&self, request: &OracleRequest) -> OracleResult<AnalysisFragment> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        let names: Vec<&str> = request.tools().iter().map(ToolDeclaration::tool_name).collect();
        if self
            .hang_on
            .is_some_and(|pair| pair.iter().all(|tool| names.contains(tool)))
        {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.inner.detect_surpluses(request).await
    }
}

struct Harness {
    router: Router,
    state: AppState,
    _declarations: TempDir,
}

async fn harness(oracle: TestOracle, call_timeout: Duration, search: SearchConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("ServerA.json"),
        json!([{
            "name": "get_secret_word",
            "description": "Returns the secret word",
            "inputSchema": {"type": "object"}
        }])
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("20250101-120000-ServerB.json"),
        json!({"tools": [{
            "name": "update_cart",
            "description": "Adds items to the cart",
            "inputSchema": {"type": "object", "properties": {"item": {"type": "string"}}}
        }]})
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("ServerC.json"),
        json!([{"name": "http_post", "description": "Sends data to a remote URL"}]).to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("ServerD.json"),
        json!([{"name": "list_colours", "description": "Lists colours"}]).to_string(),
    )
    .unwrap();

    let collector: Arc<dyn ToolCollector> = Arc::new(DirectoryCollector::scan(dir.path()).await.unwrap());
    let gateway = OracleGateway::new(Arc::new(oracle), GatewayConfig::new(call_timeout, 0).unwrap());
    let pipeline = AnalysisPipeline::new(gateway.clone(), Arc::new(VolatileStore::new()))
        .unwrap()
        .with_search(SearchGenerator::new(search).unwrap());
    let service = AnalysisService::new(pipeline, Arc::clone(&collector)).with_declarations_root(dir.path());
    let assessor = ServerAssessor::new(gateway, collector, Arc::new(VolatileStore::new()));
    let state = AppState::new(service, assessor, "test/rules");
    Harness {
        router: build_router(state.clone()),
        state,
        _declarations: dir,
    }
}

async fn rules_harness() -> Harness {
    harness(TestOracle::rules(), Duration::from_secs(5), SearchConfig::default()).await
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn servers(names: &[&str]) -> Value {
    json!({ "server_names": names })
}

#[tokio::test]
async fn secret_word_and_cart_are_blocked() {
    let h = rules_harness().await;
    let (status, run) = send(
        &h.router,
        Method::POST,
        "/analyze-composition?wait=true",
        Some(servers(&["ServerA", "ServerB"])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "complete");
    let analysis = &run["analysis"];
    assert_eq!(analysis["risk_score"], "Critical");
    assert_eq!(analysis["recommended_action"], "BLOCK");
    assert_eq!(analysis["surpluses"].as_array().unwrap().len(), 1);
    assert_eq!(analysis["constraints"].as_array().unwrap().len(), 1);
    assert!(
        analysis["constraints"][0]
            .as_str()
            .unwrap()
            .contains("must not be co-authorized")
    );
    assert_eq!(run["provenance"]["oracle_model"], "test/rules");
}

#[tokio::test]
async fn server_order_maps_to_one_composition() {
    let h = rules_harness().await;
    let (_, first) = send(
        &h.router,
        Method::POST,
        "/analyze-composition?wait=true",
        Some(servers(&["ServerB", "ServerA"])),
    )
    .await;
    let (_, second) = send(
        &h.router,
        Method::POST,
        "/analyze-composition?wait=true",
        Some(servers(&["ServerA", "ServerB"])),
    )
    .await;
    let key_id = first["key_id"].as_str().unwrap();
    assert_eq!(second["key_id"], key_id);

    let (status, history) = send(
        &h.router,
        Method::GET,
        &format!("/composition-results/{key_id}/history"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["runs"].as_array().unwrap().len(), 2);

    let (status, latest) = send(&h.router, Method::GET, &format!("/composition-results/{key_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["run_id"], second["run_id"]);

    let (_, listing) = send(&h.router, Method::GET, "/composition-results", None).await;
    let results = listing["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["recommended_action"], "BLOCK");
    assert_eq!(results[0]["cross_server"], 1);
}

#[tokio::test]
async fn duplicate_submission_reports_the_run_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let oracle = TestOracle {
        gate: Some(Arc::clone(&gate)),
        ..TestOracle::rules()
    };
    let h = harness(oracle, Duration::from_secs(30), SearchConfig::default()).await;

    let (status, started) = send(
        &h.router,
        Method::POST,
        "/analyze-composition",
        Some(servers(&["ServerA", "ServerB"])),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["status"], "started");

    let (status, duplicate) = send(
        &h.router,
        Method::POST,
        "/analyze-composition",
        Some(servers(&["ServerB", "ServerA"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(duplicate["status"], "in_progress");
    assert_eq!(duplicate["run_id"], started["run_id"]);

    let (_, in_flight) = send(&h.router, Method::GET, "/status", None).await;
    assert_eq!(in_flight["in_flight"], 1);

    let key_id: KeyId = started["key_id"].as_str().unwrap().parse().unwrap();
    let handle = h.state.service().registry().get(&key_id).unwrap();
    gate.add_permits(8);
    let run = handle.wait().await.unwrap();
    assert_eq!(run.run_id().to_string(), started["run_id"].as_str().unwrap());

    let (_, history) = send(
        &h.router,
        Method::GET,
        &format!("/composition-results/{key_id}/history"),
        None,
    )
    .await;
    assert_eq!(history["runs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn one_timed_out_pair_yields_an_incomplete_run() {
    let oracle = TestOracle {
        hang_on: Some(["update_cart", "http_post"]),
        ..TestOracle::rules()
    };
    let h = harness(oracle, Duration::from_millis(200), SearchConfig::default()).await;

    let (status, run) = send(
        &h.router,
        Method::POST,
        "/analyze-composition?wait=true",
        Some(servers(&["ServerA", "ServerB", "ServerC"])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "incomplete");
    assert_eq!(run["provenance"]["groups_enumerated"], 3);
    assert_eq!(run["provenance"]["groups_evaluated"], 2);
    let failed = run["failed_groups"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["kind"], "timeout");
    assert_eq!(run["analysis"]["surpluses"].as_array().unwrap().len(), 2);
    assert_eq!(run["analysis"]["recommended_action"], "BLOCK");
}

#[tokio::test]
async fn errors_carry_kind_and_status() {
    let h = rules_harness().await;

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/analyze-composition",
        Some(servers(&["ServerA", "ServerZ"])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "collection");

    let (status, body) = send(&h.router, Method::POST, "/analyze-composition", Some(servers(&["ServerA"]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");

    let (status, body) = send(&h.router, Method::GET, "/composition-results/not-a-key", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");

    let missing = "0".repeat(64);
    let (status, body) = send(&h.router, Method::GET, &format!("/composition-results/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");

    let (status, _) = send(&h.router, Method::DELETE, &format!("/analyze-composition/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&h.router, Method::POST, "/analyze-composition", Some(json!({"server_names": 7}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");
}

#[tokio::test]
async fn oversized_search_space_is_unprocessable() {
    let search = SearchConfig {
        mode: SearchMode::AllPairs,
        max_groups: 2,
    };
    let h = harness(TestOracle::rules(), Duration::from_secs(5), search).await;
    let (status, body) = send(
        &h.router,
        Method::POST,
        "/analyze-composition?wait=true",
        Some(servers(&["ServerA", "ServerB", "ServerC"])),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "search_space");
}

#[tokio::test]
async fn batch_entries_fail_independently() {
    let h = rules_harness().await;
    let (status, body) = send(
        &h.router,
        Method::POST,
        "/analyze-composition/batch",
        Some(json!({"submissions": [
            {"server_names": ["ServerA", "ServerZ"]},
            {"server_names": ["ServerA", "ServerD"]},
        ]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["error"]["kind"], "collection");
    assert_eq!(results[1]["status"], "started");
}

#[tokio::test]
async fn cancelling_a_run_stores_nothing() {
    let gate = Arc::new(Semaphore::new(0));
    let oracle = TestOracle {
        gate: Some(Arc::clone(&gate)),
        ..TestOracle::rules()
    };
    let h = harness(oracle, Duration::from_secs(30), SearchConfig::default()).await;
    let (_, started) = send(
        &h.router,
        Method::POST,
        "/analyze-composition",
        Some(servers(&["ServerA", "ServerB"])),
    )
    .await;
    let key_id = started["key_id"].as_str().unwrap();
    let handle = h
        .state
        .service()
        .registry()
        .get(&key_id.parse().unwrap())
        .unwrap();

    let (status, body) = send(&h.router, Method::DELETE, &format!("/analyze-composition/{key_id}"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "cancelling");
    assert!(handle.wait().await.is_err());

    let (status, _) = send(&h.router, Method::GET, &format!("/composition-results/{key_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn service_info_reports_the_oracle() {
    let h = rules_harness().await;
    let (status, body) = send(&h.router, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "composition-scanner");
    assert_eq!(body["oracle"], "test/rules");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn declaration_files_must_stay_under_the_root() {
    let h = rules_harness().await;

    let (status, run) = send(
        &h.router,
        Method::POST,
        "/analyze-composition?wait=true",
        Some(json!({"server_names": ["ServerA"], "declaration_files": ["ServerD.json"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["provenance"]["tool_count"], 2);

    for outside in ["../outside.json", "/etc/passwd", "nested/../../ServerD.json"] {
        let (status, body) = send(
            &h.router,
            Method::POST,
            "/analyze-composition",
            Some(json!({"server_names": ["ServerA"], "declaration_files": [outside]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{outside}");
        assert_eq!(body["error"]["kind"], "invalid_request");
        assert!(
            body["error"]["message"]
                .as_str()
                .unwrap()
                .contains("not available under the declarations root")
        );
    }
}

#[tokio::test]
async fn single_server_assessment_is_archived() {
    let h = rules_harness().await;
    let (status, saved) = send(
        &h.router,
        Method::POST,
        "/analyze?wait=true",
        Some(json!({"server_name": "ServerA"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let assessment = &saved["assessment"];
    assert_eq!(assessment["server"], "ServerA");
    assert_eq!(assessment["overall_risk_score"], "High");
    assert_eq!(assessment["action"], "BLOCK");
    assert_eq!(assessment["tool_assessments"][0]["tool_name"], "get_secret_word");
    assert_eq!(assessment["oracle_model"], "test/rules");

    let (status, listing) = send(&h.router, Method::GET, "/results", None).await;
    assert_eq!(status, StatusCode::OK);
    let results = listing["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filename"], saved["filename"]);
    assert_eq!(results[0]["tools_analyzed"], 1);
    assert_eq!(results[0]["risk_score"], "High");

    let (status, body) = send(
        &h.router,
        Method::POST,
        "/analyze?wait=true",
        Some(json!({"server_name": "ServerZ"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "collection");
}

#[tokio::test]
async fn analyze_all_queues_every_configured_server() {
    let h = rules_harness().await;
    let (status, body) = send(&h.router, Method::POST, "/analyze-all", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let queued = body["results"].as_array().unwrap();
    assert_eq!(queued.len(), 4);
    assert!(queued.iter().all(|entry| entry["status"] == "queued"));

    let (_, status_body) = send(&h.router, Method::GET, "/status", None).await;
    assert!(status_body["assessments_queued"].as_u64().unwrap() <= 4);

    assert_eq!(h.state.assessor().drain(Duration::from_secs(5)).await, 0);
    let (_, listing) = send(&h.router, Method::GET, "/results", None).await;
    assert_eq!(listing["results"].as_array().unwrap().len(), 4);

    let (_, status_body) = send(&h.router, Method::GET, "/status", None).await;
    assert_eq!(status_body["assessments_queued"], 0);
}

#[tokio::test]
async fn queued_assessment_returns_a_request_id() {
    let h = rules_harness().await;
    let (status, body) = send(
        &h.router,
        Method::POST,
        "/analyze",
        Some(json!({"server_name": "ServerD"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["server"], "ServerD");
    assert!(body["request_id"].as_str().unwrap().starts_with("req_"));

    let (status, body) = send(&h.router, Method::POST, "/analyze", Some(json!({"server_name": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");
}
