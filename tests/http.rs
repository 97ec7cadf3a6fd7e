mod common;

use metrics_pandora_output::config::{PipelineConfig, TsdbConfig};
use metrics_pandora_output::{Error, PipelineOutput, Point, TsdbOutput};
use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// base64("ak:sk")
const AUTHORIZATION: &str = "Basic YWs6c2s=";

fn batch() -> Vec<Point> {
    vec![
        Point::new("cpu", 1000).tag("host", "h1").field("usage", 0.5),
        Point::new("mem", 1000).field("free", 1024_i64),
    ]
}

fn tsdb_output(server: &MockServer, auto_create_series: bool) -> TsdbOutput {
    let mut output: TsdbOutput =
        TsdbOutput::new(common::tsdb_config(&server.uri(), auto_create_series, "7d"));
    output.connect().unwrap();

    output
}

#[tokio::test]
async fn connect_rejects_bad_scheme() {
    let mut output: TsdbOutput = TsdbOutput::new(TsdbConfig {
        url: "htt://foobar:8089".to_string(),
        repo: "telegraf".to_string(),
        ak: "ak".to_string(),
        sk: "sk".to_string(),
        auto_create_series: false,
        retention_policy: None,
        timeout: std::time::Duration::from_secs(5),
    });

    assert!(matches!(output.connect(), Err(Error::Config(_))));
    assert!(!output.is_connected());
}

#[tokio::test]
async fn tsdb_write() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/telegraf/points"))
        .and(header("authorization", AUTHORIZATION))
        .and(body_string("cpu,host=h1 usage=0.5 1000\nmem free=1024i 1000\n"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut output = tsdb_output(&server, false);

    output.write(&batch()).await.unwrap();
}

#[tokio::test]
async fn tsdb_database_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/telegraf/points"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "database not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut output = tsdb_output(&server, true);

    let err = output.write(&batch()).await.unwrap_err();

    match err {
        Error::Backend(err) => {
            assert_eq!(err.status, Some(404));
            assert_eq!(err.message, "database not found");
            assert_eq!(err.code, None);
        }
        other => panic!("unexpected error; err={other}"),
    }
}

#[tokio::test]
async fn tsdb_field_type_conflict_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/telegraf/points"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "partial write: field type conflict: input field \"usage\" on measurement \
                      \"cpu\" is type float, already exists as type integer dropped=1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut output = tsdb_output(&server, true);

    output.write(&batch()).await.unwrap();
}

#[tokio::test]
async fn tsdb_plain_text_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/telegraf/points"))
        .respond_with(ResponseTemplate::new(502).set_body_string("  bad gateway\n"))
        .mount(&server)
        .await;

    let mut output = tsdb_output(&server, false);

    let err = output.write(&batch()).await.unwrap_err();

    assert_eq!(err.to_string(), "Backend; err=bad gateway");
}

#[tokio::test]
async fn tsdb_creates_missing_series() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/telegraf/points"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "E7101: series cpu not exist"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/telegraf/series/cpu"))
        .and(header("authorization", AUTHORIZATION))
        .and(body_json(json!({ "retention": "7d" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    // `mem` carries no tags and is never named.
    Mock::given(method("POST"))
        .and(path("/v4/repos/telegraf/series/mem"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut output = tsdb_output(&server, true);

    output.write(&batch()).await.unwrap();
}

#[tokio::test]
async fn pipeline_bootstrap() {
    let server = MockServer::start().await;
    let repo_missing = ResponseTemplate::new(404).set_body_json(json!({
        "error": "E18102: repo monitor does not exist"
    }));

    Mock::given(method("POST"))
        .and(path("/v2/repos/monitor/data"))
        .and(header("authorization", AUTHORIZATION))
        .and(body_string(
            "cpu_host=h1\tcpu_usage=0.5\tmem_free=1024\ttimestamp=1000\n",
        ))
        .respond_with(repo_missing.clone())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/repos/monitor"))
        .respond_with(repo_missing)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/repos/monitor"))
        .and(body_json(json!({
            "region": "nb",
            "schema": [
                { "key": "cpu_host", "valtype": "string", "required": false },
                { "key": "cpu_usage", "valtype": "float", "required": false },
                { "key": "mem_free", "valtype": "long", "required": false },
                { "key": "timestamp", "valtype": "long", "required": false },
            ]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/monitor"))
        .and(body_json(json!({ "region": "nb" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/monitor/series/cpu"))
        .and(body_json(json!({ "retention": "7d" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/monitor/series/mem"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/repos/monitor/exports/export_cpu_toTSDB"))
        .and(body_json(json!({
            "type": "tsdb",
            "whence": "oldest",
            "spec": {
                "destRepoName": "monitor",
                "seriesName": "cpu",
                "timestamp": "#timestamp",
                "tags": { "host": "#cpu_host" },
                "fields": { "usage": "#cpu_usage" }
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/repos/monitor/exports/export_mem_toTSDB"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut output: PipelineOutput = PipelineOutput::new(
        PipelineConfig::from_toml(
            toml::from_str(&format!(
                r#"
                url = "{uri}"
                tsdb_url = "{uri}"
                repo = "monitor"
                ak = "ak"
                sk = "sk"
                auto_create_repo = true
                "#,
                uri = server.uri(),
            ))
            .unwrap(),
        )
        .unwrap(),
    );
    output.connect().unwrap();

    output.write(&batch()).await.unwrap();
}

#[tokio::test]
async fn pipeline_export_conflict_updates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/repos/monitor/data"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v4/repos/monitor/series/cpu"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "E6302: series already exists"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/repos/monitor/exports/export_cpu_toTSDB"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "E18301: export already exists"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/repos/monitor/exports/export_cpu_toTSDB"))
        .and(body_json(json!({
            "spec": {
                "destRepoName": "monitor",
                "seriesName": "cpu",
                "timestamp": "#timestamp",
                "tags": { "host": "#cpu_host" },
                "fields": { "usage": "#cpu_usage" }
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut output: PipelineOutput = PipelineOutput::new(
        PipelineConfig::from_toml(
            toml::from_str(&format!(
                r#"
                url = "{uri}"
                tsdb_url = "{uri}"
                repo = "monitor"
                ak = "ak"
                sk = "sk"
                "#,
                uri = server.uri(),
            ))
            .unwrap(),
        )
        .unwrap(),
    );
    output.connect().unwrap();

    output
        .write(&[Point::new("cpu", 1000).tag("host", "h1").field("usage", 0.5)])
        .await
        .unwrap();
}
