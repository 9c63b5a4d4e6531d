//! Server capability suite
//!
//! Checks that a server publishes a machine-readable capability document at
//! `<url>/metadata`. The EHR launch group parks the run until the launch
//! callback arrives.
//!
//! | Id | Check |
//! |---|---|
//! | `capability-metadata-reachable` | `GET /metadata` answers 200 |
//! | `capability-json-format` | response is JSON |
//! | `capability-fhir-version` | document declares `fhirVersion` |
//! | `capability-cors-header` | CORS preflight allowed (optional) |
//! | `capability-launch-wait` | waits for the launch callback |
//! | `capability-launch-received` | launch state is available |

use futures::future::BoxFuture;
use std::time::Duration;

use crate::executor::{Signal, TestContext, TestOutcome};
use crate::http::{HttpClient, HttpError, HttpRequest};
use crate::models::{
    GroupDefinition, InputDefinition, InputType, SuiteDefinition, TestDefinition,
};
use crate::utils::generate_id;

pub const SUITE_ID: &str = "capability";

const METADATA_REQUEST: &str = "metadata";

/// How long the launch test waits for its callback
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

pub fn capability_suite() -> SuiteDefinition {
    capability_suite_with_timeout(DEFAULT_HTTP_TIMEOUT_SECS)
}

/// Suite whose requests give up after `http_timeout_secs`
pub fn capability_suite_with_timeout(http_timeout_secs: u64) -> SuiteDefinition {
    SuiteDefinition::new(SUITE_ID, "Server Capability")
        .description("Verifies the server's published capability statement")
        .input(
            InputDefinition::new("url")
                .with_title("Server base URL")
                .with_type(InputType::Text),
        )
        .group(metadata_group(http_timeout_secs))
        .group(cors_group(http_timeout_secs))
        .group(launch_group())
}

fn metadata_group(http_timeout_secs: u64) -> GroupDefinition {
    GroupDefinition::new("capability-metadata", "Capability Statement")
        .test(
            TestDefinition::new("capability-metadata-reachable", "Metadata endpoint is reachable")
                .input(InputDefinition::new("url"))
                .makes_request(METADATA_REQUEST)
                .body(move |ctx| Box::pin(metadata_reachable(ctx, http_timeout_secs))),
        )
        .test(
            TestDefinition::new("capability-json-format", "Capability statement is JSON")
                .uses_request(METADATA_REQUEST)
                .run(json_format),
        )
        .test(
            TestDefinition::new("capability-fhir-version", "Capability statement declares a version")
                .uses_request(METADATA_REQUEST)
                .output("fhir_version")
                .run(fhir_version),
        )
}

fn cors_group(http_timeout_secs: u64) -> GroupDefinition {
    GroupDefinition::new("capability-cors", "Cross-origin access")
        .optional()
        .test(
            TestDefinition::new("capability-cors-header", "CORS preflight is allowed")
                .optional()
                .input(InputDefinition::new("url"))
                .input(
                    InputDefinition::new("origin")
                        .optional()
                        .with_default("https://conformance.example"),
                )
                .body(move |ctx| Box::pin(cors_header(ctx, http_timeout_secs))),
        )
}

fn launch_group() -> GroupDefinition {
    GroupDefinition::new("capability-launch", "EHR Launch")
        .run_as_group()
        .requires_option("launch", "ehr")
        .test(
            TestDefinition::new("capability-launch-wait", "EHR launches the client")
                .input(InputDefinition::new("launch_state").optional())
                .output("launch_state")
                .run(launch_wait),
        )
        .test(
            TestDefinition::new("capability-launch-received", "Launch state is known")
                .input(InputDefinition::new("launch_state"))
                .run(|ctx| {
                    let state = ctx.require_input("launch_state")?;
                    ctx.info(format!("Launch received with state `{state}`"));
                    Ok(())
                }),
        )
}

fn client(timeout_secs: u64) -> Result<HttpClient, HttpError> {
    HttpClient::with_timeout(timeout_secs)?
        .default_header("User-Agent", concat!("conformance-engine/", env!("CARGO_PKG_VERSION")))
}

fn endpoint(url: &str, path: &str) -> String {
    format!("{}/{}", url.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn metadata_reachable(ctx: &mut TestContext, timeout_secs: u64) -> TestOutcome {
    let url = ctx.require_input("url")?;
    let client = client(timeout_secs)?;
    let response = client
        .send(HttpRequest::get(endpoint(&url, "metadata")).header("Accept", "application/json"))
        .await?;
    ctx.record_request(response.to_record().with_name(METADATA_REQUEST));

    ctx.assert(
        response.status_code == 200,
        format!("Expected status 200, received {}", response.status_code),
    )?;
    Ok(())
}

fn json_format(ctx: &mut TestContext) -> TestOutcome {
    let request = ctx
        .named_request(METADATA_REQUEST)
        .ok_or_else(|| Signal::skip("No metadata request was made"))?;

    let content_type = request.response_header("content-type").unwrap_or_default();
    ctx.assert(
        content_type.contains("json"),
        format!("Expected a JSON content type, received `{content_type}`"),
    )?;

    let body = request.response_body.as_deref().unwrap_or_default();
    let _: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Signal::fail(format!("Response body is not valid JSON: {e}")))?;
    Ok(())
}

fn fhir_version(ctx: &mut TestContext) -> TestOutcome {
    let body = ctx
        .named_request(METADATA_REQUEST)
        .and_then(|request| request.response_body.clone())
        .ok_or_else(|| Signal::skip("No metadata request was made"))?;

    let document: serde_json::Value = serde_json::from_str(&body)?;
    let version = document
        .get("fhirVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Signal::fail("Capability statement does not declare `fhirVersion`"))?
        .to_string();

    if !version.starts_with('4') {
        ctx.warning(format!("Server declares version {version}"));
    }
    ctx.output("fhir_version", version);
    Ok(())
}

async fn cors_header(ctx: &mut TestContext, timeout_secs: u64) -> TestOutcome {
    let url = ctx.require_input("url")?;
    let origin = ctx.require_input("origin")?;
    let client = client(timeout_secs)?;
    let response = client
        .send(
            HttpRequest::options(endpoint(&url, "metadata"))
                .header("Origin", origin.as_str())
                .header("Access-Control-Request-Method", "GET"),
        )
        .await?;
    ctx.record_request(response.to_record());

    let allowed = response.header("access-control-allow-origin");
    ctx.assert(
        matches!(allowed, Some("*")) || allowed == Some(origin.as_str()),
        format!("Origin `{origin}` is not allowed"),
    )?;
    Ok(())
}

fn launch_wait(ctx: &mut TestContext) -> TestOutcome {
    let state = ctx
        .input_str("launch_state")
        .unwrap_or_else(|| generate_id("launch"));
    ctx.output("launch_state", state.clone());
    ctx.wait(
        state.clone(),
        format!("Waiting for the EHR to launch with state `{state}`"),
        LAUNCH_TIMEOUT,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestRecord, RunnableId, RunnableTree, SuiteOption};

    fn tree() -> RunnableTree {
        RunnableTree::from_suites(vec![capability_suite()]).unwrap()
    }

    fn metadata(body: &str, content_type: &str) -> RequestRecord {
        let mut record = RequestRecord::new("get", "http://localhost/metadata")
            .with_name(METADATA_REQUEST)
            .with_status(200)
            .with_response_body(body);
        record
            .response_headers
            .insert("content-type".to_string(), content_type.to_string());
        record
    }

    fn context_with(record: RequestRecord) -> TestContext {
        let mut ctx = TestContext::new("session", "run", RunnableId::new("t"));
        ctx.record_request(record);
        ctx
    }

    #[test]
    fn test_launch_group_requires_option() {
        let tree = tree();
        let suite = RunnableId::new(SUITE_ID);
        assert_eq!(tree.children(&suite, &[]).len(), 2);

        let ehr = vec![SuiteOption::new("launch", "ehr")];
        assert_eq!(tree.children(&suite, &ehr).len(), 3);
        assert!(!tree.resolve("capability-launch-wait").unwrap().user_runnable);
    }

    #[test]
    fn test_json_format() {
        let mut ctx = context_with(metadata(r#"{"fhirVersion":"4.0.1"}"#, "application/fhir+json"));
        assert!(json_format(&mut ctx).is_ok());

        let mut ctx = context_with(metadata("<xml/>", "application/xml"));
        assert!(matches!(
            json_format(&mut ctx),
            Err(crate::executor::TestError::Signal(Signal::Fail(_)))
        ));

        let mut ctx = TestContext::new("session", "run", RunnableId::new("t"));
        assert!(matches!(
            json_format(&mut ctx),
            Err(crate::executor::TestError::Signal(Signal::Skip(_)))
        ));
    }

    #[test]
    fn test_fhir_version_output() {
        let mut ctx = context_with(metadata(r#"{"fhirVersion":"4.0.1"}"#, "application/json"));
        assert!(fhir_version(&mut ctx).is_ok());
        assert_eq!(
            ctx.outputs().get("fhir_version"),
            Some(&serde_json::Value::from("4.0.1"))
        );

        let mut ctx = context_with(metadata(r#"{"resourceType":"CapabilityStatement"}"#, "application/json"));
        assert!(matches!(
            fhir_version(&mut ctx),
            Err(crate::executor::TestError::Signal(Signal::Fail(_)))
        ));
    }

    #[test]
    fn test_launch_wait_uses_given_state() {
        let mut inputs = std::collections::BTreeMap::new();
        inputs.insert("launch_state".to_string(), serde_json::Value::from("abc"));
        let mut ctx = TestContext::new("session", "run", RunnableId::new("t")).with_inputs(inputs);

        match launch_wait(&mut ctx) {
            Err(crate::executor::TestError::Signal(Signal::Wait { identifier, .. })) => {
                assert_eq!(identifier, "abc")
            }
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(endpoint("http://h/fhir/", "/metadata"), "http://h/fhir/metadata");
    }
}
