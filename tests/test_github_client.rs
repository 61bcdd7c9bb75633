use patchwright::core::conversation::{locate_latest_patch, AuthorKind};
use patchwright::core::github::GithubClient;
use patchwright::core::publisher::{PullRequestDraft, PullRequestService};
use patchwright::core::results_processor::SUCCESS_MARKER;
use patchwright::core::{ErrorCategory, RepositoryRef};
use serde_json::json;
use std::path::Path;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repo() -> RepositoryRef {
    RepositoryRef::new("octo", "demo")
}

fn client(server: &MockServer) -> GithubClient {
    GithubClient::new(&server.uri(), Some("ghs_test"), 5_000).unwrap()
}

fn comment(i: usize, bot: bool) -> serde_json::Value {
    json!({
        "id": i,
        "body": format!("comment {}", i),
        "user": { "login": if bot { "patchwright[bot]" } else { "octocat" }, "type": if bot { "Bot" } else { "User" } }
    })
}

#[tokio::test]
async fn repository_variable_is_read_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo/actions/variables/OPENAI_API_KEY"))
        .and(header("authorization", "Bearer ghs_test"))
        .and(header("x-github-api-version", "2022-11-28"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "name": "OPENAI_API_KEY", "value": "sk-repo" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let value = client(&server)
        .get_repository_variable(&repo(), "OPENAI_API_KEY")
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("sk-repo"));
}

#[tokio::test]
async fn missing_repository_variable_is_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo/actions/variables/ANTHROPIC_API_KEY"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;

    let value = client(&server)
        .get_repository_variable(&repo(), "ANTHROPIC_API_KEY")
        .await
        .unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn comments_are_paginated_in_order() {
    let server = MockServer::start().await;
    let first: Vec<_> = (0..100).map(|i| comment(i, false)).collect();
    let mut second: Vec<_> = (100..102).map(|i| comment(i, false)).collect();
    second.push(json!({
        "id": 102,
        "body": format!("{}\n```diff\n--- a/x\n+++ b/x\n```", SUCCESS_MARKER),
        "user": { "login": "patchwright[bot]", "type": "Bot" }
    }));

    Mock::given(method("GET"))
        .and(path("/repos/octo/demo/issues/3/comments"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(first)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo/issues/3/comments"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(second)))
        .mount(&server)
        .await;

    let comments = client(&server).list_issue_comments(&repo(), 3).await.unwrap();
    assert_eq!(comments.len(), 103);
    assert_eq!(comments[0].body, "comment 0");
    assert_eq!(comments[101].body, "comment 101");
    assert_eq!(comments[102].author_kind, AuthorKind::Bot);
    assert_eq!(locate_latest_patch(&comments).unwrap(), "--- a/x\n+++ b/x");
}

#[tokio::test]
async fn issue_comment_is_created() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo/issues/3/comments"))
        .and(body_partial_json(json!({ "body": "hello" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 42,
            "html_url": "https://github.com/octo/demo/issues/3#issuecomment-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server)
        .create_issue_comment(&repo(), 3, "hello")
        .await
        .unwrap();
    assert_eq!(created.id, 42);
}

#[tokio::test]
async fn pull_request_is_created_from_draft() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo/pulls"))
        .and(body_partial_json(json!({
            "head": "patchwright/issue-3-20240603-140509",
            "base": "main",
            "title": "Patch for issue #3"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "number": 12,
            "html_url": "https://github.com/octo/demo/pull/12"
        })))
        .mount(&server)
        .await;

    let draft = PullRequestDraft {
        repository: repo(),
        head: "patchwright/issue-3-20240603-140509".to_string(),
        base: "main".to_string(),
        title: "Patch for issue #3".to_string(),
        body: "body".to_string(),
    };
    let pr = PullRequestService::create_pull_request(&client(&server), &draft, Path::new("."))
        .await
        .unwrap();
    assert_eq!(pr.number, Some(12));
    assert_eq!(pr.url, "https://github.com/octo/demo/pull/12");
}

#[tokio::test]
async fn rejected_pull_request_is_transport_failure_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo/pulls"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Validation Failed" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let draft = PullRequestDraft {
        repository: repo(),
        head: "h".to_string(),
        base: "main".to_string(),
        title: "t".to_string(),
        body: "b".to_string(),
    };
    let err = client(&server).create_pull_request(&draft).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::PublishTransportFailure);
    assert!(err.message.contains("422"));
}
