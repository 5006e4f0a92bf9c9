//! Integration tests for topic resolution

use axum::http::{HeaderMap, HeaderValue, Uri, header};
use status_server::{JwtTopicResolver, StreamKind, TopicError, TopicResolver, issue_token, topic_for};

const SECRET: &str = "integration-test-secret";

fn resolver() -> JwtTopicResolver {
    JwtTopicResolver::new(SECRET, "token")
}

fn with_cookie(user_id: i64) -> HeaderMap {
    let token = issue_token(user_id, "tester", 300, SECRET).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&format!("theme=dark; token={}", token)).unwrap(),
    );
    headers
}

fn uri(query: &str) -> Uri {
    format!("/api/events{}", query).parse().unwrap()
}

#[test]
fn test_both_stream_kinds_accepted() {
    let resolver = resolver();
    let headers = with_cookie(123);

    assert_eq!(
        resolver.resolve(&headers, &uri("?stream=servers")).unwrap(),
        "owner-123:servers"
    );
    assert_eq!(
        resolver.resolve(&headers, &uri("?stream=services")).unwrap(),
        "owner-123:services"
    );
}

#[test]
fn test_topic_format() {
    assert_eq!(topic_for(1, StreamKind::Services), "owner-1:services");
    assert_eq!(topic_for(42, StreamKind::Servers), "owner-42:servers");
}

#[test]
fn test_non_positive_owner_rejected() {
    let resolver = resolver();

    for user_id in [0, -5] {
        let err = resolver
            .resolve(&with_cookie(user_id), &uri("?stream=servers"))
            .unwrap_err();
        assert_eq!(err, TopicError::InvalidOwner(user_id));
    }
}

#[test]
fn test_missing_or_empty_stream_kind_rejected() {
    let resolver = resolver();
    let headers = with_cookie(7);

    for query in ["", "?stream=", "?other=servers"] {
        let err = resolver.resolve(&headers, &uri(query)).unwrap_err();
        assert_eq!(err, TopicError::InvalidStreamKind(String::new()));
    }
}

#[test]
fn test_unknown_stream_kind_rejected() {
    let err = resolver()
        .resolve(&with_cookie(7), &uri("?stream=unknown"))
        .unwrap_err();
    assert_eq!(err, TopicError::InvalidStreamKind("unknown".to_string()));
}

#[test]
fn test_garbage_credential_rejected() {
    let mut headers = HeaderMap::new();
    headers.insert(header::COOKIE, HeaderValue::from_static("token=not-a-jwt"));

    let err = resolver()
        .resolve(&headers, &uri("?stream=servers"))
        .unwrap_err();
    assert!(matches!(err, TopicError::InvalidCredential(_)));
}

#[test]
fn test_credential_checked_before_stream_kind() {
    let err = resolver()
        .resolve(&HeaderMap::new(), &uri("?stream=unknown"))
        .unwrap_err();
    assert_eq!(err, TopicError::MissingCredential);
}
