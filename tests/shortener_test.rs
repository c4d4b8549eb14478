// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! The built-in HEAD resolver against a fixture shortener.

mod harness;

use axum::{http::StatusCode, response::Redirect, routing::head, Router};
use harness::serve;
use std::time::Duration;
use webmention_moderator::shorteners::{HeadRedirectResolver, Resolver, ShortenerError};

/// Routes only answer HEAD; any other method gets a 405.
async fn shortener() -> harness::Site {
    let app = Router::new()
        .route(
            "/abc",
            head(|| async { Redirect::permanent("https://dest.example/post") }),
        )
        .route("/gone", head(|| async { StatusCode::NOT_FOUND }))
        .route("/bad", head(|| async { StatusCode::BAD_REQUEST }))
        .route("/plain", head(|| async { StatusCode::OK }));
    serve(app).await
}

fn resolver() -> HeadRedirectResolver {
    HeadRedirectResolver::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_reports_location_without_following() {
    let site = shortener().await;
    // dest.example does not resolve, so following the redirect would fail
    let location = resolver().resolve(&site.url("/abc")).await.unwrap();
    assert_eq!(location, "https://dest.example/post");
}

#[tokio::test]
async fn test_error_status_is_rejected() {
    let site = shortener().await;
    assert!(matches!(
        resolver().resolve(&site.url("/gone")).await,
        Err(ShortenerError::UnexpectedStatus(404))
    ));
    assert!(matches!(
        resolver().resolve(&site.url("/missing")).await,
        Err(ShortenerError::UnexpectedStatus(404))
    ));
}

#[tokio::test]
async fn test_bad_request_and_missing_location_resolve_empty() {
    let site = shortener().await;
    assert_eq!(resolver().resolve(&site.url("/bad")).await.unwrap(), "");
    assert_eq!(resolver().resolve(&site.url("/plain")).await.unwrap(), "");
}
