//! Locally rendered HTML: the login form and the status-keyed error pages.
//!
//! Platform deployments replace these with themed templates; the built-in
//! ones keep the gateway self-contained.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

const PAGE_SHELL: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<main>
<h1>{title}</h1>
<p>{message}</p>
</main>
</body>
</html>
"#;

/// Status-keyed error page renderer.
#[derive(Clone, Default)]
pub struct ErrorPages;

impl ErrorPages {
    /// Render the page for a status code, falling back to a generic
    /// template for codes without a specific one.
    pub fn render(&self, status: StatusCode) -> Response {
        let (title, message) = match status.as_u16() {
            400 => ("Bad request", "The request could not be understood."),
            401 => ("Authentication required", "Please sign in to continue."),
            403 => ("Access denied", "You do not have permission to access this resource."),
            404 => ("Not found", "The requested resource does not exist."),
            409 => ("Conflict", "An account with these details already exists."),
            502 => ("Bad gateway", "The backend service returned an invalid response."),
            503 => ("Service unavailable", "The backend service is temporarily unavailable."),
            504 => ("Gateway timeout", "The backend service did not answer in time."),
            500..=599 => ("Server error", "Something went wrong on our side."),
            _ => ("Error", "The request could not be completed."),
        };
        let body = PAGE_SHELL
            .replace("{title}", title)
            .replace("{message}", message);
        (status, Html(body)).into_response()
    }
}

/// The minimal login form.
pub fn login_page(error: bool, providers: &[(String, String)]) -> Html<String> {
    let banner = if error {
        "<p class=\"error\">Invalid username or password.</p>"
    } else {
        ""
    };
    let mut provider_links = String::new();
    for (id, href) in providers {
        provider_links.push_str(&format!(
            "<li><a href=\"{href}\">Sign in with {id}</a></li>\n"
        ));
    }
    if !provider_links.is_empty() {
        provider_links = format!("<ul>\n{provider_links}</ul>");
    }
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Sign in</title></head>
<body>
<main>
<h1>Sign in</h1>
{banner}
<form method="post" action="/login">
<label>Username <input type="text" name="username" autofocus></label>
<label>Password <input type="password" name="password"></label>
<button type="submit">Sign in</button>
</form>
{provider_links}
</main>
</body>
</html>
"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_status_gets_a_specific_page() {
        let pages = ErrorPages;
        let resp = pages.render(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unknown_status_falls_back_to_generic() {
        let pages = ErrorPages;
        let resp = pages.render(StatusCode::IM_A_TEAPOT);
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn login_page_lists_providers() {
        let page = login_page(
            true,
            &[("proconnect".into(), "/login/oauth2/authorization/proconnect".into())],
        );
        assert!(page.0.contains("Invalid username or password"));
        assert!(page.0.contains("/login/oauth2/authorization/proconnect"));
    }
}
