//! Header projection: strip whatever a client could spoof, then attach the
//! trusted identity headers derived from the resolved user.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use geogw_core::config::HeaderMappingsConfig;
use geogw_core::GatewayError;
use geogw_security::{ResolvedUser, PREAUTH_GATE_HEADER, PREAUTH_PREFIX};

/// Strip every identity-bearing inbound header: the pre-auth gate, all
/// `preauth-*` headers, and everything starting with `sec-`. Runs
/// unconditionally before any request is forwarded.
pub fn sanitize(headers: &mut HeaderMap) {
    let spoofable: Vec<HeaderName> = headers
        .keys()
        .filter(|name| {
            let name = name.as_str();
            name == PREAUTH_GATE_HEADER
                || name.starts_with(PREAUTH_PREFIX)
                || name.starts_with("sec-")
        })
        .cloned()
        .collect();
    for name in spoofable {
        headers.remove(&name);
    }
}

/// Append the outbound identity headers enabled by the effective mappings.
pub fn project(
    resolved: &ResolvedUser,
    mappings: &HeaderMappingsConfig,
    headers: &mut HeaderMap,
) -> Result<(), GatewayError> {
    let user = &resolved.user;
    let mut put = |name: &'static str, value: String| -> Result<(), GatewayError> {
        if value.is_empty() {
            return Ok(());
        }
        headers.insert(
            HeaderName::from_static(name),
            encode_value(&value).map_err(|_| {
                GatewayError::UpstreamError(format!("header '{name}' not encodable"))
            })?,
        );
        Ok(())
    };

    if mappings.proxy {
        put("sec-proxy", "true".into())?;
    }
    if !user.anonymous {
        if mappings.username {
            put("sec-username", user.username.clone())?;
        }
        if mappings.roles {
            put("sec-roles", user.roles.join(";"))?;
        }
    }
    if mappings.org {
        put("sec-org", user.organization.clone())?;
    }
    if mappings.orgname {
        if let Some(org) = &resolved.organization {
            put("sec-orgname", org.name.clone())?;
        }
    }
    if mappings.email {
        put("sec-email", user.email.clone())?;
    }
    if mappings.firstname {
        put("sec-firstname", user.first_name.clone())?;
    }
    if mappings.lastname {
        put("sec-lastname", user.last_name.clone())?;
    }
    if mappings.tel {
        put("sec-tel", user.telephone_number.clone())?;
    }
    if mappings.address {
        put("sec-address", user.postal_address.clone())?;
    }
    if !user.anonymous && mappings.json_user {
        let json = serde_json::to_vec(user)
            .map_err(|e| GatewayError::UpstreamError(format!("user serialization: {e}")))?;
        put("sec-json-user", BASE64.encode(json))?;
    }
    if mappings.json_organization {
        if let Some(org) = &resolved.organization {
            let json = serde_json::to_vec(org).map_err(|e| {
                GatewayError::UpstreamError(format!("organization serialization: {e}"))
            })?;
            put("sec-json-organization", BASE64.encode(json))?;
        }
    }
    if mappings.external_authentication && resolved.external {
        put("sec-external-authentication", "true".into())?;
    }
    Ok(())
}

/// Header values travel as ISO-8859-1; anything beyond ASCII is carried as
/// `{base64}<base64>`.
fn encode_value(value: &str) -> Result<HeaderValue, http::header::InvalidHeaderValue> {
    if value.is_ascii() && !value.contains(['\r', '\n']) {
        HeaderValue::from_str(value)
    } else {
        HeaderValue::from_str(&format!("{{base64}}{}", BASE64.encode(value.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geogw_core::{Organization, User};

    fn resolved(user: User, org: Option<Organization>, external: bool) -> ResolvedUser {
        ResolvedUser {
            user,
            organization: org,
            method: if external { "oidc" } else { "ldap" },
            external,
        }
    }

    fn alice() -> User {
        User {
            username: "alice".into(),
            email: "alice@x".into(),
            first_name: "Alice".into(),
            last_name: "Doe".into(),
            organization: "ACME".into(),
            roles: vec!["ROLE_USER".into(), "ROLE_ADMINISTRATOR".into()],
            ..Default::default()
        }
    }

    #[test]
    fn sanitize_removes_spoofable_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-roles", "ROLE_SUPER".parse().unwrap());
        headers.insert("sec-username", "evil".parse().unwrap());
        headers.insert("sec-georchestra-preauthenticated", "true".parse().unwrap());
        headers.insert("preauth-username", "evil".parse().unwrap());
        headers.insert("accept", "text/html".parse().unwrap());

        sanitize(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn projection_for_an_authenticated_user() {
        let mut headers = HeaderMap::new();
        let mappings = HeaderMappingsConfig::default();
        project(&resolved(alice(), None, false), &mappings, &mut headers).unwrap();

        assert_eq!(headers["sec-proxy"], "true");
        assert_eq!(headers["sec-username"], "alice");
        assert_eq!(headers["sec-roles"], "ROLE_USER;ROLE_ADMINISTRATOR");
        assert_eq!(headers["sec-org"], "ACME");
        assert_eq!(headers["sec-email"], "alice@x");
        assert!(!headers.contains_key("sec-external-authentication"));
        assert!(!headers.contains_key("sec-json-user"));
    }

    #[test]
    fn projection_for_anonymous_keeps_proxy_only() {
        let mut headers = HeaderMap::new();
        let mappings = HeaderMappingsConfig::default();
        project(
            &resolved(User::anonymous(), None, false),
            &mappings,
            &mut headers,
        )
        .unwrap();

        assert_eq!(headers["sec-proxy"], "true");
        assert!(!headers.contains_key("sec-username"));
        assert!(!headers.contains_key("sec-roles"));
    }

    #[test]
    fn disabled_mappings_suppress_headers() {
        let mut headers = HeaderMap::new();
        let mut mappings = HeaderMappingsConfig::default();
        mappings.username = false;
        mappings.email = false;
        project(&resolved(alice(), None, false), &mappings, &mut headers).unwrap();
        assert!(!headers.contains_key("sec-username"));
        assert!(!headers.contains_key("sec-email"));
        assert_eq!(headers["sec-roles"], "ROLE_USER;ROLE_ADMINISTRATOR");
    }

    #[test]
    fn json_headers_are_base64_json() {
        let mut headers = HeaderMap::new();
        let mut mappings = HeaderMappingsConfig::default();
        mappings.json_user = true;
        mappings.json_organization = true;
        let mut org = Organization::new("ACME");
        org.name = "Acme Corp".into();
        project(&resolved(alice(), Some(org), false), &mappings, &mut headers).unwrap();

        let decoded = BASE64
            .decode(headers["sec-json-user"].as_bytes())
            .unwrap();
        let user: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(user["username"], "alice");

        let decoded = BASE64
            .decode(headers["sec-json-organization"].as_bytes())
            .unwrap();
        let org: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(org["name"], "Acme Corp");
    }

    #[test]
    fn external_authentication_marker() {
        let mut headers = HeaderMap::new();
        project(
            &resolved(alice(), None, true),
            &HeaderMappingsConfig::default(),
            &mut headers,
        )
        .unwrap();
        assert_eq!(headers["sec-external-authentication"], "true");
    }

    #[test]
    fn non_ascii_values_travel_as_base64() {
        let mut user = alice();
        user.last_name = "Curie-Skłodowska".into();
        let mut headers = HeaderMap::new();
        project(
            &resolved(user, None, false),
            &HeaderMappingsConfig::default(),
            &mut headers,
        )
        .unwrap();
        let value = headers["sec-lastname"].to_str().unwrap();
        let encoded = value.strip_prefix("{base64}").unwrap();
        assert_eq!(
            String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap(),
            "Curie-Skłodowska"
        );
    }
}
