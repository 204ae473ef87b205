//! Built-in request middleware.

use std::sync::Arc;

use http::header::{HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT};

use super::RequestMiddleware;
use crate::client::UserAgent;
use crate::error::{Error, Result};
use crate::request::Request;

const ACCEPT_ENCODING_VALUE: &str = "gzip, deflate, br, zstd";

/// Set `User-Agent` unless the request already has one.
pub fn user_agent(req: &mut Request) -> Result<()> {
    if req.headers().contains_key(USER_AGENT) {
        return Ok(());
    }
    let ua = match &req.client().config().user_agent {
        None => return Ok(()),
        Some(UserAgent::Fixed(ua)) => ua.clone(),
        Some(UserAgent::Random(list)) if list.is_empty() => {
            return Err(Error::UserAgent(
                "cannot select a random user agent from an empty list".into(),
            ))
        }
        Some(UserAgent::Random(list)) => list[crate::proxy::random_index(list.len())].clone(),
    };
    let value = HeaderValue::from_str(&ua)
        .map_err(|e| Error::UserAgent(format!("{:?}: {}", ua, e)))?;
    req.headers_mut().insert(USER_AGENT, value);
    Ok(())
}

/// Add cookies from the client's store to those already on the request.
pub fn attach_cookies(req: &mut Request) -> Result<()> {
    let Some(store) = req.client().config().cookie_store.clone() else {
        return Ok(());
    };
    let Some(stored) = req.url().and_then(|url| store.get(url)) else {
        return Ok(());
    };
    let combined = match req.headers().get(COOKIE).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{}; {}", existing, stored),
        _ => stored,
    };
    let value = HeaderValue::from_str(&combined)
        .map_err(|e| Error::middleware(format!("invalid cookie header: {}", e)))?;
    req.headers_mut().insert(COOKIE, value);
    Ok(())
}

/// Advertise the encodings the decode middleware understands.
pub fn accept_encoding(req: &mut Request) -> Result<()> {
    if !req.headers().contains_key(ACCEPT_ENCODING) {
        req.headers_mut()
            .insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING_VALUE));
    }
    Ok(())
}

pub fn bearer_auth(token: String) -> Arc<RequestMiddleware> {
    Arc::new(move |req: &mut Request| -> Result<()> {
        if token.is_empty() || req.headers().contains_key(AUTHORIZATION) {
            return Ok(());
        }
        let value = HeaderValue::from_str(&crate::auth::bearer_auth(&token))
            .map_err(|e| Error::middleware(format!("invalid bearer token: {}", e)))?;
        req.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    })
}

pub fn basic_auth(username: String, password: String) -> Arc<RequestMiddleware> {
    Arc::new(move |req: &mut Request| -> Result<()> {
        if req.headers().contains_key(AUTHORIZATION) {
            return Ok(());
        }
        if username.is_empty() || password.is_empty() {
            return Err(Error::middleware("basic authorization fields cannot be empty"));
        }
        let value = HeaderValue::from_str(&crate::auth::basic_auth(&username, &password))
            .map_err(|e| Error::middleware(format!("invalid credentials: {}", e)))?;
        req.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    })
}

pub fn content_type(content_type: String) -> Arc<RequestMiddleware> {
    Arc::new(move |req: &mut Request| -> Result<()> {
        if content_type.is_empty() {
            return Err(Error::middleware("Content-Type is empty"));
        }
        let value = HeaderValue::from_str(&content_type)
            .map_err(|e| Error::middleware(format!("invalid Content-Type: {}", e)))?;
        req.headers_mut().insert(CONTENT_TYPE, value);
        Ok(())
    })
}
