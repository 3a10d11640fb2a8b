use cookie::Cookie;
use reqwest::{
    cookie::{CookieStore, Jar},
    header::HeaderValue,
    Url,
};
use serde::Deserialize;

/// One cookie as found in a browser export (puppeteer-style json).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CookieParam {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub expires: Option<f64>,
}

impl CookieParam {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
            ..Default::default()
        }
    }

    pub fn as_cookie(&self) -> Cookie<'_> {
        let mut cookie = Cookie::new(&self.name, &self.value);

        if let Some(domain) = &self.domain {
            cookie.set_domain(domain);
        }

        if let Some(path) = &self.path {
            cookie.set_path(path);
        }

        cookie.set_secure(self.secure);
        cookie.set_http_only(self.http_only);

        if let Some(expires) = self.expires {
            let mut now = cookie::time::OffsetDateTime::now_utc();
            now += cookie::time::Duration::seconds_f64(expires);
            cookie.set_expires(now);
        }

        cookie
    }
}

/// Cookie store handed to the http client.
///
/// Cookies with a url attach to that origin through the inner [`Jar`];
/// bare name=value pairs are sent with every request, the way a pasted
/// `document.cookie` string behaves.
pub struct CookieJar {
    document_cookie: String,
    inner: Jar,
}

impl CookieJar {
    pub fn new() -> Self {
        Self {
            document_cookie: String::new(),
            inner: Jar::default(),
        }
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        self.document_cookie += &format!("{}; ", cookie.stripped());
    }

    pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
        self.inner.add_cookie_str(cookie, url)
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieStore for CookieJar {
    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let scoped = self.inner.cookies(url);

        if self.document_cookie.is_empty() {
            return scoped;
        }

        let mut header = self.document_cookie.clone();

        if let Some(scoped) = scoped {
            header += scoped.to_str().unwrap_or("");
        }

        HeaderValue::from_str(header.trim_end_matches("; ")).ok()
    }

    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.inner.set_cookies(cookie_headers, url)
    }
}
