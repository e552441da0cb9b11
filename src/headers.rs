//! Update request headers: conditional requests and call options.
//!
//! The update endpoint accepts a restricted header set, each with a fixed
//! serialization rule. The conditional headers split into two groups: the
//! read group turns a 304 into [`crate::error::SforceError::NotModified`],
//! the write group turns a 412 into
//! [`crate::error::SforceError::PreconditionFailed`] (checked in `dml`).

use chrono::{DateTime, Utc};

/// `Sforce-Call-Options`: `key=value` pairs joined by `; `.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub client: Option<String>,
    pub default_namespace: Option<String>,
}

/// `Sforce-Duplicate-Rule-Header`: `key=value` pairs joined by `, `.
#[derive(Debug, Clone, Default)]
pub struct DuplicateRuleOptions {
    pub allow_save: Option<bool>,
    pub include_record_details: Option<bool>,
    pub run_as_current_user: Option<bool>,
}

/// `x-sfdc-packageversion-{package}: {version}`.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub package: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
}

/// Restricted header set accepted by update.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    /// `Sforce-Auto-Assign`, rendered `TRUE` / `FALSE`.
    pub auto_assign: Option<bool>,
    pub call_options: Option<CallOptions>,
    pub content_encoding: Option<ContentEncoding>,
    pub etag: Option<String>,
    /// Entity tags, rendered quoted and comma-joined.
    pub if_match: Option<Vec<String>>,
    pub if_none_match: Option<Vec<String>>,
    /// Rendered as an HTTP-date.
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
    pub duplicate_rule: Option<DuplicateRuleOptions>,
    /// `Sforce-Mru`, rendered `true` / `false`.
    pub update_mru: Option<bool>,
    /// `Sforce-Query-Options`, rendered `batchSize=N`.
    pub query_batch_size: Option<u32>,
    pub package_version: Option<PackageVersion>,
}

impl RequestHeaders {
    /// Render to wire header pairs, applying each header's fixed rule.
    pub fn render(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(v) = self.auto_assign {
            out.push(("Sforce-Auto-Assign".into(), if v { "TRUE" } else { "FALSE" }.into()));
        }
        if let Some(co) = &self.call_options {
            let mut parts = Vec::new();
            if let Some(c) = &co.client {
                parts.push(format!("client={c}"));
            }
            if let Some(ns) = &co.default_namespace {
                parts.push(format!("defaultNamespace={ns}"));
            }
            out.push(("Sforce-Call-Options".into(), parts.join("; ")));
        }
        if let Some(enc) = self.content_encoding {
            let v = match enc {
                ContentEncoding::Gzip => "gzip",
                ContentEncoding::Deflate => "deflate",
            };
            out.push(("Content-Encoding".into(), v.into()));
        }
        if let Some(tag) = &self.etag {
            out.push(("ETag".into(), tag.clone()));
        }
        if let Some(tags) = &self.if_match {
            out.push(("If-Match".into(), quote_tags(tags)));
        }
        if let Some(tags) = &self.if_none_match {
            out.push(("If-None-Match".into(), quote_tags(tags)));
        }
        if let Some(dt) = self.if_modified_since {
            out.push(("If-Modified-Since".into(), http_date(dt)));
        }
        if let Some(dt) = self.if_unmodified_since {
            out.push(("If-Unmodified-Since".into(), http_date(dt)));
        }
        if let Some(dr) = &self.duplicate_rule {
            let mut parts = Vec::new();
            if let Some(v) = dr.allow_save {
                parts.push(format!("allowSave={v}"));
            }
            if let Some(v) = dr.include_record_details {
                parts.push(format!("includeRecordDetails={v}"));
            }
            if let Some(v) = dr.run_as_current_user {
                parts.push(format!("runAsCurrentUser={v}"));
            }
            out.push(("Sforce-Duplicate-Rule-Header".into(), parts.join(", ")));
        }
        if let Some(v) = self.update_mru {
            out.push(("Sforce-Mru".into(), v.to_string()));
        }
        if let Some(n) = self.query_batch_size {
            out.push(("Sforce-Query-Options".into(), format!("batchSize={n}")));
        }
        if let Some(pv) = &self.package_version {
            out.push((format!("x-sfdc-packageversion-{}", pv.package), pv.version.clone()));
        }
        out
    }

    /// GET/HEAD conditional group: If-Match, If-None-Match, If-Modified-Since.
    pub fn has_read_conditional(&self) -> bool {
        self.if_match.is_some() || self.if_none_match.is_some() || self.if_modified_since.is_some()
    }

    /// PATCH/POST conditional group: If-Match, If-None-Match, If-Unmodified-Since.
    pub fn has_write_conditional(&self) -> bool {
        self.if_match.is_some() || self.if_none_match.is_some() || self.if_unmodified_since.is_some()
    }
}

/// Entity tags quoted and comma-joined: `"a", "b"`.
fn quote_tags(tags: &[String]) -> String {
    format!("\"{}\"", tags.join("\", \""))
}

/// RFC 7231 IMF-fixdate, always GMT.
fn http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn header<'a>(rendered: &'a [(String, String)], name: &str) -> &'a str {
        &rendered.iter().find(|(n, _)| n == name).expect(name).1
    }

    #[test]
    fn match_tags_are_quoted_and_joined() {
        let headers = RequestHeaders {
            if_match: Some(vec!["abc".into(), "def".into()]),
            ..Default::default()
        };
        let rendered = headers.render();
        assert_eq!(header(&rendered, "If-Match"), "\"abc\", \"def\"");
    }

    #[test]
    fn dates_render_as_http_dates() {
        let headers = RequestHeaders {
            if_unmodified_since: Some(Utc.with_ymd_and_hms(2023, 6, 1, 8, 30, 0).unwrap()),
            ..Default::default()
        };
        let rendered = headers.render();
        assert_eq!(
            header(&rendered, "If-Unmodified-Since"),
            "Thu, 01 Jun 2023 08:30:00 GMT"
        );
    }

    #[test]
    fn structured_options_join_key_value_pairs() {
        let headers = RequestHeaders {
            call_options: Some(CallOptions {
                client: Some("erp".into()),
                default_namespace: Some("acme".into()),
            }),
            duplicate_rule: Some(DuplicateRuleOptions {
                allow_save: Some(true),
                include_record_details: None,
                run_as_current_user: Some(false),
            }),
            query_batch_size: Some(200),
            ..Default::default()
        };
        let rendered = headers.render();
        assert_eq!(header(&rendered, "Sforce-Call-Options"), "client=erp; defaultNamespace=acme");
        assert_eq!(
            header(&rendered, "Sforce-Duplicate-Rule-Header"),
            "allowSave=true, runAsCurrentUser=false"
        );
        assert_eq!(header(&rendered, "Sforce-Query-Options"), "batchSize=200");
    }

    #[test]
    fn flags_and_package_version() {
        let headers = RequestHeaders {
            auto_assign: Some(false),
            update_mru: Some(true),
            package_version: Some(PackageVersion { package: "erp".into(), version: "1.4".into() }),
            ..Default::default()
        };
        let rendered = headers.render();
        assert_eq!(header(&rendered, "Sforce-Auto-Assign"), "FALSE");
        assert_eq!(header(&rendered, "Sforce-Mru"), "true");
        assert_eq!(header(&rendered, "x-sfdc-packageversion-erp"), "1.4");
    }

    #[test]
    fn conditional_groups() {
        let read = RequestHeaders {
            if_modified_since: Some(Utc::now()),
            ..Default::default()
        };
        assert!(read.has_read_conditional());
        assert!(!read.has_write_conditional());

        let write = RequestHeaders {
            if_unmodified_since: Some(Utc::now()),
            ..Default::default()
        };
        assert!(!write.has_read_conditional());
        assert!(write.has_write_conditional());

        let both = RequestHeaders { if_match: Some(vec!["x".into()]), ..Default::default() };
        assert!(both.has_read_conditional());
        assert!(both.has_write_conditional());
    }
}
