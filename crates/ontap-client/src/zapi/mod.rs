//! ZAPI (legacy XML-RPC style API) framing
//!
//! Builds the `netapp` request envelope and unwraps the `results` element of
//! a response, turning `status="failed"` into [`OntapError::Zapi`].

pub mod element;

pub use element::ZapiElement;

use crate::error::OntapError;

/// Servlet that accepts ZAPI calls
pub const ZAPI_PATH: &str = "/servlets/netapp.servlets.admin.XMLrequest_filer";

/// Namespace of the `netapp` envelope
pub const ZAPI_NAMESPACE: &str = "http://www.netapp.com/filer/admin";

/// API version used until `system-get-ontapi-version` says otherwise
pub const DEFAULT_ZAPI_VERSION: (u32, u32) = (1, 110);

/// Control bytes some CLI passthrough calls embed in their output (BEL, backspace)
pub const DEFAULT_SANITIZE_CODE_POINTS: [u8; 2] = [7, 8];

/// Wrap a request in the `netapp` envelope.
///
/// `vserver` tunnels the call to an SVM through the `vfiler` attribute.
pub fn build_envelope(request: &ZapiElement, version: (u32, u32), vserver: Option<&str>) -> String {
    let mut envelope = ZapiElement::new("netapp");
    envelope.set_attr("version", format!("{}.{}", version.0, version.1));
    envelope.set_attr("xmlns", ZAPI_NAMESPACE);
    if let Some(vserver) = vserver {
        envelope.set_attr("vfiler", vserver);
    }
    envelope.add_child(request.clone());
    format!(
        "<?xml version='1.0' encoding='utf-8'?>\n<!DOCTYPE netapp SYSTEM 'file:/etc/netapp_gx.dtd'>\n{}",
        envelope.to_xml()
    )
}

/// Replace the given code points with `.` so the parser accepts the document.
pub fn sanitize(raw: &str, code_points: &[u8]) -> String {
    raw.chars()
        .map(|c| {
            if u8::try_from(c).is_ok_and(|b| code_points.contains(&b)) {
                '.'
            } else {
                c
            }
        })
        .collect()
}

/// Parse a raw response and return its `results` element.
pub fn parse_response(api: &str, raw: &str, code_points: &[u8]) -> Result<ZapiElement, OntapError> {
    let cleaned = if code_points.is_empty() {
        raw.to_string()
    } else {
        sanitize(raw, code_points)
    };
    let root = ZapiElement::parse(&cleaned).map_err(|e| {
        let preview: String = raw.chars().take(500).collect();
        OntapError::Xml(format!("{e} - response (first 500 chars): {preview}"))
    })?;
    let results = if root.name() == "results" {
        root
    } else {
        root.child("results")
            .cloned()
            .ok_or_else(|| OntapError::InvalidResponse(format!("{api}: no results element in response")))?
    };
    check_results(api, results)
}

/// Turn a `results` element into success or a ZAPI error.
pub fn check_results(api: &str, results: ZapiElement) -> Result<ZapiElement, OntapError> {
    match results.attr("status") {
        Some("passed") | None => Ok(results),
        Some(_) => Err(OntapError::zapi(
            api,
            results.attr("errno").unwrap_or("unknown"),
            results.attr("reason").unwrap_or("no reason given"),
        )),
    }
}

/// Records of a `*-get-iter` response (children of `attributes-list`).
pub fn iter_records(results: &ZapiElement) -> &[ZapiElement] {
    results
        .child("attributes-list")
        .map(ZapiElement::children)
        .unwrap_or_default()
}

/// `num-records` of a `*-get-iter` response, 0 when absent.
pub fn num_records(results: &ZapiElement) -> usize {
    results
        .child_content("num-records")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_vserver() {
        let request = ZapiElement::new("lun-get-iter");
        let envelope = build_envelope(&request, (1, 110), Some("svm1"));
        assert!(envelope.starts_with("<?xml version='1.0' encoding='utf-8'?>"));
        assert!(envelope.contains(
            "<netapp version=\"1.110\" xmlns=\"http://www.netapp.com/filer/admin\" vfiler=\"svm1\"><lun-get-iter/></netapp>"
        ));
    }

    #[test]
    fn test_sanitize_replaces_configured_bytes_only() {
        let raw = "a\u{7}b\u{8}c\u{1}";
        assert_eq!(sanitize(raw, &DEFAULT_SANITIZE_CODE_POINTS), "a.b.c\u{1}");
    }

    #[test]
    fn test_parse_response_failed_status() {
        let raw = r#"<netapp><results status="failed" errno="13005" reason="Unable to find API: lun-get-iter on data vserver svm1"/></netapp>"#;
        let err = parse_response("lun-get-iter", raw, &[]).unwrap_err();
        match err {
            OntapError::Zapi { api, code, reason } => {
                assert_eq!(api, "lun-get-iter");
                assert_eq!(code, "13005");
                assert!(reason.starts_with("Unable to find API"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parse_response_sanitizes_before_parsing() {
        let raw = "<netapp><results status=\"passed\"><cli-output>ok\u{8}</cli-output></results></netapp>";
        let results = parse_response("system-cli", raw, &DEFAULT_SANITIZE_CODE_POINTS).unwrap();
        assert_eq!(results.child_content("cli-output"), Some("ok."));
    }

    #[test]
    fn test_iter_records_and_count() {
        let raw = "<netapp><results status=\"passed\"><attributes-list><a/><a/></attributes-list>\
                   <num-records>2</num-records></results></netapp>";
        let results = parse_response("x-get-iter", raw, &[]).unwrap();
        assert_eq!(iter_records(&results).len(), 2);
        assert_eq!(num_records(&results), 2);
        let empty = ZapiElement::new("results");
        assert!(iter_records(&empty).is_empty());
        assert_eq!(num_records(&empty), 0);
    }
}
