//! Surgical URL rewriting over the original document
//!
//! Rewriting patches exactly the scalar positions the scanner recorded and
//! nothing else. The value tree keeps its field order (`preserve_order`),
//! so a patched save differs from the original only in the mapped values;
//! when no mapping applies at all, the original text is returned untouched.

use crate::save::{SaveDocument, SaveError};
use crate::scan::{self, AssetReference, ScanError};
use crate::selection::SelectionSnapshot;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RewriteError {
    /// A recorded field path no longer resolves: the document drifted
    /// between scan and rewrite. Fatal.
    #[error("rewrite target missing at {path}")]
    TargetMissing { path: String },

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error("serializing patched document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("rewrite cancelled")]
    Cancelled,
}

impl From<ScanError> for RewriteError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::Cancelled => RewriteError::Cancelled,
            ScanError::Save(e) => RewriteError::Save(e),
        }
    }
}

/// How to derive new URLs for assets without a per-asset override.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UrlRewriteRule {
    /// When set, assets rewrite to `<base>/<original filename>`.
    pub global_base_url: Option<String>,
}

/// Rewrite asset URLs in the selected subset of the document.
///
/// Re-scans the document to locate asset fields, then applies
/// `overrides` (original URL → new URL) first and the rule's global base
/// URL second. Fields with no mapping are left alone.
pub fn rewrite(
    document: &SaveDocument,
    selection: &SelectionSnapshot,
    rule: &UrlRewriteRule,
    overrides: &HashMap<String, String>,
    cancel: &CancellationToken,
) -> Result<String, RewriteError> {
    let references = scan::scan_assets(document, selection, cancel)?;
    rewrite_with_references(document, &references, rule, overrides)
}

/// Rewrite against an already-scanned reference list.
///
/// The export orchestrator uses this to reuse its scan results; a reference
/// whose recorded path no longer resolves to a scalar fails the whole
/// rewrite with [`RewriteError::TargetMissing`].
pub fn rewrite_with_references(
    document: &SaveDocument,
    references: &[AssetReference],
    rule: &UrlRewriteRule,
    overrides: &HashMap<String, String>,
) -> Result<String, RewriteError> {
    let mut root: Value = serde_json::from_str(&document.raw_json)
        .map_err(|e| SaveError::MalformedDocument(e.to_string()))?;

    let mut patched = 0usize;
    for reference in references {
        let Some(new_url) = new_value_for(reference, rule, overrides) else {
            continue;
        };

        let Some(target) = reference.field_path.resolve_mut(&mut root) else {
            return Err(RewriteError::TargetMissing {
                path: reference.field_path.to_string(),
            });
        };
        if !target.is_string() {
            return Err(RewriteError::TargetMissing {
                path: reference.field_path.to_string(),
            });
        }

        if target.as_str() != Some(new_url.as_str()) {
            *target = Value::String(new_url);
            patched += 1;
        }
    }

    if patched == 0 {
        // Nothing mapped: the original text passes through byte-for-byte.
        return Ok(document.raw_json.clone());
    }

    debug!(patched, "applied url rewrites");
    Ok(serde_json::to_string_pretty(&root)?)
}

fn new_value_for(
    reference: &AssetReference,
    rule: &UrlRewriteRule,
    overrides: &HashMap<String, String>,
) -> Option<String> {
    if let Some(new_url) = overrides.get(&reference.original_url) {
        return Some(new_url.clone());
    }

    let base = rule.global_base_url.as_deref()?;
    let file_name = original_file_name(&reference.original_url)?;
    Some(format!("{}/{}", base.trim_end_matches('/'), file_name))
}

/// Last path segment of the original URL, query and fragment stripped.
fn original_file_name(url: &str) -> Option<String> {
    if !scan::is_http_url(url) {
        return None;
    }
    let mut cut = url;
    if let Some(q) = cut.find(['?', '#']) {
        cut = &cut[..q];
    }
    let name = cut.rsplit('/').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save;

    const SAMPLE: &str = r#"{
        "SaveName": "Rewrite Me",
        "ObjectStates": [
            {
                "GUID": "img1", "Name": "Custom_Tile",
                "CustomImage": { "ImageURL": "http://x/a.png", "WidthScale": 1.0 }
            },
            {
                "GUID": "mesh1", "Name": "Custom_Model",
                "CustomMesh": { "MeshURL": "http://x/b.obj" }
            }
        ]
    }"#;

    fn no_cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn empty_mapping_returns_original_bytes() {
        let document = save::parse(SAMPLE).unwrap();
        let out = rewrite(
            &document,
            &SelectionSnapshot::all(),
            &UrlRewriteRule::default(),
            &HashMap::new(),
            &no_cancel(),
        )
        .unwrap();
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn override_patches_only_the_mapped_field() {
        let document = save::parse(SAMPLE).unwrap();
        let overrides =
            HashMap::from([("http://x/a.png".to_string(), "file:///backup/a.png".to_string())]);
        let out = rewrite(
            &document,
            &SelectionSnapshot::all(),
            &UrlRewriteRule::default(),
            &overrides,
            &no_cancel(),
        )
        .unwrap();

        assert!(out.contains("file:///backup/a.png"));
        assert!(!out.contains("http://x/a.png"));
        // Unmapped fields and unrelated structure survive.
        assert!(out.contains("http://x/b.obj"));
        assert!(out.contains("WidthScale"));
    }

    #[test]
    fn global_base_url_rewrites_unmapped_assets() {
        let document = save::parse(SAMPLE).unwrap();
        let rule = UrlRewriteRule {
            global_base_url: Some("https://mirror.example/assets/".to_string()),
        };
        let out = rewrite(
            &document,
            &SelectionSnapshot::all(),
            &rule,
            &HashMap::new(),
            &no_cancel(),
        )
        .unwrap();

        assert!(out.contains("https://mirror.example/assets/a.png"));
        assert!(out.contains("https://mirror.example/assets/b.obj"));
    }

    #[test]
    fn round_trip_rescan_sees_new_value_at_same_path() {
        let document = save::parse(SAMPLE).unwrap();
        let before = scan::scan_assets(&document, &SelectionSnapshot::all(), &no_cancel()).unwrap();
        let target = before
            .iter()
            .find(|r| r.original_url == "http://x/a.png")
            .unwrap()
            .clone();

        let overrides =
            HashMap::from([("http://x/a.png".to_string(), "http://y/new.png".to_string())]);
        let out = rewrite(
            &document,
            &SelectionSnapshot::all(),
            &UrlRewriteRule::default(),
            &overrides,
            &no_cancel(),
        )
        .unwrap();

        let patched = save::parse(&out).unwrap();
        let after = scan::scan_assets(&patched, &SelectionSnapshot::all(), &no_cancel()).unwrap();
        let matches: Vec<_> = after
            .iter()
            .filter(|r| r.original_url == "http://y/new.png")
            .collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].field_path, target.field_path);
    }

    #[test]
    fn drifted_field_path_is_fatal() {
        let document = save::parse(SAMPLE).unwrap();
        let mut references =
            scan::scan_assets(&document, &SelectionSnapshot::all(), &no_cancel()).unwrap();
        // Simulate the document changing shape between scan and rewrite.
        references[0].field_path = references[0].field_path.key("Gone");
        let overrides: HashMap<_, _> = references
            .iter()
            .map(|r| (r.original_url.clone(), "http://y/z".to_string()))
            .collect();

        let result =
            rewrite_with_references(&document, &references, &UrlRewriteRule::default(), &overrides);
        assert!(matches!(result, Err(RewriteError::TargetMissing { .. })));
    }
}
