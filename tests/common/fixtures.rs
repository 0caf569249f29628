//! Config and template fixtures written to disk the way the binary reads them

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Bytes every mocked prediction returns
pub const FAKE_IMAGE: &[u8] = b"\x89PNG fake image payload";

/// A successful predict response carrying [`FAKE_IMAGE`]
pub fn prediction_body() -> Value {
    json!({
        "predictions": [
            { "bytesBase64Encoded": BASE64.encode(FAKE_IMAGE), "mimeType": "image/png" }
        ]
    })
}

/// Pipeline config pointing at `endpoint`, with zero cooldowns and a static token
pub fn config_json(dir: &Path, endpoint: &str) -> Value {
    json!({
        "generation": {
            "endpoint": endpoint,
            "request_timeout": 5,
            "credentials": { "source": "static", "token": "test-token" }
        },
        "retry": {
            "max_attempts": 3,
            "rate_limit_cooldown": 0,
            "transient_delay": 0,
            "success_cooldown": 0
        },
        "assets": {
            "asset_dir": dir.join("assets"),
            "public_prefix": "/images/generated"
        },
        "validation": { "min_words": 5 },
        "publish": { "database_path": dir.join("content.db") }
    })
}

/// A template whose slot prompts are `"{slug} {i}"`
pub fn template_json(slug: &str, slots: usize, body_prefix: &str) -> Value {
    let mut body = body_prefix.to_string();
    for i in 1..=slots {
        body.push_str(&format!("\n\n{{{{image:{i}}}}}"));
    }
    json!({
        "slug": slug,
        "title": { "en": format!("Title of {slug}") },
        "description": { "en": "A short description" },
        "body": { "en": body },
        "tags": ["integration"],
        "slots": (1..=slots)
            .map(|i| json!({
                "prompt": format!("{slug} {i}"),
                "fallback": format!("/images/fallback/{slug}-{i}.jpg")
            }))
            .collect::<Vec<_>>()
    })
}

/// Write `value` as pretty JSON and return the path
pub fn write_json(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}
