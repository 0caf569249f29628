mod migrations;

use crate::types::{ContentRecord, Slug};
use chrono::{DateTime, Utc};

/// Record stamped at `secs` since the epoch
pub(super) fn sample_record(slug: &str, title: &str, secs: i64) -> ContentRecord {
    let at: DateTime<Utc> = DateTime::from_timestamp(secs, 0).unwrap();
    ContentRecord {
        slug: Slug::parse(slug).unwrap(),
        title: [("en".to_string(), title.to_string())].into(),
        description: [("en".to_string(), format!("{title} description"))].into(),
        body: [
            ("en".to_string(), format!("{title} body")),
            ("de".to_string(), format!("{title} Text")),
        ]
        .into(),
        cover_image: Some(format!("/images/{slug}-01_x.png")),
        tags: vec!["outdoor".to_string()],
        extra: serde_json::json!({"author": "staff"}),
        created_at: at,
        updated_at: at,
    }
}
