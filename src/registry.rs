//! Template registry
//!
//! A template is the static description of one content record: localized
//! fields whose bodies contain placeholder tokens, plus an ordered list of
//! generation slots. Slot keys and default tokens are derived here, once,
//! so every later stage agrees on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{ContentRecord, LocalizedText, Slug};

/// Maximum characters of a prompt reused as alt text
const MAX_ALT_CHARS: usize = 120;

/// Derive the asset key for a slot
///
/// Keys are `{slug}-{index:02}` with a 1-based index. The asset store
/// matches them followed by `_`, so `post-01` never collides with `post-010`.
pub fn slot_key(slug: &Slug, index: usize) -> String {
    format!("{}-{:02}", slug, index)
}

/// Default placeholder token for a slot
pub fn default_token(index: usize) -> String {
    format!("{{{{image:{index}}}}}")
}

/// A slot as written in a template file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlotSpec {
    /// Prompt sent to the generation service
    pub prompt: String,
    /// Known-good reference used when generation fails
    pub fallback: String,
    /// Explicit token (default: `{{image:N}}`)
    #[serde(default)]
    pub token: Option<String>,
    /// Alt text (default: the prompt, truncated)
    #[serde(default)]
    pub alt: Option<String>,
}

/// A declared generation slot with its derived key and token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationSlot {
    /// 1-based position in declared order
    pub index: usize,
    /// Deterministic asset key
    pub key: String,
    /// Placeholder token in the body
    pub token: String,
    /// Prompt sent to the generation service
    pub prompt: String,
    /// Reference used when generation fails
    pub fallback_reference: String,
    /// Alt text for the rendered image
    pub alt: String,
}

/// A template as written in a template file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Record slug
    pub slug: String,
    /// Localized titles
    #[serde(default)]
    pub title: LocalizedText,
    /// Localized descriptions
    #[serde(default)]
    pub description: LocalizedText,
    /// Localized bodies with placeholder tokens
    pub body: LocalizedText,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque metadata
    #[serde(default)]
    pub extra: serde_json::Value,
    /// Slots in declared order
    #[serde(default)]
    pub slots: Vec<SlotSpec>,
}

/// A validated content template
#[derive(Clone, Debug)]
pub struct ContentTemplate {
    slug: Slug,
    title: LocalizedText,
    description: LocalizedText,
    body: LocalizedText,
    tags: Vec<String>,
    extra: serde_json::Value,
    slots: Vec<GenerationSlot>,
}

impl ContentTemplate {
    /// Validate a spec and derive its slots
    pub fn from_spec(spec: TemplateSpec) -> Result<Self> {
        let slug = Slug::parse(spec.slug)?;

        if spec.body.is_empty() {
            return Err(Error::config(
                format!("templates.{slug}.body"),
                "template has no body in any locale",
            ));
        }

        let mut seen_tokens = HashSet::new();
        let mut slots = Vec::with_capacity(spec.slots.len());
        for (position, slot) in spec.slots.into_iter().enumerate() {
            let index = position + 1;
            let key_path = format!("templates.{slug}.slots[{index}]");

            if slot.fallback.trim().is_empty() {
                return Err(Error::config(key_path, "slot has no fallback reference"));
            }

            let token = slot.token.unwrap_or_else(|| default_token(index));
            if token.is_empty() || !seen_tokens.insert(token.clone()) {
                return Err(Error::config(
                    key_path,
                    format!("slot token '{token}' is empty or used twice"),
                ));
            }

            let alt = slot
                .alt
                .unwrap_or_else(|| slot.prompt.chars().take(MAX_ALT_CHARS).collect());

            slots.push(GenerationSlot {
                index,
                key: slot_key(&slug, index),
                token,
                prompt: slot.prompt,
                fallback_reference: slot.fallback,
                alt,
            });
        }

        Ok(Self {
            slug,
            title: spec.title,
            description: spec.description,
            body: spec.body,
            tags: spec.tags,
            extra: spec.extra,
            slots,
        })
    }

    /// Record slug
    pub fn slug(&self) -> &Slug {
        &self.slug
    }

    /// Slots in declared order
    pub fn slots(&self) -> &[GenerationSlot] {
        &self.slots
    }

    /// Localized bodies with tokens still in place
    pub fn body(&self) -> &LocalizedText {
        &self.body
    }

    /// Create an unassembled record from this template
    pub fn instantiate(&self, now: DateTime<Utc>) -> ContentRecord {
        ContentRecord {
            slug: self.slug.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            body: self.body.clone(),
            cover_image: None,
            tags: self.tags.clone(),
            extra: self.extra.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ordered, slug-unique collection of templates
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<ContentTemplate>,
}

impl TemplateRegistry {
    /// Build a registry, rejecting duplicate slugs
    pub fn new(templates: Vec<ContentTemplate>) -> Result<Self> {
        let mut slugs = HashSet::new();
        for template in &templates {
            if !slugs.insert(template.slug.clone()) {
                return Err(Error::config(
                    "templates",
                    format!("duplicate template slug '{}'", template.slug),
                ));
            }
        }
        Ok(Self { templates })
    }

    /// Build a registry from raw specs
    pub fn from_specs(specs: Vec<TemplateSpec>) -> Result<Self> {
        let templates = specs
            .into_iter()
            .map(ContentTemplate::from_spec)
            .collect::<Result<Vec<_>>>()?;
        Self::new(templates)
    }

    /// Load a JSON array of templates
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "templates",
                format!("failed to read templates '{}': {}", path.display(), e),
            )
        })?;
        let specs: Vec<TemplateSpec> = serde_json::from_str(&raw).map_err(|e| {
            Error::config(
                "templates",
                format!("failed to parse templates '{}': {}", path.display(), e),
            )
        })?;
        let registry = Self::from_specs(specs)?;
        tracing::info!(
            path = %path.display(),
            templates = registry.len(),
            "Loaded template registry"
        );
        Ok(registry)
    }

    /// Keep only the given slugs, in registry order
    ///
    /// Unknown slugs are a configuration error so a typo never silently
    /// produces an empty batch.
    pub fn retain_slugs(&mut self, only: &[String]) -> Result<()> {
        if only.is_empty() {
            return Ok(());
        }
        for wanted in only {
            if !self.templates.iter().any(|t| t.slug.as_str() == wanted) {
                return Err(Error::config(
                    "only",
                    format!("no template with slug '{wanted}'"),
                ));
            }
        }
        self.templates
            .retain(|t| only.iter().any(|s| s == t.slug.as_str()));
        Ok(())
    }

    /// Look up a template by slug
    pub fn get(&self, slug: &str) -> Option<&ContentTemplate> {
        self.templates.iter().find(|t| t.slug.as_str() == slug)
    }

    /// Templates in registry order
    pub fn iter(&self) -> impl Iterator<Item = &ContentTemplate> {
        self.templates.iter()
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn spec(slug: &str, slots: usize) -> TemplateSpec {
        TemplateSpec {
            slug: slug.to_string(),
            title: [("en".to_string(), "Title".to_string())].into(),
            description: LocalizedText::new(),
            body: [("en".to_string(), "Intro {{image:1}} outro".to_string())].into(),
            tags: vec![],
            extra: serde_json::Value::Null,
            slots: (1..=slots)
                .map(|i| SlotSpec {
                    prompt: format!("prompt {i}"),
                    fallback: format!("/images/fallback/{i}.jpg"),
                    token: None,
                    alt: None,
                })
                .collect(),
        }
    }

    #[test]
    fn keys_are_slug_plus_padded_index() {
        let template = ContentTemplate::from_spec(spec("trail-guide", 3)).unwrap();
        let keys: Vec<_> = template.slots().iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["trail-guide-01", "trail-guide-02", "trail-guide-03"]);
    }

    #[test]
    fn keys_are_deterministic_and_unique() {
        let a = ContentTemplate::from_spec(spec("trail-guide", 12)).unwrap();
        let b = ContentTemplate::from_spec(spec("trail-guide", 12)).unwrap();
        let keys_a: Vec<_> = a.slots().iter().map(|s| s.key.clone()).collect();
        let keys_b: Vec<_> = b.slots().iter().map(|s| s.key.clone()).collect();
        assert_eq!(keys_a, keys_b);

        let unique: HashSet<_> = keys_a.iter().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn default_tokens_follow_index() {
        let template = ContentTemplate::from_spec(spec("trail-guide", 2)).unwrap();
        assert_eq!(template.slots()[0].token, "{{image:1}}");
        assert_eq!(template.slots()[1].token, "{{image:2}}");
    }

    #[test]
    fn duplicate_tokens_are_rejected() {
        let mut s = spec("trail-guide", 2);
        s.slots[1].token = Some("{{image:1}}".to_string());
        assert!(ContentTemplate::from_spec(s).is_err());
    }

    #[test]
    fn missing_fallback_is_rejected() {
        let mut s = spec("trail-guide", 1);
        s.slots[0].fallback = "  ".to_string();
        let err = ContentTemplate::from_spec(s).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn alt_defaults_to_truncated_prompt() {
        let mut s = spec("trail-guide", 1);
        s.slots[0].prompt = "x".repeat(500);
        let template = ContentTemplate::from_spec(s).unwrap();
        assert_eq!(template.slots()[0].alt.chars().count(), MAX_ALT_CHARS);
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let result = TemplateRegistry::from_specs(vec![spec("a", 1), spec("a", 2)]);
        assert!(result.is_err());
    }

    #[test]
    fn retain_slugs_filters_and_rejects_unknown() {
        let mut registry =
            TemplateRegistry::from_specs(vec![spec("a", 1), spec("b", 1), spec("c", 1)]).unwrap();
        registry
            .retain_slugs(&["c".to_string(), "a".to_string()])
            .unwrap();
        let slugs: Vec<_> = registry.iter().map(|t| t.slug().to_string()).collect();
        assert_eq!(slugs, ["a", "c"]);

        assert!(registry.retain_slugs(&["zzz".to_string()]).is_err());
    }

    #[test]
    fn instantiate_copies_fields_without_cover() {
        let template = ContentTemplate::from_spec(spec("trail-guide", 1)).unwrap();
        let now = Utc::now();
        let record = template.instantiate(now);
        assert_eq!(record.slug.as_str(), "trail-guide");
        assert_eq!(record.body["en"], "Intro {{image:1}} outro");
        assert!(record.cover_image.is_none());
        assert_eq!(record.created_at, now);
    }

    #[test]
    fn loads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(
            &path,
            r#"[{"slug": "trail-guide", "body": {"en": "{{image:1}}"},
                 "slots": [{"prompt": "a trail", "fallback": "/images/trail.jpg"}]}]"#,
        )
        .unwrap();

        let registry = TemplateRegistry::from_json_file(&path).unwrap();
        assert_eq!(registry.len(), 1);
        let template = registry.get("trail-guide").unwrap();
        assert_eq!(template.slots()[0].fallback_reference, "/images/trail.jpg");
    }
}
