//! Content assembly
//!
//! Substitutes each slot token with the markup for the slot's reference and
//! picks the cover image.

use chrono::{DateTime, Utc};

use crate::config::AssemblyConfig;
use crate::error::{Error, Result};
use crate::registry::ContentTemplate;
use crate::types::{ContentRecord, SlotOutcome};

/// Per-locale substitution report
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocaleReport {
    /// Locale code
    pub locale: String,
    /// Slot indexes whose token appeared in this locale
    pub substituted: Vec<usize>,
    /// Slot indexes whose token was absent from this locale
    pub missing: Vec<usize>,
}

/// Result of assembling one record
#[derive(Clone, Debug)]
pub struct Assembled {
    /// Record with tokens replaced and cover set
    pub record: ContentRecord,
    /// Substitution report per locale
    pub locales: Vec<LocaleReport>,
}

/// Token substitution and cover selection
#[derive(Clone, Debug)]
pub struct Assembler {
    image_markup: String,
}

impl Assembler {
    /// Create an assembler rendering images with `config.image_markup`
    pub fn new(config: &AssemblyConfig) -> Self {
        Self {
            image_markup: config.image_markup.clone(),
        }
    }

    /// Render the markup for one image
    pub fn render(&self, src: &str, alt: &str) -> String {
        self.image_markup
            .replace("{alt}", &alt.replace(['[', ']'], ""))
            .replace("{src}", src)
    }

    /// Build the final record from a template and its slot outcomes
    ///
    /// There must be exactly one outcome per declared slot, with matching
    /// index and key. Tokens absent from a locale are reported, not errors.
    pub fn assemble(
        &self,
        template: &ContentTemplate,
        outcomes: &[SlotOutcome],
        now: DateTime<Utc>,
    ) -> Result<Assembled> {
        let slots = template.slots();
        if outcomes.len() != slots.len() {
            return Err(Error::Other(format!(
                "{}: expected {} slot outcomes, got {}",
                template.slug(),
                slots.len(),
                outcomes.len()
            )));
        }

        let mut ordered = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = outcomes
                .iter()
                .find(|o| o.index == slot.index && o.key == slot.key)
                .ok_or_else(|| {
                    Error::Other(format!(
                        "{}: no outcome for slot {} ({})",
                        template.slug(),
                        slot.index,
                        slot.key
                    ))
                })?;
            ordered.push((slot, outcome));
        }

        let mut record = template.instantiate(now);
        let mut locales = Vec::with_capacity(record.body.len());

        for (locale, body) in record.body.iter_mut() {
            let mut report = LocaleReport {
                locale: locale.clone(),
                ..Default::default()
            };
            for (slot, outcome) in &ordered {
                if body.contains(&slot.token) {
                    *body = body.replace(&slot.token, &self.render(&outcome.reference, &slot.alt));
                    report.substituted.push(slot.index);
                } else {
                    report.missing.push(slot.index);
                }
            }
            if !report.missing.is_empty() {
                tracing::debug!(
                    slug = %template.slug(),
                    locale = %locale,
                    missing = ?report.missing,
                    "Slot tokens absent from body"
                );
            }
            locales.push(report);
        }

        record.cover_image = select_cover(&ordered);
        record.updated_at = now;

        Ok(Assembled { record, locales })
    }
}

/// First resolved reference in declared order, else the first slot's fallback
fn select_cover(
    ordered: &[(&crate::registry::GenerationSlot, &SlotOutcome)],
) -> Option<String> {
    ordered
        .iter()
        .find(|(_, outcome)| outcome.source.is_resolved())
        .map(|(_, outcome)| outcome.reference.clone())
        .or_else(|| {
            ordered
                .first()
                .map(|(slot, _)| slot.fallback_reference.clone())
        })
}
