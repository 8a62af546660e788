//! Deterministic intent normalization.
//!
//! Applied only to schema-valid outcomes. When a policy roll passed but the
//! model stayed silent, a fallback intent is synthesized so the subsystem
//! still fires; text fields are bounded to the store's maxima. Combat and
//! meta intents pass through untouched. The whole pass is idempotent.

use crate::journey::CharacterContext;
use crate::policy::PolicyDecisions;
use crate::util::truncate_chars;

use super::types::{Intents, ParsedOutcome, PoiAction, PoiIntent, QuestAction, QuestIntent};

pub const MAX_QUEST_TITLE_CHARS: usize = 200;
pub const MAX_QUEST_SUMMARY_CHARS: usize = 1_000;
pub const MAX_POI_NAME_CHARS: usize = 200;
pub const MAX_POI_DESCRIPTION_CHARS: usize = 2_000;

pub const FALLBACK_QUEST_TITLE: &str = "A New Opportunity";
pub const FALLBACK_QUEST_SUMMARY: &str = "An opportunity for adventure presents itself.";
pub const FALLBACK_POI_NAME: &str = "A Notable Location";
pub const FALLBACK_POI_DESCRIPTION: &str = "An interesting location worth remembering.";

/// Fill in missing intents the policy expects and bound text fields.
pub fn normalize_outcome(
    parsed: &mut ParsedOutcome,
    decisions: &PolicyDecisions,
    context: &CharacterContext,
) {
    if !parsed.schema_valid {
        return;
    }

    let intents = parsed.intents.get_or_insert_with(Intents::default);
    normalize_quest(intents, decisions);
    normalize_poi(intents, decisions, context);
}

fn normalize_quest(intents: &mut Intents, decisions: &PolicyDecisions) {
    if decisions.quest.passed {
        let missing = intents
            .quest
            .as_ref()
            .map(|q| q.action == QuestAction::None)
            .unwrap_or(true);
        if missing {
            intents.quest = Some(QuestIntent {
                action: QuestAction::Offer,
                title: Some(FALLBACK_QUEST_TITLE.to_string()),
                summary: Some(FALLBACK_QUEST_SUMMARY.to_string()),
                details: Some(serde_json::json!({})),
            });
        }
    }

    let Some(quest) = intents.quest.as_mut() else {
        return;
    };
    if quest.action == QuestAction::Offer {
        match quest.title.as_deref() {
            Some(title) if !title.trim().is_empty() => {}
            _ => quest.title = Some(FALLBACK_QUEST_TITLE.to_string()),
        }
        match quest.summary.as_deref() {
            Some(summary) if !summary.trim().is_empty() => {}
            _ => quest.summary = Some(FALLBACK_QUEST_SUMMARY.to_string()),
        }
    }
    if let Some(title) = quest.title.as_mut() {
        *title = truncate_chars(title, MAX_QUEST_TITLE_CHARS);
    }
    if let Some(summary) = quest.summary.as_mut() {
        *summary = truncate_chars(summary, MAX_QUEST_SUMMARY_CHARS);
    }
}

fn normalize_poi(
    intents: &mut Intents,
    decisions: &PolicyDecisions,
    context: &CharacterContext,
) {
    if decisions.poi.passed {
        let missing = intents
            .poi
            .as_ref()
            .map(|p| p.action == PoiAction::None)
            .unwrap_or(true);
        if missing {
            let name = if context.location.display_name.trim().is_empty() {
                FALLBACK_POI_NAME.to_string()
            } else {
                context.location.display_name.clone()
            };
            intents.poi = Some(PoiIntent {
                action: PoiAction::Create,
                name: Some(name),
                description: Some(FALLBACK_POI_DESCRIPTION.to_string()),
                tags: Some(Vec::new()),
            });
        }
    }

    let Some(poi) = intents.poi.as_mut() else {
        return;
    };
    if poi.action == PoiAction::Create {
        match poi.name.as_deref() {
            Some(name) if !name.trim().is_empty() => {}
            _ => poi.name = Some(FALLBACK_POI_NAME.to_string()),
        }
        match poi.description.as_deref() {
            Some(description) if !description.trim().is_empty() => {}
            _ => poi.description = Some(FALLBACK_POI_DESCRIPTION.to_string()),
        }
        if poi.tags.is_none() {
            poi.tags = Some(Vec::new());
        }
    }
    if let Some(name) = poi.name.as_mut() {
        *name = truncate_chars(name, MAX_POI_NAME_CHARS);
    }
    if let Some(description) = poi.description.as_mut() {
        *description = truncate_chars(description, MAX_POI_DESCRIPTION_CHARS);
    }
}
