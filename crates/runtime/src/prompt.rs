//! Prompt assembly.
//!
//! Two strings per turn: fixed system instructions (role, output contract,
//! world rules) and a user prompt assembled in a deterministic section
//! order. Empty sections are omitted entirely. Section order is a pure
//! function of (context, decisions); the only randomness is the quest–POI
//! cross-reference draw, which happens after the policy draws and consumes
//! the same per-character stream.

use std::fmt::Write as _;

use crate::config::{PolicyConfig, SparkSelection};
use crate::journey::{CharacterContext, Poi};
use crate::policy::{CharacterRng, PolicyDecisions, SubsystemRoll};
use crate::util::truncate_chars;

const MAX_SPARK_DESCRIPTION_CHARS: usize = 200;
const MAX_SPARK_TAGS: usize = 5;
const MAX_HISTORY_ACTION_CHARS: usize = 200;
const MAX_HISTORY_RESPONSE_CHARS: usize = 300;

/// The two strings handed to the narrative model.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Fixed system instructions: narrator role, output schema, status and
/// game-over rules.
pub fn system_instructions() -> String {
    concat!(
        "You are the narrator of a text adventure. Respond to the player's action ",
        "with vivid second-person prose, then report your structured intents.\n\n",
        "Respond with a single JSON object matching this shape:\n",
        "{\n",
        "  \"narrative\": \"...\",  // required, the prose shown to the player\n",
        "  \"intents\": {\n",
        "    \"quest\":  { \"action\": \"none|offer|complete|abandon\", \"title\": \"...\", \"summary\": \"...\", \"details\": {} },\n",
        "    \"combat\": { \"action\": \"none|start|continue|end\", \"enemies\": [{ \"name\": \"...\", \"hp\": 0, \"max_hp\": 0, \"weapon\": \"...\", \"status\": \"...\" }], \"notes\": \"...\" },\n",
        "    \"poi\":    { \"action\": \"none|create|reference\", \"name\": \"...\", \"description\": \"...\", \"tags\": [] },\n",
        "    \"meta\":   { \"player_mood\": \"...\", \"pacing\": \"slow|normal|fast\", \"flags\": [] }\n",
        "  }\n",
        "}\n\n",
        "World rules:\n",
        "- Character health only moves toward death: healthy -> wounded -> dead, never backward.\n",
        "- A dead character stays dead. Narrate aftermath only and set every intent action to \"none\".\n",
        "- Do not offer, complete or abandon quests unless the directives below allow it.\n",
        "- Do not invent new points of interest unless the directives below allow it.\n",
        "- If the player dies this turn, say so plainly in the narrative; that ends the game.\n",
    )
    .to_string()
}

/// Assemble the user prompt and resolve the quest–POI cross-reference.
pub fn build_prompt(
    context: &CharacterContext,
    decisions: &PolicyDecisions,
    config: &PolicyConfig,
    rng: &CharacterRng,
) -> Prompt {
    let mut user = String::new();

    // 1. Character status.
    let _ = writeln!(user, "## Character Status\n{}\n", context.status);

    // 2. Current location.
    let _ = writeln!(
        user,
        "## Current Location\n{}\n",
        context.location.display_name
    );

    // 3. Active quest.
    if let Some(quest) = &context.active_quest {
        let _ = writeln!(user, "## Active Quest\n{}: {}", quest.title, quest.summary);
        if !quest.requirements.is_empty() {
            let _ = writeln!(user, "Requirements: {}", quest.requirements.join(", "));
        }
        user.push('\n');
    }

    // 4. Combat state.
    if let Some(combat) = &context.combat {
        let _ = writeln!(user, "## Combat (turn {})", combat.turn);
        for enemy in &combat.enemies {
            let weapon = enemy.weapon.as_deref().unwrap_or("unarmed");
            let status = enemy.status.as_deref().unwrap_or("fighting");
            let _ = writeln!(
                user,
                "- {} ({}/{} hp, {weapon}, {status})",
                enemy.name, enemy.hp, enemy.max_hp
            );
        }
        user.push('\n');
    }

    // 5. Memory sparks, newest first.
    let sparks = sorted_sparks(&context.memory_sparks);
    if !sparks.is_empty() {
        let _ = writeln!(user, "## Places You Remember");
        for spark in &sparks {
            let description = truncate_chars(&spark.description, MAX_SPARK_DESCRIPTION_CHARS);
            let tags: Vec<&str> = spark
                .tags
                .iter()
                .take(MAX_SPARK_TAGS)
                .map(|t| t.as_str())
                .collect();
            if tags.is_empty() {
                let _ = writeln!(user, "- {}: {description}", spark.name);
            } else {
                let _ = writeln!(user, "- {}: {description} [{}]", spark.name, tags.join(", "));
            }
        }
        user.push('\n');
    }

    // 6. Policy hints, including the quest cross-reference when drawn.
    let quest_reference = pick_quest_reference(decisions, &sparks, config, rng);
    let _ = writeln!(user, "## Narrative Directives");
    let _ = writeln!(user, "Quest offer: {}", hint_line(&decisions.quest));
    if let Some(spark) = quest_reference {
        let _ = writeln!(
            user,
            "If you offer a quest, weave in the known place \"{}\": {}",
            spark.name,
            truncate_chars(&spark.description, MAX_SPARK_DESCRIPTION_CHARS)
        );
    }
    let _ = writeln!(
        user,
        "Point of interest creation: {}",
        hint_line(&decisions.poi)
    );
    user.push('\n');

    // 7. Recent history, oldest to newest.
    if !context.recent_history.is_empty() {
        let _ = writeln!(user, "## Recent Events");
        for entry in &context.recent_history {
            let _ = writeln!(
                user,
                "> {}",
                truncate_chars(&entry.player_action, MAX_HISTORY_ACTION_CHARS)
            );
            let _ = writeln!(
                user,
                "{}",
                truncate_chars(&entry.response, MAX_HISTORY_RESPONSE_CHARS)
            );
        }
        user.push('\n');
    }

    // 8. The current player action is appended by the orchestrator wrapper
    // below so tests can cover the sections independently.
    Prompt {
        system: system_instructions(),
        user,
    }
}

/// Complete the prompt with the player action section.
pub fn with_player_action(mut prompt: Prompt, player_action: &str) -> Prompt {
    let _ = write!(prompt.user, "## Player Action\n{player_action}");
    prompt
}

fn hint_line(roll: &SubsystemRoll) -> String {
    if roll.passed {
        "ALLOWED".to_string()
    } else {
        match roll.blocked_reason() {
            Some(reason) => format!("NOT ALLOWED ({reason})"),
            None => "NOT ALLOWED".to_string(),
        }
    }
}

/// Newest-first by creation time; undated sparks sort last.
fn sorted_sparks(sparks: &[Poi]) -> Vec<&Poi> {
    let mut sorted: Vec<&Poi> = sparks.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted
}

/// One extra draw decides whether the quest hint references a remembered
/// place; the spark itself is then chosen by the configured strategy.
fn pick_quest_reference<'a>(
    decisions: &PolicyDecisions,
    sparks: &[&'a Poi],
    config: &PolicyConfig,
    rng: &CharacterRng,
) -> Option<&'a Poi> {
    if !decisions.quest.passed || sparks.is_empty() {
        return None;
    }
    if rng.roll() >= config.quest_poi_reference_probability {
        return None;
    }
    let index = match config.spark_selection {
        SparkSelection::Random => rng.pick(sparks.len()),
        SparkSelection::RecencyWeighted => weighted_recency_pick(sparks.len(), rng),
    };
    sparks.get(index).copied()
}

/// Sample an index with weight proportional to recency rank: the newest of
/// `n` candidates has weight `n`, the oldest weight 1.
fn weighted_recency_pick(n: usize, rng: &CharacterRng) -> usize {
    let total: usize = n * (n + 1) / 2;
    let mut target = (rng.roll() * total as f64) as usize;
    for index in 0..n {
        let weight = n - index;
        if target < weight {
            return index;
        }
        target -= weight;
    }
    n - 1
}
