//! Per-provider model level tables.
//!
//! The orchestrator speaks `level1|level2|level3`; each table translates a
//! level to a concrete model id and, where the provider supports it, a
//! reasoning effort. Levels outside the table's bounds are clamped.

use crate::domain::models::provider::{ModelLevel, ResolvedModel};

/// One row of a model table.
#[derive(Debug, Clone)]
struct ModelEntry {
    model_id: &'static str,
    reasoning_effort: Option<&'static str>,
}

/// Level-to-model mapping for one provider.
#[derive(Debug, Clone)]
pub struct ModelTable {
    min_level: ModelLevel,
    max_level: ModelLevel,
    default_level: ModelLevel,
    /// Indexed by level1/level2/level3.
    entries: [ModelEntry; 3],
    /// Effort from the entries is only honored when true.
    supports_reasoning_effort: bool,
}

impl ModelTable {
    /// The Claude CLI table. The CLI picks its own reasoning budget, so
    /// effort overrides are not honored.
    pub fn claude_cli() -> Self {
        Self {
            min_level: ModelLevel::Level1,
            max_level: ModelLevel::Level3,
            default_level: ModelLevel::Level2,
            entries: [
                ModelEntry {
                    model_id: "claude-3-5-haiku-20241022",
                    reasoning_effort: None,
                },
                ModelEntry {
                    model_id: "claude-sonnet-4-5-20250929",
                    reasoning_effort: None,
                },
                ModelEntry {
                    model_id: "claude-opus-4-1-20250805",
                    reasoning_effort: None,
                },
            ],
            supports_reasoning_effort: false,
        }
    }

    /// The direct Anthropic API table; effort maps to a thinking budget.
    pub fn anthropic_api() -> Self {
        Self {
            min_level: ModelLevel::Level1,
            max_level: ModelLevel::Level3,
            default_level: ModelLevel::Level2,
            entries: [
                ModelEntry {
                    model_id: "claude-3-5-haiku-20241022",
                    reasoning_effort: Some("low"),
                },
                ModelEntry {
                    model_id: "claude-sonnet-4-5-20250929",
                    reasoning_effort: Some("medium"),
                },
                ModelEntry {
                    model_id: "claude-opus-4-1-20250805",
                    reasoning_effort: Some("high"),
                },
            ],
            supports_reasoning_effort: true,
        }
    }

    pub fn default_level(&self) -> ModelLevel {
        self.default_level
    }

    /// Resolve a level, clamping into the table's bounds.
    pub fn resolve(&self, level: ModelLevel) -> ResolvedModel {
        let clamped = level.clamp_to(self.min_level, self.max_level);
        let entry = match clamped {
            ModelLevel::Level1 => &self.entries[0],
            ModelLevel::Level2 => &self.entries[1],
            ModelLevel::Level3 => &self.entries[2],
        };
        ResolvedModel {
            model_id: entry.model_id.to_string(),
            reasoning_effort: if self.supports_reasoning_effort {
                entry.reasoning_effort.map(str::to_string)
            } else {
                None
            },
        }
    }
}
