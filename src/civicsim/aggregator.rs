//! Projects agent reactions onto per-zone sentiment.
//!
//! Pure, no I/O. The canonical rule is one agent per zone (agent key ≡ zone
//! id), so aggregation is a direct mapping: each zone's sentiment is its own
//! agent's stance, scored as `sign(stance) × intensity` rounded to three
//! decimals. Zones whose agent produced no reaction read as neutral with an
//! empty quote ledger.

use crate::catalog;
use crate::model::{AgentReaction, QuoteAttribution, Stance, ZoneSentiment};

/// Stateless aggregator over the static zone catalog.
pub struct ZoneAggregator;

impl ZoneAggregator {
    /// Sentiment for every zone in the catalog, in catalog order. Always
    /// returns exactly one entry per zone.
    pub fn aggregate(reactions: &[AgentReaction]) -> Vec<ZoneSentiment> {
        catalog::ZONES
            .iter()
            .map(|zone| {
                let reaction = reactions.iter().find(|r| r.agent_key == zone.id);
                match reaction {
                    Some(r) => Self::project(r, zone.id, zone.name),
                    None => Self::neutral(zone.id, zone.name),
                }
            })
            .collect()
    }

    /// Sentiment induced by a single reaction on its own zone, used by the
    /// streaming path to update a job incrementally. `None` when the agent
    /// key matches no zone.
    pub fn zone_sentiment_for(reaction: &AgentReaction) -> Option<ZoneSentiment> {
        let zone = catalog::get_zone(&reaction.agent_key)?;
        Some(Self::project(reaction, zone.id, zone.name))
    }

    fn project(reaction: &AgentReaction, zone_id: &str, zone_name: &str) -> ZoneSentiment {
        let raw = reaction.stance.sign() * reaction.intensity;
        let score = (raw * 1000.0).round() / 1000.0;

        let mut top_support_quotes = Vec::new();
        let mut top_oppose_quotes = Vec::new();
        if !reaction.quote.is_empty() {
            let attribution = QuoteAttribution {
                agent_name: reaction.agent_name.clone(),
                quote: reaction.quote.clone(),
            };
            match reaction.stance {
                Stance::Support => top_support_quotes.push(attribution),
                Stance::Oppose => top_oppose_quotes.push(attribution),
                Stance::Neutral => {}
            }
        }

        ZoneSentiment {
            zone_id: zone_id.to_string(),
            zone_name: zone_name.to_string(),
            sentiment: reaction.stance,
            score,
            top_support_quotes,
            top_oppose_quotes,
        }
    }

    fn neutral(zone_id: &str, zone_name: &str) -> ZoneSentiment {
        ZoneSentiment {
            zone_id: zone_id.to_string(),
            zone_name: zone_name.to_string(),
            sentiment: Stance::Neutral,
            score: 0.0,
            top_support_quotes: Vec::new(),
            top_oppose_quotes: Vec::new(),
        }
    }
}
